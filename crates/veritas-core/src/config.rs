//! Configuration management for the Veritas recorder.
//!
//! Configuration is loaded from (in priority order):
//! 1. Environment variables (`VERITAS_` prefix, `__` separator)
//! 2. Config file (`veritas.toml`)
//! 3. Defaults

use serde::Deserialize;

use crate::error::VeritasError;

/// Recorder configuration.
///
/// Loaded from the `[recorder]` section of `veritas.toml` or
/// `VERITAS_RECORDER__*` environment variables.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct RecorderConfig {
    /// Directory for the file-backed session store.
    #[serde(default = "default_store_dir")]
    pub store_dir: String,

    /// Buffered messages per live-view subscriber before it starts lagging.
    #[serde(default = "default_stream_capacity")]
    pub stream_capacity: usize,

    /// Agent identity used when a caller does not name one.
    #[serde(default = "default_agent_id")]
    pub agent_id: String,

    /// Reject ACTION entries that cite no observation.
    #[serde(default)]
    pub require_action_basis: bool,
}

fn default_store_dir() -> String {
    "./sessions".to_string()
}

fn default_stream_capacity() -> usize {
    1024
}

fn default_agent_id() -> String {
    "veritas-agent".to_string()
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            store_dir: default_store_dir(),
            stream_capacity: default_stream_capacity(),
            agent_id: default_agent_id(),
            require_action_basis: false,
        }
    }
}

/// Load the recorder configuration from `{file_prefix}.toml` (optional) and
/// the environment. A missing `[recorder]` section yields the defaults.
pub fn load_recorder_config(file_prefix: &str) -> Result<RecorderConfig, VeritasError> {
    let cfg = config::Config::builder()
        .add_source(config::File::with_name(file_prefix).required(false))
        .add_source(
            config::Environment::with_prefix("VERITAS")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;

    match cfg.get::<RecorderConfig>("recorder") {
        Ok(c) => Ok(c),
        Err(config::ConfigError::NotFound(_)) => Ok(RecorderConfig::default()),
        Err(e) => Err(e.into()),
    }
}
