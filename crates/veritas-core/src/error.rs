use thiserror::Error;

/// Top-level error type for shared Veritas types and configuration.
#[derive(Error, Debug)]
pub enum VeritasError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Invalid digest: {0}")]
    InvalidDigest(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// A payload that has no canonical byte representation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EncodingError {
    #[error("Non-finite float at {path}")]
    NonFiniteFloat { path: String },

    #[error("Payload nesting exceeds {max} levels at {path}")]
    TooDeep { path: String, max: usize },

    #[error("Length {len} at {path} exceeds the u32 length prefix")]
    TooLong { path: String, len: usize },
}
