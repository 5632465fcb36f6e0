//! CLI entry point for the Veritas flight recorder.
//!
//! Reads drafts and proof bundles as JSON, writes JSON results to stdout.
//! Logs go to stderr so stdout can be piped.

use std::io::BufRead;
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::{fmt, EnvFilter};

use veritas_core::config::load_recorder_config;
use veritas_core::{Digest, EntryDraft, RecorderConfig, SessionId};
use veritas_recorder::{
    proof, verify_export, EvidencePolicy, FileSessionStore, InclusionProof, SessionExport,
    SessionManager, SessionQuery, SessionStore, VerificationReport,
};

#[derive(Parser)]
#[command(name = "veritas")]
#[command(about = "Tamper-evident flight recorder for autonomous agents")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Config file prefix (default: veritas).
    #[arg(short, long, default_value = "veritas", global = true)]
    config: String,

    /// Override the session store directory.
    #[arg(long, global = true)]
    store_dir: Option<PathBuf>,

    /// Emit logs as JSON.
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Record a session from JSON-lines entry drafts on stdin.
    Record {
        /// Agent identity (defaults to the configured agent).
        #[arg(long)]
        agent: Option<String>,
        /// Seal the session after the last draft.
        #[arg(long)]
        seal: bool,
        /// Echo live recorder events to stderr.
        #[arg(long)]
        follow: bool,
    },
    /// Seal an open session and print its root.
    Seal {
        #[arg(long)]
        session: SessionId,
    },
    /// Write a session export for offline verification.
    Export {
        #[arg(long)]
        session: SessionId,
        /// Output file (stdout if omitted).
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
    /// Verify an exported session file.
    Verify {
        /// Path to the export JSON.
        file: PathBuf,
    },
    /// Produce an inclusion proof bundle for one entry.
    Prove {
        #[arg(long)]
        session: SessionId,
        #[arg(long)]
        sequence: u64,
    },
    /// Check a proof bundle produced by `prove`.
    CheckProof {
        /// Path to the bundle JSON.
        file: PathBuf,
    },
    /// List recorded sessions.
    List {
        /// Only sessions of this agent.
        #[arg(long)]
        agent: Option<String>,
    },
}

/// Self-contained inclusion claim: this leaf is in the tree with this root.
#[derive(Debug, Serialize, Deserialize)]
struct ProofBundle {
    leaf_hash: Digest,
    root: Digest,
    proof: InclusionProof,
}

impl ProofBundle {
    fn read_from(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading proof bundle {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("parsing proof bundle {}", path.display()))
    }

    fn holds(&self) -> bool {
        proof::verify(&self.leaf_hash, &self.proof, &self.root)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json);

    let mut config = load_recorder_config(&cli.config)?;
    if let Some(dir) = &cli.store_dir {
        config.store_dir = dir.display().to_string();
    }

    match cli.command {
        Command::Record {
            agent,
            seal,
            follow,
        } => {
            let agent = agent.unwrap_or_else(|| config.agent_id.clone());
            record(open_manager(&config)?, &agent, seal, follow).await?;
        }
        Command::Seal { session } => {
            let root = open_manager(&config)?.seal(session)?;
            println!("{}", serde_json::json!({ "session_id": session, "session_root": root }));
        }
        Command::Export { session, out } => {
            let json = open_manager(&config)?.export(session)?.to_json_pretty()?;
            match out {
                Some(path) => {
                    std::fs::write(&path, json)?;
                    tracing::info!(session_id = %session, path = %path.display(), "Export written");
                }
                None => println!("{json}"),
            }
        }
        Command::Verify { file } => {
            let report = verify_file(&file)?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            if !report.is_valid {
                anyhow::bail!("{}", report.message);
            }
        }
        Command::Prove { session, sequence } => {
            let bundle = prove(&open_manager(&config)?, session, sequence)?;
            println!("{}", serde_json::to_string_pretty(&bundle)?);
        }
        Command::CheckProof { file } => {
            let bundle = ProofBundle::read_from(&file)?;
            let valid = bundle.holds();
            println!("{}", serde_json::json!({ "valid": valid }));
            if !valid {
                anyhow::bail!("proof does not match root {}", bundle.root);
            }
        }
        Command::List { agent } => {
            let query = SessionQuery {
                agent_id: agent,
                ..Default::default()
            };
            let sessions = open_manager(&config)?.list_sessions(&query)?;
            println!("{}", serde_json::to_string_pretty(&sessions)?);
        }
    }

    Ok(())
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = fmt().with_env_filter(filter).with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn open_manager(config: &RecorderConfig) -> anyhow::Result<SessionManager<FileSessionStore>> {
    let store = FileSessionStore::new(&config.store_dir)
        .with_context(|| format!("opening session store {}", config.store_dir))?
        .with_policy(EvidencePolicy::from(config));
    Ok(SessionManager::new(store, config))
}

/// Append every draft read from stdin to a fresh session.
async fn record(
    manager: SessionManager<FileSessionStore>,
    agent: &str,
    seal: bool,
    follow: bool,
) -> anyhow::Result<()> {
    let viewer = follow.then(|| {
        let mut rx = manager.subscribe();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        if let Ok(line) = serde_json::to_string(&event) {
                            eprintln!("{line}");
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Live view fell behind");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    });

    let (session_id, session_root) =
        record_drafts(&manager, agent, std::io::stdin().lock(), seal)?;

    // Closing the channel lets the viewer drain and exit.
    drop(manager);
    if let Some(handle) = viewer {
        handle.await?;
    }

    println!(
        "{}",
        serde_json::json!({ "session_id": session_id, "session_root": session_root })
    );
    Ok(())
}

/// Append one draft per non-blank JSON line to a fresh session, sealing it
/// afterwards when asked.
fn record_drafts<S: SessionStore>(
    manager: &SessionManager<S>,
    agent: &str,
    reader: impl BufRead,
    seal: bool,
) -> anyhow::Result<(SessionId, Option<Digest>)> {
    let session_id = manager.open_session(agent)?;
    for (n, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let draft: EntryDraft = serde_json::from_str(&line)
            .with_context(|| format!("parsing draft on line {}", n + 1))?;
        manager.append(session_id, draft)?;
    }

    let session_root = if seal {
        Some(manager.seal(session_id)?)
    } else {
        None
    };
    Ok((session_id, session_root))
}

fn verify_file(path: &Path) -> anyhow::Result<VerificationReport> {
    let export = SessionExport::read_from(path)
        .with_context(|| format!("reading export {}", path.display()))?;
    Ok(verify_export(&export))
}

fn prove<S: SessionStore>(
    manager: &SessionManager<S>,
    session: SessionId,
    sequence: u64,
) -> anyhow::Result<ProofBundle> {
    let proof = manager.prove(session, sequence)?;
    let snapshot = manager.snapshot(session)?;
    let root = snapshot
        .session_root()
        .context("sealed session has no root")?;
    let leaf_hash = snapshot
        .chain()
        .get(sequence)
        .map(|e| e.entry_hash)
        .context("entry missing after proof generation")?;

    Ok(ProofBundle {
        leaf_hash,
        root,
        proof,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    use tempfile::TempDir;
    use veritas_core::SessionStatus;

    const DRAFTS: &str = r#"
{"event_type":"OBSERVATION","tool_name":"get_price","input_params":{"pair":"ETH/USD"},"output_result":2450.17}

{"event_type":"ACTION","tool_name":"swap","input_params":{"amount":"0.1"},"output_result":"tx sent","basis_id":0}
"#;

    fn file_manager(dir: &TempDir) -> SessionManager<FileSessionStore> {
        let config = RecorderConfig {
            store_dir: dir.path().join("sessions").display().to_string(),
            ..Default::default()
        };
        open_manager(&config).unwrap()
    }

    fn recorded(dir: &TempDir) -> (SessionManager<FileSessionStore>, SessionId) {
        let manager = file_manager(dir);
        let (id, root) = record_drafts(&manager, "cli-agent", Cursor::new(DRAFTS), true).unwrap();
        assert!(root.is_some());
        (manager, id)
    }

    #[test]
    fn record_with_seal_persists_a_sealed_session() {
        let dir = TempDir::new().unwrap();
        let (_, id) = recorded(&dir);

        // A second process sees the same sealed session.
        let reopened = file_manager(&dir);
        let session = reopened.snapshot(id).unwrap();
        assert_eq!(session.status(), SessionStatus::Sealed);
        assert_eq!(session.entries().len(), 2);
        assert_eq!(session.entries()[1].basis_id, Some(0));
    }

    #[test]
    fn record_without_seal_leaves_session_open() {
        let dir = TempDir::new().unwrap();
        let manager = file_manager(&dir);
        let (id, root) =
            record_drafts(&manager, "cli-agent", Cursor::new(DRAFTS), false).unwrap();
        assert!(root.is_none());
        assert_eq!(manager.snapshot(id).unwrap().status(), SessionStatus::Open);
    }

    #[test]
    fn malformed_draft_line_is_reported() {
        let dir = TempDir::new().unwrap();
        let manager = file_manager(&dir);
        let err = record_drafts(&manager, "cli-agent", Cursor::new("\n{oops}\n"), true)
            .unwrap_err();
        assert!(err.to_string().contains("line 2"), "{err}");
    }

    #[test]
    fn proof_bundle_survives_a_trip_through_a_file() {
        let dir = TempDir::new().unwrap();
        let (manager, id) = recorded(&dir);

        let path = dir.path().join("proof.json");
        let bundle = prove(&manager, id, 1).unwrap();
        std::fs::write(&path, serde_json::to_string_pretty(&bundle).unwrap()).unwrap();

        let loaded = ProofBundle::read_from(&path).unwrap();
        assert!(loaded.holds());
        assert_eq!(loaded.root, manager.snapshot(id).unwrap().session_root().unwrap());
    }

    #[test]
    fn proof_bundle_with_foreign_root_does_not_hold() {
        let dir = TempDir::new().unwrap();
        let (manager, id) = recorded(&dir);

        let mut bundle = prove(&manager, id, 0).unwrap();
        bundle.root = Digest([7; 32]);
        assert!(!bundle.holds());

        let mut bundle = prove(&manager, id, 0).unwrap();
        bundle.leaf_hash = manager.entries(id).unwrap()[1].entry_hash;
        assert!(!bundle.holds());
    }

    #[test]
    fn verify_file_accepts_an_untouched_export_and_rejects_an_edited_one() {
        let dir = TempDir::new().unwrap();
        let (manager, id) = recorded(&dir);
        let path = dir.path().join("export.json");
        let json = manager.export(id).unwrap().to_json_pretty().unwrap();

        std::fs::write(&path, &json).unwrap();
        assert!(verify_file(&path).unwrap().is_valid);

        std::fs::write(&path, json.replace("2450.17", "24501.7")).unwrap();
        let report = verify_file(&path).unwrap();
        assert!(!report.is_valid);
        assert!(report
            .failures()
            .any(|f| f.text.contains("TAMPER DETECTED in entry #0")));
    }

    #[test]
    fn verify_file_reports_unreadable_input() {
        let dir = TempDir::new().unwrap();
        assert!(verify_file(&dir.path().join("missing.json")).is_err());
    }
}
