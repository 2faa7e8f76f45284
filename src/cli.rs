use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::{Map, Value};
use std::path::PathBuf;
use std::sync::Arc;

use crate::audit::LogLevel;
use crate::audit_store::{AppendOnlyStore, QueryFilter};
use crate::config::AuditConfig;
use crate::crypto::keys::generate_key_hex;
use crate::crypto::CryptoEngine;
use crate::entropy::OsEntropy;
use crate::log_sink::{entry_line, EntrySink, StdoutSink, TeeSink};
use crate::logger::AuditLogger;

/// Top-level CLI interface for the audit store
#[derive(Parser)]
#[command(
    name = "sentinel-audit",
    version,
    about = "Tamper-evident audit log tool"
)]
pub struct Cli {
    /// TOML configuration file (defaults to ./audit.toml when present)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Print a fresh HMAC key and encryption key as environment assignments
    Keygen,

    /// Log one event through the configured logger into the store
    Emit {
        #[arg(long)]
        event_type: String,
        #[arg(short, long, default_value = "")]
        message: String,
        #[arg(short, long, default_value = "info")]
        level: LogLevel,
        /// JSON object used as the entry payload
        #[arg(short, long)]
        payload: Option<String>,
        #[arg(long)]
        session_id: Option<String>,
        #[arg(long)]
        agent_id: Option<String>,
        /// Also write the entry to stdout
        #[arg(long)]
        echo: bool,
    },

    /// Verify entry signatures in one file, or in every day file when no file is given
    Verify {
        #[arg(short, long)]
        file: Option<PathBuf>,
    },

    /// Print stored entries matching every given filter
    Query {
        #[arg(long)]
        event_type: Option<String>,
        #[arg(long)]
        level: Option<LogLevel>,
        #[arg(long)]
        session_id: Option<String>,
        #[arg(long)]
        user_id: Option<String>,
        /// Replace encrypted payload fields with their plaintext
        #[arg(long)]
        decrypt: bool,
    },

    /// SHA-256 of a file
    Hash { file: PathBuf },
}

pub fn dispatch(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Keygen => {
            println!("AUDIT_HMAC_KEY={}", generate_key_hex(&OsEntropy)?);
            println!("AUDIT_ENCRYPTION_KEY={}", generate_key_hex(&OsEntropy)?);
            Ok(())
        }
        Commands::Hash { file } => {
            println!("{}  {}", CryptoEngine::hash_file(&file)?, file.display());
            Ok(())
        }
        Commands::Emit {
            event_type,
            message,
            level,
            payload,
            session_id,
            agent_id,
            echo,
        } => {
            let config = load_config(cli.config)?;
            let crypto = Arc::new(CryptoEngine::from_config(&config)?);
            let store: Arc<dyn EntrySink> = Arc::new(AppendOnlyStore::open(&config, crypto.clone())?);
            let sink: Arc<dyn EntrySink> = if echo {
                Arc::new(TeeSink::new(vec![store, Arc::new(StdoutSink)]))
            } else {
                store
            };

            let mut logger = AuditLogger::from_config(&config, crypto, sink);
            if let Some(session_id) = session_id.as_deref() {
                logger.set_session(session_id, agent_id.as_deref());
            }
            let payload = payload.as_deref().map(parse_payload).transpose()?;

            match logger.log(level, &event_type, &message, payload) {
                Some(entry) => {
                    tracing::info!(correlation_id = %entry.correlation_id, "entry emitted");
                }
                None if !logger.features().structured_logging => {
                    tracing::warn!("structured logging is disabled; nothing was written");
                }
                None => bail!("entry could not be built; see diagnostics above"),
            }
            Ok(())
        }
        Commands::Verify { file } => {
            let config = load_config(cli.config)?;
            let crypto = Arc::new(CryptoEngine::from_config(&config)?);
            let store = AppendOnlyStore::open(&config, crypto)?;

            let summaries = match file {
                Some(path) => vec![store.verify_integrity_detailed(&path)?],
                None => store.verify_all()?,
            };
            for summary in &summaries {
                println!(
                    "OK {}: {} verified, {} unsigned{}",
                    summary.location,
                    summary.verified,
                    summary.unsigned,
                    if summary.partial_trailing_line {
                        ", partial trailing line ignored"
                    } else {
                        ""
                    }
                );
            }
            if summaries.is_empty() {
                println!("no audit files under {}", config.log_dir.display());
            }
            Ok(())
        }
        Commands::Query {
            event_type,
            level,
            session_id,
            user_id,
            decrypt,
        } => {
            let config = load_config(cli.config)?;
            let crypto = Arc::new(CryptoEngine::from_config(&config)?);
            let store = AppendOnlyStore::open(&config, crypto.clone())?;
            let filter = QueryFilter {
                event_type,
                level,
                session_id,
                user_id,
            };

            for mut entry in store.query(&filter) {
                if decrypt && !entry.encrypted_fields.is_empty() {
                    entry.payload = crypto.decrypt_entry_fields(&entry).with_context(|| {
                        format!("decrypting entry {}", entry.correlation_id)
                    })?;
                }
                println!("{}", entry_line(&entry)?);
            }
            Ok(())
        }
    }
}

fn load_config(path: Option<PathBuf>) -> Result<AuditConfig> {
    AuditConfig::load_from(path.as_deref()).context("loading audit configuration")
}

fn parse_payload(raw: &str) -> Result<Map<String, Value>> {
    match serde_json::from_str::<Value>(raw).context("payload is not valid JSON")? {
        Value::Object(map) => Ok(map),
        other => Err(anyhow!("payload must be a JSON object, got {}", other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_query_filters() {
        let cli = Cli::try_parse_from([
            "sentinel-audit",
            "query",
            "--event-type",
            "LOGIN",
            "--level",
            "warn",
            "--decrypt",
        ])
        .unwrap();
        match cli.command {
            Commands::Query {
                event_type,
                level,
                decrypt,
                user_id,
                ..
            } => {
                assert_eq!(event_type.as_deref(), Some("LOGIN"));
                assert_eq!(level, Some(LogLevel::Warn));
                assert!(decrypt);
                assert!(user_id.is_none());
            }
            _ => panic!("expected query"),
        }
    }

    #[test]
    fn payload_must_be_an_object() {
        assert_eq!(parse_payload(r#"{"a":1}"#).unwrap()["a"], 1);
        assert!(parse_payload("[1,2]").is_err());
        assert!(parse_payload("{").is_err());
    }
}
