//! Library root for the `sentinel_audit` crate
//! Tamper-evident audit logging: signed entries, encrypted fields, append-only day files

// Core error handling
pub mod errors;

// Injected collaborators
pub mod clock;
pub mod config;
pub mod entropy;
pub mod storage;

// Cryptography & canonical form
pub mod canonicalize;
pub mod crypto;

// Entries & logging
pub mod audit;
pub mod log_sink;
pub mod logger;
pub mod session_context;

// Persistence & verification
pub mod audit_store;
pub mod audit_verifier;

// Command line
pub mod cli;


pub use audit::{LogEntry, LogLevel, SourceLocation};
pub use audit_store::{AppendOnlyStore, QueryFilter};
pub use audit_verifier::VerifySummary;
pub use config::AuditConfig;
pub use crypto::{CryptoEngine, EncryptedField};
pub use errors::{AuditError, AuditResult};
pub use log_sink::{EntrySink, MemorySink, StdoutSink};
pub use logger::{AuditLogger, FeatureFlags};
