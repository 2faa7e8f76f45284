// Audit entry schema
// One LogEntry is one persisted JSON line; field names are part of the signed form.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

use crate::errors::AuditError;

pub const SCHEMA_VERSION: &str = "1.0";
pub const CLASSIFICATION: &str = "CONFIDENTIAL";
pub const UNKNOWN_LOCATION: &str = "unknown:0";

/// Severity levels for audit entries
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
    Critical,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
            LogLevel::Critical => "CRITICAL",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = AuditError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "INFO" => Ok(LogLevel::Info),
            "WARN" | "WARNING" => Ok(LogLevel::Warn),
            "ERROR" => Ok(LogLevel::Error),
            "CRITICAL" => Ok(LogLevel::Critical),
            other => Err(AuditError::config(format!("unknown log level {other}"))),
        }
    }
}

/// Environment name and wall time at entry construction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextSnapshot {
    pub environment: String,
    pub timestamp_ms: i64,
}

/// Where a log call came from, rendered as `file:line`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceLocation {
    pub file: &'static str,
    pub line: u32,
}

impl SourceLocation {
    pub const fn new(file: &'static str, line: u32) -> Self {
        Self { file, line }
    }

    /// Location of whoever called the `#[track_caller]` function this runs in.
    #[track_caller]
    pub fn caller() -> Self {
        let location = std::panic::Location::caller();
        Self {
            file: location.file(),
            line: location.line(),
        }
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file, self.line)
    }
}

/// Structured, optionally signed audit record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: String,
    pub level: LogLevel,
    pub event_type: String,
    pub session_id: String,
    pub agent_id: String,
    pub user_id: String,
    pub correlation_id: String,
    pub schema_version: String,
    pub context_snapshot: ContextSnapshot,
    pub classification: String,
    pub source_file: String,
    pub tags: Vec<String>,
    pub payload: Map<String, Value>,
    #[serde(default)]
    pub encrypted_fields: Vec<String>,
    /// Lowercase hex HMAC, or empty when the entry carries no integrity claim
    #[serde(default)]
    pub hmac_signature: String,
}

impl LogEntry {
    /// Unsigned entry with the fixed schema fields filled in.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        now: DateTime<Utc>,
        level: LogLevel,
        event_type: &str,
        session_id: &str,
        agent_id: &str,
        user_id: &str,
        correlation_id: String,
        environment: &str,
        source: SourceLocation,
        payload: Map<String, Value>,
    ) -> Self {
        Self {
            timestamp: format_timestamp(now),
            level,
            event_type: event_type.to_string(),
            session_id: session_id.to_string(),
            agent_id: agent_id.to_string(),
            user_id: user_id.to_string(),
            correlation_id,
            schema_version: SCHEMA_VERSION.to_string(),
            context_snapshot: ContextSnapshot {
                environment: environment.to_string(),
                timestamp_ms: now.timestamp_millis(),
            },
            classification: CLASSIFICATION.to_string(),
            source_file: source.to_string(),
            tags: tags_for(event_type),
            payload,
            encrypted_fields: Vec::new(),
            hmac_signature: String::new(),
        }
    }

    pub fn is_signed(&self) -> bool {
        !self.hmac_signature.is_empty()
    }
}

/// ISO-8601 UTC with millisecond precision, e.g. `2026-03-01T12:00:00.000Z`.
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Single tag: the event type up to its first underscore.
pub fn tags_for(event_type: &str) -> Vec<String> {
    let head = event_type.split('_').next().unwrap_or(event_type);
    vec![head.to_string()]
}
