//! Entry-building logger
//!
//! `AuditLogger` turns a `(level, event_type, message, payload)` call into a
//! [`LogEntry`], encrypts configured sensitive payload fields, signs the
//! result and hands it to an [`EntrySink`]. Nothing on this path returns an
//! error to the caller: failures are reported through `tracing` and the call
//! yields `None`.
//!
//! The `message` argument is a human note for diagnostics. It is sent to
//! `tracing` at debug level and is not part of the persisted entry.

use std::sync::Arc;

use serde_json::{Map, Value};

use crate::audit::{LogEntry, LogLevel, SourceLocation};
use crate::canonicalize::canonical_json;
use crate::clock::{Clock, SystemClock};
use crate::config::AuditConfig;
use crate::crypto::CryptoEngine;
use crate::entropy::{random_token, EntropySource, OsEntropy};
use crate::errors::{AuditError, AuditResult};
use crate::log_sink::EntrySink;
use crate::session_context::SessionContext;

pub const CORRELATION_PREFIX: &str = "req-";
const CORRELATION_LEN: usize = 9;

/// Independent switches; all default to off.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FeatureFlags {
    pub structured_logging: bool,
    pub field_encryption: bool,
    pub tamper_evident: bool,
}

impl FeatureFlags {
    pub fn all() -> Self {
        Self {
            structured_logging: true,
            field_encryption: true,
            tamper_evident: true,
        }
    }
}

pub struct AuditLogger {
    crypto: Arc<CryptoEngine>,
    clock: Arc<dyn Clock>,
    entropy: Arc<dyn EntropySource>,
    sink: Arc<dyn EntrySink>,
    session: SessionContext,
    environment: String,
    features: FeatureFlags,
    sensitive_fields: Vec<String>,
}

impl AuditLogger {
    /// Logger with every feature off and built-in defaults elsewhere.
    pub fn new(crypto: Arc<CryptoEngine>, sink: Arc<dyn EntrySink>) -> Self {
        let defaults = AuditConfig::default();
        Self {
            crypto,
            clock: Arc::new(SystemClock),
            entropy: Arc::new(OsEntropy),
            sink,
            session: SessionContext::new(&defaults.default_user_id),
            environment: defaults.environment.clone(),
            features: FeatureFlags::default(),
            sensitive_fields: defaults.sensitive_fields(),
        }
    }

    pub fn from_config(
        config: &AuditConfig,
        crypto: Arc<CryptoEngine>,
        sink: Arc<dyn EntrySink>,
    ) -> Self {
        Self::new(crypto, sink)
            .with_features(config.features())
            .with_sensitive_fields(config.sensitive_fields())
            .with_environment(&config.environment)
            .with_session(SessionContext::new(&config.default_user_id))
    }

    pub fn with_features(mut self, features: FeatureFlags) -> Self {
        self.features = features;
        self
    }

    pub fn with_sensitive_fields(mut self, fields: Vec<String>) -> Self {
        let mut unique: Vec<String> = Vec::with_capacity(fields.len());
        for field in fields {
            if !unique.contains(&field) {
                unique.push(field);
            }
        }
        self.sensitive_fields = unique;
        self
    }

    pub fn with_environment(mut self, environment: &str) -> Self {
        self.environment = environment.to_string();
        self
    }

    pub fn with_session(mut self, session: SessionContext) -> Self {
        self.session = session;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_entropy(mut self, entropy: Arc<dyn EntropySource>) -> Self {
        self.entropy = entropy;
        self
    }

    pub fn set_session(&mut self, session_id: &str, agent_id: Option<&str>) {
        self.session.set_session(session_id, agent_id);
    }

    pub fn session(&self) -> &SessionContext {
        &self.session
    }

    pub fn features(&self) -> FeatureFlags {
        self.features
    }

    #[track_caller]
    pub fn info(
        &self,
        event_type: &str,
        message: &str,
        payload: Option<Map<String, Value>>,
    ) -> Option<LogEntry> {
        self.log(LogLevel::Info, event_type, message, payload)
    }

    #[track_caller]
    pub fn warn(
        &self,
        event_type: &str,
        message: &str,
        payload: Option<Map<String, Value>>,
    ) -> Option<LogEntry> {
        self.log(LogLevel::Warn, event_type, message, payload)
    }

    #[track_caller]
    pub fn error(
        &self,
        event_type: &str,
        message: &str,
        payload: Option<Map<String, Value>>,
    ) -> Option<LogEntry> {
        self.log(LogLevel::Error, event_type, message, payload)
    }

    #[track_caller]
    pub fn critical(
        &self,
        event_type: &str,
        message: &str,
        payload: Option<Map<String, Value>>,
    ) -> Option<LogEntry> {
        self.log(LogLevel::Critical, event_type, message, payload)
    }

    /// Log with the caller's own file and line as `source_file`.
    #[track_caller]
    pub fn log(
        &self,
        level: LogLevel,
        event_type: &str,
        message: &str,
        payload: Option<Map<String, Value>>,
    ) -> Option<LogEntry> {
        self.log_at(SourceLocation::caller(), level, event_type, message, payload)
    }

    /// Build, protect and emit one entry. Returns what was emitted, or `None`
    /// when logging is off or the entry could not be built safely.
    pub fn log_at(
        &self,
        location: SourceLocation,
        level: LogLevel,
        event_type: &str,
        message: &str,
        payload: Option<Map<String, Value>>,
    ) -> Option<LogEntry> {
        if !self.features.structured_logging {
            return None;
        }

        let entry = match self.build_entry(location, level, event_type, payload) {
            Ok(entry) => entry,
            Err(e) => {
                tracing::error!(
                    event_type,
                    error = %e,
                    "audit entry dropped before emission"
                );
                return None;
            }
        };

        tracing::debug!(
            level = %level,
            event_type,
            correlation_id = %entry.correlation_id,
            "{}",
            message
        );

        if let Err(e) = self.sink.emit(&entry) {
            tracing::warn!(
                event_type,
                correlation_id = %entry.correlation_id,
                error = %e,
                "audit sink failed to accept entry"
            );
        }
        Some(entry)
    }

    fn build_entry(
        &self,
        location: SourceLocation,
        level: LogLevel,
        event_type: &str,
        payload: Option<Map<String, Value>>,
    ) -> AuditResult<LogEntry> {
        let correlation_id = format!(
            "{}{}",
            CORRELATION_PREFIX,
            random_token(self.entropy.as_ref(), CORRELATION_LEN)?
        );
        let mut entry = LogEntry::new(
            self.clock.now(),
            level,
            event_type,
            self.session.effective_session_id(),
            &self.session.agent_id,
            &self.session.user_id,
            correlation_id,
            &self.environment,
            location,
            payload.unwrap_or_default(),
        );

        if self.features.field_encryption && !entry.payload.is_empty() {
            self.encrypt_sensitive_fields(&mut entry)?;
        }

        if self.features.tamper_evident {
            entry.hmac_signature = self.crypto.sign_entry(&entry)?;
        } else {
            entry.hmac_signature.clear();
        }
        Ok(entry)
    }

    // A failure here drops the whole entry so a half-encrypted payload never
    // reaches the sink.
    fn encrypt_sensitive_fields(&self, entry: &mut LogEntry) -> AuditResult<()> {
        let aad = entry.session_id.clone();
        for name in &self.sensitive_fields {
            let Some(value) = entry.payload.get(name) else {
                continue;
            };
            let encrypted = self.crypto.encrypt(&stringify(value), Some(&aad))?;
            let encrypted = serde_json::to_value(encrypted)
                .map_err(|e| AuditError::serialization("encoding encrypted field", e))?;
            entry.payload.insert(name.clone(), encrypted);
            entry.encrypted_fields.push(name.clone());
        }
        Ok(())
    }

    /// Payload of `entry` with its encrypted fields restored to plaintext
    /// strings.
    pub fn decrypt_payload(&self, entry: &LogEntry) -> AuditResult<Map<String, Value>> {
        self.crypto.decrypt_entry_fields(entry)
    }
}

// Strings encrypt as-is; everything else as canonical JSON text.
fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => canonical_json(other),
    }
}
