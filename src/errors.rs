//! Error types for the audit subsystem
//!
//! The logging write path never surfaces these to callers; it reports them
//! through `tracing` instead. Verification and decryption return them.

use thiserror::Error;

/// Main error type for the audit subsystem
#[derive(Error, Debug)]
pub enum AuditError {
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Authentication failed: {context}")]
    Authentication { context: String },

    #[error("Tamper detected: {location} line {line}")]
    TamperDetected { location: String, line: usize },

    #[error("I/O operation failed: {operation}")]
    Io {
        operation: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialization failed: {context}")]
    Serialization {
        context: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Malformed encrypted field: {field} - {message}")]
    MalformedField { field: String, message: String },

    #[error("Random source failure: {message}")]
    Entropy { message: String },
}

/// Type alias for Result with AuditError
pub type AuditResult<T> = Result<T, AuditError>;

impl AuditError {
    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create an authentication error
    pub fn authentication(context: impl Into<String>) -> Self {
        Self::Authentication {
            context: context.into(),
        }
    }

    /// Create a tamper detection error for a 1-based line
    pub fn tamper_detected(location: impl Into<String>, line: usize) -> Self {
        Self::TamperDetected {
            location: location.into(),
            line,
        }
    }

    /// Create an I/O error
    pub fn io(operation: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            operation: operation.into(),
            source,
        }
    }

    /// Create a serialization error
    pub fn serialization(context: impl Into<String>, source: serde_json::Error) -> Self {
        Self::Serialization {
            context: context.into(),
            source,
        }
    }

    pub fn malformed_field(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::MalformedField {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn entropy(message: impl Into<String>) -> Self {
        Self::Entropy {
            message: message.into(),
        }
    }

    /// True for failures that mean the data cannot be trusted, as opposed to
    /// failures reaching the data at all.
    pub fn is_integrity_failure(&self) -> bool {
        matches!(
            self,
            AuditError::Authentication { .. } | AuditError::TamperDetected { .. }
        )
    }
}

/// Convert from std::io errors
impl From<std::io::Error> for AuditError {
    fn from(err: std::io::Error) -> Self {
        AuditError::io("io_operation", err)
    }
}

/// Convert from serde_json errors
impl From<serde_json::Error> for AuditError {
    fn from(err: serde_json::Error) -> Self {
        AuditError::serialization("json_operation", err)
    }
}

/// Convert from figment errors
impl From<figment::Error> for AuditError {
    fn from(err: figment::Error) -> Self {
        AuditError::config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let config_err = AuditError::config("HMAC key must be 32 bytes");
        assert!(config_err.to_string().contains("Configuration error"));

        let tamper = AuditError::tamper_detected("logs/audit-2026-01-01.jsonl", 7);
        assert_eq!(
            tamper.to_string(),
            "Tamper detected: logs/audit-2026-01-01.jsonl line 7"
        );
        assert!(tamper.is_integrity_failure());
        assert!(!config_err.is_integrity_failure());
    }

    #[test]
    fn test_error_chaining() {
        use std::error::Error;

        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "File not found");
        let audit_err = AuditError::io("opening day file", io_err);

        assert!(audit_err.source().is_some());
        assert!(audit_err.to_string().contains("I/O operation failed"));
    }
}
