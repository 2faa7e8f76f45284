// Audit subsystem configuration
// Layered: built-in defaults < TOML file < environment

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::errors::{AuditError, AuditResult};

pub const DEFAULT_CONFIG_FILE: &str = "audit.toml";

/// Environment variable -> config field.
const ENV_FIELDS: &[(&str, &str)] = &[
    ("AUDIT_HMAC_KEY", "hmac_key"),
    ("AUDIT_ENCRYPTION_KEY", "encryption_key"),
    ("AUDIT_LOG_DIR", "log_dir"),
    ("AUDIT_WRITE_ONCE", "write_once"),
    ("SENTINEL_FEATURE_LOGGING", "structured_logging"),
    ("SENTINEL_FEATURE_ENCRYPTION", "field_encryption"),
    ("SENTINEL_FEATURE_TAMPER_EVIDENT", "tamper_evident"),
    ("AUDIT_ENCRYPT_FIELDS", "encrypt_fields"),
    ("SENTINEL_USER_ID", "default_user_id"),
    ("AUDIT_ENVIRONMENT", "environment"),
];

/// Read for `environment` when `AUDIT_ENVIRONMENT` is unset.
const ENVIRONMENT_FALLBACK: &str = "NODE_ENV";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    /// Hex-encoded 32-byte HMAC key; blank means unset
    #[serde(default, deserialize_with = "blank_as_none")]
    pub hmac_key: Option<String>,
    /// Hex-encoded 32-byte AES-256-GCM key; blank means unset
    #[serde(default, deserialize_with = "blank_as_none")]
    pub encryption_key: Option<String>,
    pub log_dir: PathBuf,
    #[serde(deserialize_with = "lenient_flag")]
    pub write_once: bool,
    #[serde(deserialize_with = "lenient_flag")]
    pub structured_logging: bool,
    #[serde(deserialize_with = "lenient_flag")]
    pub field_encryption: bool,
    #[serde(deserialize_with = "lenient_flag")]
    pub tamper_evident: bool,
    /// Comma-delimited payload keys to encrypt
    pub encrypt_fields: String,
    pub default_user_id: String,
    pub environment: String,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            hmac_key: None,
            encryption_key: None,
            log_dir: PathBuf::from("./logs/audit"),
            write_once: false,
            structured_logging: false,
            field_encryption: false,
            tamper_evident: false,
            encrypt_fields: "password,api_key,token,db_url".to_string(),
            default_user_id: "anonymous".to_string(),
            environment: "development".to_string(),
        }
    }
}

impl AuditConfig {
    /// Load from `audit.toml` (if present) and the process environment.
    pub fn load() -> AuditResult<Self> {
        Self::load_from(None)
    }

    /// Load from an explicit TOML file (or the default one) and the
    /// process environment.
    pub fn load_from(path: Option<&Path>) -> AuditResult<Self> {
        let file = path
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
        Self::from_figment(Self::figment(&file))
    }

    /// The provider stack used by [`AuditConfig::load_from`].
    pub fn figment(file: &Path) -> Figment {
        Figment::from(Serialized::defaults(AuditConfig::default()))
            .merge(Toml::file(file))
            .merge(Env::raw().only(&[ENVIRONMENT_FALLBACK]).map(|_| "environment".into()))
            .merge(env_provider())
    }

    /// Extract from any figment; lets callers supply their own providers.
    pub fn from_figment(figment: Figment) -> AuditResult<Self> {
        let config: AuditConfig = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> AuditResult<()> {
        if self.log_dir.as_os_str().is_empty() {
            return Err(AuditError::config("log_dir cannot be empty"));
        }
        for (name, value) in [
            ("hmac_key", &self.hmac_key),
            ("encryption_key", &self.encryption_key),
        ] {
            if let Some(hex_key) = value {
                crate::crypto::keys::decode_hex_key(name, hex_key)?;
            }
        }
        Ok(())
    }

    /// Sensitive payload keys, trimmed, empties dropped.
    pub fn sensitive_fields(&self) -> Vec<String> {
        self.encrypt_fields
            .split(',')
            .map(str::trim)
            .filter(|f| !f.is_empty())
            .map(str::to_string)
            .collect()
    }

    pub fn features(&self) -> crate::logger::FeatureFlags {
        crate::logger::FeatureFlags {
            structured_logging: self.structured_logging,
            field_encryption: self.field_encryption,
            tamper_evident: self.tamper_evident,
        }
    }
}

fn env_provider() -> Env {
    let names: Vec<&'static str> = ENV_FIELDS.iter().map(|(var, _)| *var).collect();
    Env::raw().only(&names).map(|key| {
        ENV_FIELDS
            .iter()
            .find(|(var, _)| key.as_str().eq_ignore_ascii_case(var))
            .map(|(_, field)| *field)
            .unwrap_or_else(|| key.as_str())
            .into()
    })
}

fn blank_as_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value.filter(|s| !s.trim().is_empty()))
}

/// `true` in any case turns a flag on; every other value leaves it off.
fn lenient_flag<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    struct FlagVisitor;

    impl<'de> Visitor<'de> for FlagVisitor {
        type Value = bool;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a boolean or a string")
        }

        fn visit_bool<E: de::Error>(self, v: bool) -> Result<bool, E> {
            Ok(v)
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<bool, E> {
            Ok(v.trim().eq_ignore_ascii_case("true"))
        }

        fn visit_i64<E: de::Error>(self, _: i64) -> Result<bool, E> {
            Ok(false)
        }

        fn visit_u64<E: de::Error>(self, _: u64) -> Result<bool, E> {
            Ok(false)
        }

        fn visit_i128<E: de::Error>(self, _: i128) -> Result<bool, E> {
            Ok(false)
        }

        fn visit_u128<E: de::Error>(self, _: u128) -> Result<bool, E> {
            Ok(false)
        }

        fn visit_f64<E: de::Error>(self, _: f64) -> Result<bool, E> {
            Ok(false)
        }

        fn visit_unit<E: de::Error>(self) -> Result<bool, E> {
            Ok(false)
        }

        fn visit_none<E: de::Error>(self) -> Result<bool, E> {
            Ok(false)
        }
    }

    deserializer.deserialize_any(FlagVisitor)
}
