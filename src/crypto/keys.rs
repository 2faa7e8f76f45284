//! Key material handling
//!
//! Keys are 32 raw bytes. They are accepted as hex in configuration, wiped
//! on drop, and have no serialized form.

use std::fmt;

use zeroize::Zeroize;

use crate::entropy::EntropySource;
use crate::errors::{AuditError, AuditResult};

pub const KEY_LEN: usize = 32;

/// 32 bytes of secret key material.
pub struct SecretKey([u8; KEY_LEN]);

impl SecretKey {
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    pub fn from_hex(name: &str, hex_key: &str) -> AuditResult<Self> {
        decode_hex_key(name, hex_key).map(Self)
    }

    pub fn generate(source: &dyn EntropySource) -> AuditResult<Self> {
        let mut bytes = [0u8; KEY_LEN];
        source.fill(&mut bytes)?;
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

impl Drop for SecretKey {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretKey(<redacted>)")
    }
}

/// Decode a hex key, naming the offending setting on failure.
pub fn decode_hex_key(name: &str, hex_key: &str) -> AuditResult<[u8; KEY_LEN]> {
    let mut decoded = hex::decode(hex_key.trim()).map_err(|e| {
        AuditError::config(format!("{name} is not valid hex: {e}"))
    })?;
    if decoded.len() != KEY_LEN {
        let len = decoded.len();
        decoded.zeroize();
        return Err(AuditError::config(format!(
            "{name} must be {KEY_LEN} bytes ({} hex characters), got {len} bytes",
            KEY_LEN * 2
        )));
    }
    let mut key = [0u8; KEY_LEN];
    key.copy_from_slice(&decoded);
    decoded.zeroize();
    Ok(key)
}

/// Fresh random key rendered as lowercase hex, for provisioning.
pub fn generate_key_hex(source: &dyn EntropySource) -> AuditResult<String> {
    let key = SecretKey::generate(source)?;
    Ok(hex::encode(key.as_bytes()))
}
