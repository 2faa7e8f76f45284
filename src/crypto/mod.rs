//! CryptoEngine: keyed signing, authenticated encryption and plain hashing
//!
//! One engine is built at process start and shared (behind an `Arc`) by the
//! logger and the store. Algorithms are fixed: HMAC-SHA256 for signatures,
//! AES-256-GCM for field encryption, SHA-256 for content hashes.

pub mod keys;

use std::fmt;
use std::fs::File;
use std::io::{self, BufReader};
use std::path::Path;
use std::sync::Arc;

use aes_gcm::{
    aead::{Aead, Payload},
    Aes256Gcm, KeyInit, Nonce,
};
use base64::{engine::general_purpose::STANDARD as B64, Engine as _};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::audit::LogEntry;
use crate::canonicalize::signable_bytes;
use crate::config::AuditConfig;
use crate::entropy::{EntropySource, OsEntropy};
use crate::errors::{AuditError, AuditResult};
use keys::SecretKey;

type HmacSha256 = Hmac<Sha256>;

/// Algorithm label written into every [`EncryptedField`].
pub const ALGORITHM: &str = "AES-256-GCM";
pub const NONCE_LEN: usize = 12;
pub const TAG_LEN: usize = 16;

/// Wire shape of an encrypted payload value. Every member is base64.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedField {
    pub encrypted_data: String,
    pub iv: String,
    pub auth_tag: String,
    pub algorithm: String,
}

impl EncryptedField {
    fn decode_part(field: &str, encoded: &str) -> AuditResult<Vec<u8>> {
        B64.decode(encoded)
            .map_err(|e| AuditError::malformed_field(field, e.to_string()))
    }
}

pub struct CryptoEngine {
    mac: HmacSha256,
    cipher: Aes256Gcm,
    entropy: Arc<dyn EntropySource>,
}

impl fmt::Debug for CryptoEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CryptoEngine")
            .field("keys", &"<redacted>")
            .finish()
    }
}

/// Key sources in priority order: raw bytes, then hex, then generated.
#[derive(Default)]
pub struct CryptoEngineBuilder {
    hmac_key: Option<[u8; keys::KEY_LEN]>,
    encryption_key: Option<[u8; keys::KEY_LEN]>,
    hmac_key_hex: Option<String>,
    encryption_key_hex: Option<String>,
    entropy: Option<Arc<dyn EntropySource>>,
}

impl CryptoEngineBuilder {
    pub fn hmac_key(mut self, key: [u8; keys::KEY_LEN]) -> Self {
        self.hmac_key = Some(key);
        self
    }

    pub fn encryption_key(mut self, key: [u8; keys::KEY_LEN]) -> Self {
        self.encryption_key = Some(key);
        self
    }

    pub fn hmac_key_hex(mut self, hex_key: Option<String>) -> Self {
        self.hmac_key_hex = hex_key;
        self
    }

    pub fn encryption_key_hex(mut self, hex_key: Option<String>) -> Self {
        self.encryption_key_hex = hex_key;
        self
    }

    pub fn entropy(mut self, source: Arc<dyn EntropySource>) -> Self {
        self.entropy = Some(source);
        self
    }

    pub fn build(self) -> AuditResult<CryptoEngine> {
        let entropy = self.entropy.unwrap_or_else(|| Arc::new(OsEntropy));
        let hmac_key = resolve_key(
            "hmac_key",
            self.hmac_key,
            self.hmac_key_hex.as_deref(),
            entropy.as_ref(),
        )?;
        let encryption_key = resolve_key(
            "encryption_key",
            self.encryption_key,
            self.encryption_key_hex.as_deref(),
            entropy.as_ref(),
        )?;

        let mac = <HmacSha256 as Mac>::new_from_slice(hmac_key.as_bytes())
            .map_err(|e| AuditError::config(format!("hmac_key: {e}")))?;
        let cipher = <Aes256Gcm as KeyInit>::new_from_slice(encryption_key.as_bytes())
            .map_err(|e| AuditError::config(format!("encryption_key: {e}")))?;

        Ok(CryptoEngine {
            mac,
            cipher,
            entropy,
        })
    }
}

fn resolve_key(
    name: &str,
    explicit: Option<[u8; keys::KEY_LEN]>,
    hex_key: Option<&str>,
    entropy: &dyn EntropySource,
) -> AuditResult<SecretKey> {
    if let Some(bytes) = explicit {
        return Ok(SecretKey::from_bytes(bytes));
    }
    if let Some(hex_key) = hex_key.filter(|h| !h.trim().is_empty()) {
        return SecretKey::from_hex(name, hex_key);
    }
    tracing::warn!(
        key = name,
        "no {} configured; generated an ephemeral key. Entries signed or encrypted by this \
         process cannot be verified or decrypted after it exits. Not for production use.",
        name
    );
    SecretKey::generate(entropy)
}

impl CryptoEngine {
    pub fn builder() -> CryptoEngineBuilder {
        CryptoEngineBuilder::default()
    }

    /// Engine keyed from configuration, generating whatever is missing.
    pub fn from_config(config: &AuditConfig) -> AuditResult<Self> {
        Self::builder()
            .hmac_key_hex(config.hmac_key.clone())
            .encryption_key_hex(config.encryption_key.clone())
            .build()
    }

    pub fn with_keys(
        hmac_key: [u8; keys::KEY_LEN],
        encryption_key: [u8; keys::KEY_LEN],
    ) -> AuditResult<Self> {
        Self::builder()
            .hmac_key(hmac_key)
            .encryption_key(encryption_key)
            .build()
    }

    /// Lowercase hex HMAC-SHA256 over the canonical form of `entry`, with any
    /// top-level `hmac_signature` left out.
    pub fn sign(&self, entry: &Value) -> String {
        let mut mac = self.mac.clone();
        mac.update(&signable_bytes(entry));
        hex::encode(mac.finalize().into_bytes())
    }

    pub fn sign_entry(&self, entry: &LogEntry) -> AuditResult<String> {
        let value = serde_json::to_value(entry)
            .map_err(|e| AuditError::serialization("signing log entry", e))?;
        Ok(self.sign(&value))
    }

    /// Constant-time comparison of `signature` against a fresh signature.
    pub fn verify(&self, entry: &Value, signature: &str) -> bool {
        let expected = self.sign(entry);
        expected.as_bytes().ct_eq(signature.as_bytes()).into()
    }

    /// Encrypt under a fresh random nonce, binding `associated_data`.
    pub fn encrypt(
        &self,
        plaintext: &str,
        associated_data: Option<&str>,
    ) -> AuditResult<EncryptedField> {
        let mut nonce = [0u8; NONCE_LEN];
        self.entropy.fill(&mut nonce)?;

        let mut sealed = self
            .cipher
            .encrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: plaintext.as_bytes(),
                    aad: associated_data.unwrap_or("").as_bytes(),
                },
            )
            .map_err(|_| AuditError::malformed_field("plaintext", "too long for AES-256-GCM"))?;
        let tag = sealed.split_off(sealed.len() - TAG_LEN);

        Ok(EncryptedField {
            encrypted_data: B64.encode(&sealed),
            iv: B64.encode(nonce),
            auth_tag: B64.encode(&tag),
            algorithm: ALGORITHM.to_string(),
        })
    }

    /// Inverse of [`CryptoEngine::encrypt`]. Never returns data unless the tag
    /// authenticates both ciphertext and `associated_data`.
    pub fn decrypt(
        &self,
        field: &EncryptedField,
        associated_data: Option<&str>,
    ) -> AuditResult<String> {
        if field.algorithm != ALGORITHM {
            return Err(AuditError::malformed_field(
                "algorithm",
                format!("unsupported algorithm {}", field.algorithm),
            ));
        }
        let nonce = EncryptedField::decode_part("iv", &field.iv)?;
        if nonce.len() != NONCE_LEN {
            return Err(AuditError::malformed_field(
                "iv",
                format!("expected {NONCE_LEN} bytes, got {}", nonce.len()),
            ));
        }
        let tag = EncryptedField::decode_part("auth_tag", &field.auth_tag)?;
        if tag.len() != TAG_LEN {
            return Err(AuditError::malformed_field(
                "auth_tag",
                format!("expected {TAG_LEN} bytes, got {}", tag.len()),
            ));
        }
        let mut sealed = EncryptedField::decode_part("encrypted_data", &field.encrypted_data)?;
        sealed.extend_from_slice(&tag);

        let plaintext = self
            .cipher
            .decrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: &sealed,
                    aad: associated_data.unwrap_or("").as_bytes(),
                },
            )
            .map_err(|_| {
                AuditError::authentication("AES-256-GCM tag or associated data mismatch")
            })?;

        String::from_utf8(plaintext)
            .map_err(|_| AuditError::malformed_field("encrypted_data", "plaintext is not UTF-8"))
    }

    /// Payload of `entry` with every listed encrypted field replaced by its
    /// plaintext string.
    pub fn decrypt_entry_fields(&self, entry: &LogEntry) -> AuditResult<Map<String, Value>> {
        let mut payload = entry.payload.clone();
        for name in &entry.encrypted_fields {
            let raw = payload.get(name).cloned().ok_or_else(|| {
                AuditError::malformed_field(name.as_str(), "listed as encrypted but missing")
            })?;
            let field: EncryptedField = serde_json::from_value(raw)
                .map_err(|e| AuditError::malformed_field(name.as_str(), e.to_string()))?;
            let plaintext = self.decrypt(&field, Some(&entry.session_id))?;
            payload.insert(name.clone(), Value::String(plaintext));
        }
        Ok(payload)
    }

    /// Lowercase hex SHA-256. Needs no key material.
    pub fn hash(bytes: &[u8]) -> String {
        hex::encode(Sha256::digest(bytes))
    }

    pub fn hash_file(path: &Path) -> AuditResult<String> {
        let file = File::open(path)
            .map_err(|e| AuditError::io(format!("opening {}", path.display()), e))?;
        let mut hasher = Sha256::new();
        io::copy(&mut BufReader::new(file), &mut hasher)
            .map_err(|e| AuditError::io(format!("reading {}", path.display()), e))?;
        Ok(hex::encode(hasher.finalize()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashSet;

    fn engine() -> CryptoEngine {
        CryptoEngine::with_keys([1u8; 32], [2u8; 32]).unwrap()
    }

    #[test]
    fn test_sign_ignores_key_order() {
        let engine = engine();
        let ab = engine.sign(&json!({"a": 1, "b": 2}));
        assert_eq!(ab, engine.sign(&json!({"b": 2, "a": 1})));
        assert_ne!(ab, engine.sign(&json!({"a": 1, "b": 3})));
        assert_eq!(ab.len(), 64);
        assert!(ab.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn test_verify_detects_any_field_change() {
        let engine = engine();
        let entry = json!({"event_type": "LOGIN", "user_id": "u1", "payload": {"ip": "10.0.0.1"}});
        let sig = engine.sign(&entry);
        assert!(engine.verify(&entry, &sig));

        let mut changed = entry.clone();
        changed["payload"]["ip"] = json!("10.0.0.2");
        assert!(!engine.verify(&changed, &sig));

        let mut changed = entry.clone();
        changed["user_id"] = json!("u2");
        assert!(!engine.verify(&changed, &sig));

        assert!(!engine.verify(&entry, &sig[..63]));
    }

    #[test]
    fn test_signature_field_is_not_signed() {
        let engine = engine();
        let mut entry = json!({"event_type": "X", "hmac_signature": ""});
        let sig = engine.sign(&entry);
        entry["hmac_signature"] = json!(sig.clone());
        assert!(engine.verify(&entry, &sig));
    }

    #[test]
    fn test_different_keys_disagree() {
        let other = CryptoEngine::with_keys([9u8; 32], [2u8; 32]).unwrap();
        let entry = json!({"a": 1});
        assert!(!other.verify(&entry, &engine().sign(&entry)));
    }

    #[test]
    fn test_encrypt_round_trip_with_context() {
        let engine = engine();
        let field = engine.encrypt("hunter2", Some("sess-1")).unwrap();
        assert_eq!(field.algorithm, ALGORITHM);
        assert_eq!(B64.decode(&field.iv).unwrap().len(), NONCE_LEN);
        assert_eq!(B64.decode(&field.auth_tag).unwrap().len(), TAG_LEN);
        assert_eq!(engine.decrypt(&field, Some("sess-1")).unwrap(), "hunter2");

        let no_context = engine.encrypt("", None).unwrap();
        assert_eq!(engine.decrypt(&no_context, None).unwrap(), "");
    }

    #[test]
    fn test_wrong_context_fails_authentication() {
        let engine = engine();
        let field = engine.encrypt("hunter2", Some("sess-1")).unwrap();
        let err = engine.decrypt(&field, Some("sess-2")).unwrap_err();
        assert!(matches!(err, AuditError::Authentication { .. }));
        assert!(engine.decrypt(&field, None).is_err());
    }

    #[test]
    fn test_flipped_ciphertext_bit_fails_authentication() {
        let engine = engine();
        let mut field = engine.encrypt("card=4111111111111111", Some("s")).unwrap();
        let mut data = B64.decode(&field.encrypted_data).unwrap();
        data[0] ^= 0x01;
        field.encrypted_data = B64.encode(&data);
        let err = engine.decrypt(&field, Some("s")).unwrap_err();
        assert!(matches!(err, AuditError::Authentication { .. }));
    }

    #[test]
    fn test_malformed_parts_are_rejected() {
        let engine = engine();
        let good = engine.encrypt("x", None).unwrap();

        let mut bad_iv = good.clone();
        bad_iv.iv = B64.encode([0u8; 8]);
        assert!(matches!(
            engine.decrypt(&bad_iv, None).unwrap_err(),
            AuditError::MalformedField { .. }
        ));

        let mut bad_b64 = good.clone();
        bad_b64.auth_tag = "***".into();
        assert!(matches!(
            engine.decrypt(&bad_b64, None).unwrap_err(),
            AuditError::MalformedField { .. }
        ));

        let mut bad_alg = good;
        bad_alg.algorithm = "ChaCha20-Poly1305".into();
        assert!(engine.decrypt(&bad_alg, None).is_err());
    }

    #[test]
    fn test_ten_thousand_nonces_are_distinct() {
        let engine = engine();
        let mut seen = HashSet::new();
        for _ in 0..10_000 {
            let field = engine.encrypt("same", Some("same")).unwrap();
            assert!(seen.insert(field.iv));
        }
    }

    #[test]
    fn test_hash_known_vector() {
        assert_eq!(
            CryptoEngine::hash(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_hash_file_matches_hash() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("blob.bin");
        std::fs::write(&path, b"abc").unwrap();
        assert_eq!(
            CryptoEngine::hash_file(&path).unwrap(),
            CryptoEngine::hash(b"abc")
        );
        assert!(CryptoEngine::hash_file(&dir.path().join("missing")).is_err());
    }

    #[test]
    fn test_hex_keys_take_effect() {
        let from_hex = CryptoEngine::builder()
            .hmac_key_hex(Some("01".repeat(32)))
            .encryption_key_hex(Some("02".repeat(32)))
            .build()
            .unwrap();
        let entry = json!({"k": "v"});
        assert_eq!(from_hex.sign(&entry), engine().sign(&entry));

        // explicit bytes win over hex
        let explicit = CryptoEngine::builder()
            .hmac_key([1u8; 32])
            .hmac_key_hex(Some("ff".repeat(32)))
            .build()
            .unwrap();
        assert_eq!(explicit.sign(&entry), engine().sign(&entry));
    }

    #[test]
    fn test_blank_hex_key_falls_back_to_generated() {
        let engine = CryptoEngine::builder()
            .hmac_key_hex(Some(String::new()))
            .encryption_key_hex(Some("  ".into()))
            .build()
            .unwrap();
        let entry = json!({"k": "v"});
        assert!(engine.verify(&entry, &engine.sign(&entry)));
        let field = engine.encrypt("secret", None).unwrap();
        assert_eq!(engine.decrypt(&field, None).unwrap(), "secret");
    }

    #[test]
    fn test_bad_hex_key_is_configuration_error() {
        let err = CryptoEngine::builder()
            .hmac_key_hex(Some("abc".into()))
            .build()
            .unwrap_err();
        assert!(matches!(err, AuditError::Config { .. }));
    }
}
