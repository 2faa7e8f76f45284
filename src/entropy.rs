//! Random source seam
//!
//! Nonces, generated keys and correlation ids all draw from an
//! [`EntropySource`]. The default reads the operating system CSPRNG on every
//! call; there is no counter or cached state to reuse across restarts.

use crate::errors::{AuditError, AuditResult};

pub trait EntropySource: Send + Sync {
    fn fill(&self, dest: &mut [u8]) -> AuditResult<()>;
}

/// Operating system CSPRNG.
#[derive(Debug, Clone, Copy, Default)]
pub struct OsEntropy;

impl EntropySource for OsEntropy {
    fn fill(&self, dest: &mut [u8]) -> AuditResult<()> {
        getrandom::fill(dest).map_err(|e| AuditError::entropy(e.to_string()))
    }
}

const ID_ALPHABET: &[u8; 36] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Draw `len` characters from `[a-z0-9]` without modulo bias.
pub fn random_token(source: &dyn EntropySource, len: usize) -> AuditResult<String> {
    // 252 is the largest multiple of 36 that fits in a byte
    const LIMIT: u8 = 252;
    const MAX_EMPTY_REFILLS: usize = 8;
    let mut out = String::with_capacity(len);
    let mut buf = [0u8; 16];
    let mut empty_refills = 0;
    while out.len() < len {
        source.fill(&mut buf)?;
        let before = out.len();
        for &b in buf.iter().filter(|&&b| b < LIMIT) {
            if out.len() == len {
                break;
            }
            out.push(ID_ALPHABET[(b % 36) as usize] as char);
        }
        if out.len() == before {
            empty_refills += 1;
            if empty_refills == MAX_EMPTY_REFILLS {
                return Err(AuditError::entropy(format!(
                    "{MAX_EMPTY_REFILLS} consecutive refills produced no usable bytes"
                )));
            }
        } else {
            empty_refills = 0;
        }
    }
    Ok(out)
}
