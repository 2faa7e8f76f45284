use serde_json::Value;
use std::io::{self, BufRead};

use crate::canonicalize::SIGNATURE_FIELD;
use crate::crypto::CryptoEngine;
use crate::errors::{AuditError, AuditResult};

/// Outcome of a clean verification pass over one segment
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VerifySummary {
    pub location: String,
    /// Non-blank lines read
    pub lines: usize,
    /// Signed lines whose signature matched
    pub verified: usize,
    /// Lines with an empty or missing signature
    pub unsigned: usize,
    /// An unterminated, unparseable final line was ignored
    pub partial_trailing_line: bool,
}

/// Check every signed line in `reader`, stopping at the first mismatch.
///
/// Blank lines are skipped. Lines without a signature carry no integrity
/// claim and pass. A last line with no newline that does not parse is taken
/// to be a write still in progress and is ignored with a warning; any other
/// unreadable line counts as tampering.
pub fn verify_reader<R: BufRead>(
    mut reader: R,
    location: &str,
    crypto: &CryptoEngine,
) -> AuditResult<VerifySummary> {
    let mut summary = VerifySummary {
        location: location.to_string(),
        ..Default::default()
    };
    let mut buf = String::new();
    let mut line_number = 0usize;

    loop {
        buf.clear();
        line_number += 1;
        let read = match reader.read_line(&mut buf) {
            Ok(read) => read,
            Err(e) if e.kind() == io::ErrorKind::InvalidData => {
                return Err(tampered(location, line_number, "line is not UTF-8"));
            }
            Err(e) => return Err(AuditError::io(format!("reading {location}"), e)),
        };
        if read == 0 {
            break;
        }

        let terminated = buf.ends_with('\n');
        let line = buf.trim_end_matches(['\n', '\r']);
        if line.trim().is_empty() {
            continue;
        }

        let value: Value = match serde_json::from_str(line) {
            Ok(value) => value,
            Err(_) if !terminated => {
                tracing::warn!(
                    location,
                    line = line_number,
                    "ignoring partial trailing line"
                );
                summary.partial_trailing_line = true;
                break;
            }
            Err(_) => return Err(tampered(location, line_number, "line is not valid JSON")),
        };
        summary.lines += 1;

        if !value.is_object() {
            return Err(tampered(location, line_number, "line is not a JSON object"));
        }
        let signature = match value.get(SIGNATURE_FIELD) {
            None => "",
            Some(Value::String(s)) => s.as_str(),
            Some(_) => return Err(tampered(location, line_number, "signature is not a string")),
        };
        if signature.is_empty() {
            summary.unsigned += 1;
            continue;
        }
        if !crypto.verify(&value, signature) {
            return Err(tampered(location, line_number, "signature mismatch"));
        }
        summary.verified += 1;
    }

    Ok(summary)
}

fn tampered(location: &str, line: usize, reason: &str) -> AuditError {
    tracing::error!(location, line, reason, "audit log tampering detected");
    AuditError::tamper_detected(location, line)
}
