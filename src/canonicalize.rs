//! Frozen canonical JSON form used for signing and for persisted lines
//!
//! Rules:
//! - object members are emitted in ascending key order (byte order of the
//!   UTF-8 key), recursively
//! - arrays keep their order
//! - no whitespace between tokens
//! - strings escape `"`, `\` and control characters below U+0020 only
//! - numbers use serde_json's shortest round-trip rendering
//!
//! Changing any of these makes every stored signature unverifiable.

use serde_json::{Map, Value};

/// Field excluded from the signed form of an entry.
pub const SIGNATURE_FIELD: &str = "hmac_signature";

/// Render a JSON value in canonical form.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_value(value, &mut out);
    out
}

/// Canonical bytes of an entry with its signature field removed.
///
/// Only a top-level `hmac_signature` member is dropped; a payload key with the
/// same name is signed like any other data.
pub fn signable_bytes(entry: &Value) -> Vec<u8> {
    match entry {
        Value::Object(map) if map.contains_key(SIGNATURE_FIELD) => {
            let mut out = String::new();
            write_object(map, Some(SIGNATURE_FIELD), &mut out);
            out.into_bytes()
        }
        other => canonical_json(other).into_bytes(),
    }
}

fn write_value(value: &Value, out: &mut String) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(true) => out.push_str("true"),
        Value::Bool(false) => out.push_str("false"),
        Value::Number(n) => out.push_str(&n.to_string()),
        Value::String(s) => write_string(s, out),
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_value(item, out);
            }
            out.push(']');
        }
        Value::Object(map) => write_object(map, None, out),
    }
}

fn write_object(map: &Map<String, Value>, skip: Option<&str>, out: &mut String) {
    let mut members: Vec<(&String, &Value)> = map
        .iter()
        .filter(|(k, _)| Some(k.as_str()) != skip)
        .collect();
    members.sort_by(|a, b| a.0.as_bytes().cmp(b.0.as_bytes()));

    out.push('{');
    for (i, (key, val)) in members.into_iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        write_string(key, out);
        out.push(':');
        write_value(val, out);
    }
    out.push('}');
}

fn write_string(s: &str, out: &mut String) {
    const HEX: &[u8; 16] = b"0123456789abcdef";
    out.push('"');
    for ch in s.chars() {
        match ch {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\u{08}' => out.push_str("\\b"),
            '\u{0C}' => out.push_str("\\f"),
            c if (c as u32) < 0x20 => {
                let code = c as u32 as usize;
                out.push_str("\\u00");
                out.push(HEX[code >> 4] as char);
                out.push(HEX[code & 0xF] as char);
            }
            c => out.push(c),
        }
    }
    out.push('"');
}
