//! Deterministic byte encodings for signing.
//!
//! Every signature in the broker protocol covers a canonical byte string so
//! verification is reproducible on both sides. Fields are concatenated in a
//! fixed order with a big-endian length prefix per field (variable-width
//! strings would otherwise be ambiguous), and each shape carries a distinct
//! leading tag so a signature for one shape can never verify as another.

use serde_json::Value;

const ENVELOPE_TAG: &[u8] = b"envelope.v1";
const REQUEST_TAG: &[u8] = b"request.v1";
const SEND_TAG: &[u8] = b"send.v1";

fn frame(buf: &mut Vec<u8>, field: &[u8]) {
    buf.extend_from_slice(&(field.len() as u32).to_be_bytes());
    buf.extend_from_slice(field);
}

/// Signing bytes for an inbound broker envelope:
/// `(workspace_id, broker_timestamp, encrypted_base64)`.
pub fn envelope_bytes(workspace_id: &str, broker_timestamp: i64, encrypted_b64: &str) -> Vec<u8> {
    let mut buf = Vec::new();
    frame(&mut buf, ENVELOPE_TAG);
    frame(&mut buf, workspace_id.as_bytes());
    frame(&mut buf, &broker_timestamp.to_be_bytes());
    frame(&mut buf, encrypted_b64.as_bytes());
    buf
}

/// Signing bytes for `inbox.pull` / `inbox.ack` requests:
/// `(workspace_id, protocol_version, action, timestamp, params)`.
pub fn protocol_request_bytes(
    workspace_id: &str,
    protocol_version: &str,
    action: &str,
    timestamp: i64,
    params: &Value,
) -> Vec<u8> {
    let mut buf = Vec::new();
    frame(&mut buf, REQUEST_TAG);
    frame(&mut buf, workspace_id.as_bytes());
    frame(&mut buf, protocol_version.as_bytes());
    frame(&mut buf, action.as_bytes());
    frame(&mut buf, &timestamp.to_be_bytes());
    frame(&mut buf, canonical_json(params).as_bytes());
    buf
}

/// Signing bytes for outbound sends:
/// `(workspace_id, action, timestamp, encrypted_body, nonce, routing)`.
/// Routing is covered so channel/thread/reaction targets cannot be tampered
/// with after signing.
pub fn send_request_bytes(
    workspace_id: &str,
    action: &str,
    timestamp: i64,
    encrypted_body_b64: &str,
    nonce_b64: &str,
    routing: &Value,
) -> Vec<u8> {
    let mut buf = Vec::new();
    frame(&mut buf, SEND_TAG);
    frame(&mut buf, workspace_id.as_bytes());
    frame(&mut buf, action.as_bytes());
    frame(&mut buf, &timestamp.to_be_bytes());
    frame(&mut buf, encrypted_body_b64.as_bytes());
    frame(&mut buf, nonce_b64.as_bytes());
    frame(&mut buf, canonical_json(routing).as_bytes());
    buf
}

/// Render a JSON value with recursively sorted object keys.
///
/// Two values with equal logical content produce byte-identical output
/// regardless of key insertion order. The protocol never signs floats, so
/// number formatting falls through to `serde_json`'s display form.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_value(&mut out, value);
    out
}

fn write_value(out: &mut String, value: &Value) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => out.push_str(&n.to_string()),
        Value::String(s) => write_escaped(out, s),
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_value(out, item);
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_escaped(out, key);
                out.push(':');
                write_value(out, &map[*key]);
            }
            out.push('}');
        }
    }
}

fn write_escaped(out: &mut String, s: &str) {
    use std::fmt::Write;

    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => {
                let _ = write!(out, "\\u{:04x}", c as u32);
            }
            c => out.push(c),
        }
    }
    out.push('"');
}
