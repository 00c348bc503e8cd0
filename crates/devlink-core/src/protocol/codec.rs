//! Tolerant decoding of inbound frames and encoding of outbound
//! notifications.
//!
//! # Why decoding is two-phase
//!
//! The protocol contract distinguishes two inbound failure modes:
//!
//! - **Unknown `type`** - a well-formed object whose `type` names no command
//!   this bridge knows.  Silently ignored, so newer clients can probe for
//!   optional commands without breaking older bridges.
//! - **Malformed payload** - not JSON, no string `type` field, or a known
//!   command with the wrong field shapes.  Reported to the client as one
//!   "invalid message format" error; never fatal to the session.
//!
//! A single `serde_json::from_str::<ClientToBridgeMsg>` call cannot tell
//! these apart (serde reports both as a deserialization error), so
//! [`decode_command`] first inspects the `type` tag on a raw
//! `serde_json::Value` and only then deserializes into the typed enum.

use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::Value;
use thiserror::Error;

use crate::protocol::envelope::{BridgeToClientMsg, ClientToBridgeMsg};

/// The `type` tags [`decode_command`] recognizes.  Anything else is an
/// unknown command and is ignored.
const KNOWN_COMMANDS: [&str; 4] = ["connect", "send", "disconnect", "ping"];

// ── Error type ────────────────────────────────────────────────────────────────

/// Why an inbound frame could not be decoded.
///
/// The client always sees the same "invalid message format" error text; the
/// variants here exist for logging and tests.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The frame is not valid JSON at all.
    #[error("payload is not valid JSON: {0}")]
    NotJson(String),

    /// The frame is JSON but has no string `"type"` field.
    #[error("payload has no string \"type\" field")]
    MissingType,

    /// The `type` names a known command but the remaining fields do not
    /// match its shape (missing `message`, `port` out of range, ...).
    #[error("malformed {command} command: {reason}")]
    BadShape { command: String, reason: String },
}

// ── Decoding ──────────────────────────────────────────────────────────────────

/// Decodes one inbound text frame into a command.
///
/// Returns:
///
/// - `Ok(Some(cmd))` - a known, well-formed command.
/// - `Ok(None)` - a well-formed object with an unknown `type`; the caller
///   should ignore it.
/// - `Err(e)` - a malformed payload; the caller should answer with one
///   "invalid message format" error notification and carry on.
pub fn decode_command(raw: &str) -> Result<Option<ClientToBridgeMsg>, DecodeError> {
    let value: Value =
        serde_json::from_str(raw).map_err(|e| DecodeError::NotJson(e.to_string()))?;

    let Some(tag) = value.get("type").and_then(Value::as_str) else {
        return Err(DecodeError::MissingType);
    };

    if !KNOWN_COMMANDS.contains(&tag) {
        return Ok(None);
    }

    let command = tag.to_string();
    serde_json::from_value(value)
        .map(Some)
        .map_err(|e| DecodeError::BadShape {
            command,
            reason: e.to_string(),
        })
}

/// Serializes one outbound notification to its wire form.
///
/// # Errors
///
/// `serde_json` can only fail here on a pathological serializer state; the
/// notification enums contain nothing that fails to serialize.  The `Result`
/// is kept so the transport layer can log rather than unwrap.
pub fn encode_notification(msg: &BridgeToClientMsg) -> serde_json::Result<String> {
    serde_json::to_string(msg)
}

// ── Timestamps ────────────────────────────────────────────────────────────────

/// Current Unix time in milliseconds, for `sent` / `received` capture
/// timestamps.
pub fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

// ── Device line trimming ──────────────────────────────────────────────────────

/// Trims trailing whitespace and control bytes from a chunk of device output.
///
/// Line-oriented devices terminate responses with CR, LF, or CRLF, and some
/// pad with NUL.  The prefix of the chunk is left untouched; only the tail is
/// trimmed, so embedded whitespace survives.
pub fn trim_device_line(text: &str) -> &str {
    text.trim_end_matches(|c: char| c.is_whitespace() || c.is_control())
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_valid_connect_command() {
        // Act
        let result = decode_command(r#"{"type":"connect","ip":"10.0.0.7","port":4001}"#).unwrap();

        // Assert
        assert_eq!(
            result,
            Some(ClientToBridgeMsg::Connect {
                ip: "10.0.0.7".to_string(),
                port: 4001,
            })
        );
    }

    #[test]
    fn test_decode_unknown_type_is_ignored_not_an_error() {
        // A well-formed object with a type this bridge does not know must be
        // silently ignored so future protocol additions are non-breaking.
        let result = decode_command(r#"{"type":"reboot","force":true}"#).unwrap();
        assert_eq!(result, None);
    }

    #[test]
    fn test_decode_non_json_is_malformed() {
        let result = decode_command("hello device");
        assert!(matches!(result, Err(DecodeError::NotJson(_))));
    }

    #[test]
    fn test_decode_object_without_type_is_malformed() {
        let result = decode_command(r#"{"ip":"10.0.0.7","port":4001}"#);
        assert!(matches!(result, Err(DecodeError::MissingType)));
    }

    #[test]
    fn test_decode_non_string_type_is_malformed() {
        // `type` must be a string, not a number
        let result = decode_command(r#"{"type":42}"#);
        assert!(matches!(result, Err(DecodeError::MissingType)));
    }

    #[test]
    fn test_decode_known_type_with_wrong_fields_is_malformed() {
        // `connect` without a port is a malformed known command, not unknown
        let result = decode_command(r#"{"type":"connect","ip":"10.0.0.7"}"#);
        match result {
            Err(DecodeError::BadShape { command, .. }) => assert_eq!(command, "connect"),
            other => panic!("expected BadShape, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_port_out_of_range_is_malformed() {
        let result = decode_command(r#"{"type":"connect","ip":"10.0.0.7","port":70000}"#);
        assert!(matches!(result, Err(DecodeError::BadShape { .. })));
    }

    #[test]
    fn test_encode_notification_produces_tagged_object() {
        let json = encode_notification(&BridgeToClientMsg::Error {
            message: "not connected to target".to_string(),
        })
        .unwrap();
        assert_eq!(json, r#"{"type":"error","message":"not connected to target"}"#);
    }

    #[test]
    fn test_trim_device_line_strips_crlf_tail() {
        assert_eq!(trim_device_line("OK\r\n"), "OK");
        assert_eq!(trim_device_line("TEMP 23.4\r"), "TEMP 23.4");
    }

    #[test]
    fn test_trim_device_line_strips_nul_padding() {
        assert_eq!(trim_device_line("READY\0\0\r\n"), "READY");
    }

    #[test]
    fn test_trim_device_line_keeps_interior_whitespace() {
        assert_eq!(trim_device_line("A B  C \r\n"), "A B  C");
    }

    #[test]
    fn test_trim_device_line_empty_and_all_control() {
        assert_eq!(trim_device_line(""), "");
        assert_eq!(trim_device_line("\r\n\r\n"), "");
    }

    #[test]
    fn test_epoch_millis_is_plausible() {
        // After 2020-01-01 and monotonically non-decreasing across two calls.
        let a = epoch_millis();
        let b = epoch_millis();
        assert!(a > 1_577_836_800_000, "timestamp {a} is before 2020");
        assert!(b >= a);
    }
}
