//! JSON message types for the browser-facing WebSocket protocol.
//!
//! The device side of the bridge is a raw byte stream; the browser side is
//! JSON.  These enums are the JSON side.
//!
//! # Message flow
//!
//! ```text
//! Browser → Bridge:  JSON text frame  →  ClientToBridgeMsg (a command)
//! Bridge  → Browser: link lifecycle   →  BridgeToClientMsg →  JSON text frame
//! ```
//!
//! # JSON discriminant
//!
//! Every message is a JSON object with a lowercase `"type"` field that
//! identifies the variant.  All other fields are flattened into the same
//! object:
//!
//! ```json
//! {"type":"connect","ip":"192.168.1.50","port":4001}
//! {"type":"sent","message":"STATUS?","timestamp":1754550000000}
//! ```
//!
//! Serde's `#[serde(tag = "type", rename_all = "lowercase")]` attributes
//! handle this automatically.
//!
//! # Why separate inbound and outbound message types?
//!
//! The two directions carry different information: the client *sends*
//! commands (connect, send, disconnect, ping) and the bridge *sends*
//! lifecycle notifications (connecting, received, error, ...).  Two distinct
//! enums make it a compile-time error to emit a command back at the client or
//! to dispatch a notification as a command.

use serde::{Deserialize, Serialize};

// ── Client → Bridge commands ──────────────────────────────────────────────────

/// All commands a web client can send to the bridge over the WebSocket.
///
/// # Serde representation
///
/// ```json
/// {"type":"connect","ip":"192.168.1.50","port":4001}
/// {"type":"send","message":"STATUS?"}
/// {"type":"disconnect"}
/// {"type":"ping"}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientToBridgeMsg {
    /// Open a device link to `ip:port`, tearing down any existing link first.
    Connect {
        /// Target device address.  Named `ip` on the wire; hostnames are
        /// accepted too and resolved by the connector.
        ip: String,
        /// Target TCP port.
        port: u16,
    },

    /// Write `message` to the open device link, followed by a single CR byte
    /// (the device's line terminator).
    Send {
        /// The line to send, without terminator.
        message: String,
    },

    /// Close the device link, if any.
    Disconnect,

    /// Query whether a device link is currently open.  Pure query; the bridge
    /// answers with a `pong` notification.
    Ping,
}

// ── Bridge → Client notifications ─────────────────────────────────────────────

/// All notifications the bridge sends to the web client over the WebSocket.
///
/// One notification per WebSocket text frame; no batching.  `timestamp`
/// fields are Unix epoch milliseconds captured when the datum was observed.
///
/// # Serde representation
///
/// ```json
/// {"type":"connecting","message":"192.168.1.50:4001"}
/// {"type":"connected","message":"connected to 192.168.1.50:4001","ip":"192.168.1.50","port":4001}
/// {"type":"received","message":"OK","timestamp":1754550000000}
/// {"type":"pong","connected":true}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BridgeToClientMsg {
    /// A connect attempt has started.  `message` is the `"{ip}:{port}"`
    /// target string.
    Connecting { message: String },

    /// The device link is open.
    Connected {
        message: String,
        ip: String,
        port: u16,
    },

    /// A `send` command was accepted and the write was queued.  This is a
    /// send-attempt acknowledgement, not a delivery acknowledgement; a write
    /// that fails later surfaces as an `error` notification.
    Sent { message: String, timestamp: u64 },

    /// Bytes arrived from the device.  `message` is the UTF-8 text with
    /// trailing whitespace/control bytes trimmed.
    Received { message: String, timestamp: u64 },

    /// The device link is gone: closed by the device, or torn down by a
    /// `disconnect` / replacing `connect` command.
    Disconnected { message: String },

    /// A contained failure: malformed inbound payload, send with no open
    /// link, or a device link failure (refused, unreachable, timed out, ...).
    Error { message: String },

    /// Answer to a `ping` command.  `connected` is true when a device link is
    /// present and open.
    Pong { connected: bool },
}

// ── Tests ─────────────────────────────────────────────────────────────────────
