//! The JSON protocol spoken between the web client and the bridge.
//!
//! Every WebSocket text frame carries exactly one self-describing JSON object
//! with a lowercase `"type"` field that identifies the variant:
//!
//! ```json
//! {"type":"connect","ip":"192.168.1.50","port":4001}
//! {"type":"received","message":"OK","timestamp":1754550000000}
//! ```
//!
//! `envelope` defines the two directional message enums; `codec` decodes
//! inbound frames tolerantly and encodes outbound notifications.

pub mod codec;
pub mod envelope;

pub use codec::{decode_command, encode_notification, epoch_millis, DecodeError};
pub use envelope::{BridgeToClientMsg, ClientToBridgeMsg};
