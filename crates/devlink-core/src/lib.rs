//! # devlink-core
//!
//! Shared library for DevLink Bridge containing the browser-facing protocol
//! envelopes, the tolerant command codec, and the device-link state machine
//! vocabulary.
//!
//! This crate is used by the bridge binary and by its integration tests.
//! It has zero dependencies on OS APIs, async runtimes, or network sockets.
//!
//! # Architecture overview
//!
//! DevLink Bridge lets a web page talk to a line-oriented embedded device
//! (a serial-to-Ethernet adapter, a PLC, a lab instrument) that only speaks
//! raw TCP.  Browsers cannot open raw TCP sockets, so the bridge translates
//! a JSON-over-WebSocket command protocol into TCP connection lifecycle
//! operations and forwards inbound device bytes back as JSON notifications.
//!
//! This crate (`devlink-core`) is the shared foundation.  It defines:
//!
//! - **`protocol`** - The JSON "language" spoken over the WebSocket: the
//!   inbound command envelope, the outbound notification envelope, and the
//!   codec that decodes commands tolerantly (unknown command types are
//!   ignored; malformed payloads are reported, never fatal).
//!
//! - **`link`** - The vocabulary of a device link's life: its state machine,
//!   the typed events a link emits, and the closed classification of
//!   connection failures that maps deterministically to the error texts the
//!   client sees.

pub mod link;
pub mod protocol;

// Re-export the most-used types at the crate root so callers can write
// `devlink_core::ClientToBridgeMsg` instead of the longer module path.
pub use link::{ConnectFailure, LinkEvent, LinkId, LinkState, SendError};
pub use protocol::codec::{decode_command, encode_notification, epoch_millis, DecodeError};
pub use protocol::envelope::{BridgeToClientMsg, ClientToBridgeMsg};
