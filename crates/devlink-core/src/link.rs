//! Device-link state machine vocabulary.
//!
//! A *device link* is one attempt/instance of a TCP connection to a device.
//! The I/O itself lives in the bridge binary; this module defines the shared
//! vocabulary: the state machine, the typed events a link task emits to its
//! owning session, and the closed classification of connection failures.
//!
//! # State machine
//!
//! ```text
//! Idle → Connecting → Open → Closed
//!              │         ├──→ Errored
//!              │         └──→ TimedOut
//!              ├──→ Errored
//!              └──→ TimedOut
//! ```
//!
//! `Closed`, `Errored`, and `TimedOut` are terminal and mutually exclusive:
//! exactly one terminal condition occurs per link instance.  No retries
//! happen inside a link; reconnection is entirely the owner's decision.

use std::fmt;
use std::io;

use thiserror::Error;

// ── Link identity ─────────────────────────────────────────────────────────────

/// Generation stamp for one link instance.
///
/// A session replaces its link on every `connect`, but events from the old
/// link task can still be in flight in the event channel.  Stamping every
/// event with the emitting link's id lets the session discard anything from a
/// superseded instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LinkId(pub u64);

impl fmt::Display for LinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "link#{}", self.0)
    }
}

// ── Link state ────────────────────────────────────────────────────────────────

/// Where a device link is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// No connection attempt has started.
    Idle,
    /// TCP connect in progress (10 s window).
    Connecting,
    /// Connected; reads and writes flow.
    Open,
    /// Terminal: the connection ended without an error (device EOF or local
    /// close).
    Closed,
    /// Terminal: the connection failed (refused, unreachable, I/O error).
    Errored,
    /// Terminal: the connect/idle timeout fired.
    TimedOut,
}

impl LinkState {
    /// True for `Closed`, `Errored`, and `TimedOut`.
    pub fn is_terminal(self) -> bool {
        matches!(self, LinkState::Closed | LinkState::Errored | LinkState::TimedOut)
    }

    /// True while the link holds (or is acquiring) a live socket, i.e.
    /// `Connecting` or `Open`.
    pub fn is_live(self) -> bool {
        matches!(self, LinkState::Connecting | LinkState::Open)
    }
}

// ── Link events ───────────────────────────────────────────────────────────────

/// What a link task reports to its owning session.
///
/// Per link instance the task emits zero or one `Connected`, any number of
/// `Received`, and at most one terminal event (`Closed`, `Failed`, or
/// `TimedOut`), in device-arrival order.  A session-initiated close makes the
/// task exit without emitting anything; the session reports that teardown
/// itself.
#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    /// The TCP connection is established.
    Connected,
    /// A chunk of device output arrived.  `message` is already trimmed of
    /// trailing whitespace/control bytes; `timestamp` is epoch milliseconds
    /// at capture.
    Received { message: String, timestamp: u64 },
    /// Terminal: the device closed the connection (EOF).
    Closed,
    /// Terminal: the connection failed; see [`ConnectFailure`].
    Failed(ConnectFailure),
    /// Terminal: the 10 s connect/idle timeout fired and the socket was
    /// aborted.
    TimedOut,
}

// ── Failure classification ────────────────────────────────────────────────────

/// Closed classification of device connection failures.
///
/// The `Display` form is the exact text the web client sees in the `error`
/// notification, so classification happens once, here, instead of by string
/// matching at the transport edge.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectFailure {
    /// The target host answered with a TCP RST: nothing is listening on that
    /// port.
    Refused,
    /// The target host or its network cannot be reached at all.
    Unreachable,
    /// Any other I/O failure, carrying the underlying error text.
    Other(String),
}

impl ConnectFailure {
    /// Maps an `std::io::Error` from connect/read/write onto the closed
    /// failure set.
    pub fn classify(err: &io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::ConnectionRefused => ConnectFailure::Refused,
            io::ErrorKind::HostUnreachable | io::ErrorKind::NetworkUnreachable => {
                ConnectFailure::Unreachable
            }
            _ => ConnectFailure::Other(err.to_string()),
        }
    }
}

impl fmt::Display for ConnectFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectFailure::Refused => write!(f, "target not listening on port"),
            ConnectFailure::Unreachable => write!(f, "target unreachable - check address"),
            ConnectFailure::Other(detail) => write!(f, "connection failed: {detail}"),
        }
    }
}

// ── Send errors ───────────────────────────────────────────────────────────────

/// Why a `send` was rejected without attempting a write.
#[derive(Debug, Error, PartialEq)]
pub enum SendError {
    /// The link is not in the `Open` state.
    #[error("not connected to target")]
    NotConnected,
}

// ── Tests ─────────────────────────────────────────────────────────────────────
