//! Infrastructure layer for devlink-bridge.
//!
//! All I/O lives here: the browser-facing WebSocket listener and the
//! device-facing TCP link tasks.
//!
//! - `ws_server` - accept loop, handshake, and the per-client transport
//!   adapter that drives a `Session`.
//! - `device_link` - one tokio task per TCP connection attempt to a device.

pub mod device_link;
pub mod ws_server;

// Re-export the primary entry points so `main.rs` can call them concisely.
pub use ws_server::{accept_loop, run_server};
