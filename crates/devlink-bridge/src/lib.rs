//! devlink-bridge library crate.
//!
//! This crate provides a WebSocket-to-TCP bridge that lets web pages talk to
//! line-oriented embedded devices (serial-to-Ethernet adapters, PLCs, lab
//! instruments) that only speak raw TCP.
//!
//! # Architecture
//!
//! ```text
//! Browser (JSON over WebSocket)
//!         ↕
//! [devlink-bridge]
//!   ├── domain/           Pure types: BridgeConfig
//!   ├── application/      Session: the per-client state machine
//!   └── infrastructure/
//!         ├── ws_server/   WebSocket accept loop (tokio-tungstenite)
//!         └── device_link/ TCP connection task to the device
//!         ↕
//! Device (raw bytes over TCP, CR-terminated lines)
//! ```
//!
//! # Layer rules
//!
//! - `domain` has no I/O and no async.
//! - `application` depends on `domain` and `devlink-core`; it touches tokio
//!   only for channels and timer handles, never for sockets, so a Session is
//!   unit-testable without any transport.
//! - `infrastructure` owns every socket: the browser-facing listener and the
//!   device-facing TCP streams.

/// Domain layer: configuration types.
pub mod domain;

/// Application layer: the per-client Session state machine.
pub mod application;

/// Infrastructure layer: WebSocket server and device link I/O.
pub mod infrastructure;
