//! Bridge configuration types.
//!
//! [`BridgeConfig`] is the single source of truth for runtime settings.  It
//! is constructed from CLI arguments in `main.rs`; the defaults here are for
//! local development and tests.  Keeping configuration a plain struct (no
//! global state, no environment reads in this layer) keeps the bridge easy to
//! embed in tests.
//!
//! The device connect/idle timeout is deliberately NOT here: it is a protocol
//! constant (`infrastructure::device_link::DEVICE_TIMEOUT`), not a tunable.

use std::net::SocketAddr;

/// All runtime configuration for the bridge process.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// The address and port the WebSocket server binds to.
    ///
    /// `0.0.0.0` accepts connections from any interface; set `127.0.0.1` to
    /// accept only local connections.
    pub listen_addr: SocketAddr,
}

impl Default for BridgeConfig {
    /// Defaults suitable for local development: listen on all interfaces,
    /// port 8080.
    fn default() -> Self {
        Self {
            // Compile-time-known valid socket address string.
            listen_addr: "0.0.0.0:8080".parse().unwrap(),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_listen_port_is_8080() {
        let cfg = BridgeConfig::default();
        assert_eq!(cfg.listen_addr.port(), 8080);
    }

    #[test]
    fn test_default_listens_on_all_interfaces() {
        let cfg = BridgeConfig::default();
        assert!(cfg.listen_addr.ip().is_unspecified());
    }
}
