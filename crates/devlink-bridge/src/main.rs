//! DevLink Bridge - entry point.
//!
//! This binary accepts WebSocket connections from web browsers and bridges
//! them to raw TCP connections against line-oriented embedded devices
//! (serial-to-Ethernet adapters, PLCs, lab instruments).
//!
//! # Why a bridge process?
//!
//! Web browsers can only speak HTTP/WebSocket; the devices only speak raw
//! TCP with CR-terminated lines.  This process translates between the two so
//! a plain web page can connect to a device by IP and port, send it command
//! lines, and watch its responses live.
//!
//! # Usage
//!
//! ```text
//! devlink-bridge [OPTIONS]
//!
//! Options:
//!   --port <PORT>   WebSocket listener port [default: 8080]
//!   --bind <ADDR>   Listen address [default: 0.0.0.0]
//! ```
//!
//! Environment overrides: `DEVLINK_PORT`, `DEVLINK_BIND` (CLI arguments take
//! precedence).  Log verbosity comes from `RUST_LOG` (default `info`).
//!
//! The device connect/idle timeout is a fixed 10 s protocol constant and is
//! deliberately not configurable here.

use std::net::SocketAddr;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use devlink_bridge::domain::BridgeConfig;
use devlink_bridge::infrastructure::run_server;

// ── CLI argument definitions ──────────────────────────────────────────────────

/// DevLink Bridge.
///
/// Bridges JSON-over-WebSocket clients to raw TCP device connections.
#[derive(Debug, Parser)]
#[command(
    name = "devlink-bridge",
    about = "WebSocket-to-TCP bridge for line-oriented embedded devices",
    version
)]
struct Cli {
    /// TCP port for the WebSocket server to listen on.
    #[arg(long, default_value_t = 8080, env = "DEVLINK_PORT")]
    port: u16,

    /// IP address to bind the WebSocket server to.
    ///
    /// Use `0.0.0.0` to accept connections from any interface, or
    /// `127.0.0.1` to accept only local connections.
    #[arg(long, default_value = "0.0.0.0", env = "DEVLINK_BIND")]
    bind: String,
}

impl Cli {
    /// Converts the parsed CLI arguments into a [`BridgeConfig`].
    ///
    /// # Errors
    ///
    /// Returns an error if `--bind` is not a valid IP address.
    fn into_bridge_config(self) -> anyhow::Result<BridgeConfig> {
        let listen_addr: SocketAddr = format!("{}:{}", self.bind, self.port)
            .parse()
            .with_context(|| format!("invalid listen address: '{}:{}'", self.bind, self.port))?;

        Ok(BridgeConfig { listen_addr })
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Log level comes from RUST_LOG; fall back to `info` when unset.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = cli.into_bridge_config()?;

    info!("DevLink bridge starting on {}", config.listen_addr);

    // Graceful shutdown: Ctrl+C clears the flag, the accept loop polls it
    // every 200 ms and exits cleanly.
    let running = Arc::new(AtomicBool::new(true));
    let running_signal = Arc::clone(&running);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("received Ctrl+C, shutting down");
                running_signal.store(false, Ordering::Relaxed);
            }
            Err(e) => {
                tracing::error!("failed to listen for Ctrl+C signal: {e}");
            }
        }
    });

    run_server(config, running).await?;

    info!("DevLink bridge stopped");
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::parse_from(["devlink-bridge"]);
        assert_eq!(cli.port, 8080);
        assert_eq!(cli.bind, "0.0.0.0");
    }

    #[test]
    fn test_cli_port_override() {
        let cli = Cli::parse_from(["devlink-bridge", "--port", "9000"]);
        assert_eq!(cli.port, 9000);
    }

    #[test]
    fn test_into_bridge_config_combines_bind_and_port() {
        let cli = Cli::parse_from(["devlink-bridge", "--bind", "127.0.0.1", "--port", "9000"]);
        let config = cli.into_bridge_config().unwrap();
        assert_eq!(config.listen_addr.to_string(), "127.0.0.1:9000");
    }

    #[test]
    fn test_into_bridge_config_invalid_bind_returns_error() {
        let cli = Cli {
            port: 8080,
            bind: "not.an.ip".to_string(),
        };
        assert!(cli.into_bridge_config().is_err());
    }
}
