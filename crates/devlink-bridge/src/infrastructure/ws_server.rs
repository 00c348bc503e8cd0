//! WebSocket server: accept loop and per-client transport adapter.
//!
//! This module is responsible for:
//!
//! 1. Binding a TCP listener on the configured address.
//! 2. Accepting incoming connections from browsers and upgrading each to a
//!    WebSocket session.
//! 3. Constructing one [`Session`] per client and wiring its channels:
//!    - inbound text frames are decoded and dispatched as commands;
//!    - link events are fed back into the session;
//!    - outbound notifications are serialized by a dedicated writer task.
//! 4. Calling [`Session::finish`] exactly once when the client goes away, on
//!    every path (close frame, stream end, transport error).
//! 5. Shutting down cleanly when the shared `running` flag is cleared.
//!
//! Each client runs in its own Tokio task; the accept loop never blocks on a
//! session, so one slow client cannot delay another.

use std::net::SocketAddr;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use anyhow::Context;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::{
    accept_async,
    tungstenite::{Error as WsError, Message as WsMessage},
};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use devlink_core::protocol::codec::{decode_command, encode_notification};
use devlink_core::protocol::envelope::{BridgeToClientMsg, ClientToBridgeMsg};

use crate::application::session::Session;
use crate::domain::config::BridgeConfig;

/// The error text a client sees for any malformed inbound payload.
const INVALID_FORMAT: &str = "invalid message format";

// ── Public API ────────────────────────────────────────────────────────────────

/// Runs the bridge until `running` is set to `false`.
///
/// Binds a TCP listener on `config.listen_addr` and hands it to
/// [`accept_loop`].
///
/// # Errors
///
/// Returns an error if the listener cannot be bound (port in use, no
/// permission to bind).
pub async fn run_server(config: BridgeConfig, running: Arc<AtomicBool>) -> anyhow::Result<()> {
    let listener = TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("failed to bind WebSocket listener on {}", config.listen_addr))?;

    info!("DevLink bridge listening on {}", config.listen_addr);
    accept_loop(listener, running).await;
    Ok(())
}

/// The accept loop, on an already-bound listener.
///
/// Public separately from [`run_server`] so integration tests can bind an
/// ephemeral port themselves and learn its address.
///
/// Uses a short timeout on `accept()` so the loop can poll the `running`
/// flag even when no clients are connecting.
pub async fn accept_loop(listener: TcpListener, running: Arc<AtomicBool>) {
    loop {
        if !running.load(Ordering::Relaxed) {
            info!("shutdown flag set; stopping accept loop");
            break;
        }

        match timeout(Duration::from_millis(200), listener.accept()).await {
            Ok(Ok((stream, peer_addr))) => {
                info!("new client connection from {peer_addr}");
                tokio::spawn(async move {
                    handle_client(stream, peer_addr).await;
                });
            }
            Ok(Err(e)) => {
                // Transient accept error (e.g. out of file descriptors); keep
                // serving the other clients.
                error!("accept error: {e}");
            }
            Err(_) => {
                // No connection within the window; poll the flag again.
            }
        }
    }
}

// ── Per-client handler ────────────────────────────────────────────────────────

/// Entry point of each per-client task: runs the session and logs the
/// outcome.
async fn handle_client(raw_stream: TcpStream, peer_addr: SocketAddr) {
    match run_client_session(raw_stream, peer_addr).await {
        Ok(()) => info!("session with {peer_addr} closed normally"),
        Err(e) => warn!("session with {peer_addr} closed with error: {e:#}"),
    }
}

/// Complete lifecycle of one client: handshake, session wiring, select loop,
/// teardown.
async fn run_client_session(raw_stream: TcpStream, peer_addr: SocketAddr) -> anyhow::Result<()> {
    let ws_stream = accept_async(raw_stream)
        .await
        .with_context(|| format!("WebSocket handshake failed with {peer_addr}"))?;

    let session_id = Uuid::new_v4();
    info!("session {session_id}: established with {peer_addr}");

    let (mut ws_tx, mut ws_rx) = ws_stream.split();
    let (out_tx, mut out_rx) = mpsc::channel::<BridgeToClientMsg>(64);
    let (mut session, mut link_events) = Session::new(out_tx.clone());

    // Writer task: notifications → JSON text frames.  Owning the sink in one
    // task keeps frame writes ordered without a lock.
    let writer = tokio::spawn(async move {
        while let Some(notification) = out_rx.recv().await {
            match encode_notification(&notification) {
                Ok(json) => {
                    if ws_tx.send(WsMessage::Text(json)).await.is_err() {
                        debug!("session {session_id}: send failed (client disconnected)");
                        break;
                    }
                }
                Err(e) => {
                    error!("session {session_id}: serialization error: {e}");
                }
            }
        }
    });

    loop {
        tokio::select! {
            frame = ws_rx.next() => {
                let message = match frame {
                    Some(Ok(m)) => m,
                    Some(Err(WsError::ConnectionClosed | WsError::Protocol(_))) => {
                        debug!("session {session_id}: WebSocket closed");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!("session {session_id}: WebSocket error: {e}");
                        break;
                    }
                    None => {
                        debug!("session {session_id}: stream ended");
                        break;
                    }
                };

                match message {
                    WsMessage::Text(text) => {
                        dispatch_frame(&mut session, &out_tx, session_id, &text).await;
                    }
                    WsMessage::Binary(_) => {
                        // The inbound protocol is JSON text; a binary frame is
                        // malformed input like any other.
                        debug!("session {session_id}: binary frame rejected");
                        send_invalid_format(&out_tx).await;
                    }
                    WsMessage::Close(_) => {
                        debug!("session {session_id}: Close frame received");
                        break;
                    }
                    // Protocol-level ping/pong; tungstenite answers pings
                    // itself when the sink is written.
                    WsMessage::Ping(_) | WsMessage::Pong(_) | WsMessage::Frame(_) => {}
                }
            }

            event = link_events.recv() => {
                // The session holds a sender for its lifetime, so the channel
                // cannot end while we are here.
                if let Some((id, event)) = event {
                    session.handle_link_event(id, event).await;
                }
            }
        }
    }

    // Client gone: tear down the device link without emitting anything.
    session.finish();
    drop(session);
    drop(out_tx);
    let _ = writer.await;
    Ok(())
}

/// Decodes one inbound text frame and routes it.
async fn dispatch_frame(
    session: &mut Session,
    out_tx: &mpsc::Sender<BridgeToClientMsg>,
    session_id: Uuid,
    raw: &str,
) {
    match decode_command(raw) {
        Ok(Some(command)) => {
            debug!("session {session_id}: {} command", command_type_name(&command));
            session.handle_command(command).await;
        }
        Ok(None) => {
            debug!("session {session_id}: unknown command type ignored");
        }
        Err(e) => {
            debug!("session {session_id}: malformed payload: {e}");
            send_invalid_format(out_tx).await;
        }
    }
}

/// Reports a malformed inbound payload.  The session stays alive.
async fn send_invalid_format(out_tx: &mpsc::Sender<BridgeToClientMsg>) {
    let _ = out_tx
        .send(BridgeToClientMsg::Error {
            message: INVALID_FORMAT.to_string(),
        })
        .await;
}

// ── Helper ────────────────────────────────────────────────────────────────────

/// Short type-name string for a command, for debug logging without echoing
/// payload contents.
fn command_type_name(command: &ClientToBridgeMsg) -> &'static str {
    match command {
        ClientToBridgeMsg::Connect { .. } => "connect",
        ClientToBridgeMsg::Send { .. } => "send",
        ClientToBridgeMsg::Disconnect => "disconnect",
        ClientToBridgeMsg::Ping => "ping",
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_type_name_covers_all_variants() {
        let connect = ClientToBridgeMsg::Connect {
            ip: "10.0.0.7".to_string(),
            port: 4001,
        };
        let send = ClientToBridgeMsg::Send {
            message: "do not log me".to_string(),
        };
        assert_eq!(command_type_name(&connect), "connect");
        assert_eq!(command_type_name(&send), "send");
        assert_eq!(command_type_name(&ClientToBridgeMsg::Disconnect), "disconnect");
        assert_eq!(command_type_name(&ClientToBridgeMsg::Ping), "ping");
    }

    #[test]
    fn test_command_type_name_does_not_expose_payload() {
        let send = ClientToBridgeMsg::Send {
            message: "secret".to_string(),
        };
        assert!(!command_type_name(&send).contains("secret"));
    }
}
