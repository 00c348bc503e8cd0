//! The per-client Session: the state machine at the heart of the bridge.
//!
//! One Session exists per WebSocket client.  It owns at most one
//! [`DeviceLink`] at a time, interprets decoded client commands, relays link
//! events back as notifications, and guarantees clean teardown on every exit
//! path.
//!
//! # Wiring
//!
//! ```text
//!            commands                    notifications
//! transport ───────────→ ┌─────────┐ ──────────────────→ transport
//!                        │ Session │
//! link task ───────────→ └─────────┘ ──── open/close ──→ link task
//!            link events
//! ```
//!
//! The Session never touches a socket.  It talks to the transport through an
//! outbound notification channel and to its device link through the link
//! handle and the link event channel, which is what makes it unit-testable
//! without any WebSocket in sight.
//!
//! # Invariant
//!
//! At most one live device link at any time.  Every path that installs a new
//! link (`connect`) first runs the full teardown of the old one; every
//! terminal link event drops the owned handle.  Link events carry the
//! emitting instance's [`LinkId`], and events from a superseded instance are
//! discarded, so a slow old link can never corrupt the state of its
//! replacement.

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use devlink_core::link::{LinkEvent, LinkId, LinkState, SendError};
use devlink_core::protocol::codec::epoch_millis;
use devlink_core::protocol::envelope::{BridgeToClientMsg, ClientToBridgeMsg};

use crate::infrastructure::device_link::DeviceLink;

/// Capacity of the link event channel a Session hands to its device links.
const LINK_EVENT_CAPACITY: usize = 64;

// ── Session ───────────────────────────────────────────────────────────────────

/// Per-client bridge state.  See the module docs for the wiring picture.
pub struct Session {
    /// The owned device link, if any.  Exclusive: replacing it always tears
    /// the previous one down first.
    link: Option<DeviceLink>,

    /// Handle for a scheduled automatic-reconnect attempt.  Nothing arms
    /// this today; every teardown path aborts it so the extension point
    /// cannot leak a timer once reconnect lands.
    reconnect_timer: Option<JoinHandle<()>>,

    /// Generation counter for link instances.
    next_link_id: u64,

    /// Sender cloned into every device link this session opens.
    link_events_tx: mpsc::Sender<(LinkId, LinkEvent)>,

    /// Outbound notifications toward the client.  A failed send means the
    /// client is gone; the session keeps running until the transport calls
    /// [`finish`](Session::finish).
    outbound: mpsc::Sender<BridgeToClientMsg>,
}

impl Session {
    /// Creates a session and returns it together with the link event
    /// receiver the transport must drive.
    pub fn new(
        outbound: mpsc::Sender<BridgeToClientMsg>,
    ) -> (Self, mpsc::Receiver<(LinkId, LinkEvent)>) {
        let (link_events_tx, link_events_rx) = mpsc::channel(LINK_EVENT_CAPACITY);
        let session = Self {
            link: None,
            reconnect_timer: None,
            next_link_id: 0,
            link_events_tx,
            outbound,
        };
        (session, link_events_rx)
    }

    /// State of the owned link, if any.  `ping` and the tests read this.
    pub fn link_state(&self) -> Option<LinkState> {
        self.link.as_ref().map(DeviceLink::state)
    }

    // ── Command dispatch ──────────────────────────────────────────────────────

    /// Handles one decoded client command.
    pub async fn handle_command(&mut self, command: ClientToBridgeMsg) {
        match command {
            ClientToBridgeMsg::Connect { ip, port } => self.connect(ip, port).await,
            ClientToBridgeMsg::Send { message } => self.send_line(message).await,
            ClientToBridgeMsg::Disconnect => self.teardown_link().await,
            ClientToBridgeMsg::Ping => self.ping().await,
        }
    }

    /// `connect`: tear down any existing link, announce the attempt, open a
    /// fresh link.
    async fn connect(&mut self, ip: String, port: u16) {
        self.teardown_link().await;

        self.emit(BridgeToClientMsg::Connecting {
            message: format!("{ip}:{port}"),
        })
        .await;

        let id = LinkId(self.next_link_id);
        self.next_link_id += 1;
        info!("opening {id} to {ip}:{port}");
        self.link = Some(DeviceLink::open(id, ip, port, self.link_events_tx.clone()));
    }

    /// `send`: queue a write on the open link and confirm the attempt, or
    /// report that nothing is connected.
    async fn send_line(&mut self, message: String) {
        let Some(link) = self.link.as_ref().filter(|l| l.state() == LinkState::Open) else {
            self.emit(BridgeToClientMsg::Error {
                message: SendError::NotConnected.to_string(),
            })
            .await;
            return;
        };

        // Fire-and-forget; `sent` acknowledges the attempt, not delivery.  A
        // write that fails on the socket comes back later as a Failed event.
        let _ = link.send(message.as_bytes());
        self.emit(BridgeToClientMsg::Sent {
            message,
            timestamp: epoch_millis(),
        })
        .await;
    }

    /// `ping`: pure query, no side effects.
    async fn ping(&self) {
        let connected = self
            .link
            .as_ref()
            .is_some_and(|l| l.state() == LinkState::Open);
        self.emit(BridgeToClientMsg::Pong { connected }).await;
    }

    // ── Link event relay ──────────────────────────────────────────────────────

    /// Handles one event from the link event channel.
    pub async fn handle_link_event(&mut self, id: LinkId, event: LinkEvent) {
        let current = self.link.as_ref().map(DeviceLink::id);
        if current != Some(id) {
            debug!("ignoring stale event from superseded {id}: {event:?}");
            return;
        }

        match event {
            LinkEvent::Connected => {
                if let Some(link) = self.link.as_mut() {
                    link.transition(LinkState::Open);
                    let ip = link.host().to_string();
                    let port = link.port();
                    self.emit(BridgeToClientMsg::Connected {
                        message: format!("connected to {ip}:{port}"),
                        ip,
                        port,
                    })
                    .await;
                }
            }

            LinkEvent::Received { message, timestamp } => {
                self.emit(BridgeToClientMsg::Received { message, timestamp })
                    .await;
            }

            LinkEvent::Closed => {
                self.abandon_link(LinkState::Closed);
                self.emit(BridgeToClientMsg::Disconnected {
                    message: "target closed the connection".to_string(),
                })
                .await;
            }

            LinkEvent::Failed(failure) => {
                self.abandon_link(LinkState::Errored);
                self.emit(BridgeToClientMsg::Error {
                    message: failure.to_string(),
                })
                .await;
            }

            LinkEvent::TimedOut => {
                self.abandon_link(LinkState::TimedOut);
                self.emit(BridgeToClientMsg::Error {
                    message: "connection timed out".to_string(),
                })
                .await;
            }
        }
    }

    // ── Teardown ──────────────────────────────────────────────────────────────

    /// Client connection dropped: same teardown as `disconnect`, but nothing
    /// is emitted because there is nobody left to notify.
    pub fn finish(&mut self) {
        if let Some(timer) = self.reconnect_timer.take() {
            timer.abort();
        }
        if let Some(mut link) = self.link.take() {
            info!("client gone, closing {}", link.id());
            link.close();
        }
    }

    /// Full command-path teardown: abort the reconnect timer, close the
    /// link, and tell the client when the link was actually live.
    async fn teardown_link(&mut self) {
        if let Some(timer) = self.reconnect_timer.take() {
            timer.abort();
        }
        if let Some(mut link) = self.link.take() {
            link.close();
            if link.state().is_live() {
                self.emit(BridgeToClientMsg::Disconnected {
                    message: format!("disconnected from {}:{}", link.host(), link.port()),
                })
                .await;
            }
        }
    }

    /// Records the terminal state of the current link and releases it.  Used
    /// by the relay when the link task itself reported the terminal event.
    fn abandon_link(&mut self, terminal: LinkState) {
        if let Some(link) = self.link.as_mut() {
            link.transition(terminal);
        }
        self.link = None;
        if let Some(timer) = self.reconnect_timer.take() {
            timer.abort();
        }
    }

    /// Pushes one notification toward the client.  A closed channel means
    /// the client is gone; the transport will call `finish` shortly.
    async fn emit(&self, notification: BridgeToClientMsg) {
        let _ = self.outbound.send(notification).await;
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use devlink_core::link::ConnectFailure;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    /// A fresh session plus both observation channels.
    fn session() -> (
        Session,
        mpsc::Receiver<BridgeToClientMsg>,
        mpsc::Receiver<(LinkId, LinkEvent)>,
    ) {
        let (out_tx, out_rx) = mpsc::channel(16);
        let (session, link_rx) = Session::new(out_tx);
        (session, out_rx, link_rx)
    }

    async fn loopback_listener() -> (TcpListener, String, u16) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        (listener, addr.ip().to_string(), addr.port())
    }

    /// Drives a session to an open link against `listener` and returns the
    /// device-side socket.
    async fn open_link(
        session: &mut Session,
        out_rx: &mut mpsc::Receiver<BridgeToClientMsg>,
        link_rx: &mut mpsc::Receiver<(LinkId, LinkEvent)>,
        listener: &TcpListener,
        ip: &str,
        port: u16,
    ) -> tokio::net::TcpStream {
        session
            .handle_command(ClientToBridgeMsg::Connect {
                ip: ip.to_string(),
                port,
            })
            .await;
        assert!(matches!(
            out_rx.recv().await.unwrap(),
            BridgeToClientMsg::Connecting { .. }
        ));
        let (socket, _) = listener.accept().await.unwrap();
        let (id, event) = link_rx.recv().await.unwrap();
        assert_eq!(event, LinkEvent::Connected);
        session.handle_link_event(id, event).await;
        assert!(matches!(
            out_rx.recv().await.unwrap(),
            BridgeToClientMsg::Connected { .. }
        ));
        socket
    }

    #[tokio::test]
    async fn test_ping_with_no_link_answers_not_connected() {
        let (mut session, mut out_rx, _link_rx) = session();

        session.handle_command(ClientToBridgeMsg::Ping).await;

        assert_eq!(
            out_rx.recv().await.unwrap(),
            BridgeToClientMsg::Pong { connected: false }
        );
    }

    #[tokio::test]
    async fn test_send_without_link_yields_exactly_one_error() {
        let (mut session, mut out_rx, _link_rx) = session();

        session
            .handle_command(ClientToBridgeMsg::Send {
                message: "STATUS?".to_string(),
            })
            .await;

        assert_eq!(
            out_rx.recv().await.unwrap(),
            BridgeToClientMsg::Error {
                message: "not connected to target".to_string(),
            }
        );
        // Nothing else: no write attempted, no extra envelopes
        assert!(out_rx.try_recv().is_err());
        assert_eq!(session.link_state(), None);
    }

    #[tokio::test]
    async fn test_connect_emits_connecting_then_connected_with_target() {
        let (mut session, mut out_rx, mut link_rx) = session();
        let (listener, ip, port) = loopback_listener().await;

        session
            .handle_command(ClientToBridgeMsg::Connect {
                ip: ip.clone(),
                port,
            })
            .await;

        // `connecting` carries the "{ip}:{port}" target string
        assert_eq!(
            out_rx.recv().await.unwrap(),
            BridgeToClientMsg::Connecting {
                message: format!("{ip}:{port}"),
            }
        );
        assert_eq!(session.link_state(), Some(LinkState::Connecting));

        let (_socket, _) = listener.accept().await.unwrap();
        let (id, event) = link_rx.recv().await.unwrap();
        session.handle_link_event(id, event).await;

        assert_eq!(
            out_rx.recv().await.unwrap(),
            BridgeToClientMsg::Connected {
                message: format!("connected to {ip}:{port}"),
                ip: ip.clone(),
                port,
            }
        );
        assert_eq!(session.link_state(), Some(LinkState::Open));

        session.handle_command(ClientToBridgeMsg::Ping).await;
        assert_eq!(
            out_rx.recv().await.unwrap(),
            BridgeToClientMsg::Pong { connected: true }
        );
    }

    #[tokio::test]
    async fn test_send_with_open_link_confirms_and_writes_cr_terminated() {
        let (mut session, mut out_rx, mut link_rx) = session();
        let (listener, ip, port) = loopback_listener().await;
        let mut socket =
            open_link(&mut session, &mut out_rx, &mut link_rx, &listener, &ip, port).await;

        session
            .handle_command(ClientToBridgeMsg::Send {
                message: "STATUS?".to_string(),
            })
            .await;

        // Confirmation echoes the original message
        match out_rx.recv().await.unwrap() {
            BridgeToClientMsg::Sent { message, timestamp } => {
                assert_eq!(message, "STATUS?");
                assert!(timestamp > 0);
            }
            other => panic!("expected Sent, got {:?}", other),
        }

        // The device observes payload + CR
        let mut buf = vec![0u8; 16];
        let n = socket.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"STATUS?\r");
    }

    #[tokio::test]
    async fn test_device_output_is_relayed_as_received() {
        let (mut session, mut out_rx, mut link_rx) = session();
        let (listener, ip, port) = loopback_listener().await;
        let mut socket =
            open_link(&mut session, &mut out_rx, &mut link_rx, &listener, &ip, port).await;

        use tokio::io::AsyncWriteExt;
        socket.write_all(b"TEMP 23.4\r\n").await.unwrap();

        let (id, event) = link_rx.recv().await.unwrap();
        session.handle_link_event(id, event).await;

        match out_rx.recv().await.unwrap() {
            BridgeToClientMsg::Received { message, .. } => assert_eq!(message, "TEMP 23.4"),
            other => panic!("expected Received, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_connect_while_open_tears_down_old_link_first() {
        let (mut session, mut out_rx, mut link_rx) = session();
        let (listener_a, ip_a, port_a) = loopback_listener().await;
        let mut old_socket = open_link(
            &mut session,
            &mut out_rx,
            &mut link_rx,
            &listener_a,
            &ip_a,
            port_a,
        )
        .await;

        // Act: connect somewhere else while the first link is open
        let (listener_b, ip_b, port_b) = loopback_listener().await;
        session
            .handle_command(ClientToBridgeMsg::Connect {
                ip: ip_b.clone(),
                port: port_b,
            })
            .await;

        // Teardown of the old link is announced BEFORE the new attempt
        assert_eq!(
            out_rx.recv().await.unwrap(),
            BridgeToClientMsg::Disconnected {
                message: format!("disconnected from {ip_a}:{port_a}"),
            }
        );
        assert_eq!(
            out_rx.recv().await.unwrap(),
            BridgeToClientMsg::Connecting {
                message: format!("{ip_b}:{port_b}"),
            }
        );

        // Exactly one link owned, and it is the new one
        assert_eq!(session.link_state(), Some(LinkState::Connecting));
        let _ = listener_b.accept().await.unwrap();

        // The old device sees the connection go away
        let mut buf = [0u8; 8];
        assert_eq!(old_socket.read(&mut buf).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_remote_close_relays_disconnected_and_drops_link() {
        let (mut session, mut out_rx, mut link_rx) = session();
        let (listener, ip, port) = loopback_listener().await;
        let socket =
            open_link(&mut session, &mut out_rx, &mut link_rx, &listener, &ip, port).await;

        drop(socket);

        let (id, event) = link_rx.recv().await.unwrap();
        assert_eq!(event, LinkEvent::Closed);
        session.handle_link_event(id, event).await;

        assert_eq!(
            out_rx.recv().await.unwrap(),
            BridgeToClientMsg::Disconnected {
                message: "target closed the connection".to_string(),
            }
        );
        assert_eq!(session.link_state(), None);

        session.handle_command(ClientToBridgeMsg::Ping).await;
        assert_eq!(
            out_rx.recv().await.unwrap(),
            BridgeToClientMsg::Pong { connected: false }
        );
    }

    #[tokio::test]
    async fn test_timeout_event_maps_to_fixed_error_text() {
        let (mut session, mut out_rx, mut link_rx) = session();
        let (listener, ip, port) = loopback_listener().await;

        session
            .handle_command(ClientToBridgeMsg::Connect { ip, port })
            .await;
        let _ = out_rx.recv().await.unwrap(); // connecting
        let _ = listener.accept().await.unwrap();
        let (id, _connected) = link_rx.recv().await.unwrap();

        // Timeout straight from Connecting is a valid path
        session.handle_link_event(id, LinkEvent::TimedOut).await;

        assert_eq!(
            out_rx.recv().await.unwrap(),
            BridgeToClientMsg::Error {
                message: "connection timed out".to_string(),
            }
        );
        assert_eq!(session.link_state(), None);
    }

    #[tokio::test]
    async fn test_failure_event_maps_classification_text() {
        let (mut session, mut out_rx, mut link_rx) = session();
        let (listener, ip, port) = loopback_listener().await;

        session
            .handle_command(ClientToBridgeMsg::Connect { ip, port })
            .await;
        let _ = out_rx.recv().await.unwrap(); // connecting
        let _ = listener.accept().await.unwrap();
        let (id, _connected) = link_rx.recv().await.unwrap();

        session
            .handle_link_event(id, LinkEvent::Failed(ConnectFailure::Refused))
            .await;

        assert_eq!(
            out_rx.recv().await.unwrap(),
            BridgeToClientMsg::Error {
                message: "target not listening on port".to_string(),
            }
        );
        assert_eq!(session.link_state(), None);
    }

    #[tokio::test]
    async fn test_stale_events_from_superseded_link_are_dropped() {
        let (mut session, mut out_rx, mut link_rx) = session();
        let (listener_a, ip_a, port_a) = loopback_listener().await;

        session
            .handle_command(ClientToBridgeMsg::Connect {
                ip: ip_a,
                port: port_a,
            })
            .await;
        let _ = out_rx.recv().await.unwrap(); // connecting
        let _ = listener_a.accept().await.unwrap();

        // Hold the first link's Connected event instead of feeding it
        let (old_id, old_event) = link_rx.recv().await.unwrap();
        assert_eq!(old_event, LinkEvent::Connected);

        // Replace the link before the event is processed
        let (listener_b, ip_b, port_b) = loopback_listener().await;
        session
            .handle_command(ClientToBridgeMsg::Connect {
                ip: ip_b,
                port: port_b,
            })
            .await;
        let _ = out_rx.recv().await.unwrap(); // disconnected (old was live)
        let _ = out_rx.recv().await.unwrap(); // connecting
        let _ = listener_b.accept().await.unwrap();

        // Act: the stale event arrives late
        session.handle_link_event(old_id, old_event).await;

        // Assert: no envelope, and the new link is untouched
        assert!(out_rx.try_recv().is_err());
        assert_eq!(session.link_state(), Some(LinkState::Connecting));
    }

    #[tokio::test]
    async fn test_finish_with_open_link_emits_nothing_and_closes_socket() {
        let (mut session, mut out_rx, mut link_rx) = session();
        let (listener, ip, port) = loopback_listener().await;
        let mut socket =
            open_link(&mut session, &mut out_rx, &mut link_rx, &listener, &ip, port).await;

        // Act: the client connection dropped
        session.finish();

        // Assert: silent teardown; the device sees EOF
        assert!(out_rx.try_recv().is_err());
        assert_eq!(session.link_state(), None);
        let mut buf = [0u8; 8];
        assert_eq!(socket.read(&mut buf).await.unwrap(), 0);
    }
}
