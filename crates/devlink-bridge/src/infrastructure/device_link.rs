//! The device link: one tokio task per TCP connection attempt to a device.
//!
//! # Design
//!
//! Each link instance is a single task that owns the socket end to end:
//!
//! ```text
//! Session ── write queue (mpsc) ──→ ┌───────────┐
//! Session ── shutdown (oneshot) ──→ │ link task │ ──→ device TCP socket
//! Session ←─ events (mpsc) ──────── └───────────┘
//! ```
//!
//! Because every exit path of the task runs through one `outcome` value, the
//! task structurally emits *at most one* terminal event (`Closed`, `Failed`,
//! or `TimedOut`), and all `Received` events precede it in the channel.  A
//! session-initiated [`DeviceLink::close`] makes the task exit without
//! emitting anything: the session reports its own teardowns, so a close can
//! never race the task into a duplicate terminal notification.
//!
//! # Timeout
//!
//! One fixed 10 s timer guards both the connect attempt and idle gaps after
//! the link is open.  Any socket activity resets it.  When it fires after
//! open, the socket is aborted (SO_LINGER 0, so the device sees RST rather
//! than an orderly FIN) before `TimedOut` is emitted.

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tracing::{debug, warn};

use devlink_core::link::{ConnectFailure, LinkEvent, LinkId, LinkState, SendError};
use devlink_core::protocol::codec::{epoch_millis, trim_device_line};

/// Fixed connect/idle timeout for every device link.  A protocol constant,
/// not a tunable.
pub const DEVICE_TIMEOUT: Duration = Duration::from_millis(10_000);

/// Line terminator the devices expect: a single carriage return.
const LINE_TERMINATOR: u8 = b'\r';

// ── Link handle ───────────────────────────────────────────────────────────────

/// Owning handle to one device link instance.
///
/// Created by [`DeviceLink::open`]; the I/O runs in a spawned task.  The
/// handle tracks the state the owning session has observed so far and carries
/// the write queue and the shutdown trigger.  Dropping the handle shuts the
/// task down the same way [`close`](DeviceLink::close) does.
#[derive(Debug)]
pub struct DeviceLink {
    id: LinkId,
    host: String,
    port: u16,
    state: LinkState,
    write_tx: mpsc::UnboundedSender<Vec<u8>>,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl DeviceLink {
    /// Starts a connection attempt to `host:port` with the fixed
    /// [`DEVICE_TIMEOUT`].
    ///
    /// Returns immediately with the handle in state `Connecting`; every
    /// outcome arrives later as a [`LinkEvent`] on `events`, stamped with
    /// `id`.
    pub fn open(
        id: LinkId,
        host: String,
        port: u16,
        events: mpsc::Sender<(LinkId, LinkEvent)>,
    ) -> Self {
        Self::open_with_timeout(id, host, port, events, DEVICE_TIMEOUT)
    }

    /// [`open`](DeviceLink::open) with an explicit timeout, so tests can use
    /// a short one instead of waiting out the real 10 s window.
    pub(crate) fn open_with_timeout(
        id: LinkId,
        host: String,
        port: u16,
        events: mpsc::Sender<(LinkId, LinkEvent)>,
        device_timeout: Duration,
    ) -> Self {
        let (write_tx, write_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        tokio::spawn(run_link(
            id,
            host.clone(),
            port,
            events,
            write_rx,
            shutdown_rx,
            device_timeout,
        ));

        Self {
            id,
            host,
            port,
            state: LinkState::Connecting,
            write_tx,
            shutdown_tx: Some(shutdown_tx),
        }
    }

    /// Generation stamp of this instance.
    pub fn id(&self) -> LinkId {
        self.id
    }

    /// Target host as given in the `connect` command.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Target TCP port.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// State as observed by the owning session.
    pub fn state(&self) -> LinkState {
        self.state
    }

    /// Records a state transition observed via the event channel.  The
    /// session is the only writer; the task itself never touches the handle.
    pub fn transition(&mut self, state: LinkState) {
        debug!("{}: {:?} -> {:?}", self.id, self.state, state);
        self.state = state;
    }

    /// Queues `payload` plus the CR line terminator for writing.
    ///
    /// Fire-and-forget: returns as soon as the write is queued.  A write that
    /// fails on the socket surfaces later as a `Failed` event, not here.
    ///
    /// # Errors
    ///
    /// [`SendError::NotConnected`] unless the link is `Open`.
    pub fn send(&self, payload: &[u8]) -> Result<(), SendError> {
        if self.state != LinkState::Open {
            return Err(SendError::NotConnected);
        }

        let mut framed = Vec::with_capacity(payload.len() + 1);
        framed.extend_from_slice(payload);
        framed.push(LINE_TERMINATOR);

        // A send can only fail here if the task already exited on a terminal
        // condition whose event is still in flight; that event carries the
        // real story, so the queue failure is not reported separately.
        let _ = self.write_tx.send(framed);
        Ok(())
    }

    /// Shuts the link task down.  Idempotent; safe in any state.  The task
    /// drops the socket and exits without emitting an event.
    pub fn close(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

// ── The link task ─────────────────────────────────────────────────────────────

/// Body of the per-link task: connect, then pump reads/writes until a
/// terminal condition or shutdown.
async fn run_link(
    id: LinkId,
    host: String,
    port: u16,
    events: mpsc::Sender<(LinkId, LinkEvent)>,
    mut write_rx: mpsc::UnboundedReceiver<Vec<u8>>,
    mut shutdown_rx: oneshot::Receiver<()>,
    device_timeout: Duration,
) {
    // ── Connect phase ─────────────────────────────────────────────────────────
    let connect_result = tokio::select! {
        // Shutdown while still connecting: exit silently, the session has
        // already accounted for this teardown.
        _ = &mut shutdown_rx => {
            debug!("{id}: closed while connecting to {host}:{port}");
            return;
        }
        res = timeout(device_timeout, TcpStream::connect((host.as_str(), port))) => res,
    };

    let mut stream = match connect_result {
        Err(_elapsed) => {
            warn!("{id}: connect to {host}:{port} timed out");
            let _ = events.send((id, LinkEvent::TimedOut)).await;
            return;
        }
        Ok(Err(e)) => {
            let failure = ConnectFailure::classify(&e);
            warn!("{id}: connect to {host}:{port} failed: {e}");
            let _ = events.send((id, LinkEvent::Failed(failure))).await;
            return;
        }
        Ok(Ok(stream)) => stream,
    };

    debug!("{id}: connected to {host}:{port}");
    let _ = events.send((id, LinkEvent::Connected)).await;

    // ── Pump phase ────────────────────────────────────────────────────────────
    //
    // `None` outcome = session-initiated shutdown, exit silently.
    // `Some(event)` = remotely-observed terminal condition, emit exactly once.
    let mut read_buf = vec![0u8; 4096];
    let (mut rd, mut wr) = stream.split();

    let outcome: Option<LinkEvent> = loop {
        tokio::select! {
            _ = &mut shutdown_rx => {
                debug!("{id}: closed by session");
                break None;
            }

            queued = write_rx.recv() => {
                // The write queue closing means the handle is gone; treat it
                // like a shutdown.
                let Some(payload) = queued else { break None; };
                if let Err(e) = wr.write_all(&payload).await {
                    warn!("{id}: write to {host}:{port} failed: {e}");
                    break Some(LinkEvent::Failed(ConnectFailure::classify(&e)));
                }
            }

            read = timeout(device_timeout, rd.read(&mut read_buf)) => match read {
                Err(_elapsed) => {
                    warn!("{id}: {host}:{port} idle for {device_timeout:?}, aborting");
                    break Some(LinkEvent::TimedOut);
                }
                Ok(Ok(0)) => {
                    debug!("{id}: {host}:{port} closed the connection (EOF)");
                    break Some(LinkEvent::Closed);
                }
                Ok(Ok(n)) => {
                    let text = String::from_utf8_lossy(&read_buf[..n]);
                    let message = trim_device_line(&text).to_string();
                    let event = LinkEvent::Received { message, timestamp: epoch_millis() };
                    if events.send((id, event)).await.is_err() {
                        // Session gone; nothing left to report to.
                        break None;
                    }
                }
                Ok(Err(e)) => {
                    warn!("{id}: read from {host}:{port} failed: {e}");
                    break Some(LinkEvent::Failed(ConnectFailure::classify(&e)));
                }
            }
        }
    };

    drop((rd, wr));

    if matches!(outcome, Some(LinkEvent::TimedOut)) {
        // Abortive close: RST on drop instead of an orderly FIN.
        let _ = stream.set_linger(Some(Duration::from_secs(0)));
    }

    if let Some(event) = outcome {
        let _ = events.send((id, event)).await;
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
