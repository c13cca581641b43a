// Connection manager: the single duplex link to the annotation service.
//
// A link goes through transport open, then the `session` handshake; only
// after the service acknowledges the session is the connection ready.
// Requests submitted before that are held in order and written as soon
// as a link becomes ready. There is no automatic reconnect: after a close
// the next `connect()` establishes a fresh link.
//
// Transport is abstracted via `Connector` for testability.

pub mod ws;

use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::net::IpAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak};
use std::time::Duration;

use annolab_common::protocol::outbound::ClientRequest;
use annolab_common::protocol::{cmd, ProtocolError};
use serde_json::json;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, trace, warn};
use url::Url;

use crate::listeners::ListenerRegistry;
use crate::notify::Notifier;

pub use ws::WsConnector;

/// Listener group holding the session handshake subscription.
pub const AUTH_GROUP: &str = "auth";

const NOTIFY_TITLE: &str = "Web Service";

// ── Transport trait ─────────────────────────────────────────────────

/// One frame on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    /// Export payloads arrive as raw bytes.
    Binary(Vec<u8>),
}

/// What the transport reports back to the manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Frame(Frame),
    Error(String),
    Closed(Option<String>),
}

/// An open transport: frames to write, events read.
///
/// Dropping `outgoing` asks the transport to close.
#[derive(Debug)]
pub struct TransportLink {
    pub outgoing: mpsc::UnboundedSender<Frame>,
    pub incoming: mpsc::UnboundedReceiver<TransportEvent>,
}

/// Abstraction over the network transport.
///
/// `WsConnector` speaks WebSocket; tests plug in an in-memory link.
pub trait Connector: Send + Sync + 'static {
    fn open(
        &self,
        url: &str,
    ) -> impl Future<Output = Result<TransportLink, ConnectionError>> + Send;
}

/// Receives every inbound frame, in transport order, on the reader task.
pub trait FrameHandler: Send + Sync + 'static {
    fn handle_frame(&self, frame: Frame);

    /// Called once when a link closes, before `on_close` is dispatched.
    fn session_closed(&self) {}
}

// ── Connection state ────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Disconnected,
    /// Transport opening or session handshake outstanding.
    Connecting,
    Ready,
    /// The last link closed; `connect()` must be called again.
    Closed,
}

#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("invalid service url `{url}`: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("no session token configured")]
    MissingSession,

    #[error("failed to open transport: {0}")]
    Connect(String),

    #[error("connection closed before the session was ready")]
    ClosedDuringHandshake,

    #[error("connection is closed")]
    Closed,

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("client shut down")]
    ShutDown,
}

#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    pub url: String,
    pub heartbeat_interval: Duration,
}

// ── Send receipts ───────────────────────────────────────────────────

/// Resolves once a submitted request has been handed to the transport.
///
/// A request submitted while no session is ready stays pending until one
/// is; if none ever becomes ready the receipt never resolves.
#[derive(Debug)]
pub struct SendReceipt {
    rx: oneshot::Receiver<Result<(), ConnectionError>>,
}

impl SendReceipt {
    pub(crate) fn resolved(result: Result<(), ConnectionError>) -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(result);
        Self { rx }
    }

    pub(crate) fn pending() -> (oneshot::Sender<Result<(), ConnectionError>>, Self) {
        let (tx, rx) = oneshot::channel();
        (tx, Self { rx })
    }

    pub async fn delivered(self) -> Result<(), ConnectionError> {
        self.rx.await.unwrap_or(Err(ConnectionError::ShutDown))
    }

    /// Outcome if already known, without waiting.
    pub fn try_delivered(&mut self) -> Option<Result<(), ConnectionError>> {
        match self.rx.try_recv() {
            Ok(result) => Some(result),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => Some(Err(ConnectionError::ShutDown)),
        }
    }
}

// ── Connection manager ──────────────────────────────────────────────

struct Deferred {
    cmd: &'static str,
    text: String,
    ack: oneshot::Sender<Result<(), ConnectionError>>,
}

struct LinkState {
    /// Incremented for every link; tasks and listeners of older links
    /// compare against it and stand down.
    epoch: u64,
    status: ConnectionStatus,
    outgoing: Option<mpsc::UnboundedSender<Frame>>,
    deferred: VecDeque<Deferred>,
}

struct Shared<C: Connector> {
    connector: C,
    settings: ConnectionSettings,
    session: RwLock<Option<String>>,
    registry: ListenerRegistry,
    notifier: Notifier,
    handler: Arc<dyn FrameHandler>,
    status_tx: watch::Sender<ConnectionStatus>,
    link: Mutex<LinkState>,
}

/// Handle to a ready link, returned by [`ConnectionManager::connect`].
pub struct Connection<C: Connector> {
    shared: Arc<Shared<C>>,
    epoch: u64,
}

impl<C: Connector> fmt::Debug for Connection<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection").field("epoch", &self.epoch).finish()
    }
}

impl<C: Connector> Connection<C> {
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Whether this is still the live link.
    pub fn is_current(&self) -> bool {
        let link = self.shared.lock_link();
        link.epoch == self.epoch && link.status == ConnectionStatus::Ready
    }

    /// Write directly to this link, bypassing the deferred queue.
    pub fn send(&self, request: &ClientRequest) -> Result<(), ConnectionError> {
        self.shared.send_on_epoch(self.epoch, request.encode()?)
    }
}

/// Owns the link to the annotation service. Clones share the same link.
pub struct ConnectionManager<C: Connector = WsConnector> {
    shared: Arc<Shared<C>>,
}

impl<C: Connector> Clone for ConnectionManager<C> {
    fn clone(&self) -> Self {
        Self { shared: self.shared.clone() }
    }
}

impl<C: Connector> ConnectionManager<C> {
    pub fn new(
        connector: C,
        settings: ConnectionSettings,
        registry: ListenerRegistry,
        notifier: Notifier,
        handler: Arc<dyn FrameHandler>,
    ) -> Self {
        let (status_tx, _) = watch::channel(ConnectionStatus::Disconnected);
        Self {
            shared: Arc::new(Shared {
                connector,
                settings,
                session: RwLock::new(None),
                registry,
                notifier,
                handler,
                status_tx,
                link: Mutex::new(LinkState {
                    epoch: 0,
                    status: ConnectionStatus::Disconnected,
                    outgoing: None,
                    deferred: VecDeque::new(),
                }),
            }),
        }
    }

    /// Token sent in the next `session` handshake.
    pub fn set_session(&self, token: impl Into<String>) {
        *self.shared.session.write().unwrap_or_else(PoisonError::into_inner) = Some(token.into());
    }

    pub fn status(&self) -> ConnectionStatus {
        *self.shared.status_tx.borrow()
    }

    pub fn watch_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.shared.status_tx.subscribe()
    }

    /// Wait until a session is ready. Does not start a connection.
    pub async fn ready(&self) {
        let mut rx = self.shared.status_tx.subscribe();
        let _ = rx.wait_for(|status| *status == ConnectionStatus::Ready).await;
    }

    /// Number of requests waiting for a ready session.
    pub fn deferred_len(&self) -> usize {
        self.shared.lock_link().deferred.len()
    }

    /// Obtain the ready connection, establishing it if needed.
    ///
    /// Idempotent: while a link is ready it is returned as is, and while
    /// one is being established callers wait on that same attempt.
    pub async fn connect(&self) -> Result<Connection<C>, ConnectionError> {
        let epoch = {
            let mut link = self.shared.lock_link();
            match link.status {
                ConnectionStatus::Ready => {
                    return Ok(Connection { shared: self.shared.clone(), epoch: link.epoch });
                }
                ConnectionStatus::Connecting => None,
                ConnectionStatus::Disconnected | ConnectionStatus::Closed => {
                    link.epoch += 1;
                    link.status = ConnectionStatus::Connecting;
                    self.shared.status_tx.send_replace(ConnectionStatus::Connecting);
                    Some(link.epoch)
                }
            }
        };

        match epoch {
            Some(epoch) => self.establish(epoch).await,
            None => self.wait_established().await,
        }
    }

    /// Close the current link. Pending deferred requests are kept for the
    /// next connection.
    pub fn disconnect(&self) {
        let epoch = self.shared.lock_link().epoch;
        Shared::close_link(&self.shared, epoch, Some("closed by client".into()));
    }

    /// Queue `request` for the ready connection.
    ///
    /// Requests are written in submission order. Nothing is sent while
    /// no session is ready, and submitting never starts a connection.
    pub fn submit(&self, request: &ClientRequest) -> SendReceipt {
        let text = match request.encode() {
            Ok(text) => text,
            Err(error) => return SendReceipt::resolved(Err(error.into())),
        };

        let mut link = self.shared.lock_link();
        if link.status == ConnectionStatus::Ready {
            if let Some(outgoing) = &link.outgoing {
                if outgoing.send(Frame::Text(text.clone())).is_ok() {
                    trace!(cmd = request.cmd(), "request sent");
                    return SendReceipt::resolved(Ok(()));
                }
            }
        }

        let (ack, rx) = oneshot::channel();
        link.deferred.push_back(Deferred { cmd: request.cmd(), text, ack });
        debug!(cmd = request.cmd(), pending = link.deferred.len(), "request deferred until session is ready");
        SendReceipt { rx }
    }

    async fn establish(&self, epoch: u64) -> Result<Connection<C>, ConnectionError> {
        let url = self.shared.settings.url.clone();
        if let Err(error) = validate_service_url(&url) {
            self.shared.reset(epoch);
            return Err(error);
        }
        let Some(session) = self.shared.session.read().unwrap_or_else(PoisonError::into_inner).clone()
        else {
            self.shared.reset(epoch);
            return Err(ConnectionError::MissingSession);
        };

        let hello = match (ClientRequest::Session { session }).encode() {
            Ok(hello) => hello,
            Err(error) => {
                self.shared.reset(epoch);
                return Err(error.into());
            }
        };

        info!(%url, epoch, "connecting to annotation service");
        let TransportLink { outgoing, incoming } = match self.shared.connector.open(&url).await {
            Ok(link) => link,
            Err(error) => {
                warn!(%url, %error, "transport open failed");
                self.shared.reset(epoch);
                self.shared.notifier.persistent_error(
                    NOTIFY_TITLE,
                    "An error occurred. If issues persist please reconnect.",
                );
                return Err(error);
            }
        };

        // Listen for the acknowledgement before the handshake can be answered.
        let weak = Arc::downgrade(&self.shared);
        let ack = self.shared.registry.subscribe(cmd::SESSION, AUTH_GROUP, move |_| {
            if let Some(shared) = weak.upgrade() {
                Shared::mark_ready(&shared, epoch);
            }
        });

        {
            let mut link = self.shared.lock_link();
            if link.epoch != epoch || link.status != ConnectionStatus::Connecting {
                drop(link);
                ack.cancel();
                return Err(ConnectionError::ClosedDuringHandshake);
            }
            link.outgoing = Some(outgoing.clone());
        }
        tokio::spawn(read_loop(Arc::downgrade(&self.shared), epoch, incoming));

        if outgoing.send(Frame::Text(hello)).is_err() {
            ack.cancel();
            return Err(ConnectionError::ClosedDuringHandshake);
        }
        debug!(epoch, "session handshake sent");

        self.wait_established().await
    }

    async fn wait_established(&self) -> Result<Connection<C>, ConnectionError> {
        let mut rx = self.shared.status_tx.subscribe();
        let status = *rx
            .wait_for(|status| *status != ConnectionStatus::Connecting)
            .await
            .map_err(|_| ConnectionError::ShutDown)?;
        match status {
            ConnectionStatus::Ready => {
                let epoch = self.shared.lock_link().epoch;
                Ok(Connection { shared: self.shared.clone(), epoch })
            }
            _ => Err(ConnectionError::ClosedDuringHandshake),
        }
    }
}

impl<C: Connector> Shared<C> {
    fn lock_link(&self) -> MutexGuard<'_, LinkState> {
        self.link.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Abandon an attempt that never produced a link.
    fn reset(&self, epoch: u64) {
        let mut link = self.lock_link();
        if link.epoch == epoch && link.status == ConnectionStatus::Connecting {
            link.status = ConnectionStatus::Disconnected;
            link.outgoing = None;
            self.status_tx.send_replace(ConnectionStatus::Disconnected);
        }
    }

    fn send_on_epoch(&self, epoch: u64, text: String) -> Result<(), ConnectionError> {
        let link = self.lock_link();
        if link.epoch != epoch || link.status != ConnectionStatus::Ready {
            return Err(ConnectionError::Closed);
        }
        let outgoing = link.outgoing.as_ref().ok_or(ConnectionError::Closed)?;
        outgoing.send(Frame::Text(text)).map_err(|_| ConnectionError::Closed)
    }

    /// Session acknowledged: write everything deferred, in order, then
    /// open the gate and start the heartbeat for this link.
    fn mark_ready(shared: &Arc<Self>, epoch: u64) {
        let mut link = shared.lock_link();
        if link.epoch != epoch || link.status != ConnectionStatus::Connecting {
            return;
        }
        let Some(outgoing) = link.outgoing.clone() else {
            return;
        };

        let mut flushed = 0usize;
        while let Some(next) = link.deferred.front() {
            if outgoing.send(Frame::Text(next.text.clone())).is_err() {
                warn!(epoch, cmd = next.cmd, "transport went away while flushing deferred requests");
                return;
            }
            if let Some(sent) = link.deferred.pop_front() {
                let _ = sent.ack.send(Ok(()));
                flushed += 1;
            }
        }

        link.status = ConnectionStatus::Ready;
        shared.status_tx.send_replace(ConnectionStatus::Ready);
        drop(link);

        info!(epoch, flushed, "annotation session ready");
        tokio::spawn(heartbeat_loop(
            Arc::downgrade(shared),
            epoch,
            shared.settings.heartbeat_interval,
            shared.status_tx.subscribe(),
        ));
    }

    /// Tear down link `epoch`, if it is still the current one.
    fn close_link(shared: &Arc<Self>, epoch: u64, reason: Option<String>) {
        {
            let mut link = shared.lock_link();
            if link.epoch != epoch
                || matches!(link.status, ConnectionStatus::Closed | ConnectionStatus::Disconnected)
            {
                return;
            }
            link.outgoing = None;
            link.status = ConnectionStatus::Closed;
            shared.status_tx.send_replace(ConnectionStatus::Closed);
        }

        info!(epoch, reason = reason.as_deref().unwrap_or("none"), "connection closed");
        shared.registry.clear_group(AUTH_GROUP);
        shared.handler.session_closed();
        shared.notifier.persistent_info(
            NOTIFY_TITLE,
            "The connection to the web service was closed. Reconnect to continue.",
        );
        shared.registry.dispatch(
            cmd::ON_CLOSE,
            &json!({"cmd": cmd::ON_CLOSE, "data": "closed"}),
            None,
        );
    }
}

async fn read_loop<C: Connector>(
    shared: Weak<Shared<C>>,
    epoch: u64,
    mut incoming: mpsc::UnboundedReceiver<TransportEvent>,
) {
    while let Some(event) = incoming.recv().await {
        let Some(shared) = shared.upgrade() else {
            return;
        };
        match event {
            TransportEvent::Frame(frame) => shared.handler.handle_frame(frame),
            TransportEvent::Error(message) => {
                warn!(epoch, %message, "transport error");
                shared.notifier.persistent_error(
                    NOTIFY_TITLE,
                    "An error occurred. If issues persist please reconnect.",
                );
                Shared::close_link(&shared, epoch, Some(message));
                return;
            }
            TransportEvent::Closed(reason) => {
                Shared::close_link(&shared, epoch, reason);
                return;
            }
        }
    }
    if let Some(shared) = shared.upgrade() {
        Shared::close_link(&shared, epoch, None);
    }
}

async fn heartbeat_loop<C: Connector>(
    shared: Weak<Shared<C>>,
    epoch: u64,
    interval: Duration,
    mut status_rx: watch::Receiver<ConnectionStatus>,
) {
    let ping = match (ClientRequest::Ping {}).encode() {
        Ok(ping) => ping,
        Err(error) => {
            warn!(%error, "could not encode heartbeat");
            return;
        }
    };

    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {},
            changed = status_rx.changed() => {
                if changed.is_err() || *status_rx.borrow() != ConnectionStatus::Ready {
                    debug!(epoch, "heartbeat stopping");
                    return;
                }
                continue;
            }
        }

        let Some(shared) = shared.upgrade() else {
            return;
        };
        if let Err(error) = shared.send_on_epoch(epoch, ping.clone()) {
            debug!(epoch, %error, "heartbeat stopping");
            return;
        }
        trace!(epoch, "heartbeat sent");
    }
}

// ── URL validation ──────────────────────────────────────────────────

/// `wss` is required; plain `ws` is accepted only for loopback hosts.
pub fn validate_service_url(value: &str) -> Result<Url, ConnectionError> {
    let invalid = |reason: String| ConnectionError::InvalidUrl { url: value.to_owned(), reason };
    let parsed = Url::parse(value).map_err(|error| invalid(error.to_string()))?;
    match parsed.scheme() {
        "wss" => Ok(parsed),
        "ws" if is_loopback_host(parsed.host_str()) => Ok(parsed),
        _ => Err(invalid("service url must use wss (ws is allowed only for localhost testing)".into())),
    }
}

fn is_loopback_host(host: Option<&str>) -> bool {
    let Some(host) = host else {
        return false;
    };
    if host.eq_ignore_ascii_case("localhost") {
        return true;
    }
    let host = host.trim_start_matches('[').trim_end_matches(']');
    host.parse::<IpAddr>().is_ok_and(|addr| addr.is_loopback())
}
