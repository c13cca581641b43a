// In-memory transport and fixtures shared by the client integration tests.

#![allow(dead_code)]

use std::future::Future;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use annolab_client::config::ClientConfig;
use annolab_client::username::UsernameResolver;
use annolab_client::{AnnoClient, ClientBuilder, ConnectionError, Connector, Frame, TransportEvent, TransportLink};
use futures_util::future::BoxFuture;
use serde_json::Value;
use tokio::sync::mpsc;

pub const WAIT: Duration = Duration::from_secs(5);

/// Service side of one in-memory link.
pub struct ServerEnd {
    from_client: mpsc::UnboundedReceiver<Frame>,
    to_client: mpsc::UnboundedSender<TransportEvent>,
}

impl ServerEnd {
    /// Next frame the client wrote, decoded. Panics after [`WAIT`].
    pub async fn recv_json(&mut self) -> Value {
        let frame = tokio::time::timeout(WAIT, self.from_client.recv())
            .await
            .expect("client frame should arrive in time")
            .expect("client link should be open");
        decode(frame)
    }

    /// Next frame without a timeout, for tests running on paused time.
    pub async fn next_json(&mut self) -> Option<Value> {
        self.from_client.recv().await.map(decode)
    }

    /// Skip frames until one with `cmd` arrives.
    pub async fn recv_cmd(&mut self, cmd: &str) -> Value {
        loop {
            let message = self.recv_json().await;
            if message["cmd"] == cmd {
                return message;
            }
        }
    }

    pub fn assert_silent(&mut self) {
        match self.from_client.try_recv() {
            Err(mpsc::error::TryRecvError::Empty | mpsc::error::TryRecvError::Disconnected) => {}
            Ok(frame) => panic!("unexpected frame from client: {frame:?}"),
        }
    }

    pub fn push(&self, message: Value) {
        self.to_client
            .send(TransportEvent::Frame(Frame::Text(message.to_string())))
            .expect("client reader should be running");
    }

    pub fn push_binary(&self, bytes: &[u8]) {
        self.to_client
            .send(TransportEvent::Frame(Frame::Binary(bytes.to_vec())))
            .expect("client reader should be running");
    }

    pub fn fail(&self, message: &str) {
        let _ = self.to_client.send(TransportEvent::Error(message.to_owned()));
    }

    pub fn close(&self) {
        let _ = self.to_client.send(TransportEvent::Closed(Some("server going away".into())));
    }
}

fn decode(frame: Frame) -> Value {
    match frame {
        Frame::Text(text) => serde_json::from_str(&text).expect("client frames should be json"),
        Frame::Binary(bytes) => panic!("client sent {} binary bytes", bytes.len()),
    }
}

/// Connector handing the service side of every link to the test.
#[derive(Clone)]
pub struct MemoryConnector {
    accepted: mpsc::UnboundedSender<ServerEnd>,
    refuse: Arc<AtomicBool>,
}

impl MemoryConnector {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ServerEnd>) {
        let (accepted, links) = mpsc::unbounded_channel();
        (Self { accepted, refuse: Arc::new(AtomicBool::new(false)) }, links)
    }

    pub fn refuse_connections(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }
}

impl Connector for MemoryConnector {
    fn open(&self, _url: &str) -> impl Future<Output = Result<TransportLink, ConnectionError>> + Send {
        let refuse = self.refuse.load(Ordering::SeqCst);
        let accepted = self.accepted.clone();
        async move {
            if refuse {
                return Err(ConnectionError::Connect("connection refused".into()));
            }
            let (outgoing, from_client) = mpsc::unbounded_channel();
            let (to_client, incoming) = mpsc::unbounded_channel();
            accepted
                .send(ServerEnd { from_client, to_client })
                .map_err(|_| ConnectionError::Connect("test server gone".into()))?;
            Ok(TransportLink { outgoing, incoming })
        }
    }
}

/// Resolves every URI to the last path segment.
pub struct PathResolver;

impl UsernameResolver for PathResolver {
    fn resolve(&self, uri: String, _session: Option<String>) -> BoxFuture<'static, String> {
        Box::pin(async move { uri.rsplit('/').next().unwrap_or_default().to_owned() })
    }
}

pub fn test_config(export_dir: &Path) -> ClientConfig {
    let mut config = ClientConfig::default();
    config.service_url = "ws://127.0.0.1:4567/uima".into();
    config.user.session = Some("tok".into());
    config.user.user_name = Some("ada".into());
    config.export_dir = Some(export_dir.to_path_buf());
    config
}

pub fn memory_client(export_dir: &Path) -> (AnnoClient<MemoryConnector>, MemoryConnector, mpsc::UnboundedReceiver<ServerEnd>) {
    let (connector, links) = MemoryConnector::new();
    let client = ClientBuilder::new(test_config(export_dir))
        .connector(connector.clone())
        .resolver(PathResolver)
        .build();
    (client, connector, links)
}

/// Connect, answer the handshake, and return the service side of the link.
pub async fn connect_ready(
    client: &AnnoClient<MemoryConnector>,
    links: &mut mpsc::UnboundedReceiver<ServerEnd>,
) -> ServerEnd {
    let connecting = tokio::spawn({
        let client = client.clone();
        async move { client.connect().await.map(|connection| connection.epoch()) }
    });
    let mut server = tokio::time::timeout(WAIT, links.recv())
        .await
        .expect("client should open a link")
        .expect("connector should stay alive");
    let hello = server.recv_json().await;
    assert_eq!(hello["cmd"], "session");
    server.push(serde_json::json!({"cmd": "session"}));
    connecting
        .await
        .expect("connect task should not panic")
        .expect("connection should become ready");
    server
}

/// Poll until `check` holds, or panic after [`WAIT`].
pub async fn eventually(mut check: impl FnMut() -> bool) {
    tokio::time::timeout(WAIT, async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition should hold in time");
}
