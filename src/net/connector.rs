//! Outbound connector: dial a hub over TCP or WebSocket and decode what it
//! sends.

use crate::config::{BufferConfig, Config, ConnectorConfig};
use crate::event::{HeartRateEvent, Source};
use crate::identity::SharedSensorCache;
use crate::pipeline::StreamDecoder;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Transport used to reach the hub.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectProto {
    Tcp,
    Ws,
}

impl ConnectProto {
    pub fn source(self) -> Source {
        match self {
            ConnectProto::Tcp => Source::ConnectTcp,
            ConnectProto::Ws => Source::ConnectWs,
        }
    }
}

/// Where to connect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectTarget {
    pub proto: ConnectProto,
    pub host: String,
    pub port: u16,
    /// Request path for WebSocket connections, always starting with `/`.
    pub ws_path: String,
}

impl ConnectTarget {
    pub fn tcp(host: impl Into<String>, port: u16) -> Self {
        Self {
            proto: ConnectProto::Tcp,
            host: host.into(),
            port,
            ws_path: "/".to_string(),
        }
    }

    pub fn ws(host: impl Into<String>, port: u16, path: &str) -> Self {
        Self {
            proto: ConnectProto::Ws,
            host: host.into(),
            port,
            ws_path: normalize_ws_path(path),
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn ws_url(&self) -> String {
        ws_url(&self.host, self.port, &self.ws_path)
    }
}

/// `ws://host:port/path`.
pub fn ws_url(host: &str, port: u16, path: &str) -> String {
    format!("ws://{host}:{port}{}", normalize_ws_path(path))
}

pub(crate) fn normalize_ws_path(path: &str) -> String {
    let path = path.trim();
    if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    }
}

/// Connector errors. Reported to the consumer as an `error` event.
#[derive(Debug)]
pub enum ConnectError {
    Connect { addr: String, source: io::Error },
    Timeout { addr: String, timeout: Duration },
    Io(io::Error),
    WebSocket(String),
    Unsupported(&'static str),
}

impl fmt::Display for ConnectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectError::Connect { addr, source } => {
                write!(f, "failed to connect to {addr}: {source}")
            }
            ConnectError::Timeout { addr, timeout } => {
                write!(f, "connecting to {addr} timed out after {}s", timeout.as_secs())
            }
            ConnectError::Io(e) => write!(f, "socket error: {e}"),
            ConnectError::WebSocket(e) => write!(f, "websocket error: {e}"),
            ConnectError::Unsupported(what) => write!(f, "unsupported: {what}"),
        }
    }
}

impl std::error::Error for ConnectError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConnectError::Connect { source, .. } => Some(source),
            ConnectError::Io(e) => Some(e),
            _ => None,
        }
    }
}

/// A running outbound connection. Events arrive in stream order; the
/// stream ends after the final `close` event.
#[derive(Debug)]
pub struct Connection {
    rx: mpsc::Receiver<HeartRateEvent>,
    cancel: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl Connection {
    pub async fn next(&mut self) -> Option<HeartRateEvent> {
        self.rx.recv().await
    }

    /// Disconnect and wait for the connection task to finish.
    pub async fn close(self) {
        let (rx, cancel, task) = self.into_parts();
        drop(rx);
        let _ = cancel.send(());
        let _ = task.await;
    }

    pub(crate) fn into_parts(
        self,
    ) -> (
        mpsc::Receiver<HeartRateEvent>,
        oneshot::Sender<()>,
        JoinHandle<()>,
    ) {
        (self.rx, self.cancel, self.task)
    }
}

/// Start connecting to `target` in the background.
pub fn connect(target: ConnectTarget, cache: SharedSensorCache, config: &Config) -> Connection {
    let (tx, rx) = mpsc::channel(config.event_capacity.max(1));
    let (cancel, cancelled) = oneshot::channel();
    let settings = config.connector.clone();
    let buffers = config.buffers;

    let task = tokio::spawn(async move {
        let source = target.proto.source();
        tokio::select! {
            _ = cancelled => debug!(addr = %target.addr(), "connector cancelled"),
            result = run(&target, cache, &settings, buffers, &tx) => {
                if let Err(err) = result {
                    warn!(addr = %target.addr(), error = %err, "connector failed");
                    let _ = tx.send(HeartRateEvent::error(Some(source), err.to_string())).await;
                    let _ = tx
                        .send(HeartRateEvent::close(Some(source), "connection closed"))
                        .await;
                }
            }
        }
    });

    Connection { rx, cancel, task }
}

async fn run(
    target: &ConnectTarget,
    cache: SharedSensorCache,
    settings: &ConnectorConfig,
    buffers: BufferConfig,
    tx: &mpsc::Sender<HeartRateEvent>,
) -> Result<(), ConnectError> {
    match target.proto {
        ConnectProto::Tcp => run_tcp(target, cache, settings, buffers, tx).await,
        ConnectProto::Ws => run_ws(target, cache, settings, buffers, tx).await,
    }
}

async fn run_tcp(
    target: &ConnectTarget,
    cache: SharedSensorCache,
    settings: &ConnectorConfig,
    buffers: BufferConfig,
    tx: &mpsc::Sender<HeartRateEvent>,
) -> Result<(), ConnectError> {
    let addr = target.addr();
    let source = Source::ConnectTcp;
    let mut stream = tokio::time::timeout(settings.connect_timeout, TcpStream::connect(&addr))
        .await
        .map_err(|_| ConnectError::Timeout {
            addr: addr.clone(),
            timeout: settings.connect_timeout,
        })?
        .map_err(|source| ConnectError::Connect {
            addr: addr.clone(),
            source,
        })?;

    info!(%addr, "connected (tcp)");
    if tx
        .send(HeartRateEvent::open(Some(source), format!("connected to tcp {addr}")))
        .await
        .is_err()
    {
        return Ok(());
    }

    let mut decoder = StreamDecoder::new(source, cache, buffers);
    let mut buf = vec![0u8; settings.read_chunk.max(1)];
    loop {
        let n = stream.read(&mut buf).await.map_err(ConnectError::Io)?;
        if n == 0 {
            info!(%addr, "remote closed (tcp)");
            let _ = tx
                .send(HeartRateEvent::close(Some(source), format!("{addr} closed the connection")))
                .await;
            return Ok(());
        }
        for event in decoder.feed(&buf[..n]) {
            if tx.send(event).await.is_err() {
                return Ok(());
            }
        }
    }
}

#[cfg(feature = "ws")]
async fn run_ws(
    target: &ConnectTarget,
    cache: SharedSensorCache,
    settings: &ConnectorConfig,
    buffers: BufferConfig,
    tx: &mpsc::Sender<HeartRateEvent>,
) -> Result<(), ConnectError> {
    use futures_util::StreamExt;
    use tokio_tungstenite::tungstenite::Message;

    let url = target.ws_url();
    let source = Source::ConnectWs;
    let (mut socket, _) = tokio::time::timeout(
        settings.connect_timeout,
        tokio_tungstenite::connect_async(url.as_str()),
    )
    .await
    .map_err(|_| ConnectError::Timeout {
        addr: url.clone(),
        timeout: settings.connect_timeout,
    })?
    .map_err(|e| ConnectError::WebSocket(e.to_string()))?;

    info!(%url, "connected (ws)");
    if tx
        .send(HeartRateEvent::open(Some(source), format!("connected to {url}")))
        .await
        .is_err()
    {
        return Ok(());
    }

    let mut decoder = StreamDecoder::new(source, cache, buffers);
    while let Some(message) = socket.next().await {
        let message = message.map_err(|e| ConnectError::WebSocket(e.to_string()))?;
        let events = match message {
            Message::Binary(bytes) => decoder.decode_datagram(&bytes),
            Message::Text(text) => decoder.decode_datagram(text.as_bytes()),
            Message::Close(frame) => {
                let reason = frame
                    .map(|f| f.reason.to_string())
                    .filter(|r| !r.is_empty())
                    .unwrap_or_else(|| "remote closed".to_string());
                info!(%url, %reason, "websocket closed");
                let _ = tx.send(HeartRateEvent::close(Some(source), reason)).await;
                return Ok(());
            }
            _ => continue,
        };
        for event in events {
            if tx.send(event).await.is_err() {
                return Ok(());
            }
        }
    }

    let _ = tx
        .send(HeartRateEvent::close(Some(source), "remote closed"))
        .await;
    Ok(())
}

#[cfg(not(feature = "ws"))]
async fn run_ws(
    _target: &ConnectTarget,
    _cache: SharedSensorCache,
    _settings: &ConnectorConfig,
    _buffers: BufferConfig,
    _tx: &mpsc::Sender<HeartRateEvent>,
) -> Result<(), ConnectError> {
    Err(ConnectError::Unsupported(
        "websocket support not compiled in (enable the `ws` feature)",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::create_shared_cache;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;

    #[test]
    fn test_ws_url() {
        assert_eq!(ws_url("10.0.0.5", 8080, "stream"), "ws://10.0.0.5:8080/stream");
        assert_eq!(ws_url("hub", 80, "/"), "ws://hub:80/");
        assert_eq!(ConnectTarget::ws("hub", 81, "a/b").ws_path, "/a/b");
    }

    #[tokio::test]
    async fn test_tcp_open_data_close() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            socket.write_all(b"HR=70\n").await.unwrap();
        });

        let mut conn = connect(
            ConnectTarget::tcp("127.0.0.1", port),
            create_shared_cache(),
            &Config::default(),
        );
        assert_eq!(conn.next().await.map(|e| e.kind()), Some("open"));
        let data = conn.next().await.unwrap();
        assert_eq!(data.bpm().map(|b| b.get()), Some(70));
        assert_eq!(data.as_data().map(|d| d.source), Some(Source::ConnectTcp));
        assert_eq!(conn.next().await.map(|e| e.kind()), Some("close"));
        assert!(conn.next().await.is_none());
    }

    #[tokio::test]
    async fn test_refused_connection_reports_error_then_close() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let mut conn = connect(
            ConnectTarget::tcp("127.0.0.1", port),
            create_shared_cache(),
            &Config::default(),
        );
        assert_eq!(conn.next().await.map(|e| e.kind()), Some("error"));
        assert_eq!(conn.next().await.map(|e| e.kind()), Some("close"));
        assert!(conn.next().await.is_none());
    }

    #[tokio::test]
    async fn test_close_cancels_pending_connection() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let mut conn = connect(
            ConnectTarget::tcp("127.0.0.1", port),
            create_shared_cache(),
            &Config::default(),
        );
        assert_eq!(conn.next().await.map(|e| e.kind()), Some("open"));
        conn.close().await;
        drop(listener);
    }
}
