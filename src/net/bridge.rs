//! Listening TCP + UDP bridge.
//!
//! One TCP listener and one UDP socket share the same port. Every accepted
//! TCP connection runs its own [`StreamDecoder`]; the UDP socket has a single
//! decoder and treats each datagram as self-contained. Decoded events go to
//! the bridge's [`EventPublisher`].

use super::publisher::{EventPublisher, Subscription};
use super::stats::{create_shared_stats, SharedBridgeStats};
use crate::config::{BufferConfig, Config};
use crate::event::{HeartRateEvent, Source};
use crate::identity::SharedSensorCache;
use crate::pipeline::StreamDecoder;
use chrono::{DateTime, Utc};
use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Size of each TCP read.
const READ_CHUNK: usize = 4096;

/// Errors starting a bridge.
#[derive(Debug)]
pub enum BridgeError {
    Bind { addr: String, source: io::Error },
    BindTimeout { addr: String, timeout: Duration },
    LocalAddr(io::Error),
}

impl fmt::Display for BridgeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BridgeError::Bind { addr, source } => write!(f, "failed to bind {addr}: {source}"),
            BridgeError::BindTimeout { addr, timeout } => {
                write!(f, "binding {addr} timed out after {}s", timeout.as_secs())
            }
            BridgeError::LocalAddr(e) => write!(f, "failed to read bound address: {e}"),
        }
    }
}

impl std::error::Error for BridgeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BridgeError::Bind { source, .. } => Some(source),
            BridgeError::LocalAddr(e) => Some(e),
            BridgeError::BindTimeout { .. } => None,
        }
    }
}

/// Identity and counters of a running bridge.
#[derive(Debug, Clone)]
pub struct BridgeInfo {
    pub id: Uuid,
    pub local_addr: SocketAddr,
    pub started_at: DateTime<Utc>,
    pub stats: SharedBridgeStats,
}

/// State shared by the bridge's tasks.
#[derive(Debug)]
struct BridgeContext {
    publisher: EventPublisher,
    stats: SharedBridgeStats,
    cache: SharedSensorCache,
    buffers: BufferConfig,
}

impl BridgeContext {
    fn emit(&self, event: HeartRateEvent) {
        self.stats.record_event(&event);
        self.publisher.publish(event);
    }
}

/// A bound TCP listener and UDP socket.
#[derive(Debug)]
pub struct Bridge {
    id: Uuid,
    local_addr: SocketAddr,
    ctx: Arc<BridgeContext>,
    shutdown: watch::Sender<bool>,
    tasks: JoinSet<()>,
}

impl Bridge {
    /// Bind TCP then UDP on `host:port` and start serving.
    ///
    /// The UDP socket takes the port the TCP listener actually got, so port
    /// `0` yields one ephemeral port for both. If either bind fails, or
    /// binding exceeds `bridge.bind_timeout`, nothing stays bound.
    pub async fn bind(
        host: &str,
        port: u16,
        cache: SharedSensorCache,
        config: &Config,
    ) -> Result<Self, BridgeError> {
        let addr = format!("{host}:{port}");
        let timeout = config.bridge.bind_timeout;

        let bind = async {
            let listener = TcpListener::bind((host, port))
                .await
                .map_err(|source| BridgeError::Bind {
                    addr: addr.clone(),
                    source,
                })?;
            let local_addr = listener.local_addr().map_err(BridgeError::LocalAddr)?;
            let udp = UdpSocket::bind(local_addr)
                .await
                .map_err(|source| BridgeError::Bind {
                    addr: format!("udp {local_addr}"),
                    source,
                })?;
            Ok::<_, BridgeError>((listener, udp, local_addr))
        };

        let (listener, udp, local_addr) = tokio::time::timeout(timeout, bind)
            .await
            .map_err(|_| BridgeError::BindTimeout {
                addr: addr.clone(),
                timeout,
            })??;

        let ctx = Arc::new(BridgeContext {
            publisher: EventPublisher::new(config.event_capacity),
            stats: create_shared_stats(),
            cache,
            buffers: config.buffers,
        });
        let (shutdown, shutdown_rx) = watch::channel(false);

        let mut tasks = JoinSet::new();
        tasks.spawn(accept_loop(listener, ctx.clone(), shutdown_rx.clone()));
        tasks.spawn(udp_loop(udp, ctx.clone(), shutdown_rx));

        let id = Uuid::new_v4();
        info!(%id, %local_addr, "bridge listening (tcp+udp)");

        Ok(Self {
            id,
            local_addr,
            ctx,
            shutdown,
            tasks,
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.ctx.stats.started_at()
    }

    pub fn stats(&self) -> &SharedBridgeStats {
        &self.ctx.stats
    }

    pub fn info(&self) -> BridgeInfo {
        BridgeInfo {
            id: self.id,
            local_addr: self.local_addr,
            started_at: self.started_at(),
            stats: self.ctx.stats.clone(),
        }
    }

    pub fn subscribe(&self) -> Subscription {
        self.ctx.publisher.subscribe()
    }

    /// Stop accepting, close every connection and both sockets, and return
    /// once all of them are closed. Subscribers receive a final `close`
    /// event and then see the end of their subscription.
    pub async fn close(mut self) {
        let _ = self.shutdown.send(true);
        while let Some(result) = self.tasks.join_next().await {
            if let Err(e) = result {
                warn!(error = %e, "bridge task ended abnormally");
            }
        }
        self.ctx.emit(HeartRateEvent::close(
            None,
            format!("bridge on {} closed", self.local_addr),
        ));
        info!(id = %self.id, local_addr = %self.local_addr, "bridge closed");
    }
}

async fn accept_loop(
    listener: TcpListener,
    ctx: Arc<BridgeContext>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut connections = JoinSet::new();
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    connections.spawn(serve_connection(stream, peer, ctx.clone(), shutdown.clone()));
                }
                Err(e) => {
                    warn!(error = %e, "tcp accept failed");
                    ctx.stats.record_error();
                }
            },
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
        }
    }
    drop(listener);
    while connections.join_next().await.is_some() {}
}

async fn serve_connection(
    mut stream: TcpStream,
    peer: SocketAddr,
    ctx: Arc<BridgeContext>,
    mut shutdown: watch::Receiver<bool>,
) {
    ctx.stats.record_connection_opened();
    debug!(%peer, "tcp connection accepted");

    let source = Source::ListenTcp;
    let mut decoder = StreamDecoder::new(source, ctx.cache.clone(), ctx.buffers);
    let mut buf = vec![0u8; READ_CHUNK];
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            read = stream.read(&mut buf) => match read {
                Ok(0) => {
                    ctx.emit(HeartRateEvent::close(Some(source), format!("{peer} disconnected")));
                    break;
                }
                Ok(n) => {
                    for event in decoder.feed(&buf[..n]) {
                        ctx.emit(event);
                    }
                }
                Err(e) => {
                    ctx.emit(HeartRateEvent::error(Some(source), format!("{peer}: {e}")));
                    break;
                }
            },
        }
    }

    ctx.stats.record_connection_closed();
    debug!(%peer, "tcp connection closed");
}

async fn udp_loop(socket: UdpSocket, ctx: Arc<BridgeContext>, mut shutdown: watch::Receiver<bool>) {
    let source = Source::ListenUdp;
    let mut decoder = StreamDecoder::new(source, ctx.cache.clone(), ctx.buffers);
    let mut buf = vec![0u8; ctx.buffers.datagram_max.max(1)];
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            received = socket.recv_from(&mut buf) => match received {
                Ok((n, peer)) => {
                    ctx.stats.record_udp_packet();
                    debug!(%peer, bytes = n, "udp datagram");
                    for event in decoder.decode_datagram(&buf[..n]) {
                        ctx.emit(event);
                    }
                }
                Err(e) => {
                    warn!(error = %e, "udp receive failed");
                    ctx.emit(HeartRateEvent::error(Some(source), e.to_string()));
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::create_shared_cache;

    fn test_config() -> Config {
        let mut config = Config::default();
        config.bridge.bind_timeout = Duration::from_secs(2);
        config
    }

    #[tokio::test]
    async fn test_bind_shares_port_between_tcp_and_udp() {
        let bridge = Bridge::bind("127.0.0.1", 0, create_shared_cache(), &test_config())
            .await
            .unwrap();
        let addr = bridge.local_addr();
        assert_ne!(addr.port(), 0);

        // Both sockets hold the port; binding it again must fail.
        assert!(TcpListener::bind(addr).await.is_err());
        assert!(UdpSocket::bind(addr).await.is_err());

        bridge.close().await;
        assert!(TcpListener::bind(addr).await.is_ok());
    }

    #[tokio::test]
    async fn test_bind_conflict_is_reported() {
        let holder = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = holder.local_addr().unwrap().port();

        let err = Bridge::bind("127.0.0.1", port, create_shared_cache(), &test_config())
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::Bind { .. }), "{err}");
    }

    #[tokio::test]
    async fn test_close_ends_subscriptions() {
        let bridge = Bridge::bind("127.0.0.1", 0, create_shared_cache(), &test_config())
            .await
            .unwrap();
        let mut sub = bridge.subscribe();
        bridge.close().await;

        assert_eq!(sub.recv().await.map(|e| e.kind()), Some("close"));
        assert!(sub.recv().await.is_none());
    }
}
