//! The control entry point.
//!
//! [`HubService`] owns the shared sensor cache and the (at most one) bound
//! bridge. [`HubService::open`] turns a [`StreamRequest`] into a live
//! [`EventStream`]; closing or dropping the stream is the teardown.

use crate::config::Config;
use crate::event::HeartRateEvent;
use crate::identity::{create_shared_cache, SharedSensorCache};
use crate::net::connector::{self, normalize_ws_path, ConnectProto, ConnectTarget, Connection};
use crate::net::{Bridge, BridgeError, BridgeInfo, SharedBridgeStats, Subscription};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{info, warn};

pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 8088;

/// Listen or dial out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamMode {
    #[default]
    Listen,
    Connect,
}

/// Transport named by a request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamProto {
    #[default]
    Tcp,
    Udp,
    #[serde(alias = "websocket")]
    Ws,
}

impl FromStr for StreamProto {
    type Err = RequestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "tcp" => Ok(StreamProto::Tcp),
            "udp" => Ok(StreamProto::Udp),
            "ws" | "websocket" => Ok(StreamProto::Ws),
            other => Err(RequestError::UnknownProto(other.to_string())),
        }
    }
}

/// Request parameters as they arrive from a request layer (query-string
/// style keys). Everything is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StreamParams {
    pub mode: StreamMode,
    pub proto: StreamProto,
    pub host: Option<String>,
    #[serde(deserialize_with = "port_value")]
    pub port: Option<i64>,
    pub hub_host: Option<String>,
    #[serde(deserialize_with = "port_value")]
    pub hub_port: Option<i64>,
    pub ws_path: Option<String>,
}

/// Ports arrive as numbers or, from a query string, as numeric strings.
/// Unparseable strings count as absent.
fn port_value<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Int(i64),
        Float(f64),
        Text(String),
    }

    Ok(match Option::<Raw>::deserialize(deserializer)? {
        Some(Raw::Int(port)) => Some(port),
        Some(Raw::Float(port)) if port.is_finite() => Some(port.trunc() as i64),
        Some(Raw::Text(text)) => text
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|port| port.is_finite())
            .map(|port| port.trunc() as i64),
        _ => None,
    })
}

/// Invalid request parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestError {
    MissingHubHost,
    UnsupportedProto(StreamProto),
    UnknownProto(String),
}

impl fmt::Display for RequestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestError::MissingHubHost => write!(f, "hubHost is required in connect mode"),
            RequestError::UnsupportedProto(proto) => {
                write!(f, "protocol {proto:?} is not supported in connect mode")
            }
            RequestError::UnknownProto(proto) => write!(f, "unknown protocol '{proto}'"),
        }
    }
}

impl std::error::Error for RequestError {}

fn clamp_port(port: Option<i64>, default: u16) -> u16 {
    port.map_or(default, |p| p.clamp(1, i64::from(u16::MAX)) as u16)
}

impl StreamParams {
    pub fn into_request(self) -> Result<StreamRequest, RequestError> {
        let port = clamp_port(self.port, DEFAULT_PORT);
        match self.mode {
            StreamMode::Listen => Ok(StreamRequest::Listen {
                host: self
                    .host
                    .map(|h| h.trim().to_string())
                    .filter(|h| !h.is_empty())
                    .unwrap_or_else(|| DEFAULT_HOST.to_string()),
                port,
            }),
            StreamMode::Connect => {
                let host = self
                    .hub_host
                    .map(|h| h.trim().to_string())
                    .filter(|h| !h.is_empty())
                    .ok_or(RequestError::MissingHubHost)?;
                let hub_port = clamp_port(self.hub_port, port);
                let proto = match self.proto {
                    StreamProto::Tcp => ConnectProto::Tcp,
                    StreamProto::Ws => ConnectProto::Ws,
                    StreamProto::Udp => return Err(RequestError::UnsupportedProto(StreamProto::Udp)),
                };
                Ok(StreamRequest::Connect(ConnectTarget {
                    proto,
                    host,
                    port: hub_port,
                    ws_path: normalize_ws_path(self.ws_path.as_deref().unwrap_or("/")),
                }))
            }
        }
    }
}

/// A validated request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamRequest {
    Listen { host: String, port: u16 },
    Connect(ConnectTarget),
}

/// A live source of events. Ends when the underlying bridge or connection
/// goes away, or after a single `error` event when the request failed.
#[derive(Debug)]
pub struct EventStream {
    rx: mpsc::Receiver<HeartRateEvent>,
    cancel: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl EventStream {
    /// A finished stream yielding just `events`.
    fn from_events(events: Vec<HeartRateEvent>) -> Self {
        let (tx, rx) = mpsc::channel(events.len().max(1));
        for event in events {
            let _ = tx.try_send(event);
        }
        Self {
            rx,
            cancel: None,
            task: None,
        }
    }

    fn failed(message: impl Into<String>) -> Self {
        Self::from_events(vec![HeartRateEvent::error(None, message)])
    }

    /// Forward a bridge subscription, starting with an `open` event.
    fn listen(info: BridgeInfo, mut subscription: Subscription, capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let (cancel, mut cancelled) = oneshot::channel::<()>();

        let task = tokio::spawn(async move {
            let open = HeartRateEvent::open(
                None,
                format!(
                    "listening on {} (since {})",
                    info.local_addr,
                    info.started_at.to_rfc3339()
                ),
            );
            if tx.send(open).await.is_err() {
                return;
            }
            loop {
                tokio::select! {
                    _ = &mut cancelled => break,
                    event = subscription.recv() => match event {
                        Some(event) => {
                            if tx.send(event).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    },
                }
            }
        });

        Self {
            rx,
            cancel: Some(cancel),
            task: Some(task),
        }
    }

    pub async fn next(&mut self) -> Option<HeartRateEvent> {
        self.rx.recv().await
    }

    /// Stop forwarding and wait until the forwarding task is gone.
    pub async fn close(self) {
        let EventStream { rx, cancel, task } = self;
        drop(rx);
        if let Some(cancel) = cancel {
            let _ = cancel.send(());
        }
        if let Some(task) = task {
            let _ = task.await;
        }
    }
}

impl From<Connection> for EventStream {
    fn from(connection: Connection) -> Self {
        let (rx, cancel, task) = connection.into_parts();
        Self {
            rx,
            cancel: Some(cancel),
            task: Some(task),
        }
    }
}

struct BoundBridge {
    host: String,
    port: u16,
    bridge: Bridge,
}

/// Owns the shared cache and the bridge slot.
pub struct HubService {
    config: Config,
    cache: SharedSensorCache,
    bridge: Mutex<Option<BoundBridge>>,
}

impl HubService {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            cache: create_shared_cache(),
            bridge: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn cache(&self) -> &SharedSensorCache {
        &self.cache
    }

    /// Return the bridge bound for `host:port`, binding it if needed.
    ///
    /// A bridge bound for a different address is fully closed first.
    pub async fn ensure_bridge(
        &self,
        host: &str,
        port: u16,
    ) -> Result<(BridgeInfo, Subscription), BridgeError> {
        let mut slot = self.bridge.lock().await;
        if let Some(bound) = slot.as_ref() {
            if bound.host == host && bound.port == port {
                return Ok((bound.bridge.info(), bound.bridge.subscribe()));
            }
        }

        if let Some(old) = slot.take() {
            info!(
                from = %format!("{}:{}", old.host, old.port),
                to = %format!("{host}:{port}"),
                "rebinding bridge"
            );
            old.bridge.close().await;
        }

        let bridge = Bridge::bind(host, port, self.cache.clone(), &self.config).await?;
        let bound = (bridge.info(), bridge.subscribe());
        *slot = Some(BoundBridge {
            host: host.to_string(),
            port,
            bridge,
        });
        Ok(bound)
    }

    pub async fn bridge_info(&self) -> Option<BridgeInfo> {
        self.bridge.lock().await.as_ref().map(|b| b.bridge.info())
    }

    pub async fn bridge_stats(&self) -> Option<SharedBridgeStats> {
        self.bridge_info().await.map(|info| info.stats)
    }

    /// Close the bridge, if any.
    pub async fn shutdown(&self) {
        if let Some(bound) = self.bridge.lock().await.take() {
            bound.bridge.close().await;
        }
    }

    /// Validate raw parameters and open the stream they describe.
    pub async fn open_params(&self, params: StreamParams) -> EventStream {
        match params.into_request() {
            Ok(request) => self.open(request).await,
            Err(err) => {
                warn!(error = %err, "rejected stream request");
                EventStream::failed(err.to_string())
            }
        }
    }

    /// Open a live event stream.
    pub async fn open(&self, request: StreamRequest) -> EventStream {
        match request {
            StreamRequest::Listen { host, port } => match self.ensure_bridge(&host, port).await {
                Ok((info, subscription)) => {
                    EventStream::listen(info, subscription, self.config.event_capacity)
                }
                Err(err) => {
                    warn!(error = %err, "bridge bind failed");
                    EventStream::failed(err.to_string())
                }
            },
            StreamRequest::Connect(target) => {
                connector::connect(target, self.cache.clone(), &self.config).into()
            }
        }
    }
}
