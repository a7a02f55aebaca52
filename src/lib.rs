//! hrhub - real-time decoder for heart-rate sensor hub telemetry.
//!
//! Hubs stream raw bytes over TCP or UDP (or serve them to an outbound
//! TCP/WebSocket connection). Each connection gets its own
//! [`pipeline::StreamDecoder`], which finds frame boundaries in the chunked
//! stream, validates and decodes them, resolves sensor identities and emits
//! [`HeartRateEvent`]s.
//!
//! Supported inputs:
//!
//! - **Hub900** frames (`0x7E ... 0x7F`) carrying ANT+ and BLE packets
//! - **HDLC** frames (`0x7E`-delimited) with the legacy CL831 receiver frame,
//!   or an unknown layout handled by the BPM guesser
//! - **ANT serial** messages (`A4 len id data xor`)
//! - plain text / JSON lines such as `HR=72` or `{"bpm": 72}`
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────┐   ┌───────────────┐   ┌───────────────┐
//! │ Bridge (TCP + │   │   Framers     │   │  Hub900 /     │
//! │ UDP) or       │──▶│ hub900, hdlc, │──▶│  legacy /     │
//! │ Connector     │   │ ant serial    │   │  guesser      │
//! └───────────────┘   └───────────────┘   └───────────────┘
//!                                                 │
//!                                                 ▼
//! ┌───────────────┐   ┌───────────────┐   ┌───────────────┐
//! │  EventStream  │◀──│   Publisher   │◀──│ ANT / BLE +   │
//! │  (consumer)   │   │  (broadcast)  │   │ identity cache│
//! └───────────────┘   └───────────────┘   └───────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use hrhub::{Config, HubService, StreamRequest};
//!
//! # async fn run() {
//! let service = HubService::new(Config::default());
//! let mut stream = service
//!     .open(StreamRequest::Listen { host: "127.0.0.1".into(), port: 8088 })
//!     .await;
//! while let Some(event) = stream.next().await {
//!     println!("{}", serde_json::to_string(&event).unwrap_or_default());
//! }
//! # }
//! ```

pub mod config;
pub mod decode;
pub mod event;
pub mod identity;
pub mod net;
pub mod pipeline;
pub mod service;

pub use config::{Config, ConfigError};
pub use event::{DataEvent, Format, HeartRate, HeartRateEvent, Source, Tech};
pub use identity::{create_shared_cache, SensorCache, SharedSensorCache};
pub use net::{Bridge, BridgeError, BridgeStats, ConnectError, ConnectProto, EventPublisher};
pub use pipeline::StreamDecoder;
pub use service::{EventStream, HubService, StreamParams, StreamRequest};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Tag prefixed to diagnostic `raw` strings.
pub const PARSER_TAG: &str = concat!("hrhub/", env!("CARGO_PKG_VERSION"));

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parser_tag_carries_version() {
        assert_eq!(PARSER_TAG, format!("hrhub/{VERSION}"));
    }
}
