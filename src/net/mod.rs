//! Network side: the listening bridge, the outbound connector and the
//! event fan-out they feed.

pub mod bridge;
pub mod connector;
pub mod publisher;
pub mod stats;

pub use bridge::{Bridge, BridgeError, BridgeInfo};
pub use connector::{connect, ws_url, ConnectError, ConnectProto, ConnectTarget, Connection};
pub use publisher::{EventPublisher, Subscription};
pub use stats::{create_shared_stats, BridgeStats, BridgeStatsSnapshot, SharedBridgeStats};
