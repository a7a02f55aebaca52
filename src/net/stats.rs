//! Bridge counters.
//!
//! Counters only: no payload or sensor data is kept here.

use crate::event::HeartRateEvent;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Live counters of one bridge.
#[derive(Debug)]
pub struct BridgeStats {
    /// TCP connections accepted since start
    tcp_connections_total: AtomicU64,
    /// TCP connections currently open
    tcp_connections_active: AtomicU64,
    /// UDP datagrams received
    udp_packets: AtomicU64,
    /// Data events carrying a heart rate
    data_events: AtomicU64,
    /// Data events without a heart rate (diagnostics)
    diagnostic_events: AtomicU64,
    /// Socket errors
    errors: AtomicU64,
    started_at: DateTime<Utc>,
}

impl BridgeStats {
    pub fn new() -> Self {
        Self {
            tcp_connections_total: AtomicU64::new(0),
            tcp_connections_active: AtomicU64::new(0),
            udp_packets: AtomicU64::new(0),
            data_events: AtomicU64::new(0),
            diagnostic_events: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            started_at: Utc::now(),
        }
    }

    pub fn record_connection_opened(&self) {
        self.tcp_connections_total.fetch_add(1, Ordering::Relaxed);
        self.tcp_connections_active.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_connection_closed(&self) {
        let _ = self
            .tcp_connections_active
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
    }

    pub fn record_udp_packet(&self) {
        self.udp_packets.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a published event by kind.
    pub fn record_event(&self, event: &HeartRateEvent) {
        match event {
            HeartRateEvent::Data(data) if data.bpm.is_some() => {
                self.data_events.fetch_add(1, Ordering::Relaxed);
            }
            HeartRateEvent::Data(_) => {
                self.diagnostic_events.fetch_add(1, Ordering::Relaxed);
            }
            HeartRateEvent::Error(_) => self.record_error(),
            HeartRateEvent::Open(_) | HeartRateEvent::Close(_) => {}
        }
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn snapshot(&self) -> BridgeStatsSnapshot {
        BridgeStatsSnapshot {
            tcp_connections_total: self.tcp_connections_total.load(Ordering::Relaxed),
            tcp_connections_active: self.tcp_connections_active.load(Ordering::Relaxed),
            udp_packets: self.udp_packets.load(Ordering::Relaxed),
            data_events: self.data_events.load(Ordering::Relaxed),
            diagnostic_events: self.diagnostic_events.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            started_at: self.started_at,
            uptime_secs: (Utc::now() - self.started_at).num_seconds().max(0) as u64,
        }
    }

    /// Human-readable summary for the terminal.
    pub fn summary(&self) -> String {
        let stats = self.snapshot();
        format!(
            "Bridge Statistics:\n\
             - TCP connections: {} ({} active)\n\
             - UDP packets: {}\n\
             - Heart-rate events: {}\n\
             - Diagnostic events: {}\n\
             - Errors: {}\n\
             - Uptime: {} seconds",
            stats.tcp_connections_total,
            stats.tcp_connections_active,
            stats.udp_packets,
            stats.data_events,
            stats.diagnostic_events,
            stats.errors,
            stats.uptime_secs
        )
    }
}

impl Default for BridgeStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time copy of [`BridgeStats`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BridgeStatsSnapshot {
    pub tcp_connections_total: u64,
    pub tcp_connections_active: u64,
    pub udp_packets: u64,
    pub data_events: u64,
    pub diagnostic_events: u64,
    pub errors: u64,
    pub started_at: DateTime<Utc>,
    pub uptime_secs: u64,
}

/// Thread-safe handle to bridge statistics.
pub type SharedBridgeStats = Arc<BridgeStats>;

pub fn create_shared_stats() -> SharedBridgeStats {
    Arc::new(BridgeStats::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{DataEvent, Format, HeartRate, Source};

    #[test]
    fn test_connection_counters() {
        let stats = BridgeStats::new();
        stats.record_connection_opened();
        stats.record_connection_opened();
        stats.record_connection_closed();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.tcp_connections_total, 2);
        assert_eq!(snapshot.tcp_connections_active, 1);
    }

    #[test]
    fn test_active_never_underflows() {
        let stats = BridgeStats::new();
        stats.record_connection_closed();
        assert_eq!(stats.snapshot().tcp_connections_active, 0);
    }

    #[test]
    fn test_events_counted_by_kind() {
        let stats = BridgeStats::new();
        let mut data = DataEvent::new(Source::ListenUdp, Format::Text, "HR=70", 5);
        data.bpm = HeartRate::new(70);
        stats.record_event(&data.into());
        stats.record_event(&DataEvent::new(Source::ListenUdp, Format::Binary, "?", 1).into());
        stats.record_event(&HeartRateEvent::error(None, "boom"));
        stats.record_event(&HeartRateEvent::close(None, "bye"));

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.data_events, 1);
        assert_eq!(snapshot.diagnostic_events, 1);
        assert_eq!(snapshot.errors, 1);
    }

    #[test]
    fn test_summary_mentions_counts() {
        let stats = BridgeStats::new();
        stats.record_udp_packet();
        assert!(stats.summary().contains("UDP packets: 1"));
    }
}
