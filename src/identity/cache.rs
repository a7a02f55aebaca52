//! Process-wide sensor cache.
//!
//! Remembers the last battery reading of ANT sensors and the last resolved
//! 7-digit identifier of BLE sensors so packets lacking those fields can be
//! completed. Entries are overwritten, never merged, and live only as long
//! as the process.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

use crate::decode::wire::battery_percent;

/// Key of a cache entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheKey {
    /// ANT device id.
    Ant(u32),
    /// Normalized BLE MAC (`aa:bb:cc:dd:ee:ff`).
    BleMac(String),
}

impl CacheKey {
    /// Build a BLE key, normalizing the MAC. Invalid MACs yield `None`.
    pub fn ble_mac(mac: &str) -> Option<Self> {
        normalize_mac(mac).map(CacheKey::BleMac)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheKey::Ant(id) => write!(f, "ANT:{id}"),
            CacheKey::BleMac(mac) => write!(f, "BLEMAC:{mac}"),
        }
    }
}

/// Last known facts about one sensor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SensorCacheEntry {
    pub battery_raw: Option<u8>,
    pub battery_percent: Option<u8>,
    pub ble_id7: Option<u32>,
    pub updated_at: DateTime<Utc>,
}

/// Thread-safe map from [`CacheKey`] to [`SensorCacheEntry`].
#[derive(Debug, Default)]
pub struct SensorCache {
    entries: RwLock<HashMap<CacheKey, SensorCacheEntry>>,
}

impl SensorCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &CacheKey) -> Option<SensorCacheEntry> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.get(key).cloned()
    }

    /// Insert or overwrite an entry.
    pub fn put(&self, key: CacheKey, entry: SensorCacheEntry) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.insert(key, entry);
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Record a battery reading of an ANT sensor.
    pub fn remember_ant_battery(&self, device_id: u32, raw: u8) {
        self.put(
            CacheKey::Ant(device_id),
            SensorCacheEntry {
                battery_raw: Some(raw),
                battery_percent: Some(battery_percent(raw)),
                ble_id7: None,
                updated_at: Utc::now(),
            },
        );
    }

    /// Last battery reading `(raw, percent)` of an ANT sensor.
    pub fn ant_battery(&self, device_id: u32) -> Option<(u8, u8)> {
        let entry = self.get(&CacheKey::Ant(device_id))?;
        let raw = entry.battery_raw?;
        Some((raw, entry.battery_percent.unwrap_or_else(|| battery_percent(raw))))
    }

    /// Record the resolved identifier of a BLE sensor. Invalid MACs are ignored.
    pub fn remember_ble_id7(&self, mac: &str, id7: u32) {
        let Some(key) = CacheKey::ble_mac(mac) else {
            return;
        };
        self.put(
            key,
            SensorCacheEntry {
                battery_raw: None,
                battery_percent: None,
                ble_id7: Some(id7),
                updated_at: Utc::now(),
            },
        );
    }

    pub fn ble_id7(&self, mac: &str) -> Option<u32> {
        let key = CacheKey::ble_mac(mac)?;
        self.get(&key)?.ble_id7
    }
}

/// Thread-safe shared sensor cache.
pub type SharedSensorCache = Arc<SensorCache>;

/// Create a new shared sensor cache.
pub fn create_shared_cache() -> SharedSensorCache {
    Arc::new(SensorCache::new())
}

/// Normalize a MAC to lowercase colon form, accepting `-` separators.
pub fn normalize_mac(mac: &str) -> Option<String> {
    let cleaned = mac.trim().replace('-', ":").to_ascii_lowercase();
    let groups: Vec<&str> = cleaned.split(':').collect();
    let valid = groups.len() == 6
        && groups
            .iter()
            .all(|g| g.len() == 2 && g.bytes().all(|b| b.is_ascii_hexdigit()));
    valid.then_some(cleaned)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_format() {
        assert_eq!(CacheKey::Ant(42).to_string(), "ANT:42");
        assert_eq!(
            CacheKey::ble_mac("AA-BB-CC-01-02-03").unwrap().to_string(),
            "BLEMAC:aa:bb:cc:01:02:03"
        );
    }

    #[test]
    fn test_normalize_mac() {
        assert_eq!(
            normalize_mac(" AA:BB:CC:DD:EE:FF ").as_deref(),
            Some("aa:bb:cc:dd:ee:ff")
        );
        assert!(normalize_mac("aabbccddeeff").is_none());
        assert!(normalize_mac("aa:bb:cc:dd:ee").is_none());
        assert!(normalize_mac("zz:bb:cc:dd:ee:ff").is_none());
    }

    #[test]
    fn test_ant_battery_roundtrip() {
        let cache = SensorCache::new();
        assert!(cache.ant_battery(7).is_none());
        cache.remember_ant_battery(7, 200);
        assert_eq!(cache.ant_battery(7), Some((200, 78)));
        cache.remember_ant_battery(7, 55);
        assert_eq!(cache.ant_battery(7), Some((55, 55)));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_ble_id_overwrites() {
        let cache = SensorCache::new();
        cache.remember_ble_id7("AA:BB:CC:01:02:03", 1_234_567);
        assert_eq!(cache.ble_id7("aa-bb-cc-01-02-03"), Some(1_234_567));
        cache.remember_ble_id7("aa:bb:cc:01:02:03", 202_542);
        assert_eq!(cache.ble_id7("AA:BB:CC:01:02:03"), Some(202_542));

        cache.remember_ble_id7("not-a-mac", 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_shared_cache_across_threads() {
        let cache = create_shared_cache();
        let handles: Vec<_> = (0..4u32)
            .map(|i| {
                let cache = Arc::clone(&cache);
                std::thread::spawn(move || cache.remember_ant_battery(i, 90))
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(cache.len(), 4);
    }
}
