//! Sensor identity: the shared cache and the BLE identity resolver.

pub mod cache;
pub mod resolver;

pub use cache::{
    create_shared_cache, normalize_mac, CacheKey, SensorCache, SensorCacheEntry,
    SharedSensorCache,
};
pub use resolver::{device_id_to_id7, mac_to_id7, resolve_ble, IdentityResolution};
