//! BLE identity resolution.
//!
//! The same sensor alternates between advertisements carrying its sticker
//! number (in the name or the device-id field) and advertisements without
//! it. Candidates are reduced to the 7-digit sticker range and the cache
//! keyed by MAC carries the last good identifier across packets.

use super::cache::SensorCache;
use crate::decode::{BleHeartRate, BleLayout};

/// Identifiers are reduced modulo this to fit seven digits.
pub const ID7_MODULUS: u32 = 10_000_000;
/// Values below this look like printed sticker numbers.
const STICKER_LIKE_LIMIT: u32 = 1_000_000;

/// Candidates considered and the identifier chosen.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IdentityResolution {
    pub chosen: Option<u32>,
    pub from_name: Option<u32>,
    pub from_device: Option<u32>,
    pub from_mac: Option<u32>,
    pub cached: Option<u32>,
}

impl IdentityResolution {
    /// The chosen id as a zero-padded 7-digit string.
    pub fn sensor_id(&self) -> Option<String> {
        self.chosen.map(|id| format!("{id:07}"))
    }
}

/// Low 24 bits of a MAC (12 hex digits, separators allowed) in the
/// 7-digit range.
pub fn mac_to_id7(mac: &str) -> Option<u32> {
    let cleaned: String = mac.chars().filter(|c| *c != ':' && *c != '-').collect();
    let cleaned = cleaned.trim();
    if cleaned.len() != 12 || !cleaned.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    let low24 = u32::from_str_radix(&cleaned[6..], 16).ok()?;
    Some(low24 % ID7_MODULUS)
}

/// Big-endian 4-byte device id in the 7-digit range. Values that already
/// fit are kept, others fall back to their low 24 bits.
pub fn device_id_to_id7(hex8: &str) -> Option<u32> {
    let cleaned = hex8.trim();
    if cleaned.len() != 8 || !cleaned.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    let value = u32::from_str_radix(cleaned, 16).ok()?;
    if value < ID7_MODULUS {
        Some(value)
    } else {
        Some((value & 0x00FF_FFFF) % ID7_MODULUS)
    }
}

/// Prefer whichever candidate looks like a printed sticker number.
fn pick_sticker_like(device: Option<u32>, mac: Option<u32>) -> Option<u32> {
    let sticker_like = |v: Option<u32>| v.is_some_and(|v| v < STICKER_LIKE_LIMIT);
    match (sticker_like(device), sticker_like(mac)) {
        (true, false) => device,
        (false, true) => mac,
        _ => device.or(mac),
    }
}

/// Resolve the identity of a decoded BLE packet, updating the cache.
///
/// Order: sticker number from the advertised name, then the cached id for
/// the MAC, then the more sticker-like of the device-id and MAC candidates.
/// Band-layout packets cache their device-id candidate; a name-derived id
/// always overwrites the cache.
pub fn resolve_ble(cache: &SensorCache, packet: &BleHeartRate) -> IdentityResolution {
    let mac = packet.mac.as_deref();
    let from_mac = match mac {
        Some(mac) => mac_to_id7(mac),
        None if packet.device_id_hex.len() == 12 => mac_to_id7(&packet.device_id_hex),
        None => None,
    };
    let from_device = if packet.device_id_hex.len() == 8 {
        device_id_to_id7(&packet.device_id_hex)
    } else {
        None
    };
    let from_name = packet.name_id;

    if let (Some(mac), Some(id), BleLayout::Band) = (mac, from_device, packet.layout) {
        cache.remember_ble_id7(mac, id);
    }
    let cached = mac.and_then(|mac| cache.ble_id7(mac));

    let chosen = from_name
        .or(cached)
        .or_else(|| pick_sticker_like(from_device, from_mac));

    if let (Some(mac), Some(id)) = (mac, from_name) {
        cache.remember_ble_id7(mac, id);
    }

    IdentityResolution {
        chosen,
        from_name,
        from_device,
        from_mac,
        cached,
    }
}
