//! BLE advertisement heart-rate packets.
//!
//! A packet relayed by the hub starts with its own length byte and carries
//! the advertisement data, followed by the RSSI byte and the broadcaster
//! MAC. Two vendor layouts are recognized:
//!
//! * advertisement type 161/162 at byte 5: device id (6..10), heart rate
//!   (10), battery (11), optional steps (12..15, BE24), calories (15..18,
//!   BE24 / 10), and for type 162 temperature (18..20, BE16 / 10) and
//!   oxygen (20);
//! * fallback layout with bytes 6..8 = `13, 24`: battery (13), heart rate
//!   (15). The device has no id field, so its identity comes from the MAC.

use super::wire::{be_u16, be_u24, format_mac, to_hex};
use crate::event::HeartRate;

pub const ADV_TYPE_BAND: u8 = 161;
pub const ADV_TYPE_BAND_EXT: u8 = 162;

const MIN_PACKET_LEN: usize = 12;
const MIN_BLE_LEN: u8 = 11;
const FALLBACK_MARKER: [u8; 2] = [13, 24];

const AD_SHORT_NAME: u8 = 0x08;
const AD_COMPLETE_NAME: u8 = 0x09;

/// Name prefix preceding the printed sticker number.
pub const STICKER_PREFIX: &str = "CL831-";

/// Which vendor layout a packet used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BleLayout {
    /// Advertisement type 161 or 162, carries a device id.
    Band,
    /// Marker layout without a device id.
    Fallback,
}

/// A decoded BLE heart-rate advertisement.
#[derive(Debug, Clone, PartialEq)]
pub struct BleHeartRate {
    pub adv_type: u8,
    pub layout: BleLayout,
    /// Hex device id: 8 chars for the band layout, the MAC without
    /// separators for the fallback layout (empty when no MAC was found).
    pub device_id_hex: String,
    pub heart_rate: HeartRate,
    pub battery: Option<u8>,
    pub steps: Option<u32>,
    pub calories: Option<f64>,
    pub temperature_c: Option<f64>,
    pub oxygen: Option<u8>,
    pub mac: Option<String>,
    pub rssi: Option<i8>,
    pub name: Option<String>,
    /// Sticker number embedded in the advertised name.
    pub name_id: Option<u32>,
}

impl BleHeartRate {
    /// Decode one packet. Returns `None` for unknown layouts, truncated
    /// packets or an implausible heart rate.
    pub fn decode(packet: &[u8]) -> Option<Self> {
        if packet.len() < MIN_PACKET_LEN || packet[0] < MIN_BLE_LEN {
            return None;
        }
        let adv_type = packet[5];
        let trailer = Trailer::parse(packet);
        let name = advertised_name(packet);
        let name_id = name.as_deref().and_then(sticker_id);

        let mut decoded = if adv_type == ADV_TYPE_BAND || adv_type == ADV_TYPE_BAND_EXT {
            let extended = adv_type == ADV_TYPE_BAND_EXT;
            Self {
                adv_type,
                layout: BleLayout::Band,
                device_id_hex: to_hex(&packet[6..10]),
                heart_rate: HeartRate::new(packet[10])?,
                battery: Some(packet[11]),
                steps: be_u24(packet, 12),
                calories: be_u24(packet, 15).map(|v| f64::from(v) / 10.0),
                temperature_c: if extended {
                    be_u16(packet, 18).map(|v| f64::from(v) / 10.0)
                } else {
                    None
                },
                oxygen: if extended && packet.len() > 21 {
                    Some(packet[20])
                } else {
                    None
                },
                mac: None,
                rssi: None,
                name: None,
                name_id: None,
            }
        } else if packet.len() >= 16 && packet[6..8] == FALLBACK_MARKER {
            Self {
                adv_type,
                layout: BleLayout::Fallback,
                device_id_hex: String::new(),
                heart_rate: HeartRate::new(packet[15])?,
                battery: Some(packet[13]),
                steps: None,
                calories: None,
                temperature_c: None,
                oxygen: None,
                mac: None,
                rssi: None,
                name: None,
                name_id: None,
            }
        } else {
            return None;
        };

        if let Some(trailer) = trailer {
            if decoded.layout == BleLayout::Fallback {
                decoded.device_id_hex = trailer.mac.replace(':', "").to_lowercase();
            }
            decoded.mac = Some(trailer.mac);
            decoded.rssi = Some(trailer.rssi);
        }
        decoded.name = name;
        decoded.name_id = name_id;
        Some(decoded)
    }
}

/// RSSI and MAC following the advertisement data.
struct Trailer {
    rssi: i8,
    mac: String,
}

impl Trailer {
    fn parse(packet: &[u8]) -> Option<Self> {
        let adv_len = usize::from(packet[0]).checked_sub(7)?;
        let rssi = *packet.get(adv_len + 1)? as i8;
        let mac_start = adv_len + 2;
        let mac = packet.get(mac_start..mac_start + 6)?;
        Some(Self {
            rssi,
            mac: format_mac(mac),
        })
    }
}

/// Walk the AD structures and return the advertised name, preferring the
/// complete name over the shortened one.
fn advertised_name(packet: &[u8]) -> Option<String> {
    let adv_len = usize::from(packet[0]).saturating_sub(7);
    let adv_end = adv_len.min(packet.len() - 1);
    let mut best = None;

    let mut i = 1;
    while i <= adv_end {
        let len = usize::from(packet[i]);
        if len == 0 {
            break;
        }
        let start = i + 1;
        let end = start + len;
        if end > packet.len() {
            break;
        }

        match packet[start] {
            AD_COMPLETE_NAME => {
                best = Some(decode_name(&packet[start + 1..end]));
                break;
            }
            AD_SHORT_NAME if best.is_none() => {
                best = Some(decode_name(&packet[start + 1..end]));
            }
            _ => {}
        }
        i = end;
    }

    best.filter(|name| !name.is_empty())
}

fn decode_name(bytes: &[u8]) -> String {
    bytes
        .iter()
        .filter(|&&b| b != 0)
        .map(|&b| char::from(b & 0x7F))
        .collect::<String>()
        .trim()
        .to_string()
}

/// Extract the sticker number from a name such as `CL831-0202542`.
///
/// A seven digit number is preferred; otherwise the first six digit one.
pub fn sticker_id(name: &str) -> Option<u32> {
    let upper = name.to_ascii_uppercase();
    let mut six = None;

    for (pos, _) in upper.match_indices(STICKER_PREFIX) {
        let digits: String = upper[pos + STICKER_PREFIX.len()..]
            .chars()
            .take_while(char::is_ascii_digit)
            .take(7)
            .collect();
        match digits.len() {
            7 => return digits.parse().ok(),
            6 if six.is_none() => six = digits.parse().ok(),
            _ => {}
        }
    }
    six
}
