//! ANT+ heart-rate packets.
//!
//! Hub900 relays each received ANT broadcast as a 15-byte packet:
//!
//! | Offset | Size | Field                                  |
//! |--------|------|----------------------------------------|
//! | 0      | 1    | device type (`0x78` = heart rate)      |
//! | 1      | 1    | transmission type (high nibble = id)   |
//! | 2      | 4    | device id (BE)                         |
//! | 6      | 1    | data page (`7` = battery page)         |
//! | 7      | 1    | battery (page 7 only)                  |
//! | 13     | 1    | computed heart rate                    |
//! | 14     | 1    | RSSI (signed)                          |

use super::wire::{be_u16, be_u32, to_hex};
use crate::event::HeartRate;

pub const DEVICE_TYPE_HEART_RATE: u8 = 0x78;
pub const PACKET_LEN: usize = 15;
const BATTERY_PAGE: u8 = 7;
const COMPOSITE_ID_MARKERS: [u16; 2] = [0x0000, 0xABCD];

/// ANT serial broadcast / acknowledged data message ids.
pub const MSG_BROADCAST_DATA: u8 = 0x4E;
pub const MSG_ACKNOWLEDGED_DATA: u8 = 0x4F;

/// A decoded ANT+ heart-rate packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AntHeartRate {
    pub device_type: u8,
    pub device_id: Option<u32>,
    pub heart_rate: HeartRate,
    pub battery_raw: Option<u8>,
    pub rssi: i8,
}

impl AntHeartRate {
    /// Decode a 15-byte packet. Returns `None` for short packets or an
    /// implausible heart rate.
    pub fn decode(packet: &[u8]) -> Option<Self> {
        if packet.len() < PACKET_LEN {
            return None;
        }
        let heart_rate = HeartRate::new(packet[13])?;

        Some(Self {
            device_type: packet[0],
            device_id: device_id(packet),
            heart_rate,
            battery_raw: (packet[6] == BATTERY_PAGE).then_some(packet[7]),
            rssi: packet[packet.len() - 1] as i8,
        })
    }

    pub fn device_id_hex(&self) -> Option<String> {
        self.device_id.map(|id| to_hex(&id.to_be_bytes()))
    }
}

/// Resolve the device id of a packet.
///
/// When the leading 16 bits are a composite marker the id is the 20-bit
/// combination of the transmission-type nibble and bytes 4..6; a zero
/// nibble means no id is available.
fn device_id(packet: &[u8]) -> Option<u32> {
    let lead = be_u16(packet, 0)?;
    if COMPOSITE_ID_MARKERS.contains(&lead) {
        let nibble = u32::from(packet[1] >> 4);
        if nibble == 0 {
            return None;
        }
        return Some((nibble << 16) | (u32::from(packet[4]) << 8) | u32::from(packet[5]));
    }
    be_u32(packet, 2)
}

/// Heart rate carried by an ANT serial data message (`0x4E` / `0x4F`),
/// found in the last byte of the 8-byte payload after the channel number.
pub fn serial_heart_rate(msg_id: u8, data: &[u8]) -> Option<HeartRate> {
    if msg_id != MSG_BROADCAST_DATA && msg_id != MSG_ACKNOWLEDGED_DATA {
        return None;
    }
    HeartRate::new(*data.get(8)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn packet(hr: u8) -> [u8; PACKET_LEN] {
        [
            0x78, 0x01, 0xAA, 0xBB, 0xCC, 0xDD, 7, 200, 0, 0, 0, 0, 0, hr, 0xF0,
        ]
    }

    #[test]
    fn test_decode_heart_rate_packet() {
        let decoded = AntHeartRate::decode(&packet(72)).unwrap();
        assert_eq!(decoded.device_type, DEVICE_TYPE_HEART_RATE);
        assert_eq!(decoded.device_id, Some(2_864_434_397));
        assert_eq!(decoded.device_id_hex().as_deref(), Some("aabbccdd"));
        assert_eq!(decoded.heart_rate.get(), 72);
        assert_eq!(decoded.battery_raw, Some(200));
        assert_eq!(decoded.rssi, -16);
    }

    #[test]
    fn test_battery_only_on_battery_page() {
        let mut raw = packet(72);
        raw[6] = 4;
        let decoded = AntHeartRate::decode(&raw).unwrap();
        assert_eq!(decoded.battery_raw, None);
    }

    #[test]
    fn test_out_of_range_heart_rate_rejected() {
        for hr in [0u8, 29, 241, 255] {
            assert!(AntHeartRate::decode(&packet(hr)).is_none());
        }
    }

    #[test]
    fn test_composite_device_id() {
        let mut raw = packet(80);
        raw[0] = 0x00;
        raw[1] = 0x00;
        assert_eq!(AntHeartRate::decode(&raw).unwrap().device_id, None);

        raw[1] = 0x30;
        raw[4] = 0x12;
        raw[5] = 0x34;
        assert_eq!(
            AntHeartRate::decode(&raw).unwrap().device_id,
            Some(0x0003_1234)
        );

        raw[0] = 0xAB;
        raw[1] = 0xCD;
        assert_eq!(
            AntHeartRate::decode(&raw).unwrap().device_id,
            Some(0x000C_1234)
        );
    }

    #[test]
    fn test_serial_heart_rate() {
        let data = [0, 0, 0, 0, 0, 0, 0, 0, 65];
        assert_eq!(serial_heart_rate(0x4E, &data).map(HeartRate::get), Some(65));
        assert_eq!(serial_heart_rate(0x4F, &data).map(HeartRate::get), Some(65));
        assert!(serial_heart_rate(0x40, &data).is_none());
        assert!(serial_heart_rate(0x4E, &data[..8]).is_none());
        assert!(serial_heart_rate(0x4E, &[0, 0, 0, 0, 0, 0, 0, 0, 250]).is_none());
    }
}
