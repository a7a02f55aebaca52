//! Legacy CL831 receiver frames.
//!
//! Frames start with the signature `AA 00 00 AD F3`. Offsets:
//!
//! | Offset | Size | Field                      |
//! |--------|------|----------------------------|
//! | 5      | 1    | message type               |
//! | 6      | 1    | sequence number            |
//! | 13     | 6    | device id                  |
//! | 31     | 2    | communication flags        |
//! | 33     | 2    | auxiliary sensor id        |
//! | 35     | 1    | battery (data frames only) |
//! | 36     | 1    | heart rate (data frames)   |
//!
//! Battery and heart rate are only defined for 41-byte frames of message
//! type `0x1B`. The byte order of the auxiliary id is unknown, so it is only
//! exposed as hex.

use super::wire::{battery_percent, to_hex};
use crate::event::HeartRate;

pub const SIGNATURE: [u8; 5] = [0xAA, 0x00, 0x00, 0xAD, 0xF3];
pub const DATA_FRAME_LEN: usize = 41;
pub const DATA_MSG_TYPE: u8 = 0x1B;
/// Offset of the heart-rate byte in data frames.
pub const HEART_RATE_OFFSET: usize = 36;
const MIN_FRAME_LEN: usize = 20;
/// Heart-rate byte value meaning "no reading".
const NO_READING: u8 = 0x7F;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyFrame {
    pub msg_type: u8,
    pub seq: u8,
    pub device_id: Option<String>,
    pub comm_flags: Option<String>,
    pub aux_id: Option<String>,
    pub battery_percent: Option<u8>,
    pub heart_rate: Option<HeartRate>,
}

impl LegacyFrame {
    /// Decode a frame carrying the legacy signature.
    pub fn decode(frame: &[u8]) -> Option<Self> {
        if frame.len() < MIN_FRAME_LEN || !frame.starts_with(&SIGNATURE) {
            return None;
        }

        let is_data = frame.len() == DATA_FRAME_LEN && frame[5] == DATA_MSG_TYPE;
        let (battery, heart_rate) = if is_data {
            let value = frame[HEART_RATE_OFFSET];
            let hr = (value != NO_READING).then(|| HeartRate::new(value)).flatten();
            (Some(battery_percent(frame[35])), hr)
        } else {
            (None, None)
        };

        Some(Self {
            msg_type: frame[5],
            seq: frame[6],
            device_id: frame.get(13..19).map(to_hex),
            comm_flags: frame.get(31..33).map(to_hex),
            aux_id: frame.get(33..35).map(to_hex),
            battery_percent: battery,
            heart_rate,
        })
    }

    pub fn msg_type_hex(&self) -> String {
        format!("0x{:02x}", self.msg_type)
    }
}
