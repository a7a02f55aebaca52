//! Hub900 frame structure.
//!
//! On the wire a frame is `0x7E <escaped body> 0x7F`. The unescaped body is
//! laid out as:
//!
//! | Offset | Size | Field                          |
//! |--------|------|--------------------------------|
//! | 0      | 1    | magic                          |
//! | 1      | 4    | hub id (BE)                    |
//! | 5      | 2    | packet serial (BE)             |
//! | 7      | 1    | protocol version               |
//! | 8      | 2    | packet length (BE)             |
//! | 10     | 3    | USB firmware version           |
//! | 13     | 6    | hub MAC, byte reversed         |
//! | 19     | 1    | command                        |
//! | 20     | n    | TLV application payload        |
//! | n+20   | 2    | checksum (BE)                  |
//!
//! TLV records are `[key][len BE u16][value]`. Records with key `1` carry
//! sensor packets: 15-byte ANT packets for command 1, length-prefixed BLE
//! advertisements for command 2.

use super::wire::{be_u16, be_u32, format_mac, to_hex};
use std::fmt;

pub const FRAME_START: u8 = 0x7E;
pub const FRAME_END: u8 = 0x7F;
pub const ESCAPE: u8 = 0x7D;

pub const HEADER_LEN: usize = 20;
pub const CHECKSUM_LEN: usize = 2;
const CHECKSUM_XOR: u32 = 0x3A3A;

/// TLV key of records carrying sensor packets.
pub const SENSOR_RECORD_KEY: u8 = 1;
/// Size of one ANT packet inside a command 1 record.
pub const ANT_PACKET_LEN: usize = 15;

pub const CMD_ANT: u8 = 1;
pub const CMD_BLE: u8 = 2;
pub const CMD_HEARTBEAT: u8 = 4;

/// Why a Hub900 frame could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HubFrameError {
    /// Not wrapped in `0x7E ... 0x7F`.
    Unterminated,
    /// `0x7D` followed by something other than `01`, `02` or `03`.
    InvalidEscape,
    /// Trailing checksum mismatch. The header is kept when long enough.
    BadChecksum {
        header: Option<HubHeader>,
        body_len: usize,
    },
    /// Checksum fine but too short to hold a header.
    TooShort { body_len: usize },
}

impl fmt::Display for HubFrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HubFrameError::Unterminated => write!(f, "frame not delimited by 7e..7f"),
            HubFrameError::InvalidEscape => write!(f, "invalid escape sequence"),
            HubFrameError::BadChecksum { body_len, .. } => {
                write!(f, "checksum mismatch ({body_len} bytes)")
            }
            HubFrameError::TooShort { body_len } => {
                write!(f, "frame too short for header ({body_len} bytes)")
            }
        }
    }
}

impl std::error::Error for HubFrameError {}

/// True when every `0x7D` in `content` starts a known escape pair.
pub fn escape_is_valid(content: &[u8]) -> bool {
    let mut i = 0;
    while i + 1 < content.len() {
        if content[i] == ESCAPE {
            if !matches!(content[i + 1], 0x01..=0x03) {
                return false;
            }
            i += 2;
        } else {
            i += 1;
        }
    }
    true
}

/// Reverse the Hub900 escaping. Unknown pairs pass through untouched.
pub fn unescape(content: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(content.len());
    let mut i = 0;
    while i < content.len() {
        if content[i] == ESCAPE && i + 1 < content.len() {
            let mapped = match content[i + 1] {
                0x01 => Some(ESCAPE),
                0x02 => Some(FRAME_START),
                0x03 => Some(FRAME_END),
                _ => None,
            };
            if let Some(b) = mapped {
                out.push(b);
                i += 2;
                continue;
            }
        }
        out.push(content[i]);
        i += 1;
    }
    out
}

/// Apply Hub900 escaping so the content never contains a marker byte.
pub fn escape(raw: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(raw.len() + raw.len() / 8);
    for &b in raw {
        match b {
            ESCAPE => out.extend_from_slice(&[ESCAPE, 0x01]),
            FRAME_START => out.extend_from_slice(&[ESCAPE, 0x02]),
            FRAME_END => out.extend_from_slice(&[ESCAPE, 0x03]),
            _ => out.push(b),
        }
    }
    out
}

/// Checksum over `bytes`: negated byte sum XOR `0x3A3A`, low 16 bits.
pub fn checksum(bytes: &[u8]) -> u16 {
    let sum = bytes.iter().fold(0u32, |acc, &b| acc.wrapping_add(u32::from(b)));
    (sum.wrapping_neg() ^ CHECKSUM_XOR) as u16
}

/// Verify the trailing big-endian checksum of an unescaped body.
pub fn checksum_valid(body: &[u8]) -> bool {
    if body.len() < 3 {
        return false;
    }
    let split = body.len() - CHECKSUM_LEN;
    be_u16(body, split) == Some(checksum(&body[..split]))
}

/// Fixed header at the start of every Hub900 body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HubHeader {
    pub magic: u8,
    pub hub_id: u32,
    pub packet_serial: u16,
    pub version: u8,
    pub packet_len: u16,
    pub usb_version: [u8; 3],
    /// MAC in display order (already reversed from the wire).
    pub mac: [u8; 6],
    pub cmd: u8,
}

impl HubHeader {
    pub fn parse(body: &[u8]) -> Option<Self> {
        if body.len() < HEADER_LEN {
            return None;
        }
        let mut mac = [0u8; 6];
        mac.copy_from_slice(&body[13..19]);
        mac.reverse();

        Some(Self {
            magic: body[0],
            hub_id: be_u32(body, 1)?,
            packet_serial: be_u16(body, 5)?,
            version: body[7],
            packet_len: be_u16(body, 8)?,
            usb_version: [body[10], body[11], body[12]],
            mac,
            cmd: body[19],
        })
    }

    /// Serialize back to the 20 wire bytes.
    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        out[0] = self.magic;
        out[1..5].copy_from_slice(&self.hub_id.to_be_bytes());
        out[5..7].copy_from_slice(&self.packet_serial.to_be_bytes());
        out[7] = self.version;
        out[8..10].copy_from_slice(&self.packet_len.to_be_bytes());
        out[10..13].copy_from_slice(&self.usb_version);
        let mut mac = self.mac;
        mac.reverse();
        out[13..19].copy_from_slice(&mac);
        out[19] = self.cmd;
        out
    }

    pub fn mac_string(&self) -> String {
        format_mac(&self.mac)
    }

    pub fn usb_version_hex(&self) -> String {
        to_hex(&self.usb_version)
    }
}

/// A validated, unescaped Hub900 frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HubFrame {
    pub header: HubHeader,
    body: Vec<u8>,
}

impl HubFrame {
    /// The TLV application payload between header and checksum.
    pub fn app_payload(&self) -> &[u8] {
        &self.body[HEADER_LEN..self.body.len() - CHECKSUM_LEN]
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Values of the records carrying sensor packets.
    pub fn sensor_records(&self) -> Vec<&[u8]> {
        tlv_records(self.app_payload())
            .into_iter()
            .filter(|record| record.key == SENSOR_RECORD_KEY)
            .map(|record| record.value)
            .collect()
    }

    /// 15-byte ANT packets of a command 1 frame.
    pub fn ant_packets(&self) -> Vec<&[u8]> {
        self.sensor_records()
            .into_iter()
            .flat_map(|value| value.chunks_exact(ANT_PACKET_LEN))
            .collect()
    }

    /// BLE packets of a command 2 frame, each including its length byte.
    pub fn ble_packets(&self) -> Vec<&[u8]> {
        let mut packets = Vec::new();
        for value in self.sensor_records() {
            let mut pos = 0;
            while pos < value.len() {
                let len = usize::from(value[pos]) + 1;
                if pos + len > value.len() {
                    break;
                }
                packets.push(&value[pos..pos + len]);
                pos += len;
            }
        }
        packets
    }
}

/// Decode one delimited frame (`0x7E ... 0x7F`).
pub fn decode_frame(raw: &[u8]) -> Result<HubFrame, HubFrameError> {
    if raw.len() < 2 || raw[0] != FRAME_START || raw[raw.len() - 1] != FRAME_END {
        return Err(HubFrameError::Unterminated);
    }
    let content = &raw[1..raw.len() - 1];
    if !escape_is_valid(content) {
        return Err(HubFrameError::InvalidEscape);
    }

    let body = unescape(content);
    if !checksum_valid(&body) {
        return Err(HubFrameError::BadChecksum {
            header: HubHeader::parse(&body),
            body_len: body.len(),
        });
    }
    if body.len() < HEADER_LEN + CHECKSUM_LEN {
        return Err(HubFrameError::TooShort {
            body_len: body.len(),
        });
    }

    let header = HubHeader::parse(&body).ok_or(HubFrameError::TooShort {
        body_len: body.len(),
    })?;
    Ok(HubFrame { header, body })
}

/// Build a complete wire frame from header and TLV payload.
pub fn encode_frame(header: &HubHeader, app_payload: &[u8]) -> Vec<u8> {
    let mut body = Vec::with_capacity(HEADER_LEN + app_payload.len() + CHECKSUM_LEN);
    body.extend_from_slice(&header.encode());
    body.extend_from_slice(app_payload);
    let sum = checksum(&body);
    body.extend_from_slice(&sum.to_be_bytes());

    let mut out = Vec::with_capacity(body.len() + 8);
    out.push(FRAME_START);
    out.extend(escape(&body));
    out.push(FRAME_END);
    out
}

/// One TLV record of the application payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TlvRecord<'a> {
    pub key: u8,
    pub value: &'a [u8],
}

/// Parse TLV records, stopping at the first record that overruns the payload.
pub fn tlv_records(payload: &[u8]) -> Vec<TlvRecord<'_>> {
    let mut records = Vec::new();
    let mut pos = 0;
    while pos + 3 <= payload.len() {
        let key = payload[pos];
        let len = usize::from(u16::from_be_bytes([payload[pos + 1], payload[pos + 2]]));
        let start = pos + 3;
        let end = start + len;
        if end > payload.len() {
            break;
        }
        records.push(TlvRecord {
            key,
            value: &payload[start..end],
        });
        pos = end;
    }
    records
}

pub fn encode_tlv(key: u8, value: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(value.len() + 3);
    out.push(key);
    out.extend_from_slice(&(value.len() as u16).to_be_bytes());
    out.extend_from_slice(value);
    out
}

/// Status block of a hub heartbeat (command 4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HubStatus {
    pub battery: u8,
    pub send_interval: u8,
    pub data_source: u8,
}

impl HubStatus {
    pub fn parse(frame: &HubFrame) -> Option<Self> {
        let value = frame.sensor_records().into_iter().next()?;
        if value.len() < 3 {
            return None;
        }
        Some(Self {
            battery: value[0],
            send_interval: value[1],
            data_source: value[2],
        })
    }
}
