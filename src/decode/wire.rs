//! Byte-level helpers shared by the decoders.

use std::fmt::Write;

/// Number of bytes rendered by diagnostic previews.
pub const PREVIEW_BYTES: usize = 64;

pub fn be_u16(buf: &[u8], pos: usize) -> Option<u16> {
    let bytes = buf.get(pos..pos + 2)?;
    Some(u16::from_be_bytes([bytes[0], bytes[1]]))
}

pub fn be_u24(buf: &[u8], pos: usize) -> Option<u32> {
    let bytes = buf.get(pos..pos + 3)?;
    Some(u32::from_be_bytes([0, bytes[0], bytes[1], bytes[2]]))
}

pub fn be_u32(buf: &[u8], pos: usize) -> Option<u32> {
    let bytes = buf.get(pos..pos + 4)?;
    Some(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

/// Format six bytes as `AA:BB:CC:DD:EE:FF`.
pub fn format_mac(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 3);
    for (i, b) in bytes.iter().enumerate() {
        if i > 0 {
            out.push(':');
        }
        let _ = write!(out, "{b:02X}");
    }
    out
}

/// Render up to `max` bytes as space separated lowercase hex, noting how
/// many bytes were left out.
pub fn hex_preview(bytes: &[u8], max: usize) -> String {
    let shown = &bytes[..bytes.len().min(max)];
    let mut out = String::with_capacity(shown.len() * 3 + 16);
    for (i, b) in shown.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        let _ = write!(out, "{b:02x}");
    }
    if bytes.len() > max {
        let _ = write!(out, " … (+{}B)", bytes.len() - max);
    }
    out
}

/// Map a raw battery byte to a percentage.
///
/// Sensors report either a percentage directly or a 0..=255 scale.
pub fn battery_percent(raw: u8) -> u8 {
    if raw <= 100 {
        raw
    } else {
        (f64::from(raw) / 255.0 * 100.0).round() as u8
    }
}

/// Contiguous lowercase hex, e.g. for device ids.
pub fn to_hex(bytes: &[u8]) -> String {
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_big_endian_reads() {
        let buf = [0x01, 0x02, 0x03, 0x04];
        assert_eq!(be_u16(&buf, 0), Some(0x0102));
        assert_eq!(be_u24(&buf, 1), Some(0x020304));
        assert_eq!(be_u32(&buf, 0), Some(0x01020304));
        assert_eq!(be_u32(&buf, 1), None);
    }

    #[test]
    fn test_hex_preview_truncates() {
        assert_eq!(hex_preview(&[0x7e, 0x01, 0xff], 64), "7e 01 ff");
        let long = vec![0u8; 70];
        let preview = hex_preview(&long, 64);
        assert!(preview.ends_with("… (+6B)"));
        assert!(preview.starts_with("00 00"));
    }

    #[test]
    fn test_battery_percent() {
        assert_eq!(battery_percent(80), 80);
        assert_eq!(battery_percent(100), 100);
        assert_eq!(battery_percent(200), 78);
        assert_eq!(battery_percent(255), 100);
    }

    #[test]
    fn test_format_mac() {
        assert_eq!(
            format_mac(&[0xaa, 0xbb, 0x0c, 0x01, 0x02, 0x03]),
            "AA:BB:0C:01:02:03"
        );
    }
}
