//! Incremental framers for the three byte-stream conventions a hub may use.
//!
//! Each framer takes the currently accumulated bytes and returns the complete
//! frames found plus the bytes that must be kept for the next read. Callers
//! own the accumulation through [`FrameBuffer`].

use super::hub900::{FRAME_END, FRAME_START};

/// HDLC/PPP flag byte.
pub const HDLC_FLAG: u8 = 0x7E;
/// HDLC/PPP escape byte; the following byte is XORed with [`HDLC_XOR`].
pub const HDLC_ESCAPE: u8 = 0x7D;
pub const HDLC_XOR: u8 = 0x20;

/// ANT serial sync byte.
pub const ANT_SYNC: u8 = 0xA4;

/// Output of a framer: complete frames and the unconsumed remainder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Framed<T> {
    pub frames: Vec<T>,
    pub rest: Vec<u8>,
}

/// One message from an ANT serial stream (`A4 len id data.. xor`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AntSerialMessage {
    pub msg_id: u8,
    pub data: Vec<u8>,
    pub raw: Vec<u8>,
}

/// Per-connection byte accumulator with bounded tail retention.
#[derive(Debug, Clone, Default)]
pub struct FrameBuffer {
    data: Vec<u8>,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append freshly read bytes.
    pub fn extend(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn contains(&self, byte: u8) -> bool {
        self.data.contains(&byte)
    }

    /// Take the accumulated bytes out, leaving the buffer empty.
    pub fn take(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.data)
    }

    /// Replace the contents with at most the last `limit` bytes of `rest`.
    pub fn retain_tail(&mut self, mut rest: Vec<u8>, limit: usize) {
        if rest.len() > limit {
            rest.drain(..rest.len() - limit);
        }
        self.data = rest;
    }

    pub fn clear(&mut self) {
        self.data.clear();
    }
}

/// Split Hub900 frames (`0x7E ... 0x7F`, markers included).
///
/// Bytes before a start marker are dropped. An unterminated frame is kept as
/// the remainder starting at its `0x7E`. Without any start marker the whole
/// input is returned as remainder.
pub fn split_hub900(input: &[u8]) -> Framed<Vec<u8>> {
    let mut frames = Vec::new();

    let Some(first) = input.iter().position(|&b| b == FRAME_START) else {
        return Framed {
            frames,
            rest: input.to_vec(),
        };
    };

    let mut buf = &input[first..];
    loop {
        let Some(start) = buf.iter().position(|&b| b == FRAME_START) else {
            return Framed {
                frames,
                rest: Vec::new(),
            };
        };
        buf = &buf[start..];

        let Some(end) = buf[1..].iter().position(|&b| b == FRAME_END).map(|i| i + 1) else {
            return Framed {
                frames,
                rest: buf.to_vec(),
            };
        };

        frames.push(buf[..=end].to_vec());
        buf = &buf[end + 1..];
    }
}

/// Split HDLC/PPP style frames delimited by `0x7E` flags, unescaping
/// `0x7D x` to `x ^ 0x20`. Empty frames between adjacent flags are skipped.
/// The remainder starts at the last flag, or is the whole input when no flag
/// is present.
pub fn split_hdlc(input: &[u8]) -> Framed<Vec<u8>> {
    let flags: Vec<usize> = input
        .iter()
        .enumerate()
        .filter_map(|(i, &b)| (b == HDLC_FLAG).then_some(i))
        .collect();

    let Some(&last) = flags.last() else {
        return Framed {
            frames: Vec::new(),
            rest: input.to_vec(),
        };
    };

    let frames = flags
        .windows(2)
        .filter_map(|pair| {
            let body = &input[pair[0] + 1..pair[1]];
            let unescaped = hdlc_unescape(body);
            (!unescaped.is_empty()).then_some(unescaped)
        })
        .collect();

    Framed {
        frames,
        rest: input[last..].to_vec(),
    }
}

fn hdlc_unescape(body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(body.len());
    let mut iter = body.iter().copied();
    while let Some(b) = iter.next() {
        if b == HDLC_ESCAPE {
            match iter.next() {
                Some(next) => out.push(next ^ HDLC_XOR),
                None => break,
            }
        } else {
            out.push(b);
        }
    }
    out
}

/// Split ANT serial messages: `A4 <len> <msg id> <len bytes> <xor>`.
///
/// The checksum is the XOR of the length, message id and data bytes. A bad
/// checksum skips the sync byte and resynchronizes; input without any sync
/// byte is discarded.
pub fn split_ant_serial(input: &[u8]) -> Framed<AntSerialMessage> {
    let mut frames = Vec::new();
    let mut buf = input;

    while buf.len() >= 4 {
        let Some(sync) = buf.iter().position(|&b| b == ANT_SYNC) else {
            return Framed {
                frames,
                rest: Vec::new(),
            };
        };
        buf = &buf[sync..];
        if buf.len() < 4 {
            break;
        }

        let len = usize::from(buf[1]);
        let total = 4 + len;
        if buf.len() < total {
            break;
        }

        let checksum = buf[1..3 + len].iter().fold(0u8, |acc, &b| acc ^ b);
        if checksum != buf[3 + len] {
            buf = &buf[1..];
            continue;
        }

        frames.push(AntSerialMessage {
            msg_id: buf[2],
            data: buf[3..3 + len].to_vec(),
            raw: buf[..total].to_vec(),
        });
        buf = &buf[total..];
    }

    Framed {
        frames,
        rest: buf.to_vec(),
    }
}

/// Build an ANT serial message with a valid checksum.
pub fn encode_ant_serial(msg_id: u8, data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() + 4);
    out.push(ANT_SYNC);
    out.push(data.len() as u8);
    out.push(msg_id);
    out.extend_from_slice(data);
    let checksum = out[1..].iter().fold(0u8, |acc, &b| acc ^ b);
    out.push(checksum);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hub900_split_complete_and_partial() {
        let input = [0x00, 0x7E, 0x01, 0x02, 0x7F, 0x7E, 0x03];
        let framed = split_hub900(&input);
        assert_eq!(framed.frames, vec![vec![0x7E, 0x01, 0x02, 0x7F]]);
        assert_eq!(framed.rest, vec![0x7E, 0x03]);
    }

    #[test]
    fn test_hub900_split_without_start() {
        let framed = split_hub900(&[0x01, 0x7F, 0x02]);
        assert!(framed.frames.is_empty());
        assert_eq!(framed.rest, vec![0x01, 0x7F, 0x02]);
    }

    #[test]
    fn test_hub900_split_is_incremental() {
        let first = split_hub900(&[0x7E, 0x01]);
        assert!(first.frames.is_empty());

        let mut next = first.rest.clone();
        next.extend_from_slice(&[0x02, 0x7F]);
        let second = split_hub900(&next);
        assert_eq!(second.frames, vec![vec![0x7E, 0x01, 0x02, 0x7F]]);
        assert!(second.rest.is_empty());
    }

    #[test]
    fn test_hdlc_split_unescapes_and_skips_empty() {
        let input = [0x7E, 0x7E, 0x01, 0x7D, 0x5E, 0x02, 0x7E, 0x05];
        let framed = split_hdlc(&input);
        assert_eq!(framed.frames, vec![vec![0x01, 0x7E, 0x02]]);
        assert_eq!(framed.rest, vec![0x7E, 0x05]);
    }

    #[test]
    fn test_hdlc_split_without_flag() {
        let framed = split_hdlc(&[0x01, 0x02]);
        assert!(framed.frames.is_empty());
        assert_eq!(framed.rest, vec![0x01, 0x02]);
    }

    #[test]
    fn test_ant_serial_split() {
        let msg = encode_ant_serial(0x4E, &[0, 1, 2, 3, 4, 5, 6, 7, 72]);
        let mut input = vec![0x00, 0x11];
        input.extend_from_slice(&msg);
        input.extend_from_slice(&[ANT_SYNC, 0x09]);

        let framed = split_ant_serial(&input);
        assert_eq!(framed.frames.len(), 1);
        assert_eq!(framed.frames[0].msg_id, 0x4E);
        assert_eq!(framed.frames[0].data[8], 72);
        assert_eq!(framed.rest, vec![ANT_SYNC, 0x09]);
    }

    #[test]
    fn test_ant_serial_bad_checksum_resyncs() {
        let mut bad = encode_ant_serial(0x4E, &[1, 2, 3]);
        let last = bad.len() - 1;
        bad[last] ^= 0xFF;
        let good = encode_ant_serial(0x4F, &[9, 9, 9]);
        bad.extend_from_slice(&good);

        let framed = split_ant_serial(&bad);
        assert_eq!(framed.frames.len(), 1);
        assert_eq!(framed.frames[0].msg_id, 0x4F);
    }

    #[test]
    fn test_ant_serial_without_sync_is_discarded() {
        let framed = split_ant_serial(&[0x01, 0x02, 0x03, 0x04, 0x05]);
        assert!(framed.frames.is_empty());
        assert!(framed.rest.is_empty());
    }

    #[test]
    fn test_frame_buffer_retains_tail() {
        let mut buffer = FrameBuffer::new();
        buffer.extend(&[1, 2, 3]);
        assert_eq!(buffer.len(), 3);
        buffer.retain_tail(vec![1, 2, 3, 4, 5], 2);
        assert_eq!(buffer.as_slice(), &[4, 5]);
        buffer.clear();
        assert!(buffer.is_empty());
    }
}
