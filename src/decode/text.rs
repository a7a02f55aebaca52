//! Plain-text and JSON line readings, e.g. `HR=72` or `{"bpm": 72}`.

use crate::event::HeartRate;
use serde_json::Value;

/// JSON keys that may carry a heart rate, in priority order.
const JSON_KEYS: [&str; 6] = ["bpm", "heart_rate", "hr", "heartrate", "HeartRate", "HR"];

/// Interpret `bytes` as text if it consists only of printable ASCII and
/// `\t`, `\n`, `\r`.
pub fn as_text(bytes: &[u8]) -> Option<&str> {
    let printable = bytes
        .iter()
        .all(|&b| matches!(b, b'\t' | b'\n' | b'\r' | 0x20..=0x7E));
    if !printable {
        return None;
    }
    std::str::from_utf8(bytes).ok()
}

/// Split text into complete lines and the unterminated tail.
pub fn split_lines(text: &str) -> (Vec<&str>, &str) {
    match text.rfind('\n') {
        Some(pos) => {
            let lines = text[..pos]
                .split('\n')
                .map(|line| line.trim_end_matches('\r'))
                .collect();
            (lines, &text[pos + 1..])
        }
        None => (Vec::new(), text),
    }
}

/// Extract a heart rate from one line of text.
///
/// JSON objects are searched for the usual keys (numbers or numeric
/// strings). Otherwise the first stand-alone two or three digit number is
/// used; an implausible value yields `None` rather than a later match.
pub fn parse_bpm(line: &str) -> Option<HeartRate> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }

    if trimmed.starts_with('{') && trimmed.ends_with('}') {
        if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(trimmed) {
            let found = JSON_KEYS.iter().find_map(|key| {
                let value = match map.get(*key)? {
                    Value::Number(n) => n.as_f64(),
                    Value::String(s) => s.trim().parse::<f64>().ok(),
                    _ => None,
                }?;
                HeartRate::from_f64(value)
            });
            if found.is_some() {
                return found;
            }
        }
    }

    let number = standalone_number(trimmed)?;
    u8::try_from(number).ok().and_then(HeartRate::new)
}

/// First run of 2-3 digits bounded by non-word characters.
fn standalone_number(text: &str) -> Option<u32> {
    let bytes = text.as_bytes();
    let is_word = |b: u8| b.is_ascii_alphanumeric() || b == b'_';

    let mut i = 0;
    while i < bytes.len() {
        if !bytes[i].is_ascii_digit() {
            i += 1;
            continue;
        }
        let start = i;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
        let bounded_left = start == 0 || !is_word(bytes[start - 1]);
        let bounded_right = i == bytes.len() || !is_word(bytes[i]);
        if bounded_left && bounded_right && (2..=3).contains(&(i - start)) {
            return text[start..i].parse().ok();
        }
    }
    None
}
