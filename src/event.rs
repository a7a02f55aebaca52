//! Normalized event types emitted by the decode pipeline.
//!
//! Every decoder produces [`HeartRateEvent`] values. The event is a tagged
//! union over its kind so that control events (`open`, `error`, `close`)
//! can never carry sensor fields, and a heart rate can only be present on a
//! `data` event.

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use std::fmt;

/// A heart rate in beats per minute, guaranteed to be within [30, 240].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HeartRate(u8);

impl HeartRate {
    /// Lowest plausible heart rate.
    pub const MIN: u8 = 30;
    /// Highest plausible heart rate.
    pub const MAX: u8 = 240;

    /// Accept a raw byte as a heart rate if it falls inside the plausible range.
    pub fn new(value: u8) -> Option<Self> {
        (Self::MIN..=Self::MAX).contains(&value).then_some(Self(value))
    }

    /// Accept a (possibly fractional) reading inside the plausible range,
    /// rounded to the nearest beat.
    pub fn from_f64(value: f64) -> Option<Self> {
        if !(f64::from(Self::MIN)..=f64::from(Self::MAX)).contains(&value) {
            return None;
        }
        Some(Self(value.round() as u8))
    }

    pub fn get(self) -> u8 {
        self.0
    }
}

impl fmt::Display for HeartRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Serialize for HeartRate {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.0)
    }
}

/// Sensor technology that produced a reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Tech {
    Ant,
    Ble,
    Hub,
}

/// Transport the bytes arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Source {
    #[serde(rename = "listen:tcp")]
    ListenTcp,
    #[serde(rename = "listen:udp")]
    ListenUdp,
    #[serde(rename = "connect:tcp")]
    ConnectTcp,
    #[serde(rename = "connect:ws")]
    ConnectWs,
}

impl Source {
    pub fn as_str(self) -> &'static str {
        match self {
            Source::ListenTcp => "listen:tcp",
            Source::ListenUdp => "listen:udp",
            Source::ConnectTcp => "connect:tcp",
            Source::ConnectWs => "connect:ws",
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the payload of a data event was interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    Text,
    Binary,
    Ant,
    Ble,
}

/// Fields describing the hub a sensor packet was relayed by.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HubInfo {
    pub hub_id: u32,
    pub hub_mac: String,
    pub usb_version: String,
    pub cmd: u8,
}

/// ANT+ specific fields.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AntDetail {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ant_device_id: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ant_device_id_hex: Option<String>,
    pub ant_device_type: u8,
}

/// BLE specific fields, including every identity candidate considered.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BleDetail {
    pub ble_adv_type: u8,
    pub ble_device_id_hex: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ble_mac: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ble_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ble_steps: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ble_calories: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ble_temperature_c: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ble_oxygen: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ble_id_from_name: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ble_id_from_device: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ble_id_from_mac: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ble_id_cached: Option<u32>,
}

/// Fields of a legacy CL831 frame, plus the guesser outcome when the
/// signature path could not supply a heart rate.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LegacyDetail {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub legacy_msg_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub legacy_seq: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub legacy_device_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub legacy_aux_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub legacy_comm_flags: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub guess_offset: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub guess_note: Option<&'static str>,
}

/// Status block reported by a hub heartbeat frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HubStatusDetail {
    pub hub_battery: u8,
    pub hub_send_interval: u8,
    pub hub_data_source: u8,
}

/// Technology specific fields flattened into a data event.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Detail {
    Ant(AntDetail),
    Ble(BleDetail),
    Legacy(LegacyDetail),
    AntSerial { ant_msg_id: u8 },
    HubStatus(HubStatusDetail),
}

/// A decoded (or undecodable) unit of sensor data.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DataEvent {
    pub ts: DateTime<Utc>,
    /// Always serialized; `null` when no heart rate could be decoded.
    pub bpm: Option<HeartRate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tech: Option<Tech>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sensor_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub battery_percent: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub battery_raw: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rssi: Option<i8>,
    #[serde(flatten)]
    pub hub: Option<HubInfo>,
    #[serde(flatten)]
    pub detail: Option<Detail>,
    /// Human readable diagnostic: hex preview or decode summary.
    pub raw: String,
    pub source: Source,
    pub format: Format,
    pub bytes: usize,
}

impl DataEvent {
    pub fn new(source: Source, format: Format, raw: impl Into<String>, bytes: usize) -> Self {
        Self {
            ts: Utc::now(),
            bpm: None,
            tech: None,
            sensor_id: None,
            battery_percent: None,
            battery_raw: None,
            rssi: None,
            hub: None,
            detail: None,
            raw: raw.into(),
            source,
            format,
            bytes,
        }
    }
}

/// Payload of the control events.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notice {
    pub ts: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<Source>,
    pub message: String,
}

impl Notice {
    fn new(source: Option<Source>, message: impl Into<String>) -> Self {
        Self {
            ts: Utc::now(),
            source,
            message: message.into(),
        }
    }
}

/// The normalized output unit of the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum HeartRateEvent {
    Open(Notice),
    Data(DataEvent),
    Error(Notice),
    Close(Notice),
}

impl HeartRateEvent {
    pub fn open(source: Option<Source>, message: impl Into<String>) -> Self {
        HeartRateEvent::Open(Notice::new(source, message))
    }

    pub fn error(source: Option<Source>, message: impl Into<String>) -> Self {
        HeartRateEvent::Error(Notice::new(source, message))
    }

    pub fn close(source: Option<Source>, message: impl Into<String>) -> Self {
        HeartRateEvent::Close(Notice::new(source, message))
    }

    /// The event kind as it appears in the `type` field.
    pub fn kind(&self) -> &'static str {
        match self {
            HeartRateEvent::Open(_) => "open",
            HeartRateEvent::Data(_) => "data",
            HeartRateEvent::Error(_) => "error",
            HeartRateEvent::Close(_) => "close",
        }
    }

    pub fn as_data(&self) -> Option<&DataEvent> {
        match self {
            HeartRateEvent::Data(data) => Some(data),
            _ => None,
        }
    }

    pub fn bpm(&self) -> Option<HeartRate> {
        self.as_data().and_then(|data| data.bpm)
    }
}

impl From<DataEvent> for HeartRateEvent {
    fn from(data: DataEvent) -> Self {
        HeartRateEvent::Data(data)
    }
}
