//! Per-connection decode pipeline.
//!
//! A [`StreamDecoder`] is created for every TCP connection (and one per UDP
//! socket or WebSocket) and owns that connection's [`FrameBuffer`] and
//! [`BpmGuesser`]. Bytes go in, [`HeartRateEvent`]s come out, in stream
//! order. Decoding never blocks and never fails: malformed input becomes a
//! diagnostic event or nothing.

use crate::config::BufferConfig;
use crate::decode::ant::{self, AntHeartRate, DEVICE_TYPE_HEART_RATE};
use crate::decode::framing::{
    split_ant_serial, split_hdlc, split_hub900, AntSerialMessage, ANT_SYNC, HDLC_FLAG,
};
use crate::decode::hub900::{self, HubFrame, HubFrameError, HubHeader, HubStatus};
use crate::decode::wire::{battery_percent, hex_preview, to_hex, PREVIEW_BYTES};
use crate::decode::legacy::HEART_RATE_OFFSET as LEGACY_HR_OFFSET;
use crate::decode::{text, BleHeartRate, BpmGuesser, FrameBuffer, LegacyFrame};
use crate::event::{
    AntDetail, BleDetail, DataEvent, Detail, Format, HeartRateEvent, HubInfo,
    HubStatusDetail, LegacyDetail, Source, Tech,
};
use crate::identity::{resolve_ble, SharedSensorCache};
use crate::PARSER_TAG;
use tracing::{debug, trace};

/// Stateful decoder for one connection.
#[derive(Debug)]
pub struct StreamDecoder {
    source: Source,
    buffer: FrameBuffer,
    guesser: BpmGuesser,
    cache: SharedSensorCache,
    limits: BufferConfig,
}

impl StreamDecoder {
    pub fn new(source: Source, cache: SharedSensorCache, limits: BufferConfig) -> Self {
        Self {
            source,
            buffer: FrameBuffer::new(),
            guesser: BpmGuesser::new(),
            cache,
            limits,
        }
    }

    pub fn source(&self) -> Source {
        self.source
    }

    /// Bytes currently held back waiting for more input.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Feed the next chunk of a byte stream. Frames spanning several chunks
    /// are decoded once complete; no frame is emitted twice.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<HeartRateEvent> {
        self.buffer.extend(chunk);
        let mut events = Vec::new();

        if self.buffer.contains(hub900::FRAME_START) && self.buffer.contains(hub900::FRAME_END) {
            let framed = split_hub900(self.buffer.as_slice());
            self.buffer
                .retain_tail(framed.rest, self.limits.hub900_retention);
            for frame in &framed.frames {
                self.hub900_events(frame, &mut events);
            }
            return events;
        }

        if self.buffer.contains(HDLC_FLAG) {
            let framed = split_hdlc(self.buffer.as_slice());
            self.buffer.retain_tail(framed.rest, self.limits.tail_retention);
            for frame in &framed.frames {
                self.hdlc_events(frame, &mut events);
            }
            return events;
        }

        let ant = split_ant_serial(self.buffer.as_slice());
        if !ant.frames.is_empty() {
            self.buffer.retain_tail(ant.rest, self.limits.tail_retention);
            events.extend(ant.frames.iter().map(|msg| self.ant_serial_event(msg)));
            return events;
        }

        let pending = self.buffer.take();
        if let Some(text) = text::as_text(&pending) {
            let (lines, tail) = text::split_lines(text);
            events.extend(lines.into_iter().filter_map(|line| self.text_event(line)));
            self.buffer
                .retain_tail(tail.as_bytes().to_vec(), self.limits.tail_retention);
            return events;
        }

        events.push(self.binary_event(&pending));
        // Reported bytes are dropped so they cannot mask later text.
        let pending_ant = incomplete_ant_message(&pending).to_vec();
        self.buffer.retain_tail(pending_ant, self.limits.tail_retention);
        events
    }

    /// Decode one self-contained message (UDP datagram, WebSocket message).
    /// Nothing is carried over to the next message.
    pub fn decode_datagram(&mut self, datagram: &[u8]) -> Vec<HeartRateEvent> {
        let mut events = Vec::new();

        if datagram.contains(&hub900::FRAME_START) && datagram.contains(&hub900::FRAME_END) {
            for frame in &split_hub900(datagram).frames {
                self.hub900_events(frame, &mut events);
            }
            return events;
        }

        if datagram.contains(&HDLC_FLAG) {
            for frame in &split_hdlc(datagram).frames {
                self.hdlc_events(frame, &mut events);
            }
            return events;
        }

        let ant = split_ant_serial(datagram);
        if !ant.frames.is_empty() {
            events.extend(ant.frames.iter().map(|msg| self.ant_serial_event(msg)));
            return events;
        }

        if let Some(text) = text::as_text(datagram) {
            events.extend(text.lines().filter_map(|line| self.text_event(line)));
            return events;
        }

        events.push(self.binary_event(datagram));
        events
    }

    fn hub900_events(&self, raw: &[u8], events: &mut Vec<HeartRateEvent>) {
        let frame = match hub900::decode_frame(raw) {
            Ok(frame) => frame,
            Err(err) => {
                debug!(source = %self.source, error = %err, "hub900 frame rejected");
                events.push(self.hub900_error_event(raw, err));
                return;
            }
        };

        match frame.header.cmd {
            hub900::CMD_ANT => {
                for packet in frame.ant_packets() {
                    if packet[0] != DEVICE_TYPE_HEART_RATE {
                        continue;
                    }
                    match AntHeartRate::decode(packet) {
                        Some(hr) => events.push(self.ant_event(&frame.header, packet, hr)),
                        None => trace!("ant packet without plausible heart rate"),
                    }
                }
            }
            hub900::CMD_BLE => {
                for packet in frame.ble_packets() {
                    match BleHeartRate::decode(packet) {
                        Some(hr) => events.push(self.ble_event(&frame.header, packet, hr)),
                        None => trace!("ble packet without plausible heart rate"),
                    }
                }
            }
            hub900::CMD_HEARTBEAT => events.push(self.hub_status_event(&frame)),
            cmd => events.push(self.hub_diagnostic_event(&frame, &format!("cmd={cmd}"))),
        }
    }

    fn hub900_error_event(&self, raw: &[u8], err: HubFrameError) -> HeartRateEvent {
        let (label, header, bytes) = match &err {
            HubFrameError::Unterminated => ("unterminated", None, raw.len()),
            HubFrameError::InvalidEscape => ("invalid-escape", None, raw.len()),
            HubFrameError::BadChecksum { header, body_len } => {
                ("bad-checksum", header.clone(), *body_len)
            }
            HubFrameError::TooShort { body_len } => ("cmd=-", None, *body_len),
        };
        let mut data = DataEvent::new(
            self.source,
            Format::Binary,
            format!(
                "[{PARSER_TAG} hub900 {label} {bytes}B] {}",
                hex_preview(raw, PREVIEW_BYTES)
            ),
            bytes,
        );
        data.tech = Some(Tech::Hub);
        data.hub = header.as_ref().map(hub_info);
        data.into()
    }

    fn hub_diagnostic_event(&self, frame: &HubFrame, label: &str) -> HeartRateEvent {
        let body = frame.body();
        let mut data = DataEvent::new(
            self.source,
            Format::Binary,
            format!(
                "[{PARSER_TAG} hub900 {label} {}B] {}",
                body.len(),
                hex_preview(body, PREVIEW_BYTES)
            ),
            body.len(),
        );
        data.tech = Some(Tech::Hub);
        data.hub = Some(hub_info(&frame.header));
        data.into()
    }

    fn hub_status_event(&self, frame: &HubFrame) -> HeartRateEvent {
        let Some(status) = HubStatus::parse(frame) else {
            return self.hub_diagnostic_event(frame, "heartbeat");
        };
        let mut event = self.hub_diagnostic_event(
            frame,
            &format!(
                "heartbeat bat={} interval={} src={}",
                status.battery, status.send_interval, status.data_source
            ),
        );
        if let HeartRateEvent::Data(data) = &mut event {
            data.detail = Some(Detail::HubStatus(HubStatusDetail {
                hub_battery: status.battery,
                hub_send_interval: status.send_interval,
                hub_data_source: status.data_source,
            }));
        }
        event
    }

    fn ant_event(&self, header: &HubHeader, packet: &[u8], hr: AntHeartRate) -> HeartRateEvent {
        if let (Some(id), Some(raw)) = (hr.device_id, hr.battery_raw) {
            self.cache.remember_ant_battery(id, raw);
        }
        let cached = hr.device_id.and_then(|id| self.cache.ant_battery(id));
        let battery_raw = hr.battery_raw.or(cached.map(|(raw, _)| raw));
        let battery_pct = hr
            .battery_raw
            .map(battery_percent)
            .or(cached.map(|(_, pct)| pct));

        let id_hex = hr.device_id_hex();
        let raw = format!(
            "[{PARSER_TAG} hub900 ant-hr] hub={} ant={} hr={} bat={} rssi={}",
            header.mac_string(),
            id_hex.as_deref().unwrap_or("-"),
            hr.heart_rate,
            display_opt(hr.battery_raw),
            hr.rssi
        );

        let mut data = DataEvent::new(self.source, Format::Ant, raw, packet.len());
        data.bpm = Some(hr.heart_rate);
        data.tech = Some(Tech::Ant);
        data.sensor_id = hr.device_id.map(|id| id.to_string());
        data.battery_raw = battery_raw;
        data.battery_percent = battery_pct;
        data.rssi = Some(hr.rssi);
        data.hub = Some(hub_info(header));
        data.detail = Some(Detail::Ant(AntDetail {
            ant_device_id: hr.device_id,
            ant_device_id_hex: id_hex,
            ant_device_type: hr.device_type,
        }));
        data.into()
    }

    fn ble_event(&self, header: &HubHeader, packet: &[u8], hr: BleHeartRate) -> HeartRateEvent {
        let identity = resolve_ble(&self.cache, &hr);
        let raw = format!(
            "[{PARSER_TAG} hub900 ble-hr] mac={} adv={} name={} dev={} id7_name={} id7_dev={} id7_mac={} id7_cache={} chosen={} hr={} bat={} | {}",
            hr.mac.as_deref().unwrap_or("-"),
            hr.adv_type,
            hr.name.as_deref().unwrap_or("-"),
            if hr.device_id_hex.is_empty() { "-" } else { hr.device_id_hex.as_str() },
            display_opt(identity.from_name),
            display_opt(identity.from_device),
            display_opt(identity.from_mac),
            display_opt(identity.cached),
            display_opt(identity.chosen),
            hr.heart_rate,
            display_opt(hr.battery),
            hex_preview(packet, PREVIEW_BYTES)
        );

        let mut data = DataEvent::new(self.source, Format::Ble, raw, packet.len());
        data.bpm = Some(hr.heart_rate);
        data.tech = Some(Tech::Ble);
        data.sensor_id = identity.sensor_id();
        data.battery_raw = hr.battery;
        data.battery_percent = hr.battery.map(battery_percent);
        data.rssi = hr.rssi;
        data.hub = Some(hub_info(header));
        data.detail = Some(Detail::Ble(BleDetail {
            ble_adv_type: hr.adv_type,
            ble_device_id_hex: hr.device_id_hex,
            ble_mac: hr.mac,
            ble_name: hr.name,
            ble_steps: hr.steps,
            ble_calories: hr.calories,
            ble_temperature_c: hr.temperature_c,
            ble_oxygen: hr.oxygen,
            ble_id_from_name: identity.from_name,
            ble_id_from_device: identity.from_device,
            ble_id_from_mac: identity.from_mac,
            ble_id_cached: identity.cached,
        }));
        data.into()
    }

    /// One HDLC frame: nested ANT serial messages win, otherwise the legacy
    /// signature or the guesser supply the reading.
    fn hdlc_events(&mut self, frame: &[u8], events: &mut Vec<HeartRateEvent>) {
        let legacy = LegacyFrame::decode(frame);
        let legacy_bpm = legacy.as_ref().and_then(|l| l.heart_rate);
        let guess = match legacy_bpm {
            Some(_) => None,
            None => Some(self.guesser.update(frame)),
        };

        let nested = split_ant_serial(frame);
        if !nested.frames.is_empty() {
            events.extend(nested.frames.iter().map(|msg| self.ant_serial_event(msg)));
            return;
        }

        let bpm = legacy_bpm.or(guess.and_then(|g| g.bpm));
        let offset = match legacy_bpm {
            Some(_) => Some(LEGACY_HR_OFFSET),
            None => guess.and_then(|g| g.offset),
        };
        let mut raw = format!(
            "[{PARSER_TAG} hdlc {}B] {} | bpm={} (off={})",
            frame.len(),
            hex_preview(frame, PREVIEW_BYTES),
            display_opt(bpm),
            display_opt(offset)
        );

        let mut detail = LegacyDetail::default();
        if let Some(guess) = guess {
            detail.guess_offset = guess.offset;
            detail.guess_note = Some(guess.note.as_str());
        }

        let mut battery = None;
        if let Some(legacy) = &legacy {
            raw.push_str(&format!(
                " | dev={} aux={} bat={} flags={} type={} seq={}",
                legacy.device_id.as_deref().unwrap_or("-"),
                legacy.aux_id.as_deref().unwrap_or("-"),
                display_opt(legacy.battery_percent),
                legacy.comm_flags.as_deref().unwrap_or("-"),
                legacy.msg_type_hex(),
                legacy.seq
            ));
            battery = legacy.battery_percent;
            detail.legacy_msg_type = Some(legacy.msg_type_hex());
            detail.legacy_seq = Some(legacy.seq);
            detail.legacy_device_id = legacy.device_id.clone();
            detail.legacy_aux_id = legacy.aux_id.clone();
            detail.legacy_comm_flags = legacy.comm_flags.clone();
        }

        let mut data = DataEvent::new(self.source, Format::Binary, raw, frame.len());
        data.bpm = bpm;
        data.battery_percent = battery;
        data.detail = Some(Detail::Legacy(detail));
        events.push(data.into());
    }

    fn ant_serial_event(&self, msg: &AntSerialMessage) -> HeartRateEvent {
        let raw = format!(
            "[{PARSER_TAG}] ANT msg=0x{:02x} data={}",
            msg.msg_id,
            to_hex(&msg.data)
        );
        let mut data = DataEvent::new(self.source, Format::Ant, raw, msg.raw.len());
        data.bpm = ant::serial_heart_rate(msg.msg_id, &msg.data);
        data.tech = Some(Tech::Ant);
        data.detail = Some(Detail::AntSerial {
            ant_msg_id: msg.msg_id,
        });
        data.into()
    }

    fn text_event(&self, line: &str) -> Option<HeartRateEvent> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        let mut data = DataEvent::new(self.source, Format::Text, line, line.len());
        data.bpm = text::parse_bpm(line);
        Some(data.into())
    }

    fn binary_event(&self, bytes: &[u8]) -> HeartRateEvent {
        DataEvent::new(
            self.source,
            Format::Binary,
            format!(
                "[{PARSER_TAG} binary {}B] {}",
                bytes.len(),
                hex_preview(bytes, PREVIEW_BYTES)
            ),
            bytes.len(),
        )
        .into()
    }
}

fn hub_info(header: &HubHeader) -> HubInfo {
    HubInfo {
        hub_id: header.hub_id,
        hub_mac: header.mac_string(),
        usb_version: header.usb_version_hex(),
        cmd: header.cmd,
    }
}

fn display_opt<T: std::fmt::Display>(value: Option<T>) -> String {
    value.map_or_else(|| "-".to_string(), |v| v.to_string())
}

/// The first ANT serial message in `bytes` that is still waiting for the
/// rest of its data, through the end of the input.
fn incomplete_ant_message(bytes: &[u8]) -> &[u8] {
    bytes
        .iter()
        .enumerate()
        .filter(|&(_, &b)| b == ANT_SYNC)
        .map(|(pos, _)| &bytes[pos..])
        .find(|tail| tail.len() < 2 || tail.len() < 4 + usize::from(tail[1]))
        .unwrap_or(&[])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::framing::encode_ant_serial;
    use crate::decode::hub900::{encode_frame, encode_tlv, CMD_ANT, CMD_BLE};
    use crate::identity::create_shared_cache;
    use crate::HeartRate;

    fn decoder() -> StreamDecoder {
        StreamDecoder::new(
            Source::ListenTcp,
            create_shared_cache(),
            BufferConfig::default(),
        )
    }

    fn header(cmd: u8) -> HubHeader {
        HubHeader {
            magic: 0x02,
            hub_id: 900,
            packet_serial: 1,
            version: 1,
            packet_len: 0,
            usb_version: [0x01, 0x00, 0x05],
            mac: [0x10, 0x20, 0x30, 0x40, 0x50, 0x60],
            cmd,
        }
    }

    fn ant_packet(page: u8, battery: u8, hr: u8) -> Vec<u8> {
        vec![
            0x78, 0x01, 0xAA, 0xBB, 0xCC, 0xDD, page, battery, 0, 0, 0, 0, 0, hr, 0xF0,
        ]
    }

    fn ant_frame(page: u8, battery: u8, hr: u8) -> Vec<u8> {
        encode_frame(&header(CMD_ANT), &encode_tlv(1, &ant_packet(page, battery, hr)))
    }

    fn data(event: &HeartRateEvent) -> &DataEvent {
        event.as_data().expect("data event")
    }

    #[test]
    fn test_ant_frame_decodes() {
        let events = decoder().feed(&ant_frame(7, 200, 72));
        assert_eq!(events.len(), 1);
        let event = data(&events[0]);
        assert_eq!(event.bpm.map(HeartRate::get), Some(72));
        assert_eq!(event.tech, Some(Tech::Ant));
        assert_eq!(event.sensor_id.as_deref(), Some("2864434397"));
        assert_eq!(event.battery_raw, Some(200));
        assert_eq!(event.battery_percent, Some(78));
        assert_eq!(event.rssi, Some(-16));
        assert_eq!(event.format, Format::Ant);
        assert_eq!(event.bytes, 15);
        assert_eq!(event.hub.as_ref().map(|h| h.hub_id), Some(900));
        assert!(event.raw.contains("ant-hr"));
    }

    #[test]
    fn test_ant_battery_filled_from_cache() {
        let mut decoder = decoder();
        decoder.feed(&ant_frame(7, 200, 72));
        let events = decoder.feed(&ant_frame(4, 0, 74));
        let event = data(&events[0]);
        assert_eq!(event.bpm.map(HeartRate::get), Some(74));
        assert_eq!(event.battery_raw, Some(200));
        assert_eq!(event.battery_percent, Some(78));
    }

    #[test]
    fn test_ant_non_heart_rate_devices_ignored() {
        let mut packet = ant_packet(7, 200, 72);
        packet[0] = 0x7A;
        let frame = encode_frame(&header(CMD_ANT), &encode_tlv(1, &packet));
        assert!(decoder().feed(&frame).is_empty());
    }

    #[test]
    fn test_ble_frame_decodes() {
        let mut packet = vec![0u8; 30];
        packet[0] = 29;
        packet[5] = 161;
        packet[6..10].copy_from_slice(&[0, 0, 0, 1]);
        packet[10] = 65;
        packet[11] = 80;
        packet[23] = 0xC4;
        packet[24..30].copy_from_slice(&[0xAA, 0xBB, 0xCC, 0x01, 0x02, 0x03]);
        let frame = encode_frame(&header(CMD_BLE), &encode_tlv(1, &packet));

        let events = decoder().feed(&frame);
        assert_eq!(events.len(), 1);
        let event = data(&events[0]);
        assert_eq!(event.tech, Some(Tech::Ble));
        assert_eq!(event.bpm.map(HeartRate::get), Some(65));
        assert_eq!(event.battery_percent, Some(80));
        assert_eq!(event.sensor_id.as_deref(), Some("0000001"));
        assert_eq!(event.format, Format::Ble);
    }

    #[test]
    fn test_bad_frame_does_not_poison_stream() {
        let mut bad = ant_frame(7, 200, 72);
        bad[30] ^= 0x01;
        let mut input = bad;
        input.extend(ant_frame(7, 200, 90));

        let events = decoder().feed(&input);
        assert_eq!(events.len(), 2);
        assert!(data(&events[0]).bpm.is_none());
        assert!(data(&events[0]).raw.contains("bad-checksum"));
        assert_eq!(data(&events[0]).hub.as_ref().map(|h| h.cmd), Some(CMD_ANT));
        assert_eq!(events[1].bpm().map(HeartRate::get), Some(90));
    }

    #[test]
    fn test_invalid_escape_reported() {
        let events = decoder().feed(&[0x7E, 0x01, 0x7D, 0x09, 0x02, 0x7F]);
        assert_eq!(events.len(), 1);
        assert!(data(&events[0]).bpm.is_none());
        assert!(data(&events[0]).raw.contains("invalid-escape"));
    }

    #[test]
    fn test_unknown_command_is_diagnostic() {
        let frame = encode_frame(&header(9), &encode_tlv(1, &[1, 2, 3]));
        let events = decoder().feed(&frame);
        assert_eq!(events.len(), 1);
        assert!(data(&events[0]).bpm.is_none());
        assert!(data(&events[0]).raw.contains("cmd=9"));
    }

    #[test]
    fn test_text_lines_across_chunks() {
        let mut decoder = decoder();
        let events = decoder.feed(b"HR=72\nbpm: 8");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].bpm().map(HeartRate::get), Some(72));
        assert_eq!(data(&events[0]).format, Format::Text);

        let events = decoder.feed(b"0\r\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].bpm().map(HeartRate::get), Some(80));
        assert_eq!(data(&events[0]).raw, "bpm: 80");
    }

    #[test]
    fn test_text_recovers_after_binary() {
        let mut decoder = decoder();
        let events = decoder.feed(&[0x01, 0x02, 0x03]);
        assert_eq!(events.len(), 1);
        assert!(data(&events[0]).raw.contains("binary 3B"));
        assert_eq!(decoder.buffered(), 0);

        for (line, bpm) in [(&b"HR=72\n"[..], 72), (&b"HR=80\n"[..], 80)] {
            let events = decoder.feed(line);
            assert_eq!(events.len(), 1);
            assert_eq!(data(&events[0]).format, Format::Text);
            assert_eq!(events[0].bpm().map(HeartRate::get), Some(bpm));
        }
    }

    #[test]
    fn test_binary_keeps_incomplete_ant_message() {
        let msg = encode_ant_serial(0x4E, &[0, 0, 0, 0, 0, 0, 0, 0, 66]);
        let mut input = vec![0x01, 0x02];
        input.extend_from_slice(&msg[..6]);

        let mut decoder = decoder();
        let events = decoder.feed(&input);
        assert!(events.iter().all(|e| e.bpm().is_none()));
        assert_eq!(decoder.buffered(), 6);

        let events = decoder.feed(&msg[6..]);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].bpm().map(HeartRate::get), Some(66));
    }

    #[test]
    fn test_ant_serial_stream() {
        let msg = encode_ant_serial(0x4E, &[0, 0, 0, 0, 0, 0, 0, 0, 65]);
        let mut decoder = decoder();
        let events = decoder.feed(&msg[..5]);
        assert!(events.iter().all(|e| e.bpm().is_none()));

        let events = decoder.feed(&msg[5..]);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].bpm().map(HeartRate::get), Some(65));
        assert_eq!(data(&events[0]).format, Format::Ant);
    }

    #[test]
    fn test_hdlc_legacy_frame() {
        let mut frame = vec![0u8; 41];
        frame[..5].copy_from_slice(&crate::decode::legacy::SIGNATURE);
        frame[5] = 0x1B;
        frame[35] = 200;
        frame[36] = 88;
        let mut input = vec![0x7E];
        input.extend_from_slice(&frame);
        input.push(0x7E);

        let events = decoder().feed(&input);
        assert_eq!(events.len(), 1);
        let event = data(&events[0]);
        assert_eq!(event.bpm.map(HeartRate::get), Some(88));
        assert_eq!(event.battery_percent, Some(78));
        match &event.detail {
            Some(Detail::Legacy(detail)) => {
                assert_eq!(detail.legacy_msg_type.as_deref(), Some("0x1b"));
                assert_eq!(detail.legacy_aux_id.as_deref(), Some("0000"));
            }
            other => panic!("unexpected detail {other:?}"),
        }
    }

    #[test]
    fn test_datagram_has_no_carry_over() {
        let mut decoder = StreamDecoder::new(
            Source::ListenUdp,
            create_shared_cache(),
            BufferConfig::default(),
        );
        let events = decoder.decode_datagram(b"HR=75");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].bpm().map(HeartRate::get), Some(75));
        assert_eq!(data(&events[0]).source, Source::ListenUdp);

        let frame = ant_frame(7, 200, 72);
        assert!(decoder.decode_datagram(&frame[..10]).iter().all(|e| e.bpm().is_none()));
        assert_eq!(decoder.buffered(), 0);
    }
}
