//! Integration tests for the outbound connector against local hub stand-ins.

use hrhub::decode::hub900::{encode_frame, encode_tlv, HubHeader, CMD_BLE};
use hrhub::service::{StreamMode, StreamProto};
use hrhub::{Config, EventStream, HeartRateEvent, HubService, Source, StreamParams};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;

const WAIT: Duration = Duration::from_secs(5);

async fn next(stream: &mut EventStream) -> HeartRateEvent {
    tokio::time::timeout(WAIT, stream.next())
        .await
        .expect("timed out waiting for event")
        .expect("stream ended")
}

fn ble_frame(hr: u8) -> Vec<u8> {
    let header = HubHeader {
        magic: 0x02,
        hub_id: 7,
        packet_serial: 3,
        version: 1,
        packet_len: 0,
        usb_version: [1, 2, 3],
        mac: [0x01, 0x02, 0x03, 0x04, 0x05, 0x06],
        cmd: CMD_BLE,
    };
    let mut packet = vec![0u8; 30];
    packet[0] = 29;
    packet[5] = 161;
    packet[6..10].copy_from_slice(&[0, 0, 0, 1]);
    packet[10] = hr;
    packet[11] = 80;
    packet[23] = 0xC4;
    packet[24..30].copy_from_slice(&[0xAA, 0xBB, 0xCC, 0x01, 0x02, 0x03]);
    encode_frame(&header, &encode_tlv(1, &packet))
}

fn connect_params(proto: StreamProto, port: u16, ws_path: Option<&str>) -> StreamParams {
    StreamParams {
        mode: StreamMode::Connect,
        proto,
        hub_host: Some("127.0.0.1".to_string()),
        hub_port: Some(i64::from(port)),
        ws_path: ws_path.map(str::to_string),
        ..StreamParams::default()
    }
}

#[tokio::test]
async fn test_tcp_hub_stream() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut frames = ble_frame(65);
        frames.extend(ble_frame(66));
        // Deliver in uneven pieces.
        for chunk in frames.chunks(7) {
            socket.write_all(chunk).await.unwrap();
        }
    });

    let service = HubService::new(Config::default());
    let mut stream = service
        .open_params(connect_params(StreamProto::Tcp, port, None))
        .await;

    assert_eq!(next(&mut stream).await.kind(), "open");
    let mut bpms = Vec::new();
    loop {
        let event = next(&mut stream).await;
        if event.kind() == "close" {
            break;
        }
        let data = event.as_data().expect("data event");
        assert_eq!(data.source, Source::ConnectTcp);
        assert_eq!(data.sensor_id.as_deref(), Some("0000001"));
        bpms.extend(data.bpm.map(|b| b.get()));
    }
    assert_eq!(bpms, vec![65, 66]);
    assert!(stream.next().await.is_none());
}

#[tokio::test]
async fn test_unreachable_hub_reports_error() {
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    };

    let service = HubService::new(Config::default());
    let mut stream = service
        .open_params(connect_params(StreamProto::Tcp, port, None))
        .await;
    assert_eq!(next(&mut stream).await.kind(), "error");
    assert_eq!(next(&mut stream).await.kind(), "close");
    assert!(stream.next().await.is_none());
}

#[tokio::test]
async fn test_close_tears_down_connection() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let (done_tx, done_rx) = tokio::sync::oneshot::channel();
    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut buf = [0u8; 16];
        // Returns 0 once the connector drops its end.
        let n = tokio::io::AsyncReadExt::read(&mut socket, &mut buf).await.unwrap_or(0);
        let _ = done_tx.send(n);
    });

    let service = HubService::new(Config::default());
    let mut stream = service
        .open_params(connect_params(StreamProto::Tcp, port, None))
        .await;
    assert_eq!(next(&mut stream).await.kind(), "open");
    stream.close().await;

    let n = tokio::time::timeout(WAIT, done_rx).await.unwrap().unwrap();
    assert_eq!(n, 0);
}

#[cfg(feature = "ws")]
mod ws {
    use super::*;
    use futures_util::{SinkExt, StreamExt};
    use tokio_tungstenite::tungstenite::Message;

    #[tokio::test]
    async fn test_ws_hub_stream() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(socket).await.unwrap();
            ws.send(Message::Binary(ble_frame(70))).await.unwrap();
            ws.send(Message::Text("HR=71".to_string())).await.unwrap();
            ws.close(None).await.unwrap();
            // Drain until the client acknowledges the close.
            while let Some(Ok(_)) = ws.next().await {}
        });

        let service = HubService::new(Config::default());
        let mut stream = service
            .open_params(connect_params(StreamProto::Ws, port, Some("hub")))
            .await;

        match next(&mut stream).await {
            HeartRateEvent::Open(notice) => {
                assert_eq!(notice.message, format!("connected to ws://127.0.0.1:{port}/hub"))
            }
            other => panic!("unexpected {other:?}"),
        }

        let binary = next(&mut stream).await;
        assert_eq!(binary.bpm().map(|b| b.get()), Some(70));
        assert_eq!(binary.as_data().map(|d| d.source), Some(Source::ConnectWs));

        let text = next(&mut stream).await;
        assert_eq!(text.bpm().map(|b| b.get()), Some(71));

        assert_eq!(next(&mut stream).await.kind(), "close");
        assert!(stream.next().await.is_none());
    }
}
