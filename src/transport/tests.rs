use super::rumqtt::{options_v311, options_v5};
use super::{
    Connector, Endpoint, MessageHandler, ProtocolVersion, Qos, RumqttConnector, Scheme,
    SessionHandle,
};
use crate::client::SessionConfig;
use crate::config::Settings;
use crate::utils::HarnessError;
use std::io::ErrorKind;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{sleep, timeout};

fn tcp_session(port: u16) -> SessionConfig {
    let mut settings = Settings::default();
    settings.broker.scheme = "tcp".to_string();
    settings.broker.port = port;
    SessionConfig::from_settings(&settings, 0).unwrap()
}

#[test]
fn test_websocket_url() {
    let endpoint = Endpoint {
        scheme: Scheme::Ws,
        host: "broker.example".to_string(),
        port: 8083,
        path: "mqtt".to_string(),
    };
    assert_eq!(endpoint.url(), "ws://broker.example:8083/mqtt");

    let tcp = Endpoint {
        scheme: Scheme::Tcp,
        ..endpoint
    };
    assert_eq!(tcp.url(), "broker.example:8083");
}

#[test]
fn test_qos_levels() {
    assert_eq!(Qos::try_from(0).unwrap(), Qos::AtMostOnce);
    assert_eq!(Qos::try_from(2).unwrap(), Qos::ExactlyOnce);
    assert!(Qos::try_from(3).is_err());
    assert_eq!(u8::from(Qos::AtLeastOnce), 1);
}

#[test]
fn test_protocol_versions() {
    assert_eq!("3.1.1".parse::<ProtocolVersion>().unwrap(), ProtocolVersion::V311);
    assert_eq!("5".parse::<ProtocolVersion>().unwrap(), ProtocolVersion::V5);
    assert!("3".parse::<ProtocolVersion>().is_err());
    assert_eq!(ProtocolVersion::V311.to_string(), "3.1.1");
}

#[test]
fn test_v311_options_follow_session_config() {
    let config = SessionConfig::from_settings(&Settings::default(), 5).unwrap();
    let options = options_v311(&config);
    assert_eq!(options.client_id(), "mqtt-test-5");
    assert!(!options.clean_session());
    let (host, _) = options.broker_address();
    assert_eq!(host, "ws://127.0.0.1:8083/mqtt");

    let tcp = tcp_session(1883);
    let (host, port) = options_v311(&tcp).broker_address();
    assert_eq!(host, "127.0.0.1");
    assert_eq!(port, 1883);
}

#[test]
fn test_v5_options_carry_session_expiry() {
    let mut settings = Settings::default();
    settings.broker.protocol_version = "5".to_string();
    let config = SessionConfig::from_settings(&settings, 1).unwrap();
    let options = options_v5(&config);
    assert_eq!(options.client_id(), "mqtt-test-1");
    assert!(!options.clean_start());
    let properties = options.connect_properties().unwrap();
    assert_eq!(properties.session_expiry_interval, Some(3600));
}

#[test]
fn test_v5_options_never_disable_keep_alive() {
    let mut settings = Settings::default();
    settings.broker.protocol_version = "5".to_string();
    settings.session.keep_alive_secs = 0;
    let config = SessionConfig::from_settings(&settings, 0).unwrap();
    let options = options_v5(&config);
    assert_eq!(options.keep_alive(), Duration::from_secs(5));
}

#[tokio::test]
async fn test_connect_to_closed_port_fails() {
    // Port 1 is privileged and never runs a broker in test environments.
    let config = tcp_session(1);
    let handler = Arc::new(|_: &str, _: &[u8]| {});
    let result = tokio::time::timeout(
        Duration::from_secs(10),
        RumqttConnector::new().connect(&config, handler),
    )
    .await;

    match result {
        Ok(Err(HarnessError::Connect { index, .. })) => assert_eq!(index, 0),
        Ok(Err(other)) => panic!("unexpected error: {other}"),
        Ok(Ok(_)) => panic!("connected to a closed port"),
        Err(_) => panic!("connect did not fail in time"),
    }
}

/// Reads one MQTT packet as `(first header byte, body)`; `None` once the peer hangs up.
async fn read_packet(stream: &mut TcpStream) -> std::io::Result<Option<(u8, Vec<u8>)>> {
    let header = match stream.read_u8().await {
        Ok(byte) => byte,
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    };
    let mut len = 0usize;
    let mut shift = 0;
    loop {
        let byte = stream.read_u8().await?;
        len |= usize::from(byte & 0x7f) << shift;
        if byte & 0x80 == 0 {
            break;
        }
        shift += 7;
    }
    let mut body = vec![0; len];
    stream.read_exact(&mut body).await?;
    Ok(Some((header, body)))
}

fn publish_packet(topic: &str, payload: &[u8]) -> Vec<u8> {
    let mut packet = vec![0x30, (2 + topic.len() + payload.len()) as u8];
    packet.extend_from_slice(&(topic.len() as u16).to_be_bytes());
    packet.extend_from_slice(topic.as_bytes());
    packet.extend_from_slice(payload);
    packet
}

/// Single-connection MQTT 3.1.1 broker. Accepts the CONNECT, answers the
/// SUBSCRIBE with `suback_code` followed by `publishes` QoS 0 messages on
/// `/test`, and returns the packet types it saw up to the DISCONNECT.
async fn scripted_broker(listener: TcpListener, suback_code: u8, publishes: usize) -> Vec<u8> {
    let (mut stream, _) = listener.accept().await.unwrap();
    let mut seen = Vec::new();
    while let Some((header, body)) = read_packet(&mut stream).await.unwrap() {
        let kind = header >> 4;
        seen.push(kind);
        match kind {
            1 => stream.write_all(&[0x20, 0x02, 0x00, 0x00]).await.unwrap(),
            8 => {
                let mut out = vec![0x90, 0x03, body[0], body[1], suback_code];
                for i in 0..publishes {
                    out.extend(publish_packet("/test", format!("message {i}").as_bytes()));
                }
                stream.write_all(&out).await.unwrap();
            }
            12 => stream.write_all(&[0xd0, 0x00]).await.unwrap(),
            14 => break,
            _ => {}
        }
    }
    seen
}

fn counting_handler(received: &Arc<AtomicU64>) -> MessageHandler {
    let received = received.clone();
    Arc::new(move |topic: &str, _: &[u8]| {
        if topic == "/test" {
            received.fetch_add(1, Ordering::SeqCst);
        }
    })
}

#[tokio::test]
async fn test_session_delivers_publishes_until_disconnect() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let broker = tokio::spawn(scripted_broker(listener, 0x00, 3));

    let received = Arc::new(AtomicU64::new(0));
    let mut session = RumqttConnector::new()
        .connect(&tcp_session(port), counting_handler(&received))
        .await
        .unwrap();
    session.subscribe("/test", Qos::AtMostOnce).await.unwrap();

    timeout(Duration::from_secs(5), async {
        while received.load(Ordering::SeqCst) < 3 {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    session.disconnect().await.unwrap();
    // The driver task owned the only other reference to the counter.
    assert_eq!(Arc::strong_count(&received), 1);
    assert_eq!(received.load(Ordering::SeqCst), 3);

    let seen = timeout(Duration::from_secs(5), broker).await.unwrap().unwrap();
    assert_eq!(seen.first(), Some(&1));
    assert_eq!(seen.last(), Some(&14));
}

#[tokio::test]
async fn test_rejected_suback_fails_subscribe() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let broker = tokio::spawn(scripted_broker(listener, 0x80, 0));

    let received = Arc::new(AtomicU64::new(0));
    let mut session = RumqttConnector::new()
        .connect(&tcp_session(port), counting_handler(&received))
        .await
        .unwrap();

    match session.subscribe("/test", Qos::ExactlyOnce).await {
        Err(HarnessError::Subscribe { index, reason }) => {
            assert_eq!(index, 0);
            assert!(reason.contains("rejected"));
        }
        other => panic!("expected a subscribe failure, got {other:?}"),
    }

    session.disconnect().await.unwrap();
    let seen = timeout(Duration::from_secs(5), broker).await.unwrap().unwrap();
    assert_eq!(seen.last(), Some(&14));
}
