use pushgate::config::ConnectorConfig;
use pushgate::{
    decode_packages, encode_package, Coder, ConnectorEvent, Message, MessageRoute, MessageType,
    NoSupervisor, PackageType, RouteDictionary, SchemaRegistry, SchemaTable, UdpConnector,
};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::mpsc::Receiver;
use tokio::time::timeout;
use tracing_subscriber::EnvFilter;

const WAIT: Duration = Duration::from_secs(5);

/// Routes library events to the test output; `RUST_LOG` selects what is shown.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

async fn started() -> (UdpConnector, Receiver<ConnectorEvent>, SocketAddr) {
    let coder = Coder::new(
        Arc::new(RouteDictionary::build(["chat.chatHandler.send"], &[])),
        Arc::new(SchemaRegistry::with_tables(
            SchemaTable::default(),
            SchemaTable::default(),
        )),
    );
    let config = ConnectorConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        ..ConnectorConfig::default()
    };
    let (connector, events) = UdpConnector::new(config, coder, Arc::new(NoSupervisor));
    let addr = connector.start().await.expect("connector starts");
    (connector, events, addr)
}

fn notify(body: &str) -> Vec<u8> {
    let message = Message {
        kind: MessageType::Notify,
        id: 0,
        route: MessageRoute::Code(1),
        body: body.as_bytes().to_vec(),
    }
    .encode()
    .expect("message encodes");
    encode_package(PackageType::Data, &message).expect("package encodes")
}

async fn next(events: &mut Receiver<ConnectorEvent>) -> ConnectorEvent {
    timeout(WAIT, events.recv())
        .await
        .expect("event before timeout")
        .expect("event queue open")
}

#[tokio::test]
async fn same_endpoint_reuses_id_and_new_endpoint_gets_greater_id() {
    init_tracing();
    let (connector, mut events, addr) = started().await;
    let first = UdpSocket::bind("127.0.0.1:0").await.expect("bind first");
    let second = UdpSocket::bind("127.0.0.1:0").await.expect("bind second");

    first.send_to(&notify(r#"{"n":1}"#), addr).await.expect("send");
    let ConnectorEvent::Connected { id: first_id, .. } = next(&mut events).await else {
        panic!("expected connected event");
    };
    assert!(matches!(
        next(&mut events).await,
        ConnectorEvent::Inbound { id, .. } if id == first_id
    ));

    first.send_to(&notify(r#"{"n":2}"#), addr).await.expect("send");
    match next(&mut events).await {
        ConnectorEvent::Inbound { id, message } => {
            assert_eq!(id, first_id);
            assert_eq!(message.body, json!({ "n": 2 }));
        }
        other => panic!("repeat datagram must not reconnect, got {other:?}"),
    }

    second.send_to(&notify(r#"{"n":3}"#), addr).await.expect("send");
    let ConnectorEvent::Connected { id: second_id, peer } = next(&mut events).await else {
        panic!("expected connected event");
    };
    assert!(second_id > first_id);
    assert_eq!(peer, second.local_addr().expect("second addr"));
    assert_eq!(connector.connection_count().await, 2);

    connector.stop().await;
}

#[tokio::test]
async fn broadcast_reaches_every_connection_once() {
    init_tracing();
    let (connector, mut events, addr) = started().await;
    let clients = [
        UdpSocket::bind("127.0.0.1:0").await.expect("bind"),
        UdpSocket::bind("127.0.0.1:0").await.expect("bind"),
    ];
    let heartbeat = encode_package(PackageType::Heartbeat, &[]).expect("encodes");
    for client in &clients {
        client.send_to(&heartbeat, addr).await.expect("send");
        assert!(matches!(
            next(&mut events).await,
            ConnectorEvent::Connected { .. }
        ));
    }

    connector
        .send(
            None,
            "onNotice",
            &json!({ "text": "hello all" }),
            None,
            Default::default(),
        )
        .await
        .expect("broadcast succeeds");

    for client in &clients {
        let mut buf = [0u8; 512];
        let (len, from) = timeout(WAIT, client.recv_from(&mut buf))
            .await
            .expect("delivery before timeout")
            .expect("datagram");
        assert_eq!(from, addr);
        let packages = decode_packages(&buf[..len]).expect("framed");
        assert_eq!(packages.len(), 1);
        let message = Message::decode(&packages[0].body).expect("message");
        assert_eq!(message.kind, MessageType::Push);
        assert_eq!(message.body, br#"{"text":"hello all"}"#.to_vec());
    }

    connector.stop().await;
}

#[tokio::test]
async fn stop_disconnects_and_ignores_later_datagrams() {
    init_tracing();
    let (connector, mut events, addr) = started().await;
    let client = UdpSocket::bind("127.0.0.1:0").await.expect("bind");
    client.send_to(&notify("{}"), addr).await.expect("send");
    let ConnectorEvent::Connected { id, .. } = next(&mut events).await else {
        panic!("expected connected event");
    };
    let _ = next(&mut events).await;

    connector.stop().await;
    assert!(matches!(
        next(&mut events).await,
        ConnectorEvent::Disconnected { id: closed, .. } if closed == id
    ));

    let _ = client.send_to(&notify("{}"), addr).await;
    assert!(timeout(Duration::from_millis(200), events.recv())
        .await
        .map_or(true, |event| event.is_none()));
    assert_eq!(connector.connection_count().await, 0);
}
