//! One remote endpoint multiplexed over the connector's shared socket.

use crate::data_plane::connection_registry::ConnectionRegistry;
use crate::data_plane::{publish_event, ConnectionState, ConnectorEvent, Result, TransportError};
use crate::observability::events;
use crate::protocol::package::{encode_package, PackageType};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio::sync::mpsc::Sender;
use tracing::{debug, info};

const COMPONENT: &str = "connection";

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Process-wide, strictly increasing.
pub(crate) fn next_connection_id() -> u64 {
    NEXT_CONNECTION_ID.fetch_add(1, Ordering::SeqCst)
}

pub struct Connection {
    id: u64,
    endpoint_key: String,
    peer: SocketAddr,
    state: Mutex<ConnectionState>,
    last_seen: Mutex<Instant>,
    socket: Arc<UdpSocket>,
    registry: Weak<ConnectionRegistry>,
    events: Sender<ConnectorEvent>,
}

impl Connection {
    pub(crate) fn new(
        id: u64,
        endpoint_key: String,
        peer: SocketAddr,
        initial_state: ConnectionState,
        socket: Arc<UdpSocket>,
        registry: Weak<ConnectionRegistry>,
        events: Sender<ConnectorEvent>,
    ) -> Self {
        Self {
            id,
            endpoint_key,
            peer,
            state: Mutex::new(initial_state),
            last_seen: Mutex::new(Instant::now()),
            socket,
            registry,
            events,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn endpoint_key(&self) -> &str {
        &self.endpoint_key
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Records inbound traffic from the endpoint.
    pub(crate) fn touch(&self) {
        *self.last_seen.lock().unwrap_or_else(|e| e.into_inner()) = Instant::now();
    }

    /// Time since the endpoint last sent a datagram.
    pub fn idle_for(&self) -> Duration {
        self.last_seen
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .elapsed()
    }

    /// Moves `PendingHandshake` to `Working`; returns whether the state changed.
    pub(crate) fn mark_working(&self) -> bool {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if *state != ConnectionState::PendingHandshake {
            return false;
        }
        *state = ConnectionState::Working;
        debug!(
            event = events::CONNECTION_STATE_CHANGED,
            component = COMPONENT,
            connection_id = self.id,
            endpoint = self.endpoint_key.as_str(),
            state = ?ConnectionState::Working,
            "handshake acknowledged"
        );
        true
    }

    /// Sends an encoded message inside a data package.
    pub async fn send(&self, message: &[u8]) -> Result<()> {
        let datagram = encode_package(PackageType::Data, message)?;
        self.send_raw(&datagram).await
    }

    /// Sends an already framed datagram as-is.
    pub async fn send_raw(&self, datagram: &[u8]) -> Result<()> {
        if self.state() == ConnectionState::Closed {
            return Err(TransportError::Closed(self.id));
        }
        self.socket
            .send_to(datagram, self.peer)
            .await
            .map(|_| ())
            .map_err(|source| TransportError::Send {
                peer: self.peer,
                source,
            })
    }

    pub async fn handshake_response(&self, body: &[u8]) -> Result<()> {
        let datagram = encode_package(PackageType::Handshake, body)?;
        self.send_raw(&datagram).await
    }

    pub async fn heartbeat(&self) -> Result<()> {
        let datagram = encode_package(PackageType::Heartbeat, &[])?;
        self.send_raw(&datagram).await
    }

    /// Tells the client why it is being dropped, then disconnects.
    pub async fn kick(&self, reason: &str) -> Result<()> {
        let body = json!({ "reason": reason }).to_string();
        let datagram = encode_package(PackageType::Kick, body.as_bytes())?;
        let sent = self.send_raw(&datagram).await;
        self.disconnect().await;
        sent
    }

    /// Closes the connection and unregisters it. Later calls only re-check the registry.
    pub async fn disconnect(&self) {
        let was_open = {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            let was_open = *state != ConnectionState::Closed;
            *state = ConnectionState::Closed;
            was_open
        };

        // Also reached when an earlier disconnect was cancelled before unregistering.
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(self.id).await;
        }
        if !was_open {
            return;
        }

        info!(
            event = events::CONNECTION_CLOSED,
            component = COMPONENT,
            connection_id = self.id,
            endpoint = self.endpoint_key.as_str(),
            "connection closed"
        );

        publish_event(
            &self.events,
            ConnectorEvent::Disconnected {
                id: self.id,
                peer: self.peer,
            },
        );
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("endpoint_key", &self.endpoint_key)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::package::decode_packages;
    use tokio::sync::mpsc;

    async fn pair() -> (Arc<UdpSocket>, UdpSocket) {
        let server = UdpSocket::bind("127.0.0.1:0").await.expect("bind server");
        let client = UdpSocket::bind("127.0.0.1:0").await.expect("bind client");
        (Arc::new(server), client)
    }

    fn connection(
        socket: Arc<UdpSocket>,
        peer: SocketAddr,
        events: Sender<ConnectorEvent>,
    ) -> Arc<Connection> {
        Arc::new(Connection::new(
            next_connection_id(),
            crate::observability::fields::format_endpoint_key(&peer),
            peer,
            ConnectionState::PendingHandshake,
            socket,
            Weak::new(),
            events,
        ))
    }

    #[test]
    fn ids_strictly_increase() {
        let first = next_connection_id();
        let second = next_connection_id();
        assert!(second > first);
    }

    #[tokio::test]
    async fn send_wraps_message_in_data_package() {
        let (server, client) = pair().await;
        let peer = client.local_addr().expect("client addr");
        let (tx, _rx) = mpsc::channel(4);
        let connection = connection(server, peer, tx);

        connection.send(b"hello").await.expect("send succeeds");

        let mut buf = [0u8; 64];
        let (len, _) = client.recv_from(&mut buf).await.expect("datagram arrives");
        let packages = decode_packages(&buf[..len]).expect("framed");
        assert_eq!(packages[0].kind, PackageType::Data);
        assert_eq!(packages[0].body, b"hello".to_vec());
    }

    #[tokio::test]
    async fn handshake_ack_moves_pending_to_working_once() {
        let (server, client) = pair().await;
        let (tx, _rx) = mpsc::channel(4);
        let connection = connection(server, client.local_addr().expect("addr"), tx);

        assert!(connection.mark_working());
        assert!(!connection.mark_working());
        assert_eq!(connection.state(), ConnectionState::Working);
    }

    #[tokio::test]
    async fn kick_notifies_client_then_disconnects_once() {
        let (server, client) = pair().await;
        let peer = client.local_addr().expect("client addr");
        let (tx, mut rx) = mpsc::channel(4);
        let connection = connection(server, peer, tx);

        connection.kick("server shutting down").await.expect("kick sent");
        connection.disconnect().await;

        let mut buf = [0u8; 128];
        let (len, _) = client.recv_from(&mut buf).await.expect("kick arrives");
        let packages = decode_packages(&buf[..len]).expect("framed");
        assert_eq!(packages[0].kind, PackageType::Kick);
        assert_eq!(connection.state(), ConnectionState::Closed);

        assert_eq!(
            rx.recv().await,
            Some(ConnectorEvent::Disconnected {
                id: connection.id(),
                peer
            })
        );
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn closed_connection_refuses_sends() {
        let (server, client) = pair().await;
        let (tx, _rx) = mpsc::channel(4);
        let connection = connection(server, client.local_addr().expect("addr"), tx);

        connection.disconnect().await;
        assert!(matches!(
            connection.send(b"late").await,
            Err(TransportError::Closed(id)) if id == connection.id()
        ));
    }
}
