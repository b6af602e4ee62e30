//! Datagram connector: one shared socket, many endpoint-keyed connections.

use crate::config::ConnectorConfig;
use crate::data_plane::connection::{next_connection_id, Connection};
use crate::data_plane::connection_registry::ConnectionRegistry;
use crate::data_plane::supervisor::Supervisor;
use crate::data_plane::{
    publish_event, ConnectionState, ConnectorEvent, Result, SendFilter, SendOptions,
    TransportError,
};
use crate::observability::{events, fields};
use crate::protocol::coder::Coder;
use crate::protocol::package::{decode_packages, encode_package, PackageType};
use futures::future::join_all;
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

const COMPONENT: &str = "udp_connector";

struct ConnectorShared {
    label: String,
    handshake: bool,
    coder: Coder,
    supervisor: Arc<dyn Supervisor>,
    registry: Arc<ConnectionRegistry>,
    events: mpsc::Sender<ConnectorEvent>,
}

impl ConnectorShared {
    async fn receive_loop(self: Arc<Self>, socket: Arc<UdpSocket>, buffer_size: usize) {
        let mut buf = vec![0u8; buffer_size.max(1)];
        loop {
            match socket.recv_from(&mut buf).await {
                Ok((len, peer)) => self.dispatch(&socket, peer, &buf[..len]).await,
                Err(err) => {
                    // Existing connections stay up.
                    warn!(
                        event = events::CONNECTOR_SOCKET_ERROR,
                        component = COMPONENT,
                        connector = self.label.as_str(),
                        err = %err,
                        "socket receive failed"
                    );
                    tokio::task::yield_now().await;
                }
            }
        }
    }

    async fn dispatch(&self, socket: &Arc<UdpSocket>, peer: SocketAddr, bytes: &[u8]) {
        let endpoint_key = fields::format_endpoint_key(&peer);
        let initial_state = if self.handshake {
            ConnectionState::PendingHandshake
        } else {
            ConnectionState::Working
        };

        let (connection, created) = self
            .registry
            .get_or_insert_with(&endpoint_key, || {
                Arc::new(Connection::new(
                    next_connection_id(),
                    endpoint_key.clone(),
                    peer,
                    initial_state,
                    socket.clone(),
                    Arc::downgrade(&self.registry),
                    self.events.clone(),
                ))
            })
            .await;

        if created {
            info!(
                event = events::CONNECTION_CREATED,
                component = COMPONENT,
                connector = self.label.as_str(),
                connection_id = connection.id(),
                endpoint = endpoint_key.as_str(),
                state = ?initial_state,
                "new connection"
            );
            self.emit(ConnectorEvent::Connected {
                id: connection.id(),
                peer,
            });
        }

        connection.touch();
        self.handle_datagram(&connection, bytes).await;
    }

    async fn handle_datagram(&self, connection: &Arc<Connection>, bytes: &[u8]) {
        let packages = match decode_packages(bytes) {
            Ok(packages) => packages,
            Err(err) => {
                let err = err.to_string();
                self.drop_datagram(connection, "undecodable_package", Some(&err));
                return;
            }
        };

        for package in packages {
            if connection.state() == ConnectionState::Closed {
                self.drop_datagram(connection, "connection_closed", None);
                return;
            }

            match package.kind {
                PackageType::Handshake if self.handshake => {
                    self.supervisor.on_handshake(connection, &package.body).await;
                }
                PackageType::Handshake => {
                    self.drop_datagram(connection, "handshake_disabled", None);
                }
                PackageType::HandshakeAck => {
                    connection.mark_working();
                }
                PackageType::Heartbeat => {
                    self.supervisor.on_heartbeat(connection).await;
                }
                PackageType::Data if connection.state() != ConnectionState::Working => {
                    self.drop_datagram(connection, "not_working", None);
                }
                PackageType::Data => match self.coder.decode(&package.body) {
                    Ok(message) => {
                        self.emit(ConnectorEvent::Inbound {
                            id: connection.id(),
                            message,
                        });
                    }
                    Err(err) => {
                        let err = err.to_string();
                        self.drop_datagram(connection, "undecodable_message", Some(&err));
                    }
                },
                PackageType::Kick => {
                    connection.disconnect().await;
                }
            }
        }
    }

    fn drop_datagram(&self, connection: &Connection, reason: &str, err: Option<&str>) {
        debug!(
            event = events::DATAGRAM_DROPPED,
            component = COMPONENT,
            connector = self.label.as_str(),
            connection_id = connection.id(),
            endpoint = connection.endpoint_key(),
            reason,
            err = err.unwrap_or(""),
            "dropping inbound package"
        );
    }

    fn emit(&self, event: ConnectorEvent) {
        publish_event(&self.events, event);
    }

    /// Disconnects endpoints silent for at least `idle_timeout`.
    async fn sweep_loop(self: Arc<Self>, idle_timeout: Duration) {
        let mut ticks = tokio::time::interval((idle_timeout / 2).max(Duration::from_millis(50)));
        loop {
            ticks.tick().await;
            for connection in self.registry.all().await {
                if connection.idle_for() < idle_timeout {
                    continue;
                }
                info!(
                    event = events::CONNECTION_IDLE_EXPIRED,
                    component = COMPONENT,
                    connector = self.label.as_str(),
                    connection_id = connection.id(),
                    endpoint = connection.endpoint_key(),
                    idle_ms = connection.idle_for().as_millis() as u64,
                    "idle connection expired"
                );
                connection.disconnect().await;
            }
        }
    }
}

struct Running {
    local_addr: SocketAddr,
    receiver: JoinHandle<()>,
    sweeper: Option<JoinHandle<()>>,
}

/// Datagram transport connector.
///
/// Lifecycle and inbound traffic arrive on the receiver returned by [`UdpConnector::new`].
/// The receiver is never waited on: while it is full, inbound messages are dropped with a
/// warning and lifecycle events queue up behind it.
pub struct UdpConnector {
    config: ConnectorConfig,
    shared: Arc<ConnectorShared>,
    running: Mutex<Option<Running>>,
}

impl UdpConnector {
    pub fn new(
        config: ConnectorConfig,
        coder: Coder,
        supervisor: Arc<dyn Supervisor>,
    ) -> (Self, mpsc::Receiver<ConnectorEvent>) {
        let (events, receiver) = mpsc::channel(config.event_queue_size.max(1));
        let shared = Arc::new(ConnectorShared {
            label: format!("udp-{}", Uuid::new_v4()),
            handshake: config.handshake,
            coder,
            supervisor,
            registry: Arc::new(ConnectionRegistry::new()),
            events,
        });
        let connector = Self {
            config,
            shared,
            running: Mutex::new(None),
        };
        (connector, receiver)
    }

    pub fn label(&self) -> &str {
        &self.shared.label
    }

    /// Binds the shared socket and starts demultiplexing; returns the bound address.
    pub async fn start(&self) -> Result<SocketAddr> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return Err(TransportError::AlreadyStarted);
        }

        let addr = self.config.bind_addr()?;
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|source| TransportError::Bind { addr, source })?;
        let local_addr = socket
            .local_addr()
            .map_err(|source| TransportError::Bind { addr, source })?;
        let socket = Arc::new(socket);

        let receiver = tokio::spawn(
            self.shared
                .clone()
                .receive_loop(socket, self.config.inbound_buffer_size),
        );
        let sweeper = self
            .config
            .idle_timeout()
            .map(|idle_timeout| tokio::spawn(self.shared.clone().sweep_loop(idle_timeout)));
        *running = Some(Running {
            local_addr,
            receiver,
            sweeper,
        });

        info!(
            event = events::CONNECTOR_STARTED,
            component = COMPONENT,
            connector = self.shared.label.as_str(),
            local_addr = %local_addr,
            handshake = self.config.handshake,
            "connector listening"
        );
        Ok(local_addr)
    }

    /// Closes the socket and every connection. Safe to call more than once.
    pub async fn stop(&self) {
        let Some(running) = self.running.lock().await.take() else {
            return;
        };
        running.receiver.abort();
        let _ = running.receiver.await;
        if let Some(sweeper) = running.sweeper {
            sweeper.abort();
            let _ = sweeper.await;
        }

        for connection in self.shared.registry.all().await {
            connection.disconnect().await;
        }

        info!(
            event = events::CONNECTOR_STOPPED,
            component = COMPONENT,
            connector = self.shared.label.as_str(),
            local_addr = %running.local_addr,
            "connector stopped"
        );
    }

    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.running
            .lock()
            .await
            .as_ref()
            .map(|running| running.local_addr)
    }

    pub async fn connection_count(&self) -> usize {
        self.shared.registry.len().await
    }

    pub async fn connection(&self, id: u64) -> Option<Arc<Connection>> {
        self.shared.registry.get(id).await
    }

    /// Encodes `message` once and delivers it to `targets`, or to every connection when `None`.
    ///
    /// Every target is attempted; the first failure is returned. Unknown ids are skipped.
    pub async fn send(
        &self,
        filter: Option<&SendFilter>,
        route: &str,
        message: &Value,
        targets: Option<&[u64]>,
        options: SendOptions,
    ) -> Result<()> {
        if self.running.lock().await.is_none() {
            return Err(TransportError::NotStarted);
        }

        let payload = self.shared.coder.encode(options.request_id, route, message)?;
        let datagram = encode_package(PackageType::Data, &payload)?;

        let mut connections = Vec::new();
        match targets {
            Some(ids) => {
                for id in ids {
                    match self.shared.registry.get(*id).await {
                        Some(connection) => connections.push(connection),
                        None => debug!(
                            event = events::SEND_TARGET_UNKNOWN,
                            component = COMPONENT,
                            connector = self.shared.label.as_str(),
                            connection_id = *id,
                            route,
                            "skipping unknown send target"
                        ),
                    }
                }
            }
            None => connections = self.shared.registry.all().await,
        }
        if let Some(filter) = filter {
            connections.retain(|connection| filter(connection.id()));
        }

        let results = join_all(
            connections
                .iter()
                .map(|connection| connection.send_raw(&datagram)),
        )
        .await;

        let mut first_error = None;
        for (connection, result) in connections.iter().zip(results) {
            if let Err(err) = result {
                warn!(
                    event = events::SEND_FAILED,
                    component = COMPONENT,
                    connector = self.shared.label.as_str(),
                    connection_id = connection.id(),
                    route,
                    err = %err,
                    "send to connection failed"
                );
                first_error.get_or_insert(err);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}
