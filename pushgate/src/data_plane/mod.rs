/********************************************************************************
 * Copyright (c) 2026 Contributors to the Eclipse Foundation
 *
 * See the NOTICE file(s) distributed with this work for additional
 * information regarding copyright ownership.
 *
 * This program and the accompanying materials are made available under the
 * terms of the Apache License Version 2.0 which is available at
 * https://www.apache.org/licenses/LICENSE-2.0
 *
 * SPDX-License-Identifier: Apache-2.0
 ********************************************************************************/

//! Data-plane layer.
//!
//! Owns the shared datagram socket, demultiplexes inbound traffic by remote
//! `address:port` into [`Connection`]s, drives each connection through
//! `PendingHandshake -> Working -> Closed`, and publishes lifecycle events on a
//! bounded queue.
//!
//! ```
//! use std::sync::Arc;
//! use pushgate::config::ConnectorConfig;
//! use pushgate::{Coder, NoSupervisor, RouteDictionary, SchemaRegistry, SchemaTable, UdpConnector};
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let coder = Coder::new(
//!     Arc::new(RouteDictionary::build(Vec::<String>::new(), &[])),
//!     Arc::new(SchemaRegistry::with_tables(SchemaTable::default(), SchemaTable::default())),
//! );
//! let config = ConnectorConfig {
//!     host: "127.0.0.1".to_string(),
//!     port: 0,
//!     ..ConnectorConfig::default()
//! };
//! let (connector, _events) = UdpConnector::new(config, coder, Arc::new(NoSupervisor));
//!
//! let addr = connector.start().await.unwrap();
//! assert_ne!(addr.port(), 0);
//! connector.stop().await;
//! connector.stop().await;
//! # });
//! ```

pub(crate) mod connection;
pub(crate) mod connection_registry;
pub(crate) mod connector;
pub(crate) mod supervisor;

use crate::observability::events;
use crate::protocol::coder::InboundMessage;
use crate::protocol::ProtocolError;
use std::net::SocketAddr;
use thiserror::Error;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::mpsc::Sender;
use tracing::{debug, warn};

const COMPONENT: &str = "connector_events";

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("invalid bind address: {0}")]
    InvalidBindAddress(#[from] std::net::AddrParseError),
    #[error("unable to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    #[error("unable to send to {peer}: {source}")]
    Send {
        peer: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    #[error("connector is not started")]
    NotStarted,
    #[error("connector is already started")]
    AlreadyStarted,
    #[error("connection {0} is closed")]
    Closed(u64),
    #[error(transparent)]
    Coder(#[from] ProtocolError),
}

pub type Result<T> = std::result::Result<T, TransportError>;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum ConnectionState {
    PendingHandshake,
    Working,
    Closed,
}

/// Lifecycle and traffic notifications published by a connector.
#[derive(Clone, Debug, PartialEq)]
pub enum ConnectorEvent {
    Connected { id: u64, peer: SocketAddr },
    Disconnected { id: u64, peer: SocketAddr },
    Inbound { id: u64, message: InboundMessage },
}

/// Queues `event` without waiting on the consumer, so socket reads never stall.
///
/// With the queue full, inbound messages are dropped and lifecycle events are handed
/// to a task that waits for room. Must be called from within a tokio runtime.
pub(crate) fn publish_event(queue: &Sender<ConnectorEvent>, event: ConnectorEvent) {
    match queue.try_send(event) {
        Ok(()) => {}
        Err(TrySendError::Full(ConnectorEvent::Inbound { id, message })) => warn!(
            event = events::EVENT_QUEUE_FULL,
            component = COMPONENT,
            connection_id = id,
            route = message.route.as_str(),
            "event queue full, dropping inbound message"
        ),
        Err(TrySendError::Full(lifecycle)) => {
            let queue = queue.clone();
            tokio::spawn(async move {
                let _ = queue.send(lifecycle).await;
            });
        }
        Err(TrySendError::Closed(_)) => debug!(
            event = events::EVENT_QUEUE_CLOSED,
            component = COMPONENT,
            "no event consumer"
        ),
    }
}

/// Extra predicate applied to the resolved targets of a send, by connection id.
pub type SendFilter = dyn Fn(u64) -> bool + Send + Sync;

/// Per-call transport options.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct SendOptions {
    /// Non-zero answers that request; zero sends an unsolicited push.
    pub request_id: u64,
}
