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

//! # pushgate
//!
//! `pushgate` is the message-delivery core of a real-time frontend: it compresses
//! routes into small wire codes, encodes payloads against hot-reloadable schemas,
//! multiplexes client endpoints over one datagram socket, and fans server pushes
//! out to the connections of logical users.
//!
//! ## Quick start
//!
//! ```
//! use std::sync::Arc;
//! use pushgate::config::ConnectorConfig;
//! use pushgate::{
//!     Coder, LocalSessionRegistry, NoSupervisor, PushDistributor, RouteDictionary,
//!     SchemaRegistry, SchemaTable, SendOptions, UdpConnector,
//! };
//! use serde_json::json;
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let dictionary = Arc::new(RouteDictionary::build(["chat.chatHandler.send"], &[]));
//! let schemas = Arc::new(SchemaRegistry::with_tables(
//!     SchemaTable::default(),
//!     SchemaTable::default(),
//! ));
//! let config = ConnectorConfig {
//!     host: "127.0.0.1".to_string(),
//!     port: 0,
//!     ..ConnectorConfig::default()
//! };
//! let (connector, _events) =
//!     UdpConnector::new(config, Coder::new(dictionary, schemas), Arc::new(NoSupervisor));
//! connector.start().await.unwrap();
//!
//! let connector = Arc::new(connector);
//! let sessions = Arc::new(LocalSessionRegistry::new());
//! let distributor = PushDistributor::new(sessions, connector.clone(), 1024);
//!
//! // Nobody is connected yet: the uid is reported back, the send still happens once.
//! let report = distributor
//!     .push_message("onChat", json!({ "msg": "hi" }), &["u1".to_string()], SendOptions::default())
//!     .await
//!     .unwrap();
//! assert_eq!(report.failed_uids, vec!["u1".to_string()]);
//! connector.stop().await;
//! # });
//! ```
//!
//! ## Internal architecture map
//!
//! - Control plane: route discovery and the route <-> code dictionary
//! - Schema: definition parsing, per-direction tables, hot reload, payload codec
//! - Protocol: package and message framing plus the combined [`Coder`]
//! - Data plane: the datagram connector, connection registry and lifecycle
//! - Routing: sessions, the pending-push ledger and push/broadcast fan-out
//!
//! ## Observability model
//!
//! The workspace uses `tracing` for logs/events.
//! Library code emits events/spans and does not unconditionally initialize a global
//! subscriber. Binaries/tests are responsible for one-time `tracing_subscriber`
//! initialization at process boundaries.

pub mod config;

mod control_plane;
pub use control_plane::route_dictionary::{
    load_user_routes, DictionaryError, RouteDictionary,
};
pub use control_plane::route_discovery::{
    compare_routes, report_route_mismatch, HandlerRegistration, RouteDiscovery, RouteMismatch,
    StaticRouteDiscovery,
};

mod schema;
pub use schema::parser::{parse_schema, MSG_ID_FIELD};
pub use schema::registry::{ProtosSnapshot, ReloadOutcome, SchemaRegistry};
pub use schema::watcher::{
    ChangeCallback, ChangeSource, FileEvent, ManualChangeSource, NotifyChangeSource, WatchGuard,
};
pub use schema::{Cardinality, Direction, FieldDef, MessageSchema, SchemaError, SchemaTable};

mod protocol;
pub use protocol::coder::{Coder, InboundMessage};
pub use protocol::message::{Message, MessageRoute, MessageType};
pub use protocol::package::{decode_packages, encode_package, Package, PackageType};
pub use protocol::ProtocolError;

mod data_plane;
pub use data_plane::connection::Connection;
pub use data_plane::connector::UdpConnector;
pub use data_plane::supervisor::{HandshakeSupervisor, NoSupervisor, Supervisor};
pub use data_plane::{ConnectionState, ConnectorEvent, SendFilter, SendOptions, TransportError};

mod routing;
pub use routing::push_distributor::{
    pending_pushes, PendingPush, PushDistributor, PushError, PushReport, PushStatus,
    PUSH_COUNTER_KEY, PUSH_LEDGER_KEY,
};
pub use routing::push_transport::PushTransport;
pub use routing::session::{LocalSession, LocalSessionRegistry, Session, SessionRegistry};

#[doc(hidden)]
pub mod observability;
mod wire;
