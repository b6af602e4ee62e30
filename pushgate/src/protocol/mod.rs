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

//! Protocol layer.
//!
//! Two framings stack on every datagram: the package layer (type + 24-bit length)
//! carries handshake, heartbeat, kick and data bodies, and the message layer inside
//! data packages carries the routed application payload. [`Coder`] joins the message
//! layer with the route dictionary and the schema registry.
//!
//! ```
//! use std::sync::Arc;
//! use pushgate::{Coder, MessageType, RouteDictionary, SchemaRegistry, SchemaTable};
//! use serde_json::json;
//!
//! let dictionary = Arc::new(RouteDictionary::build(["chat.chatHandler.send"], &[]));
//! let schemas = Arc::new(SchemaRegistry::with_tables(
//!     SchemaTable::default(),
//!     SchemaTable::default(),
//! ));
//! let coder = Coder::new(dictionary, schemas);
//!
//! // Unschematised routes fall back to JSON bodies.
//! let bytes = coder
//!     .encode(0, "onChat", &json!({ "msg": "hi" }))
//!     .unwrap();
//! let decoded = coder.decode(&bytes).unwrap();
//! assert_eq!(decoded.kind, MessageType::Push);
//! assert_eq!(decoded.route, "onChat");
//! ```

pub(crate) mod coder;
pub(crate) mod message;
pub(crate) mod package;

use crate::schema::SchemaError;
use crate::wire::Truncated;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("frame is truncated")]
    Truncated,
    #[error("invalid package type {0}")]
    InvalidPackageType(u8),
    #[error("invalid message type {0}")]
    InvalidMessageType(u8),
    #[error("package body of {0} bytes exceeds the 24-bit length field")]
    BodyTooLarge(usize),
    #[error("route of {0} bytes exceeds the 255 byte limit")]
    RouteTooLong(usize),
    #[error("route is not valid UTF-8")]
    InvalidRoute(#[from] std::string::FromUtf8Error),
    #[error("no route registered for code {0}")]
    UnknownRouteCode(u16),
    #[error("{0:?} messages carry no route")]
    MissingRoute(message::MessageType),
    #[error(transparent)]
    Schema(#[from] SchemaError),
    #[error("invalid JSON body: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<Truncated> for ProtocolError {
    fn from(_: Truncated) -> Self {
        ProtocolError::Truncated
    }
}

pub type Result<T> = std::result::Result<T, ProtocolError>;
