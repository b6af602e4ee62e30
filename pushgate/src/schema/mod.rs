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

//! Schema layer.
//!
//! Parses textual message definitions into per-route field/tag tables, keeps one
//! active table per direction, swaps a table atomically on hot reload and
//! encodes/decodes payloads against whichever table is active.
//!
//! ```
//! use pushgate::{parse_schema, Direction, SchemaRegistry};
//! use serde_json::json;
//!
//! let table = parse_schema(&json!({
//!     "chat.chatHandler.send": { "required string content": 1 }
//! }))
//! .unwrap();
//!
//! let registry = SchemaRegistry::with_tables(table.clone(), table);
//! let bytes = registry
//!     .encode("chat.chatHandler.send", &json!({ "content": "hi" }))
//!     .unwrap();
//! let value = registry
//!     .decode_with(Direction::Server, "chat.chatHandler.send", &bytes)
//!     .unwrap();
//! assert_eq!(value, json!({ "content": "hi" }));
//! ```

pub(crate) mod codec;
pub(crate) mod parser;
pub(crate) mod registry;
pub(crate) mod watcher;

use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("failed to read schema file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse schema file {path}: {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid schema definition: {0}")]
    InvalidDefinition(String),
    #[error("no schema registered for route {0}")]
    UnknownRoute(String),
    #[error("required field {0} is missing")]
    MissingRequired(String),
    #[error("field {field} expects {expected}")]
    TypeMismatch { field: String, expected: String },
    #[error("field {field} has unknown type {type_name}")]
    UnknownType { field: String, type_name: String },
    #[error("encoded payload is truncated")]
    Truncated,
    #[error("message nesting exceeds {0} levels")]
    TooDeep(usize),
    #[error("unable to watch schema file: {0}")]
    Watch(#[from] notify::Error),
}

pub type Result<T> = std::result::Result<T, SchemaError>;

/// Which side emits the messages a table describes.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Server-emitted messages, the encoder table.
    Server,
    /// Client-emitted messages, the decoder table.
    Client,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Cardinality {
    Required,
    Optional,
    Repeated,
}

impl Cardinality {
    pub(crate) fn parse(token: &str) -> Option<Self> {
        match token {
            "required" => Some(Self::Required),
            "optional" => Some(Self::Optional),
            "repeated" => Some(Self::Repeated),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct FieldDef {
    #[serde(rename = "option")]
    pub cardinality: Cardinality,
    #[serde(rename = "type")]
    pub type_name: String,
    pub tag: u32,
}

/// Parsed description of one message shape.
///
/// Nested sub-messages and the tag index serialize under the reserved
/// `__messages` and `__tags` keys, next to the user field names.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
pub struct MessageSchema {
    #[serde(flatten)]
    pub fields: BTreeMap<String, FieldDef>,
    #[serde(rename = "__messages")]
    pub messages: BTreeMap<String, MessageSchema>,
    #[serde(rename = "__tags")]
    pub tags: BTreeMap<u32, String>,
}

impl MessageSchema {
    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.get(name)
    }

    pub(crate) fn field_by_tag(&self, tag: u32) -> Option<(&str, &FieldDef)> {
        let name = self.tags.get(&tag)?;
        self.fields.get(name).map(|field| (name.as_str(), field))
    }
}

/// All message schemas of one direction, keyed by route or `message <Name>`.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
#[serde(transparent)]
pub struct SchemaTable {
    routes: HashMap<String, MessageSchema>,
}

impl SchemaTable {
    pub(crate) fn insert(&mut self, key: String, schema: MessageSchema) {
        self.routes.insert(key, schema);
    }

    pub fn get(&self, key: &str) -> Option<&MessageSchema> {
        self.routes.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.routes.contains_key(key)
    }

    /// Shared top-level definition declared as `message <Name>`.
    pub(crate) fn shared_message(&self, name: &str) -> Option<&MessageSchema> {
        self.routes.get(&format!("message {name}"))
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}
