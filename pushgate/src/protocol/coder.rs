//! Route-compressing, schema-aware message coder shared by the transport.

use crate::control_plane::route_dictionary::RouteDictionary;
use crate::protocol::message::{Message, MessageRoute, MessageType};
use crate::protocol::{ProtocolError, Result};
use crate::schema::registry::SchemaRegistry;
use serde_json::{Map, Value};
use std::sync::Arc;

/// A decoded client message with its route resolved and body parsed.
#[derive(Clone, Debug, PartialEq)]
pub struct InboundMessage {
    pub kind: MessageType,
    pub id: u64,
    pub route: String,
    pub body: Value,
}

#[derive(Clone)]
pub struct Coder {
    dictionary: Arc<RouteDictionary>,
    schemas: Arc<SchemaRegistry>,
}

impl Coder {
    pub fn new(dictionary: Arc<RouteDictionary>, schemas: Arc<SchemaRegistry>) -> Self {
        Self {
            dictionary,
            schemas,
        }
    }

    pub fn dictionary(&self) -> &Arc<RouteDictionary> {
        &self.dictionary
    }

    pub fn schemas(&self) -> &Arc<SchemaRegistry> {
        &self.schemas
    }

    /// Encodes a server message: a response when `request_id` is non-zero, a push otherwise.
    ///
    /// Responses are keyed by the route of the request they answer.
    pub fn encode(&self, request_id: u64, route: &str, body: &Value) -> Result<Vec<u8>> {
        let payload = match self.schemas.try_encode(route, body) {
            Some(encoded) => encoded?,
            None => serde_json::to_vec(body)?,
        };

        let (kind, route) = if request_id > 0 {
            (MessageType::Response, MessageRoute::None)
        } else {
            (MessageType::Push, self.compress(route))
        };

        Message {
            kind,
            id: request_id,
            route,
            body: payload,
        }
        .encode()
    }

    pub fn decode(&self, bytes: &[u8]) -> Result<InboundMessage> {
        let message = Message::decode(bytes)?;
        let route = match message.route {
            MessageRoute::Code(code) => self
                .dictionary
                .route_for(u32::from(code))
                .map(str::to_string)
                .ok_or(ProtocolError::UnknownRouteCode(code))?,
            MessageRoute::Name(name) => name,
            MessageRoute::None => return Err(ProtocolError::MissingRoute(message.kind)),
        };

        let body = match self.schemas.try_decode(&route, &message.body) {
            Some(decoded) => decoded?,
            None if message.body.is_empty() => Value::Object(Map::new()),
            None => serde_json::from_slice(&message.body)?,
        };

        Ok(InboundMessage {
            kind: message.kind,
            id: message.id,
            route,
            body,
        })
    }

    /// Codes outside the 2-byte range travel as plain route names.
    fn compress(&self, route: &str) -> MessageRoute {
        self.dictionary
            .route_code(route)
            .and_then(|code| u16::try_from(code).ok())
            .map(MessageRoute::Code)
            .unwrap_or_else(|| MessageRoute::Name(route.to_string()))
    }
}
