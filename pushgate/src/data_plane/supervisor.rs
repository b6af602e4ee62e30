//! Hooks for the handshake and heartbeat sub-protocols.

use crate::data_plane::connection::Connection;
use crate::protocol::coder::Coder;
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::warn;

const COMPONENT: &str = "supervisor";

const CODE_OK: u16 = 200;
const CODE_BAD_REQUEST: u16 = 500;

/// Handshake and heartbeat handling invoked by the connector for each connection.
#[async_trait]
pub trait Supervisor: Send + Sync {
    async fn on_handshake(&self, connection: &Arc<Connection>, body: &[u8]);
    async fn on_heartbeat(&self, connection: &Arc<Connection>);
}

/// Used when supervision is disabled; both hooks do nothing.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoSupervisor;

#[async_trait]
impl Supervisor for NoSupervisor {
    async fn on_handshake(&self, _connection: &Arc<Connection>, _body: &[u8]) {}

    async fn on_heartbeat(&self, _connection: &Arc<Connection>) {}
}

/// Answers handshakes with the heartbeat interval plus the route dictionary and
/// schemas the client is missing, and echoes heartbeats.
pub struct HandshakeSupervisor {
    coder: Coder,
    heartbeat_interval_secs: Option<u64>,
}

impl HandshakeSupervisor {
    pub fn new(coder: Coder, heartbeat_interval_secs: Option<u64>) -> Self {
        Self {
            coder,
            heartbeat_interval_secs,
        }
    }

    /// Reply body for a client handshake request.
    pub fn handshake_reply(&self, request: &Value) -> Value {
        let Some(sys) = request.get("sys").and_then(Value::as_object) else {
            return json!({ "code": CODE_BAD_REQUEST });
        };

        let mut reply = Map::new();
        if let Some(interval) = self.heartbeat_interval_secs {
            reply.insert("heartbeat".to_string(), json!(interval));
        }

        let dictionary = self.coder.dictionary();
        let client_dict_version = sys.get("dictVersion").and_then(Value::as_str);
        if client_dict_version != Some(dictionary.version()) {
            reply.insert("dict".to_string(), json!(dictionary.dict()));
            reply.insert("dictVersion".to_string(), json!(dictionary.version()));
        }

        let schemas = self.coder.schemas();
        let client_proto_version = sys.get("protoVersion").and_then(Value::as_u64);
        if client_proto_version != Some(schemas.version()) {
            reply.insert("protos".to_string(), json!(schemas.protos()));
        }

        reply.insert("useDict".to_string(), json!(true));
        reply.insert("useProto".to_string(), json!(true));

        json!({ "code": CODE_OK, "sys": reply })
    }
}

#[async_trait]
impl Supervisor for HandshakeSupervisor {
    async fn on_handshake(&self, connection: &Arc<Connection>, body: &[u8]) {
        let request: Value = match serde_json::from_slice(body) {
            Ok(request) => request,
            Err(err) => {
                warn!(
                    component = COMPONENT,
                    connection_id = connection.id(),
                    err = %err,
                    "malformed handshake request"
                );
                json!({})
            }
        };

        let reply = self.handshake_reply(&request);
        if let Err(err) = connection
            .handshake_response(reply.to_string().as_bytes())
            .await
        {
            warn!(
                component = COMPONENT,
                connection_id = connection.id(),
                err = %err,
                "unable to send handshake reply"
            );
        }
    }

    async fn on_heartbeat(&self, connection: &Arc<Connection>) {
        if let Err(err) = connection.heartbeat().await {
            warn!(
                component = COMPONENT,
                connection_id = connection.id(),
                err = %err,
                "unable to answer heartbeat"
            );
        }
    }
}
