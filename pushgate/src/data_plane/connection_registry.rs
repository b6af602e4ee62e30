//! Endpoint-keyed connection registry.

use crate::data_plane::connection::Connection;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Default)]
struct Entries {
    by_endpoint: HashMap<String, Arc<Connection>>,
    endpoint_by_id: HashMap<u64, String>,
}

/// Creation and removal serialize on one lock, so an endpoint never maps to two live connections.
#[derive(Default)]
pub(crate) struct ConnectionRegistry {
    entries: Mutex<Entries>,
}

impl ConnectionRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Existing connection for `endpoint_key`, or a new one from `create`.
    /// The flag is true when the connection was created.
    pub(crate) async fn get_or_insert_with<F>(
        &self,
        endpoint_key: &str,
        create: F,
    ) -> (Arc<Connection>, bool)
    where
        F: FnOnce() -> Arc<Connection>,
    {
        let mut entries = self.entries.lock().await;
        if let Some(existing) = entries.by_endpoint.get(endpoint_key) {
            return (existing.clone(), false);
        }

        let connection = create();
        entries
            .endpoint_by_id
            .insert(connection.id(), endpoint_key.to_string());
        entries
            .by_endpoint
            .insert(endpoint_key.to_string(), connection.clone());
        (connection, true)
    }

    pub(crate) async fn remove(&self, id: u64) -> Option<Arc<Connection>> {
        let mut entries = self.entries.lock().await;
        let endpoint_key = entries.endpoint_by_id.remove(&id)?;
        entries.by_endpoint.remove(&endpoint_key)
    }

    pub(crate) async fn get(&self, id: u64) -> Option<Arc<Connection>> {
        let entries = self.entries.lock().await;
        let endpoint_key = entries.endpoint_by_id.get(&id)?;
        entries.by_endpoint.get(endpoint_key).cloned()
    }

    pub(crate) async fn all(&self) -> Vec<Arc<Connection>> {
        let entries = self.entries.lock().await;
        let mut connections: Vec<_> = entries.by_endpoint.values().cloned().collect();
        connections.sort_by_key(|connection| connection.id());
        connections
    }

    pub(crate) async fn len(&self) -> usize {
        self.entries.lock().await.by_endpoint.len()
    }
}
