//! Stable event names and field formatters shared by every layer.

pub mod events {
    pub const DICTIONARY_BUILT: &str = "dictionary_built";
    pub const DICTIONARY_ROUTE_MISMATCH: &str = "dictionary_route_mismatch";
    pub const DICTIONARY_USER_ROUTES_LOADED: &str = "dictionary_user_routes_loaded";

    pub const SCHEMA_LOADED: &str = "schema_loaded";
    pub const SCHEMA_FILE_ABSENT: &str = "schema_file_absent";
    pub const SCHEMA_RELOAD_APPLIED: &str = "schema_reload_applied";
    pub const SCHEMA_RELOAD_REJECTED: &str = "schema_reload_rejected";
    pub const SCHEMA_RELOAD_IGNORED: &str = "schema_reload_ignored";
    pub const SCHEMA_WATCHER_INSTALLED: &str = "schema_watcher_installed";
    pub const SCHEMA_WATCHER_CLOSED: &str = "schema_watcher_closed";
    pub const SCHEMA_WATCHER_FAILED: &str = "schema_watcher_failed";

    pub const CONNECTOR_STARTED: &str = "connector_started";
    pub const CONNECTOR_STOPPED: &str = "connector_stopped";
    pub const CONNECTOR_SOCKET_ERROR: &str = "connector_socket_error";
    pub const CONNECTION_CREATED: &str = "connection_created";
    pub const CONNECTION_CLOSED: &str = "connection_closed";
    pub const CONNECTION_STATE_CHANGED: &str = "connection_state_changed";
    pub const DATAGRAM_DROPPED: &str = "datagram_dropped";
    pub const EVENT_QUEUE_CLOSED: &str = "event_queue_closed";
    pub const EVENT_QUEUE_FULL: &str = "event_queue_full";
    pub const CONNECTION_IDLE_EXPIRED: &str = "connection_idle_expired";
    pub const SEND_TARGET_UNKNOWN: &str = "send_target_unknown";
    pub const SEND_FAILED: &str = "send_failed";

    pub const PUSH_REJECTED_EMPTY: &str = "push_rejected_empty";
    pub const PUSH_UID_UNRESOLVED: &str = "push_uid_unresolved";
    pub const PUSH_LEDGER_EVICTED: &str = "push_ledger_evicted";
    pub const PUSH_SENT: &str = "push_sent";
    pub const BROADCAST_SENT: &str = "broadcast_sent";
}

pub mod fields {
    use std::net::SocketAddr;

    /// Demultiplex key for a remote endpoint, `address:port`.
    pub fn format_endpoint_key(peer: &SocketAddr) -> String {
        format!("{}:{}", peer.ip(), peer.port())
    }

    pub fn format_targets(targets: Option<&[u64]>) -> String {
        match targets {
            Some(ids) => format!("{ids:?}"),
            None => "all".to_string(),
        }
    }
}
