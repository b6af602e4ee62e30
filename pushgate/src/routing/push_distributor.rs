//! Push and broadcast fan-out with the per-session pending-push ledger.

use crate::data_plane::{SendOptions, TransportError};
use crate::observability::{events, fields};
use crate::routing::push_transport::PushTransport;
use crate::routing::session::{Session, SessionRegistry};
use crate::schema::parser::MSG_ID_FIELD;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::{debug, error, warn};

const COMPONENT: &str = "push_distributor";

/// Session key holding the pending-push ledger; its presence opts the session in.
pub const PUSH_LEDGER_KEY: &str = "pushPacketStatus";
/// Session key holding the next push id.
pub const PUSH_COUNTER_KEY: &str = "pushRequestID";

const FIRST_PUSH_ID: u64 = 1;

#[derive(Debug, Error)]
pub enum PushError {
    #[error("can not send empty message")]
    EmptyMessage,
    #[error("push transport failed: {source}")]
    Transport {
        #[source]
        source: TransportError,
        /// Uids that resolved to no session, as for a successful push.
        failed_uids: Vec<String>,
    },
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PushStatus {
    Pending,
}

/// One ledger entry, recorded when a push is stamped for a session.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PendingPush {
    #[serde(rename = "msgID")]
    pub id: u64,
    pub route: String,
    #[serde(rename = "reqBody")]
    pub request_body: Value,
    #[serde(rename = "resBody")]
    pub response_body: Value,
    pub status: PushStatus,
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct PushReport {
    /// Uids with no session on this process, in input order.
    pub failed_uids: Vec<String>,
    /// Connection ids the single send went to.
    pub targets: Vec<u64>,
}

pub struct PushDistributor {
    sessions: Arc<dyn SessionRegistry>,
    transport: Arc<dyn PushTransport>,
    ledger_capacity: usize,
    /// Serialises counter and ledger read-modify-write across concurrent pushes.
    stamping: Mutex<()>,
}

impl PushDistributor {
    /// `ledger_capacity` bounds each session's ledger; 0 keeps every entry.
    pub fn new(
        sessions: Arc<dyn SessionRegistry>,
        transport: Arc<dyn PushTransport>,
        ledger_capacity: usize,
    ) -> Self {
        Self {
            sessions,
            transport,
            ledger_capacity,
            stamping: Mutex::new(()),
        }
    }

    /// Pushes `message` to every session of every uid with a single send.
    ///
    /// Ledger-bearing sessions stamp `msgID` into the one shared message, so every
    /// target receives the id of the last stamped session.
    pub async fn push_message(
        &self,
        route: &str,
        mut message: Value,
        uids: &[String],
        options: SendOptions,
    ) -> Result<PushReport, PushError> {
        if is_empty_message(&message) {
            error!(
                event = events::PUSH_REJECTED_EMPTY,
                component = COMPONENT,
                route,
                "can not send empty message"
            );
            return Err(PushError::EmptyMessage);
        }

        let mut report = PushReport::default();
        {
            let _stamping = self.stamping.lock().unwrap_or_else(|e| e.into_inner());
            for uid in uids {
                let sessions = self.sessions.get_by_uid(uid);
                if sessions.is_empty() {
                    debug!(
                        event = events::PUSH_UID_UNRESOLVED,
                        component = COMPONENT,
                        route,
                        uid = uid.as_str(),
                        "no session for uid"
                    );
                    report.failed_uids.push(uid.clone());
                    continue;
                }
                for session in sessions {
                    self.stamp_and_record(session.as_ref(), route, &mut message);
                    report.targets.push(session.id());
                }
            }
        }

        let sent = self
            .transport
            .send(None, route, &message, Some(report.targets.as_slice()), options)
            .await;
        debug!(
            event = events::PUSH_SENT,
            component = COMPONENT,
            route,
            uids = uids.len(),
            targets = %fields::format_targets(Some(report.targets.as_slice())),
            failed = report.failed_uids.len(),
            ok = sent.is_ok(),
            "push issued"
        );

        match sent {
            Ok(()) => Ok(report),
            Err(source) => Err(PushError::Transport {
                source,
                failed_uids: report.failed_uids,
            }),
        }
    }

    /// Sends `message` to every connection of this process.
    pub async fn broadcast(
        &self,
        route: &str,
        message: &Value,
        options: SendOptions,
    ) -> Result<(), PushError> {
        let sent = self
            .transport
            .send(None, route, message, None, options)
            .await;
        debug!(
            event = events::BROADCAST_SENT,
            component = COMPONENT,
            route,
            targets = %fields::format_targets(None),
            ok = sent.is_ok(),
            "broadcast issued"
        );
        sent.map_err(|source| PushError::Transport {
            source,
            failed_uids: Vec::new(),
        })
    }

    fn stamp_and_record(&self, session: &dyn Session, route: &str, message: &mut Value) {
        let Some(Value::Object(mut ledger)) = session.get(PUSH_LEDGER_KEY) else {
            return;
        };

        let id = session
            .get(PUSH_COUNTER_KEY)
            .and_then(|counter| counter.as_u64())
            .unwrap_or(FIRST_PUSH_ID);
        if let Value::Object(body) = message {
            body.insert(MSG_ID_FIELD.to_string(), Value::from(id));
        }

        let entry = PendingPush {
            id,
            route: route.to_string(),
            request_body: message.clone(),
            response_body: Value::Object(Map::new()),
            status: PushStatus::Pending,
        };
        match serde_json::to_value(&entry) {
            Ok(entry) => {
                ledger.insert(id.to_string(), entry);
            }
            Err(err) => warn!(
                component = COMPONENT,
                session_id = session.id(),
                err = %err,
                "unable to record pending push"
            ),
        }
        self.enforce_capacity(session, &mut ledger);

        session.set(PUSH_COUNTER_KEY, Value::from(id + 1));
        session.set(PUSH_LEDGER_KEY, Value::Object(ledger));
    }

    fn enforce_capacity(&self, session: &dyn Session, ledger: &mut Map<String, Value>) {
        if self.ledger_capacity == 0 || ledger.len() <= self.ledger_capacity {
            return;
        }

        let mut ids: Vec<(u64, String)> = ledger
            .keys()
            .map(|key| (key.parse().unwrap_or(0), key.clone()))
            .collect();
        ids.sort_unstable();
        let excess = ledger.len() - self.ledger_capacity;
        for (_, key) in ids.into_iter().take(excess) {
            ledger.remove(&key);
        }
        debug!(
            event = events::PUSH_LEDGER_EVICTED,
            component = COMPONENT,
            session_id = session.id(),
            evicted = excess,
            "pending-push ledger trimmed"
        );
    }
}

fn is_empty_message(message: &Value) -> bool {
    match message {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::String(text) => text.is_empty(),
        _ => false,
    }
}

/// Decodes a session's ledger, lowest id first.
pub fn pending_pushes(session: &dyn Session) -> Vec<PendingPush> {
    let Some(Value::Object(ledger)) = session.get(PUSH_LEDGER_KEY) else {
        return Vec::new();
    };
    let mut entries: Vec<PendingPush> = ledger
        .into_iter()
        .filter_map(|(_, entry)| serde_json::from_value(entry).ok())
        .collect();
    entries.sort_by_key(|entry| entry.id);
    entries
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_plane::SendFilter;
    use crate::routing::session::LocalSessionRegistry;
    use async_trait::async_trait;
    use serde_json::json;
    use std::io;

    #[derive(Clone, Debug, PartialEq)]
    struct SentCall {
        route: String,
        message: Value,
        targets: Option<Vec<u64>>,
    }

    #[derive(Default)]
    struct RecordingTransport {
        calls: Mutex<Vec<SentCall>>,
        fail: bool,
    }

    impl RecordingTransport {
        fn failing() -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                fail: true,
            }
        }

        fn calls(&self) -> Vec<SentCall> {
            self.calls.lock().expect("calls lock").clone()
        }
    }

    #[async_trait]
    impl PushTransport for RecordingTransport {
        async fn send(
            &self,
            _filter: Option<&SendFilter>,
            route: &str,
            message: &Value,
            targets: Option<&[u64]>,
            _options: SendOptions,
        ) -> Result<(), TransportError> {
            self.calls.lock().expect("calls lock").push(SentCall {
                route: route.to_string(),
                message: message.clone(),
                targets: targets.map(<[u64]>::to_vec),
            });
            if self.fail {
                return Err(TransportError::Send {
                    peer: "127.0.0.1:9".parse().expect("literal addr"),
                    source: io::Error::new(io::ErrorKind::Other, "boom"),
                });
            }
            Ok(())
        }
    }

    fn ledger_session(registry: &LocalSessionRegistry, id: u64, uid: &str, next_id: u64) {
        let session = registry.create(id);
        registry.bind(id, uid);
        session.set(PUSH_LEDGER_KEY, json!({}));
        session.set(PUSH_COUNTER_KEY, json!(next_id));
    }

    fn uids(values: &[&str]) -> Vec<String> {
        values.iter().map(|uid| uid.to_string()).collect()
    }

    #[tokio::test]
    async fn empty_message_is_rejected_without_send() {
        let transport = Arc::new(RecordingTransport::default());
        let distributor =
            PushDistributor::new(Arc::new(LocalSessionRegistry::new()), transport.clone(), 0);

        for empty in [json!({}), Value::Null, json!("")] {
            assert!(matches!(
                distributor
                    .push_message("onChat", empty, &[], SendOptions::default())
                    .await,
                Err(PushError::EmptyMessage)
            ));
        }
        assert!(transport.calls().is_empty());
    }

    #[tokio::test]
    async fn unresolved_uids_are_reported_in_order_with_one_send() {
        let registry = Arc::new(LocalSessionRegistry::new());
        registry.create(11);
        registry.bind(11, "u1");
        let transport = Arc::new(RecordingTransport::default());
        let distributor = PushDistributor::new(registry, transport.clone(), 0);

        let report = distributor
            .push_message(
                "onChat",
                json!({ "x": 1 }),
                &uids(&["u1", "u2"]),
                SendOptions::default(),
            )
            .await
            .expect("push succeeds");

        assert_eq!(report.failed_uids, uids(&["u2"]));
        assert_eq!(report.targets, vec![11]);
        assert_eq!(
            transport.calls(),
            vec![SentCall {
                route: "onChat".to_string(),
                message: json!({ "x": 1 }),
                targets: Some(vec![11]),
            }]
        );
    }

    #[tokio::test]
    async fn sessions_of_all_uids_merge_into_one_target_list() {
        let registry = Arc::new(LocalSessionRegistry::new());
        for (id, uid) in [(1, "a"), (2, "b"), (3, "a")] {
            registry.create(id);
            registry.bind(id, uid);
        }
        let transport = Arc::new(RecordingTransport::default());
        let distributor = PushDistributor::new(registry, transport.clone(), 0);

        let report = distributor
            .push_message(
                "onMove",
                json!({ "x": 1 }),
                &uids(&["missing", "a", "b", "gone"]),
                SendOptions::default(),
            )
            .await
            .expect("push succeeds");

        assert_eq!(report.targets, vec![1, 3, 2]);
        assert_eq!(report.failed_uids, uids(&["missing", "gone"]));
        assert_eq!(transport.calls().len(), 1);
    }

    #[tokio::test]
    async fn shared_message_carries_last_stamped_msg_id() {
        let registry = Arc::new(LocalSessionRegistry::new());
        ledger_session(&registry, 1, "first", 5);
        ledger_session(&registry, 2, "second", 9);
        let transport = Arc::new(RecordingTransport::default());
        let distributor = PushDistributor::new(registry.clone(), transport.clone(), 0);

        distributor
            .push_message(
                "onChat",
                json!({ "msg": "hi" }),
                &uids(&["first", "second"]),
                SendOptions::default(),
            )
            .await
            .expect("push succeeds");

        // Both targets get the id stamped for the last session, not their own.
        let calls = transport.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].targets, Some(vec![1, 2]));
        assert_eq!(calls[0].message[MSG_ID_FIELD], json!(9));

        let first = registry.get(1).expect("first session");
        let second = registry.get(2).expect("second session");
        assert_eq!(first.get(PUSH_COUNTER_KEY), Some(json!(6)));
        assert_eq!(second.get(PUSH_COUNTER_KEY), Some(json!(10)));

        let first_ledger = pending_pushes(first.as_ref());
        assert_eq!(first_ledger.len(), 1);
        assert_eq!(first_ledger[0].id, 5);
        assert_eq!(first_ledger[0].status, PushStatus::Pending);
        assert_eq!(first_ledger[0].request_body[MSG_ID_FIELD], json!(5));
        assert_eq!(first_ledger[0].response_body, json!({}));
        assert_eq!(pending_pushes(second.as_ref())[0].id, 9);
    }

    #[tokio::test]
    async fn sessions_without_ledger_are_not_stamped() {
        let registry = Arc::new(LocalSessionRegistry::new());
        registry.create(4);
        registry.bind(4, "plain");
        let transport = Arc::new(RecordingTransport::default());
        let distributor = PushDistributor::new(registry.clone(), transport.clone(), 0);

        distributor
            .push_message(
                "onChat",
                json!({ "msg": "hi" }),
                &uids(&["plain"]),
                SendOptions::default(),
            )
            .await
            .expect("push succeeds");

        assert!(transport.calls()[0].message.get(MSG_ID_FIELD).is_none());
        let session = registry.get(4).expect("session");
        assert_eq!(session.get(PUSH_COUNTER_KEY), None);
    }

    #[tokio::test]
    async fn ledger_keeps_newest_entries_within_capacity() {
        let registry = Arc::new(LocalSessionRegistry::new());
        ledger_session(&registry, 1, "u1", 1);
        let transport = Arc::new(RecordingTransport::default());
        let distributor = PushDistributor::new(registry.clone(), transport, 2);

        for n in 0..4 {
            distributor
                .push_message(
                    "onTick",
                    json!({ "n": n }),
                    &uids(&["u1"]),
                    SendOptions::default(),
                )
                .await
                .expect("push succeeds");
        }

        let session = registry.get(1).expect("session");
        let ids: Vec<u64> = pending_pushes(session.as_ref())
            .iter()
            .map(|entry| entry.id)
            .collect();
        assert_eq!(ids, vec![3, 4]);
        assert_eq!(session.get(PUSH_COUNTER_KEY), Some(json!(5)));
    }

    #[tokio::test]
    async fn transport_failure_still_reports_failed_uids() {
        let registry = Arc::new(LocalSessionRegistry::new());
        registry.create(1);
        registry.bind(1, "u1");
        let distributor =
            PushDistributor::new(registry, Arc::new(RecordingTransport::failing()), 0);

        let err = distributor
            .push_message(
                "onChat",
                json!({ "x": 1 }),
                &uids(&["u1", "u9"]),
                SendOptions::default(),
            )
            .await
            .expect_err("transport fails");

        match err {
            PushError::Transport { failed_uids, .. } => assert_eq!(failed_uids, uids(&["u9"])),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn concurrent_pushes_never_reuse_a_msg_id() {
        let registry = Arc::new(LocalSessionRegistry::new());
        ledger_session(&registry, 1, "u1", 1);
        let transport = Arc::new(RecordingTransport::default());
        let distributor = Arc::new(PushDistributor::new(registry.clone(), transport.clone(), 0));

        let pushes: Vec<_> = (0..500)
            .map(|n| {
                let distributor = distributor.clone();
                tokio::spawn(async move {
                    distributor
                        .push_message(
                            "onTick",
                            json!({ "n": n }),
                            &["u1".to_string()],
                            SendOptions::default(),
                        )
                        .await
                        .expect("push succeeds");
                })
            })
            .collect();
        for push in pushes {
            push.await.expect("push task");
        }

        let session = registry.get(1).expect("session");
        assert_eq!(session.get(PUSH_COUNTER_KEY), Some(json!(501)));
        let ids: Vec<u64> = pending_pushes(session.as_ref())
            .iter()
            .map(|entry| entry.id)
            .collect();
        assert_eq!(ids, (1..=500).collect::<Vec<u64>>());

        let mut sent: Vec<u64> = transport
            .calls()
            .iter()
            .filter_map(|call| call.message[MSG_ID_FIELD].as_u64())
            .collect();
        sent.sort_unstable();
        assert_eq!(sent, ids);
    }

    #[tokio::test]
    async fn broadcast_targets_everyone_without_bookkeeping() {
        let registry = Arc::new(LocalSessionRegistry::new());
        ledger_session(&registry, 1, "u1", 1);
        let transport = Arc::new(RecordingTransport::default());
        let distributor = PushDistributor::new(registry.clone(), transport.clone(), 0);

        distributor
            .broadcast("onNotice", &json!({ "text": "maintenance" }), SendOptions::default())
            .await
            .expect("broadcast succeeds");

        let calls = transport.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].targets, None);
        assert!(calls[0].message.get(MSG_ID_FIELD).is_none());
        let session = registry.get(1).expect("session");
        assert!(pending_pushes(session.as_ref()).is_empty());
    }
}
