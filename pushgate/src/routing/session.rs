//! Session collaborator contracts and an in-process registry.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Per-connection user record with a mutable key/value store.
pub trait Session: Send + Sync {
    /// Id of the connection the session rides on.
    fn id(&self) -> u64;
    fn uid(&self) -> Option<String>;
    fn get(&self, key: &str) -> Option<Value>;
    fn set(&self, key: &str, value: Value);
}

pub trait SessionRegistry: Send + Sync {
    /// Every live session bound to `uid`; empty when the user is not connected here.
    fn get_by_uid(&self, uid: &str) -> Vec<Arc<dyn Session>>;
}

#[derive(Debug)]
pub struct LocalSession {
    id: u64,
    uid: Mutex<Option<String>>,
    settings: Mutex<HashMap<String, Value>>,
}

impl LocalSession {
    pub fn new(id: u64) -> Self {
        Self {
            id,
            uid: Mutex::new(None),
            settings: Mutex::new(HashMap::new()),
        }
    }
}

impl Session for LocalSession {
    fn id(&self) -> u64 {
        self.id
    }

    fn uid(&self) -> Option<String> {
        self.uid.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn get(&self, key: &str) -> Option<Value> {
        self.settings
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned()
    }

    fn set(&self, key: &str, value: Value) {
        self.settings
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.to_string(), value);
    }
}

#[derive(Default)]
struct Sessions {
    by_id: HashMap<u64, Arc<LocalSession>>,
    ids_by_uid: HashMap<String, Vec<u64>>,
}

/// Sessions of the connections held by this process, keyed by connection id and uid.
#[derive(Default)]
pub struct LocalSessionRegistry {
    sessions: Mutex<Sessions>,
}

impl LocalSessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Session for connection `id`, created on first use.
    pub fn create(&self, id: u64) -> Arc<LocalSession> {
        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        sessions
            .by_id
            .entry(id)
            .or_insert_with(|| Arc::new(LocalSession::new(id)))
            .clone()
    }

    /// Binds session `id` to `uid`; returns false when there is no such session.
    pub fn bind(&self, id: u64, uid: &str) -> bool {
        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        let Some(session) = sessions.by_id.get(&id).cloned() else {
            return false;
        };

        let previous = session
            .uid
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .replace(uid.to_string());
        if let Some(previous) = previous {
            unlink(&mut sessions.ids_by_uid, &previous, id);
        }
        let ids = sessions.ids_by_uid.entry(uid.to_string()).or_default();
        if !ids.contains(&id) {
            ids.push(id);
        }
        true
    }

    pub fn unbind(&self, id: u64) {
        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        let Some(session) = sessions.by_id.get(&id).cloned() else {
            return;
        };
        let previous = session.uid.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(previous) = previous {
            unlink(&mut sessions.ids_by_uid, &previous, id);
        }
    }

    pub fn remove(&self, id: u64) -> Option<Arc<LocalSession>> {
        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        let session = sessions.by_id.remove(&id)?;
        if let Some(uid) = session.uid() {
            unlink(&mut sessions.ids_by_uid, &uid, id);
        }
        Some(session)
    }

    pub fn get(&self, id: u64) -> Option<Arc<LocalSession>> {
        let sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        sessions.by_id.get(&id).cloned()
    }

    pub fn len(&self) -> usize {
        self.sessions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .by_id
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn unlink(ids_by_uid: &mut HashMap<String, Vec<u64>>, uid: &str, id: u64) {
    if let Some(ids) = ids_by_uid.get_mut(uid) {
        ids.retain(|existing| *existing != id);
        if ids.is_empty() {
            ids_by_uid.remove(uid);
        }
    }
}

impl SessionRegistry for LocalSessionRegistry {
    fn get_by_uid(&self, uid: &str) -> Vec<Arc<dyn Session>> {
        let sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        sessions
            .ids_by_uid
            .get(uid)
            .into_iter()
            .flatten()
            .filter_map(|id| sessions.by_id.get(id))
            .map(|session| session.clone() as Arc<dyn Session>)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn one_uid_may_own_several_sessions() {
        let registry = LocalSessionRegistry::new();
        registry.create(1);
        registry.create(2);
        registry.bind(1, "alice");
        registry.bind(2, "alice");

        let ids: Vec<u64> = registry
            .get_by_uid("alice")
            .iter()
            .map(|session| session.id())
            .collect();
        assert_eq!(ids, vec![1, 2]);
        assert!(registry.get_by_uid("bob").is_empty());
    }

    #[test]
    fn rebinding_moves_session_between_uids() {
        let registry = LocalSessionRegistry::new();
        registry.create(7);
        registry.bind(7, "alice");
        registry.bind(7, "bob");

        assert!(registry.get_by_uid("alice").is_empty());
        assert_eq!(registry.get_by_uid("bob").len(), 1);
        assert!(!registry.bind(8, "carol"));
    }

    #[test]
    fn remove_and_unbind_drop_uid_lookups() {
        let registry = LocalSessionRegistry::new();
        registry.create(1);
        registry.create(2);
        registry.bind(1, "alice");
        registry.bind(2, "bob");

        registry.unbind(1);
        registry.remove(2);

        assert!(registry.get_by_uid("alice").is_empty());
        assert!(registry.get_by_uid("bob").is_empty());
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get(1).and_then(|s| s.uid()), None);
    }

    #[test]
    fn settings_store_values_by_key() {
        let session = LocalSession::new(3);
        assert_eq!(session.get("pushRequestID"), None);
        session.set("pushRequestID", json!(4));
        assert_eq!(session.get("pushRequestID"), Some(json!(4)));
    }
}
