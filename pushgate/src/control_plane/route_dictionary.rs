//! Route compression dictionary.

use crate::control_plane::route_discovery::{report_route_mismatch, RouteDiscovery};
use crate::observability::events;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use sha2::{Digest, Sha256};
use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info, warn};

const COMPONENT: &str = "route_dictionary";

#[derive(Debug, Error)]
pub enum DictionaryError {
    #[error("failed to read user dictionary {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("user dictionary {path} must be a JSON array of route strings: {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

pub type Result<T> = std::result::Result<T, DictionaryError>;

/// Bijective route <-> code table plus a content version stamp.
///
/// Codes are assigned from 1 over the lexicographically sorted route set, so two
/// processes given the same routes agree on every code. User routes continue the
/// sequence in the order given and shift whenever the sorted prefix changes.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RouteDictionary {
    dict: HashMap<String, u32>,
    abbrs: HashMap<u32, String>,
    ordered: Vec<String>,
    version: String,
}

impl RouteDictionary {
    pub fn build<I, S>(routes: I, user_routes: &[String]) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let sorted: BTreeSet<String> = routes.into_iter().map(Into::into).collect();

        let mut dictionary = Self::default();
        for route in sorted {
            dictionary.push(route);
        }
        for route in user_routes {
            if dictionary.dict.contains_key(route) {
                warn!(
                    event = events::DICTIONARY_USER_ROUTES_LOADED,
                    component = COMPONENT,
                    route = route.as_str(),
                    "user route already present, keeping first code"
                );
                continue;
            }
            dictionary.push(route.clone());
        }
        dictionary.version = content_version(&dictionary.ordered);

        debug!(
            event = events::DICTIONARY_BUILT,
            component = COMPONENT,
            routes = dictionary.ordered.len(),
            version = dictionary.version.as_str(),
            "route dictionary built"
        );
        dictionary
    }

    /// Startup flow: discovered routes, permissive declared-route check, optional user file.
    pub fn from_discovery(
        discovery: &dyn RouteDiscovery,
        user_dictionary: Option<&Path>,
    ) -> Result<Self> {
        let discovered = discovery.handler_routes();
        let declared = discovery.declared_client_routes();
        let _ = report_route_mismatch(&discovered, &declared);

        let user_routes = match user_dictionary {
            Some(path) if path.exists() => load_user_routes(path)?,
            _ => Vec::new(),
        };

        let dictionary = Self::build(discovered, &user_routes);
        info!(
            event = events::DICTIONARY_BUILT,
            component = COMPONENT,
            routes = dictionary.len(),
            user_routes = user_routes.len(),
            version = dictionary.version(),
            "route dictionary ready"
        );
        Ok(dictionary)
    }

    fn push(&mut self, route: String) {
        let code = self.ordered.len() as u32 + 1;
        self.dict.insert(route.clone(), code);
        self.abbrs.insert(code, route.clone());
        self.ordered.push(route);
    }

    pub fn dict(&self) -> &HashMap<String, u32> {
        &self.dict
    }

    pub fn abbrs(&self) -> &HashMap<u32, String> {
        &self.abbrs
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn route_code(&self, route: &str) -> Option<u32> {
        self.dict.get(route).copied()
    }

    pub fn route_for(&self, code: u32) -> Option<&str> {
        self.abbrs.get(&code).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.ordered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ordered.is_empty()
    }
}

/// Reads a user dictionary file: a JSON array of extra route strings.
pub fn load_user_routes(path: &Path) -> Result<Vec<String>> {
    let shown = path.display().to_string();
    let data = std::fs::read_to_string(path).map_err(|source| DictionaryError::Io {
        path: shown.clone(),
        source,
    })?;
    let routes: Vec<String> = serde_json::from_str(&data).map_err(|source| {
        DictionaryError::Json {
            path: shown.clone(),
            source,
        }
    })?;
    debug!(
        event = events::DICTIONARY_USER_ROUTES_LOADED,
        component = COMPONENT,
        path = shown.as_str(),
        routes = routes.len(),
        "loaded user dictionary"
    );
    Ok(routes)
}

fn content_version(ordered: &[String]) -> String {
    let mapping: serde_json::Map<String, serde_json::Value> = ordered
        .iter()
        .enumerate()
        .map(|(index, route)| (route.clone(), serde_json::Value::from(index as u64 + 1)))
        .collect();
    let serialized = serde_json::Value::Object(mapping).to_string();
    STANDARD.encode(Sha256::digest(serialized.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control_plane::route_discovery::{HandlerRegistration, StaticRouteDiscovery};
    use std::io::Write;

    #[test]
    fn codes_follow_sorted_route_order() {
        let dictionary = RouteDictionary::build(["foo.bar.baz", "a.b.c"], &[]);

        assert_eq!(dictionary.route_code("a.b.c"), Some(1));
        assert_eq!(dictionary.route_code("foo.bar.baz"), Some(2));
        assert_eq!(dictionary.route_for(2), Some("foo.bar.baz"));
    }

    #[test]
    fn building_twice_is_deterministic() {
        let first = RouteDictionary::build(["x.y.z", "a.b.c", "m.n.o"], &[]);
        let second = RouteDictionary::build(["m.n.o", "x.y.z", "a.b.c"], &[]);

        assert_eq!(first.dict(), second.dict());
        assert_eq!(first.abbrs(), second.abbrs());
        assert_eq!(first.version(), second.version());
    }

    #[test]
    fn user_routes_continue_sequence_in_given_order() {
        let user_routes = vec!["onChat".to_string(), "onAdd".to_string()];
        let dictionary = RouteDictionary::build(["b.b.b", "a.a.a"], &user_routes);

        assert_eq!(dictionary.route_code("onChat"), Some(3));
        assert_eq!(dictionary.route_code("onAdd"), Some(4));
    }

    #[test]
    fn user_route_codes_shift_when_core_routes_change() {
        let user_routes = vec!["onChat".to_string()];
        let before = RouteDictionary::build(["a.a.a"], &user_routes);
        let after = RouteDictionary::build(["a.a.a", "b.b.b"], &user_routes);

        assert_eq!(before.route_code("onChat"), Some(2));
        assert_eq!(after.route_code("onChat"), Some(3));
    }

    #[test]
    fn duplicate_user_route_keeps_mapping_bijective() {
        let user_routes = vec!["a.a.a".to_string(), "onChat".to_string()];
        let dictionary = RouteDictionary::build(["a.a.a"], &user_routes);

        assert_eq!(dictionary.route_code("a.a.a"), Some(1));
        assert_eq!(dictionary.route_code("onChat"), Some(2));
        assert_eq!(dictionary.dict().len(), dictionary.abbrs().len());
    }

    #[test]
    fn version_changes_only_with_content() {
        let base = RouteDictionary::build(["a.a.a", "b.b.b"], &[]);
        let same = RouteDictionary::build(["b.b.b", "a.a.a"], &[]);
        let extended = RouteDictionary::build(["a.a.a", "b.b.b", "c.c.c"], &[]);
        let with_user = RouteDictionary::build(["a.a.a", "b.b.b"], &["onChat".to_string()]);

        assert_eq!(base.version(), same.version());
        assert_ne!(base.version(), extended.version());
        assert_ne!(base.version(), with_user.version());
    }

    #[test]
    fn from_discovery_uses_discovered_routes_despite_mismatch() {
        let discovery = StaticRouteDiscovery::new(vec![
            HandlerRegistration::new("chat", "chatHandler", "send"),
            HandlerRegistration::new("connector", "entryHandler", "entry"),
        ])
        .with_declared(["chat.chatHandler.send"]);

        let dictionary =
            RouteDictionary::from_discovery(&discovery, None).expect("dictionary builds");

        assert_eq!(dictionary.len(), 2);
        assert_eq!(dictionary.route_code("connector.entryHandler.entry"), Some(2));
    }

    #[test]
    fn from_discovery_appends_user_dictionary_file() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        write!(file, r#"["onChat", "onLeave"]"#).expect("write user dictionary");
        let discovery =
            StaticRouteDiscovery::new(vec![HandlerRegistration::new("chat", "h", "send")]);

        let dictionary = RouteDictionary::from_discovery(&discovery, Some(file.path()))
            .expect("dictionary builds");

        assert_eq!(dictionary.route_code("onChat"), Some(2));
        assert_eq!(dictionary.route_code("onLeave"), Some(3));
    }

    #[test]
    fn malformed_user_dictionary_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        write!(file, r#"{{"onChat": 1}}"#).expect("write user dictionary");
        let discovery = StaticRouteDiscovery::default();

        let result = RouteDictionary::from_discovery(&discovery, Some(file.path()));

        assert!(matches!(result, Err(DictionaryError::Json { .. })));
    }
}
