//! Route discovery collaborator and the declared-route diagnostic.

use crate::observability::events;
use std::collections::HashSet;
use tracing::error;

const COMPONENT: &str = "route_discovery";

/// Supplies the routes a frontend process serves.
///
/// Implementations are external; they are consulted once at startup.
pub trait RouteDiscovery: Send + Sync {
    /// Fully qualified `serverType.handler.method` routes implemented by registered handlers.
    fn handler_routes(&self) -> Vec<String>;

    /// Routes the client-side schema declares. Only used for the startup cross-check.
    fn declared_client_routes(&self) -> Vec<String>;
}

/// One handler method registration.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct HandlerRegistration {
    pub server_type: String,
    pub handler: String,
    pub method: String,
}

impl HandlerRegistration {
    pub fn new(server_type: &str, handler: &str, method: &str) -> Self {
        Self {
            server_type: server_type.to_string(),
            handler: handler.to_string(),
            method: method.to_string(),
        }
    }

    pub fn route(&self) -> String {
        format!("{}.{}.{}", self.server_type, self.handler, self.method)
    }
}

/// Discovery backed by a statically supplied registration list.
///
/// Methods named in the ignore-set never become routes, whatever handler they sit on.
#[derive(Clone, Debug, Default)]
pub struct StaticRouteDiscovery {
    registrations: Vec<HandlerRegistration>,
    ignore: HashSet<String>,
    declared: Vec<String>,
}

impl StaticRouteDiscovery {
    pub fn new(registrations: Vec<HandlerRegistration>) -> Self {
        Self {
            registrations,
            ..Default::default()
        }
    }

    pub fn with_ignored<I, S>(mut self, methods: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ignore.extend(methods.into_iter().map(Into::into));
        self
    }

    pub fn with_declared<I, S>(mut self, routes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.declared = routes.into_iter().map(Into::into).collect();
        self
    }
}

impl RouteDiscovery for StaticRouteDiscovery {
    fn handler_routes(&self) -> Vec<String> {
        self.registrations
            .iter()
            .filter(|registration| !self.ignore.contains(&registration.method))
            .map(HandlerRegistration::route)
            .collect()
    }

    fn declared_client_routes(&self) -> Vec<String> {
        self.declared.clone()
    }
}

/// Disagreement between the discovered handler routes and the declared client routes.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RouteMismatch {
    pub discovered: Vec<String>,
    pub declared: Vec<String>,
}

/// Compares both route lists after sorting; returns the sorted pair when they differ.
pub fn compare_routes(discovered: &[String], declared: &[String]) -> Option<RouteMismatch> {
    let mut discovered = discovered.to_vec();
    let mut declared = declared.to_vec();
    discovered.sort();
    declared.sort();

    if discovered == declared {
        return None;
    }
    Some(RouteMismatch {
        discovered,
        declared,
    })
}

/// Logs a mismatch between discovered and declared routes.
///
/// Never enforced: the caller keeps using the discovered routes either way.
pub fn report_route_mismatch(discovered: &[String], declared: &[String]) -> Option<RouteMismatch> {
    let mismatch = compare_routes(discovered, declared)?;
    error!(
        event = events::DICTIONARY_ROUTE_MISMATCH,
        component = COMPONENT,
        discovered_count = mismatch.discovered.len(),
        declared_count = mismatch.declared.len(),
        discovered = ?mismatch.discovered,
        declared = ?mismatch.declared,
        "handler routes do not match declared client routes"
    );
    Some(mismatch)
}
