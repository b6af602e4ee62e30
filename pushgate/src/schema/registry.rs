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

use crate::config::SchemaConfig;
use crate::observability::events;
use crate::schema::codec;
use crate::schema::parser::parse_schema;
use crate::schema::watcher::{
    ChangeCallback, ChangeSource, FileEvent, ManualChangeSource, NotifyChangeSource, WatchGuard,
};
use crate::schema::{Direction, Result, SchemaError, SchemaTable};
use arc_swap::ArcSwap;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, UNIX_EPOCH};
use tracing::{debug, info, warn};

const COMPONENT: &str = "schema_registry";

/// What a change notification did to the active table.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ReloadOutcome {
    /// Not a content change.
    Ignored,
    /// New table swapped in.
    Applied { version: u64 },
    /// Unreadable or malformed; the previous table stays active.
    Rejected,
}

/// Tables currently active in both directions.
#[derive(Clone, Debug, Serialize)]
pub struct ProtosSnapshot {
    pub server: Arc<SchemaTable>,
    pub client: Arc<SchemaTable>,
    pub version: u64,
}

struct SchemaSlot {
    table: ArcSwap<SchemaTable>,
    version: AtomicU64,
}

impl SchemaSlot {
    fn new(table: SchemaTable) -> Self {
        Self {
            table: ArcSwap::from_pointee(table),
            version: AtomicU64::new(0),
        }
    }

    /// Whole-table swap; readers see either the previous or the new table.
    fn install(&self, table: SchemaTable, version: u64) -> u64 {
        self.table.store(Arc::new(table));
        self.version.fetch_max(version, Ordering::SeqCst).max(version)
    }
}

struct RegistryState {
    server: SchemaSlot,
    client: SchemaSlot,
}

impl RegistryState {
    fn slot(&self, direction: Direction) -> &SchemaSlot {
        match direction {
            Direction::Server => &self.server,
            Direction::Client => &self.client,
        }
    }

    fn on_update(&self, direction: Direction, path: &Path, event: FileEvent) -> ReloadOutcome {
        if event != FileEvent::Changed {
            debug!(
                event = events::SCHEMA_RELOAD_IGNORED,
                component = COMPONENT,
                direction = ?direction,
                path = %path.display(),
                file_event = ?event,
                "ignoring non-content schema file event"
            );
            return ReloadOutcome::Ignored;
        }

        match read_table(path) {
            Ok((table, modified)) => {
                let version = self.slot(direction).install(table, modified);
                info!(
                    event = events::SCHEMA_RELOAD_APPLIED,
                    component = COMPONENT,
                    direction = ?direction,
                    path = %path.display(),
                    version,
                    "schema file reloaded"
                );
                ReloadOutcome::Applied { version }
            }
            Err(err) => {
                warn!(
                    event = events::SCHEMA_RELOAD_REJECTED,
                    component = COMPONENT,
                    direction = ?direction,
                    path = %path.display(),
                    err = %err,
                    "schema file change rejected, keeping previous table"
                );
                ReloadOutcome::Rejected
            }
        }
    }
}

/// Active encoder (server) and decoder (client) schema tables with hot reload.
pub struct SchemaRegistry {
    state: Arc<RegistryState>,
    change_source: Arc<dyn ChangeSource>,
    watchers: Mutex<HashMap<Direction, Box<dyn WatchGuard>>>,
}

impl SchemaRegistry {
    pub fn new(change_source: Arc<dyn ChangeSource>) -> Self {
        Self {
            state: Arc::new(RegistryState {
                server: SchemaSlot::new(SchemaTable::default()),
                client: SchemaSlot::new(SchemaTable::default()),
            }),
            change_source,
            watchers: Mutex::new(HashMap::new()),
        }
    }

    /// Fixed tables without file backing.
    pub fn with_tables(server: SchemaTable, client: SchemaTable) -> Self {
        let registry = Self::new(Arc::new(ManualChangeSource::new()));
        registry.state.server.install(server, 0);
        registry.state.client.install(client, 0);
        registry
    }

    /// Loads both schema files named by `config`, watching them for changes.
    ///
    /// A file that fails to load is logged and leaves that direction empty.
    pub fn load(config: &SchemaConfig) -> Self {
        let source = NotifyChangeSource::new(Duration::from_millis(config.watch_debounce_ms));
        let registry = Self::new(Arc::new(source));
        for (direction, path) in [
            (Direction::Server, &config.server_protos),
            (Direction::Client, &config.client_protos),
        ] {
            if let Err(err) = registry.set_protos(direction, path) {
                warn!(
                    event = events::SCHEMA_RELOAD_REJECTED,
                    component = COMPONENT,
                    direction = ?direction,
                    path = %path.display(),
                    err = %err,
                    "unable to load schema file"
                );
            }
        }
        registry
    }

    /// Installs the definitions at `path` for `direction` and watches the file.
    ///
    /// An absent file is a no-op. Any earlier watcher for `direction` is closed.
    pub fn set_protos(&self, direction: Direction, path: &Path) -> Result<()> {
        if !path.exists() {
            debug!(
                event = events::SCHEMA_FILE_ABSENT,
                component = COMPONENT,
                direction = ?direction,
                path = %path.display(),
                "schema file absent, nothing to load"
            );
            return Ok(());
        }

        let (table, modified) = read_table(path)?;
        let routes = table.len();
        let version = self.state.slot(direction).install(table, modified);
        info!(
            event = events::SCHEMA_LOADED,
            component = COMPONENT,
            direction = ?direction,
            path = %path.display(),
            routes,
            version,
            "schema file loaded"
        );

        self.install_watcher(direction, path.to_path_buf());
        Ok(())
    }

    fn install_watcher(&self, direction: Direction, path: PathBuf) {
        let state = self.state.clone();
        let watched = path.clone();
        let callback: ChangeCallback = Arc::new(move |event| {
            let _ = state.on_update(direction, &watched, event);
        });

        let guard = match self.change_source.watch(&path, callback) {
            Ok(guard) => guard,
            Err(err) => {
                warn!(
                    event = events::SCHEMA_WATCHER_FAILED,
                    component = COMPONENT,
                    direction = ?direction,
                    path = %path.display(),
                    err = %err,
                    "unable to watch schema file, hot reload disabled"
                );
                return;
            }
        };

        let previous = self
            .watchers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(direction, guard);
        if let Some(mut previous) = previous {
            previous.close();
        }
        debug!(
            event = events::SCHEMA_WATCHER_INSTALLED,
            component = COMPONENT,
            direction = ?direction,
            path = %path.display(),
            "schema watcher installed"
        );
    }

    pub fn on_update(&self, direction: Direction, path: &Path, event: FileEvent) -> ReloadOutcome {
        self.state.on_update(direction, path, event)
    }

    /// Encodes a server-emitted message.
    pub fn encode(&self, route: &str, value: &Value) -> Result<Vec<u8>> {
        self.encode_with(Direction::Server, route, value)
    }

    /// Decodes a client-emitted message.
    pub fn decode(&self, route: &str, bytes: &[u8]) -> Result<Value> {
        self.decode_with(Direction::Client, route, bytes)
    }

    pub fn encode_with(&self, direction: Direction, route: &str, value: &Value) -> Result<Vec<u8>> {
        let table = self.state.slot(direction).table.load();
        codec::encode(&table, route, value)
    }

    pub fn decode_with(&self, direction: Direction, route: &str, bytes: &[u8]) -> Result<Value> {
        let table = self.state.slot(direction).table.load();
        codec::decode(&table, route, bytes)
    }

    /// Encodes against one snapshot of the server table; `None` when it has no schema for `route`.
    pub fn try_encode(&self, route: &str, value: &Value) -> Option<Result<Vec<u8>>> {
        let table = self.state.server.table.load();
        table
            .contains(route)
            .then(|| codec::encode(&table, route, value))
    }

    /// Decodes against one snapshot of the client table; `None` when it has no schema for `route`.
    pub fn try_decode(&self, route: &str, bytes: &[u8]) -> Option<Result<Value>> {
        let table = self.state.client.table.load();
        table
            .contains(route)
            .then(|| codec::decode(&table, route, bytes))
    }

    pub fn has_encoder(&self, route: &str) -> bool {
        self.state.server.table.load().contains(route)
    }

    pub fn has_decoder(&self, route: &str) -> bool {
        self.state.client.table.load().contains(route)
    }

    pub fn table(&self, direction: Direction) -> Arc<SchemaTable> {
        self.state.slot(direction).table.load_full()
    }

    pub fn slot_version(&self, direction: Direction) -> u64 {
        self.state.slot(direction).version.load(Ordering::SeqCst)
    }

    /// Newest modification time, in milliseconds, of any installed schema file.
    pub fn version(&self) -> u64 {
        self.slot_version(Direction::Server)
            .max(self.slot_version(Direction::Client))
    }

    pub fn protos(&self) -> ProtosSnapshot {
        ProtosSnapshot {
            server: self.table(Direction::Server),
            client: self.table(Direction::Client),
            version: self.version(),
        }
    }

    /// Closes every watcher. Safe to call more than once.
    pub fn stop(&self) {
        let drained: Vec<_> = self
            .watchers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain()
            .collect();
        for (_, mut guard) in drained {
            guard.close();
        }
    }

    pub fn active_watchers(&self) -> usize {
        self.watchers.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

impl Drop for SchemaRegistry {
    fn drop(&mut self) {
        self.stop();
    }
}

fn read_table(path: &Path) -> Result<(SchemaTable, u64)> {
    let shown = path.display().to_string();
    let data = std::fs::read_to_string(path).map_err(|source| SchemaError::Io {
        path: shown.clone(),
        source,
    })?;
    let raw: Value = serde_json::from_str(&data).map_err(|source| SchemaError::Json {
        path: shown,
        source,
    })?;
    let table = parse_schema(&raw)?;
    Ok((table, modified_millis(path)))
}

fn modified_millis(path: &Path) -> u64 {
    std::fs::metadata(path)
        .and_then(|meta| meta.modified())
        .ok()
        .and_then(|modified| modified.duration_since(UNIX_EPOCH).ok())
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or(0)
}
