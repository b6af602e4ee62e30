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

//! Push routing layer.
//!
//! Resolves logical user ids to live connections through the session registry,
//! keeps the per-session pending-push ledger, and issues one transport send per
//! push or broadcast.
//!
//! ```
//! use std::sync::Arc;
//! use async_trait::async_trait;
//! use pushgate::{
//!     LocalSessionRegistry, PushDistributor, PushTransport, SendFilter, SendOptions,
//!     TransportError,
//! };
//! use serde_json::{json, Value};
//!
//! struct NoopTransport;
//!
//! #[async_trait]
//! impl PushTransport for NoopTransport {
//!     async fn send(
//!         &self,
//!         _filter: Option<&SendFilter>,
//!         _route: &str,
//!         _message: &Value,
//!         _targets: Option<&[u64]>,
//!         _options: SendOptions,
//!     ) -> Result<(), TransportError> {
//!         Ok(())
//!     }
//! }
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let sessions = Arc::new(LocalSessionRegistry::new());
//! sessions.create(1);
//! sessions.bind(1, "u1");
//!
//! let distributor = PushDistributor::new(sessions, Arc::new(NoopTransport), 0);
//! let report = distributor
//!     .push_message(
//!         "onChat",
//!         json!({ "msg": "hi" }),
//!         &["u1".to_string(), "u2".to_string()],
//!         SendOptions::default(),
//!     )
//!     .await
//!     .unwrap();
//! assert_eq!(report.failed_uids, vec!["u2".to_string()]);
//! assert_eq!(report.targets, vec![1]);
//! # });
//! ```

pub(crate) mod push_distributor;
pub(crate) mod push_transport;
pub(crate) mod session;
