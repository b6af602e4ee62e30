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

//! Control-plane layer.
//!
//! Owns the route table: discovery of served routes at startup and the
//! deterministic route <-> code dictionary built from them. The dictionary is
//! built once and never replaced while the process runs.
//!
//! ```
//! use pushgate::{HandlerRegistration, RouteDictionary, StaticRouteDiscovery};
//!
//! let discovery = StaticRouteDiscovery::new(vec![
//!     HandlerRegistration::new("foo", "bar", "baz"),
//!     HandlerRegistration::new("a", "b", "c"),
//! ]);
//! let dictionary = RouteDictionary::from_discovery(&discovery, None).unwrap();
//!
//! assert_eq!(dictionary.route_code("a.b.c"), Some(1));
//! assert_eq!(dictionary.route_code("foo.bar.baz"), Some(2));
//! ```

pub(crate) mod route_dictionary;
pub(crate) mod route_discovery;
