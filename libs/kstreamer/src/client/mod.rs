// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Blocking control-protocol client.

mod connection;
mod correlator;
mod request;
mod topology_cache;
mod transaction;

pub use connection::Connection;
pub use correlator::ConnectionState;
pub use request::{Request, RequestBuilder, ResponseHandler};
pub use topology_cache::{SyncState, TopologyCache};
