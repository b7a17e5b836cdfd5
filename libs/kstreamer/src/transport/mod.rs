// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Datagram transport between the control server and its clients.

mod memory;

use std::time::Duration;

use bytes::Bytes;

use crate::error::Result;

pub use memory::{MemoryBus, MemoryEndpoint};

/// Address of a transport endpoint.
pub type PortId = u32;

/// Multicast group id.
pub type GroupId = u32;

/// One received datagram.
#[derive(Debug, Clone)]
pub struct Datagram {
    /// Port of the sender.
    pub source: PortId,
    /// Group it was broadcast on, `None` for unicast.
    pub group: Option<GroupId>,
    pub payload: Bytes,
}

/// Unreliable, message-preserving datagram endpoint with multicast groups.
///
/// Delivery between one pair of endpoints is ordered.
pub trait Transport: Send + Sync {
    fn local_port(&self) -> PortId;

    fn send(&self, dest: PortId, payload: Bytes) -> Result<()>;

    /// Deliver to every subscriber of `group`.
    fn broadcast(&self, group: GroupId, payload: Bytes) -> Result<()>;

    fn subscribe(&self, group: GroupId) -> Result<()>;

    fn unsubscribe(&self, group: GroupId) -> Result<()>;

    /// Wait up to `timeout` for the next datagram. `Ok(None)` on timeout.
    fn recv_timeout(&self, timeout: Duration) -> Result<Option<Datagram>>;
}
