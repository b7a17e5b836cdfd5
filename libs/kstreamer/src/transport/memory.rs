// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, unbounded};
use parking_lot::RwLock;

use super::{Datagram, GroupId, PortId, Transport};
use crate::error::{KsError, Result};

#[derive(Default)]
struct BusInner {
    ports: RwLock<HashMap<PortId, Sender<Datagram>>>,
    groups: RwLock<HashMap<GroupId, BTreeSet<PortId>>>,
}

/// In-process datagram bus.
///
/// Each bound endpoint owns an inbox channel; sends are ordered per sender.
#[derive(Clone, Default)]
pub struct MemoryBus {
    inner: Arc<BusInner>,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind an endpoint at `port`.
    pub fn bind(&self, port: PortId) -> Result<MemoryEndpoint> {
        let mut ports = self.inner.ports.write();
        if ports.contains_key(&port) {
            return Err(KsError::Conflict(format!("port {} already bound", port)));
        }
        let (tx, rx) = unbounded();
        ports.insert(port, tx);
        Ok(MemoryEndpoint {
            port,
            bus: Arc::clone(&self.inner),
            inbox: rx,
        })
    }

    /// Bind an endpoint at the lowest free non-zero port.
    pub fn bind_any(&self) -> Result<MemoryEndpoint> {
        let port = {
            let ports = self.inner.ports.read();
            (1..=PortId::MAX)
                .find(|p| !ports.contains_key(p))
                .ok_or_else(|| KsError::ResourceExhausted("no free port".into()))?
        };
        self.bind(port)
    }
}

/// Endpoint bound on a [`MemoryBus`]. Unbinds on drop.
pub struct MemoryEndpoint {
    port: PortId,
    bus: Arc<BusInner>,
    inbox: Receiver<Datagram>,
}

impl Transport for MemoryEndpoint {
    fn local_port(&self) -> PortId {
        self.port
    }

    fn send(&self, dest: PortId, payload: Bytes) -> Result<()> {
        let ports = self.bus.ports.read();
        let tx = ports
            .get(&dest)
            .ok_or_else(|| KsError::Unavailable(format!("port {} not bound", dest)))?;
        tx.send(Datagram {
            source: self.port,
            group: None,
            payload,
        })
        .map_err(|_| KsError::Transport(format!("port {} closed", dest)))
    }

    fn broadcast(&self, group: GroupId, payload: Bytes) -> Result<()> {
        let members: Vec<PortId> = self
            .bus
            .groups
            .read()
            .get(&group)
            .map(|m| m.iter().copied().collect())
            .unwrap_or_default();

        let ports = self.bus.ports.read();
        for member in members {
            if let Some(tx) = ports.get(&member) {
                // A member that went away mid-broadcast is not an error.
                let _ = tx.send(Datagram {
                    source: self.port,
                    group: Some(group),
                    payload: payload.clone(),
                });
            }
        }
        Ok(())
    }

    fn subscribe(&self, group: GroupId) -> Result<()> {
        self.bus
            .groups
            .write()
            .entry(group)
            .or_default()
            .insert(self.port);
        Ok(())
    }

    fn unsubscribe(&self, group: GroupId) -> Result<()> {
        if let Some(members) = self.bus.groups.write().get_mut(&group) {
            members.remove(&self.port);
        }
        Ok(())
    }

    fn recv_timeout(&self, timeout: Duration) -> Result<Option<Datagram>> {
        match self.inbox.recv_timeout(timeout) {
            Ok(datagram) => Ok(Some(datagram)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => {
                Err(KsError::Transport(format!("port {} unbound", self.port)))
            }
        }
    }
}

impl Drop for MemoryEndpoint {
    fn drop(&mut self) {
        self.bus.ports.write().remove(&self.port);
        for members in self.bus.groups.write().values_mut() {
            members.remove(&self.port);
        }
    }
}
