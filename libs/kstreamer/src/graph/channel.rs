// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use super::hooks::{ChannelOps, NoopOps};
use super::node::Node;
use super::pipeline::{Pipeline, PipelineId};
use crate::error::{KsError, Result};

pub type ChannelId = u32;

/// Largest payload a channel can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Mtu {
    Bounded(u32),
    Unbounded,
}

impl Mtu {
    /// Signed wire form; -1 is unbounded.
    pub fn to_wire(self) -> i32 {
        match self {
            Self::Bounded(mtu) => mtu.min(i32::MAX as u32) as i32,
            Self::Unbounded => -1,
        }
    }

    pub fn from_wire(value: i32) -> Self {
        if value < 0 {
            Self::Unbounded
        } else {
            Self::Bounded(value as u32)
        }
    }

    pub fn bound(self) -> Option<u32> {
        match self {
            Self::Bounded(mtu) => Some(mtu),
            Self::Unbounded => None,
        }
    }
}

/// Directed link from one node to another.
///
/// A channel belongs to at most one pipeline. The back-reference is weak so
/// that it never keeps its pipeline alive.
pub struct Channel {
    id: ChannelId,
    name: String,
    from: Arc<Node>,
    to: Arc<Node>,
    mtu: Mtu,
    ops: Arc<dyn ChannelOps>,
    pipeline: Mutex<Option<Weak<Pipeline>>>,
}

impl Channel {
    pub fn new(
        id: ChannelId,
        name: impl Into<String>,
        from: Arc<Node>,
        to: Arc<Node>,
        mtu: Mtu,
        ops: Arc<dyn ChannelOps>,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            from,
            to,
            mtu,
            ops,
            pipeline: Mutex::new(None),
        }
    }

    /// Channel without hooks.
    pub fn passive(
        id: ChannelId,
        name: impl Into<String>,
        from: Arc<Node>,
        to: Arc<Node>,
        mtu: Mtu,
    ) -> Self {
        Self::new(id, name, from, to, mtu, Arc::new(NoopOps))
    }

    pub fn id(&self) -> ChannelId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn from(&self) -> &Arc<Node> {
        &self.from
    }

    pub fn to(&self) -> &Arc<Node> {
        &self.to
    }

    pub fn mtu(&self) -> Mtu {
        self.mtu
    }

    pub(crate) fn ops(&self) -> &dyn ChannelOps {
        self.ops.as_ref()
    }

    /// Pipeline this channel currently belongs to.
    pub fn pipeline(&self) -> Option<Arc<Pipeline>> {
        self.pipeline.lock().as_ref().and_then(Weak::upgrade)
    }

    pub fn pipeline_id(&self) -> Option<PipelineId> {
        self.pipeline().and_then(|p| p.id())
    }

    pub fn is_attached(&self) -> bool {
        self.pipeline().is_some()
    }

    /// Record `owner` as this channel's pipeline. Fails if another live
    /// pipeline already holds it.
    pub(crate) fn claim(&self, owner: &Arc<Pipeline>) -> Result<()> {
        // The current owner must not be dropped under the slot lock: its
        // Drop releases this channel.
        let current = {
            let mut slot = self.pipeline.lock();
            match slot.as_ref().and_then(Weak::upgrade) {
                Some(current) => current,
                None => {
                    *slot = Some(Arc::downgrade(owner));
                    return Ok(());
                }
            }
        };
        Err(KsError::Conflict(format!(
            "channel {} already belongs to pipeline {}",
            self.id,
            current.label()
        )))
    }

    /// Clear the back-reference if it still names `owner`.
    pub(crate) fn release(&self, owner: *const Pipeline) {
        let mut slot = self.pipeline.lock();
        if slot.as_ref().is_some_and(|w| std::ptr::eq(w.as_ptr(), owner)) {
            *slot = None;
        }
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("from", &self.from.id())
            .field("to", &self.to.id())
            .field("mtu", &self.mtu)
            .finish()
    }
}
