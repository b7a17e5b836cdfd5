// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

use super::channel::{Channel, ChannelId};
use super::info::PipelineInfo;
use super::node::Node;
use crate::error::{KsError, Result};

pub type PipelineId = u32;

/// Activation stage of a pipeline. Ordered by rank.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub enum PipelineStatus {
    #[default]
    Null = 0,
    Connected = 1,
    Open = 2,
    Flowing = 3,
}

impl PipelineStatus {
    pub fn rank(self) -> u32 {
        self as u32
    }

    pub fn from_rank(rank: u32) -> Option<Self> {
        match rank {
            0 => Some(Self::Null),
            1 => Some(Self::Connected),
            2 => Some(Self::Open),
            3 => Some(Self::Flowing),
            _ => None,
        }
    }

    /// Next stage up, `None` at FLOWING.
    pub fn up(self) -> Option<Self> {
        Self::from_rank(self.rank() + 1)
    }

    /// Next stage down, `None` at NULL.
    pub fn down(self) -> Option<Self> {
        self.rank().checked_sub(1).and_then(Self::from_rank)
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Null => "NULL",
            Self::Connected => "CONNECTED",
            Self::Open => "OPEN",
            Self::Flowing => "FLOWING",
        }
    }
}

impl fmt::Display for PipelineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Ordered path of channels from a source node to a sink node.
///
/// The channel sequence sits behind its own read-write lock. Hook walks hold
/// the read side across one hook call at a time; membership changes take the
/// write side.
pub struct Pipeline {
    /// 0 until registered.
    id: AtomicU32,
    /// Committed status, published when a status change finishes.
    status: RwLock<PipelineStatus>,
    /// Negotiated during the OPEN step, cleared when leaving OPEN.
    mtu: RwLock<Option<u32>>,
    pub(super) entries: RwLock<Vec<Arc<Channel>>>,
    /// Serializes status changes on this pipeline.
    pub(super) transition: Mutex<()>,
}

impl Pipeline {
    /// New unregistered pipeline with no channels and status NULL.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            id: AtomicU32::new(0),
            status: RwLock::new(PipelineStatus::Null),
            mtu: RwLock::new(None),
            entries: RwLock::new(Vec::new()),
            transition: Mutex::new(()),
        })
    }

    /// Registry id, `None` while unregistered.
    pub fn id(&self) -> Option<PipelineId> {
        match self.id.load(Ordering::Acquire) {
            0 => None,
            id => Some(id),
        }
    }

    /// Id for log lines.
    pub(crate) fn label(&self) -> String {
        self.id()
            .map(|id| id.to_string())
            .unwrap_or_else(|| "(unregistered)".to_string())
    }

    pub(crate) fn set_id(&self, id: PipelineId) {
        self.id.store(id, Ordering::Release);
    }

    pub fn status(&self) -> PipelineStatus {
        *self.status.read()
    }

    pub(super) fn commit_status(&self, status: PipelineStatus) {
        *self.status.write() = status;
    }

    /// Negotiated MTU. Set from the OPEN step on.
    pub fn mtu(&self) -> Option<u32> {
        *self.mtu.read()
    }

    pub(super) fn set_mtu(&self, mtu: Option<u32>) {
        *self.mtu.write() = mtu;
    }

    /// Append `chan` to the path.
    ///
    /// Only a NULL pipeline accepts new members; a channel owned by another
    /// pipeline is a conflict.
    pub fn attach(self: &Arc<Self>, chan: &Arc<Channel>) -> Result<()> {
        let _transition = self.transition.lock();
        if self.status() != PipelineStatus::Null {
            return Err(KsError::Invalid(format!(
                "cannot attach channel {} to a pipeline in status {}",
                chan.id(),
                self.status()
            )));
        }
        let mut entries = self.entries.write();
        chan.claim(self)?;
        entries.push(Arc::clone(chan));
        Ok(())
    }

    /// Drop every member channel and clear their back-references.
    pub fn detach_all(&self) -> usize {
        let _transition = self.transition.lock();
        let detached = std::mem::take(&mut *self.entries.write());
        for chan in &detached {
            chan.release(self);
        }
        detached.len()
    }

    pub fn channels(&self) -> Vec<Arc<Channel>> {
        self.entries.read().clone()
    }

    pub fn channel_ids(&self) -> Vec<ChannelId> {
        self.entries.read().iter().map(|c| c.id()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn first_channel(&self) -> Option<Arc<Channel>> {
        self.entries.read().first().cloned()
    }

    pub fn last_channel(&self) -> Option<Arc<Channel>> {
        self.entries.read().last().cloned()
    }

    pub fn source_node(&self) -> Option<Arc<Node>> {
        self.first_channel().map(|c| Arc::clone(c.from()))
    }

    pub fn sink_node(&self) -> Option<Arc<Node>> {
        self.last_channel().map(|c| Arc::clone(c.to()))
    }

    pub fn prev_channel(&self, chan: &Channel) -> Option<Arc<Channel>> {
        let entries = self.entries.read();
        let pos = entries.iter().position(|c| c.id() == chan.id())?;
        pos.checked_sub(1).and_then(|i| entries.get(i).cloned())
    }

    pub fn next_channel(&self, chan: &Channel) -> Option<Arc<Channel>> {
        let entries = self.entries.read();
        let pos = entries.iter().position(|c| c.id() == chan.id())?;
        entries.get(pos + 1).cloned()
    }

    /// One-line rendering of the path: `from/chan => from/chan => sink`.
    pub fn describe(&self) -> String {
        let entries = self.entries.read();
        let mut hops: Vec<String> = entries
            .iter()
            .map(|c| format!("{}/{}", c.from().name(), c.name()))
            .collect();
        if let Some(last) = entries.last() {
            hops.push(last.to().name().to_string());
        }
        hops.join(" => ")
    }

    /// Snapshot of the externally visible state.
    pub fn info(&self) -> PipelineInfo {
        let status = self.status();
        PipelineInfo {
            id: self.id().unwrap_or(0),
            status,
            mtu: if status >= PipelineStatus::Open {
                self.mtu()
            } else {
                None
            },
            channels: self.channel_ids(),
        }
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        let me: *const Pipeline = self;
        for chan in self.entries.get_mut().drain(..) {
            chan.release(me);
        }
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("id", &self.id())
            .field("status", &self.status())
            .field("channels", &self.channel_ids())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::channel::Mtu;

    fn chain(names: &[&str]) -> Vec<Arc<Channel>> {
        let nodes: Vec<Arc<Node>> = names
            .iter()
            .enumerate()
            .map(|(i, n)| Arc::new(Node::passive(i as u32 + 1, *n)))
            .collect();
        nodes
            .windows(2)
            .enumerate()
            .map(|(i, pair)| {
                Arc::new(Channel::passive(
                    i as u32 + 100,
                    format!("c{}", i + 1),
                    Arc::clone(&pair[0]),
                    Arc::clone(&pair[1]),
                    Mtu::Unbounded,
                ))
            })
            .collect()
    }

    #[test]
    fn test_status_ranks() {
        assert_eq!(PipelineStatus::Null.up(), Some(PipelineStatus::Connected));
        assert_eq!(PipelineStatus::Flowing.up(), None);
        assert_eq!(PipelineStatus::Null.down(), None);
        assert_eq!(PipelineStatus::Open.down(), Some(PipelineStatus::Connected));
        assert_eq!(PipelineStatus::from_rank(4), None);
        assert!(PipelineStatus::Open > PipelineStatus::Connected);
    }

    #[test]
    fn test_navigation_and_description() {
        let chans = chain(&["e1", "switch", "netdev"]);
        let pipeline = Pipeline::new();
        for chan in &chans {
            pipeline.attach(chan).unwrap();
        }

        assert_eq!(pipeline.len(), 2);
        assert_eq!(pipeline.source_node().unwrap().name(), "e1");
        assert_eq!(pipeline.sink_node().unwrap().name(), "netdev");
        assert_eq!(pipeline.next_channel(&chans[0]).unwrap().id(), chans[1].id());
        assert!(pipeline.prev_channel(&chans[0]).is_none());
        assert_eq!(pipeline.describe(), "e1/c1 => switch/c2 => netdev");
    }

    #[test]
    fn test_dropping_pipeline_frees_channels() {
        let chans = chain(&["a", "b"]);
        let pipeline = Pipeline::new();
        pipeline.attach(&chans[0]).unwrap();
        assert!(chans[0].is_attached());

        drop(pipeline);
        assert!(!chans[0].is_attached());
        Pipeline::new().attach(&chans[0]).unwrap();
    }

    #[test]
    fn test_detach_all() {
        let chans = chain(&["a", "b", "c"]);
        let pipeline = Pipeline::new();
        for chan in &chans {
            pipeline.attach(chan).unwrap();
        }

        assert_eq!(pipeline.detach_all(), 2);
        assert!(pipeline.is_empty());
        assert!(chans.iter().all(|c| !c.is_attached()));
    }
}
