// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use std::collections::BTreeMap;

use kstreamer_wire::{Message, MessageType};

use crate::error::Result;
use crate::graph::{ChannelInfo, NodeInfo, PipelineId, PipelineInfo, TopologySnapshot};
use crate::protocol;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    NotSynched,
    /// Initial dump in progress; broadcasts are dropped.
    Synching,
    Synched,
}

/// Client-side mirror of the server topology, kept current by the
/// topology-group broadcasts.
pub struct TopologyCache {
    state: SyncState,
    nodes: Vec<NodeInfo>,
    channels: Vec<ChannelInfo>,
    pipelines: BTreeMap<PipelineId, PipelineInfo>,
    /// Broadcasts dropped because the cache was not synched.
    dropped: u64,
    last_seq: Option<u32>,
}

impl Default for TopologyCache {
    fn default() -> Self {
        Self::new()
    }
}

impl TopologyCache {
    pub fn new() -> Self {
        Self {
            state: SyncState::NotSynched,
            nodes: Vec::new(),
            channels: Vec::new(),
            pipelines: BTreeMap::new(),
            dropped: 0,
            last_seq: None,
        }
    }

    pub fn state(&self) -> SyncState {
        self.state
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Sequence number of the last applied broadcast.
    pub fn last_seq(&self) -> Option<u32> {
        self.last_seq
    }

    pub fn begin_sync(&mut self) {
        self.state = SyncState::Synching;
    }

    /// Install a full dump and start applying broadcasts.
    pub fn finish_sync(
        &mut self,
        nodes: Vec<NodeInfo>,
        channels: Vec<ChannelInfo>,
        pipelines: Vec<PipelineInfo>,
    ) {
        self.nodes = nodes;
        self.channels = channels;
        self.pipelines = pipelines.into_iter().map(|p| (p.id, p)).collect();
        self.state = SyncState::Synched;
        tracing::debug!(
            "[Client] Topology synched: {} nodes, {} channels, {} pipelines",
            self.nodes.len(),
            self.channels.len(),
            self.pipelines.len()
        );
    }

    pub fn reset(&mut self) {
        *self = Self {
            dropped: self.dropped,
            ..Self::new()
        };
    }

    /// Apply one topology broadcast.
    pub fn apply(&mut self, message: &Message) -> Result<()> {
        if self.state != SyncState::Synched {
            self.dropped += 1;
            tracing::debug!("[Client] Dropping {} while {:?}", message, self.state);
            return Ok(());
        }

        match message.kind() {
            Some(MessageType::PipelineNew) | Some(MessageType::PipelineSet) => {
                let info = protocol::parse_pipeline(message)?;
                self.set_channel_owner(&info);
                self.pipelines.insert(info.id, info);
            }
            Some(MessageType::PipelineDel) => {
                let info = protocol::parse_pipeline(message)?;
                if let Some(removed) = self.pipelines.remove(&info.id) {
                    for chan in self.channels.iter_mut() {
                        if removed.channels.contains(&chan.id) {
                            chan.pipeline = None;
                        }
                    }
                }
            }
            _ => {
                tracing::warn!("[Client] Ignoring unexpected broadcast {}", message);
                return Ok(());
            }
        }
        self.last_seq = Some(message.seq());
        Ok(())
    }

    fn set_channel_owner(&mut self, info: &PipelineInfo) {
        for chan in self.channels.iter_mut() {
            if info.channels.contains(&chan.id) {
                chan.pipeline = Some(info.id);
            }
        }
    }

    pub fn pipeline(&self, id: PipelineId) -> Option<&PipelineInfo> {
        self.pipelines.get(&id)
    }

    pub fn pipelines(&self) -> Vec<PipelineInfo> {
        self.pipelines.values().cloned().collect()
    }

    pub fn snapshot(&self) -> TopologySnapshot {
        TopologySnapshot {
            nodes: self.nodes.clone(),
            channels: self.channels.clone(),
            pipelines: self.pipelines(),
        }
    }
}
