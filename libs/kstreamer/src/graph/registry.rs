// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use super::channel::{Channel, ChannelId, Mtu};
use super::events::{TopologyEvent, TopologyListener};
use super::hooks::ChannelOps;
use super::info::{ChannelInfo, NodeInfo, TopologySnapshot};
use super::node::{Node, NodeId};
use super::pipeline::{Pipeline, PipelineId, PipelineStatus};
use crate::error::{KsError, Result};

/// Largest pipeline id; ids live in the positive signed 32-bit range.
pub const MAX_PIPELINE_ID: PipelineId = i32::MAX as PipelineId;

/// Directory of nodes, channels and registered pipelines.
///
/// Holds one reference to every listed pipeline. Lookups hand out further
/// references that are released when dropped.
pub struct Registry {
    nodes: RwLock<BTreeMap<NodeId, Arc<Node>>>,
    channels: RwLock<BTreeMap<ChannelId, Arc<Channel>>>,
    /// Registered pipelines in registration order.
    pipelines: RwLock<Vec<Arc<Pipeline>>>,
    /// Id the next allocation tries first.
    next_id: Mutex<PipelineId>,
    listener: RwLock<Option<Arc<dyn TopologyListener>>>,
}

impl Registry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            nodes: RwLock::new(BTreeMap::new()),
            channels: RwLock::new(BTreeMap::new()),
            pipelines: RwLock::new(Vec::new()),
            next_id: Mutex::new(1),
            listener: RwLock::new(None),
        })
    }

    pub fn set_listener(&self, listener: Arc<dyn TopologyListener>) {
        *self.listener.write() = Some(listener);
    }

    pub fn clear_listener(&self) {
        *self.listener.write() = None;
    }

    fn publish(&self, event: TopologyEvent) {
        let listener = self.listener.read().clone();
        if let Some(listener) = listener {
            listener.on_topology_event(&event);
        }
    }

    // ---- nodes and channels ----

    pub fn add_node(&self, node: Node) -> Result<Arc<Node>> {
        let mut nodes = self.nodes.write();
        if nodes.contains_key(&node.id()) {
            return Err(KsError::Conflict(format!(
                "node {} already registered",
                node.id()
            )));
        }
        let node = Arc::new(node);
        nodes.insert(node.id(), Arc::clone(&node));
        tracing::debug!("[Topology] Added node {} ({})", node.id(), node.name());
        Ok(node)
    }

    /// Register a channel between two known nodes.
    pub fn add_channel(
        &self,
        id: ChannelId,
        name: impl Into<String>,
        from: NodeId,
        to: NodeId,
        mtu: Mtu,
        ops: Arc<dyn ChannelOps>,
    ) -> Result<Arc<Channel>> {
        let from = self
            .node(from)
            .ok_or_else(|| KsError::Unavailable(format!("node {} not registered", from)))?;
        let to = self
            .node(to)
            .ok_or_else(|| KsError::Unavailable(format!("node {} not registered", to)))?;

        let mut channels = self.channels.write();
        if channels.contains_key(&id) {
            return Err(KsError::Conflict(format!(
                "channel {} already registered",
                id
            )));
        }
        let chan = Arc::new(Channel::new(id, name, from, to, mtu, ops));
        channels.insert(id, Arc::clone(&chan));
        tracing::debug!(
            "[Topology] Added channel {} ({}): {} -> {}",
            chan.id(),
            chan.name(),
            chan.from().name(),
            chan.to().name()
        );
        Ok(chan)
    }

    pub fn node(&self, id: NodeId) -> Option<Arc<Node>> {
        self.nodes.read().get(&id).cloned()
    }

    pub fn channel(&self, id: ChannelId) -> Option<Arc<Channel>> {
        self.channels.read().get(&id).cloned()
    }

    pub fn nodes(&self) -> Vec<Arc<Node>> {
        self.nodes.read().values().cloned().collect()
    }

    pub fn channels(&self) -> Vec<Arc<Channel>> {
        self.channels.read().values().cloned().collect()
    }

    // ---- pipelines ----

    /// New unregistered pipeline.
    pub fn create(&self) -> Arc<Pipeline> {
        Pipeline::new()
    }

    /// List `pipeline` under the next id no listed pipeline holds.
    ///
    /// Allocation moves forward from the last id handed out and wraps back
    /// to 1, so a freed id is only reused after a full lap.
    pub fn register(&self, pipeline: &Arc<Pipeline>) -> Result<PipelineId> {
        let id = {
            let mut pipelines = self.pipelines.write();
            if pipelines.iter().any(|p| Arc::ptr_eq(p, pipeline)) {
                return Err(KsError::Invalid(format!(
                    "pipeline {} is already registered",
                    pipeline.label()
                )));
            }

            let taken: HashSet<PipelineId> = pipelines.iter().filter_map(|p| p.id()).collect();
            let mut next_id = self.next_id.lock();
            let id = next_free_id(*next_id, &taken)
                .ok_or_else(|| KsError::ResourceExhausted("pipeline id space exhausted".into()))?;
            *next_id = wrap_id(id);

            pipeline.set_id(id);
            pipelines.push(Arc::clone(pipeline));
            id
        };

        tracing::debug!("[Topology] Registered pipeline {}", id);
        self.publish(TopologyEvent::PipelineNew(pipeline.info()));
        Ok(id)
    }

    pub fn get_by_id(&self, id: PipelineId) -> Result<Arc<Pipeline>> {
        self.pipelines
            .read()
            .iter()
            .find(|p| p.id() == Some(id))
            .cloned()
            .ok_or_else(|| KsError::NotFound(format!("pipeline {} not found", id)))
    }

    /// Force `pipeline` to NULL, delist it and free its channels.
    pub fn unregister(&self, pipeline: &Arc<Pipeline>) -> Result<()> {
        pipeline.change_status(PipelineStatus::Null)?;

        {
            let mut pipelines = self.pipelines.write();
            let pos = pipelines
                .iter()
                .position(|p| Arc::ptr_eq(p, pipeline))
                .ok_or_else(|| {
                    KsError::NotFound(format!("pipeline {} not registered", pipeline.label()))
                })?;
            pipelines.remove(pos);
        }

        let info = pipeline.info();
        pipeline.detach_all();
        tracing::debug!("[Topology] Unregistered pipeline {}", pipeline.label());
        self.publish(TopologyEvent::PipelineDeleted(info));
        Ok(())
    }

    /// Publish that a listed pipeline changed status.
    pub fn notify_changed(&self, pipeline: &Pipeline) {
        self.publish(TopologyEvent::PipelineChanged(pipeline.info()));
    }

    /// Listed pipelines in registration order.
    pub fn pipelines(&self) -> Vec<Arc<Pipeline>> {
        self.pipelines.read().clone()
    }

    pub fn pipeline_count(&self) -> usize {
        self.pipelines.read().len()
    }

    /// Pipeline that owns channel `id`.
    pub fn pipeline_of(&self, id: ChannelId) -> Option<Arc<Pipeline>> {
        self.channel(id).and_then(|c| c.pipeline())
    }

    // ---- dumps ----

    pub fn snapshot(&self) -> TopologySnapshot {
        TopologySnapshot {
            nodes: self
                .nodes()
                .iter()
                .map(|n| NodeInfo {
                    id: n.id(),
                    name: n.name().to_string(),
                })
                .collect(),
            channels: self.channels().iter().map(|c| channel_info(c)).collect(),
            pipelines: self.pipelines().iter().map(|p| p.info()).collect(),
        }
    }

    pub fn snapshot_json(&self) -> Result<String> {
        serde_json::to_string_pretty(&self.snapshot())
            .map_err(|e| KsError::Other(anyhow::anyhow!("failed to serialize topology: {}", e)))
    }
}

pub(crate) fn channel_info(chan: &Channel) -> ChannelInfo {
    ChannelInfo {
        id: chan.id(),
        name: chan.name().to_string(),
        from: chan.from().id(),
        to: chan.to().id(),
        mtu: chan.mtu(),
        pipeline: chan.pipeline_id(),
    }
}

/// Id after `id`, wrapping past [`MAX_PIPELINE_ID`] to 1.
fn wrap_id(id: PipelineId) -> PipelineId {
    if id >= MAX_PIPELINE_ID { 1 } else { id + 1 }
}

/// First id at or after `start` not in `taken`, scanning one full lap.
fn next_free_id(start: PipelineId, taken: &HashSet<PipelineId>) -> Option<PipelineId> {
    if taken.len() >= MAX_PIPELINE_ID as usize {
        return None;
    }
    let mut id = start.clamp(1, MAX_PIPELINE_ID);
    for _ in 0..MAX_PIPELINE_ID {
        if !taken.contains(&id) {
            return Some(id);
        }
        id = wrap_id(id);
    }
    None
}
