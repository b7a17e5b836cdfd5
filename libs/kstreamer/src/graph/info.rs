// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Plain-data views of graph objects.
//!
//! These are what travels over the wire, what the client topology cache
//! stores, and what diagnostic dumps serialize.

use serde::{Deserialize, Serialize};

use super::channel::{ChannelId, Mtu};
use super::node::NodeId;
use super::pipeline::{PipelineId, PipelineStatus};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub id: NodeId,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelInfo {
    pub id: ChannelId,
    pub name: String,
    pub from: NodeId,
    pub to: NodeId,
    pub mtu: Mtu,
    pub pipeline: Option<PipelineId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineInfo {
    pub id: PipelineId,
    pub status: PipelineStatus,
    /// Present once the pipeline is OPEN or above.
    pub mtu: Option<u32>,
    /// Member channels in path order.
    pub channels: Vec<ChannelId>,
}

/// Whole-registry dump.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopologySnapshot {
    pub nodes: Vec<NodeInfo>,
    pub channels: Vec<ChannelInfo>,
    pub pipelines: Vec<PipelineInfo>,
}
