// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Resource graph: nodes, channels, pipelines and the registry that lists
//! them.

mod channel;
mod events;
mod hooks;
mod info;
mod lifecycle;
mod node;
mod pipeline;
mod registry;

pub use channel::{Channel, ChannelId, Mtu};
pub use events::{TopologyEvent, TopologyListener};
pub use hooks::{ChannelOps, NodeOps, NoopOps};
pub use info::{ChannelInfo, NodeInfo, PipelineInfo, TopologySnapshot};
pub use lifecycle::DEFAULT_MTU;
pub use node::{Node, NodeId};
pub use pipeline::{Pipeline, PipelineId, PipelineStatus};
pub use registry::{MAX_PIPELINE_ID, Registry};

pub(crate) use registry::channel_info;
