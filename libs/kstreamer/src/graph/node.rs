// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use std::fmt;
use std::sync::Arc;

use super::hooks::{NodeOps, NoopOps};

pub type NodeId = u32;

/// Addressable endpoint of the graph.
///
/// Nodes are shared by every pipeline whose path crosses them.
pub struct Node {
    id: NodeId,
    name: String,
    ops: Arc<dyn NodeOps>,
}

impl Node {
    pub fn new(id: NodeId, name: impl Into<String>, ops: Arc<dyn NodeOps>) -> Self {
        Self {
            id,
            name: name.into(),
            ops,
        }
    }

    /// Node without hooks.
    pub fn passive(id: NodeId, name: impl Into<String>) -> Self {
        Self::new(id, name, Arc::new(NoopOps))
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn ops(&self) -> &dyn NodeOps {
        self.ops.as_ref()
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.id)
            .field("name", &self.name)
            .finish()
    }
}
