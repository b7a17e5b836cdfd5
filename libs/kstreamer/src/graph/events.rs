// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use super::info::PipelineInfo;

/// Structural change published by the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopologyEvent {
    PipelineNew(PipelineInfo),
    PipelineChanged(PipelineInfo),
    PipelineDeleted(PipelineInfo),
}

impl TopologyEvent {
    pub fn pipeline(&self) -> &PipelineInfo {
        match self {
            Self::PipelineNew(info) | Self::PipelineChanged(info) | Self::PipelineDeleted(info) => {
                info
            }
        }
    }
}

/// Observer of registry changes.
///
/// Called synchronously on the mutating thread, after the change is visible.
pub trait TopologyListener: Send + Sync {
    fn on_topology_event(&self, event: &TopologyEvent);
}
