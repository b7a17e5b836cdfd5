// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Lifecycle hooks implemented by node and channel drivers.
//!
//! Every method defaults to a no-op, so a driver only overrides the stages
//! it cares about. Activation hooks may fail; deactivation hooks cannot.

use super::channel::Channel;
use super::node::Node;
use crate::error::Result;

/// Hooks of a graph endpoint.
///
/// `chan` is the channel leaving this node on the pipeline (none for the
/// sink), `prev` the channel entering it (none for the source).
pub trait NodeOps: Send + Sync {
    fn connect(&self, _node: &Node, _chan: Option<&Channel>, _prev: Option<&Channel>) -> Result<()> {
        Ok(())
    }

    fn disconnect(&self, _node: &Node, _chan: Option<&Channel>, _prev: Option<&Channel>) {}

    fn open(&self, _node: &Node, _chan: Option<&Channel>, _prev: Option<&Channel>) -> Result<()> {
        Ok(())
    }

    fn close(&self, _node: &Node, _chan: Option<&Channel>, _prev: Option<&Channel>) {}

    fn start(&self, _node: &Node, _chan: Option<&Channel>, _prev: Option<&Channel>) -> Result<()> {
        Ok(())
    }

    fn stop(&self, _node: &Node, _chan: Option<&Channel>, _prev: Option<&Channel>) {}

    fn stimulus(&self, _node: &Node, _chan: Option<&Channel>, _prev: Option<&Channel>) {}
}

/// Hooks of a directed link between two nodes.
pub trait ChannelOps: Send + Sync {
    fn connect(&self, _chan: &Channel) -> Result<()> {
        Ok(())
    }

    fn disconnect(&self, _chan: &Channel) {}

    fn open(&self, _chan: &Channel) -> Result<()> {
        Ok(())
    }

    fn close(&self, _chan: &Channel) {}

    fn start(&self, _chan: &Channel) -> Result<()> {
        Ok(())
    }

    fn stop(&self, _chan: &Channel) {}

    fn stimulus(&self, _chan: &Channel) {}
}

/// Driver with no hooks.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopOps;

impl NodeOps for NoopOps {}

impl ChannelOps for NoopOps {}
