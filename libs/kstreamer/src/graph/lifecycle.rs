// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Pipeline lifecycle state machine.
//!
//! A status change is decomposed into single-rank steps. An upward step
//! walks the path calling, for each channel, the hook of its `from` node and
//! then the channel's own hook, and finishes with the sink node. A downward
//! step walks the same order calling the channel hook first and the node
//! hook second. Downward hooks cannot fail.

use std::sync::Arc;

use super::channel::Channel;
use super::node::Node;
use super::pipeline::{Pipeline, PipelineStatus};
use crate::error::{KsError, Result};

/// MTU reported when no member channel is bounded.
pub const DEFAULT_MTU: u32 = 65536;

impl Pipeline {
    /// Drive the pipeline to `target`.
    ///
    /// On failure every hook this call invoked has been unwound and the
    /// status is the one held before the call.
    pub fn change_status(&self, target: PipelineStatus) -> Result<()> {
        let _transition = self.transition.lock();

        let origin = self.status();
        if origin == target {
            return Ok(());
        }

        let mut current = origin;
        while current < target {
            let Some(next) = current.up() else { break };
            if let Err(err) = self.step_up(next) {
                tracing::debug!(
                    "[Pipeline] Pipeline {} failed to enter {}: {}",
                    self.label(),
                    next,
                    err
                );
                while current > origin {
                    let Some(lower) = current.down() else { break };
                    self.step_down(current);
                    current = lower;
                }
                return Err(err);
            }
            tracing::debug!(
                "[Pipeline] Pipeline {} changed status from {} to {}",
                self.label(),
                current,
                next
            );
            current = next;
        }

        while current > target {
            let Some(lower) = current.down() else { break };
            self.step_down(current);
            tracing::debug!(
                "[Pipeline] Pipeline {} changed status from {} to {}",
                self.label(),
                current,
                lower
            );
            current = lower;
        }

        self.commit_status(current);
        Ok(())
    }

    /// Invoke the stimulus hook along the path. Status is not touched.
    pub fn stimulate(&self) {
        let mut prev: Option<Arc<Channel>> = None;
        let mut index = 0;
        loop {
            let entries = self.entries.read();
            let Some(chan) = entries.get(index).cloned() else { break };
            chan.ops().stimulus(&chan);
            let from = chan.from();
            from.ops().stimulus(from, Some(&chan), prev.as_deref());
            drop(entries);

            prev = Some(chan);
            index += 1;
        }

        if let Some(last) = prev {
            let _entries = self.entries.read();
            let sink = last.to();
            sink.ops().stimulus(sink, None, Some(&last));
        }
    }

    /// Smallest bounded MTU among member channels.
    pub fn negotiate_mtu(&self) -> u32 {
        self.entries
            .read()
            .iter()
            .filter_map(|c| c.mtu().bound())
            .min()
            .unwrap_or(DEFAULT_MTU)
    }

    fn step_up(&self, stage: PipelineStatus) -> Result<()> {
        if stage == PipelineStatus::Open {
            self.set_mtu(Some(self.negotiate_mtu()));
        }

        let mut prev: Option<Arc<Channel>> = None;
        let mut completed = 0;
        loop {
            let entries = self.entries.read();
            let Some(chan) = entries.get(completed).cloned() else { break };

            if let Err(err) = node_up(stage, chan.from(), Some(&chan), prev.as_deref()) {
                drop(entries);
                return Err(self.abort_step(stage, completed, false, err));
            }
            if let Err(err) = chan_up(stage, &chan) {
                drop(entries);
                return Err(self.abort_step(stage, completed, true, err));
            }
            drop(entries);

            prev = Some(chan);
            completed += 1;
        }

        if let Some(last) = prev {
            let entries = self.entries.read();
            if let Err(err) = node_up(stage, last.to(), None, Some(&last)) {
                drop(entries);
                return Err(self.abort_step(stage, completed, false, err));
            }
        }

        Ok(())
    }

    /// Undo a failed upward step.
    ///
    /// `stop_at` channels completed both hooks; `from_done` says the failing
    /// channel's `from` node hook had already succeeded.
    fn abort_step(
        &self,
        stage: PipelineStatus,
        stop_at: usize,
        from_done: bool,
        err: KsError,
    ) -> KsError {
        if from_done {
            let entries = self.entries.read();
            if let Some(chan) = entries.get(stop_at) {
                let prev = stop_at.checked_sub(1).and_then(|i| entries.get(i));
                node_down(stage, chan.from(), Some(chan), prev.map(|p| p.as_ref()));
            }
        }
        self.unwind_until(stage, stop_at);

        if stage == PipelineStatus::Open {
            self.set_mtu(None);
        }
        err
    }

    /// Partial downward walk over the channels before `stop_at`, in reverse.
    fn unwind_until(&self, stage: PipelineStatus, stop_at: usize) {
        for index in (0..stop_at).rev() {
            let entries = self.entries.read();
            let Some(chan) = entries.get(index) else { continue };
            let prev = index.checked_sub(1).and_then(|i| entries.get(i));
            chan_down(stage, chan);
            node_down(stage, chan.from(), Some(chan), prev.map(|p| p.as_ref()));
        }
    }

    /// Leave `stage` for the rank below it.
    fn step_down(&self, stage: PipelineStatus) {
        let mut prev: Option<Arc<Channel>> = None;
        let mut index = 0;
        loop {
            let entries = self.entries.read();
            let Some(chan) = entries.get(index).cloned() else { break };
            chan_down(stage, &chan);
            node_down(stage, chan.from(), Some(&chan), prev.as_deref());
            drop(entries);

            prev = Some(chan);
            index += 1;
        }

        if let Some(last) = prev {
            let _entries = self.entries.read();
            node_down(stage, last.to(), None, Some(&last));
        }

        if stage == PipelineStatus::Open {
            self.set_mtu(None);
        }
    }
}

fn node_up(
    stage: PipelineStatus,
    node: &Node,
    chan: Option<&Channel>,
    prev: Option<&Channel>,
) -> Result<()> {
    let ops = node.ops();
    match stage {
        PipelineStatus::Null => Ok(()),
        PipelineStatus::Connected => ops.connect(node, chan, prev),
        PipelineStatus::Open => ops.open(node, chan, prev),
        PipelineStatus::Flowing => ops.start(node, chan, prev),
    }
}

fn node_down(stage: PipelineStatus, node: &Node, chan: Option<&Channel>, prev: Option<&Channel>) {
    let ops = node.ops();
    match stage {
        PipelineStatus::Null => {}
        PipelineStatus::Connected => ops.disconnect(node, chan, prev),
        PipelineStatus::Open => ops.close(node, chan, prev),
        PipelineStatus::Flowing => ops.stop(node, chan, prev),
    }
}

fn chan_up(stage: PipelineStatus, chan: &Channel) -> Result<()> {
    let ops = chan.ops();
    match stage {
        PipelineStatus::Null => Ok(()),
        PipelineStatus::Connected => ops.connect(chan),
        PipelineStatus::Open => ops.open(chan),
        PipelineStatus::Flowing => ops.start(chan),
    }
}

fn chan_down(stage: PipelineStatus, chan: &Channel) {
    let ops = chan.ops();
    match stage {
        PipelineStatus::Null => {}
        PipelineStatus::Connected => ops.disconnect(chan),
        PipelineStatus::Open => ops.close(chan),
        PipelineStatus::Flowing => ops.stop(chan),
    }
}
