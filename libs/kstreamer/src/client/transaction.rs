// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use std::collections::VecDeque;
use std::sync::Arc;

use super::request::Request;

/// Requests sent together and awaiting replies, oldest first.
///
/// A transaction ends when its last request completes, unless a BEGIN ack
/// turned auto-commit off; it then stays open until COMMIT or ABORT
/// completes.
pub(crate) struct Transaction {
    outstanding: VecDeque<Arc<Request>>,
    autocommit: bool,
}

impl Transaction {
    pub fn new() -> Self {
        Self {
            outstanding: VecDeque::new(),
            autocommit: true,
        }
    }

    pub fn push(&mut self, request: Arc<Request>) {
        self.outstanding.push_back(request);
    }

    pub fn pop_front(&mut self) -> Option<Arc<Request>> {
        self.outstanding.pop_front()
    }

    /// Put back a request whose reply did not arrive yet.
    pub fn push_front(&mut self, request: Arc<Request>) {
        self.outstanding.push_front(request);
    }

    pub fn is_empty(&self) -> bool {
        self.outstanding.is_empty()
    }

    pub fn autocommit(&self) -> bool {
        self.autocommit
    }

    pub fn disable_autocommit(&mut self) {
        self.autocommit = false;
    }

    /// Open for more requests: explicit and nothing outstanding.
    pub fn is_open(&self) -> bool {
        !self.autocommit && self.outstanding.is_empty()
    }

    pub fn drain(&mut self) -> impl Iterator<Item = Arc<Request>> + '_ {
        self.outstanding.drain(..)
    }
}
