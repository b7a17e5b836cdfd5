// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use std::fmt;
use std::sync::Arc;

use kstreamer_wire::{ErrorCode, Message, MessageType, type_name};

use super::request::Request;
use super::transaction::Transaction;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    /// Expecting the first reply of the oldest outstanding request.
    WaitingAck,
    /// Inside a multi-part reply, until DONE or ERROR.
    WaitingDone,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Idle => "IDLE",
            Self::WaitingAck => "WAITING_ACK",
            Self::WaitingDone => "WAITING_DONE",
        })
    }
}

/// Matches unicast replies to outstanding requests.
pub(crate) struct Correlator {
    state: ConnectionState,
    xact: Option<Transaction>,
    /// Request whose multi-part reply is in progress.
    current: Option<Arc<Request>>,
}

impl Correlator {
    pub fn new() -> Self {
        Self {
            state: ConnectionState::Idle,
            xact: None,
            current: None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// A new request may be queued now.
    pub fn accepts_requests(&self) -> bool {
        match (&self.xact, self.state) {
            (None, _) => true,
            (Some(xact), ConnectionState::WaitingAck) => xact.is_open(),
            _ => false,
        }
    }

    /// Queue a sent request, opening a transaction if none is open.
    ///
    /// Requests of one batch are queued back-to-back; a new batch waits
    /// for [`Correlator::accepts_requests`].
    pub fn enqueue(&mut self, request: Arc<Request>) {
        self.xact.get_or_insert_with(Transaction::new).push(request);
        self.state = ConnectionState::WaitingAck;
    }

    /// Feed one unicast message from the server.
    pub fn receive(&mut self, message: &Message) {
        match self.state {
            ConnectionState::Idle => {
                tracing::warn!("[Client] Discarding unsolicited {}", message);
            }
            ConnectionState::WaitingAck => self.on_reply(message),
            ConnectionState::WaitingDone => self.on_element(message),
        }
    }

    fn on_reply(&mut self, message: &Message) {
        let Some(xact) = self.xact.as_mut() else {
            self.state = ConnectionState::Idle;
            return;
        };
        let Some(request) = xact.pop_front() else {
            tracing::warn!("[Client] Discarding {}: no request outstanding", message);
            return;
        };

        if message.seq() != request.seq() {
            tracing::warn!(
                "[Client] Discarding {}: expected seq {}",
                message,
                request.seq()
            );
            xact.push_front(request);
            return;
        }

        if message.is_error() {
            request.deliver(message);
            self.finish(request, Some(error_code(message)));
            return;
        }

        if message.message_type() != request.message_type() {
            tracing::warn!(
                "[Client] Discarding {}: expected {}",
                message,
                type_name(request.message_type())
            );
            xact.push_front(request);
            return;
        }

        request.deliver(message);
        if message.is_multi() {
            self.current = Some(request);
            self.state = ConnectionState::WaitingDone;
        } else {
            self.finish(request, None);
        }
    }

    fn on_element(&mut self, message: &Message) {
        let Some(request) = self.current.as_ref() else {
            self.state = ConnectionState::WaitingAck;
            return;
        };
        request.deliver(message);

        let error = if message.is_done() {
            None
        } else if message.is_error() {
            Some(error_code(message))
        } else {
            return;
        };
        if let Some(request) = self.current.take() {
            self.finish(request, error);
        }
    }

    fn finish(&mut self, request: Arc<Request>, error: Option<ErrorCode>) {
        let kind = request.kind();
        request.complete(error);
        drop(request);

        let Some(xact) = self.xact.as_mut() else {
            self.state = ConnectionState::Idle;
            return;
        };
        if kind == Some(MessageType::Begin) && error.is_none() {
            xact.disable_autocommit();
        }

        let ends = match kind {
            Some(MessageType::Commit) | Some(MessageType::Abort) => true,
            _ => xact.autocommit() && xact.is_empty(),
        };
        if ends {
            for orphan in xact.drain() {
                orphan.complete(Some(ErrorCode::Again));
            }
            self.xact = None;
            self.state = ConnectionState::Idle;
        } else {
            self.state = ConnectionState::WaitingAck;
        }
    }

    /// Fail every request in flight and drop the transaction.
    pub fn abort_all(&mut self, code: ErrorCode) {
        if let Some(request) = self.current.take() {
            request.complete(Some(code));
        }
        if let Some(mut xact) = self.xact.take() {
            for request in xact.drain() {
                request.complete(Some(code));
            }
        }
        self.state = ConnectionState::Idle;
    }
}

fn error_code(message: &Message) -> ErrorCode {
    match message.error_code() {
        Ok(Some(code)) => code,
        _ => ErrorCode::Invalid,
    }
}
