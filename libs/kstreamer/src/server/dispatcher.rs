// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender, TryRecvError};
use kstreamer_wire::{ErrorCode, Message, MessageHeader, MessageIter};

use super::ServerShared;
use super::commands::Access;
use super::handlers::RequestContext;
use super::reply::ReplyWriter;
use crate::error::KsError;
use crate::transport::PortId;

/// How long the receive loop blocks before checking for shutdown.
const RECV_POLL: Duration = Duration::from_millis(50);

/// A decoded request and the port it came from.
pub(crate) struct Inbound {
    pub source: PortId,
    pub message: Message,
}

struct Parked {
    inbound: Inbound,
    since: Instant,
}

enum Outcome {
    Done,
    /// The topology lock is held by someone else; retry later.
    Blocked,
}

/// Read datagrams off the transport and hand each message to the worker
/// owning its requester.
pub(crate) fn receive_loop(
    shared: Arc<ServerShared>,
    workers: Vec<Sender<Inbound>>,
    shutdown: Receiver<()>,
) {
    loop {
        match shutdown.try_recv() {
            Err(TryRecvError::Empty) => {}
            _ => break,
        }

        let datagram = match shared.transport.recv_timeout(RECV_POLL) {
            Ok(Some(datagram)) => datagram,
            Ok(None) => continue,
            Err(err) => {
                tracing::error!("[Dispatcher] Receive failed, stopping: {}", err);
                break;
            }
        };

        let source = datagram.source;
        let Some(worker) = workers.get(source as usize % workers.len()) else {
            break;
        };
        for message in MessageIter::new(datagram.payload) {
            match message {
                Ok(message) => {
                    if worker.send(Inbound { source, message }).is_err() {
                        return;
                    }
                }
                Err(err) => {
                    tracing::warn!(
                        "[Dispatcher] Dropping malformed datagram from {}: {}",
                        source,
                        err
                    );
                    break;
                }
            }
        }
    }
    tracing::debug!("[Dispatcher] Receive loop stopped");
}

/// One dispatch worker.
///
/// Requests that cannot take the topology lock are parked in an ordered
/// backlog and retried whenever the lock is released, or every
/// `backlog_poll_ms`. Once a requester has a parked request, its later
/// requests queue behind it.
pub(crate) struct Dispatcher {
    index: usize,
    shared: Arc<ServerShared>,
    inbox: Receiver<Inbound>,
    kick: Receiver<()>,
    shutdown: Receiver<()>,
    backlog: VecDeque<Parked>,
}

impl Dispatcher {
    pub fn new(
        index: usize,
        shared: Arc<ServerShared>,
        inbox: Receiver<Inbound>,
        kick: Receiver<()>,
        shutdown: Receiver<()>,
    ) -> Self {
        Self {
            index,
            shared,
            inbox,
            kick,
            shutdown,
            backlog: VecDeque::new(),
        }
    }

    pub fn run(mut self) {
        let inbox = self.inbox.clone();
        let kick = self.kick.clone();
        let shutdown = self.shutdown.clone();
        let poll = self.shared.config.backlog_poll();

        tracing::debug!("[Dispatcher] Worker {} started", self.index);
        loop {
            crossbeam_channel::select! {
                recv(inbox) -> result => match result {
                    Ok(inbound) => self.accept(inbound),
                    Err(_) => break,
                },
                recv(kick) -> _ => self.retry_backlog(),
                recv(shutdown) -> _ => break,
                default(poll) => self.retry_backlog(),
            }
        }

        for parked in std::mem::take(&mut self.backlog) {
            self.reply_error(&parked.inbound, ErrorCode::Again);
        }
        tracing::debug!("[Dispatcher] Worker {} stopped", self.index);
    }

    fn accept(&mut self, inbound: Inbound) {
        if self
            .backlog
            .iter()
            .any(|p| p.inbound.source == inbound.source)
        {
            self.park(inbound);
            return;
        }
        if let Outcome::Blocked = self.process(&inbound) {
            self.park(inbound);
        }
    }

    fn park(&mut self, inbound: Inbound) {
        tracing::debug!(
            "[Dispatcher] Parking {} from {}",
            inbound.message,
            inbound.source
        );
        self.backlog.push_back(Parked {
            inbound,
            since: Instant::now(),
        });
    }

    fn retry_backlog(&mut self) {
        if self.backlog.is_empty() {
            return;
        }

        let timeout = self.shared.config.implicit_lock_timeout();
        let mut blocked: HashSet<PortId> = HashSet::new();
        for parked in std::mem::take(&mut self.backlog) {
            let source = parked.inbound.source;
            if blocked.contains(&source) {
                self.backlog.push_back(parked);
                continue;
            }
            match self.process(&parked.inbound) {
                Outcome::Done => {}
                Outcome::Blocked if parked.since.elapsed() >= timeout => {
                    tracing::warn!(
                        "[Dispatcher] {} from {} gave up waiting for the topology lock",
                        parked.inbound.message,
                        source
                    );
                    self.reply_error(&parked.inbound, ErrorCode::Again);
                }
                Outcome::Blocked => {
                    blocked.insert(source);
                    self.backlog.push_back(parked);
                }
            }
        }
    }

    fn process(&self, inbound: &Inbound) -> Outcome {
        let shared = self.shared.as_ref();
        let message = &inbound.message;
        let header = *message.header();
        tracing::debug!("[Dispatcher] {} from {}", message, inbound.source);

        if !message.is_request() {
            tracing::warn!(
                "[Dispatcher] Rejecting non-request {} from {}",
                message,
                inbound.source
            );
            self.reply_error(inbound, ErrorCode::Invalid);
            return Outcome::Done;
        }

        let Some(command) = shared.commands.lookup(header.message_type) else {
            tracing::warn!(
                "[Dispatcher] Rejecting unknown message type {} from {}",
                header.message_type,
                inbound.source
            );
            self.reply_error(inbound, ErrorCode::Invalid);
            return Outcome::Done;
        };

        let _hold = match command.access {
            Access::Write => match shared.lock.acquire_implicit(inbound.source) {
                Ok(hold) => Some(hold),
                Err(KsError::Again(_)) => return Outcome::Blocked,
                Err(err) => {
                    self.reply_error(inbound, err.code());
                    return Outcome::Done;
                }
            },
            Access::Read | Access::None => None,
        };

        let mut ctx = RequestContext {
            shared,
            source: inbound.source,
            message,
            reply: ReplyWriter::new(
                shared.transport.as_ref(),
                inbound.source,
                shared.config.buffer_size,
            ),
        };
        let result = (command.handler)(&mut ctx);
        let mut reply = ctx.reply;

        match result {
            Ok(()) => {}
            Err(KsError::Again(_)) if reply.is_untouched() => return Outcome::Blocked,
            Err(err) => {
                tracing::debug!(
                    "[Dispatcher] {} from {} failed: {}",
                    command.message_type.name(),
                    inbound.source,
                    err
                );
                if let Err(err) = reply.error(&header, err.code()) {
                    tracing::warn!("[Dispatcher] Cannot encode error reply: {}", err);
                }
            }
        }

        match reply.flush() {
            Ok(()) => tracing::debug!(
                "[Dispatcher] Replied to {} in {} datagram(s)",
                inbound.source,
                reply.datagrams()
            ),
            Err(err) => tracing::warn!(
                "[Dispatcher] Failed to reply to {}: {}",
                inbound.source,
                err
            ),
        }
        Outcome::Done
    }

    fn reply_error(&self, inbound: &Inbound, code: ErrorCode) {
        let header: MessageHeader = *inbound.message.header();
        let mut reply = ReplyWriter::new(
            self.shared.transport.as_ref(),
            inbound.source,
            self.shared.config.buffer_size,
        );
        let result = reply.error(&header, code).and_then(|()| reply.flush());
        if let Err(err) = result {
            tracing::warn!(
                "[Dispatcher] Failed to send {} to {}: {}",
                code,
                inbound.source,
                err
            );
        }
    }
}
