// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use bytes::Bytes;
use kstreamer_wire::{ErrorCode, Message, MessageBuilder, MessageFlags, MessageType};
use parking_lot::{Condvar, Mutex};

use crate::error::{KsError, Result};

/// Called with every reply message of a request, multi-part elements
/// included.
pub type ResponseHandler = Box<dyn FnMut(&Message) + Send>;

#[derive(Default)]
struct Completion {
    done: bool,
    error: Option<ErrorCode>,
}

/// One outgoing request and its completion.
///
/// Replies go to the response handler if one was given, otherwise they are
/// buffered and can be read with [`Request::responses`] after completion.
pub struct Request {
    message_type: u16,
    flags: MessageFlags,
    payload: Bytes,
    /// Sequence number of the last send, for reply correlation.
    seq: AtomicU32,
    handler: Mutex<Option<ResponseHandler>>,
    responses: Mutex<Vec<Message>>,
    completion: Mutex<Completion>,
    completed: Condvar,
}

impl Request {
    /// Request without attributes.
    pub fn new(message_type: MessageType) -> Arc<Self> {
        Self::from_parts(message_type.as_u16(), default_flags(), Bytes::new(), None)
    }

    pub fn builder(message_type: MessageType) -> RequestBuilder {
        RequestBuilder {
            message: MessageBuilder::new(message_type).flags(default_flags()),
            handler: None,
        }
    }

    fn from_parts(
        message_type: u16,
        flags: MessageFlags,
        payload: Bytes,
        handler: Option<ResponseHandler>,
    ) -> Arc<Self> {
        Arc::new(Self {
            message_type,
            flags,
            payload,
            seq: AtomicU32::new(0),
            handler: Mutex::new(handler),
            responses: Mutex::new(Vec::new()),
            completion: Mutex::new(Completion::default()),
            completed: Condvar::new(),
        })
    }

    pub fn message_type(&self) -> u16 {
        self.message_type
    }

    pub fn kind(&self) -> Option<MessageType> {
        MessageType::from_u16(self.message_type)
    }

    pub(crate) fn seq(&self) -> u32 {
        self.seq.load(Ordering::Acquire)
    }

    /// Wire form of this request from `port_id` with sequence `seq`.
    pub(crate) fn prepare(&self, port_id: u32, seq: u32) -> Message {
        self.seq.store(seq, Ordering::Release);
        Message::new(
            self.message_type,
            self.flags,
            port_id,
            seq,
            self.payload.clone(),
        )
    }

    pub(crate) fn deliver(&self, message: &Message) {
        let mut handler = self.handler.lock();
        match handler.as_mut() {
            Some(handler) => handler(message),
            None => self.responses.lock().push(message.clone()),
        }
    }

    /// Mark the request finished. Later calls are ignored.
    pub(crate) fn complete(&self, error: Option<ErrorCode>) {
        let mut completion = self.completion.lock();
        if completion.done {
            return;
        }
        completion.done = true;
        completion.error = error;
        self.completed.notify_all();
    }

    pub fn is_complete(&self) -> bool {
        self.completion.lock().done
    }

    /// Block until completion.
    pub fn wait(&self) -> Result<()> {
        let mut completion = self.completion.lock();
        while !completion.done {
            self.completed.wait(&mut completion);
        }
        outcome(&completion)
    }

    /// Block until completion or `timeout`.
    pub fn wait_timeout(&self, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        let mut completion = self.completion.lock();
        while !completion.done {
            if self
                .completed
                .wait_until(&mut completion, deadline)
                .timed_out()
                && !completion.done
            {
                return Err(KsError::TimedOut(format!(
                    "no reply to {} within {:?}",
                    kstreamer_wire::type_name(self.message_type),
                    timeout
                )));
            }
        }
        outcome(&completion)
    }

    /// Buffered replies, in arrival order.
    pub fn responses(&self) -> Vec<Message> {
        self.responses.lock().clone()
    }

    /// First buffered reply.
    pub fn response(&self) -> Option<Message> {
        self.responses.lock().first().cloned()
    }
}

impl std::fmt::Debug for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Request")
            .field("type", &kstreamer_wire::type_name(self.message_type))
            .field("seq", &self.seq())
            .field("complete", &self.is_complete())
            .finish()
    }
}

fn default_flags() -> MessageFlags {
    MessageFlags::REQUEST | MessageFlags::ACK
}

fn outcome(completion: &Completion) -> Result<()> {
    match completion.error {
        None => Ok(()),
        Some(code) => Err(KsError::from_code(code)),
    }
}

pub struct RequestBuilder {
    message: MessageBuilder,
    handler: Option<ResponseHandler>,
}

impl RequestBuilder {
    /// Extra header flags on top of REQUEST and ACK.
    pub fn flags(mut self, flags: MessageFlags) -> Self {
        self.message = self.message.flags(default_flags() | flags);
        self
    }

    pub fn attr_u32(mut self, attr_type: u16, value: u32) -> Self {
        self.message = self.message.attr_u32(attr_type, value);
        self
    }

    pub fn attr_i32(mut self, attr_type: u16, value: i32) -> Self {
        self.message = self.message.attr_i32(attr_type, value);
        self
    }

    pub fn attr_str(mut self, attr_type: u16, value: &str) -> Self {
        self.message = self.message.attr_str(attr_type, value);
        self
    }

    pub fn on_response(mut self, handler: impl FnMut(&Message) + Send + 'static) -> Self {
        self.handler = Some(Box::new(handler));
        self
    }

    pub fn build(self) -> Result<Arc<Request>> {
        let message = self.message.build()?;
        Ok(Request::from_parts(
            message.message_type(),
            message.flags(),
            Bytes::copy_from_slice(message.payload()),
            self.handler,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prepare_sets_addressing() {
        let request = Request::builder(MessageType::PipelineDel)
            .attr_u32(1, 7)
            .build()
            .unwrap();
        let msg = request.prepare(42, 9);
        assert_eq!(msg.port_id(), 42);
        assert_eq!(msg.seq(), 9);
        assert_eq!(request.seq(), 9);
        assert!(msg.is_request());
        assert!(msg.flags().contains(MessageFlags::ACK));
        assert_eq!(msg.attrs().next().unwrap().unwrap().as_u32().unwrap(), 7);
    }

    #[test]
    fn test_handler_receives_replies() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let request = Request::builder(MessageType::PipelineGet)
            .on_response(move |msg| sink.lock().push(msg.seq()))
            .build()
            .unwrap();

        let header = *request.prepare(1, 5).header();
        request.deliver(&Message::ack(&header, MessageFlags::MULTI));
        request.deliver(&Message::done(1, 6, 0));
        assert_eq!(*seen.lock(), vec![5, 6]);
        assert!(request.responses().is_empty());
    }

    #[test]
    fn test_complete_wakes_waiter() {
        let request = Request::new(MessageType::Noop);
        let waiter = {
            let request = Arc::clone(&request);
            std::thread::spawn(move || request.wait())
        };
        std::thread::sleep(Duration::from_millis(10));
        request.complete(Some(ErrorCode::Busy));
        request.complete(None);
        assert!(matches!(waiter.join().unwrap(), Err(KsError::Busy(_))));
    }

    #[test]
    fn test_wait_timeout() {
        let request = Request::new(MessageType::Noop);
        assert!(matches!(
            request.wait_timeout(Duration::from_millis(10)),
            Err(KsError::TimedOut(_))
        ));
        request.complete(None);
        assert!(request.wait_timeout(Duration::from_millis(10)).is_ok());
    }
}
