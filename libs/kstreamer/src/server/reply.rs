// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use kstreamer_wire::{DatagramBuffer, ErrorCode, Message, MessageFlags, MessageHeader, WireError};

use crate::error::{KsError, Result};
use crate::transport::{PortId, Transport};

/// Packs the replies to one request into datagrams for the requester.
///
/// A message that does not fit flushes the current datagram and is written
/// again into the next one.
pub(crate) struct ReplyWriter<'a> {
    transport: &'a dyn Transport,
    dest: PortId,
    buffer: DatagramBuffer,
    datagrams: usize,
}

impl<'a> ReplyWriter<'a> {
    pub fn new(transport: &'a dyn Transport, dest: PortId, buffer_size: usize) -> Self {
        Self {
            transport,
            dest,
            buffer: DatagramBuffer::with_capacity(buffer_size),
            datagrams: 0,
        }
    }

    pub fn put(&mut self, message: Message) -> Result<()> {
        match self.buffer.push(&message) {
            Ok(()) => Ok(()),
            Err(WireError::BufferFull { .. }) if !self.buffer.is_empty() => {
                self.flush()?;
                self.buffer.push(&message).map_err(|e| too_large(&message, e))
            }
            Err(err) => Err(too_large(&message, err)),
        }
    }

    pub fn ack(&mut self, request: &MessageHeader) -> Result<()> {
        self.put(Message::ack(request, MessageFlags::empty()))
    }

    pub fn error(&mut self, request: &MessageHeader, code: ErrorCode) -> Result<()> {
        self.put(Message::error(request, code))
    }

    pub fn flush(&mut self) -> Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        let datagram = self.buffer.take();
        self.datagrams += 1;
        self.transport.send(self.dest, datagram)
    }

    /// Datagrams sent so far.
    pub fn datagrams(&self) -> usize {
        self.datagrams
    }

    /// Nothing written or sent yet.
    pub fn is_untouched(&self) -> bool {
        self.datagrams == 0 && self.buffer.is_empty()
    }
}

fn too_large(message: &Message, err: WireError) -> KsError {
    KsError::ResourceExhausted(format!("{} does not fit a reply datagram: {}", message, err))
}
