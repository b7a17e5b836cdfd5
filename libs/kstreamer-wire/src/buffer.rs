// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use bytes::{Bytes, BytesMut};

use crate::error::{Result, WireError};
use crate::message::Message;

/// Bounded buffer that packs whole messages into one datagram.
///
/// A message that does not fit is rejected with [`WireError::BufferFull`]
/// and leaves the buffer exactly as it was; the caller flushes and retries.
#[derive(Debug)]
pub struct DatagramBuffer {
    buf: BytesMut,
    capacity: usize,
    count: usize,
}

impl DatagramBuffer {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity),
            capacity,
            count: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn remaining(&self) -> usize {
        self.capacity - self.buf.len()
    }

    /// Messages written since the last [`take`](Self::take).
    pub fn message_count(&self) -> usize {
        self.count
    }

    pub fn push(&mut self, message: &Message) -> Result<()> {
        let needed = message.encoded_len();
        if needed > self.remaining() {
            return Err(WireError::BufferFull {
                needed,
                available: self.remaining(),
            });
        }
        message.encode(&mut self.buf);
        self.count += 1;
        Ok(())
    }

    /// Hand out the packed datagram and reset the buffer.
    pub fn take(&mut self) -> Bytes {
        self.count = 0;
        self.buf.split().freeze()
    }
}
