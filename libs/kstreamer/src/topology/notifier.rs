// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Weak};

use bytes::Bytes;
use crossbeam_channel::Sender;
use kstreamer_wire::protocol::NOTIFY_SEQ_START;
use kstreamer_wire::{DatagramBuffer, Message, WireError};
use parking_lot::Mutex;

use super::lock::TopologyLock;
use crate::graph::{TopologyEvent, TopologyListener};
use crate::protocol;

/// Turns registry events into topology-group broadcasts.
///
/// Notifications produced while the topology lock is held are queued and
/// go out, in order, as soon as the lock is free again.
pub struct Notifier {
    lock: Arc<TopologyLock>,
    pending: Mutex<VecDeque<Message>>,
    seq: AtomicU32,
    buffer_size: usize,
    outbox: Sender<Bytes>,
}

impl Notifier {
    /// Create the notifier and hook it to the lock's release.
    ///
    /// Packed datagrams are handed to `outbox` for the broadcasting thread.
    pub fn new(lock: Arc<TopologyLock>, buffer_size: usize, outbox: Sender<Bytes>) -> Arc<Self> {
        let notifier = Arc::new(Self {
            lock: Arc::clone(&lock),
            pending: Mutex::new(VecDeque::new()),
            seq: AtomicU32::new(NOTIFY_SEQ_START),
            buffer_size,
            outbox,
        });

        let weak: Weak<Self> = Arc::downgrade(&notifier);
        lock.on_release(move || {
            if let Some(notifier) = weak.upgrade() {
                notifier.flush();
            }
        });

        notifier
    }

    pub fn pending_len(&self) -> usize {
        self.pending.lock().len()
    }

    /// Send queued notifications unless the lock is held.
    pub fn flush(&self) {
        // Checked under `pending`: a queued event was pushed by the holder,
        // so a hold that queued anything is visible here.
        let mut pending = self.pending.lock();
        if pending.is_empty() || self.lock.is_held() {
            return;
        }

        let mut buffer = DatagramBuffer::with_capacity(self.buffer_size);
        let mut sent = 0;
        while let Some(message) = pending.pop_front() {
            match buffer.push(&message) {
                Ok(()) => sent += 1,
                Err(WireError::BufferFull { .. }) if !buffer.is_empty() => {
                    self.emit(buffer.take());
                    pending.push_front(message);
                }
                Err(err) => {
                    tracing::warn!("[Notifier] Dropping notification {}: {}", message, err);
                }
            }
        }
        if !buffer.is_empty() {
            self.emit(buffer.take());
        }
        tracing::debug!("[Notifier] Flushed {} notification(s)", sent);
    }

    fn emit(&self, datagram: Bytes) {
        if self.outbox.send(datagram).is_err() {
            tracing::warn!("[Notifier] Broadcast worker gone, notification lost");
        }
    }
}

impl TopologyListener for Notifier {
    fn on_topology_event(&self, event: &TopologyEvent) {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        match protocol::event_message(event, seq) {
            Ok(message) => {
                tracing::debug!("[Notifier] Queued {}", message);
                self.pending.lock().push_back(message);
            }
            Err(err) => {
                tracing::warn!("[Notifier] Cannot encode {:?}: {}", event, err);
                return;
            }
        }
        self.flush();
    }
}
