// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender, TryRecvError};
use kstreamer_wire::protocol::{TOPOLOGY_GROUP, pipeline_attr};
use kstreamer_wire::{DatagramBuffer, ErrorCode, Message, MessageIter, MessageType, WireError};
use parking_lot::{Condvar, Mutex};

use super::correlator::{ConnectionState, Correlator};
use super::request::Request;
use super::topology_cache::{SyncState, TopologyCache};
use crate::config::ClientConfig;
use crate::error::{KsError, Result};
use crate::graph::{
    ChannelId, ChannelInfo, NodeInfo, PipelineId, PipelineInfo, PipelineStatus, TopologySnapshot,
};
use crate::protocol::{self, ProtocolVersion};
use crate::transport::{PortId, Transport};

const RECV_POLL: Duration = Duration::from_millis(50);

struct ConnectionInner {
    transport: Arc<dyn Transport>,
    server: PortId,
    config: ClientConfig,
    seq: AtomicU32,
    correlator: Mutex<Correlator>,
    /// Signalled whenever the correlator may accept new requests.
    ready: Condvar,
    cache: Mutex<TopologyCache>,
}

/// Client end of the control protocol.
///
/// One transaction is in flight at a time; [`Connection::submit`] and the
/// typed helpers block until their requests complete.
pub struct Connection {
    inner: Arc<ConnectionInner>,
    shutdown_tx: Option<Sender<()>>,
    receiver: Option<JoinHandle<()>>,
}

impl Connection {
    /// Talk to the server at `server` over `transport`.
    pub fn open(
        transport: Arc<dyn Transport>,
        server: PortId,
        config: ClientConfig,
    ) -> Result<Self> {
        config.validate()?;

        let inner = Arc::new(ConnectionInner {
            transport,
            server,
            config,
            seq: AtomicU32::new(1),
            correlator: Mutex::new(Correlator::new()),
            ready: Condvar::new(),
            cache: Mutex::new(TopologyCache::new()),
        });

        let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded::<()>(0);
        let receiver = {
            let inner = Arc::clone(&inner);
            std::thread::Builder::new()
                .name(format!("ks-client-{}", inner.transport.local_port()))
                .spawn(move || receive_loop(inner, shutdown_rx))
                .map_err(|e| KsError::Other(anyhow::anyhow!("Failed to spawn receiver: {}", e)))?
        };

        tracing::debug!(
            "[Client] Connection {} -> {} open",
            inner.transport.local_port(),
            server
        );
        Ok(Self {
            inner,
            shutdown_tx: Some(shutdown_tx),
            receiver: Some(receiver),
        })
    }

    pub fn local_port(&self) -> PortId {
        self.inner.transport.local_port()
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.correlator.lock().state()
    }

    /// Send `request` and block until it completes.
    pub fn submit(&self, request: &Arc<Request>) -> Result<()> {
        self.transaction(std::slice::from_ref(request))
    }

    /// Send `requests` back-to-back and block until all complete.
    ///
    /// Returns the first failure; every request is completed either way.
    pub fn transaction(&self, requests: &[Arc<Request>]) -> Result<()> {
        if requests.is_empty() {
            return Ok(());
        }
        self.send_batch(requests)?;

        let mut first_error = None;
        for request in requests {
            if let Err(err) = self.wait(request) {
                first_error.get_or_insert(err);
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn send_batch(&self, requests: &[Arc<Request>]) -> Result<()> {
        let inner = &*self.inner;
        let deadline = inner.config.request_timeout().map(|t| Instant::now() + t);
        let mut correlator = inner.correlator.lock();
        while !correlator.accepts_requests() {
            match deadline {
                Some(deadline) => {
                    if inner.ready.wait_until(&mut correlator, deadline).timed_out()
                        && !correlator.accepts_requests()
                    {
                        return Err(KsError::TimedOut(format!(
                            "connection still {} after {:?}",
                            correlator.state(),
                            inner.config.request_timeout().unwrap_or_default()
                        )));
                    }
                }
                None => inner.ready.wait(&mut correlator),
            }
        }

        // Queue before sending so no reply can outrun its request.
        let port = inner.transport.local_port();
        let mut buffer = DatagramBuffer::with_capacity(inner.config.buffer_size);
        let mut result = Ok(());
        for request in requests {
            let seq = inner.seq.fetch_add(1, Ordering::Relaxed);
            let message = request.prepare(port, seq);
            correlator.enqueue(Arc::clone(request));
            tracing::debug!("[Client] Sending {}", message);
            if let Err(err) = self.pack(&mut buffer, &message) {
                result = Err(err);
                break;
            }
        }
        if result.is_ok() && !buffer.is_empty() {
            result = inner.transport.send(inner.server, buffer.take());
        }

        if let Err(err) = result {
            tracing::warn!("[Client] Send failed, aborting transaction: {}", err);
            correlator.abort_all(err.code());
            inner.ready.notify_all();
            return Err(err);
        }
        Ok(())
    }

    fn pack(&self, buffer: &mut DatagramBuffer, message: &Message) -> Result<()> {
        match buffer.push(message) {
            Ok(()) => Ok(()),
            Err(WireError::BufferFull { .. }) if !buffer.is_empty() => {
                self.inner.transport.send(self.inner.server, buffer.take())?;
                buffer.push(message).map_err(|e| {
                    KsError::ResourceExhausted(format!("{} does not fit a datagram: {}", message, e))
                })
            }
            Err(err) => Err(KsError::ResourceExhausted(format!(
                "{} does not fit a datagram: {}",
                message, err
            ))),
        }
    }

    fn wait(&self, request: &Arc<Request>) -> Result<()> {
        let Some(timeout) = self.inner.config.request_timeout() else {
            return request.wait();
        };
        match request.wait_timeout(timeout) {
            Err(KsError::TimedOut(reason)) if !request.is_complete() => {
                tracing::warn!("[Client] {}, aborting transaction", reason);
                let mut correlator = self.inner.correlator.lock();
                correlator.abort_all(ErrorCode::TimedOut);
                self.inner.ready.notify_all();
                Err(KsError::TimedOut(reason))
            }
            other => other,
        }
    }

    fn simple(&self, message_type: MessageType) -> Result<()> {
        self.submit(&Request::new(message_type))
    }

    pub fn noop(&self) -> Result<()> {
        self.simple(MessageType::Noop)
    }

    pub fn version(&self) -> Result<ProtocolVersion> {
        let request = Request::new(MessageType::Version);
        self.submit(&request)?;
        let reply = request
            .response()
            .ok_or_else(|| KsError::Invalid("VERSION completed without a reply".into()))?;
        protocol::parse_version(&reply)
    }

    /// Take the topology lock, waiting on the server side while another
    /// requester holds it.
    pub fn lock(&self) -> Result<()> {
        self.simple(MessageType::TopologyLock)
    }

    pub fn trylock(&self) -> Result<()> {
        self.simple(MessageType::TopologyTrylock)
    }

    pub fn unlock(&self) -> Result<()> {
        self.simple(MessageType::TopologyUnlock)
    }

    /// Take the topology lock and keep this connection's transaction open
    /// until [`Connection::commit`] or [`Connection::abort`].
    pub fn begin(&self) -> Result<()> {
        self.simple(MessageType::Begin)
    }

    pub fn commit(&self) -> Result<()> {
        self.simple(MessageType::Commit)
    }

    /// Release the lock. Mutations already applied stay applied.
    pub fn abort(&self) -> Result<()> {
        self.simple(MessageType::Abort)
    }

    pub fn pipeline_new(
        &self,
        channels: &[ChannelId],
        status: Option<PipelineStatus>,
    ) -> Result<PipelineInfo> {
        let mut builder = Request::builder(MessageType::PipelineNew);
        if let Some(status) = status {
            builder = builder.attr_u32(pipeline_attr::STATUS, status.rank());
        }
        for chan in channels {
            builder = builder.attr_u32(pipeline_attr::CHAN_ID, *chan);
        }
        self.single_pipeline(builder.build()?)
    }

    pub fn pipeline_set_status(
        &self,
        id: PipelineId,
        status: PipelineStatus,
    ) -> Result<PipelineInfo> {
        let request = Request::builder(MessageType::PipelineSet)
            .attr_u32(pipeline_attr::ID, id)
            .attr_u32(pipeline_attr::STATUS, status.rank())
            .build()?;
        self.single_pipeline(request)
    }

    pub fn pipeline_del(&self, id: PipelineId) -> Result<PipelineId> {
        let request = Request::builder(MessageType::PipelineDel)
            .attr_u32(pipeline_attr::ID, id)
            .build()?;
        Ok(self.single_pipeline(request)?.id)
    }

    fn single_pipeline(&self, request: Arc<Request>) -> Result<PipelineInfo> {
        self.submit(&request)?;
        let reply = request
            .response()
            .ok_or_else(|| KsError::Invalid("pipeline request completed without a reply".into()))?;
        protocol::parse_pipeline(&reply)
    }

    pub fn pipelines(&self) -> Result<Vec<PipelineInfo>> {
        self.dump(MessageType::PipelineGet, MessageType::PipelineNew, protocol::parse_pipeline)
    }

    pub fn nodes(&self) -> Result<Vec<NodeInfo>> {
        self.dump(MessageType::NodeGet, MessageType::NodeNew, protocol::parse_node)
    }

    pub fn channels(&self) -> Result<Vec<ChannelInfo>> {
        self.dump(MessageType::ChanGet, MessageType::ChanNew, protocol::parse_channel)
    }

    fn dump<T>(
        &self,
        request_type: MessageType,
        element_type: MessageType,
        parse: impl Fn(&Message) -> Result<T>,
    ) -> Result<Vec<T>> {
        let request = Request::new(request_type);
        self.submit(&request)?;
        request
            .responses()
            .iter()
            .filter(|msg| msg.kind() == Some(element_type))
            .map(parse)
            .collect()
    }

    /// Mirror the server topology locally and keep it current.
    ///
    /// The dump runs under the topology lock so no change slips between
    /// the dump and the first applied broadcast.
    pub fn sync_topology(&self) -> Result<()> {
        self.inner.transport.subscribe(TOPOLOGY_GROUP)?;
        self.lock()?;
        self.inner.cache.lock().begin_sync();

        let dumped = self
            .nodes()
            .and_then(|nodes| Ok((nodes, self.channels()?)))
            .and_then(|(nodes, channels)| Ok((nodes, channels, self.pipelines()?)));

        let result = match dumped {
            Ok((nodes, channels, pipelines)) => {
                self.inner.cache.lock().finish_sync(nodes, channels, pipelines);
                Ok(())
            }
            Err(err) => {
                self.inner.cache.lock().reset();
                Err(err)
            }
        };
        let unlocked = self.unlock();
        result.and(unlocked)
    }

    pub fn sync_state(&self) -> SyncState {
        self.inner.cache.lock().state()
    }

    /// Local mirror built by [`Connection::sync_topology`].
    pub fn topology(&self) -> TopologySnapshot {
        self.inner.cache.lock().snapshot()
    }

    /// Broadcasts dropped because the mirror was not synched.
    pub fn dropped_broadcasts(&self) -> u64 {
        self.inner.cache.lock().dropped()
    }

    pub fn close(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        if self.shutdown_tx.take().is_none() {
            return;
        }
        if let Some(receiver) = self.receiver.take() {
            if receiver.join().is_err() {
                tracing::error!("[Client] Receiver thread panicked");
            }
        }
        let mut correlator = self.inner.correlator.lock();
        correlator.abort_all(ErrorCode::Unavailable);
        self.inner.ready.notify_all();
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.stop();
    }
}

fn receive_loop(inner: Arc<ConnectionInner>, shutdown: Receiver<()>) {
    loop {
        match shutdown.try_recv() {
            Err(TryRecvError::Empty) => {}
            _ => break,
        }

        let datagram = match inner.transport.recv_timeout(RECV_POLL) {
            Ok(Some(datagram)) => datagram,
            Ok(None) => continue,
            Err(err) => {
                tracing::error!("[Client] Receive failed: {}", err);
                inner.correlator.lock().abort_all(ErrorCode::Unavailable);
                inner.ready.notify_all();
                break;
            }
        };

        let multicast = datagram.group == Some(TOPOLOGY_GROUP);
        if !multicast && datagram.source != inner.server {
            tracing::warn!("[Client] Ignoring datagram from port {}", datagram.source);
            continue;
        }

        for message in MessageIter::new(datagram.payload) {
            let message = match message {
                Ok(message) => message,
                Err(err) => {
                    tracing::warn!("[Client] Dropping malformed datagram: {}", err);
                    break;
                }
            };
            tracing::debug!("[Client] Received {}", message);

            if multicast {
                if let Err(err) = inner.cache.lock().apply(&message) {
                    tracing::warn!("[Client] Cannot apply {}: {}", message, err);
                }
            } else {
                let mut correlator = inner.correlator.lock();
                correlator.receive(&message);
                if correlator.accepts_requests() {
                    inner.ready.notify_all();
                }
            }
        }
    }
    tracing::debug!("[Client] Receive loop stopped");
}
