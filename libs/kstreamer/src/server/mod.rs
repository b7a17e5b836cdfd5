// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Control-plane server.
//!
//! One receive thread decodes request datagrams and shards them by
//! requester port over `dispatch_workers` dispatch threads, so requests
//! from one requester are always handled in arrival order. A separate
//! thread broadcasts topology notifications to [`TOPOLOGY_GROUP`].

mod commands;
mod dispatcher;
mod handlers;
mod reply;

use std::sync::Arc;
use std::thread::JoinHandle;

use bytes::Bytes;
use crossbeam_channel::{Receiver, Sender};
use kstreamer_wire::protocol::TOPOLOGY_GROUP;

use crate::config::ServerConfig;
use crate::error::{KsError, Result};
use crate::graph::Registry;
use crate::topology::{Notifier, TopologyLock};
use crate::transport::{PortId, Transport};

pub use commands::Access;
use commands::CommandTable;
use dispatcher::{Dispatcher, Inbound};

/// State shared by the server threads.
pub(crate) struct ServerShared {
    pub registry: Arc<Registry>,
    pub lock: Arc<TopologyLock>,
    pub transport: Arc<dyn Transport>,
    pub config: ServerConfig,
    pub commands: CommandTable,
}

pub struct ControlServer {
    shared: Arc<ServerShared>,
    notifier: Arc<Notifier>,
    shutdown_tx: Option<Sender<()>>,
    threads: Vec<JoinHandle<()>>,
}

impl ControlServer {
    /// Serve `registry` on `transport` until shut down.
    pub fn start(
        registry: Arc<Registry>,
        transport: Arc<dyn Transport>,
        config: ServerConfig,
    ) -> Result<Self> {
        config.validate()?;

        let lock = Arc::new(TopologyLock::new(config.lock_watchdog())?);
        let (notify_tx, notify_rx) = crossbeam_channel::unbounded::<Bytes>();
        let notifier = Notifier::new(Arc::clone(&lock), config.buffer_size, notify_tx);
        registry.set_listener(notifier.clone());

        let workers = config.dispatch_workers;
        let shared = Arc::new(ServerShared {
            registry,
            lock,
            transport,
            config,
            commands: CommandTable::new(),
        });

        // Never sent on; dropping it disconnects every receiver.
        let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded::<()>(0);
        let mut server = Self {
            shared: Arc::clone(&shared),
            notifier,
            shutdown_tx: Some(shutdown_tx),
            threads: Vec::with_capacity(workers + 2),
        };

        let mut inboxes = Vec::with_capacity(workers);
        for index in 0..workers {
            let (inbox_tx, inbox_rx) = crossbeam_channel::unbounded::<Inbound>();
            let (kick_tx, kick_rx) = crossbeam_channel::bounded::<()>(1);
            shared.lock.on_release(move || {
                let _ = kick_tx.try_send(());
            });

            let dispatcher = Dispatcher::new(
                index,
                Arc::clone(&shared),
                inbox_rx,
                kick_rx,
                shutdown_rx.clone(),
            );
            server.spawn(format!("ks-dispatch-{}", index), move || dispatcher.run())?;
            inboxes.push(inbox_tx);
        }

        {
            let shared = Arc::clone(&shared);
            let shutdown_rx = shutdown_rx.clone();
            server.spawn("ks-receive".to_string(), move || {
                dispatcher::receive_loop(shared, inboxes, shutdown_rx)
            })?;
        }

        {
            let transport = Arc::clone(&shared.transport);
            server.spawn("ks-notify".to_string(), move || {
                notify_loop(transport, notify_rx, shutdown_rx)
            })?;
        }

        tracing::info!(
            "[Dispatcher] Control server listening on port {} with {} worker(s)",
            shared.transport.local_port(),
            workers
        );
        Ok(server)
    }

    fn spawn(&mut self, name: String, body: impl FnOnce() + Send + 'static) -> Result<()> {
        let thread = std::thread::Builder::new()
            .name(name.clone())
            .spawn(body)
            .map_err(|e| KsError::Other(anyhow::anyhow!("Failed to spawn {}: {}", name, e)))?;
        self.threads.push(thread);
        Ok(())
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.shared.registry
    }

    pub fn lock(&self) -> &Arc<TopologyLock> {
        &self.shared.lock
    }

    /// Notifications waiting for the topology lock to be released.
    pub fn pending_notifications(&self) -> usize {
        self.notifier.pending_len()
    }

    pub fn port(&self) -> PortId {
        self.shared.transport.local_port()
    }

    /// Stop all server threads. Parked requests are answered with AGAIN.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        if self.shutdown_tx.take().is_none() {
            return;
        }
        self.shared.registry.clear_listener();
        for thread in self.threads.drain(..) {
            if thread.join().is_err() {
                tracing::error!("[Dispatcher] Server thread panicked");
            }
        }
        tracing::info!("[Dispatcher] Control server on port {} stopped", self.port());
    }
}

impl Drop for ControlServer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn notify_loop(transport: Arc<dyn Transport>, outbox: Receiver<Bytes>, shutdown: Receiver<()>) {
    loop {
        crossbeam_channel::select! {
            recv(outbox) -> result => match result {
                Ok(datagram) => broadcast(transport.as_ref(), datagram),
                Err(_) => break,
            },
            recv(shutdown) -> _ => {
                while let Ok(datagram) = outbox.try_recv() {
                    broadcast(transport.as_ref(), datagram);
                }
                break;
            }
        }
    }
}

fn broadcast(transport: &dyn Transport, datagram: Bytes) {
    if let Err(err) = transport.broadcast(TOPOLOGY_GROUP, datagram) {
        tracing::warn!("[Notifier] Broadcast to topology group failed: {}", err);
    }
}
