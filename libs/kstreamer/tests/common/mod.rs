// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Shared fixtures: a three-node ring served over a `MemoryBus`.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use kstreamer::wire::protocol::SERVER_PORT;
use kstreamer::wire::{Message, decode_datagram};
use kstreamer::{
    Channel, ChannelOps, ClientConfig, Connection, ControlServer, KsError, MemoryBus, MemoryEndpoint,
    Mtu, Node, NodeOps, Registry, Result, ServerConfig, Transport,
};
use parking_lot::Mutex;

pub const E1: u32 = 1;
pub const SWITCH: u32 = 2;
pub const NETDEV: u32 = 3;

/// e1 -> switch
pub const C1: u32 = 11;
/// switch -> netdev
pub const C2: u32 = 12;
/// netdev -> e1
pub const C3: u32 = 13;

/// Records hook calls as `"<name>.<hook>"` and fails the one named in
/// `fail_on`.
#[derive(Default)]
pub struct Recorder {
    pub log: Mutex<Vec<String>>,
    pub fail_on: Mutex<Option<String>>,
}

impl Recorder {
    fn record(&self, who: &str, hook: &str) -> Result<()> {
        let entry = format!("{}.{}", who, hook);
        self.log.lock().push(entry.clone());
        if self.fail_on.lock().as_deref() == Some(entry.as_str()) {
            return Err(KsError::Hook(entry));
        }
        Ok(())
    }

    pub fn take(&self) -> Vec<String> {
        std::mem::take(&mut *self.log.lock())
    }
}

impl NodeOps for Recorder {
    fn connect(&self, node: &Node, _: Option<&Channel>, _: Option<&Channel>) -> Result<()> {
        self.record(node.name(), "connect")
    }
    fn disconnect(&self, node: &Node, _: Option<&Channel>, _: Option<&Channel>) {
        let _ = self.record(node.name(), "disconnect");
    }
    fn open(&self, node: &Node, _: Option<&Channel>, _: Option<&Channel>) -> Result<()> {
        self.record(node.name(), "open")
    }
    fn close(&self, node: &Node, _: Option<&Channel>, _: Option<&Channel>) {
        let _ = self.record(node.name(), "close");
    }
}

impl ChannelOps for Recorder {
    fn connect(&self, chan: &Channel) -> Result<()> {
        self.record(chan.name(), "connect")
    }
    fn disconnect(&self, chan: &Channel) {
        let _ = self.record(chan.name(), "disconnect");
    }
    fn open(&self, chan: &Channel) -> Result<()> {
        self.record(chan.name(), "open")
    }
    fn close(&self, chan: &Channel) {
        let _ = self.record(chan.name(), "close");
    }
}

/// Registry with nodes e1, switch, netdev and channels c1, c2, c3 forming
/// a ring, all driven by one recorder.
pub fn ring() -> (Arc<Registry>, Arc<Recorder>) {
    let recorder = Arc::new(Recorder::default());
    let registry = Registry::new();
    for (id, name) in [(E1, "e1"), (SWITCH, "switch"), (NETDEV, "netdev")] {
        registry
            .add_node(Node::new(id, name, recorder.clone() as Arc<dyn NodeOps>))
            .expect("add node");
    }
    for (id, name, from, to, mtu) in [
        (C1, "c1", E1, SWITCH, Mtu::Bounded(1500)),
        (C2, "c2", SWITCH, NETDEV, Mtu::Unbounded),
        (C3, "c3", NETDEV, E1, Mtu::Bounded(160)),
    ] {
        registry
            .add_channel(id, name, from, to, mtu, recorder.clone() as Arc<dyn ChannelOps>)
            .expect("add channel");
    }
    (registry, recorder)
}

pub struct Harness {
    pub bus: MemoryBus,
    pub server: ControlServer,
    pub recorder: Arc<Recorder>,
}

impl Harness {
    pub fn start(config: ServerConfig) -> Self {
        let (registry, recorder) = ring();
        let bus = MemoryBus::new();
        let endpoint = bus.bind(SERVER_PORT).expect("bind server port");
        let server = ControlServer::start(registry, Arc::new(endpoint), config)
            .expect("start server");
        Self {
            bus,
            server,
            recorder,
        }
    }

    pub fn connect(&self) -> Connection {
        self.connect_with(ClientConfig::default())
    }

    pub fn connect_with(&self, config: ClientConfig) -> Connection {
        let endpoint = self.bus.bind_any().expect("bind client port");
        Connection::open(Arc::new(endpoint), SERVER_PORT, config).expect("open connection")
    }

    /// Bare endpoint for hand-written requests.
    pub fn raw(&self) -> MemoryEndpoint {
        self.bus.bind_any().expect("bind raw port")
    }
}

/// Send `request` to the server and collect replies until `last` matches
/// one. Returns the messages and the number of datagrams they came in.
pub fn exchange(
    endpoint: &MemoryEndpoint,
    request: &Message,
    last: impl Fn(&Message) -> bool,
) -> (Vec<Message>, usize) {
    endpoint
        .send(SERVER_PORT, request.to_datagram())
        .expect("send request");

    let mut messages = Vec::new();
    let mut datagrams = 0;
    loop {
        let datagram = endpoint
            .recv_timeout(Duration::from_secs(2))
            .expect("receive")
            .expect("reply before timeout");
        datagrams += 1;
        let decoded = decode_datagram(datagram.payload).expect("well-formed reply");
        let done = decoded.iter().any(&last);
        messages.extend(decoded);
        if done {
            return (messages, datagrams);
        }
    }
}
