// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! kstreamer control plane.
//!
//! A [`Registry`] of nodes, channels and pipelines shared by many
//! requesters. Pipelines walk a four-state lifecycle by running hardware
//! hooks over their channels. Structural changes are serialized by a
//! global [`TopologyLock`], and every change is broadcast to subscribers
//! once the lock is free. [`ControlServer`] exposes all of it over a
//! datagram [`Transport`]; [`Connection`] is the blocking client.

#![allow(clippy::type_complexity)] // Handler and listener boxes read fine inline

pub mod client;
pub mod config;
pub mod error;
pub mod graph;
pub mod observability;
pub mod protocol;
pub mod server;
pub mod topology;
pub mod transport;

pub use kstreamer_wire as wire;

pub use client::{Connection, ConnectionState, Request, SyncState};
pub use config::{ClientConfig, KsConfig, LoggingConfig, ServerConfig};
pub use error::{KsError, Result};
pub use graph::{
    Channel, ChannelId, ChannelOps, Mtu, Node, NodeId, NodeOps, NoopOps, Pipeline, PipelineId,
    PipelineInfo, PipelineStatus, Registry, TopologyEvent, TopologyListener, TopologySnapshot,
};
pub use observability::init_logging;
pub use server::ControlServer;
pub use topology::TopologyLock;
pub use transport::{Datagram, MemoryBus, MemoryEndpoint, PortId, Transport};
