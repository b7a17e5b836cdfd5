// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Attribute encoding of graph objects.
//!
//! Shared by the server (replies and notifications) and the client (request
//! building and reply parsing).

use kstreamer_wire::protocol::{chan_attr, node_attr, pipeline_attr, version_attr};
use kstreamer_wire::{Message, MessageBuilder, MessageFlags, MessageType};

use crate::error::{KsError, Result};
use crate::graph::{ChannelInfo, Mtu, NodeInfo, PipelineInfo, PipelineStatus, TopologyEvent};

/// Addressing of an outgoing message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Envelope {
    pub flags: MessageFlags,
    pub port_id: u32,
    pub seq: u32,
}

/// Protocol version reported by a VERSION reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtocolVersion {
    pub major: u32,
    pub minor: u32,
    pub service: u32,
}

pub fn pipeline_message(
    message_type: MessageType,
    info: &PipelineInfo,
    envelope: Envelope,
) -> Result<Message> {
    let mut builder = MessageBuilder::new(message_type)
        .flags(envelope.flags)
        .port_id(envelope.port_id)
        .seq(envelope.seq)
        .attr_u32(pipeline_attr::ID, info.id);
    if message_type != MessageType::PipelineDel {
        builder = builder.attr_u32(pipeline_attr::STATUS, info.status.rank());
        for chan in &info.channels {
            builder = builder.attr_u32(pipeline_attr::CHAN_ID, *chan);
        }
        if let Some(mtu) = info.mtu {
            builder = builder.attr_u32(pipeline_attr::MTU, mtu);
        }
    }
    Ok(builder.build()?)
}

pub fn node_message(info: &NodeInfo, envelope: Envelope) -> Result<Message> {
    Ok(MessageBuilder::new(MessageType::NodeNew)
        .flags(envelope.flags)
        .port_id(envelope.port_id)
        .seq(envelope.seq)
        .attr_u32(node_attr::ID, info.id)
        .attr_str(node_attr::NAME, &info.name)
        .build()?)
}

pub fn channel_message(info: &ChannelInfo, envelope: Envelope) -> Result<Message> {
    let mut builder = MessageBuilder::new(MessageType::ChanNew)
        .flags(envelope.flags)
        .port_id(envelope.port_id)
        .seq(envelope.seq)
        .attr_u32(chan_attr::ID, info.id)
        .attr_str(chan_attr::NAME, &info.name)
        .attr_u32(chan_attr::FROM, info.from)
        .attr_u32(chan_attr::TO, info.to)
        .attr_i32(chan_attr::MTU, info.mtu.to_wire());
    if let Some(pipeline) = info.pipeline {
        builder = builder.attr_u32(chan_attr::PIPELINE_ID, pipeline);
    }
    Ok(builder.build()?)
}

pub fn version_message(version: ProtocolVersion, envelope: Envelope) -> Result<Message> {
    Ok(MessageBuilder::new(MessageType::Version)
        .flags(envelope.flags)
        .port_id(envelope.port_id)
        .seq(envelope.seq)
        .attr_u32(version_attr::MAJOR, version.major)
        .attr_u32(version_attr::MINOR, version.minor)
        .attr_u32(version_attr::SERVICE, version.service)
        .build()?)
}

/// Broadcast form of a registry event.
pub fn event_message(event: &TopologyEvent, seq: u32) -> Result<Message> {
    let message_type = match event {
        TopologyEvent::PipelineNew(_) => MessageType::PipelineNew,
        TopologyEvent::PipelineChanged(_) => MessageType::PipelineSet,
        TopologyEvent::PipelineDeleted(_) => MessageType::PipelineDel,
    };
    pipeline_message(
        message_type,
        event.pipeline(),
        Envelope {
            flags: MessageFlags::empty(),
            port_id: 0,
            seq,
        },
    )
}

/// Parse a status attribute value.
pub fn parse_status(rank: u32) -> Result<PipelineStatus> {
    PipelineStatus::from_rank(rank)
        .ok_or_else(|| KsError::Invalid(format!("unknown pipeline status {}", rank)))
}

pub fn parse_pipeline(msg: &Message) -> Result<PipelineInfo> {
    let mut id = None;
    let mut info = PipelineInfo {
        id: 0,
        status: PipelineStatus::Null,
        mtu: None,
        channels: Vec::new(),
    };
    for attr in msg.attrs() {
        let attr = attr?;
        match attr.attr_type() {
            pipeline_attr::ID => id = Some(attr.as_u32()?),
            pipeline_attr::STATUS => info.status = parse_status(attr.as_u32()?)?,
            pipeline_attr::CHAN_ID => info.channels.push(attr.as_u32()?),
            pipeline_attr::MTU => info.mtu = Some(attr.as_u32()?),
            other => {
                tracing::debug!("[Client] Ignoring pipeline attribute {}", other);
            }
        }
    }
    info.id = id.ok_or_else(|| KsError::Invalid("pipeline message without ID".into()))?;
    Ok(info)
}

pub fn parse_node(msg: &Message) -> Result<NodeInfo> {
    let mut id = None;
    let mut name = String::new();
    for attr in msg.attrs() {
        let attr = attr?;
        match attr.attr_type() {
            node_attr::ID => id = Some(attr.as_u32()?),
            node_attr::NAME => name = attr.as_str()?.to_string(),
            _ => {}
        }
    }
    Ok(NodeInfo {
        id: id.ok_or_else(|| KsError::Invalid("node message without ID".into()))?,
        name,
    })
}

pub fn parse_channel(msg: &Message) -> Result<ChannelInfo> {
    let mut id = None;
    let mut info = ChannelInfo {
        id: 0,
        name: String::new(),
        from: 0,
        to: 0,
        mtu: Mtu::Unbounded,
        pipeline: None,
    };
    for attr in msg.attrs() {
        let attr = attr?;
        match attr.attr_type() {
            chan_attr::ID => id = Some(attr.as_u32()?),
            chan_attr::NAME => info.name = attr.as_str()?.to_string(),
            chan_attr::FROM => info.from = attr.as_u32()?,
            chan_attr::TO => info.to = attr.as_u32()?,
            chan_attr::MTU => info.mtu = Mtu::from_wire(attr.as_i32()?),
            chan_attr::PIPELINE_ID => info.pipeline = Some(attr.as_u32()?),
            _ => {}
        }
    }
    info.id = id.ok_or_else(|| KsError::Invalid("channel message without ID".into()))?;
    Ok(info)
}

pub fn parse_version(msg: &Message) -> Result<ProtocolVersion> {
    let mut version = ProtocolVersion {
        major: 0,
        minor: 0,
        service: 0,
    };
    for attr in msg.attrs() {
        let attr = attr?;
        match attr.attr_type() {
            version_attr::MAJOR => version.major = attr.as_u32()?,
            version_attr::MINOR => version.minor = attr.as_u32()?,
            version_attr::SERVICE => version.service = attr.as_u32()?,
            _ => {}
        }
    }
    Ok(version)
}
