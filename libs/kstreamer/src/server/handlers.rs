// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Command handlers.
//!
//! A handler writes its replies through the context's [`ReplyWriter`]. An
//! error return is turned into an ERROR reply by the dispatcher.

use std::sync::Arc;

use kstreamer_wire::protocol::{VERSION_MAJOR, VERSION_MINOR, VERSION_SERVICE, pipeline_attr};
use kstreamer_wire::{Message, MessageFlags, MessageHeader, MessageType};

use super::ServerShared;
use super::reply::ReplyWriter;
use crate::error::{KsError, Result};
use crate::graph::{NodeInfo, Pipeline, PipelineId, PipelineStatus};
use crate::protocol::{self, Envelope, ProtocolVersion};
use crate::transport::PortId;

pub(crate) type Handler = fn(&mut RequestContext<'_>) -> Result<()>;

/// Everything a handler sees of one request.
pub(crate) struct RequestContext<'a> {
    pub shared: &'a ServerShared,
    /// Transport port the request came from; the requester identity.
    pub source: PortId,
    pub message: &'a Message,
    pub reply: ReplyWriter<'a>,
}

impl RequestContext<'_> {
    fn header(&self) -> MessageHeader {
        *self.message.header()
    }

    /// Envelope of a reply element `offset` sequence numbers after the request.
    fn envelope(&self, flags: MessageFlags, offset: u32) -> Envelope {
        let header = self.message.header();
        Envelope {
            flags,
            port_id: header.port_id,
            seq: header.seq.wrapping_add(offset),
        }
    }
}

pub(crate) fn noop(ctx: &mut RequestContext<'_>) -> Result<()> {
    let header = ctx.header();
    ctx.reply.ack(&header)
}

pub(crate) fn done(_ctx: &mut RequestContext<'_>) -> Result<()> {
    Ok(())
}

pub(crate) fn version(ctx: &mut RequestContext<'_>) -> Result<()> {
    let version = ProtocolVersion {
        major: VERSION_MAJOR,
        minor: VERSION_MINOR,
        service: VERSION_SERVICE,
    };
    let reply = protocol::version_message(version, ctx.envelope(MessageFlags::ACK, 0))?;
    ctx.reply.put(reply)
}

/// LOCK and BEGIN. A lock held by someone else parks the request.
pub(crate) fn lock(ctx: &mut RequestContext<'_>) -> Result<()> {
    ctx.shared
        .lock
        .try_lock(ctx.source)
        .map_err(|err| match err {
            KsError::Busy(reason) => KsError::Again(reason),
            other => other,
        })?;
    let header = ctx.header();
    ctx.reply.ack(&header)
}

pub(crate) fn trylock(ctx: &mut RequestContext<'_>) -> Result<()> {
    ctx.shared.lock.try_lock(ctx.source)?;
    let header = ctx.header();
    ctx.reply.ack(&header)
}

/// UNLOCK, COMMIT and ABORT.
pub(crate) fn unlock(ctx: &mut RequestContext<'_>) -> Result<()> {
    ctx.shared.lock.unlock(ctx.source)?;
    let header = ctx.header();
    ctx.reply.ack(&header)
}

pub(crate) fn node_get(ctx: &mut RequestContext<'_>) -> Result<()> {
    let nodes: Vec<NodeInfo> = ctx
        .shared
        .registry
        .nodes()
        .iter()
        .map(|n| NodeInfo {
            id: n.id(),
            name: n.name().to_string(),
        })
        .collect();
    dump(ctx, &nodes, protocol::node_message)
}

pub(crate) fn chan_get(ctx: &mut RequestContext<'_>) -> Result<()> {
    let channels: Vec<_> = ctx
        .shared
        .registry
        .channels()
        .iter()
        .map(|c| crate::graph::channel_info(c))
        .collect();
    dump(ctx, &channels, protocol::channel_message)
}

pub(crate) fn pipeline_get(ctx: &mut RequestContext<'_>) -> Result<()> {
    let pipelines: Vec<_> = ctx
        .shared
        .registry
        .pipelines()
        .iter()
        .map(|p| p.info())
        .collect();
    dump(ctx, &pipelines, |info, envelope| {
        protocol::pipeline_message(MessageType::PipelineNew, info, envelope)
    })
}

/// Multi-part reply: MULTI ack at `seq`, elements at `seq+1..=seq+N`, DONE
/// carrying N at `seq+N+1`.
fn dump<T>(
    ctx: &mut RequestContext<'_>,
    items: &[T],
    encode: impl Fn(&T, Envelope) -> Result<Message>,
) -> Result<()> {
    let header = ctx.header();
    ctx.reply.put(Message::ack(&header, MessageFlags::MULTI))?;

    let mut count: u32 = 0;
    for item in items {
        count += 1;
        let element = encode(item, ctx.envelope(MessageFlags::MULTI, count))?;
        ctx.reply.put(element)?;
    }

    let done_seq = header.seq.wrapping_add(count + 1);
    ctx.reply.put(Message::done(header.port_id, done_seq, count))
}

/// Bring an unlisted pipeline back to NULL and free its channels.
fn discard(pipeline: &Pipeline) {
    if let Err(err) = pipeline.change_status(PipelineStatus::Null) {
        tracing::warn!(
            "[Pipeline] Teardown of {} left it at {}: {}",
            pipeline.label(),
            pipeline.status().name(),
            err
        );
    }
    pipeline.detach_all();
}

pub(crate) fn pipeline_new(ctx: &mut RequestContext<'_>) -> Result<()> {
    let registry = Arc::clone(&ctx.shared.registry);
    let pipeline = registry.create();

    let requested = match populate(ctx, &pipeline) {
        Ok(status) => status,
        Err(err) => {
            discard(&pipeline);
            return Err(err);
        }
    };
    let target = match requested {
        PipelineStatus::Null => PipelineStatus::Connected,
        status => status,
    };

    tracing::debug!("[Pipeline] New pipeline: {}", pipeline.describe());

    if let Err(err) = pipeline.change_status(target) {
        discard(&pipeline);
        return Err(err);
    }
    if let Err(err) = registry.register(&pipeline) {
        discard(&pipeline);
        return Err(err);
    }

    let reply = protocol::pipeline_message(
        MessageType::PipelineNew,
        &pipeline.info(),
        ctx.envelope(MessageFlags::ACK, 0),
    )?;
    ctx.reply.put(reply)
}

/// Attach the requested channels and return the requested status.
fn populate(ctx: &RequestContext<'_>, pipeline: &Arc<Pipeline>) -> Result<PipelineStatus> {
    let mut status = PipelineStatus::Null;
    for attr in ctx.message.attrs() {
        let attr = attr?;
        match attr.attr_type() {
            pipeline_attr::STATUS => status = protocol::parse_status(attr.as_u32()?)?,
            pipeline_attr::CHAN_ID => {
                let id = attr.as_u32()?;
                let chan = ctx.shared.registry.channel(id).ok_or_else(|| {
                    KsError::Unavailable(format!("channel {} does not exist", id))
                })?;
                pipeline.attach(&chan)?;
            }
            other => {
                return Err(KsError::Invalid(format!(
                    "unexpected attribute {} in PIPELINE_NEW",
                    other
                )));
            }
        }
    }
    Ok(status)
}

pub(crate) fn pipeline_set(ctx: &mut RequestContext<'_>) -> Result<()> {
    let mut id = None;
    let mut status = None;
    for attr in ctx.message.attrs() {
        let attr = attr?;
        match attr.attr_type() {
            pipeline_attr::ID => id = Some(attr.as_u32()?),
            pipeline_attr::STATUS => status = Some(protocol::parse_status(attr.as_u32()?)?),
            other => {
                return Err(KsError::Invalid(format!(
                    "unexpected attribute {} in PIPELINE_SET",
                    other
                )));
            }
        }
    }
    let id = id.ok_or_else(|| KsError::NotFound("PIPELINE_SET without pipeline ID".into()))?;
    let status =
        status.ok_or_else(|| KsError::Invalid("PIPELINE_SET without STATUS".into()))?;

    let registry = &ctx.shared.registry;
    let pipeline = registry.get_by_id(id)?;
    pipeline.change_status(status)?;
    registry.notify_changed(&pipeline);

    let reply = protocol::pipeline_message(
        MessageType::PipelineSet,
        &pipeline.info(),
        ctx.envelope(MessageFlags::ACK, 0),
    )?;
    ctx.reply.put(reply)
}

pub(crate) fn pipeline_del(ctx: &mut RequestContext<'_>) -> Result<()> {
    let id = requested_id(ctx.message)?;
    let registry = &ctx.shared.registry;
    let pipeline = registry.get_by_id(id)?;
    let info = pipeline.info();
    registry.unregister(&pipeline)?;

    let reply = protocol::pipeline_message(
        MessageType::PipelineDel,
        &info,
        ctx.envelope(MessageFlags::ACK, 0),
    )?;
    ctx.reply.put(reply)
}

fn requested_id(message: &Message) -> Result<PipelineId> {
    let mut id = None;
    for attr in message.attrs() {
        let attr = attr?;
        match attr.attr_type() {
            pipeline_attr::ID => id = Some(attr.as_u32()?),
            other => {
                return Err(KsError::Invalid(format!(
                    "unexpected attribute {} in PIPELINE_DEL",
                    other
                )));
            }
        }
    }
    id.ok_or_else(|| KsError::NotFound("PIPELINE_DEL without pipeline ID".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Mtu, Node, NoopOps, Registry};

    #[test]
    fn test_discard_tears_down_and_frees_channels() {
        let registry = Registry::new();
        registry.add_node(Node::passive(1, "e1")).unwrap();
        registry.add_node(Node::passive(2, "switch")).unwrap();
        let chan = registry
            .add_channel(10, "e1-sw", 1, 2, Mtu::Bounded(160), Arc::new(NoopOps))
            .unwrap();

        let pipeline = registry.create();
        pipeline.attach(&chan).unwrap();
        pipeline.change_status(PipelineStatus::Open).unwrap();
        assert!(chan.is_attached());

        discard(&pipeline);
        assert_eq!(pipeline.status(), PipelineStatus::Null);
        assert!(!chan.is_attached());
        assert_eq!(registry.pipeline_count(), 0);
    }
}
