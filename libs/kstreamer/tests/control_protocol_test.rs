// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

/// Wire-level behaviour of the control server: reply shapes, sequence
/// numbering, datagram splitting and deferred topology broadcasts.
mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{C1, C2, C3, Harness, exchange};
use kstreamer::wire::protocol::{NOTIFY_SEQ_START, TOPOLOGY_GROUP, pipeline_attr};
use kstreamer::wire::{ErrorCode, Message, MessageBuilder, MessageFlags, MessageType, decode_datagram};
use kstreamer::{ConnectionState, PipelineStatus, Request, ServerConfig, SyncState, Transport};
use parking_lot::Mutex;

fn request(message_type: impl Into<u16>, seq: u32) -> Message {
    MessageBuilder::new(message_type)
        .flags(MessageFlags::REQUEST | MessageFlags::ACK)
        .port_id(7)
        .seq(seq)
        .build()
        .unwrap()
}

fn register_empty_pipelines(harness: &Harness, count: usize) {
    let registry = harness.server.registry();
    for _ in 0..count {
        registry.register(&registry.create()).unwrap();
    }
}

#[test]
fn test_get_on_empty_registry_is_ack_and_done() {
    let harness = Harness::start(ServerConfig::default());
    let raw = harness.raw();

    let (replies, _) = exchange(&raw, &request(MessageType::PipelineGet, 5), Message::is_done);
    assert_eq!(replies.len(), 2);

    let ack = &replies[0];
    assert_eq!(ack.kind(), Some(MessageType::PipelineGet));
    assert!(ack.flags().contains(MessageFlags::ACK | MessageFlags::MULTI));
    assert_eq!(ack.seq(), 5);
    assert_eq!(ack.port_id(), 7);

    let done = &replies[1];
    assert!(done.is_done());
    assert_eq!(done.seq(), 6);
    assert_eq!(done.done_count(), Some(0));
}

#[test]
fn test_get_numbers_elements_after_request() {
    let harness = Harness::start(ServerConfig::default());
    register_empty_pipelines(&harness, 3);
    let raw = harness.raw();

    let (replies, _) = exchange(&raw, &request(MessageType::PipelineGet, 100), Message::is_done);
    let seqs: Vec<u32> = replies.iter().map(Message::seq).collect();
    assert_eq!(seqs, vec![100, 101, 102, 103, 104]);

    for element in &replies[1..4] {
        assert_eq!(element.kind(), Some(MessageType::PipelineNew));
        assert!(element.is_multi());
    }
    assert_eq!(replies[4].done_count(), Some(3));
}

#[test]
fn test_dump_splits_across_datagrams() {
    // 64 bytes holds the ack and one 32-byte element, or two elements.
    let harness = Harness::start(ServerConfig {
        buffer_size: 64,
        ..ServerConfig::default()
    });
    register_empty_pipelines(&harness, 6);
    let raw = harness.raw();

    let (replies, datagrams) =
        exchange(&raw, &request(MessageType::PipelineGet, 1), Message::is_done);
    assert!(datagrams > 1, "expected a split reply, got {} datagram", datagrams);
    let seqs: Vec<u32> = replies.iter().map(Message::seq).collect();
    assert_eq!(seqs, (1..=8).collect::<Vec<u32>>());
    assert_eq!(replies.last().unwrap().done_count(), Some(6));
}

#[test]
fn test_unknown_and_non_request_messages_rejected() {
    let harness = Harness::start(ServerConfig::default());
    let raw = harness.raw();

    let (replies, _) = exchange(&raw, &request(999u16, 3), |_| true);
    assert_eq!(replies[0].kind(), Some(MessageType::Error));
    assert_eq!(replies[0].seq(), 3);
    assert_eq!(replies[0].error_code().unwrap(), Some(ErrorCode::Invalid));

    let not_a_request = MessageBuilder::new(MessageType::Noop).seq(4).build().unwrap();
    let (replies, _) = exchange(&raw, &not_a_request, |_| true);
    assert_eq!(replies[0].error_code().unwrap(), Some(ErrorCode::Invalid));

    // NODE_NEW exists on the wire but is not a command.
    let (replies, _) = exchange(&raw, &request(MessageType::NodeNew, 5), |_| true);
    assert_eq!(replies[0].error_code().unwrap(), Some(ErrorCode::Invalid));
}

#[test]
fn test_bad_pipeline_attributes() {
    let harness = Harness::start(ServerConfig::default());
    let raw = harness.raw();
    let first_code = |msg: Message| {
        let (replies, _) = exchange(&raw, &msg, |_| true);
        replies[0].error_code().unwrap()
    };

    let bad_status = MessageBuilder::new(MessageType::PipelineNew)
        .flags(MessageFlags::REQUEST | MessageFlags::ACK)
        .attr_u32(pipeline_attr::STATUS, 7)
        .attr_u32(pipeline_attr::CHAN_ID, C1)
        .build()
        .unwrap();
    assert_eq!(first_code(bad_status), Some(ErrorCode::Invalid));

    let stray_attr = MessageBuilder::new(MessageType::PipelineNew)
        .flags(MessageFlags::REQUEST | MessageFlags::ACK)
        .attr_u32(pipeline_attr::CHAN_ID, C1)
        .attr_u32(99, 0)
        .build()
        .unwrap();
    assert_eq!(first_code(stray_attr), Some(ErrorCode::Invalid));

    let no_id = MessageBuilder::new(MessageType::PipelineDel)
        .flags(MessageFlags::REQUEST | MessageFlags::ACK)
        .build()
        .unwrap();
    assert_eq!(first_code(no_id), Some(ErrorCode::NotFound));

    assert_eq!(harness.server.registry().pipeline_count(), 0);
    assert!(!harness.server.registry().channel(C1).unwrap().is_attached());
}

#[test]
fn test_version() {
    let harness = Harness::start(ServerConfig::default());
    let client = harness.connect();
    let version = client.version().unwrap();
    assert_eq!((version.major, version.minor, version.service), (1, 0, 0));
    client.noop().unwrap();
}

#[test]
fn test_notifications_deferred_until_unlock() {
    let harness = Harness::start(ServerConfig::default());
    let subscriber = harness.raw();
    subscriber.subscribe(TOPOLOGY_GROUP).unwrap();
    let client = harness.connect();

    client.lock().unwrap();
    client.pipeline_new(&[C1], None).unwrap();
    client.pipeline_new(&[C2], None).unwrap();
    assert!(
        subscriber
            .recv_timeout(Duration::from_millis(100))
            .unwrap()
            .is_none()
    );
    assert_eq!(harness.server.pending_notifications(), 2);

    client.unlock().unwrap();
    let mut seen = Vec::new();
    while seen.len() < 2 {
        let datagram = subscriber
            .recv_timeout(Duration::from_secs(2))
            .unwrap()
            .expect("notification after unlock");
        assert_eq!(datagram.group, Some(TOPOLOGY_GROUP));
        seen.extend(decode_datagram(datagram.payload).unwrap());
    }

    assert_eq!(seen[0].seq(), NOTIFY_SEQ_START);
    assert_eq!(seen[1].seq(), NOTIFY_SEQ_START + 1);
    assert!(seen.iter().all(|m| m.kind() == Some(MessageType::PipelineNew)));
    assert_eq!(harness.server.pending_notifications(), 0);
}

#[test]
fn test_implicit_writes_notify_immediately() {
    let harness = Harness::start(ServerConfig::default());
    let subscriber = harness.raw();
    subscriber.subscribe(TOPOLOGY_GROUP).unwrap();
    let client = harness.connect();

    client.pipeline_new(&[C3], None).unwrap();
    client
        .pipeline_set_status(1, PipelineStatus::Open)
        .unwrap();
    client.pipeline_del(1).unwrap();

    let mut kinds = Vec::new();
    while kinds.len() < 3 {
        let datagram = subscriber
            .recv_timeout(Duration::from_secs(2))
            .unwrap()
            .expect("notification");
        kinds.extend(
            decode_datagram(datagram.payload)
                .unwrap()
                .iter()
                .map(|m| m.kind()),
        );
    }
    assert_eq!(
        kinds,
        vec![
            Some(MessageType::PipelineNew),
            Some(MessageType::PipelineSet),
            Some(MessageType::PipelineDel),
        ]
    );
}

#[test]
fn test_client_multipart_handler_and_idle() {
    let harness = Harness::start(ServerConfig::default());
    register_empty_pipelines(&harness, 3);
    let client = harness.connect();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let request = Request::builder(MessageType::PipelineGet)
        .on_response(move |msg| sink.lock().push(msg.kind()))
        .build()
        .unwrap();
    client.submit(&request).unwrap();

    let seen = seen.lock();
    assert_eq!(seen.len(), 5);
    assert_eq!(seen[0], Some(MessageType::PipelineGet));
    assert_eq!(seen[4], Some(MessageType::Done));
    assert_eq!(client.state(), ConnectionState::Idle);
}

#[test]
fn test_batched_transaction() {
    let harness = Harness::start(ServerConfig::default());
    let client = harness.connect();

    let batch = [
        Request::new(MessageType::Noop),
        Request::builder(MessageType::PipelineNew)
            .attr_u32(pipeline_attr::CHAN_ID, C1)
            .build()
            .unwrap(),
        Request::new(MessageType::Version),
    ];
    client.transaction(&batch).unwrap();
    assert!(batch.iter().all(|r| r.is_complete()));
    assert_eq!(client.state(), ConnectionState::Idle);
    assert_eq!(harness.server.registry().pipeline_count(), 1);
}

#[test]
fn test_topology_cache_follows_broadcasts() {
    let harness = Harness::start(ServerConfig::default());
    let observer = harness.connect();
    let writer = harness.connect();

    writer.pipeline_new(&[C1], None).unwrap();
    observer.sync_topology().unwrap();
    assert_eq!(observer.sync_state(), SyncState::Synched);

    let snapshot = observer.topology();
    assert_eq!(snapshot.nodes.len(), 3);
    assert_eq!(snapshot.channels.len(), 3);
    assert_eq!(snapshot.pipelines.len(), 1);

    writer.pipeline_new(&[C2, C3], Some(PipelineStatus::Open)).unwrap();
    writer.pipeline_del(1).unwrap();

    let deadline = std::time::Instant::now() + Duration::from_secs(2);
    loop {
        let pipelines = observer.topology().pipelines;
        if pipelines.len() == 1 && pipelines[0].id == 2 {
            assert_eq!(pipelines[0].status, PipelineStatus::Open);
            break;
        }
        assert!(std::time::Instant::now() < deadline, "cache never caught up");
        std::thread::sleep(Duration::from_millis(10));
    }
}
