// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

/// Pipeline lifecycle driven through the registry and over the wire.
mod common;

use common::{C1, C2, C3, Harness, ring};
use kstreamer::{KsError, PipelineStatus, ServerConfig};

#[test]
fn test_null_to_open_runs_hooks_along_the_path() {
    let (registry, recorder) = ring();
    let pipeline = registry.create();
    pipeline.attach(&registry.channel(C1).unwrap()).unwrap();
    pipeline.attach(&registry.channel(C2).unwrap()).unwrap();

    pipeline.change_status(PipelineStatus::Open).unwrap();
    assert_eq!(
        recorder.take(),
        vec![
            "e1.connect",
            "c1.connect",
            "switch.connect",
            "c2.connect",
            "netdev.connect",
            "e1.open",
            "c1.open",
            "switch.open",
            "c2.open",
            "netdev.open",
        ]
    );
    assert_eq!(pipeline.status(), PipelineStatus::Open);
    // c2 is unbounded, so c1 decides.
    assert_eq!(pipeline.mtu(), Some(1500));
}

#[test]
fn test_registry_ids_not_reused_right_away() {
    let (registry, _) = ring();
    let ids: Vec<u32> = (0..3)
        .map(|_| registry.register(&registry.create()).unwrap())
        .collect();
    assert_eq!(ids, vec![1, 2, 3]);

    let second = registry.get_by_id(2).unwrap();
    registry.unregister(&second).unwrap();
    assert!(matches!(registry.get_by_id(2), Err(KsError::NotFound(_))));

    assert_eq!(registry.register(&registry.create()).unwrap(), 4);
    assert_eq!(registry.pipeline_count(), 3);
    assert!(matches!(registry.get_by_id(2), Err(KsError::NotFound(_))));
}

#[test]
fn test_channel_never_in_two_pipelines() {
    let (registry, _) = ring();
    let c1 = registry.channel(C1).unwrap();

    let first = registry.create();
    first.attach(&c1).unwrap();
    let second = registry.create();
    assert!(matches!(second.attach(&c1), Err(KsError::Conflict(_))));

    drop(first);
    assert!(!c1.is_attached());
    second.attach(&c1).unwrap();
}

#[test]
fn test_pipeline_new_over_the_wire() {
    let harness = Harness::start(ServerConfig::default());
    let client = harness.connect();

    let info = client
        .pipeline_new(&[C1, C2], Some(PipelineStatus::Open))
        .expect("pipeline_new");
    assert_eq!(info.id, 1);
    assert_eq!(info.status, PipelineStatus::Open);
    assert_eq!(info.channels, vec![C1, C2]);
    assert_eq!(info.mtu, Some(1500));

    let channels = client.channels().expect("channels");
    let owner = |id| channels.iter().find(|c| c.id == id).and_then(|c| c.pipeline);
    assert_eq!(owner(C1), Some(1));
    assert_eq!(owner(C3), None);

    let changed = client
        .pipeline_set_status(1, PipelineStatus::Connected)
        .expect("pipeline_set_status");
    assert_eq!(changed.status, PipelineStatus::Connected);
    assert_eq!(changed.mtu, None);

    assert_eq!(client.pipeline_del(1).expect("pipeline_del"), 1);
    assert!(client.pipelines().expect("pipelines").is_empty());
    assert!(!harness.server.registry().channel(C1).unwrap().is_attached());
}

#[test]
fn test_pipeline_new_defaults_to_connected() {
    let harness = Harness::start(ServerConfig::default());
    let client = harness.connect();

    let info = client.pipeline_new(&[C3], None).expect("pipeline_new");
    assert_eq!(info.status, PipelineStatus::Connected);
    assert_eq!(
        harness.recorder.take(),
        vec!["netdev.connect", "c3.connect", "e1.connect"]
    );
}

#[test]
fn test_failed_hook_leaves_nothing_behind() {
    let harness = Harness::start(ServerConfig::default());
    let client = harness.connect();
    *harness.recorder.fail_on.lock() = Some("switch.open".to_string());

    let err = client
        .pipeline_new(&[C1, C2], Some(PipelineStatus::Open))
        .unwrap_err();
    assert!(matches!(err, KsError::Remote(_)), "got {:?}", err);

    let registry = harness.server.registry();
    assert_eq!(registry.pipeline_count(), 0);
    assert!(!registry.channel(C1).unwrap().is_attached());
    assert!(!registry.channel(C2).unwrap().is_attached());

    // The failed OPEN step is unwound in reverse, then CONNECTED is left.
    let log = harness.recorder.take();
    let after_connect: Vec<&str> = log.iter().skip(5).map(String::as_str).collect();
    assert_eq!(
        after_connect,
        vec![
            "e1.open",
            "c1.open",
            "switch.open",
            "c1.close",
            "e1.close",
            "c1.disconnect",
            "e1.disconnect",
            "c2.disconnect",
            "switch.disconnect",
            "netdev.disconnect",
        ]
    );
}

#[test]
fn test_pipeline_new_rejects_bad_requests() {
    let harness = Harness::start(ServerConfig::default());
    let client = harness.connect();

    assert!(matches!(
        client.pipeline_new(&[99], None),
        Err(KsError::Unavailable(_))
    ));

    client.pipeline_new(&[C1], None).unwrap();
    assert!(matches!(
        client.pipeline_new(&[C2, C1], None),
        Err(KsError::Conflict(_))
    ));
    // The failed request released c2 again.
    client.pipeline_new(&[C2], None).unwrap();

    assert!(matches!(
        client.pipeline_set_status(42, PipelineStatus::Open),
        Err(KsError::NotFound(_))
    ));
    assert!(matches!(client.pipeline_del(42), Err(KsError::NotFound(_))));
}
