// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
#![allow(missing_docs, clippy::unwrap_used, clippy::expect_used)]
//! Tier behavior across requests: conflicts, cache expiry, read-through,
//! restarts and request-end garbage collection.

use std::sync::Arc;
use std::time::Duration;

use roam_core::{
    AccessLevel, Fields, FsDurable, MemoryDurable, NeighborQuery, ObjectId, RuntimeConfig,
    SpawnRequest, Value,
};
use roam_dry_tests::{
    chain, place, reports_with, CountingDurable, RuntimeTestBuilder, ROAD, ROAMER,
};

#[test]
fn concurrent_sessions_on_one_anchor_conflict() {
    let (runtime, root) = RuntimeTestBuilder::new().build();
    let mut setup = runtime.session(root).unwrap();
    let a = chain(setup.graph(), root.node(), &["a"]).unwrap()[0];
    setup.commit().unwrap();

    let mut first = runtime.session(root).unwrap();
    let mut second = runtime.session(root).unwrap();
    first.graph().set_field(a.into(), "name", "first").unwrap();
    second.graph().set_field(a.into(), "name", "second").unwrap();

    first.commit().unwrap();
    let err = second.commit().unwrap_err();
    assert!(err.is_conflict());
    second.rollback();

    let mut check = runtime.session(root).unwrap();
    assert_eq!(
        check.graph().get(a.into(), "name").unwrap(),
        Some(Value::from("first"))
    );
}

#[test]
fn disjoint_sessions_both_commit() {
    let (runtime, root) = RuntimeTestBuilder::new().build();
    let mut setup = runtime.session(root).unwrap();
    let nodes = roam_dry_tests::star(setup.graph(), root.node(), &["a", "b"]).unwrap();
    setup.commit().unwrap();

    let mut left = runtime.session(root).unwrap();
    let mut right = runtime.session(root).unwrap();
    left.graph().set_field(nodes[0].into(), "name", "A").unwrap();
    right.graph().set_field(nodes[1].into(), "name", "B").unwrap();
    assert_eq!(left.commit().unwrap().written, vec![ObjectId::from(nodes[0])]);
    assert_eq!(right.commit().unwrap().written, vec![ObjectId::from(nodes[1])]);
}

#[test]
fn stale_session_loses_to_a_later_commit() {
    let (runtime, root) = RuntimeTestBuilder::new().build();
    let mut setup = runtime.session(root).unwrap();
    chain(setup.graph(), root.node(), &["a"]).unwrap();
    setup.commit().unwrap();

    let mut stale = runtime.session(root).unwrap();
    let target = stale.graph().neighbors(root.node(), &NeighborQuery::outgoing()).unwrap()[0];
    stale.graph().set_field(target.into(), "name", "stale").unwrap();

    let mut fresh = runtime.session(root).unwrap();
    fresh.graph().set_field(target.into(), "name", "fresh").unwrap();
    fresh.commit().unwrap();

    assert!(stale.commit().unwrap_err().is_conflict());
    let result = runtime.spawn(root, SpawnRequest::new(ROAMER)).unwrap();
    assert_eq!(reports_with(&result, "enter:"), ["fresh"]);
}

#[test]
fn volatile_tier_serves_repeat_reads() {
    let durable = CountingDurable::in_memory();
    let (runtime, root) = RuntimeTestBuilder::new()
        .with_durable(durable.clone())
        .build();
    let mut setup = runtime.session(root).unwrap();
    let a = chain(setup.graph(), root.node(), &["a"]).unwrap()[0];
    setup.commit().unwrap();

    let mut session = runtime.session(root).unwrap();
    let fetches = durable.fetches();
    session.graph().get(a.into(), "name").unwrap();
    let hits = session.graph().tiers().stats().volatile_hits;
    session.graph().get(a.into(), "name").unwrap();
    assert!(session.graph().tiers().stats().volatile_hits > hits);
    assert_eq!(durable.fetches(), fetches);
}

#[test]
fn cache_entries_expire_after_ttl() {
    let durable = CountingDurable::in_memory();
    let config = RuntimeConfig {
        cache_ttl_ms: 250,
        ..RuntimeConfig::default()
    };
    let (runtime, root) = RuntimeTestBuilder::new()
        .with_config(config)
        .with_durable(durable.clone())
        .build();
    let mut setup = runtime.session(root).unwrap();
    let a = chain(setup.graph(), root.node(), &["a"]).unwrap()[0];
    setup.commit().unwrap();

    let mut warm = runtime.session(root).unwrap();
    let before = durable.fetches();
    warm.graph().get(a.into(), "name").unwrap();
    assert_eq!(durable.fetches(), before);
    assert!(warm.graph().tiers().stats().cache_hits >= 1);

    std::thread::sleep(Duration::from_millis(400));
    let mut cold = runtime.session(root).unwrap();
    let before = durable.fetches();
    cold.graph().get(a.into(), "name").unwrap();
    assert_eq!(durable.fetches(), before + 1);
}

#[test]
fn disabled_cache_always_reads_durable() {
    let durable = CountingDurable::in_memory();
    let config = RuntimeConfig {
        cache_ttl_ms: 0,
        ..RuntimeConfig::default()
    };
    let (runtime, root) = RuntimeTestBuilder::new()
        .with_config(config)
        .with_durable(durable.clone())
        .build();
    assert!(runtime.cache().is_empty());
    let before = durable.fetches();
    runtime.session(root).unwrap();
    assert_eq!(durable.fetches(), before + 1);
}

#[test]
fn filesystem_tier_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let root = {
        let durable = Arc::new(FsDurable::open(dir.path()).unwrap());
        let (runtime, root) = RuntimeTestBuilder::new().with_durable(durable).build();
        let mut session = runtime.session(root).unwrap();
        chain(session.graph(), root.node(), &["a", "b"]).unwrap();
        session.commit().unwrap();
        root
    };

    let durable = Arc::new(FsDurable::open(dir.path()).unwrap());
    let (runtime, reopened) = RuntimeTestBuilder::new().with_durable(durable).build();
    assert_eq!(reopened, root);
    let before = runtime.owned_by(root).unwrap().len();
    assert_eq!(before, 5);

    // Fresh epoch: ids minted after the restart never collide.
    let mut session = runtime.session(root).unwrap();
    chain(session.graph(), root.node(), &["c"]).unwrap();
    session.commit().unwrap();
    assert_eq!(runtime.owned_by(root).unwrap().len(), before + 2);

    let result = runtime.spawn(root, SpawnRequest::new(ROAMER)).unwrap();
    assert_eq!(reports_with(&result, "enter:"), ["a", "b", "c"]);
}

#[test]
fn unreachable_entities_are_reclaimed_at_commit() {
    let durable = Arc::new(MemoryDurable::new());
    let (runtime, root) = RuntimeTestBuilder::new()
        .with_durable(durable.clone())
        .build();
    let mut setup = runtime.session(root).unwrap();
    chain(setup.graph(), root.node(), &["a", "b", "c"]).unwrap();
    setup.commit().unwrap();
    assert_eq!(durable.len(), 7);

    let mut session = runtime.session(root).unwrap();
    let link = session.graph().edges(root.node(), &NeighborQuery::outgoing()).unwrap()[0];
    session.graph().disconnect(link).unwrap();
    let receipt = session.commit().unwrap();
    assert_eq!(receipt.deleted.len(), 6);
    assert_eq!(durable.len(), 1);
}

#[test]
fn never_linked_entity_does_not_survive_commit() {
    let durable = Arc::new(MemoryDurable::new());
    let (runtime, root) = RuntimeTestBuilder::new()
        .with_durable(durable.clone())
        .build();
    let mut session = runtime.session(root).unwrap();
    place(session.graph(), "floating").unwrap();
    let receipt = session.commit().unwrap();
    assert!(receipt.written.is_empty());
    assert_eq!(durable.len(), 1);
}

#[test]
fn link_from_another_tenant_keeps_an_entity_alive() {
    let (runtime, alice) = RuntimeTestBuilder::new().build();
    let bob = runtime.create_root("bob").unwrap();

    let mut bobs = runtime.session(bob).unwrap();
    let shared = chain(bobs.graph(), bob.node(), &["shared"]).unwrap()[0];
    bobs.graph()
        .allow_root(shared.into(), alice, AccessLevel::Connect)
        .unwrap();
    bobs.commit().unwrap();

    let mut alices = runtime.session(alice).unwrap();
    let hub = chain(alices.graph(), alice.node(), &["hub"]).unwrap()[0];
    alices
        .graph()
        .connect(hub, shared, ROAD, Fields::new(), true)
        .unwrap();
    alices.commit().unwrap();

    let mut bobs = runtime.session(bob).unwrap();
    let link = bobs.graph().edges(bob.node(), &NeighborQuery::outgoing()).unwrap()[0];
    bobs.graph().disconnect(link).unwrap();
    let receipt = bobs.commit().unwrap();
    assert!(!receipt.deleted.contains(&ObjectId::from(shared)));
    assert_eq!(
        bobs.graph().get(shared.into(), "name").unwrap(),
        Some(Value::from("shared"))
    );
}
