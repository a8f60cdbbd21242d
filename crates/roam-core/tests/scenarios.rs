// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
#![allow(missing_docs, clippy::unwrap_used, clippy::expect_used)]
//! End-to-end traversal scenarios over the fixture schema.

use roam_core::{
    AccessController, AccessLevel, Fields, GraphError, Halt, NeighborQuery, ObjectId,
    SpawnRequest, Step,
};
use roam_dry_tests::{
    chain, names, place, reports_with, star, RuntimeTestBuilder, ROAD, ROAMER, STOPPER,
};

fn exits(trace: &[Step]) -> usize {
    trace.iter().filter(|s| matches!(s, Step::Exit(_))).count()
}

#[test]
fn chain_walk_enters_in_order_and_exits_in_reverse() {
    let (runtime, root) = RuntimeTestBuilder::new().build();
    let mut session = runtime.session(root).unwrap();
    chain(session.graph(), root.node(), &["A", "B", "C"]).unwrap();
    session.commit().unwrap();

    let result = runtime.spawn(root, SpawnRequest::new(ROAMER)).unwrap();
    assert_eq!(result.halt, Halt::Completed);
    assert!(!result.aborted);
    assert_eq!(names(session.graph(), &result.path), ["root", "A", "B", "C"]);
    // The walk starts on the root; the places it travels to are [A, B, C].
    assert_eq!(result.path[0], ObjectId::from(root));
    assert_eq!(names(session.graph(), &result.path[1..]), ["A", "B", "C"]);
    assert_eq!(reports_with(&result, "enter:"), ["A", "B", "C"]);
    assert_eq!(reports_with(&result, "exit:"), ["C", "B", "A"]);
    assert_eq!(result.steps, 4);
}

#[test]
fn siblings_exit_in_reverse_entry_order() {
    let (runtime, root) = RuntimeTestBuilder::new().build();
    let mut session = runtime.session(root).unwrap();
    star(session.graph(), root.node(), &["a", "b", "c"]).unwrap();
    session.commit().unwrap();

    let result = runtime.spawn(root, SpawnRequest::new(ROAMER)).unwrap();
    assert_eq!(reports_with(&result, "enter:"), ["a", "b", "c"]);
    assert_eq!(reports_with(&result, "exit:"), ["c", "b", "a"]);
    // Every entered place exits exactly once, root included.
    assert_eq!(exits(&result.trace), result.path.len());
}

#[test]
fn disengage_stops_before_any_exit() {
    let (runtime, root) = RuntimeTestBuilder::new().build();
    let mut session = runtime.session(root).unwrap();
    star(session.graph(), root.node(), &["a", "b", "c"]).unwrap();
    session.commit().unwrap();

    let request = SpawnRequest::new(STOPPER).with_fields(Fields::new().with("stop_at", "b"));
    let result = runtime.spawn(root, request).unwrap();
    assert!(result.aborted);
    assert_eq!(result.halt, Halt::Disengaged);
    assert_eq!(names(session.graph(), &result.path), ["root", "a", "b"]);
    assert_eq!(result.path[0], ObjectId::from(root));
    assert_eq!(names(session.graph(), &result.path[1..]), ["a", "b"]);
    assert_eq!(exits(&result.trace), 0);
    assert!(reports_with(&result, "exit:").is_empty());
}

#[test]
fn public_read_allows_reading_but_not_writing() {
    let (runtime, alice) = RuntimeTestBuilder::new().build();
    let bob = runtime.create_root("bob").unwrap();

    let mut owner = runtime.session(alice).unwrap();
    let hub = chain(owner.graph(), alice.node(), &["hub"]).unwrap()[0];
    let shared = place(owner.graph(), "shared").unwrap();
    let hidden = place(owner.graph(), "hidden").unwrap();
    for target in [shared, hidden] {
        let edge = owner
            .graph()
            .connect(hub, target, ROAD, Fields::new(), true)
            .unwrap();
        owner.graph().grant(edge.into(), AccessLevel::Read).unwrap();
    }
    owner.graph().grant(hub.into(), AccessLevel::Read).unwrap();
    owner.graph().grant(shared.into(), AccessLevel::Read).unwrap();
    owner.commit().unwrap();

    let mut guest = runtime.session(bob).unwrap();
    let anchor = owner.graph().anchor(shared.into()).unwrap();
    assert!(AccessController::check(bob, &anchor, AccessLevel::Read));
    assert!(!AccessController::check(bob, &anchor, AccessLevel::Write));

    let err = guest
        .graph()
        .connect(bob.node(), shared, ROAD, Fields::new(), true)
        .unwrap_err();
    assert!(matches!(
        err,
        GraphError::PermissionDenied { object, required: AccessLevel::Connect }
            if object == ObjectId::from(shared)
    ));

    // Reads filter instead of failing.
    let visible = guest.graph().neighbors(hub, &NeighborQuery::outgoing()).unwrap();
    assert_eq!(visible, vec![shared]);

    let result = runtime
        .spawn(bob, SpawnRequest::new(ROAMER).at(hub))
        .unwrap();
    assert_eq!(reports_with(&result, "enter:"), ["hub", "shared"]);
}
