// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! roam-core: graph-native traversal runtime.
//!
//! Persistent data is a typed graph of entities and relationships owned by
//! tenant roots. Computation is a traveler walking that graph depth-first and
//! triggering abilities based on where it stands. Every step is checked
//! against per-object access lists, and every request stages its writes in a
//! volatile tier that reaches the durable tier in one atomic commit.
#![forbid(unsafe_code)]
#![deny(missing_docs, rust_2018_idioms, unused_must_use)]
#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    clippy::cargo,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::dbg_macro,
    clippy::print_stdout,
    clippy::print_stderr
)]
#![allow(
    clippy::must_use_candidate,
    clippy::return_self_not_must_use,
    clippy::unreadable_literal,
    clippy::missing_const_for_fn,
    clippy::suboptimal_flops,
    clippy::redundant_pub_crate,
    clippy::many_single_char_names,
    clippy::module_name_repetitions,
    clippy::use_self
)]

mod ability;
mod access;
mod anchor;
mod engine;
mod graph;
mod ident;
/// Tiered persistence: volatile, cache and durable tiers.
pub mod persistence;
mod record;
mod registry;
mod scheduler;
mod schema;
mod value;

/// Ability declarations and dispatch types.
pub use ability::{Ability, AbilityDecl, AbilityFn, Event, Side, TypeFilter};
/// Access levels, access lists and the permission oracle.
pub use access::{Access, AccessController, AccessLevel};
/// Persistence wrapper around records.
pub use anchor::{Anchor, Body};
/// Runtime entry points.
pub use engine::{EngineError, Runtime, RuntimeConfig, Session, SpawnRequest};
/// Request-scoped graph operations.
pub use graph::{Direction, GraphError, GraphStore, NeighborQuery};
/// Identifiers and id minting.
pub use ident::{
    make_edge_id, make_node_id, make_root_id, make_type_id, EdgeId, Hash, IdMint, NodeId,
    ObjectId, RootId, TypeId,
};
/// Persistence types most callers need.
pub use persistence::{
    CacheTier, CommitBatch, CommitReceipt, DurableStore, FsDurable, MemoryDurable, StoreError,
};
/// Entity and relationship records.
pub use record::{EdgeRecord, NodeRecord};
/// Schema and ability registry.
pub use registry::{Registry, RegistryBuilder, RegistryError};
/// Walk scheduler and traveler types.
pub use scheduler::{
    CancelToken, Fault, Halt, Step, TravelResult, Traveler, Visit, WalkOptions, WalkScheduler,
};
/// Archetypes and the type hierarchy.
pub use schema::{
    Archetype, ArchetypeDecl, ArchetypeKind, TypeHierarchy, GENERIC_EDGE_TYPE, ROOT_TYPE,
};
/// Field values.
pub use value::{Fields, Value};
