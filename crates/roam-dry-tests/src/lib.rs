// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Shared test doubles and fixtures for Roam crates.
#![forbid(unsafe_code)]
//!
//! # Modules
//!
//! - [`config`] - In-memory config store fake for testing without filesystem
//! - [`durable`] - Durable tier wrapper that counts reads and commits
//! - [`graphs`] - Graph shape builders (chains, stars) and path helpers
//! - [`runtime`] - Runtime builder with a tenant root
//! - [`travel`] - Fixture schema: places, roads and recording travelers

pub mod config;
pub mod durable;
pub mod graphs;
pub mod runtime;
pub mod travel;

pub use config::{FailMode, InMemoryConfigStore};
pub use durable::CountingDurable;
pub use graphs::{chain, names, place, reports_with, star};
pub use runtime::RuntimeTestBuilder;
pub use travel::{
    place_name, travel_registry, EDGE_ROAMER, PLACE, ROAD, ROAMER, STOPPER, TOWN,
};
