// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Abilities: behaviors triggered by a traveler entering or leaving a place.
//!
//! An ability is owned either by a place archetype (entity or relationship)
//! or by a traveler archetype. Place-side abilities filter on the traveler's
//! type; traveler-side abilities filter on the place's type. Filters match by
//! exact type, by ancestor, by any member of a union, or always (wildcard).
use crate::graph::GraphError;
use crate::ident::TypeId;
use crate::scheduler::Visit;
use crate::schema::TypeHierarchy;

/// Function pointer executed when an ability fires.
///
/// Returning an error records a fault against the ability; the walk goes on.
pub type AbilityFn = fn(&mut Visit<'_>) -> Result<(), GraphError>;

/// Walk event an ability reacts to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Event {
    /// The traveler arrived at the place.
    Entry,
    /// The traveler is leaving the place after finishing every queued visit.
    Exit,
}

/// Which party of a visit owns an ability.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Side {
    /// Owned by the traveler's archetype.
    Traveler,
    /// Owned by the place's archetype.
    Place,
}

/// Counterpart types an ability applies to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TypeFilter {
    /// Every counterpart.
    Any,
    /// Counterparts that are, or inherit from, one of the listed types.
    OneOf(Vec<TypeId>),
}

impl TypeFilter {
    /// Returns `true` when `ty` passes the filter.
    #[must_use]
    pub fn matches(&self, hierarchy: &TypeHierarchy, ty: TypeId) -> bool {
        match self {
            Self::Any => true,
            Self::OneOf(types) => types.iter().any(|t| hierarchy.is_a(ty, *t)),
        }
    }
}

/// Ability declaration, resolved by [`crate::RegistryBuilder::build`].
#[derive(Clone)]
pub struct AbilityDecl {
    /// Unique ability name, used in traces and fault records.
    pub name: &'static str,
    /// Owning archetype name.
    pub owner: String,
    /// Triggering event.
    pub event: Event,
    /// Counterpart type names. Empty means wildcard.
    pub filter: Vec<String>,
    /// Body.
    pub run: AbilityFn,
}

impl AbilityDecl {
    /// Declares an entry ability on `owner`.
    pub fn entry(name: &'static str, owner: &str, run: AbilityFn) -> Self {
        Self {
            name,
            owner: owner.to_owned(),
            event: Event::Entry,
            filter: Vec::new(),
            run,
        }
    }

    /// Declares an exit ability on `owner`.
    pub fn exit(name: &'static str, owner: &str, run: AbilityFn) -> Self {
        Self {
            event: Event::Exit,
            ..Self::entry(name, owner, run)
        }
    }

    /// Restricts the ability to counterparts of the given types (a union).
    pub fn matching(mut self, types: &[&str]) -> Self {
        self.filter = types.iter().map(|t| (*t).to_owned()).collect();
        self
    }
}

/// Resolved ability.
#[derive(Clone)]
pub struct Ability {
    /// Unique ability name.
    pub name: &'static str,
    /// Owning archetype.
    pub owner: TypeId,
    /// Traveler-side or place-side.
    pub side: Side,
    /// Triggering event.
    pub event: Event,
    /// Counterpart filter.
    pub filter: TypeFilter,
    /// Body.
    pub run: AbilityFn,
    /// Global declaration sequence number.
    pub seq: usize,
}

impl core::fmt::Debug for AbilityDecl {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AbilityDecl")
            .field("name", &self.name)
            .field("owner", &self.owner)
            .field("event", &self.event)
            .field("filter", &self.filter)
            .finish_non_exhaustive()
    }
}

impl core::fmt::Debug for Ability {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Ability")
            .field("name", &self.name)
            .field("side", &self.side)
            .field("event", &self.event)
            .field("seq", &self.seq)
            .finish_non_exhaustive()
    }
}
