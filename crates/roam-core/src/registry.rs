// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Schema and ability registry, frozen once at load.
use rustc_hash::{FxHashMap, FxHashSet};
use thiserror::Error;

use crate::ability::{Ability, AbilityDecl, Event, Side, TypeFilter};
use crate::ident::TypeId;
use crate::schema::{ArchetypeDecl, ArchetypeKind, TypeHierarchy, GENERIC_EDGE_TYPE, ROOT_TYPE};
use crate::value::Fields;

/// Errors raised while freezing a [`RegistryBuilder`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// Two archetypes share a name.
    #[error("duplicate type: {0}")]
    DuplicateType(String),
    /// An archetype names a parent that was never declared.
    #[error("type {ty} has unknown parent {parent}")]
    UnknownParent {
        /// Declaring type.
        ty: String,
        /// Missing parent.
        parent: String,
    },
    /// An archetype inherits from an archetype of a different kind.
    #[error("type {ty} cannot inherit from {parent}: kinds differ")]
    KindMismatch {
        /// Declaring type.
        ty: String,
        /// Parent of another kind.
        parent: String,
    },
    /// The parent chain loops back on itself.
    #[error("inheritance cycle through {0}")]
    Cycle(String),
    /// Two abilities share a name.
    #[error("duplicate ability: {0}")]
    DuplicateAbility(&'static str),
    /// An ability is owned by, or filters on, an undeclared type.
    #[error("ability {ability} references unknown type {ty}")]
    UnknownAbilityType {
        /// Offending ability.
        ability: &'static str,
        /// Missing type.
        ty: String,
    },
}

/// Collects archetypes and abilities; [`RegistryBuilder::build`] freezes them.
///
/// The builtin `root` node archetype and `edge` relationship archetype are
/// always present.
#[derive(Debug)]
pub struct RegistryBuilder {
    archetypes: Vec<ArchetypeDecl>,
    abilities: Vec<AbilityDecl>,
}

impl Default for RegistryBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RegistryBuilder {
    /// Creates a builder holding only the builtin archetypes.
    pub fn new() -> Self {
        let builtin = |name: &str, kind| ArchetypeDecl {
            name: name.to_owned(),
            kind,
            parent: None,
            fields: Fields::new(),
        };
        Self {
            archetypes: vec![
                builtin(ROOT_TYPE, ArchetypeKind::Node),
                builtin(GENERIC_EDGE_TYPE, ArchetypeKind::Edge),
            ],
            abilities: Vec::new(),
        }
    }

    fn archetype(mut self, name: &str, kind: ArchetypeKind, parent: Option<&str>, fields: Fields) -> Self {
        self.archetypes.push(ArchetypeDecl {
            name: name.to_owned(),
            kind,
            parent: parent.map(str::to_owned),
            fields,
        });
        self
    }

    /// Declares an entity archetype.
    pub fn node(self, name: &str, parent: Option<&str>, fields: Fields) -> Self {
        self.archetype(name, ArchetypeKind::Node, parent, fields)
    }

    /// Declares a relationship archetype.
    pub fn edge(self, name: &str, parent: Option<&str>, fields: Fields) -> Self {
        self.archetype(name, ArchetypeKind::Edge, parent, fields)
    }

    /// Declares a traveler archetype.
    pub fn walker(self, name: &str, parent: Option<&str>, fields: Fields) -> Self {
        self.archetype(name, ArchetypeKind::Walker, parent, fields)
    }

    /// Declares an ability. Declaration order is dispatch order.
    pub fn ability(mut self, decl: AbilityDecl) -> Self {
        self.abilities.push(decl);
        self
    }

    /// Validates the declarations and precomputes the dispatch table.
    ///
    /// # Errors
    /// See [`RegistryError`].
    pub fn build(self) -> Result<Registry, RegistryError> {
        let hierarchy = TypeHierarchy::build(self.archetypes)?;

        let mut names = FxHashSet::default();
        let mut abilities = Vec::with_capacity(self.abilities.len());
        for (seq, decl) in self.abilities.into_iter().enumerate() {
            if !names.insert(decl.name) {
                return Err(RegistryError::DuplicateAbility(decl.name));
            }
            let unknown = |ty: &str| RegistryError::UnknownAbilityType {
                ability: decl.name,
                ty: ty.to_owned(),
            };
            let owner = hierarchy.resolve(&decl.owner).ok_or_else(|| unknown(&decl.owner))?;
            let side = match hierarchy.kind(owner) {
                Some(ArchetypeKind::Walker) => Side::Traveler,
                _ => Side::Place,
            };
            let filter = if decl.filter.is_empty() {
                TypeFilter::Any
            } else {
                let mut types = Vec::with_capacity(decl.filter.len());
                for name in &decl.filter {
                    types.push(hierarchy.resolve(name).ok_or_else(|| unknown(name))?);
                }
                TypeFilter::OneOf(types)
            };
            abilities.push(Ability {
                name: decl.name,
                owner,
                side,
                event: decl.event,
                filter,
                run: decl.run,
                seq,
            });
        }

        let mut table: FxHashMap<(TypeId, Event), Vec<usize>> = FxHashMap::default();
        for archetype in hierarchy.iter() {
            let lineage = hierarchy.lineage(archetype.id);
            for (idx, ability) in abilities.iter().enumerate() {
                if lineage.contains(&ability.owner) {
                    table.entry((archetype.id, ability.event)).or_default().push(idx);
                }
            }
        }

        Ok(Registry {
            hierarchy,
            abilities,
            table,
        })
    }
}

/// Frozen schema plus precomputed `(type, event) -> abilities` table.
///
/// Each table entry lists the abilities owned by the type or any of its
/// ancestors, in declaration order.
#[derive(Debug)]
pub struct Registry {
    hierarchy: TypeHierarchy,
    abilities: Vec<Ability>,
    table: FxHashMap<(TypeId, Event), Vec<usize>>,
}

impl Registry {
    /// Type hierarchy.
    pub fn types(&self) -> &TypeHierarchy {
        &self.hierarchy
    }

    /// Abilities owned by `ty` (or its ancestors) for `event`, unfiltered.
    pub fn owned(&self, ty: TypeId, event: Event) -> impl Iterator<Item = &Ability> {
        self.table
            .get(&(ty, event))
            .into_iter()
            .flatten()
            .filter_map(|idx| self.abilities.get(*idx))
    }

    /// Abilities that fire when a `traveler` of the given type hits `event`
    /// at a `place` of the given type, in firing order.
    ///
    /// Entry: traveler-side abilities, then place-side. Exit: place-side,
    /// then traveler-side. Within a side, declaration order.
    pub fn behaviors(&self, traveler: TypeId, place: TypeId, event: Event) -> Vec<&Ability> {
        let traveler_side = self
            .owned(traveler, event)
            .filter(|a| a.filter.matches(&self.hierarchy, place));
        let place_side = self
            .owned(place, event)
            .filter(|a| a.filter.matches(&self.hierarchy, traveler));
        match event {
            Event::Entry => traveler_side.chain(place_side).collect(),
            Event::Exit => place_side.chain(traveler_side).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used)]
    use super::*;
    use crate::ident::make_type_id;
    use crate::scheduler::Visit;
    use crate::GraphError;

    #[allow(clippy::unnecessary_wraps)]
    fn noop(_: &mut Visit<'_>) -> Result<(), GraphError> {
        Ok(())
    }

    fn names(list: &[&Ability]) -> Vec<&'static str> {
        list.iter().map(|a| a.name).collect()
    }

    fn sample() -> Registry {
        RegistryBuilder::new()
            .node("city", None, Fields::new())
            .node("capital", Some("city"), Fields::new())
            .walker("tourist", None, Fields::new())
            .walker("pilgrim", Some("tourist"), Fields::new())
            .ability(AbilityDecl::entry("greet", "city", noop).matching(&["pilgrim"]))
            .ability(AbilityDecl::entry("look", "tourist", noop).matching(&["capital"]))
            .ability(AbilityDecl::entry("toll", "capital", noop))
            .ability(AbilityDecl::exit("wave", "city", noop))
            .ability(AbilityDecl::exit("leave", "tourist", noop))
            .build()
            .expect("sample registry")
    }

    #[test]
    fn entry_runs_traveler_side_first() {
        let reg = sample();
        let got = reg.behaviors(make_type_id("pilgrim"), make_type_id("capital"), Event::Entry);
        assert_eq!(names(&got), vec!["look", "greet", "toll"]);
    }

    #[test]
    fn exit_mirrors_entry_sides() {
        let reg = sample();
        let got = reg.behaviors(make_type_id("tourist"), make_type_id("city"), Event::Exit);
        assert_eq!(names(&got), vec!["wave", "leave"]);
    }

    #[test]
    fn filters_respect_ancestry() {
        let reg = sample();
        let got = reg.behaviors(make_type_id("tourist"), make_type_id("city"), Event::Entry);
        assert!(got.is_empty());
    }

    #[test]
    fn rejects_duplicate_ability_names() {
        let err = RegistryBuilder::new()
            .node("a", None, Fields::new())
            .ability(AbilityDecl::entry("x", "a", noop))
            .ability(AbilityDecl::exit("x", "a", noop))
            .build()
            .expect_err("duplicate must fail");
        assert_eq!(err, RegistryError::DuplicateAbility("x"));
    }

    #[test]
    fn rejects_unknown_owner() {
        let err = RegistryBuilder::new()
            .ability(AbilityDecl::entry("ghost", "nowhere", noop))
            .build()
            .expect_err("unknown owner must fail");
        assert!(matches!(err, RegistryError::UnknownAbilityType { .. }));
    }
}
