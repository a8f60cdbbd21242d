// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Archetypes and the single-inheritance type hierarchy.
//!
//! Every entity, relationship and traveler has a type. Types form a forest
//! (one optional parent each) and are linearized once at load time:
//! `lineage(t) = [t, parent(t), grandparent(t), ...]`. Ability dispatch,
//! filter matching and type dispatch inside behaviors all read the
//! linearization instead of walking parents on the hot path.
use std::collections::BTreeMap;

use rustc_hash::FxHashMap;

use crate::ident::{make_type_id, TypeId};
use crate::registry::RegistryError;
use crate::value::Fields;

/// Name of the builtin archetype every tenant root node carries.
pub const ROOT_TYPE: &str = "root";

/// Name of the builtin relationship archetype used when no edge type is
/// given.
pub const GENERIC_EDGE_TYPE: &str = "edge";

/// What an archetype describes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ArchetypeKind {
    /// Entity archetype.
    Node,
    /// Relationship archetype.
    Edge,
    /// Traveler archetype.
    Walker,
}

/// Declaration of an archetype before name resolution.
#[derive(Clone, Debug)]
pub struct ArchetypeDecl {
    /// Unique type name.
    pub name: String,
    /// Node, edge or walker.
    pub kind: ArchetypeKind,
    /// Parent type name.
    pub parent: Option<String>,
    /// Declared fields and their defaults, in declaration order.
    pub fields: Fields,
}

/// A resolved archetype.
#[derive(Clone, Debug)]
pub struct Archetype {
    /// Type identifier (`make_type_id(name)`).
    pub id: TypeId,
    /// Type name.
    pub name: String,
    /// Node, edge or walker.
    pub kind: ArchetypeKind,
    /// Parent type.
    pub parent: Option<TypeId>,
    /// Fields declared on this archetype itself (not inherited).
    pub fields: Fields,
}

/// Frozen, linearized type hierarchy.
#[derive(Debug, Default)]
pub struct TypeHierarchy {
    types: BTreeMap<TypeId, Archetype>,
    lineages: FxHashMap<TypeId, Vec<TypeId>>,
    defaults: FxHashMap<TypeId, Fields>,
}

impl TypeHierarchy {
    /// Resolves and validates `decls`.
    ///
    /// # Errors
    /// Returns [`RegistryError`] for duplicate names, unknown parents, a parent
    /// of a different kind, or an inheritance cycle.
    pub fn build(decls: Vec<ArchetypeDecl>) -> Result<Self, RegistryError> {
        let mut types: BTreeMap<TypeId, Archetype> = BTreeMap::new();
        let mut by_name: FxHashMap<String, (TypeId, ArchetypeKind)> = FxHashMap::default();
        for decl in &decls {
            let id = make_type_id(&decl.name);
            if by_name.insert(decl.name.clone(), (id, decl.kind)).is_some() {
                return Err(RegistryError::DuplicateType(decl.name.clone()));
            }
        }
        for decl in decls {
            let parent = match &decl.parent {
                None => None,
                Some(parent) => {
                    let Some(&(pid, pkind)) = by_name.get(parent) else {
                        return Err(RegistryError::UnknownParent {
                            ty: decl.name,
                            parent: parent.clone(),
                        });
                    };
                    if pkind != decl.kind {
                        return Err(RegistryError::KindMismatch {
                            ty: decl.name,
                            parent: parent.clone(),
                        });
                    }
                    Some(pid)
                }
            };
            let id = make_type_id(&decl.name);
            types.insert(
                id,
                Archetype {
                    id,
                    name: decl.name,
                    kind: decl.kind,
                    parent,
                    fields: decl.fields,
                },
            );
        }

        let mut lineages = FxHashMap::default();
        for (id, archetype) in &types {
            let mut lineage = vec![*id];
            let mut cursor = archetype.parent;
            while let Some(p) = cursor {
                if lineage.contains(&p) || lineage.len() > types.len() {
                    return Err(RegistryError::Cycle(archetype.name.clone()));
                }
                lineage.push(p);
                cursor = types.get(&p).and_then(|a| a.parent);
            }
            lineages.insert(*id, lineage);
        }

        let mut defaults = FxHashMap::default();
        for (id, lineage) in &lineages {
            let mut merged = Fields::new();
            for ancestor in lineage.iter().rev() {
                if let Some(archetype) = types.get(ancestor) {
                    for (name, value) in archetype.fields.iter() {
                        merged.set(name, value.clone());
                    }
                }
            }
            defaults.insert(*id, merged);
        }

        Ok(Self {
            types,
            lineages,
            defaults,
        })
    }

    /// Looks up an archetype.
    #[must_use]
    pub fn get(&self, ty: TypeId) -> Option<&Archetype> {
        self.types.get(&ty)
    }

    /// Resolves a type name to its id if the type is declared.
    #[must_use]
    pub fn resolve(&self, name: &str) -> Option<TypeId> {
        let id = make_type_id(name);
        self.types.contains_key(&id).then_some(id)
    }

    /// Returns the declared name of `ty`.
    #[must_use]
    pub fn name(&self, ty: TypeId) -> Option<&str> {
        self.types.get(&ty).map(|a| a.name.as_str())
    }

    /// Returns the kind of `ty`.
    #[must_use]
    pub fn kind(&self, ty: TypeId) -> Option<ArchetypeKind> {
        self.types.get(&ty).map(|a| a.kind)
    }

    /// `[ty, parent, grandparent, ...]`; empty for undeclared types.
    #[must_use]
    pub fn lineage(&self, ty: TypeId) -> &[TypeId] {
        self.lineages.get(&ty).map_or(&[], Vec::as_slice)
    }

    /// Number of inheritance steps from `ty` up to `ancestor`.
    #[must_use]
    pub fn distance(&self, ty: TypeId, ancestor: TypeId) -> Option<usize> {
        self.lineage(ty).iter().position(|t| *t == ancestor)
    }

    /// Returns `true` when `ty` is `ancestor` or inherits from it.
    #[must_use]
    pub fn is_a(&self, ty: TypeId, ancestor: TypeId) -> bool {
        self.distance(ty, ancestor).is_some()
    }

    /// Picks the candidate closest to `ty` in its lineage.
    ///
    /// Returns the index into `candidates`. Equally close candidates (the
    /// same type listed twice) resolve to the first one listed.
    #[must_use]
    pub fn most_specific(&self, ty: TypeId, candidates: &[TypeId]) -> Option<usize> {
        candidates
            .iter()
            .enumerate()
            .filter_map(|(i, c)| self.distance(ty, *c).map(|d| (d, i)))
            .min()
            .map(|(_, i)| i)
    }

    /// Full default field set of `ty`: inherited fields first, each in
    /// declaration order, with overrides from descendants applied in place.
    #[must_use]
    pub fn defaults(&self, ty: TypeId) -> Option<&Fields> {
        self.defaults.get(&ty)
    }

    /// Iterates every archetype in id order.
    pub fn iter(&self) -> impl Iterator<Item = &Archetype> {
        self.types.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    fn decl(name: &str, kind: ArchetypeKind, parent: Option<&str>, fields: Fields) -> ArchetypeDecl {
        ArchetypeDecl {
            name: name.into(),
            kind,
            parent: parent.map(Into::into),
            fields,
        }
    }

    fn animals() -> TypeHierarchy {
        let built = TypeHierarchy::build(vec![
            decl(
                "animal",
                ArchetypeKind::Node,
                None,
                Fields::new().with("legs", 4_i64).with("name", ""),
            ),
            decl(
                "bird",
                ArchetypeKind::Node,
                Some("animal"),
                Fields::new().with("legs", 2_i64).with("flies", true),
            ),
            decl("penguin", ArchetypeKind::Node, Some("bird"), Fields::new()),
        ]);
        match built {
            Ok(h) => h,
            Err(err) => unreachable!("fixture hierarchy is valid: {err}"),
        }
    }

    #[test]
    fn lineage_runs_from_self_to_root() {
        let h = animals();
        let lineage: Vec<&str> = h
            .lineage(make_type_id("penguin"))
            .iter()
            .filter_map(|t| h.name(*t))
            .collect();
        assert_eq!(lineage, vec!["penguin", "bird", "animal"]);
        assert!(h.is_a(make_type_id("penguin"), make_type_id("animal")));
        assert!(!h.is_a(make_type_id("animal"), make_type_id("bird")));
    }

    #[test]
    fn most_specific_prefers_nearest_ancestor() {
        let h = animals();
        let candidates = [make_type_id("animal"), make_type_id("bird")];
        assert_eq!(h.most_specific(make_type_id("penguin"), &candidates), Some(1));
        assert_eq!(
            h.most_specific(make_type_id("animal"), &[make_type_id("bird")]),
            None
        );
    }

    #[test]
    fn defaults_inherit_in_declaration_order() {
        let h = animals();
        let Some(defaults) = h.defaults(make_type_id("penguin")) else {
            unreachable!("penguin is declared");
        };
        let names: Vec<&str> = defaults.iter().map(|(k, _)| k).collect();
        assert_eq!(names, vec!["legs", "name", "flies"]);
        assert_eq!(defaults.get("legs"), Some(&Value::Int(2)));
    }

    #[test]
    fn rejects_cycles_and_kind_mismatch() {
        let cycle = TypeHierarchy::build(vec![
            decl("a", ArchetypeKind::Node, Some("b"), Fields::new()),
            decl("b", ArchetypeKind::Node, Some("a"), Fields::new()),
        ]);
        assert!(matches!(cycle, Err(RegistryError::Cycle(_))));

        let mismatch = TypeHierarchy::build(vec![
            decl("place", ArchetypeKind::Node, None, Fields::new()),
            decl("w", ArchetypeKind::Walker, Some("place"), Fields::new()),
        ]);
        assert!(matches!(mismatch, Err(RegistryError::KindMismatch { .. })));
    }
}
