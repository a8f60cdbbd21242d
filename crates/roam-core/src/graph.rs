// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Request-scoped graph store over the persistence tiers.
//!
//! Every operation runs on behalf of one requesting root and consults the
//! access controller before it mutates anything. A failed check leaves the
//! store exactly as it was.
use std::collections::{BTreeSet, VecDeque};
use std::sync::Arc;

use thiserror::Error;

use crate::access::{AccessController, AccessLevel};
use crate::anchor::Anchor;
use crate::ident::{make_type_id, EdgeId, IdMint, NodeId, ObjectId, RootId, TypeId};
use crate::persistence::{PersistenceManager, StoreError};
use crate::record::{EdgeRecord, NodeRecord};
use crate::registry::Registry;
use crate::schema::{ArchetypeKind, ROOT_TYPE};
use crate::value::{Fields, Value};

/// Errors surfaced by graph operations.
#[derive(Debug, Error)]
pub enum GraphError {
    /// No tier holds the object.
    #[error("not found: {0}")]
    NotFound(ObjectId),
    /// The requester lacks the required level on the object.
    #[error("permission denied: {required:?} on {object}")]
    PermissionDenied {
        /// Object that was checked.
        object: ObjectId,
        /// Level the operation needed.
        required: AccessLevel,
    },
    /// The entity is still incident to relationships and cascade was not
    /// requested.
    #[error("entity {0} is still referenced by relationships")]
    CycleOnDestroy(ObjectId),
    /// Tenant roots cannot be destroyed or created through the graph API.
    #[error("tenant root {0} is pinned")]
    RootPinned(ObjectId),
    /// The named archetype is not declared with the expected kind.
    #[error("unknown {kind:?} type: {name}")]
    UnknownType {
        /// Requested type name.
        name: String,
        /// Kind the operation needed.
        kind: ArchetypeKind,
    },
    /// The field is not declared on the archetype.
    #[error("unknown field {field} on {ty}")]
    UnknownField {
        /// Archetype name.
        ty: String,
        /// Offending field.
        field: String,
    },
    /// The value does not match the kind of the field's declared default.
    #[error("type mismatch for field {field}")]
    TypeMismatch {
        /// Offending field.
        field: String,
    },
    /// Failure reported by an ability body.
    #[error("behavior failed: {0}")]
    Behavior(String),
    /// Persistence failure.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Which adjacency list a neighbor query reads.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Direction {
    /// Relationships leaving the entity.
    #[default]
    Out,
    /// Relationships arriving at the entity.
    In,
    /// Both: outgoing first, then incoming.
    Any,
}

/// Filter for [`GraphStore::neighbors`] and [`GraphStore::edges`].
///
/// Type filters match the named type and its descendants.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NeighborQuery {
    /// Adjacency to read.
    pub direction: Direction,
    /// Only relationships of this type.
    pub edge_type: Option<TypeId>,
    /// Only neighbors of this type.
    pub node_type: Option<TypeId>,
}

impl NeighborQuery {
    /// Outgoing relationships, unfiltered.
    pub fn outgoing() -> Self {
        Self::default()
    }

    /// Incoming relationships, unfiltered.
    pub fn incoming() -> Self {
        Self {
            direction: Direction::In,
            ..Self::default()
        }
    }

    /// Both directions, unfiltered.
    pub fn any() -> Self {
        Self {
            direction: Direction::Any,
            ..Self::default()
        }
    }

    /// Restricts to relationships of type `ty`.
    pub fn edge_type(mut self, ty: TypeId) -> Self {
        self.edge_type = Some(ty);
        self
    }

    /// Restricts to neighbors of type `ty`.
    pub fn node_type(mut self, ty: TypeId) -> Self {
        self.node_type = Some(ty);
        self
    }
}

/// Graph operations for one request.
///
/// Tier 1 belongs to the store; dropping it discards everything staged.
#[derive(Debug)]
pub struct GraphStore {
    requester: RootId,
    registry: Arc<Registry>,
    ids: Arc<IdMint>,
    tiers: PersistenceManager,
}

impl GraphStore {
    /// Creates a store acting on behalf of `requester`.
    pub fn new(
        requester: RootId,
        registry: Arc<Registry>,
        ids: Arc<IdMint>,
        tiers: PersistenceManager,
    ) -> Self {
        Self {
            requester,
            registry,
            ids,
            tiers,
        }
    }

    /// Root on whose behalf this store acts.
    pub fn requester(&self) -> RootId {
        self.requester
    }

    /// Frozen schema and abilities.
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Tier view of this request.
    pub fn tiers(&self) -> &PersistenceManager {
        &self.tiers
    }

    pub(crate) fn tiers_mut(&mut self) -> &mut PersistenceManager {
        &mut self.tiers
    }

    fn resolve(&self, name: &str, kind: ArchetypeKind) -> Result<TypeId, GraphError> {
        let types = self.registry.types();
        types
            .resolve(name)
            .filter(|ty| types.kind(*ty) == Some(kind))
            .ok_or_else(|| GraphError::UnknownType {
                name: name.to_owned(),
                kind,
            })
    }

    fn type_name(&self, ty: TypeId) -> String {
        self.registry.types().name(ty).unwrap_or("?").to_owned()
    }

    /// Declared defaults of `ty` overlaid with `given`.
    pub(crate) fn fill_fields(&self, ty: TypeId, given: Fields) -> Result<Fields, GraphError> {
        let mut fields = self
            .registry
            .types()
            .defaults(ty)
            .cloned()
            .unwrap_or_default();
        for (name, value) in given.iter() {
            check_field(&fields, name, value).map_err(|err| self.name_field_error(ty, err))?;
            fields.set(name, value.clone());
        }
        Ok(fields)
    }

    fn name_field_error(&self, ty: TypeId, err: GraphError) -> GraphError {
        match err {
            GraphError::UnknownField { field, .. } => GraphError::UnknownField {
                ty: self.type_name(ty),
                field,
            },
            other => other,
        }
    }

    fn check(&mut self, id: ObjectId, level: AccessLevel) -> Result<&Anchor, GraphError> {
        let requester = self.requester;
        match self.tiers.load(id)? {
            None => Err(GraphError::NotFound(id)),
            Some(anchor) if AccessController::check(requester, anchor, level) => Ok(anchor),
            Some(_) => Err(GraphError::PermissionDenied {
                object: id,
                required: level,
            }),
        }
    }

    fn update(&mut self, id: ObjectId) -> Result<&mut Anchor, GraphError> {
        self.tiers
            .load_for_update(id)?
            .ok_or(GraphError::NotFound(id))
    }

    /// Applies `change` to `id` and, for one half of an undirected
    /// relationship, to its twin as well. Returns what the first call
    /// returned.
    fn update_linked<R>(
        &mut self,
        id: ObjectId,
        change: impl Fn(&mut Anchor) -> R,
    ) -> Result<R, GraphError> {
        let anchor = self.update(id)?;
        let twin = anchor.as_edge().and_then(|e| e.twin);
        let out = change(anchor);
        if let Some(twin) = twin {
            change(self.update(twin.into())?);
        }
        Ok(out)
    }

    /// Returns the anchor when it exists and the requester may read it.
    pub(crate) fn readable(&mut self, id: ObjectId) -> Result<Option<&Anchor>, GraphError> {
        let requester = self.requester;
        Ok(self
            .tiers
            .load(id)?
            .filter(|a| AccessController::check(requester, a, AccessLevel::Read)))
    }

    /// Type of `id`, or `None` when it is missing or unreadable.
    pub fn readable_type(&mut self, id: ObjectId) -> Result<Option<TypeId>, GraphError> {
        Ok(self.readable(id)?.map(Anchor::ty))
    }

    // ── Creation ────────────────────────────────────────────────────────

    /// Creates an entity of type `ty`, filling unspecified fields from the
    /// archetype's defaults. The requester owns the new entity.
    pub fn create(&mut self, ty: &str, fields: Fields) -> Result<NodeId, GraphError> {
        let type_id = self.resolve(ty, ArchetypeKind::Node)?;
        if ty == ROOT_TYPE {
            return Err(GraphError::RootPinned(self.requester.into()));
        }
        let fields = self.fill_fields(type_id, fields)?;
        let id = self.ids.node();
        self.tiers
            .stage(Anchor::node(id, self.requester, NodeRecord::new(type_id, fields)));
        Ok(id)
    }

    pub(crate) fn insert_root(&mut self, root: RootId) -> Result<bool, GraphError> {
        if self.tiers.load(root.into())?.is_some() {
            return Ok(false);
        }
        let record = NodeRecord::new(make_type_id(ROOT_TYPE), Fields::new());
        self.tiers.stage(Anchor::node(root.node(), root, record));
        Ok(true)
    }

    /// Creates an entity and links `from` to it in one step.
    pub fn create_linked(
        &mut self,
        from: NodeId,
        ty: &str,
        fields: Fields,
        edge_type: &str,
    ) -> Result<(NodeId, EdgeId), GraphError> {
        let edge_ty = self.resolve(edge_type, ArchetypeKind::Edge)?;
        let edge_fields = self.fill_fields(edge_ty, Fields::new())?;
        self.check(from.into(), AccessLevel::Connect)?;
        let node = self.create(ty, fields)?;
        let edge = self.link(from, node, edge_ty, edge_fields, true)?;
        Ok((node, edge))
    }

    // ── Relationships ───────────────────────────────────────────────────

    /// Links `source` to `target`. Requires Connect on both entities.
    ///
    /// `directed = false` stores two records that reference each other as
    /// twins; the returned id is the `source -> target` half.
    pub fn connect(
        &mut self,
        source: NodeId,
        target: NodeId,
        edge_type: &str,
        fields: Fields,
        directed: bool,
    ) -> Result<EdgeId, GraphError> {
        let ty = self.resolve(edge_type, ArchetypeKind::Edge)?;
        let fields = self.fill_fields(ty, fields)?;
        self.check(source.into(), AccessLevel::Connect)?;
        self.check(target.into(), AccessLevel::Connect)?;
        self.link(source, target, ty, fields, directed)
    }

    /// Links `source` to every target, all or nothing.
    pub fn connect_many(
        &mut self,
        source: NodeId,
        targets: &[NodeId],
        edge_type: &str,
        fields: Fields,
        directed: bool,
    ) -> Result<Vec<EdgeId>, GraphError> {
        let ty = self.resolve(edge_type, ArchetypeKind::Edge)?;
        let fields = self.fill_fields(ty, fields)?;
        self.check(source.into(), AccessLevel::Connect)?;
        for target in targets {
            self.check((*target).into(), AccessLevel::Connect)?;
        }
        targets
            .iter()
            .map(|target| self.link(source, *target, ty, fields.clone(), directed))
            .collect()
    }

    fn link(
        &mut self,
        source: NodeId,
        target: NodeId,
        ty: TypeId,
        fields: Fields,
        directed: bool,
    ) -> Result<EdgeId, GraphError> {
        let edge = self.ids.edge();
        let twin = (!directed).then(|| self.ids.edge());
        if let Some(back) = twin {
            let record = EdgeRecord {
                ty,
                fields: fields.clone(),
                from: target,
                to: source,
                directed,
                twin: Some(edge),
            };
            self.tiers.stage(Anchor::edge(back, self.requester, record));
        }
        let record = EdgeRecord {
            ty,
            fields,
            from: source,
            to: target,
            directed,
            twin,
        };
        self.tiers.stage(Anchor::edge(edge, self.requester, record));
        self.attach(source, edge, Direction::Out)?;
        self.attach(target, edge, Direction::In)?;
        if let Some(back) = twin {
            self.attach(target, back, Direction::Out)?;
            self.attach(source, back, Direction::In)?;
        }
        Ok(edge)
    }

    fn attach(&mut self, node: NodeId, edge: EdgeId, side: Direction) -> Result<(), GraphError> {
        let id = ObjectId::Node(node);
        let record = self
            .update(id)?
            .as_node_mut()
            .ok_or(GraphError::NotFound(id))?;
        match side {
            Direction::In => record.incoming.push(edge),
            Direction::Out | Direction::Any => record.outgoing.push(edge),
        }
        Ok(())
    }

    /// Removes a relationship (and its twin). Requires Connect on both
    /// endpoints.
    pub fn disconnect(&mut self, edge: EdgeId) -> Result<(), GraphError> {
        let record = self.edge_unchecked(edge)?;
        self.check(record.from.into(), AccessLevel::Connect)?;
        self.check(record.to.into(), AccessLevel::Connect)?;
        self.unlink(edge)?;
        if let Some(twin) = record.twin {
            self.unlink(twin)?;
        }
        Ok(())
    }

    fn edge_unchecked(&mut self, edge: EdgeId) -> Result<EdgeRecord, GraphError> {
        let id = ObjectId::Edge(edge);
        self.tiers
            .load(id)?
            .and_then(Anchor::as_edge)
            .cloned()
            .ok_or(GraphError::NotFound(id))
    }

    fn unlink(&mut self, edge: EdgeId) -> Result<(), GraphError> {
        let Some((from, to)) = self
            .tiers
            .load(edge.into())?
            .and_then(Anchor::as_edge)
            .map(|e| (e.from, e.to))
        else {
            return Ok(());
        };
        for endpoint in [from, to] {
            if let Some(record) = self
                .tiers
                .load_for_update(endpoint.into())?
                .and_then(Anchor::as_node_mut)
            {
                record.detach(edge);
            }
        }
        self.tiers.delete(edge.into())?;
        Ok(())
    }

    // ── Destruction ─────────────────────────────────────────────────────

    fn destroyable(&mut self, node: NodeId) -> Result<NodeRecord, GraphError> {
        let id = ObjectId::Node(node);
        let anchor = self.check(id, AccessLevel::Write)?;
        let Some(record) = anchor.as_node() else {
            return Err(GraphError::NotFound(id));
        };
        if record.ty == make_type_id(ROOT_TYPE) {
            return Err(GraphError::RootPinned(id));
        }
        Ok(record.clone())
    }

    /// Destroys an entity, first removing every incident relationship.
    /// Requires Write on the entity.
    pub fn destroy(&mut self, node: NodeId) -> Result<(), GraphError> {
        let record = self.destroyable(node)?;
        let mut doomed: BTreeSet<EdgeId> = BTreeSet::new();
        for edge in record.outgoing.iter().chain(record.incoming.iter()) {
            doomed.insert(*edge);
            if let Some(twin) = self.edge_unchecked(*edge).ok().and_then(|e| e.twin) {
                doomed.insert(twin);
            }
        }
        for edge in doomed {
            self.unlink(edge)?;
        }
        self.tiers.delete(node.into())?;
        Ok(())
    }

    /// Destroys an entity that has no incident relationships.
    ///
    /// # Errors
    /// [`GraphError::CycleOnDestroy`] when relationships still reference it.
    pub fn destroy_isolated(&mut self, node: NodeId) -> Result<(), GraphError> {
        let record = self.destroyable(node)?;
        if record.is_incident() {
            return Err(GraphError::CycleOnDestroy(node.into()));
        }
        self.tiers.delete(node.into())?;
        Ok(())
    }

    // ── Reads ───────────────────────────────────────────────────────────

    /// Copy of the anchor. Requires Read.
    pub fn anchor(&mut self, id: ObjectId) -> Result<Anchor, GraphError> {
        Ok(self.check(id, AccessLevel::Read)?.clone())
    }

    /// Entity record. Requires Read.
    pub fn node(&mut self, id: NodeId) -> Result<NodeRecord, GraphError> {
        let oid = ObjectId::Node(id);
        self.check(oid, AccessLevel::Read)?
            .as_node()
            .cloned()
            .ok_or(GraphError::NotFound(oid))
    }

    /// Relationship record. Requires Read.
    pub fn edge(&mut self, id: EdgeId) -> Result<EdgeRecord, GraphError> {
        let oid = ObjectId::Edge(id);
        self.check(oid, AccessLevel::Read)?
            .as_edge()
            .cloned()
            .ok_or(GraphError::NotFound(oid))
    }

    /// One field of an entity or relationship. Requires Read.
    pub fn get(&mut self, id: ObjectId, field: &str) -> Result<Option<Value>, GraphError> {
        Ok(self.check(id, AccessLevel::Read)?.fields().get(field).cloned())
    }

    /// Type of an entity or relationship. Requires Read.
    pub fn type_of(&mut self, id: ObjectId) -> Result<TypeId, GraphError> {
        Ok(self.check(id, AccessLevel::Read)?.ty())
    }

    /// Relationships of `node` matching `query`, in creation order.
    /// Unreadable relationships and neighbors are omitted.
    pub fn edges(&mut self, node: NodeId, query: &NeighborQuery) -> Result<Vec<EdgeId>, GraphError> {
        Ok(self
            .matching(node, query)?
            .into_iter()
            .map(|(edge, _)| edge)
            .collect())
    }

    /// Neighbors of `node` matching `query`, in relationship creation order.
    /// Unreadable relationships and neighbors are omitted.
    pub fn neighbors(
        &mut self,
        node: NodeId,
        query: &NeighborQuery,
    ) -> Result<Vec<NodeId>, GraphError> {
        Ok(self
            .matching(node, query)?
            .into_iter()
            .map(|(_, neighbor)| neighbor)
            .collect())
    }

    fn matching(
        &mut self,
        node: NodeId,
        query: &NeighborQuery,
    ) -> Result<Vec<(EdgeId, NodeId)>, GraphError> {
        let record = self.node(node)?;
        let outgoing = || record.outgoing.iter().map(|e| (*e, Direction::Out));
        let incoming = || record.incoming.iter().map(|e| (*e, Direction::In));
        let candidates: Vec<(EdgeId, Direction)> = match query.direction {
            Direction::Out => outgoing().collect(),
            Direction::In => incoming().collect(),
            Direction::Any => outgoing().chain(incoming()).collect(),
        };

        let mut seen_pairs = BTreeSet::new();
        let mut out = Vec::with_capacity(candidates.len());
        for (edge, side) in candidates {
            let Some(rec) = self
                .readable(edge.into())?
                .and_then(Anchor::as_edge)
                .cloned()
            else {
                continue;
            };
            if let Some(twin) = rec.twin {
                // One undirected link shows up once even when both halves match.
                if !seen_pairs.insert(edge.min(twin)) {
                    continue;
                }
            }
            if let Some(want) = query.edge_type {
                if !self.registry.types().is_a(rec.ty, want) {
                    continue;
                }
            }
            let neighbor = if side == Direction::In { rec.from } else { rec.to };
            let Some(neighbor_ty) = self.readable_type(neighbor.into())? else {
                continue;
            };
            if let Some(want) = query.node_type {
                if !self.registry.types().is_a(neighbor_ty, want) {
                    continue;
                }
            }
            out.push((edge, neighbor));
        }
        Ok(out)
    }

    /// Every readable entity reachable from `start` over outgoing
    /// relationships, `start` included.
    pub fn reachable_from(&mut self, start: NodeId) -> Result<BTreeSet<NodeId>, GraphError> {
        self.check(start.into(), AccessLevel::Read)?;
        let mut seen = BTreeSet::from([start]);
        let mut queue = VecDeque::from([start]);
        while let Some(node) = queue.pop_front() {
            for next in self.neighbors(node, &NeighborQuery::outgoing())? {
                if seen.insert(next) {
                    queue.push_back(next);
                }
            }
        }
        Ok(seen)
    }

    // ── Writes ──────────────────────────────────────────────────────────

    /// Sets a declared field. Requires Write. Returns the previous value.
    pub fn set_field(
        &mut self,
        id: ObjectId,
        field: &str,
        value: impl Into<Value>,
    ) -> Result<Option<Value>, GraphError> {
        let value = value.into();
        let ty = self.check(id, AccessLevel::Write)?.ty();
        let declared = self
            .registry
            .types()
            .defaults(ty)
            .cloned()
            .unwrap_or_default();
        check_field(&declared, field, &value).map_err(|err| self.name_field_error(ty, err))?;
        self.update_linked(id, |a| a.fields_mut().set(field, value.clone()))
    }

    // Access-list changes on an undirected relationship cover both halves.

    /// Sets the public access level. Requires Write.
    pub fn grant(&mut self, id: ObjectId, level: AccessLevel) -> Result<(), GraphError> {
        self.check(id, AccessLevel::Write)?;
        self.update_linked(id, |a| a.access.grant(level))
    }

    /// Returns the object to owner-only public access. Requires Write.
    pub fn revoke(&mut self, id: ObjectId) -> Result<(), GraphError> {
        self.check(id, AccessLevel::Write)?;
        self.update_linked(id, |a| a.access.revoke())
    }

    /// Grants `root` an override level. Requires Write.
    pub fn allow_root(
        &mut self,
        id: ObjectId,
        root: RootId,
        level: AccessLevel,
    ) -> Result<(), GraphError> {
        self.check(id, AccessLevel::Write)?;
        self.update_linked(id, |a| a.access.allow_root(root, level))
    }

    /// Removes `root`'s override. Requires Write.
    pub fn disallow_root(&mut self, id: ObjectId, root: RootId) -> Result<bool, GraphError> {
        self.check(id, AccessLevel::Write)?;
        self.update_linked(id, |a| a.access.disallow_root(root))
    }
}

fn check_field(declared: &Fields, name: &str, value: &Value) -> Result<(), GraphError> {
    match declared.get(name) {
        None => Err(GraphError::UnknownField {
            ty: String::new(),
            field: name.to_owned(),
        }),
        Some(default) if !default.same_kind(value) => Err(GraphError::TypeMismatch {
            field: name.to_owned(),
        }),
        Some(_) => Ok(()),
    }
}
