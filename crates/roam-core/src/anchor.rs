// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Anchors: the unit of persistence I/O.
//!
//! An anchor wraps one entity or relationship record together with the
//! metadata the persistence tiers and the access controller need: owning
//! root, access list and version marker. The dirty flag is process-local and
//! never serialized.
use serde::{Deserialize, Serialize};

use crate::access::Access;
use crate::ident::{EdgeId, NodeId, ObjectId, RootId, TypeId};
use crate::record::{EdgeRecord, NodeRecord};
use crate::value::Fields;

/// Record carried by an anchor.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Body {
    /// Entity record.
    Node(NodeRecord),
    /// Relationship record.
    Edge(EdgeRecord),
}

/// Persistence wrapper around a record.
///
/// Invariants
/// - `id` kind matches `body` kind (node id with node body, edge id with
///   edge body).
/// - `version` is the version last committed to the durable tier; `0`
///   means "never committed". Commits write `version + 1` and compare
///   against `version`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Anchor {
    /// Object identity.
    pub id: ObjectId,
    /// Tenant root that owns this object.
    pub owner: RootId,
    /// Access list.
    pub access: Access,
    /// Durable version marker.
    pub version: u64,
    /// The wrapped record.
    pub body: Body,
    /// Staged in the volatile tier and not yet committed.
    #[serde(skip)]
    pub dirty: bool,
}

impl Anchor {
    /// Wraps a fresh entity record. The anchor starts dirty at version 0.
    #[must_use]
    pub fn node(id: NodeId, owner: RootId, record: NodeRecord) -> Self {
        Self {
            id: ObjectId::Node(id),
            owner,
            access: Access::default(),
            version: 0,
            body: Body::Node(record),
            dirty: true,
        }
    }

    /// Wraps a fresh relationship record. The anchor starts dirty at version 0.
    #[must_use]
    pub fn edge(id: EdgeId, owner: RootId, record: EdgeRecord) -> Self {
        Self {
            id: ObjectId::Edge(id),
            owner,
            access: Access::default(),
            version: 0,
            body: Body::Edge(record),
            dirty: true,
        }
    }

    /// Type tag of the wrapped record.
    #[must_use]
    pub const fn ty(&self) -> TypeId {
        match &self.body {
            Body::Node(n) => n.ty,
            Body::Edge(e) => e.ty,
        }
    }

    /// Field values of the wrapped record.
    #[must_use]
    pub const fn fields(&self) -> &Fields {
        match &self.body {
            Body::Node(n) => &n.fields,
            Body::Edge(e) => &e.fields,
        }
    }

    /// Mutable field values of the wrapped record.
    pub fn fields_mut(&mut self) -> &mut Fields {
        match &mut self.body {
            Body::Node(n) => &mut n.fields,
            Body::Edge(e) => &mut e.fields,
        }
    }

    /// Borrows the entity record, if this anchor wraps one.
    #[must_use]
    pub const fn as_node(&self) -> Option<&NodeRecord> {
        match &self.body {
            Body::Node(n) => Some(n),
            Body::Edge(_) => None,
        }
    }

    /// Mutably borrows the entity record.
    pub fn as_node_mut(&mut self) -> Option<&mut NodeRecord> {
        match &mut self.body {
            Body::Node(n) => Some(n),
            Body::Edge(_) => None,
        }
    }

    /// Borrows the relationship record, if this anchor wraps one.
    #[must_use]
    pub const fn as_edge(&self) -> Option<&EdgeRecord> {
        match &self.body {
            Body::Edge(e) => Some(e),
            Body::Node(_) => None,
        }
    }
}
