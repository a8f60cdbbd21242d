// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Graph record types: entities and relationships.

use serde::{Deserialize, Serialize};

use crate::ident::{EdgeId, NodeId, TypeId};
use crate::value::Fields;

/// Materialised record for a single entity.
///
/// Invariants
/// - `ty` names a node archetype in the loaded schema.
/// - The entity identifier is not embedded here; the anchor supplies it.
/// - `outgoing` and `incoming` list relationship ids in creation order. The
///   store never leaves an id in either list once the relationship is gone.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    /// Type identifier describing the entity.
    pub ty: TypeId,
    /// Field values in declaration order.
    pub fields: Fields,
    /// Relationships whose source is this entity.
    pub outgoing: Vec<EdgeId>,
    /// Relationships whose target is this entity.
    pub incoming: Vec<EdgeId>,
}

impl NodeRecord {
    /// Creates a record with no incident relationships.
    #[must_use]
    pub fn new(ty: TypeId, fields: Fields) -> Self {
        Self {
            ty,
            fields,
            outgoing: Vec::new(),
            incoming: Vec::new(),
        }
    }

    /// Returns `true` when any relationship still references this entity.
    #[must_use]
    pub fn is_incident(&self) -> bool {
        !self.outgoing.is_empty() || !self.incoming.is_empty()
    }

    /// Removes `edge` from both adjacency lists.
    pub fn detach(&mut self, edge: EdgeId) {
        self.outgoing.retain(|e| *e != edge);
        self.incoming.retain(|e| *e != edge);
    }
}

/// Materialised record for a single directed relationship.
///
/// Undirected relationships are stored as two directed records pointing at
/// each other through `twin`; removing one removes both.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EdgeRecord {
    /// Type identifier describing the relationship.
    pub ty: TypeId,
    /// Field values in declaration order.
    pub fields: Fields,
    /// Source entity.
    pub from: NodeId,
    /// Target entity.
    pub to: NodeId,
    /// `false` when this record is one half of an undirected pair.
    pub directed: bool,
    /// The opposite half of an undirected pair.
    pub twin: Option<EdgeId>,
}

impl EdgeRecord {
    /// Returns the endpoint a traveler lands on after crossing this edge.
    ///
    /// Arriving from the target lands on the source; any other arrival
    /// (including none) lands on the target.
    #[must_use]
    pub fn far_end(&self, from_side: Option<NodeId>) -> NodeId {
        match from_side {
            Some(n) if n == self.to && n != self.from => self.from,
            _ => self.to,
        }
    }
}
