// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Identifier and hashing utilities.
use std::sync::atomic::{AtomicU64, Ordering};

use blake3::Hasher;
use serde::{Deserialize, Serialize};

/// Canonical 256-bit hash used for addressing entities, relationships, types
/// and roots.
pub type Hash = [u8; 32];

/// Strongly typed identifier for an entity (graph node).
///
/// Ids are opaque 32-byte digests. Fixtures and roots use label-derived ids
/// ([`make_node_id`], [`make_root_id`]); the runtime mints fresh ids through
/// [`IdMint`]. Tooling must not assume an id is reversible into a label.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
pub struct NodeId(pub Hash);

impl NodeId {
    /// Returns the canonical byte representation of this id.
    #[must_use]
    pub fn as_bytes(&self) -> &Hash {
        &self.0
    }
}

/// Strongly typed identifier for a relationship (graph edge).
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
pub struct EdgeId(pub Hash);

impl EdgeId {
    /// Returns the canonical byte representation of this id.
    #[must_use]
    pub fn as_bytes(&self) -> &Hash {
        &self.0
    }
}

/// Strongly typed identifier for an archetype (entity, relationship or
/// traveler type).
///
/// `TypeId` values are produced by [`make_type_id`] which hashes a label; the
/// wrapper prevents accidental mixing of type and object identifiers.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
pub struct TypeId(pub Hash);

impl TypeId {
    /// Returns the canonical byte representation of this id.
    #[must_use]
    pub fn as_bytes(&self) -> &Hash {
        &self.0
    }
}

/// Identifier of a tenant root.
///
/// A root is an ordinary entity whose id is derived from the tenant name;
/// this wrapper marks the places where the id is used as an ownership and
/// access-control principal rather than as a graph position.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
pub struct RootId(pub NodeId);

impl RootId {
    /// Returns the entity id of the root node.
    #[must_use]
    pub const fn node(self) -> NodeId {
        self.0
    }
}

/// Identity of any stored object: the key of the persistence tiers and the
/// position of a traveler.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
pub enum ObjectId {
    /// An entity.
    Node(NodeId),
    /// A relationship.
    Edge(EdgeId),
}

impl ObjectId {
    /// Returns the entity id when this object is a node.
    #[must_use]
    pub const fn as_node(self) -> Option<NodeId> {
        match self {
            Self::Node(id) => Some(id),
            Self::Edge(_) => None,
        }
    }

    /// Returns the relationship id when this object is an edge.
    #[must_use]
    pub const fn as_edge(self) -> Option<EdgeId> {
        match self {
            Self::Edge(id) => Some(id),
            Self::Node(_) => None,
        }
    }

    /// Returns the raw digest regardless of object kind.
    #[must_use]
    pub fn digest(&self) -> &Hash {
        match self {
            Self::Node(id) => &id.0,
            Self::Edge(id) => &id.0,
        }
    }
}

impl From<NodeId> for ObjectId {
    fn from(id: NodeId) -> Self {
        Self::Node(id)
    }
}

impl From<EdgeId> for ObjectId {
    fn from(id: EdgeId) -> Self {
        Self::Edge(id)
    }
}

impl From<RootId> for ObjectId {
    fn from(id: RootId) -> Self {
        Self::Node(id.0)
    }
}

impl core::fmt::Display for ObjectId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let (tag, digest) = match self {
            Self::Node(id) => ("n", &id.0),
            Self::Edge(id) => ("e", &id.0),
        };
        write!(f, "{tag}:{}", hex::encode(&digest[..8]))
    }
}

fn domain_hash(domain: &[u8], label: &[u8]) -> Hash {
    let mut hasher = Hasher::new();
    hasher.update(domain);
    hasher.update(label);
    hasher.finalize().into()
}

/// Produces a stable, domain‑separated type identifier (prefix `b"type:"`) using BLAKE3.
pub fn make_type_id(label: &str) -> TypeId {
    TypeId(domain_hash(b"type:", label.as_bytes()))
}

/// Produces a stable, domain‑separated node identifier (prefix `b"node:"`) using BLAKE3.
pub fn make_node_id(label: &str) -> NodeId {
    NodeId(domain_hash(b"node:", label.as_bytes()))
}

/// Produces a stable, domain‑separated edge identifier (prefix `b"edge:"`) using BLAKE3.
pub fn make_edge_id(label: &str) -> EdgeId {
    EdgeId(domain_hash(b"edge:", label.as_bytes()))
}

/// Produces the root identifier for `tenant` (prefix `b"root:"`).
///
/// Root ids are a pure function of the tenant name, which is what makes
/// [`crate::Runtime::create_root`] idempotent.
pub fn make_root_id(tenant: &str) -> RootId {
    RootId(NodeId(domain_hash(b"root:", tenant.as_bytes())))
}

/// Mints process-unique object ids.
///
/// Ids are `blake3(domain || seed || epoch || counter)`. The epoch is taken
/// from the durable tier at startup so that a restarted process never reuses
/// a counter value already persisted by an earlier run with the same seed.
#[derive(Debug)]
pub struct IdMint {
    prefix: Hash,
    counter: AtomicU64,
}

impl IdMint {
    /// Creates a mint for `seed` within durable `epoch`.
    #[must_use]
    pub fn new(seed: &str, epoch: u64) -> Self {
        let mut hasher = Hasher::new();
        hasher.update(b"mint:");
        hasher.update(seed.as_bytes());
        hasher.update(&epoch.to_le_bytes());
        Self {
            prefix: hasher.finalize().into(),
            counter: AtomicU64::new(0),
        }
    }

    fn next(&self, domain: &[u8]) -> Hash {
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        let mut hasher = Hasher::new();
        hasher.update(domain);
        hasher.update(&self.prefix);
        hasher.update(&n.to_le_bytes());
        hasher.finalize().into()
    }

    /// Returns a fresh entity id.
    pub fn node(&self) -> NodeId {
        NodeId(self.next(b"node:"))
    }

    /// Returns a fresh relationship id.
    pub fn edge(&self) -> EdgeId {
        EdgeId(self.next(b"edge:"))
    }

    /// Number of ids minted so far.
    pub fn minted(&self) -> u64 {
        self.counter.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_separation_prevents_cross_type_collisions() {
        let lbl = "foo";
        let t = make_type_id(lbl).0;
        let n = make_node_id(lbl).0;
        let e = make_edge_id(lbl).0;
        let r = make_root_id(lbl).0 .0;
        assert_ne!(t, n);
        assert_ne!(t, e);
        assert_ne!(t, r);
        assert_ne!(n, e);
        assert_ne!(n, r);
        assert_ne!(e, r);
    }

    #[test]
    fn mint_epochs_never_collide() {
        let first = IdMint::new("seed", 1);
        let second = IdMint::new("seed", 2);
        assert_ne!(first.node(), second.node());
        assert_ne!(first.node(), first.node());
        assert_eq!(first.minted(), 3);
    }
}
