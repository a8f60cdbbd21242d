// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Tiered persistence: volatile (per request) → cache (shared) → durable.
//!
//! Reads go Tier 1, Tier 2, Tier 3 and back-fill the tiers above the hit.
//! Writes are staged in Tier 1 only and reach the durable tier in one atomic
//! batch at commit. The durable tier compares every anchor's version marker
//! before applying anything; a mismatch rejects the whole batch with
//! [`StoreError::CommitConflict`]. The cache only ever holds committed data.
mod cache;
mod fs;
mod memory;

pub use cache::CacheTier;
pub use fs::FsDurable;
pub use memory::MemoryDurable;

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

use crate::anchor::Anchor;
use crate::ident::{make_type_id, EdgeId, NodeId, ObjectId, RootId, TypeId};
use crate::schema::ROOT_TYPE;

/// Errors raised by the persistence tiers.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No tier holds the object.
    #[error("object not found: {0}")]
    NotFound(ObjectId),
    /// The durable version of `key` moved since it was loaded.
    #[error("commit conflict on {key}: expected version {expected}, found {found}")]
    CommitConflict {
        /// Conflicting anchor.
        key: ObjectId,
        /// Version the committing request loaded.
        expected: u64,
        /// Version currently in the durable tier (`0` when absent).
        found: u64,
    },
    /// An anchor failed to encode or decode.
    #[error("codec error: {0}")]
    Codec(String),
    /// Filesystem failure in a file-backed tier.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// One atomic durable write.
///
/// `writes` carry their new version; the expected durable version is
/// `version - 1`. `deletes` carry the version they expect to remove.
#[derive(Clone, Debug, Default)]
pub struct CommitBatch {
    /// Anchors to create or replace.
    pub writes: Vec<Anchor>,
    /// Anchors to remove, with their expected durable version.
    pub deletes: Vec<(ObjectId, u64)>,
}

impl CommitBatch {
    /// Returns `true` when the batch changes nothing.
    pub fn is_empty(&self) -> bool {
        self.writes.is_empty() && self.deletes.is_empty()
    }

    /// Compares every expected version against `current` (the durable
    /// version lookup). Durable tiers call this before touching storage.
    ///
    /// # Errors
    /// Returns the first [`StoreError::CommitConflict`] found.
    pub fn check(&self, current: impl Fn(ObjectId) -> Option<u64>) -> Result<(), StoreError> {
        let expectations = self
            .writes
            .iter()
            .map(|a| (a.id, a.version.saturating_sub(1)))
            .chain(self.deletes.iter().copied());
        for (key, expected) in expectations {
            let found = current(key).unwrap_or(0);
            if found != expected {
                return Err(StoreError::CommitConflict {
                    key,
                    expected,
                    found,
                });
            }
        }
        Ok(())
    }
}

/// Tier 3 contract: the source of truth.
pub trait DurableStore: Send + Sync {
    /// Reads one anchor.
    fn fetch(&self, id: ObjectId) -> Result<Option<Anchor>, StoreError>;
    /// Applies `batch` atomically: either every version check passes and
    /// every write lands, or nothing changes.
    fn apply(&self, batch: &CommitBatch) -> Result<(), StoreError>;
    /// Ids of every stored anchor owned by `root`.
    fn owned_by(&self, root: RootId) -> Result<Vec<ObjectId>, StoreError>;
    /// Reserves a fresh, never-before-returned epoch number for id minting.
    fn next_epoch(&self) -> Result<u64, StoreError>;
}

/// Objects written and removed by a commit.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CommitReceipt {
    /// Anchors created or updated.
    pub written: Vec<ObjectId>,
    /// Anchors removed.
    pub deleted: Vec<ObjectId>,
}

/// Which tier served the reads of a request.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TierStats {
    /// Reads served by the volatile tier.
    pub volatile_hits: u64,
    /// Reads served by the cache.
    pub cache_hits: u64,
    /// Reads that reached the durable tier.
    pub durable_reads: u64,
}

/// Memoized garbage-collection reachability.
///
/// `anchored` holds nodes on a path from a root and is only valid until the
/// dead set grows. `stranded` holds nodes with no such path; growing the
/// dead set never gives them one.
#[derive(Debug, Default)]
struct Reach {
    anchored: BTreeSet<NodeId>,
    stranded: BTreeSet<NodeId>,
}

/// Request-scoped view of the tiers.
///
/// Owns Tier 1 (the volatile map and tombstones); shares Tier 2 and Tier 3.
pub struct PersistenceManager {
    cache: Arc<CacheTier>,
    durable: Arc<dyn DurableStore>,
    volatile: BTreeMap<ObjectId, Anchor>,
    tombstones: BTreeMap<ObjectId, u64>,
    stats: TierStats,
}

impl core::fmt::Debug for PersistenceManager {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PersistenceManager")
            .field("volatile", &self.volatile.len())
            .field("tombstones", &self.tombstones.len())
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

impl PersistenceManager {
    /// Creates an empty Tier 1 over the shared tiers.
    pub fn new(cache: Arc<CacheTier>, durable: Arc<dyn DurableStore>) -> Self {
        Self {
            cache,
            durable,
            volatile: BTreeMap::new(),
            tombstones: BTreeMap::new(),
            stats: TierStats::default(),
        }
    }

    /// Read counters for this request.
    pub fn stats(&self) -> TierStats {
        self.stats
    }

    /// Brings `id` into Tier 1. Returns `false` when no tier has it or it
    /// was deleted in this request.
    fn ensure(&mut self, id: ObjectId) -> Result<bool, StoreError> {
        if self.tombstones.contains_key(&id) {
            return Ok(false);
        }
        if self.volatile.contains_key(&id) {
            self.stats.volatile_hits += 1;
            return Ok(true);
        }
        if let Some(anchor) = self.cache.get(id) {
            self.stats.cache_hits += 1;
            debug!(%id, "cache hit");
            self.volatile.insert(id, anchor);
            return Ok(true);
        }
        self.stats.durable_reads += 1;
        match self.durable.fetch(id)? {
            Some(mut anchor) => {
                debug!(%id, version = anchor.version, "durable read");
                anchor.dirty = false;
                self.cache.put(anchor.clone());
                self.volatile.insert(id, anchor);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Read-through load with back-fill.
    pub fn load(&mut self, id: ObjectId) -> Result<Option<&Anchor>, StoreError> {
        if self.ensure(id)? {
            Ok(self.volatile.get(&id))
        } else {
            Ok(None)
        }
    }

    /// Loads `id` and marks it dirty for the next commit.
    pub fn load_for_update(&mut self, id: ObjectId) -> Result<Option<&mut Anchor>, StoreError> {
        if !self.ensure(id)? {
            return Ok(None);
        }
        Ok(self.volatile.get_mut(&id).map(|anchor| {
            anchor.dirty = true;
            anchor
        }))
    }

    /// Stages `anchor` in Tier 1.
    pub fn stage(&mut self, mut anchor: Anchor) {
        anchor.dirty = true;
        self.tombstones.remove(&anchor.id);
        self.volatile.insert(anchor.id, anchor);
    }

    /// Removes `id` from this request's view. Anchors that were ever
    /// committed leave a tombstone so the commit deletes them durably.
    pub fn delete(&mut self, id: ObjectId) -> Result<(), StoreError> {
        if !self.ensure(id)? {
            return Ok(());
        }
        if let Some(anchor) = self.volatile.remove(&id) {
            if anchor.version > 0 {
                self.tombstones.insert(id, anchor.version);
            }
        }
        Ok(())
    }

    /// Returns `true` when anything awaits commit.
    pub fn has_pending(&self) -> bool {
        !self.tombstones.is_empty() || self.volatile.values().any(|a| a.dirty)
    }

    /// Flushes every dirty anchor and tombstone to the durable tier in one
    /// batch, then refreshes the cache.
    ///
    /// On error nothing was written and Tier 1 is left untouched, so the
    /// caller decides whether to retry or [`rollback`](Self::rollback).
    pub fn commit(&mut self) -> Result<CommitReceipt, StoreError> {
        let mut batch = CommitBatch::default();
        for anchor in self.volatile.values().filter(|a| a.dirty) {
            let mut next = anchor.clone();
            next.version += 1;
            next.dirty = false;
            batch.writes.push(next);
        }
        batch.deletes = self.tombstones.iter().map(|(id, v)| (*id, *v)).collect();
        if batch.is_empty() {
            return Ok(CommitReceipt::default());
        }

        self.durable.apply(&batch)?;

        let mut receipt = CommitReceipt::default();
        for committed in batch.writes {
            receipt.written.push(committed.id);
            if let Some(anchor) = self.volatile.get_mut(&committed.id) {
                anchor.version = committed.version;
                anchor.dirty = false;
            }
            self.cache.put(committed);
        }
        for (id, version) in batch.deletes {
            self.cache.invalidate(id, version);
            receipt.deleted.push(id);
        }
        self.tombstones.clear();
        debug!(
            written = receipt.written.len(),
            deleted = receipt.deleted.len(),
            "commit applied"
        );
        Ok(receipt)
    }

    /// Discards everything staged in this request.
    pub fn rollback(&mut self) {
        self.volatile.clear();
        self.tombstones.clear();
    }

    /// Drops clean Tier-1 entries; dirty ones stay staged.
    pub fn evict_volatile(&mut self) {
        self.volatile.retain(|_, a| a.dirty);
    }

    /// Request-end garbage collection for `root`.
    ///
    /// Examines the dirty entities owned by `root` and reclaims each one that
    /// no longer has a path of relationships from any tenant root (of any
    /// tenant). Reclaiming an entity detaches and removes its incident
    /// relationships and puts its root-owned descendants up for the same test.
    /// Returns every reclaimed object.
    pub fn evict_unreachable(&mut self, root: RootId) -> Result<Vec<ObjectId>, StoreError> {
        let root_ty = make_type_id(ROOT_TYPE);
        let mut candidates: BTreeSet<NodeId> = self
            .volatile
            .values()
            .filter(|a| a.dirty && a.owner == root && a.ty() != root_ty)
            .filter_map(|a| a.id.as_node())
            .collect();
        let mut dead: BTreeSet<NodeId> = BTreeSet::new();
        let mut memo = Reach::default();

        loop {
            memo.anchored.clear();
            let mut newly_dead = Vec::new();
            for node in candidates.iter().copied() {
                if dead.contains(&node) || self.anchored(node, root_ty, &dead, &mut memo)? {
                    continue;
                }
                dead.insert(node);
                newly_dead.push(node);
            }
            if newly_dead.is_empty() {
                break;
            }
            for node in newly_dead {
                for child in self.children(node)? {
                    let Some(anchor) = self.load(child.into())? else {
                        continue;
                    };
                    if anchor.owner == root && anchor.ty() != root_ty {
                        candidates.insert(child);
                    }
                }
            }
        }

        let mut reclaimed = Vec::new();
        for node in &dead {
            let incident = match self.load((*node).into())?.and_then(Anchor::as_node) {
                Some(record) => record
                    .outgoing
                    .iter()
                    .chain(record.incoming.iter())
                    .copied()
                    .collect::<BTreeSet<EdgeId>>(),
                None => continue,
            };
            for edge in incident {
                if self.remove_edge(edge, &dead)? {
                    reclaimed.push(ObjectId::Edge(edge));
                }
            }
            self.delete((*node).into())?;
            reclaimed.push(ObjectId::Node(*node));
        }
        if !reclaimed.is_empty() {
            debug!(root = %ObjectId::from(root), reclaimed = reclaimed.len(), "evicted unreachable");
        }
        Ok(reclaimed)
    }

    /// Backward search over incoming relationships, ignoring `dead` sources.
    fn anchored(
        &mut self,
        start: NodeId,
        root_ty: TypeId,
        dead: &BTreeSet<NodeId>,
        memo: &mut Reach,
    ) -> Result<bool, StoreError> {
        if memo.anchored.contains(&start) {
            return Ok(true);
        }
        if memo.stranded.contains(&start) {
            return Ok(false);
        }
        // source -> the node it was reached from
        let mut via: BTreeMap<NodeId, NodeId> = BTreeMap::new();
        let mut seen = BTreeSet::from([start]);
        let mut queue = VecDeque::from([start]);
        while let Some(node) = queue.pop_front() {
            let incoming = match self.load(node.into())?.and_then(Anchor::as_node) {
                Some(record) => record.incoming.clone(),
                None => continue,
            };
            for edge in incoming {
                let Some(source) = self
                    .load(edge.into())?
                    .and_then(Anchor::as_edge)
                    .map(|e| e.from)
                else {
                    continue;
                };
                if dead.contains(&source)
                    || memo.stranded.contains(&source)
                    || !seen.insert(source)
                {
                    continue;
                }
                let is_root = match self.load(source.into())? {
                    Some(anchor) => anchor.ty() == root_ty,
                    None => continue,
                };
                via.insert(source, node);
                if is_root || memo.anchored.contains(&source) {
                    let mut step = Some(source);
                    while let Some(on_path) = step {
                        memo.anchored.insert(on_path);
                        step = via.get(&on_path).copied();
                    }
                    return Ok(true);
                }
                queue.push_back(source);
            }
        }
        memo.stranded.extend(seen);
        Ok(false)
    }

    fn children(&mut self, node: NodeId) -> Result<Vec<NodeId>, StoreError> {
        let outgoing = match self.load(node.into())?.and_then(Anchor::as_node) {
            Some(record) => record.outgoing.clone(),
            None => return Ok(Vec::new()),
        };
        let mut out = Vec::with_capacity(outgoing.len());
        for edge in outgoing {
            if let Some(e) = self.load(edge.into())?.and_then(Anchor::as_edge) {
                out.push(e.to);
            }
        }
        Ok(out)
    }

    /// Removes `edge` and detaches it from endpoints that survive. Returns
    /// `false` when the edge was already gone.
    fn remove_edge(&mut self, edge: EdgeId, dead: &BTreeSet<NodeId>) -> Result<bool, StoreError> {
        let Some((from, to)) = self
            .load(edge.into())?
            .and_then(Anchor::as_edge)
            .map(|e| (e.from, e.to))
        else {
            return Ok(false);
        };
        for endpoint in [from, to] {
            if dead.contains(&endpoint) {
                continue;
            }
            if let Some(record) = self
                .load_for_update(endpoint.into())?
                .and_then(Anchor::as_node_mut)
            {
                record.detach(edge);
            }
        }
        self.delete(edge.into())?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used)]
    use super::*;
    use crate::ident::{make_edge_id, make_node_id, make_root_id};
    use crate::record::{EdgeRecord, NodeRecord};
    use crate::value::Fields;
    use parking_lot::Mutex;
    use std::time::Duration;

    type Hook = Box<dyn FnOnce() + Send>;

    /// Runs `hook` once, after reading the inner tier and before returning.
    struct RacingDurable {
        inner: Arc<MemoryDurable>,
        hook: Mutex<Option<Hook>>,
    }

    impl DurableStore for RacingDurable {
        fn fetch(&self, id: ObjectId) -> Result<Option<Anchor>, StoreError> {
            let found = self.inner.fetch(id)?;
            if let Some(hook) = self.hook.lock().take() {
                hook();
            }
            Ok(found)
        }

        fn apply(&self, batch: &CommitBatch) -> Result<(), StoreError> {
            self.inner.apply(batch)
        }

        fn owned_by(&self, root: RootId) -> Result<Vec<ObjectId>, StoreError> {
            self.inner.owned_by(root)
        }

        fn next_epoch(&self) -> Result<u64, StoreError> {
            self.inner.next_epoch()
        }
    }

    fn manager() -> (PersistenceManager, Arc<MemoryDurable>, Arc<CacheTier>) {
        let durable = Arc::new(MemoryDurable::new());
        let cache = Arc::new(CacheTier::new(Duration::from_secs(60), 64));
        (
            PersistenceManager::new(cache.clone(), durable.clone()),
            durable,
            cache,
        )
    }

    fn node(label: &str, owner: RootId) -> Anchor {
        Anchor::node(
            make_node_id(label),
            owner,
            NodeRecord::new(make_type_id("thing"), Fields::new()),
        )
    }

    #[test]
    fn commit_bumps_versions_and_fills_cache() {
        let (mut tiers, durable, cache) = manager();
        let a = node("a", make_root_id("t"));
        tiers.stage(a.clone());
        let receipt = tiers.commit().expect("commit");
        assert_eq!(receipt.written, vec![a.id]);
        assert_eq!(durable.fetch(a.id).expect("fetch").map(|s| s.version), Some(1));
        assert_eq!(cache.get(a.id).map(|s| s.version), Some(1));
        assert!(!tiers.has_pending());
    }

    #[test]
    fn stale_version_is_rejected() {
        let (mut first, durable, cache) = manager();
        let a = node("a", make_root_id("t"));
        first.stage(a.clone());
        first.commit().expect("initial commit");

        let mut second = PersistenceManager::new(cache.clone(), durable.clone());
        let mut third = PersistenceManager::new(cache, durable);
        second.load_for_update(a.id).expect("load").expect("present");
        third.load_for_update(a.id).expect("load").expect("present");
        second.commit().expect("first writer wins");
        let err = third.commit().expect_err("second writer conflicts");
        assert!(matches!(
            err,
            StoreError::CommitConflict { expected: 1, found: 2, .. }
        ));
    }

    #[test]
    fn late_backfill_keeps_newer_commit_cached() {
        let (mut seed, durable, cache) = manager();
        let a = node("a", make_root_id("t"));
        seed.stage(a.clone());
        seed.commit().expect("v1");

        let mut writer = PersistenceManager::new(cache.clone(), durable.clone());
        writer.load_for_update(a.id).expect("load").expect("present");
        cache.clear();

        let racing = Arc::new(RacingDurable {
            inner: durable.clone(),
            hook: Mutex::new(Some(Box::new(move || {
                writer.commit().expect("v2");
            }))),
        });
        let mut reader = PersistenceManager::new(cache.clone(), racing);
        let seen = reader.load(a.id).expect("load").map(|s| s.version);
        assert_eq!(seen, Some(1));
        assert_eq!(cache.get(a.id).map(|s| s.version), Some(2));

        let mut fresh = PersistenceManager::new(cache, durable);
        let loaded = fresh.load_for_update(a.id).expect("load").map(|s| s.version);
        assert_eq!(loaded, Some(2));
        fresh.commit().expect("fresh request builds on v2");
    }

    #[test]
    fn volatile_hit_skips_lower_tiers() {
        let (mut tiers, _durable, _cache) = manager();
        let a = node("a", make_root_id("t"));
        tiers.stage(a.clone());
        assert!(tiers.load(a.id).expect("load").is_some());
        assert_eq!(
            tiers.stats(),
            TierStats {
                volatile_hits: 1,
                cache_hits: 0,
                durable_reads: 0
            }
        );
    }

    fn stage_chain(tiers: &mut PersistenceManager, owner: RootId, len: u64) {
        let mut prev = Anchor::node(
            owner.node(),
            owner,
            NodeRecord::new(make_type_id(ROOT_TYPE), Fields::new()),
        );
        for i in 0..len {
            let id = make_node_id(&format!("c{i}"));
            let link = make_edge_id(&format!("c{i}-in"));
            let mut next = Anchor::node(
                id,
                owner,
                NodeRecord::new(make_type_id("thing"), Fields::new()),
            );
            if let Some(r) = prev.as_node_mut() {
                r.outgoing.push(link);
            }
            if let Some(r) = next.as_node_mut() {
                r.incoming.push(link);
            }
            let from = prev.id.as_node().expect("node");
            tiers.stage(Anchor::edge(
                link,
                owner,
                EdgeRecord {
                    ty: make_type_id("edge"),
                    fields: Fields::new(),
                    from,
                    to: id,
                    directed: true,
                    twin: None,
                },
            ));
            tiers.stage(prev);
            prev = next;
        }
        tiers.stage(prev);
    }

    #[test]
    fn gc_of_a_long_fresh_chain_stays_linear() {
        let (mut tiers, _durable, _cache) = manager();
        let owner = make_root_id("t");
        let len = 60;
        stage_chain(&mut tiers, owner, len);
        let before = tiers.stats().volatile_hits;
        let reclaimed = tiers.evict_unreachable(owner).expect("gc");
        assert!(reclaimed.is_empty());
        let loads = tiers.stats().volatile_hits - before;
        assert!(loads < 12 * len, "{loads} loads for {len} nodes");
    }

    #[test]
    fn gc_reclaims_dangling_chain() {
        let (mut tiers, _durable, _cache) = manager();
        let owner = make_root_id("t");
        let mut x = node("x", owner);
        let mut y = node("y", owner);
        let link = make_edge_id("x->y");
        if let Some(r) = x.as_node_mut() {
            r.outgoing.push(link);
        }
        if let Some(r) = y.as_node_mut() {
            r.incoming.push(link);
        }
        let edge = Anchor::edge(
            link,
            owner,
            EdgeRecord {
                ty: make_type_id("edge"),
                fields: Fields::new(),
                from: make_node_id("x"),
                to: make_node_id("y"),
                directed: true,
                twin: None,
            },
        );
        tiers.stage(x);
        tiers.stage(y);
        tiers.stage(edge);
        let reclaimed = tiers.evict_unreachable(owner).expect("gc");
        assert_eq!(reclaimed.len(), 3);
        assert!(!tiers.has_pending());
    }
}
