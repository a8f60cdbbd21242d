// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Tier 2: shared, time-bounded anchor cache.
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use crate::anchor::Anchor;
use crate::ident::ObjectId;

#[derive(Debug)]
struct Entry {
    stored_at: Instant,
    version: u64,
    /// `None` once the anchor was deleted at `version`.
    anchor: Option<Anchor>,
}

/// Shared cache of committed anchors.
///
/// Entries expire `ttl` after insertion. When full, expired entries are
/// dropped first and then the oldest entry. A zero TTL or zero capacity
/// disables the tier entirely.
///
/// Versions only move forward: a live entry is never replaced by an older
/// version of the same anchor, and a deleted anchor keeps a tombstone so a
/// late back-fill cannot resurrect it.
#[derive(Debug)]
pub struct CacheTier {
    ttl: Duration,
    capacity: usize,
    entries: RwLock<FxHashMap<ObjectId, Entry>>,
}

impl CacheTier {
    /// Creates an empty cache.
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            ttl,
            capacity,
            entries: RwLock::new(FxHashMap::default()),
        }
    }

    fn enabled(&self) -> bool {
        !self.ttl.is_zero() && self.capacity > 0
    }

    /// Returns a copy of the cached anchor unless it is missing, deleted or
    /// expired.
    pub fn get(&self, id: ObjectId) -> Option<Anchor> {
        let entries = self.entries.read();
        let entry = entries.get(&id)?;
        if entry.stored_at.elapsed() >= self.ttl {
            return None;
        }
        entry.anchor.clone()
    }

    /// Inserts or refreshes a committed anchor. Ignored when a live entry
    /// already holds the same or a newer version.
    pub fn put(&self, mut anchor: Anchor) {
        anchor.dirty = false;
        self.insert(anchor.id, anchor.version, Some(anchor));
    }

    /// Records that `id` was deleted at `version`.
    pub fn invalidate(&self, id: ObjectId, version: u64) {
        self.insert(id, version, None);
    }

    fn insert(&self, id: ObjectId, version: u64, anchor: Option<Anchor>) {
        if !self.enabled() {
            return;
        }
        let ttl = self.ttl;
        let mut entries = self.entries.write();
        if let Some(current) = entries.get(&id) {
            let live = current.stored_at.elapsed() < ttl;
            let newer = current.version > version
                || (current.version == version && anchor.is_some());
            if live && newer {
                return;
            }
        }
        if entries.len() >= self.capacity && !entries.contains_key(&id) {
            entries.retain(|_, e| e.stored_at.elapsed() < ttl);
            if entries.len() >= self.capacity {
                let oldest = entries
                    .iter()
                    .min_by_key(|(_, e)| e.stored_at)
                    .map(|(id, _)| *id);
                if let Some(oldest) = oldest {
                    entries.remove(&oldest);
                }
            }
        }
        entries.insert(
            id,
            Entry {
                stored_at: Instant::now(),
                version,
                anchor,
            },
        );
    }

    /// Number of stored entries, expired ones included.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Returns `true` when nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Empties the cache.
    pub fn clear(&self) {
        self.entries.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ident::{make_node_id, make_root_id, make_type_id};
    use crate::record::NodeRecord;
    use crate::value::Fields;

    fn anchor(label: &str) -> Anchor {
        Anchor::node(
            make_node_id(label),
            make_root_id("t"),
            NodeRecord::new(make_type_id("thing"), Fields::new()),
        )
    }

    #[test]
    fn expired_entries_are_not_served() {
        let cache = CacheTier::new(Duration::from_millis(5), 8);
        let a = anchor("a");
        cache.put(a.clone());
        assert!(cache.get(a.id).is_some());
        std::thread::sleep(Duration::from_millis(20));
        assert!(cache.get(a.id).is_none());
    }

    #[test]
    fn full_cache_drops_oldest() {
        let cache = CacheTier::new(Duration::from_secs(60), 2);
        let (a, b, c) = (anchor("a"), anchor("b"), anchor("c"));
        cache.put(a.clone());
        std::thread::sleep(Duration::from_millis(2));
        cache.put(b.clone());
        std::thread::sleep(Duration::from_millis(2));
        cache.put(c.clone());
        assert_eq!(cache.len(), 2);
        assert!(cache.get(a.id).is_none());
        assert!(cache.get(b.id).is_some());
        assert!(cache.get(c.id).is_some());
    }

    #[test]
    fn zero_ttl_disables_caching() {
        let cache = CacheTier::new(Duration::ZERO, 8);
        let a = anchor("a");
        cache.put(a.clone());
        assert!(cache.is_empty());
        assert!(cache.get(a.id).is_none());
    }

    #[test]
    fn older_version_never_replaces_newer() {
        let cache = CacheTier::new(Duration::from_secs(60), 8);
        let mut v1 = anchor("a");
        v1.version = 1;
        let mut v2 = v1.clone();
        v2.version = 2;
        cache.put(v2);
        cache.put(v1.clone());
        assert_eq!(cache.get(v1.id).map(|hit| hit.version), Some(2));
    }

    #[test]
    fn deleted_anchor_is_not_resurrected() {
        let cache = CacheTier::new(Duration::from_secs(60), 8);
        let mut a = anchor("a");
        a.version = 3;
        cache.put(a.clone());
        cache.invalidate(a.id, 3);
        assert!(cache.get(a.id).is_none());
        cache.put(a.clone());
        assert!(cache.get(a.id).is_none());
    }

    #[test]
    fn expired_entry_accepts_any_version() {
        let cache = CacheTier::new(Duration::from_millis(5), 8);
        let mut a = anchor("a");
        a.version = 4;
        cache.put(a.clone());
        std::thread::sleep(Duration::from_millis(20));
        a.version = 1;
        cache.put(a.clone());
        assert_eq!(cache.get(a.id).map(|hit| hit.version), Some(1));
    }

    #[test]
    fn cached_copies_are_clean() {
        let cache = CacheTier::new(Duration::from_secs(60), 8);
        let a = anchor("a");
        assert!(a.dirty);
        cache.put(a.clone());
        assert!(cache.get(a.id).is_some_and(|hit| !hit.dirty));
    }
}
