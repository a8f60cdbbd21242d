// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! In-process durable tier.
use std::collections::BTreeMap;

use parking_lot::Mutex;

use super::{CommitBatch, DurableStore, StoreError};
use crate::anchor::Anchor;
use crate::ident::{ObjectId, RootId};

#[derive(Debug, Default)]
struct Inner {
    anchors: BTreeMap<ObjectId, Anchor>,
    epoch: u64,
}

/// Durable tier backed by a process-local map.
///
/// Useful for tests and embedded hosts; contents vanish with the process.
#[derive(Debug, Default)]
pub struct MemoryDurable {
    inner: Mutex<Inner>,
}

impl MemoryDurable {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored anchors.
    pub fn len(&self) -> usize {
        self.inner.lock().anchors.len()
    }

    /// Returns `true` when nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().anchors.is_empty()
    }
}

impl DurableStore for MemoryDurable {
    fn fetch(&self, id: ObjectId) -> Result<Option<Anchor>, StoreError> {
        Ok(self.inner.lock().anchors.get(&id).cloned())
    }

    fn apply(&self, batch: &CommitBatch) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        batch.check(|id| inner.anchors.get(&id).map(|a| a.version))?;
        for anchor in &batch.writes {
            let mut stored = anchor.clone();
            stored.dirty = false;
            inner.anchors.insert(anchor.id, stored);
        }
        for (id, _) in &batch.deletes {
            inner.anchors.remove(id);
        }
        Ok(())
    }

    fn owned_by(&self, root: RootId) -> Result<Vec<ObjectId>, StoreError> {
        Ok(self
            .inner
            .lock()
            .anchors
            .values()
            .filter(|a| a.owner == root)
            .map(|a| a.id)
            .collect())
    }

    fn next_epoch(&self) -> Result<u64, StoreError> {
        let mut inner = self.inner.lock();
        inner.epoch += 1;
        Ok(inner.epoch)
    }
}
