// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Durable tier wrapper that counts how often it is reached.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use roam_core::{
    Anchor, CommitBatch, DurableStore, MemoryDurable, ObjectId, RootId, StoreError,
};

/// Wraps a [`DurableStore`] and counts fetches and applied batches.
///
/// Lets tests observe whether a read was served by the cache or had to fall
/// through to the durable tier.
#[derive(Debug)]
pub struct CountingDurable<D = MemoryDurable> {
    inner: D,
    fetches: AtomicUsize,
    applies: AtomicUsize,
}

impl CountingDurable {
    /// Counting wrapper over a fresh [`MemoryDurable`].
    pub fn in_memory() -> Arc<Self> {
        Arc::new(Self::new(MemoryDurable::new()))
    }
}

impl<D> CountingDurable<D> {
    /// Wraps `inner`.
    pub fn new(inner: D) -> Self {
        Self {
            inner,
            fetches: AtomicUsize::new(0),
            applies: AtomicUsize::new(0),
        }
    }

    /// Wrapped store.
    pub fn inner(&self) -> &D {
        &self.inner
    }

    /// Number of `fetch` calls so far.
    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    /// Number of `apply` calls so far, rejected batches included.
    pub fn applies(&self) -> usize {
        self.applies.load(Ordering::SeqCst)
    }
}

impl<D: DurableStore> DurableStore for CountingDurable<D> {
    fn fetch(&self, id: ObjectId) -> Result<Option<Anchor>, StoreError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.inner.fetch(id)
    }

    fn apply(&self, batch: &CommitBatch) -> Result<(), StoreError> {
        self.applies.fetch_add(1, Ordering::SeqCst);
        self.inner.apply(batch)
    }

    fn owned_by(&self, root: RootId) -> Result<Vec<ObjectId>, StoreError> {
        self.inner.owned_by(root)
    }

    fn next_epoch(&self) -> Result<u64, StoreError> {
        self.inner.next_epoch()
    }
}
