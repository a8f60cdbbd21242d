// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! In-memory config store fake for testing without filesystem I/O.

use roam_app_core::config::{ConfigError, ConfigStore};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

/// Which store operations should fail.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FailMode {
    /// Every call succeeds.
    #[default]
    Never,
    /// `load_raw` returns [`ConfigError::Other`].
    OnLoad,
    /// `save_raw` returns [`ConfigError::Other`].
    OnSave,
}

/// In-memory [`ConfigStore`] that records how often it was touched.
///
/// Clones share the same backing map, so a test can hand one clone to a
/// [`ConfigService`](roam_app_core::ConfigService) and inspect the other.
///
/// ```
/// use roam_app_core::{load_host_settings, save_host_settings, ConfigService, HostSettings};
/// use roam_dry_tests::InMemoryConfigStore;
///
/// let store = InMemoryConfigStore::new();
/// let service = ConfigService::new(store.clone());
/// save_host_settings(&service, &HostSettings::default()).unwrap();
/// assert_eq!(load_host_settings(&service).unwrap(), HostSettings::default());
/// assert_eq!((store.saves(), store.loads()), (1, 1));
/// ```
#[derive(Clone, Debug, Default)]
pub struct InMemoryConfigStore {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Debug, Default)]
struct Inner {
    blobs: BTreeMap<String, Vec<u8>>,
    loads: usize,
    saves: usize,
    fail: FailMode,
}

impl InMemoryConfigStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store seeded with one raw blob.
    pub fn seeded(key: &str, blob: &[u8]) -> Self {
        let store = Self::new();
        store.lock().blobs.insert(key.to_owned(), blob.to_vec());
        store
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Makes later calls fail according to `mode`.
    pub fn fail(&self, mode: FailMode) {
        self.lock().fail = mode;
    }

    /// Number of `load_raw` calls, failed ones included.
    pub fn loads(&self) -> usize {
        self.lock().loads
    }

    /// Number of `save_raw` calls, failed ones included.
    pub fn saves(&self) -> usize {
        self.lock().saves
    }

    /// Raw blob stored under `key`.
    pub fn raw(&self, key: &str) -> Option<Vec<u8>> {
        self.lock().blobs.get(key).cloned()
    }

    /// Stored keys in sorted order.
    pub fn keys(&self) -> Vec<String> {
        self.lock().blobs.keys().cloned().collect()
    }
}

impl ConfigStore for InMemoryConfigStore {
    fn load_raw(&self, key: &str) -> Result<Vec<u8>, ConfigError> {
        let mut inner = self.lock();
        inner.loads += 1;
        if inner.fail == FailMode::OnLoad {
            return Err(ConfigError::Other("simulated load failure".into()));
        }
        inner.blobs.get(key).cloned().ok_or(ConfigError::NotFound)
    }

    fn save_raw(&self, key: &str, data: &[u8]) -> Result<(), ConfigError> {
        let mut inner = self.lock();
        inner.saves += 1;
        if inner.fail == FailMode::OnSave {
            return Err(ConfigError::Other("simulated save failure".into()));
        }
        inner.blobs.insert(key.to_owned(), data.to_vec());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;

    #[test]
    fn counts_failed_calls() {
        let store = InMemoryConfigStore::seeded("host", b"{}");
        store.fail(FailMode::OnLoad);
        assert!(matches!(store.load_raw("host"), Err(ConfigError::Other(_))));
        store.fail(FailMode::Never);
        assert_eq!(store.load_raw("host").unwrap(), b"{}");
        assert_eq!(store.loads(), 2);
    }

    #[test]
    fn clones_share_blobs() {
        let a = InMemoryConfigStore::new();
        let b = a.clone();
        a.save_raw("k", b"v").unwrap();
        assert_eq!(b.raw("k").as_deref(), Some(&b"v"[..]));
        assert_eq!(b.keys(), vec!["k".to_owned()]);
        assert!(matches!(b.load_raw("missing"), Err(ConfigError::NotFound)));
    }

    #[test]
    fn failed_save_stores_nothing() {
        let store = InMemoryConfigStore::new();
        store.fail(FailMode::OnSave);
        assert!(store.save_raw("k", b"v").is_err());
        assert!(store.raw("k").is_none());
        assert_eq!(store.saves(), 1);
    }
}
