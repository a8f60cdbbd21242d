// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Config port for Roam hosts.
//!
//! Hosts keep their settings as JSON documents under short logical keys
//! (see [`crate::HOST_SETTINGS_KEY`]). Where the bytes live is up to the
//! [`ConfigStore`] adapter: `roam-config-fs` writes one file per key, tests
//! use an in-memory fake.

use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

/// Storage port for raw config documents.
pub trait ConfigStore {
    /// Raw bytes stored under `key`, or [`ConfigError::NotFound`].
    fn load_raw(&self, key: &str) -> Result<Vec<u8>, ConfigError>;
    /// Replaces the bytes stored under `key`.
    fn save_raw(&self, key: &str, data: &[u8]) -> Result<(), ConfigError>;
}

/// Failure while reading or writing host configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Nothing stored under the key.
    #[error("not found")]
    NotFound,
    /// The adapter hit an I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// The document under `key` does not decode (or the value does not
    /// encode).
    #[error("config `{key}` is malformed: {source}")]
    Malformed {
        /// Logical key of the document.
        key: String,
        /// Decoder error.
        #[source]
        source: serde_json::Error,
    },
    /// Adapter-specific failure.
    #[error("other: {0}")]
    Other(String),
}

/// Typed access to a [`ConfigStore`]: values go in and out as JSON.
#[derive(Debug)]
pub struct ConfigService<S> {
    store: S,
}

impl<S: ConfigStore> ConfigService<S> {
    /// Wraps `store`.
    pub const fn new(store: S) -> Self {
        Self { store }
    }

    /// Decodes the document under `key`. A missing key and an empty
    /// document both read as `None`.
    pub fn load<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, ConfigError> {
        let bytes = match self.store.load_raw(key) {
            Ok(bytes) if bytes.is_empty() => return Ok(None),
            Ok(bytes) => bytes,
            Err(ConfigError::NotFound) => return Ok(None),
            Err(e) => return Err(e),
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|source| ConfigError::Malformed {
                key: key.to_owned(),
                source,
            })
    }

    /// [`load`](Self::load), with `T::default()` standing in for a missing
    /// document.
    pub fn load_or_default<T: DeserializeOwned + Default>(
        &self,
        key: &str,
    ) -> Result<T, ConfigError> {
        Ok(self.load(key)?.unwrap_or_default())
    }

    /// Encodes `value` as pretty JSON under `key`.
    pub fn save<T: Serialize>(&self, key: &str, value: &T) -> Result<(), ConfigError> {
        let data = serde_json::to_vec_pretty(value).map_err(|source| ConfigError::Malformed {
            key: key.to_owned(),
            source,
        })?;
        self.store.save_raw(key, &data)
    }
}
