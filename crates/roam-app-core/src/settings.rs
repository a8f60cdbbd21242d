// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Host settings: runtime tuning plus where the durable tier lives.

use std::path::PathBuf;

use roam_core::RuntimeConfig;
use serde::{Deserialize, Serialize};

use crate::config::{ConfigError, ConfigService, ConfigStore};

/// Config key holding [`HostSettings`].
pub const HOST_SETTINGS_KEY: &str = "host";

/// Durable tier selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DurableSetting {
    /// In-process map; contents vanish on exit.
    #[default]
    Memory,
    /// One CBOR file per anchor under `path`.
    Directory {
        /// Directory holding the anchor files.
        path: PathBuf,
    },
}

/// Everything a host needs to boot a runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostSettings {
    /// Runtime tuning.
    pub runtime: RuntimeConfig,
    /// Durable tier.
    pub durable: DurableSetting,
    /// Maximum number of walks running at once.
    pub max_concurrent_walks: usize,
    /// `tracing` env-filter directive used when `RUST_LOG` is unset.
    pub log_filter: String,
}

impl Default for HostSettings {
    fn default() -> Self {
        Self {
            runtime: RuntimeConfig::default(),
            durable: DurableSetting::default(),
            max_concurrent_walks: 8,
            log_filter: "info".to_owned(),
        }
    }
}

/// Loads host settings, using defaults when none were saved.
pub fn load_host_settings<S: ConfigStore>(
    service: &ConfigService<S>,
) -> Result<HostSettings, ConfigError> {
    service.load_or_default(HOST_SETTINGS_KEY)
}

/// Persists host settings.
pub fn save_host_settings<S: ConfigStore>(
    service: &ConfigService<S>,
    settings: &HostSettings,
) -> Result<(), ConfigError> {
    service.save(HOST_SETTINGS_KEY, settings)
}
