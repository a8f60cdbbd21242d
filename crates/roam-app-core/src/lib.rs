// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Shared application services for Roam hosts (config port, host settings).
//! Keeps host adapters thin and storage-agnostic.

pub mod config;
pub mod settings;

pub use config::{ConfigError, ConfigService, ConfigStore};
pub use settings::{
    load_host_settings, save_host_settings, DurableSetting, HostSettings, HOST_SETTINGS_KEY,
};
