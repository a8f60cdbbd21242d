// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
#![allow(missing_docs, clippy::unwrap_used, clippy::expect_used)]
//! Config service behavior over the in-memory store fake.

use std::path::PathBuf;

use roam_app_core::{
    load_host_settings, save_host_settings, ConfigError, ConfigService, DurableSetting,
    HostSettings, HOST_SETTINGS_KEY,
};
use roam_core::RuntimeConfig;
use roam_dry_tests::{FailMode, InMemoryConfigStore};

#[test]
fn missing_settings_fall_back_to_defaults() {
    let store = InMemoryConfigStore::new();
    let service = ConfigService::new(store.clone());
    assert_eq!(load_host_settings(&service).unwrap(), HostSettings::default());
    assert_eq!(store.loads(), 1);
    assert!(store.keys().is_empty());
}

#[test]
fn settings_round_trip_under_the_host_key() {
    let store = InMemoryConfigStore::new();
    let service = ConfigService::new(store.clone());
    let settings = HostSettings {
        runtime: RuntimeConfig {
            cache_ttl_ms: 5,
            max_walk_steps: Some(100),
            ..RuntimeConfig::default()
        },
        durable: DurableSetting::Directory {
            path: PathBuf::from("/var/lib/roam"),
        },
        max_concurrent_walks: 2,
        log_filter: "roam_core=debug".to_owned(),
    };
    save_host_settings(&service, &settings).unwrap();
    assert_eq!(store.keys(), vec![HOST_SETTINGS_KEY.to_owned()]);
    assert_eq!(load_host_settings(&service).unwrap(), settings);

    let raw: serde_json::Value =
        serde_json::from_slice(&store.raw(HOST_SETTINGS_KEY).unwrap()).unwrap();
    assert_eq!(raw["durable"]["kind"], "directory");
}

#[test]
fn partial_documents_take_defaults_for_missing_keys() {
    let store = InMemoryConfigStore::seeded(
        HOST_SETTINGS_KEY,
        br#"{"max_concurrent_walks": 3, "runtime": {"id_seed": "test"}}"#,
    );
    let service = ConfigService::new(store);
    let settings = load_host_settings(&service).unwrap();
    assert_eq!(settings.max_concurrent_walks, 3);
    assert_eq!(settings.runtime.id_seed, "test");
    assert_eq!(settings.runtime.cache_ttl_ms, RuntimeConfig::default().cache_ttl_ms);
    assert_eq!(settings.durable, DurableSetting::Memory);
}

#[test]
fn empty_blob_reads_as_missing() {
    let service = ConfigService::new(InMemoryConfigStore::seeded("prefs", b""));
    let loaded: Option<HostSettings> = service.load("prefs").unwrap();
    assert!(loaded.is_none());
}

#[test]
fn malformed_blob_names_its_key() {
    let service = ConfigService::new(InMemoryConfigStore::seeded(HOST_SETTINGS_KEY, b"{oops"));
    let err = load_host_settings(&service).unwrap_err();
    assert!(matches!(&err, ConfigError::Malformed { key, .. } if key == HOST_SETTINGS_KEY));
    assert!(err.to_string().starts_with("config `host` is malformed"));
}

#[test]
fn store_failures_propagate() {
    let store = InMemoryConfigStore::new();
    let service = ConfigService::new(store.clone());
    store.fail(FailMode::OnSave);
    assert!(matches!(
        save_host_settings(&service, &HostSettings::default()),
        Err(ConfigError::Other(_))
    ));
    store.fail(FailMode::OnLoad);
    assert!(matches!(load_host_settings(&service), Err(ConfigError::Other(_))));
    assert_eq!((store.saves(), store.loads()), (1, 1));
}
