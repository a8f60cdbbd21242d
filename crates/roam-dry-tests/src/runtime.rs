// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Runtime builder utilities for tests.

use std::sync::Arc;

use roam_core::{
    DurableStore, MemoryDurable, RegistryBuilder, RootId, Runtime, RuntimeConfig,
};

use crate::travel::travel_registry;

/// Builds a [`Runtime`] plus one tenant root.
///
/// Defaults to the fixture schema from [`travel_registry`], an in-memory
/// durable tier and the tenant `"alice"`.
///
/// ```
/// use roam_core::{ObjectId, SpawnRequest};
/// use roam_dry_tests::{RuntimeTestBuilder, ROAMER};
///
/// let (runtime, root) = RuntimeTestBuilder::new().build();
/// let result = runtime.spawn(root, SpawnRequest::new(ROAMER)).unwrap();
/// assert_eq!(result.path, vec![ObjectId::from(root)]);
/// ```
pub struct RuntimeTestBuilder {
    registry: RegistryBuilder,
    config: RuntimeConfig,
    durable: Option<Arc<dyn DurableStore>>,
    tenant: String,
}

impl Default for RuntimeTestBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RuntimeTestBuilder {
    /// Builder with the fixture schema and default settings.
    pub fn new() -> Self {
        Self {
            registry: travel_registry(),
            config: RuntimeConfig::default(),
            durable: None,
            tenant: "alice".to_owned(),
        }
    }

    /// Replaces the schema.
    pub fn with_registry(mut self, registry: RegistryBuilder) -> Self {
        self.registry = registry;
        self
    }

    /// Extends the schema in place.
    pub fn extend_registry(mut self, f: impl FnOnce(RegistryBuilder) -> RegistryBuilder) -> Self {
        self.registry = f(self.registry);
        self
    }

    /// Replaces the runtime settings.
    pub fn with_config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }

    /// Shares an existing durable tier, e.g. to simulate a restart.
    pub fn with_durable(mut self, durable: Arc<dyn DurableStore>) -> Self {
        self.durable = Some(durable);
        self
    }

    /// Sets the tenant whose root is created.
    pub fn with_tenant(mut self, tenant: &str) -> Self {
        self.tenant = tenant.to_owned();
        self
    }

    /// Builds the runtime and creates the tenant root.
    ///
    /// # Panics
    /// Panics when the schema is invalid or the durable tier fails.
    #[allow(clippy::expect_used)]
    pub fn build(self) -> (Runtime, RootId) {
        let registry = self.registry.build().expect("fixture schema must be valid");
        let durable = self
            .durable
            .unwrap_or_else(|| Arc::new(MemoryDurable::new()));
        let runtime =
            Runtime::new(registry, durable, self.config).expect("runtime must start");
        let root = runtime
            .create_root(&self.tenant)
            .expect("root creation must succeed");
        (runtime, root)
    }
}
