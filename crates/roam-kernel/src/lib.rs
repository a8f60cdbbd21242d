// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Roam Kernel
//!
//! Hosts a shared [`Runtime`] and runs walks concurrently, one request per
//! blocking task, bounded by a permit pool.

use std::sync::Arc;

use anyhow::{Context, Result};
use roam_app_core::{load_host_settings, ConfigService, ConfigStore, DurableSetting, HostSettings};
use roam_core::{
    DurableStore, FsDurable, MemoryDurable, Registry, RootId, Runtime, SpawnRequest, TravelResult,
};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, instrument};
use tracing_subscriber::EnvFilter;

/// Installs the global `tracing` subscriber for a host process.
///
/// `RUST_LOG` wins when set; otherwise `default_filter` applies. The default
/// is validated either way. Returns `false` when a subscriber was already
/// installed and this call changed nothing.
pub fn init_tracing(default_filter: &str) -> Result<bool> {
    let fallback = EnvFilter::try_new(default_filter)
        .with_context(|| format!("invalid log filter `{default_filter}`"))?;
    let filter = EnvFilter::try_from_default_env().unwrap_or(fallback);
    Ok(tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init()
        .is_ok())
}

/// The Roam Kernel.
/// Owns the runtime and bounds how many walks run at once.
#[derive(Clone, Debug)]
pub struct Kernel {
    runtime: Arc<Runtime>,
    permits: Arc<Semaphore>,
}

impl Kernel {
    /// Wraps `runtime`, allowing at most `max_concurrent_walks` walks at a
    /// time (at least one).
    pub fn new(runtime: Runtime, max_concurrent_walks: usize) -> Self {
        Self {
            runtime: Arc::new(runtime),
            permits: Arc::new(Semaphore::new(max_concurrent_walks.max(1))),
        }
    }

    /// Boots a kernel from host settings: opens the configured durable tier
    /// and starts a runtime over it.
    #[instrument(skip(registry, settings), fields(durable = ?settings.durable))]
    pub fn from_settings(registry: Registry, settings: &HostSettings) -> Result<Self> {
        let durable: Arc<dyn DurableStore> = match &settings.durable {
            DurableSetting::Memory => Arc::new(MemoryDurable::new()),
            DurableSetting::Directory { path } => Arc::new(
                FsDurable::open(path)
                    .with_context(|| format!("opening durable tier at {}", path.display()))?,
            ),
        };
        let runtime = Runtime::new(registry, durable, settings.runtime.clone())
            .context("starting runtime")?;
        info!(max_walks = settings.max_concurrent_walks, "kernel ready");
        Ok(Self::new(runtime, settings.max_concurrent_walks))
    }

    /// Boots a host: reads [`HostSettings`] from `config` (defaults when
    /// none are stored), installs tracing with the configured log filter,
    /// then starts as [`from_settings`](Self::from_settings) does.
    pub fn boot<S: ConfigStore>(registry: Registry, config: &ConfigService<S>) -> Result<Self> {
        let settings = load_host_settings(config).context("loading host settings")?;
        if !init_tracing(&settings.log_filter)? {
            debug!("tracing subscriber already installed");
        }
        Self::from_settings(registry, &settings)
    }

    /// Shared runtime.
    pub fn runtime(&self) -> &Arc<Runtime> {
        &self.runtime
    }

    /// Walks currently allowed to start without waiting.
    pub fn idle_slots(&self) -> usize {
        self.permits.available_permits()
    }

    /// Creates (or finds) the root of `tenant`.
    pub async fn create_root(&self, tenant: &str) -> Result<RootId> {
        let runtime = Arc::clone(&self.runtime);
        let tenant = tenant.to_owned();
        let root = tokio::task::spawn_blocking(move || runtime.create_root(&tenant))
            .await
            .context("root creation task panicked")??;
        Ok(root)
    }

    /// Runs one walk on the blocking pool once a slot frees up.
    #[instrument(skip(self, request), fields(traveler = %request.traveler_type))]
    pub async fn submit(&self, root: RootId, request: SpawnRequest) -> Result<TravelResult> {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .context("kernel shut down")?;
        debug!(idle = self.permits.available_permits(), "walk admitted");
        let runtime = Arc::clone(&self.runtime);
        let result = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            runtime.spawn(root, request)
        })
        .await
        .context("walk task panicked")??;
        Ok(result)
    }

    /// Runs every request concurrently and returns results in request
    /// order.
    pub async fn submit_all(
        &self,
        requests: Vec<(RootId, SpawnRequest)>,
    ) -> Vec<Result<TravelResult>> {
        let mut set = JoinSet::new();
        for (idx, (root, request)) in requests.into_iter().enumerate() {
            let kernel = self.clone();
            set.spawn(async move { (idx, kernel.submit(root, request).await) });
        }
        let mut slots: Vec<Option<Result<TravelResult>>> = Vec::new();
        slots.resize_with(set.len(), || None);
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((idx, outcome)) => {
                    if let Some(slot) = slots.get_mut(idx) {
                        *slot = Some(outcome);
                    }
                }
                Err(err) => debug!(error = %err, "walk join failed"),
            }
        }
        slots
            .into_iter()
            .map(|slot| slot.unwrap_or_else(|| Err(anyhow::anyhow!("walk task lost"))))
            .collect()
    }

    /// Stops admitting new walks. Running walks finish normally; later
    /// submits fail.
    pub fn shutdown(&self) {
        self.permits.close();
        info!("kernel shut down");
    }
}
