// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Runtime entry points: tenant roots, sessions and walker spawns.
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::graph::{GraphError, GraphStore};
use crate::ident::{make_root_id, IdMint, ObjectId, RootId};
use crate::persistence::{
    CacheTier, CommitReceipt, DurableStore, MemoryDurable, PersistenceManager, StoreError,
};
use crate::registry::Registry;
use crate::scheduler::{TravelResult, Traveler, WalkOptions, WalkScheduler};
use crate::schema::ArchetypeKind;
use crate::value::Fields;

/// Runtime settings. Missing keys take their defaults when deserialized.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Lifetime of Tier-2 cache entries, in milliseconds. `0` disables the
    /// cache.
    pub cache_ttl_ms: u64,
    /// Maximum number of Tier-2 cache entries.
    pub cache_capacity: usize,
    /// Default wall-clock budget of a walk, in milliseconds.
    pub walk_budget_ms: Option<u64>,
    /// Default maximum number of places a walk may enter.
    pub max_walk_steps: Option<u64>,
    /// Seed mixed into every minted object id.
    pub id_seed: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            cache_ttl_ms: 30_000,
            cache_capacity: 10_000,
            walk_budget_ms: None,
            max_walk_steps: None,
            id_seed: "roam".to_owned(),
        }
    }
}

/// Errors surfaced by [`Runtime`] and [`Session`].
#[derive(Debug, Error)]
pub enum EngineError {
    /// The requested traveler type is not a declared walker archetype.
    #[error("unknown traveler type: {0}")]
    UnknownTravelerType(String),
    /// No tenant root with this id exists.
    #[error("unknown root: {0}")]
    UnknownRoot(ObjectId),
    /// A graph operation failed.
    #[error(transparent)]
    Graph(#[from] GraphError),
    /// A persistence tier failed, including commit conflicts.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl EngineError {
    /// Returns `true` for a durable version conflict at commit.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            Self::Store(StoreError::CommitConflict { .. })
                | Self::Graph(GraphError::Store(StoreError::CommitConflict { .. }))
        )
    }
}

/// A request to walk a traveler.
#[derive(Clone, Debug, Default)]
pub struct SpawnRequest {
    /// Walker archetype name.
    pub traveler_type: String,
    /// Initial traveler fields, overlaid on the archetype defaults.
    pub fields: Fields,
    /// Start place; the tenant root when `None`.
    pub start: Option<ObjectId>,
    /// Limits; unset limits fall back to [`RuntimeConfig`].
    pub options: WalkOptions,
}

impl SpawnRequest {
    /// Spawns a traveler of `traveler_type` at the tenant root.
    pub fn new(traveler_type: &str) -> Self {
        Self {
            traveler_type: traveler_type.to_owned(),
            ..Self::default()
        }
    }

    /// Sets initial traveler fields.
    pub fn with_fields(mut self, fields: Fields) -> Self {
        self.fields = fields;
        self
    }

    /// Starts the walk at `start` instead of the root.
    pub fn at(mut self, start: impl Into<ObjectId>) -> Self {
        self.start = Some(start.into());
        self
    }

    /// Sets walk limits.
    pub fn with_options(mut self, options: WalkOptions) -> Self {
        self.options = options;
        self
    }
}

/// Shared runtime: registry, cache and durable tier.
///
/// Cheap to share behind an `Arc`; every request gets its own volatile tier.
pub struct Runtime {
    registry: Arc<Registry>,
    cache: Arc<CacheTier>,
    durable: Arc<dyn DurableStore>,
    ids: Arc<IdMint>,
    config: RuntimeConfig,
}

impl core::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Runtime")
            .field("config", &self.config)
            .field("cached", &self.cache.len())
            .field("minted", &self.ids.minted())
            .finish_non_exhaustive()
    }
}

impl Runtime {
    /// Creates a runtime over `durable`. Reserves a fresh id epoch from the
    /// durable tier.
    pub fn new(
        registry: Registry,
        durable: Arc<dyn DurableStore>,
        config: RuntimeConfig,
    ) -> Result<Self, EngineError> {
        let epoch = durable.next_epoch()?;
        info!(epoch, seed = %config.id_seed, "runtime starting");
        Ok(Self {
            registry: Arc::new(registry),
            cache: Arc::new(CacheTier::new(
                Duration::from_millis(config.cache_ttl_ms),
                config.cache_capacity,
            )),
            ids: Arc::new(IdMint::new(&config.id_seed, epoch)),
            durable,
            config,
        })
    }

    /// Runtime over an in-process durable tier with default settings.
    pub fn in_memory(registry: Registry) -> Result<Self, EngineError> {
        Self::new(
            registry,
            Arc::new(MemoryDurable::new()),
            RuntimeConfig::default(),
        )
    }

    /// Frozen schema and abilities.
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Active settings.
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Shared Tier-2 cache.
    pub fn cache(&self) -> &Arc<CacheTier> {
        &self.cache
    }

    /// Durable tier.
    pub fn durable(&self) -> &Arc<dyn DurableStore> {
        &self.durable
    }

    fn graph(&self, requester: RootId) -> GraphStore {
        GraphStore::new(
            requester,
            Arc::clone(&self.registry),
            Arc::clone(&self.ids),
            PersistenceManager::new(Arc::clone(&self.cache), Arc::clone(&self.durable)),
        )
    }

    /// Creates the root for `tenant` and commits it. Calling it again for
    /// the same tenant returns the same id and writes nothing.
    #[instrument(skip(self))]
    pub fn create_root(&self, tenant: &str) -> Result<RootId, EngineError> {
        let root = make_root_id(tenant);
        let mut graph = self.graph(root);
        if graph.insert_root(root)? {
            graph.tiers_mut().commit()?;
            info!(root = %ObjectId::from(root), "root created");
        } else {
            let owned = self.durable.owned_by(root)?.len();
            info!(root = %ObjectId::from(root), owned, "root reopened");
        }
        Ok(root)
    }

    /// Every committed object owned by `root`.
    pub fn owned_by(&self, root: RootId) -> Result<Vec<ObjectId>, EngineError> {
        Ok(self.durable.owned_by(root)?)
    }

    /// Opens a request scope acting as `root`.
    pub fn session(&self, root: RootId) -> Result<Session, EngineError> {
        let mut graph = self.graph(root);
        if graph.readable_type(root.into())?.is_none() {
            return Err(EngineError::UnknownRoot(root.into()));
        }
        Ok(Session { root, graph })
    }

    /// Walks a traveler on behalf of `root` and commits its writes.
    ///
    /// Completed and disengaged walks run request-end garbage collection and
    /// commit. Cancelled, timed-out and step-limited walks discard their
    /// writes. A commit conflict is returned as an error; the walk's writes
    /// are discarded and nothing is retried.
    #[instrument(skip(self, request), fields(traveler = %request.traveler_type))]
    pub fn spawn(&self, root: RootId, request: SpawnRequest) -> Result<TravelResult, EngineError> {
        let mut session = self.session(root)?;
        let traveler_ty = self
            .registry
            .types()
            .resolve(&request.traveler_type)
            .filter(|ty| self.registry.types().kind(*ty) == Some(ArchetypeKind::Walker))
            .ok_or_else(|| EngineError::UnknownTravelerType(request.traveler_type.clone()))?;
        let fields = session.graph.fill_fields(traveler_ty, request.fields)?;
        let start = request.start.unwrap_or_else(|| root.into());
        session.graph.type_of(start)?;

        let mut options = request.options;
        if options.budget.is_none() {
            options.budget = self.config.walk_budget_ms.map(Duration::from_millis);
        }
        if options.max_steps.is_none() {
            options.max_steps = self.config.max_walk_steps;
        }

        let result = WalkScheduler::new(&mut session.graph, options)
            .run(Traveler::new(traveler_ty, fields), start)?;
        if result.halt.commits() {
            if let Err(err) = session.commit() {
                session.rollback();
                return Err(err);
            }
        } else {
            session.rollback();
        }
        info!(steps = result.steps, halt = ?result.halt, reports = result.reports.len(), "walk finished");
        Ok(result)
    }
}

/// Request scope outside of a walk.
///
/// Staged mutations become visible to other requests only through
/// [`commit`](Self::commit); dropping the session discards them.
#[derive(Debug)]
pub struct Session {
    root: RootId,
    graph: GraphStore,
}

impl Session {
    /// Tenant root this session acts as.
    pub fn root(&self) -> RootId {
        self.root
    }

    /// Graph store of this request.
    pub fn graph(&mut self) -> &mut GraphStore {
        &mut self.graph
    }

    /// Reclaims entities no longer reachable from any root, then commits
    /// everything staged in one atomic batch.
    #[instrument(skip(self), fields(root = %ObjectId::from(self.root)))]
    pub fn commit(&mut self) -> Result<CommitReceipt, EngineError> {
        let tiers = self.graph.tiers_mut();
        tiers.evict_unreachable(self.root)?;
        match tiers.commit() {
            Ok(receipt) => Ok(receipt),
            Err(err @ StoreError::CommitConflict { .. }) => {
                warn!(error = %err, "commit conflict");
                Err(err.into())
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Drops this session's clean copies so the next reads go back to the
    /// shared tiers. Staged mutations stay.
    pub fn evict(&mut self) {
        self.graph.tiers_mut().evict_volatile();
    }

    /// Discards everything staged.
    pub fn rollback(&mut self) {
        self.graph.tiers_mut().rollback();
    }
}
