//! The view engine
//!
//! [`ViewEngine`] ties the pieces together: it resolves view references,
//! provisions view stores, brings indexes up to date, and answers queries.
//! Named views are serialized per view so that racing queries never write
//! checkpoints concurrently.

use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::executor::QueryExecutor;
use crate::function::FunctionRegistry;
use crate::lifecycle::{destroy_all, CleanupGuard, StoreNames, ViewHandle};
use crate::metrics::{MetricsSnapshot, UpdateMetrics};
use crate::options::{QueryOptions, QueryResult};
use crate::remote;
use crate::updater::{UpdateSummary, ViewUpdater};
use crate::view::{ViewDefinition, ViewRef, DESIGN_PREFIX};
use dashmap::DashMap;
use mapview_store::{DocumentStore, StoreProvider, Transport};
use mapview_types::DocId;
use std::fmt;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument};

/// Incremental map/reduce views over one source store
pub struct ViewEngine {
    /// Store whose documents are indexed
    source: Arc<dyn DocumentStore>,

    /// Opens and destroys the stores backing views
    provider: Arc<dyn StoreProvider>,

    /// Functions named by design documents
    registry: Arc<FunctionRegistry>,

    config: EngineConfig,

    /// One lock per named view, held across update and scan
    locks: DashMap<String, Arc<Mutex<()>>>,

    metrics: UpdateMetrics,
}

impl ViewEngine {
    /// Create an engine with the default configuration and an empty
    /// function registry
    pub fn new(source: Arc<dyn DocumentStore>, provider: Arc<dyn StoreProvider>) -> Self {
        ViewEngine {
            source,
            provider,
            registry: Arc::new(FunctionRegistry::new()),
            config: EngineConfig::default(),
            locks: DashMap::new(),
            metrics: UpdateMetrics::new(),
        }
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_registry(mut self, registry: Arc<FunctionRegistry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn registry(&self) -> &FunctionRegistry {
        &self.registry
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn source(&self) -> &Arc<dyn DocumentStore> {
        &self.source
    }

    /// Counters accumulated by every update pass of this engine
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Query a view
    ///
    /// The index is brought up to date first. Inline views are built in
    /// temporary stores that are gone by the time this returns, whether
    /// it returns a result or an error.
    pub async fn query(
        &self,
        view: impl Into<ViewRef>,
        options: QueryOptions,
    ) -> Result<QueryResult> {
        self.run_query(view.into(), options).await
    }

    #[instrument(skip(self, view, options), fields(view = %view, source = %self.source.name()))]
    async fn run_query(&self, view: ViewRef, options: QueryOptions) -> Result<QueryResult> {
        if let Transport::Remote(transport) = self.source.transport() {
            return remote::delegate(transport.as_ref(), &view, &options).await;
        }

        match view {
            ViewRef::Inline(definition) => self.query_temporary(definition, &options).await,
            named @ ViewRef::Named { .. } => {
                let handle = self.open_view(&named).await?;
                self.query_view(&handle, &options).await
            }
        }
    }

    /// Update `handle` and run `options` against it
    ///
    /// Handles of named views are locked for the whole call.
    pub async fn query_view(
        &self,
        handle: &ViewHandle,
        options: &QueryOptions,
    ) -> Result<QueryResult> {
        let lock = self.lock_for(handle);
        let _guard = match &lock {
            Some(lock) => Some(lock.lock().await),
            None => None,
        };
        self.refresh(handle).await?;
        QueryExecutor::new(handle).execute(options).await
    }

    async fn query_temporary(
        &self,
        definition: ViewDefinition,
        options: &QueryOptions,
    ) -> Result<QueryResult> {
        let stores = StoreNames::temporary(&self.config.store_prefix, self.source.name());
        let guard = CleanupGuard::new(Arc::clone(&self.provider), stores.clone());

        let outcome = async {
            let handle = ViewHandle::open(
                self.provider.as_ref(),
                "temp_view",
                definition,
                stores.clone(),
                true,
            )
            .await?;
            self.refresh(&handle).await?;
            let result = QueryExecutor::new(&handle).execute(options).await?;
            Ok::<_, Error>(result)
        }
        .await;

        let cleanup = destroy_all(self.provider.as_ref(), &stores).await;
        if cleanup.is_ok() {
            guard.disarm();
        }
        debug!(index = %stores.index, failed = outcome.is_err(), "Temporary view finished");

        match (outcome, cleanup) {
            (Err(err), _) => Err(err),
            (Ok(_), Err(err)) => Err(err),
            (Ok(result), Ok(())) => Ok(result),
        }
    }

    /// Bring a named view's index up to date without querying it
    pub async fn update(&self, view: &ViewRef) -> Result<UpdateSummary> {
        if view.is_inline() {
            return Err(Error::InvalidRequest(
                "temporary views are only materialized by a query".to_string(),
            ));
        }
        if self.source.transport().is_remote() {
            return Err(Error::InvalidRequest(
                "remote stores maintain their own views".to_string(),
            ));
        }
        let handle = self.open_view(view).await?;
        self.update_view(&handle).await
    }

    /// Update the index behind `handle`
    pub async fn update_view(&self, handle: &ViewHandle) -> Result<UpdateSummary> {
        let lock = self.lock_for(handle);
        let _guard = match &lock {
            Some(lock) => Some(lock.lock().await),
            None => None,
        };
        self.refresh(handle).await
    }

    async fn refresh(&self, handle: &ViewHandle) -> Result<UpdateSummary> {
        ViewUpdater::new(
            self.source.as_ref(),
            handle,
            &self.metrics,
            self.config.max_concurrent_docs,
        )
        .run()
        .await
    }

    /// Resolve `view` and open the stores backing it
    ///
    /// Inline views get fresh stores; the caller owns them and must
    /// [`close`](ViewHandle::close) the handle.
    pub async fn open_view(&self, view: &ViewRef) -> Result<ViewHandle> {
        match view {
            ViewRef::Inline(definition) => {
                let stores = StoreNames::temporary(&self.config.store_prefix, self.source.name());
                ViewHandle::open(
                    self.provider.as_ref(),
                    view.to_string(),
                    definition.clone(),
                    stores,
                    true,
                )
                .await
            }
            ViewRef::Named { design, view: name } => {
                let definition = self.resolve(design, name).await?;
                let stores = self.named_stores(design, name);
                ViewHandle::open(
                    self.provider.as_ref(),
                    view.to_string(),
                    definition,
                    stores,
                    false,
                )
                .await
            }
        }
    }

    /// Destroy the stores of a named view; the next query rebuilds it
    pub async fn drop_view(&self, view: &ViewRef) -> Result<()> {
        let ViewRef::Named { design, view: name } = view else {
            return Err(Error::InvalidRequest(
                "only named views have stores to drop".to_string(),
            ));
        };
        let stores = self.named_stores(design, name);
        let lock = self.named_lock(&stores.index);
        let _guard = lock.lock().await;
        info!(view = %view, "Dropping view stores");
        destroy_all(self.provider.as_ref(), &stores).await
    }

    async fn resolve(&self, design: &str, view: &str) -> Result<ViewDefinition> {
        let id = DocId::new(format!("{DESIGN_PREFIX}{design}"));
        let design_doc = self
            .source
            .get(&id)
            .await?
            .ok_or_else(|| Error::NotFound("missing".to_string()))?;
        ViewDefinition::from_design_doc(&design_doc, view, &self.registry)
    }

    fn named_stores(&self, design: &str, view: &str) -> StoreNames {
        StoreNames::named(&self.config.store_prefix, self.source.name(), design, view)
    }

    fn lock_for(&self, handle: &ViewHandle) -> Option<Arc<Mutex<()>>> {
        (!handle.is_ephemeral()).then(|| self.named_lock(&handle.stores().index))
    }

    fn named_lock(&self, key: &str) -> Arc<Mutex<()>> {
        let entry = self
            .locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())));
        Arc::clone(entry.value())
    }
}

impl fmt::Debug for ViewEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ViewEngine")
            .field("source", &self.source.name())
            .field("config", &self.config)
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}
