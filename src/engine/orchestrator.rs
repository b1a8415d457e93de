//! Query orchestration
//!
//! Resolves `execute_query(visualization, concepts, filter, group_dims)`:
//!
//! ```text
//! filter ──► ParamCanonicalizer ──► (params, start, end)
//!                                        │
//!                                        ▼
//!                                  PeriodSplitter ──► windows
//!                                        │
//!          bulk cache lookup ◄───────────┤
//!                                        ▼
//!        one task per (concept, window): cache hit │ compute (+ store)
//!                                        │
//!                                        ▼
//!                 per concept: reduce or GroupMerger, then transform
//! ```
//!
//! Every task is spawned on the runtime and joined; the request fails if any
//! task fails, but siblings always run to completion. Cache failures never
//! fail a request.

use super::group::GroupMerger;
use super::registry::VisualizationRegistry;
use super::traits::{BoundsSource, ComputeRequest};
use super::visualization::Visualization;
use crate::cache::{CacheEntry, CacheLookup, CacheStore, InMemoryCacheStore};
use crate::config::{CacheBackend, Config};
use crate::error::{BackendError, Error, Result};
use crate::metrics;
use crate::params::{FilterSchema, ParamCanonicalizer, Params};
use crate::redis::RedisCacheStore;
use crate::timeline::PeriodSplitter;
use crate::types::{
    ConceptRef, ConceptResult, DatasetBounds, GroupResult, QueryResult, Window, WindowValue,
};
use futures::future::join_all;
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Engine-level counters
#[derive(Debug, Default)]
struct EngineCounters {
    requests: AtomicU64,
    failed_requests: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    cache_failures: AtomicU64,
    computes: AtomicU64,
    stores: AtomicU64,
}

/// Snapshot of orchestrator activity
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OrchestratorStats {
    /// Requests received
    pub requests: u64,
    /// Requests that returned an error
    pub failed_requests: u64,
    /// Whole-unit windows served from the cache
    pub cache_hits: u64,
    /// Whole-unit windows looked for in the cache and not found
    pub cache_misses: u64,
    /// Cache operations that failed and were downgraded
    pub cache_failures: u64,
    /// Backend compute calls
    pub computes: u64,
    /// Entries written to the cache
    pub stores: u64,
}

impl EngineCounters {
    fn snapshot(&self) -> OrchestratorStats {
        OrchestratorStats {
            requests: self.requests.load(Ordering::Relaxed),
            failed_requests: self.failed_requests.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            cache_failures: self.cache_failures.load(Ordering::Relaxed),
            computes: self.computes.load(Ordering::Relaxed),
            stores: self.stores.load(Ordering::Relaxed),
        }
    }
}

/// Builder for [`QueryOrchestrator`]
pub struct QueryOrchestratorBuilder {
    registry: Option<VisualizationRegistry>,
    cache: Option<Arc<dyn CacheStore>>,
    schema: FilterSchema,
    bounds_source: Option<Arc<dyn BoundsSource>>,
    config: Config,
}

impl QueryOrchestratorBuilder {
    /// Create a builder with default configuration
    pub fn new() -> Self {
        Self {
            registry: None,
            cache: None,
            schema: FilterSchema::default(),
            bounds_source: None,
            config: Config::default(),
        }
    }

    /// Set the visualizations served
    pub fn with_registry(mut self, registry: VisualizationRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Use a specific cache store instead of the configured backend
    pub fn with_cache(mut self, cache: Arc<dyn CacheStore>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Set the declared filter fields
    pub fn with_schema(mut self, schema: FilterSchema) -> Self {
        self.schema = schema;
        self
    }

    /// Set the source queried by [`QueryOrchestrator::refresh_bounds`]
    pub fn with_bounds_source<B>(mut self, source: B) -> Self
    where
        B: BoundsSource + 'static,
    {
        self.bounds_source = Some(Arc::new(source));
        self
    }

    /// Set configuration
    pub fn with_config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Build the orchestrator
    ///
    /// Connects the configured cache backend unless one was supplied, and
    /// refreshes the dataset bounds once if a bounds source is set.
    pub async fn build(self) -> Result<QueryOrchestrator> {
        self.config.validate().map_err(Error::Configuration)?;

        let registry = self
            .registry
            .ok_or_else(|| Error::Configuration("No visualization registry configured".to_string()))?;

        let cache: Arc<dyn CacheStore> = match self.cache {
            Some(cache) => cache,
            None => match self.config.cache.backend {
                CacheBackend::Memory => Arc::new(InMemoryCacheStore::new()),
                CacheBackend::Redis => Arc::new(
                    RedisCacheStore::connect(
                        self.config.redis.to_redis_config(),
                        self.config.redis.key_prefix.clone(),
                        self.config.cache.retention(),
                    )
                    .await?,
                ),
            },
        };

        let metrics_enabled = self.config.monitoring.metrics_enabled;
        if metrics_enabled {
            metrics::update_visualizations(registry.len());
        }

        let orchestrator = QueryOrchestrator {
            registry: Arc::new(registry),
            cache,
            canonicalizer: ParamCanonicalizer::new(self.schema),
            splitter: PeriodSplitter::new(self.config.engine.time_unit),
            bounds: RwLock::new(self.config.engine.default_bounds()),
            bounds_source: self.bounds_source,
            metrics_enabled,
            counters: Arc::new(EngineCounters::default()),
        };

        if orchestrator.bounds_source.is_some() {
            orchestrator.refresh_bounds().await;
        }

        info!(
            time_unit = %orchestrator.splitter.unit(),
            cache = orchestrator.cache.store_id(),
            visualizations = orchestrator.registry.len(),
            "Query orchestrator ready"
        );
        Ok(orchestrator)
    }
}

impl Default for QueryOrchestratorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Splits, caches, computes, and folds windowed aggregate queries
pub struct QueryOrchestrator {
    registry: Arc<VisualizationRegistry>,
    cache: Arc<dyn CacheStore>,
    canonicalizer: ParamCanonicalizer,
    splitter: PeriodSplitter,
    bounds: RwLock<DatasetBounds>,
    bounds_source: Option<Arc<dyn BoundsSource>>,
    metrics_enabled: bool,
    counters: Arc<EngineCounters>,
}

impl QueryOrchestrator {
    /// Start building an orchestrator
    pub fn builder() -> QueryOrchestratorBuilder {
        QueryOrchestratorBuilder::new()
    }

    /// Run a query
    ///
    /// Returns one value per concept, keyed by the concept id with any
    /// self-only marker stripped. Grouping is active when `group_dims` is
    /// non-empty.
    pub async fn execute_query(
        &self,
        visualization: &str,
        concepts: &[String],
        filter: &Map<String, Value>,
        group_dims: Option<&[String]>,
    ) -> Result<QueryResult> {
        let started = Instant::now();
        self.counters.requests.fetch_add(1, Ordering::Relaxed);

        let result = self
            .run_query(visualization, concepts, filter, group_dims)
            .await;

        if result.is_err() {
            self.counters.failed_requests.fetch_add(1, Ordering::Relaxed);
        }
        if self.metrics_enabled {
            metrics::record_request(
                visualization,
                started.elapsed().as_secs_f64(),
                result.is_ok(),
            );
        }
        result
    }

    async fn run_query(
        &self,
        name: &str,
        concepts: &[String],
        filter: &Map<String, Value>,
        group_dims: Option<&[String]>,
    ) -> Result<QueryResult> {
        let visualization = self.registry.get(name)?;

        let bounds = self.bounds();
        let resolved = self
            .canonicalizer
            .canonicalize(filter, &bounds, self.splitter.unit());
        let windows = self.splitter.split(resolved.start, resolved.end);

        let capabilities = visualization.capabilities();
        if let Some(window) = windows.iter().find(|w| !capabilities.supports(w)) {
            return Err(Error::Configuration(format!(
                "Visualization [{}] cannot compute {} window {}",
                name,
                window.kind(),
                window
            )));
        }

        let group_dims: Option<Arc<[String]>> = group_dims
            .filter(|dims| !dims.is_empty())
            .map(Arc::from);
        let grouped = group_dims.is_some();
        let use_cache = visualization.is_cacheable() && !grouped;

        let concepts = distinct_concepts(concepts)?;
        let params = Arc::new(resolved.params);

        debug!(
            visualization = name,
            start = %resolved.start,
            end = %resolved.end,
            windows = windows.len(),
            concepts = concepts.len(),
            grouped,
            cache_key = params.cache_key(),
            "Resolved query"
        );

        let cached = if use_cache {
            self.lookup_cached(name, &concepts, &windows, &params).await
        } else {
            CacheLookup::new()
        };

        let mut handles = Vec::with_capacity(concepts.len() * windows.len());
        for concept in &concepts {
            let entries = cached.get(&concept.token);
            for window in &windows {
                let hit = match entries {
                    Some(entries) if window.is_cacheable() => entries
                        .iter()
                        .find(|e| e.window_start == window.start)
                        .cloned(),
                    _ => None,
                };

                let task = WindowTask {
                    visualization: visualization.clone(),
                    cache: self.cache.clone(),
                    counters: self.counters.clone(),
                    concept: concept.clone(),
                    window: *window,
                    window_end: self.splitter.window_end(window),
                    params: params.clone(),
                    group_dims: group_dims.clone(),
                    hit,
                    use_cache,
                    metrics_enabled: self.metrics_enabled,
                };
                handles.push(tokio::spawn(task.run()));
            }
        }

        let mut first_error: Option<Error> = None;
        let mut values = Vec::with_capacity(handles.len());
        for outcome in join_all(handles).await {
            match outcome {
                Ok(Ok(value)) => values.push(value),
                Ok(Err(e)) => {
                    first_error.get_or_insert(e);
                },
                Err(join_error) => {
                    first_error.get_or_insert(Error::from(join_error));
                },
            }
        }
        if let Some(e) = first_error {
            warn!(visualization = name, error = %e, "Query failed");
            return Err(e);
        }

        let mut values = values.into_iter();
        let mut result = QueryResult::with_capacity(concepts.len());
        for concept in concepts {
            let per_window: Vec<WindowValue> = values.by_ref().take(windows.len()).collect();
            let folded = fold_concept(&visualization, per_window, grouped)?;
            result.insert(concept.id, folded);
        }

        Ok(result)
    }

    async fn lookup_cached(
        &self,
        name: &str,
        concepts: &[ConceptRef],
        windows: &[Window],
        params: &Params,
    ) -> CacheLookup {
        let (Some(first), Some(last)) = (windows.first(), windows.last()) else {
            return CacheLookup::new();
        };
        if concepts.is_empty() || !windows.iter().any(Window::is_cacheable) {
            return CacheLookup::new();
        }

        let tokens: Vec<String> = concepts.iter().map(|c| c.token.clone()).collect();
        match self
            .cache
            .lookup(name, &tokens, first.start, last.start, params)
            .await
        {
            Ok(found) => found,
            Err(e) => {
                warn!(visualization = name, error = %e, "Cache lookup failed, computing all windows");
                self.counters.cache_failures.fetch_add(1, Ordering::Relaxed);
                if self.metrics_enabled {
                    metrics::record_cache_degraded("lookup");
                }
                CacheLookup::new()
            },
        }
    }

    /// Re-read the dataset bounds from the bounds source
    ///
    /// Fetched bounds are aligned outward to the time unit. On failure, or
    /// with no source configured, the current bounds are kept. Returns the
    /// bounds in effect afterwards.
    pub async fn refresh_bounds(&self) -> DatasetBounds {
        let Some(source) = &self.bounds_source else {
            debug!("No bounds source configured");
            return self.bounds();
        };

        match source.fetch_bounds().await {
            Ok(fetched) => {
                let unit = self.splitter.unit();
                let aligned =
                    DatasetBounds::new(unit.start_of(fetched.min), unit.end_of(fetched.max));
                *self.bounds.write() = aligned;
                info!(min = %aligned.min, max = %aligned.max, "Dataset bounds refreshed");
                aligned
            },
            Err(e) => {
                warn!(error = %e, "Bounds refresh failed, keeping previous bounds");
                self.bounds()
            },
        }
    }

    /// Bounds used when a request omits `start` or `end`
    pub fn bounds(&self) -> DatasetBounds {
        *self.bounds.read()
    }

    /// Replace the dataset bounds
    pub fn set_bounds(&self, bounds: DatasetBounds) {
        *self.bounds.write() = bounds;
    }

    /// Activity counters
    pub fn stats(&self) -> OrchestratorStats {
        self.counters.snapshot()
    }

    /// The cache store in use
    pub fn cache(&self) -> &Arc<dyn CacheStore> {
        &self.cache
    }

    /// The registered visualizations
    pub fn registry(&self) -> &VisualizationRegistry {
        &self.registry
    }

    /// The window splitter
    pub fn splitter(&self) -> &PeriodSplitter {
        &self.splitter
    }
}

/// Parse concept tokens, dropping exact repeats
///
/// Results are keyed by the stripped id, so asking for both the self-only and
/// the inclusive form of one concept is rejected.
fn distinct_concepts(tokens: &[String]) -> Result<Vec<ConceptRef>> {
    let mut seen: HashMap<String, bool> = HashMap::with_capacity(tokens.len());
    let mut concepts = Vec::with_capacity(tokens.len());

    for token in tokens {
        let concept = ConceptRef::parse(token);
        match seen.get(&concept.id) {
            Some(&self_only) if self_only == concept.self_only => {
                debug!(concept = %token, "Ignoring repeated concept");
            },
            Some(_) => {
                return Err(Error::Configuration(format!(
                    "Concept [{}] requested both self-only and inclusive",
                    concept.id
                )));
            },
            None => {
                seen.insert(concept.id.clone(), concept.self_only);
                concepts.push(concept);
            },
        }
    }
    Ok(concepts)
}

/// Fold one concept's window values into its final result
fn fold_concept(
    visualization: &Visualization,
    values: Vec<WindowValue>,
    grouped: bool,
) -> Result<ConceptResult> {
    let reducer = visualization.reducer();

    if !grouped {
        let mut acc = reducer.seed();
        for value in values {
            match value {
                WindowValue::Plain(v) => acc = reducer.reduce(acc, v),
                other => return Err(shape_error("plain", &other)),
            }
        }
        return Ok(ConceptResult::Plain(visualization.finish(acc)));
    }

    let mut lists = Vec::with_capacity(values.len());
    for value in values {
        match value {
            WindowValue::Grouped(buckets) => lists.push(buckets),
            other => return Err(shape_error("grouped", &other)),
        }
    }

    let merged = GroupMerger::new(reducer).merge(lists);
    if merged.is_empty() {
        let value = visualization.finish(reducer.seed());
        return Ok(ConceptResult::Grouped(vec![GroupResult::placeholder(value)]));
    }

    Ok(ConceptResult::Grouped(
        merged
            .into_iter()
            .map(|mut bucket| {
                bucket.value = visualization.finish(bucket.value);
                bucket
            })
            .collect(),
    ))
}

fn shape_error(expected: &'static str, actual: &WindowValue) -> Error {
    Error::Backend(BackendError::UnexpectedShape {
        expected,
        actual: actual.shape(),
    })
}

/// Resolution of one (concept, window) pair, run as a spawned task
struct WindowTask {
    visualization: Arc<Visualization>,
    cache: Arc<dyn CacheStore>,
    counters: Arc<EngineCounters>,
    concept: ConceptRef,
    window: Window,
    window_end: chrono::NaiveDate,
    params: Arc<Params>,
    group_dims: Option<Arc<[String]>>,
    hit: Option<CacheEntry>,
    use_cache: bool,
    metrics_enabled: bool,
}

impl WindowTask {
    async fn run(self) -> Result<WindowValue> {
        let name = self.visualization.name();

        if let Some(entry) = self.hit {
            self.counters.cache_hits.fetch_add(1, Ordering::Relaxed);
            if self.metrics_enabled {
                metrics::record_cache_result(name, true);
            }
            debug!(
                visualization = name,
                concept = %self.concept.token,
                window = %self.window,
                "Cache hit"
            );

            let value = entry.value.clone();
            let cache = self.cache;
            let counters = self.counters;
            let metrics_enabled = self.metrics_enabled;
            tokio::spawn(async move {
                if let Err(e) = cache.touch(&entry).await {
                    warn!(entry = %entry.id, error = %e, "Cache touch failed");
                    counters.cache_failures.fetch_add(1, Ordering::Relaxed);
                    if metrics_enabled {
                        metrics::record_cache_degraded("touch");
                    }
                }
            });
            return Ok(WindowValue::Plain(value));
        }

        let cacheable = self.use_cache && self.window.is_cacheable();
        if cacheable {
            self.counters.cache_misses.fetch_add(1, Ordering::Relaxed);
            if self.metrics_enabled {
                metrics::record_cache_result(name, false);
            }
        }

        let compute = self.visualization.compute_for(&self.window).ok_or_else(|| {
            Error::Configuration(format!(
                "Visualization [{}] has no compute for {} window {}",
                name,
                self.window.kind(),
                self.window
            ))
        })?;

        let request = ComputeRequest {
            concept_id: self.concept.id.clone(),
            self_only: self.concept.self_only,
            window: self.window,
            window_end: self.window_end,
            params: self.params.clone(),
            group_dims: self.group_dims.clone(),
        };

        self.counters.computes.fetch_add(1, Ordering::Relaxed);
        if self.metrics_enabled {
            metrics::record_compute(name, self.window.kind());
        }
        let value = compute.compute(&request).await?;
        debug!(
            visualization = name,
            concept = %self.concept.token,
            window = %self.window,
            shape = value.shape(),
            "Computed window"
        );

        if cacheable {
            if let WindowValue::Plain(v) = &value {
                match self
                    .cache
                    .store(name, &self.concept.token, self.window.start, &self.params, v)
                    .await
                {
                    Ok(()) => {
                        self.counters.stores.fetch_add(1, Ordering::Relaxed);
                    },
                    Err(e) => {
                        warn!(
                            visualization = name,
                            concept = %self.concept.token,
                            window = %self.window,
                            error = %e,
                            "Cache store failed"
                        );
                        self.counters.cache_failures.fetch_add(1, Ordering::Relaxed);
                        if self.metrics_enabled {
                            metrics::record_cache_degraded("store");
                        }
                    },
                }
            }
        }

        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::traits::WindowCompute;
    use crate::engine::visualization::VisualizationBuilder;
    use crate::reducers::CountReducer;
    use async_trait::async_trait;
    use serde_json::json;

    struct One;

    #[async_trait]
    impl WindowCompute for One {
        async fn compute(
            &self,
            _: &ComputeRequest,
        ) -> std::result::Result<WindowValue, BackendError> {
            Ok(WindowValue::Plain(json!({"total": 1, "exact": 1, "children": 0})))
        }
    }

    fn registry() -> VisualizationRegistry {
        VisualizationRegistry::new()
            .with(
                VisualizationBuilder::new("count")
                    .compute(One)
                    .reducer(CountReducer)
                    .cacheable(true)
                    .build()
                    .unwrap(),
            )
            .unwrap()
    }

    #[tokio::test]
    async fn test_build_requires_registry() {
        let err = QueryOrchestrator::builder().build().await.err().unwrap();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[tokio::test]
    async fn test_build_rejects_invalid_config() {
        let mut config = Config::default();
        config.cache.retention_secs = 0;
        let err = QueryOrchestrator::builder()
            .with_registry(registry())
            .with_config(config)
            .build()
            .await
            .err()
            .unwrap();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[tokio::test]
    async fn test_default_backend_is_memory() {
        let engine = QueryOrchestrator::builder()
            .with_registry(registry())
            .build()
            .await
            .unwrap();
        assert_eq!(engine.cache().store_id(), "in-memory-v1");
        assert_eq!(engine.stats(), OrchestratorStats::default());
    }

    #[tokio::test]
    async fn test_unknown_visualization() {
        let engine = QueryOrchestrator::builder()
            .with_registry(registry())
            .build()
            .await
            .unwrap();
        let err = engine
            .execute_query("nope", &["1".to_string()], &Map::new(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::UnknownVisualization(_)));
        assert_eq!(engine.stats().failed_requests, 1);
    }

    #[tokio::test]
    async fn test_inverted_range_yields_seed() {
        let engine = QueryOrchestrator::builder()
            .with_registry(registry())
            .build()
            .await
            .unwrap();
        let filter = json!({"start": "2019-03-01", "end": "2019-02-01"});
        let result = engine
            .execute_query("count", &["1".to_string()], filter.as_object().unwrap(), None)
            .await
            .unwrap();
        assert_eq!(
            result["1"].as_plain(),
            Some(&json!({"total": 0, "exact": 0, "children": 0}))
        );
        assert_eq!(engine.stats().computes, 0);
    }

    #[test]
    fn test_distinct_concepts() {
        let tokens: Vec<String> = ["1", "!2", "1", "!2", "3"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let concepts = distinct_concepts(&tokens).unwrap();
        let ids: Vec<&str> = concepts.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["1", "2", "3"]);
        assert!(concepts[1].self_only);

        let clash = vec!["7".to_string(), "!7".to_string()];
        assert!(matches!(
            distinct_concepts(&clash),
            Err(Error::Configuration(_))
        ));
    }

    #[test]
    fn test_fold_rejects_wrong_shape() {
        let viz = VisualizationBuilder::new("count")
            .compute(One)
            .reducer(CountReducer)
            .build()
            .unwrap();
        let err = fold_concept(&viz, vec![WindowValue::Plain(json!(1))], true).unwrap_err();
        assert!(matches!(
            err,
            Error::Backend(BackendError::UnexpectedShape { expected: "grouped", .. })
        ));
    }
}
