//! Custom metrics provider
//!
//! The provider ties the rule engine to its collaborators. It runs discovery
//! against the store, serves the resulting catalog, and answers metric value
//! requests by resolving them into store queries.
//!
//! The compiled engine and the catalog it produced are published together as
//! one immutable [`Snapshot`] behind an `ArcSwap`. Requests read whichever
//! snapshot is current when they start; reloads and refreshes build a new
//! snapshot off to the side and swap it in. Reloads run one at a time, so
//! the last reload to start is the one left serving.

pub mod resources;

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use arc_swap::ArcSwap;
use futures::future::join_all;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

pub use resources::{LabelSelector, ResourceLister, ResourceRef, StaticResourceLister};

use crate::config::DiscoveryRuleConfig;
use crate::error::{ProviderError, RuleError};
use crate::metrics::AdapterMetrics;
use crate::rules::selector::METRIC_NAME_LABEL;
use crate::rules::{Catalog, DiscoveryStats, GroupResource, MetricInfo, MetricRequest, RuleEngine, StoreQuery};
use crate::store::{Sample, SeriesStore};

/// Engine and catalog that belong together
#[derive(Debug, Default)]
pub struct Snapshot {
    pub engine: Arc<RuleEngine>,
    pub catalog: Arc<Catalog>,
    /// Statistics of the discovery pass that built the catalog
    pub stats: DiscoveryStats,
}

/// Object a metric value describes
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ObjectRef {
    pub resource: GroupResource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    pub name: String,
}

/// A metric value for one object
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricValue {
    pub described_object: ObjectRef,
    pub metric: String,
    pub value: f64,
    /// Unix timestamp of the sample, in seconds
    pub timestamp: f64,
}

/// Serves discovered metrics and their values
pub struct MetricsProvider {
    store: Arc<dyn SeriesStore>,
    lister: Option<Arc<dyn ResourceLister>>,
    metrics: Arc<AdapterMetrics>,
    state: ArcSwap<Snapshot>,
    /// Held for the whole of a reload, from loading the rules to the swap
    reload_lock: Mutex<()>,
}

impl MetricsProvider {
    /// Create a provider with an empty catalog; call [`refresh`](Self::refresh) to populate it
    pub fn new(
        engine: RuleEngine,
        store: Arc<dyn SeriesStore>,
        lister: Option<Arc<dyn ResourceLister>>,
        metrics: Arc<AdapterMetrics>,
    ) -> Self {
        Self {
            store,
            lister,
            metrics,
            state: ArcSwap::from_pointee(Snapshot {
                engine: Arc::new(engine),
                catalog: Arc::new(Catalog::new()),
                stats: DiscoveryStats::default(),
            }),
            reload_lock: Mutex::new(()),
        }
    }

    /// Current engine and catalog
    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.state.load_full()
    }

    /// Currently active engine
    pub fn engine(&self) -> Arc<RuleEngine> {
        Arc::clone(&self.state.load().engine)
    }

    /// Currently served catalog
    pub fn catalog(&self) -> Arc<Catalog> {
        Arc::clone(&self.state.load().catalog)
    }

    /// Self metrics shared with the provider
    pub fn metrics(&self) -> &Arc<AdapterMetrics> {
        &self.metrics
    }

    /// Run discovery with the current engine and publish the new catalog.
    ///
    /// If a reload replaces the engine while discovery runs, the result
    /// belongs to the old engine and is discarded.
    #[instrument(skip(self))]
    pub async fn refresh(&self) -> DiscoveryStats {
        let engine = self.engine();
        let (catalog, stats) = self.discover(&engine).await;
        let catalog = Arc::new(catalog);

        let previous = self.state.rcu(|current| {
            if Arc::ptr_eq(&current.engine, &engine) {
                Arc::new(Snapshot {
                    engine: Arc::clone(&engine),
                    catalog: Arc::clone(&catalog),
                    stats,
                })
            } else {
                Arc::clone(current)
            }
        });

        if !Arc::ptr_eq(&previous.engine, &engine) {
            debug!("Engine replaced during discovery; dropping stale catalog");
        }

        stats
    }

    /// Compile a new rule set, run discovery with it and swap it in.
    ///
    /// # Errors
    ///
    /// The compilation error; the previous engine and catalog keep serving.
    #[instrument(skip(self, rules), fields(rules = rules.len()))]
    pub async fn reload(&self, rules: &[DiscoveryRuleConfig]) -> Result<DiscoveryStats, RuleError> {
        let _guard = self.reload_lock.lock().await;
        self.reload_locked(rules).await
    }

    /// Like [`reload`](Self::reload), but loads the rules once no other
    /// reload is running.
    ///
    /// Two overlapping reloads of a config file therefore publish in the
    /// order they read the file.
    ///
    /// # Errors
    ///
    /// The loader's error, or the compilation error converted into it.
    pub async fn reload_from<F, E>(&self, load: F) -> Result<DiscoveryStats, E>
    where
        F: FnOnce() -> Result<Vec<DiscoveryRuleConfig>, E>,
        E: From<RuleError> + fmt::Display,
    {
        let _guard = self.reload_lock.lock().await;
        let rules = match load() {
            Ok(rules) => rules,
            Err(e) => {
                self.metrics.record_reload(false);
                warn!(error = %e, "Could not load rules; keeping current rules");
                return Err(e);
            }
        };
        Ok(self.reload_locked(&rules).await?)
    }

    async fn reload_locked(&self, rules: &[DiscoveryRuleConfig]) -> Result<DiscoveryStats, RuleError> {
        let engine = match RuleEngine::compile(rules) {
            Ok(engine) => Arc::new(engine),
            Err(e) => {
                self.metrics.record_reload(false);
                warn!(error = %e, "Rule reload rejected; keeping current rules");
                return Err(e);
            }
        };

        let (catalog, stats) = self.discover(&engine).await;
        self.state.store(Arc::new(Snapshot {
            engine: Arc::clone(&engine),
            catalog: Arc::new(catalog),
            stats,
        }));
        self.metrics.record_reload(true);
        self.metrics.retain_group_failures(|series_query| {
            engine.groups().iter().any(|g| g.series_query == series_query)
        });

        info!(rules = rules.len(), "Rules reloaded");
        Ok(stats)
    }

    /// Query every group once, concurrently, and build a catalog
    async fn discover(&self, engine: &RuleEngine) -> (Catalog, DiscoveryStats) {
        let started = Instant::now();

        let results = join_all(
            engine
                .groups()
                .iter()
                .map(|group| self.store.series(&group.series_query)),
        )
        .await;

        let discovered: Vec<_> = engine
            .groups()
            .iter()
            .zip(results)
            .map(|(group, result)| match result {
                Ok(series) => Some(series),
                Err(e) => {
                    warn!(
                        series_query = %group.series_query,
                        rules = ?group.rules,
                        error = %e,
                        "Series query failed; its rules contribute nothing this pass"
                    );
                    self.metrics.record_group_failure(&group.series_query);
                    None
                }
            })
            .collect();

        let (mut catalog, stats) = engine.build_catalog(&discovered);

        if let Some(lister) = &self.lister {
            let before = catalog.len();
            catalog.retain_resources(|resource| lister.is_known(resource));
            if catalog.len() != before {
                debug!(
                    dropped = before - catalog.len(),
                    "Dropped catalog entries for unknown resources"
                );
            }
        }

        let elapsed = started.elapsed().as_secs_f64();
        self.metrics.record_discovery(&stats, catalog.len(), elapsed);

        info!(
            groups = engine.groups().len(),
            series_seen = stats.series_seen,
            series_matched = stats.series_matched,
            series_skipped = stats.series_skipped,
            conflicts = stats.conflicts,
            failed_groups = stats.failed_groups,
            metrics = catalog.len(),
            elapsed_ms = (elapsed * 1000.0) as u64,
            "Discovery completed"
        );

        (catalog, stats)
    }

    /// Every available `(resource, metric)` pair, sorted
    pub fn list_available_metrics(&self) -> Vec<MetricInfo> {
        self.catalog().list()
    }

    /// Value of a metric for one object.
    ///
    /// # Errors
    ///
    /// `MetricNotFound` when no rule serves the metric on the resource,
    /// `ResourceNotFound` when the lister does not know the object, and
    /// `NoData` when the query returns nothing for it.
    #[instrument(skip(self, resource), fields(resource = %resource))]
    pub async fn get_metric_value(
        &self,
        resource: &GroupResource,
        namespace: Option<&str>,
        name: &str,
        metric: &str,
    ) -> Result<MetricValue, ProviderError> {
        self.metrics.metric_requests_total.inc();
        let result = self.metric_value(resource, namespace, name, metric).await;
        if result.is_err() {
            self.metrics.metric_request_errors_total.inc();
        }
        result
    }

    async fn metric_value(
        &self,
        resource: &GroupResource,
        namespace: Option<&str>,
        name: &str,
        metric: &str,
    ) -> Result<MetricValue, ProviderError> {
        if let Some(lister) = &self.lister {
            if !lister.resource_exists(resource, namespace, name).await? {
                return Err(ProviderError::ResourceNotFound {
                    resource: resource.clone(),
                    name: name.to_string(),
                });
            }
        }

        let request = MetricRequest::new(resource.clone(), metric, namespace, name);
        let query = self.resolve(&request)?;
        let samples = self.store.query(&query.query).await?;

        let mut matching = samples
            .iter()
            .filter(|s| sample_matches(s, &query, namespace))
            .filter(|s| s.labels.get(&query.resource_label).map(String::as_str) == Some(name));

        let sample = matching.next().ok_or_else(|| ProviderError::NoData {
            resource: resource.clone(),
            name: name.to_string(),
            metric: metric.to_string(),
        })?;

        let others = matching.count();
        if others > 0 {
            debug!(
                rule = query.rule,
                query = %query.query,
                samples = others + 1,
                "Several samples match the object; using the first"
            );
        }

        Ok(MetricValue {
            described_object: ObjectRef {
                resource: resource.clone(),
                namespace: namespace.map(str::to_string),
                name: name.to_string(),
            },
            metric: metric.to_string(),
            value: sample.value,
            timestamp: sample.timestamp,
        })
    }

    /// Values of a metric for every object a label selector selects.
    ///
    /// Objects without data are left out of the result.
    ///
    /// # Errors
    ///
    /// `SelectorUnsupported` when no resource lister is configured.
    #[instrument(skip(self, resource), fields(resource = %resource))]
    pub async fn get_metrics_by_selector(
        &self,
        resource: &GroupResource,
        namespace: Option<&str>,
        label_selector: &str,
        metric: &str,
    ) -> Result<Vec<MetricValue>, ProviderError> {
        self.metrics.metric_requests_total.inc();
        let result = self
            .metrics_by_selector(resource, namespace, label_selector, metric)
            .await;
        if result.is_err() {
            self.metrics.metric_request_errors_total.inc();
        }
        result
    }

    async fn metrics_by_selector(
        &self,
        resource: &GroupResource,
        namespace: Option<&str>,
        label_selector: &str,
        metric: &str,
    ) -> Result<Vec<MetricValue>, ProviderError> {
        let lister = self.lister.as_ref().ok_or(ProviderError::SelectorUnsupported)?;
        let selector = LabelSelector::parse(label_selector)?;

        let objects = lister.list_resources(resource, namespace, &selector).await?;
        if objects.is_empty() {
            return Ok(Vec::new());
        }

        let request = MetricRequest {
            resource: resource.clone(),
            metric_name: metric.to_string(),
            namespace: namespace.map(str::to_string),
            names: objects.iter().map(|o| o.name.clone()).collect(),
        };
        let query = self.resolve(&request)?;
        let samples = self.store.query(&query.query).await?;

        let mut seen = HashSet::new();
        let mut values: Vec<MetricValue> = samples
            .iter()
            .filter(|s| sample_matches(s, &query, namespace))
            .filter_map(|s| {
                let name = s.labels.get(&query.resource_label)?;
                let object = objects.iter().find(|o| &o.name == name)?;
                seen.insert(name.clone()).then(|| MetricValue {
                    described_object: ObjectRef {
                        resource: resource.clone(),
                        namespace: object.namespace.clone(),
                        name: name.clone(),
                    },
                    metric: metric.to_string(),
                    value: s.value,
                    timestamp: s.timestamp,
                })
            })
            .collect();

        values.sort_by(|a, b| a.described_object.name.cmp(&b.described_object.name));
        Ok(values)
    }

    fn resolve(&self, request: &MetricRequest) -> Result<StoreQuery, ProviderError> {
        let snapshot = self.snapshot();
        let not_found = || ProviderError::MetricNotFound {
            resource: request.resource.clone(),
            metric: request.metric_name.clone(),
        };

        if snapshot
            .catalog
            .get(&request.resource, &request.metric_name)
            .is_none()
        {
            return Err(not_found());
        }

        let query = snapshot
            .engine
            .resolve_request(request, &snapshot.catalog)?
            .ok_or_else(not_found)?;
        debug!(rule = query.rule, query = %query.query, "Resolved request");
        Ok(query)
    }
}

/// Sample belongs to the queried series and namespace, where the result says so
fn sample_matches(sample: &Sample, query: &StoreQuery, namespace: Option<&str>) -> bool {
    let same_series = sample
        .labels
        .get(METRIC_NAME_LABEL)
        .map_or(true, |name| *name == query.series);
    let same_namespace = match (&query.namespace_label, namespace) {
        (Some(label), Some(ns)) => sample.labels.get(label).map_or(true, |v| v == ns),
        _ => true,
    };
    same_series && same_namespace
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;

    use crate::config::Config;
    use crate::error::StoreError;
    use crate::store::{Labels, Series, StoreResult};

    const RULES: &str = r#"
rules:
  - seriesQuery: '{__name__=~"container_.*_total",namespace!="",pod!=""}'
    seriesFilters:
      - isNot: container_fs_.*
    resources:
      overrides:
        namespace: {resource: namespaces}
        pod: {resource: pods}
    naming:
      suffix: _total
    metricsQuery: sum(rate(${Series}{${LabelMatchers}}[2m])) by (${GroupBy})
  - seriesQuery: '{__name__=~"container_.*_total",namespace!="",pod!=""}'
    seriesFilters:
      - is: container_fs_.*
    resources:
      overrides:
        namespace: {resource: namespaces}
        pod: {resource: pods}
    naming:
      prefix: container_
      suffix: _total
  - seriesQuery: 'http_requests_total{namespace!=""}'
    resources:
      template: ${Resource}
      overrides:
        namespace: {resource: namespaces}
        pod: {resource: pods}
    naming:
      constantName: http_requests
"#;

    const CONTAINER_QUERY: &str = r#"{__name__=~"container_.*_total",namespace!="",pod!=""}"#;
    const HTTP_QUERY: &str = r#"http_requests_total{namespace!=""}"#;

    fn labels(pairs: &[(&str, &str)]) -> Labels {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[derive(Default)]
    struct FakeStore {
        series: HashMap<String, Vec<Series>>,
        samples: Vec<Sample>,
        failing: HashSet<String>,
        delays: HashMap<String, Duration>,
        series_calls: AtomicUsize,
        queries: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl SeriesStore for FakeStore {
        async fn series(&self, selector: &str) -> StoreResult<Vec<Series>> {
            self.series_calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delays.get(selector) {
                tokio::time::sleep(*delay).await;
            }
            if self.failing.contains(selector) {
                return Err(StoreError::HttpStatus(503));
            }
            Ok(self.series.get(selector).cloned().unwrap_or_default())
        }

        async fn query(&self, query: &str) -> StoreResult<Vec<Sample>> {
            self.queries.lock().unwrap().push(query.to_string());
            Ok(self.samples.clone())
        }
    }

    fn fake_store() -> FakeStore {
        let mut series = HashMap::new();
        series.insert(
            CONTAINER_QUERY.to_string(),
            vec![
                Series::new(
                    "container_cpu_usage_seconds_total",
                    labels(&[("namespace", "default"), ("pod", "web-0")]),
                ),
                Series::new(
                    "container_cpu_usage_seconds_total",
                    labels(&[("namespace", "default"), ("pod", "web-1")]),
                ),
                Series::new(
                    "container_fs_reads_total",
                    labels(&[("namespace", "default"), ("pod", "web-0")]),
                ),
            ],
        );
        series.insert(
            HTTP_QUERY.to_string(),
            vec![Series::new(
                "http_requests_total",
                labels(&[
                    ("namespace", "default"),
                    ("pod", "web-0"),
                    ("instance", "10.0.0.1:80"),
                ]),
            )],
        );

        FakeStore {
            series,
            samples: vec![
                Sample {
                    labels: labels(&[("pod", "web-0")]),
                    value: 0.25,
                    timestamp: 1700000000.0,
                },
                Sample {
                    labels: labels(&[("pod", "web-1")]),
                    value: 0.5,
                    timestamp: 1700000000.0,
                },
            ],
            ..Default::default()
        }
    }

    fn rules() -> Vec<DiscoveryRuleConfig> {
        Config::from_yaml(RULES).unwrap().rules
    }

    fn provider(store: Arc<FakeStore>, lister: Option<Arc<dyn ResourceLister>>) -> MetricsProvider {
        let engine = RuleEngine::compile(&rules()).unwrap();
        MetricsProvider::new(engine, store, lister, Arc::new(AdapterMetrics::new()))
    }

    fn pods_lister() -> Arc<dyn ResourceLister> {
        Arc::new(
            StaticResourceLister::new()
                .with_object(
                    GroupResource::core("pods"),
                    Some("default"),
                    "web-0",
                    labels(&[("app", "web")]),
                )
                .with_object(
                    GroupResource::core("pods"),
                    Some("default"),
                    "web-1",
                    labels(&[("app", "web")]),
                )
                .with_object(
                    GroupResource::core("pods"),
                    Some("default"),
                    "db-0",
                    labels(&[("app", "db")]),
                ),
        )
    }

    // ========================================================================
    // Discovery
    // ========================================================================

    #[tokio::test]
    async fn test_refresh_runs_one_query_per_group() {
        let store = Arc::new(fake_store());
        let provider = provider(Arc::clone(&store), None);

        let stats = provider.refresh().await;

        // Three rules, two distinct seriesQuery strings
        assert_eq!(store.series_calls.load(Ordering::SeqCst), 2);
        assert_eq!(stats.series_seen, 4);
        assert_eq!(stats.series_matched, 4);
        assert_eq!(stats.conflicts, 0);
    }

    #[tokio::test]
    async fn test_refresh_builds_catalog() {
        let provider = provider(Arc::new(fake_store()), None);
        provider.refresh().await;

        let names: Vec<String> = provider
            .list_available_metrics()
            .into_iter()
            .map(|m| format!("{}/{}", m.resource, m.metric))
            .collect();

        assert!(names.contains(&"pods/container_cpu_usage_seconds".to_string()));
        assert!(names.contains(&"pods/fs_reads".to_string()));
        assert!(names.contains(&"pods/http_requests".to_string()));
        assert!(names.contains(&"instances/http_requests".to_string()));
        assert_eq!(names.len(), 7);
        assert_eq!(provider.metrics().catalog_metrics.get(), 7.0);
    }

    #[tokio::test]
    async fn test_failed_group_does_not_affect_others() {
        let mut store = fake_store();
        store.failing.insert(HTTP_QUERY.to_string());
        let provider = provider(Arc::new(store), None);

        let stats = provider.refresh().await;

        assert_eq!(stats.failed_groups, 1);
        let catalog = provider.catalog();
        assert!(catalog
            .get(&GroupResource::core("pods"), "container_cpu_usage_seconds")
            .is_some());
        assert!(catalog.get(&GroupResource::core("pods"), "http_requests").is_none());
        assert_eq!(provider.metrics().group_failures(HTTP_QUERY), 1);
    }

    #[tokio::test]
    async fn test_lister_drops_unknown_resources() {
        let provider = provider(Arc::new(fake_store()), Some(pods_lister()));
        provider.refresh().await;

        let catalog = provider.catalog();
        assert!(catalog.get(&GroupResource::core("instances"), "http_requests").is_none());
        assert!(catalog.get(&GroupResource::core("pods"), "http_requests").is_some());
        assert!(catalog.get(&GroupResource::core("namespaces"), "http_requests").is_some());
    }

    // ========================================================================
    // Metric values
    // ========================================================================

    #[tokio::test]
    async fn test_get_metric_value() {
        let store = Arc::new(fake_store());
        let provider = provider(Arc::clone(&store), None);
        provider.refresh().await;

        let value = provider
            .get_metric_value(
                &GroupResource::core("pods"),
                Some("default"),
                "web-1",
                "container_cpu_usage_seconds",
            )
            .await
            .unwrap();

        assert_eq!(value.value, 0.5);
        assert_eq!(value.described_object.name, "web-1");
        assert_eq!(
            store.queries.lock().unwrap().as_slice(),
            &[r#"sum(rate(container_cpu_usage_seconds_total{namespace="default",pod="web-1"}[2m])) by (pod)"#
                .to_string()]
        );
    }

    #[tokio::test]
    async fn test_get_metric_value_unknown_metric() {
        let provider = provider(Arc::new(fake_store()), None);
        provider.refresh().await;

        let err = provider
            .get_metric_value(&GroupResource::core("pods"), Some("default"), "web-0", "missing")
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::MetricNotFound { .. }));
        assert_eq!(provider.metrics().metric_request_errors_total.get(), 1);
    }

    #[tokio::test]
    async fn test_get_metric_value_no_data() {
        let provider = provider(Arc::new(fake_store()), None);
        provider.refresh().await;

        let err = provider
            .get_metric_value(
                &GroupResource::core("pods"),
                Some("default"),
                "web-9",
                "container_cpu_usage_seconds",
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::NoData { .. }));
    }

    #[tokio::test]
    async fn test_get_metric_value_checks_existence() {
        let provider = provider(Arc::new(fake_store()), Some(pods_lister()));
        provider.refresh().await;

        let err = provider
            .get_metric_value(
                &GroupResource::core("pods"),
                Some("default"),
                "ghost",
                "container_cpu_usage_seconds",
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::ResourceNotFound { .. }));
    }

    #[tokio::test]
    async fn test_get_metrics_by_selector() {
        let store = Arc::new(fake_store());
        let provider = provider(Arc::clone(&store), Some(pods_lister()));
        provider.refresh().await;

        let values = provider
            .get_metrics_by_selector(
                &GroupResource::core("pods"),
                Some("default"),
                "app=web",
                "container_cpu_usage_seconds",
            )
            .await
            .unwrap();

        let names: Vec<&str> = values
            .iter()
            .map(|v| v.described_object.name.as_str())
            .collect();
        assert_eq!(names, vec!["web-0", "web-1"]);
        // One query covers every selected object
        assert_eq!(store.queries.lock().unwrap().len(), 1);
        assert!(store.queries.lock().unwrap()[0].contains("pod=~"));
    }

    #[tokio::test]
    async fn test_get_metrics_by_selector_requires_lister() {
        let provider = provider(Arc::new(fake_store()), None);
        provider.refresh().await;

        let err = provider
            .get_metrics_by_selector(
                &GroupResource::core("pods"),
                Some("default"),
                "app=web",
                "container_cpu_usage_seconds",
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::SelectorUnsupported));
    }

    // ========================================================================
    // Reload
    // ========================================================================

    #[tokio::test]
    async fn test_reload_rejects_invalid_rules() {
        let provider = provider(Arc::new(fake_store()), None);
        provider.refresh().await;
        let before = provider.engine();

        let mut invalid = rules();
        invalid[0].series_filters[0].is = Some("(".to_string());
        invalid[0].series_filters[0].is_not = None;

        assert!(provider.reload(&invalid).await.is_err());
        assert!(Arc::ptr_eq(&before, &provider.engine()));
        assert_eq!(provider.catalog().len(), 7);
        assert_eq!(provider.metrics().reload_failure_total.get(), 1);
    }

    #[tokio::test]
    async fn test_reload_swaps_engine_and_catalog() {
        let provider = provider(Arc::new(fake_store()), None);
        provider.refresh().await;

        let only_http = vec![rules().remove(2)];
        let stats = provider.reload(&only_http).await.unwrap();

        assert_eq!(provider.engine().len(), 1);
        assert_eq!(stats.series_matched, 1);
        assert!(provider
            .catalog()
            .get(&GroupResource::core("pods"), "container_cpu_usage_seconds")
            .is_none());
        assert_eq!(provider.metrics().reload_success_total.get(), 1);
    }

    #[tokio::test]
    async fn test_overlapping_reloads_keep_the_later_rules() {
        let mut store = fake_store();
        store
            .delays
            .insert(CONTAINER_QUERY.to_string(), Duration::from_millis(50));
        let provider = provider(Arc::new(store), None);

        let containers: Vec<_> = rules().into_iter().take(2).collect();
        let only_http = vec![rules().remove(2)];

        // The container reload is still discovering when the second one starts
        let (first, second) = tokio::join!(provider.reload(&containers), provider.reload(&only_http));
        assert!(first.is_ok());
        assert!(second.is_ok());

        assert_eq!(provider.engine().len(), 1);
        let catalog = provider.catalog();
        assert!(catalog.get(&GroupResource::core("pods"), "http_requests").is_some());
        assert!(catalog
            .get(&GroupResource::core("pods"), "container_cpu_usage_seconds")
            .is_none());
        assert_eq!(provider.metrics().reload_success_total.get(), 2);
    }

    #[tokio::test]
    async fn test_reload_from_reports_load_failure() {
        let provider = provider(Arc::new(fake_store()), None);
        provider.refresh().await;
        let before = provider.engine();

        let err = provider
            .reload_from(|| {
                Err::<Vec<DiscoveryRuleConfig>, _>(RuleError::InvalidSelector {
                    selector: "{".to_string(),
                    reason: "unterminated matcher list".to_string(),
                })
            })
            .await
            .unwrap_err();

        assert!(matches!(err, RuleError::InvalidSelector { .. }));
        assert!(Arc::ptr_eq(&before, &provider.engine()));
        assert_eq!(provider.metrics().reload_failure_total.get(), 1);
    }

    #[tokio::test]
    async fn test_reload_drops_failures_of_removed_queries() {
        let mut store = fake_store();
        store.failing.insert(HTTP_QUERY.to_string());
        let provider = provider(Arc::new(store), None);
        provider.refresh().await;
        assert_eq!(provider.metrics().group_failures(HTTP_QUERY), 1);

        // Still configured: the count survives and grows
        provider.reload(&rules()).await.unwrap();
        assert_eq!(provider.metrics().group_failures(HTTP_QUERY), 2);

        let containers: Vec<_> = rules().into_iter().take(2).collect();
        provider.reload(&containers).await.unwrap();
        assert_eq!(provider.metrics().group_failures(HTTP_QUERY), 0);
        assert!(!provider.metrics().render().contains("http_requests_total"));
    }

    // ========================================================================
    // Template resources
    // ========================================================================

    #[tokio::test]
    async fn test_template_resources_served_under_plural_names() {
        const TEMPLATE_QUERY: &str = r#"http_requests_total{namespace!="",pod!=""}"#;
        let config = Config::from_yaml(
            r#"
rules:
  - seriesQuery: 'http_requests_total{namespace!="",pod!=""}'
    resources:
      template: ${Resource}
    naming:
      constantName: http_requests
    metricsQuery: sum(${Series}{${LabelMatchers}}) by (${GroupBy})
"#,
        )
        .unwrap();

        let mut store = fake_store();
        store.series.insert(
            TEMPLATE_QUERY.to_string(),
            vec![Series::new(
                "http_requests_total",
                labels(&[("namespace", "default"), ("pod", "web-0")]),
            )],
        );
        let store = Arc::new(store);
        let provider = MetricsProvider::new(
            config.compile_rules().unwrap(),
            Arc::clone(&store) as Arc<dyn SeriesStore>,
            Some(pods_lister()),
            Arc::new(AdapterMetrics::new()),
        );
        provider.refresh().await;

        let catalog = provider.catalog();
        assert!(catalog.get(&GroupResource::core("pods"), "http_requests").is_some());
        assert!(catalog.get(&GroupResource::core("namespaces"), "http_requests").is_some());
        assert!(catalog.get(&GroupResource::core("pod"), "http_requests").is_none());

        let value = provider
            .get_metric_value(
                &GroupResource::core("pods"),
                Some("default"),
                "web-0",
                "http_requests",
            )
            .await
            .unwrap();
        assert_eq!(value.value, 0.25);
        assert_eq!(
            store.queries.lock().unwrap().as_slice(),
            &[r#"sum(http_requests_total{namespace="default",pod="web-0"}) by (pod)"#.to_string()]
        );
    }

    #[tokio::test]
    async fn test_several_matching_samples_use_the_first() {
        let mut store = fake_store();
        store.samples = vec![
            Sample {
                labels: labels(&[("pod", "web-0"), ("container", "app")]),
                value: 0.25,
                timestamp: 1700000000.0,
            },
            Sample {
                labels: labels(&[("pod", "web-0"), ("container", "sidecar")]),
                value: 0.75,
                timestamp: 1700000000.0,
            },
        ];
        let provider = provider(Arc::new(store), None);
        provider.refresh().await;

        let value = provider
            .get_metric_value(
                &GroupResource::core("pods"),
                Some("default"),
                "web-0",
                "container_cpu_usage_seconds",
            )
            .await
            .unwrap();
        assert_eq!(value.value, 0.25);
    }
}
