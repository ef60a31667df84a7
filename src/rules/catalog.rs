//! Catalog of discoverable metrics
//!
//! The catalog is the result of running every rule against the live series:
//! for each `(group-resource, metric name)` pair it records which rule and
//! which store series produced it.

use std::collections::BTreeMap;

use serde::Serialize;

use super::resource::GroupResource;

/// Origin of a catalog entry
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct SeriesSource {
    /// Index of the rule that matched
    pub rule: usize,
    /// Store metric name of the matched series
    pub series: String,
}

/// One discoverable metric on one resource kind
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogEntry {
    pub resource: GroupResource,
    pub metric: String,
    pub namespaced: bool,
    /// Sorted by rule index, so the first source belongs to the earliest rule
    pub sources: Vec<SeriesSource>,
    /// Number of distinct series behind the entry
    pub series_count: usize,
}

/// Public view of a catalog entry
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricInfo {
    pub resource: GroupResource,
    pub metric: String,
    pub namespaced: bool,
}

/// Materialized `(group-resource, metric)` pairs
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    entries: BTreeMap<(GroupResource, String), CatalogEntry>,
}

impl Catalog {
    /// Create an empty catalog
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one matched series under a resource and metric name
    pub fn insert(
        &mut self,
        resource: GroupResource,
        metric: String,
        namespaced: bool,
        source: SeriesSource,
    ) {
        let entry = self
            .entries
            .entry((resource.clone(), metric.clone()))
            .or_insert_with(|| CatalogEntry {
                resource,
                metric,
                namespaced: false,
                sources: Vec::new(),
                series_count: 0,
            });

        entry.namespaced |= namespaced;
        entry.series_count += 1;
        if let Err(pos) = entry.sources.binary_search(&source) {
            entry.sources.insert(pos, source);
        }
    }

    /// Look up an entry
    pub fn get(&self, resource: &GroupResource, metric: &str) -> Option<&CatalogEntry> {
        self.entries.get(&(resource.clone(), metric.to_string()))
    }

    /// Drop entries whose resource fails the predicate
    pub fn retain_resources<F>(&mut self, mut keep: F)
    where
        F: FnMut(&GroupResource) -> bool,
    {
        self.entries.retain(|(resource, _), _| keep(resource));
    }

    /// All available metrics, sorted by resource then name
    pub fn list(&self) -> Vec<MetricInfo> {
        self.entries
            .values()
            .map(|e| MetricInfo {
                resource: e.resource.clone(),
                metric: e.metric.clone(),
                namespaced: e.namespaced,
            })
            .collect()
    }

    /// Iterate over entries
    pub fn entries(&self) -> impl Iterator<Item = &CatalogEntry> {
        self.entries.values()
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the catalog is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
