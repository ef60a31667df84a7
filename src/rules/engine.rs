//! Rule Engine - ordered set of compiled discovery rules
//!
//! The engine is compiled once from configuration and is read-only afterwards.
//! It groups rules by `seriesQuery` so that each distinct selector costs one
//! store query, builds the catalog from the series those queries return, and
//! resolves API requests back into store queries.
//!
//! Rules must be mutually exclusive. Provable overlaps are rejected at compile
//! time; anything else is caught during discovery, where the rule declared
//! first keeps the series. The same holds for metric names: one
//! `(resource, metric)` pair is served by exactly one rule and store family.

use std::collections::HashMap;

use super::catalog::{Catalog, SeriesSource};
use super::resource::GroupResource;
use super::rule::{DiscoveryRule, MatchResult, MetricRequest, RuleSummary, StoreQuery};
use crate::config::DiscoveryRuleConfig;
use crate::error::{MappingError, RuleError, RuleResult};
use crate::store::{Labels, Series};

/// Rules sharing one `seriesQuery`, served by a single store query
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryGroup {
    /// The shared selector string
    pub series_query: String,
    /// Indices of the rules in the group, in declaration order
    pub rules: Vec<usize>,
}

/// Counters describing one discovery pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiscoveryStats {
    /// Series returned by the store, summed over groups
    pub series_seen: usize,
    /// Series accepted by exactly one rule
    pub series_matched: usize,
    /// Series skipped because of mapping errors
    pub series_skipped: usize,
    /// Series claimed by more than one rule
    pub conflicts: usize,
    /// Query groups whose store query failed
    pub failed_groups: usize,
}

/// Compiled rule set
#[derive(Debug, Clone, Default)]
pub struct RuleEngine {
    rules: Vec<DiscoveryRule>,
    groups: Vec<QueryGroup>,
}

impl RuleEngine {
    /// Create an engine without rules
    pub fn empty() -> Self {
        Self::default()
    }

    /// Compile every rule; the first failure aborts the whole set.
    ///
    /// # Errors
    ///
    /// `RuleError::RuleCompileFailed` wrapping the rule's own error, or
    /// `RuleError::Conflict` for a provable overlap between two rules.
    pub fn compile(configs: &[DiscoveryRuleConfig]) -> RuleResult<Self> {
        let rules = configs
            .iter()
            .enumerate()
            .map(|(index, config)| {
                DiscoveryRule::compile(index, config).map_err(|e| RuleError::RuleCompileFailed {
                    index,
                    source: Box::new(e),
                })
            })
            .collect::<RuleResult<Vec<_>>>()?;

        check_conflicts(&rules)?;

        let mut groups: Vec<QueryGroup> = Vec::new();
        for rule in &rules {
            match groups
                .iter_mut()
                .find(|g| g.series_query == rule.series_query())
            {
                Some(group) => group.rules.push(rule.index()),
                None => groups.push(QueryGroup {
                    series_query: rule.series_query().to_string(),
                    rules: vec![rule.index()],
                }),
            }
        }

        tracing::debug!(
            rules = rules.len(),
            groups = groups.len(),
            "Compiled discovery rules"
        );

        Ok(Self { rules, groups })
    }

    /// Compiled rules in declaration order
    pub fn rules(&self) -> &[DiscoveryRule] {
        &self.rules
    }

    /// Get a rule by index
    pub fn get(&self, index: usize) -> Option<&DiscoveryRule> {
        self.rules.get(index)
    }

    /// Query groups in order of first appearance
    pub fn groups(&self) -> &[QueryGroup] {
        &self.groups
    }

    /// Get the number of rules
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Check if the engine has no rules
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// First rule (by declaration order) that matches a series
    pub fn match_series(&self, name: &str, labels: &Labels) -> Option<(usize, MatchResult)> {
        for rule in &self.rules {
            match rule.matches(name, labels) {
                Ok(Some(result)) => return Some((rule.index(), result)),
                Ok(None) => {}
                Err(e) => {
                    tracing::debug!(rule = rule.index(), series = %name, error = %e, "Series skipped");
                }
            }
        }
        None
    }

    /// Build the catalog from the series each group's query returned.
    ///
    /// `discovered[i]` holds the result for `groups()[i]`; `None` marks a
    /// group whose query failed, whose rules then contribute nothing.
    pub fn build_catalog(&self, discovered: &[Option<Vec<Series>>]) -> (Catalog, DiscoveryStats) {
        let mut catalog = Catalog::new();
        let mut stats = DiscoveryStats::default();

        let mut group_of = vec![None; self.rules.len()];
        for (group_index, group) in self.groups.iter().enumerate() {
            match discovered.get(group_index) {
                Some(Some(series)) => {
                    stats.series_seen += series.len();
                    for rule in &group.rules {
                        group_of[*rule] = Some(series.as_slice());
                    }
                }
                _ => stats.failed_groups += 1,
            }
        }

        let mut claimed: HashMap<&Series, usize> = HashMap::new();
        // (resource, metric) -> (rule, store series name) that first produced it
        let mut pairs: HashMap<(GroupResource, String), (usize, String)> = HashMap::new();

        for rule in &self.rules {
            let Some(series_list) = group_of[rule.index()] else {
                continue;
            };

            for series in series_list {
                let result = match rule.matches(&series.name, &series.labels) {
                    Ok(Some(result)) => result,
                    Ok(None) => continue,
                    Err(e) => {
                        stats.series_skipped += 1;
                        tracing::debug!(
                            rule = rule.index(),
                            series = %series.name,
                            error = %e,
                            "Skipping series"
                        );
                        continue;
                    }
                };

                if let Some(first) = claimed.get(series) {
                    stats.conflicts += 1;
                    tracing::warn!(
                        series = %series.name,
                        winner = *first,
                        loser = rule.index(),
                        "Series matched by more than one rule; keeping the earlier rule"
                    );
                    continue;
                }
                claimed.insert(series, rule.index());
                stats.series_matched += 1;

                for resource in result.resources {
                    let key = (resource, result.metric_name.clone());
                    match pairs.get(&key) {
                        Some((owner, family)) if *owner != rule.index() || *family != series.name => {
                            stats.conflicts += 1;
                            tracing::warn!(
                                resource = %key.0,
                                metric = %key.1,
                                winner = *owner,
                                winner_series = %family,
                                loser = rule.index(),
                                loser_series = %series.name,
                                "Metric name produced by more than one series family; keeping the earlier one"
                            );
                            continue;
                        }
                        Some(_) => {}
                        None => {
                            pairs.insert(key.clone(), (rule.index(), series.name.clone()));
                        }
                    }

                    let (resource, _) = key;
                    catalog.insert(
                        resource,
                        result.metric_name.clone(),
                        result.namespaced,
                        SeriesSource {
                            rule: rule.index(),
                            series: series.name.clone(),
                        },
                    );
                }
            }
        }

        (catalog, stats)
    }

    /// Resolve a request into a store query using the catalog.
    ///
    /// Sources are tried in rule order. A rule that cannot map the requested
    /// resource is skipped and the next source is considered.
    ///
    /// Returns `Ok(None)` when nothing in the catalog serves the request.
    pub fn resolve_request(
        &self,
        request: &MetricRequest,
        catalog: &Catalog,
    ) -> Result<Option<StoreQuery>, MappingError> {
        let Some(entry) = catalog.get(&request.resource, &request.metric_name) else {
            return Ok(None);
        };

        let mut last_error = None;
        for source in &entry.sources {
            let Some(rule) = self.get(source.rule) else {
                continue;
            };
            match rule.resolve_request(request, Some(&source.series)) {
                Ok(Some(query)) => return Ok(Some(query)),
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(
                        rule = rule.index(),
                        resource = %request.resource,
                        metric = %request.metric_name,
                        error = %e,
                        "Rule excluded from request resolution"
                    );
                    last_error = Some(e);
                }
            }
        }

        match last_error {
            Some(e) => Err(e),
            None => Ok(None),
        }
    }

    /// Describe every compiled rule
    pub fn summaries(&self) -> Vec<RuleSummary> {
        self.rules.iter().map(DiscoveryRule::summary).collect()
    }
}

/// Reject rule pairs where one rule provably accepts every series the other does
fn check_conflicts(rules: &[DiscoveryRule]) -> RuleResult<()> {
    for (i, first) in rules.iter().enumerate() {
        for second in &rules[i + 1..] {
            if first.selector().is_disjoint(second.selector()) {
                continue;
            }

            let covers = |a: &DiscoveryRule, b: &DiscoveryRule| {
                a.selector().subsumes(b.selector()) && a.filters().is_subset_of(b.filters())
            };

            if covers(first, second) || covers(second, first) {
                return Err(RuleError::Conflict {
                    first: first.index(),
                    second: second.index(),
                    reason: format!(
                        "selectors '{}' and '{}' overlap and no filter separates them",
                        first.series_query(),
                        second.series_query()
                    ),
                });
            }
        }
    }
    Ok(())
}
