//! Compiled discovery rules
//!
//! A [`DiscoveryRule`] combines a series selector, name filters, a name
//! mapper, a resource template and a query template. It answers two
//! questions:
//!
//! - forward: does this series belong to the rule, and under which API
//!   metric name and resources is it exposed ([`DiscoveryRule::matches`])
//! - inverse: which store query serves a request for an API metric on a
//!   resource ([`DiscoveryRule::resolve_request`])

use serde::Serialize;

use super::filter::RegexFilterSet;
use super::naming::NameMapper;
use super::query::QueryTemplate;
use super::resource::{GroupResource, ResourceTemplate};
use super::selector::{LabelMatcher, Selector};
use crate::config::DiscoveryRuleConfig;
use crate::error::{MappingError, RuleError, RuleResult};
use crate::store::Labels;

/// API identity produced by a matching series
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchResult {
    /// API-facing metric name
    pub metric_name: String,
    /// Resources the series describes, one per resolvable label
    pub resources: Vec<GroupResource>,
    /// Whether the series carries a namespace
    pub namespaced: bool,
}

/// An incoming request for a metric on one or more objects
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricRequest {
    /// Resource kind of the described objects
    pub resource: GroupResource,
    /// API-facing metric name
    pub metric_name: String,
    /// Namespace of the objects, if namespaced
    pub namespace: Option<String>,
    /// Object names
    pub names: Vec<String>,
}

impl MetricRequest {
    /// Request for a single object
    pub fn new(
        resource: GroupResource,
        metric_name: impl Into<String>,
        namespace: Option<&str>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            resource,
            metric_name: metric_name.into(),
            namespace: namespace.map(str::to_string),
            names: vec![name.into()],
        }
    }
}

/// A rendered store query and the labels needed to read its result
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreQuery {
    /// Index of the rule that produced the query
    pub rule: usize,
    /// Store series name the query reads
    pub series: String,
    /// Query string for the store
    pub query: String,
    /// Label holding the object name in the result
    pub resource_label: String,
    /// Label holding the namespace in the result, for namespaced requests
    pub namespace_label: Option<String>,
}

/// Serializable description of a compiled rule, used by `--dry-run`
#[derive(Debug, Clone, Serialize)]
pub struct RuleSummary {
    pub index: usize,
    pub series_query: String,
    pub opaque_selector: bool,
    pub filters: Vec<String>,
    pub naming: String,
    pub resource_template: Option<String>,
    pub invertible_template: bool,
    pub overrides: Vec<String>,
    pub metrics_query: Option<String>,
}

/// A compiled discovery rule; immutable after compilation
#[derive(Debug, Clone)]
pub struct DiscoveryRule {
    index: usize,
    selector: Selector,
    filters: RegexFilterSet,
    naming: NameMapper,
    resources: ResourceTemplate,
    query: QueryTemplate,
    namespace_label: Option<String>,
}

impl DiscoveryRule {
    /// Compile a rule from configuration.
    ///
    /// # Errors
    ///
    /// Any invariant violation of the selector, filters, naming, resources or
    /// query template.
    pub fn compile(index: usize, config: &DiscoveryRuleConfig) -> RuleResult<Self> {
        let selector = Selector::parse(&config.series_query)?;
        let naming = NameMapper::compile(&config.naming)?;

        if let Some(name) = naming.constant_name() {
            if selector.metric_name().is_none() {
                return Err(RuleError::AmbiguousConstantName {
                    name: name.to_string(),
                    selector: selector.as_str().to_string(),
                });
            }
        }

        let filters = RegexFilterSet::compile(&config.series_filters)?
            .with_affixes(naming.prefix(), naming.suffix())?;
        let resources = ResourceTemplate::compile(&config.resources)?;
        let query = QueryTemplate::compile(selector.as_str(), config.metrics_query.as_deref())?;
        let namespace_label = resources.namespace_label();

        Ok(Self {
            index,
            selector,
            filters,
            naming,
            resources,
            query,
            namespace_label,
        })
    }

    /// Selector and filters both accept the series
    pub fn accepts(&self, series_name: &str, labels: &Labels) -> bool {
        self.selector.matches(series_name, labels) && self.filters.matches(series_name)
    }

    /// Match a series and produce its API identity.
    ///
    /// Returns `Ok(None)` when the rule does not govern the series.
    ///
    /// # Errors
    ///
    /// `MappingError::NameMismatch` when the name passes the filters but cannot
    /// be mapped; the caller skips such series.
    pub fn matches(
        &self,
        series_name: &str,
        labels: &Labels,
    ) -> Result<Option<MatchResult>, MappingError> {
        if !self.accepts(series_name, labels) {
            return Ok(None);
        }

        let metric_name = self.naming.to_api_name(series_name)?;

        let mut resources: Vec<GroupResource> = Vec::new();
        for (label, value) in labels {
            if value.is_empty() {
                continue;
            }
            if let Some(resource) = self.resources.resource_for_label(label) {
                if !resources.contains(&resource) {
                    resources.push(resource);
                }
            }
        }

        let namespaced = self
            .namespace_label
            .as_ref()
            .and_then(|label| labels.get(label))
            .is_some_and(|ns| !ns.is_empty());

        Ok(Some(MatchResult {
            metric_name,
            resources,
            namespaced,
        }))
    }

    /// Store series name for an API metric name.
    ///
    /// `series_hint` is the series observed during discovery; it is required
    /// to reverse constant names unless the selector pins the family.
    pub fn store_name(
        &self,
        metric_name: &str,
        series_hint: Option<&str>,
    ) -> Result<String, MappingError> {
        if let Some(series) = series_hint {
            return Ok(series.to_string());
        }
        match self.naming.to_store_name(metric_name) {
            Err(MappingError::AmbiguousReverseMapping { name }) => self
                .selector
                .metric_name()
                .map(str::to_string)
                .ok_or(MappingError::AmbiguousReverseMapping { name }),
            other => other,
        }
    }

    /// Build the store query serving a request.
    ///
    /// Returns `Ok(None)` when this rule does not produce the requested metric.
    ///
    /// # Errors
    ///
    /// `MappingError::ReverseMappingUnsupported` when the requested resource
    /// has no label under this rule.
    pub fn resolve_request(
        &self,
        request: &MetricRequest,
        series_hint: Option<&str>,
    ) -> Result<Option<StoreQuery>, MappingError> {
        if let Some(constant) = self.naming.constant_name() {
            if constant != request.metric_name {
                return Ok(None);
            }
        }

        let series = self.store_name(&request.metric_name, series_hint)?;
        if series_hint.is_none() {
            if !self.filters.matches(&series) {
                return Ok(None);
            }
            if let Some(pinned) = self.selector.metric_name() {
                if pinned != series {
                    return Ok(None);
                }
            }
        }

        let resource_label = self.resources.label_for_resource(&request.resource)?;

        let mut matchers = Vec::with_capacity(2);
        let namespace_label = match (&request.namespace, &self.namespace_label) {
            (Some(namespace), Some(label)) => {
                matchers.push(LabelMatcher::equal(label.clone(), namespace.clone()));
                Some(label.clone())
            }
            _ => None,
        };
        if !request.names.is_empty() {
            matchers.push(LabelMatcher::any_of(resource_label.clone(), &request.names));
        }

        let query = self
            .query
            .render(&series, &matchers, std::slice::from_ref(&resource_label));

        Ok(Some(StoreQuery {
            rule: self.index,
            series,
            query,
            resource_label,
            namespace_label,
        }))
    }

    /// Position of the rule in the configuration
    pub fn index(&self) -> usize {
        self.index
    }

    /// The rule's series selector
    pub fn selector(&self) -> &Selector {
        &self.selector
    }

    /// The `seriesQuery` string sent to the store
    pub fn series_query(&self) -> &str {
        self.selector.as_str()
    }

    /// Name filters, implicit affix filters included
    pub fn filters(&self) -> &RegexFilterSet {
        &self.filters
    }

    /// Name mapper
    pub fn naming(&self) -> &NameMapper {
        &self.naming
    }

    /// Resource template
    pub fn resources(&self) -> &ResourceTemplate {
        &self.resources
    }

    /// Describe the compiled rule
    pub fn summary(&self) -> RuleSummary {
        let naming = match &self.naming {
            NameMapper::Constant { name } => format!("constant {}", name),
            NameMapper::Affix { prefix, suffix } => {
                format!("strip prefix '{}' suffix '{}'", prefix, suffix)
            }
        };
        let mut overrides: Vec<String> = self
            .resources
            .overrides()
            .iter()
            .map(|(label, resource)| format!("{} -> {}", label, resource))
            .collect();
        overrides.sort();

        RuleSummary {
            index: self.index,
            series_query: self.selector.as_str().to_string(),
            opaque_selector: self.selector.is_opaque(),
            filters: self.filters.describe(),
            naming,
            resource_template: self.resources.template().map(str::to_string),
            invertible_template: self.resources.is_invertible(),
            overrides,
            metrics_query: self.query.as_str().map(str::to_string),
        }
    }
}
