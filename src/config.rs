//! Configuration management for rProm-Adapter
//!
//! Handles loading and validating configuration from YAML files.
//!
//! # Example
//!
//! ```yaml
//! prometheus:
//!   url: http://prometheus.monitoring.svc:9090
//! rules:
//!   - seriesQuery: 'container_cpu_usage_seconds_total{namespace!="",pod!=""}'
//!     resources:
//!       template: ${Resource}
//!       overrides:
//!         pod: {resource: pods}
//!         namespace: {resource: namespaces}
//!     naming:
//!       suffix: _total
//!     metricsQuery: sum(rate(${Series}{${LabelMatchers}}[5m])) by (${GroupBy})
//! ```

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use thiserror::Error;

use crate::error::RuleError;
use crate::rules::{GroupResource, RuleEngine};

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Error reading the configuration file
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    /// Error parsing the configuration file
    #[error("Failed to parse config file: {0}")]
    ParseError(#[from] serde_yaml::Error),

    /// Configuration validation error
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Prometheus endpoint configuration
    #[serde(default)]
    pub prometheus: PrometheusConfig,

    /// HTTP server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Periodic discovery configuration
    #[serde(default)]
    pub discovery: DiscoveryConfig,

    /// Discovery rules, applied independently and expected to be mutually exclusive
    #[serde(default)]
    pub rules: Vec<DiscoveryRuleConfig>,

    /// Statically declared objects; when present, requests are checked against them
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub objects: Vec<ObjectConfig>,
}

/// Prometheus endpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrometheusConfig {
    /// Prometheus base URL
    #[serde(default = "default_prometheus_url")]
    pub url: String,

    /// Optional username for basic auth
    pub username: Option<String>,

    /// Optional password for basic auth
    pub password: Option<String>,

    /// Request timeout in milliseconds
    #[serde(default = "default_timeout")]
    pub timeout_ms: u64,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Server bind address
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
}

/// Periodic discovery configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// Seconds between catalog refreshes
    #[serde(default = "default_interval")]
    pub interval_secs: u64,
}

/// One discovery rule as written in the configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryRuleConfig {
    /// Series selector choosing which series this rule considers
    pub series_query: String,

    /// Extra name filters applied to series returned by the selector
    #[serde(default, alias = "seriesFilter", skip_serializing_if = "Vec::is_empty")]
    pub series_filters: Vec<RegexFilter>,

    /// How series labels map to Kubernetes resources
    #[serde(default)]
    pub resources: ResourceMapping,

    /// How store metric names map to API metric names
    #[serde(default)]
    pub naming: NameMapping,

    /// Template for the query run on requests
    #[serde(default, alias = "metricsQueries", skip_serializing_if = "Option::is_none")]
    pub metrics_query: Option<String>,
}

/// A filter that matches positively or negatively against a regex.
/// Only one field may be set at a time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegexFilter {
    /// Names must match this pattern
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is: Option<String>,

    /// Names must not match this pattern
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_not: Option<String>,
}

/// Mapping between Kubernetes resources and series labels
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceMapping {
    /// Label template using `${Group}` and `${Resource}`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,

    /// Label name to group-resource exceptions to the template
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub overrides: HashMap<String, GroupResource>,
}

/// Conversion between store metric names and API metric names
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NameMapping {
    /// Prefix removed from store names
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,

    /// Suffix removed from store names
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suffix: Option<String>,

    /// Fixed API name; only valid when the selector pins one metric family
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub constant_name: Option<String>,
}

/// A statically declared Kubernetes object
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ObjectConfig {
    /// Resource in `resource` or `resource.group` form
    pub resource: String,

    /// Namespace, absent for cluster-scoped objects
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    /// Object name
    pub name: String,

    /// Object labels, matched by label selectors
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

// Default value functions
fn default_prometheus_url() -> String {
    "http://localhost:9090".to_string()
}

fn default_timeout() -> u64 {
    10000
}

fn default_port() -> u16 {
    6443
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_interval() -> u64 {
    60
}

impl Default for PrometheusConfig {
    fn default() -> Self {
        Self {
            url: default_prometheus_url(),
            username: None,
            password: None,
            timeout_ms: default_timeout(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind_address: default_bind_address(),
        }
    }
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval(),
        }
    }
}

impl Config {
    /// Load configuration from a YAML file
    ///
    /// # Arguments
    /// * `path` - Path to the configuration file
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, parsed or validated
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml(&contents)
    }

    /// Parse and validate configuration from a YAML string
    pub fn from_yaml(contents: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_yaml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file, falling back to defaults if not found
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        if !path.exists() {
            tracing::warn!(
                path = %path.display(),
                "Config file not found, using defaults"
            );
            return Ok(Self::default());
        }

        Self::load(path)
    }

    /// Compile the rules into an engine; fails on the first invalid rule
    pub fn compile_rules(&self) -> Result<RuleEngine, RuleError> {
        RuleEngine::compile(&self.rules)
    }

    /// Validate the configuration
    fn validate(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::ValidationError(
                "Server port must be greater than 0".to_string(),
            ));
        }

        if self.discovery.interval_secs == 0 {
            return Err(ConfigError::ValidationError(
                "Discovery interval must be greater than 0".to_string(),
            ));
        }

        url::Url::parse(&self.prometheus.url).map_err(|e| {
            ConfigError::ValidationError(format!(
                "Invalid Prometheus URL '{}': {}",
                self.prometheus.url, e
            ))
        })?;

        for (index, rule) in self.rules.iter().enumerate() {
            if rule.series_query.trim().is_empty() {
                return Err(ConfigError::ValidationError(format!(
                    "Rule {} has an empty seriesQuery",
                    index
                )));
            }
        }

        for object in &self.objects {
            if object.resource.is_empty() || object.name.is_empty() {
                return Err(ConfigError::ValidationError(
                    "Objects need both a resource and a name".to_string(),
                ));
            }
        }

        Ok(())
    }
}
