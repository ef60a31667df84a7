//! Discovery rule engine
//!
//! This module compiles the configured discovery rules and translates between
//! store series and custom metrics API identities, in both directions.
//!
//! # Example
//!
//! ```ignore
//! use rprom_adapter::config::Config;
//! use rprom_adapter::rules::{GroupResource, MetricRequest, RuleEngine};
//!
//! let config = Config::load("config.yaml")?;
//! let engine = RuleEngine::compile(&config.rules)?;
//! let (catalog, stats) = engine.build_catalog(&discovered);
//!
//! let request = MetricRequest::new(GroupResource::core("pods"), "cpu_usage", Some("default"), "web-0");
//! let query = engine.resolve_request(&request, &catalog)?;
//! ```

pub mod catalog;
pub mod engine;
pub mod filter;
pub mod naming;
pub mod query;
pub mod resource;
pub mod rule;
pub mod selector;
mod template;

pub use catalog::{Catalog, CatalogEntry, MetricInfo, SeriesSource};
pub use engine::{DiscoveryStats, QueryGroup, RuleEngine};
pub use filter::RegexFilterSet;
pub use naming::NameMapper;
pub use query::QueryTemplate;
pub use resource::{GroupResource, ResourceTemplate};
pub use rule::{DiscoveryRule, MatchResult, MetricRequest, RuleSummary, StoreQuery};
pub use selector::{LabelMatcher, MatchOp, Selector};
