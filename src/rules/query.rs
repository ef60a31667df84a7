//! Metrics query templating
//!
//! `metricsQuery` turns a raw series into the query that is actually run for
//! a request, for example converting a counter to a rate:
//!
//! ```text
//! sum(rate(${Series}{${LabelMatchers}}[5m])) by (${GroupBy})
//! ```

use super::selector::LabelMatcher;
use super::template::{self, Piece};
use crate::error::RuleResult;

const SERIES: &str = "Series";
const LABEL_MATCHERS: &str = "LabelMatchers";
const GROUP_BY: &str = "GroupBy";

/// Compiled `metricsQuery` of a rule
#[derive(Debug, Clone)]
pub struct QueryTemplate {
    series_query: String,
    raw: Option<String>,
    pieces: Vec<Piece>,
}

impl QueryTemplate {
    /// Compile a metrics query template.
    ///
    /// Without a template, rendering yields `series_query` unchanged.
    pub fn compile(series_query: &str, metrics_query: Option<&str>) -> RuleResult<Self> {
        let raw = metrics_query
            .map(str::trim)
            .filter(|q| !q.is_empty())
            .map(str::to_string);
        let pieces = match &raw {
            Some(q) => template::parse(q, &[SERIES, LABEL_MATCHERS, GROUP_BY])?,
            None => Vec::new(),
        };

        Ok(Self {
            series_query: series_query.to_string(),
            raw,
            pieces,
        })
    }

    /// Render the query for a series, label matchers and group-by labels
    pub fn render(&self, series: &str, matchers: &[LabelMatcher], group_by: &[String]) -> String {
        if self.raw.is_none() {
            return self.series_query.clone();
        }

        let mut out = String::new();
        for piece in &self.pieces {
            match piece {
                Piece::Literal(text) => out.push_str(text),
                Piece::Placeholder(SERIES) => out.push_str(series),
                Piece::Placeholder(LABEL_MATCHERS) => out.push_str(
                    &matchers
                        .iter()
                        .map(ToString::to_string)
                        .collect::<Vec<_>>()
                        .join(","),
                ),
                Piece::Placeholder(_) => out.push_str(&group_by.join(",")),
            }
        }
        out
    }

    /// True when a template is configured
    pub fn is_templated(&self) -> bool {
        self.raw.is_some()
    }

    /// The template as configured
    pub fn as_str(&self) -> Option<&str> {
        self.raw.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_rate_query() {
        let template = QueryTemplate::compile(
            "container_cpu_usage_seconds_total",
            Some("sum(rate(${Series}{${LabelMatchers}}[5m])) by (${GroupBy})"),
        )
        .unwrap();

        let query = template.render(
            "container_cpu_usage_seconds_total",
            &[
                LabelMatcher::equal("namespace", "default"),
                LabelMatcher::any_of("pod", &["web0", "web1"]),
            ],
            &["pod".to_string()],
        );
        assert_eq!(
            query,
            r#"sum(rate(container_cpu_usage_seconds_total{namespace="default",pod=~"web0|web1"}[5m])) by (pod)"#
        );
    }

    #[test]
    fn test_empty_template_returns_series_query() {
        let template = QueryTemplate::compile(r#"up{job="api"}"#, None).unwrap();
        assert!(!template.is_templated());
        assert_eq!(
            template.render("up", &[LabelMatcher::equal("pod", "x")], &[]),
            r#"up{job="api"}"#
        );

        let blank = QueryTemplate::compile("up", Some("  ")).unwrap();
        assert!(!blank.is_templated());
    }

    #[test]
    fn test_malformed_template_rejected() {
        assert!(QueryTemplate::compile("up", Some("sum(${Series)")).is_err());
        assert!(QueryTemplate::compile("up", Some("sum(${Metric})")).is_err());
    }
}
