//! HTTP request handlers
//!
//! Contains handlers for all HTTP endpoints, and the wire types of the custom
//! metrics API.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{Html, IntoResponse},
    Json,
};
use chrono::{DateTime, SecondsFormat};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use super::{AppState, API_PREFIX};
use crate::config::Config;
use crate::error::{AppError, AppResult, ProviderError};
use crate::provider::MetricValue;
use crate::rules::{DiscoveryStats, GroupResource};

const GROUP_VERSION: &str = "custom.metrics.k8s.io/v1beta1";

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    /// Health status
    status: String,
    /// Application version
    version: String,
    /// Compiled rules
    rules: usize,
    /// Available (resource, metric) pairs
    metrics: usize,
}

/// Reload response
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReloadResponse {
    rules: usize,
    metrics: usize,
    series_matched: usize,
    failed_groups: usize,
}

/// `APIResourceList` for API discovery
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiResourceList {
    pub kind: String,
    pub api_version: String,
    pub group_version: String,
    pub resources: Vec<ApiResource>,
}

/// One `resource/metric` entry in the discovery document
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiResource {
    pub name: String,
    pub singular_name: String,
    pub namespaced: bool,
    pub kind: String,
    pub verbs: Vec<String>,
}

/// `MetricValueList` returned by value lookups
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricValueList {
    pub kind: String,
    pub api_version: String,
    pub metadata: ListMetadata,
    pub items: Vec<MetricValueItem>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub self_link: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricValueItem {
    pub described_object: DescribedObject,
    pub metric_name: String,
    pub timestamp: String,
    pub value: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DescribedObject {
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    pub name: String,
    pub api_version: String,
}

/// Query parameters of list requests
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListParams {
    pub label_selector: Option<String>,
}

/// Root endpoint - displays basic info
pub async fn root() -> Html<String> {
    let html = format!(
        r#"<!DOCTYPE html>
<html>
<head>
    <title>rProm-Adapter</title>
</head>
<body>
    <h1>rProm-Adapter</h1>
    <p>Version: {}</p>
    <ul>
        <li><a href="/health">Health Check</a></li>
        <li><a href="/metrics">Metrics</a></li>
        <li><a href="{}">Custom Metrics API</a></li>
    </ul>
</body>
</html>"#,
        env!("CARGO_PKG_VERSION"),
        API_PREFIX
    );
    Html(html)
}

/// Health check endpoint
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let snapshot = state.provider.snapshot();
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        rules: snapshot.engine.len(),
        metrics: snapshot.catalog.len(),
    })
}

/// Self metrics in Prometheus text format
pub async fn self_metrics(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        state.provider.metrics().render(),
    )
}

/// Re-read the configuration file and swap in its rules
#[instrument(skip(state), name = "reload_handler")]
pub async fn reload(State(state): State<AppState>) -> AppResult<Json<ReloadResponse>> {
    let path = state
        .config_path
        .as_ref()
        .ok_or_else(|| AppError::NotFound("No configuration file to reload".to_string()))?;

    let stats: DiscoveryStats = state
        .provider
        .reload_from(|| {
            Config::load(path.as_path())
                .map(|config| config.rules)
                .map_err(AppError::from)
        })
        .await?;
    let snapshot = state.provider.snapshot();

    info!(path = %path.display(), "Configuration reloaded");

    Ok(Json(ReloadResponse {
        rules: snapshot.engine.len(),
        metrics: snapshot.catalog.len(),
        series_matched: stats.series_matched,
        failed_groups: stats.failed_groups,
    }))
}

/// API discovery: one entry per available `resource/metric`
pub async fn api_resources(State(state): State<AppState>) -> Json<ApiResourceList> {
    let resources = state
        .provider
        .list_available_metrics()
        .into_iter()
        .map(|info| ApiResource {
            name: format!("{}/{}", info.resource, info.metric),
            singular_name: String::new(),
            namespaced: info.namespaced,
            kind: "MetricValueList".to_string(),
            verbs: vec!["get".to_string()],
        })
        .collect();

    Json(ApiResourceList {
        kind: "APIResourceList".to_string(),
        api_version: "v1".to_string(),
        group_version: GROUP_VERSION.to_string(),
        resources,
    })
}

/// Parsed metric value path
#[derive(Debug, PartialEq, Eq)]
struct MetricPath<'a> {
    namespace: Option<&'a str>,
    resource: GroupResource,
    name: &'a str,
    metric: &'a str,
}

/// Split `namespaces/{ns}/{resource}/{name}/{metric}` or `{resource}/{name}/{metric}`
fn parse_metric_path(path: &str) -> Option<MetricPath<'_>> {
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    match segments.as_slice() {
        ["namespaces", namespace, resource, name, metric] => Some(MetricPath {
            namespace: Some(*namespace),
            resource: GroupResource::parse(resource),
            name: *name,
            metric: *metric,
        }),
        [resource, name, metric] => Some(MetricPath {
            namespace: None,
            resource: GroupResource::parse(resource),
            name: *name,
            metric: *metric,
        }),
        _ => None,
    }
}

/// Metric values for one object, or for every object a label selector selects (`*`)
#[instrument(skip(state, params), name = "metric_values_handler")]
pub async fn metric_values(
    State(state): State<AppState>,
    Path(path): Path<String>,
    Query(params): Query<ListParams>,
) -> AppResult<Json<MetricValueList>> {
    let Some(request) = parse_metric_path(&path) else {
        return Err(AppError::NotFound(format!("Unsupported path '{}'", path)));
    };
    debug!(?request, "Metric value request");

    let values = if request.name == "*" {
        state
            .provider
            .get_metrics_by_selector(
                &request.resource,
                request.namespace,
                params.label_selector.as_deref().unwrap_or_default(),
                request.metric,
            )
            .await?
    } else {
        vec![
            state
                .provider
                .get_metric_value(
                    &request.resource,
                    request.namespace,
                    request.name,
                    request.metric,
                )
                .await?,
        ]
    };

    let items: Vec<MetricValueItem> = values.iter().filter_map(to_item).collect();
    if items.is_empty() && request.name != "*" {
        return Err(ProviderError::NoData {
            resource: request.resource,
            name: request.name.to_string(),
            metric: request.metric.to_string(),
        }
        .into());
    }

    Ok(Json(MetricValueList {
        kind: "MetricValueList".to_string(),
        api_version: GROUP_VERSION.to_string(),
        metadata: ListMetadata {
            self_link: Some(format!("{}/{}", API_PREFIX, path.trim_start_matches('/'))),
        },
        items,
    }))
}

fn to_item(value: &MetricValue) -> Option<MetricValueItem> {
    let object = &value.described_object;
    Some(MetricValueItem {
        described_object: DescribedObject {
            // Without a RESTMapper there is no Kind to look up; the plural
            // resource name ("pods") stands in for it.
            kind: object.resource.resource.clone(),
            namespace: object.namespace.clone(),
            name: object.name.clone(),
            api_version: if object.resource.group.is_empty() {
                "v1".to_string()
            } else {
                format!("{}/v1", object.resource.group)
            },
        },
        metric_name: value.metric.clone(),
        timestamp: format_timestamp(value.timestamp),
        value: format_quantity(value.value)?,
    })
}

/// RFC 3339 timestamp, second precision
fn format_timestamp(seconds: f64) -> String {
    DateTime::from_timestamp(seconds.trunc() as i64, 0)
        .map(|t| t.to_rfc3339_opts(SecondsFormat::Secs, true))
        .unwrap_or_default()
}

/// Kubernetes quantity in milli-units; `None` for NaN and infinities
fn format_quantity(value: f64) -> Option<String> {
    if !value.is_finite() {
        return None;
    }
    let milli = (value * 1000.0).round() as i64;
    if milli % 1000 == 0 {
        Some((milli / 1000).to_string())
    } else {
        Some(format!("{}m", milli))
    }
}
