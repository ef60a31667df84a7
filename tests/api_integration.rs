//! HTTP API integration tests
//!
//! Drives the router in-process with `tower::ServiceExt::oneshot`, backed by
//! a wiremock Prometheus.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use rprom_adapter::config::Config;
use rprom_adapter::server::{self, AppState, API_PREFIX};
use serde_json::{json, Value};
use tempfile::NamedTempFile;
use tokio_test::assert_ok;
use tower::ServiceExt;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const CONFIG: &str = r#"
rules:
  - seriesQuery: 'container_cpu_usage_seconds_total{namespace!="",pod!=""}'
    resources:
      overrides:
        namespace: {resource: namespaces}
        pod: {resource: pods}
    naming:
      suffix: _seconds_total
    metricsQuery: sum(rate(${Series}{${LabelMatchers}}[2m])) by (${GroupBy})
objects:
  - resource: pods
    namespace: default
    name: web-0
    labels: {app: web}
  - resource: pods
    namespace: default
    name: web-1
    labels: {app: web}
  - resource: pods
    namespace: default
    name: db-0
    labels: {app: db}
"#;

async fn mock_prometheus() -> MockServer {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/v1/series"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "success",
            "data": [
                {"__name__": "container_cpu_usage_seconds_total", "namespace": "default", "pod": "web-0"},
                {"__name__": "container_cpu_usage_seconds_total", "namespace": "default", "pod": "web-1"},
                {"__name__": "container_cpu_usage_seconds_total", "namespace": "default", "pod": "db-0"}
            ]
        })))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/api/v1/query"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "success",
            "data": {
                "resultType": "vector",
                "result": [
                    {"metric": {"pod": "web-0"}, "value": [1700000000.0, "0.25"]},
                    {"metric": {"pod": "web-1"}, "value": [1700000000.0, "1.5"]}
                ]
            }
        })))
        .mount(&server)
        .await;

    server
}

async fn app(server: &MockServer, config_path: Option<PathBuf>) -> Router {
    let mut config = Config::from_yaml(CONFIG).unwrap();
    config.prometheus.url = server.uri();

    let provider = Arc::new(server::build_provider(&config).unwrap());
    let stats = provider.refresh().await;
    assert_eq!(stats.failed_groups, 0);

    server::router(AppState {
        provider,
        config_path: config_path.map(Arc::new),
    })
}

async fn send(app: Router, request: Request<Body>) -> (StatusCode, String) {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = assert_ok!(axum::body::to_bytes(response.into_body(), usize::MAX).await);
    (status, String::from_utf8(bytes.to_vec()).unwrap())
}

async fn get(app: Router, uri: &str) -> (StatusCode, String) {
    send(app, Request::get(uri).body(Body::empty()).unwrap()).await
}

// ============================================================================
// Health and self metrics
// ============================================================================

#[tokio::test]
async fn test_health() {
    let server = mock_prometheus().await;
    let (status, body) = get(app(&server, None).await, "/health").await;

    assert_eq!(status, StatusCode::OK);
    let body: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["rules"], 1);
    assert_eq!(body["metrics"], 2);
}

#[tokio::test]
async fn test_self_metrics() {
    let server = mock_prometheus().await;
    let app = app(&server, None).await;

    let uri = format!("{}/namespaces/default/pods/web-0/container_cpu_usage", API_PREFIX);
    let (status, _) = get(app.clone(), &uri).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = get(app, "/metrics").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("rprom_discovery_runs_total 1"));
    assert!(body.contains("rprom_metric_requests_total 1"));
    assert!(body.contains("rprom_catalog_metrics 2"));
}

// ============================================================================
// Discovery document
// ============================================================================

#[tokio::test]
async fn test_api_resource_list() {
    let server = mock_prometheus().await;
    let (status, body) = get(app(&server, None).await, API_PREFIX).await;

    assert_eq!(status, StatusCode::OK);
    let body: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(body["kind"], "APIResourceList");
    assert_eq!(body["groupVersion"], "custom.metrics.k8s.io/v1beta1");

    let resources = body["resources"].as_array().unwrap();
    let names: Vec<&str> = resources
        .iter()
        .map(|r| r["name"].as_str().unwrap())
        .collect();
    assert!(names.contains(&"pods/container_cpu_usage"));
    assert!(names.contains(&"namespaces/container_cpu_usage"));

    let pods = resources
        .iter()
        .find(|r| r["name"] == "pods/container_cpu_usage")
        .unwrap();
    assert_eq!(pods["namespaced"], true);
    assert_eq!(pods["verbs"], json!(["get"]));
}

// ============================================================================
// Metric values
// ============================================================================

#[tokio::test]
async fn test_single_metric_value() {
    let server = mock_prometheus().await;
    let uri = format!("{}/namespaces/default/pods/web-0/container_cpu_usage", API_PREFIX);
    let (status, body) = get(app(&server, None).await, &uri).await;

    assert_eq!(status, StatusCode::OK);
    let body: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(body["kind"], "MetricValueList");

    let items = body["items"].as_array().unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["metricName"], "container_cpu_usage");
    assert_eq!(items[0]["value"], "250m");
    assert_eq!(items[0]["timestamp"], "2023-11-14T22:13:20Z");
    assert_eq!(items[0]["describedObject"]["kind"], "pods");
    assert_eq!(items[0]["describedObject"]["name"], "web-0");
    assert_eq!(items[0]["describedObject"]["namespace"], "default");
    assert_eq!(items[0]["describedObject"]["apiVersion"], "v1");
}

#[tokio::test]
async fn test_metric_values_by_label_selector() {
    let server = mock_prometheus().await;
    let uri = format!(
        "{}/namespaces/default/pods/*/container_cpu_usage?labelSelector=app%3Dweb",
        API_PREFIX
    );
    let (status, body) = get(app(&server, None).await, &uri).await;

    assert_eq!(status, StatusCode::OK);
    let body: Value = serde_json::from_str(&body).unwrap();
    let items = body["items"].as_array().unwrap();
    assert_eq!(items.len(), 2);
    assert_eq!(items[0]["describedObject"]["name"], "web-0");
    assert_eq!(items[1]["describedObject"]["name"], "web-1");
    assert_eq!(items[1]["value"], "1500m");
}

#[tokio::test]
async fn test_selected_object_without_data_is_omitted() {
    let server = mock_prometheus().await;
    let uri = format!(
        "{}/namespaces/default/pods/*/container_cpu_usage?labelSelector=app%3Ddb",
        API_PREFIX
    );
    let (status, body) = get(app(&server, None).await, &uri).await;

    assert_eq!(status, StatusCode::OK);
    let body: Value = serde_json::from_str(&body).unwrap();
    assert!(body["items"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_unknown_metric_is_not_found() {
    let server = mock_prometheus().await;
    let uri = format!("{}/namespaces/default/pods/web-0/memory_usage", API_PREFIX);
    let (status, _) = get(app(&server, None).await, &uri).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_unknown_object_is_not_found() {
    let server = mock_prometheus().await;
    let uri = format!("{}/namespaces/default/pods/web-9/container_cpu_usage", API_PREFIX);
    let (status, _) = get(app(&server, None).await, &uri).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_object_without_data_is_not_found() {
    let server = mock_prometheus().await;
    let uri = format!("{}/namespaces/default/pods/db-0/container_cpu_usage", API_PREFIX);
    let (status, _) = get(app(&server, None).await, &uri).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_set_based_selector_rejected() {
    let server = mock_prometheus().await;
    let uri = format!(
        "{}/namespaces/default/pods/*/container_cpu_usage?labelSelector=app%20in%20(web)",
        API_PREFIX
    );
    let (status, _) = get(app(&server, None).await, &uri).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_unsupported_path() {
    let server = mock_prometheus().await;
    let uri = format!("{}/pods/web-0", API_PREFIX);
    let (status, _) = get(app(&server, None).await, &uri).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
}

// ============================================================================
// Reload
// ============================================================================

#[tokio::test]
async fn test_reload_without_config_file() {
    let server = mock_prometheus().await;
    let request = Request::post("/-/reload").body(Body::empty()).unwrap();
    let (status, _) = send(app(&server, None).await, request).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_reload_swaps_rules() {
    let server = mock_prometheus().await;

    let mut file = NamedTempFile::new().unwrap();
    file.write_all(CONFIG.as_bytes()).unwrap();
    file.flush().unwrap();
    let app = app(&server, Some(file.path().to_path_buf())).await;

    let renamed = CONFIG.replace("suffix: _seconds_total", "suffix: _total");
    std::fs::write(file.path(), renamed).unwrap();

    let request = Request::post("/-/reload").body(Body::empty()).unwrap();
    let (status, body) = send(app.clone(), request).await;
    assert_eq!(status, StatusCode::OK);
    let body: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(body["rules"], 1);
    assert_eq!(body["metrics"], 2);

    let uri = format!(
        "{}/namespaces/default/pods/web-0/container_cpu_usage_seconds",
        API_PREFIX
    );
    let (status, _) = get(app, &uri).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_reload_rejects_bad_rules() {
    let server = mock_prometheus().await;

    let mut file = NamedTempFile::new().unwrap();
    file.write_all(CONFIG.as_bytes()).unwrap();
    file.flush().unwrap();
    let app = app(&server, Some(file.path().to_path_buf())).await;

    std::fs::write(
        file.path(),
        "rules:\n  - seriesQuery: 'up'\n    seriesFilters:\n      - is: '('\n",
    )
    .unwrap();

    let request = Request::post("/-/reload").body(Body::empty()).unwrap();
    let (status, _) = send(app.clone(), request).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    // The previous rules keep serving
    let uri = format!("{}/namespaces/default/pods/web-0/container_cpu_usage", API_PREFIX);
    let (status, _) = get(app, &uri).await;
    assert_eq!(status, StatusCode::OK);
}
