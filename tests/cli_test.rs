//! CLI integration tests
//!
//! Tests for the command-line interface using assert_cmd.
//!
//! These tests verify:
//! - Help and version flags
//! - Rule validation
//! - Dry run mode
//! - Error handling for broken configuration files

use assert_cmd::Command;
use predicates::prelude::*;
use std::io::Write;
use tempfile::NamedTempFile;

/// Get a command for the rprom-adapter binary
#[allow(deprecated)]
fn cmd() -> Command {
    Command::cargo_bin("rprom-adapter").expect("Failed to find rprom-adapter binary")
}

/// Helper to create a temporary config file with given content
fn create_temp_config(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("Failed to create temp file");
    file.write_all(content.as_bytes())
        .expect("Failed to write config");
    file.flush().expect("Failed to flush");
    file
}

const VALID_CONFIG: &str = r#"
prometheus:
  url: "http://localhost:9090"
  timeout_ms: 5000

server:
  port: 6443

rules:
  - seriesQuery: '{__name__=~"container_.*_total",namespace!="",pod!=""}'
    seriesFilters:
      - isNot: ^container_.*_seconds_total$
    resources:
      overrides:
        namespace: {resource: namespaces}
        pod: {resource: pods}
    naming:
      suffix: _total
    metricsQuery: sum(rate(${Series}{${LabelMatchers}}[2m])) by (${GroupBy})
  - seriesQuery: 'http_requests_total{namespace!=""}'
    resources:
      template: ${Resource}
    naming:
      constantName: http_requests
"#;

// ============================================================================
// Help and version
// ============================================================================

#[test]
fn test_help_flag() {
    cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Usage:").or(predicate::str::contains("usage:")))
        .stdout(predicate::str::contains("--config"))
        .stdout(predicate::str::contains("--prometheus-url"));
}

#[test]
fn test_help_short_flag() {
    cmd()
        .arg("-h")
        .assert()
        .success()
        .stdout(predicate::str::contains("rprom-adapter"));
}

#[test]
fn test_version_flag() {
    cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

// ============================================================================
// Validation
// ============================================================================

#[test]
fn test_validate_valid_config() {
    let file = create_temp_config(VALID_CONFIG);

    cmd()
        .arg("--config")
        .arg(file.path())
        .arg("--validate")
        .assert()
        .success()
        .stdout(predicate::str::contains("Configuration is valid (2 rules)"));
}

#[test]
fn test_validate_json_output() {
    let file = create_temp_config(VALID_CONFIG);

    cmd()
        .arg("--config")
        .arg(file.path())
        .args(["--validate", "--output-format", "json", "--log-level", "error"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"valid\": true"))
        .stdout(predicate::str::contains("\"rules\": 2"));
}

#[test]
fn test_validate_invalid_filter_regex() {
    let config = r#"
rules:
  - seriesQuery: 'http_requests_total'
    seriesFilters:
      - is: "([unclosed"
"#;
    let file = create_temp_config(config);

    cmd()
        .arg("--config")
        .arg(file.path())
        .arg("--validate")
        .assert()
        .failure()
        .stdout(predicate::str::contains("Configuration is invalid"));
}

#[test]
fn test_validate_constant_name_needs_pinned_series() {
    let config = r#"
rules:
  - seriesQuery: '{__name__=~"http_.*"}'
    naming:
      constantName: requests
"#;
    let file = create_temp_config(config);

    cmd()
        .arg("--config")
        .arg(file.path())
        .arg("--validate")
        .assert()
        .failure();
}

#[test]
fn test_validate_conflicting_rules() {
    let config = r#"
rules:
  - seriesQuery: 'http_requests_total{namespace!=""}'
  - seriesQuery: 'http_requests_total{namespace!="",pod!=""}'
"#;
    let file = create_temp_config(config);

    cmd()
        .arg("--config")
        .arg(file.path())
        .arg("--validate")
        .assert()
        .failure()
        .stdout(predicate::str::contains("Configuration is invalid"));
}

#[test]
fn test_validate_invalid_config_bad_yaml() {
    let file = create_temp_config("rules: [not: valid: yaml");

    cmd()
        .arg("--config")
        .arg(file.path())
        .arg("--validate")
        .assert()
        .failure();
}

#[test]
fn test_invalid_port_zero() {
    let file = create_temp_config("server:\n  port: 0\n");

    cmd()
        .arg("--config")
        .arg(file.path())
        .arg("--validate")
        .assert()
        .failure();
}

#[test]
fn test_missing_config_file_uses_defaults() {
    cmd()
        .args(["--config", "/nonexistent/rprom-adapter.yaml", "--validate"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Configuration is valid (0 rules)"));
}

// ============================================================================
// Dry run
// ============================================================================

#[test]
fn test_dry_run_text() {
    let file = create_temp_config(VALID_CONFIG);

    cmd()
        .arg("--config")
        .arg(file.path())
        .arg("--dry-run")
        .assert()
        .success()
        .stdout(predicate::str::contains("2 rule(s) in 2 query group(s)"))
        .stdout(predicate::str::contains("constant http_requests"));
}

#[test]
fn test_dry_run_json() {
    let file = create_temp_config(VALID_CONFIG);

    cmd()
        .arg("--config")
        .arg(file.path())
        .args(["--dry-run", "--output-format", "json", "--log-level", "error"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"series_query\""))
        .stdout(predicate::str::contains("http_requests_total{namespace!=\\\"\\\"}"));
}

#[test]
fn test_dry_run_rejects_bad_rules() {
    let config = r#"
rules:
  - seriesQuery: 'http_requests_total'
    seriesFilters:
      - is: "("
"#;
    let file = create_temp_config(config);

    cmd()
        .arg("--config")
        .arg(file.path())
        .arg("--dry-run")
        .assert()
        .failure();
}

#[test]
fn test_env_prometheus_url_override() {
    let file = create_temp_config(VALID_CONFIG);

    cmd()
        .env("RPROM_PROMETHEUS_URL", "http://prometheus.monitoring:9090")
        .arg("--config")
        .arg(file.path())
        .arg("--validate")
        .assert()
        .success();
}
