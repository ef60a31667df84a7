//! CLI argument parsing for rProm-Adapter
//!
//! This module provides the command-line interface using clap derive macros.
//!
//! # Options
//!
//! - `--config` / `-c`: Configuration file path (default: config.yaml, env: RPROM_CONFIG)
//! - `--port` / `-p`: Server port (overrides config file, env: RPROM_PORT)
//! - `--bind-address`: Server bind address (env: RPROM_BIND_ADDRESS)
//! - `--prometheus-url`: Prometheus base URL (env: RPROM_PROMETHEUS_URL)
//! - `--prometheus-timeout`: HTTP timeout in milliseconds (env: RPROM_PROMETHEUS_TIMEOUT)
//! - `--username`: Prometheus basic auth username (env: RPROM_USERNAME)
//! - `--password`: Prometheus basic auth password (env: RPROM_PASSWORD)
//! - `--discovery-interval`: Seconds between discovery passes (env: RPROM_DISCOVERY_INTERVAL)
//! - `--validate`: Validate configuration and compile rules without starting server
//! - `--dry-run`: Compile rules and show their summaries
//! - `--log-level` / `-l`: Log level (trace/debug/info/warn/error, env: RPROM_LOG_LEVEL)
//! - `--log-format`: Log output format (text/json, env: RPROM_LOG_FORMAT)
//! - `--output-format`: Output format for validate/dry-run (text/json/yaml)
//!
//! # Precedence
//!
//! Configuration values are resolved in the following order (highest to lowest priority):
//! 1. CLI arguments
//! 2. Environment variables
//! 3. Configuration file
//! 4. Default values

use clap::{Parser, ValueEnum};
use std::path::PathBuf;

use crate::config::Config;

/// rProm-Adapter - Rule-based Prometheus adapter for the Kubernetes custom metrics API
///
/// Discovers Prometheus series, maps them onto Kubernetes resources
/// through configurable rules, and serves them as custom metrics.
///
/// Environment variables can be used for all configuration options.
/// CLI arguments take precedence over environment variables,
/// which take precedence over config file values.
#[derive(Parser, Debug)]
#[command(name = "rprom-adapter")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to configuration file
    #[arg(
        short,
        long,
        value_name = "FILE",
        default_value = "config.yaml",
        env = "RPROM_CONFIG"
    )]
    pub config: PathBuf,

    /// Server port (overrides config file)
    #[arg(short, long, value_name = "PORT", env = "RPROM_PORT")]
    pub port: Option<u16>,

    /// Server bind address (overrides config file)
    /// Supported values: IP addresses (0.0.0.0, 127.0.0.1, ::1) or "localhost"
    #[arg(long, value_name = "ADDRESS", env = "RPROM_BIND_ADDRESS")]
    pub bind_address: Option<String>,

    /// Prometheus base URL (overrides config file)
    #[arg(long, value_name = "URL", env = "RPROM_PROMETHEUS_URL")]
    pub prometheus_url: Option<String>,

    /// Prometheus HTTP timeout in milliseconds (overrides config file)
    #[arg(long, value_name = "MS", env = "RPROM_PROMETHEUS_TIMEOUT")]
    pub prometheus_timeout: Option<u64>,

    /// Prometheus basic auth username (overrides config file)
    #[arg(long, value_name = "USERNAME", env = "RPROM_USERNAME")]
    pub username: Option<String>,

    /// Prometheus basic auth password (overrides config file)
    #[arg(long, value_name = "PASSWORD", env = "RPROM_PASSWORD")]
    pub password: Option<String>,

    /// Seconds between discovery passes (overrides config file)
    #[arg(long, value_name = "SECONDS", env = "RPROM_DISCOVERY_INTERVAL")]
    pub discovery_interval: Option<u64>,

    /// Validate configuration and compile rules without starting server
    #[arg(long)]
    pub validate: bool,

    /// Compile rules and show their summaries
    #[arg(long)]
    pub dry_run: bool,

    /// Log level
    #[arg(
        short,
        long,
        value_enum,
        default_value = "info",
        env = "RPROM_LOG_LEVEL"
    )]
    pub log_level: LogLevel,

    /// Log output format
    #[arg(long, value_enum, default_value = "text", env = "RPROM_LOG_FORMAT")]
    pub log_format: LogFormat,

    /// Output format for --validate and --dry-run
    #[arg(long, value_enum, default_value = "text")]
    pub output_format: OutputFormat,
}

impl Cli {
    /// Apply command-line overrides on top of a loaded configuration
    pub fn apply_overrides(&self, config: &mut Config) {
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(bind_address) = &self.bind_address {
            config.server.bind_address = bind_address.clone();
        }
        if let Some(url) = &self.prometheus_url {
            config.prometheus.url = url.clone();
        }
        if let Some(timeout) = self.prometheus_timeout {
            config.prometheus.timeout_ms = timeout;
        }
        if let Some(username) = &self.username {
            config.prometheus.username = Some(username.clone());
        }
        if let Some(password) = &self.password {
            config.prometheus.password = Some(password.clone());
        }
        if let Some(interval) = self.discovery_interval {
            config.discovery.interval_secs = interval;
        }
    }
}

/// Log level options
#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    /// Trace level - most verbose
    Trace,
    /// Debug level
    Debug,
    /// Info level - default
    Info,
    /// Warn level
    Warn,
    /// Error level - least verbose
    Error,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogLevel::Trace => write!(f, "trace"),
            LogLevel::Debug => write!(f, "debug"),
            LogLevel::Info => write!(f, "info"),
            LogLevel::Warn => write!(f, "warn"),
            LogLevel::Error => write!(f, "error"),
        }
    }
}

impl From<LogLevel> for tracing::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => tracing::Level::TRACE,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Error => tracing::Level::ERROR,
        }
    }
}

/// Log output formats
#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Human-readable lines
    Text,
    /// One JSON object per event
    Json,
}

/// Output format options for validate and dry-run modes
#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output
    Text,
    /// JSON output
    Json,
    /// YAML output
    Yaml,
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Text => write!(f, "text"),
            OutputFormat::Json => write!(f, "json"),
            OutputFormat::Yaml => write!(f, "yaml"),
        }
    }
}
