//! rProm-Adapter - Rule-based Prometheus adapter
//!
//! This binary serves the Kubernetes custom metrics API from series
//! discovered in Prometheus.

use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use serde::Serialize;
use tracing::{error, info};

use rprom_adapter::{
    cli::{Cli, LogFormat, OutputFormat},
    config::Config,
    rules::RuleSummary,
    server,
};

/// Result of `--validate`
#[derive(Serialize)]
struct ValidationReport {
    valid: bool,
    rules: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    rprom_adapter::init_logging(
        &cli.log_level.to_string(),
        cli.log_format == LogFormat::Json,
    )?;

    let mut config = Config::load_or_default(&cli.config)?;
    cli.apply_overrides(&mut config);

    if cli.validate {
        return validate(&config, cli.output_format);
    }

    if cli.dry_run {
        return dry_run(&config, cli.output_format);
    }

    info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %cli.config.display(),
        rules = config.rules.len(),
        "Starting rProm-Adapter"
    );

    let config_path = cli.config.exists().then(|| cli.config.clone());
    server::run(config, config_path).await?;

    Ok(ExitCode::SUCCESS)
}

/// Compile every rule and report the outcome
fn validate(config: &Config, format: OutputFormat) -> Result<ExitCode> {
    let report = match config.compile_rules() {
        Ok(engine) => ValidationReport {
            valid: true,
            rules: engine.len(),
            error: None,
        },
        Err(e) => {
            error!(error = %e, "Rule validation failed");
            ValidationReport {
                valid: false,
                rules: config.rules.len(),
                error: Some(e.to_string()),
            }
        }
    };

    match format {
        OutputFormat::Text => match &report.error {
            None => println!("Configuration is valid ({} rules)", report.rules),
            Some(e) => println!("Configuration is invalid: {}", e),
        },
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        OutputFormat::Yaml => print!("{}", serde_yaml::to_string(&report)?),
    }

    Ok(if report.valid {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

/// Compile every rule and print what each one does
fn dry_run(config: &Config, format: OutputFormat) -> Result<ExitCode> {
    let engine = config.compile_rules()?;
    let summaries = engine.summaries();

    match format {
        OutputFormat::Text => {
            println!(
                "{} rule(s) in {} query group(s)",
                summaries.len(),
                engine.groups().len()
            );
            print_summaries(&summaries);
        }
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&summaries)?),
        OutputFormat::Yaml => print!("{}", serde_yaml::to_string(&summaries)?),
    }

    Ok(ExitCode::SUCCESS)
}

fn print_summaries(summaries: &[RuleSummary]) {
    for summary in summaries {
        println!();
        println!("Rule {}", summary.index);
        println!("  seriesQuery:   {}", summary.series_query);
        if summary.opaque_selector {
            println!("  (selector not parsed; matched by the store only)");
        }
        for filter in &summary.filters {
            println!("  filter:        {}", filter);
        }
        println!("  naming:        {}", summary.naming);
        if let Some(template) = &summary.resource_template {
            let note = if summary.invertible_template {
                ""
            } else {
                " (not invertible)"
            };
            println!("  template:      {}{}", template, note);
        }
        for entry in &summary.overrides {
            println!("  override:      {}", entry);
        }
        if let Some(query) = &summary.metrics_query {
            println!("  metricsQuery:  {}", query);
        }
    }
}
