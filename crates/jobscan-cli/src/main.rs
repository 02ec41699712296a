use std::path::Path;
use std::str::FromStr;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use jobscan_adapters::adapter_for_site;
use jobscan_core::ValidationPolicy;
use jobscan_storage::chrome::{ChromeOptions, ChromeSession};
use jobscan_storage::export_json;
use jobscan_sync::{assemble_export, ScanConfig, ScanOutcome, ScanPipeline};
use tracing::{info, warn};

mod logging;

#[derive(Debug, Parser)]
#[command(name = "jobscan")]
#[command(about = "Log in to a job marketplace and export the job feed and freelancer profile")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Scan upwork.com.
    Upwork {
        /// Export format.
        #[arg(long, default_value = "json")]
        export: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExportFormat {
    Json,
}

impl FromStr for ExportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            other => Err(format!("unrecognized export format `{other}`")),
        }
    }
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = ScanConfig::from_env();

    match cli.command {
        Commands::Upwork { export } => scan_site("upwork", &export, config),
    }
}

fn scan_site(site: &str, export: &str, config: ScanConfig) -> Result<()> {
    let _log_guard = logging::init_logging(&config.log_dir, site)?;
    config.report_ignored();
    info!(
        site,
        extraction_policy = ?config.extraction_policy,
        validation_policy = ?config.validation_policy,
        headless = config.headless,
        "starting scan"
    );

    let adapter = adapter_for_site(site).with_context(|| format!("no adapter registered for {site}"))?;
    let credentials = config.load_credentials()?;
    let session = ChromeSession::launch(&ChromeOptions {
        headless: config.headless,
        ..ChromeOptions::default()
    })
    .context("launching chrome")?;

    let export_dir = config.export_dir.clone();
    let validation_policy = config.validation_policy;
    let mut pipeline = ScanPipeline::new(config, adapter, session);
    let outcome = pipeline.run(&credentials)?;

    match ExportFormat::from_str(export) {
        Ok(ExportFormat::Json) => export_outcome(site, outcome, validation_policy, &export_dir),
        Err(reason) => {
            warn!(site, export_format = export, "{reason}, nothing exported");
            Ok(())
        }
    }
}

fn export_outcome(
    site: &str,
    outcome: ScanOutcome,
    policy: ValidationPolicy,
    export_dir: &Path,
) -> Result<()> {
    if outcome.is_empty() {
        warn!(site, "nothing scraped, no export written");
        return Ok(());
    }

    let assembled = assemble_export(outcome, policy).context("validating scraped records")?;
    for dropped in &assembled.dropped {
        warn!(site, record = %dropped.record, reason = %dropped.reason, "record left out of export");
    }
    let path = export_json(export_dir, site, &assembled.export)?;
    info!(
        site,
        path = %path.display(),
        jobs = assembled.export.jobs.len(),
        profile = assembled.export.profile.is_some(),
        "export written"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn export_defaults_to_json() {
        let cli = Cli::try_parse_from(["jobscan", "upwork"]).expect("parse");
        let Commands::Upwork { export } = cli.command;
        assert_eq!(export.parse::<ExportFormat>(), Ok(ExportFormat::Json));
    }

    #[test]
    fn unknown_export_format_is_reported() {
        let cli = Cli::try_parse_from(["jobscan", "upwork", "--export", "csv"]).expect("parse");
        let Commands::Upwork { export } = cli.command;
        assert!(export.parse::<ExportFormat>().is_err());
    }

    #[test]
    fn empty_outcome_writes_nothing() {
        let dir = tempfile::tempdir().expect("tempdir");
        export_outcome(
            "upwork",
            ScanOutcome::default(),
            ValidationPolicy::WholeBatch,
            dir.path(),
        )
        .expect("no-op export");
        assert!(!dir.path().join("upwork.json").exists());
    }
}
