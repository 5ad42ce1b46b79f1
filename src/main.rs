//! Suite Runner - command line front end
//!
//! Browses the run history cache written by [`suite_runner::results::ReportRunner`]
//! and manages the runner configuration file. Discovery happens elsewhere, so
//! this binary never executes tests itself.
//!
//! ## Usage
//!
//! ```bash
//! # Trend of recent runs
//! suite-runner history show
//!
//! # Render one cached run as markdown
//! suite-runner history report <ID> --format markdown
//!
//! # Export one cached run's records
//! suite-runner history export <ID> records.csv
//!
//! # Configuration
//! suite-runner config init
//! suite-runner config validate ./suite-runner.yaml
//! ```

use anyhow::Result;
use clap::Parser;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

mod cli;

use cli::Args;
use suite_runner::config::{expand_path, find, AppConfig};
use suite_runner::output::{OutputFormat, ResultFormatter};
use suite_runner::results::{
    ExportFormat, HistoryCache, PlainReportRenderer, ReportContext, ReportFormat, ReportRenderer,
};
use suite_runner::utils::logger::{init_logger, LogLevel};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logger(if args.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    });

    match args.command {
        cli::Command::History(history_args) => {
            manage_history(history_args)?;
        }
        cli::Command::Config(config_args) => {
            manage_config(config_args)?;
        }
    }

    Ok(())
}

/// History cache for `dir`, or the configured one
fn open_history(dir: Option<String>) -> Result<(HistoryCache, AppConfig)> {
    let config = AppConfig::load_default()?;
    let dir = match dir {
        Some(dir) => expand_path(&dir),
        None => config.report.history_dir(),
    };
    debug!("Using history cache at {}", dir.display());
    let cache = HistoryCache::new(dir).with_limit(config.report.history_limit);
    Ok((cache, config))
}

fn manage_history(args: cli::HistoryArgs) -> Result<()> {
    match args.action {
        cli::HistoryAction::Show { dir, format } => {
            let (cache, _) = open_history(dir)?;
            let format = OutputFormat::from_str(&format)
                .ok_or_else(|| anyhow::anyhow!("Unknown output format: {format}"))?;

            let trend = cache.trend()?;
            if trend.is_empty() && format == OutputFormat::Table {
                println!("\n📭 No cached runs in {}", cache.dir().display());
                return Ok(());
            }

            let formatter = ResultFormatter::new(format);
            println!("{}", formatter.format_trend(&trend));
        }

        cli::HistoryAction::Report { id, dir, format } => {
            let (cache, config) = open_history(dir)?;
            let format = ReportFormat::from_str(&format)
                .ok_or_else(|| anyhow::anyhow!("Unknown report format: {format}"))?;

            let entry = cache.load(&id)?;
            let trend = cache.trend()?;
            let context = ReportContext::new(&config.report, entry.summary)
                .with_trend(trend)
                .with_extra("Run", entry.id);

            let report = PlainReportRenderer::new(format).render(&context)?;
            println!("{report}");
        }

        cli::HistoryAction::Export { id, path, dir } => {
            let (cache, _) = open_history(dir)?;
            let path = PathBuf::from(path);
            let format = ExportFormat::from_extension(&path).unwrap_or(ExportFormat::Json);

            let entry = cache.load(&id)?;
            cache.export(&entry, &path, format)?;
            info!("Exported {} records of {}", entry.summary.counts.total, entry.id);
            println!("✓ Exported {} to {}", entry.id, path.display());
        }
    }

    Ok(())
}

fn manage_config(args: cli::ConfigArgs) -> Result<()> {
    match args.action {
        cli::ConfigAction::Init { output, force } => {
            let path = Path::new(&output);
            if path.exists() && !force {
                anyhow::bail!(
                    "Configuration file already exists: {output}. Use --force to overwrite."
                );
            }

            AppConfig::example().save(path)?;
            println!("✓ Configuration file created: {output}");
            println!("\nEdit the file to customize your settings.");
        }

        cli::ConfigAction::Show { file, format } => {
            let config = match file {
                Some(file) => AppConfig::load(expand_path(&file))?,
                None => AppConfig::load_default()?,
            };
            let output = if format == "json" {
                serde_json::to_string_pretty(&config)?
            } else {
                serde_yaml::to_string(&config)?
            };
            println!("{output}");
        }

        cli::ConfigAction::Validate { file } => {
            let path = file
                .map(|f| expand_path(&f))
                .or_else(find)
                .unwrap_or_else(|| PathBuf::from("./suite-runner.yaml"));

            match AppConfig::load(&path) {
                Ok(_) => {
                    println!("✓ Configuration file is valid: {}", path.display());
                }
                Err(e) => {
                    println!("✗ Configuration file is invalid: {}", path.display());
                    println!("  Error: {e:#}");
                    return Err(e);
                }
            }
        }
    }

    Ok(())
}
