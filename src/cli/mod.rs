//! CLI argument parsing
//!
//! Defines command-line interface using clap.

use clap::{Parser, Subcommand};

/// Inspect cached test runs and manage runner configuration
#[derive(Parser, Debug)]
#[command(name = "suite-runner")]
#[command(version)]
#[command(about = "Inspect cached test runs and manage runner configuration")]
#[command(long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Browse the run history cache
    History(HistoryArgs),

    /// Manage configuration
    Config(ConfigArgs),
}

/// Arguments for history command
#[derive(Parser, Debug)]
pub struct HistoryArgs {
    #[command(subcommand)]
    pub action: HistoryAction,
}

#[derive(Subcommand, Debug)]
pub enum HistoryAction {
    /// Show the trend of recent runs
    Show {
        /// History directory (defaults to the configured one)
        #[arg(short, long)]
        dir: Option<String>,

        /// Output format (table, json, json-pretty, csv, summary)
        #[arg(short, long, default_value = "table")]
        format: String,
    },

    /// Render a cached run as a report
    Report {
        /// Run id, as listed by `history show`
        id: String,

        /// History directory (defaults to the configured one)
        #[arg(short, long)]
        dir: Option<String>,

        /// Report format (text, markdown)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Export the records of a cached run
    Export {
        /// Run id, as listed by `history show`
        id: String,

        /// Destination file; `.csv` selects CSV, anything else JSON
        path: String,

        /// History directory (defaults to the configured one)
        #[arg(short, long)]
        dir: Option<String>,
    },
}

/// Arguments for config command
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: ConfigAction,
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Write an example configuration file
    Init {
        /// Output file path
        #[arg(default_value = "./suite-runner.yaml")]
        output: String,

        /// Overwrite existing file
        #[arg(short, long)]
        force: bool,
    },

    /// Show the effective configuration
    Show {
        /// Configuration file (defaults to the first standard location)
        file: Option<String>,

        /// Output format (yaml, json)
        #[arg(short, long, default_value = "yaml")]
        format: String,
    },

    /// Validate a configuration file
    Validate {
        /// Configuration file to validate
        file: Option<String>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_history_show() {
        let args = Args::parse_from(["suite-runner", "history", "show", "--format", "csv"]);
        match args.command {
            Command::History(HistoryArgs {
                action: HistoryAction::Show { dir, format },
            }) => {
                assert!(dir.is_none());
                assert_eq!(format, "csv");
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_parse_export_with_global_verbose() {
        let args = Args::parse_from([
            "suite-runner",
            "history",
            "export",
            "run_1",
            "out.csv",
            "--dir",
            "/tmp/h",
            "-v",
        ]);
        assert!(args.verbose);
        match args.command {
            Command::History(HistoryArgs {
                action: HistoryAction::Export { id, path, dir },
            }) => {
                assert_eq!(id, "run_1");
                assert_eq!(path, "out.csv");
                assert_eq!(dir.as_deref(), Some("/tmp/h"));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_config_init_default_path() {
        let args = Args::parse_from(["suite-runner", "config", "init"]);
        match args.command {
            Command::Config(ConfigArgs {
                action: ConfigAction::Init { output, force },
            }) => {
                assert_eq!(output, "./suite-runner.yaml");
                assert!(!force);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
