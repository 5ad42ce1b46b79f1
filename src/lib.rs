//! Suite Runner - test suite execution engine
//!
//! Runs a discovered suite of test cases serially or on a bounded worker
//! pool, captures each test's output, classifies outcomes and keeps a
//! cache of recent runs for trend reporting.
//!
//! ## Pipeline
//!
//! - [`suite`] filters, groups and orders the discovered tree and reads the
//!   `tag:`, `level:` and `order:` markers from test documentation
//! - [`executor`] drives fixtures and test bodies with per-test and global
//!   timeouts, fail-fast and output capture
//! - [`results`] folds outcomes into one record per test, persists history
//!   and hands summaries to a report renderer
//!
//! Discovery and rich report templating live outside this crate.
//!
//! ## Usage
//!
//! ```bash
//! # Trend of the last cached runs
//! suite-runner history show --format table
//!
//! # Re-render a cached run
//! suite-runner history report run_20260101_120000_000000_0042 --format markdown
//!
//! # Write an example configuration
//! suite-runner config init
//! ```

pub mod config;
pub mod error;
pub mod executor;
pub mod models;
pub mod output;
pub mod results;
pub mod suite;
pub mod utils;
