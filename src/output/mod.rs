//! Output formatting module
//!
//! Renders run history for the command line.

mod formatter;

pub use formatter::{OutputFormat, ResultFormatter};
