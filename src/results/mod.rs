//! Result aggregation, history and reporting
//!
//! Collects outcomes into records, persists run history and hands summaries
//! to report renderers.

mod aggregator;
mod history;
mod images;
mod report;

pub use aggregator::ResultAggregator;
pub use history::{ExportFormat, HistoryCache, HistoryEntry, TrendPoint, DEFAULT_HISTORY_LIMIT};
pub use images::{DirImageStore, Image, ImageStore, NullImageStore, IMAGE_DIR};
pub use report::{
    PlainReportRenderer, ReportContext, ReportFormat, ReportOutcome, ReportRenderer, ReportRunner,
};
