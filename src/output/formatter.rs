//! Output formatters for run history
//!
//! Provides table, JSON, CSV and one-line summary formats.

use crate::models::RunSummary;
use crate::results::TrendPoint;

/// Output format options
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    Table,
    Json,
    JsonPretty,
    Csv,
    Summary,
}

impl OutputFormat {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "table" => Some(OutputFormat::Table),
            "json" => Some(OutputFormat::Json),
            "json-pretty" | "jsonpretty" => Some(OutputFormat::JsonPretty),
            "csv" => Some(OutputFormat::Csv),
            "summary" => Some(OutputFormat::Summary),
            _ => None,
        }
    }
}

/// History formatter
pub struct ResultFormatter {
    format: OutputFormat,
    colorize: bool,
}

impl ResultFormatter {
    pub fn new(format: OutputFormat) -> Self {
        Self {
            format,
            colorize: true,
        }
    }

    pub fn no_color(mut self) -> Self {
        self.colorize = false;
        self
    }

    /// Format the trend of recent runs, oldest first
    pub fn format_trend(&self, points: &[TrendPoint]) -> String {
        match self.format {
            OutputFormat::Table => self.format_trend_table(points),
            OutputFormat::Json => serde_json::to_string(points).unwrap_or_default(),
            OutputFormat::JsonPretty => serde_json::to_string_pretty(points).unwrap_or_default(),
            OutputFormat::Csv => self.format_trend_csv(points),
            OutputFormat::Summary => points
                .iter()
                .map(|p| self.format_point_brief(p))
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }

    fn rate(&self, rate: f64) -> String {
        let text = format!("{rate:5.1}%");
        if !self.colorize {
            return text;
        }
        if rate >= 90.0 {
            format!("\x1b[32m{text}\x1b[0m")
        } else if rate >= 50.0 {
            format!("\x1b[33m{text}\x1b[0m")
        } else {
            format!("\x1b[31m{text}\x1b[0m")
        }
    }

    fn format_trend_table(&self, points: &[TrendPoint]) -> String {
        let mut output = String::new();

        output.push_str(
            "\n┌──────────────────────────────────┬───────┬───────┬───────┬───────┬──────────┬────────────┐\n",
        );
        output.push_str(
            "│ Run                              │ Total │ Pass  │ Fail  │ Error │ Rate     │ Duration   │\n",
        );
        output.push_str(
            "├──────────────────────────────────┼───────┼───────┼───────┼───────┼──────────┼────────────┤\n",
        );

        for point in points {
            output.push_str(&format!(
                "│ {:32} │ {:5} │ {:5} │ {:5} │ {:5} │ {:>8} │ {:>9.3}s │\n",
                point.id,
                point.total,
                point.passed,
                point.failed,
                point.errored,
                self.rate(point.pass_rate),
                point.duration_secs
            ));
        }

        output.push_str(
            "└──────────────────────────────────┴───────┴───────┴───────┴───────┴──────────┴────────────┘\n",
        );

        if points.is_empty() {
            output.push_str(" No runs recorded yet\n");
        }
        output
    }

    fn format_trend_csv(&self, points: &[TrendPoint]) -> String {
        let mut output = String::new();
        output.push_str("id,started_at,total,passed,failed,errored,skipped,pass_rate,duration_secs\n");
        for p in points {
            output.push_str(&format!(
                "{},{},{},{},{},{},{},{:.1},{:.3}\n",
                p.id,
                p.started_at.to_rfc3339(),
                p.total,
                p.passed,
                p.failed,
                p.errored,
                p.skipped,
                p.pass_rate,
                p.duration_secs
            ));
        }
        output
    }

    fn format_point_brief(&self, point: &TrendPoint) -> String {
        format!(
            "{}: {}/{} passed ({:.1}%) in {:.3}s",
            point.id, point.passed, point.total, point.pass_rate, point.duration_secs
        )
    }

    /// Format one run summary
    pub fn format_summary(&self, summary: &RunSummary) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string(summary).unwrap_or_default(),
            OutputFormat::JsonPretty => serde_json::to_string_pretty(summary).unwrap_or_default(),
            OutputFormat::Summary => format!(
                "{}/{} passed ({:.1}%) in {:.3}s",
                summary.counts.passed,
                summary.counts.total,
                summary.pass_rate(),
                summary.duration_secs
            ),
            OutputFormat::Table | OutputFormat::Csv => summary.to_string(),
        }
    }
}

impl Default for ResultFormatter {
    fn default() -> Self {
        Self::new(OutputFormat::Table)
    }
}
