//! Report generation
//!
//! The engine hands a [`ReportContext`] to a [`ReportRenderer`]; rich
//! templating lives outside this crate. [`PlainReportRenderer`] covers text
//! and markdown.

use anyhow::{Context, Result};
use chrono::{DateTime, Local, Utc};
use std::collections::BTreeMap;
use std::fmt::Write;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use super::history::{HistoryCache, HistoryEntry, TrendPoint};
use super::images::DirImageStore;
use crate::config::{AppConfig, ReportConfig};
use crate::executor::Runner;
use crate::models::{RunSummary, TestSuite};

/// Everything a renderer gets to see
#[derive(Clone, Debug)]
pub struct ReportContext {
    pub title: String,
    pub description: String,
    pub tester: String,
    pub summary: RunSummary,
    /// Recent runs, oldest first
    pub trend: Vec<TrendPoint>,
    pub extra: BTreeMap<String, String>,
}

impl ReportContext {
    pub fn new(config: &ReportConfig, summary: RunSummary) -> Self {
        Self {
            title: config.title.clone(),
            description: config.description.clone(),
            tester: config.tester.clone(),
            summary,
            trend: Vec::new(),
            extra: BTreeMap::new(),
        }
    }

    pub fn with_trend(mut self, trend: Vec<TrendPoint>) -> Self {
        self.trend = trend;
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }
}

/// Turns a report context into a document
pub trait ReportRenderer: Send + Sync {
    fn render(&self, context: &ReportContext) -> Result<String>;
}

/// Report format
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReportFormat {
    Text,
    Markdown,
}

impl ReportFormat {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "text" | "txt" => Some(ReportFormat::Text),
            "markdown" | "md" => Some(ReportFormat::Markdown),
            _ => None,
        }
    }
}

/// Built-in text and markdown renderer
#[derive(Clone, Copy, Debug)]
pub struct PlainReportRenderer {
    format: ReportFormat,
}

impl PlainReportRenderer {
    pub fn new(format: ReportFormat) -> Self {
        Self { format }
    }

    fn format_text(&self, ctx: &ReportContext) -> Result<String> {
        let mut output = String::new();
        let summary = &ctx.summary;

        writeln!(output, "\n{:=^70}", format!(" {} ", ctx.title))?;
        if !ctx.description.is_empty() {
            writeln!(output, "{}", ctx.description)?;
        }
        writeln!(output)?;
        if !ctx.tester.is_empty() {
            writeln!(output, "Tester: {}", ctx.tester)?;
        }
        writeln!(output, "Started: {}", format_datetime(&summary.started_at))?;
        writeln!(output, "Duration: {:.3}s", summary.duration_secs)?;
        writeln!(
            output,
            "Platform: {} ({})",
            summary.environment.platform, summary.environment.system
        )?;
        for (key, value) in &ctx.extra {
            writeln!(output, "{key}: {value}")?;
        }
        if summary.timed_out {
            writeln!(output, "Run hit the global timeout")?;
        }
        if summary.stopped_early {
            writeln!(output, "Run stopped early (fail-fast)")?;
        }
        writeln!(output)?;

        writeln!(output, "{:-^70}", " Summary ")?;
        let c = &summary.counts;
        writeln!(
            output,
            "Total: {} | Pass: {} | Fail: {} | Error: {} | Skip: {} | XFail: {} | XPass: {}",
            c.total, c.passed, c.failed, c.errored, c.skipped, c.xfailed, c.xpassed
        )?;
        writeln!(output, "Pass Rate: {:.1}%", c.pass_rate())?;

        writeln!(output, "\n{:-^70}", " Classes ")?;
        for class in &summary.classes {
            writeln!(
                output,
                "\n{} - {}/{} passed in {:.3}s",
                class.name, class.counts.passed, class.counts.total, class.duration_secs
            )?;
            for record in &class.records {
                writeln!(
                    output,
                    "  {:>3}. {:<40} {:<22} {:>8.3}s",
                    record.sn,
                    truncate(&record.name, 40),
                    record.status,
                    record.duration_secs
                )?;
                if !record.status.is_success() && !record.trace.is_empty() {
                    for line in record.trace.lines() {
                        writeln!(output, "       | {line}")?;
                    }
                }
            }
        }

        if !ctx.trend.is_empty() {
            writeln!(output, "\n{:-^70}", " Trend ")?;
            writeln!(
                output,
                "{:<32} {:>6} {:>6} {:>6} {:>8}",
                "Run", "Total", "Pass", "Fail", "Pass%"
            )?;
            for point in &ctx.trend {
                writeln!(
                    output,
                    "{:<32} {:>6} {:>6} {:>6} {:>7.1}%",
                    point.id,
                    point.total,
                    point.passed,
                    point.failed + point.errored,
                    point.pass_rate
                )?;
            }
        }

        writeln!(output, "\n{:=^70}", "")?;
        Ok(output)
    }

    fn format_markdown(&self, ctx: &ReportContext) -> Result<String> {
        let mut output = String::new();
        let summary = &ctx.summary;

        writeln!(output, "# {}\n", ctx.title)?;
        if !ctx.description.is_empty() {
            writeln!(output, "{}\n", ctx.description)?;
        }

        writeln!(output, "## Summary\n")?;
        writeln!(output, "| Property | Value |")?;
        writeln!(output, "|----------|-------|")?;
        if !ctx.tester.is_empty() {
            writeln!(output, "| Tester | {} |", ctx.tester)?;
        }
        writeln!(output, "| Started | {} |", format_datetime(&summary.started_at))?;
        writeln!(output, "| Duration | {:.3}s |", summary.duration_secs)?;
        writeln!(output, "| Platform | {} |", summary.environment.platform)?;
        let c = &summary.counts;
        writeln!(output, "| Total | {} |", c.total)?;
        writeln!(output, "| Passed | {} |", c.passed)?;
        writeln!(output, "| Failed | {} |", c.failed)?;
        writeln!(output, "| Errored | {} |", c.errored)?;
        writeln!(output, "| Skipped | {} |", c.skipped)?;
        writeln!(output, "| Expected failures | {} |", c.xfailed)?;
        writeln!(output, "| Unexpected passes | {} |", c.xpassed)?;
        writeln!(output, "| Pass Rate | {:.1}% |", c.pass_rate())?;
        for (key, value) in &ctx.extra {
            writeln!(output, "| {key} | {value} |")?;
        }

        writeln!(output, "\n## Results\n")?;
        for class in &summary.classes {
            writeln!(output, "### {}\n", class.name)?;
            writeln!(output, "| # | Test | Status | Duration | Tags |")?;
            writeln!(output, "|---|------|--------|----------|------|")?;
            for record in &class.records {
                writeln!(
                    output,
                    "| {} | `{}` | {} {} | {:.3}s | {} |",
                    record.sn,
                    record.name,
                    record.status.symbol(),
                    record.status,
                    record.duration_secs,
                    record.tags.join(", ")
                )?;
            }
            writeln!(output)?;
        }

        let failures: Vec<_> = summary
            .records()
            .filter(|r| r.status.is_failure() && !r.trace.is_empty())
            .collect();
        if !failures.is_empty() {
            writeln!(output, "## Failures\n")?;
            for record in failures {
                writeln!(output, "### {}\n", record.id)?;
                writeln!(output, "```\n{}\n```\n", record.trace)?;
            }
        }

        if !ctx.trend.is_empty() {
            writeln!(output, "## Trend\n")?;
            writeln!(output, "| Run | Total | Passed | Failed | Pass Rate |")?;
            writeln!(output, "|-----|-------|--------|--------|-----------|")?;
            for point in &ctx.trend {
                writeln!(
                    output,
                    "| `{}` | {} | {} | {} | {:.1}% |",
                    point.id,
                    point.total,
                    point.passed,
                    point.failed + point.errored,
                    point.pass_rate
                )?;
            }
        }

        Ok(output)
    }
}

impl ReportRenderer for PlainReportRenderer {
    fn render(&self, context: &ReportContext) -> Result<String> {
        match self.format {
            ReportFormat::Text => self.format_text(context),
            ReportFormat::Markdown => self.format_markdown(context),
        }
    }
}

/// What a reported run produced
#[derive(Clone, Debug)]
pub struct ReportOutcome {
    pub summary: RunSummary,
    pub report_path: PathBuf,
    pub history: HistoryEntry,
}

/// Runs a suite, caches it in the history and writes the rendered report
pub struct ReportRunner {
    runner: Runner,
    renderer: Arc<dyn ReportRenderer>,
    config: ReportConfig,
}

impl ReportRunner {
    /// Wire a runner that saves images under the report's output directory
    pub fn new(config: AppConfig) -> Self {
        let images = Arc::new(DirImageStore::new(config.report.output_dir.clone()));
        Self {
            runner: Runner::new(config.runner).with_image_store(images),
            renderer: Arc::new(PlainReportRenderer::new(ReportFormat::Text)),
            config: config.report,
        }
    }

    pub fn with_renderer(mut self, renderer: Arc<dyn ReportRenderer>) -> Self {
        self.renderer = renderer;
        self
    }

    pub fn runner(&self) -> &Runner {
        &self.runner
    }

    pub fn history(&self) -> HistoryCache {
        HistoryCache::new(self.config.history_dir()).with_limit(self.config.history_limit)
    }

    pub async fn run(&self, suite: &TestSuite) -> Result<ReportOutcome> {
        let summary = self.runner.run(suite).await?;

        // The trend shown in the report includes this run
        let history = self.history();
        let entry = history.append(&summary)?;
        let trend = history.trend()?;

        let context = ReportContext::new(&self.config, summary.clone())
            .with_trend(trend)
            .with_extra("Run", entry.id.clone());
        let document = self.renderer.render(&context)?;

        let report_path = self.config.report_path(&Local::now())?;
        fs::create_dir_all(&self.config.output_dir).with_context(|| {
            format!("Failed to create output dir {}", self.config.output_dir.display())
        })?;
        fs::write(&report_path, document)
            .with_context(|| format!("Failed to write report {}", report_path.display()))?;
        info!("Report written to {}", report_path.display());

        Ok(ReportOutcome {
            summary,
            report_path,
            history: entry,
        })
    }
}

/// Format datetime for display
fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.format("%Y-%m-%d %H:%M:%S UTC").to_string()
}

/// Truncate string to max length
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{kept}...")
    }
}
