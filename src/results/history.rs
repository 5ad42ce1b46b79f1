//! Run history cache
//!
//! Persists each run summary as pretty JSON and reads the most recent ones
//! back for trend display.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::models::RunSummary;

/// Number of runs kept by default
pub const DEFAULT_HISTORY_LIMIT: usize = 10;

const ENTRY_PREFIX: &str = "run_";

/// One cached run
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: String,
    pub recorded_at: DateTime<Utc>,
    pub summary: RunSummary,
}

/// A run reduced to what a trend chart needs
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrendPoint {
    pub id: String,
    pub started_at: DateTime<Utc>,
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub errored: usize,
    pub skipped: usize,
    pub pass_rate: f64,
    pub duration_secs: f64,
}

impl From<&HistoryEntry> for TrendPoint {
    fn from(entry: &HistoryEntry) -> Self {
        let counts = &entry.summary.counts;
        Self {
            id: entry.id.clone(),
            started_at: entry.summary.started_at,
            total: counts.total,
            passed: counts.passed,
            failed: counts.failed,
            errored: counts.errored,
            skipped: counts.skipped,
            pass_rate: counts.pass_rate(),
            duration_secs: entry.summary.duration_secs,
        }
    }
}

/// Generate a run id; ids sort chronologically
fn generate_run_id(at: DateTime<Utc>) -> String {
    let timestamp = at.format("%Y%m%d_%H%M%S_%6f");
    let random: u32 = rand::random::<u32>() % 10000;
    format!("{ENTRY_PREFIX}{timestamp}_{random:04}")
}

/// Directory of cached runs, pruned to the last `limit`
pub struct HistoryCache {
    dir: PathBuf,
    limit: usize,
}

impl HistoryCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            limit: DEFAULT_HISTORY_LIMIT,
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit.max(1);
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn entry_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    /// Cache a finished run and prune older ones
    pub fn append(&self, summary: &RunSummary) -> Result<HistoryEntry> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create history dir {}", self.dir.display()))?;

        let recorded_at = Utc::now();
        let entry = HistoryEntry {
            id: generate_run_id(recorded_at),
            recorded_at,
            summary: summary.clone(),
        };

        let path = self.entry_path(&entry.id);
        let file = File::create(&path).context("Failed to create history file")?;
        let writer = BufWriter::new(file);
        serde_json::to_writer_pretty(writer, &entry).context("Failed to write history entry")?;
        info!("Saved run history to {}", path.display());

        self.prune()?;
        Ok(entry)
    }

    /// Entry file paths, oldest first
    fn entry_paths(&self) -> Result<Vec<PathBuf>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }

        let mut paths = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            let is_entry = path.extension().map(|e| e == "json").unwrap_or(false)
                && path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .map(|n| n.starts_with(ENTRY_PREFIX))
                    .unwrap_or(false);
            if is_entry {
                paths.push(path);
            }
        }
        paths.sort();
        Ok(paths)
    }

    fn prune(&self) -> Result<()> {
        let paths = self.entry_paths()?;
        let excess = paths.len().saturating_sub(self.limit);
        for path in &paths[..excess] {
            fs::remove_file(path)
                .with_context(|| format!("Failed to prune {}", path.display()))?;
            debug!("Pruned history entry {}", path.display());
        }
        Ok(())
    }

    fn load_from_path(&self, path: &Path) -> Result<HistoryEntry> {
        let file = File::open(path).context("Failed to open history file")?;
        let reader = BufReader::new(file);
        serde_json::from_reader(reader).context("Failed to parse history entry")
    }

    /// The last `limit` runs, oldest first; unreadable entries are skipped
    pub fn recent(&self) -> Result<Vec<HistoryEntry>> {
        let paths = self.entry_paths()?;
        let start = paths.len().saturating_sub(self.limit);

        let mut entries = Vec::new();
        for path in &paths[start..] {
            match self.load_from_path(path) {
                Ok(entry) => entries.push(entry),
                Err(e) => warn!("Skipping history entry {}: {:#}", path.display(), e),
            }
        }
        Ok(entries)
    }

    /// Load one run by id
    pub fn load(&self, id: &str) -> Result<HistoryEntry> {
        let path = self.entry_path(id);
        let entry = self
            .load_from_path(&path)
            .with_context(|| format!("No readable history entry '{id}'"))?;
        debug!("Loaded run history from {}", path.display());
        Ok(entry)
    }

    pub fn trend(&self) -> Result<Vec<TrendPoint>> {
        Ok(self.recent()?.iter().map(TrendPoint::from).collect())
    }

    /// Export one run's records
    pub fn export(&self, entry: &HistoryEntry, path: &Path, format: ExportFormat) -> Result<()> {
        match format {
            ExportFormat::Json => {
                let file = File::create(path)?;
                let writer = BufWriter::new(file);
                serde_json::to_writer_pretty(writer, entry)?;
            }
            ExportFormat::Csv => {
                let mut writer = csv::Writer::from_path(path)?;

                writer.write_record([
                    "sn",
                    "id",
                    "class",
                    "status",
                    "started_at",
                    "duration_secs",
                    "tags",
                    "level",
                    "trace",
                ])?;

                for record in entry.summary.records() {
                    writer.write_record([
                        record.sn.to_string(),
                        record.id.clone(),
                        record.class_path(),
                        record.status.to_string(),
                        record
                            .started_at
                            .map(|t| t.to_rfc3339())
                            .unwrap_or_default(),
                        format!("{:.3}", record.duration_secs),
                        record.tags.join(" "),
                        record.level.to_string(),
                        record.trace.clone(),
                    ])?;
                }
                writer.flush()?;
            }
        }

        info!("Exported run {} to {}", entry.id, path.display());
        Ok(())
    }
}

/// Export format
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExportFormat {
    Json,
    Csv,
}

impl ExportFormat {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "json" => Some(ExportFormat::Json),
            "csv" => Some(ExportFormat::Csv),
            _ => None,
        }
    }

    pub fn from_extension(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|e| e.to_str())
            .and_then(Self::from_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ClassRollup, EnvironmentInfo, ExecutionRecord, StatusCounts, TestStatus};
    use tempfile::tempdir;

    fn summary(passed: usize, failed: usize) -> RunSummary {
        let now = Utc::now();
        let mut records = Vec::new();
        for i in 0..(passed + failed) {
            records.push(ExecutionRecord {
                sn: i as u64 + 1,
                id: format!("m.C.t{i}"),
                name: format!("t{i}"),
                description: None,
                class_name: "C".to_string(),
                module_name: "m".to_string(),
                doc: None,
                source: String::new(),
                status: if i < passed {
                    TestStatus::Pass
                } else {
                    TestStatus::Fail
                },
                started_at: Some(now),
                ended_at: Some(now),
                duration_secs: 0.5,
                output: String::new(),
                trace: String::new(),
                tags: vec!["smoke".to_string()],
                level: -1,
                images: Vec::new(),
            });
        }
        let counts = StatusCounts::from_records(&records);
        RunSummary {
            started_at: now,
            ended_at: now,
            duration_secs: 1.0,
            counts,
            environment: EnvironmentInfo::capture(),
            classes: vec![ClassRollup::new("m.C", records)],
            timed_out: false,
            stopped_early: false,
        }
    }

    #[test]
    fn test_generate_run_id() {
        let now = Utc::now();
        let id = generate_run_id(now);
        assert!(id.starts_with("run_"));
        assert_ne!(generate_run_id(now), generate_run_id(now + chrono::Duration::seconds(1)));
    }

    #[test]
    fn test_append_and_load_is_lossless() {
        let dir = tempdir().unwrap();
        let cache = HistoryCache::new(dir.path());
        let original = summary(2, 1);

        let entry = cache.append(&original).unwrap();
        let loaded = cache.load(&entry.id).unwrap();

        assert_eq!(loaded.summary.counts, original.counts);
        assert_eq!(loaded.summary.started_at, original.started_at);
        assert_eq!(loaded.summary.environment, original.environment);
        assert_eq!(loaded.summary.classes[0].records.len(), 3);
        assert_eq!(
            loaded.summary.status_of("m.C.t2"),
            Some(TestStatus::Fail)
        );
    }

    #[test]
    fn test_prunes_to_limit() {
        let dir = tempdir().unwrap();
        let cache = HistoryCache::new(dir.path()).with_limit(3);

        let mut ids = Vec::new();
        for i in 0..5 {
            ids.push(cache.append(&summary(i, 0)).unwrap().id);
        }

        let recent = cache.recent().unwrap();
        assert_eq!(recent.len(), 3);
        // oldest first
        let kept: Vec<_> = recent.iter().map(|e| e.summary.counts.passed).collect();
        assert_eq!(kept, vec![2, 3, 4]);
        assert!(cache.load(&ids[0]).is_err());
    }

    #[test]
    fn test_unreadable_entries_are_skipped() {
        let dir = tempdir().unwrap();
        let cache = HistoryCache::new(dir.path());
        cache.append(&summary(1, 0)).unwrap();
        fs::write(dir.path().join("run_00000000_broken.json"), "not json").unwrap();
        fs::write(dir.path().join("notes.json"), "{}").unwrap();

        let trend = cache.trend().unwrap();
        assert_eq!(trend.len(), 1);
        assert_eq!(trend[0].passed, 1);
        assert!((trend[0].pass_rate - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_empty_dir() {
        let dir = tempdir().unwrap();
        let cache = HistoryCache::new(dir.path().join("missing"));
        assert!(cache.recent().unwrap().is_empty());
    }

    #[test]
    fn test_export_csv() {
        let dir = tempdir().unwrap();
        let cache = HistoryCache::new(dir.path());
        let entry = cache.append(&summary(1, 1)).unwrap();

        let path = dir.path().join("out.csv");
        cache.export(&entry, &path, ExportFormat::Csv).unwrap();
        let text = fs::read_to_string(&path).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("sn,id,class,status"));
        assert!(lines[2].contains("FAIL"));
    }

    #[test]
    fn test_export_format() {
        assert_eq!(ExportFormat::from_str("JSON"), Some(ExportFormat::Json));
        assert_eq!(
            ExportFormat::from_extension(Path::new("a/b.csv")),
            Some(ExportFormat::Csv)
        );
        assert!(ExportFormat::from_str("xml").is_none());
    }
}
