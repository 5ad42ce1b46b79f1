//! Execution records and run summaries
//!
//! Defines test statuses, per-test records and their class rollups.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Terminal status of a test
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TestStatus {
    Pass,
    Fail,
    Error,
    Skipped,
    #[serde(rename = "XFAIL")]
    XFail,
    #[serde(rename = "XPASS")]
    XPass,
    LoadError,
    Timeout,
    SetUpClassError,
    TearDownClassError,
}

/// Counting bucket a status falls into
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StatusCategory {
    Passed,
    Failed,
    Errored,
    Skipped,
    XFailed,
    XPassed,
}

impl TestStatus {
    pub fn symbol(&self) -> &'static str {
        match self {
            TestStatus::Pass => "✓",
            TestStatus::Fail => "✗",
            TestStatus::Skipped => "○",
            TestStatus::XFail => "x",
            TestStatus::XPass => "X",
            TestStatus::Timeout => "⧗",
            _ => "!",
        }
    }

    /// Every error-family status counts as errored
    pub fn category(&self) -> StatusCategory {
        match self {
            TestStatus::Pass => StatusCategory::Passed,
            TestStatus::Fail => StatusCategory::Failed,
            TestStatus::Skipped => StatusCategory::Skipped,
            TestStatus::XFail => StatusCategory::XFailed,
            TestStatus::XPass => StatusCategory::XPassed,
            TestStatus::Error
            | TestStatus::LoadError
            | TestStatus::Timeout
            | TestStatus::SetUpClassError
            | TestStatus::TearDownClassError => StatusCategory::Errored,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, TestStatus::Pass)
    }

    /// Statuses that stop dispatch under fail-fast
    pub fn is_failure(&self) -> bool {
        matches!(
            self.category(),
            StatusCategory::Failed | StatusCategory::Errored
        )
    }
}

impl fmt::Display for TestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            TestStatus::Pass => "PASS",
            TestStatus::Fail => "FAIL",
            TestStatus::Error => "ERROR",
            TestStatus::Skipped => "SKIPPED",
            TestStatus::XFail => "XFAIL",
            TestStatus::XPass => "XPASS",
            TestStatus::LoadError => "LOAD_ERROR",
            TestStatus::Timeout => "TIMEOUT",
            TestStatus::SetUpClassError => "SET_UP_CLASS_ERROR",
            TestStatus::TearDownClassError => "TEAR_DOWN_CLASS_ERROR",
        };
        write!(f, "{label}")
    }
}

/// Durable result record for one test
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExecutionRecord {
    /// Registration order, starting at 1
    pub sn: u64,
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub class_name: String,
    pub module_name: String,
    pub doc: Option<String>,
    pub source: String,
    pub status: TestStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub duration_secs: f64,
    pub output: String,
    pub trace: String,
    pub tags: Vec<String>,
    pub level: i64,
    pub images: Vec<String>,
}

impl ExecutionRecord {
    /// Class identity, matching [`TestUnit::class_path`](crate::models::TestUnit::class_path)
    pub fn class_path(&self) -> String {
        if self.module_name.is_empty() {
            self.class_name.clone()
        } else {
            format!("{}.{}", self.module_name, self.class_name)
        }
    }

    /// Append a later observation of the same test
    pub fn append(&mut self, output: &str, trace: &str) {
        append_line(&mut self.output, output);
        append_line(&mut self.trace, trace);
    }
}

fn append_line(target: &mut String, addition: &str) {
    if addition.is_empty() {
        return;
    }
    if !target.is_empty() && !target.ends_with('\n') {
        target.push('\n');
    }
    target.push_str(addition);
}

impl fmt::Display for ExecutionRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} [{:.3}s] {}",
            self.status.symbol(),
            self.id,
            self.duration_secs,
            self.status
        )
    }
}

/// Counts by status bucket
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub errored: usize,
    pub skipped: usize,
    pub xfailed: usize,
    pub xpassed: usize,
}

impl StatusCounts {
    pub fn add(&mut self, status: TestStatus) {
        self.total += 1;
        match status.category() {
            StatusCategory::Passed => self.passed += 1,
            StatusCategory::Failed => self.failed += 1,
            StatusCategory::Errored => self.errored += 1,
            StatusCategory::Skipped => self.skipped += 1,
            StatusCategory::XFailed => self.xfailed += 1,
            StatusCategory::XPassed => self.xpassed += 1,
        }
    }

    pub fn from_records<'a>(records: impl IntoIterator<Item = &'a ExecutionRecord>) -> Self {
        let mut counts = Self::default();
        for record in records {
            counts.add(record.status);
        }
        counts
    }

    /// Sum of every bucket; equals `total` by construction
    pub fn bucket_sum(&self) -> usize {
        self.passed + self.failed + self.errored + self.skipped + self.xfailed + self.xpassed
    }

    pub fn pass_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            (self.passed as f64 / self.total as f64) * 100.0
        }
    }
}

/// Records sharing one class, with derived counts and time span
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClassRollup {
    /// Class path, `module.Class`
    pub name: String,
    pub module: String,
    pub counts: StatusCounts,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub duration_secs: f64,
    pub records: Vec<ExecutionRecord>,
}

impl ClassRollup {
    /// Roll up records of one class; `records` must be in sequence order
    pub fn new(name: impl Into<String>, records: Vec<ExecutionRecord>) -> Self {
        let module = records
            .first()
            .map(|r| r.module_name.clone())
            .unwrap_or_default();
        let counts = StatusCounts::from_records(&records);
        let started_at = records.iter().filter_map(|r| r.started_at).min();
        let ended_at = records.iter().filter_map(|r| r.ended_at).max();
        let duration_secs = match (started_at, ended_at) {
            (Some(start), Some(end)) => seconds_between(start, end),
            _ => 0.0,
        };

        Self {
            name: name.into(),
            module,
            counts,
            started_at,
            ended_at,
            duration_secs,
            records,
        }
    }
}

/// Host environment captured with each run
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentInfo {
    /// e.g. `linux-x86_64`
    pub platform: String,
    /// OS family, e.g. `unix`
    pub system: String,
    /// Compiler the runner was built with, e.g. `rustc 1.80.0 (...)`
    pub runtime_version: String,
    pub env: BTreeMap<String, String>,
}

impl EnvironmentInfo {
    pub fn capture() -> Self {
        Self {
            platform: format!("{}-{}", std::env::consts::OS, std::env::consts::ARCH),
            system: std::env::consts::FAMILY.to_string(),
            runtime_version: env!("SUITE_RUNNER_RUSTC_VERSION").to_string(),
            env: std::env::vars().collect(),
        }
    }
}

impl Default for EnvironmentInfo {
    fn default() -> Self {
        Self::capture()
    }
}

/// Summary of one completed run
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunSummary {
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub duration_secs: f64,
    pub counts: StatusCounts,
    pub environment: EnvironmentInfo,
    pub classes: Vec<ClassRollup>,
    /// The global wait gave up before every test finished
    #[serde(default)]
    pub timed_out: bool,
    /// Fail-fast stopped dispatch early
    #[serde(default)]
    pub stopped_early: bool,
}

impl RunSummary {
    pub fn records(&self) -> impl Iterator<Item = &ExecutionRecord> {
        self.classes.iter().flat_map(|c| c.records.iter())
    }

    pub fn record(&self, id: &str) -> Option<&ExecutionRecord> {
        self.records().find(|r| r.id == id)
    }

    pub fn status_of(&self, id: &str) -> Option<TestStatus> {
        self.record(id).map(|r| r.status)
    }

    pub fn pass_rate(&self) -> f64 {
        self.counts.pass_rate()
    }

    pub fn is_all_passed(&self) -> bool {
        self.counts.passed + self.counts.skipped == self.counts.total
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Run started {}", self.started_at.to_rfc3339())?;
        writeln!(f, "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━")?;
        for class in &self.classes {
            writeln!(f, "{} ({} tests)", class.name, class.counts.total)?;
            for record in &class.records {
                writeln!(f, "  {record}")?;
            }
        }
        writeln!(f, "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━")?;
        writeln!(
            f,
            "Total: {} | Pass: {} | Fail: {} | Error: {} | Skip: {} | XFail: {} | XPass: {}",
            self.counts.total,
            self.counts.passed,
            self.counts.failed,
            self.counts.errored,
            self.counts.skipped,
            self.counts.xfailed,
            self.counts.xpassed
        )?;
        writeln!(
            f,
            "Pass Rate: {:.1}% | Duration: {:.3}s",
            self.pass_rate(),
            self.duration_secs
        )
    }
}

pub(crate) fn seconds_between(start: DateTime<Utc>, end: DateTime<Utc>) -> f64 {
    (end - start)
        .to_std()
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn record(sn: u64, status: TestStatus) -> ExecutionRecord {
        ExecutionRecord {
            sn,
            id: format!("m.C.t{sn}"),
            name: format!("t{sn}"),
            description: None,
            class_name: "C".to_string(),
            module_name: "m".to_string(),
            doc: None,
            source: String::new(),
            status,
            started_at: None,
            ended_at: None,
            duration_secs: 0.0,
            output: String::new(),
            trace: String::new(),
            tags: Vec::new(),
            level: -1,
            images: Vec::new(),
        }
    }

    #[test]
    fn test_error_family_counts_as_errored() {
        let mut counts = StatusCounts::default();
        for status in [
            TestStatus::Error,
            TestStatus::LoadError,
            TestStatus::Timeout,
            TestStatus::SetUpClassError,
            TestStatus::TearDownClassError,
        ] {
            counts.add(status);
        }
        assert_eq!(counts.errored, 5);
        assert_eq!(counts.bucket_sum(), counts.total);
    }

    #[test]
    fn test_fail_fast_statuses() {
        assert!(TestStatus::Fail.is_failure());
        assert!(TestStatus::Timeout.is_failure());
        assert!(!TestStatus::XFail.is_failure());
        assert!(!TestStatus::Skipped.is_failure());
    }

    #[test]
    fn test_status_serialization() {
        assert_eq!(
            serde_json::to_string(&TestStatus::SetUpClassError).unwrap(),
            "\"SET_UP_CLASS_ERROR\""
        );
        assert_eq!(serde_json::to_string(&TestStatus::XPass).unwrap(), "\"XPASS\"");
        let status: TestStatus = serde_json::from_str("\"LOAD_ERROR\"").unwrap();
        assert_eq!(status, TestStatus::LoadError);
    }

    #[test]
    fn test_record_append() {
        let mut r = record(1, TestStatus::Pass);
        r.append("first", "");
        r.append("second", "trace");
        assert_eq!(r.output, "first\nsecond");
        assert_eq!(r.trace, "trace");

        r.append("third\n", "");
        r.append("fourth\n", "");
        assert_eq!(r.output, "first\nsecond\nthird\nfourth\n");
    }

    #[test]
    fn test_class_rollup_time_span() {
        let start = Utc::now();
        let mut a = record(1, TestStatus::Pass);
        a.started_at = Some(start + Duration::seconds(1));
        a.ended_at = Some(start + Duration::seconds(2));
        let mut b = record(2, TestStatus::Fail);
        b.started_at = Some(start);
        b.ended_at = Some(start + Duration::seconds(4));
        let c = record(3, TestStatus::SetUpClassError);

        let rollup = ClassRollup::new("m.C", vec![a, b, c]);
        assert_eq!(rollup.started_at, Some(start));
        assert_eq!(rollup.ended_at, Some(start + Duration::seconds(4)));
        assert!((rollup.duration_secs - 4.0).abs() < 1e-9);
        assert_eq!(rollup.counts.total, 3);
        assert_eq!(rollup.counts.errored, 1);
        assert_eq!(rollup.module, "m");
    }

    #[test]
    fn test_environment_info() {
        let env = EnvironmentInfo::capture();
        assert!(!env.platform.is_empty());
        assert!(!env.system.is_empty());
        assert!(env.runtime_version.starts_with("rustc"));
    }
}
