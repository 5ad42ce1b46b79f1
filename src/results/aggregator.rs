//! Result aggregation
//!
//! The sink every test outcome flows into. It owns the output capture
//! registry, keeps exactly one record per test identity and rolls records up
//! by class at the end of a run.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::images::{ImageStore, NullImageStore};
use crate::error::ConfigError;
use crate::executor::{
    CaptureGuard, CaptureRegistry, CapturedOutput, MetadataChannel, OutputBuffer, TestContext,
};
use crate::models::{
    seconds_between, ClassRollup, EnvironmentInfo, ExecutionRecord, GroupScope, Outcome,
    RunSummary, StatusCounts, TestStatus, TestUnit,
};
use crate::suite::{Metadata, TestCatalog};

#[derive(Default)]
struct AggregatorState {
    records: Vec<ExecutionRecord>,
    index: HashMap<String, usize>,
    next_sn: u64,
    /// Setup errors raised by abandoned tests after the run stopped waiting
    late_errors: Vec<ConfigError>,
}

/// Collects outcomes for one run
pub struct ResultAggregator {
    state: Mutex<AggregatorState>,
    catalog: TestCatalog,
    captures: CaptureRegistry,
    metadata: MetadataChannel,
    images: Arc<dyn ImageStore>,
}

impl ResultAggregator {
    pub fn new(catalog: TestCatalog) -> Self {
        Self {
            state: Mutex::new(AggregatorState {
                next_sn: 1,
                ..Default::default()
            }),
            catalog,
            captures: CaptureRegistry::new(),
            metadata: MetadataChannel::new(),
            images: Arc::new(NullImageStore),
        }
    }

    pub fn with_image_store(mut self, images: Arc<dyn ImageStore>) -> Self {
        self.images = images;
        self
    }

    pub fn catalog(&self) -> &TestCatalog {
        &self.catalog
    }

    /// Context wired to this aggregator's metadata side channel
    pub fn context_for(&self, unit: &TestUnit, buffer: OutputBuffer) -> TestContext {
        TestContext::new(unit.id.clone(), buffer, self.metadata.clone())
    }

    /// Start capturing `unit`'s output on the current thread
    pub fn on_start(
        &self,
        unit: &TestUnit,
        buffer: OutputBuffer,
    ) -> Result<CaptureGuard, ConfigError> {
        debug!("Start {}", unit.id);
        self.captures.begin(self.context_for(unit, buffer))
    }

    /// Stop capturing and hand back what the test wrote
    pub fn on_stop(&self, guard: CaptureGuard) -> CapturedOutput {
        guard.finish()
    }

    pub fn on_pass(&self, unit: &TestUnit, captured: CapturedOutput) -> Result<(), ConfigError> {
        self.register(unit, TestStatus::Pass, "", Some(captured))
    }

    pub fn on_fail(
        &self,
        unit: &TestUnit,
        trace: &str,
        captured: CapturedOutput,
    ) -> Result<(), ConfigError> {
        self.register(unit, TestStatus::Fail, trace, Some(captured))
    }

    pub fn on_error(
        &self,
        unit: &TestUnit,
        trace: &str,
        captured: CapturedOutput,
    ) -> Result<(), ConfigError> {
        self.register(unit, TestStatus::Error, trace, Some(captured))
    }

    pub fn on_skip(
        &self,
        unit: &TestUnit,
        reason: &str,
        captured: CapturedOutput,
    ) -> Result<(), ConfigError> {
        self.register(unit, TestStatus::Skipped, reason, Some(captured))
    }

    pub fn on_expected_failure(
        &self,
        unit: &TestUnit,
        trace: &str,
        captured: CapturedOutput,
    ) -> Result<(), ConfigError> {
        self.register(unit, TestStatus::XFail, trace, Some(captured))
    }

    pub fn on_unexpected_success(
        &self,
        unit: &TestUnit,
        captured: CapturedOutput,
    ) -> Result<(), ConfigError> {
        self.register(unit, TestStatus::XPass, "UnexpectedSuccess", Some(captured))
    }

    pub fn on_timeout(
        &self,
        unit: &TestUnit,
        after: Duration,
        captured: CapturedOutput,
    ) -> Result<(), ConfigError> {
        let trace = format!(
            "Timeout: {} did not finish within {:.3}s",
            unit.id,
            after.as_secs_f64()
        );
        self.register(unit, TestStatus::Timeout, &trace, Some(captured))
    }

    /// Route a classified outcome to its handler
    pub fn record(
        &self,
        unit: &TestUnit,
        outcome: Outcome,
        captured: CapturedOutput,
    ) -> Result<(), ConfigError> {
        match outcome {
            Outcome::Pass => self.on_pass(unit, captured),
            Outcome::Fail(trace) => self.on_fail(unit, &trace, captured),
            Outcome::Error(trace) => self.on_error(unit, &trace, captured),
            Outcome::Skip(reason) => self.on_skip(unit, &reason, captured),
            Outcome::ExpectedFailure(trace) => self.on_expected_failure(unit, &trace, captured),
            Outcome::UnexpectedSuccess => self.on_unexpected_success(unit, captured),
        }
    }

    /// A fixture or load failure above the level of a single test
    ///
    /// Every test the scope covers is registered with the scoped status,
    /// including tests that never ran. Tests that already have a record get
    /// the trace appended instead. Returns how many tests were touched.
    pub fn on_group_error(&self, scope: &GroupScope, trace: &str) -> Result<usize, ConfigError> {
        let status = match scope {
            GroupScope::SetUpModule(_) | GroupScope::TearDownModule(_) => TestStatus::Error,
            GroupScope::SetUpClass(_) => TestStatus::SetUpClassError,
            GroupScope::TearDownClass(_) => TestStatus::TearDownClassError,
            GroupScope::Load(_) => TestStatus::LoadError,
        };

        let affected = self.catalog.resolve(scope);
        if affected.is_empty() {
            warn!("{} failed but no discovered test belongs to it", scope);
        } else {
            error!(
                "{} failed, marking {} test(s) {}",
                scope,
                affected.len(),
                status
            );
        }

        for unit in &affected {
            self.register(unit, status, trace, None)?;
        }
        Ok(affected.len())
    }

    /// Create the record for `unit` on first sight, append to it afterwards
    pub fn register(
        &self,
        unit: &TestUnit,
        status: TestStatus,
        trace: &str,
        captured: Option<CapturedOutput>,
    ) -> Result<(), ConfigError> {
        let output = captured
            .as_ref()
            .map(|c| c.text.clone())
            .unwrap_or_default();
        if !output.trim().is_empty() {
            info!("{}", output.trim());
        }

        if self.is_registered(&unit.id) {
            return self.append_existing(unit, &output, trace);
        }

        let record = self.snapshot(unit, status, trace, output.clone(), captured)?;

        let mut state = self.state.lock();
        if let Some(&slot) = state.index.get(&unit.id) {
            // Lost a race against a concurrent first registration
            state.records[slot].append(&output, trace);
            return Ok(());
        }
        let mut record = record;
        record.sn = state.next_sn;
        state.next_sn += 1;
        let slot = state.records.len();
        state.index.insert(unit.id.clone(), slot);
        state.records.push(record);
        Ok(())
    }

    /// Fold a later outcome into the existing record, including anything
    /// the test attached since its first registration
    fn append_existing(
        &self,
        unit: &TestUnit,
        output: &str,
        trace: &str,
    ) -> Result<(), ConfigError> {
        let runtime = self.metadata.take(&unit.id);
        let images = if runtime.images.is_empty() {
            Vec::new()
        } else {
            self.images.save(&unit.id, &runtime.images)?
        };

        let mut state = self.state.lock();
        if let Some(&slot) = state.index.get(&unit.id) {
            debug!("{} already registered, appending", unit.id);
            let record = &mut state.records[slot];
            record.append(output, trace);
            for tag in runtime.tags {
                if !record.tags.contains(&tag) {
                    record.tags.push(tag);
                }
            }
            record.images.extend(images);
        }
        Ok(())
    }

    /// Keep an error raised after its test was abandoned
    pub fn on_late_error(&self, error: ConfigError) {
        self.state.lock().late_errors.push(error);
    }

    /// First error an abandoned test raised, if any
    pub fn take_late_error(&self) -> Option<ConfigError> {
        let mut state = self.state.lock();
        if state.late_errors.is_empty() {
            None
        } else {
            Some(state.late_errors.remove(0))
        }
    }

    /// Build a record; runs outside the state lock since images may hit disk
    fn snapshot(
        &self,
        unit: &TestUnit,
        status: TestStatus,
        trace: &str,
        output: String,
        captured: Option<CapturedOutput>,
    ) -> Result<ExecutionRecord, ConfigError> {
        let metadata = Metadata::of(unit)?;
        let runtime = self.metadata.take(&unit.id);

        let mut tags = metadata.tags;
        tags.extend(runtime.tags);
        let level = runtime.level.unwrap_or(metadata.level);
        let images = if runtime.images.is_empty() {
            Vec::new()
        } else {
            self.images.save(&unit.id, &runtime.images)?
        };

        let source = unit.source.clone().unwrap_or_else(|| {
            debug!("No source snippet available for {}", unit.id);
            String::new()
        });

        let (started_at, ended_at, duration_secs) = match captured {
            Some(c) => (
                Some(c.started_at),
                Some(c.ended_at),
                seconds_between(c.started_at, c.ended_at),
            ),
            None => (None, None, 0.0),
        };

        Ok(ExecutionRecord {
            sn: 0,
            id: unit.id.clone(),
            name: unit.name.clone(),
            description: unit.short_description().map(str::to_string),
            class_name: unit.class_name.clone(),
            module_name: unit.module_name.clone(),
            doc: unit.doc.clone(),
            source,
            status,
            started_at,
            ended_at,
            duration_secs,
            output,
            trace: trace.to_string(),
            tags,
            level,
            images,
        })
    }

    pub fn is_registered(&self, id: &str) -> bool {
        self.state.lock().index.contains_key(id)
    }

    pub fn status_of(&self, id: &str) -> Option<TestStatus> {
        let state = self.state.lock();
        state.index.get(id).map(|&slot| state.records[slot].status)
    }

    pub fn len(&self) -> usize {
        self.state.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Ids among `ids` that have no record yet
    pub fn pending(&self, ids: &[String]) -> Vec<String> {
        let state = self.state.lock();
        ids.iter()
            .filter(|id| !state.index.contains_key(id.as_str()))
            .cloned()
            .collect()
    }

    /// Copy of every record, in registration order
    pub fn records(&self) -> Vec<ExecutionRecord> {
        self.state.lock().records.clone()
    }

    /// Roll records up by class
    ///
    /// Classes are ordered by the first registration they contain.
    pub fn summarize(
        &self,
        started_at: DateTime<Utc>,
        ended_at: DateTime<Utc>,
        timed_out: bool,
        stopped_early: bool,
    ) -> RunSummary {
        let records = self.records();

        let mut order: Vec<String> = Vec::new();
        let mut by_class: HashMap<String, Vec<ExecutionRecord>> = HashMap::new();
        for record in records {
            let class_path = record.class_path();
            if !by_class.contains_key(&class_path) {
                order.push(class_path.clone());
            }
            by_class.entry(class_path).or_default().push(record);
        }

        let classes: Vec<ClassRollup> = order
            .into_iter()
            .map(|name| {
                let records = by_class.remove(&name).unwrap_or_default();
                ClassRollup::new(name, records)
            })
            .collect();

        let counts = StatusCounts::from_records(classes.iter().flat_map(|c| c.records.iter()));

        RunSummary {
            started_at,
            ended_at,
            duration_secs: seconds_between(started_at, ended_at),
            counts,
            environment: EnvironmentInfo::capture(),
            classes,
            timed_out,
            stopped_early,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Failure, LoadFailure, TestGroup, TestSuite};
    use crate::results::Image;

    fn unit(module: &str, class: &str, name: &str) -> TestUnit {
        TestUnit::new(module, class, name, |_: &TestContext| Ok::<(), Failure>(()))
    }

    fn captured(text: &str) -> CapturedOutput {
        let mut c = CapturedOutput::empty_at(Utc::now());
        c.text = text.to_string();
        c
    }

    fn aggregator(units: Vec<TestUnit>) -> ResultAggregator {
        ResultAggregator::new(TestCatalog::new(units))
    }

    #[test]
    fn test_register_once_per_identity() {
        let t = unit("m", "C", "t");
        let agg = aggregator(vec![t.clone()]);

        agg.on_fail(&t, "first trace", captured("out 1")).unwrap();
        agg.register(&t, TestStatus::Error, "second trace", Some(captured("out 2")))
            .unwrap();

        let records = agg.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, TestStatus::Fail);
        assert_eq!(records[0].output, "out 1\nout 2");
        assert_eq!(records[0].trace, "first trace\nsecond trace");
    }

    #[test]
    fn test_late_append_drains_runtime_metadata() {
        let t = unit("m", "C", "t");
        let agg = aggregator(vec![t.clone()]);

        let context = agg.context_for(&t, OutputBuffer::new());
        context.println("started");
        agg.on_timeout(&t, Duration::from_millis(10), captured("started\n"))
            .unwrap();

        context.add_tag("late");
        context.println("finished late");
        agg.on_pass(&t, captured("finished late\n")).unwrap();

        let records = agg.records();
        assert_eq!(records[0].status, TestStatus::Timeout);
        assert_eq!(records[0].output, "started\nfinished late\n");
        assert_eq!(records[0].tags, vec!["late"]);
        assert!(agg.metadata.take("m.C.t").tags.is_empty());
    }

    #[test]
    fn test_sequence_numbers_follow_registration() {
        let a = unit("m", "C", "a");
        let b = unit("m", "C", "b");
        let agg = aggregator(vec![a.clone(), b.clone()]);

        agg.on_pass(&b, captured("")).unwrap();
        agg.on_pass(&a, captured("")).unwrap();

        let records = agg.records();
        assert_eq!(records[0].id, "m.C.b");
        assert_eq!(records[0].sn, 1);
        assert_eq!(records[1].sn, 2);
    }

    #[test]
    fn test_record_routes_outcomes() {
        let units: Vec<_> = ["p", "f", "e", "s", "xf", "xp"]
            .iter()
            .map(|n| unit("m", "C", n))
            .collect();
        let agg = aggregator(units.clone());

        let outcomes = vec![
            Outcome::Pass,
            Outcome::Fail("f".into()),
            Outcome::Error("e".into()),
            Outcome::Skip("later".into()),
            Outcome::ExpectedFailure("xf".into()),
            Outcome::UnexpectedSuccess,
        ];
        for (u, o) in units.iter().zip(outcomes) {
            agg.record(u, o, captured("")).unwrap();
        }

        let expected = [
            TestStatus::Pass,
            TestStatus::Fail,
            TestStatus::Error,
            TestStatus::Skipped,
            TestStatus::XFail,
            TestStatus::XPass,
        ];
        for (u, status) in units.iter().zip(expected) {
            assert_eq!(agg.status_of(&u.id), Some(status));
        }
    }

    #[test]
    fn test_class_setup_error_cascades_to_unrun_tests() {
        let units = vec![
            unit("m", "A", "t1"),
            unit("m", "A", "t2"),
            unit("m", "B", "t3"),
        ];
        let agg = aggregator(units);

        let touched = agg
            .on_group_error(&GroupScope::SetUpClass("m.A".to_string()), "boom")
            .unwrap();
        assert_eq!(touched, 2);
        assert_eq!(agg.status_of("m.A.t1"), Some(TestStatus::SetUpClassError));
        assert_eq!(agg.status_of("m.A.t2"), Some(TestStatus::SetUpClassError));
        assert_eq!(agg.status_of("m.B.t3"), None);
        assert_eq!(agg.records()[0].trace, "boom");
    }

    #[test]
    fn test_teardown_error_appends_to_ran_tests() {
        let t = unit("m", "A", "t1");
        let agg = aggregator(vec![t.clone()]);
        agg.on_pass(&t, captured("ran")).unwrap();

        agg.on_group_error(&GroupScope::TearDownClass("m.A".to_string()), "cleanup failed")
            .unwrap();
        let records = agg.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, TestStatus::Pass);
        assert_eq!(records[0].trace, "cleanup failed");
    }

    #[test]
    fn test_load_error_cascade() {
        let suite = TestSuite::new(TestGroup::new("root")).with_load_failure(LoadFailure::new(
            "broken",
            "ImportError: no module named x",
            vec![unit("broken", "X", "a"), unit("broken", "X", "b")],
        ));
        let agg = ResultAggregator::new(TestCatalog::from_suite(&suite));

        agg.on_group_error(&GroupScope::Load("broken".to_string()), "ImportError")
            .unwrap();
        assert_eq!(agg.status_of("broken.X.a"), Some(TestStatus::LoadError));
        assert_eq!(agg.status_of("broken.X.b"), Some(TestStatus::LoadError));
    }

    #[test]
    fn test_register_merges_doc_and_runtime_metadata() {
        let t = unit("m", "C", "t").with_doc("tag:smoke level:1");
        let agg = aggregator(vec![t.clone()]);

        let buffer = OutputBuffer::new();
        let guard = agg.on_start(&t, buffer).unwrap();
        guard.context().add_tag("runtime");
        guard.context().set_level(3);
        guard.context().println("hello");
        let out = agg.on_stop(guard);
        agg.on_pass(&t, out).unwrap();

        let records = agg.records();
        let record = &records[0];
        assert_eq!(record.tags, vec!["smoke", "runtime"]);
        assert_eq!(record.level, 3);
        assert_eq!(record.output, "hello\n");
        assert!(record.started_at.is_some());
    }

    #[test]
    fn test_image_store_failure_is_fatal() {
        struct Refusing;
        impl ImageStore for Refusing {
            fn save(&self, test_id: &str, _: &[Image]) -> Result<Vec<String>, ConfigError> {
                Err(ConfigError::ImageSave {
                    test: test_id.to_string(),
                    reason: "disk full".to_string(),
                })
            }
        }

        let t = unit("m", "C", "t");
        let agg = aggregator(vec![t.clone()]).with_image_store(Arc::new(Refusing));
        let guard = agg.on_start(&t, OutputBuffer::new()).unwrap();
        guard.context().attach_image(Image::Bin(vec![1]));
        let out = agg.on_stop(guard);

        assert!(agg.on_pass(&t, out).is_err());
        assert!(!agg.is_registered(&t.id));
    }

    #[test]
    fn test_summarize_rollup_totals() {
        let units = vec![
            unit("m", "A", "a1"),
            unit("m", "B", "b1"),
            unit("m", "A", "a2"),
        ];
        let agg = aggregator(units.clone());
        agg.on_pass(&units[0], captured("")).unwrap();
        agg.on_fail(&units[1], "x", captured("")).unwrap();
        agg.on_skip(&units[2], "later", captured("")).unwrap();

        let now = Utc::now();
        let summary = agg.summarize(now, now, false, false);
        assert_eq!(summary.classes.len(), 2);
        assert_eq!(summary.classes[0].name, "m.A");
        assert_eq!(summary.classes[0].counts.total, 2);

        let rolled: usize = summary.classes.iter().map(|c| c.counts.bucket_sum()).sum();
        assert_eq!(rolled, summary.counts.total);
        assert_eq!(summary.counts.total, 3);
    }

    #[test]
    fn test_pending() {
        let a = unit("m", "C", "a");
        let agg = aggregator(vec![a.clone()]);
        agg.on_pass(&a, captured("")).unwrap();

        let ids = vec!["m.C.a".to_string(), "m.C.b".to_string()];
        assert_eq!(agg.pending(&ids), vec!["m.C.b".to_string()]);
    }
}
