//! Suite execution runner
//!
//! Walks a selected, optionally ordered, test sequence as a state machine:
//! fixtures run at module and class boundaries, tests are dispatched serially
//! or through the worker pool, and every outcome lands in one aggregator.

use chrono::Utc;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Instant as StdInstant;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::parallel::{Drain, WorkerPool};
use crate::config::RunnerConfig;
use crate::error::ConfigError;
use crate::models::{
    FixtureRegistry, GroupScope, RunSummary, TestGroup, TestStatus, TestSuite, TestUnit,
};
use crate::results::{ImageStore, NullImageStore, ResultAggregator};
use crate::suite::{
    filter_by_level, filter_by_list, filter_by_tags, flatten, group_by_class, load_id_list,
    order_within_class, Metadata, TestCatalog,
};

/// Where the runner is in its traversal
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunState {
    NotStarted,
    FixtureSetup,
    RunningCase,
    FixtureTeardown,
    Done,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunState::NotStarted => "not-started",
            RunState::FixtureSetup => "fixture-setup",
            RunState::RunningCase => "running-case",
            RunState::FixtureTeardown => "fixture-teardown",
            RunState::Done => "done",
        };
        write!(f, "{name}")
    }
}

/// Module and class the traversal is currently inside
struct Boundary {
    module: String,
    class_path: String,
    module_failed: bool,
    class_failed: bool,
}

/// Test suite runner
pub struct Runner {
    config: RunnerConfig,
    images: Arc<dyn ImageStore>,
    state: Mutex<RunState>,
}

impl Runner {
    /// Create a new runner
    pub fn new(config: RunnerConfig) -> Self {
        Self {
            config,
            images: Arc::new(NullImageStore),
            state: Mutex::new(RunState::NotStarted),
        }
    }

    /// Persist attached images through `images`
    pub fn with_image_store(mut self, images: Arc<dyn ImageStore>) -> Self {
        self.images = images;
        self
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    pub fn state(&self) -> RunState {
        *self.state.lock()
    }

    fn transition(&self, next: RunState) {
        let mut state = self.state.lock();
        if *state != next {
            debug!("Runner state {} -> {}", *state, next);
            *state = next;
        }
    }

    /// Apply the configured filters and ordering
    fn select(&self, root: &TestGroup) -> Result<Vec<TestUnit>, ConfigError> {
        let mut units = flatten(root);

        if let Some(path) = &self.config.test_list {
            let ids = load_id_list(path).map_err(|e| ConfigError::InvalidConfig(format!("{e:#}")))?;
            units = flatten(&filter_by_list(&units, &ids));
            debug!("{} test(s) selected by id list", units.len());
        }
        if !self.config.tags.is_empty() {
            units = flatten(&filter_by_tags(&units, &self.config.tags)?);
            debug!("{} test(s) selected by tags {:?}", units.len(), self.config.tags);
        }
        if let Some(level) = self.config.level {
            units = flatten(&filter_by_level(&units, level)?);
            debug!("{} test(s) selected by level <= {}", units.len(), level);
        }

        if self.config.ensure_sequence {
            let grouped = group_by_class(&TestGroup::from_units("selected", units));
            units = order_within_class(grouped)?
                .iter()
                .flat_map(flatten)
                .collect();
        }
        Ok(units)
    }

    /// List the tests a run would execute, as `"{n}.{id}"` lines
    pub fn collect_only(&self, suite: &TestSuite) -> Result<Vec<String>, ConfigError> {
        let clock = StdInstant::now();
        let units = self.select(&suite.root)?;
        let lines: Vec<String> = units
            .iter()
            .enumerate()
            .map(|(i, unit)| format!("{}.{}", i + 1, unit.id))
            .collect();
        info!(
            "Collected {} test(s) in {:.3}s",
            lines.len(),
            clock.elapsed().as_secs_f64()
        );
        Ok(lines)
    }

    /// Run the suite to completion
    ///
    /// Only setup mistakes (malformed markers, unusable images or id lists)
    /// fail the run; test and fixture failures are recorded in the summary.
    pub async fn run(&self, suite: &TestSuite) -> Result<RunSummary, ConfigError> {
        let started_at = Utc::now();
        let deadline = self.config.global_timeout().map(|limit| Instant::now() + limit);
        self.transition(RunState::NotStarted);

        for unit in TestCatalog::from_suite(suite).units() {
            Metadata::of(unit)?;
        }
        let plan = self.select(&suite.root)?;

        // fixture failures only cascade to selected tests
        let mut scoped = plan.clone();
        for failure in &suite.load_failures {
            scoped.extend(failure.tests.iter().cloned());
        }
        let aggregator = Arc::new(
            ResultAggregator::new(TestCatalog::new(scoped)).with_image_store(self.images.clone()),
        );

        for failure in &suite.load_failures {
            aggregator.on_group_error(&GroupScope::Load(failure.module.clone()), &failure.trace)?;
        }

        info!(
            "Starting suite execution: {} test(s), {}",
            plan.len(),
            match self.config.threads {
                Some(n) => format!("{n} worker(s)"),
                None => "serial".to_string(),
            }
        );

        let mut pool = WorkerPool::new(self.config.threads.unwrap_or(1), aggregator.clone())
            .with_timeout(self.config.test_timeout())
            .with_fail_fast(self.config.fail_fast);
        let fixtures = &suite.fixtures;

        let mut boundary: Option<Boundary> = None;
        let mut timed_out = false;

        for unit in &plan {
            if pool.stopped() {
                break;
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                timed_out = true;
                break;
            }

            let class_path = unit.class_path();
            if boundary.as_ref().map(|b| b.class_path != class_path).unwrap_or(true) {
                if pool.drain(deadline).await? == Drain::TimedOut {
                    timed_out = true;
                    break;
                }
                let previous = boundary.take();
                boundary = Some(self.cross(fixtures, &pool, previous, unit)?);
            }

            if boundary.as_ref().is_some_and(|b| b.class_failed) {
                debug!("Not running {}: its fixture setup failed", unit.id);
                continue;
            }

            self.transition(RunState::RunningCase);
            if self.config.threads.is_some() {
                pool.submit(unit.clone());
            } else {
                if pool.run_one(unit.clone(), deadline).await?.is_none() {
                    timed_out = true;
                    break;
                }
                if let Some(interval) = self.config.interval() {
                    tokio::time::sleep(interval).await;
                }
            }
        }

        if !timed_out && pool.drain(deadline).await? == Drain::TimedOut {
            timed_out = true;
        }

        if timed_out {
            warn!("Global timeout elapsed; abandoning unfinished tests");
            let limit = self.config.global_timeout_secs.unwrap_or_default();
            let trace = format!("Timeout: run exceeded the global timeout of {limit:.3}s");
            let ids: Vec<String> = plan.iter().map(|u| u.id.clone()).collect();
            let pending = aggregator.pending(&ids);
            let by_id: HashMap<&str, &TestUnit> = plan.iter().map(|u| (u.id.as_str(), u)).collect();
            for id in &pending {
                if let Some(unit) = by_id.get(id.as_str()) {
                    aggregator.register(unit, TestStatus::Timeout, &trace, None)?;
                }
            }
        } else if let Some(last) = boundary.take() {
            self.leave(fixtures, &pool, &last, None)?;
        }

        if let Some(e) = aggregator.take_late_error() {
            return Err(e);
        }

        let stopped_early = pool.stopped();
        self.transition(RunState::Done);

        let summary = aggregator.summarize(started_at, Utc::now(), timed_out, stopped_early);
        info!(
            "Suite finished in {:.3}s - Pass: {}/{} ({:.1}%)",
            summary.duration_secs,
            summary.counts.passed,
            summary.counts.total,
            summary.pass_rate()
        );
        Ok(summary)
    }

    /// Tear down the previous boundary and set up the one `next` belongs to
    fn cross(
        &self,
        fixtures: &FixtureRegistry,
        pool: &WorkerPool,
        previous: Option<Boundary>,
        next: &TestUnit,
    ) -> Result<Boundary, ConfigError> {
        let module_changed = previous
            .as_ref()
            .map(|b| b.module != next.module_name)
            .unwrap_or(true);

        let mut module_failed = false;
        if let Some(prev) = &previous {
            self.leave(fixtures, pool, prev, Some(&next.module_name))?;
            if !module_changed {
                module_failed = prev.module_failed;
            }
        }

        self.transition(RunState::FixtureSetup);
        if module_changed {
            let scope = GroupScope::SetUpModule(next.module_name.clone());
            module_failed = !self.run_fixture(fixtures, pool, scope)?;
        }

        let class_path = next.class_path();
        let class_failed = module_failed || {
            let scope = GroupScope::SetUpClass(class_path.clone());
            !self.run_fixture(fixtures, pool, scope)?
        };

        Ok(Boundary {
            module: next.module_name.clone(),
            class_path,
            module_failed,
            class_failed,
        })
    }

    /// Run teardown hooks for `current`; the module is torn down unless
    /// `next_module` stays inside it
    fn leave(
        &self,
        fixtures: &FixtureRegistry,
        pool: &WorkerPool,
        current: &Boundary,
        next_module: Option<&str>,
    ) -> Result<(), ConfigError> {
        self.transition(RunState::FixtureTeardown);
        if !current.class_failed {
            let scope = GroupScope::TearDownClass(current.class_path.clone());
            self.run_fixture(fixtures, pool, scope)?;
        }
        if next_module != Some(current.module.as_str()) && !current.module_failed {
            let scope = GroupScope::TearDownModule(current.module.clone());
            self.run_fixture(fixtures, pool, scope)?;
        }
        Ok(())
    }

    /// Returns whether the hook succeeded; failures are cascaded and trip
    /// fail-fast like any other error
    fn run_fixture(
        &self,
        fixtures: &FixtureRegistry,
        pool: &WorkerPool,
        scope: GroupScope,
    ) -> Result<bool, ConfigError> {
        match fixtures.run(&scope) {
            Ok(()) => Ok(true),
            Err(trace) => {
                pool.aggregator().on_group_error(&scope, &trace)?;
                if self.config.fail_fast {
                    pool.stop(&scope);
                }
                Ok(false)
            }
        }
    }
}
