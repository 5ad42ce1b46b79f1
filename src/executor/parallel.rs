//! Bounded test dispatch
//!
//! Runs test bodies on dedicated threads, at most N at a time, with optional
//! per-test timeouts. A timed-out body is abandoned, never killed.

use chrono::Utc;
use futures::future::join_all;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tokio::sync::{oneshot, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::context::{CapturedOutput, OutputBuffer};
use crate::error::ConfigError;
use crate::models::{Failure, Outcome, TestStatus, TestUnit};
use crate::results::ResultAggregator;

/// How a wait for in-flight tests ended
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Drain {
    Completed,
    /// The deadline passed first; stragglers keep running
    TimedOut,
}

/// Run one body to completion on the calling thread and record its outcome
fn run_body(
    aggregator: &ResultAggregator,
    unit: &TestUnit,
    buffer: OutputBuffer,
) -> Result<(), ConfigError> {
    let guard = aggregator.on_start(unit, buffer)?;
    let result = panic::catch_unwind(AssertUnwindSafe(|| (unit.body)(guard.context())))
        .unwrap_or_else(|payload| Err(Failure::from_panic(payload.as_ref())));
    let captured = aggregator.on_stop(guard);
    aggregator.record(unit, Outcome::classify(result, unit.expect_failure), captured)
}

/// Execute one test and return the status it was recorded with
pub(crate) async fn execute(
    aggregator: Arc<ResultAggregator>,
    unit: TestUnit,
    timeout: Option<Duration>,
) -> Result<TestStatus, ConfigError> {
    if let Some(reason) = &unit.skip {
        debug!("Skipping {}: {}", unit.id, reason);
        aggregator.on_skip(&unit, reason, CapturedOutput::empty_at(Utc::now()))?;
        return Ok(TestStatus::Skipped);
    }

    info!("Running {}", unit.id);
    let buffer = OutputBuffer::new();
    let started_at = Utc::now();

    let (tx, rx) = oneshot::channel();
    let spawned = {
        let aggregator = aggregator.clone();
        let unit = unit.clone();
        let buffer = buffer.clone();
        thread::Builder::new()
            .name(format!("test-{}", unit.name))
            .spawn(move || {
                if let Err(Err(e)) = tx.send(run_body(&aggregator, &unit, buffer)) {
                    error!("{} failed after it was abandoned: {}", unit.id, e);
                    aggregator.on_late_error(e);
                }
            })
    };
    if let Err(e) = spawned {
        let captured = CapturedOutput::empty_at(started_at);
        aggregator.on_error(&unit, &format!("Error: failed to start test thread: {e}"), captured)?;
        return Ok(TestStatus::Error);
    }

    let finished = match timeout {
        Some(limit) => match tokio::time::timeout(limit, rx).await {
            Ok(finished) => finished,
            Err(_) => {
                warn!(
                    "{} exceeded {:.3}s, abandoning it",
                    unit.id,
                    limit.as_secs_f64()
                );
                let captured = CapturedOutput {
                    text: buffer.take_unreported(),
                    started_at,
                    ended_at: Utc::now(),
                };
                aggregator.on_timeout(&unit, limit, captured)?;
                return Ok(TestStatus::Timeout);
            }
        },
        None => rx.await,
    };

    match finished {
        Ok(recorded) => recorded?,
        Err(_) => {
            let captured = CapturedOutput {
                text: buffer.take_unreported(),
                started_at,
                ended_at: Utc::now(),
            };
            aggregator.on_error(&unit, "Error: test thread exited without a result", captured)?;
        }
    }

    let status = aggregator.status_of(&unit.id).unwrap_or(TestStatus::Error);
    info!("{} {} {}", status.symbol(), unit.id, status);
    Ok(status)
}

/// Bounded pool of test workers sharing one aggregator
pub struct WorkerPool {
    semaphore: Arc<Semaphore>,
    aggregator: Arc<ResultAggregator>,
    timeout: Option<Duration>,
    fail_fast: bool,
    stop: Arc<AtomicBool>,
    in_flight: Vec<JoinHandle<Result<Option<TestStatus>, ConfigError>>>,
}

impl WorkerPool {
    pub fn new(size: usize, aggregator: Arc<ResultAggregator>) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(size.max(1))),
            aggregator,
            timeout: None,
            fail_fast: false,
            stop: Arc::new(AtomicBool::new(false)),
            in_flight: Vec::new(),
        }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_fail_fast(mut self, fail_fast: bool) -> Self {
        self.fail_fast = fail_fast;
        self
    }

    pub fn aggregator(&self) -> &Arc<ResultAggregator> {
        &self.aggregator
    }

    /// Fail-fast tripped; nothing more should be dispatched
    pub fn stopped(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    /// Stop dispatching because of a failure outside any test body
    pub fn stop(&self, cause: impl std::fmt::Display) {
        if !self.stop.swap(true, Ordering::SeqCst) {
            warn!("Fail-fast: stopping after {}", cause);
        }
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    fn observe(stop: &AtomicBool, fail_fast: bool, unit: &TestUnit, status: TestStatus) {
        if fail_fast && status.is_failure() && !stop.swap(true, Ordering::SeqCst) {
            warn!("Fail-fast: stopping after {} {}", unit.id, status);
        }
    }

    /// Run one test and wait for it
    ///
    /// Returns `None` when `deadline` passed before the test finished.
    pub async fn run_one(
        &self,
        unit: TestUnit,
        deadline: Option<Instant>,
    ) -> Result<Option<TestStatus>, ConfigError> {
        let task = execute(self.aggregator.clone(), unit.clone(), self.timeout);
        let status = match deadline {
            Some(deadline) => match tokio::time::timeout_at(deadline, task).await {
                Ok(status) => status?,
                Err(_) => return Ok(None),
            },
            None => task.await?,
        };
        Self::observe(&self.stop, self.fail_fast, &unit, status);
        Ok(Some(status))
    }

    /// Queue a test; it starts once a worker slot is free
    pub fn submit(&mut self, unit: TestUnit) {
        let semaphore = self.semaphore.clone();
        let aggregator = self.aggregator.clone();
        let stop = self.stop.clone();
        let timeout = self.timeout;
        let fail_fast = self.fail_fast;

        debug!("Submitting {}", unit.id);
        let handle = tokio::spawn(Self::worker(
            semaphore, aggregator, stop, unit, timeout, fail_fast,
        ));
        self.in_flight.push(handle);
    }

    async fn worker(
        semaphore: Arc<Semaphore>,
        aggregator: Arc<ResultAggregator>,
        stop: Arc<AtomicBool>,
        unit: TestUnit,
        timeout: Option<Duration>,
        fail_fast: bool,
    ) -> Result<Option<TestStatus>, ConfigError> {
        let Ok(_permit) = semaphore.acquire_owned().await else {
            return Ok(None);
        };
        if stop.load(Ordering::SeqCst) {
            debug!("Not starting {} after fail-fast stop", unit.id);
            return Ok(None);
        }
        let status = execute(aggregator, unit.clone(), timeout).await?;
        Self::observe(&stop, fail_fast, &unit, status);
        Ok(Some(status))
    }

    /// Wait for every submitted test, or until `deadline`
    pub async fn drain(&mut self, deadline: Option<Instant>) -> Result<Drain, ConfigError> {
        if self.in_flight.is_empty() {
            return Ok(Drain::Completed);
        }

        let handles = std::mem::take(&mut self.in_flight);
        debug!("Waiting for {} in-flight test(s)", handles.len());
        let joined = match deadline {
            Some(deadline) => match tokio::time::timeout_at(deadline, join_all(handles)).await {
                Ok(joined) => joined,
                Err(_) => return Ok(Drain::TimedOut),
            },
            None => join_all(handles).await,
        };

        let mut first_error = None;
        for result in joined {
            match result {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => {
                    first_error.get_or_insert(e);
                }
                Err(e) => error!("Test worker task failed: {}", e),
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(Drain::Completed),
        }
    }
}
