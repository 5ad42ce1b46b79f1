//! Data models for suite execution
//!
//! This module contains all data structures used throughout the engine.

mod fixture;
mod test_case;
mod test_result;

pub use fixture::{FixtureFn, FixtureHooks, FixtureRegistry, GroupScope};
pub use test_case::{Failure, LoadFailure, Outcome, SuiteItem, TestFn, TestGroup, TestSuite, TestUnit};
pub use test_result::{
    ClassRollup, EnvironmentInfo, ExecutionRecord, RunSummary, StatusCategory, StatusCounts,
    TestStatus,
};

pub(crate) use test_result::seconds_between;
