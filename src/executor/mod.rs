//! Test execution engine
//!
//! Provides serial and pooled test execution with explicit output capture.

mod context;
mod parallel;
mod runner;

pub use context::{
    CaptureGuard, CaptureRegistry, CaptureWriter, CapturedOutput, MetadataChannel, OutputBuffer,
    RuntimeMetadata, TestContext,
};
pub use parallel::{Drain, WorkerPool};
pub use runner::{RunState, Runner};
