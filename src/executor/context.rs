//! Per-test execution context
//!
//! Output capture is explicit: each test writes into its own buffer through
//! the [`TestContext`] it is handed, never into the process-wide streams.
//! The [`CaptureRegistry`] is the one shared table of which thread is
//! capturing for which test; entries are claimed at test start and released
//! by [`CaptureGuard`] on every exit path.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io;
use std::sync::Arc;
use std::thread::{self, ThreadId};

use crate::error::ConfigError;
use crate::results::Image;

#[derive(Debug, Default)]
struct BufferState {
    text: String,
    /// Bytes of `text` already handed to the aggregator
    reported: usize,
}

/// Shared text buffer holding one test's output
#[derive(Clone, Debug, Default)]
pub struct OutputBuffer(Arc<Mutex<BufferState>>);

impl OutputBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_str(&self, text: &str) {
        self.0.lock().text.push_str(text);
    }

    /// Text written so far
    pub fn snapshot(&self) -> String {
        self.0.lock().text.clone()
    }

    /// Text written since the last call, marking it reported
    pub fn take_unreported(&self) -> String {
        let mut state = self.0.lock();
        let fresh = state.text[state.reported..].to_string();
        state.reported = state.text.len();
        fresh
    }
}

/// `io::Write` handle appending to a test's buffer
#[derive(Clone, Debug)]
pub struct CaptureWriter {
    buffer: OutputBuffer,
}

impl io::Write for CaptureWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.push_str(&String::from_utf8_lossy(buf));
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Metadata a test body attaches while it runs
#[derive(Clone, Debug, Default)]
pub struct RuntimeMetadata {
    pub tags: Vec<String>,
    pub level: Option<i64>,
    pub images: Vec<Image>,
}

/// Side channel from test bodies to the aggregator, keyed by test id
#[derive(Clone, Debug, Default)]
pub struct MetadataChannel(Arc<Mutex<HashMap<String, RuntimeMetadata>>>);

impl MetadataChannel {
    pub fn new() -> Self {
        Self::default()
    }

    fn update(&self, test_id: &str, apply: impl FnOnce(&mut RuntimeMetadata)) {
        let mut entries = self.0.lock();
        apply(entries.entry(test_id.to_string()).or_default());
    }

    /// Remove and return whatever was attached for `test_id`
    pub fn take(&self, test_id: &str) -> RuntimeMetadata {
        self.0.lock().remove(test_id).unwrap_or_default()
    }
}

/// Handle given to every test body
#[derive(Clone, Debug)]
pub struct TestContext {
    test_id: String,
    buffer: OutputBuffer,
    metadata: MetadataChannel,
}

impl TestContext {
    pub fn new(test_id: impl Into<String>, buffer: OutputBuffer, metadata: MetadataChannel) -> Self {
        Self {
            test_id: test_id.into(),
            buffer,
            metadata,
        }
    }

    pub fn test_id(&self) -> &str {
        &self.test_id
    }

    /// Captured standard output of this test
    pub fn stdout(&self) -> CaptureWriter {
        CaptureWriter {
            buffer: self.buffer.clone(),
        }
    }

    /// Captured standard error; shares the buffer with stdout
    pub fn stderr(&self) -> CaptureWriter {
        self.stdout()
    }

    pub fn print(&self, text: impl AsRef<str>) {
        self.buffer.push_str(text.as_ref());
    }

    pub fn println(&self, text: impl AsRef<str>) {
        self.buffer.push_str(text.as_ref());
        self.buffer.push_str("\n");
    }

    pub fn add_tag(&self, tag: impl Into<String>) {
        let tag = tag.into();
        self.metadata.update(&self.test_id, |m| m.tags.push(tag));
    }

    pub fn set_level(&self, level: i64) {
        self.metadata.update(&self.test_id, |m| m.level = Some(level));
    }

    pub fn attach_image(&self, image: Image) {
        self.metadata.update(&self.test_id, |m| m.images.push(image));
    }

    pub fn output(&self) -> String {
        self.buffer.snapshot()
    }
}

/// Output of one test with its capture window
#[derive(Clone, Debug)]
pub struct CapturedOutput {
    pub text: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
}

impl CapturedOutput {
    /// A zero-length window with no output
    pub fn empty_at(at: DateTime<Utc>) -> Self {
        Self {
            text: String::new(),
            started_at: at,
            ended_at: at,
        }
    }
}

/// Which thread is capturing for which test
#[derive(Clone, Debug, Default)]
pub struct CaptureRegistry(Arc<Mutex<HashMap<ThreadId, String>>>);

impl CaptureRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the current thread's capture slot for `context`
    ///
    /// Capture is not re-entrant: a thread that is already capturing is
    /// refused.
    pub fn begin(&self, context: TestContext) -> Result<CaptureGuard, ConfigError> {
        let thread = thread::current().id();
        {
            let mut active = self.0.lock();
            if let Some(current) = active.get(&thread) {
                return Err(ConfigError::NestedCapture {
                    test: format!("{} (while capturing {current})", context.test_id),
                });
            }
            active.insert(thread, context.test_id.clone());
        }

        Ok(CaptureGuard {
            registry: self.clone(),
            thread,
            context,
            started_at: Utc::now(),
        })
    }

    /// Number of captures in progress
    pub fn active(&self) -> usize {
        self.0.lock().len()
    }

    fn release(&self, thread: ThreadId) {
        self.0.lock().remove(&thread);
    }
}

/// Claimed capture slot; released when dropped
#[derive(Debug)]
pub struct CaptureGuard {
    registry: CaptureRegistry,
    thread: ThreadId,
    context: TestContext,
    started_at: DateTime<Utc>,
}

impl CaptureGuard {
    pub fn context(&self) -> &TestContext {
        &self.context
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Release the slot and return what the test wrote
    pub fn finish(self) -> CapturedOutput {
        CapturedOutput {
            text: self.context.buffer.take_unreported(),
            started_at: self.started_at,
            ended_at: Utc::now(),
        }
    }
}

impl Drop for CaptureGuard {
    fn drop(&mut self) {
        self.registry.release(self.thread);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::panic::{self, AssertUnwindSafe};

    fn context(id: &str) -> TestContext {
        TestContext::new(id, OutputBuffer::new(), MetadataChannel::new())
    }

    #[test]
    fn test_writers_share_buffer() {
        let ctx = context("m.C.t");
        writeln!(ctx.stdout(), "out").unwrap();
        write!(ctx.stderr(), "err").unwrap();
        ctx.println("!");
        assert_eq!(ctx.output(), "out\nerr!\n");
    }

    #[test]
    fn test_take_unreported_advances() {
        let buffer = OutputBuffer::new();
        buffer.push_str("started\n");
        assert_eq!(buffer.take_unreported(), "started\n");
        assert_eq!(buffer.take_unreported(), "");
        buffer.push_str("finished\n");
        assert_eq!(buffer.take_unreported(), "finished\n");
        assert_eq!(buffer.snapshot(), "started\nfinished\n");
    }

    #[test]
    fn test_metadata_channel() {
        let channel = MetadataChannel::new();
        let ctx = TestContext::new("m.C.t", OutputBuffer::new(), channel.clone());
        ctx.add_tag("smoke");
        ctx.set_level(2);
        ctx.attach_image(Image::Bin(vec![1, 2, 3]));

        let meta = channel.take("m.C.t");
        assert_eq!(meta.tags, vec!["smoke"]);
        assert_eq!(meta.level, Some(2));
        assert_eq!(meta.images.len(), 1);
        assert!(channel.take("m.C.t").tags.is_empty());
    }

    #[test]
    fn test_capture_is_not_reentrant() {
        let registry = CaptureRegistry::new();
        let guard = registry.begin(context("a")).unwrap();
        assert!(matches!(
            registry.begin(context("b")),
            Err(ConfigError::NestedCapture { .. })
        ));
        let captured = guard.finish();
        assert!(captured.ended_at >= captured.started_at);
        assert_eq!(registry.active(), 0);
        assert!(registry.begin(context("b")).is_ok());
    }

    #[test]
    fn test_capture_released_on_panic() {
        let registry = CaptureRegistry::new();
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            let guard = registry.begin(context("a")).unwrap();
            guard.context().print("before panic");
            panic!("test body exploded");
        }));
        assert!(result.is_err());
        assert_eq!(registry.active(), 0);
    }

    #[test]
    fn test_threads_capture_independently() {
        let registry = CaptureRegistry::new();
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let registry = registry.clone();
                thread::spawn(move || {
                    let guard = registry.begin(context(&format!("t{i}"))).unwrap();
                    for _ in 0..50 {
                        guard.context().print(format!("{i}"));
                    }
                    guard.finish().text
                })
            })
            .collect();

        for (i, handle) in handles.into_iter().enumerate() {
            let text = handle.join().unwrap();
            assert_eq!(text, i.to_string().repeat(50));
        }
        assert_eq!(registry.active(), 0);
    }
}
