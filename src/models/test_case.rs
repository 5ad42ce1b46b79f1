//! Test case and suite models
//!
//! The tree of runnable units handed over by the discovery collaborator.
//! Everything here is read-only once discovered.

use std::fmt;
use std::sync::Arc;

use super::fixture::FixtureRegistry;
use crate::executor::TestContext;

/// Test body entry point
pub type TestFn = Arc<dyn Fn(&TestContext) -> Result<(), Failure> + Send + Sync>;

/// Why a test body did not pass
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Failure {
    /// An assertion did not hold
    Assertion(String),
    /// Anything unexpected raised by the body
    Error(String),
    /// The body decided to skip itself
    Skip(String),
}

impl Failure {
    pub fn assertion(message: impl Into<String>) -> Self {
        Failure::Assertion(message.into())
    }

    pub fn error(message: impl Into<String>) -> Self {
        Failure::Error(message.into())
    }

    pub fn skip(reason: impl Into<String>) -> Self {
        Failure::Skip(reason.into())
    }

    /// Fail with `message` unless `condition` holds
    pub fn check(condition: bool, message: impl Into<String>) -> Result<(), Failure> {
        if condition {
            Ok(())
        } else {
            Err(Failure::assertion(message))
        }
    }

    /// Classify a caught panic payload
    ///
    /// `assert!` family panics read "assertion ..." and count as assertion
    /// failures; every other panic is an error.
    pub fn from_panic(payload: &(dyn std::any::Any + Send)) -> Self {
        let message = panic_message(payload);
        if message.starts_with("assertion") {
            Failure::Assertion(message)
        } else {
            Failure::Error(format!("panicked: {message}"))
        }
    }
}

impl From<anyhow::Error> for Failure {
    fn from(e: anyhow::Error) -> Self {
        Failure::Error(format!("{e:#}"))
    }
}

impl From<std::io::Error> for Failure {
    fn from(e: std::io::Error) -> Self {
        Failure::Error(e.to_string())
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Failure::Assertion(msg) => write!(f, "AssertionError: {msg}"),
            Failure::Error(msg) => write!(f, "Error: {msg}"),
            Failure::Skip(reason) => write!(f, "Skipped: {reason}"),
        }
    }
}

pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Classified outcome of one dispatched test
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    Pass,
    Fail(String),
    Error(String),
    Skip(String),
    ExpectedFailure(String),
    UnexpectedSuccess,
}

impl Outcome {
    /// Classify a body result, honoring the expected-failure marker
    pub fn classify(result: Result<(), Failure>, expect_failure: bool) -> Self {
        match (result, expect_failure) {
            (Ok(()), false) => Outcome::Pass,
            (Ok(()), true) => Outcome::UnexpectedSuccess,
            (Err(Failure::Skip(reason)), _) => Outcome::Skip(reason),
            (Err(failure), true) => Outcome::ExpectedFailure(failure.to_string()),
            (Err(failure @ Failure::Assertion(_)), false) => Outcome::Fail(failure.to_string()),
            (Err(failure), false) => Outcome::Error(failure.to_string()),
        }
    }
}

/// A single executable test case
#[derive(Clone)]
pub struct TestUnit {
    /// Unique stable identity, e.g. `pkg.mod.Class.test_name`
    pub id: String,
    pub name: String,
    pub class_name: String,
    pub module_name: String,
    /// Documentation text carrying `tag:`, `level:` and `order:` markers
    pub doc: Option<String>,
    /// Source snippet, when discovery could provide one
    pub source: Option<String>,
    /// Static skip marker with its reason
    pub skip: Option<String>,
    pub expect_failure: bool,
    pub body: TestFn,
}

impl TestUnit {
    pub fn new<F>(module: &str, class: &str, name: &str, body: F) -> Self
    where
        F: Fn(&TestContext) -> Result<(), Failure> + Send + Sync + 'static,
    {
        let id = if module.is_empty() {
            format!("{class}.{name}")
        } else {
            format!("{module}.{class}.{name}")
        };
        Self {
            id,
            name: name.to_string(),
            class_name: class.to_string(),
            module_name: module.to_string(),
            doc: None,
            source: None,
            skip: None,
            expect_failure: false,
            body: Arc::new(body),
        }
    }

    pub fn with_doc(mut self, doc: impl Into<String>) -> Self {
        self.doc = Some(doc.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn skipped(mut self, reason: impl Into<String>) -> Self {
        self.skip = Some(reason.into());
        self
    }

    pub fn expected_failure(mut self) -> Self {
        self.expect_failure = true;
        self
    }

    /// Class identity: `module.Class`, or the bare class outside a module
    pub fn class_path(&self) -> String {
        if self.module_name.is_empty() {
            self.class_name.clone()
        } else {
            format!("{}.{}", self.module_name, self.class_name)
        }
    }

    /// First line of the doc text
    pub fn short_description(&self) -> Option<&str> {
        self.doc
            .as_deref()
            .and_then(|d| d.lines().map(str::trim).find(|l| !l.is_empty()))
    }
}

impl fmt::Debug for TestUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestUnit")
            .field("id", &self.id)
            .field("class", &self.class_path())
            .field("skip", &self.skip)
            .field("expect_failure", &self.expect_failure)
            .finish()
    }
}

impl fmt::Display for TestUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.class_path())
    }
}

/// A suite node: a single case or a nested group
#[derive(Clone, Debug)]
pub enum SuiteItem {
    Case(TestUnit),
    Group(TestGroup),
}

/// Ordered, possibly nested collection of tests
#[derive(Clone, Debug, Default)]
pub struct TestGroup {
    pub name: String,
    pub items: Vec<SuiteItem>,
}

impl TestGroup {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            items: Vec::new(),
        }
    }

    /// Build a flat group from units
    pub fn from_units(name: impl Into<String>, units: Vec<TestUnit>) -> Self {
        Self {
            name: name.into(),
            items: units.into_iter().map(SuiteItem::Case).collect(),
        }
    }

    pub fn with_case(mut self, unit: TestUnit) -> Self {
        self.items.push(SuiteItem::Case(unit));
        self
    }

    pub fn with_group(mut self, group: TestGroup) -> Self {
        self.items.push(SuiteItem::Group(group));
        self
    }

    /// Number of reachable leaf tests
    pub fn count_cases(&self) -> usize {
        self.items
            .iter()
            .map(|item| match item {
                SuiteItem::Case(_) => 1,
                SuiteItem::Group(group) => group.count_cases(),
            })
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.count_cases() == 0
    }
}

/// A module discovery could not load
#[derive(Clone, Debug)]
pub struct LoadFailure {
    pub module: String,
    pub trace: String,
    /// Tests the module would have contained
    pub tests: Vec<TestUnit>,
}

impl LoadFailure {
    pub fn new(module: impl Into<String>, trace: impl Into<String>, tests: Vec<TestUnit>) -> Self {
        Self {
            module: module.into(),
            trace: trace.into(),
            tests,
        }
    }
}

/// Everything discovery hands over for one run
#[derive(Clone, Debug, Default)]
pub struct TestSuite {
    pub root: TestGroup,
    pub fixtures: FixtureRegistry,
    pub load_failures: Vec<LoadFailure>,
}

impl TestSuite {
    pub fn new(root: TestGroup) -> Self {
        Self {
            root,
            fixtures: FixtureRegistry::default(),
            load_failures: Vec::new(),
        }
    }

    pub fn with_fixtures(mut self, fixtures: FixtureRegistry) -> Self {
        self.fixtures = fixtures;
        self
    }

    pub fn with_load_failure(mut self, failure: LoadFailure) -> Self {
        self.load_failures.push(failure);
        self
    }
}
