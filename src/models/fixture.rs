//! Module and class fixtures
//!
//! Setup/teardown hooks are plain callable slots keyed by module name or
//! class path. The runner decides when to call them.

use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use super::test_case::panic_message;

/// Fixture hook entry point
pub type FixtureFn = Arc<dyn Fn() -> anyhow::Result<()> + Send + Sync>;

/// Setup/teardown pair for one scope
#[derive(Clone, Default)]
pub struct FixtureHooks {
    pub set_up: Option<FixtureFn>,
    pub tear_down: Option<FixtureFn>,
}

/// Scope a fixture-level failure belongs to
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum GroupScope {
    SetUpModule(String),
    TearDownModule(String),
    SetUpClass(String),
    TearDownClass(String),
    /// The module could not be loaded at all
    Load(String),
}

impl GroupScope {
    /// Name of the hook that failed
    pub fn hook_name(&self) -> &'static str {
        match self {
            GroupScope::SetUpModule(_) => "setUpModule",
            GroupScope::TearDownModule(_) => "tearDownModule",
            GroupScope::SetUpClass(_) => "setUpClass",
            GroupScope::TearDownClass(_) => "tearDownClass",
            GroupScope::Load(_) => "load",
        }
    }

    /// Module name or class path the failure covers
    pub fn target(&self) -> &str {
        match self {
            GroupScope::SetUpModule(t)
            | GroupScope::TearDownModule(t)
            | GroupScope::SetUpClass(t)
            | GroupScope::TearDownClass(t)
            | GroupScope::Load(t) => t,
        }
    }
}

impl fmt::Display for GroupScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.hook_name(), self.target())
    }
}

/// Fixture hooks registered by discovery
#[derive(Clone, Default)]
pub struct FixtureRegistry {
    modules: HashMap<String, FixtureHooks>,
    classes: HashMap<String, FixtureHooks>,
}

impl FixtureRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_up_module<F>(mut self, module: &str, hook: F) -> Self
    where
        F: Fn() -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.modules.entry(module.to_string()).or_default().set_up = Some(Arc::new(hook));
        self
    }

    pub fn tear_down_module<F>(mut self, module: &str, hook: F) -> Self
    where
        F: Fn() -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.modules.entry(module.to_string()).or_default().tear_down = Some(Arc::new(hook));
        self
    }

    pub fn set_up_class<F>(mut self, class_path: &str, hook: F) -> Self
    where
        F: Fn() -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.classes.entry(class_path.to_string()).or_default().set_up = Some(Arc::new(hook));
        self
    }

    pub fn tear_down_class<F>(mut self, class_path: &str, hook: F) -> Self
    where
        F: Fn() -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.classes.entry(class_path.to_string()).or_default().tear_down = Some(Arc::new(hook));
        self
    }

    pub fn module(&self, module: &str) -> Option<&FixtureHooks> {
        self.modules.get(module)
    }

    pub fn class(&self, class_path: &str) -> Option<&FixtureHooks> {
        self.classes.get(class_path)
    }

    /// Run the hook for `scope`, if one is registered
    ///
    /// Returns the failure trace when the hook errors or panics.
    pub fn run(&self, scope: &GroupScope) -> Result<(), String> {
        let hook = match scope {
            GroupScope::SetUpModule(m) => self.module(m).and_then(|h| h.set_up.clone()),
            GroupScope::TearDownModule(m) => self.module(m).and_then(|h| h.tear_down.clone()),
            GroupScope::SetUpClass(c) => self.class(c).and_then(|h| h.set_up.clone()),
            GroupScope::TearDownClass(c) => self.class(c).and_then(|h| h.tear_down.clone()),
            GroupScope::Load(_) => None,
        };

        let Some(hook) = hook else {
            return Ok(());
        };

        match panic::catch_unwind(AssertUnwindSafe(|| hook())) {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(format!("{scope} failed: {e:#}")),
            Err(payload) => Err(format!(
                "{scope} panicked: {}",
                panic_message(payload.as_ref())
            )),
        }
    }
}

impl fmt::Debug for FixtureRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut modules: Vec<_> = self.modules.keys().collect();
        let mut classes: Vec<_> = self.classes.keys().collect();
        modules.sort();
        classes.sort();
        f.debug_struct("FixtureRegistry")
            .field("modules", &modules)
            .field("classes", &classes)
            .finish()
    }
}
