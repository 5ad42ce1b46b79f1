//! Index of every discovered test
//!
//! Used to re-resolve the tests a fixture or load failure invalidates,
//! including ones that never ran.

use std::collections::HashMap;

use super::transform::flatten;
use crate::models::{GroupScope, TestSuite, TestUnit};

/// Discovered tests indexed by module and by class path
#[derive(Clone, Debug, Default)]
pub struct TestCatalog {
    units: Vec<TestUnit>,
    by_module: HashMap<String, Vec<usize>>,
    by_class: HashMap<String, Vec<usize>>,
}

impl TestCatalog {
    pub fn new(units: Vec<TestUnit>) -> Self {
        let mut catalog = Self::default();
        for unit in units {
            catalog.insert(unit);
        }
        catalog
    }

    /// Catalog the whole suite, including tests of modules that failed to load
    pub fn from_suite(suite: &TestSuite) -> Self {
        let mut units = flatten(&suite.root);
        for failure in &suite.load_failures {
            units.extend(failure.tests.iter().cloned());
        }
        Self::new(units)
    }

    fn insert(&mut self, unit: TestUnit) {
        let slot = self.units.len();
        self.by_module
            .entry(unit.module_name.clone())
            .or_default()
            .push(slot);
        self.by_class.entry(unit.class_path()).or_default().push(slot);
        self.units.push(unit);
    }

    /// Every unit, in discovery order
    pub fn units(&self) -> &[TestUnit] {
        &self.units
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    pub fn tests_in_module(&self, module: &str) -> Vec<TestUnit> {
        self.lookup(&self.by_module, module)
    }

    pub fn tests_in_class(&self, class_path: &str) -> Vec<TestUnit> {
        self.lookup(&self.by_class, class_path)
    }

    /// Every test a failure at `scope` covers
    pub fn resolve(&self, scope: &GroupScope) -> Vec<TestUnit> {
        match scope {
            GroupScope::SetUpModule(m) | GroupScope::TearDownModule(m) | GroupScope::Load(m) => {
                self.tests_in_module(m)
            }
            GroupScope::SetUpClass(c) | GroupScope::TearDownClass(c) => self.tests_in_class(c),
        }
    }

    fn lookup(&self, index: &HashMap<String, Vec<usize>>, key: &str) -> Vec<TestUnit> {
        index
            .get(key)
            .map(|slots| slots.iter().map(|&i| self.units[i].clone()).collect())
            .unwrap_or_default()
    }
}
