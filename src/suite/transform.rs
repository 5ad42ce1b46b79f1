//! Suite transformations
//!
//! Derives new suites from a discovered one: flattening, grouping by class,
//! ordering by declared `order:` and filtering by id list, tag or level.

use anyhow::{Context, Result};
use std::collections::{HashMap, HashSet};
use std::path::Path;

use super::metadata::Metadata;
use crate::error::ConfigError;
use crate::models::{SuiteItem, TestGroup, TestUnit};

/// Every leaf test, depth first, in declaration order
///
/// Subgroups without any reachable test are skipped without being walked.
pub fn flatten(group: &TestGroup) -> Vec<TestUnit> {
    let mut units = Vec::with_capacity(group.count_cases());
    collect(group, &mut units);
    units
}

fn collect(group: &TestGroup, units: &mut Vec<TestUnit>) {
    for item in &group.items {
        match item {
            SuiteItem::Case(unit) => units.push(unit.clone()),
            SuiteItem::Group(inner) if inner.count_cases() > 0 => collect(inner, units),
            SuiteItem::Group(_) => {}
        }
    }
}

/// Partition the flattened suite by class, in first-seen class order
pub fn group_by_class(group: &TestGroup) -> Vec<TestGroup> {
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut groups: Vec<TestGroup> = Vec::new();

    for unit in flatten(group) {
        let class_path = unit.class_path();
        let slot = *index.entry(class_path.clone()).or_insert_with(|| {
            groups.push(TestGroup::new(class_path));
            groups.len() - 1
        });
        groups[slot].items.push(SuiteItem::Case(unit));
    }

    groups
}

/// Stable-sort each class group by `order:` ascending
///
/// Ties keep their original relative order.
pub fn order_within_class(groups: Vec<TestGroup>) -> Result<Vec<TestGroup>, ConfigError> {
    groups
        .into_iter()
        .map(|group| {
            let mut keyed = flatten(&group)
                .into_iter()
                .map(|unit| Metadata::of(&unit).map(|m| (m.order, unit)))
                .collect::<Result<Vec<_>, _>>()?;
            keyed.sort_by_key(|(order, _)| *order);
            let units = keyed.into_iter().map(|(_, unit)| unit).collect();
            Ok(TestGroup::from_units(group.name, units))
        })
        .collect()
}

/// Tests whose id is listed; unknown ids are ignored
pub fn filter_by_list(all: &[TestUnit], ids: &HashSet<String>) -> TestGroup {
    let units = all
        .iter()
        .filter(|unit| ids.contains(&unit.id))
        .cloned()
        .collect();
    TestGroup::from_units("selected", units)
}

/// Tests carrying at least one of `tags`
pub fn filter_by_tags(all: &[TestUnit], tags: &[String]) -> Result<TestGroup, ConfigError> {
    let mut units = Vec::new();
    for unit in all {
        if Metadata::of(unit)?.has_any_tag(tags) {
            units.push(unit.clone());
        }
    }
    Ok(TestGroup::from_units("tagged", units))
}

/// Tests with `0 <= level <= max_level`; unleveled tests never match
pub fn filter_by_level(all: &[TestUnit], max_level: i64) -> Result<TestGroup, ConfigError> {
    let mut units = Vec::new();
    for unit in all {
        let level = Metadata::of(unit)?.level;
        if (0..=max_level).contains(&level) {
            units.push(unit.clone());
        }
    }
    Ok(TestGroup::from_units("leveled", units))
}

/// Read a test-id list file: one id per line, `#` comments and blanks skipped
pub fn load_id_list(path: impl AsRef<Path>) -> Result<HashSet<String>> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read test list: {}", path.display()))?;

    Ok(content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect())
}
