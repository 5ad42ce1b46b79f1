//! Declarative test metadata
//!
//! Parses `tag:<word>`, `level:<int>` and `order:<int>` markers out of a
//! test's documentation text. Each parser is independent of the others.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::ConfigError;
use crate::models::TestUnit;

/// Level of a test without a `level:` marker; always included unless a level filter is set
pub const DEFAULT_LEVEL: i64 = -1;

/// Order of a test without an `order:` marker
pub const DEFAULT_ORDER: i64 = 100;

static TAG_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\btag:(\w+)").expect("valid tag pattern"));
static LEVEL_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\blevel:(\S*)").expect("valid level pattern"));
static ORDER_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\border:(\S*)").expect("valid order pattern"));

/// Every tag marker, in order of appearance, duplicates kept
pub fn parse_tags(doc: &str) -> Vec<String> {
    TAG_PATTERN
        .captures_iter(doc)
        .map(|c| c[1].to_string())
        .collect()
}

/// First level marker, or [`DEFAULT_LEVEL`]
pub fn parse_level(doc: &str, test: &str) -> Result<i64, ConfigError> {
    parse_integer(&LEVEL_PATTERN, "level", doc, test).map(|v| v.unwrap_or(DEFAULT_LEVEL))
}

/// First order marker, or [`DEFAULT_ORDER`]
pub fn parse_order(doc: &str, test: &str) -> Result<i64, ConfigError> {
    parse_integer(&ORDER_PATTERN, "order", doc, test).map(|v| v.unwrap_or(DEFAULT_ORDER))
}

fn parse_integer(
    pattern: &Regex,
    marker: &'static str,
    doc: &str,
    test: &str,
) -> Result<Option<i64>, ConfigError> {
    let Some(captures) = pattern.captures(doc) else {
        return Ok(None);
    };
    let value = &captures[1];
    value
        .parse::<i64>()
        .map(Some)
        .map_err(|_| ConfigError::MalformedMarker {
            marker,
            value: value.to_string(),
            test: test.to_string(),
        })
}

/// Metadata derived from a test's documentation
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Metadata {
    pub tags: Vec<String>,
    pub level: i64,
    pub order: i64,
}

impl Default for Metadata {
    fn default() -> Self {
        Self {
            tags: Vec::new(),
            level: DEFAULT_LEVEL,
            order: DEFAULT_ORDER,
        }
    }
}

impl Metadata {
    /// Recompute metadata for `unit`
    pub fn of(unit: &TestUnit) -> Result<Self, ConfigError> {
        let Some(doc) = unit.doc.as_deref() else {
            return Ok(Self::default());
        };
        Ok(Self {
            tags: parse_tags(doc),
            level: parse_level(doc, &unit.id)?,
            order: parse_order(doc, &unit.id)?,
        })
    }

    pub fn has_any_tag(&self, wanted: &[String]) -> bool {
        self.tags.iter().any(|t| wanted.contains(t))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = "Login flow
        tag:smoke tag:api
        level:2
        order:3
        tag:smoke";

    #[test]
    fn test_parse_tags_keeps_duplicates() {
        assert_eq!(parse_tags(DOC), vec!["smoke", "api", "smoke"]);
        assert!(parse_tags("no markers here").is_empty());
    }

    #[test]
    fn test_parse_level_and_order() {
        assert_eq!(parse_level(DOC, "t").unwrap(), 2);
        assert_eq!(parse_order(DOC, "t").unwrap(), 3);
    }

    #[test]
    fn test_defaults_when_absent() {
        assert_eq!(parse_level("nothing", "t").unwrap(), DEFAULT_LEVEL);
        assert_eq!(parse_order("nothing", "t").unwrap(), DEFAULT_ORDER);
    }

    #[test]
    fn test_first_marker_wins() {
        assert_eq!(parse_level("level:1 level:5", "t").unwrap(), 1);
    }

    #[test]
    fn test_malformed_marker_is_error() {
        let err = parse_level("level:high", "m.C.test_x").unwrap_err();
        assert!(matches!(
            err,
            ConfigError::MalformedMarker { marker: "level", .. }
        ));
        assert!(err.to_string().contains("m.C.test_x"));
        assert!(parse_order("order:", "t").is_err());
    }

    #[test]
    fn test_prefixed_marker_is_not_order() {
        assert_eq!(parse_order("global_order:5", "t").unwrap(), DEFAULT_ORDER);
    }
}
