// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Selectors
//!
//! Tag/name predicates used to scope bulk operations, template applies and
//! recalibration. A selector is a conjunction: every tag term and the name
//! glob (if any) must match.
//!
//! ```text
//! role:support,tier:1          tag terms only
//! support-*                    name glob only
//! support-* role:support       both
//! ```

use std::collections::BTreeMap;
use std::fmt;

use crate::domain::fleet::{format_tag, parse_tag, AgentSpec, ValidationError};

/// Anything with a name and a tag set.
pub trait Selectable {
    fn selector_name(&self) -> &str;
    fn selector_tag(&self, key: &str) -> Option<String>;
}

impl Selectable for AgentSpec {
    fn selector_name(&self) -> &str {
        &self.name
    }

    fn selector_tag(&self, key: &str) -> Option<String> {
        self.tag_map().remove(key)
    }
}

#[derive(Debug, Clone, Default)]
pub struct Selector {
    tags: BTreeMap<String, String>,
    name: Option<glob::Pattern>,
}

impl Selector {
    /// Selector that matches everything.
    pub fn all() -> Self {
        Self::default()
    }

    /// Build from separately supplied parts, as the CLI flags do.
    pub fn from_parts(name_glob: Option<&str>, tags: &[String]) -> Result<Self, ValidationError> {
        let mut selector = Self::default();
        if let Some(glob) = name_glob.map(str::trim).filter(|g| !g.is_empty()) {
            selector.name = Some(
                glob::Pattern::new(glob)
                    .map_err(|e| ValidationError::InvalidSelector(format!("'{}': {}", glob, e)))?,
            );
        }
        for raw in tags.iter().flat_map(|t| t.split(',')) {
            let raw = raw.trim();
            if raw.is_empty() {
                continue;
            }
            selector.push_tag(raw)?;
        }
        Ok(selector)
    }

    /// Parse a whitespace separated expression. Terms containing `:` are tag
    /// terms, the remaining term (at most one) is the name glob.
    pub fn parse(expr: &str) -> Result<Self, ValidationError> {
        let mut selector = Self::default();
        for term in expr.split(|c: char| c.is_whitespace() || c == ',') {
            if term.is_empty() {
                continue;
            }
            if term.contains(':') {
                selector.push_tag(term)?;
            } else if selector.name.is_some() {
                return Err(ValidationError::InvalidSelector(format!(
                    "more than one name pattern in '{}'",
                    expr
                )));
            } else {
                selector.name = Some(glob::Pattern::new(term).map_err(|e| {
                    ValidationError::InvalidSelector(format!("'{}': {}", term, e))
                })?);
            }
        }
        Ok(selector)
    }

    fn push_tag(&mut self, raw: &str) -> Result<(), ValidationError> {
        let (key, value) = parse_tag(raw);
        if key.is_empty() {
            return Err(ValidationError::InvalidSelector(format!("empty tag key in '{}'", raw)));
        }
        self.tags.insert(key, value);
        Ok(())
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty() && self.name.is_none()
    }

    pub fn tags(&self) -> &BTreeMap<String, String> {
        &self.tags
    }

    pub fn name_pattern(&self) -> Option<&str> {
        self.name.as_ref().map(|p| p.as_str())
    }

    pub fn matches<E: Selectable + ?Sized>(&self, entity: &E) -> bool {
        if let Some(pattern) = &self.name {
            if !pattern.matches(entity.selector_name()) {
                return false;
            }
        }
        self.tags
            .iter()
            .all(|(key, value)| entity.selector_tag(key).as_deref() == Some(value.as_str()))
    }

    pub fn filter<'a, E: Selectable>(&'a self, entities: &'a [E]) -> impl Iterator<Item = &'a E> {
        entities.iter().filter(move |e| self.matches(*e))
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts: Vec<String> = Vec::new();
        if let Some(name) = &self.name {
            parts.push(name.as_str().to_string());
        }
        parts.extend(self.tags.iter().map(|(k, v)| format_tag(k, v)));
        if parts.is_empty() {
            f.write_str("*")
        } else {
            f.write_str(&parts.join(" "))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn agent(name: &str, tags: &[&str]) -> AgentSpec {
        let mut spec = AgentSpec::new(name);
        spec.tags = tags.iter().map(|t| t.to_string()).collect();
        spec
    }

    #[test]
    fn test_empty_selector_matches_everything() {
        let selector = Selector::all();
        assert!(selector.matches(&agent("anything", &[])));
        assert_eq!(selector.to_string(), "*");
    }

    #[test]
    fn test_tag_terms_are_conjunctive() {
        let selector = Selector::parse("role:support tier:1").unwrap();
        assert!(selector.matches(&agent("a", &["role:support", "tier:1"])));
        assert!(!selector.matches(&agent("b", &["role:support", "tier:2"])));
        assert!(!selector.matches(&agent("c", &["role:support"])));
    }

    #[test]
    fn test_absent_tag_never_matches() {
        let selector = Selector::parse("role:").unwrap();
        assert!(!selector.matches(&agent("a", &[])));
        assert!(selector.matches(&agent("b", &["role:"])));
    }

    #[test]
    fn test_name_glob() {
        let selector = Selector::parse("support-?").unwrap();
        assert!(selector.matches(&agent("support-1", &[])));
        assert!(!selector.matches(&agent("support-12", &[])));

        let selector = Selector::parse("support-* role:support").unwrap();
        assert!(selector.matches(&agent("support-eu", &["role:support"])));
        assert!(!selector.matches(&agent("billing-eu", &["role:support"])));
    }

    #[test]
    fn test_malformed_glob_is_validation_error() {
        assert!(matches!(
            Selector::parse("support-[").unwrap_err(),
            ValidationError::InvalidSelector(_)
        ));
        assert!(Selector::from_parts(Some("[a"), &[]).is_err());
    }

    #[test]
    fn test_two_name_patterns_rejected() {
        assert!(Selector::parse("a* b*").is_err());
    }

    #[test]
    fn test_from_parts_splits_comma_lists() {
        let selector =
            Selector::from_parts(None, &["role:support,tier:1".to_string()]).unwrap();
        assert_eq!(selector.tags().len(), 2);
    }
}
