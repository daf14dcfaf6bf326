//! Map helpers invoked by `path.Method()` field map entries.
//!
//! A helper receives the found value and the entity being populated. It
//! either returns a replacement value for normal assignment, or reports
//! that it handled the entity itself.
//!
//! Names are matched ignoring case and underscores, so a map line
//! `title.URLSegment()` finds the `url_segment` helper.

use serde_json::Value;
use std::collections::BTreeMap;

use crate::error::{QuaffError, QuaffResult};
use crate::field_map::FieldMapEntry;
use crate::models::Entity;

/// What a helper did with a value.
#[derive(Debug, Clone, PartialEq)]
pub enum HelperOutcome {
    /// Assign this value in place of the original.
    Value(Value),
    /// The helper updated the entity; skip assignment.
    Handled,
}

pub trait MapHelper: Send + Sync {
    fn name(&self) -> &str;

    fn apply(
        &self,
        value: Value,
        entry: &FieldMapEntry,
        entity: &mut Entity,
    ) -> QuaffResult<HelperOutcome>;
}

fn normalise(name: &str) -> String {
    name.chars()
        .filter(|c| *c != '_')
        .flat_map(char::to_lowercase)
        .collect()
}

/// Registry of map helpers keyed by normalised name.
pub struct HelperRegistry {
    helpers: BTreeMap<String, Box<dyn MapHelper>>,
}

impl Default for HelperRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl HelperRegistry {
    pub fn new() -> Self {
        Self {
            helpers: BTreeMap::new(),
        }
    }

    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(UrlSegment));
        registry.register(Box::new(StringCase::Lower));
        registry.register(Box::new(StringCase::Upper));
        registry.register(Box::new(Trim));
        registry
    }

    pub fn register(&mut self, helper: Box<dyn MapHelper>) {
        self.helpers.insert(normalise(helper.name()), helper);
    }

    pub fn get(&self, name: &str) -> Option<&dyn MapHelper> {
        self.helpers.get(&normalise(name)).map(|h| h.as_ref())
    }

    /// Run helper `method` over `value`.
    pub fn apply(
        &self,
        method: &str,
        value: Value,
        entry: &FieldMapEntry,
        entity: &mut Entity,
    ) -> QuaffResult<HelperOutcome> {
        let helper = self
            .get(method)
            .ok_or_else(|| QuaffError::Mapping(format!("unknown map helper '{}'", method)))?;
        helper.apply(value, entry, entity)
    }
}

fn as_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Lowercase, dash-separated slug.
pub struct UrlSegment;

impl UrlSegment {
    pub fn filter(text: &str) -> String {
        let mut out = String::with_capacity(text.len());
        let mut dash = false;
        for c in text.chars().flat_map(char::to_lowercase) {
            if c.is_alphanumeric() {
                if dash && !out.is_empty() {
                    out.push('-');
                }
                dash = false;
                out.push(c);
            } else {
                dash = true;
            }
        }
        out
    }
}

impl MapHelper for UrlSegment {
    fn name(&self) -> &str {
        "url_segment"
    }

    fn apply(&self, value: Value, _entry: &FieldMapEntry, _entity: &mut Entity) -> QuaffResult<HelperOutcome> {
        Ok(HelperOutcome::Value(match as_text(&value) {
            Some(text) => Value::String(Self::filter(&text)),
            None => value,
        }))
    }
}

pub enum StringCase {
    Lower,
    Upper,
}

impl MapHelper for StringCase {
    fn name(&self) -> &str {
        match self {
            StringCase::Lower => "lowercase",
            StringCase::Upper => "uppercase",
        }
    }

    fn apply(&self, value: Value, _entry: &FieldMapEntry, _entity: &mut Entity) -> QuaffResult<HelperOutcome> {
        Ok(HelperOutcome::Value(match value {
            Value::String(s) => Value::String(match self {
                StringCase::Lower => s.to_lowercase(),
                StringCase::Upper => s.to_uppercase(),
            }),
            other => other,
        }))
    }
}

pub struct Trim;

impl MapHelper for Trim {
    fn name(&self) -> &str {
        "trim"
    }

    fn apply(&self, value: Value, _entry: &FieldMapEntry, _entity: &mut Entity) -> QuaffResult<HelperOutcome> {
        Ok(HelperOutcome::Value(match value {
            Value::String(s) => Value::String(s.trim().to_string()),
            other => other,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field_map::decode_map;
    use serde_json::json;

    #[test]
    fn url_segment_filter() {
        assert_eq!(UrlSegment::filter("Hello, World!"), "hello-world");
        assert_eq!(UrlSegment::filter("  --A  b--  "), "a-b");
        assert_eq!(UrlSegment::filter("Ünïcode Title 2"), "ünïcode-title-2");
    }

    #[test]
    fn lookup_ignores_case_and_underscores() {
        let registry = HelperRegistry::with_builtins();
        assert!(registry.get("URLSegment").is_some());
        assert!(registry.get("url_segment").is_some());
        assert!(registry.get("UpperCase").is_some());
        assert!(registry.get("missing").is_none());
    }

    #[test]
    fn apply_builtins() {
        let registry = HelperRegistry::with_builtins();
        let entry = decode_map("title().URLSegment", "URLSegment");
        let mut entity = Entity::new("Page");
        let out = registry
            .apply("URLSegment", json!("My Page"), &entry, &mut entity)
            .unwrap();
        assert_eq!(out, HelperOutcome::Value(json!("my-page")));
        let out = registry.apply("trim", json!("  x "), &entry, &mut entity).unwrap();
        assert_eq!(out, HelperOutcome::Value(json!("x")));
        assert!(registry.apply("nope", json!(1), &entry, &mut entity).is_err());
    }
}
