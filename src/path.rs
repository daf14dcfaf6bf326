//! Delimited path access into nested JSON values.
//!
//! A path such as `data.items.0` walks maps by key. A purely numeric
//! segment indexes into an array and ends the walk: whatever sits at that
//! index is the result, remaining segments are ignored. A field literally
//! named `"123"` is therefore indistinguishable from an index.

use serde_json::{Map, Value};

/// Path reader/writer bound to a delimiter.
#[derive(Debug, Clone)]
pub struct PathCodec {
    delimiter: String,
}

impl Default for PathCodec {
    fn default() -> Self {
        Self::new(".")
    }
}

impl PathCodec {
    pub fn new(delimiter: impl Into<String>) -> Self {
        Self {
            delimiter: delimiter.into(),
        }
    }

    pub fn delimiter(&self) -> &str {
        &self.delimiter
    }

    fn segments<'a>(&'a self, path: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        path.split(self.delimiter.as_str()).filter(|s| !s.is_empty())
    }

    /// Resolve `path` inside `data`.
    ///
    /// Returns `None` as soon as a segment is missing; partial results are
    /// never returned. An empty path resolves to `data` itself.
    pub fn traverse<'v>(&self, path: &str, data: &'v Value) -> Option<&'v Value> {
        let mut current = data;
        for segment in self.segments(path) {
            if is_index(segment) {
                return match current {
                    Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
                    Value::Object(map) => map.get(segment),
                    _ => None,
                };
            }
            current = current.as_object()?.get(segment)?;
        }
        Some(current)
    }

    /// Write `value` at `path` inside `data`, creating intermediate maps.
    ///
    /// Existing values are never overwritten: if the leaf or an
    /// intermediate node is already populated with something that is not a
    /// map, the write is dropped and `false` is returned.
    pub fn build(&self, path: &str, value: Value, data: &mut Value) -> bool {
        let segments: Vec<&str> = self.segments(path).collect();
        let Some((leaf, parents)) = segments.split_last() else {
            return false;
        };

        if data.is_null() {
            *data = Value::Object(Map::new());
        }
        let mut current = data;
        for segment in parents {
            let Value::Object(map) = current else {
                return false;
            };
            current = map
                .entry(segment.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
        }

        let Value::Object(map) = current else {
            return false;
        };
        match map.get(*leaf) {
            Some(existing) if !existing.is_null() => false,
            _ => {
                map.insert(leaf.to_string(), value);
                true
            }
        }
    }
}

fn is_index(segment: &str) -> bool {
    segment.bytes().all(|b| b.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn traverse_nested() {
        let codec = PathCodec::default();
        let data = json!({"data": {"items": [{"id": 1}, {"id": 2}]}});
        assert_eq!(
            codec.traverse("data.items", &data),
            Some(&json!([{"id": 1}, {"id": 2}]))
        );
        assert_eq!(codec.traverse("data", &data).map(Value::is_object), Some(true));
    }

    #[test]
    fn traverse_missing_segment() {
        let codec = PathCodec::default();
        let data = json!({"a": {"x": 1}});
        assert_eq!(codec.traverse("a.b.c", &data), None);
        assert_eq!(codec.traverse("a.x.y", &data), None);
    }

    #[test]
    fn numeric_segment_is_a_leaf() {
        let codec = PathCodec::default();
        let data = json!({"items": [{"id": 1}, {"id": 2}]});
        assert_eq!(codec.traverse("items.1", &data), Some(&json!({"id": 2})));
        // remaining segments after an index are ignored
        assert_eq!(codec.traverse("items.1.id", &data), Some(&json!({"id": 2})));
        assert_eq!(codec.traverse("items.9", &data), None);
    }

    #[test]
    fn empty_segments_skipped() {
        let codec = PathCodec::default();
        let data = json!({"a": {"b": true}});
        assert_eq!(codec.traverse(".a..b.", &data), Some(&json!(true)));
        assert_eq!(codec.traverse("", &data), Some(&data));
    }

    #[test]
    fn custom_delimiter() {
        let codec = PathCodec::new("/");
        let data = json!({"a": {"b.c": 3}});
        assert_eq!(codec.traverse("a/b.c", &data), Some(&json!(3)));
    }

    #[test]
    fn build_then_traverse() {
        let codec = PathCodec::default();
        for (path, value) in [
            ("name", json!("A")),
            ("meta.author.name", json!("fred")),
            ("tags", json!(["x", "y"])),
        ] {
            let mut data = json!({});
            assert!(codec.build(path, value.clone(), &mut data));
            assert_eq!(codec.traverse(path, &data), Some(&value));
        }
    }

    #[test]
    fn build_does_not_overwrite() {
        let codec = PathCodec::default();
        let mut data = json!({"a": {"b": 1}});
        assert!(!codec.build("a.b", json!(2), &mut data));
        assert!(!codec.build("a.b.c", json!(2), &mut data));
        assert!(codec.build("a.c", json!(3), &mut data));
        assert_eq!(data, json!({"a": {"b": 1, "c": 3}}));
    }
}
