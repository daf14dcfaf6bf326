//! Field map decoding.
//!
//! A model's `quaff_map` is a table of `dataPath = "modelPath"` lines. Each
//! line is decoded into a [`FieldMapEntry`] using these sigils:
//!
//! | Form | Meaning |
//! |------|---------|
//! | `=sku` (or `"=Sku"` on the model side) | foreign key, used to find an existing record |
//! | `tags[]` | tag list joined into `modelPath` with the tag delimiter |
//! | `name.URLSegment()` or `name().URLSegment` | value passed through the `URLSegment` helper |
//! | `Category.Code` (model side) | has-one lookup by `Code` on relation `Category` |
//!
//! Flags are independent; the mapper resolves them in the order
//! method, tag/array, relationship, plain field.

use globset::Glob;
use std::collections::BTreeMap;

use crate::config::ModelDef;
use crate::error::{QuaffError, QuaffResult};

/// One decoded field map line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldMapEntry {
    /// Source path; for method entries this is `path.Method` so two
    /// helpers over the same source stay distinct.
    pub data_path: String,
    /// Local field or relation name (first segment of a relationship).
    pub model_path: String,
    pub foreign_key: Option<String>,
    pub tag_field: Option<String>,
    pub method: Option<String>,
    /// Full `Relation.LookupField` when the model side is a relationship.
    pub relationship: Option<String>,
}

impl FieldMapEntry {
    /// Path to traverse in the remote payload.
    ///
    /// Method entries carry the helper name as their last segment, which is
    /// not part of the payload.
    pub fn source_path(&self, delimiter: &str) -> &str {
        match &self.method {
            Some(method) => self
                .data_path
                .strip_suffix(method.as_str())
                .and_then(|p| p.strip_suffix(delimiter))
                .unwrap_or(&self.data_path),
            None => &self.data_path,
        }
    }

    /// `(relation, lookup_field)` for relationship entries.
    pub fn relation_parts(&self, delimiter: &str) -> Option<(&str, &str)> {
        self.relationship
            .as_deref()
            .and_then(|r| r.split_once(delimiter))
    }
}

/// Decode a raw `(dataPath, modelPath)` pair using `.` as delimiter.
pub fn decode_map(data_path: &str, model_path: &str) -> FieldMapEntry {
    decode_map_with(data_path, model_path, ".")
}

/// Decode a raw `(dataPath, modelPath)` pair.
pub fn decode_map_with(data_path: &str, model_path: &str, delimiter: &str) -> FieldMapEntry {
    let mut data_path = data_path.to_string();
    let mut model_path = model_path.to_string();
    let mut foreign_key = None;
    let mut tag_field = None;
    let mut method = None;
    let mut relationship = None;

    // `id = "=ExternalId"` marks the same key from the model side.
    if let Some(rest) = model_path.strip_prefix('=') {
        model_path = rest.to_string();
        foreign_key = Some(data_path.clone());
    }

    if model_path.contains(delimiter) {
        relationship = Some(model_path.clone());
        if let Some(first) = model_path.split(delimiter).next() {
            model_path = first.to_string();
        }
    }

    if let Some(rest) = data_path.strip_prefix('=') {
        data_path = rest.to_string();
        foreign_key = Some(data_path.clone());
    }

    if let Some(rest) = data_path.strip_suffix("[]") {
        data_path = rest.to_string();
        tag_field = Some(model_path.clone());
    }

    if let Some(rest) = data_path.strip_suffix("()") {
        // path.Method()
        if let Some((path, name)) = rest.rsplit_once(delimiter) {
            method = Some(name.to_string());
            data_path = format!("{}{}{}", path, delimiter, name);
        }
    } else if let Some((path, name)) = data_path.split_once(&format!("(){}", delimiter)) {
        // path().Method
        method = Some(name.to_string());
        data_path = format!("{}{}{}", path, delimiter, name);
    }

    FieldMapEntry {
        data_path,
        model_path,
        foreign_key,
        tag_field,
        method,
        relationship,
    }
}

/// True when `alias` matches the glob `pattern`.
///
/// `{token}` placeholders in the alias are treated as `*` before matching.
pub fn match_alias(pattern: &str, alias: &str) -> bool {
    let normalised = replace_tokens_with_wildcard(alias);
    match Glob::new(pattern) {
        Ok(glob) => glob.compile_matcher().is_match(&normalised),
        Err(_) => pattern == alias,
    }
}

fn replace_tokens_with_wildcard(alias: &str) -> String {
    let mut out = String::with_capacity(alias.len());
    let mut rest = alias;
    while let Some(open) = rest.find('{') {
        match rest[open..].find('}') {
            Some(close) => {
                out.push_str(&rest[..open]);
                out.push('*');
                rest = &rest[open + close + 1..];
            }
            None => break,
        }
    }
    out.push_str(rest);
    out
}

/// Decoded field map for a model on one endpoint.
///
/// An exact alias key wins; otherwise the longest matching glob is used.
pub fn field_map_for(
    model_name: &str,
    model: &ModelDef,
    alias: &str,
    delimiter: &str,
) -> QuaffResult<Vec<FieldMapEntry>> {
    let raw = match model.quaff_map.get(alias) {
        Some(map) => Some(map),
        None => model
            .quaff_map
            .iter()
            .filter(|(pattern, _)| match_alias(pattern, alias))
            .max_by_key(|(pattern, _)| pattern.len())
            .map(|(_, map)| map),
    };

    let raw: &BTreeMap<String, String> = raw.ok_or_else(|| QuaffError::NoFieldMap {
        model: model_name.to_string(),
        alias: alias.to_string(),
    })?;

    Ok(raw
        .iter()
        .map(|(data_path, model_path)| decode_map_with(data_path, model_path, delimiter))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn foreign_key_sigil() {
        let e = decode_map("=sku", "Product");
        assert_eq!(e.foreign_key.as_deref(), Some("sku"));
        assert_eq!(e.data_path, "sku");
        assert_eq!(e.model_path, "Product");
        assert!(e.tag_field.is_none());
    }

    #[test]
    fn foreign_key_on_model_side() {
        let e = decode_map("id", "=ExternalId");
        assert_eq!(e.foreign_key.as_deref(), Some("id"));
        assert_eq!(e.data_path, "id");
        assert_eq!(e.model_path, "ExternalId");
    }

    #[test]
    fn tag_sigil() {
        let e = decode_map("tags[]", "Tags");
        assert_eq!(e.tag_field.as_deref(), Some("Tags"));
        assert_eq!(e.data_path, "tags");
    }

    #[test]
    fn method_sigil_both_forms() {
        let e = decode_map("name().URLSegment", "Slug");
        assert_eq!(e.method.as_deref(), Some("URLSegment"));
        assert_eq!(e.data_path, "name.URLSegment");
        assert_eq!(e.source_path("."), "name");

        let e = decode_map("title.URLSegment()", "Slug");
        assert_eq!(e.method.as_deref(), Some("URLSegment"));
        assert_eq!(e.data_path, "title.URLSegment");
        assert_eq!(e.source_path("."), "title");
    }

    #[test]
    fn relationship_model_path() {
        let e = decode_map("category", "Category.Code");
        assert_eq!(e.model_path, "Category");
        assert_eq!(e.relationship.as_deref(), Some("Category.Code"));
        assert_eq!(e.relation_parts("."), Some(("Category", "Code")));
    }

    #[test]
    fn combined_sigils() {
        let e = decode_map("=codes[]", "Codes");
        assert_eq!(e.foreign_key.as_deref(), Some("codes[]"));
        assert_eq!(e.tag_field.as_deref(), Some("Codes"));
        assert_eq!(e.data_path, "codes");
    }

    #[test]
    fn alias_matching() {
        assert!(match_alias("list:*", "list:entries"));
        assert!(match_alias("get:item/*", "get:item/{id}"));
        assert!(!match_alias("get:*", "list:entries"));
        assert!(match_alias("list:entries", "list:entries"));
    }

    #[test]
    fn field_map_lookup() {
        let mut model = ModelDef::default();
        let mut generic = BTreeMap::new();
        generic.insert("name".to_string(), "Name".to_string());
        let mut specific = BTreeMap::new();
        specific.insert("=id".to_string(), "ExternalId".to_string());
        model.quaff_map.insert("list:*".into(), generic);
        model.quaff_map.insert("list:items*".into(), specific);

        let map = field_map_for("Item", &model, "list:items", ".").unwrap();
        assert_eq!(map.len(), 1);
        assert_eq!(map[0].foreign_key.as_deref(), Some("id"));

        let map = field_map_for("Item", &model, "list:other", ".").unwrap();
        assert_eq!(map[0].model_path, "Name");

        let err = field_map_for("Item", &model, "get:x", ".").unwrap_err();
        assert!(matches!(err, QuaffError::NoFieldMap { .. }));
    }
}
