//! Content-type resolution and response body decoding.
//!
//! A response may report several content types. The first logical type
//! (`json`, `xml`, `html`) with a signature that is a case-insensitive
//! prefix of any candidate wins. Each type decodes into a list of JSON
//! items; malformed input is always an error, never "no items".

use serde_json::Value;

use crate::config::ContentTypesConfig;
use crate::error::{QuaffError, QuaffResult};
use crate::path::PathCodec;
use crate::xml;

/// Logical content type of a response body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentKind {
    Json,
    Xml,
    Html,
}

impl ContentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentKind::Json => "json",
            ContentKind::Xml => "xml",
            ContentKind::Html => "html",
        }
    }
}

impl std::fmt::Display for ContentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resolve candidate content types against the configured signatures.
pub fn resolve_content_kind(
    candidates: &[String],
    signatures: &ContentTypesConfig,
) -> QuaffResult<ContentKind> {
    let table = [
        (ContentKind::Json, &signatures.json),
        (ContentKind::Xml, &signatures.xml),
        (ContentKind::Html, &signatures.html),
    ];
    for (kind, sigs) in table {
        for sig in sigs.iter() {
            let sig = sig.to_ascii_lowercase();
            if candidates
                .iter()
                .any(|c| c.trim().to_ascii_lowercase().starts_with(&sig))
            {
                return Ok(kind);
            }
        }
    }
    Err(QuaffError::UnknownContentType(candidates.join(", ")))
}

/// Decode `body` and return the items found at `item_path`.
///
/// For JSON the item path is a delimited path; for XML/HTML it is an XPath
/// subset. Without an item path, a JSON array body yields its elements and
/// the children of an XML root element are the items.
pub fn decode_items(
    kind: ContentKind,
    body: &[u8],
    item_path: Option<&str>,
    codec: &PathCodec,
) -> QuaffResult<Vec<Value>> {
    match kind {
        ContentKind::Json => decode_json(body, item_path, codec),
        ContentKind::Xml | ContentKind::Html => decode_markup(kind, body, item_path),
    }
}

fn decode_json(body: &[u8], item_path: Option<&str>, codec: &PathCodec) -> QuaffResult<Vec<Value>> {
    let decoded: Value =
        serde_json::from_slice(body).map_err(|e| QuaffError::decode("json", e))?;
    if decoded.is_null() {
        return Err(QuaffError::decode("json", "empty input"));
    }

    let items = match item_path.filter(|p| !p.is_empty()) {
        Some(path) => codec
            .traverse(path, &decoded)
            .ok_or_else(|| QuaffError::ItemPathNotFound(path.to_string()))?,
        None => &decoded,
    };

    Ok(match items {
        Value::Array(items) => items.clone(),
        Value::Null => Vec::new(),
        single => vec![single.clone()],
    })
}

fn decode_markup(kind: ContentKind, body: &[u8], item_path: Option<&str>) -> QuaffResult<Vec<Value>> {
    let text = std::str::from_utf8(body).map_err(|e| QuaffError::decode(kind.as_str(), e))?;
    let root = xml::parse(text, kind == ContentKind::Html)
        .map_err(|e| QuaffError::decode(kind.as_str(), e))?;

    let selected = match item_path.filter(|p| !p.is_empty()) {
        Some(xpath) => root.select(xpath),
        None => root.items(),
    };
    Ok(selected.into_iter().map(xml::Element::to_value).collect())
}
