//! Outcome of one transport fetch.
//!
//! A [`Response`] is either `Ok` or `Error`. Both carry normalised metadata
//! and the raw body; items are decoded on first access and cached.

use serde_json::Value;
use std::sync::OnceLock;

use crate::config::ContentTypesConfig;
use crate::decode::{decode_items, resolve_content_kind};
use crate::error::QuaffResult;
use crate::path::PathCodec;

pub const RESULT_MESSAGE_OK: &str = "OK";
pub const RESULT_MESSAGE_FAILED: &str = "Failed (no message available)";

/// Normalised response metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResponseMeta {
    /// Native status, e.g. `"200"` for HTTP.
    pub result_code: String,
    pub result_message: String,
    /// All reported content types, in header order.
    pub content_types: Vec<String>,
    pub content_length: Option<u64>,
    /// Sanitised URI that produced this response.
    pub uri: String,
}

/// How a response body is turned into items.
#[derive(Debug, Clone)]
pub struct DecodeSpec {
    pub signatures: ContentTypesConfig,
    pub item_path: Option<String>,
    pub codec: PathCodec,
    /// Page length when the endpoint paginates; a shorter page completes.
    pub page_length: Option<u64>,
}

impl Default for DecodeSpec {
    fn default() -> Self {
        Self {
            signatures: ContentTypesConfig::default(),
            item_path: None,
            codec: PathCodec::default(),
            page_length: None,
        }
    }
}

#[derive(Debug)]
pub struct ResponseBody {
    /// Label of the configured response kind (endpoint `response`/`error`).
    pub label: String,
    pub meta: ResponseMeta,
    pub body: Vec<u8>,
    decode: DecodeSpec,
    items: OnceLock<Vec<Value>>,
}

/// One fetched page.
#[derive(Debug)]
pub enum Response {
    Ok(ResponseBody),
    Error(ResponseBody),
}

impl Response {
    pub fn ok(label: impl Into<String>, meta: ResponseMeta, body: Vec<u8>, decode: DecodeSpec) -> Self {
        Response::Ok(ResponseBody::new(label, meta, body, decode))
    }

    pub fn error(
        label: impl Into<String>,
        meta: ResponseMeta,
        body: Vec<u8>,
        decode: DecodeSpec,
    ) -> Self {
        Response::Error(ResponseBody::new(label, meta, body, decode))
    }

    fn inner(&self) -> &ResponseBody {
        match self {
            Response::Ok(b) | Response::Error(b) => b,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Response::Error(_))
    }

    pub fn is_valid(&self) -> bool {
        !self.is_error()
    }

    pub fn meta(&self) -> &ResponseMeta {
        &self.inner().meta
    }

    pub fn label(&self) -> &str {
        &self.inner().label
    }

    pub fn body(&self) -> &[u8] {
        &self.inner().body
    }

    pub fn result_code(&self) -> &str {
        &self.inner().meta.result_code
    }

    pub fn result_message(&self) -> &str {
        let message = &self.inner().meta.result_message;
        if !message.is_empty() {
            message
        } else if self.is_error() {
            RESULT_MESSAGE_FAILED
        } else {
            RESULT_MESSAGE_OK
        }
    }

    /// Decoded items, cached after the first successful decode.
    ///
    /// Error responses have no items.
    pub fn items(&self) -> QuaffResult<&[Value]> {
        let inner = match self {
            Response::Ok(b) => b,
            Response::Error(_) => return Ok(&[]),
        };
        if let Some(items) = inner.items.get() {
            return Ok(items);
        }
        let decoded = inner.decode_body()?;
        Ok(inner.items.get_or_init(|| decoded))
    }

    pub fn item_count(&self) -> QuaffResult<usize> {
        self.items().map(<[Value]>::len)
    }

    /// True when no further pages should be requested.
    ///
    /// Without pagination every response is complete. With pagination a
    /// page shorter than the configured length is the last one.
    pub fn is_complete(&self) -> bool {
        let Response::Ok(inner) = self else {
            return true;
        };
        match inner.decode.page_length {
            None => true,
            Some(length) => match self.item_count() {
                Ok(count) => (count as u64) < length,
                Err(_) => true,
            },
        }
    }
}

impl ResponseBody {
    fn new(label: impl Into<String>, meta: ResponseMeta, body: Vec<u8>, decode: DecodeSpec) -> Self {
        Self {
            label: label.into(),
            meta,
            body,
            decode,
            items: OnceLock::new(),
        }
    }

    fn decode_body(&self) -> QuaffResult<Vec<Value>> {
        let kind = resolve_content_kind(&self.meta.content_types, &self.decode.signatures)?;
        decode_items(
            kind,
            &self.body,
            self.decode.item_path.as_deref(),
            &self.decode.codec,
        )
    }
}
