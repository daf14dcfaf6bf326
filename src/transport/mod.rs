//! Pluggable transports.
//!
//! A transport performs one native fetch and turns the result into a
//! [`Response`]. Backends are registered by key in a [`TransportRegistry`];
//! an endpoint names the key it wants and the registry falls back through
//! the configured default and fallback keys when construction fails.
//!
//! ```text
//! endpoint.transport ──▶ transport.default ──▶ transport.fallback
//!        │ build ok            │ build ok             │ build ok
//!        ▼                     ▼                      ▼
//!                     Box<dyn Transport>
//! ```
//!
//! | Key | Backend |
//! |-----|---------|
//! | `http` | [`http::HttpTransport`] (reqwest) |
//! | `file` | [`file::FileTransport`] (local files under `transport.root`) |

pub mod file;
pub mod http;

use async_trait::async_trait;
use globset::{Glob, GlobMatcher};
use std::collections::BTreeMap;

use crate::config::{AuthConfig, CodeDecode, CodeOutcome, PaginationConfig, TransportConfig};
use crate::error::{QuaffError, QuaffResult};
use crate::response::{DecodeSpec, Response, ResponseMeta, RESULT_MESSAGE_OK};

/// Query parameters; later merges overwrite earlier keys.
pub type QueryParams = BTreeMap<String, String>;

/// Everything a backend needs from the endpoint it serves.
#[derive(Debug, Clone)]
pub struct TransportContext {
    pub alias: String,
    pub settings: TransportConfig,
    pub accept_type: Option<String>,
    pub auth: Option<AuthConfig>,
    pub pagination: Option<PaginationConfig>,
    pub decode: DecodeSpec,
    /// Label for success responses (endpoint `response`).
    pub response_label: String,
    /// Label for error responses (endpoint `error`).
    pub error_label: String,
}

impl TransportContext {
    pub fn new(alias: impl Into<String>, settings: TransportConfig) -> Self {
        Self {
            alias: alias.into(),
            settings,
            accept_type: None,
            auth: None,
            pagination: None,
            decode: DecodeSpec::default(),
            response_label: "ok".to_string(),
            error_label: "error".to_string(),
        }
    }
}

/// A native fetch backend.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Registry key of this backend.
    fn name(&self) -> &str;

    /// Fetch `uri` with `query` and classify the result.
    ///
    /// Network-level failures return [`QuaffError::Transport`]; they never
    /// produce a `Response`.
    async fn get(&self, uri: &str, query: &QueryParams) -> QuaffResult<Response>;
}

/// Builds a transport for an endpoint, or explains why it cannot.
pub type TransportFactory =
    Box<dyn Fn(&TransportContext) -> QuaffResult<Box<dyn Transport>> + Send + Sync>;

/// Registry of transport factories keyed by name.
pub struct TransportRegistry {
    factories: BTreeMap<String, TransportFactory>,
}

impl Default for TransportRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl TransportRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            factories: BTreeMap::new(),
        }
    }

    /// Registry with the `http` and `file` backends.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("http", Box::new(http::HttpTransport::build));
        registry.register("file", Box::new(file::FileTransport::build));
        registry
    }

    /// Register (or replace) a factory under `key`.
    pub fn register(&mut self, key: impl Into<String>, factory: TransportFactory) {
        self.factories.insert(key.into(), factory);
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }

    fn build(&self, key: &str, ctx: &TransportContext) -> QuaffResult<Box<dyn Transport>> {
        let factory = self
            .factories
            .get(key)
            .ok_or_else(|| QuaffError::BadTransport {
                name: key.to_string(),
                reason: "no such transport registered".to_string(),
            })?;
        factory(ctx)
    }

    /// Build the requested transport, else the default, else the fallback.
    pub fn factory(
        &self,
        requested: Option<&str>,
        ctx: &TransportContext,
    ) -> QuaffResult<Box<dyn Transport>> {
        let default = ctx.settings.default.as_str();
        let fallback = ctx.settings.fallback.as_str();
        let candidates = [requested.unwrap_or(""), default, fallback];

        for key in candidates.into_iter().filter(|k| !k.is_empty()) {
            match self.build(key, ctx) {
                Ok(transport) => {
                    tracing::debug!(alias = %ctx.alias, transport = key, "transport selected");
                    return Ok(transport);
                }
                Err(e) => {
                    tracing::warn!(alias = %ctx.alias, transport = key, error = %e, "transport unusable, trying next");
                }
            }
        }

        Err(QuaffError::NoTransportAvailable {
            requested: requested.unwrap_or("").to_string(),
            default: default.to_string(),
            fallback: fallback.to_string(),
        })
    }
}

/// Ordered wildcard table classifying native result codes.
///
/// The first matching pattern wins; unmatched codes are errors.
pub struct ResponseCodeTable {
    rows: Vec<(GlobMatcher, CodeOutcome)>,
}

impl ResponseCodeTable {
    pub fn new(rows: &[CodeDecode]) -> QuaffResult<Self> {
        let rows = rows
            .iter()
            .map(|row| {
                Glob::new(&row.pattern)
                    .map(|g| (g.compile_matcher(), row.outcome))
                    .map_err(|e| {
                        QuaffError::Config(format!(
                            "invalid response code pattern '{}': {}",
                            row.pattern, e
                        ))
                    })
            })
            .collect::<QuaffResult<Vec<_>>>()?;
        Ok(Self { rows })
    }

    pub fn classify(&self, code: &str) -> CodeOutcome {
        self.rows
            .iter()
            .find(|(matcher, _)| matcher.is_match(code))
            .map(|(_, outcome)| *outcome)
            .unwrap_or(CodeOutcome::Error)
    }
}

/// Build an ok or error response for a native result.
///
/// Error responses without a native message carry the (truncated) body
/// text as their result message.
pub fn make_response(
    ctx: &TransportContext,
    table: &ResponseCodeTable,
    mut meta: ResponseMeta,
    body: Vec<u8>,
) -> Response {
    match table.classify(&meta.result_code) {
        CodeOutcome::Ok => {
            if meta.result_message.is_empty() {
                meta.result_message = RESULT_MESSAGE_OK.to_string();
            }
            Response::ok(ctx.response_label.clone(), meta, body, ctx.decode.clone())
        }
        CodeOutcome::Error => {
            if meta.result_message.is_empty() {
                meta.result_message = String::from_utf8_lossy(&body).chars().take(200).collect();
            }
            Response::error(ctx.error_label.clone(), meta, body, ctx.decode.clone())
        }
    }
}

/// True when `uri` starts with one of the configured remote schemes.
pub fn is_remote(uri: &str, remote_schemes: &[String]) -> bool {
    let lower = uri.to_ascii_lowercase();
    remote_schemes
        .iter()
        .any(|scheme| lower.starts_with(&scheme.to_ascii_lowercase()))
}

/// Strip credentials from a URI before it is logged or reported.
pub fn sanitise_uri(uri: &str) -> String {
    match url::Url::parse(uri) {
        Ok(mut parsed) => {
            if parsed.password().is_some() {
                let _ = parsed.set_password(None);
            }
            if !parsed.username().is_empty() {
                let _ = parsed.set_username("");
            }
            parsed.to_string()
        }
        Err(_) => uri.to_string(),
    }
}
