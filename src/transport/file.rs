//! Local file transport.
//!
//! Serves `path:` endpoints from disk. Paths starting with `/` are taken
//! relative to `transport.root`, as are bare relative paths; with
//! `restrict_to_root` anything resolving outside the root is refused.
//!
//! When the endpoint paginates and the file holds a JSON array, the
//! window for the requested page (1-based) is sliced out.

use async_trait::async_trait;
use serde_json::Value;
use std::path::{Path, PathBuf};

use super::{
    is_remote, make_response, sanitise_uri, QueryParams, ResponseCodeTable, Transport,
    TransportContext,
};
use crate::error::{QuaffError, QuaffResult};
use crate::response::{Response, ResponseMeta};

const PAGE_START_OFFSET: u64 = 1;

pub struct FileTransport {
    ctx: TransportContext,
    codes: ResponseCodeTable,
}

impl FileTransport {
    /// Factory registered under the `file` key.
    pub fn build(ctx: &TransportContext) -> QuaffResult<Box<dyn Transport>> {
        if !ctx.settings.root.is_dir() {
            return Err(QuaffError::BadTransport {
                name: "file".to_string(),
                reason: format!("root '{}' is not a directory", ctx.settings.root.display()),
            });
        }
        let codes = ResponseCodeTable::new(&ctx.settings.response_code_decode)?;
        Ok(Box::new(Self {
            ctx: ctx.clone(),
            codes,
        }))
    }

    /// Resolve `uri` to a file under the configured root.
    fn safe_path(&self, uri: &str) -> QuaffResult<PathBuf> {
        let settings = &self.ctx.settings;
        if is_remote(uri, &settings.remote_schemes) {
            return Err(QuaffError::transport(
                sanitise_uri(uri),
                "remote file requested from the local file transport",
            ));
        }

        let without_scheme = uri.strip_prefix("file://").unwrap_or(uri);
        let without_query = without_scheme
            .split_once('?')
            .map(|(p, _)| p)
            .unwrap_or(without_scheme);
        let relative = without_query.trim_start_matches('/');
        let candidate = settings.root.join(relative);

        let resolved = candidate
            .canonicalize()
            .map_err(|_| QuaffError::transport(uri, format!("no such file: '{}'", candidate.display())))?;

        if settings.restrict_to_root {
            let root = settings
                .root
                .canonicalize()
                .map_err(|e| QuaffError::transport(uri, e))?;
            if !resolved.starts_with(&root) {
                return Err(QuaffError::transport(
                    uri,
                    format!("path '{}' is not under the root", resolved.display()),
                ));
            }
        }
        if !resolved.is_file() {
            return Err(QuaffError::transport(
                uri,
                format!("no such file: '{}'", resolved.display()),
            ));
        }
        Ok(resolved)
    }

    /// Slice a page window out of a JSON array body.
    fn page_window(&self, body: Vec<u8>, query: &QueryParams, uri: &str) -> QuaffResult<Vec<u8>> {
        let Some(pagination) = &self.ctx.pagination else {
            return Ok(body);
        };
        let page = pagination
            .page_var
            .as_ref()
            .and_then(|var| query.get(var))
            .and_then(|v| v.parse::<u64>().ok());
        let length = pagination
            .length_var
            .as_ref()
            .and_then(|var| query.get(var))
            .and_then(|v| v.parse::<u64>().ok());
        let (Some(page), Some(length)) = (page, length) else {
            return Ok(body);
        };

        let items: Value =
            serde_json::from_slice(&body).map_err(|e| QuaffError::transport(uri, e))?;
        let Value::Array(items) = items else {
            return Ok(body);
        };
        let start = page.saturating_sub(PAGE_START_OFFSET).saturating_mul(length) as usize;
        let window: Vec<Value> = items
            .into_iter()
            .skip(start)
            .take(length as usize)
            .collect();
        serde_json::to_vec(&window).map_err(|e| QuaffError::transport(uri, e))
    }
}

#[async_trait]
impl Transport for FileTransport {
    fn name(&self) -> &str {
        "file"
    }

    async fn get(&self, uri: &str, query: &QueryParams) -> QuaffResult<Response> {
        let path = self.safe_path(uri)?;
        let body = tokio::fs::read(&path)
            .await
            .map_err(|e| QuaffError::transport(uri, e))?;
        if body.is_empty() {
            return Err(QuaffError::transport(
                uri,
                format!("empty or bad file '{}', no data", path.display()),
            ));
        }

        let content_type = detect_content_type(&path);
        let body = if content_type == "application/json" {
            self.page_window(body, query, uri)?
        } else {
            body
        };
        tracing::debug!(alias = %self.ctx.alias, path = %path.display(), bytes = body.len(), "read file");

        let meta = ResponseMeta {
            result_code: "200".to_string(),
            result_message: String::new(),
            content_types: vec![content_type.to_string()],
            content_length: Some(body.len() as u64),
            uri: path.display().to_string(),
        };
        Ok(make_response(&self.ctx, &self.codes, meta, body))
    }
}

fn detect_content_type(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()) {
        Some("json") => "application/json",
        Some("xml" | "rss" | "atom") => "application/xml",
        Some("html" | "htm") => "text/html",
        Some("xhtml") => "application/xhtml+xml",
        _ => "text/plain",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PaginationConfig, TransportConfig};

    fn ctx_for(root: &Path) -> TransportContext {
        let mut settings = TransportConfig::default();
        settings.root = root.to_path_buf();
        TransportContext::new("path:test", settings)
    }

    #[tokio::test]
    async fn reads_json_file() {
        let tmp = tempfile::TempDir::new().unwrap();
        std::fs::write(tmp.path().join("items.json"), r#"[{"id":1},{"id":2}]"#).unwrap();
        let transport = FileTransport::build(&ctx_for(tmp.path())).unwrap();
        let r = transport.get("/items.json", &QueryParams::new()).await.unwrap();
        assert!(r.is_valid());
        assert_eq!(r.meta().content_types, vec!["application/json"]);
        assert_eq!(r.item_count().unwrap(), 2);
    }

    #[tokio::test]
    async fn slices_pages() {
        let tmp = tempfile::TempDir::new().unwrap();
        std::fs::write(tmp.path().join("items.json"), "[1,2,3,4,5]").unwrap();
        let mut ctx = ctx_for(tmp.path());
        ctx.pagination = Some(PaginationConfig {
            start: Some(1),
            length: Some(2),
            page_var: Some("page".into()),
            length_var: Some("per_page".into()),
        });
        let transport = FileTransport::build(&ctx).unwrap();

        let mut query = QueryParams::new();
        query.insert("per_page".into(), "2".into());
        query.insert("page".into(), "2".into());
        let r = transport.get("items.json", &query).await.unwrap();
        assert_eq!(r.body(), b"[3,4]");

        query.insert("page".into(), "4".into());
        let r = transport.get("items.json", &query).await.unwrap();
        assert_eq!(r.item_count().unwrap(), 0);
    }

    #[tokio::test]
    async fn refuses_escape_from_root() {
        let outer = tempfile::TempDir::new().unwrap();
        let root = outer.path().join("root");
        std::fs::create_dir(&root).unwrap();
        std::fs::write(outer.path().join("secret.json"), "[]").unwrap();
        let transport = FileTransport::build(&ctx_for(&root)).unwrap();
        let err = transport
            .get("../secret.json", &QueryParams::new())
            .await
            .err()
            .unwrap();
        assert!(err.to_string().contains("not under the root"));
    }

    #[tokio::test]
    async fn missing_and_empty_files() {
        let tmp = tempfile::TempDir::new().unwrap();
        std::fs::write(tmp.path().join("empty.json"), "").unwrap();
        let transport = FileTransport::build(&ctx_for(tmp.path())).unwrap();
        assert!(transport.get("nope.json", &QueryParams::new()).await.is_err());
        assert!(transport.get("empty.json", &QueryParams::new()).await.is_err());
        assert!(transport
            .get("https://example.com/x.json", &QueryParams::new())
            .await
            .is_err());
    }

    #[test]
    fn missing_root_is_bad_transport() {
        let ctx = ctx_for(Path::new("/definitely/not/here"));
        assert!(matches!(
            FileTransport::build(&ctx).err(),
            Some(QuaffError::BadTransport { .. })
        ));
    }
}
