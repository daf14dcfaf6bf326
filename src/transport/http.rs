//! HTTP transport backed by `reqwest`.

use async_trait::async_trait;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use std::time::Duration;

use super::{
    is_remote, make_response, sanitise_uri, QueryParams, ResponseCodeTable, Transport,
    TransportContext,
};
use crate::config::AuthConfig;
use crate::error::{QuaffError, QuaffResult};
use crate::response::{Response, ResponseMeta};

pub struct HttpTransport {
    client: reqwest::Client,
    ctx: TransportContext,
    codes: ResponseCodeTable,
}

impl HttpTransport {
    /// Factory registered under the `http` key.
    pub fn build(ctx: &TransportContext) -> QuaffResult<Box<dyn Transport>> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(ctx.settings.timeout_secs))
            .user_agent(ctx.settings.user_agent.clone())
            .build()
            .map_err(|e| QuaffError::BadTransport {
                name: "http".to_string(),
                reason: e.to_string(),
            })?;
        let codes = ResponseCodeTable::new(&ctx.settings.response_code_decode)?;
        Ok(Box::new(Self {
            client,
            ctx: ctx.clone(),
            codes,
        }))
    }
}

#[async_trait]
impl Transport for HttpTransport {
    fn name(&self) -> &str {
        "http"
    }

    async fn get(&self, uri: &str, query: &QueryParams) -> QuaffResult<Response> {
        let safe_uri = sanitise_uri(uri);
        if !is_remote(uri, &self.ctx.settings.remote_schemes) {
            return Err(QuaffError::transport(
                safe_uri,
                "not a remote uri for the http transport",
            ));
        }

        let mut request = self.client.get(uri).query(query);
        if let Some(accept) = &self.ctx.accept_type {
            request = request.header(ACCEPT, accept.to_ascii_lowercase());
        }
        request = match &self.ctx.auth {
            Some(AuthConfig::Basic { username, password }) => {
                request.basic_auth(username, Some(password))
            }
            Some(AuthConfig::Bearer { bearer }) => request.bearer_auth(bearer),
            None => request,
        };

        tracing::debug!(alias = %self.ctx.alias, uri = %safe_uri, ?query, "GET");
        let resp = request
            .send()
            .await
            .map_err(|e| QuaffError::transport(&safe_uri, e))?;

        let status = resp.status();
        let content_types = resp
            .headers()
            .get_all(CONTENT_TYPE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .map(str::to_string)
            .collect();
        let meta = ResponseMeta {
            result_code: status.as_u16().to_string(),
            result_message: if status.is_success() {
                String::new()
            } else {
                status.canonical_reason().unwrap_or_default().to_string()
            },
            content_types,
            content_length: resp.content_length(),
            uri: safe_uri.clone(),
        };

        let body = resp
            .bytes()
            .await
            .map_err(|e| QuaffError::transport(&safe_uri, e))?
            .to_vec();
        tracing::trace!(alias = %self.ctx.alias, bytes = body.len(), "response body");

        Ok(make_response(&self.ctx, &self.codes, meta, body))
    }
}
