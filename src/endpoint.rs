//! Endpoint resolution and the sync loop.
//!
//! An alias such as `list:items` resolves to an [`EndpointConfig`] by
//! merging, in order:
//!
//! 1. defaults of the first api whose `service` globs claim the alias,
//! 2. `url`/`path` appended from every parent (recursively, in listed
//!    order) and then the endpoint itself,
//! 3. the endpoint's own settings,
//! 4. caller overrides.
//!
//! Aliases that are not configured but start with `url:` or `path:` are
//! pseudo-endpoints addressing the rest of the alias directly.
//!
//! # Sync pass
//!
//! ```text
//!  before_quaff hooks
//!        │
//!        ▼
//!  ┌─▶ next_page() ── update_query_parameters ── transport.get ──┐
//!  │                                                              │
//!  │   for each item: find_model / new ─▶ quaff ─▶ after_item ─▶ write
//!  │        (persistence errors recorded, pass continues)         │
//!  └──────────── while valid, not complete, not empty ◀───────────┘
//!        │
//!        ▼
//!  end_sync hooks ─▶ SyncReport ─▶ store.record_sync
//! ```

use regex::Regex;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::{AuthConfig, Config, EndpointDef, PaginationConfig, ParamSpec};
use crate::context::Quaff;
use crate::error::{QuaffError, QuaffResult};
use crate::field_map::{match_alias, FieldMapEntry};
use crate::hooks::{EndpointHook, HookContext};
use crate::mapper::{MapOptions, Mapper};
use crate::models::{Entity, ItemFailure, SyncOutcome, SyncReport};
use crate::progress::SyncProgressEvent;
use crate::response::{DecodeSpec, Response};
use crate::transport::{sanitise_uri, QueryParams, Transport, TransportContext};

const DEFAULT_FIELDS_KEY: &str = "fields";
const DEFAULT_FIELDS_DELIMITER: &str = ",";

/// Fully merged configuration of one endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct EndpointConfig {
    pub alias: String,
    /// Concatenated base url of parents and self.
    pub url: String,
    /// Concatenated path of parents and self.
    pub path: String,
    pub item_path: Option<String>,
    pub accept_type: Option<String>,
    pub model: Option<String>,
    /// Label of success responses.
    pub response: String,
    /// Label of error responses.
    pub error: String,
    pub transport: Option<String>,
    pub version: Option<String>,
    pub tokens: BTreeMap<String, String>,
    pub default_params: BTreeMap<String, BTreeMap<String, String>>,
    pub params: BTreeMap<String, ParamSpec>,
    /// Compiled `params` patterns.
    pub patterns: ParamPatterns,
    pub pagination: Option<PaginationConfig>,
    pub auth: Option<AuthConfig>,
    pub hooks: Vec<String>,
    pub fields_key: String,
    pub fields_delimiter: String,
}

/// Param validation regexes, compiled once per resolved endpoint.
#[derive(Debug, Clone, Default)]
pub struct ParamPatterns(BTreeMap<String, Regex>);

impl ParamPatterns {
    fn compile(params: &BTreeMap<String, ParamSpec>) -> QuaffResult<Self> {
        let mut compiled = BTreeMap::new();
        for (name, spec) in params {
            if let Some(pattern) = &spec.pattern {
                let re = Regex::new(pattern).map_err(|e| {
                    QuaffError::Config(format!("param '{}' pattern: {}", name, e))
                })?;
                compiled.insert(name.clone(), re);
            }
        }
        Ok(Self(compiled))
    }

    pub fn get(&self, name: &str) -> Option<&Regex> {
        self.0.get(name)
    }
}

impl PartialEq for ParamPatterns {
    fn eq(&self, other: &Self) -> bool {
        self.0.len() == other.0.len()
            && self
                .0
                .iter()
                .zip(&other.0)
                .all(|((a, ra), (b, rb))| a == b && ra.as_str() == rb.as_str())
    }
}

/// Join two url/path fragments with exactly one `/` between them.
pub fn join_fragments(base: &str, tail: &str) -> String {
    if base.is_empty() {
        return tail.to_string();
    }
    if tail.is_empty() {
        return base.to_string();
    }
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        tail.trim_start_matches('/')
    )
}

fn pseudo_endpoint(alias: &str) -> Option<EndpointDef> {
    if let Some(url) = alias.strip_prefix("url:").filter(|u| u.contains("://")) {
        return Some(EndpointDef {
            url: Some(url.to_string()),
            ..EndpointDef::default()
        });
    }
    alias.strip_prefix("path:").map(|path| EndpointDef {
        path: Some(path.to_string()),
        transport: Some("file".to_string()),
        ..EndpointDef::default()
    })
}

fn append_chain(
    config: &Config,
    alias: &str,
    visiting: &mut Vec<String>,
    url: &mut String,
    path: &mut String,
) -> QuaffResult<()> {
    if visiting.iter().any(|a| a == alias) {
        visiting.push(alias.to_string());
        return Err(QuaffError::Config(format!(
            "endpoint parents form a cycle: {}",
            visiting.join(" -> ")
        )));
    }
    let Some(def) = config.endpoints.get(alias) else {
        return Err(QuaffError::UnknownEndpoint(alias.to_string()));
    };
    visiting.push(alias.to_string());
    for parent in &def.parents {
        append_chain(config, parent, visiting, url, path)?;
    }
    visiting.pop();
    if let Some(u) = &def.url {
        *url = join_fragments(url, u);
    }
    if let Some(p) = &def.path {
        *path = join_fragments(path, p);
    }
    Ok(())
}

impl EndpointConfig {
    /// Resolve `alias` against `config`, applying `overrides` last.
    pub fn resolve(
        config: &Config,
        alias: &str,
        overrides: Option<&EndpointDef>,
    ) -> QuaffResult<Self> {
        let mut def = EndpointDef::default();
        if let Some(api) = config
            .apis
            .values()
            .find(|api| api.service.iter().any(|p| match_alias(p, alias)))
        {
            def.accept_type.clone_from(&api.accept_type);
            def.transport.clone_from(&api.transport);
            def.auth.clone_from(&api.auth);
            def.version.clone_from(&api.version);
        }

        let (mut url, mut path) = (String::new(), String::new());
        match config.endpoints.get(alias) {
            Some(own) => {
                append_chain(config, alias, &mut Vec::new(), &mut url, &mut path)?;
                def.overlay(own);
            }
            None => {
                let own = pseudo_endpoint(alias)
                    .ok_or_else(|| QuaffError::UnknownEndpoint(alias.to_string()))?;
                url = own.url.clone().unwrap_or_default();
                path = own.path.clone().unwrap_or_default();
                def.overlay(&own);
            }
        }
        def.url = Some(url);
        def.path = Some(path);
        if let Some(overrides) = overrides {
            def.overlay(overrides);
        }

        let patterns = ParamPatterns::compile(&def.params)?;
        Ok(Self {
            alias: alias.to_string(),
            url: def.url.unwrap_or_default(),
            path: def.path.unwrap_or_default(),
            item_path: def.item_path,
            accept_type: def.accept_type,
            model: def.model,
            response: def.response.unwrap_or_else(|| "ok".to_string()),
            error: def.error.unwrap_or_else(|| "error".to_string()),
            transport: def.transport,
            version: def.version,
            tokens: def.tokens,
            default_params: def.default_params,
            params: def.params,
            patterns,
            pagination: def.pagination,
            auth: def.auth,
            hooks: def.hooks,
            fields_key: def
                .fields_key
                .unwrap_or_else(|| DEFAULT_FIELDS_KEY.to_string()),
            fields_delimiter: def
                .fields_delimiter
                .unwrap_or_else(|| DEFAULT_FIELDS_DELIMITER.to_string()),
        })
    }

    /// Verb of the alias, the part before `:`.
    pub fn method(&self) -> &str {
        self.alias
            .split_once(':')
            .map(|(verb, _)| verb)
            .unwrap_or(&self.alias)
    }

    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    /// True when this endpoint's alias matches the glob `pattern`.
    pub fn matches(&self, pattern: &str) -> bool {
        match_alias(pattern, &self.alias)
    }

    /// Request URI with `{token}` placeholders substituted.
    ///
    /// `{version}` resolves to the endpoint version; unknown tokens are left
    /// in place.
    pub fn uri(&self) -> String {
        let mut uri = join_fragments(&self.url, &self.path);
        for (name, value) in &self.tokens {
            uri = uri.replace(&format!("{{{}}}", name), value);
        }
        if let Some(version) = &self.version {
            uri = uri.replace("{version}", version);
        }
        uri
    }

    /// Default parameters for this verb overlaid with `caller`, validated
    /// against the `params` specs.
    pub fn query_params(&self, caller: &QueryParams) -> QuaffResult<QueryParams> {
        let mut query = self
            .default_params
            .get(self.method())
            .cloned()
            .unwrap_or_default();
        query.extend(caller.iter().map(|(k, v)| (k.clone(), v.clone())));

        for (name, spec) in &self.params {
            match query.get(name) {
                None if spec.required => {
                    return Err(QuaffError::InvalidParam {
                        name: name.clone(),
                        reason: "required parameter missing".to_string(),
                    });
                }
                Some(value) => {
                    if let Some(re) = self.patterns.get(name) {
                        if !re.is_match(value) {
                            return Err(QuaffError::InvalidParam {
                                name: name.clone(),
                                reason: format!("'{}' does not match '{}'", value, re.as_str()),
                            });
                        }
                    }
                }
                None => {}
            }
        }
        Ok(query)
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Cancellation
// ═══════════════════════════════════════════════════════════════════════

/// Cancel flag and optional deadline shared with a running pass.
#[derive(Debug, Clone, Default)]
pub struct SyncControl {
    cancelled: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl SyncControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Control whose passes are cancelled once `timeout` has elapsed.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            cancelled: Arc::default(),
            deadline: Some(Instant::now() + timeout),
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
            || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    pub fn check(&self) -> QuaffResult<()> {
        if self.is_cancelled() {
            Err(QuaffError::Cancelled)
        } else {
            Ok(())
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Pagination
// ═══════════════════════════════════════════════════════════════════════

/// Pull-based page iterator.
///
/// Each call to [`Pages::next_page`] lets the hooks adjust the query, then
/// fetches one page. Iteration ends after an error response, a complete
/// response, or a page with no items.
pub struct Pages<'e> {
    transport: Box<dyn Transport>,
    uri: String,
    query: QueryParams,
    hooks: &'e [Box<dyn EndpointHook>],
    ctx: &'e HookContext<'e>,
    fetched: u64,
    done: bool,
}

impl Pages<'_> {
    /// Pages fetched so far.
    pub fn fetched(&self) -> u64 {
        self.fetched
    }

    pub fn query(&self) -> &QueryParams {
        &self.query
    }

    pub async fn next_page(&mut self) -> QuaffResult<Option<Response>> {
        if self.done {
            return Ok(None);
        }
        for hook in self.hooks {
            hook.update_query_parameters(self.ctx, &mut self.query);
        }
        let response = match self.transport.get(&self.uri, &self.query).await {
            Ok(response) => response,
            Err(e) => {
                self.done = true;
                return Err(e);
            }
        };
        self.fetched += 1;

        let empty = matches!(response.item_count(), Ok(0));
        if !response.is_valid() || response.is_complete() || empty {
            self.done = true;
        }
        Ok(Some(response))
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Endpoint
// ═══════════════════════════════════════════════════════════════════════

/// A resolved endpoint bound to a [`Quaff`] context.
pub struct Endpoint<'q> {
    quaff: &'q Quaff,
    config: Arc<EndpointConfig>,
    params: QueryParams,
    template: Option<Entity>,
}

impl<'q> Endpoint<'q> {
    pub fn new(quaff: &'q Quaff, config: Arc<EndpointConfig>) -> Self {
        Self {
            quaff,
            config,
            params: QueryParams::new(),
            template: None,
        }
    }

    /// Caller-supplied query parameters; these win over defaults.
    pub fn with_params(mut self, params: QueryParams) -> Self {
        self.params = params;
        self
    }

    /// Entity whose mapped values `model_filter` sends as query parameters.
    pub fn with_template(mut self, template: Entity) -> Self {
        self.template = Some(template);
        self
    }

    pub fn config(&self) -> &EndpointConfig {
        &self.config
    }

    pub fn alias(&self) -> &str {
        &self.config.alias
    }

    pub fn auth(&self) -> Option<&AuthConfig> {
        self.config.auth.as_ref()
    }

    pub fn model(&self) -> QuaffResult<&str> {
        self.config
            .model
            .as_deref()
            .ok_or_else(|| QuaffError::NoModelClass(self.config.alias.clone()))
    }

    pub fn create_empty_model(&self) -> QuaffResult<Entity> {
        Ok(Entity::new(self.model()?))
    }

    pub fn mapper(&self) -> Mapper<'q> {
        let config = self.quaff.config();
        Mapper::new(
            &config.models,
            self.quaff.store(),
            self.quaff.helpers(),
            self.config.alias.clone(),
        )
        .with_codec(self.quaff.codec().clone())
        .with_tag_delimiter(config.mapper.tag_delimiter.clone())
    }

    /// Field map of the endpoint model on this alias.
    pub fn field_map(&self) -> QuaffResult<Vec<FieldMapEntry>> {
        self.mapper().field_map(self.model()?)
    }

    pub fn transport_context(&self) -> TransportContext {
        let settings = &self.quaff.config().transport;
        let mut ctx = TransportContext::new(self.config.alias.clone(), settings.clone());
        ctx.accept_type.clone_from(&self.config.accept_type);
        ctx.auth.clone_from(&self.config.auth);
        ctx.pagination.clone_from(&self.config.pagination);
        ctx.decode = DecodeSpec {
            signatures: self.quaff.config().content_types.clone(),
            item_path: self.config.item_path.clone(),
            codec: self.quaff.codec().clone(),
            // a pager that cannot advance would refetch the same page forever
            page_length: self
                .config
                .pagination
                .as_ref()
                .filter(|p| p.advances())
                .and_then(|p| p.length),
        };
        ctx.response_label.clone_from(&self.config.response);
        ctx.error_label.clone_from(&self.config.error);
        ctx
    }

    pub fn transport(&self) -> QuaffResult<Box<dyn Transport>> {
        self.quaff
            .transports()
            .factory(self.config.transport.as_deref(), &self.transport_context())
    }

    /// Existing record matching the payload's foreign-key fields.
    ///
    /// The payload is mapped into a throwaway entity (own fields only) and
    /// the store is filtered on the key fields. Only a unique match counts.
    pub async fn find_model(
        &self,
        api_data: &Value,
        map: &[FieldMapEntry],
    ) -> QuaffResult<Option<Entity>> {
        let keys: Vec<&FieldMapEntry> = map.iter().filter(|e| e.foreign_key.is_some()).collect();
        if keys.is_empty() {
            return Ok(None);
        }
        let mut template = self.create_empty_model()?;
        self.mapper()
            .quaff(api_data, &mut template, map, MapOptions::own_fields_only())
            .await?;

        let mut filters = Vec::with_capacity(keys.len());
        for entry in keys {
            // has-one keys land in `<Rel>ID` once the related record is found
            let field = match (&entry.tag_field, &entry.relationship) {
                (Some(tag), _) => tag.clone(),
                (None, Some(_)) => format!("{}ID", entry.model_path),
                (None, None) => entry.model_path.clone(),
            };
            match template.get(&field) {
                Some(value) if !value.is_null() => filters.push((field, value)),
                _ => return Ok(None),
            }
        }

        let mut found = self
            .quaff
            .store()
            .find(&template.model, &filters)
            .await
            .map_err(QuaffError::Persistence)?;
        if found.len() > 1 {
            tracing::warn!(alias = %self.alias(), matches = found.len(), "foreign key matches several records, creating new");
            return Ok(None);
        }
        Ok(found.pop())
    }

    fn hook_context<'a>(
        &'a self,
        map: &'a [FieldMapEntry],
    ) -> HookContext<'a> {
        HookContext {
            config: &self.config,
            store: self.quaff.store(),
            field_map: map,
            path_delimiter: self.quaff.codec().delimiter(),
            caller_params: &self.params,
            template: self.template.as_ref(),
        }
    }

    fn pages<'e>(
        &self,
        hooks: &'e [Box<dyn EndpointHook>],
        ctx: &'e HookContext<'e>,
    ) -> QuaffResult<Pages<'e>> {
        Ok(Pages {
            transport: self.transport()?,
            uri: self.config.uri(),
            query: self.config.query_params(&self.params)?,
            hooks,
            ctx,
            fetched: 0,
            done: false,
        })
    }

    /// Fetch the first page only, without mapping.
    pub async fn fetch(&self) -> QuaffResult<Response> {
        let hooks = self.quaff.hooks().build(&self.config)?;
        let map = match self.config.model {
            Some(_) => self.field_map().unwrap_or_default(),
            None => Vec::new(),
        };
        let ctx = self.hook_context(&map);
        let mut pages = self.pages(&hooks, &ctx)?;
        pages
            .next_page()
            .await?
            .ok_or_else(|| QuaffError::UnknownEndpoint(self.alias().to_string()))
    }

    /// Run one full pass and report its outcome.
    ///
    /// Never returns an error: failures end up in the report, which is also
    /// handed to [`EntityStore::record_sync`](crate::store::EntityStore::record_sync).
    pub async fn sync(&self, control: &SyncControl) -> SyncReport {
        let alias = self.alias().to_string();
        let mut report = SyncReport::start(&alias);
        tracing::info!(alias = %alias, uri = %sanitise_uri(&self.config.uri()), "sync started");

        let result = self.run_pass(control, &mut report).await;
        let report = match result {
            Ok(()) => report.finish(SyncOutcome::Ok, None),
            Err(QuaffError::Cancelled) => {
                tracing::warn!(alias = %alias, written = report.written, "sync cancelled");
                report.finish(SyncOutcome::Cancelled, Some(QuaffError::Cancelled.to_string()))
            }
            Err(e) => {
                tracing::error!(alias = %alias, error = %e, written = report.written, "sync failed");
                report.finish(SyncOutcome::Failed, Some(e.to_string()))
            }
        };

        tracing::info!(
            alias = %alias,
            outcome = report.outcome.as_str(),
            pages = report.pages,
            written = report.written,
            failed = report.failures.len(),
            "sync finished"
        );
        self.quaff.progress().report(SyncProgressEvent::Finished {
            alias: alias.clone(),
            written: report.written,
            failed: report.failures.len() as u64,
        });
        if let Err(e) = self.quaff.store().record_sync(&report).await {
            tracing::warn!(alias = %alias, error = %e, "failed to record sync report");
        }
        report
    }

    async fn run_pass(&self, control: &SyncControl, report: &mut SyncReport) -> QuaffResult<()> {
        control.check()?;
        let hooks = self.quaff.hooks().build(&self.config)?;
        let map = self.field_map()?;
        let ctx = self.hook_context(&map);
        let mapper = self.mapper();
        let options = self.quaff.options();

        for hook in &hooks {
            hook.before_quaff(&ctx).await?;
        }

        let mut pages = self.pages(&hooks, &ctx)?;
        let mut index = 0usize;
        loop {
            control.check()?;
            self.quaff.progress().report(SyncProgressEvent::Fetching {
                alias: self.alias().to_string(),
                page: pages.fetched() + 1,
            });
            let Some(response) = pages.next_page().await? else {
                break;
            };
            report.pages += 1;

            if response.is_error() {
                return Err(QuaffError::transport(
                    &response.meta().uri,
                    format!(
                        "{} response {}: {}",
                        response.label(),
                        response.result_code(),
                        response.result_message()
                    ),
                ));
            }

            let items = response.items()?;
            if items.is_empty() {
                tracing::debug!(alias = %self.alias(), page = pages.fetched(), "no items, caught up");
                break;
            }
            let total = items.len() as u64;
            for (n, item) in items.iter().enumerate() {
                control.check()?;
                match self.quaff_item(&mapper, item, &map, &hooks, &ctx, options).await {
                    Ok(()) => report.written += 1,
                    Err(e) if !e.is_fatal_for_pass() => {
                        tracing::warn!(alias = %self.alias(), index, error = %e, "item skipped");
                        report.failures.push(ItemFailure {
                            index,
                            reason: e.to_string(),
                        });
                    }
                    Err(e) => return Err(e),
                }
                index += 1;
                self.quaff.progress().report(SyncProgressEvent::Mapping {
                    alias: self.alias().to_string(),
                    n: n as u64 + 1,
                    total,
                });
            }
        }

        for hook in &hooks {
            hook.end_sync(&ctx, report).await?;
        }
        Ok(())
    }

    async fn quaff_item(
        &self,
        mapper: &Mapper<'_>,
        item: &Value,
        map: &[FieldMapEntry],
        hooks: &[Box<dyn EndpointHook>],
        ctx: &HookContext<'_>,
        options: MapOptions,
    ) -> QuaffResult<()> {
        let mut entity = match self.find_model(item, map).await? {
            Some(existing) => existing,
            None => self.create_empty_model()?,
        };
        mapper.quaff(item, &mut entity, map, options).await?;
        for hook in hooks {
            hook.after_item(ctx, &mut entity).await?;
        }
        self.quaff
            .store()
            .write(&mut entity)
            .await
            .map_err(QuaffError::Persistence)?;
        tracing::debug!(alias = %self.alias(), model = %entity.model, id = ?entity.id, "item written");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_config;
    use crate::store::memory::InMemoryStore;

    const CONFIG: &str = r#"
[apis.example]
service = ["list:*", "get:*"]
accept_type = "application/json"
version = "v2"

[endpoints."url:example"]
url = "https://api.example.com/"

[endpoints."url:versioned"]
parents = ["url:example"]
path = "{version}"

[endpoints."list:items"]
parents = ["url:versioned"]
url = "/api"
path = "/items"
item_path = "data.items"
model = "Item"
default_params = { list = { sort = "name" }, get = { other = "x" } }
params = { q = [false, "^[a-z]+$"] }

[endpoints."get:item"]
parents = ["url:example"]
path = "/items/{id}"
tokens = { id = "42" }
params = { expand = { required = true } }

[models.Item]
"#;

    #[test]
    fn parents_concatenate_in_order() {
        let config = parse_config(
            r#"
[endpoints.e1]
url = "https://api.example.com"

[endpoints.e2]
parents = ["e1"]
url = "/v1/items"
"#,
        )
        .unwrap();
        let e2 = EndpointConfig::resolve(&config, "e2", None).unwrap();
        assert_eq!(e2.url, "https://api.example.com/v1/items");
        assert_eq!(e2.uri(), "https://api.example.com/v1/items");
    }

    #[test]
    fn resolve_merges_api_parents_and_self() {
        let config = parse_config(CONFIG).unwrap();
        let items = EndpointConfig::resolve(&config, "list:items", None).unwrap();
        assert_eq!(items.url, "https://api.example.com/api");
        assert_eq!(items.path, "{version}/items");
        assert_eq!(items.accept_type.as_deref(), Some("application/json"));
        assert_eq!(items.version(), Some("v2"));
        assert_eq!(items.method(), "list");
        assert_eq!(
            items.uri(),
            "https://api.example.com/api/v2/items"
        );
        assert!(items.matches("list:*"));
        assert_eq!(items.fields_key, "fields");
    }

    #[test]
    fn overrides_win() {
        let config = parse_config(CONFIG).unwrap();
        let overrides = EndpointDef {
            url: Some("https://other".into()),
            model: Some("Other".into()),
            ..EndpointDef::default()
        };
        let items = EndpointConfig::resolve(&config, "list:items", Some(&overrides)).unwrap();
        assert_eq!(items.url, "https://other");
        assert_eq!(items.model.as_deref(), Some("Other"));
        assert_eq!(items.item_path.as_deref(), Some("data.items"));
    }

    #[test]
    fn tokens_substitute() {
        let config = parse_config(CONFIG).unwrap();
        let item = EndpointConfig::resolve(&config, "get:item", None).unwrap();
        assert_eq!(item.uri(), "https://api.example.com/items/42");
    }

    #[test]
    fn pseudo_and_unknown_aliases() {
        let config = parse_config(CONFIG).unwrap();
        let url = EndpointConfig::resolve(&config, "url:https://x.test/feed", None).unwrap();
        assert_eq!(url.uri(), "https://x.test/feed");
        let path = EndpointConfig::resolve(&config, "path:/data/items.json", None).unwrap();
        assert_eq!(path.uri(), "/data/items.json");
        assert_eq!(path.transport.as_deref(), Some("file"));

        let err = EndpointConfig::resolve(&config, "list:missing", None).unwrap_err();
        assert!(matches!(err, QuaffError::UnknownEndpoint(_)));
    }

    #[test]
    fn parent_cycle_is_config_error() {
        let config = parse_config(
            r#"
[endpoints.a]
parents = ["b"]
[endpoints.b]
parents = ["a"]
"#,
        )
        .unwrap();
        let err = EndpointConfig::resolve(&config, "a", None).unwrap_err();
        assert!(matches!(err, QuaffError::Config(ref m) if m.contains("a -> b -> a")));
    }

    #[test]
    fn query_params_merge_and_validate() {
        let config = parse_config(CONFIG).unwrap();
        let items = EndpointConfig::resolve(&config, "list:items", None).unwrap();

        let q = items.query_params(&QueryParams::new()).unwrap();
        assert_eq!(q.get("sort").map(String::as_str), Some("name"));
        assert!(!q.contains_key("other"));

        let caller = QueryParams::from([
            ("sort".to_string(), "date".to_string()),
            ("q".to_string(), "abc".to_string()),
        ]);
        let q = items.query_params(&caller).unwrap();
        assert_eq!(q["sort"], "date");

        let bad = QueryParams::from([("q".to_string(), "ABC1".to_string())]);
        let err = items.query_params(&bad).unwrap_err();
        assert!(matches!(err, QuaffError::InvalidParam { ref name, .. } if name == "q"));

        let item = EndpointConfig::resolve(&config, "get:item", None).unwrap();
        let err = item.query_params(&QueryParams::new()).unwrap_err();
        assert!(matches!(err, QuaffError::InvalidParam { .. }));
    }

    #[test]
    fn param_patterns_compile_at_resolve() {
        let config = parse_config(CONFIG).unwrap();
        let items = EndpointConfig::resolve(&config, "list:items", None).unwrap();
        assert_eq!(items.patterns.get("q").map(Regex::as_str), Some("^[a-z]+$"));

        let overrides = EndpointDef {
            params: BTreeMap::from([(
                "q".to_string(),
                ParamSpec {
                    required: false,
                    pattern: Some("(".to_string()),
                },
            )]),
            ..EndpointDef::default()
        };
        let err = EndpointConfig::resolve(&config, "list:items", Some(&overrides)).unwrap_err();
        assert!(err.is_config_error());
    }

    #[test]
    fn join_fragments_single_slash() {
        assert_eq!(join_fragments("https://a/", "/b"), "https://a/b");
        assert_eq!(join_fragments("", "/b"), "/b");
        assert_eq!(join_fragments("a", ""), "a");
    }

    #[test]
    fn control_cancel_and_deadline() {
        let control = SyncControl::new();
        assert!(control.check().is_ok());
        let shared = control.clone();
        shared.cancel();
        assert!(matches!(control.check(), Err(QuaffError::Cancelled)));

        let expired = SyncControl::with_timeout(Duration::ZERO);
        assert!(expired.is_cancelled());
    }

    #[tokio::test]
    async fn find_model_by_has_one_key() {
        let config = parse_config(
            r#"
[endpoints."list:items"]
url = "https://x/items"
model = "Item"

[models.Item]
fields = ["Name"]
has_one = { Category = "Category" }

[models.Item.quaff_map."list:*"]
"=cat" = "Category.Code"
name = "Name"

[models.Category]
fields = ["Code"]
"#,
        )
        .unwrap();
        let quaff = Quaff::new(config, std::sync::Arc::new(InMemoryStore::new())).unwrap();
        let mut category = Entity::new("Category");
        category.set("Code", serde_json::json!("c1"));
        quaff.store().write(&mut category).await.unwrap();
        let mut existing = Entity::new("Item");
        existing.set("CategoryID", serde_json::json!(category.id));
        quaff.store().write(&mut existing).await.unwrap();

        let endpoint = quaff.endpoint("list:items").unwrap();
        let map = endpoint.field_map().unwrap();
        let found = endpoint
            .find_model(&serde_json::json!({"cat": "c1", "name": "A"}), &map)
            .await
            .unwrap();
        assert_eq!(found.and_then(|e| e.id), existing.id);

        let missing = endpoint
            .find_model(&serde_json::json!({"cat": "c2"}), &map)
            .await
            .unwrap();
        assert!(missing.is_none());
    }
}
