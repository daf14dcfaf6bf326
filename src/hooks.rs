//! Endpoint hooks.
//!
//! Hooks are strategy objects invoked at fixed points of an endpoint pass:
//!
//! ```text
//!   before_quaff ──▶ ┌ update_query_parameters ──▶ fetch page ┐
//!                    │        after_item (per item, pre-write) │ ×pages
//!                    └─────────────────────────────────────────┘
//!                ──▶ end_sync
//! ```
//!
//! Endpoints list hook keys in their `hooks` config; the [`HookRegistry`]
//! builds a fresh instance per pass, so hooks may keep per-pass state.
//!
//! | Key | Effect |
//! |-----|--------|
//! | `delete_existing` | delete every record of the endpoint model first |
//! | `orderable` | stamp items with an increasing `QuaffedOrder` |
//! | `pager` | page number / length query parameters |
//! | `field_list` | `fields=a,b,c` from the field map |
//! | `model_filter` | template entity values as query parameters |
//! | `last_sync` | stamp `QuaffLastSyncDateTime` |

use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

use crate::config::PaginationConfig;
use crate::endpoint::EndpointConfig;
use crate::error::{QuaffError, QuaffResult};
use crate::field_map::FieldMapEntry;
use crate::models::{Entity, SyncReport};
use crate::store::EntityStore;
use crate::transport::QueryParams;

pub const ORDER_FIELD: &str = "QuaffedOrder";
pub const LAST_SYNC_FIELD: &str = "QuaffLastSyncDateTime";

/// What a hook can see of the running pass.
pub struct HookContext<'a> {
    pub config: &'a EndpointConfig,
    pub store: &'a dyn EntityStore,
    /// Field map of the endpoint model.
    pub field_map: &'a [FieldMapEntry],
    pub path_delimiter: &'a str,
    /// Parameters supplied by the caller; these win over hook parameters.
    pub caller_params: &'a QueryParams,
    /// Entity whose values filter the query, if any.
    pub template: Option<&'a Entity>,
}

impl HookContext<'_> {
    pub fn model(&self) -> QuaffResult<&str> {
        self.config
            .model
            .as_deref()
            .ok_or_else(|| QuaffError::NoModelClass(self.config.alias.clone()))
    }
}

#[async_trait]
pub trait EndpointHook: Send + Sync {
    fn name(&self) -> &str;

    /// Runs once before the first page is requested.
    async fn before_quaff(&self, _ctx: &HookContext<'_>) -> QuaffResult<()> {
        Ok(())
    }

    /// Runs before every page request.
    fn update_query_parameters(&self, _ctx: &HookContext<'_>, _query: &mut QueryParams) {}

    /// Runs for every mapped item, before it is written.
    async fn after_item(&self, _ctx: &HookContext<'_>, _entity: &mut Entity) -> QuaffResult<()> {
        Ok(())
    }

    /// Runs once after the last page.
    async fn end_sync(&self, _ctx: &HookContext<'_>, _report: &SyncReport) -> QuaffResult<()> {
        Ok(())
    }
}

pub type HookFactory =
    Box<dyn Fn(&EndpointConfig) -> QuaffResult<Box<dyn EndpointHook>> + Send + Sync>;

/// Hook factories keyed by name.
pub struct HookRegistry {
    factories: BTreeMap<String, HookFactory>,
}

impl Default for HookRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl HookRegistry {
    pub fn new() -> Self {
        Self {
            factories: BTreeMap::new(),
        }
    }

    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("delete_existing", Box::new(stateless::<DeleteExisting>));
        registry.register("orderable", Box::new(stateless::<Orderable>));
        registry.register("pager", Box::new(Pager::build));
        registry.register("field_list", Box::new(stateless::<FieldList>));
        registry.register("model_filter", Box::new(stateless::<ModelFilter>));
        registry.register("last_sync", Box::new(stateless::<LastSync>));
        registry
    }

    pub fn register(&mut self, key: impl Into<String>, factory: HookFactory) {
        self.factories.insert(key.into(), factory);
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }

    /// Build the hooks for one pass, in configured order.
    ///
    /// `pager` is added at the end when the endpoint paginates and does not
    /// list it.
    pub fn build(&self, config: &EndpointConfig) -> QuaffResult<Vec<Box<dyn EndpointHook>>> {
        let mut keys: Vec<&str> = config.hooks.iter().map(String::as_str).collect();
        if config.pagination.is_some() && !keys.contains(&"pager") {
            keys.push("pager");
        }
        keys.into_iter()
            .map(|key| {
                let factory = self.factories.get(key).ok_or_else(|| {
                    QuaffError::Config(format!(
                        "endpoint '{}' uses unknown hook '{}'",
                        config.alias, key
                    ))
                })?;
                factory(config)
            })
            .collect()
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Built-in hooks
// ═══════════════════════════════════════════════════════════════════════

fn stateless<H: EndpointHook + Default + 'static>(
    _config: &EndpointConfig,
) -> QuaffResult<Box<dyn EndpointHook>> {
    Ok(Box::new(H::default()))
}

#[derive(Default)]
pub struct DeleteExisting;

#[async_trait]
impl EndpointHook for DeleteExisting {
    fn name(&self) -> &str {
        "delete_existing"
    }

    async fn before_quaff(&self, ctx: &HookContext<'_>) -> QuaffResult<()> {
        let model = ctx.model()?;
        let removed = ctx
            .store
            .delete_all(model)
            .await
            .map_err(QuaffError::Persistence)?;
        tracing::info!(alias = %ctx.config.alias, model, removed, "deleted existing records");
        Ok(())
    }
}

/// Keeps import order in `QuaffedOrder`, continuing after the highest
/// existing value.
#[derive(Default)]
pub struct Orderable {
    order: AtomicI64,
}

#[async_trait]
impl EndpointHook for Orderable {
    fn name(&self) -> &str {
        "orderable"
    }

    async fn before_quaff(&self, ctx: &HookContext<'_>) -> QuaffResult<()> {
        let existing = ctx
            .store
            .find(ctx.model()?, &[])
            .await
            .map_err(QuaffError::Persistence)?;
        let max = existing
            .iter()
            .filter_map(|e| e.get(ORDER_FIELD).and_then(|v| v.as_i64()))
            .max()
            .unwrap_or(0);
        self.order.store(max, Ordering::SeqCst);
        Ok(())
    }

    async fn after_item(&self, _ctx: &HookContext<'_>, entity: &mut Entity) -> QuaffResult<()> {
        let next = self.order.fetch_add(1, Ordering::SeqCst) + 1;
        entity.set(ORDER_FIELD, Value::from(next));
        Ok(())
    }
}

/// Page number pagination.
///
/// The first request uses `start` (default 1) unless the caller already set
/// the page; every later request increments it. `length_var` is always sent.
pub struct Pager {
    pagination: PaginationConfig,
    started: AtomicBool,
}

impl Pager {
    pub fn build(config: &EndpointConfig) -> QuaffResult<Box<dyn EndpointHook>> {
        let pagination = config.pagination.clone().ok_or_else(|| {
            QuaffError::Config(format!(
                "endpoint '{}' uses pager without pagination settings",
                config.alias
            ))
        })?;
        Ok(Box::new(Self::new(pagination)))
    }

    pub fn new(pagination: PaginationConfig) -> Self {
        Self {
            pagination,
            started: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl EndpointHook for Pager {
    fn name(&self) -> &str {
        "pager"
    }

    fn update_query_parameters(&self, _ctx: &HookContext<'_>, query: &mut QueryParams) {
        let first = !self.started.swap(true, Ordering::SeqCst);
        if let Some(page_var) = &self.pagination.page_var {
            let start = self.pagination.start_page();
            let current = query.get(page_var).and_then(|p| p.parse::<u64>().ok());
            let page = match (first, current) {
                (true, Some(page)) => page,
                (true, None) => start,
                (false, Some(page)) => page.saturating_add(1),
                (false, None) => start,
            };
            query.insert(page_var.clone(), page.to_string());
        }
        if let (Some(length_var), Some(length)) = (&self.pagination.length_var, self.pagination.length) {
            query.insert(length_var.clone(), length.to_string());
        }
    }
}

/// `fields=a,b,c` listing the first segment of each mapped data path.
#[derive(Default)]
pub struct FieldList;

#[async_trait]
impl EndpointHook for FieldList {
    fn name(&self) -> &str {
        "field_list"
    }

    fn update_query_parameters(&self, ctx: &HookContext<'_>, query: &mut QueryParams) {
        let mut names: Vec<&str> = Vec::new();
        for entry in ctx.field_map {
            let source = entry.source_path(ctx.path_delimiter);
            if let Some(first) = source.split(ctx.path_delimiter).find(|s| !s.is_empty()) {
                if !names.contains(&first) {
                    names.push(first);
                }
            }
        }
        if !names.is_empty() {
            query.insert(
                ctx.config.fields_key.clone(),
                names.join(&ctx.config.fields_delimiter),
            );
        }
    }
}

/// Adds template field values for mapped fields as `dataPath=value`.
#[derive(Default)]
pub struct ModelFilter;

#[async_trait]
impl EndpointHook for ModelFilter {
    fn name(&self) -> &str {
        "model_filter"
    }

    fn update_query_parameters(&self, ctx: &HookContext<'_>, query: &mut QueryParams) {
        let Some(template) = ctx.template else {
            return;
        };
        for entry in ctx.field_map {
            if entry.method.is_some() || entry.relationship.is_some() {
                continue;
            }
            let name = entry.source_path(ctx.path_delimiter);
            if ctx.caller_params.contains_key(name) {
                continue;
            }
            let text = match template.get(&entry.model_path) {
                Some(Value::String(s)) => s.trim().to_string(),
                Some(Value::Number(n)) => n.to_string(),
                Some(Value::Bool(b)) => b.to_string(),
                _ => continue,
            };
            if !text.is_empty() {
                query.insert(name.to_string(), text);
            }
        }
    }
}

#[derive(Default)]
pub struct LastSync;

#[async_trait]
impl EndpointHook for LastSync {
    fn name(&self) -> &str {
        "last_sync"
    }

    async fn after_item(&self, _ctx: &HookContext<'_>, entity: &mut Entity) -> QuaffResult<()> {
        entity.set(LAST_SYNC_FIELD, Value::String(chrono::Utc::now().to_rfc2822()));
        Ok(())
    }
}
