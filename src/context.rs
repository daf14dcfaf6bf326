//! The explicit runtime context.
//!
//! A [`Quaff`] is built once per process from a [`Config`] and an entity
//! store. It owns the transport, hook, and helper registries, the progress
//! reporter, and the alias → [`EndpointConfig`] memo. Endpoints and apis
//! borrow it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::config::{Config, EndpointDef};
use crate::endpoint::{Endpoint, EndpointConfig};
use crate::error::{QuaffError, QuaffResult};
use crate::helpers::HelperRegistry;
use crate::hooks::HookRegistry;
use crate::mapper::MapOptions;
use crate::path::PathCodec;
use crate::progress::{NoProgress, SyncProgressReporter};
use crate::store::EntityStore;
use crate::transport::TransportRegistry;

pub struct Quaff {
    config: Config,
    store: Arc<dyn EntityStore>,
    transports: TransportRegistry,
    hooks: HookRegistry,
    helpers: HelperRegistry,
    progress: Box<dyn SyncProgressReporter>,
    options: MapOptions,
    codec: PathCodec,
    endpoints: Mutex<HashMap<String, Arc<EndpointConfig>>>,
}

impl Quaff {
    /// Build a context with the built-in registries and no progress output.
    pub fn new(config: Config, store: Arc<dyn EntityStore>) -> QuaffResult<Self> {
        let options = MapOptions::from_names(config.mapper.options.iter().map(String::as_str))
            .ok_or_else(|| {
                QuaffError::Config(format!("unknown mapper option in {:?}", config.mapper.options))
            })?;
        let codec = PathCodec::new(config.mapper.path_delimiter.clone());
        Ok(Self {
            config,
            store,
            transports: TransportRegistry::with_builtins(),
            hooks: HookRegistry::with_builtins(),
            helpers: HelperRegistry::with_builtins(),
            progress: Box::new(NoProgress),
            options,
            codec,
            endpoints: Mutex::new(HashMap::new()),
        })
    }

    pub fn with_progress(mut self, progress: Box<dyn SyncProgressReporter>) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_options(mut self, options: MapOptions) -> Self {
        self.options = options;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &dyn EntityStore {
        self.store.as_ref()
    }

    pub fn transports(&self) -> &TransportRegistry {
        &self.transports
    }

    pub fn transports_mut(&mut self) -> &mut TransportRegistry {
        &mut self.transports
    }

    pub fn hooks(&self) -> &HookRegistry {
        &self.hooks
    }

    pub fn hooks_mut(&mut self) -> &mut HookRegistry {
        &mut self.hooks
    }

    pub fn helpers(&self) -> &HelperRegistry {
        &self.helpers
    }

    pub fn helpers_mut(&mut self) -> &mut HelperRegistry {
        &mut self.helpers
    }

    pub fn progress(&self) -> &dyn SyncProgressReporter {
        self.progress.as_ref()
    }

    pub fn options(&self) -> MapOptions {
        self.options
    }

    pub fn codec(&self) -> &PathCodec {
        &self.codec
    }

    /// Endpoint for `alias`; the resolved configuration is memoised.
    pub fn endpoint(&self, alias: &str) -> QuaffResult<Endpoint<'_>> {
        let mut cache = self.endpoints.lock().unwrap_or_else(|e| e.into_inner());
        let config = match cache.get(alias) {
            Some(config) => Arc::clone(config),
            None => {
                let config = Arc::new(EndpointConfig::resolve(&self.config, alias, None)?);
                cache.insert(alias.to_string(), Arc::clone(&config));
                config
            }
        };
        Ok(Endpoint::new(self, config))
    }

    /// Endpoint for `alias` with caller overrides; never memoised.
    pub fn endpoint_with(&self, alias: &str, overrides: &EndpointDef) -> QuaffResult<Endpoint<'_>> {
        let config = EndpointConfig::resolve(&self.config, alias, Some(overrides))?;
        Ok(Endpoint::new(self, Arc::new(config)))
    }

    /// First configured endpoint for `model` whose verb is `action`.
    pub fn endpoint_for_model(&self, model: &str, action: &str) -> QuaffResult<Endpoint<'_>> {
        let alias = self
            .config
            .endpoints
            .iter()
            .find(|(alias, def)| {
                def.model.as_deref() == Some(model)
                    && alias.split_once(':').map(|(verb, _)| verb) == Some(action)
            })
            .map(|(alias, _)| alias.clone())
            .ok_or_else(|| QuaffError::UnknownEndpoint(format!("{}:{}", action, model)))?;
        self.endpoint(&alias)
    }

    /// Configured endpoint aliases, sorted.
    pub fn aliases(&self) -> impl Iterator<Item = &str> {
        self.config.endpoints.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_config;
    use crate::store::memory::InMemoryStore;

    fn quaff() -> Quaff {
        let config = parse_config(
            r#"
[endpoints."list:items"]
url = "https://x/items"
model = "Item"

[endpoints."get:item"]
url = "https://x/items/{id}"
model = "Item"

[models.Item]
"#,
        )
        .unwrap();
        Quaff::new(config, Arc::new(InMemoryStore::new())).unwrap()
    }

    #[test]
    fn endpoint_is_memoised() {
        let q = quaff();
        let a = q.endpoint("list:items").unwrap();
        let b = q.endpoint("list:items").unwrap();
        assert!(std::ptr::eq(a.config(), b.config()));
        assert!(q.endpoint("list:nope").is_err());
    }

    #[test]
    fn endpoint_for_model_by_verb() {
        let q = quaff();
        assert_eq!(q.endpoint_for_model("Item", "get").unwrap().alias(), "get:item");
        assert_eq!(q.endpoint_for_model("Item", "list").unwrap().alias(), "list:items");
        assert!(q.endpoint_for_model("Item", "put").is_err());
    }

    #[test]
    fn overrides_are_not_cached() {
        let q = quaff();
        let overrides = EndpointDef {
            item_path: Some("data".into()),
            ..EndpointDef::default()
        };
        let e = q.endpoint_with("list:items", &overrides).unwrap();
        assert_eq!(e.config().item_path.as_deref(), Some("data"));
        assert_eq!(q.endpoint("list:items").unwrap().config().item_path, None);
    }
}
