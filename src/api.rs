//! Api lookup and bulk sync.
//!
//! An api claims endpoint aliases through its `service` globs. Several apis
//! may claim the same alias, so [`Quaff::locate`] yields every match.
//! [`sync_aliases`] runs endpoint passes one after another; a failing
//! endpoint produces a failed report and the rest still run.

use crate::config::ApiConfig;
use crate::context::Quaff;
use crate::endpoint::SyncControl;
use crate::error::QuaffError;
use crate::field_map::match_alias;
use crate::models::{SyncOutcome, SyncReport};

/// A configured api bound to its context.
#[derive(Clone, Copy)]
pub struct Api<'q> {
    quaff: &'q Quaff,
    name: &'q str,
    config: &'q ApiConfig,
}

impl<'q> Api<'q> {
    pub fn name(&self) -> &'q str {
        self.name
    }

    pub fn config(&self) -> &'q ApiConfig {
        self.config
    }

    pub fn enabled(&self) -> bool {
        self.config.enabled
    }

    /// True when `alias` is one of this api's service patterns.
    pub fn matches(&self, alias: &str) -> bool {
        self.config.service.iter().any(|p| match_alias(p, alias))
    }

    /// Aliases synced by default: `sync_endpoints`, else every configured
    /// endpoint this api claims.
    pub fn endpoint_aliases(&self) -> Vec<String> {
        if !self.config.sync_endpoints.is_empty() {
            return self.config.sync_endpoints.clone();
        }
        self.quaff
            .aliases()
            .filter(|alias| self.matches(alias))
            .map(str::to_string)
            .collect()
    }

    /// Sync `aliases`, or the default set when empty.
    ///
    /// A disabled api syncs nothing.
    pub async fn sync(&self, aliases: &[String], control: &SyncControl) -> Vec<SyncReport> {
        if !self.enabled() {
            tracing::info!(api = self.name, "api disabled, skipping sync");
            return Vec::new();
        }
        let aliases = if aliases.is_empty() {
            self.endpoint_aliases()
        } else {
            aliases.to_vec()
        };
        sync_aliases(self.quaff, &aliases, control).await
    }
}

impl Quaff {
    /// Every api, in name order.
    pub fn apis(&self) -> impl Iterator<Item = Api<'_>> {
        self.config().apis.iter().map(move |(name, config)| Api {
            quaff: self,
            name,
            config,
        })
    }

    /// Apis whose service patterns claim `alias`.
    pub fn locate<'q>(&'q self, alias: &'q str) -> impl Iterator<Item = Api<'q>> + 'q {
        self.apis().filter(move |api| api.matches(alias))
    }

    pub fn api(&self, name: &str) -> Option<Api<'_>> {
        self.apis().find(|api| api.name == name)
    }
}

/// Sync each alias in turn.
///
/// Unknown aliases and configuration errors produce a failed report for
/// that alias only. Aliases claimed exclusively by disabled apis are
/// skipped. Passes stop early once `control` is cancelled.
pub async fn sync_aliases(quaff: &Quaff, aliases: &[String], control: &SyncControl) -> Vec<SyncReport> {
    let mut reports = Vec::with_capacity(aliases.len());
    for alias in aliases {
        let claimed: Vec<Api<'_>> = quaff.locate(alias).collect();
        if !claimed.is_empty() && claimed.iter().all(|api| !api.enabled()) {
            tracing::info!(alias = %alias, "all apis for endpoint disabled, skipping");
            continue;
        }
        if control.is_cancelled() {
            reports.push(
                SyncReport::start(alias.as_str())
                    .finish(SyncOutcome::Cancelled, Some(QuaffError::Cancelled.to_string())),
            );
            continue;
        }
        let report = match quaff.endpoint(alias) {
            Ok(endpoint) => endpoint.sync(control).await,
            Err(e) => {
                tracing::error!(alias = %alias, error = %e, "cannot resolve endpoint");
                let report = SyncReport::start(alias.as_str()).finish(SyncOutcome::Failed, Some(e.to_string()));
                if let Err(e) = quaff.store().record_sync(&report).await {
                    tracing::warn!(alias = %alias, error = %e, "failed to record sync report");
                }
                report
            }
        };
        reports.push(report);
    }
    reports
}

/// Sync the default endpoints of every enabled api, each alias once.
pub async fn sync_all(quaff: &Quaff, control: &SyncControl) -> Vec<SyncReport> {
    let mut aliases: Vec<String> = Vec::new();
    for api in quaff.apis() {
        if !api.enabled() {
            tracing::info!(api = api.name(), "api disabled, skipping sync");
            continue;
        }
        for alias in api.endpoint_aliases() {
            if !aliases.contains(&alias) {
                aliases.push(alias);
            }
        }
    }
    sync_aliases(quaff, &aliases, control).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_config;
    use crate::store::memory::InMemoryStore;
    use std::sync::Arc;

    fn quaff() -> Quaff {
        let config = parse_config(
            r#"
[apis.catalog]
service = ["list:items", "list:tags"]
sync_endpoints = ["list:items"]

[apis.mirror]
service = ["list:*"]

[apis.legacy]
service = ["list:old*"]
enabled = false

[endpoints."list:items"]
url = "https://x/items"

[endpoints."list:tags"]
url = "https://x/tags"

[endpoints."list:old"]
url = "https://x/old"
"#,
        )
        .unwrap();
        Quaff::new(config, Arc::new(InMemoryStore::new())).unwrap()
    }

    #[test]
    fn locate_yields_every_match() {
        let q = quaff();
        let names: Vec<&str> = q.locate("list:items").map(|a| a.name()).collect();
        assert_eq!(names, vec!["catalog", "mirror"]);
        let names: Vec<&str> = q.locate("list:old").map(|a| a.name()).collect();
        assert_eq!(names, vec!["legacy", "mirror"]);
        assert_eq!(q.locate("get:x").count(), 0);
    }

    #[test]
    fn default_endpoint_aliases() {
        let q = quaff();
        assert_eq!(q.api("catalog").unwrap().endpoint_aliases(), vec!["list:items"]);
        assert_eq!(
            q.api("mirror").unwrap().endpoint_aliases(),
            vec!["list:items", "list:old", "list:tags"]
        );
        assert!(!q.api("legacy").unwrap().enabled());
    }

    #[tokio::test]
    async fn unknown_alias_fails_alone() {
        let q = quaff();
        let control = SyncControl::new();
        control.cancel();
        let reports = sync_aliases(
            &q,
            &["list:missing".to_string(), "list:items".to_string()],
            &SyncControl::new(),
        )
        .await;
        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0].outcome, SyncOutcome::Failed);
        assert!(reports[0].error.as_deref().unwrap_or("").contains("list:missing"));

        let cancelled = sync_aliases(&q, &["list:items".to_string()], &control).await;
        assert_eq!(cancelled[0].outcome, SyncOutcome::Cancelled);
    }

    #[tokio::test]
    async fn disabled_api_syncs_nothing() {
        let q = quaff();
        let control = SyncControl::new();
        assert!(q.api("legacy").unwrap().sync(&[], &control).await.is_empty());
    }
}
