//! TOML configuration parsing.
//!
//! A `quaff.toml` declares apis, endpoints, and models. Endpoints reference
//! each other through `parents`, models carry their `quaff_map` field maps
//! keyed by endpoint alias globs.
//!
//! ```toml
//! [endpoints."url:example"]
//! url = "https://api.example.com"
//!
//! [endpoints."list:items"]
//! parents = ["url:example"]
//! path = "/v1/items"
//! item_path = "data.items"
//! model = "Item"
//!
//! [models.Item]
//! fields = ["ExternalId", "Name"]
//! quaff_map."list:*" = { id = "=ExternalId", name = "Name" }
//! ```

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub db: DbConfig,
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default)]
    pub mapper: MapperConfig,
    #[serde(default)]
    pub content_types: ContentTypesConfig,
    #[serde(default)]
    pub apis: BTreeMap<String, ApiConfig>,
    #[serde(default)]
    pub endpoints: BTreeMap<String, EndpointDef>,
    #[serde(default)]
    pub models: BTreeMap<String, ModelDef>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("./data/quaff.sqlite")
}

/// Outcome a native response code decodes to.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CodeOutcome {
    Ok,
    Error,
}

/// One row of the ordered response-code decode table.
#[derive(Debug, Deserialize, Clone)]
pub struct CodeDecode {
    pub pattern: String,
    pub outcome: CodeOutcome,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TransportConfig {
    #[serde(default = "default_transport")]
    pub default: String,
    #[serde(default = "default_fallback")]
    pub fallback: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Directory that local `path:` endpoints resolve against.
    #[serde(default = "default_root")]
    pub root: PathBuf,
    #[serde(default = "default_true")]
    pub restrict_to_root: bool,
    #[serde(default = "default_remote_schemes")]
    pub remote_schemes: Vec<String>,
    #[serde(default = "default_code_decode")]
    pub response_code_decode: Vec<CodeDecode>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            default: default_transport(),
            fallback: default_fallback(),
            timeout_secs: default_timeout_secs(),
            user_agent: default_user_agent(),
            root: default_root(),
            restrict_to_root: true,
            remote_schemes: default_remote_schemes(),
            response_code_decode: default_code_decode(),
        }
    }
}

fn default_transport() -> String {
    "http".to_string()
}
fn default_fallback() -> String {
    "file".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_user_agent() -> String {
    format!("quaff/{}", env!("CARGO_PKG_VERSION"))
}
fn default_root() -> PathBuf {
    PathBuf::from(".")
}
fn default_true() -> bool {
    true
}
fn default_remote_schemes() -> Vec<String> {
    vec!["http://".to_string(), "https://".to_string()]
}
fn default_code_decode() -> Vec<CodeDecode> {
    [
        ("2*", CodeOutcome::Ok),
        ("3*", CodeOutcome::Error),
        ("4*", CodeOutcome::Error),
        ("5*", CodeOutcome::Error),
    ]
    .into_iter()
    .map(|(pattern, outcome)| CodeDecode {
        pattern: pattern.to_string(),
        outcome,
    })
    .collect()
}

#[derive(Debug, Deserialize, Clone)]
pub struct MapperConfig {
    #[serde(default = "default_path_delimiter")]
    pub path_delimiter: String,
    #[serde(default = "default_tag_delimiter")]
    pub tag_delimiter: String,
    /// Option names, see [`crate::mapper::MapOptions::from_names`].
    #[serde(default = "default_map_options")]
    pub options: Vec<String>,
}

impl Default for MapperConfig {
    fn default() -> Self {
        Self {
            path_delimiter: default_path_delimiter(),
            tag_delimiter: default_tag_delimiter(),
            options: default_map_options(),
        }
    }
}

fn default_path_delimiter() -> String {
    ".".to_string()
}
fn default_tag_delimiter() -> String {
    "|".to_string()
}
fn default_map_options() -> Vec<String> {
    vec!["delete_one_to_many".to_string()]
}

/// Content-type signatures per logical type.
#[derive(Debug, Deserialize, Clone)]
pub struct ContentTypesConfig {
    #[serde(default = "default_json_types")]
    pub json: Vec<String>,
    #[serde(default = "default_xml_types")]
    pub xml: Vec<String>,
    #[serde(default = "default_html_types")]
    pub html: Vec<String>,
}

impl Default for ContentTypesConfig {
    fn default() -> Self {
        Self {
            json: default_json_types(),
            xml: default_xml_types(),
            html: default_html_types(),
        }
    }
}

fn default_json_types() -> Vec<String> {
    vec!["application/json".to_string()]
}
fn default_xml_types() -> Vec<String> {
    vec!["application/xml".to_string(), "text/xml".to_string()]
}
fn default_html_types() -> Vec<String> {
    vec!["text/html".to_string(), "application/xhtml+xml".to_string()]
}

/// Credentials attached to requests.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(untagged)]
pub enum AuthConfig {
    Basic { username: String, password: String },
    Bearer { bearer: String },
}

#[derive(Debug, Deserialize, Clone)]
pub struct ApiConfig {
    /// Alias globs this api services, e.g. `"list:*"`.
    #[serde(default)]
    pub service: Vec<String>,
    #[serde(default)]
    pub accept_type: Option<String>,
    #[serde(default)]
    pub transport: Option<String>,
    #[serde(default)]
    pub auth: Option<AuthConfig>,
    #[serde(default)]
    pub version: Option<String>,
    /// Aliases synced when no explicit aliases are requested.
    #[serde(default)]
    pub sync_endpoints: Vec<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

/// Page-number pagination settings for an endpoint.
#[derive(Debug, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct PaginationConfig {
    #[serde(default)]
    pub start: Option<u64>,
    #[serde(default)]
    pub length: Option<u64>,
    #[serde(default)]
    pub page_var: Option<String>,
    #[serde(default)]
    pub length_var: Option<String>,
}

impl PaginationConfig {
    /// Page requested first when the caller does not name one.
    pub fn start_page(&self) -> u64 {
        self.start.unwrap_or(1)
    }

    /// Whether successive requests can ask for different pages.
    pub fn advances(&self) -> bool {
        self.page_var.is_some()
    }
}

/// Validation spec for a caller-supplied query parameter.
///
/// Accepts either a table (`{ required = true, pattern = "^\\d+$" }`) or the
/// compact list form (`[true, "^\\d+$"]`).
#[derive(Debug, Deserialize, Clone, Default, PartialEq, Eq)]
#[serde(try_from = "ParamSpecRepr")]
pub struct ParamSpec {
    pub required: bool,
    pub pattern: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ParamSpecRepr {
    Table {
        #[serde(default)]
        required: bool,
        #[serde(default)]
        pattern: Option<String>,
    },
    List(Vec<toml::Value>),
}

impl TryFrom<ParamSpecRepr> for ParamSpec {
    type Error = String;

    fn try_from(repr: ParamSpecRepr) -> std::result::Result<Self, Self::Error> {
        match repr {
            ParamSpecRepr::Table { required, pattern } => Ok(Self { required, pattern }),
            ParamSpecRepr::List(values) => {
                let required = match values.first() {
                    Some(toml::Value::Boolean(b)) => *b,
                    None => false,
                    Some(other) => return Err(format!("expected bool, got {}", other)),
                };
                let pattern = match values.get(1) {
                    Some(toml::Value::String(s)) => Some(s.clone()),
                    None => None,
                    Some(other) => return Err(format!("expected pattern string, got {}", other)),
                };
                Ok(Self { required, pattern })
            }
        }
    }
}

/// Declarative endpoint configuration as written in the config file.
///
/// The same shape is used for caller-supplied overrides; `None`/empty
/// fields leave the underlying value untouched when overlaid.
#[derive(Debug, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct EndpointDef {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub parents: Vec<String>,
    #[serde(default)]
    pub item_path: Option<String>,
    #[serde(default)]
    pub accept_type: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub response: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub transport: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub tokens: BTreeMap<String, String>,
    /// Default query parameters keyed by verb (the alias prefix).
    #[serde(default)]
    pub default_params: BTreeMap<String, BTreeMap<String, String>>,
    #[serde(default)]
    pub params: BTreeMap<String, ParamSpec>,
    #[serde(default)]
    pub pagination: Option<PaginationConfig>,
    #[serde(default)]
    pub auth: Option<AuthConfig>,
    /// Ordered hook registry keys.
    #[serde(default)]
    pub hooks: Vec<String>,
    #[serde(default)]
    pub fields_key: Option<String>,
    #[serde(default)]
    pub fields_delimiter: Option<String>,
}

impl EndpointDef {
    /// Overlay `other` onto `self` with last-writer-wins semantics.
    ///
    /// Scalars are replaced when set, maps merge key-wise, lists are
    /// replaced when non-empty.
    pub fn overlay(&mut self, other: &EndpointDef) {
        fn set<T: Clone>(dst: &mut Option<T>, src: &Option<T>) {
            if src.is_some() {
                dst.clone_from(src);
            }
        }
        set(&mut self.url, &other.url);
        set(&mut self.path, &other.path);
        set(&mut self.item_path, &other.item_path);
        set(&mut self.accept_type, &other.accept_type);
        set(&mut self.model, &other.model);
        set(&mut self.response, &other.response);
        set(&mut self.error, &other.error);
        set(&mut self.transport, &other.transport);
        set(&mut self.version, &other.version);
        set(&mut self.pagination, &other.pagination);
        set(&mut self.auth, &other.auth);
        set(&mut self.fields_key, &other.fields_key);
        set(&mut self.fields_delimiter, &other.fields_delimiter);
        if !other.parents.is_empty() {
            self.parents.clone_from(&other.parents);
        }
        if !other.hooks.is_empty() {
            self.hooks.clone_from(&other.hooks);
        }
        self.tokens
            .extend(other.tokens.iter().map(|(k, v)| (k.clone(), v.clone())));
        for (verb, params) in &other.default_params {
            self.default_params
                .entry(verb.clone())
                .or_default()
                .extend(params.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        self.params
            .extend(other.params.iter().map(|(k, v)| (k.clone(), v.clone())));
    }
}

/// A has-many relation, either `"Model"` or `{ model, foreign_key }`.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(untagged)]
pub enum HasManyDef {
    Model(String),
    Detailed {
        model: String,
        #[serde(default)]
        foreign_key: Option<String>,
    },
}

impl HasManyDef {
    pub fn model(&self) -> &str {
        match self {
            HasManyDef::Model(m) => m,
            HasManyDef::Detailed { model, .. } => model,
        }
    }

    /// Field on the child holding the owner id, `<Owner>ID` unless configured.
    pub fn foreign_key(&self, owner_model: &str) -> String {
        match self {
            HasManyDef::Detailed {
                foreign_key: Some(fk),
                ..
            } => fk.clone(),
            _ => format!("{}ID", owner_model),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ModelDef {
    #[serde(default)]
    pub fields: Vec<String>,
    #[serde(default)]
    pub has_one: BTreeMap<String, String>,
    #[serde(default)]
    pub has_many: BTreeMap<String, HasManyDef>,
    #[serde(default)]
    pub many_many: BTreeMap<String, String>,
    /// Field maps keyed by endpoint alias glob, each `dataPath = modelPath`.
    #[serde(default)]
    pub quaff_map: BTreeMap<String, BTreeMap<String, String>>,
}

impl ModelDef {
    /// True when `name` is a declared field or a has-one id field.
    pub fn has_field(&self, name: &str) -> bool {
        if self.fields.iter().any(|f| f == name) {
            return true;
        }
        name.strip_suffix("ID")
            .map(|rel| self.has_one.contains_key(rel))
            .unwrap_or(false)
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content).with_context(|| format!("Invalid config file: {}", path.display()))
}

/// Parse and validate configuration from a TOML string.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.transport.timeout_secs == 0 {
        bail!("transport.timeout_secs must be > 0");
    }
    if config.mapper.path_delimiter.is_empty() {
        bail!("mapper.path_delimiter must not be empty");
    }
    for decode in &config.transport.response_code_decode {
        globset::Glob::new(&decode.pattern).with_context(|| {
            format!("Invalid response_code_decode pattern '{}'", decode.pattern)
        })?;
    }
    for name in &config.mapper.options {
        if crate::mapper::MapOptions::from_names([name.as_str()]).is_none() {
            bail!("Unknown mapper option: '{}'", name);
        }
    }

    for (alias, def) in &config.endpoints {
        for parent in &def.parents {
            if !config.endpoints.contains_key(parent) {
                bail!("endpoint '{}' lists unknown parent '{}'", alias, parent);
            }
        }
        if let Some(model) = &def.model {
            if !config.models.is_empty() && !config.models.contains_key(model) {
                bail!("endpoint '{}' references unknown model '{}'", alias, model);
            }
        }
        if let Some(pagination) = &def.pagination {
            if pagination.length.is_some() && !pagination.advances() {
                bail!(
                    "endpoint '{}' sets pagination.length without pagination.page_var",
                    alias
                );
            }
        }
        for (name, spec) in &def.params {
            if let Some(pattern) = &spec.pattern {
                regex::Regex::new(pattern).with_context(|| {
                    format!("endpoint '{}' param '{}' has invalid pattern", alias, name)
                })?;
            }
        }
    }

    for (name, model) in &config.models {
        for (rel, def) in &model.has_many {
            if !config.models.contains_key(def.model()) {
                bail!(
                    "model '{}' has_many '{}' references unknown model '{}'",
                    name,
                    rel,
                    def.model()
                );
            }
        }
    }

    for (name, api) in &config.apis {
        for pattern in &api.service {
            globset::Glob::new(pattern)
                .with_context(|| format!("api '{}' has invalid service pattern", name))?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = parse_config("").unwrap();
        assert_eq!(config.transport.default, "http");
        assert_eq!(config.transport.fallback, "file");
        assert_eq!(config.mapper.path_delimiter, ".");
        assert_eq!(config.mapper.tag_delimiter, "|");
        assert_eq!(config.transport.response_code_decode.len(), 4);
        assert_eq!(config.content_types.json, vec!["application/json"]);
    }

    #[test]
    fn test_endpoint_and_model() {
        let config = parse_config(
            r#"
[endpoints."url:example"]
url = "https://api.example.com"

[endpoints."list:items"]
parents = ["url:example"]
path = "/v1/items"
model = "Item"
params = { page = [false, "^\\d+$"], q = { required = true } }

[models.Item]
fields = ["Name"]
has_one = { Category = "Category" }
quaff_map."list:*" = { id = "=ExternalId", name = "Name" }

[models.Category]
fields = ["Code"]
"#,
        )
        .unwrap();

        let items = &config.endpoints["list:items"];
        assert_eq!(items.parents, vec!["url:example"]);
        assert_eq!(items.params["page"].pattern.as_deref(), Some("^\\d+$"));
        assert!(!items.params["page"].required);
        assert!(items.params["q"].required);

        let item = &config.models["Item"];
        assert!(item.has_field("Name"));
        assert!(item.has_field("CategoryID"));
        assert!(!item.has_field("Other"));
        assert_eq!(item.quaff_map["list:*"]["id"], "=ExternalId");
    }

    #[test]
    fn test_unknown_parent_rejected() {
        let err = parse_config(
            r#"
[endpoints."list:items"]
parents = ["url:missing"]
"#,
        )
        .unwrap_err();
        assert!(format!("{:#}", err).contains("unknown parent"));
    }

    #[test]
    fn test_page_length_needs_page_var() {
        let err = parse_config(
            r#"
[endpoints."list:items"]
url = "https://x/items"
pagination = { length = 2, length_var = "per_page" }
"#,
        )
        .unwrap_err();
        assert!(format!("{:#}", err).contains("page_var"));

        let config = parse_config(
            r#"
[endpoints."list:items"]
url = "https://x/items"
pagination = { length = 2, page_var = "page" }
"#,
        )
        .unwrap();
        let pagination = config.endpoints["list:items"].pagination.as_ref().unwrap();
        assert_eq!(pagination.start_page(), 1);
        assert!(pagination.advances());
    }

    #[test]
    fn test_bad_option_rejected() {
        let err = parse_config("[mapper]\noptions = [\"explode\"]\n").unwrap_err();
        assert!(format!("{:#}", err).contains("explode"));
    }

    #[test]
    fn test_auth_variants() {
        let config = parse_config(
            r#"
[endpoints."a:basic"]
auth = { username = "fred", password = "secret" }

[endpoints."a:bearer"]
auth = { bearer = "tok" }
"#,
        )
        .unwrap();
        assert!(matches!(
            config.endpoints["a:basic"].auth,
            Some(AuthConfig::Basic { .. })
        ));
        assert_eq!(
            config.endpoints["a:bearer"].auth,
            Some(AuthConfig::Bearer {
                bearer: "tok".to_string()
            })
        );
    }

    #[test]
    fn test_overlay_last_writer_wins() {
        let mut base = EndpointDef {
            url: Some("https://a".into()),
            model: Some("Item".into()),
            ..Default::default()
        };
        base.tokens.insert("version".into(), "1".into());
        let mut over = EndpointDef {
            model: Some("Other".into()),
            ..Default::default()
        };
        over.tokens.insert("version".into(), "2".into());
        base.overlay(&over);
        assert_eq!(base.url.as_deref(), Some("https://a"));
        assert_eq!(base.model.as_deref(), Some("Other"));
        assert_eq!(base.tokens["version"], "2");
    }
}
