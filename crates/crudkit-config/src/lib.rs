use std::collections::{BTreeMap, HashSet};

use crudkit_contracts::{
    Condition, OrderBy, StrategyKind, DEFAULT_FIND_METHOD, DEFAULT_VIEW_VAR,
};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

pub const ID_ROLE: &str = "id";
pub const VALUE_ROLE: &str = "value";

const CONFIG_SCHEMA: &str = include_str!("../../../config/config.schema.json");

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("read config failed: {0}")]
    Read(String),
    #[error("parse config failed: {0}")]
    Parse(String),
    #[error("schema load failed: {0}")]
    SchemaLoad(String),
    #[error("schema validation failed: {0}")]
    SchemaValidation(String),
    #[error("unsupported config: {0}")]
    UnsupportedConfig(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: Server,
    pub store: Store,
    pub models: Vec<ModelConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Server {
    pub listen_addr: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Store {
    #[serde(rename = "type")]
    pub kind: String,
    pub sqlite_path: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum KeyType {
    #[default]
    Integer,
    Uuid,
    String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    pub name: String,
    /// Human readable name used in `{name}` message placeholders.
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub table: Option<String>,
    #[serde(default = "default_primary_key")]
    pub primary_key: String,
    #[serde(default)]
    pub primary_key_type: KeyType,
    #[serde(default = "default_display_field")]
    pub display_field: String,
    pub columns: Vec<ColumnConfig>,
    /// Rows loaded into the store on startup.
    #[serde(default)]
    pub records: Vec<Map<String, Value>>,
    #[serde(default)]
    pub lookup: LookupSettings,
    #[serde(default)]
    pub validate: ValidateSettings,
}

impl ModelConfig {
    pub fn table_name(&self) -> &str {
        self.table.as_deref().unwrap_or(&self.name)
    }

    pub fn label(&self) -> &str {
        self.label.as_deref().unwrap_or(&self.name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c.name == name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnConfig {
    pub name: String,
    #[serde(default)]
    pub rules: Vec<RuleConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RuleConfig {
    #[serde(flatten)]
    pub kind: RuleKind,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum RuleKind {
    Required,
    NotBlank,
    MinLength { min: usize },
    MaxLength { max: usize },
    Pattern { regex: String },
    Numeric,
    InList { values: Vec<Value> },
}

/// Stored settings of the lookup action for one model.
///
/// `fields` maps response roles to columns; a `null` column is resolved per
/// request from `<role>_field` or the model defaults.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LookupSettings {
    #[serde(default = "default_find_method")]
    pub find_method: String,
    #[serde(default)]
    pub term: Option<String>,
    #[serde(default = "default_lookup_fields")]
    pub fields: IndexMap<String, Option<String>>,
    #[serde(default)]
    pub strategy: BTreeMap<String, StrategyKind>,
    #[serde(default)]
    pub default_strategy: StrategyKind,
    #[serde(default = "default_view_var")]
    pub view_var: String,
    #[serde(default)]
    pub order: Vec<OrderBy>,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default = "default_max_limit")]
    pub max_limit: usize,
}

impl Default for LookupSettings {
    fn default() -> Self {
        Self {
            find_method: default_find_method(),
            term: None,
            fields: default_lookup_fields(),
            strategy: BTreeMap::new(),
            default_strategy: StrategyKind::default(),
            view_var: default_view_var(),
            order: Vec::new(),
            conditions: Vec::new(),
            limit: default_limit(),
            max_limit: default_max_limit(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ValidateIdMode {
    /// Follow the model's primary key type.
    #[default]
    Auto,
    Integer,
    Uuid,
    Disabled,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ValidateSettings {
    #[serde(default)]
    pub validate_id: ValidateIdMode,
    #[serde(default)]
    pub validate_options: ValidateOptions,
    #[serde(default)]
    pub messages: Messages,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ValidateOptions {
    /// Only these columns are validated when set.
    #[serde(default)]
    pub fields: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Messages {
    #[serde(default = "default_success_message")]
    pub success: String,
    #[serde(default = "default_error_message")]
    pub error: String,
}

impl Default for Messages {
    fn default() -> Self {
        Self {
            success: default_success_message(),
            error: default_error_message(),
        }
    }
}

fn default_primary_key() -> String {
    "id".to_string()
}

fn default_display_field() -> String {
    "name".to_string()
}

fn default_find_method() -> String {
    DEFAULT_FIND_METHOD.to_string()
}

fn default_lookup_fields() -> IndexMap<String, Option<String>> {
    let mut fields = IndexMap::new();
    fields.insert(ID_ROLE.to_string(), None);
    fields.insert(VALUE_ROLE.to_string(), None);
    fields
}

fn default_view_var() -> String {
    DEFAULT_VIEW_VAR.to_string()
}

fn default_limit() -> usize {
    20
}

fn default_max_limit() -> usize {
    100
}

fn default_success_message() -> String {
    "Successfully validated {name}".to_string()
}

fn default_error_message() -> String {
    "Could not validate {name}".to_string()
}

pub fn load_and_validate(path: &str) -> Result<Config, ConfigError> {
    let config_text =
        std::fs::read_to_string(path).map_err(|e| ConfigError::Read(e.to_string()))?;
    parse_and_validate(&config_text)
}

pub fn parse_and_validate(config_text: &str) -> Result<Config, ConfigError> {
    let value: serde_yaml::Value =
        serde_yaml::from_str(config_text).map_err(|e| ConfigError::Parse(e.to_string()))?;

    let instance = serde_json::to_value(value).map_err(|e| ConfigError::Parse(e.to_string()))?;
    validate_against_schema(&instance)?;

    let mut cfg: Config =
        serde_json::from_value(instance).map_err(|e| ConfigError::Parse(e.to_string()))?;
    for model in &mut cfg.models {
        normalize_lookup_fields(&mut model.lookup);
    }
    validate_runtime_support(&cfg)?;
    Ok(cfg)
}

/// Puts the `id` and `value` roles first, adding them when a config only
/// lists extra roles.
pub fn normalize_lookup_fields(settings: &mut LookupSettings) {
    let mut fields = IndexMap::with_capacity(settings.fields.len() + 2);
    for role in [ID_ROLE, VALUE_ROLE] {
        let column = settings.fields.shift_remove(role).flatten();
        fields.insert(role.to_string(), column);
    }
    fields.extend(settings.fields.drain(..));
    settings.fields = fields;
}

fn validate_against_schema(instance: &serde_json::Value) -> Result<(), ConfigError> {
    let schema: serde_json::Value =
        serde_json::from_str(CONFIG_SCHEMA).map_err(|e| ConfigError::SchemaLoad(e.to_string()))?;

    let validator =
        jsonschema::validator_for(&schema).map_err(|e| ConfigError::SchemaLoad(e.to_string()))?;
    if let Err(first) = validator.validate(instance) {
        return Err(ConfigError::SchemaValidation(first.to_string()));
    }
    Ok(())
}

fn validate_runtime_support(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.store.kind != "memory" && cfg.store.kind != "sqlite" {
        return Err(ConfigError::UnsupportedConfig(format!(
            "store.type={} is not implemented; supported: memory, sqlite",
            cfg.store.kind
        )));
    }
    if cfg.store.kind == "memory" && cfg.store.sqlite_path.is_some() {
        return Err(ConfigError::UnsupportedConfig(
            "store.sqlite_path is not supported when store.type=memory".to_string(),
        ));
    }
    if cfg.store.kind == "sqlite"
        && cfg
            .store
            .sqlite_path
            .as_ref()
            .map(|v| v.trim().is_empty())
            .unwrap_or(true)
    {
        return Err(ConfigError::UnsupportedConfig(
            "store.sqlite_path is required when store.type=sqlite".to_string(),
        ));
    }

    let mut names = HashSet::new();
    for model in &cfg.models {
        if !names.insert(model.name.as_str()) {
            return Err(ConfigError::UnsupportedConfig(format!(
                "models: duplicate model name {}",
                model.name
            )));
        }
        validate_model(model)?;
    }
    Ok(())
}

fn validate_model(model: &ModelConfig) -> Result<(), ConfigError> {
    let name = &model.name;
    let unsupported = |msg: String| ConfigError::UnsupportedConfig(format!("models.{name}: {msg}"));

    if !is_identifier(model.table_name()) {
        return Err(unsupported(format!(
            "table {} is not a plain identifier",
            model.table_name()
        )));
    }
    let mut columns = HashSet::new();
    for column in &model.columns {
        if !is_identifier(&column.name) {
            return Err(unsupported(format!(
                "column {} is not a plain identifier",
                column.name
            )));
        }
        if !columns.insert(column.name.as_str()) {
            return Err(unsupported(format!("duplicate column {}", column.name)));
        }
        for rule in &column.rules {
            if let RuleKind::Pattern { regex } = &rule.kind {
                regex::Regex::new(regex).map_err(|e| {
                    unsupported(format!("column {} has invalid pattern: {e}", column.name))
                })?;
            }
        }
    }
    let require_column = |what: &str, column: &str| {
        if columns.contains(column) {
            Ok(())
        } else {
            Err(unsupported(format!("{what} {column} is not a declared column")))
        }
    };

    require_column("primary_key", &model.primary_key)?;
    require_column("display_field", &model.display_field)?;

    let lookup = &model.lookup;
    if lookup.find_method != DEFAULT_FIND_METHOD {
        return Err(unsupported(format!(
            "lookup.find_method={} is not implemented; supported: {DEFAULT_FIND_METHOD}",
            lookup.find_method
        )));
    }
    for (role, column) in &lookup.fields {
        if role.trim().is_empty() {
            return Err(unsupported("lookup.fields has an empty role".to_string()));
        }
        if let Some(column) = column {
            require_column(&format!("lookup.fields.{role}"), column)?;
        }
    }
    for column in lookup.strategy.keys() {
        require_column("lookup.strategy", column)?;
    }
    for order in &lookup.order {
        require_column("lookup.order", &order.field)?;
    }
    for condition in &lookup.conditions {
        require_column("lookup.conditions", condition.field())?;
    }
    if lookup.limit == 0 || lookup.max_limit < lookup.limit {
        return Err(unsupported(
            "lookup.limit must be >= 1 and <= lookup.max_limit".to_string(),
        ));
    }
    if lookup.view_var.trim().is_empty() || lookup.view_var == "success" {
        return Err(unsupported(
            "lookup.view_var must be non-empty and not \"success\"".to_string(),
        ));
    }

    if let Some(fields) = &model.validate.validate_options.fields {
        for column in fields {
            require_column("validate.validate_options.fields", column)?;
        }
    }

    for (idx, record) in model.records.iter().enumerate() {
        for key in record.keys() {
            if !columns.contains(key.as_str()) {
                return Err(unsupported(format!(
                    "records[{idx}] has undeclared column {key}"
                )));
            }
        }
    }
    Ok(())
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn write_temp_config(contents: &str) -> String {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system time before unix epoch")
            .as_nanos();
        let path = std::env::temp_dir().join(format!("crudkit-config-test-{nanos}.yaml"));
        std::fs::write(&path, contents).expect("write temp config");
        path.to_string_lossy().to_string()
    }

    fn base_yaml() -> String {
        r#"
server:
  listen_addr: "127.0.0.1:0"

store:
  type: "memory"

models:
  - name: "users"
    label: "user"
    columns:
      - name: "id"
      - name: "name"
        rules:
          - rule: "required"
          - rule: "max_length"
            max: 20
            message: "too long"
      - name: "email"
    records:
      - { id: 1, name: "Alice", email: "alice@example.com" }
    lookup:
      fields:
        label: "email"
      strategy:
        name: "contains"
"#
        .to_string()
    }

    #[test]
    fn applies_defaults_and_keeps_role_order() {
        let path = write_temp_config(&base_yaml());
        let cfg = load_and_validate(&path).expect("base config should load");
        let model = &cfg.models[0];
        assert_eq!(model.primary_key, "id");
        assert_eq!(model.display_field, "name");
        assert_eq!(model.primary_key_type, KeyType::Integer);
        assert_eq!(model.table_name(), "users");
        assert_eq!(model.label(), "user");

        let roles: Vec<&str> = model.lookup.fields.keys().map(String::as_str).collect();
        assert_eq!(roles, vec!["id", "value", "label"]);
        assert_eq!(model.lookup.fields["label"].as_deref(), Some("email"));
        assert_eq!(model.lookup.default_strategy, StrategyKind::BeginsWith);
        assert_eq!(model.lookup.strategy["name"], StrategyKind::Contains);
        assert_eq!(model.lookup.view_var, "data");
        assert_eq!(model.lookup.limit, 20);
        assert_eq!(model.validate.validate_id, ValidateIdMode::Auto);
        assert_eq!(model.validate.messages.success, "Successfully validated {name}");

        let name_rules = &model.columns[1].rules;
        assert_eq!(name_rules[0].kind, RuleKind::Required);
        assert_eq!(name_rules[1].kind, RuleKind::MaxLength { max: 20 });
        assert_eq!(name_rules[1].message.as_deref(), Some("too long"));
    }

    #[test]
    fn supports_sqlite_store_type_with_path() {
        let cfg = parse_and_validate(&base_yaml().replace(
            "type: \"memory\"",
            "type: \"sqlite\"\n  sqlite_path: \"./a.db\"",
        ))
        .expect("sqlite config should be accepted");
        assert_eq!(cfg.store.kind, "sqlite");
        assert_eq!(cfg.store.sqlite_path.as_deref(), Some("./a.db"));
    }

    #[test]
    fn rejects_sqlite_path_even_when_memory() {
        let err = parse_and_validate(&base_yaml().replace(
            "type: \"memory\"",
            "type: \"memory\"\n  sqlite_path: \"./a.db\"",
        ))
        .expect_err("expected unsupported config");
        assert!(matches!(
            err,
            ConfigError::SchemaValidation(_) | ConfigError::UnsupportedConfig(_)
        ));
    }

    #[test]
    fn rejects_unknown_strategy_name() {
        let err = parse_and_validate(&base_yaml().replace("\"contains\"", "\"fuzzy\""))
            .expect_err("expected invalid strategy");
        assert!(matches!(
            err,
            ConfigError::SchemaValidation(_) | ConfigError::Parse(_)
        ));
    }

    #[test]
    fn rejects_lookup_field_that_is_not_a_column() {
        let err = parse_and_validate(&base_yaml().replace("label: \"email\"", "label: \"phone\""))
            .expect_err("expected undeclared column");
        assert!(matches!(err, ConfigError::UnsupportedConfig(_)));
        assert!(err.to_string().contains("lookup.fields.label"));
    }

    #[test]
    fn rejects_unsupported_find_method() {
        let yaml = base_yaml().replace(
            "    lookup:\n",
            "    lookup:\n      find_method: \"no_such_finder\"\n",
        );
        let err = parse_and_validate(&yaml).expect_err("expected unsupported finder");
        assert!(matches!(err, ConfigError::UnsupportedConfig(_)));
        assert!(err
            .to_string()
            .contains("lookup.find_method=no_such_finder is not implemented"));

        let yaml = base_yaml().replace("    lookup:\n", "    lookup:\n      find_method: \"all\"\n");
        parse_and_validate(&yaml).expect("the all finder is supported");
    }

    #[test]
    fn rejects_invalid_pattern_rule() {
        let yaml = base_yaml().replace(
            "      - name: \"email\"",
            "      - name: \"email\"\n        rules:\n          - rule: \"pattern\"\n            regex: \"([\"",
        );
        let err = parse_and_validate(&yaml).expect_err("expected invalid pattern");
        assert!(err.to_string().contains("invalid pattern"));
    }

    #[test]
    fn rejects_duplicate_model_names() {
        let yaml = format!(
            "{}  - name: \"users\"\n    columns:\n      - name: \"id\"\n      - name: \"name\"\n",
            base_yaml()
        );
        let err = parse_and_validate(&yaml).expect_err("expected duplicate model");
        assert!(err.to_string().contains("duplicate model name users"));
    }

    #[test]
    fn rejects_seed_record_with_undeclared_column() {
        let err = parse_and_validate(&base_yaml().replace("email: \"alice", "phone: \"alice"))
            .expect_err("expected undeclared seed column");
        assert!(err.to_string().contains("undeclared column phone"));
    }

    #[test]
    fn normalize_moves_core_roles_first() {
        let mut settings = LookupSettings::default();
        settings.fields.clear();
        settings.fields.insert("extra".to_string(), Some("email".to_string()));
        settings.fields.insert(VALUE_ROLE.to_string(), Some("name".to_string()));
        normalize_lookup_fields(&mut settings);
        let roles: Vec<&str> = settings.fields.keys().map(String::as_str).collect();
        assert_eq!(roles, vec!["id", "value", "extra"]);
        assert_eq!(settings.fields[VALUE_ROLE].as_deref(), Some("name"));
        assert_eq!(settings.fields[ID_ROLE], None);
    }

    #[test]
    fn read_failure_is_reported() {
        let err = load_and_validate("/nonexistent/crudkit.yaml").expect_err("missing file");
        assert!(matches!(err, ConfigError::Read(_)));
    }
}
