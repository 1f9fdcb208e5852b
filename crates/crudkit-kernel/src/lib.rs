mod hooks;
mod lookup;
mod matching;
mod validate;

use crudkit_config::{KeyType, LookupSettings, ModelConfig, RuleKind, ValidateSettings};
use regex::Regex;

pub use hooks::{ConditionEvent, Hooks, LookupListener, ValidateListener};
pub use lookup::{
    build_find_params, shape_items, LookupAction, LookupConfig, LookupError, LookupQuery,
    RecordSource,
};
pub use matching::{
    compare_values, condition_matches, escape_like, like_matches, like_pattern, search_rows,
};
pub use validate::{
    render_message, validate_id, validate_record, ValidateAction, ValidateError, ValidateOutcome,
    ValidateRequest,
};

/// Model metadata the actions work against, with validation patterns compiled.
#[derive(Debug, Clone)]
pub struct ModelMeta {
    pub name: String,
    pub label: String,
    pub table: String,
    pub primary_key: String,
    pub key_type: KeyType,
    pub display_field: String,
    pub columns: Vec<String>,
    pub rules: Vec<FieldRules>,
    pub lookup: LookupSettings,
    pub validate: ValidateSettings,
}

#[derive(Debug, Clone)]
pub struct FieldRules {
    pub field: String,
    pub checks: Vec<Check>,
}

#[derive(Debug, Clone)]
pub struct Check {
    pub kind: CheckKind,
    pub message: Option<String>,
}

#[derive(Debug, Clone)]
pub enum CheckKind {
    Required,
    NotBlank,
    MinLength(usize),
    MaxLength(usize),
    Pattern(Regex),
    Numeric,
    InList(Vec<serde_json::Value>),
}

impl ModelMeta {
    pub fn from_config(cfg: &ModelConfig) -> Result<Self, regex::Error> {
        let mut rules = Vec::new();
        for column in &cfg.columns {
            if column.rules.is_empty() {
                continue;
            }
            let mut checks = Vec::with_capacity(column.rules.len());
            for rule in &column.rules {
                let kind = match &rule.kind {
                    RuleKind::Required => CheckKind::Required,
                    RuleKind::NotBlank => CheckKind::NotBlank,
                    RuleKind::MinLength { min } => CheckKind::MinLength(*min),
                    RuleKind::MaxLength { max } => CheckKind::MaxLength(*max),
                    RuleKind::Pattern { regex } => CheckKind::Pattern(Regex::new(regex)?),
                    RuleKind::Numeric => CheckKind::Numeric,
                    RuleKind::InList { values } => CheckKind::InList(values.clone()),
                };
                checks.push(Check {
                    kind,
                    message: rule.message.clone(),
                });
            }
            rules.push(FieldRules {
                field: column.name.clone(),
                checks,
            });
        }

        Ok(Self {
            name: cfg.name.clone(),
            label: cfg.label().to_string(),
            table: cfg.table_name().to_string(),
            primary_key: cfg.primary_key.clone(),
            key_type: cfg.primary_key_type,
            display_field: cfg.display_field.clone(),
            columns: cfg.columns.iter().map(|c| c.name.clone()).collect(),
            rules,
            lookup: cfg.lookup.clone(),
            validate: cfg.validate.clone(),
        })
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c == name)
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_config_compiles_rules_and_copies_keys() {
        let meta = fixtures::users();
        assert_eq!(meta.table, "users");
        assert_eq!(meta.label, "user");
        assert_eq!(meta.columns, vec!["id", "name", "email"]);
        assert_eq!(meta.rules.len(), 2);
        assert_eq!(meta.rules[0].field, "name");
        assert!(matches!(meta.rules[1].checks[0].kind, CheckKind::Pattern(_)));
        assert!(meta.has_column("email"));
        assert!(!meta.has_column("phone"));
    }

    #[test]
    fn from_config_rejects_bad_pattern() {
        let mut cfg = fixtures::users_config();
        cfg.columns[2].rules[0].kind = RuleKind::Pattern {
            regex: "([".to_string(),
        };
        assert!(ModelMeta::from_config(&cfg).is_err());
    }
}
