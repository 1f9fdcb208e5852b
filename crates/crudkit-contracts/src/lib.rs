use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

pub const API_VERSION: &str = "1.0.0";
pub const DEFAULT_VIEW_VAR: &str = "data";
pub const DEFAULT_FIND_METHOD: &str = "all";

/// A single row as returned by the record store, keyed by column name.
pub type Record = Map<String, Value>;

/// Field-level validation messages, keyed by field name.
pub type FieldErrors = BTreeMap<String, Vec<String>>;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "camelCase")]
pub enum StrategyKind {
    #[default]
    BeginsWith,
    EndsWith,
    Contains,
    Custom,
}

impl StrategyKind {
    pub fn as_str(self) -> &'static str {
        match self {
            StrategyKind::BeginsWith => "beginsWith",
            StrategyKind::EndsWith => "endsWith",
            StrategyKind::Contains => "contains",
            StrategyKind::Custom => "custom",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct OrderBy {
    pub field: String,
    #[serde(default)]
    pub direction: Direction,
}

impl OrderBy {
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: Direction::Asc,
        }
    }
}

/// Conjunctive predicate understood by every record store backend.
///
/// `Like` patterns use `%` for any run of characters and `_` for exactly one,
/// with `\` escaping either wildcard. Matching is case-sensitive.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "op", rename_all = "snake_case", deny_unknown_fields)]
pub enum Condition {
    Equals { field: String, value: Value },
    NotEqual { field: String, value: Value },
    NotNull { field: String },
    Like { field: String, pattern: String },
}

impl Condition {
    pub fn field(&self) -> &str {
        match self {
            Condition::Equals { field, .. }
            | Condition::NotEqual { field, .. }
            | Condition::NotNull { field }
            | Condition::Like { field, .. } => field,
        }
    }
}

/// Find-options handed to the record store for a single search call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FindParams {
    pub find_method: String,
    /// Projected columns; when `distinct` is set duplicate rows are collapsed.
    pub fields: Vec<String>,
    pub distinct: bool,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub order: Vec<OrderBy>,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default = "default_page")]
    pub page: usize,
}

fn default_page() -> usize {
    1
}

impl FindParams {
    pub fn offset(&self) -> usize {
        match self.limit {
            Some(limit) => limit.saturating_mul(self.page.max(1) - 1),
            None => 0,
        }
    }
}

/// Rendered lookup payload: `{"success": true, "<view_var>": [...]}`.
#[derive(Debug, Clone, PartialEq)]
pub struct LookupResponse {
    pub success: bool,
    pub view_var: String,
    pub items: Vec<Record>,
}

impl Serialize for LookupResponse {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(2))?;
        map.serialize_entry("success", &self.success)?;
        map.serialize_entry(&self.view_var, &self.items)?;
        map.end()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ValidateResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub errors: FieldErrors,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorEnvelope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,
    pub error: ErrorBody,
}

impl ErrorEnvelope {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            success: None,
            error: ErrorBody {
                code: code.to_string(),
                message: message.into(),
                errors: BTreeMap::new(),
            },
        }
    }

    pub fn validation(message: impl Into<String>, errors: FieldErrors) -> Self {
        Self {
            success: Some(false),
            error: ErrorBody {
                code: "validation_error".to_string(),
                message: message.into(),
                errors,
            },
        }
    }
}
