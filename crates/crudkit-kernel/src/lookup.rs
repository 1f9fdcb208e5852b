use std::collections::{BTreeMap, HashMap};

use crudkit_config::{LookupSettings, ID_ROLE, VALUE_ROLE};
use crudkit_contracts::{
    Condition, FindParams, LookupResponse, OrderBy, Record, StrategyKind,
};
use indexmap::IndexMap;
use serde_json::Value;
use thiserror::Error;

use crate::hooks::{ConditionEvent, Hooks};
use crate::matching::{like_pattern, search_rows};
use crate::ModelMeta;

#[derive(Debug, Error, PartialEq)]
pub enum LookupError {
    #[error("lookup misconfigured: {0}")]
    Misconfigured(String),
    #[error("bad lookup request: {0}")]
    BadRequest(String),
    #[error("record is missing field {field} for role {role}")]
    Projection { role: String, field: String },
    #[error("record search failed: {0}")]
    Store(String),
}

/// The "search records" abstraction the lookup action runs against.
pub trait RecordSource {
    fn find(&self, model: &ModelMeta, params: &FindParams) -> Result<Vec<Record>, String>;
}

impl RecordSource for Vec<Record> {
    fn find(&self, _model: &ModelMeta, params: &FindParams) -> Result<Vec<Record>, String> {
        Ok(search_rows(self, params))
    }
}

/// Query-string parameters of a lookup request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LookupQuery {
    params: HashMap<String, String>,
}

impl LookupQuery {
    pub fn new(params: HashMap<String, String>) -> Self {
        Self { params }
    }

    pub fn from_pairs<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            params: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    pub fn term(&self) -> Option<&str> {
        self.get("term")
    }

    pub fn field_for(&self, role: &str) -> Option<&str> {
        self.get(&format!("{role}_field")).filter(|v| !v.is_empty())
    }

    pub fn page(&self) -> Result<usize, LookupError> {
        match self.get("page") {
            None | Some("") => Ok(1),
            Some(raw) => match raw.parse::<usize>() {
                Ok(page) if page >= 1 => Ok(page),
                _ => Err(LookupError::BadRequest(format!(
                    "page must be a positive integer, got {raw:?}"
                ))),
            },
        }
    }
}

/// Lookup configuration resolved for a single request.
#[derive(Debug, Clone, PartialEq)]
pub struct LookupConfig {
    pub term: Option<String>,
    /// Role to column, in role declaration order.
    pub fields: IndexMap<String, String>,
    pub strategy_by_field: BTreeMap<String, StrategyKind>,
    pub default_strategy: StrategyKind,
    pub find_method: String,
    pub order: Vec<OrderBy>,
    pub conditions: Vec<Condition>,
    pub limit: usize,
    pub page: usize,
    pub view_var: String,
}

impl LookupConfig {
    pub fn value_field(&self) -> Option<&str> {
        self.fields
            .get(VALUE_ROLE)
            .map(String::as_str)
            .filter(|f| !f.is_empty())
    }

    pub fn strategy_for(&self, field: &str) -> StrategyKind {
        self.strategy_by_field
            .get(field)
            .copied()
            .unwrap_or(self.default_strategy)
    }
}

/// Lookup action bound to one model for the lifetime of one request.
///
/// Resolution writes the request-derived term and fields back into the
/// action's settings and caches the result, so later calls never consult the
/// request again.
#[derive(Debug)]
pub struct LookupAction<'a> {
    model: &'a ModelMeta,
    settings: LookupSettings,
    resolved: Option<LookupConfig>,
}

impl<'a> LookupAction<'a> {
    pub fn new(model: &'a ModelMeta) -> Self {
        Self::with_settings(model, model.lookup.clone())
    }

    pub fn with_settings(model: &'a ModelMeta, settings: LookupSettings) -> Self {
        Self {
            model,
            settings,
            resolved: None,
        }
    }

    pub fn settings(&self) -> &LookupSettings {
        &self.settings
    }

    pub fn resolve(&mut self, query: &LookupQuery) -> Result<&LookupConfig, LookupError> {
        if self.resolved.is_none() {
            let config = self.resolve_uncached(query)?;
            self.resolved = Some(config);
        }
        self.resolved
            .as_ref()
            .ok_or_else(|| LookupError::Misconfigured("lookup config was not resolved".into()))
    }

    fn resolve_uncached(&mut self, query: &LookupQuery) -> Result<LookupConfig, LookupError> {
        let page = query.page()?;
        let term = match &self.settings.term {
            Some(term) => Some(term.clone()),
            None => query.term().map(str::to_string),
        };

        let mut fields = IndexMap::with_capacity(self.settings.fields.len());
        for (role, configured) in &self.settings.fields {
            let column = match configured {
                Some(column) => column.clone(),
                None => self.requested_field(role, query)?,
            };
            fields.insert(role.clone(), column);
        }

        // Settings only change once the whole request has been accepted.
        self.settings.term = term.clone();
        for (role, column) in &fields {
            self.settings
                .fields
                .insert(role.clone(), Some(column.clone()));
        }

        let config = LookupConfig {
            term,
            fields,
            strategy_by_field: self.settings.strategy.clone(),
            default_strategy: self.settings.default_strategy,
            find_method: self.settings.find_method.clone(),
            order: self.settings.order.clone(),
            conditions: self.settings.conditions.clone(),
            limit: self.settings.limit.clamp(1, self.settings.max_limit.max(1)),
            page,
            view_var: self.settings.view_var.clone(),
        };
        tracing::debug!(
            model = %self.model.name,
            term = ?config.term,
            fields = ?config.fields,
            "resolved lookup config"
        );
        Ok(config)
    }

    fn requested_field(&self, role: &str, query: &LookupQuery) -> Result<String, LookupError> {
        match query.field_for(role) {
            Some(requested) if self.model.has_column(requested) => Ok(requested.to_string()),
            Some(requested) => Err(LookupError::BadRequest(format!(
                "{role}_field {requested} is not a column of {}",
                self.model.name
            ))),
            None if role == ID_ROLE => Ok(self.model.primary_key.clone()),
            None if role == VALUE_ROLE => Ok(self.model.display_field.clone()),
            None => Err(LookupError::Misconfigured(format!(
                "role {role} of {} has no field; configure it or pass {role}_field",
                self.model.name
            ))),
        }
    }

    /// Resolves the config and builds the find-params the search will use.
    pub fn find_params(
        &mut self,
        query: &LookupQuery,
        hooks: &Hooks,
    ) -> Result<FindParams, LookupError> {
        let config = self.resolve(query)?;
        build_find_params(config, hooks)
    }

    /// Full lookup: build params, search, post-process and shape the result.
    pub fn run(
        &mut self,
        query: &LookupQuery,
        source: &dyn RecordSource,
        hooks: &Hooks,
    ) -> Result<LookupResponse, LookupError> {
        let params = self.find_params(query, hooks)?;
        let rows = source
            .find(self.model, &params)
            .map_err(LookupError::Store)?;
        self.finish(rows, hooks)
    }

    /// Post-search half of the pipeline: after-lookup hook, shaping and
    /// before-render. Needs a prior `resolve`.
    pub fn finish(&self, rows: Vec<Record>, hooks: &Hooks) -> Result<LookupResponse, LookupError> {
        let config = self.resolved.as_ref().ok_or_else(|| {
            LookupError::Misconfigured("lookup finished before it was resolved".into())
        })?;
        let rows = hooks.after_lookup(rows);
        let items = shape_items(rows, &config.fields)?;
        tracing::debug!(model = %self.model.name, items = items.len(), "lookup finished");

        Ok(hooks.lookup_before_render(LookupResponse {
            success: true,
            view_var: config.view_var.clone(),
            items,
        }))
    }
}

/// Translates a resolved config into find-params, firing the condition and
/// before-lookup hooks. Listener output replaces the builder's.
pub fn build_find_params(config: &LookupConfig, hooks: &Hooks) -> Result<FindParams, LookupError> {
    let value = config.value_field().ok_or_else(|| {
        LookupError::Misconfigured(format!("role {VALUE_ROLE} has no field"))
    })?;

    let mut fields: Vec<String> = Vec::with_capacity(config.fields.len());
    for column in config.fields.values() {
        if !fields.contains(column) {
            fields.push(column.clone());
        }
    }

    let order = if config.order.is_empty() {
        vec![OrderBy::asc(value)]
    } else {
        config.order.clone()
    };

    let params = FindParams {
        find_method: config.find_method.clone(),
        fields,
        distinct: true,
        conditions: config.conditions.clone(),
        order,
        limit: Some(config.limit),
        page: config.page,
    };

    let term = config.term.as_deref().unwrap_or("");
    let params = add_condition(config, value, term, params, hooks);
    let params = hooks.before_lookup(&config.find_method, params);
    tracing::debug!(?params, "lookup find params");
    Ok(params)
}

fn add_condition(
    config: &LookupConfig,
    field: &str,
    term: &str,
    mut params: FindParams,
    hooks: &Hooks,
) -> FindParams {
    let strategy = if term.is_empty() {
        // An empty term lists every non-blank value.
        params.conditions.push(Condition::NotEqual {
            field: field.to_string(),
            value: Value::String(String::new()),
        });
        params.conditions.push(Condition::NotNull {
            field: field.to_string(),
        });
        None
    } else {
        let strategy = config.strategy_for(field);
        if let Some(pattern) = like_pattern(strategy, term) {
            params.conditions.push(Condition::Like {
                field: field.to_string(),
                pattern,
            });
        }
        Some(strategy)
    };

    let event = ConditionEvent {
        field,
        strategy,
        term,
    };
    hooks.lookup_condition(&event, params)
}

/// Reshapes rows into `{role: row[column]}` maps in role order.
pub fn shape_items(
    rows: impl IntoIterator<Item = Record>,
    fields: &IndexMap<String, String>,
) -> Result<Vec<Record>, LookupError> {
    let rows: Vec<Record> = rows.into_iter().collect();
    let mut items = Vec::with_capacity(rows.len());
    for row in &rows {
        let mut item = Record::new();
        for (role, column) in fields {
            let value = row.get(column).ok_or_else(|| LookupError::Projection {
                role: role.clone(),
                field: column.clone(),
            })?;
            item.insert(role.clone(), value.clone());
        }
        items.push(item);
    }
    Ok(items)
}
