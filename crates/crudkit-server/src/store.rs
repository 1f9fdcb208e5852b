use std::collections::HashMap;

use crudkit_config::{Config, ModelConfig};
use crudkit_contracts::{Condition, Direction, FindParams, Record, DEFAULT_FIND_METHOD};
use crudkit_kernel::{search_rows, ModelMeta, RecordSource};
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{params_from_iter, Connection};
use serde_json::{Number, Value};

pub(crate) enum StoreBackend {
    Memory(MemoryStore),
    Sqlite(SqliteStore),
}

#[derive(Default)]
pub(crate) struct MemoryStore {
    tables: HashMap<String, Vec<Record>>,
}

pub(crate) struct SqliteStore {
    conn: Connection,
}

impl StoreBackend {
    pub(crate) fn open(cfg: &Config) -> Result<Self, String> {
        if cfg.store.kind == "sqlite" {
            let sqlite_path = cfg
                .store
                .sqlite_path
                .as_deref()
                .ok_or_else(|| "store.sqlite_path is required for sqlite store".to_string())?;
            let mut store = SqliteStore::new(sqlite_path)?;
            for model in &cfg.models {
                store.create_table(model)?;
                store.seed(model)?;
            }
            Ok(StoreBackend::Sqlite(store))
        } else {
            let mut store = MemoryStore::default();
            for model in &cfg.models {
                store
                    .tables
                    .entry(model.table_name().to_string())
                    .or_default()
                    .extend(model.records.iter().cloned());
            }
            Ok(StoreBackend::Memory(store))
        }
    }

    pub(crate) fn kind(&self) -> &'static str {
        match self {
            StoreBackend::Memory(_) => "memory",
            StoreBackend::Sqlite(_) => "sqlite",
        }
    }
}

impl RecordSource for StoreBackend {
    fn find(&self, model: &ModelMeta, params: &FindParams) -> Result<Vec<Record>, String> {
        if params.find_method != DEFAULT_FIND_METHOD {
            return Err(format!(
                "find method {} is not implemented; supported: {DEFAULT_FIND_METHOD}",
                params.find_method
            ));
        }
        ensure_known_columns(model, params)?;
        match self {
            StoreBackend::Memory(store) => store
                .tables
                .get(&model.table)
                .map(|rows| search_rows(rows, params))
                .ok_or_else(|| format!("table {} does not exist", model.table)),
            StoreBackend::Sqlite(store) => store.find(model, params),
        }
    }
}

/// Listeners may rewrite find-params freely; only declared columns reach a backend.
fn ensure_known_columns(model: &ModelMeta, params: &FindParams) -> Result<(), String> {
    let referenced = params
        .fields
        .iter()
        .map(String::as_str)
        .chain(params.conditions.iter().map(Condition::field))
        .chain(params.order.iter().map(|o| o.field.as_str()));
    for column in referenced {
        if !model.has_column(column) {
            return Err(format!("unknown column {column} for {}", model.name));
        }
    }
    Ok(())
}

impl SqliteStore {
    fn new(path: &str) -> Result<Self, String> {
        let conn = Connection::open(path).map_err(|e| e.to_string())?;
        conn.execute_batch("PRAGMA case_sensitive_like = ON;")
            .map_err(|e| e.to_string())?;
        Ok(Self { conn })
    }

    fn create_table(&mut self, model: &ModelConfig) -> Result<(), String> {
        let columns: Vec<String> = model
            .columns
            .iter()
            .map(|c| {
                if c.name == model.primary_key {
                    format!("{} PRIMARY KEY", quote_ident(&c.name))
                } else {
                    quote_ident(&c.name)
                }
            })
            .collect();
        self.conn
            .execute_batch(&format!(
                "CREATE TABLE IF NOT EXISTS {} ({});",
                quote_ident(model.table_name()),
                columns.join(", ")
            ))
            .map_err(|e| e.to_string())
    }

    fn seed(&mut self, model: &ModelConfig) -> Result<(), String> {
        let columns: Vec<&str> = model.columns.iter().map(|c| c.name.as_str()).collect();
        let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("?{i}")).collect();
        let sql = format!(
            "INSERT OR IGNORE INTO {} ({}) VALUES ({})",
            quote_ident(model.table_name()),
            columns
                .iter()
                .map(|c| quote_ident(c))
                .collect::<Vec<_>>()
                .join(", "),
            placeholders.join(", ")
        );
        let tx = self.conn.transaction().map_err(|e| e.to_string())?;
        {
            let mut stmt = tx.prepare(&sql).map_err(|e| e.to_string())?;
            for record in &model.records {
                let values = columns
                    .iter()
                    .map(|c| to_sql(record.get(*c).unwrap_or(&Value::Null)));
                stmt.execute(params_from_iter(values))
                    .map_err(|e| e.to_string())?;
            }
        }
        tx.commit().map_err(|e| e.to_string())
    }

    fn find(&self, model: &ModelMeta, params: &FindParams) -> Result<Vec<Record>, String> {
        let columns: &[String] = if params.fields.is_empty() {
            &model.columns
        } else {
            &params.fields
        };

        let mut sql = format!(
            "SELECT {}{} FROM {}",
            if params.distinct { "DISTINCT " } else { "" },
            columns
                .iter()
                .map(|c| quote_ident(c))
                .collect::<Vec<_>>()
                .join(", "),
            quote_ident(&model.table)
        );

        let mut args: Vec<SqlValue> = Vec::new();
        let mut clauses = Vec::with_capacity(params.conditions.len());
        for condition in &params.conditions {
            let column = quote_ident(condition.field());
            let clause = match condition {
                Condition::Equals { value, .. } => {
                    args.push(to_sql(value));
                    format!("{column} = ?{}", args.len())
                }
                Condition::NotEqual { value, .. } => {
                    args.push(to_sql(value));
                    format!("{column} != ?{}", args.len())
                }
                Condition::NotNull { .. } => format!("{column} IS NOT NULL"),
                Condition::Like { pattern, .. } => {
                    args.push(SqlValue::Text(pattern.clone()));
                    format!("{column} LIKE ?{} ESCAPE '\\'", args.len())
                }
            };
            clauses.push(clause);
        }
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }

        if !params.order.is_empty() {
            let order: Vec<String> = params
                .order
                .iter()
                .map(|o| {
                    let dir = match o.direction {
                        Direction::Asc => "ASC",
                        Direction::Desc => "DESC",
                    };
                    format!("{} {dir}", quote_ident(&o.field))
                })
                .collect();
            sql.push_str(" ORDER BY ");
            sql.push_str(&order.join(", "));
        }

        if let Some(limit) = params.limit {
            args.push(SqlValue::Integer(to_i64(limit)));
            args.push(SqlValue::Integer(to_i64(params.offset())));
            sql.push_str(&format!(" LIMIT ?{} OFFSET ?{}", args.len() - 1, args.len()));
        }

        let mut stmt = self.conn.prepare(&sql).map_err(|e| e.to_string())?;
        let rows = stmt
            .query_map(params_from_iter(args.iter()), |row| {
                let mut record = Record::new();
                for (idx, column) in columns.iter().enumerate() {
                    record.insert(column.clone(), from_sql(row.get_ref(idx)?));
                }
                Ok(record)
            })
            .map_err(|e| e.to_string())?;
        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|e| e.to_string())
    }
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn to_i64(n: usize) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

fn to_sql(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => SqlValue::Real(n.as_f64().unwrap_or(0.0)),
        },
        Value::String(s) => SqlValue::Text(s.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}

fn from_sql(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null),
        ValueRef::Text(bytes) | ValueRef::Blob(bytes) => {
            Value::String(String::from_utf8_lossy(bytes).into_owned())
        }
    }
}
