use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sqlx::Postgres;
use sqlx::postgres::PgArguments;
use sqlx::query::Query;

use crate::libs::schema::{FieldSchema, SemanticType};

/// A source record: field name to JSON value.
pub type Record = Map<String, Value>;

/// A value ready to be bound to a statement placeholder.
#[derive(Debug, Clone, PartialEq)]
pub enum Param {
    Null,
    Text(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    /// Bound as `json`. Only used for ad-hoc statement parameters.
    Json(Value),
}

impl Param {
    /// Typed parameter for an arbitrary JSON value.
    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::Null => Param::Null,
            Value::Bool(b) => Param::Bool(*b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Param::Int(i),
                None => n.as_f64().map(Param::Float).unwrap_or_else(|| Param::Text(n.to_string())),
            },
            Value::String(s) => Param::Text(s.clone()),
            Value::Array(_) | Value::Object(_) => Param::Json(value.clone()),
        }
    }

    pub fn bind<'q>(self, query: Query<'q, Postgres, PgArguments>) -> Query<'q, Postgres, PgArguments> {
        match self {
            Param::Null => query.bind(None::<String>),
            Param::Text(s) => query.bind(s),
            Param::Int(i) => query.bind(i),
            Param::Float(f) => query.bind(f),
            Param::Bool(b) => query.bind(b),
            Param::Json(v) => query.bind(sqlx::types::Json(v)),
        }
    }
}

/// Convert one record into positional parameters, one per schema field.
///
/// Missing fields become null, nested objects and lists become JSON text,
/// and empty strings become null. Json-typed fields encode scalars as JSON
/// too, since the column only accepts valid JSON. Integer fields accept
/// whole-valued floats such as `74.0`.
pub fn record_params(record: &Record, schema: &FieldSchema) -> Vec<Param> {
    schema
        .fields()
        .iter()
        .map(|f| {
            let value = record.get(&f.name).unwrap_or(&Value::Null);
            match value {
                Value::Null => Param::Null,
                Value::String(s) if s.is_empty() => Param::Null,
                Value::Array(_) | Value::Object(_) => Param::Text(value.to_string()),
                _ if f.semantic_type == SemanticType::Json => Param::Text(value.to_string()),
                Value::String(s) => Param::Text(s.clone()),
                Value::Bool(b) => Param::Bool(*b),
                Value::Number(n) => match n.as_i64() {
                    Some(i) => Param::Int(i),
                    None if f.semantic_type == SemanticType::Integer => whole_number(n)
                        .map(Param::Int)
                        .unwrap_or_else(|| Param::Text(n.to_string())),
                    None => Param::Text(n.to_string()),
                },
            }
        })
        .collect()
}

fn whole_number(n: &serde_json::Number) -> Option<i64> {
    let f = n.as_f64()?;
    (f.fract() == 0.0 && f >= i64::MIN as f64 && f < i64::MAX as f64).then_some(f as i64)
}

/// Optional predicate deciding which records are skipped before insertion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum RecordFilter {
    /// Skip records whose `field` is the string `value`.
    ExcludeEquals { field: String, value: String },
}

impl RecordFilter {
    pub fn exclude_equals(field: &str, value: &str) -> Self {
        RecordFilter::ExcludeEquals {
            field: field.to_string(),
            value: value.to_string(),
        }
    }

    /// Skip players whose `status` is `"retired"`.
    pub fn exclude_retired() -> Self {
        Self::exclude_equals("status", "retired")
    }

    pub fn keeps(&self, record: &Record) -> bool {
        match self {
            RecordFilter::ExcludeEquals { field, value } => {
                record.get(field).and_then(Value::as_str) != Some(value.as_str())
            }
        }
    }
}
