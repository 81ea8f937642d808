use std::fmt::Display;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{RowId, Timestamp};

/// Traversal order of a table scan, always by primary key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Order {
    #[default]
    Asc,
    Desc,
}

/// Comparison operator of a single filter condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterMode {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
    NotIn,
    Range,
    Regexp,
}

impl FilterMode {
    /// Parse the wire form of a filter mode. An empty string is `Eq`.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "" | "eq" => Some(FilterMode::Eq),
            "ne" => Some(FilterMode::Ne),
            "gt" => Some(FilterMode::Gt),
            "gte" => Some(FilterMode::Gte),
            "lt" => Some(FilterMode::Lt),
            "lte" => Some(FilterMode::Lte),
            "in" => Some(FilterMode::In),
            "nin" => Some(FilterMode::NotIn),
            "rg" => Some(FilterMode::Range),
            "re" => Some(FilterMode::Regexp),
            _ => None,
        }
    }

    /// Modes that carry a comma-separated value list.
    pub fn takes_list(&self) -> bool {
        matches!(self, FilterMode::In | FilterMode::NotIn)
    }

    pub fn is_range(&self) -> bool {
        matches!(self, FilterMode::Range)
    }
}

impl Display for FilterMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FilterMode::Eq => "eq",
            FilterMode::Ne => "ne",
            FilterMode::Gt => "gt",
            FilterMode::Gte => "gte",
            FilterMode::Lt => "lt",
            FilterMode::Lte => "lte",
            FilterMode::In => "in",
            FilterMode::NotIn => "nin",
            FilterMode::Range => "rg",
            FilterMode::Regexp => "re",
        };
        f.write_str(s)
    }
}

/// A typed cell or condition payload.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    U64(u64),
    I64(i64),
    F64(f64),
    Bool(bool),
    Bytes(Vec<u8>),
    Str(String),
    Time(Timestamp),
}

impl FieldValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            FieldValue::U64(_) => "u64",
            FieldValue::I64(_) => "i64",
            FieldValue::F64(_) => "f64",
            FieldValue::Bool(_) => "bool",
            FieldValue::Bytes(_) => "bytes",
            FieldValue::Str(_) => "string",
            FieldValue::Time(_) => "time",
        }
    }
}

/// Payload of a condition: scalar, list, or inclusive range.
#[derive(Debug, Clone)]
pub enum CondValue {
    One(FieldValue),
    Many(Vec<FieldValue>),
    Range { from: FieldValue, to: FieldValue },
}

/// One compiled filter term against a storage column.
#[derive(Debug, Clone)]
pub struct Condition {
    /// Short tag of the storage column.
    pub field: &'static str,
    pub mode: FilterMode,
    pub value: CondValue,
    /// The raw request string that produced this condition, kept for
    /// tracing only.
    pub raw: String,
}

impl Condition {
    pub fn scalar(field: &'static str, mode: FilterMode, value: FieldValue, raw: &str) -> Self {
        Self {
            field,
            mode,
            value: CondValue::One(value),
            raw: raw.to_string(),
        }
    }
}

/// A compiled streaming query: projection, order, limit and an AND-list
/// of conditions, evaluated by the table store.
#[derive(Debug, Clone, Default)]
pub struct TableQuery {
    /// Short tags the caller wants materialized. Empty means all stored
    /// columns.
    pub fields: Vec<&'static str>,
    pub order: Order,
    /// Maximum rows to visit; 0 means unbounded (the transport clamps).
    pub limit: u32,
    pub conds: Vec<Condition>,
}

/// Row-callback verdict: keep streaming or stop without error.
///
/// `Stop` covers limit-reached and cancellation; neither is a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamAction {
    Continue,
    Stop,
}

/// A single row borrowed from the store for the duration of one callback.
pub trait RowData {
    fn pk(&self) -> RowId;

    /// Cell by short column tag; `None` when the column does not exist
    /// or was not materialized for this query.
    fn get(&self, tag: &str) -> Option<FieldValue>;
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("unknown table '{0}'")]
    UnknownTable(String),

    #[error("unknown column '{0}'")]
    UnknownColumn(String),

    #[error("type mismatch on column '{0}'")]
    TypeMismatch(String),

    #[error("invalid regexp '{0}'")]
    InvalidRegexp(String),

    #[error("storage error")]
    Internal(#[from] Box<dyn std::error::Error + Send + Sync>),
}

/// The columnar table abstraction: ordered streaming with pushdown
/// filters.
///
/// Implementations serialize all callback invocations of one `stream`
/// call on the caller's thread; rows must be decoded before the callback
/// returns.
pub trait TableStore: Send + Sync + 'static {
    fn contains(&self, entity: &str) -> bool;

    fn stream<F>(&self, entity: &str, query: &TableQuery, on_row: F) -> Result<(), StoreError>
    where
        F: FnMut(&dyn RowData) -> Result<StreamAction, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_mode_wire_forms() {
        for (s, m) in [
            ("eq", FilterMode::Eq),
            ("ne", FilterMode::Ne),
            ("gt", FilterMode::Gt),
            ("gte", FilterMode::Gte),
            ("lt", FilterMode::Lt),
            ("lte", FilterMode::Lte),
            ("in", FilterMode::In),
            ("nin", FilterMode::NotIn),
            ("rg", FilterMode::Range),
            ("re", FilterMode::Regexp),
        ] {
            assert_eq!(FilterMode::parse(s), Some(m));
            assert_eq!(m.to_string(), s);
        }
        assert_eq!(FilterMode::parse(""), Some(FilterMode::Eq));
        assert_eq!(FilterMode::parse("like"), None);
    }
}
