//! In-memory columnar implementation of the [`TableStore`] contract.
//!
//! Rows live in primary-key order inside typed column vectors. Scans walk
//! the key order in either direction, evaluate the AND-list of pushdown
//! conditions per row and hand matching rows to the caller's callback.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use itertools::Itertools;
use regex::Regex;

use kyklos_core::{
    CondValue, Condition, FieldValue, FilterMode, Order, RowData, RowId, StoreError, StreamAction,
    TableQuery, TableStore, Timestamp,
};

/// One typed column of a table.
#[derive(Debug, Clone)]
pub enum Column {
    U64(Vec<u64>),
    I64(Vec<i64>),
    F64(Vec<f64>),
    Bool(Vec<bool>),
    Bytes(Vec<Vec<u8>>),
    Str(Vec<String>),
    Time(Vec<Timestamp>),
}

impl Column {
    fn len(&self) -> usize {
        match self {
            Column::U64(v) => v.len(),
            Column::I64(v) => v.len(),
            Column::F64(v) => v.len(),
            Column::Bool(v) => v.len(),
            Column::Bytes(v) => v.len(),
            Column::Str(v) => v.len(),
            Column::Time(v) => v.len(),
        }
    }

    fn value_at(&self, i: usize) -> FieldValue {
        match self {
            Column::U64(v) => FieldValue::U64(v[i]),
            Column::I64(v) => FieldValue::I64(v[i]),
            Column::F64(v) => FieldValue::F64(v[i]),
            Column::Bool(v) => FieldValue::Bool(v[i]),
            Column::Bytes(v) => FieldValue::Bytes(v[i].clone()),
            Column::Str(v) => FieldValue::Str(v[i].clone()),
            Column::Time(v) => FieldValue::Time(v[i]),
        }
    }

    fn type_name(&self) -> &'static str {
        match self {
            Column::U64(_) => "u64",
            Column::I64(_) => "i64",
            Column::F64(_) => "f64",
            Column::Bool(_) => "bool",
            Column::Bytes(_) => "bytes",
            Column::Str(_) => "string",
            Column::Time(_) => "time",
        }
    }

    fn accepts(&self, value: &FieldValue) -> bool {
        self.type_name() == value.type_name()
    }
}

/// An immutable in-memory table, rows sorted by primary key.
#[derive(Debug)]
pub struct MemTable {
    pk_tag: &'static str,
    pks: Vec<RowId>,
    columns: HashMap<&'static str, Column>,
}

impl MemTable {
    pub fn builder(pk_tag: &'static str) -> MemTableBuilder {
        MemTableBuilder {
            pk_tag,
            rows: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.pks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pks.is_empty()
    }
}

/// Row-at-a-time builder; pivots into columns on `build`.
pub struct MemTableBuilder {
    pk_tag: &'static str,
    rows: Vec<(RowId, Vec<(&'static str, FieldValue)>)>,
}

impl MemTableBuilder {
    pub fn row(mut self, pk: RowId, cells: Vec<(&'static str, FieldValue)>) -> Self {
        self.rows.push((pk, cells));
        self
    }

    pub fn build(mut self) -> Result<MemTable, StoreError> {
        self.rows.sort_by_key(|(pk, _)| *pk);

        let mut pks = Vec::with_capacity(self.rows.len());
        let mut columns: HashMap<&'static str, Column> = HashMap::new();
        columns.insert(self.pk_tag, Column::U64(Vec::new()));

        for (pk, cells) in self.rows {
            pks.push(pk);
            push_cell(&mut columns, self.pk_tag, FieldValue::U64(pk))?;
            for (tag, value) in cells {
                push_cell(&mut columns, tag, value)?;
            }
        }

        // uniform rows only: every column must cover every row
        for (tag, col) in &columns {
            if col.len() != pks.len() {
                return Err(StoreError::Internal(
                    format!("column '{tag}' has {} of {} rows", col.len(), pks.len()).into(),
                ));
            }
        }

        Ok(MemTable {
            pk_tag: self.pk_tag,
            pks,
            columns,
        })
    }
}

fn push_cell(
    columns: &mut HashMap<&'static str, Column>,
    tag: &'static str,
    value: FieldValue,
) -> Result<(), StoreError> {
    let col = columns.entry(tag).or_insert_with(|| match &value {
        FieldValue::U64(_) => Column::U64(Vec::new()),
        FieldValue::I64(_) => Column::I64(Vec::new()),
        FieldValue::F64(_) => Column::F64(Vec::new()),
        FieldValue::Bool(_) => Column::Bool(Vec::new()),
        FieldValue::Bytes(_) => Column::Bytes(Vec::new()),
        FieldValue::Str(_) => Column::Str(Vec::new()),
        FieldValue::Time(_) => Column::Time(Vec::new()),
    });
    match (col, value) {
        (Column::U64(v), FieldValue::U64(x)) => v.push(x),
        (Column::I64(v), FieldValue::I64(x)) => v.push(x),
        (Column::F64(v), FieldValue::F64(x)) => v.push(x),
        (Column::Bool(v), FieldValue::Bool(x)) => v.push(x),
        (Column::Bytes(v), FieldValue::Bytes(x)) => v.push(x),
        (Column::Str(v), FieldValue::Str(x)) => v.push(x),
        (Column::Time(v), FieldValue::Time(x)) => v.push(x),
        _ => return Err(StoreError::TypeMismatch(tag.to_string())),
    }
    Ok(())
}

/// Process-wide collection of named in-memory tables.
#[derive(Default, Clone)]
pub struct MemTableStore {
    inner: Arc<RwLock<HashMap<String, Arc<MemTable>>>>,
}

impl MemTableStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, entity: &str, table: MemTable) {
        self.inner
            .write()
            .expect("memtable store poisoned")
            .insert(entity.to_string(), Arc::new(table));
    }

    fn get(&self, entity: &str) -> Result<Arc<MemTable>, StoreError> {
        self.inner
            .read()
            .expect("memtable store poisoned")
            .get(entity)
            .cloned()
            .ok_or_else(|| StoreError::UnknownTable(entity.to_string()))
    }
}

struct CompiledCond<'a> {
    column: &'a Column,
    mode: FilterMode,
    value: &'a CondValue,
    regex: Option<Regex>,
}

fn compile_cond<'a>(table: &'a MemTable, cond: &'a Condition) -> Result<CompiledCond<'a>, StoreError> {
    let column = table
        .columns
        .get(cond.field)
        .ok_or_else(|| StoreError::UnknownColumn(cond.field.to_string()))?;

    let check = |value: &FieldValue| -> Result<(), StoreError> {
        if column.accepts(value) {
            Ok(())
        } else {
            Err(StoreError::TypeMismatch(cond.field.to_string()))
        }
    };

    let mut regex = None;
    match (&cond.mode, &cond.value) {
        (FilterMode::Regexp, CondValue::One(FieldValue::Str(pattern))) => {
            if !matches!(column, Column::Str(_)) {
                return Err(StoreError::TypeMismatch(cond.field.to_string()));
            }
            regex = Some(
                Regex::new(pattern).map_err(|_| StoreError::InvalidRegexp(pattern.clone()))?,
            );
        }
        (FilterMode::Regexp, _) => {
            return Err(StoreError::TypeMismatch(cond.field.to_string()));
        }
        (_, CondValue::One(v)) => check(v)?,
        (_, CondValue::Many(vs)) => {
            for v in vs {
                check(v)?;
            }
        }
        (_, CondValue::Range { from, to }) => {
            check(from)?;
            check(to)?;
        }
    }

    Ok(CompiledCond {
        column,
        mode: cond.mode,
        value: &cond.value,
        regex,
    })
}

fn cmp_values(a: &FieldValue, b: &FieldValue) -> Option<Ordering> {
    match (a, b) {
        (FieldValue::U64(x), FieldValue::U64(y)) => Some(x.cmp(y)),
        (FieldValue::I64(x), FieldValue::I64(y)) => Some(x.cmp(y)),
        (FieldValue::F64(x), FieldValue::F64(y)) => x.partial_cmp(y),
        (FieldValue::Bool(x), FieldValue::Bool(y)) => Some(x.cmp(y)),
        (FieldValue::Bytes(x), FieldValue::Bytes(y)) => Some(x.cmp(y)),
        (FieldValue::Str(x), FieldValue::Str(y)) => Some(x.cmp(y)),
        (FieldValue::Time(x), FieldValue::Time(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

impl CompiledCond<'_> {
    fn matches(&self, i: usize) -> bool {
        let cell = self.column.value_at(i);
        match (&self.mode, self.value) {
            (FilterMode::Eq, CondValue::One(v)) => cell == *v,
            (FilterMode::Ne, CondValue::One(v)) => cell != *v,
            (FilterMode::Gt, CondValue::One(v)) => {
                cmp_values(&cell, v) == Some(Ordering::Greater)
            }
            (FilterMode::Gte, CondValue::One(v)) => {
                matches!(cmp_values(&cell, v), Some(Ordering::Greater | Ordering::Equal))
            }
            (FilterMode::Lt, CondValue::One(v)) => cmp_values(&cell, v) == Some(Ordering::Less),
            (FilterMode::Lte, CondValue::One(v)) => {
                matches!(cmp_values(&cell, v), Some(Ordering::Less | Ordering::Equal))
            }
            // an empty list never matches, for both polarities; this is
            // what makes dropped unknown addresses yield an empty stream
            (FilterMode::In, CondValue::Many(vs)) => vs.contains(&cell),
            (FilterMode::NotIn, CondValue::Many(vs)) => !vs.is_empty() && !vs.contains(&cell),
            (FilterMode::Range, CondValue::Range { from, to }) => {
                matches!(cmp_values(&cell, from), Some(Ordering::Greater | Ordering::Equal))
                    && matches!(cmp_values(&cell, to), Some(Ordering::Less | Ordering::Equal))
            }
            (FilterMode::Regexp, _) => match (&self.regex, &cell) {
                (Some(re), FieldValue::Str(s)) => re.is_match(s),
                _ => false,
            },
            _ => false,
        }
    }
}

struct RowView<'a> {
    table: &'a MemTable,
    idx: usize,
    fields: &'a [&'static str],
}

impl RowData for RowView<'_> {
    fn pk(&self) -> RowId {
        self.table.pks[self.idx]
    }

    fn get(&self, tag: &str) -> Option<FieldValue> {
        if !self.fields.is_empty() && !self.fields.iter().any(|f| *f == tag) {
            return None;
        }
        self.table
            .columns
            .get(tag)
            .map(|col| col.value_at(self.idx))
    }
}

impl TableStore for MemTableStore {
    fn contains(&self, entity: &str) -> bool {
        self.get(entity).is_ok()
    }

    fn stream<F>(&self, entity: &str, query: &TableQuery, mut on_row: F) -> Result<(), StoreError>
    where
        F: FnMut(&dyn RowData) -> Result<StreamAction, StoreError>,
    {
        let table = self.get(entity)?;

        let conds: Vec<_> = query
            .conds
            .iter()
            .map(|c| compile_cond(&table, c))
            .try_collect()?;

        tracing::trace!(
            entity,
            conditions = conds.len(),
            limit = query.limit,
            "streaming table scan"
        );

        let mut emitted = 0u32;
        let indexes: Box<dyn Iterator<Item = usize>> = match query.order {
            Order::Asc => Box::new(0..table.len()),
            Order::Desc => Box::new((0..table.len()).rev()),
        };

        for i in indexes {
            if !conds.iter().all(|c| c.matches(i)) {
                continue;
            }
            let row = RowView {
                table: &table,
                idx: i,
                fields: &query.fields,
            };
            match on_row(&row)? {
                StreamAction::Continue => {}
                StreamAction::Stop => return Ok(()),
            }
            emitted += 1;
            if query.limit > 0 && emitted == query.limit {
                return Ok(());
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kyklos_core::Condition;

    fn sample_store() -> MemTableStore {
        let table = MemTable::builder("I")
            .row(
                3,
                vec![
                    ("c", FieldValue::I64(1)),
                    ("A", FieldValue::U64(700)),
                    ("n", FieldValue::Str("carol".into())),
                ],
            )
            .row(
                1,
                vec![
                    ("c", FieldValue::I64(0)),
                    ("A", FieldValue::U64(500)),
                    ("n", FieldValue::Str("alice".into())),
                ],
            )
            .row(
                2,
                vec![
                    ("c", FieldValue::I64(0)),
                    ("A", FieldValue::U64(600)),
                    ("n", FieldValue::Str("bob".into())),
                ],
            )
            .build()
            .unwrap();

        let store = MemTableStore::new();
        store.insert("income", table);
        store
    }

    fn collect_pks(store: &MemTableStore, query: &TableQuery) -> Vec<RowId> {
        let mut out = Vec::new();
        store
            .stream("income", query, |row| {
                out.push(row.pk());
                Ok(StreamAction::Continue)
            })
            .unwrap();
        out
    }

    #[test]
    fn scan_orders_by_pk() {
        let store = sample_store();
        let mut q = TableQuery::default();
        assert_eq!(collect_pks(&store, &q), vec![1, 2, 3]);
        q.order = Order::Desc;
        assert_eq!(collect_pks(&store, &q), vec![3, 2, 1]);
    }

    #[test]
    fn limit_bounds_the_scan() {
        let store = sample_store();
        let q = TableQuery {
            limit: 2,
            ..Default::default()
        };
        assert_eq!(collect_pks(&store, &q), vec![1, 2]);
    }

    #[test]
    fn stop_terminates_without_error() {
        let store = sample_store();
        let mut seen = 0;
        store
            .stream("income", &TableQuery::default(), |_| {
                seen += 1;
                Ok(StreamAction::Stop)
            })
            .unwrap();
        assert_eq!(seen, 1);
    }

    #[test]
    fn conditions_are_anded() {
        let store = sample_store();
        let q = TableQuery {
            conds: vec![
                Condition::scalar("c", FilterMode::Eq, FieldValue::I64(0), "0"),
                Condition::scalar("A", FilterMode::Gte, FieldValue::U64(600), "600"),
            ],
            ..Default::default()
        };
        assert_eq!(collect_pks(&store, &q), vec![2]);
    }

    #[test]
    fn range_is_inclusive() {
        let store = sample_store();
        let q = TableQuery {
            conds: vec![Condition {
                field: "A",
                mode: FilterMode::Range,
                value: CondValue::Many(vec![]),
                raw: String::new(),
            }],
            ..Default::default()
        };
        // malformed payload for the mode matches nothing
        assert_eq!(collect_pks(&store, &q), Vec::<RowId>::new());

        let q = TableQuery {
            conds: vec![Condition {
                field: "A",
                mode: FilterMode::Range,
                value: CondValue::Range {
                    from: FieldValue::U64(500),
                    to: FieldValue::U64(600),
                },
                raw: String::new(),
            }],
            ..Default::default()
        };
        assert_eq!(collect_pks(&store, &q), vec![1, 2]);
    }

    #[test]
    fn empty_list_matches_nothing_in_both_polarities() {
        let store = sample_store();
        for mode in [FilterMode::In, FilterMode::NotIn] {
            let q = TableQuery {
                conds: vec![Condition {
                    field: "A",
                    mode,
                    value: CondValue::Many(vec![]),
                    raw: String::new(),
                }],
                ..Default::default()
            };
            assert_eq!(collect_pks(&store, &q), Vec::<RowId>::new(), "{mode}");
        }
    }

    #[test]
    fn regexp_matches_string_columns_only() {
        let store = sample_store();
        let q = TableQuery {
            conds: vec![Condition::scalar(
                "n",
                FilterMode::Regexp,
                FieldValue::Str("^(alice|carol)$".into()),
                "",
            )],
            ..Default::default()
        };
        assert_eq!(collect_pks(&store, &q), vec![1, 3]);

        let q = TableQuery {
            conds: vec![Condition::scalar(
                "A",
                FilterMode::Regexp,
                FieldValue::Str("5.*".into()),
                "",
            )],
            ..Default::default()
        };
        let err = store.stream("income", &q, |_| Ok(StreamAction::Continue));
        assert!(matches!(err, Err(StoreError::TypeMismatch(_))));
    }

    #[test]
    fn unknown_table_and_column_are_rejected() {
        let store = sample_store();
        assert!(matches!(
            store.stream("bogus", &TableQuery::default(), |_| Ok(
                StreamAction::Continue
            )),
            Err(StoreError::UnknownTable(_))
        ));

        let q = TableQuery {
            conds: vec![Condition::scalar(
                "zz",
                FilterMode::Eq,
                FieldValue::U64(1),
                "",
            )],
            ..Default::default()
        };
        assert!(matches!(
            store.stream("income", &q, |_| Ok(StreamAction::Continue)),
            Err(StoreError::UnknownColumn(_))
        ));
    }

    #[test]
    fn projection_hides_unselected_fields() {
        let store = sample_store();
        let q = TableQuery {
            fields: vec!["I", "c"],
            ..Default::default()
        };
        store
            .stream("income", &q, |row| {
                assert!(row.get("c").is_some());
                assert!(row.get("A").is_none());
                Ok(StreamAction::Continue)
            })
            .unwrap();
    }
}
