//! Row-shape marshalling: verbose JSON objects, brief positional JSON
//! arrays and CSV records, all driven by the same per-column extraction
//! path.
//!
//! Virtual columns are materialized here, lazily per row: `address` from
//! the account-id column, `start_time`/`end_time` from the cycle column
//! through the height/time index.

use std::fmt::Write as _;

use chrono::SecondsFormat;

use kyklos_core::{AccountMap, BlockSlice, FieldValue, RowData, Timestamp, TipObservation};

use crate::coerce::pct_display;
use crate::registry::{FieldType, Schema, TimeTarget};

/// One resolved output cell.
enum Cell {
    /// Unknown or filter-only column: skipped with separator suppression.
    Missing,
    /// A failed lookup; renders as JSON null / empty CSV field.
    Null,
    Int(i64),
    UInt(u64),
    /// Display-units amount, emitted with the chain's decimals.
    Amount(f64),
    /// Percent, emitted with exactly two fractional digits.
    Pct(f64),
    Bool(bool),
    Text(String),
    Time(Timestamp),
    Hex(Vec<u8>),
}

pub struct RowEncoder<'a> {
    schema: &'a Schema,
    columns: &'a [String],
    tip: &'a TipObservation,
    blocks: &'a BlockSlice,
    accounts: &'a AccountMap,
}

impl<'a> RowEncoder<'a> {
    pub fn new(
        schema: &'a Schema,
        columns: &'a [String],
        tip: &'a TipObservation,
        blocks: &'a BlockSlice,
        accounts: &'a AccountMap,
    ) -> Self {
        Self {
            schema,
            columns,
            tip,
            blocks,
            accounts,
        }
    }

    /// Brief positional form: one JSON array in projection order.
    pub fn json_brief(&self, row: &dyn RowData, buf: &mut String) {
        buf.push('[');
        let mut first = true;
        for long in self.columns {
            let cell = self.cell(row, long);
            if matches!(cell, Cell::Missing) {
                continue;
            }
            if !first {
                buf.push(',');
            }
            first = false;
            self.push_json(buf, &cell, true);
        }
        buf.push(']');
    }

    /// Verbose form: one JSON object over the full public alias list.
    pub fn json_verbose(&self, row: &dyn RowData, buf: &mut String) {
        buf.push('{');
        let mut first = true;
        for long in self.schema.aliases() {
            let cell = self.cell(row, long);
            if matches!(cell, Cell::Missing) {
                continue;
            }
            if !first {
                buf.push(',');
            }
            first = false;
            push_quoted(buf, long);
            buf.push(':');
            self.push_json(buf, &cell, false);
        }
        buf.push('}');
    }

    pub fn csv_header(&self, buf: &mut String) {
        let mut first = true;
        for long in self.columns {
            if !self.is_encodable(long) {
                continue;
            }
            if !first {
                buf.push(',');
            }
            first = false;
            buf.push_str(long);
        }
        buf.push('\n');
    }

    pub fn csv_row(&self, row: &dyn RowData, buf: &mut String) {
        let mut first = true;
        for long in self.columns {
            let cell = self.cell(row, long);
            if matches!(cell, Cell::Missing) {
                continue;
            }
            if !first {
                buf.push(',');
            }
            first = false;
            self.push_csv(buf, &cell);
        }
        buf.push('\n');
    }

    /// Block timestamp by height; heights past the tip (the running
    /// cycle's end) extrapolate from the tip at the block time.
    fn block_time(&self, height: kyklos_core::BlockHeight) -> Option<Timestamp> {
        if let Some(t) = self.blocks.time_at(height) {
            return Some(t);
        }
        if height > self.tip.best_height {
            let ahead = height - self.tip.best_height;
            return Some(self.tip.best_time + self.tip.params.block_time() * ahead as i32);
        }
        None
    }

    /// Whether a projected name produces a field at all.
    fn is_encodable(&self, long: &str) -> bool {
        if self.schema.descriptor(long).is_some() {
            return true;
        }
        match long {
            "address" => self.schema.address_tag().is_some(),
            "start_time" | "end_time" => {
                self.schema.is_extra(long)
                    && matches!(self.schema.time_target(), Some(TimeTarget::Cycle { .. }))
            }
            _ => false,
        }
    }

    fn cell(&self, row: &dyn RowData, long: &str) -> Cell {
        // virtual columns first
        match long {
            "address" => {
                if let Some(tag) = self.schema.address_tag() {
                    return match row.get(tag) {
                        Some(FieldValue::U64(id)) => match self.accounts.address_of(id) {
                            Some(addr) => Cell::Text(addr.to_string()),
                            None => Cell::Text(String::new()),
                        },
                        _ => Cell::Null,
                    };
                }
            }
            "start_time" | "end_time" => {
                if self.is_encodable(long) {
                    let tag = self
                        .schema
                        .time_target()
                        .map(|t| t.tag())
                        .expect("encodable implies a time target");
                    let Some(FieldValue::I64(cycle)) = row.get(tag) else {
                        return Cell::Null;
                    };
                    let height = if long == "start_time" {
                        self.tip.params.cycle_start_height(cycle)
                    } else {
                        self.tip.params.cycle_end_height(cycle)
                    };
                    return match self.block_time(height) {
                        Some(t) => Cell::Time(t),
                        None => Cell::Null,
                    };
                }
            }
            _ => {}
        }

        let Some(desc) = self.schema.descriptor(long) else {
            return Cell::Missing;
        };
        let Some(value) = row.get(desc.short) else {
            return Cell::Missing;
        };
        match (desc.typ, value) {
            (FieldType::U64, FieldValue::U64(v)) => Cell::UInt(v),
            (FieldType::I64, FieldValue::I64(v)) => Cell::Int(v),
            (FieldType::Amount, FieldValue::I64(v)) => Cell::Amount(self.tip.params.to_display(v)),
            (FieldType::Pct, FieldValue::I64(v)) => Cell::Pct(pct_display(v)),
            (FieldType::Bool, FieldValue::Bool(v)) => Cell::Bool(v),
            (FieldType::Bytes, FieldValue::Bytes(v)) => Cell::Hex(v),
            (FieldType::Str, FieldValue::Str(v)) => Cell::Text(v),
            (FieldType::Time, FieldValue::Time(v)) => Cell::Time(v),
            _ => Cell::Null,
        }
    }

    fn push_json(&self, buf: &mut String, cell: &Cell, brief: bool) {
        match cell {
            Cell::Missing => {}
            Cell::Null => buf.push_str("null"),
            Cell::Int(v) => {
                let _ = write!(buf, "{v}");
            }
            Cell::UInt(v) => {
                let _ = write!(buf, "{v}");
            }
            Cell::Amount(v) => {
                let _ = write!(buf, "{:.*}", self.tip.params.decimals as usize, v);
            }
            Cell::Pct(v) => {
                let _ = write!(buf, "{v:.2}");
            }
            Cell::Bool(v) => buf.push_str(if *v { "true" } else { "false" }),
            Cell::Text(s) => push_quoted(buf, s),
            // brief rows carry unix milliseconds, verbose rows RFC3339
            Cell::Time(t) => {
                if brief {
                    let _ = write!(buf, "{}", t.timestamp_millis());
                } else {
                    push_quoted(buf, &rfc3339(t));
                }
            }
            Cell::Hex(bytes) => {
                buf.push('"');
                for b in bytes {
                    let _ = write!(buf, "{b:02x}");
                }
                buf.push('"');
            }
        }
    }

    fn push_csv(&self, buf: &mut String, cell: &Cell) {
        match cell {
            Cell::Missing | Cell::Null => {}
            Cell::Int(v) => {
                let _ = write!(buf, "{v}");
            }
            Cell::UInt(v) => {
                let _ = write!(buf, "{v}");
            }
            Cell::Amount(v) => {
                let _ = write!(buf, "{:.*}", self.tip.params.decimals as usize, v);
            }
            Cell::Pct(v) => {
                let _ = write!(buf, "{v:.2}");
            }
            Cell::Bool(v) => buf.push_str(if *v { "true" } else { "false" }),
            Cell::Text(s) => push_quoted(buf, s),
            Cell::Time(t) => push_quoted(buf, &rfc3339(t)),
            Cell::Hex(bytes) => {
                buf.push('"');
                for b in bytes {
                    let _ = write!(buf, "{b:02x}");
                }
                buf.push('"');
            }
        }
    }
}

/// UTC RFC3339 with second precision, deterministic across hosts.
fn rfc3339(t: &Timestamp) -> String {
    t.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn push_quoted(buf: &mut String, s: &str) {
    buf.push('"');
    for c in s.chars() {
        match c {
            '"' => buf.push_str("\\\""),
            '\\' => buf.push_str("\\\\"),
            '\n' => buf.push_str("\\n"),
            '\r' => buf.push_str("\\r"),
            '\t' => buf.push_str("\\t"),
            c if (c as u32) < 0x20 => {
                let _ = write!(buf, "\\u{:04x}", c as u32);
            }
            c => buf.push(c),
        }
    }
    buf.push('"');
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::TableRegistry;
    use kyklos_core::{ChainParams, RowId};
    use std::collections::HashMap;
    use std::sync::Arc;

    struct MapRow {
        pk: RowId,
        cells: HashMap<&'static str, FieldValue>,
    }

    impl RowData for MapRow {
        fn pk(&self) -> RowId {
            self.pk
        }

        fn get(&self, tag: &str) -> Option<FieldValue> {
            self.cells.get(tag).cloned()
        }
    }

    fn ts(s: &str) -> Timestamp {
        s.parse().unwrap()
    }

    struct Fixture {
        registry: TableRegistry,
        tip: TipObservation,
        blocks: BlockSlice,
        accounts: AccountMap,
    }

    impl Fixture {
        fn new() -> Self {
            let params = Arc::new(ChainParams {
                decimals: 6,
                block_time_secs: 60,
                blocks_per_cycle: 100,
            });
            let blocks = BlockSlice::new(
                (1..=250)
                    .map(|h| {
                        (
                            h,
                            ts("2023-01-01T00:00:00Z") + chrono::Duration::seconds(60 * h),
                        )
                    })
                    .collect(),
            );
            let (best_height, best_time) = blocks.tip().unwrap();
            let tip = TipObservation {
                best_height,
                best_time,
                best_cycle: params.cycle_from_height(best_height),
                params,
            };
            let accounts = AccountMap::new([(
                7u64,
                "tz1KqTpEZ7Yob7QbPE4Hy4Wo8fHG8LhKxZSx".parse().unwrap(),
            )]);
            Self {
                registry: TableRegistry::standard(),
                tip,
                blocks,
                accounts,
            }
        }

        fn income_row(&self) -> MapRow {
            let mut cells = HashMap::new();
            cells.insert("I", FieldValue::U64(1));
            cells.insert("c", FieldValue::I64(0));
            cells.insert("A", FieldValue::U64(7));
            cells.insert("b", FieldValue::I64(1_500_000));
            cells.insert("L", FieldValue::I64(9_999));
            MapRow { pk: 1, cells }
        }
    }

    #[test]
    fn brief_skips_unknown_columns_without_separator() {
        let fx = Fixture::new();
        let schema = fx.registry.get("income").unwrap();
        let columns = vec!["row_id".to_string(), "bogus".to_string(), "cycle".to_string()];
        let enc = RowEncoder::new(schema, &columns, &fx.tip, &fx.blocks, &fx.accounts);

        let mut buf = String::new();
        enc.json_brief(&fx.income_row(), &mut buf);
        assert_eq!(buf, "[1,0]");
    }

    #[test]
    fn brief_resolves_virtual_columns() {
        let fx = Fixture::new();
        let schema = fx.registry.get("income").unwrap();
        let columns = vec![
            "row_id".to_string(),
            "address".to_string(),
            "balance".to_string(),
            "luck_percent".to_string(),
            "start_time".to_string(),
            "end_time".to_string(),
        ];
        let enc = RowEncoder::new(schema, &columns, &fx.tip, &fx.blocks, &fx.accounts);

        let mut buf = String::new();
        enc.json_brief(&fx.income_row(), &mut buf);
        // cycle 0 spans heights 1..=100: 00:01:00 and 01:40:00 UTC
        let start_ms = ts("2023-01-01T00:01:00Z").timestamp_millis();
        let end_ms = ts("2023-01-01T01:40:00Z").timestamp_millis();
        assert_eq!(
            buf,
            format!(
                "[1,\"tz1KqTpEZ7Yob7QbPE4Hy4Wo8fHG8LhKxZSx\",1.500000,99.99,{start_ms},{end_ms}]"
            )
        );
    }

    #[test]
    fn verbose_emits_full_alias_object() {
        let fx = Fixture::new();
        let schema = fx.registry.get("income").unwrap();
        let columns = vec!["row_id".to_string()];
        let enc = RowEncoder::new(schema, &columns, &fx.tip, &fx.blocks, &fx.accounts);

        let mut buf = String::new();
        enc.json_verbose(&fx.income_row(), &mut buf);
        let parsed: serde_json::Value = serde_json::from_str(&buf).unwrap();
        let obj = parsed.as_object().unwrap();

        assert_eq!(obj["row_id"], 1);
        assert_eq!(obj["address"], "tz1KqTpEZ7Yob7QbPE4Hy4Wo8fHG8LhKxZSx");
        assert_eq!(obj["balance"], 1.5);
        assert_eq!(obj["luck_percent"], 99.99);
        assert_eq!(obj["start_time"], "2023-01-01T00:01:00Z");
    }

    #[test]
    fn csv_quotes_strings_and_times() {
        let fx = Fixture::new();
        let schema = fx.registry.get("income").unwrap();
        let columns = vec![
            "row_id".to_string(),
            "bogus".to_string(),
            "address".to_string(),
            "balance".to_string(),
            "end_time".to_string(),
        ];
        let enc = RowEncoder::new(schema, &columns, &fx.tip, &fx.blocks, &fx.accounts);

        let mut buf = String::new();
        enc.csv_header(&mut buf);
        enc.csv_row(&fx.income_row(), &mut buf);
        assert_eq!(
            buf,
            "row_id,address,balance,end_time\n\
             1,\"tz1KqTpEZ7Yob7QbPE4Hy4Wo8fHG8LhKxZSx\",1.500000,\"2023-01-01T01:40:00Z\"\n"
        );
    }

    #[test]
    fn missing_account_renders_empty_address() {
        let fx = Fixture::new();
        let schema = fx.registry.get("income").unwrap();
        let columns = vec!["address".to_string()];
        let enc = RowEncoder::new(schema, &columns, &fx.tip, &fx.blocks, &fx.accounts);

        let mut row = fx.income_row();
        row.cells.insert("A", FieldValue::U64(999));
        let mut buf = String::new();
        enc.json_brief(&row, &mut buf);
        assert_eq!(buf, "[\"\"]");
    }

    #[test]
    fn json_string_escaping() {
        let mut buf = String::new();
        push_quoted(&mut buf, "a\"b\\c\nd");
        assert_eq!(buf, "\"a\\\"b\\\\c\\nd\"");
    }
}
