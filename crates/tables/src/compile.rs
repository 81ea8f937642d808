//! Translates the flat `field[.mode]=value` request surface into a
//! typed [`TableQuery`] against storage columns.

use itertools::Itertools;

use kyklos_core::{CondValue, Condition, FieldValue, FilterMode, Order, TableQuery, Timestamp};

use crate::coerce::{parse_time, Coercer};
use crate::error::Error;
use crate::registry::{FieldType, Schema, TimeTarget, RESERVED_KEYS, VIRTUAL_TAG};

/// Wire format of the response body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Format {
    #[default]
    Json,
    Csv,
}

impl Format {
    pub fn content_type(&self) -> &'static str {
        match self {
            Format::Json => "application/json",
            Format::Csv => "text/csv",
        }
    }
}

/// Transport-level request knobs, parsed before predicate compilation.
#[derive(Debug, Clone, Default)]
pub struct TableParams {
    pub columns: Vec<String>,
    pub limit: u32,
    /// Raw cursor string, echoed back verbatim when no rows stream.
    pub cursor: Option<String>,
    pub order: Order,
    pub verbose: bool,
    pub format: Format,
    pub filename: Option<String>,
}

/// A fully compiled request, ready to stream.
#[derive(Debug, Clone)]
pub struct CompiledRequest {
    pub params: TableParams,
    pub query: TableQuery,
    /// Caller-visible projection in long names; drives encoder order.
    pub columns: Vec<String>,
}

/// Compile one request against a schema. All rejections happen here,
/// before any response byte is written.
pub fn compile(
    schema: &Schema,
    coercer: &Coercer<'_>,
    pairs: &[(String, String)],
    max_limit: u32,
) -> Result<CompiledRequest, Error> {
    let params = parse_params(pairs, max_limit)?;

    // projection: map caller columns to the storage fetch set, or fall
    // back to all stored fields with the public alias list on top
    let columns: Vec<String> = if params.columns.is_empty() {
        schema.aliases().iter().map(|s| s.to_string()).collect()
    } else {
        params.columns.clone()
    };

    let fields: Vec<&'static str> = if params.columns.is_empty() || params.verbose {
        Vec::new() // all stored columns
    } else {
        let mut fields = Vec::new();
        for name in &params.columns {
            // unknown projection names are skipped here and at encode time
            if let Some(short) = schema.short_of(name) {
                if short != VIRTUAL_TAG && !fields.contains(&short) {
                    fields.push(short);
                }
            }
        }
        fields
    };

    let mut query = TableQuery {
        fields,
        order: params.order,
        limit: params.limit,
        conds: Vec::new(),
    };

    for (key, value) in pairs {
        let (name, mode_str) = match key.split_once('.') {
            Some((n, m)) => (n, m),
            None => (key.as_str(), ""),
        };

        if RESERVED_KEYS.iter().any(|k| *k == name) {
            if name == "cursor" {
                compile_cursor(schema, &params, value, &mut query)?;
            }
            continue;
        }

        if name == "address" && schema.address_tag().is_some() {
            compile_address(schema, coercer, mode_str, value, &mut query)?;
            continue;
        }

        if let Some(target) = schema.time_target() {
            match name {
                "time" => {
                    compile_time(target, coercer, mode_str, value, &mut query)?;
                    continue;
                }
                "start_time" | "end_time" if schema.is_extra(name) => {
                    compile_cycle_bound(target, coercer, name, mode_str, value, &mut query)?;
                    continue;
                }
                _ => {}
            }
        }

        compile_generic(schema, coercer, name, mode_str, value, &mut query)?;
    }

    Ok(CompiledRequest {
        params,
        query,
        columns,
    })
}

fn parse_params(pairs: &[(String, String)], max_limit: u32) -> Result<TableParams, Error> {
    let mut params = TableParams {
        limit: max_limit,
        ..Default::default()
    };

    for (key, value) in pairs {
        match key.as_str() {
            "columns" => {
                params.columns = value
                    .split(',')
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect();
            }
            "limit" => {
                let n: u32 = value
                    .parse()
                    .map_err(|_| Error::param(format!("invalid limit value '{value}'")))?;
                params.limit = if n == 0 { max_limit } else { n.min(max_limit) };
            }
            "order" => {
                params.order = match value.as_str() {
                    "asc" => Order::Asc,
                    "desc" => Order::Desc,
                    _ => return Err(Error::param(format!("invalid order value '{value}'"))),
                };
            }
            "verbose" => {
                params.verbose = match value.as_str() {
                    "1" | "true" => true,
                    "" | "0" | "false" => false,
                    _ => return Err(Error::param(format!("invalid verbose value '{value}'"))),
                };
            }
            "format" => {
                params.format = match value.as_str() {
                    "" | "json" => Format::Json,
                    "csv" => Format::Csv,
                    _ => return Err(Error::param(format!("invalid format value '{value}'"))),
                };
            }
            "filename" => params.filename = Some(value.clone()),
            "cursor" => params.cursor = Some(value.clone()),
            _ => {}
        }
    }

    Ok(params)
}

/// `cursor=N` continues after the last emitted primary key: `pk > N`
/// ascending, `pk < N` descending.
fn compile_cursor(
    schema: &Schema,
    params: &TableParams,
    value: &str,
    query: &mut TableQuery,
) -> Result<(), Error> {
    let id: u64 = value
        .parse()
        .map_err(|_| Error::param(format!("invalid cursor value '{value}'")))?;
    let mode = match params.order {
        Order::Asc => FilterMode::Gt,
        Order::Desc => FilterMode::Lt,
    };
    query.conds.push(Condition::scalar(
        schema.pk().short,
        mode,
        FieldValue::U64(id),
        value,
    ));
    Ok(())
}

fn compile_address(
    schema: &Schema,
    coercer: &Coercer<'_>,
    mode_str: &str,
    value: &str,
    query: &mut TableQuery,
) -> Result<(), Error> {
    let tag = schema.address_tag().expect("checked by caller");
    let mode = FilterMode::parse(mode_str).ok_or_else(|| invalid_mode("address", mode_str))?;

    match mode {
        FilterMode::In | FilterMode::NotIn => {
            // unknown addresses drop out silently; an empty remainder is
            // the guaranteed-false predicate
            let ids: Vec<_> = value
                .split(',')
                .map(|part| coercer.account_id(part))
                .filter_map_ok(|id| id.map(FieldValue::U64))
                .try_collect()?;
            query.conds.push(Condition {
                field: tag,
                mode,
                value: CondValue::Many(ids),
                raw: value.to_string(),
            });
            Ok(())
        }
        _ => {
            let id = coercer.account_id(value)?;
            if !matches!(mode, FilterMode::Eq | FilterMode::Ne) {
                return Err(invalid_mode("address", mode_str));
            }
            match id {
                Some(id) => {
                    query
                        .conds
                        .push(Condition::scalar(tag, mode, FieldValue::U64(id), value));
                }
                // impossible sentinel keeps the scan running to a clean
                // empty result instead of failing the request
                None => {
                    query.conds.push(Condition::scalar(
                        tag,
                        mode,
                        FieldValue::U64(u64::MAX),
                        "account not found",
                    ));
                }
            }
            Ok(())
        }
    }
}

fn resolve_time_value(target: TimeTarget, coercer: &Coercer<'_>, t: Timestamp) -> FieldValue {
    match target {
        TimeTarget::Cycle { .. } => FieldValue::I64(coercer.cycle_of_time(t)),
        TimeTarget::Height { .. } => FieldValue::I64(coercer.height_of_time(t)),
    }
}

/// `time` filters resolve wall-clock bounds to the entity's time-bearing
/// column: cycle numbers for cycle tables, block heights otherwise.
fn compile_time(
    target: TimeTarget,
    coercer: &Coercer<'_>,
    mode_str: &str,
    value: &str,
    query: &mut TableQuery,
) -> Result<(), Error> {
    let mode = FilterMode::parse(mode_str).ok_or_else(|| invalid_mode("time", mode_str))?;

    match mode {
        FilterMode::Range => {
            let (from, to) = value
                .split_once(',')
                .ok_or_else(|| Error::param(format!("invalid time filter value '{value}'")))?;
            // both ends resolve independently
            let from = resolve_time_value(target, coercer, parse_time(from)?);
            let to = resolve_time_value(target, coercer, parse_time(to)?);
            query.conds.push(Condition {
                field: target.tag(),
                mode,
                value: CondValue::Range { from, to },
                raw: value.to_string(),
            });
            Ok(())
        }
        FilterMode::Eq
        | FilterMode::Ne
        | FilterMode::Gt
        | FilterMode::Gte
        | FilterMode::Lt
        | FilterMode::Lte => {
            let resolved = resolve_time_value(target, coercer, parse_time(value)?);
            query
                .conds
                .push(Condition::scalar(target.tag(), mode, resolved, value));
            Ok(())
        }
        _ => Err(invalid_mode("time", mode_str)),
    }
}

/// `start_time`/`end_time` bound the cycle from one side: start times
/// compile to `cycle >= c`, end times to `cycle <= c`.
fn compile_cycle_bound(
    target: TimeTarget,
    coercer: &Coercer<'_>,
    name: &str,
    mode_str: &str,
    value: &str,
    query: &mut TableQuery,
) -> Result<(), Error> {
    let mode = FilterMode::parse(mode_str).ok_or_else(|| invalid_mode(name, mode_str))?;
    let t = parse_time(value)?;
    if mode != FilterMode::Eq {
        return Err(invalid_mode(name, mode_str));
    }
    let cmode = if name == "start_time" {
        FilterMode::Gte
    } else {
        FilterMode::Lte
    };
    let resolved = resolve_time_value(target, coercer, t);
    query
        .conds
        .push(Condition::scalar(target.tag(), cmode, resolved, value));
    Ok(())
}

fn compile_generic(
    schema: &Schema,
    coercer: &Coercer<'_>,
    name: &str,
    mode_str: &str,
    value: &str,
    query: &mut TableQuery,
) -> Result<(), Error> {
    // rejection order: unknown field, unknown mode, bad value, bad mode
    // for the field
    let short = schema
        .short_of(name)
        .ok_or_else(|| Error::UnknownColumn(name.to_string()))?;
    let desc = schema
        .descriptor_by_short(short)
        .expect("extras target stored columns");
    let mode = FilterMode::parse(mode_str).ok_or_else(|| invalid_mode(name, mode_str))?;

    // sentinel for the current cycle, replaced before value parsing
    let head;
    let value = if name == "cycle" && value == "head" {
        head = coercer.tip.best_cycle.to_string();
        head.as_str()
    } else {
        value
    };

    let cond_value = match mode {
        FilterMode::In | FilterMode::NotIn => {
            let items: Vec<_> = value
                .split(',')
                .map(|part| coercer.scalar(desc.typ, name, part))
                .try_collect()?;
            CondValue::Many(items)
        }
        FilterMode::Range => {
            let (from, to) = value
                .split_once(',')
                .ok_or_else(|| Error::param(format!("invalid {name} filter value '{value}'")))?;
            CondValue::Range {
                from: coercer.scalar(desc.typ, name, from)?,
                to: coercer.scalar(desc.typ, name, to)?,
            }
        }
        FilterMode::Regexp => {
            if desc.typ != FieldType::Str {
                return Err(invalid_mode(name, mode_str));
            }
            CondValue::One(FieldValue::Str(value.to_string()))
        }
        _ => CondValue::One(coercer.scalar(desc.typ, name, value)?),
    };

    query.conds.push(Condition {
        field: short,
        mode,
        value: cond_value,
        raw: value.to_string(),
    });
    Ok(())
}

fn invalid_mode(column: &str, mode: &str) -> Error {
    Error::InvalidMode {
        column: column.to_string(),
        mode: mode.to_string(),
    }
}
