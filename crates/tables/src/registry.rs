//! Per-entity schemas: long user-facing column names, short on-disk
//! column tags, semantic types and the public alias order.
//!
//! Schemas are built once at startup and shared read-only. Synthetic
//! many-to-one translations (`address` reads the account-id column,
//! `start_time`/`end_time` read the cycle column) are installed here so
//! both predicate compilation and default projections see them.

use std::collections::HashMap;

/// Short tag of a column that has no storage of its own.
pub const VIRTUAL_TAG: &str = "-";

/// Request keys consumed by the transport; never valid as column names.
pub const RESERVED_KEYS: &[&str] = &[
    "columns", "limit", "order", "verbose", "filename", "cursor", "format",
];

/// Semantic type of a column as seen by the query layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    U64,
    I64,
    /// Signed integer in base units, exposed as a decimal display value.
    Amount,
    /// Signed fixed-point percent, stored at two extra digits (100% = 10000).
    Pct,
    Bool,
    Bytes,
    Str,
    Time,
}

#[derive(Debug, Clone, Copy)]
pub struct FieldDescriptor {
    pub long: &'static str,
    pub short: &'static str,
    pub typ: FieldType,
}

impl FieldDescriptor {
    pub fn is_virtual(&self) -> bool {
        self.short == VIRTUAL_TAG
    }
}

/// Where time filters land for one entity.
#[derive(Debug, Clone, Copy)]
pub enum TimeTarget {
    /// Resolve to a cycle number on the given column.
    Cycle { tag: &'static str },
    /// Resolve to a block height on the given column.
    Height { tag: &'static str },
}

impl TimeTarget {
    pub fn tag(&self) -> &'static str {
        match self {
            TimeTarget::Cycle { tag } => tag,
            TimeTarget::Height { tag } => tag,
        }
    }
}

/// Placement of an extra translation in the public alias list.
#[derive(Debug, Clone, Copy)]
pub enum AliasPos {
    /// Insert right after the named stored column.
    After(&'static str),
    /// Append at the end.
    End,
    /// Filter-only translation, absent from default projections.
    None,
}

#[derive(Debug, Clone, Copy)]
struct Extra {
    long: &'static str,
    target: &'static str,
}

/// Immutable per-entity schema.
#[derive(Debug)]
pub struct Schema {
    entity: &'static str,
    fields: Vec<FieldDescriptor>,
    extras: Vec<Extra>,
    aliases: Vec<&'static str>,
    by_long: HashMap<&'static str, usize>,
    by_short: HashMap<&'static str, usize>,
    time_target: Option<TimeTarget>,
    address_tag: Option<&'static str>,
}

impl Schema {
    pub fn builder(entity: &'static str, pk_long: &'static str, pk_short: &'static str) -> SchemaBuilder {
        SchemaBuilder {
            entity,
            fields: vec![FieldDescriptor {
                long: pk_long,
                short: pk_short,
                typ: FieldType::U64,
            }],
            extras: Vec::new(),
            alias_edits: Vec::new(),
            time_target: None,
            address_tag: None,
        }
    }

    pub fn entity(&self) -> &'static str {
        self.entity
    }

    /// The primary-key column; always the first registered field.
    pub fn pk(&self) -> &FieldDescriptor {
        &self.fields[0]
    }

    /// Stored-field descriptor by long name.
    pub fn descriptor(&self, long: &str) -> Option<&FieldDescriptor> {
        self.by_long.get(long).map(|i| &self.fields[*i])
    }

    pub fn descriptor_by_short(&self, short: &str) -> Option<&FieldDescriptor> {
        self.by_short.get(short).map(|i| &self.fields[*i])
    }

    /// Long-to-short translation, including extras. `None` for unknown
    /// names.
    pub fn short_of(&self, long: &str) -> Option<&'static str> {
        if let Some(desc) = self.descriptor(long) {
            return Some(desc.short);
        }
        self.extras
            .iter()
            .find(|e| e.long == long)
            .map(|e| e.target)
    }

    pub fn long_of(&self, short: &str) -> Option<&'static str> {
        self.descriptor_by_short(short).map(|d| d.long)
    }

    /// Whether the long name is one of the synthetic translations.
    pub fn is_extra(&self, long: &str) -> bool {
        self.extras.iter().any(|e| e.long == long)
    }

    /// The canonical public projection order.
    pub fn aliases(&self) -> &[&'static str] {
        &self.aliases
    }

    /// Short tags of all stored columns, in disk order.
    pub fn stored_tags(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.fields
            .iter()
            .filter(|f| !f.is_virtual())
            .map(|f| f.short)
    }

    pub fn time_target(&self) -> Option<TimeTarget> {
        self.time_target
    }

    /// Account-id column that `address` filters and projections read.
    pub fn address_tag(&self) -> Option<&'static str> {
        self.address_tag
    }
}

pub struct SchemaBuilder {
    entity: &'static str,
    fields: Vec<FieldDescriptor>,
    extras: Vec<Extra>,
    alias_edits: Vec<(&'static str, AliasPos)>,
    time_target: Option<TimeTarget>,
    address_tag: Option<&'static str>,
}

impl SchemaBuilder {
    pub fn field(mut self, long: &'static str, short: &'static str, typ: FieldType) -> Self {
        self.fields.push(FieldDescriptor { long, short, typ });
        self
    }

    pub fn extra(mut self, long: &'static str, target: &'static str, pos: AliasPos) -> Self {
        self.extras.push(Extra { long, target });
        self.alias_edits.push((long, pos));
        self
    }

    pub fn time_filters(mut self, target: TimeTarget) -> Self {
        self.time_target = Some(target);
        self
    }

    pub fn address_filters(mut self, account_tag: &'static str) -> Self {
        self.address_tag = Some(account_tag);
        self
    }

    /// Finish the schema. Duplicate or reserved registrations are init
    /// bugs and abort the process.
    pub fn build(self) -> Schema {
        let mut by_long = HashMap::new();
        let mut by_short = HashMap::new();

        for (i, f) in self.fields.iter().enumerate() {
            assert!(
                !RESERVED_KEYS.contains(&f.long),
                "{}: column name '{}' is reserved",
                self.entity,
                f.long
            );
            assert!(
                by_long.insert(f.long, i).is_none(),
                "{}: duplicate column '{}'",
                self.entity,
                f.long
            );
            if !f.is_virtual() {
                assert!(
                    by_short.insert(f.short, i).is_none(),
                    "{}: duplicate tag '{}'",
                    self.entity,
                    f.short
                );
            }
        }

        for e in &self.extras {
            assert!(
                !RESERVED_KEYS.contains(&e.long) && !by_long.contains_key(e.long),
                "{}: extra '{}' collides",
                self.entity,
                e.long
            );
            assert!(
                by_short.contains_key(e.target),
                "{}: extra '{}' targets unknown tag '{}'",
                self.entity,
                e.long,
                e.target
            );
        }

        let mut aliases: Vec<&'static str> = self
            .fields
            .iter()
            .filter(|f| !f.is_virtual())
            .map(|f| f.long)
            .collect();
        for (long, pos) in self.alias_edits.iter().copied() {
            match pos {
                AliasPos::After(anchor) => {
                    let at = aliases
                        .iter()
                        .position(|a| *a == anchor)
                        .map(|i| i + 1)
                        .unwrap_or(aliases.len());
                    aliases.insert(at, long);
                }
                AliasPos::End => aliases.push(long),
                AliasPos::None => {}
            }
        }

        if let Some(t) = &self.time_target {
            assert!(
                by_short.contains_key(t.tag()),
                "{}: time target tag '{}' unknown",
                self.entity,
                t.tag()
            );
        }
        if let Some(tag) = self.address_tag {
            assert!(
                by_short.contains_key(tag),
                "{}: address tag '{}' unknown",
                self.entity,
                tag
            );
        }

        Schema {
            entity: self.entity,
            fields: self.fields,
            extras: self.extras,
            aliases,
            by_long,
            by_short,
            time_target: self.time_target,
            address_tag: self.address_tag,
        }
    }
}

/// All registered entities, built once at startup.
pub struct TableRegistry {
    tables: HashMap<&'static str, Schema>,
}

impl TableRegistry {
    /// The standard entity set served by the indexer.
    pub fn standard() -> Self {
        let mut tables = HashMap::new();
        for schema in [income_schema(), supply_schema()] {
            let prev = tables.insert(schema.entity(), schema);
            assert!(prev.is_none(), "duplicate table registration");
        }
        Self { tables }
    }

    pub fn get(&self, entity: &str) -> Option<&Schema> {
        self.tables.get(entity)
    }

    pub fn entities(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.tables.keys().copied()
    }
}

/// Per-cycle baker income and rights accounting.
fn income_schema() -> Schema {
    use FieldType::*;
    Schema::builder("income", "row_id", "I")
        .field("cycle", "c", I64)
        .field("account_id", "A", U64)
        .field("rolls", "r", I64)
        .field("balance", "b", Amount)
        .field("delegated", "d", Amount)
        .field("active_stake", "v", Amount)
        .field("n_delegations", "n", I64)
        .field("n_baking_rights", "R", I64)
        .field("n_endorsing_rights", "E", I64)
        .field("luck", "l", Amount)
        .field("luck_percent", "L", Pct)
        .field("contribution_percent", "C", Pct)
        .field("performance_percent", "P", Pct)
        .field("n_blocks_baked", "k", I64)
        .field("n_blocks_proposed", "K", I64)
        .field("n_blocks_not_baked", "N", I64)
        .field("n_blocks_endorsed", "e", I64)
        .field("n_blocks_not_endorsed", "m", I64)
        .field("n_slots_endorsed", "s", I64)
        .field("n_seeds_revealed", "S", I64)
        .field("expected_income", "f", Amount)
        .field("total_income", "t", Amount)
        .field("total_deposits", "o", Amount)
        .field("baking_income", "1", Amount)
        .field("endorsing_income", "2", Amount)
        .field("accusation_income", "3", Amount)
        .field("seed_income", "4", Amount)
        .field("fees_income", "5", Amount)
        .field("total_loss", "0", Amount)
        .field("accusation_loss", "6", Amount)
        .field("seed_loss", "7", Amount)
        .field("endorsing_loss", "8", Amount)
        .field("lost_accusation_fees", "9", Amount)
        .field("lost_accusation_rewards", "x", Amount)
        .field("lost_accusation_deposits", "y", Amount)
        .field("lost_seed_fees", "z", Amount)
        .field("lost_seed_rewards", "w", Amount)
        .extra("address", "A", AliasPos::After("account_id"))
        .extra("time", "c", AliasPos::None)
        .extra("start_time", "c", AliasPos::End)
        .extra("end_time", "c", AliasPos::End)
        .time_filters(TimeTarget::Cycle { tag: "c" })
        .address_filters("A")
        .build()
}

/// Per-block running totals of the token supply.
fn supply_schema() -> Schema {
    use FieldType::*;
    Schema::builder("supply", "row_id", "I")
        .field("height", "h", I64)
        .field("cycle", "c", I64)
        .field("time", "T", Time)
        .field("total", "t", Amount)
        .field("activated", "A", Amount)
        .field("unclaimed", "U", Amount)
        .field("circulating", "C", Amount)
        .field("liquid", "L", Amount)
        .field("delegated", "E", Amount)
        .field("staking", "D", Amount)
        .field("shielded", "S", Amount)
        .field("active_delegated", "G", Amount)
        .field("active_staking", "J", Amount)
        .field("inactive_delegated", "g", Amount)
        .field("inactive_staking", "j", Amount)
        .field("minted", "M", Amount)
        .field("minted_baking", "b", Amount)
        .field("minted_endorsing", "e", Amount)
        .field("minted_seeding", "s", Amount)
        .field("minted_airdrop", "a", Amount)
        .field("minted_subsidy", "y", Amount)
        .field("burned", "B", Amount)
        .field("burned_double_baking", "1", Amount)
        .field("burned_double_endorse", "2", Amount)
        .field("burned_origination", "3", Amount)
        .field("burned_allocation", "4", Amount)
        .field("burned_seed_miss", "5", Amount)
        .field("burned_storage", "6", Amount)
        .field("burned_explicit", "7", Amount)
        .field("frozen", "F", Amount)
        .field("frozen_deposits", "d", Amount)
        .field("frozen_rewards", "r", Amount)
        .field("frozen_fees", "f", Amount)
        .time_filters(TimeTarget::Height { tag: "h" })
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn income_translations() {
        let reg = TableRegistry::standard();
        let s = reg.get("income").unwrap();

        assert_eq!(s.pk().long, "row_id");
        assert_eq!(s.short_of("cycle"), Some("c"));
        assert_eq!(s.short_of("address"), Some("A"));
        assert_eq!(s.short_of("start_time"), Some("c"));
        assert_eq!(s.short_of("bogus"), None);
        assert_eq!(s.long_of("L"), Some("luck_percent"));
    }

    #[test]
    fn alias_list_carries_virtual_columns() {
        let reg = TableRegistry::standard();
        let s = reg.get("income").unwrap();
        let aliases = s.aliases();

        // address sits right after account_id, times at the end
        let account = aliases.iter().position(|a| *a == "account_id").unwrap();
        assert_eq!(aliases[account + 1], "address");
        assert_eq!(&aliases[aliases.len() - 2..], &["start_time", "end_time"]);
        // filter-only extras stay out of the default projection
        assert!(!aliases.contains(&"time"));
    }

    #[test]
    fn supply_time_is_a_stored_column() {
        let reg = TableRegistry::standard();
        let s = reg.get("supply").unwrap();
        assert_eq!(s.short_of("time"), Some("T"));
        assert!(matches!(
            s.time_target(),
            Some(TimeTarget::Height { tag: "h" })
        ));
        assert!(s.address_tag().is_none());
    }

    #[test]
    #[should_panic(expected = "duplicate column")]
    fn duplicate_registration_aborts() {
        Schema::builder("t", "row_id", "I")
            .field("cycle", "c", FieldType::I64)
            .field("cycle", "d", FieldType::I64)
            .build();
    }

    #[test]
    #[should_panic(expected = "reserved")]
    fn reserved_names_are_rejected() {
        Schema::builder("t", "row_id", "I")
            .field("cursor", "q", FieldType::U64)
            .build();
    }
}
