//! Deterministic fixtures for driving the query layer in tests and dev
//! servers: a toy domain over in-memory tables, a synthetic block index
//! and a handful of known accounts.

use std::sync::Arc;

use kyklos_core::{
    AccountId, AccountIndex, Address, BlockHeight, BlockIndex, ChainParams, Cycle, Domain,
    FieldValue, RowId, Timestamp,
};
use kyklos_memtable::{MemTable, MemTableStore};

/// Heights covered by the synthetic chain.
pub const CHAIN_HEIGHTS: BlockHeight = 250;

/// Baker accounts that own income rows.
pub const BAKER_ACCOUNTS: u64 = 3;

/// Known accounts in the index (the extra ones have no income rows).
pub const KNOWN_ACCOUNTS: u64 = 5;

const BASE58_ALPHABET: &[u8] = b"123456789ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz";

pub fn test_params() -> ChainParams {
    ChainParams {
        decimals: 6,
        block_time_secs: 60,
        blocks_per_cycle: 100,
    }
}

pub fn genesis_time() -> Timestamp {
    "2023-01-01T00:00:00Z".parse().expect("fixture timestamp")
}

pub fn block_time_at(height: BlockHeight) -> Timestamp {
    genesis_time() + chrono::Duration::seconds(60 * height)
}

/// Deterministic well-formed address for an account id.
pub fn test_address(id: AccountId) -> Address {
    let mut body = String::with_capacity(33);
    for j in 0..33u64 {
        let at = (id.wrapping_mul(7).wrapping_add(j.wrapping_mul(13)) % 58) as usize;
        body.push(BASE58_ALPHABET[at] as char);
    }
    format!("tz1{body}").parse().expect("fixture address")
}

/// A well-formed address outside the account index.
pub fn unknown_address() -> Address {
    test_address(u64::MAX / 2)
}

pub fn block_entries() -> Vec<(BlockHeight, Timestamp)> {
    (1..=CHAIN_HEIGHTS).map(|h| (h, block_time_at(h))).collect()
}

pub fn account_entries() -> Vec<(AccountId, Address)> {
    (1..=KNOWN_ACCOUNTS).map(|id| (id, test_address(id))).collect()
}

/// One income row per (cycle, baker) pair, row ids assigned in cycle
/// order.
pub fn income_cells(cycle: Cycle, account: AccountId) -> Vec<(&'static str, FieldValue)> {
    let a = account as i64;
    let c = cycle;
    let amt = |k: i64| FieldValue::I64(k * 1_000_000 + a * 1_000 + c);
    vec![
        ("c", FieldValue::I64(c)),
        ("A", FieldValue::U64(account)),
        ("r", FieldValue::I64(a * 10 + c)),
        ("b", amt(10)),
        ("d", amt(5)),
        ("v", amt(8)),
        ("n", FieldValue::I64(a)),
        ("R", FieldValue::I64(16)),
        ("E", FieldValue::I64(128)),
        ("l", amt(1)),
        // bakers 1..=3 straddle the 100% mark: 9999, 10000, 10001
        ("L", FieldValue::I64(9_998 + a)),
        ("C", FieldValue::I64(10_000)),
        ("P", FieldValue::I64(9_800 + c * 100)),
        ("k", FieldValue::I64(14)),
        ("K", FieldValue::I64(15)),
        ("N", FieldValue::I64(2)),
        ("e", FieldValue::I64(120)),
        ("m", FieldValue::I64(8)),
        ("s", FieldValue::I64(250)),
        ("S", FieldValue::I64(3)),
        ("f", amt(2)),
        ("t", amt(3)),
        ("o", amt(4)),
        ("1", amt(2)),
        ("2", amt(1)),
        ("3", FieldValue::I64(0)),
        ("4", FieldValue::I64(50_000)),
        ("5", FieldValue::I64(25_000)),
        ("0", FieldValue::I64(0)),
        ("6", FieldValue::I64(0)),
        ("7", FieldValue::I64(0)),
        ("8", FieldValue::I64(0)),
        ("9", FieldValue::I64(0)),
        ("x", FieldValue::I64(0)),
        ("y", FieldValue::I64(0)),
        ("z", FieldValue::I64(0)),
        ("w", FieldValue::I64(0)),
    ]
}

pub fn supply_cells(params: &ChainParams, height: BlockHeight) -> Vec<(&'static str, FieldValue)> {
    let h = height;
    let amt = |k: i64| FieldValue::I64(k * 1_000_000_000 + h * 1_000);
    vec![
        ("h", FieldValue::I64(h)),
        ("c", FieldValue::I64(params.cycle_from_height(h))),
        ("T", FieldValue::Time(block_time_at(h))),
        ("t", amt(900)),
        ("A", amt(600)),
        ("U", amt(20)),
        ("C", amt(880)),
        ("L", amt(700)),
        ("E", amt(400)),
        ("D", amt(500)),
        ("S", FieldValue::I64(0)),
        ("G", amt(380)),
        ("J", amt(470)),
        ("g", amt(20)),
        ("j", amt(30)),
        ("M", amt(90)),
        ("b", amt(60)),
        ("e", amt(25)),
        ("s", amt(1)),
        ("a", amt(2)),
        ("y", amt(2)),
        ("B", amt(10)),
        ("1", FieldValue::I64(h)),
        ("2", FieldValue::I64(h * 2)),
        ("3", FieldValue::I64(h * 3)),
        ("4", FieldValue::I64(h * 4)),
        ("5", FieldValue::I64(h * 5)),
        ("6", FieldValue::I64(h * 6)),
        ("7", FieldValue::I64(h * 7)),
        ("F", amt(180)),
        ("d", amt(120)),
        ("r", amt(50)),
        ("f", amt(10)),
    ]
}

/// Number of income rows in the seeded store.
pub fn income_row_count() -> u64 {
    let cycles = test_params().cycle_from_height(CHAIN_HEIGHTS) + 1;
    cycles as u64 * BAKER_ACCOUNTS
}

/// Fill a store with the synthetic income and supply tables.
pub fn seed_tables(store: &MemTableStore, params: &ChainParams) {
    let cycles = params.cycle_from_height(CHAIN_HEIGHTS);

    let mut income = MemTable::builder("I");
    let mut row_id: RowId = 0;
    for cycle in 0..=cycles {
        for account in 1..=BAKER_ACCOUNTS {
            row_id += 1;
            income = income.row(row_id, income_cells(cycle, account));
        }
    }
    store.insert("income", income.build().expect("income fixture"));

    let mut supply = MemTable::builder("I");
    for h in 1..=CHAIN_HEIGHTS {
        supply = supply.row(h as RowId, supply_cells(params, h));
    }
    store.insert("supply", supply.build().expect("supply fixture"));
}

/// Minimal domain over in-memory stores, used by route tests and the
/// dev server.
#[derive(Clone)]
pub struct ToyDomain {
    tables: MemTableStore,
    blocks: Arc<BlockIndex>,
    accounts: Arc<AccountIndex>,
    params: Arc<ChainParams>,
}

impl ToyDomain {
    pub fn new() -> Self {
        let params = Arc::new(test_params());
        let tables = MemTableStore::new();
        seed_tables(&tables, &params);
        Self {
            tables,
            blocks: Arc::new(BlockIndex::new(block_entries())),
            accounts: Arc::new(AccountIndex::new(account_entries())),
            params,
        }
    }

    /// A domain whose stores are empty, for exercising storage errors.
    pub fn empty_with_chain() -> Self {
        let params = Arc::new(test_params());
        Self {
            tables: MemTableStore::new(),
            blocks: Arc::new(BlockIndex::new(block_entries())),
            accounts: Arc::new(AccountIndex::new(account_entries())),
            params,
        }
    }

    /// Income table whose cycle column carries the wrong type, for
    /// driving storage failures that surface mid-stream.
    pub fn with_mistyped_income() -> Self {
        let domain = Self::new();
        let broken = MemTable::builder("I")
            .row(1, vec![("c", FieldValue::U64(0))])
            .build()
            .expect("broken fixture");
        domain.tables.insert("income", broken);
        domain
    }
}

impl Default for ToyDomain {
    fn default() -> Self {
        Self::new()
    }
}

impl Domain for ToyDomain {
    type Tables = MemTableStore;

    fn tables(&self) -> &Self::Tables {
        &self.tables
    }

    fn blocks(&self) -> &BlockIndex {
        &self.blocks
    }

    fn accounts(&self) -> &AccountIndex {
        &self.accounts
    }

    fn params(&self) -> Arc<ChainParams> {
        self.params.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kyklos_core::{StreamAction, TableQuery, TableStore};

    #[test]
    fn addresses_are_wellformed_and_distinct() {
        let a = test_address(1);
        let b = test_address(2);
        assert_ne!(a, b);
        assert_eq!(a.to_string().len(), 36);
        assert!(a.to_string().starts_with("tz1"));
    }

    #[test]
    fn toy_domain_has_a_tip() {
        let domain = ToyDomain::new();
        let tip = domain.tip().unwrap();
        assert_eq!(tip.best_height, CHAIN_HEIGHTS);
        assert_eq!(tip.best_cycle, 2);
    }

    #[test]
    fn seeded_tables_scan() {
        let domain = ToyDomain::new();
        let mut rows = 0;
        domain
            .tables()
            .stream("income", &TableQuery::default(), |_| {
                rows += 1;
                Ok(StreamAction::Continue)
            })
            .unwrap();
        assert_eq!(rows, income_row_count());
    }
}
