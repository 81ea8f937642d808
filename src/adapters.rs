//! Concrete domain wiring: in-memory table store plus lookup indexes.
//!
//! Ingestion is a separate concern; whatever populates these stores does
//! so through the `replace`/`insert` surfaces before or between
//! requests, never mid-stream.

use std::sync::Arc;

use kyklos_core::{
    AccountId, AccountIndex, Address, BlockHeight, BlockIndex, ChainParams, Domain, Timestamp,
};
use kyklos_memtable::MemTableStore;

#[derive(Clone)]
pub struct KyklosDomain {
    tables: MemTableStore,
    blocks: Arc<BlockIndex>,
    accounts: Arc<AccountIndex>,
    params: Arc<ChainParams>,
}

impl KyklosDomain {
    pub fn new(params: ChainParams) -> Self {
        Self {
            tables: MemTableStore::new(),
            blocks: Arc::new(BlockIndex::default()),
            accounts: Arc::new(AccountIndex::default()),
            params: Arc::new(params),
        }
    }

    /// The writable table surface, for loaders.
    pub fn table_store(&self) -> &MemTableStore {
        &self.tables
    }

    /// Swap in a new height/time slice after the tip advances.
    pub fn replace_blocks(&self, entries: Vec<(BlockHeight, Timestamp)>) {
        self.blocks.replace(entries);
    }

    pub fn replace_accounts(&self, accounts: impl IntoIterator<Item = (AccountId, Address)>) {
        self.accounts.replace(accounts);
    }
}

impl Domain for KyklosDomain {
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
