use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::{AccountId, Address, BlockHeight, Timestamp};

/// Immutable height/timestamp slice, sorted by height.
///
/// Both directions of the lookup are binary searches; the slice is
/// rebuilt whole when the tip advances so requests can hold a snapshot
/// without locking per row.
#[derive(Debug, Default)]
pub struct BlockSlice {
    entries: Vec<(BlockHeight, Timestamp)>,
}

impl BlockSlice {
    pub fn new(entries: Vec<(BlockHeight, Timestamp)>) -> Self {
        debug_assert!(entries.windows(2).all(|w| w[0].0 < w[1].0));
        Self { entries }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn tip(&self) -> Option<(BlockHeight, Timestamp)> {
        self.entries.last().copied()
    }

    /// Timestamp of the block at the given height, if indexed.
    pub fn time_at(&self, height: BlockHeight) -> Option<Timestamp> {
        self.entries
            .binary_search_by_key(&height, |(h, _)| *h)
            .ok()
            .map(|i| self.entries[i].1)
    }

    /// Height of the first block not before `t`; the tip height when
    /// every indexed block is older.
    pub fn height_from_time(&self, t: Timestamp) -> BlockHeight {
        let i = self.entries.partition_point(|(_, bt)| *bt < t);
        match self.entries.get(i) {
            Some((h, _)) => *h,
            None => self.tip().map(|(h, _)| h).unwrap_or_default(),
        }
    }
}

/// Shared height/time index with copy-on-advance snapshots.
#[derive(Default)]
pub struct BlockIndex {
    inner: RwLock<Arc<BlockSlice>>,
}

impl BlockIndex {
    pub fn new(entries: Vec<(BlockHeight, Timestamp)>) -> Self {
        Self {
            inner: RwLock::new(Arc::new(BlockSlice::new(entries))),
        }
    }

    /// Snapshot for the duration of one request. Tip advances that land
    /// mid-request stay invisible to the holder.
    pub fn snapshot(&self) -> Arc<BlockSlice> {
        self.inner.read().expect("block index poisoned").clone()
    }

    /// Replace the slice after a tip advance.
    pub fn replace(&self, entries: Vec<(BlockHeight, Timestamp)>) {
        let slice = Arc::new(BlockSlice::new(entries));
        *self.inner.write().expect("block index poisoned") = slice;
    }
}

/// Two-way account id/address cache used while compiling predicates and
/// encoding rows. Misses are represented as `None` and degrade to a
/// guaranteed-false condition (filters) or an empty string (output).
#[derive(Default)]
pub struct AccountIndex {
    inner: RwLock<Arc<AccountMap>>,
}

#[derive(Debug, Default)]
pub struct AccountMap {
    by_address: HashMap<Address, AccountId>,
    by_id: HashMap<AccountId, Address>,
}

impl AccountMap {
    pub fn new(accounts: impl IntoIterator<Item = (AccountId, Address)>) -> Self {
        let mut map = AccountMap::default();
        for (id, addr) in accounts {
            map.by_address.insert(addr.clone(), id);
            map.by_id.insert(id, addr);
        }
        map
    }

    pub fn id_of(&self, addr: &Address) -> Option<AccountId> {
        self.by_address.get(addr).copied()
    }

    pub fn address_of(&self, id: AccountId) -> Option<&Address> {
        self.by_id.get(&id)
    }
}

impl AccountIndex {
    pub fn new(accounts: impl IntoIterator<Item = (AccountId, Address)>) -> Self {
        Self {
            inner: RwLock::new(Arc::new(AccountMap::new(accounts))),
        }
    }

    pub fn snapshot(&self) -> Arc<AccountMap> {
        self.inner.read().expect("account index poisoned").clone()
    }

    pub fn replace(&self, accounts: impl IntoIterator<Item = (AccountId, Address)>) {
        let map = Arc::new(AccountMap::new(accounts));
        *self.inner.write().expect("account index poisoned") = map;
    }
}
