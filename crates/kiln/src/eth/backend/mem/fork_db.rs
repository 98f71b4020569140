//! A trie that falls back to the forked chain for keys it has never seen

use crate::{
    eth::backend::{
        db::{DatabaseError, DatabaseResult},
        mem::{
            state::CodeDb,
            trie::{MerkleTrie, Trie},
        },
    },
    fork::ClientFork,
};
use alloy_primitives::{Address, B256, Bytes, U256, hex, map::HashMap};
use kiln_core::types::{Account, EMPTY_ROOT_HASH};
use parking_lot::RwLock;
use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

/// Which part of the state a [`ForkedTrie`] holds
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TrieKind {
    Accounts,
    /// Storage of the given account
    Storage(Address),
}

/// Keys deleted locally, with the block number they were deleted in.
///
/// Shared by the account trie and every storage trie of a forked chain.
#[derive(Clone, Debug, Default)]
pub struct Tombstones {
    deleted: Arc<RwLock<HashMap<String, u64>>>,
    /// number of the block currently being built
    block_number: Arc<AtomicU64>,
}

impl Tombstones {
    pub fn set_block_number(&self, number: u64) {
        self.block_number.store(number, Ordering::Relaxed);
    }

    pub fn block_number(&self) -> u64 {
        self.block_number.load(Ordering::Relaxed)
    }

    /// Whether `key` was deleted at or before `block`, `None` checks the latest state
    pub fn is_deleted(&self, key: &str, block: Option<u64>) -> bool {
        self.deleted.read().get(key).is_some_and(|at| *at <= block.unwrap_or(u64::MAX))
    }

    /// Drops all tombstones recorded after `block`
    pub fn prune(&self, block: u64) {
        self.deleted.write().retain(|_, at| *at <= block);
    }

    pub fn len(&self) -> usize {
        self.deleted.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.deleted.read().is_empty()
    }

    fn insert(&self, key: String) -> Option<u64> {
        self.deleted.write().insert(key, self.block_number())
    }

    fn remove(&self, key: &str) -> Option<u64> {
        self.deleted.write().remove(key)
    }

    fn restore(&self, key: String, previous: Option<u64>) {
        let mut deleted = self.deleted.write();
        match previous {
            Some(at) => deleted.insert(key, at),
            None => deleted.remove(&key),
        };
    }
}

/// A [`MerkleTrie`] over the state of a forked chain.
///
/// Keys missing locally are read from the remote chain at a block no later than the fork block,
/// unless they were deleted locally. Remote answers are never written into the local trie, so the
/// local root only covers state touched since the fork.
#[derive(Debug)]
pub struct ForkedTrie {
    inner: MerkleTrie,
    kind: TrieKind,
    fork: ClientFork,
    tombstones: Tombstones,
    code: CodeDb,
    /// tombstone changes per open checkpoint, with the value they replaced
    journal: Vec<Vec<(String, Option<u64>)>>,
}

// === impl ForkedTrie ===

impl ForkedTrie {
    pub fn new(
        inner: MerkleTrie,
        kind: TrieKind,
        fork: ClientFork,
        tombstones: Tombstones,
        code: CodeDb,
    ) -> Self {
        Self { inner, kind, fork, tombstones, code, journal: Vec::new() }
    }

    pub fn kind(&self) -> TrieKind {
        self.kind
    }

    /// The key under which a deletion of `key` is recorded
    fn tombstone_key(&self, key: &[u8]) -> String {
        match self.kind {
            TrieKind::Accounts => hex::encode_prefixed(key),
            TrieKind::Storage(address) => {
                format!("{};{}", hex::encode_prefixed(address), hex::encode_prefixed(key))
            }
        }
    }

    fn record(&mut self, key: String, previous: Option<u64>) {
        if let Some(frame) = self.journal.last_mut() {
            frame.push((key, previous));
        }
    }

    async fn fetch(&self, key: &[u8], block: Option<u64>) -> DatabaseResult<Option<Bytes>> {
        let block = self.fork.clamp(block);
        match self.kind {
            TrieKind::Accounts => {
                let address = Address::try_from(key)
                    .map_err(|err| DatabaseError::Decode("address", err.to_string()))?;
                let (balance, nonce, code) = futures::try_join!(
                    self.fork.get_balance(address, block),
                    self.fork.get_nonce(address, block),
                    self.fork.get_code(address, block),
                )?;
                if balance.is_zero() && nonce.is_zero() && code.is_empty() {
                    return Ok(None)
                }
                trace!(target: "fork", ?address, block, "fetched remote account");
                let account = Account {
                    nonce,
                    balance,
                    storage_root: EMPTY_ROOT_HASH,
                    code_hash: self.code.insert(code),
                };
                Ok(Some(alloy_rlp::encode(&account).into()))
            }
            TrieKind::Storage(address) => {
                let index = U256::from_be_slice(key);
                let value = self.fork.storage_at(address, index, block).await?;
                if value.is_zero() {
                    return Ok(None)
                }
                Ok(Some(alloy_rlp::encode(value).into()))
            }
        }
    }
}

#[async_trait::async_trait]
impl Trie for ForkedTrie {
    async fn get_at(&self, key: &[u8], block: Option<u64>) -> DatabaseResult<Option<Bytes>> {
        if let Some(value) = self.inner.get_at(key, block).await? {
            return Ok(Some(value))
        }
        if self.tombstones.is_deleted(&self.tombstone_key(key), block) {
            return Ok(None)
        }
        self.fetch(key, block).await
    }

    async fn put(&mut self, key: &[u8], value: Bytes) -> DatabaseResult<()> {
        if value.is_empty() {
            return self.del(key).await
        }
        let tombstone = self.tombstone_key(key);
        if let Some(previous) = self.tombstones.remove(&tombstone) {
            self.record(tombstone, Some(previous));
        }
        self.inner.put(key, value).await
    }

    async fn del(&mut self, key: &[u8]) -> DatabaseResult<()> {
        let tombstone = self.tombstone_key(key);
        let previous = self.tombstones.insert(tombstone.clone());
        self.record(tombstone, previous);
        self.inner.del(key).await
    }

    fn root(&mut self) -> B256 {
        self.inner.root()
    }

    fn set_root(&mut self, root: B256) -> DatabaseResult<()> {
        self.inner.set_root(root)
    }

    fn checkpoint(&mut self) {
        self.inner.checkpoint();
        self.journal.push(Vec::new());
    }

    fn commit(&mut self) -> DatabaseResult<()> {
        self.inner.commit()?;
        let frame = self.journal.pop().unwrap_or_default();
        if let Some(parent) = self.journal.last_mut() {
            parent.extend(frame);
        }
        Ok(())
    }

    fn revert(&mut self) -> DatabaseResult<()> {
        self.inner.revert()?;
        let frame = self.journal.pop().unwrap_or_default();
        for (key, previous) in frame.into_iter().rev() {
            self.tombstones.restore(key, previous);
        }
        Ok(())
    }

    fn checkpoint_depth(&self) -> usize {
        self.inner.checkpoint_depth()
    }
}
