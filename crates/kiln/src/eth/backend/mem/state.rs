//! Account and storage state with nested checkpoints

use crate::{
    eth::backend::{
        db::{DatabaseError, DatabaseResult},
        mem::{
            fork_db::{ForkedTrie, Tombstones, TrieKind},
            trie::{MerkleTrie, RootSwap, Trie, TrieDb},
        },
    },
    fork::ClientFork,
};
use alloy_primitives::{Address, B256, Bytes, U256, keccak256};
use alloy_rlp::Decodable;
use kiln_core::types::{Account, EMPTY_ROOT_HASH, KECCAK_EMPTY};
use parking_lot::RwLock;
use std::{
    collections::{HashMap, hash_map::Entry},
    sync::Arc,
};

/// Contract code keyed by its hash
#[derive(Clone, Debug, Default)]
pub struct CodeDb(Arc<RwLock<HashMap<B256, Bytes>>>);

impl CodeDb {
    /// Stores the code and returns its hash
    pub fn insert(&self, code: Bytes) -> B256 {
        if code.is_empty() {
            return KECCAK_EMPTY
        }
        let hash = keccak256(&code);
        self.0.write().insert(hash, code);
        hash
    }

    pub fn get(&self, hash: &B256) -> Option<Bytes> {
        if *hash == KECCAK_EMPTY {
            return Some(Bytes::new())
        }
        self.0.read().get(hash).cloned()
    }
}

/// Where the tries of a [`StateManager`] come from
#[derive(Clone, Debug)]
pub enum TrieSource {
    Memory(TrieDb),
    Forked { db: TrieDb, fork: ClientFork, tombstones: Tombstones },
}

impl TrieSource {
    fn open(&self, kind: TrieKind, root: B256, code: &CodeDb) -> DatabaseResult<Box<dyn Trie>> {
        Ok(match self {
            Self::Memory(db) => Box::new(MerkleTrie::at_root(db.clone(), root)?),
            Self::Forked { db, fork, tombstones } => Box::new(ForkedTrie::new(
                MerkleTrie::at_root(db.clone(), root)?,
                kind,
                fork.clone(),
                tombstones.clone(),
                code.clone(),
            )),
        })
    }

    pub fn tombstones(&self) -> Option<&Tombstones> {
        match self {
            Self::Memory(_) => None,
            Self::Forked { tombstones, .. } => Some(tombstones),
        }
    }
}

/// Owns the account trie and the storage tries of all touched accounts.
///
/// Checkpoints apply to all tries at once. Storage tries are opened lazily and start with as many
/// checkpoints as the account trie has open.
#[derive(Debug)]
pub struct StateManager {
    accounts: Box<dyn Trie>,
    storage: HashMap<Address, Box<dyn Trie>>,
    source: TrieSource,
    code: CodeDb,
}

// === impl StateManager ===

impl StateManager {
    pub fn new(source: TrieSource) -> DatabaseResult<Self> {
        let code = CodeDb::default();
        let accounts = source.open(TrieKind::Accounts, EMPTY_ROOT_HASH, &code)?;
        Ok(Self { accounts, storage: HashMap::default(), source, code })
    }

    /// A state that lives in memory only
    pub fn in_memory() -> DatabaseResult<Self> {
        Self::new(TrieSource::Memory(TrieDb::default()))
    }

    pub fn source(&self) -> &TrieSource {
        &self.source
    }

    pub async fn account(&self, address: Address) -> DatabaseResult<Option<Account>> {
        read_account(self.accounts.as_ref(), address, None).await
    }

    /// Returns the account, or an empty one if it does not exist
    pub async fn account_or_default(&self, address: Address) -> DatabaseResult<Account> {
        Ok(self.account(address).await?.unwrap_or_default())
    }

    pub async fn put_account(&mut self, address: Address, account: &Account) -> DatabaseResult<()> {
        self.accounts.put(address.as_slice(), alloy_rlp::encode(account).into()).await
    }

    pub async fn delete_account(&mut self, address: Address) -> DatabaseResult<()> {
        self.storage.remove(&address);
        self.accounts.del(address.as_slice()).await
    }

    /// Reads the account as of the state with the given root.
    ///
    /// `block` is the number of the block that root belongs to, it bounds remote reads.
    pub async fn account_at(
        &mut self,
        address: Address,
        root: B256,
        block: Option<u64>,
    ) -> DatabaseResult<Option<Account>> {
        let swap = RootSwap::new(self.accounts.as_mut(), root)?;
        read_account(&*swap, address, block).await
    }

    pub async fn storage(&self, address: Address, slot: U256) -> DatabaseResult<U256> {
        let key = B256::from(slot);
        let raw = match self.storage.get(&address) {
            Some(trie) => trie.get(key.as_slice()).await?,
            None => {
                let root =
                    self.account(address).await?.map_or(EMPTY_ROOT_HASH, |acc| acc.storage_root);
                let trie = self.source.open(TrieKind::Storage(address), root, &self.code)?;
                trie.get(key.as_slice()).await?
            }
        };
        match raw {
            Some(raw) => Ok(U256::decode(&mut raw.as_ref())?),
            None => Ok(U256::ZERO),
        }
    }

    /// Writes a storage slot, zero values clear it
    pub async fn set_storage(
        &mut self,
        address: Address,
        slot: U256,
        value: U256,
    ) -> DatabaseResult<()> {
        let key = B256::from(slot);
        let storage_root = {
            let trie = self.storage_trie(address).await?;
            if value.is_zero() {
                trie.del(key.as_slice()).await?;
            } else {
                trie.put(key.as_slice(), alloy_rlp::encode(value).into()).await?;
            }
            trie.root()
        };
        let mut account = self.account_or_default(address).await?;
        account.storage_root = storage_root;
        self.put_account(address, &account).await
    }

    pub async fn code(&self, address: Address) -> DatabaseResult<Bytes> {
        let Some(account) = self.account(address).await? else { return Ok(Bytes::new()) };
        self.code.get(&account.code_hash).ok_or_else(|| {
            DatabaseError::Decode("code", format!("unknown code hash {}", account.code_hash))
        })
    }

    pub async fn set_code(&mut self, address: Address, code: Bytes) -> DatabaseResult<()> {
        let mut account = self.account_or_default(address).await?;
        account.code_hash = self.code.insert(code);
        self.put_account(address, &account).await
    }

    async fn storage_trie(&mut self, address: Address) -> DatabaseResult<&mut dyn Trie> {
        let trie = match self.storage.entry(address) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let root = read_account(self.accounts.as_ref(), address, None)
                    .await?
                    .map_or(EMPTY_ROOT_HASH, |acc| acc.storage_root);
                let mut trie = self.source.open(TrieKind::Storage(address), root, &self.code)?;
                for _ in 0..self.accounts.checkpoint_depth() {
                    trie.checkpoint();
                }
                entry.insert(trie)
            }
        };
        Ok(trie.as_mut())
    }

    pub fn checkpoint(&mut self) {
        self.accounts.checkpoint();
        for trie in self.storage.values_mut() {
            trie.checkpoint();
        }
    }

    pub fn commit(&mut self) -> DatabaseResult<()> {
        self.accounts.commit()?;
        for trie in self.storage.values_mut() {
            trie.commit()?;
        }
        Ok(())
    }

    pub fn revert(&mut self) -> DatabaseResult<()> {
        self.accounts.revert()?;
        for trie in self.storage.values_mut() {
            trie.revert()?;
        }
        Ok(())
    }

    /// Number of open checkpoints
    pub fn depth(&self) -> usize {
        self.accounts.checkpoint_depth()
    }

    /// The state root, this persists the current state so it can be restored with
    /// [`Self::set_root`]
    pub fn root(&mut self) -> B256 {
        self.accounts.root()
    }

    pub fn set_root(&mut self, root: B256) -> DatabaseResult<()> {
        debug_assert_eq!(self.depth(), 0, "set root with open checkpoints");
        self.accounts.set_root(root)?;
        self.storage.clear();
        Ok(())
    }

    /// Sets the number of the block that local deletions are attributed to
    pub fn set_block_number(&self, number: u64) {
        if let Some(tombstones) = self.source.tombstones() {
            tombstones.set_block_number(number);
        }
    }

    /// Forgets deletions made after `block`
    pub fn prune_tombstones(&self, block: u64) {
        if let Some(tombstones) = self.source.tombstones() {
            tombstones.prune(block);
        }
    }
}

async fn read_account(
    trie: &dyn Trie,
    address: Address,
    block: Option<u64>,
) -> DatabaseResult<Option<Account>> {
    match trie.get_at(address.as_slice(), block).await? {
        Some(raw) => Ok(Some(Account::decode(&mut raw.as_ref())?)),
        None => Ok(None),
    }
}
