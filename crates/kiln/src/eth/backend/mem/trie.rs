//! Merkle-Patricia trie used for the account and storage state

use crate::eth::backend::db::{DatabaseError, DatabaseResult};
use alloy_primitives::{B256, Bytes, keccak256, map::HashMap};
use alloy_trie::{EMPTY_ROOT_HASH, HashBuilder, Nibbles};
use parking_lot::RwLock;
use std::{
    collections::BTreeMap,
    fmt,
    ops::{Deref, DerefMut},
    sync::Arc,
};

/// Trie contents keyed by `keccak256(key)`
pub type TrieState = Arc<BTreeMap<B256, Bytes>>;

/// A key-value trie with nested checkpoints.
///
/// Writes of an empty value are deletions.
#[async_trait::async_trait]
pub trait Trie: Send + Sync + fmt::Debug {
    /// Returns the value stored under `key`
    async fn get(&self, key: &[u8]) -> DatabaseResult<Option<Bytes>> {
        self.get_at(key, None).await
    }

    /// Returns the value stored under `key` as of `block`, `None` reads the latest state.
    ///
    /// Local tries ignore the block, their root already pins the state.
    async fn get_at(&self, key: &[u8], block: Option<u64>) -> DatabaseResult<Option<Bytes>>;

    async fn put(&mut self, key: &[u8], value: Bytes) -> DatabaseResult<()>;

    async fn del(&mut self, key: &[u8]) -> DatabaseResult<()>;

    /// Returns the root hash of the current contents and makes it available to
    /// [`Trie::set_root`]
    fn root(&mut self) -> B256;

    /// Resets the contents to the state identified by `root`
    fn set_root(&mut self, root: B256) -> DatabaseResult<()>;

    fn checkpoint(&mut self);

    /// Keeps all changes since the last checkpoint
    fn commit(&mut self) -> DatabaseResult<()>;

    /// Discards all changes since the last checkpoint
    fn revert(&mut self) -> DatabaseResult<()>;

    /// Number of open checkpoints
    fn checkpoint_depth(&self) -> usize;
}

/// Shared store of every trie state that had its root computed, keyed by root
#[derive(Clone, Debug, Default)]
pub struct TrieDb {
    states: Arc<RwLock<HashMap<B256, TrieState>>>,
}

impl TrieDb {
    fn insert(&self, root: B256, state: TrieState) {
        self.states.write().entry(root).or_insert(state);
    }

    fn get(&self, root: B256) -> Option<TrieState> {
        if root == EMPTY_ROOT_HASH {
            return Some(TrieState::default())
        }
        self.states.read().get(&root).cloned()
    }

    /// Whether a state with this root is known
    pub fn contains(&self, root: B256) -> bool {
        self.get(root).is_some()
    }
}

/// A secure trie: keys are hashed before insertion.
///
/// Checkpoints are copy-on-write snapshots of the contents, so opening one is cheap and only the
/// first write after it copies.
#[derive(Debug)]
pub struct MerkleTrie {
    db: TrieDb,
    state: TrieState,
    /// cached root of `state`
    root: Option<B256>,
    checkpoints: Vec<(TrieState, Option<B256>)>,
}

// === impl MerkleTrie ===

impl MerkleTrie {
    pub fn new(db: TrieDb) -> Self {
        Self {
            db,
            state: TrieState::default(),
            root: Some(EMPTY_ROOT_HASH),
            checkpoints: Vec::new(),
        }
    }

    /// Opens the trie at an existing root
    pub fn at_root(db: TrieDb, root: B256) -> DatabaseResult<Self> {
        let mut trie = Self::new(db);
        trie.set_root(root)?;
        Ok(trie)
    }

    pub fn db(&self) -> &TrieDb {
        &self.db
    }

    /// Returns the value of an already hashed key
    pub fn get_hashed(&self, hashed: &B256) -> Option<Bytes> {
        self.state.get(hashed).cloned()
    }

    pub fn len(&self) -> usize {
        self.state.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.is_empty()
    }

    fn insert(&mut self, key: &[u8], value: Bytes) {
        let hashed = keccak256(key);
        let state = Arc::make_mut(&mut self.state);
        if value.is_empty() {
            state.remove(&hashed);
        } else {
            state.insert(hashed, value);
        }
        self.root = None;
    }
}

#[async_trait::async_trait]
impl Trie for MerkleTrie {
    async fn get_at(&self, key: &[u8], _block: Option<u64>) -> DatabaseResult<Option<Bytes>> {
        Ok(self.get_hashed(&keccak256(key)))
    }

    async fn put(&mut self, key: &[u8], value: Bytes) -> DatabaseResult<()> {
        self.insert(key, value);
        Ok(())
    }

    async fn del(&mut self, key: &[u8]) -> DatabaseResult<()> {
        self.insert(key, Bytes::new());
        Ok(())
    }

    fn root(&mut self) -> B256 {
        if let Some(root) = self.root {
            return root
        }
        let root = state_root(&self.state);
        self.db.insert(root, self.state.clone());
        self.root = Some(root);
        root
    }

    fn set_root(&mut self, root: B256) -> DatabaseResult<()> {
        let state = self.db.get(root).ok_or(DatabaseError::MissingRoot(root))?;
        self.state = state;
        self.root = Some(root);
        Ok(())
    }

    fn checkpoint(&mut self) {
        self.checkpoints.push((self.state.clone(), self.root));
    }

    fn commit(&mut self) -> DatabaseResult<()> {
        self.checkpoints.pop().ok_or(DatabaseError::NoCheckpoint("commit"))?;
        if self.checkpoints.is_empty() {
            // persist the committed state so it can be restored by root
            self.root();
        }
        Ok(())
    }

    fn revert(&mut self) -> DatabaseResult<()> {
        let (state, root) = self.checkpoints.pop().ok_or(DatabaseError::NoCheckpoint("revert"))?;
        self.state = state;
        self.root = root;
        Ok(())
    }

    fn checkpoint_depth(&self) -> usize {
        self.checkpoints.len()
    }
}

/// Computes the root of the hashed contents
pub fn state_root(state: &BTreeMap<B256, Bytes>) -> B256 {
    let mut builder = HashBuilder::default();
    // `BTreeMap` iterates in key order, which is nibble order
    for (key, value) in state {
        builder.add_leaf(Nibbles::unpack(key), value);
    }
    builder.root()
}

/// Temporarily points a trie at another root, the previous contents are restored on drop.
///
/// Must only be used on a trie without open checkpoints.
pub struct RootSwap<'a> {
    trie: &'a mut dyn Trie,
    previous: B256,
}

impl<'a> RootSwap<'a> {
    pub fn new(trie: &'a mut dyn Trie, root: B256) -> DatabaseResult<Self> {
        debug_assert_eq!(trie.checkpoint_depth(), 0, "root swap with open checkpoints");
        let previous = trie.root();
        trie.set_root(root)?;
        Ok(Self { trie, previous })
    }
}

impl<'a> Deref for RootSwap<'a> {
    type Target = dyn Trie + 'a;

    fn deref(&self) -> &Self::Target {
        &*self.trie
    }
}

impl<'a> DerefMut for RootSwap<'a> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut *self.trie
    }
}

impl Drop for RootSwap<'_> {
    fn drop(&mut self) {
        if let Err(err) = self.trie.set_root(self.previous) {
            error!(target: "backend", %err, "failed to restore trie root");
        }
    }
}

impl fmt::Debug for RootSwap<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RootSwap").field("previous", &self.previous).finish_non_exhaustive()
    }
}
