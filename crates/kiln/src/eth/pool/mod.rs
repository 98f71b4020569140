//! # Transaction Pool implementation
//!
//! The transaction pool holds the transactions submitted to the node until they are mined.
//!
//! Transactions are kept per sender in one of two queues:
//!
//!   - executable: transactions whose nonces continue the sender's nonce without a gap, the
//!     transaction with the lowest nonce is the sender's head and can be mined right away
//!   - queued: transactions with a nonce gap, they are promoted once the gap closes
//!
//! The miner only ever sees the head of each sender. It locks a head while it is staged for the
//! current block, a locked transaction can not be replaced. Heads that were included in a block
//! move to the in-progress set until the block is persisted, see [`Pool::on_finalized`].

use crate::eth::{
    backend::info::AccountProvider,
    error::{
        BlockchainError, InvalidTransactionError, PoolError, Result, TransactionError, gas_to_u64,
    },
    pool::transactions::{PoolTransaction, TransactionOutcome},
};
use alloy_primitives::{Address, TxHash, U256};
use alloy_signer_local::PrivateKeySigner;
use futures::channel::mpsc::{Receiver, Sender, channel};
use kiln_core::{
    heap::Heap,
    transaction::{Transaction, TransactionRequest},
    types::intrinsic_gas,
};
use parking_lot::{Mutex, RwLock};
use std::{
    collections::{HashMap, HashSet},
    fmt,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

pub mod transactions;

/// Buffer of the channels that notify about new transactions
const LISTENER_CHANNEL_SIZE: usize = 2048;

type NonceHeap =
    Heap<Arc<PoolTransaction>, fn(&Arc<PoolTransaction>, &Arc<PoolTransaction>) -> bool>;

fn by_nonce(a: &Arc<PoolTransaction>, b: &Arc<PoolTransaction>) -> bool {
    a.nonce() < b.nonce()
}

fn nonce_heap() -> NonceHeap {
    Heap::new(by_nonce)
}

/// The executable transactions of a sender
struct AccountQueue {
    /// highest nonce in `transactions`
    nonce: U256,
    /// ordered by nonce, contiguous
    transactions: NonceHeap,
}

impl AccountQueue {
    fn position(&self, nonce: U256) -> Option<usize> {
        self.transactions.position(|tx| tx.nonce() == nonce)
    }
}

#[derive(Default)]
struct PoolInner {
    executables: HashMap<Address, AccountQueue>,
    queued: HashMap<Address, NonceHeap>,
    /// included in a block that is not persisted yet
    in_progress: HashMap<TxHash, Arc<PoolTransaction>>,
}

impl PoolInner {
    /// The nonce the next executable transaction of `sender` must have, ignoring the pool's
    /// executable queue
    fn base_nonce(&self, sender: Address, persisted: U256) -> U256 {
        self.in_progress
            .values()
            .filter(|tx| tx.sender() == sender)
            .map(|tx| tx.nonce() + U256::from(1))
            .fold(persisted, U256::max)
    }

    fn expected_nonce(&self, sender: Address, persisted: U256) -> U256 {
        match self.executables.get(&sender) {
            Some(queue) => queue.nonce + U256::from(1),
            None => self.base_nonce(sender, persisted),
        }
    }

    /// Moves queued transactions of `sender` that close the gap into the executable queue
    fn promote(&mut self, sender: Address) -> usize {
        let Some(queue) = self.executables.get_mut(&sender) else { return 0 };
        let Some(queued) = self.queued.get_mut(&sender) else { return 0 };
        let mut promoted = 0;
        while queued.peek().is_some_and(|tx| tx.nonce() == queue.nonce + U256::from(1)) {
            if let Some(tx) = queued.remove_best() {
                queue.nonce = tx.nonce();
                queue.transactions.push(tx);
                promoted += 1;
            }
        }
        if queued.is_empty() {
            self.queued.remove(&sender);
        }
        promoted
    }

    fn find(&self, hash: &TxHash) -> Option<Arc<PoolTransaction>> {
        self.executables
            .values()
            .flat_map(|queue| queue.transactions.iter())
            .chain(self.queued.values().flat_map(|queued| queued.iter()))
            .chain(self.in_progress.values())
            .find(|tx| tx.hash == *hash)
            .cloned()
    }

    /// Removes `tx` from its sender's executable queue, returns the sender's new head
    fn remove_executable(&mut self, tx: &PoolTransaction) -> Option<Arc<PoolTransaction>> {
        let sender = tx.sender();
        let queue = self.executables.get_mut(&sender)?;
        if let Some(idx) = queue.transactions.position(|pooled| pooled.hash == tx.hash) {
            queue.transactions.remove_at(idx);
        }
        if queue.transactions.is_empty() {
            self.executables.remove(&sender);
            return None
        }
        queue.transactions.peek().cloned()
    }
}

/// Pool settings
#[derive(Clone, Debug)]
pub struct PoolConfig {
    pub chain_id: u64,
    pub block_gas_limit: u64,
    /// minimum gas price increase in percent to replace a transaction
    pub price_bump: u64,
    /// gas limit of transactions that don't set one
    pub default_gas_limit: u64,
    /// gas price of transactions that don't set one
    pub default_gas_price: U256,
}

/// Result of a successful [`Pool::add_transaction`]
#[derive(Clone, Debug)]
pub struct Admission {
    pub hash: TxHash,
    /// Whether the transaction can be mined right away
    pub is_executable: bool,
    pub transaction: Arc<PoolTransaction>,
}

/// Transaction pool that keeps track of all transactions until they are mined
pub struct Pool {
    inner: RwLock<PoolInner>,
    /// serializes admission per sender
    origins: Mutex<HashMap<Address, Arc<tokio::sync::Mutex<()>>>>,
    accounts: Arc<dyn AccountProvider>,
    config: PoolConfig,
    next_id: AtomicU64,
    /// notified after every admission
    drain_listeners: Mutex<Vec<Sender<TxHash>>>,
    /// notified about every admitted transaction, executable or not
    pending_listeners: Mutex<Vec<Sender<TxHash>>>,
}

// == impl Pool ==

impl Pool {
    pub fn new(accounts: Arc<dyn AccountProvider>, config: PoolConfig) -> Self {
        Self {
            inner: Default::default(),
            origins: Default::default(),
            accounts,
            config,
            next_id: AtomicU64::new(0),
            drain_listeners: Default::default(),
            pending_listeners: Default::default(),
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Validates, signs and classifies the transaction.
    ///
    /// Admissions of the same sender are processed one at a time in arrival order, the account
    /// lookup of a later one starts only after the earlier one is done.
    pub async fn add_transaction(
        &self,
        request: TransactionRequest,
        signer: Option<&PrivateKeySigner>,
    ) -> Result<Admission> {
        let gas_limit = match request.gas {
            Some(gas) => gas_to_u64(gas)?,
            None => self.config.default_gas_limit,
        };
        if gas_limit > self.config.block_gas_limit {
            warn!(
                target: "pool",
                gas_limit,
                block_gas_limit = self.config.block_gas_limit,
                "gas limit exceeds block gas limit"
            );
            return Err(InvalidTransactionError::GasTooHigh.into())
        }
        let input = request.data.unwrap_or_default();
        if gas_limit < intrinsic_gas(&input, request.to.is_none()) {
            return Err(InvalidTransactionError::GasTooLow.into())
        }

        let sender = request.from;
        let tx = Transaction {
            from: sender,
            to: request.to,
            nonce: U256::ZERO,
            gas_price: request.gas_price.unwrap_or(self.config.default_gas_price),
            gas_limit,
            value: request.value.unwrap_or_default(),
            input,
            chain_id: self.config.chain_id,
            signature: None,
        };

        let origin = self.origin_lock(sender);
        let res = {
            let _admission = origin.lock().await;
            self.admit(tx, request.nonce, signer).await
        };
        self.release_origin(sender, origin);
        res
    }

    /// Assigns the nonce, checks the sender's account and inserts the transaction, called with
    /// the sender's admission lock held
    async fn admit(
        &self,
        mut tx: Transaction,
        nonce: Option<U256>,
        signer: Option<&PrivateKeySigner>,
    ) -> Result<Admission> {
        let sender = tx.from;
        let account = self.accounts.account(sender).await?;

        let mut inner = self.inner.write();
        let expected = inner.expected_nonce(sender, account.nonce);
        let nonce = nonce.unwrap_or(expected);
        if nonce < account.nonce {
            return Err(InvalidTransactionError::NonceTooLow.into())
        }
        tx.nonce = nonce;
        if tx.max_cost() > account.balance {
            return Err(InvalidTransactionError::InsufficientFunds.into())
        }
        if let Some(signer) = signer {
            tx.sign(signer)?;
        }

        let hash = tx.hash();
        if inner.find(&hash).is_some() {
            return Err(PoolError::AlreadyImported(hash).into())
        }
        let base = inner.base_nonce(sender, account.nonce);
        if nonce < base {
            // already included in a block that is being finalized
            return Err(PoolError::TransactionLocked(hash).into())
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let transaction = Arc::new(PoolTransaction::new(tx, id));
        let is_executable = self.insert(&mut inner, transaction.clone(), expected)?;
        let promoted = if is_executable { inner.promote(sender) } else { 0 };
        drop(inner);

        trace!(target: "pool", ?hash, ?sender, %nonce, is_executable, promoted, "added tx");
        Self::notify(&self.pending_listeners, hash);
        Self::notify(&self.drain_listeners, hash);
        Ok(Admission { hash, is_executable, transaction })
    }

    /// Puts the transaction into the executable or queued set, replacing a transaction with the
    /// same nonce if the price bump allows it.
    fn insert(
        &self,
        inner: &mut PoolInner,
        tx: Arc<PoolTransaction>,
        expected: U256,
    ) -> Result<bool> {
        let sender = tx.sender();
        let nonce = tx.nonce();

        if let Some(queue) = inner.executables.get_mut(&sender) {
            if let Some(idx) = queue.position(nonce) {
                let existing = queue.transactions.get(idx).cloned().ok_or_else(|| {
                    BlockchainError::Internal("executable queue out of sync".to_string())
                })?;
                if existing.is_locked() {
                    return Err(PoolError::TransactionLocked(existing.hash).into())
                }
                self.ensure_price_bump(&existing, &tx)?;
                queue.transactions.replace_at(idx, tx.clone());
                Self::replaced(&existing, &tx);
                return Ok(true)
            }
        }

        if nonce == expected {
            let queue = inner.executables.entry(sender).or_insert_with(|| AccountQueue {
                nonce,
                transactions: nonce_heap(),
            });
            queue.nonce = nonce;
            queue.transactions.push(tx);
            return Ok(true)
        }

        let queued = inner.queued.entry(sender).or_insert_with(nonce_heap);
        if let Some(idx) = queued.position(|pooled| pooled.nonce() == nonce) {
            let existing = queued.get(idx).cloned().ok_or_else(|| {
                BlockchainError::Internal("queued transactions out of sync".to_string())
            })?;
            self.ensure_price_bump(&existing, &tx)?;
            queued.replace_at(idx, tx.clone());
            Self::replaced(&existing, &tx);
        } else {
            queued.push(tx);
        }
        Ok(false)
    }

    fn ensure_price_bump(&self, existing: &PoolTransaction, tx: &PoolTransaction) -> Result<()> {
        let old = existing.gas_price();
        let bump = old.saturating_mul(U256::from(self.config.price_bump)) / U256::from(100);
        let min = old.saturating_add(bump);
        if tx.gas_price() <= min {
            return Err(PoolError::ReplacementUnderpriced(tx.hash).into())
        }
        Ok(())
    }

    fn replaced(existing: &PoolTransaction, tx: &PoolTransaction) {
        trace!(target: "pool", replaced=?existing.hash, by=?tx.hash, "replaced transaction");
        existing.finalize(TransactionOutcome::Rejected(TransactionError::Replaced(tx.hash)));
    }

    fn origin_lock(&self, sender: Address) -> Arc<tokio::sync::Mutex<()>> {
        self.origins.lock().entry(sender).or_default().clone()
    }

    /// Forgets the admission lock of `sender` once no admission holds or waits on it
    fn release_origin(&self, sender: Address, origin: Arc<tokio::sync::Mutex<()>>) {
        let mut origins = self.origins.lock();
        drop(origin);
        if origins.get(&sender).is_some_and(|lock| Arc::strong_count(lock) == 1) {
            origins.remove(&sender);
        }
    }

    fn notify(listeners: &Mutex<Vec<Sender<TxHash>>>, hash: TxHash) {
        listeners.lock().retain_mut(|listener| match listener.try_send(hash) {
            Ok(()) => true,
            // a full channel already carries a wakeup
            Err(err) => !err.is_disconnected(),
        })
    }

    /// Returns a channel that yields after every admission
    pub fn add_drain_listener(&self) -> Receiver<TxHash> {
        let (tx, rx) = channel(LISTENER_CHANNEL_SIZE);
        self.drain_listeners.lock().push(tx);
        rx
    }

    /// Returns a channel that yields the hash of every admitted transaction
    pub fn add_pending_listener(&self) -> Receiver<TxHash> {
        let (tx, rx) = channel(LISTENER_CHANNEL_SIZE);
        self.pending_listeners.lock().push(tx);
        rx
    }

    /// Locks and returns every unlocked sender head
    pub fn lock_heads(&self) -> Vec<Arc<PoolTransaction>> {
        self.lock_heads_where(|_| true)
    }

    /// Locks and returns every unlocked sender head priced at most `max_price` that is not in
    /// `skip`
    pub fn lock_cheaper_heads(
        &self,
        max_price: U256,
        skip: &HashSet<TxHash>,
    ) -> Vec<Arc<PoolTransaction>> {
        self.lock_heads_where(|head| head.gas_price() <= max_price && !skip.contains(&head.hash))
    }

    fn lock_heads_where(&self, f: impl Fn(&PoolTransaction) -> bool) -> Vec<Arc<PoolTransaction>> {
        let inner = self.inner.read();
        inner
            .executables
            .values()
            .filter_map(|queue| queue.transactions.peek())
            .filter(|head| f(head))
            .filter(|head| head.lock())
            .cloned()
            .collect()
    }

    /// Whether a sender head is waiting to be mined
    pub fn has_ready(&self) -> bool {
        self.inner
            .read()
            .executables
            .values()
            .filter_map(|queue| queue.transactions.peek())
            .any(|head| !head.is_locked())
    }

    /// Moves a mined head to the in-progress set.
    ///
    /// Returns the sender's next head, locked, if there is one.
    pub fn on_mined(&self, tx: &Arc<PoolTransaction>) -> Option<Arc<PoolTransaction>> {
        let mut inner = self.inner.write();
        let next = inner.remove_executable(tx);
        inner.in_progress.insert(tx.hash, tx.clone());
        tx.unlock();
        next.filter(|next| next.lock())
    }

    /// Drops a head that can not be included and resolves it with `err`.
    ///
    /// Returns the sender's next head, locked, if there is one.
    pub fn on_rejected(
        &self,
        tx: &Arc<PoolTransaction>,
        err: TransactionError,
    ) -> Option<Arc<PoolTransaction>> {
        let next = self.inner.write().remove_executable(tx);
        debug!(target: "pool", hash=?tx.hash, %err, "rejected transaction");
        tx.finalize(TransactionOutcome::Rejected(err));
        next.filter(|next| next.lock())
    }

    /// Resolves the in-progress transactions of a persisted block
    pub fn on_finalized(&self, block_hash: TxHash, block_number: u64, hashes: &[TxHash]) {
        let mut inner = self.inner.write();
        for hash in hashes {
            if let Some(tx) = inner.in_progress.remove(hash) {
                tx.finalize(TransactionOutcome::Mined { block_hash, block_number });
            }
        }
    }

    /// Puts everything that was included in a block that will not be persisted back at the front
    /// of its sender's executable queue, unlocked.
    ///
    /// Returns the number of restored transactions.
    pub fn restore_in_progress(&self) -> usize {
        let mut inner = self.inner.write();
        let in_progress = std::mem::take(&mut inner.in_progress);
        let count = in_progress.len();
        for tx in in_progress.into_values() {
            tx.unlock();
            let nonce = tx.nonce();
            let queue = inner
                .executables
                .entry(tx.sender())
                .or_insert_with(|| AccountQueue { nonce, transactions: nonce_heap() });
            queue.nonce = queue.nonce.max(nonce);
            queue.transactions.push(tx);
        }
        if count > 0 {
            debug!(target: "pool", count, "restored transactions of aborted block");
        }
        count
    }

    /// Removes all transactions, anyone waiting on them is released
    pub fn clear(&self) {
        let removed = std::mem::take(&mut *self.inner.write());
        let count = removed.in_progress.len() +
            removed.executables.values().map(|queue| queue.transactions.len()).sum::<usize>() +
            removed.queued.values().map(Heap::len).sum::<usize>();
        let all = removed
            .executables
            .into_values()
            .flat_map(|mut queue| queue.transactions.drain().collect::<Vec<_>>())
            .chain(
                removed
                    .queued
                    .into_values()
                    .flat_map(|mut queued| queued.drain().collect::<Vec<_>>()),
            )
            .chain(removed.in_progress.into_values());
        for tx in all {
            tx.unlock();
            tx.finalize(TransactionOutcome::Rejected(TransactionError::Dropped));
        }
        debug!(target: "pool", count, "cleared pool");
    }

    /// Returns the transaction with the given hash if it is still pending
    pub fn find(&self, hash: &TxHash) -> Option<Arc<PoolTransaction>> {
        self.inner.read().find(hash)
    }

    /// Number of executable and queued transactions
    pub fn status(&self) -> PoolStatus {
        let inner = self.inner.read();
        PoolStatus {
            pending: inner.executables.values().map(|queue| queue.transactions.len()).sum(),
            queued: inner.queued.values().map(Heap::len).sum(),
        }
    }

    /// All pending transactions, per sender and ordered by nonce
    pub fn content(&self) -> PoolContent {
        fn sorted<'a>(txs: impl Iterator<Item = &'a Arc<PoolTransaction>>) -> Vec<Transaction> {
            let mut txs = txs.map(|tx| tx.transaction.clone()).collect::<Vec<_>>();
            txs.sort_by_key(|tx| tx.nonce);
            txs
        }
        let inner = self.inner.read();
        PoolContent {
            pending: inner
                .executables
                .iter()
                .map(|(sender, queue)| (*sender, sorted(queue.transactions.iter())))
                .collect(),
            queued: inner
                .queued
                .iter()
                .map(|(sender, queued)| (*sender, sorted(queued.iter())))
                .collect(),
        }
    }
}

impl fmt::Debug for Pool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool").field("config", &self.config).finish_non_exhaustive()
    }
}

/// Result of `txpool_status`
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize)]
pub struct PoolStatus {
    pub pending: usize,
    pub queued: usize,
}

/// Result of `txpool_content`
#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize)]
pub struct PoolContent {
    pub pending: HashMap<Address, Vec<Transaction>>,
    pub queued: HashMap<Address, Vec<Transaction>>,
}
