//! Mines transactions

use crate::eth::{
    backend::{
        executor::{BlockEnv, ExecutionOutcome, Executor},
        mem::state::StateManager,
    },
    error::{BlockchainError, TransactionError},
    pool::{Pool, transactions::PoolTransaction},
};
use alloy_primitives::{Bloom, TxHash, U256};
use futures::{
    channel::mpsc::Receiver,
    stream::{Fuse, Stream, StreamExt},
};
use kiln_core::{
    heap::Heap,
    types::{Capacity, MIN_TRANSACTION_GAS},
};
use parking_lot::RwLock;
use std::{
    collections::HashSet,
    fmt,
    pin::Pin,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    task::{Context, Poll},
    time::Duration,
};
use tokio::time::{Interval, MissedTickBehavior};

/// Decides when the node mines, shared between the service and the backend
#[derive(Clone, Debug)]
pub struct Miner {
    /// The mode this miner currently operates in
    mode: Arc<RwLock<MiningMode>>,
}

// === impl Miner ===

impl Miner {
    /// Returns a new miner with that operates in the given `mode`
    pub fn new(mode: MiningMode) -> Self {
        Self { mode: Arc::new(RwLock::new(mode)) }
    }

    /// Returns `true` if auto mining is enabled
    pub fn is_auto_mine(&self) -> bool {
        let mode = self.mode.read();
        matches!(*mode, MiningMode::Auto(_))
    }

    pub fn is_interval(&self) -> bool {
        let mode = self.mode.read();
        matches!(*mode, MiningMode::FixedBlockTime(_))
    }

    /// How many transactions a block mined on the miner's own trigger may hold
    pub fn capacity(&self) -> Capacity {
        match &*self.mode.read() {
            MiningMode::Auto(miner) => miner.capacity,
            MiningMode::FixedBlockTime(_) => Capacity::FillBlock,
        }
    }

    /// Polls the mining trigger of the current mode.
    ///
    /// Resolves with the capacity of the block(s) to mine once the mode asks for mining.
    pub fn poll(&mut self, cx: &mut Context<'_>) -> Poll<Capacity> {
        self.mode.write().poll(cx)
    }
}

/// Mode of operations for the `Miner`
#[derive(Debug)]
pub enum MiningMode {
    /// A miner that listens for newly admitted transactions, instamine.
    ///
    /// Either one transaction will be mined per block, or any number of transactions will be
    /// allowed
    Auto(ReadyTransactionMiner),
    /// A miner that constructs a new block every `interval` tick
    FixedBlockTime(FixedBlockTimeMiner),
}

// === impl MiningMode ===

impl MiningMode {
    pub fn instant(capacity: Capacity, listener: Receiver<TxHash>) -> Self {
        Self::Auto(ReadyTransactionMiner { capacity, rx: listener.fuse() })
    }

    pub fn interval(duration: Duration) -> Self {
        Self::FixedBlockTime(FixedBlockTimeMiner::new(duration))
    }

    /// polls the trigger of the mode
    pub fn poll(&mut self, cx: &mut Context<'_>) -> Poll<Capacity> {
        match self {
            Self::Auto(miner) => miner.poll(cx),
            Self::FixedBlockTime(miner) => miner.poll(cx),
        }
    }
}

/// A miner that's supposed to create a new block every `interval`, mining all transactions that are
/// ready at that time.
#[derive(Debug)]
pub struct FixedBlockTimeMiner {
    /// The interval this fixed block time miner operates with
    interval: Interval,
}

// === impl FixedBlockTimeMiner ===

impl FixedBlockTimeMiner {
    /// Creates a new instance with an interval of `duration`
    pub fn new(duration: Duration) -> Self {
        let start = tokio::time::Instant::now() + duration;
        let mut interval = tokio::time::interval_at(start, duration);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self { interval }
    }

    fn poll(&mut self, cx: &mut Context<'_>) -> Poll<Capacity> {
        if self.interval.poll_tick(cx).is_ready() {
            return Poll::Ready(Capacity::FillBlock)
        }
        Poll::Pending
    }
}

/// A miner that listens for the pool's drain notifications
pub struct ReadyTransactionMiner {
    /// how many transactions to mine per block
    capacity: Capacity,
    /// receives hashes of admitted transactions
    rx: Fuse<Receiver<TxHash>>,
}

// === impl ReadyTransactionMiner ===

impl ReadyTransactionMiner {
    fn poll(&mut self, cx: &mut Context<'_>) -> Poll<Capacity> {
        let mut drained = false;
        while let Poll::Ready(Some(_hash)) = Pin::new(&mut self.rx).poll_next(cx) {
            drained = true;
        }
        if drained { Poll::Ready(self.capacity) } else { Poll::Pending }
    }
}

impl fmt::Debug for ReadyTransactionMiner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadyTransactionMiner")
            .field("capacity", &self.capacity)
            .finish_non_exhaustive()
    }
}

type PricedHeap =
    Heap<Arc<PoolTransaction>, fn(&Arc<PoolTransaction>, &Arc<PoolTransaction>) -> bool>;

/// Higher gas price first, earlier admission breaks ties
fn by_price(a: &Arc<PoolTransaction>, b: &Arc<PoolTransaction>) -> bool {
    match a.gas_price().cmp(&b.gas_price()) {
        std::cmp::Ordering::Equal => a.id < b.id,
        ord => ord.is_gt(),
    }
}

/// A transaction that made it into a block
#[derive(Debug)]
pub struct IncludedTransaction {
    pub transaction: Arc<PoolTransaction>,
    pub outcome: ExecutionOutcome,
    pub cumulative_gas_used: u64,
}

/// The result of a block assembly, the state changes are already committed
#[derive(Debug, Default)]
pub struct BuiltBlock {
    pub transactions: Vec<IncludedTransaction>,
    pub gas_used: u64,
    pub bloom: Bloom,
}

/// Assembles a single block out of the pool's executable transactions.
///
/// All state changes happen inside a block checkpoint, every transaction gets its own nested
/// checkpoint. Both are committed or reverted before [`BlockBuilder::build`] returns, on every
/// path.
pub struct BlockBuilder<'a> {
    pub pool: &'a Pool,
    pub state: &'a mut StateManager,
    pub executor: &'a dyn Executor,
    pub env: BlockEnv,
    /// set when new work arrives while the block is assembled
    pub pending: &'a AtomicBool,
}

impl BlockBuilder<'_> {
    /// Builds the block, returns `None` if no transaction could be included.
    pub async fn build(self, capacity: Capacity) -> Result<Option<BuiltBlock>, BlockchainError> {
        let Self { pool, state, executor, env, pending } = self;
        let mut priced = PricedHeap::from_vec(pool.lock_heads(), by_price);
        if priced.is_empty() {
            return Ok(None)
        }

        state.set_block_number(env.number);
        state.checkpoint();
        let res = assemble(pool, state, executor, &env, pending, &mut priced, capacity).await;

        // whatever is still staged stays in the pool for the next block
        for tx in priced.drain() {
            tx.unlock();
        }

        match res {
            Ok(block) if block.transactions.is_empty() => {
                state.revert()?;
                Ok(None)
            }
            Ok(block) => {
                state.commit()?;
                Ok(Some(block))
            }
            Err(err) => {
                error!(target: "miner", %err, number = env.number, "failed to mine block");
                // the block's transactions are retried with the next block
                pool.restore_in_progress();
                state.revert()?;
                Err(err)
            }
        }
    }
}

async fn assemble(
    pool: &Pool,
    state: &mut StateManager,
    executor: &dyn Executor,
    env: &BlockEnv,
    pending: &AtomicBool,
    priced: &mut PricedHeap,
    capacity: Capacity,
) -> Result<BuiltBlock, BlockchainError> {
    let mut block = BuiltBlock::default();
    let mut last_price: Option<U256> = None;
    // heads that do not fit this block
    let mut skipped = HashSet::new();

    loop {
        if let Some(max_price) = last_price.filter(|_| pending.load(Ordering::Acquire)) {
            // only heads that keep the block ordered by price, the rest waits for the next block
            for tx in pool.lock_cheaper_heads(max_price, &skipped) {
                priced.push(tx);
            }
        }

        let Some(tx) = priced.peek().cloned() else { break };
        let remaining = env.gas_limit - block.gas_used;

        if tx.transaction.intrinsic_gas() > remaining {
            trace!(target: "miner", hash=?tx.hash, remaining, "transaction does not fit block");
            priced.remove_best();
            skipped.insert(tx.hash);
            tx.unlock();
            continue
        }

        state.checkpoint();
        match executor.run_transaction(&tx.transaction, state, env).await {
            Ok(outcome) if outcome.gas_used > remaining => {
                state.revert()?;
                trace!(
                    target: "miner",
                    hash=?tx.hash,
                    gas_used = outcome.gas_used,
                    remaining,
                    "transaction exceeds block gas"
                );
                priced.remove_best();
                skipped.insert(tx.hash);
                tx.unlock();
            }
            Ok(outcome) => {
                state.commit()?;
                block.gas_used += outcome.gas_used;
                block.bloom.accrue_bloom(&outcome.bloom);
                last_price = Some(tx.gas_price());
                trace!(target: "miner", hash=?tx.hash, gas_used = outcome.gas_used, "included tx");

                match pool.on_mined(&tx) {
                    Some(next) => {
                        priced.replace_best(next);
                    }
                    None => {
                        priced.remove_best();
                    }
                }
                block.transactions.push(IncludedTransaction {
                    transaction: tx,
                    outcome,
                    cumulative_gas_used: block.gas_used,
                });

                if env.gas_limit - block.gas_used < MIN_TRANSACTION_GAS ||
                    block.transactions.len() >= capacity.max_transactions()
                {
                    break
                }
            }
            Err(err) if !err.is_fatal() => {
                state.revert()?;
                match pool.on_rejected(&tx, TransactionError::Execution(err)) {
                    Some(next) => {
                        priced.replace_best(next);
                    }
                    None => {
                        priced.remove_best();
                    }
                }
            }
            Err(err) => {
                state.revert()?;
                return Err(err.into())
            }
        }
    }

    Ok(block)
}
