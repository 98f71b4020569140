//! In memory blockchain backend

use self::{
    fork_db::Tombstones,
    state::{StateManager, TrieSource},
    storage::BlockchainStorage,
    trie::TrieDb,
};
use crate::{
    config::NodeConfig,
    eth::{
        backend::{
            db::{KeyValueStore, MemoryStore},
            executor::{BlockEnv, Executor},
            info::AccountView,
            time::TimeManager,
        },
        error::{BlockchainError, Result},
        miner::{BlockBuilder, BuiltBlock, Miner, MiningMode},
        pool::{Pool, PoolConfig, transactions::TransactionOutcome},
    },
    fork::ClientFork,
    node_info,
};
use alloy_primitives::{Address, B256, Bytes, TxHash, U256};
use alloy_signer_local::PrivateKeySigner;
use futures::channel::{
    mpsc::{UnboundedReceiver, UnboundedSender, unbounded},
    oneshot,
};
use kiln_core::{
    block::{
        Block, BlockLog, Header, MinedTransaction, Receipt, TransactionReceipt, ordered_trie_root,
    },
    transaction::TransactionRequest,
    types::{Account, BlockTag, Capacity, EMPTY_ROOT_HASH, MineOptions},
};
use parking_lot::{Mutex, RwLock};
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};
use tokio::sync::watch;

pub mod fork_db;
pub mod state;
pub mod storage;
pub mod trie;

/// Lifecycle of the node
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeStatus {
    /// Genesis is committed but mining is not wired yet
    Starting,
    Started,
    Stopping,
    Stopped,
}

/// State recorded by `evm_snapshot`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Snapshot {
    pub block_hash: B256,
    pub block_number: u64,
    pub state_root: B256,
    /// time offset in milliseconds
    pub time_offset: i128,
}

/// Sent for every persisted block
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewBlockNotification {
    pub hash: B256,
    pub header: Header,
}

/// Gives access to the chain state and drives block production
pub struct Backend {
    /// the account state, locked by the miner while a block is built and sealed
    state: Arc<tokio::sync::Mutex<StateManager>>,
    /// persisted blocks, transactions and receipts
    blockchain: RwLock<BlockchainStorage>,
    pool: Arc<Pool>,
    miner: Miner,
    executor: Arc<dyn Executor>,
    time: TimeManager,
    snapshots: Mutex<Vec<Snapshot>>,
    fork: Option<ClientFork>,
    chain_id: u64,
    gas_limit: u64,
    coinbase: Address,
    /// number of the first local block
    genesis_number: u64,
    /// whether `queue_transaction` waits until the transaction is mined
    legacy_instamine: bool,
    status: watch::Sender<NodeStatus>,
    /// set by `miner_stop`, suppresses automatic mining
    paused: AtomicBool,
    /// set when mining was requested while a block was being built
    pending: AtomicBool,
    /// held for the duration of a mining run
    busy: tokio::sync::Mutex<()>,
    shutdown: Mutex<Option<oneshot::Sender<()>>>,
    shutdown_rx: Mutex<Option<oneshot::Receiver<()>>>,
    new_block_listeners: Mutex<Vec<UnboundedSender<NewBlockNotification>>>,
    new_log_listeners: Mutex<Vec<UnboundedSender<Vec<BlockLog>>>>,
}

// === impl Backend ===

impl Backend {
    /// Creates the backend and commits the genesis block
    pub async fn with_config(config: &NodeConfig, fork: Option<ClientFork>) -> Result<Self> {
        Self::new(config, fork, Arc::new(MemoryStore::default())).await
    }

    pub async fn new(
        config: &NodeConfig,
        fork: Option<ClientFork>,
        db: Arc<dyn KeyValueStore>,
    ) -> Result<Self> {
        let source = match &fork {
            Some(fork) => TrieSource::Forked {
                db: TrieDb::default(),
                fork: fork.clone(),
                tombstones: Tombstones::default(),
            },
            None => TrieSource::Memory(TrieDb::default()),
        };
        let mut state = StateManager::new(source)?;

        for signer in &config.genesis_accounts {
            let address = signer.address();
            let mut account = state.account_or_default(address).await?;
            account.balance = config.genesis_balance;
            state.put_account(address, &account).await?;
        }

        let time = match config.genesis_timestamp {
            Some(timestamp) => TimeManager::starting_at(timestamp),
            None => TimeManager::default(),
        };
        let (genesis_number, parent_hash) = match &fork {
            Some(fork) => (fork.block_number() + 1, fork.block_hash()),
            None => (0, B256::ZERO),
        };
        state.set_block_number(genesis_number);

        let header = Header {
            parent_hash,
            coinbase: config.coinbase,
            state_root: state.root(),
            transactions_root: EMPTY_ROOT_HASH,
            receipts_root: EMPTY_ROOT_HASH,
            number: genesis_number,
            gas_limit: config.gas_limit,
            timestamp: time.current_timestamp(),
            ..Default::default()
        };
        let genesis = Block::new(header, Vec::new());
        trace!(target: "backend", number = genesis_number, hash=?genesis.hash, "created genesis");

        let mut blockchain = BlockchainStorage::new(db);
        blockchain.insert_block(genesis)?;

        let state = Arc::new(tokio::sync::Mutex::new(state));
        let pool = Arc::new(Pool::new(
            Arc::new(AccountView::new(state.clone())),
            PoolConfig {
                chain_id: config.chain_id,
                block_gas_limit: config.gas_limit,
                price_bump: config.price_bump,
                default_gas_limit: config.tx_gas_limit,
                default_gas_price: config.gas_price,
            },
        ));

        let mode = match config.block_time {
            Some(block_time) if !block_time.is_zero() => MiningMode::interval(block_time),
            _ => MiningMode::instant(Capacity::Single, pool.add_drain_listener()),
        };

        let (shutdown, shutdown_rx) = oneshot::channel();
        Ok(Self {
            state,
            blockchain: RwLock::new(blockchain),
            pool,
            miner: Miner::new(mode),
            executor: config.executor.clone(),
            time,
            snapshots: Default::default(),
            fork,
            chain_id: config.chain_id,
            gas_limit: config.gas_limit,
            coinbase: config.coinbase,
            genesis_number,
            legacy_instamine: config.legacy_instamine,
            status: watch::Sender::new(NodeStatus::Starting),
            paused: AtomicBool::new(config.no_mining),
            pending: AtomicBool::new(false),
            busy: Default::default(),
            shutdown: Mutex::new(Some(shutdown)),
            shutdown_rx: Mutex::new(Some(shutdown_rx)),
            new_block_listeners: Default::default(),
            new_log_listeners: Default::default(),
        })
    }

    pub fn pool(&self) -> &Arc<Pool> {
        &self.pool
    }

    pub fn miner(&self) -> &Miner {
        &self.miner
    }

    pub fn time(&self) -> &TimeManager {
        &self.time
    }

    /// The forked chain, if any
    pub fn fork(&self) -> Option<&ClientFork> {
        self.fork.as_ref()
    }

    pub fn is_fork(&self) -> bool {
        self.fork.is_some()
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    pub fn gas_limit(&self) -> u64 {
        self.gas_limit
    }

    pub fn genesis_number(&self) -> u64 {
        self.genesis_number
    }

    /// Returns the current best number of the chain
    pub fn best_number(&self) -> u64 {
        self.blockchain.read().latest_number()
    }

    /// Returns the current best hash of the chain
    pub fn best_hash(&self) -> B256 {
        self.blockchain.read().latest_hash()
    }

    pub fn status(&self) -> NodeStatus {
        *self.status.borrow()
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    /// Marks the node as started, automatic mining is wired at this point
    pub fn mark_started(&self) {
        self.status.send_if_modified(|status| {
            let starting = *status == NodeStatus::Starting;
            if starting {
                *status = NodeStatus::Started;
            }
            starting
        });
    }

    /// The receiving end of the shutdown signal, can only be taken once
    pub fn take_shutdown_signal(&self) -> Option<oneshot::Receiver<()>> {
        self.shutdown_rx.lock().take()
    }

    fn ensure_running(&self) -> Result<()> {
        match self.status() {
            NodeStatus::Starting | NodeStatus::Started => Ok(()),
            NodeStatus::Stopping | NodeStatus::Stopped => Err(BlockchainError::NotRunning),
        }
    }

    /// Adds the transaction to the pool.
    ///
    /// With legacy instamine an executable transaction is mined before this returns, a
    /// transaction that fails to be mined is returned as an error.
    pub async fn queue_transaction(
        &self,
        request: TransactionRequest,
        signer: Option<&PrivateKeySigner>,
    ) -> Result<TxHash> {
        self.ensure_running()?;
        let admission = self.pool.add_transaction(request, signer).await?;
        node_info!("Transaction: {:?}", admission.hash);

        if admission.is_executable &&
            self.legacy_instamine &&
            !self.is_paused() &&
            self.miner.is_auto_mine()
        {
            if let TransactionOutcome::Rejected(err) = admission.transaction.finalized().await {
                return Err(err.into())
            }
        }
        Ok(admission.hash)
    }

    /// Mines blocks until no more work is pending.
    ///
    /// If a block is already being mined the request is recorded and the running miner picks it
    /// up once its current block is done.
    pub async fn mine_pending(&self, capacity: Capacity, persist_empty: bool) -> Result<()> {
        self.pending.store(true, Ordering::Release);
        loop {
            let Ok(busy) = self.busy.try_lock() else {
                trace!(target: "backend", "already mining, stashed request");
                return Ok(())
            };
            while self.pending.swap(false, Ordering::AcqRel) {
                while self.mine_block(capacity, persist_empty).await?.is_some() {
                    if capacity == Capacity::FillBlock || !self.pool.has_ready() {
                        break
                    }
                }
            }
            drop(busy);

            if !self.pending.load(Ordering::Acquire) {
                return Ok(())
            }
        }
    }

    /// Mines `opts.blocks()` blocks, empty ones included.
    ///
    /// An explicit timestamp moves the clock, the first block is mined at that time.
    pub async fn evm_mine(&self, opts: MineOptions) -> Result<u64> {
        self.ensure_running()?;
        if let Some(timestamp) = opts.timestamp {
            self.time.set_time(timestamp);
        }
        let blocks = opts.blocks();
        {
            let _busy = self.busy.lock().await;
            for _ in 0..blocks {
                self.mine_block(Capacity::FillBlock, true).await?;
            }
        }

        // requests that came in while the blocks above were mined
        if self.pending.load(Ordering::Acquire) && self.miner.is_auto_mine() && !self.is_paused()
        {
            self.mine_pending(self.miner.capacity(), false).await?;
        }
        Ok(blocks)
    }

    /// Builds and persists a single block, returns `None` if it would be empty and
    /// `persist_empty` is not set.
    async fn mine_block(&self, capacity: Capacity, persist_empty: bool) -> Result<Option<Block>> {
        let mut state = self.state.lock().await;
        let (parent_hash, parent) = {
            let blockchain = self.blockchain.read();
            let latest = blockchain
                .latest()
                .ok_or_else(|| BlockchainError::Internal("missing latest block".to_string()))?;
            (latest.hash, latest.header.clone())
        };
        let env = BlockEnv {
            number: parent.number + 1,
            timestamp: self.time.current_timestamp(),
            coinbase: self.coinbase,
            gas_limit: self.gas_limit,
        };

        let built = BlockBuilder {
            pool: &self.pool,
            state: &mut *state,
            executor: self.executor.as_ref(),
            env: env.clone(),
            pending: &self.pending,
        }
        .build(capacity)
        .await?;
        let built = match built {
            Some(built) => built,
            None if persist_empty => BuiltBlock::default(),
            None => return Ok(None),
        };

        let state_root = state.root();
        match self.seal(parent_hash, state_root, env, built) {
            Ok(block) => Ok(Some(block)),
            Err(err) => {
                error!(target: "backend", %err, "failed to persist block");
                self.pool.restore_in_progress();
                state.set_root(parent.state_root)?;
                Err(err)
            }
        }
    }

    /// Writes the block with its transactions and receipts and resolves the included
    /// transactions.
    fn seal(
        &self,
        parent_hash: B256,
        state_root: B256,
        env: BlockEnv,
        built: BuiltBlock,
    ) -> Result<Block> {
        let BuiltBlock { transactions: included, gas_used, bloom } = built;
        let receipts = included
            .iter()
            .map(|tx| Receipt {
                status: tx.outcome.is_success(),
                cumulative_gas_used: tx.cumulative_gas_used,
                logs_bloom: tx.outcome.bloom,
                logs: tx.outcome.logs.clone(),
            })
            .collect::<Vec<_>>();
        let transactions =
            included.iter().map(|tx| tx.transaction.transaction.clone()).collect::<Vec<_>>();

        let header = Header {
            parent_hash,
            coinbase: env.coinbase,
            state_root,
            transactions_root: ordered_trie_root(&transactions),
            receipts_root: ordered_trie_root(&receipts),
            logs_bloom: bloom,
            number: env.number,
            gas_limit: env.gas_limit,
            gas_used,
            timestamp: env.timestamp,
        };
        let block = Block::new(header, transactions);
        let block_hash = block.hash;
        let block_number = block.number();

        let mut logs = Vec::new();
        {
            let mut blockchain = self.blockchain.write();
            for (idx, tx) in included.iter().enumerate() {
                let hash = tx.transaction.hash;
                let transaction_index = idx as u64;
                let mut tx_logs = Vec::with_capacity(tx.outcome.logs.len());
                for log in &tx.outcome.logs {
                    tx_logs.push(BlockLog {
                        inner: log.clone(),
                        block_hash,
                        block_number,
                        transaction_hash: hash,
                        transaction_index,
                        log_index: (logs.len() + tx_logs.len()) as u64,
                    });
                }

                blockchain.insert_transaction(&MinedTransaction {
                    hash,
                    block_hash,
                    block_number,
                    transaction_index,
                    transaction: tx.transaction.transaction.clone(),
                })?;
                blockchain.insert_receipt(&TransactionReceipt {
                    transaction_hash: hash,
                    transaction_index,
                    block_hash,
                    block_number,
                    from: tx.transaction.sender(),
                    to: tx.transaction.transaction.to,
                    gas_used: tx.outcome.gas_used,
                    cumulative_gas_used: tx.cumulative_gas_used,
                    effective_gas_price: tx.transaction.gas_price(),
                    contract_address: tx.outcome.created_address,
                    logs: tx_logs.clone(),
                    logs_bloom: tx.outcome.bloom,
                    status: tx.outcome.is_success(),
                    return_data: Some(tx.outcome.return_data.clone())
                        .filter(|data| !data.is_empty()),
                    error: tx.outcome.exception_error.clone(),
                })?;
                logs.extend(tx_logs);
            }
            blockchain.insert_block(block.clone())?;
        }

        let hashes = included.iter().map(|tx| tx.transaction.hash).collect::<Vec<_>>();
        self.pool.on_finalized(block_hash, block_number, &hashes);

        node_info!("    Block Number: {}", block_number);
        node_info!("    Block Hash: {:?}", block_hash);
        node_info!("    Block Time: {}\n", env.timestamp);
        for tx in &included {
            node_info!("    Transaction: {:?}", tx.transaction.hash);
            if let Some(contract) = tx.outcome.created_address {
                node_info!("    Contract created: {:?}", contract);
            }
            node_info!("    Gas used: {}", tx.outcome.gas_used);
            if let Some(err) = &tx.outcome.exception_error {
                node_info!("    Error: {}", err);
            }
        }

        self.notify_on_new_block(NewBlockNotification {
            hash: block_hash,
            header: block.header.clone(),
        });
        self.notify_on_new_logs(logs);
        Ok(block)
    }

    /// Records the current state and returns the snapshot id, starting at 1
    pub async fn create_snapshot(&self) -> U256 {
        let mut state = self.state.lock().await;
        let (block_hash, block_number) = {
            let blockchain = self.blockchain.read();
            (blockchain.latest_hash(), blockchain.latest_number())
        };
        let snapshot = Snapshot {
            block_hash,
            block_number,
            state_root: state.root(),
            time_offset: self.time.offset(),
        };
        let mut snapshots = self.snapshots.lock();
        snapshots.push(snapshot);
        let id = U256::from(snapshots.len());
        trace!(target: "backend", %id, block_number, "created snapshot");
        id
    }

    /// Reverts the chain to the snapshot with the given id.
    ///
    /// Returns `false` if there is no such snapshot. The snapshot and all snapshots taken after
    /// it are consumed, the blocks mined since are deleted and pending transactions are dropped.
    pub async fn revert_snapshot(&self, id: U256) -> Result<bool> {
        let mut state = self.state.lock().await;
        let Some(snapshot) = self.take_snapshot(id) else {
            trace!(target: "backend", %id, "no snapshot to revert to");
            return Ok(false)
        };

        {
            let mut blockchain = self.blockchain.write();
            let mut hash = blockchain.latest_hash();
            while hash != snapshot.block_hash {
                let Some(block) = blockchain.block_by_hash(hash)? else { break };
                blockchain.remove_block(block.number())?;
                hash = block.header.parent_hash;
            }
            let latest = blockchain
                .block_by_hash(snapshot.block_hash)?
                .ok_or(BlockchainError::BlockNotFound)?;
            blockchain.set_latest(latest);
        }

        state.set_root(snapshot.state_root)?;
        state.prune_tombstones(snapshot.block_number);
        state.set_block_number(snapshot.block_number);
        self.time.set_offset(snapshot.time_offset);
        self.pool.clear();
        drop(state);

        debug!(target: "backend", %id, number = snapshot.block_number, "reverted to snapshot");
        Ok(true)
    }

    fn take_snapshot(&self, id: U256) -> Option<Snapshot> {
        let idx = usize::try_from(id).ok()?.checked_sub(1)?;
        let mut snapshots = self.snapshots.lock();
        let snapshot = snapshots.get(idx).cloned()?;
        snapshots.truncate(idx);
        Some(snapshot)
    }

    /// Jumps forward, returns the total time offset in seconds
    pub fn increase_time(&self, seconds: i64) -> i64 {
        self.time.increase_time(seconds)
    }

    /// Sets the clock, returns the new time offset in seconds
    pub fn set_time(&self, timestamp: u64) -> i64 {
        self.time.set_time(timestamp)
    }

    /// Stops automatic mining, blocks can still be mined with `evm_mine`
    pub fn pause(&self) {
        self.paused.store(true, Ordering::Release);
        debug!(target: "backend", "paused mining");
    }

    /// Resumes automatic mining and mines what became executable in the meantime
    pub async fn resume(&self) -> Result<()> {
        self.ensure_running()?;
        self.paused.store(false, Ordering::Release);
        debug!(target: "backend", "resumed mining");
        if self.miner.is_auto_mine() {
            self.mine_pending(Capacity::FillBlock, false).await?;
        }
        Ok(())
    }

    /// Shuts the node down.
    ///
    /// Waits until the node is started, a node that is already stopping is left alone.
    pub async fn stop(&self) -> Result<()> {
        let mut status = self.status.subscribe();
        if status.wait_for(|status| *status != NodeStatus::Starting).await.is_err() {
            return Err(BlockchainError::NotRunning)
        }
        let stopping = self.status.send_if_modified(|status| {
            let started = *status == NodeStatus::Started;
            if started {
                *status = NodeStatus::Stopping;
            }
            started
        });
        if !stopping {
            return Ok(())
        }

        if let Some(shutdown) = self.shutdown.lock().take() {
            let _ = shutdown.send(());
        }
        let _busy = self.busy.lock().await;
        self.pool.clear();
        self.new_block_listeners.lock().clear();
        self.new_log_listeners.lock().clear();
        self.blockchain.read().close();
        self.status.send_replace(NodeStatus::Stopped);
        node_info!("Node stopped");
        Ok(())
    }

    /// Resolves the block a read refers to, `None` means the current state
    fn resolve_read(&self, tag: Option<BlockTag>) -> Result<Option<u64>> {
        let best = self.best_number();
        match tag.unwrap_or_default() {
            BlockTag::Latest | BlockTag::Pending => Ok(None),
            BlockTag::Earliest => Ok(Some(self.genesis_number).filter(|number| *number < best)),
            BlockTag::Number(number) if number > best => Err(BlockchainError::BlockNotFound),
            BlockTag::Number(number) if number == best => Ok(None),
            BlockTag::Number(number) => Ok(Some(number)),
        }
    }

    /// Returns the account as of the given block
    pub async fn get_account(&self, address: Address, tag: Option<BlockTag>) -> Result<Account> {
        let Some(number) = self.resolve_read(tag)? else {
            return Ok(self.state.lock().await.account_or_default(address).await?)
        };

        let root = match &self.fork {
            // blocks of the forked chain are only known remotely
            Some(fork) if fork.predates_fork(number) => EMPTY_ROOT_HASH,
            _ => {
                let block = self
                    .blockchain
                    .read()
                    .block_by_number(number)?
                    .ok_or(BlockchainError::BlockNotFound)?;
                block.header.state_root
            }
        };
        let mut state = self.state.lock().await;
        Ok(state.account_at(address, root, Some(number)).await?.unwrap_or_default())
    }

    pub async fn get_balance(&self, address: Address, tag: Option<BlockTag>) -> Result<U256> {
        Ok(self.get_account(address, tag).await?.balance)
    }

    pub async fn get_nonce(&self, address: Address, tag: Option<BlockTag>) -> Result<U256> {
        Ok(self.get_account(address, tag).await?.nonce)
    }

    /// Code at the latest block
    pub async fn get_code(&self, address: Address) -> Result<Bytes> {
        Ok(self.state.lock().await.code(address).await?)
    }

    /// Storage slot at the latest block
    pub async fn storage_at(&self, address: Address, slot: U256) -> Result<U256> {
        Ok(self.state.lock().await.storage(address, slot).await?)
    }

    pub fn block_by_number(&self, tag: BlockTag) -> Result<Option<Block>> {
        let blockchain = self.blockchain.read();
        let number = match tag {
            BlockTag::Latest | BlockTag::Pending => blockchain.latest_number(),
            BlockTag::Earliest => self.genesis_number,
            BlockTag::Number(number) => number,
        };
        Ok(blockchain.block_by_number(number)?)
    }

    pub fn block_by_hash(&self, hash: B256) -> Result<Option<Block>> {
        Ok(self.blockchain.read().block_by_hash(hash)?)
    }

    pub fn mined_transaction(&self, hash: TxHash) -> Result<Option<MinedTransaction>> {
        Ok(self.blockchain.read().transaction(hash)?)
    }

    pub fn transaction_receipt(&self, hash: TxHash) -> Result<Option<TransactionReceipt>> {
        Ok(self.blockchain.read().receipt(hash)?)
    }

    /// Returns a channel that yields every persisted block
    pub fn new_block_notifications(&self) -> UnboundedReceiver<NewBlockNotification> {
        let (tx, rx) = unbounded();
        self.new_block_listeners.lock().push(tx);
        rx
    }

    /// Returns a channel that yields the logs of every persisted block
    pub fn new_log_notifications(&self) -> UnboundedReceiver<Vec<BlockLog>> {
        let (tx, rx) = unbounded();
        self.new_log_listeners.lock().push(tx);
        rx
    }

    /// Notifies all `new_block_listeners` about the new block
    fn notify_on_new_block(&self, notification: NewBlockNotification) {
        self.new_block_listeners
            .lock()
            .retain(|listener| listener.unbounded_send(notification.clone()).is_ok());
    }

    fn notify_on_new_logs(&self, logs: Vec<BlockLog>) {
        self.new_log_listeners
            .lock()
            .retain(|listener| listener.unbounded_send(logs.clone()).is_ok());
    }
}

impl std::fmt::Debug for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Backend")
            .field("chain_id", &self.chain_id)
            .field("best_number", &self.best_number())
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}
