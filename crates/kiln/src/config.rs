use crate::{
    eth::backend::executor::{Executor, TransferExecutor},
    fork::ForkProvider,
};
use alloy_primitives::{Address, U256, keccak256, utils::Unit};
use alloy_signer_local::PrivateKeySigner;
use std::{sync::Arc, time::Duration};

/// Default chain id of the node
pub const CHAIN_ID: u64 = 1337;

/// Default block gas limit
pub const DEFAULT_GAS_LIMIT: u64 = 6_721_975;

/// Gas limit of transactions that don't specify one
pub const DEFAULT_TX_GAS_LIMIT: u64 = 90_000;

/// 20 gwei
pub const DEFAULT_GAS_PRICE: u64 = 20_000_000_000;

/// Minimum gas price increase in percent to replace a pending transaction
pub const DEFAULT_PRICE_BUMP: u64 = 10;

/// Seed the genesis accounts are derived from
pub const DEFAULT_ACCOUNT_SEED: &str = "kiln";

/// Configurations of the node
#[derive(Clone, Debug)]
pub struct NodeConfig {
    /// Chain ID of the EVM chain
    pub chain_id: u64,
    /// Block gas limit
    pub gas_limit: u64,
    /// Default gas limit for transactions that don't set one
    pub tx_gas_limit: u64,
    /// Default gas price for transactions that don't set one
    pub gas_price: U256,
    /// Signer accounts that will be initialised with `genesis_balance` in the genesis block
    pub genesis_accounts: Vec<PrivateKeySigner>,
    /// Native token balance of every genesis account in the genesis block
    pub genesis_balance: U256,
    /// Timestamp of the genesis block, the clock continues from there
    pub genesis_timestamp: Option<u64>,
    /// Configured block time. Use `None` to mine a block for every transaction
    pub block_time: Option<Duration>,
    /// Whether `eth_sendTransaction` returns only after the transaction was mined
    pub legacy_instamine: bool,
    /// Start with automatic mining paused
    pub no_mining: bool,
    /// Minimum gas price increase in percent to replace a pending transaction
    pub price_bump: u64,
    /// Address that receives the transaction fees
    pub coinbase: Address,
    /// Accounts that may send transactions without a signer
    pub unlocked_accounts: Vec<Address>,
    /// url of the rpc server that should be used for any rpc calls
    pub eth_rpc_url: Option<String>,
    /// pins the block number of the forked chain
    pub fork_block_number: Option<u64>,
    /// Timeout for requests sent to the remote chain
    pub fork_request_timeout: Duration,
    /// Number of request retries for spurious networks
    pub fork_request_retries: u32,
    /// Provider of the forked chain, takes precedence over `eth_rpc_url`
    pub fork_provider: Option<Arc<dyn ForkProvider>>,
    /// Whether user facing node output is enabled
    pub enable_logging: bool,
    /// Runs the transactions of every block
    pub executor: Arc<dyn Executor>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            chain_id: CHAIN_ID,
            gas_limit: DEFAULT_GAS_LIMIT,
            tx_gas_limit: DEFAULT_TX_GAS_LIMIT,
            gas_price: U256::from(DEFAULT_GAS_PRICE),
            genesis_accounts: dev_accounts(DEFAULT_ACCOUNT_SEED, 10),
            // 1000 ETH default balance
            genesis_balance: Unit::ETHER.wei().saturating_mul(U256::from(1000u64)),
            genesis_timestamp: None,
            block_time: None,
            legacy_instamine: false,
            no_mining: false,
            price_bump: DEFAULT_PRICE_BUMP,
            coinbase: Address::ZERO,
            unlocked_accounts: Vec::new(),
            eth_rpc_url: None,
            fork_block_number: None,
            fork_request_timeout: Duration::from_secs(45),
            fork_request_retries: 5,
            fork_provider: None,
            enable_logging: true,
            executor: Arc::new(TransferExecutor),
        }
    }
}

impl NodeConfig {
    /// Test config, without user facing output
    #[doc(hidden)]
    pub fn test() -> Self {
        Self { enable_logging: false, ..Default::default() }
    }

    /// Returns the default node configuration
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the chain ID
    #[must_use]
    pub fn with_chain_id<U: Into<u64>>(mut self, chain_id: U) -> Self {
        self.chain_id = chain_id.into();
        self
    }

    /// Sets the block gas limit
    #[must_use]
    pub fn with_gas_limit(mut self, gas_limit: u64) -> Self {
        self.gas_limit = gas_limit;
        self
    }

    /// Sets the gas limit of transactions that don't set one
    #[must_use]
    pub fn with_tx_gas_limit(mut self, gas_limit: u64) -> Self {
        self.tx_gas_limit = gas_limit;
        self
    }

    /// Sets the default gas price
    #[must_use]
    pub fn with_gas_price<U: Into<U256>>(mut self, gas_price: U) -> Self {
        self.gas_price = gas_price.into();
        self
    }

    /// Sets the genesis accounts
    #[must_use]
    pub fn with_genesis_accounts(mut self, accounts: Vec<PrivateKeySigner>) -> Self {
        self.genesis_accounts = accounts;
        self
    }

    /// Sets the balance of the genesis accounts in the genesis block
    #[must_use]
    pub fn with_genesis_balance<U: Into<U256>>(mut self, balance: U) -> Self {
        self.genesis_balance = balance.into();
        self
    }

    /// Sets the genesis timestamp
    #[must_use]
    pub fn with_genesis_timestamp(mut self, timestamp: Option<u64>) -> Self {
        self.genesis_timestamp = timestamp;
        self
    }

    /// Sets the block time to automine blocks
    #[must_use]
    pub fn with_blocktime<D: Into<Duration>>(mut self, block_time: Option<D>) -> Self {
        self.block_time = block_time.map(Into::into);
        self
    }

    /// Makes `eth_sendTransaction` wait until the transaction is mined
    #[must_use]
    pub fn with_legacy_instamine(mut self, legacy_instamine: bool) -> Self {
        self.legacy_instamine = legacy_instamine;
        self
    }

    /// Starts the node with automatic mining paused
    #[must_use]
    pub fn with_no_mining(mut self, no_mining: bool) -> Self {
        self.no_mining = no_mining;
        self
    }

    /// Sets the price bump in percent required to replace a pending transaction
    #[must_use]
    pub fn with_price_bump(mut self, price_bump: u64) -> Self {
        self.price_bump = price_bump;
        self
    }

    /// Sets the coinbase address
    #[must_use]
    pub fn with_coinbase(mut self, coinbase: Address) -> Self {
        self.coinbase = coinbase;
        self
    }

    /// Accounts that can send transactions without a signer
    #[must_use]
    pub fn with_unlocked_accounts(mut self, accounts: Vec<Address>) -> Self {
        self.unlocked_accounts = accounts;
        self
    }

    /// Sets the `eth_rpc_url` to use when forking
    #[must_use]
    pub fn with_eth_rpc_url<U: Into<String>>(mut self, eth_rpc_url: Option<U>) -> Self {
        self.eth_rpc_url = eth_rpc_url.map(Into::into);
        self
    }

    /// Sets the `fork_block_number` to use to fork off from
    #[must_use]
    pub fn with_fork_block_number<U: Into<u64>>(mut self, fork_block_number: Option<U>) -> Self {
        self.fork_block_number = fork_block_number.map(Into::into);
        self
    }

    /// Sets the timeout of requests to the forked chain
    #[must_use]
    pub fn fork_request_timeout(mut self, fork_request_timeout: Option<Duration>) -> Self {
        if let Some(fork_request_timeout) = fork_request_timeout {
            self.fork_request_timeout = fork_request_timeout;
        }
        self
    }

    /// Sets the number of retries of requests to the forked chain
    #[must_use]
    pub fn fork_request_retries(mut self, fork_request_retries: Option<u32>) -> Self {
        if let Some(fork_request_retries) = fork_request_retries {
            self.fork_request_retries = fork_request_retries;
        }
        self
    }

    /// Forks off the chain served by `provider`
    #[must_use]
    pub fn with_fork_provider(mut self, provider: Option<Arc<dyn ForkProvider>>) -> Self {
        self.fork_provider = provider;
        self
    }

    /// Sets whether to enable user facing node output
    #[must_use]
    pub fn with_logging(mut self, enable_logging: bool) -> Self {
        self.enable_logging = enable_logging;
        self
    }

    /// Sets the executor that runs the transactions of every block
    #[must_use]
    pub fn with_executor(mut self, executor: Arc<dyn Executor>) -> Self {
        self.executor = executor;
        self
    }

    /// Whether the node forks off a remote chain
    pub fn is_fork(&self) -> bool {
        self.fork_provider.is_some() || self.eth_rpc_url.is_some()
    }
}

/// Derives `count` signers from `seed`.
///
/// The same seed always yields the same accounts, key `i` is `keccak256(seed ++ i)`.
pub fn dev_accounts(seed: &str, count: usize) -> Vec<PrivateKeySigner> {
    (0u64..)
        .map(|idx| keccak256([seed.as_bytes(), &idx.to_be_bytes()].concat()))
        .filter_map(|key| PrivateKeySigner::from_bytes(&key).ok())
        .take(count)
        .collect()
}
