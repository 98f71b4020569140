use crate::{
    serde_helpers::*,
    transaction::TransactionRequest,
    types::{BlockTag, MineOptions},
};
use alloy_primitives::{Address, B256, U256};
use serde::Deserialize;

/// Represents ethereum JSON-RPC API
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(tag = "method", content = "params")]
pub enum EthRequest {
    #[serde(rename = "eth_chainId", deserialize_with = "empty_params::deserialize")]
    EthChainId(()),

    #[serde(rename = "eth_accounts", deserialize_with = "empty_params::deserialize")]
    EthAccounts(()),

    #[serde(rename = "eth_blockNumber", deserialize_with = "empty_params::deserialize")]
    EthBlockNumber(()),

    #[serde(rename = "eth_getBalance")]
    EthGetBalance(Address, Option<BlockTag>),

    #[serde(rename = "eth_getTransactionCount")]
    EthGetTransactionCount(Address, Option<BlockTag>),

    #[serde(rename = "eth_getCode")]
    EthGetCode(Address, Option<BlockTag>),

    #[serde(rename = "eth_getStorageAt")]
    EthGetStorageAt(Address, U256, Option<BlockTag>),

    #[serde(rename = "eth_getBlockByNumber")]
    EthGetBlockByNumber(BlockTag, bool),

    #[serde(rename = "eth_getBlockByHash")]
    EthGetBlockByHash(B256, bool),

    #[serde(rename = "eth_getTransactionByHash", deserialize_with = "sequence::deserialize")]
    EthGetTransactionByHash(B256),

    #[serde(rename = "eth_getTransactionReceipt", deserialize_with = "sequence::deserialize")]
    EthGetTransactionReceipt(B256),

    #[serde(rename = "eth_sendTransaction", deserialize_with = "sequence::deserialize")]
    EthSendTransaction(Box<TransactionRequest>),

    /// Mines one or more blocks, optionally at a given timestamp
    #[serde(rename = "evm_mine", deserialize_with = "evm_mine_params::deserialize")]
    EvmMine(Option<MineOptions>),

    /// Records the current state, returns the snapshot id
    #[serde(rename = "evm_snapshot", deserialize_with = "empty_params::deserialize")]
    EvmSnapshot(()),

    /// Reverts to a snapshot taken with `evm_snapshot`
    #[serde(rename = "evm_revert", deserialize_with = "sequence::deserialize")]
    EvmRevert(U256),

    /// Jumps forward in time by the given number of seconds, negative values are ignored
    #[serde(rename = "evm_increaseTime", deserialize_with = "sequence::deserialize")]
    EvmIncreaseTime(i64),

    /// Sets the clock to the given unix timestamp in seconds
    #[serde(rename = "evm_setTime", deserialize_with = "sequence::deserialize")]
    EvmSetTime(u64),

    #[serde(rename = "miner_start", deserialize_with = "ignored_params::deserialize")]
    MinerStart(()),

    #[serde(rename = "miner_stop", deserialize_with = "empty_params::deserialize")]
    MinerStop(()),

    /// Number of pending and queued transactions
    #[serde(rename = "txpool_status", deserialize_with = "empty_params::deserialize")]
    TxPoolStatus(()),

    #[serde(rename = "txpool_content", deserialize_with = "empty_params::deserialize")]
    TxPoolContent(()),
}
