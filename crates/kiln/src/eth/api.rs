use crate::{
    eth::{
        backend::mem::Backend,
        error::{BlockchainError, Result, ToRpcResponseResult},
        pool::{PoolContent, PoolStatus},
    },
    logging::LoggingManager,
    node_info,
};
use alloy_primitives::{Address, B256, Bytes, TxHash, U256};
use alloy_signer_local::PrivateKeySigner;
use kiln_core::{
    block::{Block, Header, MinedTransaction, TransactionReceipt},
    request::EthRequest,
    transaction::{Transaction, TransactionRequest},
    types::{BlockTag, MineOptions},
};
use kiln_rpc::response::ResponseResult;
use serde::Serialize;
use std::{collections::HashSet, sync::Arc};

/// A transaction as returned by `eth_getTransactionByHash`, block fields are `None` while it is
/// pending
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcTransaction {
    pub hash: B256,
    pub block_hash: Option<B256>,
    pub block_number: Option<u64>,
    pub transaction_index: Option<u64>,
    #[serde(flatten)]
    pub transaction: Transaction,
}

impl From<MinedTransaction> for RpcTransaction {
    fn from(tx: MinedTransaction) -> Self {
        Self {
            hash: tx.hash,
            block_hash: Some(tx.block_hash),
            block_number: Some(tx.block_number),
            transaction_index: Some(tx.transaction_index),
            transaction: tx.transaction,
        }
    }
}

/// Transactions of a block, either just their hashes or the full transactions
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum BlockTransactions {
    Hashes(Vec<B256>),
    Full(Vec<RpcTransaction>),
}

/// A block as returned by `eth_getBlockByNumber`
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcBlock {
    pub hash: B256,
    #[serde(flatten)]
    pub header: Header,
    pub transactions: BlockTransactions,
}

impl RpcBlock {
    fn new(block: Block, full: bool) -> Self {
        let Block { hash, header, transactions } = block;
        let transactions = if full {
            let block_number = header.number;
            BlockTransactions::Full(
                transactions
                    .into_iter()
                    .enumerate()
                    .map(|(idx, transaction)| RpcTransaction {
                        hash: transaction.hash(),
                        block_hash: Some(hash),
                        block_number: Some(block_number),
                        transaction_index: Some(idx as u64),
                        transaction,
                    })
                    .collect(),
            )
        } else {
            BlockTransactions::Hashes(transactions.iter().map(Transaction::hash).collect())
        };
        Self { hash, header, transactions }
    }
}

/// The entry point for executing eth api RPC call - The Eth RPC interface.
///
/// This type is cheap to clone and can be used concurrently
#[derive(Clone, Debug)]
pub struct EthApi {
    /// Holds all blockchain related data
    backend: Arc<Backend>,
    /// available signers
    signers: Arc<Vec<PrivateKeySigner>>,
    /// accounts that can send transactions without a signature
    unlocked_accounts: Arc<HashSet<Address>>,
    /// Tracks whether user facing node output is enabled
    logger: LoggingManager,
}

// === impl Eth RPC API ===

impl EthApi {
    pub fn new(
        backend: Arc<Backend>,
        signers: Arc<Vec<PrivateKeySigner>>,
        unlocked_accounts: HashSet<Address>,
        logger: LoggingManager,
    ) -> Self {
        Self { backend, signers, unlocked_accounts: Arc::new(unlocked_accounts), logger }
    }

    /// Executes the [EthRequest] and returns an RPC [`ResponseResult`]
    pub async fn execute(&self, request: EthRequest) -> ResponseResult {
        trace!(target: "rpc::api", "executing eth request");
        let response = match request.clone() {
            EthRequest::EthChainId(_) => self.chain_id().to_rpc_result(),
            EthRequest::EthAccounts(_) => self.accounts().to_rpc_result(),
            EthRequest::EthBlockNumber(_) => self.block_number().to_rpc_result(),
            EthRequest::EthGetBalance(addr, block) => {
                self.balance(addr, block).await.to_rpc_result()
            }
            EthRequest::EthGetTransactionCount(addr, block) => {
                self.transaction_count(addr, block).await.to_rpc_result()
            }
            EthRequest::EthGetCode(addr, _) => self.get_code(addr).await.to_rpc_result(),
            EthRequest::EthGetStorageAt(addr, slot, _) => {
                self.storage_at(addr, slot).await.to_rpc_result()
            }
            EthRequest::EthGetBlockByNumber(num, full) => {
                self.block_by_number(num, full).to_rpc_result()
            }
            EthRequest::EthGetBlockByHash(hash, full) => {
                self.block_by_hash(hash, full).to_rpc_result()
            }
            EthRequest::EthGetTransactionByHash(hash) => {
                self.transaction_by_hash(hash).to_rpc_result()
            }
            EthRequest::EthGetTransactionReceipt(hash) => {
                self.transaction_receipt(hash).to_rpc_result()
            }
            EthRequest::EthSendTransaction(request) => {
                self.send_transaction(*request).await.to_rpc_result()
            }
            EthRequest::EvmMine(opts) => self.evm_mine(opts).await.to_rpc_result(),
            EthRequest::EvmSnapshot(_) => self.evm_snapshot().await.to_rpc_result(),
            EthRequest::EvmRevert(id) => self.evm_revert(id).await.to_rpc_result(),
            EthRequest::EvmIncreaseTime(seconds) => {
                self.evm_increase_time(seconds).to_rpc_result()
            }
            EthRequest::EvmSetTime(timestamp) => self.evm_set_time(timestamp).to_rpc_result(),
            EthRequest::MinerStart(_) => self.miner_start().await.to_rpc_result(),
            EthRequest::MinerStop(_) => self.miner_stop().to_rpc_result(),
            EthRequest::TxPoolStatus(_) => self.txpool_status().to_rpc_result(),
            EthRequest::TxPoolContent(_) => self.txpool_content().to_rpc_result(),
        };

        if let ResponseResult::Error(err) = &response {
            node_info!("\nRPC request failed:");
            node_info!("    Request: {:?}", request);
            node_info!("    Error: {}\n", err);
        }

        response
    }

    /// Returns the chain ID used for transaction signing.
    ///
    /// Handler for ETH RPC call: `eth_chainId`
    pub fn chain_id(&self) -> Result<U256> {
        node_info!("eth_chainId");
        Ok(U256::from(self.backend.chain_id()))
    }

    /// Returns the accounts list
    ///
    /// Handler for ETH RPC call: `eth_accounts`
    pub fn accounts(&self) -> Result<Vec<Address>> {
        node_info!("eth_accounts");
        let mut accounts = self.signers.iter().map(|signer| signer.address()).collect::<Vec<_>>();
        for unlocked in self.unlocked_accounts.iter() {
            if !accounts.contains(unlocked) {
                accounts.push(*unlocked);
            }
        }
        Ok(accounts)
    }

    /// Returns the number of most recent block.
    ///
    /// Handler for ETH RPC call: `eth_blockNumber`
    pub fn block_number(&self) -> Result<U256> {
        node_info!("eth_blockNumber");
        Ok(U256::from(self.backend.best_number()))
    }

    /// Returns balance of the given account.
    ///
    /// Handler for ETH RPC call: `eth_getBalance`
    pub async fn balance(&self, address: Address, block: Option<BlockTag>) -> Result<U256> {
        node_info!("eth_getBalance");
        self.backend.get_balance(address, block).await
    }

    /// Returns the number of transactions sent from given address at given time (block number).
    ///
    /// Handler for ETH RPC call: `eth_getTransactionCount`
    pub async fn transaction_count(
        &self,
        address: Address,
        block: Option<BlockTag>,
    ) -> Result<U256> {
        node_info!("eth_getTransactionCount");
        self.backend.get_nonce(address, block).await
    }

    /// Returns the code at the latest block.
    ///
    /// Handler for ETH RPC call: `eth_getCode`
    pub async fn get_code(&self, address: Address) -> Result<Bytes> {
        node_info!("eth_getCode");
        self.backend.get_code(address).await
    }

    /// Returns content of the storage at given address, at the latest block.
    ///
    /// Handler for ETH RPC call: `eth_getStorageAt`
    pub async fn storage_at(&self, address: Address, slot: U256) -> Result<B256> {
        node_info!("eth_getStorageAt");
        Ok(B256::from(self.backend.storage_at(address, slot).await?))
    }

    /// Returns block with given number.
    ///
    /// Handler for ETH RPC call: `eth_getBlockByNumber`
    pub fn block_by_number(&self, number: BlockTag, full: bool) -> Result<Option<RpcBlock>> {
        node_info!("eth_getBlockByNumber");
        Ok(self.backend.block_by_number(number)?.map(|block| RpcBlock::new(block, full)))
    }

    /// Returns block with given hash.
    ///
    /// Handler for ETH RPC call: `eth_getBlockByHash`
    pub fn block_by_hash(&self, hash: B256, full: bool) -> Result<Option<RpcBlock>> {
        node_info!("eth_getBlockByHash");
        Ok(self.backend.block_by_hash(hash)?.map(|block| RpcBlock::new(block, full)))
    }

    /// Get transaction by its hash, pending transactions included.
    ///
    /// Handler for ETH RPC call: `eth_getTransactionByHash`
    pub fn transaction_by_hash(&self, hash: TxHash) -> Result<Option<RpcTransaction>> {
        node_info!("eth_getTransactionByHash");
        if let Some(mined) = self.backend.mined_transaction(hash)? {
            return Ok(Some(mined.into()))
        }
        Ok(self.backend.pool().find(&hash).map(|pooled| RpcTransaction {
            hash: pooled.hash,
            block_hash: None,
            block_number: None,
            transaction_index: None,
            transaction: pooled.transaction.clone(),
        }))
    }

    /// Returns transaction receipt by transaction hash.
    ///
    /// Handler for ETH RPC call: `eth_getTransactionReceipt`
    pub fn transaction_receipt(&self, hash: TxHash) -> Result<Option<TransactionReceipt>> {
        node_info!("eth_getTransactionReceipt");
        self.backend.transaction_receipt(hash)
    }

    /// Sends a transaction, signed with the sender's dev key if there is one.
    ///
    /// Handler for ETH RPC call: `eth_sendTransaction`
    pub async fn send_transaction(&self, request: TransactionRequest) -> Result<TxHash> {
        node_info!("eth_sendTransaction");
        let from = request.from;
        let signer = self.signers.iter().find(|signer| signer.address() == from);
        if signer.is_none() && !self.unlocked_accounts.contains(&from) {
            return Err(BlockchainError::NoSignerAvailable)
        }
        self.backend.queue_transaction(request, signer).await
    }

    /// Mines blocks, optionally starting at the given timestamp.
    ///
    /// Handler for RPC call: `evm_mine`
    pub async fn evm_mine(&self, opts: Option<MineOptions>) -> Result<String> {
        node_info!("evm_mine");
        self.backend.evm_mine(opts.unwrap_or_default()).await?;
        Ok("0x0".to_string())
    }

    /// Snapshot the state of the blockchain at the current block.
    ///
    /// Handler for RPC call: `evm_snapshot`
    pub async fn evm_snapshot(&self) -> Result<U256> {
        node_info!("evm_snapshot");
        Ok(self.backend.create_snapshot().await)
    }

    /// Revert the state of the blockchain to a previous snapshot.
    /// Takes a single parameter, which is the snapshot id to revert to.
    ///
    /// Handler for RPC call: `evm_revert`
    pub async fn evm_revert(&self, id: U256) -> Result<bool> {
        node_info!("evm_revert");
        self.backend.revert_snapshot(id).await
    }

    /// Jump forward in time by the given amount of time, in seconds.
    ///
    /// Handler for RPC call: `evm_increaseTime`
    pub fn evm_increase_time(&self, seconds: i64) -> Result<i64> {
        node_info!("evm_increaseTime");
        Ok(self.backend.increase_time(seconds))
    }

    /// Sets the internal clock time to the given timestamp.
    ///
    /// Handler for RPC call: `evm_setTime`
    pub fn evm_set_time(&self, timestamp: u64) -> Result<i64> {
        node_info!("evm_setTime");
        Ok(self.backend.set_time(timestamp))
    }

    /// Resumes automatic mining.
    ///
    /// Handler for RPC call: `miner_start`
    pub async fn miner_start(&self) -> Result<bool> {
        node_info!("miner_start");
        self.backend.resume().await?;
        Ok(true)
    }

    /// Pauses automatic mining.
    ///
    /// Handler for RPC call: `miner_stop`
    pub fn miner_stop(&self) -> Result<bool> {
        node_info!("miner_stop");
        self.backend.pause();
        Ok(true)
    }

    /// Returns the number of transactions currently pending for inclusion in the next block(s),
    /// as well as the ones that are being scheduled for future execution only.
    ///
    /// Handler for ETH RPC call: `txpool_status`
    pub fn txpool_status(&self) -> Result<PoolStatus> {
        node_info!("txpool_status");
        Ok(self.backend.pool().status())
    }

    /// Returns the details of all transactions currently pending for inclusion in the next
    /// block(s), as well as the ones that are being scheduled for future execution only.
    ///
    /// Handler for ETH RPC call: `txpool_content`
    pub fn txpool_content(&self) -> Result<PoolContent> {
        node_info!("txpool_content");
        Ok(self.backend.pool().content())
    }

    /// Shuts the node down
    pub async fn stop(&self) -> Result<()> {
        self.backend.stop().await
    }

    /// Returns the backend
    pub fn backend(&self) -> &Arc<Backend> {
        &self.backend
    }

    /// Returns the logger of the node
    pub fn logger(&self) -> &LoggingManager {
        &self.logger
    }
}
