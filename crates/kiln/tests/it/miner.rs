//! block production tests

use crate::utils::{priced_transfer, transfer, wait_for_receipt};
use alloy_primitives::{B256, Bytes, U256};
use kiln::{
    NodeConfig,
    eth::{
        backend::{
            executor::{BlockEnv, ExecutionOutcome, Executor, ExecutorError, TransferExecutor},
            mem::state::StateManager,
        },
        pool::transactions::TransactionOutcome,
    },
    spawn,
};
use futures::StreamExt;
use kiln_core::{
    block::Log,
    transaction::Transaction,
    types::{BlockTag, MineOptions},
};
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

/// Uses up the entire gas limit of every transaction
#[derive(Debug)]
struct GasBurner;

#[async_trait::async_trait]
impl Executor for GasBurner {
    async fn run_transaction(
        &self,
        tx: &Transaction,
        state: &mut StateManager,
        block: &BlockEnv,
    ) -> Result<ExecutionOutcome, ExecutorError> {
        let outcome = TransferExecutor.run_transaction(tx, state, block).await?;
        Ok(ExecutionOutcome { gas_used: tx.gas_limit, ..outcome })
    }
}

/// Fails hard the first time it sees a transaction that sends 13 wei
#[derive(Debug, Default)]
struct FaultsOnce {
    faulted: AtomicBool,
}

#[async_trait::async_trait]
impl Executor for FaultsOnce {
    async fn run_transaction(
        &self,
        tx: &Transaction,
        state: &mut StateManager,
        block: &BlockEnv,
    ) -> Result<ExecutionOutcome, ExecutorError> {
        if tx.value == U256::from(13) && !self.faulted.swap(true, Ordering::SeqCst) {
            return Err(ExecutorError::Internal("unlucky value".to_string()))
        }
        TransferExecutor.run_transaction(tx, state, block).await
    }
}

/// Emits one log per transaction, from the recipient
#[derive(Debug)]
struct Logger;

#[async_trait::async_trait]
impl Executor for Logger {
    async fn run_transaction(
        &self,
        tx: &Transaction,
        state: &mut StateManager,
        block: &BlockEnv,
    ) -> Result<ExecutionOutcome, ExecutorError> {
        let outcome = TransferExecutor.run_transaction(tx, state, block).await?;
        let log = Log {
            address: tx.to.unwrap_or_default(),
            topics: vec![B256::with_last_byte(1)],
            data: Bytes::from(tx.value.to_be_bytes_vec()),
        };
        Ok(ExecutionOutcome { logs: vec![log], ..outcome })
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn instamine_mines_every_transaction() {
    let (api, _handle) = spawn(NodeConfig::test()).await;
    let accounts = api.accounts().unwrap();

    let first = api.send_transaction(transfer(accounts[0], accounts[1], 1)).await.unwrap();
    let receipt = wait_for_receipt(&api, first).await;
    assert_eq!(receipt.block_number, 1);
    assert!(receipt.status);
    assert_eq!(receipt.gas_used, 21_000);

    let second = api.send_transaction(transfer(accounts[0], accounts[1], 1)).await.unwrap();
    let receipt = wait_for_receipt(&api, second).await;
    assert_eq!(receipt.block_number, 2);

    let block = api.block_by_number(BlockTag::Latest, false).unwrap().unwrap();
    assert_eq!(block.header.number, 2);
    assert_eq!(block.header.gas_used, 21_000);
}

#[tokio::test(flavor = "multi_thread")]
async fn legacy_instamine_returns_after_mining() {
    let (api, _handle) = spawn(NodeConfig::test().with_legacy_instamine(true)).await;
    let accounts = api.accounts().unwrap();

    let hash = api.send_transaction(transfer(accounts[0], accounts[1], 1_000)).await.unwrap();
    let receipt = api.transaction_receipt(hash).unwrap().unwrap();
    assert_eq!(receipt.block_number, 1);
    let untouched = api.balance(accounts[2], None).await.unwrap();
    assert_eq!(api.balance(accounts[1], None).await.unwrap(), untouched + U256::from(1_000));
}

#[tokio::test(flavor = "multi_thread")]
async fn orders_by_price_then_arrival() {
    let (api, _handle) = spawn(NodeConfig::test().with_no_mining(true)).await;
    let accounts = api.accounts().unwrap();
    let to = accounts[9];

    let early = api.send_transaction(priced_transfer(accounts[0], to, 50)).await.unwrap();
    let rich = api.send_transaction(priced_transfer(accounts[1], to, 300)).await.unwrap();
    let late = api.send_transaction(priced_transfer(accounts[2], to, 50)).await.unwrap();

    api.evm_mine(None).await.unwrap();
    let block = api.backend().block_by_number(BlockTag::Number(1)).unwrap().unwrap();
    assert_eq!(block.transaction_hashes().collect::<Vec<_>>(), vec![rich, early, late]);
}

#[tokio::test(flavor = "multi_thread")]
async fn respects_block_gas_limit() {
    let config = NodeConfig::test()
        .with_no_mining(true)
        .with_gas_limit(100_000)
        .with_executor(Arc::new(GasBurner));
    let (api, _handle) = spawn(config).await;
    let accounts = api.accounts().unwrap();

    let mut cheap = priced_transfer(accounts[0], accounts[9], 100);
    cheap.gas = Some(U256::from(70_000));
    // 21000 + 3000 * 16 intrinsic gas
    cheap.data = Some(Bytes::from(vec![1u8; 3_000]));
    let cheap = api.send_transaction(cheap).await.unwrap();

    let mut pricey = priced_transfer(accounts[1], accounts[9], 200);
    pricey.gas = Some(U256::from(50_000));
    let pricey = api.send_transaction(pricey).await.unwrap();

    api.evm_mine(None).await.unwrap();
    let block = api.backend().block_by_number(BlockTag::Number(1)).unwrap().unwrap();
    assert_eq!(block.transaction_hashes().collect::<Vec<_>>(), vec![pricey]);
    assert_eq!(block.header.gas_used, 50_000);
    assert!(block.header.gas_used <= block.header.gas_limit);
    assert!(api.backend().pool().find(&cheap).is_some());

    api.evm_mine(None).await.unwrap();
    let block = api.backend().block_by_number(BlockTag::Number(2)).unwrap().unwrap();
    assert_eq!(block.transaction_hashes().collect::<Vec<_>>(), vec![cheap]);
    assert_eq!(block.header.gas_used, 70_000);
}

#[tokio::test(flavor = "multi_thread")]
async fn fatal_error_keeps_block_for_retry() {
    let config =
        NodeConfig::test().with_no_mining(true).with_executor(Arc::new(FaultsOnce::default()));
    let (api, _handle) = spawn(config).await;
    let accounts = api.accounts().unwrap();
    let balance = api.balance(accounts[0], None).await.unwrap();

    let first = api.send_transaction(priced_transfer(accounts[0], accounts[9], 200)).await.unwrap();
    let second = api.send_transaction(priced_transfer(accounts[0], accounts[9], 50)).await.unwrap();
    let mut faulty = priced_transfer(accounts[1], accounts[9], 100);
    faulty.value = Some(U256::from(13));
    let faulty = api.send_transaction(faulty).await.unwrap();
    let pool = api.backend().pool();
    let waiter = pool.find(&first).unwrap().finalized();

    assert!(api.evm_mine(None).await.is_err());
    assert_eq!(api.backend().best_number(), 0);
    assert_eq!(api.balance(accounts[0], None).await.unwrap(), balance);
    assert_eq!(api.transaction_count(accounts[0], None).await.unwrap(), U256::ZERO);
    assert_eq!(pool.status().pending, 3);
    let content = pool.content();
    let nonces = content.pending[&accounts[0]].iter().map(|tx| tx.nonce).collect::<Vec<_>>();
    assert_eq!(nonces, vec![U256::ZERO, U256::from(1)]);

    api.evm_mine(None).await.unwrap();
    let block = api.backend().block_by_number(BlockTag::Number(1)).unwrap().unwrap();
    assert_eq!(block.transaction_hashes().collect::<Vec<_>>(), vec![first, faulty, second]);
    assert!(matches!(waiter.await, TransactionOutcome::Mined { block_number: 1, .. }));
    assert_eq!(api.transaction_count(accounts[0], None).await.unwrap(), U256::from(2));
    assert_eq!(pool.status().pending, 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn evm_mine_mines_empty_blocks() {
    let (api, _handle) = spawn(NodeConfig::test()).await;
    api.evm_mine(Some(MineOptions { timestamp: None, blocks: Some(3) })).await.unwrap();
    assert_eq!(api.block_number().unwrap(), U256::from(3));
    let block = api.block_by_number(BlockTag::Number(2), true).unwrap().unwrap();
    assert_eq!(block.header.gas_used, 0);
    let parent = api.backend().block_by_number(1.into()).unwrap().unwrap();
    assert_eq!(block.header.parent_hash, parent.hash);
}

#[tokio::test(flavor = "multi_thread")]
async fn logs_are_indexed_per_block() {
    let config = NodeConfig::test().with_no_mining(true).with_executor(Arc::new(Logger));
    let (api, _handle) = spawn(config).await;
    let accounts = api.accounts().unwrap();
    let mut logs = api.backend().new_log_notifications();

    let to = accounts[9];
    let first = api.send_transaction(priced_transfer(accounts[0], to, 200)).await.unwrap();
    let second = api.send_transaction(priced_transfer(accounts[1], to, 100)).await.unwrap();
    api.evm_mine(None).await.unwrap();

    let block_logs = logs.next().await.unwrap();
    assert_eq!(block_logs.len(), 2);
    assert_eq!(block_logs[0].transaction_hash, first);
    assert_eq!(block_logs[1].transaction_hash, second);
    assert_eq!(block_logs[1].log_index, 1);
    assert_eq!(block_logs[1].transaction_index, 1);
    assert_eq!(block_logs[0].inner.address, to);

    let receipt = api.transaction_receipt(second).unwrap().unwrap();
    assert_eq!(receipt.logs, vec![block_logs[1].clone()]);
    assert_eq!(receipt.cumulative_gas_used, 42_000);
}
