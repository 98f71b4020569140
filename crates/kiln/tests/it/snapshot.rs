//! evm_snapshot and evm_revert tests

use crate::utils::transfer;
use alloy_primitives::U256;
use kiln::{
    NodeConfig,
    eth::{error::TransactionError, pool::transactions::TransactionOutcome},
    spawn,
};
use kiln_core::types::BlockTag;

#[tokio::test(flavor = "multi_thread")]
async fn revert_restores_chain_and_state() {
    let (api, _handle) = spawn(NodeConfig::test().with_legacy_instamine(true)).await;
    let accounts = api.accounts().unwrap();
    let (from, to) = (accounts[0], accounts[1]);
    let balance = api.balance(to, None).await.unwrap();
    let best_hash = api.backend().best_hash();

    let id = api.evm_snapshot().await.unwrap();
    assert_eq!(id, U256::from(1));

    let hash = api.send_transaction(transfer(from, to, 1_000)).await.unwrap();
    api.evm_mine(None).await.unwrap();
    assert_eq!(api.backend().best_number(), 2);
    assert_eq!(api.balance(to, None).await.unwrap(), balance + U256::from(1_000));

    assert!(api.evm_revert(id).await.unwrap());
    assert_eq!(api.backend().best_number(), 0);
    assert_eq!(api.backend().best_hash(), best_hash);
    assert_eq!(api.balance(to, None).await.unwrap(), balance);
    assert_eq!(api.transaction_count(from, None).await.unwrap(), U256::ZERO);
    assert!(api.transaction_receipt(hash).unwrap().is_none());
    assert!(api.transaction_by_hash(hash).unwrap().is_none());
    assert!(api.block_by_number(BlockTag::Number(1), false).unwrap().is_none());

    // the chain continues from the snapshot
    let hash = api.send_transaction(transfer(from, to, 1)).await.unwrap();
    let receipt = api.transaction_receipt(hash).unwrap().unwrap();
    assert_eq!(receipt.block_number, 1);
    let block = api.block_by_number(BlockTag::Number(1), false).unwrap().unwrap();
    assert_eq!(block.header.parent_hash, best_hash);
}

#[tokio::test(flavor = "multi_thread")]
async fn revert_consumes_later_snapshots() {
    let (api, _handle) = spawn(NodeConfig::test()).await;

    let first = api.evm_snapshot().await.unwrap();
    api.evm_mine(None).await.unwrap();
    let second = api.evm_snapshot().await.unwrap();
    assert_eq!(second, U256::from(2));
    api.evm_mine(None).await.unwrap();

    assert!(api.evm_revert(first).await.unwrap());
    assert!(!api.evm_revert(second).await.unwrap());
    assert!(!api.evm_revert(first).await.unwrap());
    assert_eq!(api.backend().best_number(), 0);

    // ids are handed out again
    assert_eq!(api.evm_snapshot().await.unwrap(), U256::from(1));
}

#[tokio::test(flavor = "multi_thread")]
async fn unknown_snapshots_are_not_reverted() {
    let (api, _handle) = spawn(NodeConfig::test()).await;
    assert!(!api.evm_revert(U256::ZERO).await.unwrap());
    assert!(!api.evm_revert(U256::from(99)).await.unwrap());

    let id = api.evm_snapshot().await.unwrap();
    assert!(!api.evm_revert(U256::from(99)).await.unwrap());
    assert!(api.evm_revert(id).await.unwrap());
}

#[tokio::test(flavor = "multi_thread")]
async fn revert_without_new_blocks() {
    let (api, _handle) = spawn(NodeConfig::test()).await;
    api.evm_mine(None).await.unwrap();
    let hash = api.backend().best_hash();

    let id = api.evm_snapshot().await.unwrap();
    assert!(api.evm_revert(id).await.unwrap());
    assert_eq!(api.backend().best_number(), 1);
    assert_eq!(api.backend().best_hash(), hash);
}

#[tokio::test(flavor = "multi_thread")]
async fn revert_restores_time_offset() {
    let (api, _handle) = spawn(NodeConfig::test()).await;
    let offset = api.backend().time().offset();

    let id = api.evm_snapshot().await.unwrap();
    api.evm_increase_time(1_000).unwrap();
    assert_eq!(api.backend().time().offset(), offset + 1_000_000);

    assert!(api.evm_revert(id).await.unwrap());
    assert_eq!(api.backend().time().offset(), offset);
}

#[tokio::test(flavor = "multi_thread")]
async fn revert_drops_pending_transactions() {
    let (api, _handle) = spawn(NodeConfig::test().with_no_mining(true)).await;
    let accounts = api.accounts().unwrap();

    let id = api.evm_snapshot().await.unwrap();
    let hash = api.send_transaction(transfer(accounts[0], accounts[1], 1)).await.unwrap();
    let pending = api.backend().pool().find(&hash).unwrap();

    assert!(api.evm_revert(id).await.unwrap());
    assert_eq!(pending.finalized().await, TransactionOutcome::Rejected(TransactionError::Dropped));
    assert!(api.backend().pool().find(&hash).is_none());
    assert_eq!(api.txpool_status().unwrap().pending, 0);
}
