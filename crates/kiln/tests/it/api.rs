//! rpc dispatch tests

use crate::utils::{priced_transfer, transfer};
use alloy_primitives::{Address, U256};
use kiln::{
    NodeConfig,
    eth::{
        api::BlockTransactions,
        error::{BlockchainError, TransactionError},
        pool::transactions::TransactionOutcome,
    },
    spawn,
};
use kiln_core::{request::EthRequest, types::BlockTag};
use kiln_rpc::response::ResponseResult;
use serde_json::json;
use similar_asserts::assert_eq;

async fn call(api: &kiln::EthApi, request: serde_json::Value) -> ResponseResult {
    let request: EthRequest = serde_json::from_value(request).unwrap();
    api.execute(request).await
}

#[tokio::test(flavor = "multi_thread")]
async fn replaced_transaction_is_never_mined() {
    let (api, _handle) = spawn(NodeConfig::test()).await;
    let accounts = api.accounts().unwrap();
    let (from, to) = (accounts[0], accounts[1]);
    assert!(api.miner_stop().unwrap());

    let t1 = api.send_transaction(priced_transfer(from, to, 100)).await.unwrap();
    let pending = api.backend().pool().find(&t1).unwrap();
    let t2 = api.send_transaction(priced_transfer(from, to, 200)).await.unwrap();
    assert_ne!(t1, t2);
    assert_eq!(
        pending.finalized().await,
        TransactionOutcome::Rejected(TransactionError::Replaced(t2))
    );

    let pooled = api.transaction_by_hash(t2).unwrap().unwrap();
    assert!(pooled.block_hash.is_none());

    api.evm_mine(None).await.unwrap();
    let block = api.block_by_number(BlockTag::Number(1), false).unwrap().unwrap();
    assert_eq!(block.transactions, BlockTransactions::Hashes(vec![t2]));
    assert!(api.transaction_receipt(t1).unwrap().is_none());
    assert_eq!(api.transaction_count(from, None).await.unwrap(), U256::from(1));

    let mined = api.transaction_by_hash(t2).unwrap().unwrap();
    assert_eq!(mined.block_number, Some(1));
    assert_eq!(mined.transaction_index, Some(0));
}

#[tokio::test(flavor = "multi_thread")]
async fn dispatches_evm_methods() {
    let (api, _handle) = spawn(NodeConfig::test()).await;

    let res = call(&api, json!({"method": "evm_snapshot", "params": []})).await;
    assert_eq!(res, ResponseResult::Success(json!("0x1")));

    let res = call(&api, json!({"method": "evm_mine", "params": []})).await;
    assert_eq!(res, ResponseResult::Success(json!("0x0")));
    let res = call(&api, json!({"method": "eth_blockNumber", "params": []})).await;
    assert_eq!(res, ResponseResult::Success(json!("0x1")));

    let res = call(&api, json!({"method": "evm_revert", "params": ["0x1"]})).await;
    assert_eq!(res, ResponseResult::Success(json!(true)));
    let res = call(&api, json!({"method": "evm_revert", "params": ["0x1"]})).await;
    assert_eq!(res, ResponseResult::Success(json!(false)));

    let res = call(&api, json!({"method": "eth_blockNumber", "params": []})).await;
    assert_eq!(res, ResponseResult::Success(json!("0x0")));

    let res = call(&api, json!({"method": "evm_increaseTime", "params": [-10]})).await;
    assert_eq!(res, ResponseResult::Success(json!(0)));

    let res = call(&api, json!({"method": "eth_chainId", "params": []})).await;
    assert_eq!(res, ResponseResult::Success(json!("0x539")));
}

#[tokio::test(flavor = "multi_thread")]
async fn miner_start_and_stop() {
    let (api, _handle) = spawn(NodeConfig::test()).await;
    let accounts = api.accounts().unwrap();

    let res = call(&api, json!({"method": "miner_stop", "params": []})).await;
    assert_eq!(res, ResponseResult::Success(json!(true)));
    assert!(api.backend().is_paused());

    let hash = api.send_transaction(transfer(accounts[0], accounts[1], 1)).await.unwrap();
    assert_eq!(api.backend().best_number(), 0);

    let res = call(&api, json!({"method": "miner_start", "params": []})).await;
    assert_eq!(res, ResponseResult::Success(json!(true)));
    crate::utils::wait_for_receipt(&api, hash).await;
    assert_eq!(api.backend().best_number(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn send_requires_a_signer() {
    let (api, _handle) = spawn(NodeConfig::test()).await;
    let stranger = Address::repeat_byte(0x11);
    let err = api.send_transaction(transfer(stranger, Address::ZERO, 1)).await.unwrap_err();
    assert!(matches!(err, BlockchainError::NoSignerAvailable));

    let res = call(
        &api,
        json!({
            "method": "eth_sendTransaction",
            "params": [{"from": stranger, "to": Address::ZERO, "value": "0x1"}]
        }),
    )
    .await;
    assert!(res.is_error());
}

#[tokio::test(flavor = "multi_thread")]
async fn stopped_node_rejects_requests() {
    let (api, handle) = spawn(NodeConfig::test()).await;
    let accounts = api.accounts().unwrap();

    api.stop().await.unwrap();
    handle.await.unwrap().unwrap();

    let err = api.send_transaction(transfer(accounts[0], accounts[1], 1)).await.unwrap_err();
    assert!(matches!(err, BlockchainError::NotRunning));
    assert!(matches!(api.evm_mine(None).await, Err(BlockchainError::NotRunning)));
    // stopping twice is fine
    api.stop().await.unwrap();
}
