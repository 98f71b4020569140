//! forking tests against an in-process remote chain

use crate::utils::transfer;
use alloy_primitives::{Address, B256, U256, address, b256};
use kiln::{
    NodeConfig,
    eth::backend::{
        executor::{BlockEnv, ExecutionOutcome, Executor, ExecutorError, TransferExecutor},
        mem::state::StateManager,
    },
    fork::{ForkError, ForkProvider},
    spawn,
};
use kiln_core::{transaction::Transaction, types::BlockTag};
use parking_lot::Mutex;
use serde_json::{Value, json};
use similar_asserts::assert_eq;
use std::sync::Arc;

const RICH: Address = address!("0x00000000000000000000000000000000000000aa");
const FORK_HASH: B256 =
    b256!("0x1111111111111111111111111111111111111111111111111111111111111111");

/// A remote chain at block 16 where only [`RICH`] holds funds
#[derive(Debug, Default)]
struct RemoteChain {
    requests: Mutex<Vec<(String, Value)>>,
}

impl RemoteChain {
    fn requests(&self) -> Vec<(String, Value)> {
        self.requests.lock().clone()
    }

    fn count(&self) -> usize {
        self.requests.lock().len()
    }
}

#[async_trait::async_trait]
impl ForkProvider for RemoteChain {
    async fn request(&self, method: &str, params: Value) -> Result<Value, ForkError> {
        self.requests.lock().push((method.to_string(), params.clone()));
        let is_rich =
            serde_json::from_value::<Address>(params[0].clone()).is_ok_and(|addr| addr == RICH);
        let res = match method {
            "eth_blockNumber" => json!("0x10"),
            "eth_getBlockByNumber" => json!({"hash": FORK_HASH, "timestamp": "0x64"}),
            "eth_getBalance" if is_rich => json!("0x56bc75e2d63100000"),
            "eth_getTransactionCount" if is_rich => json!("0x5"),
            "eth_getBalance" | "eth_getTransactionCount" | "eth_getStorageAt" => json!("0x0"),
            "eth_getCode" => json!("0x"),
            _ => return Err(ForkError::Rpc { code: -32601, message: "method not found".into() }),
        };
        Ok(res)
    }
}

/// Transfers, then wipes the recipient
#[derive(Debug)]
struct Sweeper;

#[async_trait::async_trait]
impl Executor for Sweeper {
    async fn run_transaction(
        &self,
        tx: &Transaction,
        state: &mut StateManager,
        block: &BlockEnv,
    ) -> Result<ExecutionOutcome, ExecutorError> {
        let outcome = TransferExecutor.run_transaction(tx, state, block).await?;
        if let Some(to) = tx.to {
            state.delete_account(to).await?;
        }
        Ok(outcome)
    }
}

fn fork_config(remote: &Arc<RemoteChain>) -> NodeConfig {
    let provider: Arc<dyn ForkProvider> = remote.clone();
    NodeConfig::test()
        .with_legacy_instamine(true)
        .with_unlocked_accounts(vec![RICH])
        .with_fork_provider(Some(provider))
}

#[tokio::test(flavor = "multi_thread")]
async fn builds_on_the_fork_block() {
    let remote = Arc::new(RemoteChain::default());
    let (api, _handle) = spawn(fork_config(&remote)).await;

    assert!(api.backend().is_fork());
    assert_eq!(api.backend().genesis_number(), 17);
    assert_eq!(api.block_number().unwrap(), U256::from(17));
    let genesis = api.block_by_number(BlockTag::Earliest, false).unwrap().unwrap();
    assert_eq!(genesis.header.number, 17);
    assert_eq!(genesis.header.parent_hash, FORK_HASH);

    let requests = remote.requests();
    assert_eq!(requests[0].0.as_str(), "eth_blockNumber");
    assert_eq!(requests[1], ("eth_getBlockByNumber".to_string(), json!(["0x10", false])));
}

#[tokio::test(flavor = "multi_thread")]
async fn pinned_fork_block() {
    let remote = Arc::new(RemoteChain::default());
    let (api, _handle) = spawn(fork_config(&remote).with_fork_block_number(Some(12u64))).await;

    assert_eq!(api.backend().genesis_number(), 13);
    assert_eq!(remote.requests()[0], ("eth_getBlockByNumber".to_string(), json!(["0xc", false])));
}

#[tokio::test(flavor = "multi_thread")]
async fn reads_remote_accounts() {
    let remote = Arc::new(RemoteChain::default());
    let (api, _handle) = spawn(fork_config(&remote)).await;

    let balance = api.balance(RICH, None).await.unwrap();
    assert_eq!(balance, U256::from(100u64) * U256::from(10u64).pow(U256::from(18)));
    assert_eq!(api.transaction_count(RICH, None).await.unwrap(), U256::from(5));
    assert!(api.get_code(RICH).await.unwrap().is_empty());
    assert_eq!(api.storage_at(RICH, U256::from(1)).await.unwrap(), B256::ZERO);

    // blocks before the fork are read at that block
    let historic = api.balance(RICH, Some(BlockTag::Number(10))).await.unwrap();
    assert_eq!(historic, balance);
    assert!(remote.requests().iter().any(|(method, params)| {
        method == "eth_getBalance" && params[1] == json!("0xa")
    }));
}

#[tokio::test(flavor = "multi_thread")]
async fn sends_from_remote_account() {
    let remote = Arc::new(RemoteChain::default());
    let (api, _handle) = spawn(fork_config(&remote)).await;
    let to = api.accounts().unwrap()[0];

    let hash = api.send_transaction(transfer(RICH, to, 1)).await.unwrap();
    let mined = api.transaction_by_hash(hash).unwrap().unwrap();
    assert_eq!(mined.transaction.nonce, U256::from(5));
    assert_eq!(mined.block_number, Some(18));
    assert_eq!(api.transaction_count(RICH, None).await.unwrap(), U256::from(6));
}

#[tokio::test(flavor = "multi_thread")]
async fn deleted_accounts_stay_deleted() {
    let remote = Arc::new(RemoteChain::default());
    let (api, _handle) = spawn(fork_config(&remote).with_executor(Arc::new(Sweeper))).await;
    let from = api.accounts().unwrap()[0];
    let balance = api.balance(RICH, None).await.unwrap();
    assert!(!balance.is_zero());

    let id = api.evm_snapshot().await.unwrap();
    api.send_transaction(transfer(from, RICH, 1)).await.unwrap();
    assert_eq!(api.backend().best_number(), 18);

    let requests = remote.count();
    assert_eq!(api.balance(RICH, None).await.unwrap(), U256::ZERO);
    assert_eq!(api.transaction_count(RICH, None).await.unwrap(), U256::ZERO);
    assert_eq!(remote.count(), requests);

    // the genesis state still has it
    assert_eq!(api.balance(RICH, Some(BlockTag::Number(17))).await.unwrap(), balance);

    assert!(api.evm_revert(id).await.unwrap());
    assert_eq!(api.balance(RICH, None).await.unwrap(), balance);
}
