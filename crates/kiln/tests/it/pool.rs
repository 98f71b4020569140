//! transaction pool tests

use crate::utils::{priced_transfer, transfer, wait_for_block};
use alloy_primitives::{Address, U256};
use kiln::{
    NodeConfig,
    eth::{
        backend::{db::DatabaseResult, info::AccountProvider},
        error::{BlockchainError, InvalidTransactionError, PoolError, TransactionError},
        pool::{Pool, PoolConfig, PoolStatus, transactions::TransactionOutcome},
    },
    spawn,
};
use kiln_core::{
    transaction::TransactionRequest,
    types::{Account, BlockTag},
};
use similar_asserts::assert_eq;
use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

#[tokio::test(flavor = "multi_thread")]
async fn queued_transactions_are_promoted_and_mined_in_nonce_order() {
    let (api, _handle) = spawn(NodeConfig::test().with_no_mining(true)).await;
    let accounts = api.accounts().unwrap();
    let (from, to) = (accounts[0], accounts[1]);

    let with_nonce = |nonce: u64| TransactionRequest {
        nonce: Some(U256::from(nonce)),
        ..transfer(from, to, 1)
    };

    api.send_transaction(with_nonce(2)).await.unwrap();
    assert_eq!(api.txpool_status().unwrap(), PoolStatus { pending: 0, queued: 1 });
    api.send_transaction(with_nonce(0)).await.unwrap();
    assert_eq!(api.txpool_status().unwrap(), PoolStatus { pending: 1, queued: 1 });
    api.send_transaction(with_nonce(1)).await.unwrap();
    assert_eq!(api.txpool_status().unwrap(), PoolStatus { pending: 3, queued: 0 });

    let content = api.txpool_content().unwrap();
    let nonces = content.pending[&from].iter().map(|tx| tx.nonce).collect::<Vec<_>>();
    assert_eq!(nonces, vec![U256::from(0), U256::from(1), U256::from(2)]);

    assert!(api.miner_start().await.unwrap());
    wait_for_block(&api, 1).await;

    let block = api.backend().block_by_number(BlockTag::Number(1)).unwrap().unwrap();
    let nonces = block.transactions.iter().map(|tx| tx.nonce).collect::<Vec<_>>();
    assert_eq!(nonces, vec![U256::from(0), U256::from(1), U256::from(2)]);
    assert_eq!(api.transaction_count(from, None).await.unwrap(), U256::from(3));
    assert_eq!(api.txpool_status().unwrap(), PoolStatus::default());
}

#[tokio::test(flavor = "multi_thread")]
async fn replacement_needs_price_bump() {
    let (api, _handle) = spawn(NodeConfig::test().with_no_mining(true)).await;
    let accounts = api.accounts().unwrap();
    let (from, to) = (accounts[0], accounts[1]);

    let original = api.send_transaction(priced_transfer(from, to, 100)).await.unwrap();
    let err = api.send_transaction(priced_transfer(from, to, 110)).await.unwrap_err();
    assert!(matches!(err, BlockchainError::Pool(PoolError::ReplacementUnderpriced(_))));
    let pooled = api.backend().pool().find(&original).unwrap();

    let replacement = api.send_transaction(priced_transfer(from, to, 111)).await.unwrap();
    assert!(api.backend().pool().find(&original).is_none());
    assert_eq!(
        pooled.finalized().await,
        TransactionOutcome::Rejected(TransactionError::Replaced(replacement))
    );
    assert_eq!(api.txpool_status().unwrap(), PoolStatus { pending: 1, queued: 0 });
}

#[tokio::test(flavor = "multi_thread")]
async fn rejects_invalid_transactions() {
    let (api, _handle) = spawn(NodeConfig::test().with_no_mining(true)).await;
    let accounts = api.accounts().unwrap();
    let (from, to) = (accounts[0], accounts[1]);

    let mut low = transfer(from, to, 1);
    low.gas = Some(U256::from(20_000));
    let err = api.send_transaction(low).await.unwrap_err();
    assert!(matches!(
        err,
        BlockchainError::InvalidTransaction(InvalidTransactionError::GasTooLow)
    ));

    let mut high = transfer(from, to, 1);
    high.gas = Some(U256::from(api.backend().gas_limit() + 1));
    let err = api.send_transaction(high).await.unwrap_err();
    assert!(matches!(
        err,
        BlockchainError::InvalidTransaction(InvalidTransactionError::GasTooHigh)
    ));

    let poor = Address::repeat_byte(0x42);
    let config = NodeConfig::test().with_no_mining(true).with_unlocked_accounts(vec![poor]);
    let (api, _handle) = spawn(config).await;
    let err = api.send_transaction(transfer(poor, to, 1)).await.unwrap_err();
    assert!(matches!(
        err,
        BlockchainError::InvalidTransaction(InvalidTransactionError::InsufficientFunds)
    ));
}

/// Answers the first lookup slowly
#[derive(Debug, Default)]
struct SlowAccounts {
    warmed_up: AtomicBool,
}

#[async_trait::async_trait]
impl AccountProvider for SlowAccounts {
    async fn account(&self, _address: Address) -> DatabaseResult<Account> {
        if !self.warmed_up.swap(true, Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
        Ok(Account::with_balance(U256::from(u64::MAX)))
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn admissions_of_a_sender_are_serialized() {
    let pool = Pool::new(
        Arc::new(SlowAccounts::default()),
        PoolConfig {
            chain_id: 1337,
            block_gas_limit: 6_721_975,
            price_bump: 10,
            default_gas_limit: 90_000,
            default_gas_price: U256::from(1),
        },
    );
    let from = Address::repeat_byte(1);
    let to = Address::repeat_byte(2);

    let (first, second) = tokio::join!(
        pool.add_transaction(transfer(from, to, 1), None),
        pool.add_transaction(transfer(from, to, 2), None),
    );
    let (first, second) = (first.unwrap(), second.unwrap());
    assert_eq!(first.transaction.nonce(), U256::ZERO);
    assert_eq!(second.transaction.nonce(), U256::from(1));
    assert_eq!(first.transaction.transaction.value, U256::from(1));
    assert!(first.is_executable && second.is_executable);
}
