use alloy_primitives::{Address, TxHash, U256};
use kiln::EthApi;
use kiln_core::{block::TransactionReceipt, transaction::TransactionRequest};
use std::time::Duration;

/// A plain value transfer with the intrinsic gas limit
pub fn transfer(from: Address, to: Address, value: u64) -> TransactionRequest {
    TransactionRequest {
        from,
        to: Some(to),
        value: Some(U256::from(value)),
        gas: Some(U256::from(21_000)),
        ..Default::default()
    }
}

/// Same as [`transfer`] with an explicit gas price
pub fn priced_transfer(from: Address, to: Address, gas_price: u64) -> TransactionRequest {
    TransactionRequest { gas_price: Some(U256::from(gas_price)), ..transfer(from, to, 1) }
}

/// Polls until the transaction is mined
pub async fn wait_for_receipt(api: &EthApi, hash: TxHash) -> TransactionReceipt {
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            if let Some(receipt) = api.transaction_receipt(hash).unwrap() {
                return receipt
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("transaction was not mined in time")
}

/// Polls until the chain reached `number`
pub async fn wait_for_block(api: &EthApi, number: u64) {
    tokio::time::timeout(Duration::from_secs(10), async {
        while api.backend().best_number() < number {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("block was not mined in time")
}
