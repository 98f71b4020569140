//! Transaction execution against the state

use crate::eth::backend::{db::DatabaseError, mem::state::StateManager};
use alloy_primitives::{Address, Bloom, Bytes, U256};
use kiln_core::{block::Log, transaction::Transaction};

/// The block a transaction is executed in
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BlockEnv {
    pub number: u64,
    pub timestamp: u64,
    pub coinbase: Address,
    pub gas_limit: u64,
}

/// Result of running a single transaction
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExecutionOutcome {
    pub gas_used: u64,
    pub logs: Vec<Log>,
    pub bloom: Bloom,
    pub return_data: Bytes,
    /// Set if execution failed but the transaction is still includable, e.g. a revert
    pub exception_error: Option<String>,
    pub created_address: Option<Address>,
}

impl ExecutionOutcome {
    pub fn is_success(&self) -> bool {
        self.exception_error.is_none()
    }
}

/// Errors that make a transaction unincludable
#[derive(thiserror::Error, Clone, Debug, PartialEq, Eq)]
pub enum ExecutorError {
    #[error("nonce mismatch: expected {expected}, got {got}")]
    NonceMismatch { expected: U256, got: U256 },
    #[error("insufficient funds for gas * price + value: have {have} want {want}")]
    InsufficientFunds { have: U256, want: U256 },
    #[error("state access failed: {0}")]
    Database(String),
    #[error("executor fault: {0}")]
    Internal(String),
}

impl ExecutorError {
    /// Whether this error leaves the state in an unknown condition and must abort mining
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Database(_) | Self::Internal(_))
    }
}

impl From<DatabaseError> for ExecutorError {
    fn from(err: DatabaseError) -> Self {
        Self::Database(err.to_string())
    }
}

/// Runs transactions, this is where an EVM plugs in
#[async_trait::async_trait]
#[auto_impl::auto_impl(&, Box, Arc)]
pub trait Executor: Send + Sync + std::fmt::Debug {
    /// Applies the transaction to `state`.
    ///
    /// The caller brackets every call with a checkpoint and either commits or reverts it, so the
    /// executor may leave partial changes behind on error.
    async fn run_transaction(
        &self,
        tx: &Transaction,
        state: &mut StateManager,
        block: &BlockEnv,
    ) -> Result<ExecutionOutcome, ExecutorError>;
}

/// Executes plain value transfers and deploys the input as code for creations.
///
/// Charges the intrinsic gas only.
#[derive(Clone, Copy, Debug, Default)]
pub struct TransferExecutor;

#[async_trait::async_trait]
impl Executor for TransferExecutor {
    async fn run_transaction(
        &self,
        tx: &Transaction,
        state: &mut StateManager,
        block: &BlockEnv,
    ) -> Result<ExecutionOutcome, ExecutorError> {
        let mut sender = state.account_or_default(tx.from).await?;
        if sender.nonce != tx.nonce {
            return Err(ExecutorError::NonceMismatch { expected: sender.nonce, got: tx.nonce })
        }
        let max_cost = tx.max_cost();
        if sender.balance < max_cost {
            return Err(ExecutorError::InsufficientFunds { have: sender.balance, want: max_cost })
        }

        let gas_used = tx.intrinsic_gas();
        let fee = U256::from(gas_used) * tx.gas_price;
        sender.balance = sender.balance.saturating_sub(fee + tx.value);
        sender.nonce += U256::from(1);
        state.put_account(tx.from, &sender).await?;

        let created_address = if tx.is_create() {
            let address = tx.from.create(tx.nonce.saturating_to());
            let mut account = state.account_or_default(address).await?;
            account.balance += tx.value;
            state.put_account(address, &account).await?;
            state.set_code(address, tx.input.clone()).await?;
            Some(address)
        } else {
            None
        };
        if let Some(to) = tx.to {
            let mut recipient = state.account_or_default(to).await?;
            recipient.balance += tx.value;
            state.put_account(to, &recipient).await?;
        }

        if !fee.is_zero() {
            let mut coinbase = state.account_or_default(block.coinbase).await?;
            coinbase.balance += fee;
            state.put_account(block.coinbase, &coinbase).await?;
        }

        Ok(ExecutionOutcome { gas_used, created_address, ..Default::default() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_core::types::Account;

    fn transfer(from: Address, nonce: u64) -> Transaction {
        Transaction {
            from,
            to: Some(Address::repeat_byte(2)),
            nonce: U256::from(nonce),
            gas_price: U256::from(10),
            gas_limit: 21_000,
            value: U256::from(1_000),
            input: Bytes::new(),
            chain_id: 1337,
            signature: None,
        }
    }

    #[tokio::test]
    async fn moves_value_and_fee() {
        let mut state = StateManager::in_memory().unwrap();
        let from = Address::repeat_byte(1);
        state.put_account(from, &Account::with_balance(U256::from(1_000_000))).await.unwrap();
        let block = BlockEnv { coinbase: Address::repeat_byte(9), ..Default::default() };

        let outcome =
            TransferExecutor.run_transaction(&transfer(from, 0), &mut state, &block).await.unwrap();
        assert_eq!(outcome.gas_used, 21_000);
        let sender = state.account(from).await.unwrap().unwrap();
        assert_eq!(sender.nonce, U256::from(1));
        assert_eq!(sender.balance, U256::from(1_000_000 - 210_000 - 1_000));
        let coinbase = state.account(block.coinbase).await.unwrap().unwrap();
        assert_eq!(coinbase.balance, U256::from(210_000));

        let err = TransferExecutor
            .run_transaction(&transfer(from, 0), &mut state, &block)
            .await
            .unwrap_err();
        assert_eq!(err, ExecutorError::NonceMismatch { expected: U256::from(1), got: U256::ZERO });
        assert!(!err.is_fatal());
    }

    #[tokio::test]
    async fn deploys_code() {
        let mut state = StateManager::in_memory().unwrap();
        let from = Address::repeat_byte(1);
        state.put_account(from, &Account::with_balance(U256::from(10_000_000))).await.unwrap();
        let mut tx = transfer(from, 0);
        tx.to = None;
        tx.gas_limit = 60_000;
        tx.input = Bytes::from_static(&[0x60, 0x01]);

        let outcome =
            TransferExecutor.run_transaction(&tx, &mut state, &BlockEnv::default()).await.unwrap();
        let created = outcome.created_address.unwrap();
        assert_eq!(created, from.create(0));
        assert_eq!(state.code(created).await.unwrap(), tx.input);
    }
}
