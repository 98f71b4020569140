use crate::eth::error::TransactionError;
use alloy_primitives::{Address, TxHash, U256};
use futures::{
    FutureExt,
    channel::oneshot,
    future::{BoxFuture, Shared},
};
use kiln_core::transaction::Transaction;
use parking_lot::Mutex;
use std::{
    fmt,
    future::Future,
    sync::atomic::{AtomicBool, Ordering},
};

/// How a pooled transaction was resolved
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransactionOutcome {
    /// Included in a persisted block
    Mined { block_hash: TxHash, block_number: u64 },
    Rejected(TransactionError),
}

/// A transaction in the pool
pub struct PoolTransaction {
    /// the actual transaction
    pub transaction: Transaction,
    pub hash: TxHash,
    /// admission order, used to break gas price ties
    pub id: u64,
    /// set while the transaction sits in the miner's priced heap
    locked: AtomicBool,
    finalizer: Mutex<Option<oneshot::Sender<TransactionOutcome>>>,
    finalized: Shared<BoxFuture<'static, TransactionOutcome>>,
}

// == impl PoolTransaction ==

impl PoolTransaction {
    pub fn new(transaction: Transaction, id: u64) -> Self {
        let (tx, rx) = oneshot::channel();
        let finalized = rx
            .map(|outcome| {
                outcome.unwrap_or(TransactionOutcome::Rejected(TransactionError::Dropped))
            })
            .boxed()
            .shared();
        Self {
            hash: transaction.hash(),
            transaction,
            id,
            locked: AtomicBool::new(false),
            finalizer: Mutex::new(Some(tx)),
            finalized,
        }
    }

    pub fn sender(&self) -> Address {
        self.transaction.from
    }

    pub fn nonce(&self) -> U256 {
        self.transaction.nonce
    }

    pub fn gas_price(&self) -> U256 {
        self.transaction.gas_price
    }

    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Acquire)
    }

    /// Marks the transaction as staged for mining, returns `false` if it already was
    pub fn lock(&self) -> bool {
        !self.locked.swap(true, Ordering::AcqRel)
    }

    pub fn unlock(&self) {
        self.locked.store(false, Ordering::Release);
    }

    /// Resolves everyone waiting on [`Self::finalized`], only the first outcome counts
    pub fn finalize(&self, outcome: TransactionOutcome) {
        if let Some(tx) = self.finalizer.lock().take() {
            let _ = tx.send(outcome);
        }
    }

    pub fn is_finalized(&self) -> bool {
        self.finalizer.lock().is_none()
    }

    /// Resolves once the transaction was mined or rejected
    pub fn finalized(&self) -> impl Future<Output = TransactionOutcome> + Send + 'static {
        self.finalized.clone()
    }
}

impl fmt::Debug for PoolTransaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolTransaction")
            .field("hash", &self.hash)
            .field("sender", &self.sender())
            .field("nonce", &self.nonce())
            .field("gas_price", &self.gas_price())
            .field("locked", &self.is_locked())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::Bytes;

    fn pooled() -> PoolTransaction {
        PoolTransaction::new(
            Transaction {
                from: Address::repeat_byte(1),
                to: None,
                nonce: U256::ZERO,
                gas_price: U256::from(1),
                gas_limit: 60_000,
                value: U256::ZERO,
                input: Bytes::new(),
                chain_id: 1337,
                signature: None,
            },
            0,
        )
    }

    #[tokio::test]
    async fn first_outcome_wins() {
        let tx = pooled();
        let waiter = tx.finalized();
        tx.finalize(TransactionOutcome::Rejected(TransactionError::Dropped));
        tx.finalize(TransactionOutcome::Mined { block_hash: TxHash::ZERO, block_number: 1 });
        assert!(tx.is_finalized());
        assert_eq!(waiter.await, TransactionOutcome::Rejected(TransactionError::Dropped));
        // late waiters see the same outcome
        assert_eq!(tx.finalized().await, TransactionOutcome::Rejected(TransactionError::Dropped));
    }

    #[test]
    fn lock_is_exclusive() {
        let tx = pooled();
        assert!(tx.lock());
        assert!(!tx.lock());
        tx.unlock();
        assert!(!tx.is_locked());
    }
}
