//! Aggregated error type for this module

use crate::{
    eth::backend::{db::DatabaseError, executor::ExecutorError},
    fork::ForkError,
};
use alloy_primitives::{B256, SignatureError, U256};
use kiln_rpc::{error::RpcError, response::ResponseResult};
use serde::Serialize;

pub type Result<T> = std::result::Result<T, BlockchainError>;

#[derive(thiserror::Error, Debug)]
pub enum BlockchainError {
    #[error(transparent)]
    Pool(#[from] PoolError),
    #[error(transparent)]
    InvalidTransaction(#[from] InvalidTransactionError),
    #[error(transparent)]
    Transaction(#[from] TransactionError),
    #[error("No signer available")]
    NoSignerAvailable,
    #[error(transparent)]
    SignatureError(#[from] SignatureError),
    #[error(transparent)]
    Signer(#[from] alloy_signer::Error),
    #[error(transparent)]
    DatabaseError(#[from] DatabaseError),
    #[error(transparent)]
    ForkProvider(#[from] ForkError),
    #[error("Rpc error {0:?}")]
    RpcError(RpcError),
    #[error("Resource not found")]
    BlockNotFound,
    #[error("Node is not running")]
    NotRunning,
    #[error("Internal error: {0:?}")]
    Internal(String),
}

impl From<RpcError> for BlockchainError {
    fn from(err: RpcError) -> Self {
        Self::RpcError(err)
    }
}

impl From<ExecutorError> for BlockchainError {
    fn from(err: ExecutorError) -> Self {
        Self::Transaction(TransactionError::Execution(err))
    }
}

/// Errors that can occur in the transaction pool
#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum PoolError {
    /// Thrown if a replacement transaction's gas price is not high enough
    #[error("Tx: [{0}] insufficient gas price to replace existing transaction")]
    ReplacementUnderpriced(B256),
    /// Thrown if the transaction to replace is currently being mined
    #[error("Tx: [{0}] is being mined and can not be replaced")]
    TransactionLocked(B256),
    #[error("Tx: [{0}] already Imported")]
    AlreadyImported(B256),
}

/// An error due to invalid transaction
#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum InvalidTransactionError {
    /// returned if the nonce of a transaction is lower than the one present in the local chain.
    #[error("nonce too low")]
    NonceTooLow,
    /// Represents the inability to cover max cost + value (account balance too low).
    #[error("Insufficient funds for gas * price + value")]
    InsufficientFunds,
    /// returned if the transaction is specified to use less gas than required to start the
    /// invocation.
    #[error("intrinsic gas too low")]
    GasTooLow,
    /// returned if the transaction gas exceeds the block gas limit
    #[error("exceeds block gas limit")]
    GasTooHigh,
    #[error("gas uint64 overflow")]
    GasUintOverflow,
}

/// Why a pooled transaction did not make it into a block
#[derive(thiserror::Error, Clone, Debug, PartialEq, Eq)]
pub enum TransactionError {
    #[error(transparent)]
    Execution(#[from] ExecutorError),
    #[error("transaction replaced by {0}")]
    Replaced(B256),
    #[error("transaction dropped from the pool")]
    Dropped,
}

/// Helper trait to easily convert results to rpc results
pub(crate) trait ToRpcResponseResult {
    fn to_rpc_result(self) -> ResponseResult;
}

/// Converts a serializable value into a `ResponseResult`
pub fn to_rpc_result<T: Serialize>(val: T) -> ResponseResult {
    match serde_json::to_value(val) {
        Ok(success) => ResponseResult::Success(success),
        Err(err) => {
            error!(%err, "Failed serialize rpc response");
            ResponseResult::error(RpcError::internal_error())
        }
    }
}

impl<T: Serialize> ToRpcResponseResult for Result<T> {
    fn to_rpc_result(self) -> ResponseResult {
        match self {
            Ok(val) => to_rpc_result(val),
            Err(err) => RpcError::from(err).into(),
        }
    }
}

impl From<BlockchainError> for RpcError {
    fn from(err: BlockchainError) -> Self {
        match err {
            BlockchainError::Pool(err) => {
                error!(target: "pool", %err, "txpool error");
                match err {
                    PoolError::ReplacementUnderpriced(_) => {
                        Self::transaction_rejected("replacement transaction underpriced")
                    }
                    PoolError::TransactionLocked(_) => {
                        Self::transaction_rejected("transaction is being mined")
                    }
                    PoolError::AlreadyImported(_) => {
                        Self::transaction_rejected("transaction already imported")
                    }
                }
            }
            BlockchainError::InvalidTransaction(err) => match err {
                InvalidTransactionError::GasTooLow | InvalidTransactionError::GasTooHigh => {
                    Self::invalid_input(err.to_string())
                }
                _ => Self::transaction_rejected(err.to_string()),
            },
            BlockchainError::Transaction(err) => match err {
                TransactionError::Execution(ExecutorError::NonceMismatch { .. }) |
                TransactionError::Execution(ExecutorError::InsufficientFunds { .. }) |
                TransactionError::Replaced(_) |
                TransactionError::Dropped => Self::transaction_rejected(err.to_string()),
                _ => Self::internal_error_with(err.to_string()),
            },
            BlockchainError::NoSignerAvailable => Self::invalid_params("No Signer available"),
            BlockchainError::SignatureError(err) => Self::invalid_params(err.to_string()),
            BlockchainError::Signer(err) => Self::invalid_params(err.to_string()),
            BlockchainError::RpcError(err) => err,
            BlockchainError::ForkProvider(err) => {
                error!(target: "fork", %err, "fork provider error");
                Self::internal_error_with(format!("Fork Error: {err}"))
            }
            err @ BlockchainError::BlockNotFound => Self::resource_not_found(err.to_string()),
            BlockchainError::DatabaseError(err) => Self::internal_error_with(err.to_string()),
            err @ BlockchainError::NotRunning => Self::internal_error_with(err.to_string()),
            BlockchainError::Internal(err) => Self::internal_error_with(err),
        }
    }
}

/// Converts a `U256` quantity into a `u64`, failing with `GasUintOverflow`
pub(crate) fn gas_to_u64(gas: U256) -> Result<u64> {
    u64::try_from(gas).map_err(|_| InvalidTransactionError::GasUintOverflow.into())
}
