use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::{borrow::Cow, fmt};

/// Error object of a failed JSON-RPC call
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RpcError {
    pub code: ErrorCode,
    pub message: Cow<'static, str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl RpcError {
    fn with_message<M: Into<String>>(code: ErrorCode, message: M) -> Self {
        Self { code, message: Cow::Owned(message.into()), data: None }
    }

    pub const fn internal_error() -> Self {
        Self {
            code: ErrorCode::InternalError,
            message: Cow::Borrowed("Internal error"),
            data: None,
        }
    }

    pub fn internal_error_with<M: Into<String>>(message: M) -> Self {
        Self::with_message(ErrorCode::InternalError, message)
    }

    pub fn invalid_params<M: Into<String>>(message: M) -> Self {
        Self::with_message(ErrorCode::InvalidParams, message)
    }

    /// `-32000`, what nodes answer for most invalid transactions
    pub fn invalid_input<M: Into<String>>(message: M) -> Self {
        Self::with_message(ErrorCode::InvalidInput, message)
    }

    pub fn resource_not_found<M: Into<String>>(message: M) -> Self {
        Self::with_message(ErrorCode::ResourceNotFound, message)
    }

    /// The pool refused the transaction, see
    /// <https://github.com/MetaMask/eth-rpc-errors/blob/main/src/error-constants.ts>
    pub fn transaction_rejected<M: Into<String>>(message: M) -> Self {
        Self::with_message(ErrorCode::TransactionRejected, message)
    }
}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message, self.code.code())
    }
}

impl std::error::Error for RpcError {}

/// The error codes the node answers with, anything else is kept verbatim
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorCode {
    /// `-32602`
    InvalidParams,
    /// `-32603`
    InternalError,
    /// `-32000`
    InvalidInput,
    /// `-32001`
    ResourceNotFound,
    /// `-32003`
    TransactionRejected,
    Other(i64),
}

impl ErrorCode {
    pub const fn code(&self) -> i64 {
        match *self {
            Self::InvalidParams => -32602,
            Self::InternalError => -32603,
            Self::InvalidInput => -32000,
            Self::ResourceNotFound => -32001,
            Self::TransactionRejected => -32003,
            Self::Other(code) => code,
        }
    }
}

impl From<i64> for ErrorCode {
    fn from(code: i64) -> Self {
        [
            Self::InvalidParams,
            Self::InternalError,
            Self::InvalidInput,
            Self::ResourceNotFound,
            Self::TransactionRejected,
        ]
        .into_iter()
        .find(|known| known.code() == code)
        .unwrap_or(Self::Other(code))
    }
}

impl Serialize for ErrorCode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i64(self.code())
    }
}

impl<'de> Deserialize<'de> for ErrorCode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        i64::deserialize(deserializer).map(Self::from)
    }
}
