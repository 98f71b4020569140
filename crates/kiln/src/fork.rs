//! Support for forking off another client

use alloy_primitives::{Address, B256, Bytes, U256};
use parking_lot::RwLock;
use serde::{Deserialize, de::DeserializeOwned};
use serde_json::{Value, json};
use std::{
    collections::HashMap,
    fmt,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};
use url::Url;

/// Errors that can occur when talking to the remote chain
#[derive(thiserror::Error, Debug)]
pub enum ForkError {
    #[error(transparent)]
    Transport(#[from] reqwest::Error),
    #[error("fork rpc error {code}: {message}")]
    Rpc { code: i64, message: String },
    #[error("invalid `{method}` response: {reason}")]
    InvalidResponse { method: String, reason: String },
    #[error("fork block {0} not found")]
    BlockNotFound(u64),
    #[error("invalid fork url: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

/// Sends raw JSON-RPC requests to the chain that is forked
#[async_trait::async_trait]
#[auto_impl::auto_impl(&, Box, Arc)]
pub trait ForkProvider: Send + Sync + fmt::Debug {
    async fn request(&self, method: &str, params: Value) -> Result<Value, ForkError>;
}

/// A [`ForkProvider`] talking JSON-RPC over HTTP
#[derive(Debug)]
pub struct HttpForkProvider {
    client: reqwest::Client,
    url: Url,
    next_id: AtomicU64,
    retries: u32,
    backoff: Duration,
}

impl HttpForkProvider {
    pub fn new(url: &str, timeout: Duration, retries: u32) -> Result<Self, ForkError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.parse()?,
            next_id: AtomicU64::new(1),
            retries,
            backoff: Duration::from_millis(800),
        })
    }

    async fn send(&self, method: &str, params: &Value) -> Result<Value, ForkError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({ "jsonrpc": "2.0", "id": id, "method": method, "params": params });
        let response: RpcReply =
            self.client.post(self.url.clone()).json(&body).send().await?.json().await?;
        match (response.result, response.error) {
            (_, Some(err)) => Err(ForkError::Rpc { code: err.code, message: err.message }),
            (Some(result), None) => Ok(result),
            (None, None) => Ok(Value::Null),
        }
    }
}

#[async_trait::async_trait]
impl ForkProvider for HttpForkProvider {
    async fn request(&self, method: &str, params: Value) -> Result<Value, ForkError> {
        let mut attempt = 0;
        loop {
            match self.send(method, &params).await {
                Err(ForkError::Transport(err)) if attempt < self.retries => {
                    attempt += 1;
                    warn!(target: "fork", %err, attempt, method, "retrying fork request");
                    tokio::time::sleep(self.backoff * attempt).await;
                }
                res => return res,
            }
        }
    }
}

#[derive(Deserialize)]
struct RpcReply {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcReplyError>,
}

#[derive(Deserialize)]
struct RpcReplyError {
    code: i64,
    message: String,
}

/// How the local chain relates to the forked one
#[derive(Clone, Debug)]
pub struct ClientForkConfig {
    /// The block the local chain builds on
    pub block_number: u64,
    pub block_hash: B256,
    pub timestamp: u64,
}

/// Cached remote answers, only non-empty values are kept
#[derive(Debug, Default)]
pub struct ForkedStorage {
    pub balances: HashMap<(Address, u64), U256>,
    pub nonces: HashMap<(Address, u64), U256>,
    pub code_at: HashMap<(Address, u64), Bytes>,
    pub storage_at: HashMap<(Address, U256, u64), U256>,
}

/// Read access to the forked chain, at or below the fork block
#[derive(Clone, Debug)]
pub struct ClientFork {
    provider: Arc<dyn ForkProvider>,
    config: ClientForkConfig,
    /// Contains the cached data
    pub storage: Arc<RwLock<ForkedStorage>>,
}

// === impl ClientFork ===

impl ClientFork {
    pub fn new(provider: Arc<dyn ForkProvider>, config: ClientForkConfig) -> Self {
        Self { provider, config, storage: Default::default() }
    }

    /// Resolves the fork block, the latest remote block if `block_number` is `None`.
    pub async fn setup(
        provider: Arc<dyn ForkProvider>,
        block_number: Option<u64>,
    ) -> Result<Self, ForkError> {
        let block_number = match block_number {
            Some(number) => number,
            None => {
                let latest: U256 = call(&*provider, "eth_blockNumber", json!([])).await?;
                latest.saturating_to()
            }
        };

        #[derive(Deserialize)]
        struct RemoteHeader {
            hash: B256,
            timestamp: U256,
        }
        let header: Option<RemoteHeader> = call(
            &*provider,
            "eth_getBlockByNumber",
            json!([format!("{block_number:#x}"), false]),
        )
        .await?;
        let header = header.ok_or(ForkError::BlockNotFound(block_number))?;
        trace!(target: "fork", block_number, hash=?header.hash, "fork block resolved");

        let config = ClientForkConfig {
            block_number,
            block_hash: header.hash,
            timestamp: header.timestamp.saturating_to(),
        };
        Ok(Self::new(provider, config))
    }

    /// Returns true whether the block predates the fork
    pub fn predates_fork(&self, block: u64) -> bool {
        block <= self.block_number()
    }

    pub fn block_number(&self) -> u64 {
        self.config.block_number
    }

    pub fn block_hash(&self) -> B256 {
        self.config.block_hash
    }

    pub fn timestamp(&self) -> u64 {
        self.config.timestamp
    }

    /// Clamps a requested block to the fork boundary
    pub fn clamp(&self, block: Option<u64>) -> u64 {
        block.map_or(self.block_number(), |block| block.min(self.block_number()))
    }

    pub async fn get_balance(&self, address: Address, block: u64) -> Result<U256, ForkError> {
        if let Some(balance) = self.storage.read().balances.get(&(address, block)).copied() {
            return Ok(balance)
        }
        let balance: U256 = call(
            &*self.provider,
            "eth_getBalance",
            json!([address, format!("{block:#x}")]),
        )
        .await?;
        if !balance.is_zero() {
            self.storage.write().balances.insert((address, block), balance);
        }
        Ok(balance)
    }

    pub async fn get_nonce(&self, address: Address, block: u64) -> Result<U256, ForkError> {
        if let Some(nonce) = self.storage.read().nonces.get(&(address, block)).copied() {
            return Ok(nonce)
        }
        let nonce: U256 = call(
            &*self.provider,
            "eth_getTransactionCount",
            json!([address, format!("{block:#x}")]),
        )
        .await?;
        if !nonce.is_zero() {
            self.storage.write().nonces.insert((address, block), nonce);
        }
        Ok(nonce)
    }

    pub async fn get_code(&self, address: Address, block: u64) -> Result<Bytes, ForkError> {
        if let Some(code) = self.storage.read().code_at.get(&(address, block)).cloned() {
            return Ok(code)
        }
        let code: Bytes =
            call(&*self.provider, "eth_getCode", json!([address, format!("{block:#x}")])).await?;
        if !code.is_empty() {
            self.storage.write().code_at.insert((address, block), code.clone());
        }
        Ok(code)
    }

    pub async fn storage_at(
        &self,
        address: Address,
        index: U256,
        block: u64,
    ) -> Result<U256, ForkError> {
        if let Some(value) = self.storage.read().storage_at.get(&(address, index, block)).copied()
        {
            return Ok(value)
        }
        let value: U256 = call(
            &*self.provider,
            "eth_getStorageAt",
            json!([address, B256::from(index), format!("{block:#x}")]),
        )
        .await?;
        if !value.is_zero() {
            self.storage.write().storage_at.insert((address, index, block), value);
        }
        Ok(value)
    }
}

async fn call<T: DeserializeOwned>(
    provider: &dyn ForkProvider,
    method: &str,
    params: Value,
) -> Result<T, ForkError> {
    let value = provider.request(method, params).await?;
    serde_json::from_value(value).map_err(|err| ForkError::InvalidResponse {
        method: method.to_string(),
        reason: err.to_string(),
    })
}
