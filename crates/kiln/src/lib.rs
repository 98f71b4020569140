//! # kiln
//!
//! A deterministic local Ethereum development chain.

#![cfg_attr(not(test), warn(unused_crate_dependencies))]

#[macro_use]
extern crate tracing;

use crate::{
    eth::{backend::mem::Backend, error::Result},
    fork::{ClientFork, ForkProvider, HttpForkProvider},
    logging::LoggingManager,
    service::NodeService,
};
use std::{
    future::Future,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};
use tokio::task::{JoinError, JoinHandle};

mod config;
pub use config::{NodeConfig, dev_accounts};

/// Ethereum related implementations
pub mod eth;
pub use eth::EthApi;

/// Support for forking off another client
pub mod fork;

/// User facing node output
pub mod logging;

mod service;

/// Creates the node and spawns the service that mines blocks.
///
/// Returns the [EthApi] that can be used to interact with the node and the [NodeHandle] of the
/// task.
///
/// # Panics
///
/// Panics if any error occurs. For a non-panicking version, use [`try_spawn`].
///
/// # Examples
///
/// ```no_run
/// # use kiln::NodeConfig;
/// # async fn spawn() {
/// let config = NodeConfig::default();
/// let (api, handle) = kiln::spawn(config).await;
///
/// // use api
///
/// // wait forever
/// handle.await.unwrap().unwrap();
/// # }
/// ```
pub async fn spawn(config: NodeConfig) -> (EthApi, NodeHandle) {
    try_spawn(config).await.expect("failed to spawn node")
}

/// Creates the node and spawns the service that mines blocks.
///
/// See [`spawn`].
pub async fn try_spawn(config: NodeConfig) -> Result<(EthApi, NodeHandle)> {
    let logger = LoggingManager::default();
    logger.set_enabled(config.enable_logging);

    let fork = setup_fork(&config).await?;
    let backend = Arc::new(Backend::with_config(&config, fork).await?);

    let api = EthApi::new(
        backend.clone(),
        Arc::new(config.genesis_accounts.clone()),
        config.unlocked_accounts.iter().copied().collect(),
        logger,
    );

    let node_service = NodeService::new(backend.clone(), backend.miner().clone());
    let inner = tokio::task::spawn(node_service);
    backend.mark_started();

    node_info!("Available Accounts");
    node_info!("==================");
    for (idx, signer) in config.genesis_accounts.iter().enumerate() {
        node_info!("({}) {:?}", idx, signer.address());
    }
    node_info!("\nChain Id: {}", config.chain_id);
    node_info!("Block Gas Limit: {}\n", config.gas_limit);

    Ok((api, NodeHandle { config, inner }))
}

/// Resolves the fork block if the node forks off another chain
async fn setup_fork(config: &NodeConfig) -> Result<Option<ClientFork>> {
    let provider: Arc<dyn ForkProvider> = match (&config.fork_provider, &config.eth_rpc_url) {
        (Some(provider), _) => provider.clone(),
        (None, Some(url)) => Arc::new(HttpForkProvider::new(
            url,
            config.fork_request_timeout,
            config.fork_request_retries,
        )?),
        (None, None) => return Ok(None),
    };
    let fork = ClientFork::setup(provider, config.fork_block_number).await?;
    node_info!("Fork");
    node_info!("==================");
    node_info!("Block number: {}", fork.block_number());
    node_info!("Block hash: {:?}\n", fork.block_hash());
    Ok(Some(fork))
}

/// A handle to the spawned node service
pub struct NodeHandle {
    config: NodeConfig,
    inner: JoinHandle<Result<()>>,
}

impl NodeHandle {
    /// The [NodeConfig] the node was launched with
    pub fn config(&self) -> &NodeConfig {
        &self.config
    }
}

impl Future for NodeHandle {
    type Output = std::result::Result<Result<()>, JoinError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let pin = self.get_mut();
        Pin::new(&mut pin.inner).poll(cx)
    }
}
