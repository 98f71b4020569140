//! Handler that can get current account related data

use crate::eth::backend::{db::DatabaseResult, mem::state::StateManager};
use alloy_primitives::Address;
use kiln_core::types::Account;
use std::{fmt, sync::Arc};
use tokio::sync::Mutex;

/// Access to the account state the pool validates against
#[async_trait::async_trait]
#[auto_impl::auto_impl(&, Box, Arc)]
pub trait AccountProvider: Send + Sync + fmt::Debug {
    /// Returns the latest state of the account, an empty account if it does not exist
    async fn account(&self, address: Address) -> DatabaseResult<Account>;
}

/// Reads accounts from the node's latest state.
///
/// This is simply a wrapper around the shared [`StateManager`] that only exposes account reads.
#[derive(Clone)]
pub struct AccountView {
    state: Arc<Mutex<StateManager>>,
}

impl AccountView {
    pub fn new(state: Arc<Mutex<StateManager>>) -> Self {
        Self { state }
    }
}

#[async_trait::async_trait]
impl AccountProvider for AccountView {
    async fn account(&self, address: Address) -> DatabaseResult<Account> {
        self.state.lock().await.account_or_default(address).await
    }
}

impl fmt::Debug for AccountView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccountView").finish_non_exhaustive()
    }
}
