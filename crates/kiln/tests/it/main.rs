mod api;
mod fork;
mod miner;
mod pool;
mod snapshot;
mod time;
pub mod utils;

use kiln::logging::{LoggingManager, NodeLogLayer};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[allow(unused)]
pub(crate) fn init_tracing() -> LoggingManager {
    let logger = LoggingManager::default();
    let _ = tracing_subscriber::registry()
        .with(NodeLogLayer::new(logger.clone()))
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .try_init();
    logger
}

fn main() {}
