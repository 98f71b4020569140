//! User facing logs

use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{Metadata, subscriber::Interest};
use tracing_subscriber::{Layer, layer::Context};

/// The target that identifies the events intended to be logged to stdout
pub const NODE_USER_LOG_TARGET: &str = "node::user";

/// Logs user facing node output, like mined blocks and submitted transactions
#[macro_export]
macro_rules! node_info {
    ($($arg:tt)*) => {
        tracing::info!(target: $crate::logging::NODE_USER_LOG_TARGET, $($arg)*);
    };
}

/// A [`tracing_subscriber::layer::Layer`] that lets `node::user` events through only while the
/// node's logger is enabled.
///
/// All other targets are left to the rest of the subscriber stack.
#[derive(Clone, Debug, Default)]
pub struct NodeLogLayer {
    state: LoggingManager,
}

impl NodeLogLayer {
    /// Returns a new instance of this layer
    pub fn new(state: LoggingManager) -> Self {
        Self { state }
    }
}

impl<S> Layer<S> for NodeLogLayer
where
    S: tracing::Subscriber,
{
    fn register_callsite(&self, metadata: &'static Metadata<'static>) -> Interest {
        if metadata.target() == NODE_USER_LOG_TARGET {
            // can be toggled at runtime
            Interest::sometimes()
        } else {
            Interest::always()
        }
    }

    fn enabled(&self, metadata: &Metadata<'_>, _ctx: Context<'_, S>) -> bool {
        metadata.target() != NODE_USER_LOG_TARGET || self.state.is_enabled()
    }
}

/// Contains the configuration of the logger
#[derive(Clone, Debug)]
pub struct LoggingManager {
    /// Whether the logger is currently enabled
    pub enabled: Arc<RwLock<bool>>,
}

impl LoggingManager {
    /// Returns true if logging is currently enabled
    pub fn is_enabled(&self) -> bool {
        *self.enabled.read()
    }

    /// Updates the `enabled` state
    pub fn set_enabled(&self, enabled: bool) {
        let mut current = self.enabled.write();
        *current = enabled;
    }
}

impl Default for LoggingManager {
    fn default() -> Self {
        Self { enabled: Arc::new(RwLock::new(true)) }
    }
}
