//! background service

use crate::eth::{backend::mem::Backend, error::Result, miner::Miner};
use futures::{FutureExt, channel::oneshot, future::BoxFuture};
use kiln_core::types::Capacity;
use std::{
    future::Future,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};

/// The type that drives the blockchain's state
///
/// This service is basically an endless future that continuously polls the miner which returns
/// how many transactions should go into the next block, then the
/// [backend](crate::eth::backend::mem::Backend) mines until no executable transactions are left.
/// Only one mining run is in flight at a time, triggers that arrive in the meantime are folded into
/// a single follow-up run.
pub struct NodeService {
    /// holds the blockchain's state
    backend: Arc<Backend>,
    /// decides when to mine
    miner: Miner,
    /// the mining run currently in progress
    block_producer: Option<BoxFuture<'static, Result<()>>>,
    /// set when the miner fired while a run was in progress
    retrigger: Option<Capacity>,
    /// resolves once the node is stopped
    shutdown: Option<oneshot::Receiver<()>>,
}

impl NodeService {
    pub fn new(backend: Arc<Backend>, miner: Miner) -> Self {
        let shutdown = backend.take_shutdown_signal();
        Self { backend, miner, block_producer: None, retrigger: None, shutdown }
    }

    fn produce(&mut self, capacity: Capacity) {
        let backend = self.backend.clone();
        // interval blocks are mined even if they are empty
        let persist_empty = self.miner.is_interval();
        self.block_producer =
            Some(async move { backend.mine_pending(capacity, persist_empty).await }.boxed());
    }
}

impl Future for NodeService {
    type Output = Result<()>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let pin = self.get_mut();

        if let Some(shutdown) = pin.shutdown.as_mut() {
            if shutdown.poll_unpin(cx).is_ready() {
                trace!(target: "node", "shutting down node service");
                return Poll::Ready(Ok(()))
            }
        }

        loop {
            if let Some(mut producer) = pin.block_producer.take() {
                match producer.poll_unpin(cx) {
                    Poll::Ready(res) => {
                        if let Err(err) = res {
                            error!(target: "node", %err, "block production failed");
                        }
                    }
                    Poll::Pending => pin.block_producer = Some(producer),
                }
            }

            if pin.block_producer.is_none() {
                if let Some(capacity) = pin.retrigger.take() {
                    pin.produce(capacity);
                    continue
                }
            }

            match pin.miner.poll(cx) {
                Poll::Ready(capacity) => {
                    if pin.backend.is_paused() {
                        trace!(target: "node", "mining is paused, ignoring trigger");
                        continue
                    }
                    if pin.block_producer.is_some() {
                        pin.retrigger = Some(capacity);
                    } else {
                        pin.produce(capacity);
                    }
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}
