//! Oracle node task: watches the local coordinator for new requests and
//! delivers VRF words to the consumer that asked for them.

use crate::oracle::local_coordinator::LocalCoordinator;
use crate::raffle::coordinator::RandomnessConsumer;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Rescan period for requests left pending by a failed fulfillment or
/// delivery
const RESCAN_INTERVAL: Duration = Duration::from_secs(1);

pub struct OracleNode {
    handle: JoinHandle<()>,
    fulfilled: Arc<AtomicU64>,
}

impl OracleNode {
    /// Spawn the node.
    ///
    /// `confirmation_delay` is waited after a request is seen and before it
    /// is answered, standing in for block confirmations.
    pub fn spawn(
        coordinator: LocalCoordinator,
        consumer: Arc<dyn RandomnessConsumer>,
        confirmation_delay: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> Self {
        let fulfilled = Arc::new(AtomicU64::new(0));
        let counter = fulfilled.clone();

        let handle = tokio::spawn(async move {
            tracing::info!(coordinator = %coordinator.address(), "oracle node started");
            loop {
                tokio::select! {
                    _ = coordinator.wait_for_request() => {}
                    _ = tokio::time::sleep(RESCAN_INTERVAL) => {}
                    _ = shutdown.changed() => break,
                }
                if *shutdown.borrow() {
                    break;
                }
                if coordinator.pending_count() == 0 {
                    continue;
                }

                tokio::time::sleep(confirmation_delay).await;

                for request_id in coordinator.pending_requests() {
                    let for_consumer = coordinator
                        .request(request_id)
                        .map(|r| r.consumer == consumer.address())
                        .unwrap_or(false);
                    if !for_consumer {
                        continue;
                    }

                    let verified = match coordinator.prepare_fulfillment(request_id) {
                        Ok(v) => v,
                        Err(e) => {
                            tracing::warn!(request_id, error = %e, "fulfillment failed");
                            continue;
                        }
                    };
                    // The request stays pending until the consumer has the words
                    if let Err(e) = consumer.deliver(verified.fulfillment).await {
                        tracing::warn!(request_id, error = %e, "delivery failed, will retry");
                        continue;
                    }
                    match coordinator.mark_delivered(request_id) {
                        Ok(()) => {
                            counter.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(e) => {
                            tracing::warn!(request_id, error = %e, "delivered request not retired");
                        }
                    }
                }
            }
            tracing::info!("oracle node stopped");
        });

        Self { handle, fulfilled }
    }

    /// Number of fulfillments delivered
    pub fn fulfilled(&self) -> u64 {
        self.fulfilled.load(Ordering::Relaxed)
    }

    pub async fn join(self) {
        if let Err(e) = self.handle.await {
            tracing::error!(error = %e, "oracle node task panicked");
        }
    }
}
