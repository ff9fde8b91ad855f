//! Async runtime around the raffle engine
//!
//! The engine is shared behind one `tokio::sync::Mutex`. Two background
//! tasks drive it:
//!
//! - the keeper polls `check_upkeep` and calls `perform_upkeep` when a round
//!   is due, and retries settlements left over from failed payouts;
//! - the fulfillment inbox applies oracle callbacks delivered through
//!   [`FulfillmentInbox`].
//!
//! Both stop when the shutdown signal flips.

use crate::config::KeeperSettings;
use crate::errors::{ErrorClass, OracleError, RaffleError};
use crate::events::RaffleEvent;
use crate::metrics::RaffleMetrics;
use crate::raffle::coordinator::{Fulfillment, RandomnessConsumer};
use crate::raffle::engine::Raffle;
use crate::raffle::ledger::EntryReceipt;
use crate::raffle::settlement::RoundSummary;
use crate::raffle::types::{Address, Amount, RequestId, RoundId, RoundState};
use crate::raffle::upkeep::UpkeepCheck;
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

const INBOX_CAPACITY: usize = 64;

/// Read-only view of the engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RaffleStatus {
    pub state: RoundState,
    pub round_id: RoundId,
    pub num_players: usize,
    pub pool: Amount,
    pub entrance_fee: Amount,
    pub recent_winner: Option<Address>,
    pub pending_request_id: Option<RequestId>,
    pub last_timestamp: u64,
}

/// Consumer endpoint feeding the service's fulfillment inbox
#[derive(Clone)]
pub struct FulfillmentInbox {
    address: Address,
    sender: mpsc::Sender<Fulfillment>,
}

#[async_trait]
impl RandomnessConsumer for FulfillmentInbox {
    fn address(&self) -> Address {
        self.address
    }

    async fn deliver(&self, fulfillment: Fulfillment) -> Result<(), OracleError> {
        self.sender
            .send(fulfillment)
            .await
            .map_err(|_| OracleError::ConsumerUnavailable("fulfillment inbox closed".to_string()))
    }
}

pub struct RaffleService {
    raffle: Arc<Mutex<Raffle>>,
    inbox: FulfillmentInbox,
    metrics: RaffleMetrics,
    shutdown_tx: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl RaffleService {
    /// Wrap `raffle` and spawn the inbox handler and, if enabled, the keeper
    pub fn start(raffle: Raffle, keeper: &KeeperSettings) -> Self {
        let consumer = raffle.consumer_address();
        let raffle = Arc::new(Mutex::new(raffle));
        let metrics = RaffleMetrics::new();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (sender, receiver) = mpsc::channel(INBOX_CAPACITY);

        let mut tasks = vec![tokio::spawn(run_inbox(
            raffle.clone(),
            receiver,
            metrics.clone(),
            shutdown_rx.clone(),
        ))];
        if keeper.enabled {
            tasks.push(tokio::spawn(run_keeper(
                raffle.clone(),
                keeper.clone(),
                metrics.clone(),
                shutdown_rx,
            )));
        }

        tracing::info!(%consumer, keeper = keeper.enabled, "raffle service started");

        Self {
            raffle,
            inbox: FulfillmentInbox {
                address: consumer,
                sender,
            },
            metrics,
            shutdown_tx,
            tasks,
        }
    }

    /// Consumer handle to give to the oracle
    pub fn consumer(&self) -> Arc<dyn RandomnessConsumer> {
        Arc::new(self.inbox.clone())
    }

    pub async fn enter(&self, player: Address, paid: Amount) -> Result<EntryReceipt, RaffleError> {
        let receipt = self.raffle.lock().await.enter(player, paid)?;
        self.metrics.record_entry();
        Ok(receipt)
    }

    pub async fn check_upkeep(&self) -> UpkeepCheck {
        self.raffle.lock().await.check_upkeep()
    }

    pub async fn perform_upkeep(&self) -> Result<RequestId, RaffleError> {
        let request_id = self.raffle.lock().await.perform_upkeep()?;
        self.metrics.record_upkeep();
        Ok(request_id)
    }

    pub async fn retry_settlement(&self) -> Result<RoundSummary, RaffleError> {
        let mut raffle = self.raffle.lock().await;
        let result = raffle.retry_settlement();
        record_settlement(&self.metrics, &result);
        result
    }

    pub async fn status(&self) -> RaffleStatus {
        let raffle = self.raffle.lock().await;
        RaffleStatus {
            state: raffle.raffle_state(),
            round_id: raffle.round_id(),
            num_players: raffle.num_players(),
            pool: raffle.pool(),
            entrance_fee: raffle.entrance_fee(),
            recent_winner: raffle.recent_winner(),
            pending_request_id: raffle.pending_request().map(|p| p.request_id),
            last_timestamp: raffle.last_timestamp(),
        }
    }

    pub async fn round_history(&self) -> Vec<RoundSummary> {
        self.raffle.lock().await.round_history().to_vec()
    }

    pub async fn subscribe(&self) -> broadcast::Receiver<RaffleEvent> {
        self.raffle.lock().await.subscribe()
    }

    pub fn metrics(&self) -> &RaffleMetrics {
        &self.metrics
    }

    /// Receiver that flips to `true` on shutdown
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    /// Stop the background tasks and wait for them
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        for task in self.tasks {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "service task panicked");
            }
        }
        tracing::info!("raffle service stopped");
    }
}

fn record_settlement(metrics: &RaffleMetrics, result: &Result<RoundSummary, RaffleError>) {
    match result {
        Ok(summary) => metrics.record_settlement(summary.prize),
        Err(RaffleError::TransferFailed { .. }) => metrics.record_failed_transfer(),
        Err(_) => {}
    }
}

async fn run_inbox(
    raffle: Arc<Mutex<Raffle>>,
    mut receiver: mpsc::Receiver<Fulfillment>,
    metrics: RaffleMetrics,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let fulfillment = tokio::select! {
            received = receiver.recv() => match received {
                Some(f) => f,
                None => break,
            },
            _ = shutdown.changed() => break,
        };

        let result = raffle.lock().await.handle_fulfillment(&fulfillment);
        match &result {
            Err(e) if e.class() == ErrorClass::Integrity => {
                metrics.record_rejected_fulfillment();
            }
            _ => record_settlement(&metrics, &result),
        }
    }
    tracing::debug!("fulfillment inbox stopped");
}

async fn run_keeper(
    raffle: Arc<Mutex<Raffle>>,
    settings: KeeperSettings,
    metrics: RaffleMetrics,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(settings.poll_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.changed() => break,
        }

        let mut engine = raffle.lock().await;
        if engine.check_upkeep().needed {
            match engine.perform_upkeep() {
                Ok(_) => metrics.record_upkeep(),
                Err(e) => tracing::warn!(error = %e, "keeper upkeep failed"),
            }
        } else if engine.raffle_state() == RoundState::Calculating
            && engine
                .pending_request()
                .map_or(false, |p| p.received_word.is_some())
        {
            let result = engine.retry_settlement();
            record_settlement(&metrics, &result);
        }
    }
    tracing::debug!("keeper stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::raffle::coordinator::{RandomnessOracle, RandomnessRequest};
    use crate::raffle::engine::RaffleParams;
    use crate::raffle::settlement::FundsTransfer;
    use crate::raffle::types::RandomWord;

    struct CountingOracle(RequestId);

    impl RandomnessOracle for CountingOracle {
        fn coordinator(&self) -> Address {
            Address::from_low_u64(0xc0)
        }

        fn request_random_words(&mut self, _: &RandomnessRequest) -> Result<RequestId, OracleError> {
            self.0 += 1;
            Ok(self.0)
        }
    }

    struct AlwaysPays;

    impl FundsTransfer for AlwaysPays {
        fn transfer(&mut self, _: Address, _: Amount) -> bool {
            true
        }
    }

    fn service(clock: &ManualClock) -> RaffleService {
        let raffle = Raffle::new(
            RaffleParams {
                entrance_fee: 10,
                interval: 30,
                request: RandomnessRequest {
                    key_hash: [0u8; 32],
                    subscription_id: 1,
                    request_confirmations: 3,
                    callback_gas_limit: 100_000,
                    num_words: 1,
                    consumer: Address::from_low_u64(0xaa),
                },
                history_limit: 10,
            },
            Box::new(CountingOracle(0)),
            Box::new(AlwaysPays),
            Arc::new(clock.clone()),
        )
        .unwrap();
        RaffleService::start(
            raffle,
            &KeeperSettings {
                enabled: false,
                poll_interval_ms: 10,
            },
        )
    }

    #[tokio::test]
    async fn test_inbox_settles_round() {
        let clock = ManualClock::new(0);
        let service = service(&clock);
        let mut events = service.subscribe().await;

        service.enter(Address::from_low_u64(1), 10).await.unwrap();
        clock.advance(30);
        let request_id = service.perform_upkeep().await.unwrap();

        let consumer = service.consumer();
        assert_eq!(consumer.address(), Address::from_low_u64(0xaa));
        consumer
            .deliver(Fulfillment {
                caller: Address::from_low_u64(0xc0),
                request_id,
                words: vec![RandomWord::from_u64(0)],
            })
            .await
            .unwrap();

        loop {
            if let RaffleEvent::WinnerPicked { .. } = events.recv().await.unwrap() {
                break;
            }
        }
        let status = service.status().await;
        assert_eq!(status.state, RoundState::Open);
        assert_eq!(status.round_id, 2);
        assert_eq!(service.metrics().snapshot().rounds_settled, 1);
        service.shutdown().await;
    }

    #[tokio::test]
    async fn test_inbox_counts_rejected_callbacks() {
        let clock = ManualClock::new(0);
        let service = service(&clock);

        service
            .consumer()
            .deliver(Fulfillment {
                caller: Address::from_low_u64(0xc0),
                request_id: 99,
                words: vec![RandomWord::from_u64(1)],
            })
            .await
            .unwrap();

        for _ in 0..100 {
            if service.metrics().snapshot().rejected_fulfillments == 1 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        assert_eq!(service.metrics().snapshot().rejected_fulfillments, 1);
        service.shutdown().await;
    }
}
