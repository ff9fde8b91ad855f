//! Raffle counters collected by the service

use crate::raffle::types::Amount;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

#[derive(Clone)]
pub struct RaffleMetrics {
    start_time: Instant,
    entries: Arc<AtomicU64>,
    upkeeps: Arc<AtomicU64>,
    rounds_settled: Arc<AtomicU64>,
    rejected_fulfillments: Arc<AtomicU64>,
    failed_transfers: Arc<AtomicU64>,
    total_paid: Arc<RwLock<Amount>>,
}

/// Point-in-time copy of the counters
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub entries: u64,
    pub upkeeps: u64,
    pub rounds_settled: u64,
    pub rejected_fulfillments: u64,
    pub failed_transfers: u64,
    pub total_paid: Amount,
    pub uptime_secs: u64,
}

impl RaffleMetrics {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            entries: Arc::new(AtomicU64::new(0)),
            upkeeps: Arc::new(AtomicU64::new(0)),
            rounds_settled: Arc::new(AtomicU64::new(0)),
            rejected_fulfillments: Arc::new(AtomicU64::new(0)),
            failed_transfers: Arc::new(AtomicU64::new(0)),
            total_paid: Arc::new(RwLock::new(0)),
        }
    }

    pub fn record_entry(&self) {
        self.entries.fetch_add(1, Ordering::SeqCst);
    }

    pub fn record_upkeep(&self) {
        self.upkeeps.fetch_add(1, Ordering::SeqCst);
    }

    pub fn record_settlement(&self, prize: Amount) {
        self.rounds_settled.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut total) = self.total_paid.write() {
            *total = total.saturating_add(prize);
        }
    }

    pub fn record_rejected_fulfillment(&self) {
        self.rejected_fulfillments.fetch_add(1, Ordering::SeqCst);
    }

    pub fn record_failed_transfer(&self) {
        self.failed_transfers.fetch_add(1, Ordering::SeqCst);
    }

    pub fn rounds_settled(&self) -> u64 {
        self.rounds_settled.load(Ordering::SeqCst)
    }

    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            entries: self.entries.load(Ordering::SeqCst),
            upkeeps: self.upkeeps.load(Ordering::SeqCst),
            rounds_settled: self.rounds_settled(),
            rejected_fulfillments: self.rejected_fulfillments.load(Ordering::SeqCst),
            failed_transfers: self.failed_transfers.load(Ordering::SeqCst),
            total_paid: self.total_paid.read().map(|t| *t).unwrap_or(0),
            uptime_secs: self.uptime().as_secs(),
        }
    }
}

impl Default for RaffleMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        let metrics = RaffleMetrics::new();
        let shared = metrics.clone();

        metrics.record_entry();
        shared.record_entry();
        metrics.record_upkeep();
        metrics.record_settlement(30);
        shared.record_settlement(20);
        metrics.record_rejected_fulfillment();
        metrics.record_failed_transfer();

        let snap = metrics.snapshot();
        assert_eq!(snap.entries, 2);
        assert_eq!(snap.upkeeps, 1);
        assert_eq!(snap.rounds_settled, 2);
        assert_eq!(snap.total_paid, 50);
        assert_eq!(snap.rejected_fulfillments, 1);
        assert_eq!(snap.failed_transfers, 1);
    }
}
