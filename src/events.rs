//! Observable raffle events
//!
//! Events are fanned out over a broadcast channel so indexers, the CLI and
//! tests can follow a round without polling the engine.

use crate::raffle::types::{Address, Amount, RequestId, RoundId};
use serde::Serialize;
use tokio::sync::broadcast;

const DEFAULT_EVENT_CAPACITY: usize = 1_024;

/// Event emitted by the raffle engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RaffleEvent {
    /// A participant was admitted to the current round
    EntryAccepted {
        round_id: RoundId,
        player: Address,
        amount: Amount,
    },
    /// Upkeep fired and randomness was requested
    UpkeepPerformed {
        round_id: RoundId,
        request_id: RequestId,
    },
    /// The round settled and the prize was paid
    WinnerPicked {
        round_id: RoundId,
        request_id: RequestId,
        winner: Address,
        prize: Amount,
    },
    /// Payout failed; the round stays in CALCULATING
    SettlementFailed {
        round_id: RoundId,
        request_id: RequestId,
        winner: Address,
        amount: Amount,
    },
}

impl RaffleEvent {
    pub fn round_id(&self) -> RoundId {
        match self {
            RaffleEvent::EntryAccepted { round_id, .. }
            | RaffleEvent::UpkeepPerformed { round_id, .. }
            | RaffleEvent::WinnerPicked { round_id, .. }
            | RaffleEvent::SettlementFailed { round_id, .. } => *round_id,
        }
    }
}

/// Broadcast fan-out for raffle events
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<RaffleEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publish an event; having no subscribers is not an error
    pub fn publish(&self, event: RaffleEvent) {
        tracing::debug!(?event, "raffle event");
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RaffleEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_without_subscribers() {
        let bus = EventBus::default();
        bus.publish(RaffleEvent::UpkeepPerformed {
            round_id: 1,
            request_id: 1,
        });
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn test_subscribers_receive_events_in_order() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();
        let player = Address::from_low_u64(1);

        bus.publish(RaffleEvent::EntryAccepted {
            round_id: 1,
            player,
            amount: 10,
        });
        bus.publish(RaffleEvent::UpkeepPerformed {
            round_id: 1,
            request_id: 4,
        });

        assert!(matches!(rx.try_recv(), Ok(RaffleEvent::EntryAccepted { .. })));
        assert_eq!(
            rx.try_recv().unwrap(),
            RaffleEvent::UpkeepPerformed {
                round_id: 1,
                request_id: 4
            }
        );
    }

    #[test]
    fn test_event_json_shape() {
        let event = RaffleEvent::WinnerPicked {
            round_id: 2,
            request_id: 5,
            winner: Address::from_low_u64(7),
            prize: 30,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "winner_picked");
        assert_eq!(json["round_id"], 2);
        assert_eq!(json["winner"], "0x0000000000000000000000000000000000000007");
        assert_eq!(event.round_id(), 2);
    }
}
