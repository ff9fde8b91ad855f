//! Raffle engine
//!
//! `Raffle` is the single aggregate that owns a lottery: the entry ledger,
//! the round state machine, the round timer, the pending randomness request
//! and the settlement history. Every mutating operation takes `&mut self`,
//! so operations are serialised by ownership; the async service wraps the
//! engine in one mutex.
//!
//! Round life cycle:
//!
//! ```text
//!   OPEN --perform_upkeep--> CALCULATING --fulfillment + payout--> OPEN
//! ```

use crate::clock::Clock;
use crate::errors::RaffleError;
use crate::events::{EventBus, RaffleEvent};
use crate::raffle::coordinator::{
    Fulfillment, PendingRequest, RandomnessCoordinator, RandomnessOracle, RandomnessRequest,
};
use crate::raffle::ledger::{EntryLedger, EntryReceipt};
use crate::raffle::settlement::{pay_winner, FundsTransfer, RoundSummary};
use crate::raffle::types::{Address, Amount, RandomWord, RequestId, RoundId, RoundState};
use crate::raffle::upkeep::{self, UpkeepCheck};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Settled rounds kept by default in [`Raffle::round_history`]
pub const DEFAULT_HISTORY_LIMIT: usize = 1_000;

/// Immutable parameters of a raffle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RaffleParams {
    /// Exact amount credited to the pool per entry
    pub entrance_fee: Amount,
    /// Minimum seconds between settlements
    pub interval: u64,
    pub request: RandomnessRequest,
    /// Most recent settled rounds to keep; older summaries are dropped
    pub history_limit: usize,
}

impl RaffleParams {
    pub fn validate(&self) -> Result<(), RaffleError> {
        if self.entrance_fee == 0 {
            return Err(RaffleError::InvalidParameters(
                "entrance fee must be greater than 0".to_string(),
            ));
        }
        if self.request.num_words == 0 {
            return Err(RaffleError::InvalidParameters(
                "num_words must be at least 1".to_string(),
            ));
        }
        if self.request.callback_gas_limit == 0 {
            return Err(RaffleError::InvalidParameters(
                "callback gas limit must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

pub struct Raffle {
    ledger: EntryLedger,
    state: RoundState,
    interval: u64,
    last_timestamp: u64,
    recent_winner: Option<Address>,
    round_id: RoundId,
    history: Vec<RoundSummary>,
    history_limit: usize,
    coordinator: RandomnessCoordinator,
    transfer: Box<dyn FundsTransfer>,
    clock: Arc<dyn Clock>,
    events: EventBus,
}

impl Raffle {
    /// Create an open raffle; the round timer starts now
    pub fn new(
        params: RaffleParams,
        oracle: Box<dyn RandomnessOracle>,
        transfer: Box<dyn FundsTransfer>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, RaffleError> {
        params.validate()?;
        let last_timestamp = clock.now();

        tracing::info!(
            entrance_fee = %params.entrance_fee,
            interval = params.interval,
            coordinator = %oracle.coordinator(),
            "raffle created"
        );

        Ok(Self {
            ledger: EntryLedger::new(params.entrance_fee),
            state: RoundState::Open,
            interval: params.interval,
            last_timestamp,
            recent_winner: None,
            round_id: 1,
            history: Vec::new(),
            history_limit: params.history_limit,
            coordinator: RandomnessCoordinator::new(oracle, params.request),
            transfer,
            clock,
            events: EventBus::default(),
        })
    }

    /// Enter the current round, paying `paid` wei.
    ///
    /// Anything above the entrance fee is refunded to `player` through the
    /// funds transfer. If that refund fails the entry is undone.
    pub fn enter(&mut self, player: Address, paid: Amount) -> Result<EntryReceipt, RaffleError> {
        let receipt = self.ledger.admit(self.state, player, paid)?;
        if receipt.change > 0 && !self.transfer.transfer(player, receipt.change) {
            self.ledger.revoke_last();
            tracing::warn!(%player, change = %receipt.change, "overpayment refund failed, entry undone");
            return Err(RaffleError::RefundFailed {
                player,
                amount: receipt.change,
            });
        }

        tracing::info!(
            round_id = self.round_id,
            %player,
            position = receipt.position,
            "entry accepted"
        );
        self.events.publish(RaffleEvent::EntryAccepted {
            round_id: self.round_id,
            player,
            amount: receipt.credited,
        });

        Ok(receipt)
    }

    /// Read-only upkeep check
    pub fn check_upkeep(&self) -> UpkeepCheck {
        upkeep::evaluate(
            self.state,
            self.clock.now(),
            self.last_timestamp,
            self.interval,
            self.ledger.num_players(),
            self.ledger.pool(),
        )
    }

    /// Close the round and request randomness.
    ///
    /// The oracle is asked first; if it refuses, the round stays open with
    /// no pending request.
    pub fn perform_upkeep(&mut self) -> Result<RequestId, RaffleError> {
        let check = self.check_upkeep();
        if !check.needed {
            tracing::debug!(blockers = ?check.blockers(), "upkeep not needed");
            return Err(check.snapshot.into_error());
        }

        let request_id = match self.coordinator.request(self.clock.now()) {
            Ok(id) => id,
            Err(e) => {
                tracing::warn!(round_id = self.round_id, error = %e, "randomness request failed");
                return Err(e);
            }
        };
        self.state = RoundState::Calculating;

        tracing::info!(
            round_id = self.round_id,
            request_id,
            num_players = self.ledger.num_players(),
            "upkeep performed, winner requested"
        );
        self.events.publish(RaffleEvent::UpkeepPerformed {
            round_id: self.round_id,
            request_id,
        });

        Ok(request_id)
    }

    /// Oracle callback carrying the random words for `request_id`
    pub fn fulfill_random_words(
        &mut self,
        caller: Address,
        request_id: RequestId,
        words: &[RandomWord],
    ) -> Result<RoundSummary, RaffleError> {
        let word = match self.coordinator.accept(caller, request_id, words) {
            Ok(word) => word,
            Err(e) => {
                tracing::warn!(%caller, request_id, error = %e, "fulfillment rejected");
                return Err(e);
            }
        };
        self.settle(request_id, word)
    }

    pub fn handle_fulfillment(
        &mut self,
        fulfillment: &Fulfillment,
    ) -> Result<RoundSummary, RaffleError> {
        self.fulfill_random_words(
            fulfillment.caller,
            fulfillment.request_id,
            &fulfillment.words,
        )
    }

    /// Settle again with the word kept from a failed payout
    pub fn retry_settlement(&mut self) -> Result<RoundSummary, RaffleError> {
        let (request_id, word) = self
            .coordinator
            .retained_word()
            .ok_or(RaffleError::NoSettlementToRetry)?;
        tracing::info!(round_id = self.round_id, request_id, "retrying settlement");
        self.settle(request_id, word)
    }

    fn settle(&mut self, request_id: RequestId, word: RandomWord) -> Result<RoundSummary, RaffleError> {
        let pool = self.ledger.pool();
        let payout = match pay_winner(
            self.transfer.as_mut(),
            self.ledger.participants(),
            pool,
            &word,
        ) {
            Ok(payout) => payout,
            Err(e) => {
                if let RaffleError::TransferFailed { winner, amount } = &e {
                    tracing::warn!(
                        round_id = self.round_id,
                        request_id,
                        %winner,
                        amount = %amount,
                        "payout failed, round stays calculating"
                    );
                    self.events.publish(RaffleEvent::SettlementFailed {
                        round_id: self.round_id,
                        request_id,
                        winner: *winner,
                        amount: *amount,
                    });
                }
                return Err(e);
            }
        };

        let now = self.clock.now();
        let summary = RoundSummary {
            round_id: self.round_id,
            request_id,
            winner: payout.winner,
            winner_index: payout.winner_index,
            prize: payout.amount,
            num_entries: self.ledger.num_players(),
            random_word: word,
            settled_at: now,
        };

        self.ledger.reset();
        self.coordinator.complete();
        self.last_timestamp = now;
        self.state = RoundState::Open;
        self.recent_winner = Some(payout.winner);
        self.record_history(summary.clone());

        tracing::info!(
            round_id = summary.round_id,
            winner = %summary.winner,
            prize = %summary.prize,
            entries = summary.num_entries,
            "winner picked"
        );
        self.events.publish(RaffleEvent::WinnerPicked {
            round_id: summary.round_id,
            request_id,
            winner: summary.winner,
            prize: summary.prize,
        });
        self.round_id += 1;

        Ok(summary)
    }

    fn record_history(&mut self, summary: RoundSummary) {
        if self.history_limit == 0 {
            return;
        }
        if self.history.len() >= self.history_limit {
            let excess = self.history.len() + 1 - self.history_limit;
            self.history.drain(..excess);
        }
        self.history.push(summary);
    }

    pub fn raffle_state(&self) -> RoundState {
        self.state
    }

    pub fn entrance_fee(&self) -> Amount {
        self.ledger.entrance_fee()
    }

    pub fn interval(&self) -> u64 {
        self.interval
    }

    pub fn player(&self, index: usize) -> Result<Address, RaffleError> {
        self.ledger.player(index)
    }

    pub fn num_players(&self) -> usize {
        self.ledger.num_players()
    }

    pub fn players(&self) -> &[Address] {
        self.ledger.participants()
    }

    pub fn recent_winner(&self) -> Option<Address> {
        self.recent_winner
    }

    pub fn pool(&self) -> Amount {
        self.ledger.pool()
    }

    pub fn last_timestamp(&self) -> u64 {
        self.last_timestamp
    }

    pub fn pending_request(&self) -> Option<&PendingRequest> {
        self.coordinator.pending()
    }

    pub fn num_words(&self) -> u32 {
        self.coordinator.request_params().num_words
    }

    pub fn request_confirmations(&self) -> u16 {
        self.coordinator.request_params().request_confirmations
    }

    pub fn coordinator_address(&self) -> Address {
        self.coordinator.coordinator()
    }

    /// Account the oracle calls back
    pub fn consumer_address(&self) -> Address {
        self.coordinator.request_params().consumer
    }

    /// Id of the round currently accepting entries or being settled
    pub fn round_id(&self) -> RoundId {
        self.round_id
    }

    /// Most recent settled rounds, oldest first, capped at the history limit
    pub fn round_history(&self) -> &[RoundSummary] {
        &self.history
    }

    pub fn is_balanced(&self) -> bool {
        self.ledger.is_balanced()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RaffleEvent> {
        self.events.subscribe()
    }
}
