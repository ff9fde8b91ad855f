//! Entry ledger: participants and pooled funds of the current round.

use crate::errors::RaffleError;
use crate::raffle::types::{Address, Amount, RoundState};
use serde::Serialize;

/// Outcome of an accepted entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntryReceipt {
    pub player: Address,
    /// Index of this entry in the participant list
    pub position: usize,
    /// Amount credited to the pool (always the entrance fee)
    pub credited: Amount,
    /// Overpayment refunded to the player
    pub change: Amount,
}

/// Participants of the current round and the pool they funded.
///
/// Holds `pool == entrance_fee * participants.len()` at all times.
#[derive(Debug, Clone)]
pub struct EntryLedger {
    entrance_fee: Amount,
    participants: Vec<Address>,
    pool: Amount,
}

impl EntryLedger {
    pub fn new(entrance_fee: Amount) -> Self {
        Self {
            entrance_fee,
            participants: Vec::new(),
            pool: 0,
        }
    }

    /// Admit `player` if the payment covers the fee and the round is open.
    ///
    /// The same player may enter any number of times; every entry occupies
    /// its own slot and so its own chance to win.
    pub fn admit(
        &mut self,
        state: RoundState,
        player: Address,
        paid: Amount,
    ) -> Result<EntryReceipt, RaffleError> {
        if paid < self.entrance_fee {
            return Err(RaffleError::InsufficientPayment {
                required: self.entrance_fee,
                paid,
            });
        }
        if state != RoundState::Open {
            return Err(RaffleError::RoundNotOpen { state });
        }

        self.participants.push(player);
        self.pool += self.entrance_fee;

        Ok(EntryReceipt {
            player,
            position: self.participants.len() - 1,
            credited: self.entrance_fee,
            change: paid - self.entrance_fee,
        })
    }

    pub fn entrance_fee(&self) -> Amount {
        self.entrance_fee
    }

    pub fn num_players(&self) -> usize {
        self.participants.len()
    }

    pub fn pool(&self) -> Amount {
        self.pool
    }

    pub fn participants(&self) -> &[Address] {
        &self.participants
    }

    pub fn player(&self, index: usize) -> Result<Address, RaffleError> {
        self.participants
            .get(index)
            .copied()
            .ok_or(RaffleError::IndexOutOfRange {
                index,
                len: self.participants.len(),
            })
    }

    /// Number of entries held by `player`
    pub fn entries_of(&self, player: &Address) -> usize {
        self.participants.iter().filter(|p| *p == player).count()
    }

    pub fn is_balanced(&self) -> bool {
        self.pool == self.entrance_fee * self.participants.len() as Amount
    }

    /// Undo the most recent entry
    pub(crate) fn revoke_last(&mut self) -> Option<Address> {
        let player = self.participants.pop()?;
        self.pool -= self.entrance_fee;
        Some(player)
    }

    /// Clear the round after a confirmed payout
    pub(crate) fn reset(&mut self) {
        self.participants.clear();
        self.pool = 0;
    }
}
