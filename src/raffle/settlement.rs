//! Settlement: winner selection and payout.

use crate::errors::RaffleError;
use crate::raffle::types::{Address, Amount, RandomWord, RequestId, RoundId};
use serde::Serialize;

/// Funds transfer capability used to pay winners
pub trait FundsTransfer: Send {
    /// Move `amount` to `recipient`; `false` means nothing was paid
    fn transfer(&mut self, recipient: Address, amount: Amount) -> bool;
}

/// Confirmed payout of a round
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Payout {
    pub winner: Address,
    pub winner_index: usize,
    pub amount: Amount,
}

/// Record of a settled round
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoundSummary {
    pub round_id: RoundId,
    pub request_id: RequestId,
    pub winner: Address,
    pub winner_index: usize,
    pub prize: Amount,
    pub num_entries: usize,
    pub random_word: RandomWord,
    pub settled_at: u64,
}

/// `word mod num_players`, or `None` for an empty round.
///
/// A player holding k entries occupies k indices, so their chance of
/// winning is k / num_players.
pub fn winner_index(word: &RandomWord, num_players: usize) -> Option<usize> {
    if num_players == 0 {
        return None;
    }
    Some(word.reduce(num_players as u64) as usize)
}

/// Pick the winner and pay them the whole pool.
///
/// Returns `TransferFailed` when the transfer collaborator does not confirm
/// the payment; the caller must then treat the round as unsettled.
pub fn pay_winner(
    transfer: &mut dyn FundsTransfer,
    participants: &[Address],
    pool: Amount,
    word: &RandomWord,
) -> Result<Payout, RaffleError> {
    let winner_index = winner_index(word, participants.len()).ok_or(RaffleError::NoPlayers)?;
    let winner = participants[winner_index];

    if !transfer.transfer(winner, pool) {
        return Err(RaffleError::TransferFailed {
            winner,
            amount: pool,
        });
    }

    Ok(Payout {
        winner,
        winner_index,
        amount: pool,
    })
}
