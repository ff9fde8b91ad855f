//! Raffle core: ledger, upkeep, randomness coordination and settlement.

pub mod coordinator;
pub mod engine;
pub mod ledger;
pub mod settlement;
pub mod types;
pub mod upkeep;

pub use coordinator::{
    Fulfillment, PendingRequest, RandomnessConsumer, RandomnessCoordinator, RandomnessOracle,
    RandomnessRequest, NUM_WORDS,
};
pub use engine::{Raffle, RaffleParams, DEFAULT_HISTORY_LIMIT};
pub use ledger::{EntryLedger, EntryReceipt};
pub use settlement::{pay_winner, winner_index, FundsTransfer, Payout, RoundSummary};
pub use types::{
    format_ether, parse_ether, Address, Amount, ParseError, RandomWord, RequestId, RoundId,
    RoundState, WEI_PER_ETHER,
};
pub use upkeep::{UpkeepCheck, UpkeepSnapshot};
