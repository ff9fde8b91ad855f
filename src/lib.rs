//! Raffle Engine - autonomous, verifiably random lottery
//!
//! Participants buy entries into a round; once the round interval has passed
//! and the round has players and funds, a keeper closes it and asks a
//! verifiable randomness oracle for a word. The oracle answers
//! asynchronously, the word picks the winner and the whole pool is paid out
//! before the next round opens.
//!
//! The core ([`raffle`]) is synchronous and single-owner. [`service`] runs
//! it on tokio with a keeper task and a fulfillment inbox, and [`oracle`]
//! provides an in-process VRF coordinator to drive it.

pub mod bank;
pub mod clock;
pub mod config;
pub mod errors;
pub mod events;
pub mod metrics;
pub mod oracle;
pub mod raffle;
pub mod service;

pub use bank::{BankError, InMemoryBank};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConfigLoader, RaffleConfig};
pub use errors::{ConfigurationError, LotteryError, LotteryResult, OracleError, RaffleError};
pub use events::{EventBus, RaffleEvent};
pub use metrics::RaffleMetrics;
pub use oracle::{LocalCoordinator, OracleNode, VrfEngine};
pub use raffle::{
    Address, Amount, Fulfillment, Raffle, RaffleParams, RandomWord, RequestId, RoundState,
    RoundSummary, UpkeepCheck,
};
pub use service::{RaffleService, RaffleStatus};
