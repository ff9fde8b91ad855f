//! Error types for the raffle engine and its collaborators
//!
//! Every failure here is recoverable: the operation that produced it can be
//! re-attempted once its preconditions hold again.

use crate::raffle::types::{Address, Amount, RequestId, RoundState};

/// Errors returned by the raffle state machine
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RaffleError {
    #[error("Insufficient payment: entrance fee is {required} wei, got {paid} wei")]
    InsufficientPayment { required: Amount, paid: Amount },

    #[error("Raffle is not open (state: {state})")]
    RoundNotOpen { state: RoundState },

    #[error("Player index {index} out of range ({len} players)")]
    IndexOutOfRange { index: usize, len: usize },

    #[error(
        "Upkeep not needed (state: {state}, elapsed: {elapsed}s, players: {num_players}, pool: {pool} wei)"
    )]
    UpkeepNotNeeded {
        state: RoundState,
        elapsed: u64,
        num_players: usize,
        pool: Amount,
    },

    #[error("Randomness request failed: {0}")]
    RandomnessRequestFailed(#[from] OracleError),

    #[error("Unknown request id {request_id}")]
    UnknownRequestId { request_id: RequestId },

    #[error("Only coordinator {want} can fulfill, called by {have}")]
    OnlyCoordinatorCanFulfill { have: Address, want: Address },

    #[error("Fulfillment for request {request_id} carried no random words")]
    MissingRandomWords { request_id: RequestId },

    #[error("Transfer of {amount} wei to {winner} failed")]
    TransferFailed { winner: Address, amount: Amount },

    #[error("Refund of {amount} wei overpayment to {player} failed")]
    RefundFailed { player: Address, amount: Amount },

    #[error("No failed settlement to retry")]
    NoSettlementToRetry,

    #[error("Round has no players")]
    NoPlayers,

    #[error("Invalid raffle parameters: {0}")]
    InvalidParameters(String),
}

/// Broad classes of raffle failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Caller mistake, state unchanged
    Validation,
    /// Operation attempted before its preconditions hold
    Precondition,
    /// Out-of-band or duplicate callback
    Integrity,
    /// A collaborator failed; the round stays in its current phase
    ExternalFailure,
}

impl RaffleError {
    pub fn class(&self) -> ErrorClass {
        match self {
            RaffleError::InsufficientPayment { .. }
            | RaffleError::RoundNotOpen { .. }
            | RaffleError::IndexOutOfRange { .. }
            | RaffleError::InvalidParameters(_) => ErrorClass::Validation,
            RaffleError::UpkeepNotNeeded { .. }
            | RaffleError::NoSettlementToRetry
            | RaffleError::NoPlayers => ErrorClass::Precondition,
            RaffleError::UnknownRequestId { .. }
            | RaffleError::OnlyCoordinatorCanFulfill { .. }
            | RaffleError::MissingRandomWords { .. } => ErrorClass::Integrity,
            RaffleError::RandomnessRequestFailed(_)
            | RaffleError::TransferFailed { .. }
            | RaffleError::RefundFailed { .. } => ErrorClass::ExternalFailure,
        }
    }

    /// Whether re-attempting the same operation later can succeed
    pub fn is_retryable(&self) -> bool {
        self.class() == ErrorClass::ExternalFailure
    }
}

/// Errors raised by the randomness oracle
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OracleError {
    #[error("Invalid subscription {0}")]
    InvalidSubscription(u64),

    #[error("Consumer {consumer} is not registered on subscription {subscription_id}")]
    InvalidConsumer { subscription_id: u64, consumer: Address },

    #[error("Insufficient balance on subscription {subscription_id}")]
    InsufficientBalance { subscription_id: u64 },

    #[error("Too many words requested: {have} (max {want})")]
    NumWordsTooLarge { have: u32, want: u32 },

    #[error("Callback gas limit too big: {have} (max {want})")]
    GasLimitTooBig { have: u32, want: u32 },

    #[error("Nonexistent request {0}")]
    NonexistentRequest(RequestId),

    #[error("VRF failure: {0}")]
    VrfFailure(String),

    #[error("Consumer unavailable: {0}")]
    ConsumerUnavailable(String),
}

/// Configuration loading and validation errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigurationError {
    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    #[error("Missing required field: {0}")]
    MissingRequired(String),

    #[error("Invalid value for {field}: '{value}' ({reason})")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Unknown network: {0}")]
    UnknownNetwork(String),

    #[error("Failed to load configuration: {0}")]
    LoadFailed(String),

    #[error("Failed to save configuration: {0}")]
    SaveFailed(String),
}

/// Root error type for the crate
#[derive(Debug, thiserror::Error)]
pub enum LotteryError {
    #[error("Raffle error: {0}")]
    Raffle(#[from] RaffleError),

    #[error("Oracle error: {0}")]
    Oracle(#[from] OracleError),

    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Funds error: {0}")]
    Bank(#[from] crate::bank::BankError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

// Convenience type alias for Results
pub type LotteryResult<T> = Result<T, LotteryError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_error_display() {
        let err = RaffleError::InsufficientPayment {
            required: 10,
            paid: 5,
        };
        assert!(err.to_string().contains("entrance fee is 10 wei"));
        assert!(err.to_string().contains("got 5 wei"));
    }

    #[test]
    fn test_upkeep_error_carries_snapshot() {
        let err = RaffleError::UpkeepNotNeeded {
            state: RoundState::Calculating,
            elapsed: 12,
            num_players: 3,
            pool: 30,
        };
        let text = err.to_string();
        assert!(text.contains("CALCULATING"));
        assert!(text.contains("elapsed: 12s"));
        assert!(text.contains("players: 3"));
    }

    #[test]
    fn test_error_classes() {
        assert_eq!(
            RaffleError::RoundNotOpen { state: RoundState::Calculating }.class(),
            ErrorClass::Validation
        );
        assert_eq!(
            RaffleError::UnknownRequestId { request_id: 9 }.class(),
            ErrorClass::Integrity
        );
        assert!(RaffleError::TransferFailed {
            winner: Address::ZERO,
            amount: 1
        }
        .is_retryable());
        assert!(!RaffleError::NoPlayers.is_retryable());
    }

    #[test]
    fn test_error_conversion() {
        let raffle_err: RaffleError = OracleError::InvalidSubscription(7).into();
        assert!(matches!(
            raffle_err,
            RaffleError::RandomnessRequestFailed(OracleError::InvalidSubscription(7))
        ));

        let root: LotteryError = raffle_err.into();
        match root {
            LotteryError::Raffle(_) => {}
            _ => panic!("Expected raffle error"),
        }
    }

    #[test]
    fn test_error_source() {
        let root = LotteryError::Configuration(ConfigurationError::MissingRequired(
            "vrf.key_hash".to_string(),
        ));
        assert!(root.source().is_some());
    }
}
