//! Upkeep evaluator: the pure predicate that decides whether a round is due.

use crate::errors::RaffleError;
use crate::raffle::types::{Amount, RoundState};
use serde::Serialize;

/// Inputs the upkeep decision was made on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct UpkeepSnapshot {
    pub state: RoundState,
    /// Seconds since the last settlement (or construction)
    pub elapsed: u64,
    pub num_players: usize,
    pub pool: Amount,
}

impl UpkeepSnapshot {
    pub fn into_error(self) -> RaffleError {
        RaffleError::UpkeepNotNeeded {
            state: self.state,
            elapsed: self.elapsed,
            num_players: self.num_players,
            pool: self.pool,
        }
    }
}

/// Result of `check_upkeep`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct UpkeepCheck {
    pub needed: bool,
    pub interval: u64,
    pub snapshot: UpkeepSnapshot,
}

impl UpkeepCheck {
    pub fn is_open(&self) -> bool {
        self.snapshot.state == RoundState::Open
    }

    pub fn time_passed(&self) -> bool {
        self.snapshot.elapsed >= self.interval
    }

    pub fn has_players(&self) -> bool {
        self.snapshot.num_players > 0
    }

    pub fn has_balance(&self) -> bool {
        self.snapshot.pool > 0
    }

    /// Names of the conditions currently blocking upkeep
    pub fn blockers(&self) -> Vec<&'static str> {
        let mut blockers = Vec::new();
        if !self.is_open() {
            blockers.push("not open");
        }
        if !self.time_passed() {
            blockers.push("interval not elapsed");
        }
        if !self.has_players() {
            blockers.push("no players");
        }
        if !self.has_balance() {
            blockers.push("empty pool");
        }
        blockers
    }
}

/// Evaluate the upkeep condition.
///
/// All four conditions must hold: open, interval elapsed, at least one
/// player and a non-empty pool.
pub fn evaluate(
    state: RoundState,
    now: u64,
    last_timestamp: u64,
    interval: u64,
    num_players: usize,
    pool: Amount,
) -> UpkeepCheck {
    let snapshot = UpkeepSnapshot {
        state,
        elapsed: now.saturating_sub(last_timestamp),
        num_players,
        pool,
    };
    let needed = state == RoundState::Open
        && snapshot.elapsed >= interval
        && num_players > 0
        && pool > 0;

    UpkeepCheck {
        needed,
        interval,
        snapshot,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_needed_when_all_conditions_hold() {
        let check = evaluate(RoundState::Open, 1_031, 1_000, 30, 1, 10);
        assert!(check.needed);
        assert!(check.blockers().is_empty());
        assert_eq!(check.snapshot.elapsed, 31);
    }

    #[test]
    fn test_interval_boundary_is_inclusive() {
        assert!(evaluate(RoundState::Open, 1_030, 1_000, 30, 1, 10).needed);
        assert!(!evaluate(RoundState::Open, 1_029, 1_000, 30, 1, 10).needed);
    }

    #[test]
    fn test_each_condition_blocks() {
        let cases = [
            (evaluate(RoundState::Calculating, 2_000, 1_000, 30, 1, 10), "not open"),
            (evaluate(RoundState::Open, 1_001, 1_000, 30, 1, 10), "interval not elapsed"),
            (evaluate(RoundState::Open, 2_000, 1_000, 30, 0, 10), "no players"),
            (evaluate(RoundState::Open, 2_000, 1_000, 30, 1, 0), "empty pool"),
        ];
        for (check, blocker) in cases {
            assert!(!check.needed);
            assert_eq!(check.blockers(), vec![blocker]);
        }
    }

    #[test]
    fn test_clock_behind_last_timestamp_counts_as_zero() {
        let check = evaluate(RoundState::Open, 900, 1_000, 0, 1, 10);
        assert_eq!(check.snapshot.elapsed, 0);
        assert!(check.needed);
    }

    #[test]
    fn test_snapshot_into_error() {
        let check = evaluate(RoundState::Open, 1_010, 1_000, 30, 0, 0);
        assert_eq!(
            check.snapshot.into_error(),
            RaffleError::UpkeepNotNeeded {
                state: RoundState::Open,
                elapsed: 10,
                num_players: 0,
                pool: 0,
            }
        );
    }
}
