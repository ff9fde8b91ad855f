//! In-memory funds ledger used to pay raffle winners.

use crate::raffle::settlement::FundsTransfer;
use crate::raffle::types::{Address, Amount};
use dashmap::{DashMap, DashSet};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BankError {
    #[error("Insufficient funds in {account}: balance {balance} wei, required {required} wei")]
    InsufficientFunds {
        account: Address,
        balance: Amount,
        required: Amount,
    },

    #[error("Account {0} is frozen")]
    AccountFrozen(Address),
}

/// Concurrent balance map shared between clones
#[derive(Clone, Default)]
pub struct InMemoryBank {
    balances: Arc<DashMap<Address, Amount>>,
    frozen: Arc<DashSet<Address>>,
}

impl InMemoryBank {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn deposit(&self, account: Address, amount: Amount) -> Amount {
        let mut balance = self.balances.entry(account).or_insert(0);
        *balance = balance.saturating_add(amount);
        *balance
    }

    pub fn balance_of(&self, account: &Address) -> Amount {
        self.balances.get(account).map(|b| *b).unwrap_or(0)
    }

    /// Move `amount` from `from` to `to`.
    ///
    /// Fails without moving anything if either side is frozen or `from`
    /// cannot cover the amount.
    pub fn transfer(&self, from: Address, to: Address, amount: Amount) -> Result<(), BankError> {
        for account in [from, to] {
            if self.frozen.contains(&account) {
                return Err(BankError::AccountFrozen(account));
            }
        }

        // One shard guard at a time: debit, release, then credit.
        {
            let mut balance = self.balances.entry(from).or_insert(0);
            if *balance < amount {
                return Err(BankError::InsufficientFunds {
                    account: from,
                    balance: *balance,
                    required: amount,
                });
            }
            *balance -= amount;
        }
        self.deposit(to, amount);

        tracing::debug!(%from, %to, amount = %amount, "funds moved");
        Ok(())
    }

    /// Reject all transfers to and from `account`
    pub fn freeze(&self, account: Address) {
        self.frozen.insert(account);
    }

    pub fn unfreeze(&self, account: &Address) {
        self.frozen.remove(account);
    }

    /// Transfer capability paying out of `treasury`
    pub fn payer(&self, treasury: Address) -> BankPayer {
        BankPayer {
            bank: self.clone(),
            treasury,
        }
    }
}

/// Pays winners from a treasury account
pub struct BankPayer {
    bank: InMemoryBank,
    treasury: Address,
}

impl FundsTransfer for BankPayer {
    fn transfer(&mut self, recipient: Address, amount: Amount) -> bool {
        match self.bank.transfer(self.treasury, recipient, amount) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(%recipient, error = %e, "payout transfer failed");
                false
            }
        }
    }
}
