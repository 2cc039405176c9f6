//! Credit Ledger
//!
//! Per-user counter of purchasable usage units. Balances are unsigned, so
//! they can never be observed below zero; debits are guarded and every
//! increment is a single read-modify-write under the ledger lock.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use crate::error::{CoreError, Result};

/// Deduplication key for a payment applied to the ledger
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Outcome of an idempotent credit
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CreditApplication {
    /// Credits were added; carries the new balance
    Applied { balance: u64 },

    /// The key was already applied; nothing changed
    Duplicate { balance: u64 },
}

impl CreditApplication {
    pub fn balance(&self) -> u64 {
        match self {
            CreditApplication::Applied { balance } | CreditApplication::Duplicate { balance } => {
                *balance
            }
        }
    }
}

/// Credit ledger trait
pub trait CreditLedger: Send + Sync {
    /// Current balance (0 for unknown users)
    fn balance(&self, user_id: &str) -> Result<u64>;

    /// Atomically add credits
    fn credit(&self, user_id: &str, amount: u64) -> Result<u64>;

    /// Atomically add credits unless `key` was already applied.
    /// The key check and the increment happen as one step.
    fn credit_once(
        &self,
        key: &IdempotencyKey,
        user_id: &str,
        amount: u64,
    ) -> Result<CreditApplication>;

    /// Atomically subtract credits if the balance covers them.
    /// Returns the new balance, or `None` when funds are insufficient.
    fn try_debit(&self, user_id: &str, amount: u64) -> Result<Option<u64>>;
}

#[derive(Default)]
struct LedgerState {
    balances: HashMap<String, u64>,
    applied: HashSet<IdempotencyKey>,
}

impl LedgerState {
    fn add(&mut self, user_id: &str, amount: u64) -> Result<u64> {
        let entry = self.balances.entry(user_id.to_string()).or_insert(0);
        *entry = entry
            .checked_add(amount)
            .ok_or_else(|| CoreError::Storage(format!("credit overflow for {user_id}")))?;
        Ok(*entry)
    }
}

/// In-memory ledger (for development and tests)
#[derive(Default)]
pub struct MemoryCreditLedger {
    state: Mutex<LedgerState>,
}

impl MemoryCreditLedger {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CreditLedger for MemoryCreditLedger {
    fn balance(&self, user_id: &str) -> Result<u64> {
        Ok(self.state.lock().balances.get(user_id).copied().unwrap_or(0))
    }

    fn credit(&self, user_id: &str, amount: u64) -> Result<u64> {
        self.state.lock().add(user_id, amount)
    }

    fn credit_once(
        &self,
        key: &IdempotencyKey,
        user_id: &str,
        amount: u64,
    ) -> Result<CreditApplication> {
        let mut state = self.state.lock();
        if state.applied.contains(key) {
            let balance = state.balances.get(user_id).copied().unwrap_or(0);
            return Ok(CreditApplication::Duplicate { balance });
        }
        let balance = state.add(user_id, amount)?;
        state.applied.insert(key.clone());
        Ok(CreditApplication::Applied { balance })
    }

    fn try_debit(&self, user_id: &str, amount: u64) -> Result<Option<u64>> {
        let mut state = self.state.lock();
        match state.balances.get_mut(user_id) {
            Some(balance) if *balance >= amount => {
                *balance -= amount;
                Ok(Some(*balance))
            }
            _ => Ok(None),
        }
    }
}
