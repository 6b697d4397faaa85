//! Credit-based admission accounting: per-user balances, debits, transfers,
//! and an append-only transaction log. Every balance mutation runs inside a
//! single critical section, so read-check-write-append is atomic and
//! concurrent debits on one user serialize.

use crate::error::{CreditError, Result, ValidationError};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

/// Transaction classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionKind {
    Spend,
    Earn,
    Transfer,
    Refund,
}

/// An immutable ledger entry. Appended on commit, never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub id: String,
    pub kind: TransactionKind,
    #[serde(default)]
    pub from: Option<String>,
    #[serde(default)]
    pub to: Option<String>,
    pub amount: f64,
    pub description: String,
    pub timestamp: DateTime<Utc>,
    pub sequence: u64,
}

/// Filter for transaction listings
#[derive(Debug, Clone, Default)]
pub struct TransactionFilter {
    pub kind: Option<TransactionKind>,
    pub limit: Option<usize>,
}

#[derive(Debug, Default)]
struct LedgerState {
    balances: HashMap<String, f64>,
    transactions: Vec<Transaction>,
    sequence: u64,
    last_timestamp: Option<DateTime<Utc>>,
}

impl LedgerState {
    /// Strictly increasing timestamps even when the clock stalls
    fn next_stamp(&mut self) -> (DateTime<Utc>, u64) {
        let mut now = Utc::now();
        if let Some(last) = self.last_timestamp {
            if now <= last {
                now = last + ChronoDuration::microseconds(1);
            }
        }
        self.last_timestamp = Some(now);
        self.sequence += 1;
        (now, self.sequence)
    }

    fn append(
        &mut self,
        kind: TransactionKind,
        from: Option<&str>,
        to: Option<&str>,
        amount: f64,
        description: &str,
    ) -> Transaction {
        let (timestamp, sequence) = self.next_stamp();
        let transaction = Transaction {
            id: Uuid::new_v4().to_string(),
            kind,
            from: from.map(str::to_string),
            to: to.map(str::to_string),
            amount,
            description: description.to_string(),
            timestamp,
            sequence,
        };
        self.transactions.push(transaction.clone());
        transaction
    }
}

/// In-memory credit ledger. Unknown users implicitly hold a zero balance;
/// accounts created through [`create_account`](CreditLedger::create_account)
/// receive the configured initial grant once.
pub struct CreditLedger {
    state: Mutex<LedgerState>,
    initial_credits: f64,
}

impl CreditLedger {
    pub fn new(initial_credits: f64) -> Self {
        Self {
            state: Mutex::new(LedgerState::default()),
            initial_credits,
        }
    }

    /// Current balance; zero for users the ledger has never seen
    pub fn get_balance(&self, user: &str) -> f64 {
        self.state
            .lock()
            .unwrap()
            .balances
            .get(user)
            .copied()
            .unwrap_or(0.0)
    }

    /// Create an account with the initial grant. Idempotent: an existing
    /// account keeps its balance.
    pub fn create_account(&self, user: &str) -> f64 {
        let mut state = self.state.lock().unwrap();
        if let Some(balance) = state.balances.get(user) {
            return *balance;
        }
        state.balances.insert(user.to_string(), self.initial_credits);
        if self.initial_credits > 0.0 {
            state.append(
                TransactionKind::Earn,
                None,
                Some(user),
                self.initial_credits,
                "initial credit grant",
            );
        }
        debug!(%user, balance = self.initial_credits, "account created");
        self.initial_credits
    }

    /// Withdraw credits. The balance read, check, write and transaction
    /// append form one critical section.
    pub fn debit(&self, user: &str, amount: f64, description: &str) -> Result<Transaction> {
        check_amount(amount)?;
        let mut state = self.state.lock().unwrap();
        let balance = state.balances.get(user).copied().unwrap_or(0.0);
        if balance < amount {
            return Err(CreditError::Insufficient {
                user: user.to_string(),
                required: amount,
                available: balance,
            }
            .into());
        }
        state.balances.insert(user.to_string(), balance - amount);
        let transaction = state.append(TransactionKind::Spend, Some(user), None, amount, description);
        debug!(%user, amount, remaining = balance - amount, "debit committed");
        Ok(transaction)
    }

    /// Add credits
    pub fn credit(&self, user: &str, amount: f64, description: &str) -> Result<Transaction> {
        self.deposit(user, amount, description, TransactionKind::Earn)
    }

    /// Explicit compensation for a previously committed debit. Never
    /// invoked automatically: a cancelled submission does not undo its
    /// debit.
    pub fn refund(&self, user: &str, amount: f64, description: &str) -> Result<Transaction> {
        self.deposit(user, amount, description, TransactionKind::Refund)
    }

    fn deposit(
        &self,
        user: &str,
        amount: f64,
        description: &str,
        kind: TransactionKind,
    ) -> Result<Transaction> {
        check_amount(amount)?;
        let mut state = self.state.lock().unwrap();
        let balance = state.balances.get(user).copied().unwrap_or(0.0);
        state.balances.insert(user.to_string(), balance + amount);
        Ok(state.append(kind, None, Some(user), amount, description))
    }

    /// Move credits between users; both balances move together or not at
    /// all. Transferring to oneself is a permitted no-op.
    pub fn transfer(&self, from: &str, to: &str, amount: f64, memo: &str) -> Result<Transaction> {
        check_amount(amount)?;
        let mut state = self.state.lock().unwrap();
        let from_balance = state.balances.get(from).copied().unwrap_or(0.0);
        if from_balance < amount {
            return Err(CreditError::Insufficient {
                user: from.to_string(),
                required: amount,
                available: from_balance,
            }
            .into());
        }

        if from != to {
            let to_balance = state.balances.get(to).copied().unwrap_or(0.0);
            state.balances.insert(from.to_string(), from_balance - amount);
            state.balances.insert(to.to_string(), to_balance + amount);
        }

        let transaction = state.append(TransactionKind::Transfer, Some(from), Some(to), amount, memo);
        debug!(%from, %to, amount, "transfer committed");
        Ok(transaction)
    }

    /// Transactions touching the user, newest first
    pub fn list_transactions(&self, user: &str, filter: &TransactionFilter) -> Vec<Transaction> {
        let state = self.state.lock().unwrap();
        let mut matching: Vec<Transaction> = state
            .transactions
            .iter()
            .filter(|t| {
                t.from.as_deref() == Some(user) || t.to.as_deref() == Some(user)
            })
            .filter(|t| filter.kind.map_or(true, |k| t.kind == k))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.sequence.cmp(&a.sequence));
        if let Some(limit) = filter.limit {
            matching.truncate(limit);
        }
        matching
    }

    /// Sum over every balance; used by conservation checks
    pub fn total_balance(&self) -> f64 {
        self.state.lock().unwrap().balances.values().sum()
    }
}

fn check_amount(amount: f64) -> Result<()> {
    if !amount.is_finite() || amount <= 0.0 {
        return Err(ValidationError::NonPositiveAmount { amount }.into());
    }
    Ok(())
}
