/// Virtual Currency Ledger
///
/// Append-only record of every balance change in the contest engine:
/// - bonus credits (trip join, organizer grants)
/// - wager escrow debits and refunds
/// - settlement payouts
///
/// KEY PROPERTIES:
/// - Balance is the sum of a participant's transactions, served from a cache
/// - No committed state ever has a negative balance
/// - Every transaction is SHA-256 chained to the one before it

use crate::error::{ContestError, ContestResult};
use chrono::{DateTime, SecondsFormat, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;

/// Memo prefix of the one-time credit a participant gets on first joining a trip
pub const STARTING_BALANCE_MEMO: &str = "starting balance";

/// prev_hash of the first transaction
pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

// ============================================================================
// CORE TYPES
// ============================================================================

/// Transaction kinds
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TxKind {
    BonusCredit,
    EscrowDebit,
    EscrowRefund,
    PayoutCredit,
}

impl TxKind {
    pub fn is_credit(self) -> bool {
        !matches!(self, TxKind::EscrowDebit)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TxKind::BonusCredit => "bonus_credit",
            TxKind::EscrowDebit => "escrow_debit",
            TxKind::EscrowRefund => "escrow_refund",
            TxKind::PayoutCredit => "payout_credit",
        }
    }
}

/// Optional metadata attached to a transaction
#[derive(Debug, Clone, Default)]
pub struct TxContext {
    pub contest_id: Option<String>,
    pub wager_id: Option<String>,
    pub memo: String,
}

impl TxContext {
    pub fn memo(memo: impl Into<String>) -> Self {
        Self {
            memo: memo.into(),
            ..Self::default()
        }
    }

    pub fn contest(contest_id: &str, memo: impl Into<String>) -> Self {
        Self {
            contest_id: Some(contest_id.to_string()),
            wager_id: None,
            memo: memo.into(),
        }
    }

    pub fn wager(contest_id: &str, wager_id: &str, memo: impl Into<String>) -> Self {
        Self {
            contest_id: Some(contest_id.to_string()),
            wager_id: Some(wager_id.to_string()),
            memo: memo.into(),
        }
    }
}

/// A single ledger row
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LedgerTransaction {
    pub id: String,
    /// Global sequence number, starting at 1
    pub seq: u64,
    pub participant_id: String,
    /// Signed: debits are negative
    pub amount: Decimal,
    pub kind: TxKind,
    #[serde(default)]
    pub contest_id: Option<String>,
    #[serde(default)]
    pub wager_id: Option<String>,
    #[serde(default)]
    pub memo: String,
    pub timestamp: DateTime<Utc>,
    pub prev_hash: String,
    pub hash: String,
}

impl LedgerTransaction {
    pub fn compute_hash(&self) -> String {
        let data = format!(
            "{}|{}|{}|{}|{}|{}|{}|{}|{}",
            self.prev_hash,
            self.seq,
            self.participant_id,
            self.amount,
            self.kind.as_str(),
            self.contest_id.as_deref().unwrap_or(""),
            self.wager_id.as_deref().unwrap_or(""),
            self.memo,
            self.timestamp.to_rfc3339_opts(SecondsFormat::Nanos, true),
        );
        hash(&data)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LedgerStats {
    pub total_transactions: usize,
    pub participants: usize,
    pub total_balance: Decimal,
    pub total_credited: Decimal,
    pub total_debited: Decimal,
    pub head_hash: String,
}

// ============================================================================
// LEDGER
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct Ledger {
    transactions: Vec<LedgerTransaction>,
    /// Materialized balances, always equal to the log sums
    balances: HashMap<String, Decimal>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from persisted rows; rejects a broken chain or a negative history
    pub fn from_transactions(mut transactions: Vec<LedgerTransaction>) -> ContestResult<Self> {
        transactions.sort_by_key(|tx| tx.seq);
        let mut ledger = Self {
            transactions,
            balances: HashMap::new(),
        };
        ledger.verify_chain()?;

        for tx in &ledger.transactions {
            let balance = ledger.balances.entry(tx.participant_id.clone()).or_insert(Decimal::ZERO);
            *balance += tx.amount;
            if *balance < Decimal::ZERO {
                return Err(ContestError::Storage(format!(
                    "ledger replay drives {} negative at seq {}",
                    tx.participant_id, tx.seq
                )));
            }
        }
        Ok(ledger)
    }

    pub fn balance(&self, participant_id: &str) -> Decimal {
        self.balances.get(participant_id).copied().unwrap_or(Decimal::ZERO)
    }

    pub fn credit(&mut self, participant_id: &str, amount: Decimal, kind: TxKind, ctx: TxContext) -> ContestResult<LedgerTransaction> {
        if amount <= Decimal::ZERO || !kind.is_credit() {
            return Err(ContestError::InvalidAmount(amount));
        }
        Ok(self.append(participant_id, amount, kind, ctx))
    }

    pub fn debit(&mut self, participant_id: &str, amount: Decimal, kind: TxKind, ctx: TxContext) -> ContestResult<LedgerTransaction> {
        if amount <= Decimal::ZERO || kind.is_credit() {
            return Err(ContestError::InvalidAmount(amount));
        }
        let available = self.balance(participant_id);
        if available < amount {
            return Err(ContestError::InsufficientFunds {
                available,
                required: amount,
            });
        }
        Ok(self.append(participant_id, -amount, kind, ctx))
    }

    fn append(&mut self, participant_id: &str, amount: Decimal, kind: TxKind, ctx: TxContext) -> LedgerTransaction {
        let prev_hash = self
            .transactions
            .last()
            .map(|tx| tx.hash.clone())
            .unwrap_or_else(|| GENESIS_HASH.to_string());

        let mut tx = LedgerTransaction {
            id: uuid::Uuid::new_v4().to_string(),
            seq: self.transactions.len() as u64 + 1,
            participant_id: participant_id.to_string(),
            amount,
            kind,
            contest_id: ctx.contest_id,
            wager_id: ctx.wager_id,
            memo: ctx.memo,
            timestamp: Utc::now(),
            prev_hash,
            hash: String::new(),
        };
        tx.hash = tx.compute_hash();

        *self.balances.entry(participant_id.to_string()).or_insert(Decimal::ZERO) += amount;
        self.transactions.push(tx.clone());
        tx
    }

    /// A participant's transactions in sequence order, optionally for one contest
    pub fn history(&self, participant_id: &str, contest_id: Option<&str>) -> Vec<&LedgerTransaction> {
        self.transactions
            .iter()
            .filter(|tx| tx.participant_id == participant_id)
            .filter(|tx| contest_id.map_or(true, |c| tx.contest_id.as_deref() == Some(c)))
            .collect()
    }

    /// Whether the participant already received the starting balance, on any trip
    pub fn has_starting_credit(&self, participant_id: &str) -> bool {
        self.transactions.iter().any(|tx| {
            tx.participant_id == participant_id
                && tx.kind == TxKind::BonusCredit
                && tx.contest_id.is_none()
                && tx.memo.starts_with(STARTING_BALANCE_MEMO)
        })
    }

    pub fn transactions(&self) -> &[LedgerTransaction] {
        &self.transactions
    }

    pub fn recent_transactions(&self, limit: usize) -> Vec<&LedgerTransaction> {
        self.transactions.iter().rev().take(limit).collect()
    }

    pub fn len(&self) -> usize {
        self.transactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }

    /// Check that every link and every hash is intact
    pub fn verify_chain(&self) -> ContestResult<()> {
        let mut prev = GENESIS_HASH;
        for (i, tx) in self.transactions.iter().enumerate() {
            if tx.seq != i as u64 + 1 {
                return Err(ContestError::Storage(format!("ledger gap: expected seq {}, found {}", i + 1, tx.seq)));
            }
            if tx.prev_hash != prev {
                return Err(ContestError::Storage(format!("ledger chain broken at seq {}", tx.seq)));
            }
            if tx.hash != tx.compute_hash() {
                return Err(ContestError::Storage(format!("ledger hash mismatch at seq {}", tx.seq)));
            }
            prev = &tx.hash;
        }
        Ok(())
    }

    /// Compare the balance cache with the log sums
    pub fn reconcile(&self) -> ContestResult<()> {
        let mut sums: HashMap<&str, Decimal> = HashMap::new();
        for tx in &self.transactions {
            *sums.entry(tx.participant_id.as_str()).or_insert(Decimal::ZERO) += tx.amount;
        }

        if sums.len() != self.balances.len() {
            return Err(ContestError::Storage(format!(
                "balance cache tracks {} participants, log has {}",
                self.balances.len(),
                sums.len()
            )));
        }
        for (participant, sum) in sums {
            let cached = self.balance(participant);
            if cached != sum {
                return Err(ContestError::Storage(format!(
                    "balance cache for {} is {}, log sum is {}",
                    participant, cached, sum
                )));
            }
        }
        Ok(())
    }

    pub fn stats(&self) -> LedgerStats {
        let total_credited = self
            .transactions
            .iter()
            .filter(|tx| tx.amount > Decimal::ZERO)
            .map(|tx| tx.amount)
            .sum();
        let total_debited = self
            .transactions
            .iter()
            .filter(|tx| tx.amount < Decimal::ZERO)
            .map(|tx| -tx.amount)
            .sum();

        LedgerStats {
            total_transactions: self.transactions.len(),
            participants: self.balances.len(),
            total_balance: self.balances.values().copied().sum(),
            total_credited,
            total_debited,
            head_hash: self
                .transactions
                .last()
                .map(|tx| tx.hash.clone())
                .unwrap_or_else(|| GENESIS_HASH.to_string()),
        }
    }
}

pub fn hash(data: &str) -> String {
    hex::encode(Sha256::digest(data.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_balance_is_sum_of_transactions() {
        let mut ledger = Ledger::new();
        ledger.credit("alice", dec!(100), TxKind::BonusCredit, TxContext::memo("trip join")).unwrap();
        ledger.debit("alice", dec!(40), TxKind::EscrowDebit, TxContext::contest("c1", "wager")).unwrap();
        ledger.credit("alice", dec!(15), TxKind::EscrowRefund, TxContext::contest("c1", "lowered")).unwrap();

        assert_eq!(ledger.balance("alice"), dec!(75));
        assert_eq!(ledger.balance("nobody"), dec!(0));
        assert!(ledger.reconcile().is_ok());
    }

    #[test]
    fn test_overdraft_is_rejected_without_writing() {
        let mut ledger = Ledger::new();
        ledger.credit("alice", dec!(60), TxKind::BonusCredit, TxContext::default()).unwrap();

        let err = ledger
            .debit("alice", dec!(70), TxKind::EscrowDebit, TxContext::default())
            .unwrap_err();
        assert_eq!(err, ContestError::InsufficientFunds { available: dec!(60), required: dec!(70) });
        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger.balance("alice"), dec!(60));

        // Spending the whole balance is fine
        ledger.debit("alice", dec!(60), TxKind::EscrowDebit, TxContext::default()).unwrap();
        assert_eq!(ledger.balance("alice"), dec!(0));
    }

    #[test]
    fn test_amount_and_kind_checks() {
        let mut ledger = Ledger::new();
        assert!(matches!(
            ledger.credit("alice", dec!(0), TxKind::BonusCredit, TxContext::default()),
            Err(ContestError::InvalidAmount(_))
        ));
        assert!(ledger.credit("alice", dec!(5), TxKind::EscrowDebit, TxContext::default()).is_err());
        assert!(ledger.debit("alice", dec!(-5), TxKind::EscrowDebit, TxContext::default()).is_err());
        assert!(ledger.is_empty());
    }

    #[test]
    fn test_chain_verifies_and_detects_tampering() {
        let mut ledger = Ledger::new();
        ledger.credit("alice", dec!(100), TxKind::BonusCredit, TxContext::default()).unwrap();
        ledger.credit("bob", dec!(100), TxKind::BonusCredit, TxContext::default()).unwrap();
        ledger.debit("bob", dec!(30), TxKind::EscrowDebit, TxContext::wager("c1", "w1", "stake")).unwrap();
        assert!(ledger.verify_chain().is_ok());
        assert_eq!(ledger.transactions()[0].prev_hash, GENESIS_HASH);
        assert_eq!(ledger.transactions()[1].prev_hash, ledger.transactions()[0].hash);

        let mut rows = ledger.transactions().to_vec();
        rows[1].amount = dec!(1000);
        assert!(Ledger::from_transactions(rows).is_err());
    }

    #[test]
    fn test_memo_is_covered_by_hash() {
        let mut ledger = Ledger::new();
        ledger.credit("alice", dec!(100), TxKind::BonusCredit, TxContext::memo("birthday")).unwrap();

        let mut rows = ledger.transactions().to_vec();
        rows[0].memo = "payout for contest c9".into();
        assert!(matches!(
            Ledger::from_transactions(rows),
            Err(ContestError::Storage(msg)) if msg.contains("hash mismatch")
        ));
    }

    #[test]
    fn test_starting_credit_lookup() {
        let mut ledger = Ledger::new();
        ledger.credit("alice", dec!(50), TxKind::BonusCredit, TxContext::memo("birthday")).unwrap();
        assert!(!ledger.has_starting_credit("alice"));

        let memo = format!("{} (joined trip napa)", STARTING_BALANCE_MEMO);
        ledger.credit("alice", dec!(100), TxKind::BonusCredit, TxContext::memo(memo)).unwrap();
        assert!(ledger.has_starting_credit("alice"));
        assert!(!ledger.has_starting_credit("bob"));
    }

    #[test]
    fn test_rebuild_from_rows() {
        let mut ledger = Ledger::new();
        ledger.credit("alice", dec!(100), TxKind::BonusCredit, TxContext::default()).unwrap();
        ledger.debit("alice", dec!(25.50), TxKind::EscrowDebit, TxContext::contest("c1", "stake")).unwrap();

        let mut rows = ledger.transactions().to_vec();
        rows.reverse();
        let rebuilt = Ledger::from_transactions(rows).unwrap();
        assert_eq!(rebuilt.balance("alice"), dec!(74.50));
        assert!(rebuilt.reconcile().is_ok());
        assert_eq!(rebuilt.stats().head_hash, ledger.stats().head_hash);
    }

    #[test]
    fn test_history_filters_by_contest() {
        let mut ledger = Ledger::new();
        ledger.credit("alice", dec!(100), TxKind::BonusCredit, TxContext::default()).unwrap();
        ledger.debit("alice", dec!(10), TxKind::EscrowDebit, TxContext::contest("c1", "stake")).unwrap();
        ledger.debit("alice", dec!(10), TxKind::EscrowDebit, TxContext::contest("c2", "stake")).unwrap();
        ledger.credit("bob", dec!(100), TxKind::BonusCredit, TxContext::default()).unwrap();

        assert_eq!(ledger.history("alice", None).len(), 3);
        let c1 = ledger.history("alice", Some("c1"));
        assert_eq!(c1.len(), 1);
        assert_eq!(c1[0].amount, dec!(-10));

        let stats = ledger.stats();
        assert_eq!(stats.total_transactions, 4);
        assert_eq!(stats.participants, 2);
        assert_eq!(stats.total_balance, dec!(180));
        assert_eq!(stats.total_debited, dec!(20));
    }
}
