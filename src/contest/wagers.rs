// ============================================================================
// Wager Book - escrowed bets on the final top 3
// ============================================================================
//
// One wager per bettor per contest. The book only tracks wager records; the
// engine moves the virtual stake delta through the Ledger in the same locked
// step as the upsert. Cash stakes are recorded but never escrowed.
//
// Settlement (once, at REVEAL):
//   correct  <=> prediction == (winner, second, third), exact order
//   pot_split:        payout = stake + pot * stake / total_winning_stake
//   fixed_multiplier: payout = stake * multiplier
// Payouts are truncated to 2 decimal places. Losing stakes stay forfeit.
//
// ============================================================================

use super::{ContestSettings, PayoutPolicy, Placement, Ranking};
use crate::error::{ContestError, ContestResult};
use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Decimal places kept on payouts
pub const PAYOUT_SCALE: u32 = 2;

/// A wager prediction is an ordered top 3 by bag number
pub type Prediction = Ranking;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WagerStatus {
    Open,
    Won,
    Lost,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Wager {
    pub id: String,
    pub contest_id: String,
    pub bettor_id: String,
    pub prediction: Prediction,
    pub virtual_stake: Decimal,
    pub cash_stake: Decimal,
    pub status: WagerStatus,
    #[serde(default)]
    pub payout: Option<Decimal>,
    pub placed_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub revision: u32,
}

/// How an upsert changed the escrowed stake
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StakeChange {
    pub previous: Decimal,
    pub new: Decimal,
}

impl StakeChange {
    /// Positive: escrow more. Negative: refund.
    pub fn delta(&self) -> Decimal {
        self.new - self.previous
    }
}

/// Reject negative stakes and cash on contests that don't take cash
pub fn validate_stakes(settings: &ContestSettings, contest_id: &str, virtual_stake: Decimal, cash_stake: Decimal) -> ContestResult<()> {
    if virtual_stake.is_sign_negative() {
        return Err(ContestError::InvalidAmount(virtual_stake));
    }
    if cash_stake.is_sign_negative() {
        return Err(ContestError::InvalidAmount(cash_stake));
    }
    if cash_stake > Decimal::ZERO && !settings.allow_cash_wagers {
        return Err(ContestError::CashWagersDisabled(contest_id.to_string()));
    }
    Ok(())
}

// ============================================================================
// SETTLEMENT
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payout {
    pub wager_id: String,
    pub bettor_id: String,
    pub stake: Decimal,
    pub amount: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CashWinner {
    pub bettor_id: String,
    pub cash_stake: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettlementReport {
    pub contest_id: String,
    pub placement: Ranking,
    pub policy: PayoutPolicy,
    pub pot: Decimal,
    pub distributable_pot: Decimal,
    pub total_winning_stake: Decimal,
    pub forfeited_stake: Decimal,
    /// One entry per winning wager with a positive payout
    pub payouts: Vec<Payout>,
    pub winning_wager_ids: Vec<String>,
    pub losing_wager_ids: Vec<String>,
    pub cash_winners: Vec<CashWinner>,
    pub settled_at: DateTime<Utc>,
}

impl SettlementReport {
    pub fn total_paid(&self) -> Decimal {
        self.payouts.iter().map(|p| p.amount).sum()
    }
}

fn truncate(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(PAYOUT_SCALE, RoundingStrategy::ToZero)
}

/// Pure payout computation over a wager set and the final placement
pub fn compute_settlement<'a>(
    contest_id: &str,
    wagers: impl IntoIterator<Item = &'a Wager>,
    placement: Ranking,
    settings: &ContestSettings,
) -> SettlementReport {
    let (winners, losers): (Vec<&Wager>, Vec<&Wager>) =
        wagers.into_iter().partition(|w| w.prediction == placement);

    let total_winning_stake: Decimal = winners.iter().map(|w| w.virtual_stake).sum();
    let forfeited_stake: Decimal = losers.iter().map(|w| w.virtual_stake).sum();
    let distributable_pot = if settings.pot_includes_forfeits {
        settings.pot + forfeited_stake
    } else {
        settings.pot
    };

    let payouts = winners
        .iter()
        .filter(|w| w.virtual_stake > Decimal::ZERO)
        .map(|w| {
            let amount = match &settings.payout_policy {
                PayoutPolicy::PotSplit => {
                    w.virtual_stake + distributable_pot * w.virtual_stake / total_winning_stake
                }
                PayoutPolicy::FixedMultiplier { multiplier } => w.virtual_stake * *multiplier,
            };
            Payout {
                wager_id: w.id.clone(),
                bettor_id: w.bettor_id.clone(),
                stake: w.virtual_stake,
                amount: truncate(amount),
            }
        })
        .filter(|p| p.amount > Decimal::ZERO)
        .collect();

    let cash_winners = winners
        .iter()
        .filter(|w| w.cash_stake > Decimal::ZERO)
        .map(|w| CashWinner {
            bettor_id: w.bettor_id.clone(),
            cash_stake: w.cash_stake,
        })
        .collect();

    SettlementReport {
        contest_id: contest_id.to_string(),
        placement,
        policy: settings.payout_policy.clone(),
        pot: settings.pot,
        distributable_pot,
        total_winning_stake,
        forfeited_stake,
        payouts,
        winning_wager_ids: winners.iter().map(|w| w.id.clone()).collect(),
        losing_wager_ids: losers.iter().map(|w| w.id.clone()).collect(),
        cash_winners,
        settled_at: Utc::now(),
    }
}

// ============================================================================
// WAGER BOOK
// ============================================================================

/// Wagers of one contest keyed by bettor id
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WagerBook {
    wagers: BTreeMap<String, Wager>,
}

impl WagerBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_wagers(wagers: impl IntoIterator<Item = Wager>) -> Self {
        Self {
            wagers: wagers.into_iter().map(|w| (w.bettor_id.clone(), w)).collect(),
        }
    }

    pub fn get(&self, bettor_id: &str) -> Option<&Wager> {
        self.wagers.get(bettor_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Wager> {
        self.wagers.values()
    }

    pub fn len(&self) -> usize {
        self.wagers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.wagers.is_empty()
    }

    /// Stake currently escrowed for a bettor
    pub fn escrowed(&self, bettor_id: &str) -> Decimal {
        self.wagers
            .get(bettor_id)
            .filter(|w| w.status == WagerStatus::Open)
            .map(|w| w.virtual_stake)
            .unwrap_or(Decimal::ZERO)
    }

    pub fn total_escrowed(&self) -> Decimal {
        self.wagers
            .values()
            .filter(|w| w.status == WagerStatus::Open)
            .map(|w| w.virtual_stake)
            .sum()
    }

    /// True when the bettor already holds exactly this wager
    pub fn is_unchanged(&self, bettor_id: &str, prediction: &Prediction, virtual_stake: Decimal, cash_stake: Decimal) -> bool {
        self.wagers.get(bettor_id).map_or(false, |w| {
            w.prediction == *prediction && w.virtual_stake == virtual_stake && w.cash_stake == cash_stake
        })
    }

    /// Replace-or-insert; returns the stored wager and the stake movement
    pub fn upsert(
        &mut self,
        contest_id: &str,
        bettor_id: &str,
        prediction: Prediction,
        virtual_stake: Decimal,
        cash_stake: Decimal,
    ) -> (Wager, StakeChange) {
        let now = Utc::now();
        match self.wagers.get_mut(bettor_id) {
            Some(existing) => {
                let change = StakeChange {
                    previous: existing.virtual_stake,
                    new: virtual_stake,
                };
                existing.prediction = prediction;
                existing.virtual_stake = virtual_stake;
                existing.cash_stake = cash_stake;
                existing.updated_at = now;
                existing.revision += 1;
                (existing.clone(), change)
            }
            None => {
                let wager = Wager {
                    id: uuid::Uuid::new_v4().to_string(),
                    contest_id: contest_id.to_string(),
                    bettor_id: bettor_id.to_string(),
                    prediction,
                    virtual_stake,
                    cash_stake,
                    status: WagerStatus::Open,
                    payout: None,
                    placed_at: now,
                    updated_at: now,
                    revision: 1,
                };
                self.wagers.insert(bettor_id.to_string(), wager.clone());
                (
                    wager,
                    StakeChange {
                        previous: Decimal::ZERO,
                        new: virtual_stake,
                    },
                )
            }
        }
    }

    /// Compute the settlement and mark every wager won or lost
    pub fn settle(&mut self, contest_id: &str, placement: &Placement, settings: &ContestSettings) -> SettlementReport {
        let report = compute_settlement(contest_id, self.wagers.values(), placement.as_ranking(), settings);

        let paid: BTreeMap<&str, Decimal> = report
            .payouts
            .iter()
            .map(|p| (p.wager_id.as_str(), p.amount))
            .collect();

        for wager in self.wagers.values_mut() {
            if wager.prediction == report.placement {
                wager.status = WagerStatus::Won;
                wager.payout = Some(paid.get(wager.id.as_str()).copied().unwrap_or(Decimal::ZERO));
            } else {
                wager.status = WagerStatus::Lost;
                wager.payout = None;
            }
            wager.updated_at = report.settled_at;
        }

        report
    }
}
