// ============================================================================
// Contest Module - Blind Contest Core
// ============================================================================
//
// This module contains the blind contest functionality:
//   - phase: lifecycle states and the (operation, allowed phases) table
//   - entries: blind entry registry and bag-number anonymization
//   - ballots: top-3 ballots and the placement aggregation
//   - wagers: wager book, escrow bookkeeping and settlement
//
// ============================================================================

pub mod phase;
pub mod entries;
pub mod ballots;
pub mod wagers;

pub use phase::*;
pub use entries::*;
pub use ballots::*;
pub use wagers::*;

use crate::error::{ContestError, ContestResult};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// Number of ranked places on a ballot and in the placement
pub const RANKED_PLACES: usize = 3;

/// Minimum entries required before scoring can start
pub const MIN_ENTRIES: usize = RANKED_PLACES;

// ============================================================================
// SETTINGS
// ============================================================================

/// Points awarded per ranked place on a ballot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PointWeights {
    pub first: u32,
    pub second: u32,
    pub third: u32,
}

/// Upper bound for any single point weight
pub const MAX_POINT_WEIGHT: u32 = 1_000_000;

impl Default for PointWeights {
    fn default() -> Self {
        Self { first: 5, second: 3, third: 1 }
    }
}

impl PointWeights {
    /// Points for a zero-based rank
    pub fn for_rank(&self, rank: usize) -> u32 {
        match rank {
            0 => self.first,
            1 => self.second,
            2 => self.third,
            _ => 0,
        }
    }
}

/// How winning wagers are paid out at settlement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PayoutPolicy {
    /// stake + pot * stake / total winning stake
    PotSplit,
    /// stake * multiplier
    FixedMultiplier { multiplier: Decimal },
}

impl Default for PayoutPolicy {
    fn default() -> Self {
        PayoutPolicy::PotSplit
    }
}

/// Accepted range for numeric ratings
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RatingScale {
    pub min: Decimal,
    pub max: Decimal,
}

impl Default for RatingScale {
    fn default() -> Self {
        Self { min: dec!(0), max: dec!(10) }
    }
}

impl RatingScale {
    pub fn contains(&self, score: Decimal) -> bool {
        score >= self.min && score <= self.max
    }
}

/// Participant-visible contest settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContestSettings {
    pub title: String,
    pub trip_id: String,
    #[serde(default)]
    pub point_weights: PointWeights,
    #[serde(default)]
    pub allow_cash_wagers: bool,
    /// Virtual currency added to winners' payouts under pot split
    #[serde(default)]
    pub pot: Decimal,
    #[serde(default)]
    pub payout_policy: PayoutPolicy,
    /// Under pot split, forfeited losing stakes join the pot
    #[serde(default)]
    pub pot_includes_forfeits: bool,
    #[serde(default)]
    pub rating_scale: RatingScale,
    /// SETUP -> OPEN on the first entry
    #[serde(default = "default_true")]
    pub auto_open: bool,
    /// SCORING -> REVEAL once every trip member has a ballot in
    #[serde(default = "default_true")]
    pub auto_reveal: bool,
    /// REVEAL -> COMPLETE right after settlement
    #[serde(default)]
    pub auto_complete: bool,
}

fn default_true() -> bool {
    true
}

impl ContestSettings {
    pub fn new(title: impl Into<String>, trip_id: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            trip_id: trip_id.into(),
            point_weights: PointWeights::default(),
            allow_cash_wagers: false,
            pot: Decimal::ZERO,
            payout_policy: PayoutPolicy::default(),
            pot_includes_forfeits: false,
            rating_scale: RatingScale::default(),
            auto_open: true,
            auto_reveal: true,
            auto_complete: false,
        }
    }

    pub fn validate(&self) -> ContestResult<()> {
        if self.title.trim().is_empty() {
            return Err(ContestError::InvalidSettings("title must not be empty".into()));
        }
        if self.trip_id.trim().is_empty() {
            return Err(ContestError::InvalidSettings("trip_id must not be empty".into()));
        }

        let w = &self.point_weights;
        if w.first == 0 || w.first < w.second || w.second < w.third {
            return Err(ContestError::InvalidSettings(format!(
                "point weights must be non-increasing with a positive first place, got {}/{}/{}",
                w.first, w.second, w.third
            )));
        }
        if w.first > MAX_POINT_WEIGHT {
            return Err(ContestError::InvalidSettings(format!(
                "point weights must not exceed {}, got {}",
                MAX_POINT_WEIGHT, w.first
            )));
        }

        if self.pot.is_sign_negative() {
            return Err(ContestError::InvalidSettings(format!("pot must not be negative, got {}", self.pot)));
        }

        if let PayoutPolicy::FixedMultiplier { multiplier } = &self.payout_policy {
            if *multiplier <= Decimal::ZERO {
                return Err(ContestError::InvalidSettings(format!(
                    "payout multiplier must be positive, got {}",
                    multiplier
                )));
            }
        }

        if self.rating_scale.min >= self.rating_scale.max {
            return Err(ContestError::InvalidSettings(format!(
                "rating scale min {} must be below max {}",
                self.rating_scale.min, self.rating_scale.max
            )));
        }

        Ok(())
    }
}

// ============================================================================
// CONTEST
// ============================================================================

/// What caused a phase change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransitionTrigger {
    Manual { by: String },
    Automatic { reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseChange {
    pub from: ContestPhase,
    pub to: ContestPhase,
    pub at: DateTime<Utc>,
    pub trigger: TransitionTrigger,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contest {
    pub id: String,
    pub settings: ContestSettings,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub phase: ContestPhase,
    #[serde(default)]
    pub phase_history: Vec<PhaseChange>,
    #[serde(default)]
    pub placement: Option<Placement>,
    #[serde(default)]
    pub settlement: Option<SettlementReport>,
    /// Next entry submission sequence number
    #[serde(default)]
    pub next_entry_seq: u64,
}

impl Contest {
    pub fn new(id: String, settings: ContestSettings, created_by: String) -> Self {
        Self {
            id,
            settings,
            created_by,
            created_at: Utc::now(),
            phase: ContestPhase::Setup,
            phase_history: Vec::new(),
            placement: None,
            settlement: None,
            next_entry_seq: 0,
        }
    }

    pub fn trip_id(&self) -> &str {
        &self.settings.trip_id
    }

    pub fn ensure_allowed(&self, operation: Operation) -> ContestResult<()> {
        phase::ensure_allowed(operation, self.phase)
    }

    /// Move to `to`, which must be the immediate successor
    pub fn transition(&mut self, to: ContestPhase, trigger: TransitionTrigger) -> ContestResult<PhaseChange> {
        check_transition(self.phase, to)?;
        let change = PhaseChange {
            from: self.phase,
            to,
            at: Utc::now(),
            trigger,
        };
        self.phase = to;
        self.phase_history.push(change.clone());
        Ok(change)
    }

    pub fn take_entry_seq(&mut self) -> u64 {
        let seq = self.next_entry_seq;
        self.next_entry_seq += 1;
        seq
    }

    pub fn is_settled(&self) -> bool {
        self.settlement.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contest() -> Contest {
        Contest::new("c1".into(), ContestSettings::new("Blind Pinot", "trip1"), "olivia".into())
    }

    #[test]
    fn test_default_settings_are_valid() {
        let settings = ContestSettings::new("Blind Pinot", "trip1");
        assert!(settings.validate().is_ok());
        assert_eq!(settings.point_weights, PointWeights { first: 5, second: 3, third: 1 });
        assert_eq!(settings.payout_policy, PayoutPolicy::PotSplit);
    }

    #[test]
    fn test_settings_validation() {
        let mut settings = ContestSettings::new("Blind Pinot", "trip1");
        settings.point_weights = PointWeights { first: 1, second: 3, third: 5 };
        assert!(matches!(settings.validate(), Err(ContestError::InvalidSettings(_))));

        let mut settings = ContestSettings::new("Blind Pinot", "trip1");
        settings.pot = dec!(-1);
        assert!(settings.validate().is_err());

        let mut settings = ContestSettings::new("Blind Pinot", "trip1");
        settings.payout_policy = PayoutPolicy::FixedMultiplier { multiplier: dec!(0) };
        assert!(settings.validate().is_err());

        let settings = ContestSettings::new("  ", "trip1");
        assert!(settings.validate().is_err());

        let mut settings = ContestSettings::new("Blind Pinot", "trip1");
        settings.point_weights = PointWeights { first: u32::MAX, second: 1, third: 0 };
        assert!(matches!(settings.validate(), Err(ContestError::InvalidSettings(_))));

        settings.point_weights = PointWeights { first: MAX_POINT_WEIGHT, second: 1, third: 0 };
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_transition_records_history() {
        let mut c = contest();
        c.transition(ContestPhase::Open, TransitionTrigger::Automatic { reason: "first entry".into() })
            .unwrap();
        c.transition(ContestPhase::Scoring, TransitionTrigger::Manual { by: "olivia".into() })
            .unwrap();

        assert_eq!(c.phase, ContestPhase::Scoring);
        assert_eq!(c.phase_history.len(), 2);
        assert_eq!(c.phase_history[1].from, ContestPhase::Open);

        // Regression is rejected and leaves the phase untouched
        let err = c
            .transition(ContestPhase::Open, TransitionTrigger::Manual { by: "olivia".into() })
            .unwrap_err();
        assert!(matches!(err, ContestError::InvalidTransition { .. }));
        assert_eq!(c.phase, ContestPhase::Scoring);
        assert_eq!(c.phase_history.len(), 2);
    }

    #[test]
    fn test_settings_json_defaults() {
        let settings: ContestSettings =
            serde_json::from_str(r#"{"title":"Blind Syrah","trip_id":"napa"}"#).unwrap();
        assert!(settings.auto_open);
        assert!(settings.auto_reveal);
        assert!(!settings.auto_complete);
        assert_eq!(settings.pot, Decimal::ZERO);

        let settings: ContestSettings = serde_json::from_str(
            r#"{"title":"Blind Syrah","trip_id":"napa","payout_policy":{"kind":"fixed_multiplier","multiplier":"2.5"}}"#,
        )
        .unwrap();
        assert_eq!(settings.payout_policy, PayoutPolicy::FixedMultiplier { multiplier: dec!(2.5) });
    }
}
