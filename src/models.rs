// Request and query bodies for the contest HTTP API

use crate::contest::{ContestPhase, EntryRating, Ranking};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ===== TRIPS =====

#[derive(Debug, Clone, Default, Deserialize)]
pub struct JoinTripRequest {
    /// Defaults to the acting participant
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub is_organizer: bool,
}

// ===== CONTESTS =====

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ContestListQuery {
    pub trip_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BagAssignment {
    pub entry_id: String,
    pub bag_number: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AssignBagsRequest {
    pub assignments: Vec<BagAssignment>,
}

impl AssignBagsRequest {
    pub fn pairs(&self) -> Vec<(String, u32)> {
        self.assignments
            .iter()
            .map(|a| (a.entry_id.clone(), a.bag_number))
            .collect()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AdvancePhaseRequest {
    pub target: ContestPhase,
}

// ===== BALLOTS & WAGERS =====

#[derive(Debug, Clone, Deserialize)]
pub struct SubmitBallotRequest {
    pub first: u32,
    pub second: u32,
    pub third: u32,
    /// Keyed by bag number
    #[serde(default)]
    pub ratings: BTreeMap<u32, EntryRating>,
}

impl SubmitBallotRequest {
    pub fn ranking(&self) -> Ranking {
        Ranking::new(self.first, self.second, self.third)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlaceWagerRequest {
    pub first: u32,
    pub second: u32,
    pub third: u32,
    pub virtual_stake: Decimal,
    #[serde(default)]
    pub cash_stake: Decimal,
}

impl PlaceWagerRequest {
    pub fn prediction(&self) -> Ranking {
        Ranking::new(self.first, self.second, self.third)
    }
}

// ===== LEDGER =====

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LedgerQuery {
    pub contest_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BonusRequest {
    pub trip_id: String,
    pub amount: Decimal,
    #[serde(default)]
    pub memo: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ActivityQuery {
    pub limit: Option<usize>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_ballot_request_with_ratings() {
        let req: SubmitBallotRequest = serde_json::from_str(
            r#"{"first":2,"second":1,"third":3,"ratings":{"2":{"score":"8.5","notes":"jammy"}}}"#,
        )
        .unwrap();
        assert_eq!(req.ranking(), Ranking::new(2, 1, 3));
        assert_eq!(req.ratings[&2].score, Some(dec!(8.5)));
    }

    #[test]
    fn test_wager_request_defaults_cash() {
        let req: PlaceWagerRequest =
            serde_json::from_str(r#"{"first":1,"second":2,"third":3,"virtual_stake":40}"#).unwrap();
        assert_eq!(req.virtual_stake, dec!(40));
        assert_eq!(req.cash_stake, Decimal::ZERO);
    }

    #[test]
    fn test_phase_request_parses_uppercase() {
        let req: AdvancePhaseRequest = serde_json::from_str(r#"{"target":"REVEAL"}"#).unwrap();
        assert_eq!(req.target, ContestPhase::Reveal);
    }
}
