// ============================================================================
// Ballot Aggregator - top-3 ballots and placement
// ============================================================================
//
// Ballots reference entries by bag number only. At REVEAL the frozen ballot
// set is folded into a Placement:
//
//   1. first/second/third earn the contest's point weights (default 5/3/1)
//   2. points are summed per entry
//   3. numeric ratings are averaged per entry (0 when nobody rated it)
//   4. entries rank by points, then average rating, then submission time,
//      then submission sequence
//
// `aggregate` is pure: the same entries and ballots always give the same
// Placement, which is what makes a retried REVEAL safe.
//
// ============================================================================

use super::{EntryRegistry, PointWeights, RatingScale, RANKED_PLACES};
use crate::error::{ContestError, ContestResult};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap, HashSet};

// ============================================================================
// RANKING
// ============================================================================

/// Ordered top-3 by bag number. Also used for wager predictions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Ranking {
    pub first: u32,
    pub second: u32,
    pub third: u32,
}

impl Ranking {
    pub fn new(first: u32, second: u32, third: u32) -> Self {
        Self { first, second, third }
    }

    pub fn as_array(&self) -> [u32; RANKED_PLACES] {
        [self.first, self.second, self.third]
    }

    /// Three distinct bag numbers, all present in `entries`
    pub fn validate(&self, entries: &EntryRegistry) -> ContestResult<()> {
        let bags = self.as_array();

        let distinct: HashSet<u32> = bags.iter().copied().collect();
        if distinct.len() != RANKED_PLACES {
            return Err(ContestError::InvalidRanking(format!(
                "ranked entries must be distinct, got {}/{}/{}",
                self.first, self.second, self.third
            )));
        }

        for bag in bags {
            if entries.by_bag(bag).is_none() {
                return Err(ContestError::InvalidRanking(format!(
                    "bag {} is not an entry of this contest",
                    bag
                )));
            }
        }
        Ok(())
    }
}

/// Optional per-entry rating attached to a ballot
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntryRating {
    #[serde(default)]
    pub score: Option<Decimal>,
    #[serde(default)]
    pub notes: Option<String>,
}

pub fn validate_ratings(
    ratings: &BTreeMap<u32, EntryRating>,
    entries: &EntryRegistry,
    scale: &RatingScale,
) -> ContestResult<()> {
    for (bag, rating) in ratings {
        if entries.by_bag(*bag).is_none() {
            return Err(ContestError::InvalidRating(format!("bag {} is not an entry of this contest", bag)));
        }
        if let Some(score) = rating.score {
            if !scale.contains(score) {
                return Err(ContestError::InvalidRating(format!(
                    "score {} for bag {} is outside {}..={}",
                    score, bag, scale.min, scale.max
                )));
            }
        }
    }
    Ok(())
}

// ============================================================================
// BALLOT BOX
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ballot {
    pub contest_id: String,
    pub participant_id: String,
    pub ranking: Ranking,
    #[serde(default)]
    pub ratings: BTreeMap<u32, EntryRating>,
    pub submitted_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Bumped on every resubmission
    pub revision: u32,
}

/// At most one ballot per participant, keyed by participant id
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BallotBox {
    ballots: BTreeMap<String, Ballot>,
}

impl BallotBox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_ballots(ballots: impl IntoIterator<Item = Ballot>) -> Self {
        Self {
            ballots: ballots.into_iter().map(|b| (b.participant_id.clone(), b)).collect(),
        }
    }

    /// Replace-or-insert. Returns true when an earlier ballot was replaced.
    pub fn upsert(
        &mut self,
        contest_id: &str,
        participant_id: &str,
        ranking: Ranking,
        ratings: BTreeMap<u32, EntryRating>,
    ) -> bool {
        let now = Utc::now();
        match self.ballots.get_mut(participant_id) {
            Some(existing) => {
                existing.ranking = ranking;
                existing.ratings = ratings;
                existing.updated_at = now;
                existing.revision += 1;
                true
            }
            None => {
                self.ballots.insert(
                    participant_id.to_string(),
                    Ballot {
                        contest_id: contest_id.to_string(),
                        participant_id: participant_id.to_string(),
                        ranking,
                        ratings,
                        submitted_at: now,
                        updated_at: now,
                        revision: 1,
                    },
                );
                false
            }
        }
    }

    pub fn get(&self, participant_id: &str) -> Option<&Ballot> {
        self.ballots.get(participant_id)
    }

    pub fn has_voted(&self, participant_id: &str) -> bool {
        self.ballots.contains_key(participant_id)
    }

    pub fn voters(&self) -> impl Iterator<Item = &str> {
        self.ballots.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.ballots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ballots.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Ballot> {
        self.ballots.values()
    }
}

// ============================================================================
// AGGREGATION
// ============================================================================

/// Per-entry aggregation result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryTally {
    pub entry_id: String,
    pub bag_number: u32,
    pub total_points: u32,
    /// Votes per place: [first, second, third]
    pub place_votes: [u32; RANKED_PLACES],
    pub rating_count: u32,
    pub avg_rating: Decimal,
    pub submitted_at: DateTime<Utc>,
    pub seq: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlacedEntry {
    pub entry_id: String,
    pub bag_number: u32,
    pub total_points: u32,
}

impl From<&EntryTally> for PlacedEntry {
    fn from(tally: &EntryTally) -> Self {
        Self {
            entry_id: tally.entry_id.clone(),
            bag_number: tally.bag_number,
            total_points: tally.total_points,
        }
    }
}

/// Final (winner, second, third) with the full ranked tally
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Placement {
    pub winner: PlacedEntry,
    pub second: PlacedEntry,
    pub third: PlacedEntry,
    /// Every entry in final rank order
    pub tallies: Vec<EntryTally>,
    pub ballot_count: usize,
}

impl Placement {
    /// Placement as bag numbers, comparable with a wager prediction
    pub fn as_ranking(&self) -> Ranking {
        Ranking::new(self.winner.bag_number, self.second.bag_number, self.third.bag_number)
    }

    pub fn tally_for_bag(&self, bag_number: u32) -> Option<&EntryTally> {
        self.tallies.iter().find(|t| t.bag_number == bag_number)
    }
}

/// Fold frozen ballots into a placement
pub fn aggregate(entries: &EntryRegistry, ballots: &BallotBox, weights: &PointWeights) -> ContestResult<Placement> {
    entries.ensure_enough()?;

    let mut tallies: HashMap<u32, EntryTally> = HashMap::new();
    for entry in entries.iter() {
        let bag = entry.bag_number.ok_or_else(|| {
            ContestError::IncompleteAssignment(format!("entry {} has no bag number", entry.id))
        })?;
        tallies.insert(
            bag,
            EntryTally {
                entry_id: entry.id.clone(),
                bag_number: bag,
                total_points: 0,
                place_votes: [0; RANKED_PLACES],
                rating_count: 0,
                avg_rating: Decimal::ZERO,
                submitted_at: entry.submitted_at,
                seq: entry.seq,
            },
        );
    }

    let mut rating_sums: HashMap<u32, Decimal> = HashMap::new();
    for ballot in ballots.iter() {
        for (rank, bag) in ballot.ranking.as_array().into_iter().enumerate() {
            // Ballots are validated on submit; unknown bags contribute nothing
            if let Some(tally) = tallies.get_mut(&bag) {
                tally.total_points = tally
                    .total_points
                    .checked_add(weights.for_rank(rank))
                    .ok_or_else(|| {
                        ContestError::InvalidSettings(format!("point total for bag {} overflows", bag))
                    })?;
                tally.place_votes[rank] += 1;
            }
        }
        for (bag, rating) in &ballot.ratings {
            if let (Some(score), Some(tally)) = (rating.score, tallies.get_mut(bag)) {
                tally.rating_count += 1;
                *rating_sums.entry(*bag).or_insert(Decimal::ZERO) += score;
            }
        }
    }

    for (bag, sum) in rating_sums {
        if let Some(tally) = tallies.get_mut(&bag) {
            if tally.rating_count > 0 {
                tally.avg_rating = sum / Decimal::from(tally.rating_count);
            }
        }
    }

    let mut ranked: Vec<EntryTally> = tallies.into_values().collect();
    ranked.sort_by(|a, b| {
        (Reverse(a.total_points), Reverse(a.avg_rating), a.submitted_at, a.seq)
            .cmp(&(Reverse(b.total_points), Reverse(b.avg_rating), b.submitted_at, b.seq))
    });

    Ok(Placement {
        winner: PlacedEntry::from(&ranked[0]),
        second: PlacedEntry::from(&ranked[1]),
        third: PlacedEntry::from(&ranked[2]),
        tallies: ranked,
        ballot_count: ballots.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contest::EntryPayload;
    use chrono::Duration;
    use rust_decimal_macros::dec;

    /// Registry with entries bagged 1..=n in submission order
    fn bagged_registry(n: u32) -> EntryRegistry {
        let mut registry = EntryRegistry::new();
        let mut ids = Vec::new();
        for i in 1..=n {
            let entry = registry
                .submit("c1", &format!("submitter{}", i), EntryPayload::named(format!("Wine {}", i)), i as u64)
                .unwrap();
            ids.push(entry.id.clone());
        }
        let batch: Vec<(String, u32)> = ids.into_iter().zip(1..=n).collect();
        registry.assign_bag_numbers(&batch).unwrap();
        registry
    }

    fn ballot(box_: &mut BallotBox, who: &str, first: u32, second: u32, third: u32) {
        box_.upsert("c1", who, Ranking::new(first, second, third), BTreeMap::new());
    }

    fn rated(box_: &mut BallotBox, who: &str, ranking: Ranking, scores: &[(u32, Decimal)]) {
        let ratings = scores
            .iter()
            .map(|(bag, score)| (*bag, EntryRating { score: Some(*score), notes: None }))
            .collect();
        box_.upsert("c1", who, ranking, ratings);
    }

    #[test]
    fn test_weighted_totals_and_placement() {
        let entries = bagged_registry(3);
        let mut ballots = BallotBox::new();
        ballot(&mut ballots, "alice", 1, 2, 3);
        ballot(&mut ballots, "bob", 1, 3, 2);
        ballot(&mut ballots, "carol", 2, 1, 3);

        let placement = aggregate(&entries, &ballots, &PointWeights::default()).unwrap();

        assert_eq!(placement.as_ranking(), Ranking::new(1, 2, 3));
        assert_eq!(placement.winner.total_points, 13);
        assert_eq!(placement.second.total_points, 9);
        assert_eq!(placement.third.total_points, 5);
        assert_eq!(placement.tally_for_bag(1).unwrap().place_votes, [2, 1, 0]);
        assert_eq!(placement.ballot_count, 3);
    }

    #[test]
    fn test_aggregation_is_idempotent() {
        let entries = bagged_registry(5);
        let mut ballots = BallotBox::new();
        ballot(&mut ballots, "alice", 4, 2, 5);
        ballot(&mut ballots, "bob", 2, 4, 1);
        rated(&mut ballots, "carol", Ranking::new(5, 4, 3), &[(4, dec!(8)), (5, dec!(6.5))]);

        let first = aggregate(&entries, &ballots, &PointWeights::default()).unwrap();
        let second = aggregate(&entries, &ballots, &PointWeights::default()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_points_tie_broken_by_average_rating() {
        let entries = bagged_registry(3);
        let mut ballots = BallotBox::new();
        // Bags 1 and 2 both score 8 points
        rated(&mut ballots, "alice", Ranking::new(1, 2, 3), &[(1, dec!(6)), (2, dec!(9))]);
        rated(&mut ballots, "bob", Ranking::new(2, 1, 3), &[(2, dec!(7))]);

        let placement = aggregate(&entries, &ballots, &PointWeights::default()).unwrap();
        assert_eq!(placement.winner.total_points, placement.second.total_points);
        assert_eq!(placement.as_ranking(), Ranking::new(2, 1, 3));
        assert_eq!(placement.tally_for_bag(2).unwrap().avg_rating, dec!(8));
        assert_eq!(placement.tally_for_bag(1).unwrap().avg_rating, dec!(6));
        assert_eq!(placement.tally_for_bag(3).unwrap().rating_count, 0);
        assert_eq!(placement.tally_for_bag(3).unwrap().avg_rating, Decimal::ZERO);
    }

    #[test]
    fn test_residual_tie_broken_by_submission_time() {
        let mut entries = bagged_registry(4);
        // Make bag 4 the oldest submission
        let oldest = entries.iter().map(|e| e.submitted_at).min().unwrap() - Duration::seconds(60);
        let mut all: Vec<_> = entries.iter().cloned().collect();
        for e in all.iter_mut() {
            if e.bag_number == Some(4) {
                e.submitted_at = oldest;
            }
        }
        entries = EntryRegistry::from_entries(all);

        // No ballots at all: every entry ties on points and rating
        let placement = aggregate(&entries, &BallotBox::new(), &PointWeights::default()).unwrap();
        assert_eq!(placement.winner.bag_number, 4);
        assert_eq!(placement.tallies.len(), 4);
        assert!(placement.tallies.iter().all(|t| t.total_points == 0));
    }

    #[test]
    fn test_custom_weights() {
        let entries = bagged_registry(3);
        let mut ballots = BallotBox::new();
        ballot(&mut ballots, "alice", 3, 2, 1);
        ballot(&mut ballots, "bob", 1, 2, 3);

        let weights = PointWeights { first: 10, second: 9, third: 0 };
        let placement = aggregate(&entries, &ballots, &weights).unwrap();
        // bag 2 gets 18, bags 1 and 3 get 10 each; bag 1 was submitted first
        assert_eq!(placement.as_ranking(), Ranking::new(2, 1, 3));
        assert_eq!(placement.winner.total_points, 18);
    }

    #[test]
    fn test_point_overflow_is_an_error() {
        let entries = bagged_registry(3);
        let mut ballots = BallotBox::new();
        ballot(&mut ballots, "alice", 1, 2, 3);
        ballot(&mut ballots, "bob", 1, 2, 3);

        let weights = PointWeights { first: u32::MAX, second: 1, third: 0 };
        assert!(matches!(
            aggregate(&entries, &ballots, &weights),
            Err(ContestError::InvalidSettings(_))
        ));
    }

    #[test]
    fn test_ranking_validation() {
        let entries = bagged_registry(3);
        assert!(Ranking::new(1, 2, 3).validate(&entries).is_ok());
        assert!(matches!(
            Ranking::new(1, 1, 3).validate(&entries),
            Err(ContestError::InvalidRanking(_))
        ));
        assert!(matches!(
            Ranking::new(1, 2, 9).validate(&entries),
            Err(ContestError::InvalidRanking(_))
        ));
    }

    #[test]
    fn test_rating_validation() {
        let entries = bagged_registry(3);
        let scale = RatingScale::default();

        let mut ratings = BTreeMap::new();
        ratings.insert(2, EntryRating { score: Some(dec!(7.5)), notes: Some("jammy".into()) });
        assert!(validate_ratings(&ratings, &entries, &scale).is_ok());

        ratings.insert(3, EntryRating { score: Some(dec!(11)), notes: None });
        assert!(matches!(
            validate_ratings(&ratings, &entries, &scale),
            Err(ContestError::InvalidRating(_))
        ));

        let mut ratings = BTreeMap::new();
        ratings.insert(42, EntryRating::default());
        assert!(validate_ratings(&ratings, &entries, &scale).is_err());
    }

    #[test]
    fn test_upsert_replaces_ballot() {
        let mut ballots = BallotBox::new();
        assert!(!ballots.upsert("c1", "alice", Ranking::new(1, 2, 3), BTreeMap::new()));
        assert!(ballots.upsert("c1", "alice", Ranking::new(3, 2, 1), BTreeMap::new()));

        assert_eq!(ballots.len(), 1);
        let b = ballots.get("alice").unwrap();
        assert_eq!(b.ranking, Ranking::new(3, 2, 1));
        assert_eq!(b.revision, 2);
    }

    #[test]
    fn test_unbagged_entries_cannot_be_aggregated() {
        let mut registry = EntryRegistry::new();
        for i in 0..3 {
            registry.submit("c1", "p", EntryPayload::named(format!("Wine {}", i)), i).unwrap();
        }
        assert!(matches!(
            aggregate(&registry, &BallotBox::new(), &PointWeights::default()),
            Err(ContestError::IncompleteAssignment(_))
        ));
    }
}
