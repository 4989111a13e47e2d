// ============================================================================
// Contest Phases - legality table and transition rules
// ============================================================================
//
//   SETUP -> OPEN -> SCORING -> REVEAL -> COMPLETE
//
// Every mutating operation is listed once in PHASE_RULES together with the
// phases it may run in. The engine consults `ensure_allowed` before touching
// any state, so phase checks are never scattered across call sites.
//
// ============================================================================

use crate::error::{ContestError, ContestResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lifecycle stage of a contest. Ordering follows the lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ContestPhase {
    Setup,
    Open,
    Scoring,
    Reveal,
    Complete,
}

impl ContestPhase {
    pub const ALL: [ContestPhase; 5] = [
        ContestPhase::Setup,
        ContestPhase::Open,
        ContestPhase::Scoring,
        ContestPhase::Reveal,
        ContestPhase::Complete,
    ];

    /// The only phase this one may advance into
    pub fn successor(self) -> Option<ContestPhase> {
        match self {
            ContestPhase::Setup => Some(ContestPhase::Open),
            ContestPhase::Open => Some(ContestPhase::Scoring),
            ContestPhase::Scoring => Some(ContestPhase::Reveal),
            ContestPhase::Reveal => Some(ContestPhase::Complete),
            ContestPhase::Complete => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        self == ContestPhase::Complete
    }

    /// Placement and entry payloads are public from REVEAL on
    pub fn is_revealed(self) -> bool {
        self >= ContestPhase::Reveal
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ContestPhase::Setup => "SETUP",
            ContestPhase::Open => "OPEN",
            ContestPhase::Scoring => "SCORING",
            ContestPhase::Reveal => "REVEAL",
            ContestPhase::Complete => "COMPLETE",
        }
    }
}

impl fmt::Display for ContestPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContestPhase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ContestPhase::ALL
            .iter()
            .copied()
            .find(|p| p.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("Unknown phase: {}", s))
    }
}

/// Phase-gated mutating operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    SubmitEntry,
    WithdrawEntry,
    AssignBagNumbers,
    SubmitBallot,
    PlaceWager,
}

impl Operation {
    pub fn as_str(self) -> &'static str {
        match self {
            Operation::SubmitEntry => "submit_entry",
            Operation::WithdrawEntry => "withdraw_entry",
            Operation::AssignBagNumbers => "assign_bag_numbers",
            Operation::SubmitBallot => "submit_ballot",
            Operation::PlaceWager => "place_wager",
        }
    }

    pub fn allowed_phases(self) -> &'static [ContestPhase] {
        PHASE_RULES
            .iter()
            .find(|(op, _)| *op == self)
            .map(|(_, phases)| *phases)
            .unwrap_or(&[])
    }

    pub fn is_allowed_in(self, phase: ContestPhase) -> bool {
        self.allowed_phases().contains(&phase)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// (operation, phases it may run in)
pub const PHASE_RULES: &[(Operation, &[ContestPhase])] = &[
    (Operation::SubmitEntry, &[ContestPhase::Setup, ContestPhase::Open]),
    (Operation::WithdrawEntry, &[ContestPhase::Setup, ContestPhase::Open]),
    (Operation::AssignBagNumbers, &[ContestPhase::Open]),
    (Operation::SubmitBallot, &[ContestPhase::Scoring]),
    (Operation::PlaceWager, &[ContestPhase::Scoring]),
];

/// Guard consulted before every mutating call
pub fn ensure_allowed(operation: Operation, current: ContestPhase) -> ContestResult<()> {
    if operation.is_allowed_in(current) {
        Ok(())
    } else {
        Err(ContestError::PhaseViolation { operation, current })
    }
}

/// Only the immediate successor is a legal target
pub fn check_transition(from: ContestPhase, to: ContestPhase) -> ContestResult<()> {
    if from.successor() == Some(to) {
        Ok(())
    } else {
        Err(ContestError::InvalidTransition { from, to })
    }
}
