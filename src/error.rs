// ============================================================================
// Error Types - Blind Contest Engine
// ============================================================================
//
// Every engine operation returns ContestResult<T>. Validation errors are
// local and leave no partial state; Storage is the only infrastructure kind.
//
// ============================================================================

use crate::contest::{ContestPhase, Operation};
use rust_decimal::Decimal;

/// Result type for engine operations
pub type ContestResult<T> = Result<T, ContestError>;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ContestError {
    #[error("Contest not found: {0}")]
    ContestNotFound(String),

    #[error("Entry not found: {0}")]
    EntryNotFound(String),

    #[error("Invalid entry: {0}")]
    InvalidEntry(String),

    #[error("{operation} is not allowed while the contest is in {current}")]
    PhaseViolation {
        operation: Operation,
        current: ContestPhase,
    },

    #[error("Invalid transition: {from} -> {to}")]
    InvalidTransition {
        from: ContestPhase,
        to: ContestPhase,
    },

    #[error("Bag number {0} is assigned more than once")]
    DuplicateBagNumber(u32),

    #[error("Incomplete bag assignment: {0}")]
    IncompleteAssignment(String),

    #[error("Bag numbers must be positive, got {0}")]
    InvalidBagNumber(u32),

    #[error("Not enough entries: need {required}, have {found}")]
    NotEnoughEntries { required: usize, found: usize },

    #[error("Invalid ranking: {0}")]
    InvalidRanking(String),

    #[error("Invalid rating: {0}")]
    InvalidRating(String),

    #[error("Invalid amount: {0}")]
    InvalidAmount(Decimal),

    #[error("Insufficient funds: available {available}, required {required}")]
    InsufficientFunds { available: Decimal, required: Decimal },

    #[error("Cash wagers are disabled for contest {0}")]
    CashWagersDisabled(String),

    #[error("Placement for contest {0} is not revealed yet")]
    NotRevealedYet(String),

    #[error("{user} is not a member of trip {trip}")]
    NotAMember { user: String, trip: String },

    #[error("{user} is not an organizer of trip {trip}")]
    NotOrganizer { user: String, trip: String },

    #[error("Invalid settings: {0}")]
    InvalidSettings(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

impl ContestError {
    /// Stable machine-readable name of the error kind
    pub fn kind(&self) -> &'static str {
        match self {
            ContestError::ContestNotFound(_) => "ContestNotFound",
            ContestError::EntryNotFound(_) => "EntryNotFound",
            ContestError::InvalidEntry(_) => "InvalidEntry",
            ContestError::PhaseViolation { .. } => "PhaseViolation",
            ContestError::InvalidTransition { .. } => "InvalidTransition",
            ContestError::DuplicateBagNumber(_) => "DuplicateBagNumber",
            ContestError::IncompleteAssignment(_) => "IncompleteAssignment",
            ContestError::InvalidBagNumber(_) => "InvalidBagNumber",
            ContestError::NotEnoughEntries { .. } => "NotEnoughEntries",
            ContestError::InvalidRanking(_) => "InvalidRanking",
            ContestError::InvalidRating(_) => "InvalidRating",
            ContestError::InvalidAmount(_) => "InvalidAmount",
            ContestError::InsufficientFunds { .. } => "InsufficientFunds",
            ContestError::CashWagersDisabled(_) => "CashWagersDisabled",
            ContestError::NotRevealedYet(_) => "NotRevealedYet",
            ContestError::NotAMember { .. } => "NotAMember",
            ContestError::NotOrganizer { .. } => "NotOrganizer",
            ContestError::InvalidSettings(_) => "InvalidSettings",
            ContestError::Storage(_) => "Storage",
        }
    }

    /// Storage failures are the only kind the caller cannot fix by changing input
    pub fn is_infrastructure(&self) -> bool {
        matches!(self, ContestError::Storage(_))
    }
}

impl From<sled::Error> for ContestError {
    fn from(e: sled::Error) -> Self {
        ContestError::Storage(e.to_string())
    }
}

impl From<serde_json::Error> for ContestError {
    fn from(e: serde_json::Error) -> Self {
        ContestError::Storage(format!("Serialization failed: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_error_display() {
        let err = ContestError::InsufficientFunds {
            available: dec!(60),
            required: dec!(70),
        };
        assert_eq!(err.to_string(), "Insufficient funds: available 60, required 70");
        assert_eq!(err.kind(), "InsufficientFunds");
        assert!(!err.is_infrastructure());
    }

    #[test]
    fn test_phase_violation_display() {
        let err = ContestError::PhaseViolation {
            operation: Operation::SubmitBallot,
            current: ContestPhase::Setup,
        };
        assert!(err.to_string().contains("submit_ballot"));
        assert!(err.to_string().contains("SETUP"));
    }
}
