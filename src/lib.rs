/// Blind Contest & Wagering Engine
/// Exports all modules for use as a library crate

pub mod activity;
pub mod app_state;
pub mod config;
pub mod contest;
pub mod engine;
pub mod error;
pub mod handlers;
pub mod ledger;
pub mod membership;
pub mod models;
pub mod routes;
pub mod store;

// Re-export from contest (lifecycle, entries, ballots, wagers)
pub use contest::{
    aggregate, compute_settlement, Ballot, BallotBox, Contest, ContestPhase, ContestSettings, Entry, EntryPayload,
    EntryRating, EntryRegistry, EntryView, Operation, PayoutPolicy, PhaseChange, Placement, PointWeights, Ranking,
    RatingScale, SettlementReport, TransitionTrigger, Wager, WagerBook, WagerStatus,
};

pub use activity::{ActivityDispatcher, ActivityEvent, ActivityFeed, ActivityReceiver, ActivitySink};
pub use app_state::{AppState, SharedState};
pub use config::EngineConfig;
pub use engine::{BallotStatus, ContestEngine, ContestRecord, EngineState};
pub use error::{ContestError, ContestResult};
pub use ledger::{Ledger, LedgerStats, LedgerTransaction, TxContext, TxKind};
pub use membership::{MembershipService, TripMember, TripRoster};
pub use routes::build_router;
pub use store::{SledStore, SnapshotStats};
