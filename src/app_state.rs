// Application state shared by the HTTP handlers

use crate::activity::{self, ActivityFeed, ActivityReceiver};
use crate::config::EngineConfig;
use crate::engine::{ContestEngine, EngineState};
use crate::error::ContestResult;
use crate::membership::TripRoster;
use crate::store::{SledStore, SnapshotStats};
use std::sync::Arc;

pub type SharedState = Arc<AppState>;

pub struct AppState {
    pub engine: ContestEngine,
    pub roster: Arc<TripRoster>,
    pub feed: Arc<ActivityFeed>,
    pub config: EngineConfig,
}

impl AppState {
    /// Wire engine, roster and activity channel around a loaded state.
    /// The receiver must be driven (spawned or drained) for the feed to fill.
    pub fn new(config: EngineConfig, state: EngineState, roster: TripRoster) -> (Self, ActivityReceiver) {
        let roster = Arc::new(roster);
        let feed = Arc::new(ActivityFeed::with_capacity(config.activity_capacity));
        let (dispatcher, receiver) = activity::channel();
        let engine = ContestEngine::from_state(state, roster.clone()).with_activity(dispatcher);

        (
            Self {
                engine,
                roster,
                feed,
                config,
            },
            receiver,
        )
    }

    pub fn in_memory(config: EngineConfig) -> (Self, ActivityReceiver) {
        Self::new(config, EngineState::default(), TripRoster::new())
    }

    /// Restore contests, ledger and roster from the store
    pub fn load(config: EngineConfig, store: &SledStore) -> ContestResult<(Self, ActivityReceiver)> {
        let state = store.load()?;
        let roster = TripRoster::from_members(store.load_members()?);
        Ok(Self::new(config, state, roster))
    }

    /// Consistent snapshot of engine state and roster
    pub fn snapshot(&self, store: &SledStore) -> ContestResult<SnapshotStats> {
        let stats = self.engine.with_state(|state| store.save(state))??;
        store.save_members(&self.roster.all_members())?;
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::membership::{MembershipService, TripMember};
    use rust_decimal_macros::dec;

    #[test]
    fn test_snapshot_and_reload() {
        let store = SledStore::temporary().unwrap();
        let (app, _receiver) = AppState::in_memory(EngineConfig::default());

        let member = TripMember::new("napa", "olivia", "Olivia", true);
        app.roster.join(member.clone());
        app.engine.welcome_member(&member, dec!(100)).unwrap();
        app.snapshot(&store).unwrap();

        let (reloaded, _receiver) = AppState::load(EngineConfig::default(), &store).unwrap();
        assert_eq!(reloaded.engine.get_balance("olivia").unwrap(), dec!(100));
        assert!(reloaded.roster.is_organizer("napa", "olivia"));
    }
}
