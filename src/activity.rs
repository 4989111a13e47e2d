// ============================================================================
// Activity Log - audit trail of contest activity
// ============================================================================
//
// The engine publishes ActivityEvents after a mutation has committed and its
// lock is released. Events travel over an unbounded tokio channel to a sink;
// a sink failure is logged and never reaches the caller.
//
// Events never carry entry payloads, so the feed stays blind until REVEAL.
//
// ============================================================================

use crate::contest::{ContestPhase, TransitionTrigger};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ActivityEvent {
    MemberJoined {
        trip_id: String,
        user_id: String,
        starting_balance: Decimal,
    },
    ContestCreated {
        contest_id: String,
        trip_id: String,
        title: String,
        by: String,
    },
    EntrySubmitted {
        contest_id: String,
        submitter_id: String,
        entry_count: usize,
    },
    EntryWithdrawn {
        contest_id: String,
        entry_id: String,
        by: String,
    },
    BagsAssigned {
        contest_id: String,
        count: usize,
    },
    PhaseChanged {
        contest_id: String,
        from: ContestPhase,
        to: ContestPhase,
        trigger: TransitionTrigger,
    },
    BallotSubmitted {
        contest_id: String,
        participant_id: String,
        replaced: bool,
    },
    WagerPlaced {
        contest_id: String,
        bettor_id: String,
        stake: Decimal,
        delta: Decimal,
    },
    ContestSettled {
        contest_id: String,
        winner_bag: u32,
        winning_wagers: usize,
        total_paid: Decimal,
    },
    BonusGranted {
        participant_id: String,
        amount: Decimal,
        by: String,
    },
    ContestDeleted {
        contest_id: String,
        by: String,
        refunded: Decimal,
    },
}

impl ActivityEvent {
    pub fn action(&self) -> &'static str {
        match self {
            ActivityEvent::MemberJoined { .. } => "MEMBER_JOINED",
            ActivityEvent::ContestCreated { .. } => "CONTEST_CREATED",
            ActivityEvent::EntrySubmitted { .. } => "ENTRY_SUBMITTED",
            ActivityEvent::EntryWithdrawn { .. } => "ENTRY_WITHDRAWN",
            ActivityEvent::BagsAssigned { .. } => "BAGS_ASSIGNED",
            ActivityEvent::PhaseChanged { .. } => "PHASE_CHANGED",
            ActivityEvent::BallotSubmitted { .. } => "BALLOT_SUBMITTED",
            ActivityEvent::WagerPlaced { .. } => "WAGER_PLACED",
            ActivityEvent::ContestSettled { .. } => "CONTEST_SETTLED",
            ActivityEvent::BonusGranted { .. } => "BONUS_GRANTED",
            ActivityEvent::ContestDeleted { .. } => "CONTEST_DELETED",
        }
    }

    pub fn emoji(&self) -> &'static str {
        match self {
            ActivityEvent::MemberJoined { .. } => "👋",
            ActivityEvent::ContestCreated { .. } => "🍷",
            ActivityEvent::EntrySubmitted { .. } => "📥",
            ActivityEvent::EntryWithdrawn { .. } => "↩️",
            ActivityEvent::BagsAssigned { .. } => "🛍️",
            ActivityEvent::PhaseChanged { .. } => "⏭️",
            ActivityEvent::BallotSubmitted { .. } => "🗳️",
            ActivityEvent::WagerPlaced { .. } => "🎯",
            ActivityEvent::ContestSettled { .. } => "🏆",
            ActivityEvent::BonusGranted { .. } => "🎁",
            ActivityEvent::ContestDeleted { .. } => "🗑️",
        }
    }

    pub fn summary(&self) -> String {
        match self {
            ActivityEvent::MemberJoined { trip_id, user_id, starting_balance } => {
                format!("{} joined trip {} with {}", user_id, trip_id, starting_balance)
            }
            ActivityEvent::ContestCreated { contest_id, trip_id, title, by } => {
                format!("{} created \"{}\" ({}) on trip {}", by, title, contest_id, trip_id)
            }
            ActivityEvent::EntrySubmitted { contest_id, submitter_id, entry_count } => {
                format!("{} submitted an entry to {} ({} total)", submitter_id, contest_id, entry_count)
            }
            ActivityEvent::EntryWithdrawn { contest_id, entry_id, by } => {
                format!("{} withdrew entry {} from {}", by, entry_id, contest_id)
            }
            ActivityEvent::BagsAssigned { contest_id, count } => {
                format!("{} bag numbers assigned in {}", count, contest_id)
            }
            ActivityEvent::PhaseChanged { contest_id, from, to, trigger } => {
                let cause = match trigger {
                    TransitionTrigger::Manual { by } => format!("by {}", by),
                    TransitionTrigger::Automatic { reason } => format!("auto: {}", reason),
                };
                format!("{} {} -> {} ({})", contest_id, from, to, cause)
            }
            ActivityEvent::BallotSubmitted { contest_id, participant_id, replaced } => {
                let verb = if *replaced { "updated" } else { "cast" };
                format!("{} {} a ballot in {}", participant_id, verb, contest_id)
            }
            ActivityEvent::WagerPlaced { contest_id, bettor_id, stake, delta } => {
                format!("{} staked {} in {} (delta {})", bettor_id, stake, contest_id, delta)
            }
            ActivityEvent::ContestSettled { contest_id, winner_bag, winning_wagers, total_paid } => {
                format!(
                    "{} settled: bag #{} wins, {} winning wagers, {} paid",
                    contest_id, winner_bag, winning_wagers, total_paid
                )
            }
            ActivityEvent::BonusGranted { participant_id, amount, by } => {
                format!("{} granted {} to {}", by, amount, participant_id)
            }
            ActivityEvent::ContestDeleted { contest_id, by, refunded } => {
                format!("{} deleted {} ({} refunded)", by, contest_id, refunded)
            }
        }
    }
}

/// Destination of committed activity
pub trait ActivitySink: Send + Sync {
    fn record(&self, event: &ActivityEvent) -> Result<(), String>;
}

// ============================================================================
// FEED (in-memory ring buffer)
// ============================================================================

pub const DEFAULT_ACTIVITY_CAPACITY: usize = 1000;

/// Most recent formatted activity lines, oldest dropped first
#[derive(Debug)]
pub struct ActivityFeed {
    lines: Mutex<VecDeque<String>>,
    capacity: usize,
}

impl Default for ActivityFeed {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_ACTIVITY_CAPACITY)
    }
}

impl ActivityFeed {
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            lines: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    /// Newest first
    pub fn recent(&self, limit: usize) -> Vec<String> {
        match self.lines.lock() {
            Ok(lines) => lines.iter().rev().take(limit).cloned().collect(),
            Err(poisoned) => poisoned.into_inner().iter().rev().take(limit).cloned().collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.lines.lock().map(|l| l.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ActivitySink for ActivityFeed {
    fn record(&self, event: &ActivityEvent) -> Result<(), String> {
        let timestamp = chrono::Local::now().format("%H:%M:%S");
        let line = format!("[{}] {} {} | {}", timestamp, event.emoji(), event.action(), event.summary());
        info!("{}", line);

        let mut lines = self.lines.lock().map_err(|_| "activity feed lock poisoned".to_string())?;
        lines.push_back(line);
        while lines.len() > self.capacity {
            lines.pop_front();
        }
        Ok(())
    }
}

// ============================================================================
// CHANNEL
// ============================================================================

/// Sending half handed to the engine
#[derive(Debug, Clone)]
pub struct ActivityDispatcher {
    tx: mpsc::UnboundedSender<ActivityEvent>,
}

impl ActivityDispatcher {
    pub fn publish(&self, events: Vec<ActivityEvent>) {
        for event in events {
            if let Err(err) = self.tx.send(event) {
                warn!("activity receiver gone, dropping {}", err.0.action());
            }
        }
    }
}

/// Receiving half, drained into a sink
#[derive(Debug)]
pub struct ActivityReceiver {
    rx: mpsc::UnboundedReceiver<ActivityEvent>,
}

impl ActivityReceiver {
    /// Forward events until every dispatcher is dropped
    pub async fn run(mut self, sink: Arc<dyn ActivitySink>) {
        while let Some(event) = self.rx.recv().await {
            if let Err(err) = sink.record(&event) {
                warn!("activity sink rejected {}: {}", event.action(), err);
            }
        }
        debug!("activity channel closed");
    }

    /// Forward whatever is queued right now. Returns the number delivered.
    pub fn try_drain(&mut self, sink: &dyn ActivitySink) -> usize {
        let mut delivered = 0;
        while let Ok(event) = self.rx.try_recv() {
            match sink.record(&event) {
                Ok(()) => delivered += 1,
                Err(err) => warn!("activity sink rejected {}: {}", event.action(), err),
            }
        }
        delivered
    }
}

pub fn channel() -> (ActivityDispatcher, ActivityReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (ActivityDispatcher { tx }, ActivityReceiver { rx })
}
