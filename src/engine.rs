// ============================================================================
// Contest Engine - orchestration of contests, ballots, wagers and the ledger
// ============================================================================
//
// All state sits behind one mutex. Every public operation runs as:
//
//   lock -> look up -> authorize -> phase guard -> validate -> mutate
//
// and nothing is mutated before the last check passes, so a failed call
// leaves no trace. Activity events are collected while the lock is held and
// published after it is released.
//
// REVEAL is the only place where placement and settlement happen, and the
// stored settlement report makes a second attempt fail before any credit.
//
// ============================================================================

use crate::activity::{ActivityDispatcher, ActivityEvent};
use crate::contest::{
    aggregate, check_transition, validate_ratings, validate_stakes, Ballot, BallotBox, Contest,
    ContestPhase, ContestSettings, Entry, EntryPayload, EntryRating, EntryRegistry, EntryView, Operation, PhaseChange,
    Placement, Prediction, Ranking, SettlementReport, TransitionTrigger, Wager, WagerBook, WagerStatus,
};
use crate::error::{ContestError, ContestResult};
use crate::ledger::{Ledger, LedgerStats, LedgerTransaction, TxContext, TxKind, STARTING_BALANCE_MEMO};
use crate::membership::{MembershipService, TripMember};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

// ============================================================================
// STATE
// ============================================================================

/// A contest together with everything it owns
#[derive(Debug, Clone)]
pub struct ContestRecord {
    pub contest: Contest,
    pub entries: EntryRegistry,
    pub ballots: BallotBox,
    pub wagers: WagerBook,
}

impl ContestRecord {
    pub fn new(contest: Contest) -> Self {
        Self {
            contest,
            entries: EntryRegistry::new(),
            ballots: BallotBox::new(),
            wagers: WagerBook::new(),
        }
    }
}

#[derive(Debug, Default)]
pub struct EngineState {
    pub contests: HashMap<String, ContestRecord>,
    pub ledger: Ledger,
}

impl EngineState {
    pub fn record(&self, contest_id: &str) -> ContestResult<&ContestRecord> {
        self.contests
            .get(contest_id)
            .ok_or_else(|| ContestError::ContestNotFound(contest_id.to_string()))
    }

    pub fn record_mut(&mut self, contest_id: &str) -> ContestResult<&mut ContestRecord> {
        self.contests
            .get_mut(contest_id)
            .ok_or_else(|| ContestError::ContestNotFound(contest_id.to_string()))
    }
}

/// Who has and hasn't voted in a contest
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BallotStatus {
    pub contest_id: String,
    pub phase: ContestPhase,
    pub ballot_count: usize,
    pub voted: Vec<String>,
    pub waiting_on: Vec<String>,
}

// ============================================================================
// ENGINE
// ============================================================================

pub struct ContestEngine {
    state: Mutex<EngineState>,
    membership: Arc<dyn MembershipService>,
    activity: Option<ActivityDispatcher>,
}

impl ContestEngine {
    pub fn new(membership: Arc<dyn MembershipService>) -> Self {
        Self::from_state(EngineState::default(), membership)
    }

    pub fn from_state(state: EngineState, membership: Arc<dyn MembershipService>) -> Self {
        Self {
            state: Mutex::new(state),
            membership,
            activity: None,
        }
    }

    pub fn with_activity(mut self, dispatcher: ActivityDispatcher) -> Self {
        self.activity = Some(dispatcher);
        self
    }

    fn lock(&self) -> ContestResult<MutexGuard<'_, EngineState>> {
        self.state
            .lock()
            .map_err(|_| ContestError::Storage("engine state lock poisoned".into()))
    }

    fn publish(&self, events: Vec<ActivityEvent>) {
        if events.is_empty() {
            return;
        }
        if let Some(dispatcher) = &self.activity {
            dispatcher.publish(events);
        }
    }

    /// Run a mutation under the lock; its events go out only if it succeeded
    fn mutate<R>(
        &self,
        f: impl FnOnce(&mut EngineState, &mut Vec<ActivityEvent>) -> ContestResult<R>,
    ) -> ContestResult<R> {
        let mut events = Vec::new();
        let result = {
            let mut state = self.lock()?;
            f(&mut state, &mut events)
        };
        if result.is_ok() {
            self.publish(events);
        }
        result
    }

    /// Read-only access to the whole state, e.g. for snapshots
    pub fn with_state<R>(&self, f: impl FnOnce(&EngineState) -> R) -> ContestResult<R> {
        let state = self.lock()?;
        Ok(f(&state))
    }

    // ------------------------------------------------------------------------
    // Authorization
    // ------------------------------------------------------------------------

    fn require_member(&self, trip_id: &str, user_id: &str) -> ContestResult<TripMember> {
        self.membership.member(trip_id, user_id).ok_or_else(|| ContestError::NotAMember {
            user: user_id.to_string(),
            trip: trip_id.to_string(),
        })
    }

    fn is_organizer(&self, contest: &Contest, user_id: &str) -> bool {
        contest.created_by == user_id || self.membership.is_organizer(contest.trip_id(), user_id)
    }

    fn require_organizer(&self, contest: &Contest, user_id: &str) -> ContestResult<()> {
        if self.is_organizer(contest, user_id) {
            Ok(())
        } else {
            Err(ContestError::NotOrganizer {
                user: user_id.to_string(),
                trip: contest.trip_id().to_string(),
            })
        }
    }

    // ------------------------------------------------------------------------
    // Contests
    // ------------------------------------------------------------------------

    pub fn create_contest(&self, organizer_id: &str, settings: ContestSettings) -> ContestResult<Contest> {
        settings.validate()?;
        let member = self.require_member(&settings.trip_id, organizer_id)?;
        if !member.is_organizer {
            return Err(ContestError::NotOrganizer {
                user: organizer_id.to_string(),
                trip: settings.trip_id.clone(),
            });
        }

        self.mutate(|state, events| {
            let contest = Contest::new(uuid::Uuid::new_v4().to_string(), settings, organizer_id.to_string());
            info!("🍷 Contest {} \"{}\" created by {}", contest.id, contest.settings.title, organizer_id);
            events.push(ActivityEvent::ContestCreated {
                contest_id: contest.id.clone(),
                trip_id: contest.trip_id().to_string(),
                title: contest.settings.title.clone(),
                by: organizer_id.to_string(),
            });
            state.contests.insert(contest.id.clone(), ContestRecord::new(contest.clone()));
            Ok(contest)
        })
    }

    pub fn delete_contest(&self, contest_id: &str, actor: &str) -> ContestResult<Decimal> {
        self.mutate(|state, events| {
            let EngineState { contests, ledger } = state;
            let record = contests
                .get(contest_id)
                .ok_or_else(|| ContestError::ContestNotFound(contest_id.to_string()))?;
            self.require_organizer(&record.contest, actor)?;

            let mut refunded = Decimal::ZERO;
            if !record.contest.is_settled() {
                for wager in record.wagers.iter() {
                    if wager.status == WagerStatus::Open && wager.virtual_stake > Decimal::ZERO {
                        ledger.credit(
                            &wager.bettor_id,
                            wager.virtual_stake,
                            TxKind::EscrowRefund,
                            TxContext::wager(contest_id, &wager.id, "contest deleted"),
                        )?;
                        refunded += wager.virtual_stake;
                    }
                }
            }

            contests.remove(contest_id);
            info!("🗑️ Contest {} deleted by {} ({} refunded)", contest_id, actor, refunded);
            events.push(ActivityEvent::ContestDeleted {
                contest_id: contest_id.to_string(),
                by: actor.to_string(),
                refunded,
            });
            Ok(refunded)
        })
    }

    pub fn contest(&self, contest_id: &str) -> ContestResult<Contest> {
        let state = self.lock()?;
        Ok(state.record(contest_id)?.contest.clone())
    }

    /// Contests oldest first, optionally limited to one trip
    pub fn list_contests(&self, trip_id: Option<&str>) -> ContestResult<Vec<Contest>> {
        let state = self.lock()?;
        let mut contests: Vec<Contest> = state
            .contests
            .values()
            .filter(|r| trip_id.map_or(true, |t| r.contest.trip_id() == t))
            .map(|r| r.contest.clone())
            .collect();
        contests.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(contests)
    }

    // ------------------------------------------------------------------------
    // Entries
    // ------------------------------------------------------------------------

    pub fn submit_entry(&self, contest_id: &str, submitter_id: &str, payload: EntryPayload) -> ContestResult<Entry> {
        self.mutate(|state, events| {
            let record = state.record_mut(contest_id)?;
            record.contest.ensure_allowed(Operation::SubmitEntry)?;
            self.require_member(record.contest.trip_id(), submitter_id)?;

            let seq = record.contest.next_entry_seq;
            let entry = record.entries.submit(contest_id, submitter_id, payload, seq)?.clone();
            record.contest.take_entry_seq();
            debug!("Entry {} submitted to {} by {}", entry.id, contest_id, submitter_id);

            events.push(ActivityEvent::EntrySubmitted {
                contest_id: contest_id.to_string(),
                submitter_id: submitter_id.to_string(),
                entry_count: record.entries.len(),
            });

            if record.contest.phase == ContestPhase::Setup && record.contest.settings.auto_open {
                let change = record.contest.transition(
                    ContestPhase::Open,
                    TransitionTrigger::Automatic {
                        reason: "first entry".into(),
                    },
                )?;
                events.push(phase_event(contest_id, change));
            }
            Ok(entry)
        })
    }

    pub fn withdraw_entry(&self, contest_id: &str, entry_id: &str, actor: &str) -> ContestResult<Entry> {
        self.mutate(|state, events| {
            let record = state.record_mut(contest_id)?;
            record.contest.ensure_allowed(Operation::WithdrawEntry)?;

            let entry = record
                .entries
                .get(entry_id)
                .ok_or_else(|| ContestError::EntryNotFound(entry_id.to_string()))?;
            if entry.submitter_id != actor {
                self.require_organizer(&record.contest, actor)?;
            }

            let removed = record.entries.withdraw(entry_id)?;
            events.push(ActivityEvent::EntryWithdrawn {
                contest_id: contest_id.to_string(),
                entry_id: entry_id.to_string(),
                by: actor.to_string(),
            });
            Ok(removed)
        })
    }

    /// Entries as `viewer` may see them, ordered by bag number
    pub fn list_entries(&self, contest_id: &str, viewer: &str) -> ContestResult<Vec<EntryView>> {
        let state = self.lock()?;
        let record = state.record(contest_id)?;
        let privileged = self.is_organizer(&record.contest, viewer);
        Ok(record.entries.views(viewer, privileged, record.contest.phase.is_revealed()))
    }

    /// Apply an explicit bag batch and move OPEN -> SCORING as one step
    pub fn assign_bag_numbers(
        &self,
        contest_id: &str,
        actor: &str,
        assignments: &[(String, u32)],
    ) -> ContestResult<Contest> {
        self.mutate(|state, events| {
            let record = state.record_mut(contest_id)?;
            self.require_organizer(&record.contest, actor)?;
            record.contest.ensure_allowed(Operation::AssignBagNumbers)?;
            record.entries.ensure_enough()?;
            record.entries.validate_assignment(assignments)?;

            record.entries.assign_bag_numbers(assignments)?;
            let change = record.contest.transition(
                ContestPhase::Scoring,
                TransitionTrigger::Manual { by: actor.to_string() },
            )?;
            info!("🛍️ {} bag numbers assigned in {}", assignments.len(), contest_id);

            events.push(ActivityEvent::BagsAssigned {
                contest_id: contest_id.to_string(),
                count: assignments.len(),
            });
            events.push(phase_event(contest_id, change));
            Ok(record.contest.clone())
        })
    }

    // ------------------------------------------------------------------------
    // Phases
    // ------------------------------------------------------------------------

    /// Manual transition to the immediate successor phase
    pub fn advance_phase(&self, contest_id: &str, actor: &str, target: ContestPhase) -> ContestResult<Contest> {
        self.mutate(|state, events| {
            let trigger = TransitionTrigger::Manual { by: actor.to_string() };
            {
                let record = state.record_mut(contest_id)?;
                self.require_organizer(&record.contest, actor)?;
                if target == ContestPhase::Reveal && record.contest.is_settled() {
                    return Err(ContestError::InvalidTransition {
                        from: record.contest.phase,
                        to: target,
                    });
                }
                check_transition(record.contest.phase, target)?;
            }

            match target {
                ContestPhase::Scoring => {
                    let record = state.record_mut(contest_id)?;
                    record.entries.ensure_enough()?;
                    if !record.entries.is_bagged() {
                        let shuffled = record.entries.shuffled_assignment();
                        record.entries.assign_bag_numbers(&shuffled)?;
                        events.push(ActivityEvent::BagsAssigned {
                            contest_id: contest_id.to_string(),
                            count: shuffled.len(),
                        });
                    }
                    let change = record.contest.transition(target, trigger)?;
                    events.push(phase_event(contest_id, change));
                }
                ContestPhase::Reveal => reveal(state, contest_id, trigger, events)?,
                _ => {
                    let record = state.record_mut(contest_id)?;
                    let change = record.contest.transition(target, trigger)?;
                    events.push(phase_event(contest_id, change));
                }
            }

            Ok(state.record(contest_id)?.contest.clone())
        })
    }

    // ------------------------------------------------------------------------
    // Ballots
    // ------------------------------------------------------------------------

    pub fn submit_ballot(
        &self,
        contest_id: &str,
        participant_id: &str,
        ranking: Ranking,
        ratings: BTreeMap<u32, EntryRating>,
    ) -> ContestResult<Ballot> {
        self.mutate(|state, events| {
            let record = state.record_mut(contest_id)?;
            record.contest.ensure_allowed(Operation::SubmitBallot)?;
            let trip_id = record.contest.trip_id().to_string();
            self.require_member(&trip_id, participant_id)?;
            ranking.validate(&record.entries)?;
            validate_ratings(&ratings, &record.entries, &record.contest.settings.rating_scale)?;

            let replaced = record.ballots.upsert(contest_id, participant_id, ranking, ratings);
            let ballot = record
                .ballots
                .get(participant_id)
                .cloned()
                .ok_or_else(|| ContestError::Storage(format!("ballot for {} vanished", participant_id)))?;
            events.push(ActivityEvent::BallotSubmitted {
                contest_id: contest_id.to_string(),
                participant_id: participant_id.to_string(),
                replaced,
            });

            let all_voted = record.contest.settings.auto_reveal && {
                let members = self.membership.members(&trip_id);
                !members.is_empty() && members.iter().all(|m| record.ballots.has_voted(&m.user_id))
            };
            if all_voted {
                let trigger = TransitionTrigger::Automatic {
                    reason: "every member has voted".into(),
                };
                // The ballot stands even if the automatic reveal cannot run
                if let Err(err) = reveal(state, contest_id, trigger, events) {
                    warn!("auto-reveal of {} skipped: {}", contest_id, err);
                }
            }
            Ok(ballot)
        })
    }

    pub fn ballot_status(&self, contest_id: &str) -> ContestResult<BallotStatus> {
        let state = self.lock()?;
        let record = state.record(contest_id)?;
        let voted: Vec<String> = record.ballots.voters().map(str::to_string).collect();
        let waiting_on = self
            .membership
            .members(record.contest.trip_id())
            .into_iter()
            .map(|m| m.user_id)
            .filter(|u| !record.ballots.has_voted(u))
            .collect();
        Ok(BallotStatus {
            contest_id: contest_id.to_string(),
            phase: record.contest.phase,
            ballot_count: record.ballots.len(),
            voted,
            waiting_on,
        })
    }

    pub fn ballot(&self, contest_id: &str, participant_id: &str) -> ContestResult<Option<Ballot>> {
        let state = self.lock()?;
        Ok(state.record(contest_id)?.ballots.get(participant_id).cloned())
    }

    // ------------------------------------------------------------------------
    // Wagers
    // ------------------------------------------------------------------------

    pub fn place_wager(
        &self,
        contest_id: &str,
        bettor_id: &str,
        prediction: Prediction,
        virtual_stake: Decimal,
        cash_stake: Decimal,
    ) -> ContestResult<Wager> {
        self.mutate(|state, events| {
            let EngineState { contests, ledger } = state;
            let record = contests
                .get_mut(contest_id)
                .ok_or_else(|| ContestError::ContestNotFound(contest_id.to_string()))?;
            record.contest.ensure_allowed(Operation::PlaceWager)?;
            self.require_member(record.contest.trip_id(), bettor_id)?;
            prediction.validate(&record.entries)?;
            validate_stakes(&record.contest.settings, contest_id, virtual_stake, cash_stake)?;

            if record.wagers.is_unchanged(bettor_id, &prediction, virtual_stake, cash_stake) {
                if let Some(existing) = record.wagers.get(bettor_id) {
                    debug!("Identical wager from {} in {}, nothing to do", bettor_id, contest_id);
                    return Ok(existing.clone());
                }
            }

            // Balance check applies to raises only
            let escrowed = record.wagers.escrowed(bettor_id);
            let available = ledger.balance(bettor_id);
            if virtual_stake > escrowed && virtual_stake > available {
                return Err(ContestError::InsufficientFunds {
                    available,
                    required: virtual_stake,
                });
            }

            let (wager, change) = record
                .wagers
                .upsert(contest_id, bettor_id, prediction, virtual_stake, cash_stake);
            let delta = change.delta();
            if delta > Decimal::ZERO {
                ledger.debit(
                    bettor_id,
                    delta,
                    TxKind::EscrowDebit,
                    TxContext::wager(contest_id, &wager.id, "wager stake"),
                )?;
            } else if delta < Decimal::ZERO {
                ledger.credit(
                    bettor_id,
                    -delta,
                    TxKind::EscrowRefund,
                    TxContext::wager(contest_id, &wager.id, "wager stake lowered"),
                )?;
            }

            info!("🎯 {} staked {} in {} (delta {})", bettor_id, virtual_stake, contest_id, delta);
            events.push(ActivityEvent::WagerPlaced {
                contest_id: contest_id.to_string(),
                bettor_id: bettor_id.to_string(),
                stake: virtual_stake,
                delta,
            });
            Ok(wager)
        })
    }

    pub fn wager(&self, contest_id: &str, bettor_id: &str) -> ContestResult<Option<Wager>> {
        let state = self.lock()?;
        Ok(state.record(contest_id)?.wagers.get(bettor_id).cloned())
    }

    // ------------------------------------------------------------------------
    // Results
    // ------------------------------------------------------------------------

    pub fn get_placement(&self, contest_id: &str) -> ContestResult<Placement> {
        let state = self.lock()?;
        let contest = &state.record(contest_id)?.contest;
        if !contest.phase.is_revealed() {
            return Err(ContestError::NotRevealedYet(contest_id.to_string()));
        }
        contest
            .placement
            .clone()
            .ok_or_else(|| ContestError::NotRevealedYet(contest_id.to_string()))
    }

    pub fn settlement(&self, contest_id: &str) -> ContestResult<SettlementReport> {
        let state = self.lock()?;
        let contest = &state.record(contest_id)?.contest;
        contest
            .settlement
            .clone()
            .ok_or_else(|| ContestError::NotRevealedYet(contest_id.to_string()))
    }

    // ------------------------------------------------------------------------
    // Ledger
    // ------------------------------------------------------------------------

    pub fn get_balance(&self, participant_id: &str) -> ContestResult<Decimal> {
        Ok(self.lock()?.ledger.balance(participant_id))
    }

    pub fn get_ledger_history(
        &self,
        participant_id: &str,
        contest_id: Option<&str>,
    ) -> ContestResult<Vec<LedgerTransaction>> {
        let state = self.lock()?;
        Ok(state
            .ledger
            .history(participant_id, contest_id)
            .into_iter()
            .cloned()
            .collect())
    }

    /// Organizer grant of virtual currency to a member of the same trip
    pub fn grant_bonus(
        &self,
        actor: &str,
        trip_id: &str,
        participant_id: &str,
        amount: Decimal,
        memo: &str,
    ) -> ContestResult<LedgerTransaction> {
        if !self.membership.is_organizer(trip_id, actor) {
            return Err(ContestError::NotOrganizer {
                user: actor.to_string(),
                trip: trip_id.to_string(),
            });
        }
        self.require_member(trip_id, participant_id)?;

        self.mutate(|state, events| {
            let tx = state
                .ledger
                .credit(participant_id, amount, TxKind::BonusCredit, TxContext::memo(memo))?;
            events.push(ActivityEvent::BonusGranted {
                participant_id: participant_id.to_string(),
                amount,
                by: actor.to_string(),
            });
            Ok(tx)
        })
    }

    /// Starting balance for a member who just joined a trip. Balances are
    /// global, so a participant is funded on their first trip only.
    pub fn welcome_member(&self, member: &TripMember, starting_balance: Decimal) -> ContestResult<Option<LedgerTransaction>> {
        self.mutate(|state, events| {
            let tx = if starting_balance > Decimal::ZERO && !state.ledger.has_starting_credit(&member.user_id) {
                Some(state.ledger.credit(
                    &member.user_id,
                    starting_balance,
                    TxKind::BonusCredit,
                    TxContext::memo(format!("{} (joined trip {})", STARTING_BALANCE_MEMO, member.trip_id)),
                )?)
            } else {
                debug!("{} already funded, no starting balance for trip {}", member.user_id, member.trip_id);
                None
            };
            events.push(ActivityEvent::MemberJoined {
                trip_id: member.trip_id.clone(),
                user_id: member.user_id.clone(),
                starting_balance: tx.as_ref().map_or(Decimal::ZERO, |tx| tx.amount),
            });
            Ok(tx)
        })
    }

    pub fn ledger_stats(&self) -> ContestResult<LedgerStats> {
        Ok(self.lock()?.ledger.stats())
    }

    /// Hash chain and balance cache checks
    pub fn verify_ledger(&self) -> ContestResult<()> {
        let state = self.lock()?;
        state.ledger.verify_chain()?;
        state.ledger.reconcile()
    }
}

fn phase_event(contest_id: &str, change: PhaseChange) -> ActivityEvent {
    ActivityEvent::PhaseChanged {
        contest_id: contest_id.to_string(),
        from: change.from,
        to: change.to,
        trigger: change.trigger,
    }
}

/// SCORING -> REVEAL: aggregate, settle, credit winners, then optionally
/// complete. Nothing is touched unless the placement can be computed.
fn reveal(
    state: &mut EngineState,
    contest_id: &str,
    trigger: TransitionTrigger,
    events: &mut Vec<ActivityEvent>,
) -> ContestResult<()> {
    let EngineState { contests, ledger } = state;
    let record = contests
        .get_mut(contest_id)
        .ok_or_else(|| ContestError::ContestNotFound(contest_id.to_string()))?;

    if record.contest.is_settled() {
        return Err(ContestError::InvalidTransition {
            from: record.contest.phase,
            to: ContestPhase::Reveal,
        });
    }
    check_transition(record.contest.phase, ContestPhase::Reveal)?;

    let settings = record.contest.settings.clone();
    let placement = aggregate(&record.entries, &record.ballots, &settings.point_weights)?;

    let report = record.wagers.settle(contest_id, &placement, &settings);
    for payout in &report.payouts {
        ledger.credit(
            &payout.bettor_id,
            payout.amount,
            TxKind::PayoutCredit,
            TxContext::wager(contest_id, &payout.wager_id, "contest payout"),
        )?;
    }

    let change = record.contest.transition(ContestPhase::Reveal, trigger)?;
    info!(
        "🏆 {} revealed: bag #{} wins, {} of {} wagers won, {} paid",
        contest_id,
        placement.winner.bag_number,
        report.winning_wager_ids.len(),
        record.wagers.len(),
        report.total_paid()
    );

    events.push(phase_event(contest_id, change));
    events.push(ActivityEvent::ContestSettled {
        contest_id: contest_id.to_string(),
        winner_bag: placement.winner.bag_number,
        winning_wagers: report.winning_wager_ids.len(),
        total_paid: report.total_paid(),
    });

    record.contest.placement = Some(placement);
    record.contest.settlement = Some(report);

    if settings.auto_complete {
        let change = record.contest.transition(
            ContestPhase::Complete,
            TransitionTrigger::Automatic {
                reason: "auto_complete".into(),
            },
        )?;
        events.push(phase_event(contest_id, change));
    }
    Ok(())
}
