// HTTP request handlers for the contest API

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
};
use serde_json::{json, Value};
use tracing::warn;

use crate::app_state::SharedState;
use crate::contest::{ContestSettings, EntryPayload};
use crate::error::ContestError;
use crate::models::*;

/// Header carrying the acting participant's id
pub const PARTICIPANT_HEADER: &str = "x-participant-id";

const DEFAULT_ACTIVITY_LIMIT: usize = 50;

// ===== ERRORS =====

#[derive(Debug)]
pub enum ApiError {
    MissingParticipant,
    Contest(ContestError),
}

pub type ApiResult<T> = Result<T, ApiError>;

impl From<ContestError> for ApiError {
    fn from(err: ContestError) -> Self {
        ApiError::Contest(err)
    }
}

pub fn status_for(err: &ContestError) -> StatusCode {
    match err {
        ContestError::ContestNotFound(_) | ContestError::EntryNotFound(_) => StatusCode::NOT_FOUND,
        ContestError::PhaseViolation { .. }
        | ContestError::InvalidTransition { .. }
        | ContestError::NotRevealedYet(_)
        | ContestError::NotEnoughEntries { .. } => StatusCode::CONFLICT,
        ContestError::NotAMember { .. } | ContestError::NotOrganizer { .. } => StatusCode::FORBIDDEN,
        ContestError::InsufficientFunds { .. } => StatusCode::PAYMENT_REQUIRED,
        ContestError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        ContestError::InvalidEntry(_)
        | ContestError::DuplicateBagNumber(_)
        | ContestError::IncompleteAssignment(_)
        | ContestError::InvalidBagNumber(_)
        | ContestError::InvalidRanking(_)
        | ContestError::InvalidRating(_)
        | ContestError::InvalidAmount(_)
        | ContestError::CashWagersDisabled(_)
        | ContestError::InvalidSettings(_) => StatusCode::BAD_REQUEST,
    }
}

impl IntoResponse for ContestError {
    fn into_response(self) -> Response {
        if self.is_infrastructure() {
            warn!("❌ {}", self);
        }
        let body = Json(json!({
            "success": false,
            "kind": self.kind(),
            "error": self.to_string(),
        }));
        (status_for(&self), body).into_response()
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::MissingParticipant => (
                StatusCode::UNAUTHORIZED,
                Json(json!({
                    "success": false,
                    "kind": "MissingParticipant",
                    "error": format!("{} header is required", PARTICIPANT_HEADER),
                })),
            )
                .into_response(),
            ApiError::Contest(err) => err.into_response(),
        }
    }
}

pub fn participant(headers: &HeaderMap) -> ApiResult<String> {
    headers
        .get(PARTICIPANT_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or(ApiError::MissingParticipant)
}

// ===== HEALTH & ACTIVITY =====

pub async fn health_check(State(state): State<SharedState>) -> ApiResult<Json<Value>> {
    let contests = state.engine.list_contests(None)?.len();
    let ledger = state.engine.ledger_stats()?;
    let ledger_ok = state.engine.verify_ledger().is_ok();
    let status = if ledger_ok { "ok" } else { "degraded" };
    Ok(Json(json!({
        "success": true,
        "status": status,
        "contests": contests,
        "members": state.roster.len(),
        "ledger": ledger,
        "ledger_verified": ledger_ok,
    })))
}

pub async fn get_activity(
    State(state): State<SharedState>,
    Query(query): Query<ActivityQuery>,
) -> Json<Value> {
    let limit = query.limit.unwrap_or(DEFAULT_ACTIVITY_LIMIT);
    let activity = state.feed.recent(limit);
    Json(json!({
        "success": true,
        "count": activity.len(),
        "activity": activity,
    }))
}

// ===== CONTESTS =====

pub async fn create_contest(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Json(settings): Json<ContestSettings>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let actor = participant(&headers)?;
    let contest = state.engine.create_contest(&actor, settings)?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "success": true, "contest": contest })),
    ))
}

pub async fn list_contests(
    State(state): State<SharedState>,
    Query(query): Query<ContestListQuery>,
) -> ApiResult<Json<Value>> {
    let contests = state.engine.list_contests(query.trip_id.as_deref())?;
    Ok(Json(json!({
        "success": true,
        "count": contests.len(),
        "contests": contests,
    })))
}

pub async fn get_contest(State(state): State<SharedState>, Path(id): Path<String>) -> ApiResult<Json<Value>> {
    let contest = state.engine.contest(&id)?;
    Ok(Json(json!({ "success": true, "contest": contest })))
}

pub async fn delete_contest(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let actor = participant(&headers)?;
    let refunded = state.engine.delete_contest(&id, &actor)?;
    Ok(Json(json!({
        "success": true,
        "contest_id": id,
        "refunded": refunded,
    })))
}

// ===== ENTRIES =====

pub async fn submit_entry(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(payload): Json<EntryPayload>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let actor = participant(&headers)?;
    let entry = state.engine.submit_entry(&id, &actor, payload)?;
    Ok((
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "entry_id": entry.id,
            "seq": entry.seq,
            "submitted_at": entry.submitted_at,
        })),
    ))
}

pub async fn list_entries(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let viewer = participant(&headers)?;
    let entries = state.engine.list_entries(&id, &viewer)?;
    Ok(Json(json!({
        "success": true,
        "count": entries.len(),
        "entries": entries,
    })))
}

pub async fn withdraw_entry(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Path((id, entry_id)): Path<(String, String)>,
) -> ApiResult<Json<Value>> {
    let actor = participant(&headers)?;
    let entry = state.engine.withdraw_entry(&id, &entry_id, &actor)?;
    Ok(Json(json!({ "success": true, "entry_id": entry.id })))
}

pub async fn assign_bags(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(request): Json<AssignBagsRequest>,
) -> ApiResult<Json<Value>> {
    let actor = participant(&headers)?;
    let contest = state.engine.assign_bag_numbers(&id, &actor, &request.pairs())?;
    Ok(Json(json!({ "success": true, "contest": contest })))
}

// ===== PHASES =====

pub async fn advance_phase(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(request): Json<AdvancePhaseRequest>,
) -> ApiResult<Json<Value>> {
    let actor = participant(&headers)?;
    let contest = state.engine.advance_phase(&id, &actor, request.target)?;
    Ok(Json(json!({ "success": true, "contest": contest })))
}

// ===== BALLOTS =====

pub async fn submit_ballot(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(request): Json<SubmitBallotRequest>,
) -> ApiResult<Json<Value>> {
    let actor = participant(&headers)?;
    let ballot = state
        .engine
        .submit_ballot(&id, &actor, request.ranking(), request.ratings.clone())?;
    let phase = state.engine.contest(&id)?.phase;
    Ok(Json(json!({
        "success": true,
        "ballot": ballot,
        "phase": phase,
    })))
}

pub async fn ballot_status(State(state): State<SharedState>, Path(id): Path<String>) -> ApiResult<Json<Value>> {
    let status = state.engine.ballot_status(&id)?;
    Ok(Json(json!({ "success": true, "status": status })))
}

// ===== WAGERS =====

pub async fn place_wager(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(request): Json<PlaceWagerRequest>,
) -> ApiResult<Json<Value>> {
    let actor = participant(&headers)?;
    let wager = state.engine.place_wager(
        &id,
        &actor,
        request.prediction(),
        request.virtual_stake,
        request.cash_stake,
    )?;
    let balance = state.engine.get_balance(&actor)?;
    Ok(Json(json!({
        "success": true,
        "wager": wager,
        "balance": balance,
    })))
}

pub async fn get_own_wager(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let actor = participant(&headers)?;
    let wager = state.engine.wager(&id, &actor)?;
    Ok(Json(json!({ "success": true, "wager": wager })))
}

// ===== RESULTS =====

pub async fn get_placement(State(state): State<SharedState>, Path(id): Path<String>) -> ApiResult<Json<Value>> {
    let placement = state.engine.get_placement(&id)?;
    Ok(Json(json!({ "success": true, "placement": placement })))
}

pub async fn get_settlement(State(state): State<SharedState>, Path(id): Path<String>) -> ApiResult<Json<Value>> {
    let settlement = state.engine.settlement(&id)?;
    Ok(Json(json!({ "success": true, "settlement": settlement })))
}

// ===== LEDGER =====

pub async fn get_balance(
    State(state): State<SharedState>,
    Path(participant_id): Path<String>,
) -> ApiResult<Json<Value>> {
    let balance = state.engine.get_balance(&participant_id)?;
    Ok(Json(json!({
        "success": true,
        "participant_id": participant_id,
        "balance": balance,
    })))
}

pub async fn get_ledger_history(
    State(state): State<SharedState>,
    Path(participant_id): Path<String>,
    Query(query): Query<LedgerQuery>,
) -> ApiResult<Json<Value>> {
    let transactions = state
        .engine
        .get_ledger_history(&participant_id, query.contest_id.as_deref())?;
    Ok(Json(json!({
        "success": true,
        "participant_id": participant_id,
        "count": transactions.len(),
        "transactions": transactions,
    })))
}

pub async fn grant_bonus(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Path(participant_id): Path<String>,
    Json(request): Json<BonusRequest>,
) -> ApiResult<Json<Value>> {
    let actor = participant(&headers)?;
    let tx = state
        .engine
        .grant_bonus(&actor, &request.trip_id, &participant_id, request.amount, &request.memo)?;
    let balance = state.engine.get_balance(&participant_id)?;
    Ok(Json(json!({
        "success": true,
        "transaction": tx,
        "balance": balance,
    })))
}
