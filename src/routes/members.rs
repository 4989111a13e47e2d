// Trip membership routes
// A participant's first trip join credits the configured starting balance

use axum::{
    extract::{Path, State},
    http::HeaderMap,
    response::Json,
};
use serde_json::{json, Value};
use tracing::info;

use crate::app_state::SharedState;
use crate::handlers::{participant, ApiResult};
use crate::membership::MembershipService;
use crate::models::JoinTripRequest;

/// POST /trips/:trip/members
/// The first member of a trip becomes its organizer. Adding someone else,
/// or granting organizer rights, needs an existing organizer.
pub async fn join_trip(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Path(trip_id): Path<String>,
    Json(request): Json<JoinTripRequest>,
) -> ApiResult<Json<Value>> {
    let actor = participant(&headers)?;
    let user_id = request.user_id.clone().unwrap_or_else(|| actor.clone());
    let display_name = request.display_name.clone().unwrap_or_else(|| user_id.clone());

    let (member, is_new) = state
        .roster
        .enroll(&trip_id, &actor, &user_id, &display_name, request.is_organizer)?;

    if is_new {
        info!("👋 {} joined trip {}", user_id, trip_id);
        state.engine.welcome_member(&member, state.config.starting_balance)?;
    }

    let balance = state.engine.get_balance(&user_id)?;
    Ok(Json(json!({
        "success": true,
        "member": member,
        "is_new_member": is_new,
        "balance": balance,
    })))
}

/// GET /trips/:trip/members
pub async fn list_members(State(state): State<SharedState>, Path(trip_id): Path<String>) -> Json<Value> {
    let members = state.roster.members(&trip_id);
    Json(json!({
        "success": true,
        "trip_id": trip_id,
        "count": members.len(),
        "members": members,
    }))
}
