// Routes module - assembles every HTTP endpoint into one router

pub mod members;

pub use members::*;

use axum::{
    routing::{get, post},
    Router,
};
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::app_state::SharedState;
use crate::handlers::*;

pub fn build_router(state: SharedState) -> Router {
    Router::new()
        // ===== TRIPS =====
        .route("/trips/:trip_id/members", post(join_trip).get(list_members))
        // ===== CONTESTS =====
        .route("/contests", post(create_contest).get(list_contests))
        .route("/contests/:id", get(get_contest).delete(delete_contest))
        .route("/contests/:id/entries", post(submit_entry).get(list_entries))
        .route("/contests/:id/entries/:entry_id", axum::routing::delete(withdraw_entry))
        .route("/contests/:id/bags", post(assign_bags))
        .route("/contests/:id/phase", post(advance_phase))
        .route("/contests/:id/ballots", post(submit_ballot).get(ballot_status))
        .route("/contests/:id/wagers", post(place_wager).get(get_own_wager))
        .route("/contests/:id/placement", get(get_placement))
        .route("/contests/:id/settlement", get(get_settlement))
        // ===== LEDGER =====
        .route("/balance/:participant", get(get_balance))
        .route("/ledger/:participant", get(get_ledger_history))
        .route("/ledger/:participant/bonus", post(grant_bonus))
        // ===== ACTIVITY & HEALTH =====
        .route("/activity", get(get_activity))
        .route("/health", get(health_check))
        .route("/", get(health_check))
        .layer(
            ServiceBuilder::new().layer(TraceLayer::new_for_http()).layer(
                CorsLayer::new()
                    .allow_origin(Any)
                    .allow_methods(Any)
                    .allow_headers(Any),
            ),
        )
        .with_state(state)
}
