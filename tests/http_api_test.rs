use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use blind_contest_engine::{build_router, AppState, EngineConfig, SharedState};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::{json, Value};
use tower::ServiceExt;

fn app() -> (Router, SharedState, blind_contest_engine::ActivityReceiver) {
    let (state, receiver) = AppState::in_memory(EngineConfig::default());
    let state = Arc::new(state);
    (build_router(state.clone()), state, receiver)
}

async fn send(app: &Router, method: &str, uri: &str, actor: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(actor) = actor {
        builder = builder.header("x-participant-id", actor);
    }
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, json)
}

fn amount(value: &Value) -> Decimal {
    value.as_str().unwrap().parse().unwrap()
}

/// Trip "napa" with olivia (organizer), sam and rae; contest with three entries in SCORING
async fn scoring_contest(app: &Router) -> String {
    for user in ["olivia", "sam", "rae"] {
        let (status, _) = send(app, "POST", "/trips/napa/members", Some(user), Some(json!({}))).await;
        assert_eq!(status, StatusCode::OK);
    }

    let (status, body) = send(
        app,
        "POST",
        "/contests",
        Some("olivia"),
        Some(json!({ "title": "Blind Pinot", "trip_id": "napa", "pot": "30" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let contest_id = body["contest"]["id"].as_str().unwrap().to_string();

    let mut entry_ids = Vec::new();
    for (user, name) in [("sam", "Pinot A"), ("rae", "Pinot B"), ("olivia", "Pinot C")] {
        let (status, body) = send(
            app,
            "POST",
            &format!("/contests/{}/entries", contest_id),
            Some(user),
            Some(json!({ "name": name, "declared_price": "24.99" })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        entry_ids.push(body["entry_id"].as_str().unwrap().to_string());
    }

    let assignments: Vec<Value> = entry_ids
        .iter()
        .enumerate()
        .map(|(i, id)| json!({ "entry_id": id, "bag_number": i + 1 }))
        .collect();
    let (status, body) = send(
        app,
        "POST",
        &format!("/contests/{}/bags", contest_id),
        Some("olivia"),
        Some(json!({ "assignments": assignments })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["contest"]["phase"], "SCORING");
    contest_id
}

#[tokio::test]
async fn test_health() {
    let (app, _, _rx) = app();
    let (status, body) = send(&app, "GET", "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["contests"], 0);
}

#[tokio::test]
async fn test_join_trip_funds_once() {
    let (app, _, _rx) = app();
    let (status, body) = send(&app, "POST", "/trips/napa/members", Some("olivia"), Some(json!({}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["is_new_member"], true);
    assert_eq!(body["member"]["is_organizer"], true);
    assert_eq!(amount(&body["balance"]), dec!(100));

    let (_, body) = send(&app, "POST", "/trips/napa/members", Some("olivia"), Some(json!({}))).await;
    assert_eq!(body["is_new_member"], false);
    assert_eq!(amount(&body["balance"]), dec!(100));

    // A regular member can't hand out organizer rights
    send(&app, "POST", "/trips/napa/members", Some("sam"), Some(json!({}))).await;
    let (status, body) = send(
        &app,
        "POST",
        "/trips/napa/members",
        Some("sam"),
        Some(json!({ "user_id": "rae", "is_organizer": true })),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["kind"], "NotOrganizer");

    let (_, body) = send(&app, "GET", "/trips/napa/members", None, None).await;
    assert_eq!(body["count"], 2);
}

#[tokio::test]
async fn test_founding_more_trips_does_not_mint_currency() {
    let (app, _, _rx) = app();
    for i in 0..5 {
        let (status, body) = send(
            &app,
            "POST",
            &format!("/trips/fake{}/members", i),
            Some("mallory"),
            Some(json!({})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["is_new_member"], true);
        assert_eq!(body["member"]["is_organizer"], true);
    }

    let (_, body) = send(&app, "GET", "/balance/mallory", None, None).await;
    assert_eq!(amount(&body["balance"]), dec!(100));

    let (_, body) = send(&app, "GET", "/ledger/mallory", None, None).await;
    assert_eq!(body["count"], 1);
}

#[tokio::test]
async fn test_missing_participant_header() {
    let (app, _, _rx) = app();
    let (status, body) = send(
        &app,
        "POST",
        "/contests",
        None,
        Some(json!({ "title": "Blind Pinot", "trip_id": "napa" })),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["success"], false);
    assert_eq!(body["kind"], "MissingParticipant");
}

#[tokio::test]
async fn test_contest_flow_over_http() {
    let (app, state, mut rx) = app();
    let contest_id = scoring_contest(&app).await;

    // Blind: rae sees only bag numbers for others' entries
    let (_, body) = send(&app, "GET", &format!("/contests/{}/entries", contest_id), Some("rae"), None).await;
    let entries = body["entries"].as_array().unwrap();
    assert_eq!(entries.len(), 3);
    assert!(entries[0]["payload"].is_null());
    assert_eq!(entries[1]["payload"]["name"], "Pinot B");

    let (status, body) = send(
        &app,
        "POST",
        &format!("/contests/{}/wagers", contest_id),
        Some("sam"),
        Some(json!({ "first": 1, "second": 2, "third": 3, "virtual_stake": "40" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(amount(&body["balance"]), dec!(60));

    let (status, body) = send(
        &app,
        "POST",
        &format!("/contests/{}/wagers", contest_id),
        Some("sam"),
        Some(json!({ "first": 1, "second": 2, "third": 3, "virtual_stake": "70" })),
    )
    .await;
    assert_eq!(status, StatusCode::PAYMENT_REQUIRED);
    assert_eq!(body["kind"], "InsufficientFunds");

    let (status, _) = send(&app, "GET", &format!("/contests/{}/placement", contest_id), None, None).await;
    assert_eq!(status, StatusCode::CONFLICT);

    for (user, ranking) in [("sam", [1, 2, 3]), ("rae", [1, 3, 2]), ("olivia", [2, 1, 3])] {
        let (status, _) = send(
            &app,
            "POST",
            &format!("/contests/{}/ballots", contest_id),
            Some(user),
            Some(json!({ "first": ranking[0], "second": ranking[1], "third": ranking[2] })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    // Everyone voted, so the contest revealed itself
    let (status, body) = send(&app, "GET", &format!("/contests/{}/placement", contest_id), None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["placement"]["winner"]["bag_number"], 1);
    assert_eq!(body["placement"]["winner"]["total_points"], 13);

    // 40 + 30 * 40 / 40 = 70 back on top of the remaining 60
    let (_, body) = send(&app, "GET", "/balance/sam", None, None).await;
    assert_eq!(amount(&body["balance"]), dec!(130));

    let (_, body) = send(
        &app,
        "GET",
        &format!("/ledger/sam?contest_id={}", contest_id),
        None,
        None,
    )
    .await;
    let kinds: Vec<&str> = body["transactions"]
        .as_array()
        .unwrap()
        .iter()
        .map(|tx| tx["kind"].as_str().unwrap())
        .collect();
    assert_eq!(kinds, vec!["escrow_debit", "payout_credit"]);

    let (status, body) = send(
        &app,
        "POST",
        &format!("/contests/{}/phase", contest_id),
        Some("olivia"),
        Some(json!({ "target": "REVEAL" })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["kind"], "InvalidTransition");

    let (_, body) = send(&app, "GET", &format!("/contests/{}/settlement", contest_id), None, None).await;
    assert_eq!(body["settlement"]["payouts"].as_array().unwrap().len(), 1);

    // Activity is delivered through the channel
    assert!(rx.try_drain(state.feed.as_ref()) > 0);
    let (_, body) = send(&app, "GET", "/activity?limit=5", None, None).await;
    assert_eq!(body["count"], 5);
}

#[tokio::test]
async fn test_error_mapping() {
    let (app, _, _rx) = app();
    let (status, body) = send(&app, "GET", "/contests/nope", None, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["kind"], "ContestNotFound");

    let contest_id = scoring_contest(&app).await;
    let (status, body) = send(
        &app,
        "POST",
        &format!("/contests/{}/ballots", contest_id),
        Some("sam"),
        Some(json!({ "first": 1, "second": 1, "third": 2 })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["kind"], "InvalidRanking");

    let (status, body) = send(
        &app,
        "POST",
        &format!("/contests/{}/entries", contest_id),
        Some("sam"),
        Some(json!({ "name": "Late Pinot" })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["kind"], "PhaseViolation");
}

#[tokio::test]
async fn test_bonus_and_delete() {
    let (app, _, _rx) = app();
    let contest_id = scoring_contest(&app).await;

    let (status, body) = send(
        &app,
        "POST",
        "/ledger/sam/bonus",
        Some("olivia"),
        Some(json!({ "trip_id": "napa", "amount": "25", "memo": "best palate" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(amount(&body["balance"]), dec!(125));
    assert_eq!(body["transaction"]["kind"], "bonus_credit");

    send(
        &app,
        "POST",
        &format!("/contests/{}/wagers", contest_id),
        Some("sam"),
        Some(json!({ "first": 3, "second": 2, "third": 1, "virtual_stake": "25" })),
    )
    .await;

    let (status, body) = send(&app, "DELETE", &format!("/contests/{}", contest_id), Some("olivia"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(amount(&body["refunded"]), dec!(25));

    let (_, body) = send(&app, "GET", "/balance/sam", None, None).await;
    assert_eq!(amount(&body["balance"]), dec!(125));
}
