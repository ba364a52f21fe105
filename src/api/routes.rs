//! API route definitions.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::error;

use super::state::AppState;
use crate::storage::NewSubscription;

pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/subscriptions", get(list_subscriptions).post(create_subscription))
        .route("/subscriptions/{id}", axum::routing::delete(remove_subscription))
        .route("/runs", get(list_runs))
        .route("/runs/{id}", get(get_run))
        .route("/runs/{id}/rerun-scenario", post(rerun_scenario))
}

type ApiResult = Result<Json<Value>, (StatusCode, Json<Value>)>;

fn internal(err: anyhow::Error) -> (StatusCode, Json<Value>) {
    error!(error = %err, "request failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": err.to_string() })),
    )
}

fn not_found(what: &str) -> (StatusCode, Json<Value>) {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "error": format!("{what} not found") })),
    )
}

async fn health() -> Json<Value> {
    Json(json!({
        "data": {
            "status": "ok",
            "version": env!("CARGO_PKG_VERSION")
        },
        "meta": {
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "version": env!("CARGO_PKG_VERSION")
        }
    }))
}

async fn list_subscriptions(State(state): State<AppState>) -> ApiResult {
    let subs = state.subscriptions.list_all().map_err(internal)?;
    let total = subs.len();
    Ok(Json(json!({ "data": subs, "meta": { "total": total } })))
}

#[derive(Debug, Deserialize)]
struct CreateSubscriptionBody {
    owner: String,
    repo: String,
    user_id: Option<String>,
    exclude_branches: Option<Vec<String>>,
    test_options: Option<Value>,
    base_domain: Option<String>,
    credential_ref: Option<String>,
    #[serde(default)]
    notify: bool,
}

async fn create_subscription(
    State(state): State<AppState>,
    Json(body): Json<CreateSubscriptionBody>,
) -> ApiResult {
    let id = state
        .subscriptions
        .subscribe(NewSubscription {
            user_id: body.user_id,
            owner: body.owner,
            repo: body.repo,
            exclude_branches: body.exclude_branches,
            test_options: body.test_options,
            base_domain: body.base_domain,
            credential_ref: body.credential_ref,
            notify: body.notify,
        })
        .map_err(internal)?;
    let sub = state.subscriptions.get(id).map_err(internal)?;
    Ok(Json(json!({ "data": sub })))
}

async fn remove_subscription(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult {
    if state.subscriptions.get(id).map_err(internal)?.is_none() {
        return Err(not_found("subscription"));
    }
    state.subscriptions.unsubscribe(id).map_err(internal)?;
    Ok(Json(json!({ "data": { "id": id, "active": false } })))
}

#[derive(Debug, Deserialize)]
struct RunsQuery {
    subscription_id: Option<i64>,
    limit: Option<u32>,
}

async fn list_runs(State(state): State<AppState>, Query(q): Query<RunsQuery>) -> ApiResult {
    let runs = state
        .pipeline
        .registry()
        .list(q.subscription_id, q.limit.unwrap_or(50))
        .map_err(internal)?;
    let total = runs.len();
    Ok(Json(json!({ "data": runs, "meta": { "total": total } })))
}

async fn get_run(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult {
    match state.pipeline.registry().get(id).map_err(internal)? {
        Some(run) => Ok(Json(json!({ "data": run }))),
        None => Err(not_found("run")),
    }
}

#[derive(Debug, Deserialize)]
struct RerunBody {
    scenario_index: usize,
}

async fn rerun_scenario(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(body): Json<RerunBody>,
) -> ApiResult {
    let run = state
        .pipeline
        .registry()
        .get(id)
        .map_err(internal)?
        .ok_or_else(|| not_found("run"))?;
    let sub = state
        .subscriptions
        .get(run.subscription_id)
        .map_err(internal)?
        .ok_or_else(|| not_found("subscription"))?;
    let token = state.credentials.token_for(&sub).map_err(internal)?;
    let api = (state.api_factory)(token.as_deref());
    let result = state
        .pipeline
        .rerun_scenario(&state.subscriptions, api.as_ref(), id, body.scenario_index)
        .await
        .map_err(internal)?;
    Ok(Json(json!({
        "data": result,
        "meta": { "run_id": id, "scenario_index": body.scenario_index }
    })))
}
