//! API route definitions.

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::api::auth::Caller;
use crate::api::error::ApiError;
use crate::api::state::AppState;
use crate::error::EngineError;
use crate::findings::{FindingQuery, Scope, Transition};
use crate::scheduler::RunTrigger;

type ApiResult = Result<Json<Value>, ApiError>;

const RUNS_DEFAULT: usize = 20;
const RUNS_MAX: usize = 200;

pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/findings", get(list_findings))
        .route("/findings/detect", post(detect_mine))
        .route("/findings/stats", get(finding_stats))
        .route("/findings/thresholds", get(thresholds))
        .route("/findings/{id}", get(get_finding))
        .route("/findings/{id}/acknowledge", patch(acknowledge))
        .route("/findings/{id}/resolve", patch(resolve))
        .route("/findings/{id}/false-positive", patch(false_positive))
        .route("/admin/detect", post(detect_fleet))
        .route("/admin/findings", get(admin_findings))
        .route("/admin/summary", get(admin_summary))
        .route("/admin/runs", get(admin_runs))
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "data": {
            "status": "ok",
            "version": env!("CARGO_PKG_VERSION")
        },
        "meta": {
            "timestamp": state.clock().now().to_rfc3339(),
        }
    }))
}

fn parse_id(raw: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(raw)
        .map_err(|_| EngineError::Validation(format!("'{raw}' is not a finding id")).into())
}

#[derive(Debug, Default, Deserialize)]
struct NotesBody {
    notes: Option<String>,
}

/// Optional JSON body carrying resolution notes.
fn notes_from(body: &Bytes) -> Result<Option<String>, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    let parsed: NotesBody = serde_json::from_slice(body)
        .map_err(|e| EngineError::Validation(format!("invalid request body: {e}")))?;
    Ok(parsed.notes)
}

async fn detect_mine(State(state): State<AppState>, caller: Caller) -> ApiResult {
    let report = state.engine.run_for_user(&caller.user_id).await?;
    Ok(Json(json!({ "data": report })))
}

async fn list_findings(
    State(state): State<AppState>,
    caller: Caller,
    Query(query): Query<FindingQuery>,
) -> ApiResult {
    let filter = query.for_user()?;
    let findings = state
        .findings
        .list(&Scope::User(caller.user_id), &filter)
        .await?;
    Ok(Json(json!({
        "data": findings,
        "meta": { "total": findings.len(), "limit": filter.limit }
    })))
}

async fn finding_stats(State(state): State<AppState>, caller: Caller) -> ApiResult {
    let stats = state.findings.stats(&Scope::User(caller.user_id)).await?;
    Ok(Json(json!({ "data": stats })))
}

async fn thresholds(State(state): State<AppState>, _caller: Caller) -> ApiResult {
    Ok(Json(json!({ "data": state.detection.as_ref() })))
}

async fn get_finding(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<String>,
) -> ApiResult {
    let finding = state.findings.get(parse_id(&id)?, &caller.scope()).await?;
    Ok(Json(json!({ "data": finding })))
}

async fn apply_transition(
    state: &AppState,
    caller: &Caller,
    id: &str,
    transition: Transition,
) -> ApiResult {
    let finding = state
        .findings
        .transition(
            parse_id(id)?,
            &caller.scope(),
            &caller.user_id,
            transition,
            state.clock().now(),
        )
        .await?;
    tracing::info!(
        finding_id = %finding.id,
        status = %finding.status,
        actor = %caller.user_id,
        "finding status changed"
    );
    Ok(Json(json!({ "data": finding })))
}

async fn acknowledge(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<String>,
) -> ApiResult {
    apply_transition(&state, &caller, &id, Transition::Acknowledge).await
}

async fn resolve(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<String>,
    body: Bytes,
) -> ApiResult {
    let notes = notes_from(&body)?.unwrap_or_default();
    apply_transition(&state, &caller, &id, Transition::Resolve { notes }).await
}

async fn false_positive(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<String>,
    body: Bytes,
) -> ApiResult {
    let notes = notes_from(&body)?;
    apply_transition(&state, &caller, &id, Transition::MarkFalsePositive { notes }).await
}

async fn detect_fleet(State(state): State<AppState>, caller: Caller) -> ApiResult {
    caller.require_admin()?;
    let report = state
        .engine
        .run_for_fleet(RunTrigger::Admin {
            user_id: caller.user_id.clone(),
        })
        .await?;
    if let Err(e) = state.history.record(&report).await {
        tracing::error!(run_id = %report.id, error = %e, "failed to record fleet run");
    }
    Ok(Json(json!({ "data": report })))
}

async fn admin_findings(
    State(state): State<AppState>,
    caller: Caller,
    Query(query): Query<FindingQuery>,
) -> ApiResult {
    caller.require_admin()?;
    let filter = query.for_fleet()?;
    let findings = state.findings.list(&Scope::Fleet, &filter).await?;
    Ok(Json(json!({
        "data": findings,
        "meta": { "total": findings.len(), "limit": filter.limit }
    })))
}

async fn admin_summary(State(state): State<AppState>, caller: Caller) -> ApiResult {
    caller.require_admin()?;
    let summary = state.findings.summary().await?;
    Ok(Json(json!({ "data": summary })))
}

#[derive(Debug, Deserialize)]
struct RunsQuery {
    limit: Option<usize>,
}

async fn admin_runs(
    State(state): State<AppState>,
    caller: Caller,
    Query(query): Query<RunsQuery>,
) -> ApiResult {
    caller.require_admin()?;
    let limit = query.limit.unwrap_or(RUNS_DEFAULT).clamp(1, RUNS_MAX);
    let runs = state.history.recent(limit).await?;
    Ok(Json(json!({ "data": runs, "meta": { "total": runs.len() } })))
}
