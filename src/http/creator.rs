use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use tracing::debug;

use crate::controller::{ControllerView, CreatorRegistrationState, ReconcileOutcome};
use crate::models::{CreatorProfileRequest, CreatorRecord, TipEvent};
use crate::profile::canonicalize_profile;
use crate::state::AppState;

use super::{HttpError, connected_address, parse_address};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/creator/status", get(status))
        .route("/creator/classify", post(classify))
        .route("/creator/repair", post(repair))
        .route("/creator/repair/ack", post(acknowledge_repair))
        .route("/creator/register", post(register))
        .route("/creator/profile", post(update_profile))
        .route("/creators", get(list_creators))
        .route("/creators/{address}", get(get_creator))
        .route("/creators/{address}/tips", get(get_tips))
}

#[derive(Debug, Serialize)]
struct StatusResponse {
    #[serde(flatten)]
    view: ControllerView,
    needs_fix: bool,
}

impl From<ControllerView> for StatusResponse {
    fn from(view: ControllerView) -> Self {
        Self {
            needs_fix: view.needs_fix(),
            view,
        }
    }
}

async fn status(State(state): State<AppState>) -> Json<StatusResponse> {
    Json(state.controller.view().into())
}

async fn classify(
    State(state): State<AppState>,
) -> Result<Json<CreatorRegistrationState>, HttpError> {
    let address = connected_address(&state)?;
    let registration = state.controller.classify(&address).await?;
    Ok(Json(registration))
}

async fn repair(State(state): State<AppState>) -> Result<Json<ReconcileOutcome>, HttpError> {
    let address = connected_address(&state)?;
    let outcome = state.controller.repair(&address).await?;
    Ok(Json(outcome))
}

async fn acknowledge_repair(State(state): State<AppState>) -> Json<StatusResponse> {
    state.controller.acknowledge_repair();
    Json(state.controller.view().into())
}

async fn register(
    State(state): State<AppState>,
    Json(request): Json<CreatorProfileRequest>,
) -> Result<Json<ReconcileOutcome>, HttpError> {
    let profile = canonicalize_profile(&request)?;
    let address = connected_address(&state)?;
    let outcome = state.controller.register(&address, &profile).await?;
    Ok(Json(outcome))
}

async fn update_profile(
    State(state): State<AppState>,
    Json(request): Json<CreatorProfileRequest>,
) -> Result<Json<ReconcileOutcome>, HttpError> {
    let profile = canonicalize_profile(&request)?;
    let address = connected_address(&state)?;
    let outcome = state.controller.update_profile(&address, &profile).await?;
    Ok(Json(outcome))
}

async fn list_creators(
    State(state): State<AppState>,
) -> Result<Json<Vec<CreatorRecord>>, HttpError> {
    let creators = state.ledger.query_creators().await?;
    assert!(
        creators.len() <= 100_000,
        "Creator directory exceeded defensive bound"
    );
    Ok(Json(creators))
}

async fn get_creator(
    Path(raw): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<CreatorRecord>, HttpError> {
    let address = parse_address(&raw)?;

    if let Some(cached) = state.cache.creator_records.get(&address).await {
        debug!("Creator record cache hit for {address}");
        return Ok(Json((*cached).clone()));
    }

    let record = state
        .ledger
        .query_creator_record(&address)
        .await?
        .ok_or_else(|| {
            HttpError::new(
                StatusCode::NOT_FOUND,
                format!("Creator {address} not found"),
            )
        })?;

    state
        .cache
        .creator_records
        .insert(address, Arc::new(record.clone()))
        .await;

    Ok(Json(record))
}

async fn get_tips(
    Path(raw): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<Vec<TipEvent>>, HttpError> {
    let address = parse_address(&raw)?;
    let tips = state.ledger.query_tip_history(&address).await?;
    Ok(Json(tips))
}
