use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;

use crate::controller::ControllerView;
use crate::models::WalletIdentity;
use crate::state::AppState;

use super::HttpError;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/session", get(current))
        .route("/session/connect", post(connect))
        .route("/session/disconnect", post(disconnect))
}

#[derive(Debug, Serialize)]
struct SessionResponse {
    identity: WalletIdentity,
    creator: ControllerView,
}

async fn current(State(state): State<AppState>) -> Json<SessionResponse> {
    Json(SessionResponse {
        identity: state.session.identity(),
        creator: state.controller.view(),
    })
}

async fn connect(State(state): State<AppState>) -> Result<Json<SessionResponse>, HttpError> {
    let (identity, creator) = state.session.connect().await?;
    Ok(Json(SessionResponse { identity, creator }))
}

async fn disconnect(State(state): State<AppState>) -> Result<Json<SessionResponse>, HttpError> {
    state.session.disconnect().await?;
    Ok(Json(SessionResponse {
        identity: state.session.identity(),
        creator: state.controller.view(),
    }))
}
