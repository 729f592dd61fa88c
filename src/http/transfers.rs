use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use serde::Deserialize;

use crate::state::AppState;
use crate::transfers::TransferReceipt;

use super::{HttpError, parse_address};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/tips", post(send_tip))
        .route("/withdrawals", post(withdraw))
}

/// Amounts stay strings so validation happens in one place.
#[derive(Debug, Deserialize)]
struct TipRequest {
    recipient: String,
    amount: String,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct WithdrawRequest {
    amount: String,
}

async fn send_tip(
    State(state): State<AppState>,
    Json(request): Json<TipRequest>,
) -> Result<Json<TransferReceipt>, HttpError> {
    let recipient = parse_address(&request.recipient)?;
    let receipt = state
        .transfers
        .send_tip(&recipient, &request.amount, &request.message)
        .await?;
    Ok(Json(receipt))
}

async fn withdraw(
    State(state): State<AppState>,
    Json(request): Json<WithdrawRequest>,
) -> Result<Json<TransferReceipt>, HttpError> {
    let receipt = state.transfers.withdraw(&request.amount).await?;
    Ok(Json(receipt))
}
