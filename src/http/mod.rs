use std::time::Duration;

use axum::Json;
use axum::Router;
use axum::extract::State;
use axum::http::Method;
use axum::http::StatusCode;
use axum::http::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use serde::Serialize;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::controller::ControllerError;
use crate::ledger::{QueryError, SubmissionError, WalletError, rejection_hint};
use crate::models::Address;
use crate::profile::ProfileError;
use crate::state::AppState;
use crate::transfers::TransferError;

mod creator;
mod session;
mod transfers;

pub fn router(state: AppState) -> Router {
    assert!(
        state.start_time.elapsed() < Duration::from_secs(86_400),
        "Application uptime exceeds 24 hours before router creation"
    );

    // The front-end talks to this service straight from the browser.
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([ACCEPT, AUTHORIZATION, CONTENT_TYPE])
        .max_age(Duration::from_secs(3600));

    Router::new()
        .route("/health", get(health_live))
        .route("/health/ready", get(health_ready))
        .merge(session::router())
        .merge(creator::router())
        .merge(transfers::router())
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
        .with_state(state)
}

async fn health_live(State(state): State<AppState>) -> Result<Json<HealthResponse>, HttpError> {
    let uptime = state.start_time.elapsed().as_secs();
    assert!(
        uptime <= 31_536_000,
        "Uptime exceeds one year without restart"
    );
    let response = HealthResponse {
        status: "live",
        uptime_seconds: uptime,
    };
    Ok(Json(response))
}

async fn health_ready(State(state): State<AppState>) -> Result<Json<ReadyResponse>, HttpError> {
    state
        .analytics
        .ping()
        .await
        .map_err(|err| HttpError::new(StatusCode::SERVICE_UNAVAILABLE, err.to_string()))?;

    let view = state.controller.view();
    let response = ReadyResponse {
        status: "ready",
        wallet_connected: view.address.is_some(),
        registration: view.registration().map(|registration| registration.label()),
        analytics_enabled: state.analytics.is_enabled(),
        cache_entries: CacheSummary {
            creator_records: state.cache.creator_records.entry_count(),
        },
    };
    Ok(Json(response))
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    uptime_seconds: u64,
}

#[derive(Debug, Serialize)]
struct ReadyResponse {
    status: &'static str,
    wallet_connected: bool,
    registration: Option<&'static str>,
    analytics_enabled: bool,
    cache_entries: CacheSummary,
}

#[derive(Debug, Serialize)]
struct CacheSummary {
    creator_records: u64,
}

/// Address of the wallet currently signed in, or 401.
fn connected_address(state: &AppState) -> Result<Address, HttpError> {
    state
        .session
        .identity()
        .active_address()
        .cloned()
        .ok_or_else(|| HttpError::new(StatusCode::UNAUTHORIZED, "Wallet is not connected".to_string()))
}

fn parse_address(raw: &str) -> Result<Address, HttpError> {
    Address::parse(raw)
        .map_err(|err| HttpError::new(StatusCode::BAD_REQUEST, format!("Invalid address {raw}: {err}")))
}

#[derive(Debug)]
pub struct HttpError {
    status: StatusCode,
    message: String,
    hint: Option<&'static str>,
}

impl HttpError {
    pub fn new(status: StatusCode, message: String) -> Self {
        assert!(status != StatusCode::OK, "Error status cannot be 200");
        assert!(!message.is_empty(), "Error message cannot be empty");
        Self {
            status,
            message,
            hint: None,
        }
    }

    fn with_hint(mut self, hint: Option<&'static str>) -> Self {
        self.hint = hint;
        self
    }
}

impl From<QueryError> for HttpError {
    fn from(err: QueryError) -> Self {
        let status = match err {
            QueryError::Capability { .. } => StatusCode::CONFLICT,
            QueryError::Transport { .. } | QueryError::Malformed { .. } => StatusCode::BAD_GATEWAY,
        };
        let message = err.to_string();
        Self::new(status, message.clone()).with_hint(rejection_hint(&message))
    }
}

impl From<SubmissionError> for HttpError {
    fn from(err: SubmissionError) -> Self {
        match &err {
            SubmissionError::UserCancelled => Self::new(StatusCode::CONFLICT, err.to_string()),
            SubmissionError::Timeout => Self::new(StatusCode::GATEWAY_TIMEOUT, err.to_string()),
            SubmissionError::TransactionRejected(_) => {
                let reason = err.reason();
                let hint = rejection_hint(&reason);
                Self::new(StatusCode::UNPROCESSABLE_ENTITY, reason).with_hint(hint)
            }
            SubmissionError::Unknown(_) => Self::new(StatusCode::BAD_GATEWAY, err.reason()),
        }
    }
}

impl From<ControllerError> for HttpError {
    fn from(err: ControllerError) -> Self {
        match err {
            ControllerError::InFlight(_) => Self::new(StatusCode::CONFLICT, err.to_string()),
            ControllerError::Submission(err) => err.into(),
        }
    }
}

impl From<TransferError> for HttpError {
    fn from(err: TransferError) -> Self {
        match err {
            TransferError::InvalidAmount(_) | TransferError::MessageTooLong(_) => {
                Self::new(StatusCode::BAD_REQUEST, err.to_string())
            }
            TransferError::NotConnected => Self::new(StatusCode::UNAUTHORIZED, err.to_string()),
            TransferError::RecipientNotCreator(_) => Self::new(StatusCode::NOT_FOUND, err.to_string()),
            TransferError::InsufficientBalance { .. } => {
                let message = err.to_string();
                Self::new(StatusCode::UNPROCESSABLE_ENTITY, message.clone())
                    .with_hint(rejection_hint(&message))
            }
            TransferError::Query(err) => err.into(),
            TransferError::Submission(err) => err.into(),
        }
    }
}

impl From<WalletError> for HttpError {
    fn from(err: WalletError) -> Self {
        let status = match err {
            WalletError::Declined => StatusCode::FORBIDDEN,
            WalletError::Transport(_) | WalletError::Malformed(_) => StatusCode::BAD_GATEWAY,
        };
        Self::new(status, err.to_string())
    }
}

impl From<ProfileError> for HttpError {
    fn from(err: ProfileError) -> Self {
        Self::new(StatusCode::BAD_REQUEST, err.to_string())
    }
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        info!("HTTP error: {}", self.message);
        let body = Json(ErrorBody {
            error: self.message,
            hint: self.hint,
        });
        (self.status, body).into_response()
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    hint: Option<&'static str>,
}
