//! HTTP front door for submitting chat requests and managing calibration.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use clipwire_core::errors::RelayError;
use clipwire_core::message::{Action, ChatPayload, Message};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

use crate::relay::{ClickTargets, Coordinator, ScreenPoint};

/// Application state shared with all routes
#[derive(Clone)]
pub struct AppState {
    coordinator: Arc<Coordinator>,
}

#[derive(Deserialize)]
pub struct ChatRequest {
    message: String,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    temperature: Option<f32>,
}

#[derive(Deserialize)]
pub struct CalibrateParams {
    x: Option<i32>,
    y: Option<i32>,
    read_x: Option<i32>,
    read_y: Option<i32>,
    write_x: Option<i32>,
    write_y: Option<i32>,
}

#[derive(Serialize)]
pub struct ErrorBody {
    error: String,
}

/// Error type mapped onto HTTP statuses.
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Timeout(String),
    Internal(RelayError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
            Self::Timeout(id) => (
                StatusCode::GATEWAY_TIMEOUT,
                format!("request {id} timed out"),
            ),
            Self::Internal(e) => {
                error!(error = %e, "request handling failed");
                (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
            }
        };
        (status, Json(ErrorBody { error: message })).into_response()
    }
}

impl From<RelayError> for ApiError {
    fn from(e: RelayError) -> Self {
        match e {
            RelayError::Timeout(id) => ApiError::Timeout(id),
            RelayError::NotCalibrated => {
                ApiError::BadRequest("click target not calibrated".into())
            }
            other => ApiError::Internal(other),
        }
    }
}

/// Start the HTTP server
pub async fn run_server(coordinator: Arc<Coordinator>, addr: SocketAddr) -> anyhow::Result<()> {
    info!("Starting HTTP server on {}", addr);

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/", get(health))
        .route("/api/status", get(handle_status))
        .route("/api/calibrate", get(handle_calibrate))
        .route("/api/chat", post(handle_chat))
        .layer(cors)
        .with_state(AppState { coordinator });

    axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .await
        .map_err(|e| anyhow::anyhow!("Failed to start HTTP server: {}", e))
}

async fn health() -> impl IntoResponse {
    "clipwire coordinator is running"
}

async fn handle_status(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.coordinator.status().await)
}

/// Pins click targets from query parameters: either `x`/`y` for a single
/// target, or `read_x`/`read_y`/`write_x`/`write_y` for a two-control UI.
async fn handle_calibrate(
    State(state): State<AppState>,
    Query(params): Query<CalibrateParams>,
) -> Result<impl IntoResponse, ApiError> {
    let targets = match params {
        CalibrateParams {
            read_x: Some(read_x),
            read_y: Some(read_y),
            write_x: Some(write_x),
            write_y: Some(write_y),
            ..
        } => ClickTargets::ReadWrite {
            read: ScreenPoint {
                x: read_x,
                y: read_y,
            },
            write: ScreenPoint {
                x: write_x,
                y: write_y,
            },
        },
        CalibrateParams {
            x: Some(x),
            y: Some(y),
            ..
        } => ClickTargets::Single(ScreenPoint { x, y }),
        _ => {
            return Err(ApiError::BadRequest(
                "need x/y, or read_x/read_y/write_x/write_y".into(),
            ))
        }
    };

    state.coordinator.calibrate(targets).await;
    Ok(Json(state.coordinator.status().await))
}

async fn handle_chat(
    State(state): State<AppState>,
    Json(payload): Json<ChatRequest>,
) -> Result<Json<Message>, ApiError> {
    let chat = ChatPayload {
        message: payload.message,
        chat_id: None,
        model: payload.model,
        temperature: payload.temperature,
    };
    let response = state
        .coordinator
        .execute(Action::Chat, serde_json::to_value(chat).map_err(RelayError::from)?)
        .await?;
    Ok(Json(response))
}
