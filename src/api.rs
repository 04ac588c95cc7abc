//! ==============================================================================
//! api.rs - json view api
//! ==============================================================================
//!
//! routes:
//!     GET  /api                         every rig's published view
//!     GET  /api/rigs/{name}             one rig
//!     POST /api/rigs/{name}/control     {action, controller, value?}
//!     POST /api/rigs/{name}/window      ?minutes=30|60|240|1440|10080
//!     POST /api/system                  ?action=reboot|poweroff|launch_keyboard|close_keyboard
//!
//! ==============================================================================

use anyhow::Result;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use serde_json::json;
use tower_http::cors::CorsLayer;

use crate::dashboard::{ControlRequest, Dashboard, DashboardState};
use crate::domain::{RetentionWindow, SystemCommand};
use crate::error::DashError;
use crate::view::RigView;

pub fn router(dashboard: Dashboard) -> Router {
    Router::new()
        .route("/api", get(state_handler))
        .route("/api/rigs/:name", get(rig_handler))
        .route("/api/rigs/:name/control", post(control_handler))
        .route("/api/rigs/:name/window", post(window_handler))
        .route("/api/system", post(system_handler))
        .layer(CorsLayer::permissive())
        .with_state(dashboard)
}

pub async fn run_server(dashboard: Dashboard, bind: &str) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    axum::serve(listener, router(dashboard)).await?;
    Ok(())
}

/// error body in the same `{status, message}` shape as the success replies
struct ApiError(DashError);

impl From<DashError> for ApiError {
    fn from(e: DashError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            DashError::UnknownRig(_) => StatusCode::NOT_FOUND,
            DashError::MalformedPayload(_) | DashError::InvalidWindow(_) => StatusCode::BAD_REQUEST,
            DashError::ChannelSendRejected { .. } | DashError::ChannelClosed(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = json!({"status": "error", "message": self.0.to_string()});
        (status, Json(body)).into_response()
    }
}

fn ok() -> Json<serde_json::Value> {
    Json(json!({"status": "ok"}))
}

async fn state_handler(State(dashboard): State<Dashboard>) -> Json<DashboardState> {
    Json(dashboard.snapshot().await)
}

async fn rig_handler(
    State(dashboard): State<Dashboard>,
    Path(name): Path<String>,
) -> Result<Json<RigView>, ApiError> {
    Ok(Json(dashboard.rig(&name).await?))
}

async fn control_handler(
    State(dashboard): State<Dashboard>,
    Path(name): Path<String>,
    Json(request): Json<ControlRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    dashboard.control(&name, request).await?;
    Ok(ok())
}

#[derive(Deserialize)]
struct WindowParams {
    minutes: u32,
}

async fn window_handler(
    State(dashboard): State<Dashboard>,
    Path(name): Path<String>,
    Query(params): Query<WindowParams>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let window = RetentionWindow::try_from(params.minutes)?;
    dashboard.set_window(&name, window).await?;
    Ok(ok())
}

#[derive(Deserialize)]
struct SystemParams {
    action: String,
}

/// POST /api/system?action=reboot|poweroff|launch_keyboard|close_keyboard
async fn system_handler(
    State(dashboard): State<Dashboard>,
    Query(params): Query<SystemParams>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let command: SystemCommand = params.action.parse()?;
    dashboard.system(command)?;
    Ok(ok())
}
