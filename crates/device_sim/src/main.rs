use std::{net::SocketAddr, sync::Arc};

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post, put},
    Json, Router,
};
use shared::{
    domain::DeviceId,
    error::{ApiError, ErrorCode},
    protocol::{
        DeviceStatusResponse, DeviceSummary, IssueCommandRequest, IssueCommandResponse,
        SetOnlineRequest,
    },
};
use tracing::info;
use tracing_subscriber::EnvFilter;

mod config;
mod sim;

use config::{load_settings, Settings};
use sim::{SimError, SimulatedFleet};

#[derive(Clone)]
struct AppState {
    fleet: Arc<SimulatedFleet>,
}

type ApiResult<T> = Result<Json<T>, (StatusCode, Json<ApiError>)>;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let settings = load_settings()?;
    let state = AppState {
        fleet: Arc::new(fleet_from_settings(&settings)),
    };
    let app = build_router(Arc::new(state));

    let addr: SocketAddr = settings.bind_addr.parse()?;
    info!(
        %addr,
        devices = settings.devices.len(),
        lag_ms = settings.actuation_lag_ms,
        "sim: device simulator listening"
    );
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

fn fleet_from_settings(settings: &Settings) -> SimulatedFleet {
    settings.devices.iter().fold(
        SimulatedFleet::new(settings.actuation_lag(), settings.reject_offline),
        |fleet, id| {
            let online = !settings.offline_devices.contains(id);
            fleet.with_device(id.clone(), false, online)
        },
    )
}

fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/devices", get(list_devices))
        .route("/devices/:device_id/commands", post(issue_command))
        .route("/devices/:device_id/status", get(device_status))
        .route("/devices/:device_id/online", put(set_online))
        .with_state(state)
}

fn not_found(error: SimError) -> (StatusCode, Json<ApiError>) {
    (
        StatusCode::NOT_FOUND,
        Json(ApiError::new(ErrorCode::NotFound, error.to_string())),
    )
}

async fn healthz() -> &'static str {
    "ok"
}

async fn list_devices(State(state): State<Arc<AppState>>) -> Json<Vec<DeviceSummary>> {
    Json(state.fleet.list())
}

async fn issue_command(
    State(state): State<Arc<AppState>>,
    Path(device_id): Path<String>,
    Json(req): Json<IssueCommandRequest>,
) -> ApiResult<IssueCommandResponse> {
    if req.actor.trim().is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(ApiError::new(ErrorCode::Validation, "actor must not be empty")),
        ));
    }
    state
        .fleet
        .issue(&DeviceId::new(device_id), &req)
        .map(Json)
        .map_err(not_found)
}

async fn device_status(
    State(state): State<Arc<AppState>>,
    Path(device_id): Path<String>,
) -> ApiResult<DeviceStatusResponse> {
    state
        .fleet
        .status(&DeviceId::new(device_id))
        .map(Json)
        .map_err(not_found)
}

async fn set_online(
    State(state): State<Arc<AppState>>,
    Path(device_id): Path<String>,
    Json(req): Json<SetOnlineRequest>,
) -> ApiResult<DeviceSummary> {
    state
        .fleet
        .set_online(&DeviceId::new(device_id), req.online)
        .map(Json)
        .map_err(not_found)
}

#[cfg(test)]
#[path = "tests/main_tests.rs"]
mod tests;
