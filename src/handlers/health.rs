use axum::{extract::State, Json};
use serde::Serialize;
use utoipa::ToSchema;

use crate::{db, AppState};

#[derive(Debug, Serialize, ToSchema)]
pub struct HealthStatus {
    pub status: String,
    pub database: String,
    pub version: String,
}

/// Liveness check with a database ping
#[utoipa::path(
    get,
    path = "/health",
    summary = "Service health",
    responses((status = 200, description = "Health report", body = HealthStatus))
)]
pub async fn health_check(State(state): State<AppState>) -> Json<HealthStatus> {
    let database = match db::check_connection(&state.db).await {
        Ok(()) => "up",
        Err(_) => "down",
    };

    Json(HealthStatus {
        status: if database == "up" { "ok" } else { "degraded" }.to_string(),
        database: database.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}
