//! Health check endpoint
//!
//! GET /api/v1/health - Database reachability, schema state and request statistics

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Router};
use serde::Serialize;

use crate::api::middleware::AppState;
use crate::api::responses::ApiResponse;
use crate::db::migrations;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub database: &'static str,
    /// Migrations embedded in this build that the database has not applied
    pub pending_migrations: usize,
    pub version: &'static str,
    pub total_requests: u64,
    pub avg_response_time_ms: f64,
    pub uptime_seconds: u64,
}

pub fn router() -> Router<AppState> {
    Router::new().route("/", get(health))
}

/// Responds 503 when the database cannot be reached
async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let db_ok = match state.db.ping().await {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!("Health check database ping failed: {:#}", e);
            false
        }
    };

    let pending_migrations = if db_ok {
        match migrations::pending_count(&state.db).await {
            Ok(pending) => pending,
            Err(e) => {
                tracing::warn!("Health check could not read migrations: {:#}", e);
                0
            }
        }
    } else {
        0
    };

    let stats = &state.request_stats;
    let body = HealthResponse {
        status: if db_ok && pending_migrations == 0 { "ok" } else { "degraded" },
        database: if db_ok { "up" } else { "down" },
        pending_migrations,
        version: env!("CARGO_PKG_VERSION"),
        total_requests: stats.total_requests(),
        avg_response_time_ms: (stats.avg_response_time_us() / 10.0).round() / 100.0,
        uptime_seconds: stats.uptime_seconds(),
    };

    let status = if db_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, ApiResponse::ok(body))
}
