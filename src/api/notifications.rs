//! Notification endpoints
//!
//! - GET /api/v1/notifications?unread=true - List
//! - GET /api/v1/notifications/unread-count
//! - PUT /api/v1/notifications/{id}/read, PUT /api/v1/notifications/read-all
//! - DELETE /api/v1/notifications/{id}

use axum::{
    extract::{Path, Query, State},
    routing::{delete, get, put},
    Router,
};
use serde::{Deserialize, Serialize};

use crate::api::common::{default_page, default_per_page};
use crate::api::middleware::{AppState, AuthenticatedUser};
use crate::api::responses::{ApiResponse, ApiResult};
use crate::models::{ListParams, Notification, PagedResult};

#[derive(Debug, Deserialize)]
pub struct NotificationQuery {
    #[serde(default)]
    pub unread: bool,
    #[serde(default = "default_page")]
    pub page: u32,
    #[serde(default = "default_per_page")]
    pub per_page: u32,
}

#[derive(Debug, Serialize)]
pub struct UnreadCount {
    pub unread: i64,
}

#[derive(Debug, Serialize)]
pub struct MarkedRead {
    pub updated: u64,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list))
        .route("/unread-count", get(unread_count))
        .route("/read-all", put(mark_all_read))
        .route("/{id}/read", put(mark_read))
        .route("/{id}", delete(remove))
}

async fn list(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    Query(query): Query<NotificationQuery>,
) -> ApiResult<PagedResult<Notification>> {
    let params = ListParams::new(query.page, query.per_page);
    let page = state
        .notification_service
        .list(user.id, query.unread, &params)
        .await?;
    Ok(ApiResponse::ok(page))
}

async fn unread_count(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
) -> ApiResult<UnreadCount> {
    let unread = state.notification_service.unread_count(user.id).await?;
    Ok(ApiResponse::ok(UnreadCount { unread }))
}

async fn mark_read(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    Path(id): Path<i64>,
) -> ApiResult<()> {
    state.notification_service.mark_read(user.id, id).await?;
    Ok(ApiResponse::message("Marked as read"))
}

async fn mark_all_read(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
) -> ApiResult<MarkedRead> {
    let updated = state.notification_service.mark_all_read(user.id).await?;
    Ok(ApiResponse::ok(MarkedRead { updated }))
}

async fn remove(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    Path(id): Path<i64>,
) -> ApiResult<()> {
    state.notification_service.delete(user.id, id).await?;
    Ok(ApiResponse::message("Notification deleted"))
}
