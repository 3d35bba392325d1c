//! Messaging endpoints
//!
//! - GET /api/v1/conversations - My conversations, newest first
//! - GET /api/v1/conversations/{id}/messages - Read a conversation
//! - POST /api/v1/messages - Send a message

use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};

use crate::api::common::PaginationQuery;
use crate::api::middleware::{ApiError, AppState, AuthenticatedUser};
use crate::api::responses::{ApiResponse, ApiResult, Created};
use crate::models::{ConversationSummary, Message, PagedResult, SendMessageInput};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/conversations", get(list_conversations))
        .route("/conversations/{id}/messages", get(get_messages))
        .route("/messages", post(send_message))
}

async fn list_conversations(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
) -> ApiResult<Vec<ConversationSummary>> {
    let conversations = state.message_service.list_conversations(user.id).await?;
    Ok(ApiResponse::ok(conversations))
}

async fn get_messages(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    Path(id): Path<i64>,
    Query(page): Query<PaginationQuery>,
) -> ApiResult<PagedResult<Message>> {
    let messages = state
        .message_service
        .get_messages(user.id, id, &page.into())
        .await?;
    Ok(ApiResponse::ok(messages))
}

async fn send_message(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    Json(body): Json<SendMessageInput>,
) -> Result<Created<Message>, ApiError> {
    let message = state.message_service.send_message(&user, body).await?;
    Ok(Created(message))
}
