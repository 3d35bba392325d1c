//! Quiz taking endpoints
//!
//! - GET /api/v1/quizzes/{id} - Quiz without answers marked
//! - POST /api/v1/quizzes/{id}/attempts - Submit answers for grading
//! - GET /api/v1/quizzes/{id}/attempts - My previous attempts

use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};

use crate::api::middleware::{ApiError, AppState, AuthenticatedUser};
use crate::api::responses::{ApiResponse, ApiResult, Created};
use crate::models::{QuizAttempt, QuizDetail, QuizSubmission};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/{id}", get(get_quiz))
        .route("/{id}/attempts", get(list_attempts).post(submit_attempt))
}

async fn get_quiz(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    Path(id): Path<i64>,
) -> ApiResult<QuizDetail> {
    let quiz = state.quiz_service.get_for_student(&user, id).await?;
    Ok(ApiResponse::ok(quiz))
}

async fn submit_attempt(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    Path(id): Path<i64>,
    Json(body): Json<QuizSubmission>,
) -> Result<Created<QuizAttempt>, ApiError> {
    let attempt = state.quiz_service.submit_attempt(&user, id, body).await?;
    Ok(Created(attempt))
}

async fn list_attempts(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    Path(id): Path<i64>,
) -> ApiResult<Vec<QuizAttempt>> {
    let attempts = state.quiz_service.list_attempts(&user, id).await?;
    Ok(ApiResponse::ok(attempts))
}
