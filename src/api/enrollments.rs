//! Enrollment and progress endpoints
//!
//! - POST /api/v1/courses/{id}/enroll - Enroll in a free course
//! - GET /api/v1/enrollments - My enrollments
//! - GET /api/v1/enrollments/{course_id}/progress - Per-section progress
//! - POST /api/v1/lessons/{id}/complete - Mark a lesson completed

use axum::{
    extract::{Path, State},
    routing::{get, post},
    Router,
};

use crate::api::middleware::{ApiError, AppState, AuthenticatedUser};
use crate::api::responses::{ApiResponse, ApiResult, Created};
use crate::models::{CourseProgress, Enrollment, EnrollmentWithCourse};
use crate::services::CompletionOutcome;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/courses/{course}/enroll", post(enroll))
        .route("/enrollments", get(list_enrollments))
        .route("/enrollments/{course_id}/progress", get(get_progress))
        .route("/lessons/{id}/complete", post(complete_lesson))
}

async fn enroll(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    Path(course_id): Path<i64>,
) -> Result<Created<Enrollment>, ApiError> {
    let enrollment = state.enrollment_service.enroll(&user, course_id).await?;
    Ok(Created(enrollment))
}

async fn list_enrollments(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
) -> ApiResult<Vec<EnrollmentWithCourse>> {
    let enrollments = state.enrollment_service.my_enrollments(user.id).await?;
    Ok(ApiResponse::ok(enrollments))
}

async fn get_progress(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    Path(course_id): Path<i64>,
) -> ApiResult<CourseProgress> {
    let progress = state
        .enrollment_service
        .course_progress(user.id, course_id)
        .await?;
    Ok(ApiResponse::ok(progress))
}

/// Completing the last item finishes the course and returns its certificate
async fn complete_lesson(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    Path(lesson_id): Path<i64>,
) -> ApiResult<CompletionOutcome> {
    let outcome = state
        .enrollment_service
        .complete_lesson(&user, lesson_id)
        .await?;
    let response = ApiResponse::ok(outcome);
    Ok(match &response.data {
        Some(o) if o.course_completed => response.with_message("Course completed"),
        _ => response,
    })
}
