//! Instructor API endpoints
//!
//! Course authoring for instructors (and admins):
//! - /api/v1/instructor/courses - Own courses, create, edit, publish
//! - /api/v1/instructor/sections/{id} - Sections, their lessons and quizzes
//! - /api/v1/instructor/lessons/{id}
//! - /api/v1/instructor/quizzes/{id} - Quiz settings and questions
//! - /api/v1/instructor/questions/{id}
//! - /api/v1/instructor/dashboard, /api/v1/instructor/earnings
//!
//! Ownership is checked by the services; the router only requires the
//! instructor role.

use axum::{
    extract::{Path, State},
    routing::{get, post, put},
    Json, Router,
};

use crate::api::middleware::{ApiError, AppState, AuthenticatedUser};
use crate::api::responses::{ApiResponse, ApiResult, Created};
use crate::models::{
    Course, CourseOutline, CourseStudent, CreateCourseInput, CreateLessonInput, CreateQuizInput,
    CreateSectionInput, EarningsSummary, Lesson, Question, QuestionInput, Quiz, QuizDetail,
    ReorderItem, Section, UpdateCourseInput, UpdateLessonInput, UpdateQuizInput,
    UpdateSectionInput,
};
use crate::services::InstructorDashboard;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/dashboard", get(dashboard))
        .route("/earnings", get(earnings))
        .route("/courses", get(list_courses).post(create_course))
        .route(
            "/courses/{id}",
            get(get_course).put(update_course).delete(delete_course),
        )
        .route("/courses/{id}/publish", post(publish_course))
        .route("/courses/{id}/unpublish", post(unpublish_course))
        .route("/courses/{id}/students", get(list_students))
        .route("/courses/{id}/sections", post(create_section))
        .route("/courses/{id}/sections/reorder", put(reorder_sections))
        .route("/sections/{id}", put(update_section).delete(delete_section))
        .route("/sections/{id}/lessons", post(create_lesson))
        .route("/sections/{id}/quizzes", post(create_quiz))
        .route("/lessons/{id}", put(update_lesson).delete(delete_lesson))
        .route(
            "/quizzes/{id}",
            get(get_quiz).put(update_quiz).delete(delete_quiz),
        )
        .route("/quizzes/{id}/questions", post(add_question))
        .route("/questions/{id}", put(update_question).delete(delete_question))
}

// ============================================================================
// Dashboard
// ============================================================================

async fn dashboard(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
) -> ApiResult<InstructorDashboard> {
    let stats = state.dashboard_service.instructor(user.id).await?;
    Ok(ApiResponse::ok(stats))
}

async fn earnings(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
) -> ApiResult<EarningsSummary> {
    let summary = state.payment_service.instructor_earnings(user.id).await?;
    Ok(ApiResponse::ok(summary))
}

// ============================================================================
// Courses
// ============================================================================

async fn list_courses(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
) -> ApiResult<Vec<Course>> {
    let courses = state.course_service.list_instructor_courses(user.id).await?;
    Ok(ApiResponse::ok(courses))
}

async fn create_course(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    Json(body): Json<CreateCourseInput>,
) -> Result<Created<Course>, ApiError> {
    let course = state.course_service.create_course(&user, body).await?;
    Ok(Created(course))
}

/// Editor view: every section, lesson and quiz with full content
async fn get_course(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    Path(id): Path<i64>,
) -> ApiResult<CourseOutline> {
    let outline = state.course_service.editor_outline(&user, id).await?;
    Ok(ApiResponse::ok(outline))
}

async fn update_course(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    Path(id): Path<i64>,
    Json(body): Json<UpdateCourseInput>,
) -> ApiResult<Course> {
    let course = state.course_service.update_course(&user, id, body).await?;
    Ok(ApiResponse::ok(course))
}

async fn delete_course(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    Path(id): Path<i64>,
) -> ApiResult<()> {
    state.course_service.delete_course(&user, id).await?;
    Ok(ApiResponse::message("Course deleted"))
}

async fn publish_course(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    Path(id): Path<i64>,
) -> ApiResult<Course> {
    let course = state.course_service.publish_course(&user, id).await?;
    Ok(ApiResponse::ok(course))
}

async fn unpublish_course(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    Path(id): Path<i64>,
) -> ApiResult<Course> {
    let course = state.course_service.unpublish_course(&user, id).await?;
    Ok(ApiResponse::ok(course))
}

async fn list_students(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    Path(id): Path<i64>,
) -> ApiResult<Vec<CourseStudent>> {
    let students = state.enrollment_service.course_students(&user, id).await?;
    Ok(ApiResponse::ok(students))
}

// ============================================================================
// Sections
// ============================================================================

async fn create_section(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    Path(course_id): Path<i64>,
    Json(body): Json<CreateSectionInput>,
) -> Result<Created<Section>, ApiError> {
    let section = state.course_service.create_section(&user, course_id, body).await?;
    Ok(Created(section))
}

async fn reorder_sections(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    Path(course_id): Path<i64>,
    Json(items): Json<Vec<ReorderItem>>,
) -> ApiResult<Vec<Section>> {
    let sections = state
        .course_service
        .reorder_sections(&user, course_id, &items)
        .await?;
    Ok(ApiResponse::ok(sections))
}

async fn update_section(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    Path(id): Path<i64>,
    Json(body): Json<UpdateSectionInput>,
) -> ApiResult<Section> {
    let section = state.course_service.update_section(&user, id, body).await?;
    Ok(ApiResponse::ok(section))
}

/// Deleting a section removes its lessons and quizzes; returns the
/// course with refreshed totals
async fn delete_section(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    Path(id): Path<i64>,
) -> ApiResult<Course> {
    let course = state.course_service.delete_section(&user, id).await?;
    Ok(ApiResponse::ok(course).with_message("Section deleted"))
}

// ============================================================================
// Lessons
// ============================================================================

async fn create_lesson(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    Path(section_id): Path<i64>,
    Json(body): Json<CreateLessonInput>,
) -> Result<Created<Lesson>, ApiError> {
    let lesson = state.course_service.create_lesson(&user, section_id, body).await?;
    Ok(Created(lesson))
}

async fn update_lesson(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    Path(id): Path<i64>,
    Json(body): Json<UpdateLessonInput>,
) -> ApiResult<Lesson> {
    let lesson = state.course_service.update_lesson(&user, id, body).await?;
    Ok(ApiResponse::ok(lesson))
}

async fn delete_lesson(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    Path(id): Path<i64>,
) -> ApiResult<Course> {
    let course = state.course_service.delete_lesson(&user, id).await?;
    Ok(ApiResponse::ok(course).with_message("Lesson deleted"))
}

// ============================================================================
// Quizzes
// ============================================================================

async fn create_quiz(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    Path(section_id): Path<i64>,
    Json(body): Json<CreateQuizInput>,
) -> Result<Created<Quiz>, ApiError> {
    let quiz = state.quiz_service.create_quiz(&user, section_id, body).await?;
    Ok(Created(quiz))
}

async fn get_quiz(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    Path(id): Path<i64>,
) -> ApiResult<QuizDetail> {
    let detail = state.quiz_service.editor_detail(&user, id).await?;
    Ok(ApiResponse::ok(detail))
}

async fn update_quiz(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    Path(id): Path<i64>,
    Json(body): Json<UpdateQuizInput>,
) -> ApiResult<Quiz> {
    let quiz = state.quiz_service.update_quiz(&user, id, body).await?;
    Ok(ApiResponse::ok(quiz))
}

async fn delete_quiz(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    Path(id): Path<i64>,
) -> ApiResult<()> {
    state.quiz_service.delete_quiz(&user, id).await?;
    Ok(ApiResponse::message("Quiz deleted"))
}

async fn add_question(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    Path(quiz_id): Path<i64>,
    Json(body): Json<QuestionInput>,
) -> Result<Created<Question>, ApiError> {
    let question = state.quiz_service.add_question(&user, quiz_id, body).await?;
    Ok(Created(question))
}

async fn update_question(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    Path(id): Path<i64>,
    Json(body): Json<QuestionInput>,
) -> ApiResult<Question> {
    let question = state.quiz_service.update_question(&user, id, body).await?;
    Ok(ApiResponse::ok(question))
}

async fn delete_question(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    Path(id): Path<i64>,
) -> ApiResult<()> {
    state.quiz_service.delete_question(&user, id).await?;
    Ok(ApiResponse::message("Question deleted"))
}
