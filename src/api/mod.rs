//! API layer - HTTP handlers and routing
//!
//! Every endpoint lives under `/api/v1` and answers with the
//! `{success, data, message}` envelope. Routes are grouped by the guard
//! they sit behind:
//! - public: catalog, auth, certificate verification, payment webhook
//! - optional auth: lesson content (previews for anonymous viewers)
//! - user: enrollments, quizzes, certificates, payments, messages, notifications
//! - instructor: course authoring and instructor dashboard
//! - admin: users, certificate templates, payments, platform dashboard

pub mod admin;
pub mod auth;
pub mod certificates;
pub mod common;
pub mod courses;
pub mod enrollments;
pub mod health;
pub mod instructor;
pub mod messages;
pub mod middleware;
pub mod notifications;
pub mod payments;
pub mod quizzes;
pub mod responses;

use std::sync::Arc;

use axum::{
    http::{header, HeaderValue, Method},
    middleware as axum_middleware,
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::cache::Cache;
use crate::config::Config;
use crate::db::repositories::{
    SqlxCertificateRepository, SqlxCourseRepository, SqlxEnrollmentRepository,
    SqlxMessageRepository, SqlxNotificationRepository, SqlxPaymentRepository,
    SqlxQuizRepository, SqlxSectionRepository, SqlxSessionRepository, SqlxUserRepository,
};
use crate::db::Database;
use crate::services::{
    CertificateService, CourseService, DashboardService, EnrollmentService, MessageService,
    NotificationService, PaymentService, QuizService, UserService,
};

pub use middleware::{ApiError, AppState, RequestStats};

/// Wire repositories and services into the shared application state
pub fn build_state(db: Database, config: Config, cache: Arc<Cache>) -> AppState {
    let user_repo = SqlxUserRepository::boxed(db.clone());
    let session_repo = SqlxSessionRepository::boxed(db.clone());
    let course_repo = SqlxCourseRepository::boxed(db.clone());
    let section_repo = SqlxSectionRepository::boxed(db.clone());
    let quiz_repo = SqlxQuizRepository::boxed(db.clone());
    let enrollment_repo = SqlxEnrollmentRepository::boxed(db.clone());
    let certificate_repo = SqlxCertificateRepository::boxed(db.clone());
    let payment_repo = SqlxPaymentRepository::boxed(db.clone());
    let message_repo = SqlxMessageRepository::boxed(db.clone());
    let notification_repo = SqlxNotificationRepository::boxed(db.clone());

    let notification_service = Arc::new(NotificationService::new(notification_repo));
    let certificate_service = Arc::new(CertificateService::new(
        certificate_repo,
        enrollment_repo.clone(),
        course_repo.clone(),
        user_repo.clone(),
        notification_service.clone(),
    ));
    let enrollment_service = Arc::new(EnrollmentService::new(
        enrollment_repo.clone(),
        course_repo.clone(),
        section_repo.clone(),
        quiz_repo.clone(),
        certificate_service.clone(),
        notification_service.clone(),
    ));
    let course_service = Arc::new(CourseService::new(
        course_repo.clone(),
        section_repo,
        quiz_repo.clone(),
        user_repo.clone(),
        enrollment_repo.clone(),
        enrollment_service.clone(),
        cache,
        config.payments.currency.clone(),
    ));
    let quiz_service = Arc::new(QuizService::new(
        quiz_repo,
        course_service.clone(),
        enrollment_service.clone(),
        notification_service.clone(),
    ));
    let payment_service = Arc::new(PaymentService::new(
        payment_repo,
        course_repo.clone(),
        enrollment_repo,
        notification_service.clone(),
        config.payments.clone(),
    ));
    let message_service = Arc::new(MessageService::new(
        message_repo,
        user_repo.clone(),
        course_repo,
    ));
    let user_service = Arc::new(UserService::new(user_repo, session_repo, &config.auth));
    let dashboard_service = Arc::new(DashboardService::new(
        user_service.clone(),
        course_service.clone(),
        enrollment_service.clone(),
        payment_service.clone(),
        certificate_service.clone(),
    ));

    AppState {
        db,
        config: Arc::new(config),
        user_service,
        course_service,
        quiz_service,
        enrollment_service,
        certificate_service,
        payment_service,
        message_service,
        notification_service,
        dashboard_service,
        request_stats: Arc::new(RequestStats::new()),
    }
}

/// Build the `/api/v1` router
pub fn build_api_router(state: AppState) -> Router<AppState> {
    // Admin routes (need admin role)
    let admin_routes = Router::new()
        .nest("/admin", admin::router())
        .route_layer(axum_middleware::from_fn(middleware::require_admin))
        .route_layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::require_auth,
        ));

    // Instructor routes (instructors and admins)
    let instructor_routes = Router::new()
        .nest("/instructor", instructor::router())
        .route_layer(axum_middleware::from_fn(middleware::require_instructor))
        .route_layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::require_auth,
        ));

    // Protected routes (any signed-in user)
    let protected_routes = Router::new()
        .nest("/auth", auth::protected_router())
        .nest("/quizzes", quizzes::router())
        .nest("/certificates", certificates::protected_router())
        .nest("/payments", payments::protected_router())
        .nest("/notifications", notifications::router())
        .merge(enrollments::router())
        .merge(messages::router())
        .route_layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::require_auth,
        ));

    // Lesson content: previews are public, the rest needs an enrollment
    let optional_routes = Router::new()
        .nest("/lessons", courses::lesson_router())
        .route_layer(axum_middleware::from_fn_with_state(
            state,
            middleware::optional_auth,
        ));

    // Public routes
    Router::new()
        .nest("/health", health::router())
        .nest("/auth", auth::public_router())
        .nest("/courses", courses::router())
        .nest("/certificates", certificates::public_router())
        .nest("/payments", payments::webhook_router())
        .merge(optional_routes)
        .merge(admin_routes)
        .merge(instructor_routes)
        .merge(protected_routes)
}

/// Build the complete router with middleware
pub fn build_router(state: AppState) -> Router {
    let cors_origin = state.config.server.cors_origin.clone();
    let cors = match cors_origin.parse::<HeaderValue>() {
        Ok(origin) => CorsLayer::new().allow_origin(origin).allow_credentials(true),
        Err(_) => {
            tracing::warn!(%cors_origin, "Invalid CORS origin, cross-origin requests disabled");
            CorsLayer::new()
        }
    }
    .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
    .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION, header::COOKIE]);

    Router::new()
        .nest("/api/v1", build_api_router(state.clone()))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        // Request stats middleware (outermost layer, runs for all requests)
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::request_stats_middleware,
        ))
        .with_state(state)
}
