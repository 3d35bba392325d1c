//! API middleware
//!
//! Contains middleware for:
//! - Authentication (session token validation)
//! - Authorization (instructor and admin guards)
//! - Request statistics
//!
//! and the `ApiError` type every handler returns.

use axum::{
    extract::{FromRequestParts, Request, State},
    http::{header, request::Parts, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::config::Config;
use crate::db::Database;
use crate::models::User;
use crate::services::{
    CertificateService, CertificateServiceError, CourseService, CourseServiceError,
    DashboardError, DashboardService, EnrollmentService, EnrollmentServiceError, MessageService,
    MessageServiceError, NotificationService, NotificationServiceError, PaymentService,
    PaymentServiceError, QuizService, QuizServiceError, UserService, UserServiceError,
};

// ============================================================================
// Request Statistics
// ============================================================================

/// Lightweight request statistics using atomic operations (no locks)
pub struct RequestStats {
    total_requests: AtomicU64,
    /// Total response time in microseconds (for calculating average)
    total_response_time_us: AtomicU64,
    start_time: Instant,
}

impl RequestStats {
    pub fn new() -> Self {
        Self {
            total_requests: AtomicU64::new(0),
            total_response_time_us: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    /// Record a request with its response time
    pub fn record(&self, duration_us: u64) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.total_response_time_us.fetch_add(duration_us, Ordering::Relaxed);
    }

    pub fn total_requests(&self) -> u64 {
        self.total_requests.load(Ordering::Relaxed)
    }

    /// Average response time in microseconds
    pub fn avg_response_time_us(&self) -> f64 {
        let total = self.total_requests.load(Ordering::Relaxed);
        if total == 0 {
            return 0.0;
        }
        let total_time = self.total_response_time_us.load(Ordering::Relaxed);
        total_time as f64 / total as f64
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

impl Default for RequestStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Application state containing shared services
#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub config: Arc<Config>,
    pub user_service: Arc<UserService>,
    pub course_service: Arc<CourseService>,
    pub quiz_service: Arc<QuizService>,
    pub enrollment_service: Arc<EnrollmentService>,
    pub certificate_service: Arc<CertificateService>,
    pub payment_service: Arc<PaymentService>,
    pub message_service: Arc<MessageService>,
    pub notification_service: Arc<NotificationService>,
    pub dashboard_service: Arc<DashboardService>,
    pub request_stats: Arc<RequestStats>,
}

// ============================================================================
// Extractors
// ============================================================================

/// Authenticated user extracted from request
#[derive(Debug, Clone)]
pub struct AuthenticatedUser(pub User);

impl<S> FromRequestParts<S> for AuthenticatedUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthenticatedUser>()
            .cloned()
            .ok_or_else(|| ApiError::unauthorized("Authentication required"))
    }
}

/// The user when the request carried a valid session, for routes behind
/// `optional_auth`
#[derive(Debug, Clone)]
pub struct MaybeUser(pub Option<User>);

impl<S> FromRequestParts<S> for MaybeUser
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(MaybeUser(
            parts.extensions.get::<AuthenticatedUser>().map(|u| u.0.clone()),
        ))
    }
}

/// Raw session token of the current request
#[derive(Debug, Clone)]
pub struct SessionToken(pub String);

// ============================================================================
// Errors
// ============================================================================

/// Error response body: `{ "success": false, "code": ..., "message": ... }`
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiError {
    pub success: bool,
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            success: false,
            code: code.into(),
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(
        code: impl Into<String>,
        message: impl Into<String>,
        details: serde_json::Value,
    ) -> Self {
        Self {
            details: Some(details),
            ..Self::new(code, message)
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new("UNAUTHORIZED", message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new("FORBIDDEN", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new("NOT_FOUND", message)
    }

    pub fn validation_error(message: impl Into<String>) -> Self {
        Self::new("VALIDATION_ERROR", message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new("CONFLICT", message)
    }

    pub fn rate_limited(message: impl Into<String>, retry_after_secs: u64) -> Self {
        Self::with_details(
            "RATE_LIMIT",
            message,
            serde_json::json!({ "retry_after": retry_after_secs }),
        )
    }

    /// Logs the cause and hides it from the client
    pub fn internal_error(cause: impl std::fmt::Display) -> Self {
        tracing::error!("Internal error: {:#}", cause);
        Self::new("INTERNAL_ERROR", "Internal server error")
    }

    pub fn status(&self) -> StatusCode {
        match self.code.as_str() {
            "UNAUTHORIZED" => StatusCode::UNAUTHORIZED,
            "FORBIDDEN" | "USER_BANNED" => StatusCode::FORBIDDEN,
            "NOT_FOUND" => StatusCode::NOT_FOUND,
            "VALIDATION_ERROR" => StatusCode::BAD_REQUEST,
            "CONFLICT" => StatusCode::CONFLICT,
            "PAYMENT_REQUIRED" => StatusCode::PAYMENT_REQUIRED,
            "RATE_LIMIT" => StatusCode::TOO_MANY_REQUESTS,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status(), Json(self)).into_response()
    }
}

impl From<UserServiceError> for ApiError {
    fn from(err: UserServiceError) -> Self {
        match err {
            UserServiceError::AuthenticationError(msg) if msg.contains("banned") => {
                ApiError::new("USER_BANNED", msg)
            }
            UserServiceError::AuthenticationError(msg) => ApiError::unauthorized(msg),
            UserServiceError::ValidationError(msg) => ApiError::validation_error(msg),
            UserServiceError::UserExists(msg) => ApiError::conflict(msg),
            UserServiceError::NotFound => ApiError::not_found("User not found"),
            UserServiceError::RateLimited => ApiError::rate_limited(err.to_string(), 900),
            UserServiceError::PermissionDenied(msg) => ApiError::forbidden(msg),
            UserServiceError::InternalError(e) => ApiError::internal_error(e),
        }
    }
}

impl From<CourseServiceError> for ApiError {
    fn from(err: CourseServiceError) -> Self {
        match err {
            CourseServiceError::NotFound(_) => ApiError::not_found(err.to_string()),
            CourseServiceError::ValidationError(msg) => ApiError::validation_error(msg),
            CourseServiceError::Conflict(msg) => ApiError::conflict(msg),
            CourseServiceError::PermissionDenied(msg) => ApiError::forbidden(msg),
            CourseServiceError::InternalError(e) => ApiError::internal_error(e),
        }
    }
}

impl From<CertificateServiceError> for ApiError {
    fn from(err: CertificateServiceError) -> Self {
        match err {
            CertificateServiceError::NotFound(_) => ApiError::not_found(err.to_string()),
            CertificateServiceError::ValidationError(msg) => ApiError::validation_error(msg),
            CertificateServiceError::NotCompleted => ApiError::conflict(err.to_string()),
            CertificateServiceError::PermissionDenied(msg) => ApiError::forbidden(msg),
            CertificateServiceError::InternalError(e) => ApiError::internal_error(e),
        }
    }
}

impl From<EnrollmentServiceError> for ApiError {
    fn from(err: EnrollmentServiceError) -> Self {
        match err {
            EnrollmentServiceError::NotFound(_) => ApiError::not_found(err.to_string()),
            EnrollmentServiceError::NotEnrolled => ApiError::forbidden(err.to_string()),
            EnrollmentServiceError::AlreadyEnrolled => ApiError::conflict(err.to_string()),
            EnrollmentServiceError::PaymentRequired => {
                ApiError::new("PAYMENT_REQUIRED", err.to_string())
            }
            EnrollmentServiceError::NotAvailable(_) => ApiError::validation_error(err.to_string()),
            EnrollmentServiceError::PermissionDenied(msg) => ApiError::forbidden(msg),
            EnrollmentServiceError::Certificate(e) => e.into(),
            EnrollmentServiceError::InternalError(e) => ApiError::internal_error(e),
        }
    }
}

impl From<QuizServiceError> for ApiError {
    fn from(err: QuizServiceError) -> Self {
        match err {
            QuizServiceError::NotFound(_) => ApiError::not_found(err.to_string()),
            QuizServiceError::ValidationError(msg) => ApiError::validation_error(msg),
            QuizServiceError::NotEnrolled => ApiError::forbidden(err.to_string()),
            QuizServiceError::AttemptsExhausted => ApiError::conflict(err.to_string()),
            QuizServiceError::Course(e) => e.into(),
            QuizServiceError::Enrollment(e) => e.into(),
            QuizServiceError::InternalError(e) => ApiError::internal_error(e),
        }
    }
}

impl From<PaymentServiceError> for ApiError {
    fn from(err: PaymentServiceError) -> Self {
        match err {
            PaymentServiceError::NotFound(_) => ApiError::not_found(err.to_string()),
            PaymentServiceError::ValidationError(msg) => ApiError::validation_error(msg),
            PaymentServiceError::AlreadyEnrolled => ApiError::conflict(err.to_string()),
            PaymentServiceError::Conflict(msg) => ApiError::conflict(msg),
            PaymentServiceError::InvalidSignature => ApiError::unauthorized(err.to_string()),
            PaymentServiceError::WebhookDisabled => ApiError::forbidden(err.to_string()),
            PaymentServiceError::InternalError(e) => ApiError::internal_error(e),
        }
    }
}

impl From<MessageServiceError> for ApiError {
    fn from(err: MessageServiceError) -> Self {
        match err {
            MessageServiceError::NotFound(_) => ApiError::not_found(err.to_string()),
            MessageServiceError::ValidationError(msg) => ApiError::validation_error(msg),
            MessageServiceError::InternalError(e) => ApiError::internal_error(e),
        }
    }
}

impl From<NotificationServiceError> for ApiError {
    fn from(err: NotificationServiceError) -> Self {
        match err {
            NotificationServiceError::NotFound => ApiError::not_found(err.to_string()),
            NotificationServiceError::InternalError(e) => ApiError::internal_error(e),
        }
    }
}

impl From<DashboardError> for ApiError {
    fn from(err: DashboardError) -> Self {
        match err {
            DashboardError::Course(e) => e.into(),
            DashboardError::Enrollment(e) => e.into(),
            DashboardError::Payment(e) => e.into(),
            DashboardError::User(e) => e.into(),
            DashboardError::Certificate(e) => e.into(),
        }
    }
}

// ============================================================================
// Authentication
// ============================================================================

/// Extract session token from the `Authorization: Bearer` header or the
/// `session` cookie. The header wins when both are present.
fn extract_session_token(request: &Request) -> Option<String> {
    if let Some(auth_header) = request.headers().get(header::AUTHORIZATION) {
        if let Ok(auth_str) = auth_header.to_str() {
            if let Some(token) = auth_str.strip_prefix("Bearer ") {
                return Some(token.trim().to_string());
            }
        }
    }

    if let Some(cookie_header) = request.headers().get(header::COOKIE) {
        if let Ok(cookie_str) = cookie_header.to_str() {
            for cookie in cookie_str.split(';') {
                if let Some(token) = cookie.trim().strip_prefix("session=") {
                    return Some(token.to_string());
                }
            }
        }
    }

    None
}

/// Authentication middleware
pub async fn require_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = extract_session_token(&request)
        .ok_or_else(|| ApiError::unauthorized("Missing authentication token"))?;

    let user = state
        .user_service
        .validate_session(&token)
        .await?
        .ok_or_else(|| ApiError::unauthorized("Invalid or expired session"))?;

    request.extensions_mut().insert(AuthenticatedUser(user));
    request.extensions_mut().insert(SessionToken(token));
    Ok(next.run(request).await)
}

/// Optional authentication middleware
pub async fn optional_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    if let Some(token) = extract_session_token(&request) {
        if let Ok(Some(user)) = state.user_service.validate_session(&token).await {
            request.extensions_mut().insert(AuthenticatedUser(user));
        }
    }
    next.run(request).await
}

/// Instructor authorization middleware (admins pass too)
pub async fn require_instructor(request: Request, next: Next) -> Result<Response, ApiError> {
    let user = get_authenticated_user(&request)
        .ok_or_else(|| ApiError::unauthorized("Authentication required"))?;

    if !user.is_instructor() {
        return Err(ApiError::forbidden("Instructor privileges required"));
    }

    Ok(next.run(request).await)
}

/// Admin authorization middleware
pub async fn require_admin(request: Request, next: Next) -> Result<Response, ApiError> {
    let user = get_authenticated_user(&request)
        .ok_or_else(|| ApiError::unauthorized("Authentication required"))?;

    if !user.is_admin() {
        return Err(ApiError::forbidden("Admin privileges required"));
    }

    Ok(next.run(request).await)
}

/// Request statistics middleware
///
/// Records request count and response time for the health endpoint.
pub async fn request_stats_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let start = Instant::now();
    let response = next.run(request).await;
    state.request_stats.record(start.elapsed().as_micros() as u64);
    response
}

/// Extract authenticated user from request extensions
pub fn get_authenticated_user(request: &Request) -> Option<&User> {
    request.extensions().get::<AuthenticatedUser>().map(|au| &au.0)
}

// ============================================================================
// Tests
// ============================================================================
