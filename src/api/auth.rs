//! Authentication API endpoints
//!
//! Handles HTTP requests for user authentication:
//! - POST /api/v1/auth/register - User registration
//! - POST /api/v1/auth/login - User login
//! - POST /api/v1/auth/logout - User logout
//! - GET /api/v1/auth/me - Get current user
//! - PUT /api/v1/auth/profile - Update display name and bio
//! - PUT /api/v1/auth/password - Change password

use axum::{
    extract::State,
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::IntoResponse,
    routing::{get, post, put},
    Extension, Json, Router,
};
use serde::Deserialize;

use crate::api::common::extract_ip_address;
use crate::api::middleware::{ApiError, AppState, AuthenticatedUser, SessionToken};
use crate::api::responses::{ApiResponse, ApiResult, AuthResponse, UserResponse};
use crate::models::Session;
use crate::services::user::{LoginInput, RegisterInput, UpdateProfileInput};

/// Request body for password change
#[derive(Debug, Deserialize)]
pub struct ChangePasswordRequest {
    pub current_password: String,
    pub new_password: String,
}

/// Build protected auth routes (requires auth middleware)
pub fn protected_router() -> Router<AppState> {
    Router::new()
        .route("/logout", post(logout))
        .route("/me", get(get_current_user))
        .route("/profile", put(update_profile))
        .route("/password", put(change_password))
}

/// Build public auth routes (no auth required)
pub fn public_router() -> Router<AppState> {
    Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
}

fn session_cookie(session: &Session, session_days: i64) -> Result<HeaderMap, ApiError> {
    let cookie = format!(
        "session={}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}",
        session.id,
        session_days * 24 * 60 * 60
    );
    let mut headers = HeaderMap::new();
    headers.insert(
        header::SET_COOKIE,
        HeaderValue::from_str(&cookie).map_err(ApiError::internal_error)?,
    );
    Ok(headers)
}

/// POST /api/v1/auth/register - User registration
///
/// The first account becomes the admin. The new user is logged in right away.
async fn register(
    State(state): State<AppState>,
    Json(body): Json<RegisterInput>,
) -> Result<impl IntoResponse, ApiError> {
    let password = body.password.clone();
    let user = state.user_service.register(body).await?;

    let auth = state
        .user_service
        .login(LoginInput::new(&user.username, password))
        .await?;
    let headers = session_cookie(&auth.session, state.config.auth.session_days)?;

    tracing::info!(user_id = auth.user.id, role = %auth.user.role, "User registered");
    Ok((
        StatusCode::CREATED,
        headers,
        ApiResponse::ok(AuthResponse::new(auth.user, &auth.session)),
    ))
}

/// POST /api/v1/auth/login - User login
///
/// Limited per client IP (10 requests per minute) and per username
/// (failed attempts lock the account name for a while).
async fn login(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<LoginInput>,
) -> Result<impl IntoResponse, ApiError> {
    let limiter = state.user_service.rate_limiter();
    if let Some(ip) = extract_ip_address(&headers) {
        if limiter.is_ip_limited(ip).await {
            tracing::warn!(%ip, "Login blocked by IP rate limit");
            return Err(ApiError::rate_limited("Too many requests, try again later", 60));
        }
        limiter.record_ip_request(ip).await;
    }

    let auth = state.user_service.login(body).await?;
    let headers = session_cookie(&auth.session, state.config.auth.session_days)?;

    Ok((
        headers,
        ApiResponse::ok(AuthResponse::new(auth.user, &auth.session)),
    ))
}

/// POST /api/v1/auth/logout - End the current session
async fn logout(
    State(state): State<AppState>,
    Extension(SessionToken(token)): Extension<SessionToken>,
) -> Result<impl IntoResponse, ApiError> {
    state.user_service.logout(&token).await?;

    let mut headers = HeaderMap::new();
    headers.insert(
        header::SET_COOKIE,
        HeaderValue::from_static("session=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0"),
    );
    Ok((headers, ApiResponse::message("Logged out")))
}

/// GET /api/v1/auth/me - Current user
async fn get_current_user(AuthenticatedUser(user): AuthenticatedUser) -> ApiResult<UserResponse> {
    Ok(ApiResponse::ok(user.into()))
}

/// PUT /api/v1/auth/profile
async fn update_profile(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    Json(body): Json<UpdateProfileInput>,
) -> ApiResult<UserResponse> {
    let user = state.user_service.update_profile(user.id, body).await?;
    Ok(ApiResponse::ok(user.into()))
}

/// PUT /api/v1/auth/password
///
/// Every other session of the user is ended.
async fn change_password(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    Extension(SessionToken(token)): Extension<SessionToken>,
    Json(body): Json<ChangePasswordRequest>,
) -> ApiResult<()> {
    state
        .user_service
        .change_password(user.id, &token, &body.current_password, &body.new_password)
        .await?;
    Ok(ApiResponse::message("Password changed"))
}
