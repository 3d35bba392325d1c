//! Admin API endpoints
//!
//! Handles HTTP requests for platform administration:
//! - GET /api/v1/admin/dashboard - Platform totals
//! - GET /api/v1/admin/users - Users, optionally by role
//! - PUT /api/v1/admin/users/{id}/role, PUT /api/v1/admin/users/{id}/status
//! - /api/v1/admin/templates - Certificate template management
//! - GET /api/v1/admin/templates/placeholders - Names templates may use
//! - GET /api/v1/admin/payments, POST /api/v1/admin/payments/{id}/refund

use axum::{
    extract::{Path, Query, State},
    routing::{get, post, put},
    Json, Router,
};
use serde::Deserialize;

use crate::api::common::{default_page, default_per_page};
use crate::api::middleware::{ApiError, AppState, AuthenticatedUser};
use crate::api::responses::{ApiResponse, ApiResult, Created, UserResponse};
use crate::models::{
    CertificateTemplate, CreateTemplateInput, ListParams, PagedResult, Payment, PaymentStatus,
    TemplateLayout, UpdateTemplateInput, UserRole, UserStatus, PLACEHOLDERS,
};
use crate::services::AdminDashboard;

#[derive(Debug, Deserialize)]
pub struct UserListQuery {
    pub role: Option<UserRole>,
    #[serde(default = "default_page")]
    pub page: u32,
    #[serde(default = "default_per_page")]
    pub per_page: u32,
}

#[derive(Debug, Deserialize)]
pub struct PaymentListQuery {
    pub status: Option<PaymentStatus>,
    #[serde(default = "default_page")]
    pub page: u32,
    #[serde(default = "default_per_page")]
    pub per_page: u32,
}

#[derive(Debug, Deserialize)]
pub struct RoleRequest {
    pub role: UserRole,
}

#[derive(Debug, Deserialize)]
pub struct StatusRequest {
    pub status: UserStatus,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/dashboard", get(get_dashboard))
        .route("/users", get(list_users))
        .route("/users/{id}/role", put(set_role))
        .route("/users/{id}/status", put(set_status))
        .route("/templates", get(list_templates).post(create_template))
        .route(
            "/templates/{id}",
            get(get_template).put(update_template).delete(delete_template),
        )
        .route("/templates/placeholders", get(list_placeholders))
        .route("/templates/{id}/preview", get(preview_template))
        .route("/payments", get(list_payments))
        .route("/payments/{id}/refund", post(refund_payment))
}

/// GET /api/v1/admin/dashboard
async fn get_dashboard(State(state): State<AppState>) -> ApiResult<AdminDashboard> {
    let stats = state.dashboard_service.admin().await?;
    Ok(ApiResponse::ok(stats))
}

// ============================================================================
// Users
// ============================================================================

async fn list_users(
    State(state): State<AppState>,
    Query(query): Query<UserListQuery>,
) -> ApiResult<PagedResult<UserResponse>> {
    let params = ListParams::new(query.page, query.per_page);
    let users = state.user_service.list_users(&params, query.role).await?;
    Ok(ApiResponse::ok(users.map(UserResponse::from)))
}

async fn set_role(
    State(state): State<AppState>,
    AuthenticatedUser(admin): AuthenticatedUser,
    Path(id): Path<i64>,
    Json(body): Json<RoleRequest>,
) -> ApiResult<UserResponse> {
    let user = state.user_service.set_role(admin.id, id, body.role).await?;
    Ok(ApiResponse::ok(user.into()))
}

/// Banning also ends every session of the user
async fn set_status(
    State(state): State<AppState>,
    AuthenticatedUser(admin): AuthenticatedUser,
    Path(id): Path<i64>,
    Json(body): Json<StatusRequest>,
) -> ApiResult<UserResponse> {
    let user = state.user_service.set_status(admin.id, id, body.status).await?;
    Ok(ApiResponse::ok(user.into()))
}

// ============================================================================
// Certificate templates
// ============================================================================

async fn list_templates(State(state): State<AppState>) -> ApiResult<Vec<CertificateTemplate>> {
    let templates = state.certificate_service.list_templates().await?;
    Ok(ApiResponse::ok(templates))
}

async fn get_template(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<CertificateTemplate> {
    let template = state.certificate_service.get_template(id).await?;
    Ok(ApiResponse::ok(template))
}

async fn create_template(
    State(state): State<AppState>,
    AuthenticatedUser(admin): AuthenticatedUser,
    Json(body): Json<CreateTemplateInput>,
) -> Result<Created<CertificateTemplate>, ApiError> {
    let template = state.certificate_service.create_template(admin.id, body).await?;
    Ok(Created(template))
}

async fn update_template(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(body): Json<UpdateTemplateInput>,
) -> ApiResult<CertificateTemplate> {
    let template = state.certificate_service.update_template(id, body).await?;
    Ok(ApiResponse::ok(template))
}

async fn delete_template(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<()> {
    state.certificate_service.delete_template(id).await?;
    Ok(ApiResponse::message("Template deleted"))
}

/// Names usable as `{{ name }}` inside template text elements
async fn list_placeholders() -> ApiResult<&'static [&'static str]> {
    Ok(ApiResponse::ok(PLACEHOLDERS))
}

/// The template rendered with sample data
async fn preview_template(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<TemplateLayout> {
    let layout = state.certificate_service.preview_template(id).await?;
    Ok(ApiResponse::ok(layout))
}

// ============================================================================
// Payments
// ============================================================================

async fn list_payments(
    State(state): State<AppState>,
    Query(query): Query<PaymentListQuery>,
) -> ApiResult<PagedResult<Payment>> {
    let params = ListParams::new(query.page, query.per_page);
    let payments = state
        .payment_service
        .list_payments(query.status, &params)
        .await?;
    Ok(ApiResponse::ok(payments))
}

async fn refund_payment(
    State(state): State<AppState>,
    AuthenticatedUser(admin): AuthenticatedUser,
    Path(id): Path<i64>,
) -> ApiResult<Payment> {
    let payment = state.payment_service.refund(id).await?;
    tracing::info!(payment_id = id, admin_id = admin.id, "Refund issued by admin");
    Ok(ApiResponse::ok(payment).with_message("Payment refunded"))
}
