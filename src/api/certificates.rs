//! Certificate endpoints
//!
//! - GET /api/v1/certificates - My certificates
//! - GET /api/v1/certificates/{id} - One certificate (owner or admin)
//! - GET /api/v1/certificates/verify/{number} - Public verification

use axum::{
    extract::{Path, State},
    routing::get,
    Router,
};

use crate::api::middleware::{AppState, AuthenticatedUser};
use crate::api::responses::{ApiResponse, ApiResult};
use crate::models::{Certificate, CertificateVerification};

pub fn protected_router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_mine))
        .route("/{id}", get(get_certificate))
}

pub fn public_router() -> Router<AppState> {
    Router::new().route("/verify/{number}", get(verify))
}

async fn list_mine(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
) -> ApiResult<Vec<Certificate>> {
    let certificates = state.certificate_service.list_mine(user.id).await?;
    Ok(ApiResponse::ok(certificates))
}

async fn get_certificate(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    Path(id): Path<i64>,
) -> ApiResult<Certificate> {
    let certificate = state.certificate_service.get(id, &user).await?;
    Ok(ApiResponse::ok(certificate))
}

async fn verify(
    State(state): State<AppState>,
    Path(number): Path<String>,
) -> ApiResult<CertificateVerification> {
    let verification = state.certificate_service.verify(&number).await?;
    Ok(ApiResponse::ok(verification))
}
