//! Payment endpoints
//!
//! - POST /api/v1/payments/checkout - Start buying a course
//! - GET /api/v1/payments - My payments
//! - POST /api/v1/payments/webhook - Provider callback, HMAC signed

use axum::{
    body::Bytes,
    extract::State,
    http::HeaderMap,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::api::middleware::{ApiError, AppState, AuthenticatedUser};
use crate::api::responses::{ApiResponse, ApiResult, Created};
use crate::models::Payment;
use crate::services::WebhookOutcome;

/// Header carrying the hex HMAC-SHA256 of the raw webhook body
pub const SIGNATURE_HEADER: &str = "x-signature";

#[derive(Debug, Deserialize)]
pub struct CheckoutRequest {
    pub course_id: i64,
}

#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    pub payment_id: i64,
    pub result: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enrollment_id: Option<i64>,
}

impl From<WebhookOutcome> for WebhookResponse {
    fn from(outcome: WebhookOutcome) -> Self {
        match outcome {
            WebhookOutcome::Completed {
                payment_id,
                enrollment_id,
            } => Self {
                payment_id,
                result: "completed",
                enrollment_id: Some(enrollment_id),
            },
            WebhookOutcome::Failed { payment_id } => Self {
                payment_id,
                result: "failed",
                enrollment_id: None,
            },
            WebhookOutcome::Ignored { payment_id } => Self {
                payment_id,
                result: "ignored",
                enrollment_id: None,
            },
        }
    }
}

pub fn protected_router() -> Router<AppState> {
    Router::new()
        .route("/", get(my_payments))
        .route("/checkout", post(checkout))
}

pub fn webhook_router() -> Router<AppState> {
    Router::new().route("/webhook", post(webhook))
}

async fn checkout(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    Json(body): Json<CheckoutRequest>,
) -> Result<Created<Payment>, ApiError> {
    let payment = state.payment_service.checkout(&user, body.course_id).await?;
    Ok(Created(payment))
}

async fn my_payments(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
) -> ApiResult<Vec<Payment>> {
    let payments = state.payment_service.my_payments(user.id).await?;
    Ok(ApiResponse::ok(payments))
}

/// The signature covers the exact bytes received, so the body is taken raw
async fn webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<WebhookResponse> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::unauthorized("Missing webhook signature"))?;

    let outcome = state.payment_service.handle_webhook(&body, signature).await?;
    Ok(ApiResponse::ok(outcome.into()))
}
