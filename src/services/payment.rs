//! Payment service
//!
//! Provider-agnostic purchases: checkout creates a pending payment with the
//! revenue split already computed, and a signed webhook from the provider
//! completes or fails it. Completing a payment enrolls the buyer.

use crate::config::PaymentConfig;
use crate::db::repositories::{
    CourseRepository, EnrollmentRepository, PaymentRepository, PaymentTotals,
};
use crate::models::{
    Course, EarningsSummary, Enrollment, ListParams, NewNotification, NotificationKind,
    PagedResult, Payment, PaymentStatus, PaymentWebhookEvent, RevenueSplit, User,
};
use crate::services::notification::NotificationService;
use anyhow::Context;
use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::sync::Arc;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, thiserror::Error)]
pub enum PaymentServiceError {
    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Already enrolled in this course")]
    AlreadyEnrolled,

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Invalid webhook signature")]
    InvalidSignature,

    #[error("Webhooks are disabled")]
    WebhookDisabled,

    #[error("Internal error: {0}")]
    InternalError(#[from] anyhow::Error),
}

/// What a webhook call changed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookOutcome {
    Completed { payment_id: i64, enrollment_id: i64 },
    Failed { payment_id: i64 },
    /// The payment was already final; nothing changed
    Ignored { payment_id: i64 },
}

/// Hex HMAC-SHA256 of a webhook body, as the provider sends it
pub fn sign_payload(secret: &str, body: &[u8]) -> Result<String, PaymentServiceError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| anyhow::anyhow!("Invalid webhook key: {}", e))?;
    mac.update(body);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Constant-time check of a hex signature against the body
pub fn verify_signature(secret: &str, body: &[u8], signature_hex: &str) -> bool {
    let Ok(signature) = hex::decode(signature_hex.trim()) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&signature).is_ok()
}

pub struct PaymentService {
    payment_repo: Arc<dyn PaymentRepository>,
    course_repo: Arc<dyn CourseRepository>,
    enrollment_repo: Arc<dyn EnrollmentRepository>,
    notifications: Arc<NotificationService>,
    config: PaymentConfig,
}

impl PaymentService {
    pub fn new(
        payment_repo: Arc<dyn PaymentRepository>,
        course_repo: Arc<dyn CourseRepository>,
        enrollment_repo: Arc<dyn EnrollmentRepository>,
        notifications: Arc<NotificationService>,
        config: PaymentConfig,
    ) -> Self {
        Self {
            payment_repo,
            course_repo,
            enrollment_repo,
            notifications,
            config,
        }
    }

    /// Start a purchase. A pending payment for the same course is reused.
    pub async fn checkout(&self, student: &User, course_id: i64) -> Result<Payment, PaymentServiceError> {
        let course = self.find_course(course_id).await?;

        if !course.is_published() {
            return Err(PaymentServiceError::ValidationError(
                "Course is not published".to_string(),
            ));
        }
        if course.is_free() {
            return Err(PaymentServiceError::ValidationError(
                "Free courses do not need a payment".to_string(),
            ));
        }
        if course.instructor_id == student.id {
            return Err(PaymentServiceError::ValidationError(
                "You cannot buy your own course".to_string(),
            ));
        }

        let enrolled = self
            .enrollment_repo
            .get(student.id, course.id)
            .await
            .context("Failed to get enrollment")?
            .is_some_and(|e: Enrollment| e.has_access());
        if enrolled {
            return Err(PaymentServiceError::AlreadyEnrolled);
        }

        if let Some(pending) = self
            .payment_repo
            .find_pending(student.id, course.id)
            .await
            .context("Failed to look up pending payment")?
        {
            return Ok(pending);
        }

        let split = RevenueSplit::compute(course.price_cents, self.config.platform_fee_percent);
        let payment = self
            .payment_repo
            .create(&Payment {
                id: 0,
                user_id: student.id,
                course_id: course.id,
                amount_cents: split.amount_cents,
                currency: course.currency.clone(),
                platform_fee_cents: split.platform_fee_cents,
                instructor_share_cents: split.instructor_share_cents,
                status: PaymentStatus::Pending,
                provider_reference: None,
                created_at: Utc::now(),
                completed_at: None,
                refunded_at: None,
            })
            .await
            .context("Failed to create payment")?;

        tracing::info!(
            payment_id = payment.id,
            course_id = course.id,
            amount_cents = payment.amount_cents,
            "Checkout started"
        );
        Ok(payment)
    }

    /// Apply a provider webhook after checking its signature.
    pub async fn handle_webhook(
        &self,
        raw_body: &[u8],
        signature_hex: &str,
    ) -> Result<WebhookOutcome, PaymentServiceError> {
        if self.config.webhook_secret.is_empty() {
            return Err(PaymentServiceError::WebhookDisabled);
        }
        if !verify_signature(&self.config.webhook_secret, raw_body, signature_hex) {
            tracing::warn!("Rejected webhook with invalid signature");
            return Err(PaymentServiceError::InvalidSignature);
        }

        let event: PaymentWebhookEvent = serde_json::from_slice(raw_body)
            .map_err(|e| PaymentServiceError::ValidationError(format!("Invalid payload: {}", e)))?;
        let reference = event.provider_reference.as_deref();

        match event.status {
            PaymentStatus::Completed => {
                let Some((payment, enrollment_id)) = self
                    .payment_repo
                    .complete(event.payment_id, reference)
                    .await
                    .context("Failed to complete payment")?
                else {
                    return self.ignored(event.payment_id).await;
                };

                tracing::info!(payment_id = payment.id, enrollment_id, "Payment completed");
                self.notify_purchase(&payment).await;
                Ok(WebhookOutcome::Completed {
                    payment_id: payment.id,
                    enrollment_id,
                })
            }
            PaymentStatus::Failed => {
                let Some(payment) = self
                    .payment_repo
                    .fail(event.payment_id, reference)
                    .await
                    .context("Failed to mark payment failed")?
                else {
                    return self.ignored(event.payment_id).await;
                };

                tracing::info!(payment_id = payment.id, "Payment failed");
                self.notifications
                    .notify(
                        NewNotification::new(payment.user_id, NotificationKind::Payment, "Payment failed")
                            .body("Your payment could not be completed.")
                            .link(format!("/courses/{}", payment.course_id)),
                    )
                    .await;
                Ok(WebhookOutcome::Failed {
                    payment_id: payment.id,
                })
            }
            other => Err(PaymentServiceError::ValidationError(format!(
                "Unsupported webhook status: {}",
                other
            ))),
        }
    }

    /// Refund a completed payment. The buyer loses access to the course.
    pub async fn refund(&self, payment_id: i64) -> Result<Payment, PaymentServiceError> {
        let payment = self.find_payment(payment_id).await?;
        let refunded = self
            .payment_repo
            .refund(payment.id)
            .await
            .context("Failed to refund payment")?
            .ok_or_else(|| {
                PaymentServiceError::Conflict(format!(
                    "Only completed payments can be refunded (payment is {})",
                    payment.status
                ))
            })?;

        tracing::info!(payment_id = refunded.id, "Payment refunded");
        self.notifications
            .notify(
                NewNotification::new(refunded.user_id, NotificationKind::Payment, "Payment refunded")
                    .body(format!(
                        "{} has been refunded.",
                        format_amount(refunded.amount_cents, &refunded.currency)
                    )),
            )
            .await;
        Ok(refunded)
    }

    pub async fn my_payments(&self, user_id: i64) -> Result<Vec<Payment>, PaymentServiceError> {
        Ok(self
            .payment_repo
            .list_for_user(user_id)
            .await
            .context("Failed to list payments")?)
    }

    pub async fn list_payments(
        &self,
        status: Option<PaymentStatus>,
        params: &ListParams,
    ) -> Result<PagedResult<Payment>, PaymentServiceError> {
        let (items, total) = self
            .payment_repo
            .list(status, params)
            .await
            .context("Failed to list payments")?;
        Ok(PagedResult::new(items, total, params))
    }

    /// Completed sales of an instructor, per course and in total
    pub async fn instructor_earnings(&self, instructor_id: i64) -> Result<EarningsSummary, PaymentServiceError> {
        let courses = self
            .payment_repo
            .earnings_by_course(instructor_id)
            .await
            .context("Failed to load earnings")?;
        let totals = self
            .payment_repo
            .totals(Some(instructor_id))
            .await
            .context("Failed to load earnings totals")?;

        Ok(EarningsSummary {
            currency: self.config.currency.clone(),
            sales: totals.sales,
            gross_cents: totals.gross_cents,
            platform_fee_cents: totals.platform_fee_cents,
            instructor_share_cents: totals.instructor_share_cents,
            refunded_cents: totals.refunded_cents,
            courses,
        })
    }

    pub async fn platform_revenue(&self) -> Result<PaymentTotals, PaymentServiceError> {
        Ok(self
            .payment_repo
            .totals(None)
            .await
            .context("Failed to load platform totals")?)
    }

    pub fn currency(&self) -> &str {
        &self.config.currency
    }

    async fn ignored(&self, payment_id: i64) -> Result<WebhookOutcome, PaymentServiceError> {
        // Unknown ids are an error; known but final payments are replays
        let payment = self.find_payment(payment_id).await?;
        tracing::debug!(payment_id, status = %payment.status, "Ignoring webhook for final payment");
        Ok(WebhookOutcome::Ignored { payment_id })
    }

    async fn notify_purchase(&self, payment: &Payment) {
        let course = match self.course_repo.get_by_id(payment.course_id).await {
            Ok(Some(course)) => course,
            Ok(None) => return,
            Err(e) => {
                tracing::warn!("Failed to load course for payment {}: {}", payment.id, e);
                return;
            }
        };

        self.notifications
            .notify(
                NewNotification::new(payment.user_id, NotificationKind::Payment, "Purchase complete")
                    .body(format!("You now have access to \"{}\".", course.title))
                    .link(format!("/courses/{}", course.slug)),
            )
            .await;
        self.notifications
            .notify(
                NewNotification::new(course.instructor_id, NotificationKind::Payment, "New sale")
                    .body(format!(
                        "\"{}\" was purchased. Your share: {}.",
                        course.title,
                        format_amount(payment.instructor_share_cents, &payment.currency)
                    ))
                    .link("/instructor/earnings"),
            )
            .await;
    }

    async fn find_course(&self, course_id: i64) -> Result<Course, PaymentServiceError> {
        self.course_repo
            .get_by_id(course_id)
            .await
            .context("Failed to get course")?
            .ok_or(PaymentServiceError::NotFound("Course"))
    }

    async fn find_payment(&self, payment_id: i64) -> Result<Payment, PaymentServiceError> {
        self.payment_repo
            .get_by_id(payment_id)
            .await
            .context("Failed to get payment")?
            .ok_or(PaymentServiceError::NotFound("Payment"))
    }
}

/// `1999, "usd"` -> `19.99 USD`
fn format_amount(cents: i64, currency: &str) -> String {
    format!("{}.{:02} {}", cents / 100, (cents % 100).abs(), currency.to_uppercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repositories::test_support::*;
    use crate::db::repositories::{
        SqlxCourseRepository, SqlxEnrollmentRepository, SqlxNotificationRepository,
        SqlxPaymentRepository,
    };
    use crate::db::Database;
    use crate::models::{EnrollmentStatus, UserRole};
    use crate::services::course::tests::load_user;

    const SECRET: &str = "whsec_test";

    fn service(db: &Database, secret: &str) -> PaymentService {
        PaymentService::new(
            SqlxPaymentRepository::boxed(db.clone()),
            SqlxCourseRepository::boxed(db.clone()),
            SqlxEnrollmentRepository::boxed(db.clone()),
            Arc::new(NotificationService::new(SqlxNotificationRepository::boxed(db.clone()))),
            PaymentConfig {
                currency: "usd".to_string(),
                platform_fee_percent: 25,
                webhook_secret: secret.to_string(),
            },
        )
    }

    fn event(payment_id: i64, status: &str) -> Vec<u8> {
        format!(
            r#"{{"payment_id":{},"status":"{}","provider_reference":"pi_123"}}"#,
            payment_id, status
        )
        .into_bytes()
    }

    async fn enrollment_status(db: &Database, user_id: i64) -> Option<String> {
        sqlx::query_scalar("SELECT status FROM enrollments WHERE user_id = ?")
            .bind(user_id)
            .fetch_optional(db.pool())
            .await
            .unwrap()
    }

    #[test]
    fn test_signature_round_trip() {
        let body = b"{\"payment_id\":1}";
        let signature = sign_payload(SECRET, body).unwrap();
        assert_eq!(signature.len(), 64);
        assert!(verify_signature(SECRET, body, &signature));
        assert!(verify_signature(SECRET, body, &signature.to_uppercase()));
        assert!(!verify_signature("other", body, &signature));
        assert!(!verify_signature(SECRET, b"{\"payment_id\":2}", &signature));
        assert!(!verify_signature(SECRET, body, "not-hex"));
    }

    #[test]
    fn test_format_amount() {
        assert_eq!(format_amount(1_999, "usd"), "19.99 USD");
        assert_eq!(format_amount(5, "eur"), "0.05 EUR");
    }

    #[tokio::test]
    async fn test_completed_webhook_keeps_existing_enrollment() {
        let db = setup_db().await;
        let instructor = insert_user(&db, "prof", UserRole::Instructor).await;
        let student = load_user(&db, insert_user(&db, "student", UserRole::Student).await).await;
        let course = insert_course(&db, instructor, "paid", 1_999).await;
        let payments = service(&db, SECRET);

        let payment = payments.checkout(&student, course).await.unwrap();
        // Access granted some other way before the provider calls back
        let existing = SqlxEnrollmentRepository::new(db.clone())
            .create(student.id, course, None)
            .await
            .unwrap();

        let body = event(payment.id, "completed");
        let signature = sign_payload(SECRET, &body).unwrap();
        let outcome = payments.handle_webhook(&body, &signature).await.unwrap();
        assert_eq!(
            outcome,
            WebhookOutcome::Completed {
                payment_id: payment.id,
                enrollment_id: existing.id,
            }
        );

        let stored = SqlxPaymentRepository::new(db.clone())
            .get_by_id(payment.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, PaymentStatus::Completed);

        let enrollment = SqlxEnrollmentRepository::new(db.clone())
            .get(student.id, course)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(enrollment.payment_id, Some(payment.id));
        assert_eq!(enrollment.status, EnrollmentStatus::Active);

        let count: i64 = sqlx::query_scalar("SELECT enrollment_count FROM courses WHERE id = ?")
            .bind(course)
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(count, 1);

        let replay = payments.handle_webhook(&body, &signature).await.unwrap();
        assert_eq!(replay, WebhookOutcome::Ignored { payment_id: payment.id });
    }

    #[tokio::test]
    async fn test_checkout_and_completed_webhook() {
        let db = setup_db().await;
        let instructor = insert_user(&db, "prof", UserRole::Instructor).await;
        let student = load_user(&db, insert_user(&db, "student", UserRole::Student).await).await;
        let course = insert_course(&db, instructor, "paid", 1_999).await;
        let payments = service(&db, SECRET);

        let payment = payments.checkout(&student, course).await.unwrap();
        assert_eq!(payment.status, PaymentStatus::Pending);
        assert_eq!(payment.platform_fee_cents, 500);
        assert_eq!(payment.instructor_share_cents, 1_499);

        // A second checkout reuses the pending payment
        let again = payments.checkout(&student, course).await.unwrap();
        assert_eq!(again.id, payment.id);

        let body = event(payment.id, "completed");
        let signature = sign_payload(SECRET, &body).unwrap();
        let outcome = payments.handle_webhook(&body, &signature).await.unwrap();
        assert!(matches!(outcome, WebhookOutcome::Completed { payment_id, .. } if payment_id == payment.id));
        assert_eq!(enrollment_status(&db, student.id).await.as_deref(), Some("active"));

        // Replays change nothing
        let replay = payments.handle_webhook(&body, &signature).await.unwrap();
        assert_eq!(replay, WebhookOutcome::Ignored { payment_id: payment.id });

        assert!(matches!(
            payments.checkout(&student, course).await,
            Err(PaymentServiceError::AlreadyEnrolled)
        ));

        let earnings = payments.instructor_earnings(instructor).await.unwrap();
        assert_eq!(earnings.sales, 1);
        assert_eq!(earnings.gross_cents, 1_999);
        assert_eq!(earnings.instructor_share_cents, 1_499);
        assert_eq!(earnings.courses.len(), 1);
        assert_eq!(payments.platform_revenue().await.unwrap().platform_fee_cents, 500);
    }

    #[tokio::test]
    async fn test_webhook_rejections() {
        let db = setup_db().await;
        let instructor = insert_user(&db, "prof", UserRole::Instructor).await;
        let student = load_user(&db, insert_user(&db, "student", UserRole::Student).await).await;
        let course = insert_course(&db, instructor, "paid", 1_000).await;

        let disabled = service(&db, "");
        let payment = disabled.checkout(&student, course).await.unwrap();
        let body = event(payment.id, "completed");
        assert!(matches!(
            disabled.handle_webhook(&body, "00").await,
            Err(PaymentServiceError::WebhookDisabled)
        ));

        let payments = service(&db, SECRET);
        let forged = sign_payload("wrong", &body).unwrap();
        assert!(matches!(
            payments.handle_webhook(&body, &forged).await,
            Err(PaymentServiceError::InvalidSignature)
        ));

        let failed = event(payment.id, "failed");
        let outcome = payments
            .handle_webhook(&failed, &sign_payload(SECRET, &failed).unwrap())
            .await
            .unwrap();
        assert_eq!(outcome, WebhookOutcome::Failed { payment_id: payment.id });
        assert_eq!(enrollment_status(&db, student.id).await, None);

        // A failed payment can no longer be completed
        let late = payments
            .handle_webhook(&body, &sign_payload(SECRET, &body).unwrap())
            .await
            .unwrap();
        assert_eq!(late, WebhookOutcome::Ignored { payment_id: payment.id });

        let unknown = event(9_999, "completed");
        assert!(matches!(
            payments.handle_webhook(&unknown, &sign_payload(SECRET, &unknown).unwrap()).await,
            Err(PaymentServiceError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_checkout_validation() {
        let db = setup_db().await;
        let instructor_id = insert_user(&db, "prof", UserRole::Instructor).await;
        let instructor = load_user(&db, instructor_id).await;
        let student = load_user(&db, insert_user(&db, "student", UserRole::Student).await).await;
        let free = insert_course(&db, instructor_id, "free", 0).await;
        let paid = insert_course(&db, instructor_id, "paid", 500).await;
        let payments = service(&db, SECRET);

        assert!(matches!(
            payments.checkout(&student, free).await,
            Err(PaymentServiceError::ValidationError(_))
        ));
        assert!(matches!(
            payments.checkout(&instructor, paid).await,
            Err(PaymentServiceError::ValidationError(_))
        ));
        assert!(matches!(
            payments.checkout(&student, 404).await,
            Err(PaymentServiceError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_refund_revokes_access() {
        let db = setup_db().await;
        let instructor = insert_user(&db, "prof", UserRole::Instructor).await;
        let student = load_user(&db, insert_user(&db, "student", UserRole::Student).await).await;
        let course = insert_course(&db, instructor, "paid", 2_000).await;
        let payments = service(&db, SECRET);

        let payment = payments.checkout(&student, course).await.unwrap();
        assert!(matches!(
            payments.refund(payment.id).await,
            Err(PaymentServiceError::Conflict(_))
        ));

        let body = event(payment.id, "completed");
        payments
            .handle_webhook(&body, &sign_payload(SECRET, &body).unwrap())
            .await
            .unwrap();

        let refunded = payments.refund(payment.id).await.unwrap();
        assert_eq!(refunded.status, PaymentStatus::Refunded);
        assert!(refunded.refunded_at.is_some());
        assert_eq!(
            enrollment_status(&db, student.id).await.as_deref(),
            Some(EnrollmentStatus::Refunded.to_string().as_str())
        );

        let totals = payments.platform_revenue().await.unwrap();
        assert_eq!(totals.sales, 0);
        assert_eq!(totals.refunded_cents, 2_000);
    }
}
