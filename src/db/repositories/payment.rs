//! Payment repository
//!
//! Payment rows and their state transitions. Completing a payment and
//! granting the enrollment happen in one transaction, as do refunds and
//! revoking access.

use super::enrollment::{insert_or_reactivate, refresh_enrollment_count};
use crate::db::Database;
use crate::models::{CourseEarnings, ListParams, Payment, PaymentStatus};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use std::sync::Arc;

/// Aggregated amounts over a set of payments
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PaymentTotals {
    pub sales: i64,
    pub gross_cents: i64,
    pub platform_fee_cents: i64,
    pub instructor_share_cents: i64,
    pub refunded_cents: i64,
}

#[async_trait]
pub trait PaymentRepository: Send + Sync {
    async fn create(&self, payment: &Payment) -> Result<Payment>;

    async fn get_by_id(&self, id: i64) -> Result<Option<Payment>>;

    async fn find_pending(&self, user_id: i64, course_id: i64) -> Result<Option<Payment>>;

    /// Move a pending payment to completed and enroll the buyer, reusing an
    /// enrollment the buyer already has access through.
    /// Returns `None` when the payment was not pending.
    async fn complete(&self, id: i64, reference: Option<&str>) -> Result<Option<(Payment, i64)>>;

    /// Move a pending payment to failed. Returns `None` when it was not pending.
    async fn fail(&self, id: i64, reference: Option<&str>) -> Result<Option<Payment>>;

    /// Move a completed payment to refunded and revoke the enrollment it paid for.
    /// Returns `None` when the payment was not completed.
    async fn refund(&self, id: i64) -> Result<Option<Payment>>;

    async fn list_for_user(&self, user_id: i64) -> Result<Vec<Payment>>;

    async fn list(
        &self,
        status: Option<PaymentStatus>,
        params: &ListParams,
    ) -> Result<(Vec<Payment>, i64)>;

    /// Completed sales per course of an instructor
    async fn earnings_by_course(&self, instructor_id: i64) -> Result<Vec<CourseEarnings>>;

    /// Totals for one instructor, or the whole platform when `None`
    async fn totals(&self, instructor_id: Option<i64>) -> Result<PaymentTotals>;
}

pub struct SqlxPaymentRepository {
    db: Database,
}

impl SqlxPaymentRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn boxed(db: Database) -> Arc<dyn PaymentRepository> {
        Arc::new(Self::new(db))
    }
}

#[async_trait]
impl PaymentRepository for SqlxPaymentRepository {
    async fn create(&self, payment: &Payment) -> Result<Payment> {
        let id = sqlx::query(
            r#"
            INSERT INTO payments (user_id, course_id, amount_cents, currency, platform_fee_cents,
                                  instructor_share_cents, status, provider_reference, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(payment.user_id)
        .bind(payment.course_id)
        .bind(payment.amount_cents)
        .bind(&payment.currency)
        .bind(payment.platform_fee_cents)
        .bind(payment.instructor_share_cents)
        .bind(payment.status.to_string())
        .bind(&payment.provider_reference)
        .bind(Utc::now())
        .execute(self.db.pool())
        .await
        .context("Failed to create payment")?
        .last_insert_rowid();

        get_payment_by_id(self.db.pool(), id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Payment not found after insert"))
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<Payment>> {
        get_payment_by_id(self.db.pool(), id).await
    }

    async fn find_pending(&self, user_id: i64, course_id: i64) -> Result<Option<Payment>> {
        let sql = format!(
            "SELECT {} FROM payments WHERE user_id = ? AND course_id = ? AND status = 'pending' ORDER BY id DESC LIMIT 1",
            PAYMENT_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(user_id)
            .bind(course_id)
            .fetch_optional(self.db.pool())
            .await
            .context("Failed to find pending payment")?;
        row.map(|r| row_to_payment(&r)).transpose()
    }

    async fn complete(&self, id: i64, reference: Option<&str>) -> Result<Option<(Payment, i64)>> {
        let mut tx = self.db.begin().await?;

        let row = sqlx::query(
            r#"
            UPDATE payments
            SET status = 'completed', completed_at = ?,
                provider_reference = COALESCE(?, provider_reference)
            WHERE id = ? AND status = 'pending'
            RETURNING user_id, course_id
            "#,
        )
        .bind(Utc::now())
        .bind(reference)
        .bind(id)
        .fetch_optional(&mut *tx)
        .await
        .context("Failed to complete payment")?;

        let Some(row) = row else {
            return Ok(None);
        };
        let user_id: i64 = row.get("user_id");
        let course_id: i64 = row.get("course_id");

        // A buyer who already has access keeps that enrollment; the payment is linked to it
        let existing: Option<i64> = sqlx::query_scalar(
            "SELECT id FROM enrollments WHERE user_id = ? AND course_id = ? AND status <> 'refunded'",
        )
        .bind(user_id)
        .bind(course_id)
        .fetch_optional(&mut *tx)
        .await
        .context("Failed to check existing enrollment")?;

        let enrollment_id = match existing {
            Some(enrollment_id) => {
                sqlx::query("UPDATE enrollments SET payment_id = COALESCE(payment_id, ?) WHERE id = ?")
                    .bind(id)
                    .bind(enrollment_id)
                    .execute(&mut *tx)
                    .await
                    .context("Failed to link payment to enrollment")?;
                enrollment_id
            }
            None => insert_or_reactivate(&mut tx, user_id, course_id, Some(id)).await?,
        };
        refresh_enrollment_count(&mut tx, course_id).await?;
        tx.commit().await.context("Failed to commit payment completion")?;

        let payment = get_payment_by_id(self.db.pool(), id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Payment not found after completion"))?;
        Ok(Some((payment, enrollment_id)))
    }

    async fn fail(&self, id: i64, reference: Option<&str>) -> Result<Option<Payment>> {
        let result = sqlx::query(
            r#"
            UPDATE payments
            SET status = 'failed', provider_reference = COALESCE(?, provider_reference)
            WHERE id = ? AND status = 'pending'
            "#,
        )
        .bind(reference)
        .bind(id)
        .execute(self.db.pool())
        .await
        .context("Failed to mark payment failed")?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }
        get_payment_by_id(self.db.pool(), id).await
    }

    async fn refund(&self, id: i64) -> Result<Option<Payment>> {
        let mut tx = self.db.begin().await?;

        let course_id: Option<i64> = sqlx::query_scalar(
            r#"
            UPDATE payments SET status = 'refunded', refunded_at = ?
            WHERE id = ? AND status = 'completed'
            RETURNING course_id
            "#,
        )
        .bind(Utc::now())
        .bind(id)
        .fetch_optional(&mut *tx)
        .await
        .context("Failed to refund payment")?;

        let Some(course_id) = course_id else {
            return Ok(None);
        };

        sqlx::query("UPDATE enrollments SET status = 'refunded' WHERE payment_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await
            .context("Failed to revoke enrollment")?;

        refresh_enrollment_count(&mut tx, course_id).await?;
        tx.commit().await.context("Failed to commit refund")?;

        get_payment_by_id(self.db.pool(), id).await
    }

    async fn list_for_user(&self, user_id: i64) -> Result<Vec<Payment>> {
        let sql = format!(
            "SELECT {} FROM payments WHERE user_id = ? ORDER BY created_at DESC, id DESC",
            PAYMENT_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(user_id)
            .fetch_all(self.db.pool())
            .await
            .context("Failed to list payments")?;
        rows.iter().map(row_to_payment).collect()
    }

    async fn list(
        &self,
        status: Option<PaymentStatus>,
        params: &ListParams,
    ) -> Result<(Vec<Payment>, i64)> {
        let status = status.map(|s| s.to_string());

        let sql = format!(
            "SELECT {} FROM payments WHERE (?1 IS NULL OR status = ?1) ORDER BY id DESC LIMIT ?2 OFFSET ?3",
            PAYMENT_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(&status)
            .bind(params.limit())
            .bind(params.offset())
            .fetch_all(self.db.pool())
            .await
            .context("Failed to list payments")?;

        let total: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM payments WHERE (?1 IS NULL OR status = ?1)")
                .bind(&status)
                .fetch_one(self.db.pool())
                .await
                .context("Failed to count payments")?;

        let payments = rows.iter().map(row_to_payment).collect::<Result<Vec<_>>>()?;
        Ok((payments, total))
    }

    async fn earnings_by_course(&self, instructor_id: i64) -> Result<Vec<CourseEarnings>> {
        let rows = sqlx::query(
            r#"
            SELECT c.id AS course_id, c.title AS course_title,
                   COUNT(p.id) AS sales,
                   COALESCE(SUM(p.amount_cents), 0) AS gross_cents,
                   COALESCE(SUM(p.platform_fee_cents), 0) AS platform_fee_cents,
                   COALESCE(SUM(p.instructor_share_cents), 0) AS instructor_share_cents
            FROM courses c
            LEFT JOIN payments p ON p.course_id = c.id AND p.status = 'completed'
            WHERE c.instructor_id = ?
            GROUP BY c.id, c.title
            ORDER BY gross_cents DESC, c.id
            "#,
        )
        .bind(instructor_id)
        .fetch_all(self.db.pool())
        .await
        .context("Failed to compute course earnings")?;

        Ok(rows
            .iter()
            .map(|row| CourseEarnings {
                course_id: row.get("course_id"),
                course_title: row.get("course_title"),
                sales: row.get("sales"),
                gross_cents: row.get("gross_cents"),
                platform_fee_cents: row.get("platform_fee_cents"),
                instructor_share_cents: row.get("instructor_share_cents"),
            })
            .collect())
    }

    async fn totals(&self, instructor_id: Option<i64>) -> Result<PaymentTotals> {
        let row = sqlx::query(
            r#"
            SELECT
                COALESCE(SUM(CASE WHEN p.status = 'completed' THEN 1 ELSE 0 END), 0) AS sales,
                COALESCE(SUM(CASE WHEN p.status = 'completed' THEN p.amount_cents ELSE 0 END), 0) AS gross,
                COALESCE(SUM(CASE WHEN p.status = 'completed' THEN p.platform_fee_cents ELSE 0 END), 0) AS fee,
                COALESCE(SUM(CASE WHEN p.status = 'completed' THEN p.instructor_share_cents ELSE 0 END), 0) AS share,
                COALESCE(SUM(CASE WHEN p.status = 'refunded' THEN p.amount_cents ELSE 0 END), 0) AS refunded
            FROM payments p
            JOIN courses c ON c.id = p.course_id
            WHERE (?1 IS NULL OR c.instructor_id = ?1)
            "#,
        )
        .bind(instructor_id)
        .fetch_one(self.db.pool())
        .await
        .context("Failed to compute payment totals")?;

        Ok(PaymentTotals {
            sales: row.get("sales"),
            gross_cents: row.get("gross"),
            platform_fee_cents: row.get("fee"),
            instructor_share_cents: row.get("share"),
            refunded_cents: row.get("refunded"),
        })
    }
}

const PAYMENT_COLUMNS: &str = "id, user_id, course_id, amount_cents, currency, platform_fee_cents, instructor_share_cents, status, provider_reference, created_at, completed_at, refunded_at";

async fn get_payment_by_id(pool: &SqlitePool, id: i64) -> Result<Option<Payment>> {
    let sql = format!("SELECT {} FROM payments WHERE id = ?", PAYMENT_COLUMNS);
    let row = sqlx::query(&sql)
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("Failed to get payment by ID")?;
    row.map(|r| row_to_payment(&r)).transpose()
}

fn row_to_payment(row: &SqliteRow) -> Result<Payment> {
    let status: String = row.get("status");
    Ok(Payment {
        id: row.get("id"),
        user_id: row.get("user_id"),
        course_id: row.get("course_id"),
        amount_cents: row.get("amount_cents"),
        currency: row.get("currency"),
        platform_fee_cents: row.get("platform_fee_cents"),
        instructor_share_cents: row.get("instructor_share_cents"),
        status: PaymentStatus::from_str(&status)
            .with_context(|| format!("Invalid payment status in database: {}", status))?,
        provider_reference: row.get("provider_reference"),
        created_at: row.get("created_at"),
        completed_at: row.get("completed_at"),
        refunded_at: row.get("refunded_at"),
    })
}
