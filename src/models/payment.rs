//! Payment models and the revenue split

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payment {
    pub id: i64,
    pub user_id: i64,
    pub course_id: i64,
    pub amount_cents: i64,
    pub currency: String,
    pub platform_fee_cents: i64,
    pub instructor_share_cents: i64,
    pub status: PaymentStatus,
    /// Identifier assigned by the payment provider
    pub provider_reference: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub refunded_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    #[default]
    Pending,
    Completed,
    Failed,
    Refunded,
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PaymentStatus::Pending => write!(f, "pending"),
            PaymentStatus::Completed => write!(f, "completed"),
            PaymentStatus::Failed => write!(f, "failed"),
            PaymentStatus::Refunded => write!(f, "refunded"),
        }
    }
}

impl FromStr for PaymentStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(PaymentStatus::Pending),
            "completed" => Ok(PaymentStatus::Completed),
            "failed" => Ok(PaymentStatus::Failed),
            "refunded" => Ok(PaymentStatus::Refunded),
            _ => Err(anyhow::anyhow!("Invalid payment status: {}", s)),
        }
    }
}

/// Highest accepted course price (one million in the major unit)
pub const MAX_PRICE_CENTS: i64 = 100_000_000;

/// How a payment amount is divided between platform and instructor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevenueSplit {
    pub amount_cents: i64,
    pub platform_fee_cents: i64,
    pub instructor_share_cents: i64,
}

impl RevenueSplit {
    /// Split `amount_cents` with a platform fee of `fee_percent` (0..=100).
    ///
    /// The fee is rounded half up to the nearest cent and the instructor
    /// receives the remainder, so the two parts always sum to the amount.
    pub fn compute(amount_cents: i64, fee_percent: u32) -> Self {
        let amount = amount_cents.max(0);
        let pct = i128::from(fee_percent.min(100));
        // The fee never exceeds the amount, so it always fits back into i64
        let platform_fee_cents = ((i128::from(amount) * pct + 50) / 100) as i64;
        Self {
            amount_cents: amount,
            platform_fee_cents,
            instructor_share_cents: amount - platform_fee_cents,
        }
    }
}

/// Completed-sales totals for one course
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CourseEarnings {
    pub course_id: i64,
    pub course_title: String,
    pub sales: i64,
    pub gross_cents: i64,
    pub platform_fee_cents: i64,
    pub instructor_share_cents: i64,
}

/// Totals across every course of an instructor
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EarningsSummary {
    pub currency: String,
    pub sales: i64,
    pub gross_cents: i64,
    pub platform_fee_cents: i64,
    pub instructor_share_cents: i64,
    pub refunded_cents: i64,
    pub courses: Vec<CourseEarnings>,
}

/// Payload of a provider webhook call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentWebhookEvent {
    pub payment_id: i64,
    pub status: PaymentStatus,
    #[serde(default, alias = "reference")]
    pub provider_reference: Option<String>,
}
