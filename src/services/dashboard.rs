//! Dashboard aggregates for instructors and admins

use crate::db::repositories::PaymentTotals;
use crate::models::{CourseStatus, EarningsSummary, UserRole};
use crate::services::certificate::{CertificateService, CertificateServiceError};
use crate::services::course::{CourseService, CourseServiceError};
use crate::services::enrollment::{EnrollmentService, EnrollmentServiceError};
use crate::services::payment::{PaymentService, PaymentServiceError};
use crate::services::user::{UserService, UserServiceError};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum DashboardError {
    #[error(transparent)]
    Course(#[from] CourseServiceError),
    #[error(transparent)]
    Enrollment(#[from] EnrollmentServiceError),
    #[error(transparent)]
    Payment(#[from] PaymentServiceError),
    #[error(transparent)]
    User(#[from] UserServiceError),
    #[error(transparent)]
    Certificate(#[from] CertificateServiceError),
}

#[derive(Debug, Clone, Serialize)]
pub struct InstructorDashboard {
    pub courses: i64,
    pub published_courses: i64,
    /// Distinct students across all courses
    pub students: i64,
    pub completed_enrollments: i64,
    pub earnings: EarningsSummary,
}

#[derive(Debug, Clone, Serialize)]
pub struct RevenueTotals {
    pub currency: String,
    pub sales: i64,
    pub gross_cents: i64,
    pub platform_fee_cents: i64,
    pub instructor_share_cents: i64,
    pub refunded_cents: i64,
}

impl RevenueTotals {
    fn new(currency: &str, totals: PaymentTotals) -> Self {
        Self {
            currency: currency.to_string(),
            sales: totals.sales,
            gross_cents: totals.gross_cents,
            platform_fee_cents: totals.platform_fee_cents,
            instructor_share_cents: totals.instructor_share_cents,
            refunded_cents: totals.refunded_cents,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AdminDashboard {
    pub users_by_role: BTreeMap<String, i64>,
    pub courses_by_status: BTreeMap<String, i64>,
    pub enrollments: i64,
    pub certificates: i64,
    pub revenue: RevenueTotals,
}

pub struct DashboardService {
    users: Arc<UserService>,
    courses: Arc<CourseService>,
    enrollments: Arc<EnrollmentService>,
    payments: Arc<PaymentService>,
    certificates: Arc<CertificateService>,
}

impl DashboardService {
    pub fn new(
        users: Arc<UserService>,
        courses: Arc<CourseService>,
        enrollments: Arc<EnrollmentService>,
        payments: Arc<PaymentService>,
        certificates: Arc<CertificateService>,
    ) -> Self {
        Self {
            users,
            courses,
            enrollments,
            payments,
            certificates,
        }
    }

    pub async fn instructor(&self, instructor_id: i64) -> Result<InstructorDashboard, DashboardError> {
        let courses = self.courses.list_instructor_courses(instructor_id).await?;
        let published_courses = courses
            .iter()
            .filter(|c| c.status == CourseStatus::Published)
            .count() as i64;
        let (students, completed_enrollments) = self.enrollments.instructor_totals(instructor_id).await?;
        let earnings = self.payments.instructor_earnings(instructor_id).await?;

        Ok(InstructorDashboard {
            courses: courses.len() as i64,
            published_courses,
            students,
            completed_enrollments,
            earnings,
        })
    }

    pub async fn admin(&self) -> Result<AdminDashboard, DashboardError> {
        // Every role and status is listed, even with a zero count
        let mut users_by_role: BTreeMap<String, i64> = [
            UserRole::Admin,
            UserRole::Instructor,
            UserRole::Student,
        ]
        .iter()
        .map(|r| (r.to_string(), 0))
        .collect();
        for (role, count) in self.users.count_by_role().await? {
            users_by_role.insert(role.to_string(), count);
        }

        let mut courses_by_status: BTreeMap<String, i64> = [
            CourseStatus::Draft,
            CourseStatus::Published,
            CourseStatus::Archived,
        ]
        .iter()
        .map(|s| (s.to_string(), 0))
        .collect();
        for (status, count) in self.courses.count_by_status().await? {
            courses_by_status.insert(status.to_string(), count);
        }

        let revenue = self.payments.platform_revenue().await?;

        Ok(AdminDashboard {
            users_by_role,
            courses_by_status,
            enrollments: self.enrollments.count_all().await?,
            certificates: self.certificates.count().await?,
            revenue: RevenueTotals::new(self.payments.currency(), revenue),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AuthConfig, PaymentConfig};
    use crate::db::repositories::test_support::*;
    use crate::db::repositories::{
        SqlxCourseRepository, SqlxEnrollmentRepository, SqlxNotificationRepository,
        SqlxPaymentRepository, SqlxSessionRepository, SqlxUserRepository,
    };
    use crate::db::Database;
    use crate::services::certificate::tests::certificate_service;
    use crate::services::course::tests::course_service;
    use crate::services::enrollment::tests::enrollment_service;
    use crate::services::notification::NotificationService;

    fn dashboard(db: &Database) -> DashboardService {
        let payments = PaymentService::new(
            SqlxPaymentRepository::boxed(db.clone()),
            SqlxCourseRepository::boxed(db.clone()),
            SqlxEnrollmentRepository::boxed(db.clone()),
            Arc::new(NotificationService::new(SqlxNotificationRepository::boxed(db.clone()))),
            PaymentConfig::default(),
        );
        DashboardService::new(
            Arc::new(UserService::new(
                SqlxUserRepository::boxed(db.clone()),
                SqlxSessionRepository::boxed(db.clone()),
                &AuthConfig::default(),
            )),
            Arc::new(course_service(db)),
            Arc::new(enrollment_service(db)),
            Arc::new(payments),
            Arc::new(certificate_service(db)),
        )
    }

    #[tokio::test]
    async fn test_instructor_dashboard() {
        let db = setup_db().await;
        let instructor = insert_user(&db, "prof", UserRole::Instructor).await;
        let first = insert_user(&db, "s1", UserRole::Student).await;
        let second = insert_user(&db, "s2", UserRole::Student).await;
        let rust = insert_course(&db, instructor, "rust", 0).await;
        let go = insert_course(&db, instructor, "go", 0).await;
        sqlx::query("UPDATE courses SET status = 'draft' WHERE id = ?")
            .bind(go)
            .execute(db.pool())
            .await
            .unwrap();
        insert_enrollment(&db, first, rust).await;
        insert_enrollment(&db, second, rust).await;
        insert_enrollment(&db, first, go).await;

        let stats = dashboard(&db).instructor(instructor).await.unwrap();
        assert_eq!(stats.courses, 2);
        assert_eq!(stats.published_courses, 1);
        assert_eq!(stats.students, 2);
        assert_eq!(stats.completed_enrollments, 0);
        assert_eq!(stats.earnings.sales, 0);
    }

    #[tokio::test]
    async fn test_admin_dashboard_lists_zero_counts() {
        let db = setup_db().await;
        insert_user(&db, "root", UserRole::Admin).await;

        let stats = dashboard(&db).admin().await.unwrap();
        assert_eq!(stats.users_by_role["admin"], 1);
        assert_eq!(stats.users_by_role["student"], 0);
        assert_eq!(stats.courses_by_status["published"], 0);
        assert_eq!(stats.enrollments, 0);
        assert_eq!(stats.certificates, 0);
        assert_eq!(stats.revenue.currency, "usd");
    }
}
