//! Database repositories
//!
//! One repository per aggregate. Each exposes an async trait so services
//! can be tested against the trait, and a `Sqlx*` implementation on SQLite.

pub mod certificate;
pub mod course;
pub mod enrollment;
pub mod message;
pub mod notification;
pub mod payment;
pub mod quiz;
pub mod section;
pub mod session;
pub mod user;

#[cfg(test)]
pub(crate) mod test_support;

pub use certificate::{CertificateRepository, SqlxCertificateRepository};
pub use course::{CourseRepository, SqlxCourseRepository};
pub use enrollment::{EnrollmentRepository, ProgressUpdate, SqlxEnrollmentRepository};
pub use message::{MessageRepository, SqlxMessageRepository};
pub use notification::{NotificationRepository, SqlxNotificationRepository};
pub use payment::{PaymentRepository, PaymentTotals, SqlxPaymentRepository};
pub use quiz::{QuizRepository, SqlxQuizRepository};
pub use section::{SectionRepository, SqlxSectionRepository};
pub use session::{SessionRepository, SqlxSessionRepository};
pub use user::{SqlxUserRepository, UserRepository};
