//! Services layer - Business logic
//!
//! Services sit between the HTTP handlers and the repositories. They:
//! - Enforce ownership and role rules
//! - Validate input before it reaches the database
//! - Keep cached course data in step with writes
//! - Emit notifications for the events users care about

pub mod certificate;
pub mod course;
pub mod dashboard;
pub mod enrollment;
pub mod markdown;
pub mod message;
pub mod notification;
pub mod password;
pub mod payment;
pub mod quiz;
pub mod rate_limiter;
pub mod slug;
pub mod user;

pub use certificate::{CertificateContext, CertificateService, CertificateServiceError};
pub use course::{CourseService, CourseServiceError};
pub use dashboard::{AdminDashboard, DashboardError, DashboardService, InstructorDashboard};
pub use enrollment::{CompletionOutcome, EnrollmentService, EnrollmentServiceError};
pub use markdown::MarkdownRenderer;
pub use message::{MessageService, MessageServiceError};
pub use notification::{NotificationService, NotificationServiceError};
pub use password::{hash_password, verify_password};
pub use payment::{PaymentService, PaymentServiceError, WebhookOutcome};
pub use quiz::{QuizService, QuizServiceError};
pub use rate_limiter::LoginRateLimiter;
pub use user::{
    AuthSession, LoginInput, RegisterInput, UpdateProfileInput, UserService, UserServiceError,
};
