//! Data models
//!
//! Plain data structures shared by the repositories, services and API:
//! - Database entities (User, Session, Course, Section, Lesson, Quiz,
//!   Enrollment, Payment, Certificate, Conversation, Message, Notification)
//! - Request inputs and aggregated views

mod certificate;
mod course;
mod enrollment;
mod message;
mod notification;
mod payment;
mod quiz;
mod section;
mod session;
mod user;

pub use certificate::{
    Certificate, CertificateTemplate, CertificateVerification, CreateTemplateInput, ElementKind,
    TemplateElement, TemplateLayout, UpdateTemplateInput, PLACEHOLDERS,
};
pub use course::{
    Course, CourseFilter, CourseLevel, CourseOutline, CourseStatus, CreateCourseInput, ListParams,
    PagedResult, SectionOutline, UpdateCourseInput,
};
pub use enrollment::{
    progress_percent, round2, CourseProgress, CourseStudent, Enrollment, EnrollmentStatus, EnrollmentWithCourse,
    ProgressItem, ProgressRecord, SectionProgress,
};
pub use message::{
    ordered_pair, Conversation, ConversationSummary, Message, SendMessageInput, MAX_MESSAGE_LENGTH,
};
pub use notification::{NewNotification, Notification, NotificationKind};
pub use payment::{
    CourseEarnings, EarningsSummary, Payment, PaymentStatus, PaymentWebhookEvent, RevenueSplit,
    MAX_PRICE_CENTS,
};
pub use quiz::{
    Answer, AnswerInput, CreateQuizInput, Question, QuestionInput, QuestionKind, QuestionResponse,
    QuestionResult, Quiz, QuizAttempt, QuizDetail, QuizSubmission, UpdateQuizInput,
};
pub use section::{
    CreateLessonInput, CreateSectionInput, Lesson, ReorderItem, Section, UpdateLessonInput,
    UpdateSectionInput,
};
pub use session::Session;
pub use user::{User, UserRole, UserStatus};
