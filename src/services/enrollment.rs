//! Enrollment service
//!
//! Enrolling in free courses, recording completed lessons and passed
//! quizzes, and the progress rollup that follows each completion.
//!
//! The rollup recounts the enrollment's progress rows against the course's
//! current lessons and quizzes. Reaching every item moves the enrollment to
//! `completed` and issues the certificate.

use crate::db::repositories::{
    CourseRepository, EnrollmentRepository, QuizRepository, SectionRepository,
};
use crate::models::{
    progress_percent, Certificate, Course, CourseProgress, CourseStudent, Enrollment,
    EnrollmentStatus, EnrollmentWithCourse, NewNotification, NotificationKind, ProgressItem,
    SectionProgress, User,
};
use crate::services::certificate::{CertificateService, CertificateServiceError};
use crate::services::notification::NotificationService;
use anyhow::Context;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum EnrollmentServiceError {
    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("You are not enrolled in this course")]
    NotEnrolled,

    #[error("Already enrolled in this course")]
    AlreadyEnrolled,

    #[error("This course requires payment")]
    PaymentRequired,

    #[error("Course is not available: {0}")]
    NotAvailable(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error(transparent)]
    Certificate(#[from] CertificateServiceError),

    #[error("Internal error: {0}")]
    InternalError(#[from] anyhow::Error),
}

/// What a completion changed
#[derive(Debug, Clone, Serialize)]
pub struct CompletionOutcome {
    pub enrollment: Enrollment,
    /// False when the item had already been completed
    pub newly_recorded: bool,
    /// True when this completion finished the course
    pub course_completed: bool,
    /// Present once the enrollment is completed
    pub certificate: Option<Certificate>,
}

pub struct EnrollmentService {
    enrollment_repo: Arc<dyn EnrollmentRepository>,
    course_repo: Arc<dyn CourseRepository>,
    section_repo: Arc<dyn SectionRepository>,
    quiz_repo: Arc<dyn QuizRepository>,
    certificates: Arc<CertificateService>,
    notifications: Arc<NotificationService>,
}

impl EnrollmentService {
    pub fn new(
        enrollment_repo: Arc<dyn EnrollmentRepository>,
        course_repo: Arc<dyn CourseRepository>,
        section_repo: Arc<dyn SectionRepository>,
        quiz_repo: Arc<dyn QuizRepository>,
        certificates: Arc<CertificateService>,
        notifications: Arc<NotificationService>,
    ) -> Self {
        Self {
            enrollment_repo,
            course_repo,
            section_repo,
            quiz_repo,
            certificates,
            notifications,
        }
    }

    /// Enroll a student in a free, published course.
    ///
    /// Paid courses are enrolled through a completed payment instead. A
    /// refunded enrollment in a course that has since become free is
    /// reactivated.
    pub async fn enroll(&self, student: &User, course_id: i64) -> Result<Enrollment, EnrollmentServiceError> {
        let course = self.find_course(course_id).await?;

        if !course.is_published() {
            return Err(EnrollmentServiceError::NotAvailable(
                "the course is not published".to_string(),
            ));
        }
        if course.instructor_id == student.id {
            return Err(EnrollmentServiceError::NotAvailable(
                "instructors cannot enroll in their own course".to_string(),
            ));
        }
        if !course.is_free() {
            return Err(EnrollmentServiceError::PaymentRequired);
        }

        let existing = self
            .enrollment_repo
            .get(student.id, course.id)
            .await
            .context("Failed to check enrollment")?;
        if existing.is_some_and(|e| e.has_access()) {
            return Err(EnrollmentServiceError::AlreadyEnrolled);
        }

        let enrollment = self
            .enrollment_repo
            .create(student.id, course.id, None)
            .await
            .context("Failed to create enrollment")?;

        tracing::info!(user_id = student.id, course_id, "Student enrolled");
        self.notifications
            .notify(
                NewNotification::new(course.instructor_id, NotificationKind::Enrollment, "New student")
                    .body(format!("{} enrolled in \"{}\".", student.public_name(), course.title))
                    .link(format!("/instructor/courses/{}/students", course.id)),
            )
            .await;
        Ok(enrollment)
    }

    /// Mark a lesson as completed. Completing a lesson twice is a no-op.
    pub async fn complete_lesson(
        &self,
        student: &User,
        lesson_id: i64,
    ) -> Result<CompletionOutcome, EnrollmentServiceError> {
        let lesson = self
            .section_repo
            .get_lesson(lesson_id)
            .await
            .context("Failed to get lesson")?
            .ok_or(EnrollmentServiceError::NotFound("Lesson"))?;

        let enrollment = self.active_enrollment(student.id, lesson.course_id).await?;
        self.record_completion(&enrollment, ProgressItem::Lesson(lesson.id)).await
    }

    /// Record a completed item and roll progress up to the enrollment.
    pub async fn record_completion(
        &self,
        enrollment: &Enrollment,
        item: ProgressItem,
    ) -> Result<CompletionOutcome, EnrollmentServiceError> {
        let newly_recorded = self
            .enrollment_repo
            .record_progress(enrollment.id, item)
            .await
            .context("Failed to record progress")?;

        let update = self
            .enrollment_repo
            .refresh_progress(enrollment.id)
            .await
            .context("Failed to refresh progress")?;

        if update.newly_completed {
            tracing::info!(
                enrollment_id = enrollment.id,
                course_id = enrollment.course_id,
                "Course completed"
            );
        }

        // Issuance is idempotent, so a completed enrollment always ends up
        // with its certificate even if an earlier issuance failed.
        let certificate = if update.enrollment.status == EnrollmentStatus::Completed {
            Some(self.certificates.issue(enrollment.id).await?)
        } else {
            None
        };

        Ok(CompletionOutcome {
            enrollment: update.enrollment,
            newly_recorded,
            course_completed: update.newly_completed,
            certificate,
        })
    }

    /// Rerun the rollup for every in-progress enrollment of a course.
    ///
    /// Removing lessons or quizzes can leave a student with every remaining
    /// item done. Those enrollments complete here and get their certificate.
    /// Returns how many enrollments were completed.
    pub async fn refresh_course_progress(&self, course_id: i64) -> Result<usize, EnrollmentServiceError> {
        let ids = self
            .enrollment_repo
            .list_active_ids(course_id)
            .await
            .context("Failed to list active enrollments")?;

        let mut completed = 0;
        for id in ids {
            let update = self
                .enrollment_repo
                .refresh_progress(id)
                .await
                .context("Failed to refresh progress")?;
            if update.newly_completed {
                tracing::info!(enrollment_id = id, course_id, "Course completed after content removal");
                self.certificates.issue(id).await?;
                completed += 1;
            }
        }
        Ok(completed)
    }

    /// The student's enrollment in a course, if it still grants access
    pub async fn active_enrollment(&self, user_id: i64, course_id: i64) -> Result<Enrollment, EnrollmentServiceError> {
        self.enrollment_repo
            .get(user_id, course_id)
            .await
            .context("Failed to get enrollment")?
            .filter(Enrollment::has_access)
            .ok_or(EnrollmentServiceError::NotEnrolled)
    }

    /// Per-section breakdown of a student's progress in a course
    pub async fn course_progress(
        &self,
        student_id: i64,
        course_id: i64,
    ) -> Result<CourseProgress, EnrollmentServiceError> {
        let enrollment = self
            .enrollment_repo
            .get(student_id, course_id)
            .await
            .context("Failed to get enrollment")?
            .ok_or(EnrollmentServiceError::NotEnrolled)?;

        let records = self
            .enrollment_repo
            .list_progress(enrollment.id)
            .await
            .context("Failed to list progress")?;
        let mut done_lessons = HashSet::new();
        let mut done_quizzes = HashSet::new();
        for record in records {
            match record.item {
                ProgressItem::Lesson(id) => done_lessons.insert(id),
                ProgressItem::Quiz(id) => done_quizzes.insert(id),
            };
        }

        let sections = self
            .section_repo
            .list_sections(course_id)
            .await
            .context("Failed to list sections")?;
        let lessons = self
            .section_repo
            .list_lessons(course_id)
            .await
            .context("Failed to list lessons")?;
        let quizzes = self
            .quiz_repo
            .list_quizzes(course_id)
            .await
            .context("Failed to list quizzes")?;

        let sections = sections
            .into_iter()
            .map(|section| {
                let lesson_ids: Vec<i64> = lessons
                    .iter()
                    .filter(|l| l.section_id == section.id)
                    .map(|l| l.id)
                    .collect();
                let quiz_ids: Vec<i64> = quizzes
                    .iter()
                    .filter(|q| q.section_id == section.id)
                    .map(|q| q.id)
                    .collect();

                let completed_lesson_ids: Vec<i64> =
                    lesson_ids.iter().copied().filter(|id| done_lessons.contains(id)).collect();
                let completed_quiz_ids: Vec<i64> =
                    quiz_ids.iter().copied().filter(|id| done_quizzes.contains(id)).collect();

                let total_items = (lesson_ids.len() + quiz_ids.len()) as i64;
                let completed_items = (completed_lesson_ids.len() + completed_quiz_ids.len()) as i64;

                SectionProgress {
                    section_id: section.id,
                    title: section.title,
                    total_items,
                    completed_items,
                    progress_percent: progress_percent(completed_items, total_items),
                    completed_lesson_ids,
                    completed_quiz_ids,
                }
            })
            .collect();

        let certificate_number = self
            .certificates
            .find_by_enrollment(enrollment.id)
            .await?
            .map(|c| c.certificate_number);

        Ok(CourseProgress {
            enrollment,
            sections,
            certificate_number,
        })
    }

    pub async fn my_enrollments(&self, user_id: i64) -> Result<Vec<EnrollmentWithCourse>, EnrollmentServiceError> {
        Ok(self
            .enrollment_repo
            .list_for_user(user_id)
            .await
            .context("Failed to list enrollments")?)
    }

    /// Roster of a course, for its instructor or an admin
    pub async fn course_students(
        &self,
        actor: &User,
        course_id: i64,
    ) -> Result<Vec<CourseStudent>, EnrollmentServiceError> {
        let course = self.find_course(course_id).await?;
        if !actor.can_manage(course.instructor_id) {
            return Err(EnrollmentServiceError::PermissionDenied(
                "You do not own this course".to_string(),
            ));
        }
        Ok(self
            .enrollment_repo
            .list_students(course.id)
            .await
            .context("Failed to list students")?)
    }

    /// Distinct students and completed enrollments across an instructor's courses
    pub async fn instructor_totals(&self, instructor_id: i64) -> Result<(i64, i64), EnrollmentServiceError> {
        Ok(self
            .enrollment_repo
            .instructor_totals(instructor_id)
            .await
            .context("Failed to count students")?)
    }

    pub async fn count_all(&self) -> Result<i64, EnrollmentServiceError> {
        Ok(self
            .enrollment_repo
            .count_all()
            .await
            .context("Failed to count enrollments")?)
    }

    async fn find_course(&self, course_id: i64) -> Result<Course, EnrollmentServiceError> {
        self.course_repo
            .get_by_id(course_id)
            .await
            .context("Failed to get course")?
            .ok_or(EnrollmentServiceError::NotFound("Course"))
    }
}
