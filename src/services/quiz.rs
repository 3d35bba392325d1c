//! Quiz service
//!
//! Quiz and question authoring, grading and attempts.
//!
//! Grading is all-or-nothing per question: the set of chosen answers must
//! equal the set of correct answers. A passed attempt counts as completing
//! the quiz for the enrollment's progress.

use crate::db::repositories::QuizRepository;
use crate::models::{
    round2, CreateQuizInput, NewNotification, NotificationKind, ProgressItem, Question,
    QuestionInput, QuestionKind, QuestionResult, Quiz, QuizAttempt, QuizDetail, QuizSubmission,
    UpdateQuizInput, User,
};
use crate::services::course::{CourseService, CourseServiceError};
use crate::services::enrollment::{EnrollmentService, EnrollmentServiceError};
use crate::services::notification::NotificationService;
use anyhow::Context;
use chrono::Utc;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

const DEFAULT_PASSING_SCORE: i64 = 70;

#[derive(Debug, thiserror::Error)]
pub enum QuizServiceError {
    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("You are not enrolled in this course")]
    NotEnrolled,

    #[error("No attempts left for this quiz")]
    AttemptsExhausted,

    #[error(transparent)]
    Course(#[from] CourseServiceError),

    #[error(transparent)]
    Enrollment(EnrollmentServiceError),

    #[error("Internal error: {0}")]
    InternalError(#[from] anyhow::Error),
}

impl From<EnrollmentServiceError> for QuizServiceError {
    fn from(err: EnrollmentServiceError) -> Self {
        match err {
            EnrollmentServiceError::NotEnrolled => QuizServiceError::NotEnrolled,
            other => QuizServiceError::Enrollment(other),
        }
    }
}

/// Score of one submission before it is stored
#[derive(Debug, Clone, PartialEq)]
pub struct Grade {
    pub results: Vec<QuestionResult>,
    pub points_earned: i64,
    pub points_possible: i64,
    /// 0.0..=100.0 rounded to two decimals; 0 for a quiz without questions
    pub score_percent: f64,
}

impl Grade {
    pub fn passed(&self, passing_score: i64) -> bool {
        self.score_percent >= passing_score as f64
    }
}

/// Grade a submission against a quiz's questions.
///
/// Responses to unknown questions are ignored; unanswered questions score
/// zero. Several responses for the same question are merged.
pub fn grade(detail: &QuizDetail, submission: &QuizSubmission) -> Grade {
    let mut chosen: HashMap<i64, BTreeSet<i64>> = HashMap::new();
    for response in &submission.responses {
        chosen
            .entry(response.question_id)
            .or_default()
            .extend(response.answer_ids.iter().copied());
    }

    let mut points_earned = 0;
    let mut points_possible = 0;
    let results = detail
        .questions
        .iter()
        .map(|question| {
            let correct: BTreeSet<i64> = question
                .answers
                .iter()
                .filter(|a| a.is_correct)
                .map(|a| a.id)
                .collect();
            let selected = chosen.remove(&question.id).unwrap_or_default();

            let is_correct = !selected.is_empty() && selected == correct;
            let points_awarded = if is_correct { question.points } else { 0 };
            points_earned += points_awarded;
            points_possible += question.points;

            QuestionResult {
                question_id: question.id,
                correct: is_correct,
                points_awarded,
                selected_answer_ids: selected.into_iter().collect(),
                correct_answer_ids: correct.into_iter().collect(),
            }
        })
        .collect();

    let score_percent = if points_possible > 0 {
        round2(points_earned as f64 * 100.0 / points_possible as f64)
    } else {
        0.0
    };

    Grade {
        results,
        points_earned,
        points_possible,
        score_percent,
    }
}

/// Check a question before it is saved
pub fn validate_question(input: &QuestionInput) -> Result<(), QuizServiceError> {
    let invalid = |msg: &str| Err(QuizServiceError::ValidationError(msg.to_string()));

    if input.prompt.trim().is_empty() {
        return invalid("Question prompt is required");
    }
    if input.points < 1 {
        return invalid("A question is worth at least one point");
    }
    if input.answers.len() < 2 {
        return invalid("A question needs at least two answers");
    }
    if input.answers.iter().any(|a| a.text.trim().is_empty()) {
        return invalid("Answers cannot be empty");
    }

    let correct = input.answers.iter().filter(|a| a.is_correct).count();
    match input.kind {
        QuestionKind::SingleChoice if correct != 1 => {
            invalid("A single choice question needs exactly one correct answer")
        }
        QuestionKind::TrueFalse if input.answers.len() != 2 => {
            invalid("A true/false question has exactly two answers")
        }
        QuestionKind::TrueFalse if correct != 1 => {
            invalid("A true/false question needs exactly one correct answer")
        }
        QuestionKind::MultipleChoice if correct == 0 => {
            invalid("A multiple choice question needs at least one correct answer")
        }
        _ => Ok(()),
    }
}

pub struct QuizService {
    quiz_repo: Arc<dyn QuizRepository>,
    courses: Arc<CourseService>,
    enrollments: Arc<EnrollmentService>,
    notifications: Arc<NotificationService>,
}

impl QuizService {
    pub fn new(
        quiz_repo: Arc<dyn QuizRepository>,
        courses: Arc<CourseService>,
        enrollments: Arc<EnrollmentService>,
        notifications: Arc<NotificationService>,
    ) -> Self {
        Self {
            quiz_repo,
            courses,
            enrollments,
            notifications,
        }
    }

    // ========================================================================
    // Authoring
    // ========================================================================

    pub async fn create_quiz(
        &self,
        actor: &User,
        section_id: i64,
        input: CreateQuizInput,
    ) -> Result<Quiz, QuizServiceError> {
        let (section, course) = self.courses.owned_section(actor, section_id).await?;
        let title = required(&input.title, "Quiz title is required")?;
        let passing_score = validate_passing_score(input.passing_score.unwrap_or(DEFAULT_PASSING_SCORE))?;
        let max_attempts = validate_max_attempts(input.max_attempts)?;

        let sort_order = match input.sort_order {
            Some(order) => order,
            None => self
                .quiz_repo
                .next_quiz_order(section.id)
                .await
                .context("Failed to get next quiz order")?,
        };

        let now = Utc::now();
        let quiz = self
            .quiz_repo
            .create_quiz(&Quiz {
                id: 0,
                course_id: course.id,
                section_id: section.id,
                title,
                description: input.description.filter(|d| !d.trim().is_empty()),
                passing_score,
                max_attempts,
                sort_order,
                created_at: now,
                updated_at: now,
            })
            .await
            .context("Failed to create quiz")?;

        self.courses.refresh_stats(course.id, &[section.id]).await?;
        Ok(quiz)
    }

    /// Update quiz settings. `max_attempts: 0` removes the limit.
    pub async fn update_quiz(
        &self,
        actor: &User,
        quiz_id: i64,
        input: UpdateQuizInput,
    ) -> Result<Quiz, QuizServiceError> {
        let mut quiz = self.find_quiz(quiz_id).await?;
        let course = self.courses.owned_course(actor, quiz.course_id).await?;

        if let Some(title) = input.title {
            quiz.title = required(&title, "Quiz title is required")?;
        }
        if let Some(description) = input.description {
            quiz.description = Some(description).filter(|d| !d.trim().is_empty());
        }
        if let Some(score) = input.passing_score {
            quiz.passing_score = validate_passing_score(score)?;
        }
        if let Some(max) = input.max_attempts {
            quiz.max_attempts = if max == 0 { None } else { validate_max_attempts(Some(max))? };
        }
        if let Some(order) = input.sort_order {
            quiz.sort_order = order;
        }
        quiz.updated_at = Utc::now();

        let quiz = self
            .quiz_repo
            .update_quiz(&quiz)
            .await
            .context("Failed to update quiz")?;
        self.courses.invalidate(&course).await;
        Ok(quiz)
    }

    pub async fn delete_quiz(&self, actor: &User, quiz_id: i64) -> Result<(), QuizServiceError> {
        let quiz = self.find_quiz(quiz_id).await?;
        let course = self.courses.owned_course(actor, quiz.course_id).await?;
        self.quiz_repo
            .delete_quiz(quiz.id)
            .await
            .context("Failed to delete quiz")?;
        self.courses.refresh_stats(course.id, &[quiz.section_id]).await?;
        self.enrollments.refresh_course_progress(course.id).await?;
        Ok(())
    }

    /// Full quiz with answers and explanations, for its editors
    pub async fn editor_detail(&self, actor: &User, quiz_id: i64) -> Result<QuizDetail, QuizServiceError> {
        let quiz = self.find_quiz(quiz_id).await?;
        self.courses.owned_course(actor, quiz.course_id).await?;
        self.load_detail(quiz.id).await
    }

    pub async fn add_question(
        &self,
        actor: &User,
        quiz_id: i64,
        input: QuestionInput,
    ) -> Result<Question, QuizServiceError> {
        let quiz = self.find_quiz(quiz_id).await?;
        self.courses.owned_course(actor, quiz.course_id).await?;
        validate_question(&input)?;

        Ok(self
            .quiz_repo
            .add_question(quiz.id, &input)
            .await
            .context("Failed to add question")?)
    }

    /// Replace a question's prompt, settings and answers
    pub async fn update_question(
        &self,
        actor: &User,
        question_id: i64,
        input: QuestionInput,
    ) -> Result<Question, QuizServiceError> {
        let question = self.find_question(question_id).await?;
        let quiz = self.find_quiz(question.quiz_id).await?;
        self.courses.owned_course(actor, quiz.course_id).await?;
        validate_question(&input)?;

        Ok(self
            .quiz_repo
            .replace_question(question.id, &input)
            .await
            .context("Failed to update question")?)
    }

    pub async fn delete_question(&self, actor: &User, question_id: i64) -> Result<(), QuizServiceError> {
        let question = self.find_question(question_id).await?;
        let quiz = self.find_quiz(question.quiz_id).await?;
        self.courses.owned_course(actor, quiz.course_id).await?;
        self.quiz_repo
            .delete_question(question.id)
            .await
            .context("Failed to delete question")?;
        Ok(())
    }

    // ========================================================================
    // Taking quizzes
    // ========================================================================

    /// The quiz as a student sees it: no correctness flags or explanations.
    /// Course editors get the full quiz.
    pub async fn get_for_student(&self, viewer: &User, quiz_id: i64) -> Result<QuizDetail, QuizServiceError> {
        let quiz = self.find_quiz(quiz_id).await?;
        let course = self.courses.get_course(quiz.course_id).await?;

        if viewer.can_manage(course.instructor_id) {
            return self.load_detail(quiz.id).await;
        }
        self.enrollments.active_enrollment(viewer.id, course.id).await?;
        Ok(self.load_detail(quiz.id).await?.for_student())
    }

    /// Grade and store an attempt.
    ///
    /// Passing records the quiz as completed, which may complete the course
    /// and issue its certificate.
    pub async fn submit_attempt(
        &self,
        student: &User,
        quiz_id: i64,
        submission: QuizSubmission,
    ) -> Result<QuizAttempt, QuizServiceError> {
        let detail = self.load_detail(quiz_id).await?;
        let quiz = &detail.quiz;
        let enrollment = self.enrollments.active_enrollment(student.id, quiz.course_id).await?;

        let grade = grade(&detail, &submission);
        let passed = grade.passed(quiz.passing_score);

        let attempt = QuizAttempt {
            id: 0,
            quiz_id: quiz.id,
            user_id: student.id,
            score_percent: grade.score_percent,
            points_earned: grade.points_earned,
            points_possible: grade.points_possible,
            passed,
            results: grade.results,
            submitted_at: Utc::now(),
        };
        let attempt = self
            .quiz_repo
            .create_attempt(&attempt, quiz.max_attempts)
            .await
            .context("Failed to store attempt")?
            .ok_or(QuizServiceError::AttemptsExhausted)?;

        if passed {
            let outcome = self
                .enrollments
                .record_completion(&enrollment, ProgressItem::Quiz(quiz.id))
                .await?;
            if outcome.newly_recorded {
                self.notifications
                    .notify(
                        NewNotification::new(student.id, NotificationKind::Quiz, "Quiz passed")
                            .body(format!(
                                "You scored {}% on \"{}\".",
                                attempt.score_percent, quiz.title
                            ))
                            .link(format!("/quizzes/{}", quiz.id)),
                    )
                    .await;
            }
        }

        Ok(attempt)
    }

    pub async fn list_attempts(&self, student: &User, quiz_id: i64) -> Result<Vec<QuizAttempt>, QuizServiceError> {
        let quiz = self.find_quiz(quiz_id).await?;
        Ok(self
            .quiz_repo
            .list_attempts(quiz.id, student.id)
            .await
            .context("Failed to list attempts")?)
    }

    async fn find_quiz(&self, quiz_id: i64) -> Result<Quiz, QuizServiceError> {
        self.quiz_repo
            .get_quiz(quiz_id)
            .await
            .context("Failed to get quiz")?
            .ok_or(QuizServiceError::NotFound("Quiz"))
    }

    async fn find_question(&self, question_id: i64) -> Result<Question, QuizServiceError> {
        self.quiz_repo
            .get_question(question_id)
            .await
            .context("Failed to get question")?
            .ok_or(QuizServiceError::NotFound("Question"))
    }

    async fn load_detail(&self, quiz_id: i64) -> Result<QuizDetail, QuizServiceError> {
        self.quiz_repo
            .get_detail(quiz_id)
            .await
            .context("Failed to load quiz")?
            .ok_or(QuizServiceError::NotFound("Quiz"))
    }
}

fn required(value: &str, message: &str) -> Result<String, QuizServiceError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(QuizServiceError::ValidationError(message.to_string()));
    }
    Ok(value.to_string())
}

fn validate_passing_score(score: i64) -> Result<i64, QuizServiceError> {
    if !(0..=100).contains(&score) {
        return Err(QuizServiceError::ValidationError(
            "Passing score must be between 0 and 100".to_string(),
        ));
    }
    Ok(score)
}

fn validate_max_attempts(max: Option<i64>) -> Result<Option<i64>, QuizServiceError> {
    match max {
        Some(n) if n < 1 => Err(QuizServiceError::ValidationError(
            "Max attempts must be at least 1".to_string(),
        )),
        other => Ok(other),
    }
}
