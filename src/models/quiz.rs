//! Quiz models
//!
//! A quiz belongs to a section and holds ordered questions with answer
//! options. Attempts store the graded result per question as JSON.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quiz {
    pub id: i64,
    pub course_id: i64,
    pub section_id: i64,
    pub title: String,
    pub description: Option<String>,
    /// Minimum percentage (0..=100) needed to pass
    pub passing_score: i64,
    /// `None` means unlimited attempts
    pub max_attempts: Option<i64>,
    pub sort_order: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum QuestionKind {
    /// Exactly one correct answer
    #[default]
    SingleChoice,
    /// One or more correct answers, all must be selected
    MultipleChoice,
    /// Two answers, exactly one correct
    TrueFalse,
}

impl fmt::Display for QuestionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QuestionKind::SingleChoice => write!(f, "single_choice"),
            QuestionKind::MultipleChoice => write!(f, "multiple_choice"),
            QuestionKind::TrueFalse => write!(f, "true_false"),
        }
    }
}

impl FromStr for QuestionKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "single_choice" => Ok(QuestionKind::SingleChoice),
            "multiple_choice" => Ok(QuestionKind::MultipleChoice),
            "true_false" => Ok(QuestionKind::TrueFalse),
            _ => Err(anyhow::anyhow!("Invalid question kind: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Question {
    pub id: i64,
    pub quiz_id: i64,
    pub prompt: String,
    pub kind: QuestionKind,
    pub points: i64,
    pub explanation: Option<String>,
    pub sort_order: i64,
    pub answers: Vec<Answer>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Answer {
    pub id: i64,
    pub question_id: i64,
    pub text: String,
    pub is_correct: bool,
    pub sort_order: i64,
}

/// A quiz together with its questions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuizDetail {
    pub quiz: Quiz,
    pub questions: Vec<Question>,
}

impl QuizDetail {
    /// Copy of the quiz with correctness flags and explanations removed,
    /// for showing to students before they submit.
    pub fn for_student(&self) -> QuizDetail {
        let mut detail = self.clone();
        for question in &mut detail.questions {
            question.explanation = None;
            for answer in &mut question.answers {
                answer.is_correct = false;
            }
        }
        detail
    }

    pub fn total_points(&self) -> i64 {
        self.questions.iter().map(|q| q.points).sum()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateQuizInput {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub passing_score: Option<i64>,
    #[serde(default)]
    pub max_attempts: Option<i64>,
    #[serde(default)]
    pub sort_order: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateQuizInput {
    pub title: Option<String>,
    pub description: Option<String>,
    pub passing_score: Option<i64>,
    pub max_attempts: Option<i64>,
    pub sort_order: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AnswerInput {
    pub text: String,
    #[serde(default)]
    pub is_correct: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QuestionInput {
    pub prompt: String,
    #[serde(default)]
    pub kind: QuestionKind,
    #[serde(default = "default_points")]
    pub points: i64,
    #[serde(default)]
    pub explanation: Option<String>,
    pub answers: Vec<AnswerInput>,
}

fn default_points() -> i64 {
    1
}

/// The answers a student selected for one question
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct QuestionResponse {
    pub question_id: i64,
    #[serde(default)]
    pub answer_ids: Vec<i64>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct QuizSubmission {
    pub responses: Vec<QuestionResponse>,
}

/// Grading outcome for one question
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QuestionResult {
    pub question_id: i64,
    pub correct: bool,
    pub points_awarded: i64,
    pub selected_answer_ids: Vec<i64>,
    pub correct_answer_ids: Vec<i64>,
}

/// A graded submission
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuizAttempt {
    pub id: i64,
    pub quiz_id: i64,
    pub user_id: i64,
    pub score_percent: f64,
    pub points_earned: i64,
    pub points_possible: i64,
    pub passed: bool,
    pub results: Vec<QuestionResult>,
    pub submitted_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detail() -> QuizDetail {
        let now = Utc::now();
        QuizDetail {
            quiz: Quiz {
                id: 1,
                course_id: 1,
                section_id: 1,
                title: "Ownership".to_string(),
                description: None,
                passing_score: 70,
                max_attempts: None,
                sort_order: 0,
                created_at: now,
                updated_at: now,
            },
            questions: vec![Question {
                id: 10,
                quiz_id: 1,
                prompt: "Who owns a moved value?".to_string(),
                kind: QuestionKind::SingleChoice,
                points: 3,
                explanation: Some("The new binding".to_string()),
                sort_order: 0,
                answers: vec![
                    Answer { id: 100, question_id: 10, text: "new".into(), is_correct: true, sort_order: 0 },
                    Answer { id: 101, question_id: 10, text: "old".into(), is_correct: false, sort_order: 1 },
                ],
            }],
        }
    }

    #[test]
    fn test_for_student_hides_solutions() {
        let student = detail().for_student();
        assert!(student.questions[0].explanation.is_none());
        assert!(student.questions[0].answers.iter().all(|a| !a.is_correct));
    }

    #[test]
    fn test_total_points() {
        assert_eq!(detail().total_points(), 3);
    }

    #[test]
    fn test_question_kind_serde() {
        assert_eq!(QuestionKind::from_str("true_false").unwrap(), QuestionKind::TrueFalse);
        assert_eq!(QuestionKind::MultipleChoice.to_string(), "multiple_choice");
        let input: QuestionInput =
            serde_json::from_str(r#"{"prompt":"p","answers":[{"text":"a"}]}"#).unwrap();
        assert_eq!(input.kind, QuestionKind::SingleChoice);
        assert_eq!(input.points, 1);
    }
}
