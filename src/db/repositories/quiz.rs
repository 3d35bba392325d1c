//! Quiz repository
//!
//! Quizzes, their questions and answer options, and graded attempts.

use crate::db::Database;
use crate::models::{
    Answer, Question, QuestionInput, QuestionKind, QuestionResult, Quiz, QuizAttempt, QuizDetail,
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use std::str::FromStr;
use std::sync::Arc;

#[async_trait]
pub trait QuizRepository: Send + Sync {
    async fn create_quiz(&self, quiz: &Quiz) -> Result<Quiz>;

    async fn get_quiz(&self, id: i64) -> Result<Option<Quiz>>;

    /// Quizzes of a course ordered by section, then quiz order
    async fn list_quizzes(&self, course_id: i64) -> Result<Vec<Quiz>>;

    async fn update_quiz(&self, quiz: &Quiz) -> Result<Quiz>;

    async fn delete_quiz(&self, id: i64) -> Result<()>;

    async fn next_quiz_order(&self, section_id: i64) -> Result<i64>;

    /// Quiz with questions and answers in display order
    async fn get_detail(&self, quiz_id: i64) -> Result<Option<QuizDetail>>;

    async fn get_question(&self, id: i64) -> Result<Option<Question>>;

    /// Insert a question and its answers in one transaction
    async fn add_question(&self, quiz_id: i64, input: &QuestionInput) -> Result<Question>;

    /// Overwrite a question and replace all of its answers
    async fn replace_question(&self, question_id: i64, input: &QuestionInput) -> Result<Question>;

    async fn delete_question(&self, id: i64) -> Result<()>;

    /// Store an attempt unless the user already used `max_attempts` of them.
    /// The limit check and the insert are a single statement, so concurrent
    /// submissions cannot exceed it. Returns `None` when no attempt is left.
    async fn create_attempt(
        &self,
        attempt: &QuizAttempt,
        max_attempts: Option<i64>,
    ) -> Result<Option<QuizAttempt>>;

    /// Attempts of one user, newest first
    async fn list_attempts(&self, quiz_id: i64, user_id: i64) -> Result<Vec<QuizAttempt>>;
}

pub struct SqlxQuizRepository {
    db: Database,
}

impl SqlxQuizRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn boxed(db: Database) -> Arc<dyn QuizRepository> {
        Arc::new(Self::new(db))
    }
}

#[async_trait]
impl QuizRepository for SqlxQuizRepository {
    async fn create_quiz(&self, quiz: &Quiz) -> Result<Quiz> {
        let now = Utc::now();
        let result = sqlx::query(
            r#"
            INSERT INTO quizzes (course_id, section_id, title, description, passing_score,
                                 max_attempts, sort_order, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(quiz.course_id)
        .bind(quiz.section_id)
        .bind(&quiz.title)
        .bind(&quiz.description)
        .bind(quiz.passing_score)
        .bind(quiz.max_attempts)
        .bind(quiz.sort_order)
        .bind(now)
        .bind(now)
        .execute(self.db.pool())
        .await
        .context("Failed to create quiz")?;

        get_quiz_by_id(self.db.pool(), result.last_insert_rowid())
            .await?
            .ok_or_else(|| anyhow::anyhow!("Quiz not found after insert"))
    }

    async fn get_quiz(&self, id: i64) -> Result<Option<Quiz>> {
        get_quiz_by_id(self.db.pool(), id).await
    }

    async fn list_quizzes(&self, course_id: i64) -> Result<Vec<Quiz>> {
        let rows = sqlx::query(
            r#"
            SELECT q.id, q.course_id, q.section_id, q.title, q.description, q.passing_score,
                   q.max_attempts, q.sort_order, q.created_at, q.updated_at
            FROM quizzes q
            JOIN sections s ON s.id = q.section_id
            WHERE q.course_id = ?
            ORDER BY s.sort_order, s.id, q.sort_order, q.id
            "#,
        )
        .bind(course_id)
        .fetch_all(self.db.pool())
        .await
        .context("Failed to list quizzes")?;
        Ok(rows.iter().map(row_to_quiz).collect())
    }

    async fn update_quiz(&self, quiz: &Quiz) -> Result<Quiz> {
        sqlx::query(
            r#"
            UPDATE quizzes
            SET title = ?, description = ?, passing_score = ?, max_attempts = ?, sort_order = ?,
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&quiz.title)
        .bind(&quiz.description)
        .bind(quiz.passing_score)
        .bind(quiz.max_attempts)
        .bind(quiz.sort_order)
        .bind(Utc::now())
        .bind(quiz.id)
        .execute(self.db.pool())
        .await
        .context("Failed to update quiz")?;

        get_quiz_by_id(self.db.pool(), quiz.id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Quiz not found after update"))
    }

    async fn delete_quiz(&self, id: i64) -> Result<()> {
        sqlx::query("DELETE FROM quizzes WHERE id = ?")
            .bind(id)
            .execute(self.db.pool())
            .await
            .context("Failed to delete quiz")?;
        Ok(())
    }

    async fn next_quiz_order(&self, section_id: i64) -> Result<i64> {
        let next: i64 = sqlx::query_scalar(
            "SELECT COALESCE(MAX(sort_order) + 1, 0) FROM quizzes WHERE section_id = ?",
        )
        .bind(section_id)
        .fetch_one(self.db.pool())
        .await
        .context("Failed to get next quiz order")?;
        Ok(next)
    }

    async fn get_detail(&self, quiz_id: i64) -> Result<Option<QuizDetail>> {
        let Some(quiz) = get_quiz_by_id(self.db.pool(), quiz_id).await? else {
            return Ok(None);
        };

        let question_rows = sqlx::query(
            r#"
            SELECT id, quiz_id, prompt, kind, points, explanation, sort_order
            FROM questions WHERE quiz_id = ? ORDER BY sort_order, id
            "#,
        )
        .bind(quiz_id)
        .fetch_all(self.db.pool())
        .await
        .context("Failed to load quiz questions")?;

        let answer_rows = sqlx::query(
            r#"
            SELECT a.id, a.question_id, a.text, a.is_correct, a.sort_order
            FROM answers a
            JOIN questions q ON q.id = a.question_id
            WHERE q.quiz_id = ?
            ORDER BY a.sort_order, a.id
            "#,
        )
        .bind(quiz_id)
        .fetch_all(self.db.pool())
        .await
        .context("Failed to load quiz answers")?;

        let answers: Vec<Answer> = answer_rows.iter().map(row_to_answer).collect();
        let mut questions = question_rows
            .iter()
            .map(row_to_question)
            .collect::<Result<Vec<_>>>()?;
        for question in &mut questions {
            question.answers = answers
                .iter()
                .filter(|a| a.question_id == question.id)
                .cloned()
                .collect();
        }

        Ok(Some(QuizDetail { quiz, questions }))
    }

    async fn get_question(&self, id: i64) -> Result<Option<Question>> {
        get_question_by_id(self.db.pool(), id).await
    }

    async fn add_question(&self, quiz_id: i64, input: &QuestionInput) -> Result<Question> {
        let mut tx = self.db.begin().await?;

        let sort_order: i64 = sqlx::query_scalar(
            "SELECT COALESCE(MAX(sort_order) + 1, 0) FROM questions WHERE quiz_id = ?",
        )
        .bind(quiz_id)
        .fetch_one(&mut *tx)
        .await
        .context("Failed to get next question order")?;

        let question_id = sqlx::query(
            r#"
            INSERT INTO questions (quiz_id, prompt, kind, points, explanation, sort_order)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(quiz_id)
        .bind(&input.prompt)
        .bind(input.kind.to_string())
        .bind(input.points)
        .bind(&input.explanation)
        .bind(sort_order)
        .execute(&mut *tx)
        .await
        .context("Failed to create question")?
        .last_insert_rowid();

        insert_answers(&mut tx, question_id, input).await?;
        tx.commit().await.context("Failed to commit question")?;

        get_question_by_id(self.db.pool(), question_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Question not found after insert"))
    }

    async fn replace_question(&self, question_id: i64, input: &QuestionInput) -> Result<Question> {
        let mut tx = self.db.begin().await?;

        sqlx::query("UPDATE questions SET prompt = ?, kind = ?, points = ?, explanation = ? WHERE id = ?")
            .bind(&input.prompt)
            .bind(input.kind.to_string())
            .bind(input.points)
            .bind(&input.explanation)
            .bind(question_id)
            .execute(&mut *tx)
            .await
            .context("Failed to update question")?;

        sqlx::query("DELETE FROM answers WHERE question_id = ?")
            .bind(question_id)
            .execute(&mut *tx)
            .await
            .context("Failed to clear answers")?;

        insert_answers(&mut tx, question_id, input).await?;
        tx.commit().await.context("Failed to commit question")?;

        get_question_by_id(self.db.pool(), question_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Question not found after update"))
    }

    async fn delete_question(&self, id: i64) -> Result<()> {
        sqlx::query("DELETE FROM questions WHERE id = ?")
            .bind(id)
            .execute(self.db.pool())
            .await
            .context("Failed to delete question")?;
        Ok(())
    }

    async fn create_attempt(
        &self,
        attempt: &QuizAttempt,
        max_attempts: Option<i64>,
    ) -> Result<Option<QuizAttempt>> {
        let results =
            serde_json::to_string(&attempt.results).context("Failed to encode attempt results")?;

        let result = sqlx::query(
            r#"
            INSERT INTO quiz_attempts (quiz_id, user_id, score_percent, points_earned,
                                       points_possible, passed, results, submitted_at)
            SELECT ?, ?, ?, ?, ?, ?, ?, ?
            WHERE ? IS NULL
               OR (SELECT COUNT(*) FROM quiz_attempts WHERE quiz_id = ? AND user_id = ?) < ?
            "#,
        )
        .bind(attempt.quiz_id)
        .bind(attempt.user_id)
        .bind(attempt.score_percent)
        .bind(attempt.points_earned)
        .bind(attempt.points_possible)
        .bind(attempt.passed)
        .bind(results)
        .bind(attempt.submitted_at)
        .bind(max_attempts)
        .bind(attempt.quiz_id)
        .bind(attempt.user_id)
        .bind(max_attempts)
        .execute(self.db.pool())
        .await
        .context("Failed to store quiz attempt")?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }
        Ok(Some(QuizAttempt {
            id: result.last_insert_rowid(),
            ..attempt.clone()
        }))
    }

    async fn list_attempts(&self, quiz_id: i64, user_id: i64) -> Result<Vec<QuizAttempt>> {
        let rows = sqlx::query(
            r#"
            SELECT id, quiz_id, user_id, score_percent, points_earned, points_possible, passed,
                   results, submitted_at
            FROM quiz_attempts
            WHERE quiz_id = ? AND user_id = ?
            ORDER BY submitted_at DESC, id DESC
            "#,
        )
        .bind(quiz_id)
        .bind(user_id)
        .fetch_all(self.db.pool())
        .await
        .context("Failed to list quiz attempts")?;

        rows.iter().map(row_to_attempt).collect()
    }
}

const QUIZ_COLUMNS: &str = "id, course_id, section_id, title, description, passing_score, max_attempts, sort_order, created_at, updated_at";

async fn get_quiz_by_id(pool: &SqlitePool, id: i64) -> Result<Option<Quiz>> {
    let sql = format!("SELECT {} FROM quizzes WHERE id = ?", QUIZ_COLUMNS);
    let row = sqlx::query(&sql)
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("Failed to get quiz by ID")?;
    Ok(row.as_ref().map(row_to_quiz))
}

async fn get_question_by_id(pool: &SqlitePool, id: i64) -> Result<Option<Question>> {
    let row = sqlx::query(
        "SELECT id, quiz_id, prompt, kind, points, explanation, sort_order FROM questions WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(pool)
    .await
    .context("Failed to get question by ID")?;

    let Some(row) = row else {
        return Ok(None);
    };
    let mut question = row_to_question(&row)?;

    let answers = sqlx::query(
        "SELECT id, question_id, text, is_correct, sort_order FROM answers WHERE question_id = ? ORDER BY sort_order, id",
    )
    .bind(id)
    .fetch_all(pool)
    .await
    .context("Failed to load answers")?;
    question.answers = answers.iter().map(row_to_answer).collect();

    Ok(Some(question))
}

async fn insert_answers(
    tx: &mut Transaction<'static, Sqlite>,
    question_id: i64,
    input: &QuestionInput,
) -> Result<()> {
    for (index, answer) in input.answers.iter().enumerate() {
        sqlx::query(
            "INSERT INTO answers (question_id, text, is_correct, sort_order) VALUES (?, ?, ?, ?)",
        )
        .bind(question_id)
        .bind(&answer.text)
        .bind(answer.is_correct)
        .bind(index as i64)
        .execute(&mut **tx)
        .await
        .context("Failed to create answer")?;
    }
    Ok(())
}

fn row_to_quiz(row: &SqliteRow) -> Quiz {
    Quiz {
        id: row.get("id"),
        course_id: row.get("course_id"),
        section_id: row.get("section_id"),
        title: row.get("title"),
        description: row.get("description"),
        passing_score: row.get("passing_score"),
        max_attempts: row.get("max_attempts"),
        sort_order: row.get("sort_order"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

fn row_to_question(row: &SqliteRow) -> Result<Question> {
    let kind: String = row.get("kind");
    Ok(Question {
        id: row.get("id"),
        quiz_id: row.get("quiz_id"),
        prompt: row.get("prompt"),
        kind: QuestionKind::from_str(&kind)?,
        points: row.get("points"),
        explanation: row.get("explanation"),
        sort_order: row.get("sort_order"),
        answers: Vec::new(),
    })
}

fn row_to_answer(row: &SqliteRow) -> Answer {
    Answer {
        id: row.get("id"),
        question_id: row.get("question_id"),
        text: row.get("text"),
        is_correct: row.get("is_correct"),
        sort_order: row.get("sort_order"),
    }
}

fn row_to_attempt(row: &SqliteRow) -> Result<QuizAttempt> {
    let results: String = row.get("results");
    let results: Vec<QuestionResult> =
        serde_json::from_str(&results).context("Invalid attempt results in database")?;

    Ok(QuizAttempt {
        id: row.get("id"),
        quiz_id: row.get("quiz_id"),
        user_id: row.get("user_id"),
        score_percent: row.get("score_percent"),
        points_earned: row.get("points_earned"),
        points_possible: row.get("points_possible"),
        passed: row.get("passed"),
        results,
        submitted_at: row.get("submitted_at"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repositories::test_support::*;
    use crate::models::{AnswerInput, UserRole};

    async fn setup() -> (Database, SqlxQuizRepository, Quiz) {
        let db = setup_db().await;
        let instructor = insert_user(&db, "teach", UserRole::Instructor).await;
        let course_id = insert_course(&db, instructor, "rust", 0).await;
        let section_id = insert_section(&db, course_id, 0).await;
        let repo = SqlxQuizRepository::new(db.clone());

        let now = Utc::now();
        let quiz = repo
            .create_quiz(&Quiz {
                id: 0,
                course_id,
                section_id,
                title: "Checkpoint".to_string(),
                description: None,
                passing_score: 70,
                max_attempts: Some(2),
                sort_order: 0,
                created_at: now,
                updated_at: now,
            })
            .await
            .unwrap();
        (db, repo, quiz)
    }

    fn question(prompt: &str, correct: usize) -> QuestionInput {
        QuestionInput {
            prompt: prompt.to_string(),
            kind: QuestionKind::SingleChoice,
            points: 2,
            explanation: None,
            answers: (0..3)
                .map(|i| AnswerInput {
                    text: format!("option {}", i),
                    is_correct: i == correct,
                })
                .collect(),
        }
    }

    #[tokio::test]
    async fn test_questions_and_detail() {
        let (_db, repo, quiz) = setup().await;

        let q1 = repo.add_question(quiz.id, &question("first", 0)).await.unwrap();
        let q2 = repo.add_question(quiz.id, &question("second", 2)).await.unwrap();
        assert_eq!(q1.sort_order, 0);
        assert_eq!(q2.sort_order, 1);
        assert_eq!(q1.answers.len(), 3);

        let detail = repo.get_detail(quiz.id).await.unwrap().unwrap();
        assert_eq!(detail.questions.len(), 2);
        assert_eq!(detail.questions[0].prompt, "first");
        assert!(detail.questions[1].answers[2].is_correct);
        assert_eq!(detail.total_points(), 4);
    }

    #[tokio::test]
    async fn test_replace_question_swaps_answers() {
        let (_db, repo, quiz) = setup().await;
        let q = repo.add_question(quiz.id, &question("first", 0)).await.unwrap();
        let old_ids: Vec<i64> = q.answers.iter().map(|a| a.id).collect();

        let mut input = question("rewritten", 1);
        input.answers.truncate(2);
        let replaced = repo.replace_question(q.id, &input).await.unwrap();

        assert_eq!(replaced.prompt, "rewritten");
        assert_eq!(replaced.answers.len(), 2);
        assert!(replaced.answers[1].is_correct);
        assert!(replaced.answers.iter().all(|a| !old_ids.contains(&a.id)));
    }

    #[tokio::test]
    async fn test_attempts_round_trip() {
        let (db, repo, quiz) = setup().await;
        let student = insert_user(&db, "stu", UserRole::Student).await;

        let attempt = QuizAttempt {
            id: 0,
            quiz_id: quiz.id,
            user_id: student,
            score_percent: 50.0,
            points_earned: 1,
            points_possible: 2,
            passed: false,
            results: vec![QuestionResult {
                question_id: 1,
                correct: false,
                points_awarded: 0,
                selected_answer_ids: vec![2],
                correct_answer_ids: vec![1],
            }],
            submitted_at: Utc::now(),
        };
        let stored = repo.create_attempt(&attempt, None).await.unwrap().unwrap();
        assert!(stored.id > 0);

        assert_eq!(repo.list_attempts(quiz.id, student).await.unwrap().len(), 1);
        let attempts = repo.list_attempts(quiz.id, student).await.unwrap();
        assert_eq!(attempts.len(), 1);
        assert_eq!(attempts[0].results, attempt.results);
    }

    #[tokio::test]
    async fn test_create_attempt_respects_limit() {
        let (db, repo, quiz) = setup().await;
        let student = insert_user(&db, "stu", UserRole::Student).await;
        let other = insert_user(&db, "other", UserRole::Student).await;

        let attempt = |user_id| QuizAttempt {
            id: 0,
            quiz_id: quiz.id,
            user_id,
            score_percent: 0.0,
            points_earned: 0,
            points_possible: 1,
            passed: false,
            results: Vec::new(),
            submitted_at: Utc::now(),
        };

        assert!(repo.create_attempt(&attempt(student), Some(2)).await.unwrap().is_some());
        assert!(repo.create_attempt(&attempt(student), Some(2)).await.unwrap().is_some());
        assert!(repo.create_attempt(&attempt(student), Some(2)).await.unwrap().is_none());
        assert_eq!(repo.list_attempts(quiz.id, student).await.unwrap().len(), 2);

        // The limit is per user
        assert!(repo.create_attempt(&attempt(other), Some(2)).await.unwrap().is_some());
        assert!(repo.create_attempt(&attempt(other), Some(0)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_quiz_removes_questions() {
        let (_db, repo, quiz) = setup().await;
        let q = repo.add_question(quiz.id, &question("first", 0)).await.unwrap();

        repo.delete_quiz(quiz.id).await.unwrap();
        assert!(repo.get_quiz(quiz.id).await.unwrap().is_none());
        assert!(repo.get_question(q.id).await.unwrap().is_none());
    }
}
