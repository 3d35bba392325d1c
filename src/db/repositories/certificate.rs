//! Certificate repository
//!
//! Certificate templates and issued certificates. Layouts are stored as
//! JSON text.

use crate::db::Database;
use crate::models::{Certificate, CertificateTemplate, TemplateLayout};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};
use std::sync::Arc;

#[async_trait]
pub trait CertificateRepository: Send + Sync {
    /// Store a template; marking it default clears the previous default
    async fn create_template(&self, template: &CertificateTemplate) -> Result<CertificateTemplate>;

    async fn get_template(&self, id: i64) -> Result<Option<CertificateTemplate>>;

    async fn get_default_template(&self) -> Result<Option<CertificateTemplate>>;

    async fn list_templates(&self) -> Result<Vec<CertificateTemplate>>;

    async fn update_template(&self, template: &CertificateTemplate) -> Result<CertificateTemplate>;

    async fn delete_template(&self, id: i64) -> Result<()>;

    /// Insert a certificate. Returns the existing one when the enrollment
    /// already has a certificate.
    async fn create(&self, certificate: &Certificate) -> Result<Certificate>;

    async fn get_by_id(&self, id: i64) -> Result<Option<Certificate>>;

    async fn get_by_number(&self, number: &str) -> Result<Option<Certificate>>;

    async fn get_by_enrollment(&self, enrollment_id: i64) -> Result<Option<Certificate>>;

    async fn list_for_user(&self, user_id: i64) -> Result<Vec<Certificate>>;

    async fn count(&self) -> Result<i64>;
}

pub struct SqlxCertificateRepository {
    db: Database,
}

impl SqlxCertificateRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn boxed(db: Database) -> Arc<dyn CertificateRepository> {
        Arc::new(Self::new(db))
    }
}

#[async_trait]
impl CertificateRepository for SqlxCertificateRepository {
    async fn create_template(&self, template: &CertificateTemplate) -> Result<CertificateTemplate> {
        let layout = serde_json::to_string(&template.layout).context("Failed to encode layout")?;
        let now = Utc::now();
        let mut tx = self.db.begin().await?;

        if template.is_default {
            clear_default(&mut tx).await?;
        }

        let id = sqlx::query(
            r#"
            INSERT INTO certificate_templates (name, layout, is_default, created_by, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&template.name)
        .bind(layout)
        .bind(template.is_default)
        .bind(template.created_by)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await
        .context("Failed to create certificate template")?
        .last_insert_rowid();

        tx.commit().await.context("Failed to commit template")?;

        get_template_by_id(self.db.pool(), id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Template not found after insert"))
    }

    async fn get_template(&self, id: i64) -> Result<Option<CertificateTemplate>> {
        get_template_by_id(self.db.pool(), id).await
    }

    async fn get_default_template(&self) -> Result<Option<CertificateTemplate>> {
        let sql = format!(
            "SELECT {} FROM certificate_templates WHERE is_default = 1 ORDER BY id DESC LIMIT 1",
            TEMPLATE_COLUMNS
        );
        let row = sqlx::query(&sql)
            .fetch_optional(self.db.pool())
            .await
            .context("Failed to get default template")?;
        row.map(|r| row_to_template(&r)).transpose()
    }

    async fn list_templates(&self) -> Result<Vec<CertificateTemplate>> {
        let sql = format!(
            "SELECT {} FROM certificate_templates ORDER BY is_default DESC, name, id",
            TEMPLATE_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .fetch_all(self.db.pool())
            .await
            .context("Failed to list templates")?;
        rows.iter().map(row_to_template).collect()
    }

    async fn update_template(&self, template: &CertificateTemplate) -> Result<CertificateTemplate> {
        let layout = serde_json::to_string(&template.layout).context("Failed to encode layout")?;
        let mut tx = self.db.begin().await?;

        if template.is_default {
            clear_default(&mut tx).await?;
        }

        sqlx::query(
            "UPDATE certificate_templates SET name = ?, layout = ?, is_default = ?, updated_at = ? WHERE id = ?",
        )
        .bind(&template.name)
        .bind(layout)
        .bind(template.is_default)
        .bind(Utc::now())
        .bind(template.id)
        .execute(&mut *tx)
        .await
        .context("Failed to update template")?;

        tx.commit().await.context("Failed to commit template")?;

        get_template_by_id(self.db.pool(), template.id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Template not found after update"))
    }

    async fn delete_template(&self, id: i64) -> Result<()> {
        sqlx::query("DELETE FROM certificate_templates WHERE id = ?")
            .bind(id)
            .execute(self.db.pool())
            .await
            .context("Failed to delete template")?;
        Ok(())
    }

    async fn create(&self, certificate: &Certificate) -> Result<Certificate> {
        let rendered =
            serde_json::to_string(&certificate.rendered).context("Failed to encode certificate")?;

        sqlx::query(
            r#"
            INSERT INTO certificates (certificate_number, enrollment_id, user_id, course_id,
                                      template_id, student_name, course_title, instructor_name,
                                      rendered, issued_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (enrollment_id) DO NOTHING
            "#,
        )
        .bind(&certificate.certificate_number)
        .bind(certificate.enrollment_id)
        .bind(certificate.user_id)
        .bind(certificate.course_id)
        .bind(certificate.template_id)
        .bind(&certificate.student_name)
        .bind(&certificate.course_title)
        .bind(&certificate.instructor_name)
        .bind(rendered)
        .bind(certificate.issued_at)
        .execute(self.db.pool())
        .await
        .context("Failed to create certificate")?;

        get_certificate_by(self.db.pool(), "enrollment_id = ?", certificate.enrollment_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Certificate not found after insert"))
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<Certificate>> {
        get_certificate_by(self.db.pool(), "id = ?", id).await
    }

    async fn get_by_number(&self, number: &str) -> Result<Option<Certificate>> {
        let sql = format!(
            "SELECT {} FROM certificates WHERE certificate_number = ?",
            CERTIFICATE_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(number)
            .fetch_optional(self.db.pool())
            .await
            .context("Failed to get certificate by number")?;
        row.map(|r| row_to_certificate(&r)).transpose()
    }

    async fn get_by_enrollment(&self, enrollment_id: i64) -> Result<Option<Certificate>> {
        get_certificate_by(self.db.pool(), "enrollment_id = ?", enrollment_id).await
    }

    async fn list_for_user(&self, user_id: i64) -> Result<Vec<Certificate>> {
        let sql = format!(
            "SELECT {} FROM certificates WHERE user_id = ? ORDER BY issued_at DESC, id DESC",
            CERTIFICATE_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(user_id)
            .fetch_all(self.db.pool())
            .await
            .context("Failed to list certificates")?;
        rows.iter().map(row_to_certificate).collect()
    }

    async fn count(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM certificates")
            .fetch_one(self.db.pool())
            .await
            .context("Failed to count certificates")?;
        Ok(count)
    }
}

const TEMPLATE_COLUMNS: &str = "id, name, layout, is_default, created_by, created_at, updated_at";

const CERTIFICATE_COLUMNS: &str = "id, certificate_number, enrollment_id, user_id, course_id, template_id, student_name, course_title, instructor_name, rendered, issued_at";

async fn clear_default(conn: &mut SqliteConnection) -> Result<()> {
    sqlx::query("UPDATE certificate_templates SET is_default = 0 WHERE is_default = 1")
        .execute(conn)
        .await
        .context("Failed to clear default template")?;
    Ok(())
}

async fn get_template_by_id(pool: &SqlitePool, id: i64) -> Result<Option<CertificateTemplate>> {
    let sql = format!("SELECT {} FROM certificate_templates WHERE id = ?", TEMPLATE_COLUMNS);
    let row = sqlx::query(&sql)
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("Failed to get template by ID")?;
    row.map(|r| row_to_template(&r)).transpose()
}

async fn get_certificate_by(pool: &SqlitePool, condition: &str, value: i64) -> Result<Option<Certificate>> {
    let sql = format!("SELECT {} FROM certificates WHERE {}", CERTIFICATE_COLUMNS, condition);
    let row = sqlx::query(&sql)
        .bind(value)
        .fetch_optional(pool)
        .await
        .context("Failed to get certificate")?;
    row.map(|r| row_to_certificate(&r)).transpose()
}

fn row_to_template(row: &SqliteRow) -> Result<CertificateTemplate> {
    let layout: String = row.get("layout");
    let layout: TemplateLayout =
        serde_json::from_str(&layout).context("Invalid template layout in database")?;

    Ok(CertificateTemplate {
        id: row.get("id"),
        name: row.get("name"),
        layout,
        is_default: row.get("is_default"),
        created_by: row.get("created_by"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn row_to_certificate(row: &SqliteRow) -> Result<Certificate> {
    let rendered: String = row.get("rendered");
    let rendered: TemplateLayout =
        serde_json::from_str(&rendered).context("Invalid rendered certificate in database")?;

    Ok(Certificate {
        id: row.get("id"),
        certificate_number: row.get("certificate_number"),
        enrollment_id: row.get("enrollment_id"),
        user_id: row.get("user_id"),
        course_id: row.get("course_id"),
        template_id: row.get("template_id"),
        student_name: row.get("student_name"),
        course_title: row.get("course_title"),
        instructor_name: row.get("instructor_name"),
        rendered,
        issued_at: row.get("issued_at"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repositories::test_support::*;
    use crate::models::UserRole;

    fn template(name: &str, is_default: bool) -> CertificateTemplate {
        let now = Utc::now();
        CertificateTemplate {
            id: 0,
            name: name.to_string(),
            layout: TemplateLayout::builtin(),
            is_default,
            created_by: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn test_single_default_template() {
        let repo = SqlxCertificateRepository::new(setup_db().await);
        assert!(repo.get_default_template().await.unwrap().is_none());

        let first = repo.create_template(&template("Classic", true)).await.unwrap();
        let second = repo.create_template(&template("Modern", true)).await.unwrap();

        let default = repo.get_default_template().await.unwrap().unwrap();
        assert_eq!(default.id, second.id);
        assert!(!repo.get_template(first.id).await.unwrap().unwrap().is_default);

        let mut first = repo.get_template(first.id).await.unwrap().unwrap();
        first.is_default = true;
        repo.update_template(&first).await.unwrap();
        assert_eq!(repo.get_default_template().await.unwrap().unwrap().id, first.id);
        assert_eq!(repo.list_templates().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_certificate_is_unique_per_enrollment() {
        let db = setup_db().await;
        let instructor = insert_user(&db, "teach", UserRole::Instructor).await;
        let student = insert_user(&db, "stu", UserRole::Student).await;
        let course_id = insert_course(&db, instructor, "rust", 0).await;
        let enrollment_id = insert_enrollment(&db, student, course_id).await;
        let repo = SqlxCertificateRepository::new(db);

        let cert = Certificate {
            id: 0,
            certificate_number: "CERT-20240101-AAAAAAAA".to_string(),
            enrollment_id,
            user_id: student,
            course_id,
            template_id: None,
            student_name: "stu".to_string(),
            course_title: "Rust".to_string(),
            instructor_name: "teach".to_string(),
            rendered: TemplateLayout::builtin(),
            issued_at: Utc::now(),
        };
        let first = repo.create(&cert).await.unwrap();

        let mut again = cert.clone();
        again.certificate_number = "CERT-20240101-BBBBBBBB".to_string();
        let second = repo.create(&again).await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.certificate_number, "CERT-20240101-AAAAAAAA");
        assert!(repo.get_by_number("CERT-20240101-AAAAAAAA").await.unwrap().is_some());
        assert_eq!(repo.list_for_user(student).await.unwrap().len(), 1);
        assert_eq!(repo.count().await.unwrap(), 1);
    }
}
