//! Certificate service
//!
//! Template management and certificate issuance.
//!
//! Template elements may contain `{{ placeholder }}` expressions, rendered
//! with tera against the issuing context. A template is only stored if every
//! element renders against sample data, so issuance never meets an unknown
//! placeholder.

use crate::db::repositories::{
    CertificateRepository, CourseRepository, EnrollmentRepository, UserRepository,
};
use crate::models::{
    Certificate, CertificateTemplate, CertificateVerification, CreateTemplateInput,
    EnrollmentStatus, NewNotification, NotificationKind, TemplateLayout, UpdateTemplateInput,
    User,
};
use crate::services::notification::NotificationService;
use anyhow::Context as _;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tera::{Context, Tera};
use uuid::Uuid;

const MAX_CANVAS_SIZE: u32 = 10_000;

#[derive(Debug, thiserror::Error)]
pub enum CertificateServiceError {
    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Enrollment is not completed")]
    NotCompleted,

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Internal error: {0}")]
    InternalError(#[from] anyhow::Error),
}

/// Values available to template placeholders
#[derive(Debug, Clone)]
pub struct CertificateContext {
    pub student_name: String,
    pub course_title: String,
    pub instructor_name: String,
    pub completed_at: DateTime<Utc>,
    pub certificate_number: String,
    pub issued_at: DateTime<Utc>,
}

impl CertificateContext {
    /// Stand-in values used to check templates before saving
    pub fn sample() -> Self {
        let now = Utc::now();
        Self {
            student_name: "Ada Lovelace".to_string(),
            course_title: "Sample Course".to_string(),
            instructor_name: "Grace Hopper".to_string(),
            completed_at: now,
            certificate_number: generate_certificate_number(now),
            issued_at: now,
        }
    }

    fn to_tera(&self) -> Context {
        let mut ctx = Context::new();
        ctx.insert("student_name", &self.student_name);
        ctx.insert("course_title", &self.course_title);
        ctx.insert("instructor_name", &self.instructor_name);
        ctx.insert("completion_date", &self.completed_at.format("%Y-%m-%d").to_string());
        ctx.insert("certificate_number", &self.certificate_number);
        ctx.insert("issued_at", &self.issued_at.format("%Y-%m-%d %H:%M UTC").to_string());
        ctx
    }
}

/// Fill in every placeholder of a layout
pub fn render_layout(
    layout: &TemplateLayout,
    context: &CertificateContext,
) -> Result<TemplateLayout, tera::Error> {
    let ctx = context.to_tera();
    let mut rendered = layout.clone();
    for element in &mut rendered.elements {
        element.content = Tera::one_off(&element.content, &ctx, false)?;
    }
    Ok(rendered)
}

/// `CERT-YYYYMMDD-XXXXXXXX` with eight uppercase hex characters
pub fn generate_certificate_number(issued_at: DateTime<Utc>) -> String {
    let random = Uuid::new_v4().simple().to_string();
    format!(
        "CERT-{}-{}",
        issued_at.format("%Y%m%d"),
        random[..8].to_uppercase()
    )
}

/// Check canvas bounds and that every element renders with sample data
pub fn validate_layout(layout: &TemplateLayout) -> Result<(), CertificateServiceError> {
    if layout.width == 0 || layout.height == 0 {
        return Err(CertificateServiceError::ValidationError(
            "Canvas width and height must be positive".to_string(),
        ));
    }
    if layout.width > MAX_CANVAS_SIZE || layout.height > MAX_CANVAS_SIZE {
        return Err(CertificateServiceError::ValidationError(format!(
            "Canvas must be at most {}x{}",
            MAX_CANVAS_SIZE, MAX_CANVAS_SIZE
        )));
    }
    if layout.elements.is_empty() {
        return Err(CertificateServiceError::ValidationError(
            "Template needs at least one element".to_string(),
        ));
    }

    let sample = CertificateContext::sample().to_tera();
    for (i, element) in layout.elements.iter().enumerate() {
        if element.content.trim().is_empty() {
            return Err(CertificateServiceError::ValidationError(format!(
                "Element {} has no content",
                i + 1
            )));
        }
        if let Err(e) = Tera::one_off(&element.content, &sample, false) {
            return Err(CertificateServiceError::ValidationError(format!(
                "Element {} does not render: {}",
                i + 1,
                tera_message(&e)
            )));
        }
    }
    Ok(())
}

/// Innermost message of a tera error chain
fn tera_message(error: &tera::Error) -> String {
    let mut current: &dyn std::error::Error = error;
    while let Some(source) = current.source() {
        current = source;
    }
    current.to_string()
}

pub struct CertificateService {
    cert_repo: Arc<dyn CertificateRepository>,
    enrollment_repo: Arc<dyn EnrollmentRepository>,
    course_repo: Arc<dyn CourseRepository>,
    user_repo: Arc<dyn UserRepository>,
    notifications: Arc<NotificationService>,
}

impl CertificateService {
    pub fn new(
        cert_repo: Arc<dyn CertificateRepository>,
        enrollment_repo: Arc<dyn EnrollmentRepository>,
        course_repo: Arc<dyn CourseRepository>,
        user_repo: Arc<dyn UserRepository>,
        notifications: Arc<NotificationService>,
    ) -> Self {
        Self {
            cert_repo,
            enrollment_repo,
            course_repo,
            user_repo,
            notifications,
        }
    }

    // ========================================================================
    // Templates
    // ========================================================================

    pub async fn list_templates(&self) -> Result<Vec<CertificateTemplate>, CertificateServiceError> {
        Ok(self
            .cert_repo
            .list_templates()
            .await
            .context("Failed to list templates")?)
    }

    pub async fn get_template(&self, id: i64) -> Result<CertificateTemplate, CertificateServiceError> {
        self.cert_repo
            .get_template(id)
            .await
            .context("Failed to get template")?
            .ok_or(CertificateServiceError::NotFound("Template"))
    }

    pub async fn create_template(
        &self,
        created_by: i64,
        input: CreateTemplateInput,
    ) -> Result<CertificateTemplate, CertificateServiceError> {
        let name = validate_name(&input.name)?;
        validate_layout(&input.layout)?;

        let now = Utc::now();
        let template = self
            .cert_repo
            .create_template(&CertificateTemplate {
                id: 0,
                name,
                layout: input.layout,
                is_default: input.is_default,
                created_by: Some(created_by),
                created_at: now,
                updated_at: now,
            })
            .await
            .context("Failed to create template")?;
        Ok(template)
    }

    pub async fn update_template(
        &self,
        id: i64,
        input: UpdateTemplateInput,
    ) -> Result<CertificateTemplate, CertificateServiceError> {
        let mut template = self.get_template(id).await?;

        if let Some(name) = input.name {
            template.name = validate_name(&name)?;
        }
        if let Some(layout) = input.layout {
            validate_layout(&layout)?;
            template.layout = layout;
        }
        if let Some(is_default) = input.is_default {
            template.is_default = is_default;
        }
        template.updated_at = Utc::now();

        Ok(self
            .cert_repo
            .update_template(&template)
            .await
            .context("Failed to update template")?)
    }

    /// Issued certificates keep their rendered layout after the template
    /// is gone.
    pub async fn delete_template(&self, id: i64) -> Result<(), CertificateServiceError> {
        let template = self.get_template(id).await?;
        self.cert_repo
            .delete_template(template.id)
            .await
            .context("Failed to delete template")?;
        Ok(())
    }

    /// Render a template against sample data
    pub async fn preview_template(&self, id: i64) -> Result<TemplateLayout, CertificateServiceError> {
        let template = self.get_template(id).await?;
        render_layout(&template.layout, &CertificateContext::sample())
            .map_err(|e| CertificateServiceError::ValidationError(tera_message(&e)))
    }

    // ========================================================================
    // Certificates
    // ========================================================================

    /// Issue the certificate of a completed enrollment.
    ///
    /// Issuing twice returns the certificate issued the first time.
    pub async fn issue(&self, enrollment_id: i64) -> Result<Certificate, CertificateServiceError> {
        if let Some(existing) = self
            .cert_repo
            .get_by_enrollment(enrollment_id)
            .await
            .context("Failed to check existing certificate")?
        {
            return Ok(existing);
        }

        let enrollment = self
            .enrollment_repo
            .get_by_id(enrollment_id)
            .await
            .context("Failed to get enrollment")?
            .ok_or(CertificateServiceError::NotFound("Enrollment"))?;
        if enrollment.status != EnrollmentStatus::Completed {
            return Err(CertificateServiceError::NotCompleted);
        }

        let student = self.load_user(enrollment.user_id).await?;
        let course = self
            .course_repo
            .get_by_id(enrollment.course_id)
            .await
            .context("Failed to get course")?
            .ok_or(CertificateServiceError::NotFound("Course"))?;
        let instructor = self.load_user(course.instructor_id).await?;

        let template = self
            .cert_repo
            .get_default_template()
            .await
            .context("Failed to get default template")?;
        let (template_id, layout) = match template {
            Some(t) => (Some(t.id), t.layout),
            None => (None, TemplateLayout::builtin()),
        };

        let issued_at = Utc::now();
        let context = CertificateContext {
            student_name: student.public_name().to_string(),
            course_title: course.title.clone(),
            instructor_name: instructor.public_name().to_string(),
            completed_at: enrollment.completed_at.unwrap_or(issued_at),
            certificate_number: generate_certificate_number(issued_at),
            issued_at,
        };
        let rendered = render_layout(&layout, &context)
            .map_err(|e| anyhow::anyhow!("Failed to render certificate: {}", tera_message(&e)))?;

        let certificate = self
            .cert_repo
            .create(&Certificate {
                id: 0,
                certificate_number: context.certificate_number.clone(),
                enrollment_id,
                user_id: student.id,
                course_id: course.id,
                template_id,
                student_name: context.student_name,
                course_title: context.course_title,
                instructor_name: context.instructor_name,
                rendered,
                issued_at,
            })
            .await
            .context("Failed to store certificate")?;

        // A concurrent issuance may have won; only the winner notifies
        if certificate.certificate_number == context.certificate_number {
            tracing::info!(
                enrollment_id,
                number = %certificate.certificate_number,
                "Certificate issued"
            );
            self.notifications
                .notify(
                    NewNotification::new(
                        student.id,
                        NotificationKind::Certificate,
                        "Your certificate is ready",
                    )
                    .body(format!("You completed \"{}\".", course.title))
                    .link(format!("/certificates/{}", certificate.id)),
                )
                .await;
        }
        Ok(certificate)
    }

    pub async fn list_mine(&self, user_id: i64) -> Result<Vec<Certificate>, CertificateServiceError> {
        Ok(self
            .cert_repo
            .list_for_user(user_id)
            .await
            .context("Failed to list certificates")?)
    }

    /// A certificate, visible to its holder and to admins
    pub async fn get(&self, id: i64, viewer: &User) -> Result<Certificate, CertificateServiceError> {
        let certificate = self
            .cert_repo
            .get_by_id(id)
            .await
            .context("Failed to get certificate")?
            .ok_or(CertificateServiceError::NotFound("Certificate"))?;

        if certificate.user_id != viewer.id && !viewer.is_admin() {
            return Err(CertificateServiceError::PermissionDenied(
                "This certificate belongs to someone else".to_string(),
            ));
        }
        Ok(certificate)
    }

    pub async fn find_by_enrollment(&self, enrollment_id: i64) -> Result<Option<Certificate>, CertificateServiceError> {
        Ok(self
            .cert_repo
            .get_by_enrollment(enrollment_id)
            .await
            .context("Failed to get certificate")?)
    }

    /// Public lookup by certificate number
    pub async fn verify(&self, number: &str) -> Result<CertificateVerification, CertificateServiceError> {
        let certificate = self
            .cert_repo
            .get_by_number(number.trim())
            .await
            .context("Failed to look up certificate")?
            .ok_or(CertificateServiceError::NotFound("Certificate"))?;
        Ok(CertificateVerification::from(&certificate))
    }

    pub async fn count(&self) -> Result<i64, CertificateServiceError> {
        Ok(self.cert_repo.count().await.context("Failed to count certificates")?)
    }

    async fn load_user(&self, id: i64) -> Result<User, CertificateServiceError> {
        self.user_repo
            .get_by_id(id)
            .await
            .context("Failed to get user")?
            .ok_or(CertificateServiceError::NotFound("User"))
    }
}

fn validate_name(name: &str) -> Result<String, CertificateServiceError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(CertificateServiceError::ValidationError(
            "Template name is required".to_string(),
        ));
    }
    Ok(name.to_string())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::db::repositories::test_support::*;
    use crate::db::repositories::{
        SqlxCertificateRepository, SqlxCourseRepository, SqlxEnrollmentRepository,
        SqlxNotificationRepository, SqlxUserRepository,
    };
    use crate::db::Database;
    use crate::models::{ElementKind, TemplateElement, UserRole};
    use chrono::TimeZone;
    use proptest::prelude::*;

    pub(crate) fn certificate_service(db: &Database) -> CertificateService {
        CertificateService::new(
            SqlxCertificateRepository::boxed(db.clone()),
            SqlxEnrollmentRepository::boxed(db.clone()),
            SqlxCourseRepository::boxed(db.clone()),
            SqlxUserRepository::boxed(db.clone()),
            Arc::new(NotificationService::new(SqlxNotificationRepository::boxed(db.clone()))),
        )
    }

    fn layout(content: &str) -> TemplateLayout {
        TemplateLayout {
            width: 800,
            height: 600,
            background: None,
            elements: vec![TemplateElement {
                kind: ElementKind::Text,
                content: content.to_string(),
                x: 10,
                y: 20,
                font_size: None,
                color: None,
                align: None,
            }],
        }
    }

    async fn completed_enrollment(db: &Database) -> (i64, i64) {
        let instructor = insert_user(db, "prof", UserRole::Instructor).await;
        let student = insert_user(db, "student", UserRole::Student).await;
        let course = insert_course(db, instructor, "rust", 0).await;
        let enrollment = insert_enrollment(db, student, course).await;
        sqlx::query("UPDATE enrollments SET status = 'completed', completed_at = ? WHERE id = ?")
            .bind(Utc::now())
            .bind(enrollment)
            .execute(db.pool())
            .await
            .unwrap();
        (student, enrollment)
    }

    #[test]
    fn test_render_layout_fills_placeholders() {
        let context = CertificateContext {
            student_name: "Ferris".to_string(),
            course_title: "Rust".to_string(),
            instructor_name: "Teacher".to_string(),
            completed_at: "2026-03-04T10:00:00Z".parse().unwrap(),
            certificate_number: "CERT-20260304-ABCDEF12".to_string(),
            issued_at: "2026-03-05T11:30:00Z".parse().unwrap(),
        };
        let rendered = render_layout(
            &layout("{{ student_name }} finished {{ course_title }} on {{ completion_date }}"),
            &context,
        )
        .unwrap();
        assert_eq!(rendered.elements[0].content, "Ferris finished Rust on 2026-03-04");

        let builtin = render_layout(&TemplateLayout::builtin(), &context).unwrap();
        assert!(builtin.elements.iter().all(|e| !e.content.contains("{{")));
    }

    #[test]
    fn test_html_in_names_is_not_escaped() {
        let mut context = CertificateContext::sample();
        context.student_name = "O'Brien & <Sons>".to_string();
        let rendered = render_layout(&layout("{{ student_name }}"), &context).unwrap();
        assert_eq!(rendered.elements[0].content, "O'Brien & <Sons>");
    }

    #[test]
    fn test_every_listed_placeholder_renders() {
        for name in crate::models::PLACEHOLDERS {
            let text = format!("{{{{ {} }}}}", name);
            assert!(validate_layout(&layout(&text)).is_ok(), "{} should render", name);
        }
    }

    #[test]
    fn test_validate_layout() {
        assert!(validate_layout(&layout("Hello {{ student_name }}")).is_ok());
        assert!(validate_layout(&TemplateLayout::builtin()).is_ok());

        let unknown = validate_layout(&layout("{{ favourite_colour }}"));
        assert!(matches!(unknown, Err(CertificateServiceError::ValidationError(_))));

        let broken = validate_layout(&layout("{{ student_name"));
        assert!(matches!(broken, Err(CertificateServiceError::ValidationError(_))));

        let mut empty = layout("x");
        empty.elements.clear();
        assert!(validate_layout(&empty).is_err());

        let mut zero = layout("x");
        zero.width = 0;
        assert!(validate_layout(&zero).is_err());
    }

    proptest! {
        #[test]
        fn property_certificate_number_format(days in 0i64..20_000) {
            let date = Utc.timestamp_opt(days * 86_400, 0).unwrap();
            let number = generate_certificate_number(date);
            let parts: Vec<&str> = number.split('-').collect();

            prop_assert_eq!(parts.len(), 3);
            prop_assert_eq!(parts[0], "CERT");
            prop_assert_eq!(parts[1].to_string(), date.format("%Y%m%d").to_string());
            prop_assert_eq!(parts[2].len(), 8);
            prop_assert!(parts[2].chars().all(|c| c.is_ascii_digit() || c.is_ascii_uppercase()));
        }

        #[test]
        fn property_plain_text_renders_unchanged(text in "[a-zA-Z0-9 .,:!?]{1,60}") {
            let rendered = render_layout(&layout(&text), &CertificateContext::sample()).unwrap();
            prop_assert_eq!(&rendered.elements[0].content, &text);
        }
    }

    #[tokio::test]
    async fn test_issue_is_idempotent_and_uses_builtin_layout() {
        let db = setup_db().await;
        let service = certificate_service(&db);
        let (student, enrollment) = completed_enrollment(&db).await;

        let first = service.issue(enrollment).await.unwrap();
        let second = service.issue(enrollment).await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(first.certificate_number, second.certificate_number);
        assert_eq!(first.template_id, None);
        assert_eq!(first.student_name, "student");
        assert!(first.rendered.elements.iter().any(|e| e.content == "student"));

        let notifications: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM notifications WHERE user_id = ? AND kind = 'certificate'",
        )
        .bind(student)
        .fetch_one(db.pool())
        .await
        .unwrap();
        assert_eq!(notifications, 1);

        let verification = service.verify(&first.certificate_number).await.unwrap();
        assert_eq!(verification.course_title, first.course_title);
    }

    #[tokio::test]
    async fn test_issue_uses_default_template() {
        let db = setup_db().await;
        let service = certificate_service(&db);
        let (_student, enrollment) = completed_enrollment(&db).await;
        let admin = insert_user(&db, "admin", UserRole::Admin).await;

        let template = service
            .create_template(
                admin,
                CreateTemplateInput {
                    name: "Classic".to_string(),
                    layout: layout("Well done, {{ student_name }}!"),
                    is_default: true,
                },
            )
            .await
            .unwrap();

        let certificate = service.issue(enrollment).await.unwrap();
        assert_eq!(certificate.template_id, Some(template.id));
        assert_eq!(certificate.rendered.elements[0].content, "Well done, student!");
    }

    #[tokio::test]
    async fn test_issue_requires_completion() {
        let db = setup_db().await;
        let service = certificate_service(&db);
        let instructor = insert_user(&db, "prof", UserRole::Instructor).await;
        let student = insert_user(&db, "student", UserRole::Student).await;
        let course = insert_course(&db, instructor, "rust", 0).await;
        let enrollment = insert_enrollment(&db, student, course).await;

        assert!(matches!(
            service.issue(enrollment).await,
            Err(CertificateServiceError::NotCompleted)
        ));
        assert!(matches!(
            service.verify("CERT-00000000-NOPE0000").await,
            Err(CertificateServiceError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_template_validation_on_save() {
        let db = setup_db().await;
        let service = certificate_service(&db);
        let admin = insert_user(&db, "admin", UserRole::Admin).await;

        let result = service
            .create_template(
                admin,
                CreateTemplateInput {
                    name: "Broken".to_string(),
                    layout: layout("{{ nope }}"),
                    is_default: false,
                },
            )
            .await;
        assert!(matches!(result, Err(CertificateServiceError::ValidationError(_))));

        let template = service
            .create_template(
                admin,
                CreateTemplateInput {
                    name: "Plain".to_string(),
                    layout: layout("{{ course_title }}"),
                    is_default: false,
                },
            )
            .await
            .unwrap();
        let preview = service.preview_template(template.id).await.unwrap();
        assert_eq!(preview.elements[0].content, "Sample Course");

        let result = service
            .update_template(
                template.id,
                UpdateTemplateInput {
                    layout: Some(layout("{{ missing }}")),
                    ..Default::default()
                },
            )
            .await;
        assert!(matches!(result, Err(CertificateServiceError::ValidationError(_))));
    }
}
