//! Certificate templates and issued certificates
//!
//! A template is a JSON-described visual layout. Text elements may contain
//! `{{ placeholder }}` expressions that are filled in when a certificate is
//! issued; the filled-in layout is stored with the certificate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Placeholders available to template elements
pub const PLACEHOLDERS: &[&str] = &[
    "student_name",
    "course_title",
    "instructor_name",
    "completion_date",
    "certificate_number",
    "issued_at",
];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CertificateTemplate {
    pub id: i64,
    pub name: String,
    pub layout: TemplateLayout,
    pub is_default: bool,
    pub created_by: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Canvas description of a certificate
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TemplateLayout {
    pub width: u32,
    pub height: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub background: Option<String>,
    #[serde(default)]
    pub elements: Vec<TemplateElement>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ElementKind {
    #[default]
    Text,
    /// `content` is an image URL
    Image,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TemplateElement {
    #[serde(default)]
    pub kind: ElementKind,
    pub content: String,
    pub x: i32,
    pub y: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub font_size: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub align: Option<String>,
}

impl TemplateElement {
    fn text(content: &str, y: i32, font_size: u32) -> Self {
        Self {
            kind: ElementKind::Text,
            content: content.to_string(),
            x: 600,
            y,
            font_size: Some(font_size),
            color: Some("#1f2937".to_string()),
            align: Some("center".to_string()),
        }
    }
}

impl TemplateLayout {
    /// Layout used when no template has been marked as default
    pub fn builtin() -> Self {
        Self {
            width: 1200,
            height: 850,
            background: None,
            elements: vec![
                TemplateElement::text("Certificate of Completion", 150, 48),
                TemplateElement::text("This certifies that", 260, 22),
                TemplateElement::text("{{ student_name }}", 340, 40),
                TemplateElement::text("has completed the course", 420, 22),
                TemplateElement::text("{{ course_title }}", 490, 34),
                TemplateElement::text("Instructor: {{ instructor_name }}", 620, 20),
                TemplateElement::text("Completed on {{ completion_date }}", 670, 18),
                TemplateElement::text("Certificate No. {{ certificate_number }}", 780, 14),
            ],
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateTemplateInput {
    pub name: String,
    pub layout: TemplateLayout,
    #[serde(default)]
    pub is_default: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateTemplateInput {
    pub name: Option<String>,
    pub layout: Option<TemplateLayout>,
    pub is_default: Option<bool>,
}

/// An issued certificate
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Certificate {
    pub id: i64,
    pub certificate_number: String,
    pub enrollment_id: i64,
    pub user_id: i64,
    pub course_id: i64,
    pub template_id: Option<i64>,
    pub student_name: String,
    pub course_title: String,
    pub instructor_name: String,
    /// Template layout with every placeholder filled in
    pub rendered: TemplateLayout,
    pub issued_at: DateTime<Utc>,
}

/// Public answer to a certificate-number lookup
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CertificateVerification {
    pub certificate_number: String,
    pub student_name: String,
    pub course_title: String,
    pub instructor_name: String,
    pub issued_at: DateTime<Utc>,
}

impl From<&Certificate> for CertificateVerification {
    fn from(cert: &Certificate) -> Self {
        Self {
            certificate_number: cert.certificate_number.clone(),
            student_name: cert.student_name.clone(),
            course_title: cert.course_title.clone(),
            instructor_name: cert.instructor_name.clone(),
            issued_at: cert.issued_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_parses_with_defaults() {
        let layout: TemplateLayout = serde_json::from_str(
            r#"{"width":800,"height":600,"elements":[{"content":"Hi {{ student_name }}","x":1,"y":2}]}"#,
        )
        .unwrap();

        assert_eq!(layout.elements.len(), 1);
        assert_eq!(layout.elements[0].kind, ElementKind::Text);
        assert!(layout.background.is_none());
    }

    #[test]
    fn test_builtin_layout_mentions_core_placeholders() {
        let layout = TemplateLayout::builtin();
        let all: String = layout.elements.iter().map(|e| e.content.as_str()).collect();
        for name in ["student_name", "course_title", "certificate_number"] {
            assert!(all.contains(name), "missing {}", name);
        }
    }
}
