//! Course service
//!
//! Course authoring (courses, sections, lessons), the public catalog and
//! lesson access rules.
//!
//! Every change to a course's content recomputes the affected section stats
//! and the course totals, then drops the course's cached outline and all
//! cached catalog pages. Removing content also reruns the progress rollup
//! of the course's enrollments.

use crate::cache::{keys, Cache, CacheLayer};
use crate::db::repositories::{
    CourseRepository, EnrollmentRepository, QuizRepository, SectionRepository, UserRepository,
};
use crate::models::{
    Course, CourseFilter, CourseOutline, CourseStatus, CreateCourseInput, CreateLessonInput,
    CreateSectionInput, Lesson, ListParams, PagedResult, ReorderItem, Section, SectionOutline,
    UpdateCourseInput, UpdateLessonInput, UpdateSectionInput, User, MAX_PRICE_CENTS,
};
use crate::services::enrollment::EnrollmentService;
use crate::services::markdown::{estimate_reading_minutes, MarkdownRenderer};
use crate::services::slug::{generate_slug, is_valid_slug};
use anyhow::Context;
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

const MAX_TITLE_LENGTH: usize = 200;

/// Error types for course service operations
#[derive(Debug, thiserror::Error)]
pub enum CourseServiceError {
    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Internal error: {0}")]
    InternalError(#[from] anyhow::Error),
}

pub struct CourseService {
    course_repo: Arc<dyn CourseRepository>,
    section_repo: Arc<dyn SectionRepository>,
    quiz_repo: Arc<dyn QuizRepository>,
    user_repo: Arc<dyn UserRepository>,
    enrollment_repo: Arc<dyn EnrollmentRepository>,
    enrollments: Arc<EnrollmentService>,
    cache: Arc<Cache>,
    markdown: MarkdownRenderer,
    currency: String,
}

impl CourseService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        course_repo: Arc<dyn CourseRepository>,
        section_repo: Arc<dyn SectionRepository>,
        quiz_repo: Arc<dyn QuizRepository>,
        user_repo: Arc<dyn UserRepository>,
        enrollment_repo: Arc<dyn EnrollmentRepository>,
        enrollments: Arc<EnrollmentService>,
        cache: Arc<Cache>,
        currency: impl Into<String>,
    ) -> Self {
        Self {
            course_repo,
            section_repo,
            quiz_repo,
            user_repo,
            enrollment_repo,
            enrollments,
            cache,
            markdown: MarkdownRenderer::new(),
            currency: currency.into(),
        }
    }

    // ========================================================================
    // Courses
    // ========================================================================

    pub async fn create_course(
        &self,
        actor: &User,
        input: CreateCourseInput,
    ) -> Result<Course, CourseServiceError> {
        if !actor.is_instructor() {
            return Err(CourseServiceError::PermissionDenied(
                "Only instructors can create courses".to_string(),
            ));
        }
        let title = validate_title(&input.title)?;
        let price_cents = validate_price(input.price_cents.unwrap_or(0))?;

        let slug = match input.slug.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            Some(slug) => self.check_explicit_slug(slug, None).await?,
            None => self.unique_slug(&title, None).await?,
        };

        let mut course = Course::new(actor.id, slug, title, self.currency.clone());
        course.subtitle = non_empty(input.subtitle);
        course.description = input.description.unwrap_or_default();
        if let Some(category) = non_empty(input.category) {
            course.category = category.to_lowercase();
        }
        if let Some(level) = input.level {
            course.level = level;
        }
        course.price_cents = price_cents;
        course.thumbnail_url = non_empty(input.thumbnail_url);

        let course = self
            .course_repo
            .create(&course)
            .await
            .context("Failed to create course")?;
        tracing::info!(course_id = course.id, slug = %course.slug, "Course created");
        Ok(course)
    }

    pub async fn update_course(
        &self,
        actor: &User,
        course_id: i64,
        input: UpdateCourseInput,
    ) -> Result<Course, CourseServiceError> {
        let mut course = self.owned_course(actor, course_id).await?;
        let old_slug = course.slug.clone();

        if let Some(title) = input.title {
            course.title = validate_title(&title)?;
        }
        if let Some(slug) = input.slug {
            course.slug = self.check_explicit_slug(slug.trim(), Some(course.id)).await?;
        }
        if let Some(subtitle) = input.subtitle {
            course.subtitle = non_empty(Some(subtitle));
        }
        if let Some(description) = input.description {
            course.description = description;
        }
        if let Some(category) = non_empty(input.category) {
            course.category = category.to_lowercase();
        }
        if let Some(level) = input.level {
            course.level = level;
        }
        if let Some(price) = input.price_cents {
            course.price_cents = validate_price(price)?;
        }
        if let Some(url) = input.thumbnail_url {
            course.thumbnail_url = non_empty(Some(url));
        }
        course.updated_at = Utc::now();

        let course = self
            .course_repo
            .update(&course)
            .await
            .context("Failed to update course")?;

        if old_slug != course.slug {
            self.cache_delete(&keys::course_outline(&old_slug)).await;
        }
        self.invalidate(&course).await;
        Ok(course)
    }

    /// Delete a course. Courses that anyone enrolled in or paid for are kept.
    pub async fn delete_course(&self, actor: &User, course_id: i64) -> Result<(), CourseServiceError> {
        let course = self.owned_course(actor, course_id).await?;

        if self
            .course_repo
            .has_purchases(course.id)
            .await
            .context("Failed to check enrollments")?
        {
            return Err(CourseServiceError::Conflict(
                "Course has enrollments or payments; archive it instead".to_string(),
            ));
        }

        self.course_repo
            .delete(course.id)
            .await
            .context("Failed to delete course")?;
        self.invalidate(&course).await;
        tracing::info!(course_id, "Course deleted");
        Ok(())
    }

    /// Publish a course. A course needs at least one lesson to be published.
    pub async fn publish_course(&self, actor: &User, course_id: i64) -> Result<Course, CourseServiceError> {
        let course = self.owned_course(actor, course_id).await?;

        if course.total_lessons == 0 {
            return Err(CourseServiceError::ValidationError(
                "A course needs at least one lesson before it can be published".to_string(),
            ));
        }

        let published_at = course.published_at.unwrap_or_else(Utc::now);
        let course = self
            .course_repo
            .set_status(course.id, CourseStatus::Published, Some(published_at))
            .await
            .context("Failed to publish course")?;
        self.invalidate(&course).await;
        tracing::info!(course_id, "Course published");
        Ok(course)
    }

    /// Take a course off the catalog. Enrolled students keep access.
    pub async fn unpublish_course(&self, actor: &User, course_id: i64) -> Result<Course, CourseServiceError> {
        let course = self.owned_course(actor, course_id).await?;
        let course = self
            .course_repo
            .set_status(course.id, CourseStatus::Archived, course.published_at)
            .await
            .context("Failed to archive course")?;
        self.invalidate(&course).await;
        Ok(course)
    }

    pub async fn get_course(&self, course_id: i64) -> Result<Course, CourseServiceError> {
        self.course_repo
            .get_by_id(course_id)
            .await
            .context("Failed to get course")?
            .ok_or(CourseServiceError::NotFound("Course"))
    }

    /// Load a course the actor may edit: its instructor, or any admin
    pub async fn owned_course(&self, actor: &User, course_id: i64) -> Result<Course, CourseServiceError> {
        let course = self.get_course(course_id).await?;
        if !actor.can_manage(course.instructor_id) {
            return Err(CourseServiceError::PermissionDenied(
                "You do not own this course".to_string(),
            ));
        }
        Ok(course)
    }

    pub async fn list_instructor_courses(&self, instructor_id: i64) -> Result<Vec<Course>, CourseServiceError> {
        Ok(self
            .course_repo
            .list_by_instructor(instructor_id)
            .await
            .context("Failed to list instructor courses")?)
    }

    pub async fn count_by_status(&self) -> Result<Vec<(CourseStatus, i64)>, CourseServiceError> {
        Ok(self
            .course_repo
            .count_by_status()
            .await
            .context("Failed to count courses")?)
    }

    /// Full outline for the course editor, any status, nothing stripped
    pub async fn editor_outline(&self, actor: &User, course_id: i64) -> Result<CourseOutline, CourseServiceError> {
        let course = self.owned_course(actor, course_id).await?;
        self.build_outline(course).await
    }

    // ========================================================================
    // Public catalog
    // ========================================================================

    pub async fn list_catalog(
        &self,
        filter: &CourseFilter,
        params: &ListParams,
    ) -> Result<PagedResult<Course>, CourseServiceError> {
        let fingerprint = serde_json::to_string(&(filter, params)).context("Failed to build cache key")?;
        let key = keys::catalog_page(&fingerprint);

        match self.cache.get::<PagedResult<Course>>(&key).await {
            Ok(Some(page)) => return Ok(page),
            Ok(None) => {}
            Err(e) => tracing::warn!("Catalog cache read failed: {}", e),
        }

        let (courses, total) = self
            .course_repo
            .list_published(filter, params)
            .await
            .context("Failed to list courses")?;
        let page = PagedResult::new(courses, total, params);

        if let Err(e) = self.cache.set(&key, &page, self.cache.default_ttl()).await {
            tracing::warn!("Catalog cache write failed: {}", e);
        }
        Ok(page)
    }

    /// Public outline of a published course. Only preview lessons keep
    /// their content.
    pub async fn get_outline(&self, slug: &str) -> Result<CourseOutline, CourseServiceError> {
        let key = keys::course_outline(slug);
        match self.cache.get::<CourseOutline>(&key).await {
            Ok(Some(outline)) => return Ok(outline),
            Ok(None) => {}
            Err(e) => tracing::warn!("Outline cache read failed: {}", e),
        }

        let course = self
            .course_repo
            .get_by_slug(slug)
            .await
            .context("Failed to get course")?
            .filter(Course::is_published)
            .ok_or(CourseServiceError::NotFound("Course"))?;

        let outline = self.build_outline(course).await?.strip_locked_content();

        if let Err(e) = self.cache.set(&key, &outline, self.cache.default_ttl()).await {
            tracing::warn!("Outline cache write failed: {}", e);
        }
        Ok(outline)
    }

    /// A lesson with its content, for viewers allowed to read it: the
    /// course's instructor or an admin, a student with a live enrollment,
    /// or anyone for a preview lesson of a published course.
    pub async fn get_lesson(&self, lesson_id: i64, viewer: Option<&User>) -> Result<Lesson, CourseServiceError> {
        let lesson = self.find_lesson(lesson_id).await?;
        let course = self.get_course(lesson.course_id).await?;

        if viewer.is_some_and(|v| v.can_manage(course.instructor_id)) {
            return Ok(lesson);
        }

        if let Some(viewer) = viewer {
            let enrollment = self
                .enrollment_repo
                .get(viewer.id, course.id)
                .await
                .context("Failed to check enrollment")?;
            if let Some(enrollment) = enrollment.filter(|e| e.has_access()) {
                self.enrollment_repo
                    .touch(enrollment.id)
                    .await
                    .context("Failed to update last access")?;
                return Ok(lesson);
            }
        }

        if lesson.is_preview && course.is_published() {
            return Ok(lesson);
        }

        Err(CourseServiceError::PermissionDenied(
            "Enroll in this course to view the lesson".to_string(),
        ))
    }

    // ========================================================================
    // Sections
    // ========================================================================

    pub async fn create_section(
        &self,
        actor: &User,
        course_id: i64,
        input: CreateSectionInput,
    ) -> Result<Section, CourseServiceError> {
        let course = self.owned_course(actor, course_id).await?;
        let title = validate_title(&input.title)?;

        let sort_order = match input.sort_order {
            Some(order) => order,
            None => self
                .section_repo
                .next_section_order(course.id)
                .await
                .context("Failed to get next section order")?,
        };

        let now = Utc::now();
        let section = self
            .section_repo
            .create_section(&Section {
                id: 0,
                course_id: course.id,
                title,
                description: non_empty(input.description),
                sort_order,
                lesson_count: 0,
                quiz_count: 0,
                duration_minutes: 0,
                created_at: now,
                updated_at: now,
            })
            .await
            .context("Failed to create section")?;

        self.refresh_stats(course.id, &[]).await?;
        Ok(section)
    }

    pub async fn update_section(
        &self,
        actor: &User,
        section_id: i64,
        input: UpdateSectionInput,
    ) -> Result<Section, CourseServiceError> {
        let (mut section, course) = self.owned_section(actor, section_id).await?;

        if let Some(title) = input.title {
            section.title = validate_title(&title)?;
        }
        if let Some(description) = input.description {
            section.description = non_empty(Some(description));
        }
        if let Some(order) = input.sort_order {
            section.sort_order = order;
        }
        section.updated_at = Utc::now();

        let section = self
            .section_repo
            .update_section(&section)
            .await
            .context("Failed to update section")?;
        self.invalidate(&course).await;
        Ok(section)
    }

    /// Delete a section together with its lessons and quizzes
    pub async fn delete_section(&self, actor: &User, section_id: i64) -> Result<Course, CourseServiceError> {
        let (section, course) = self.owned_section(actor, section_id).await?;
        self.section_repo
            .delete_section(section.id)
            .await
            .context("Failed to delete section")?;
        let course = self.refresh_stats(course.id, &[]).await?;
        self.refresh_enrollments(course.id).await?;
        Ok(course)
    }

    /// Apply new sort orders. Every id must be a section of the course.
    pub async fn reorder_sections(
        &self,
        actor: &User,
        course_id: i64,
        items: &[ReorderItem],
    ) -> Result<Vec<Section>, CourseServiceError> {
        let course = self.owned_course(actor, course_id).await?;
        let sections = self
            .section_repo
            .list_sections(course.id)
            .await
            .context("Failed to list sections")?;

        let known: HashSet<i64> = sections.iter().map(|s| s.id).collect();
        if let Some(item) = items.iter().find(|item| !known.contains(&item.id)) {
            return Err(CourseServiceError::ValidationError(format!(
                "Section {} does not belong to this course",
                item.id
            )));
        }

        self.section_repo
            .reorder_sections(course.id, items)
            .await
            .context("Failed to reorder sections")?;
        self.invalidate(&course).await;

        Ok(self
            .section_repo
            .list_sections(course.id)
            .await
            .context("Failed to list sections")?)
    }

    // ========================================================================
    // Lessons
    // ========================================================================

    pub async fn create_lesson(
        &self,
        actor: &User,
        section_id: i64,
        input: CreateLessonInput,
    ) -> Result<Lesson, CourseServiceError> {
        let (section, course) = self.owned_section(actor, section_id).await?;
        let title = validate_title(&input.title)?;
        let video_url = non_empty(input.video_url);
        // Text lessons without a duration get their reading time
        let duration_minutes = match validate_duration(input.duration_minutes)? {
            0 if video_url.is_none() && !input.content.trim().is_empty() => {
                estimate_reading_minutes(&input.content)
            }
            minutes => minutes,
        };

        let sort_order = match input.sort_order {
            Some(order) => order,
            None => self
                .section_repo
                .next_lesson_order(section.id)
                .await
                .context("Failed to get next lesson order")?,
        };

        let now = Utc::now();
        let content_html = self.markdown.render(&input.content);
        let lesson = self
            .section_repo
            .create_lesson(&Lesson {
                id: 0,
                section_id: section.id,
                course_id: course.id,
                title,
                content: input.content,
                content_html,
                video_url,
                duration_minutes,
                sort_order,
                is_preview: input.is_preview,
                created_at: now,
                updated_at: now,
            })
            .await
            .context("Failed to create lesson")?;

        self.refresh_stats(course.id, &[section.id]).await?;
        Ok(lesson)
    }

    pub async fn update_lesson(
        &self,
        actor: &User,
        lesson_id: i64,
        input: UpdateLessonInput,
    ) -> Result<Lesson, CourseServiceError> {
        let mut lesson = self.find_lesson(lesson_id).await?;
        let course = self.owned_course(actor, lesson.course_id).await?;
        let old_section = lesson.section_id;

        if let Some(section_id) = input.section_id {
            let target = self.find_section(section_id).await?;
            if target.course_id != course.id {
                return Err(CourseServiceError::ValidationError(
                    "Lessons can only move between sections of the same course".to_string(),
                ));
            }
            lesson.section_id = target.id;
        }
        if let Some(title) = input.title {
            lesson.title = validate_title(&title)?;
        }
        if let Some(content) = input.content {
            lesson.content_html = self.markdown.render(&content);
            lesson.content = content;
        }
        if let Some(url) = input.video_url {
            lesson.video_url = non_empty(Some(url));
        }
        if let Some(duration) = input.duration_minutes {
            lesson.duration_minutes = validate_duration(duration)?;
        }
        if let Some(order) = input.sort_order {
            lesson.sort_order = order;
        }
        if let Some(is_preview) = input.is_preview {
            lesson.is_preview = is_preview;
        }
        lesson.updated_at = Utc::now();

        let lesson = self
            .section_repo
            .update_lesson(&lesson)
            .await
            .context("Failed to update lesson")?;

        let mut touched = vec![old_section];
        if lesson.section_id != old_section {
            touched.push(lesson.section_id);
        }
        self.refresh_stats(course.id, &touched).await?;
        Ok(lesson)
    }

    pub async fn delete_lesson(&self, actor: &User, lesson_id: i64) -> Result<Course, CourseServiceError> {
        let lesson = self.find_lesson(lesson_id).await?;
        let course = self.owned_course(actor, lesson.course_id).await?;
        self.section_repo
            .delete_lesson(lesson.id)
            .await
            .context("Failed to delete lesson")?;
        let course = self.refresh_stats(course.id, &[lesson.section_id]).await?;
        self.refresh_enrollments(course.id).await?;
        Ok(course)
    }

    /// Progress rollup for the course's enrollments after content was removed
    async fn refresh_enrollments(&self, course_id: i64) -> Result<(), CourseServiceError> {
        let completed = self
            .enrollments
            .refresh_course_progress(course_id)
            .await
            .context("Failed to refresh enrollment progress")?;
        if completed > 0 {
            tracing::debug!(course_id, completed, "Enrollments completed by content removal");
        }
        Ok(())
    }

    // ========================================================================
    // Shared with the quiz service
    // ========================================================================

    /// Load a section and its course, checking the actor may edit it
    pub async fn owned_section(&self, actor: &User, section_id: i64) -> Result<(Section, Course), CourseServiceError> {
        let section = self.find_section(section_id).await?;
        let course = self.owned_course(actor, section.course_id).await?;
        Ok((section, course))
    }

    /// Recompute stats for the given sections and the course totals, then
    /// drop cached views of the course.
    pub async fn refresh_stats(&self, course_id: i64, section_ids: &[i64]) -> Result<Course, CourseServiceError> {
        let course = self
            .course_repo
            .recompute_stats(course_id, section_ids)
            .await
            .context("Failed to recompute course stats")?;
        self.invalidate(&course).await;
        Ok(course)
    }

    /// Drop cached views of a course and every catalog page
    pub async fn invalidate(&self, course: &Course) {
        self.cache_delete(&keys::course_outline(&course.slug)).await;
        if let Err(e) = self.cache.delete_pattern(keys::CATALOG_PATTERN).await {
            tracing::warn!("Failed to invalidate catalog cache: {}", e);
        }
    }

    async fn cache_delete(&self, key: &str) {
        if let Err(e) = self.cache.delete(key).await {
            tracing::warn!(key, "Failed to invalidate cache entry: {}", e);
        }
    }

    async fn find_section(&self, section_id: i64) -> Result<Section, CourseServiceError> {
        self.section_repo
            .get_section(section_id)
            .await
            .context("Failed to get section")?
            .ok_or(CourseServiceError::NotFound("Section"))
    }

    async fn find_lesson(&self, lesson_id: i64) -> Result<Lesson, CourseServiceError> {
        self.section_repo
            .get_lesson(lesson_id)
            .await
            .context("Failed to get lesson")?
            .ok_or(CourseServiceError::NotFound("Lesson"))
    }

    async fn build_outline(&self, course: Course) -> Result<CourseOutline, CourseServiceError> {
        let sections = self
            .section_repo
            .list_sections(course.id)
            .await
            .context("Failed to list sections")?;
        let lessons = self
            .section_repo
            .list_lessons(course.id)
            .await
            .context("Failed to list lessons")?;
        let quizzes = self
            .quiz_repo
            .list_quizzes(course.id)
            .await
            .context("Failed to list quizzes")?;

        let instructor_name = self
            .user_repo
            .get_by_id(course.instructor_id)
            .await
            .context("Failed to get instructor")?
            .map(|u| u.public_name().to_string())
            .unwrap_or_default();

        let mut lessons_by_section: HashMap<i64, Vec<Lesson>> = HashMap::new();
        for lesson in lessons {
            lessons_by_section.entry(lesson.section_id).or_default().push(lesson);
        }
        let mut quizzes_by_section: HashMap<i64, Vec<_>> = HashMap::new();
        for quiz in quizzes {
            quizzes_by_section.entry(quiz.section_id).or_default().push(quiz);
        }

        let sections = sections
            .into_iter()
            .map(|section| SectionOutline {
                lessons: lessons_by_section.remove(&section.id).unwrap_or_default(),
                quizzes: quizzes_by_section.remove(&section.id).unwrap_or_default(),
                section,
            })
            .collect();

        Ok(CourseOutline {
            course,
            instructor_name,
            sections,
        })
    }

    async fn check_explicit_slug(&self, slug: &str, exclude_id: Option<i64>) -> Result<String, CourseServiceError> {
        if !is_valid_slug(slug) {
            return Err(CourseServiceError::ValidationError(
                "Slug may only contain lowercase letters, digits and single hyphens".to_string(),
            ));
        }
        if self
            .course_repo
            .slug_exists(slug, exclude_id)
            .await
            .context("Failed to check slug")?
        {
            return Err(CourseServiceError::Conflict(format!("Slug '{}' is already in use", slug)));
        }
        Ok(slug.to_string())
    }

    /// Slug derived from the title, with `-2`, `-3`, ... appended on clashes
    async fn unique_slug(&self, title: &str, exclude_id: Option<i64>) -> Result<String, CourseServiceError> {
        let mut base = generate_slug(title);
        if base.is_empty() {
            base = "course".to_string();
        }

        let mut candidate = base.clone();
        let mut n = 2;
        while self
            .course_repo
            .slug_exists(&candidate, exclude_id)
            .await
            .context("Failed to check slug")?
        {
            candidate = format!("{}-{}", base, n);
            n += 1;
        }
        Ok(candidate)
    }
}

fn validate_title(title: &str) -> Result<String, CourseServiceError> {
    let title = title.trim();
    if title.is_empty() {
        return Err(CourseServiceError::ValidationError("Title is required".to_string()));
    }
    if title.chars().count() > MAX_TITLE_LENGTH {
        return Err(CourseServiceError::ValidationError(format!(
            "Title must be at most {} characters",
            MAX_TITLE_LENGTH
        )));
    }
    Ok(title.to_string())
}

fn validate_price(price_cents: i64) -> Result<i64, CourseServiceError> {
    if price_cents < 0 {
        return Err(CourseServiceError::ValidationError(
            "Price cannot be negative".to_string(),
        ));
    }
    if price_cents > MAX_PRICE_CENTS {
        return Err(CourseServiceError::ValidationError(format!(
            "Price cannot exceed {} cents",
            MAX_PRICE_CENTS
        )));
    }
    Ok(price_cents)
}

fn validate_duration(minutes: i64) -> Result<i64, CourseServiceError> {
    if minutes < 0 {
        return Err(CourseServiceError::ValidationError(
            "Duration cannot be negative".to_string(),
        ));
    }
    Ok(minutes)
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
