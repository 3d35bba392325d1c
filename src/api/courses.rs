//! Public course catalog endpoints
//!
//! - GET /api/v1/courses - Published courses, filtered and paginated
//! - GET /api/v1/courses/{slug} - Course outline
//! - GET /api/v1/lessons/{id} - Lesson content (optional auth)

use axum::{
    extract::{Path, Query, State},
    routing::get,
    Router,
};
use serde::Deserialize;

use crate::api::common::{default_page, default_per_page};
use crate::api::middleware::{AppState, MaybeUser};
use crate::api::responses::{ApiResponse, ApiResult};
use crate::models::{
    Course, CourseFilter, CourseLevel, CourseOutline, Lesson, ListParams, PagedResult,
};

/// Catalog query: filters plus pagination
#[derive(Debug, Deserialize)]
pub struct CatalogQuery {
    pub category: Option<String>,
    pub level: Option<CourseLevel>,
    #[serde(alias = "q")]
    pub search: Option<String>,
    pub instructor_id: Option<i64>,
    #[serde(default = "default_page")]
    pub page: u32,
    #[serde(default = "default_per_page")]
    pub per_page: u32,
}

impl CatalogQuery {
    fn split(self) -> (CourseFilter, ListParams) {
        let filter = CourseFilter {
            category: self.category.filter(|c| !c.trim().is_empty()),
            level: self.level,
            search: self.search.filter(|s| !s.trim().is_empty()),
            instructor_id: self.instructor_id,
        };
        (filter, ListParams::new(self.page, self.per_page))
    }
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_courses))
        .route("/{course}", get(get_course))
}

/// Lesson routes, mounted behind `optional_auth`
pub fn lesson_router() -> Router<AppState> {
    Router::new().route("/{id}", get(get_lesson))
}

/// GET /api/v1/courses
async fn list_courses(
    State(state): State<AppState>,
    Query(query): Query<CatalogQuery>,
) -> ApiResult<PagedResult<Course>> {
    let (filter, params) = query.split();
    let page = state.course_service.list_catalog(&filter, &params).await?;
    Ok(ApiResponse::ok(page))
}

/// GET /api/v1/courses/{slug}
async fn get_course(
    State(state): State<AppState>,
    Path(slug): Path<String>,
) -> ApiResult<CourseOutline> {
    let outline = state.course_service.get_outline(&slug).await?;
    Ok(ApiResponse::ok(outline))
}

/// GET /api/v1/lessons/{id}
async fn get_lesson(
    State(state): State<AppState>,
    MaybeUser(viewer): MaybeUser,
    Path(id): Path<i64>,
) -> ApiResult<Lesson> {
    let lesson = state.course_service.get_lesson(id, viewer.as_ref()).await?;
    Ok(ApiResponse::ok(lesson))
}
