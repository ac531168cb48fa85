//! Entitlement query endpoints. Auth is optional: anonymous callers
//! still resolve free/published courses.

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;
use verba_types::access::AccessDecision;
use verba_types::course::Chapter;
use verba_types::{ChapterId, CourseId};

use crate::auth::optional_principal;
use crate::error::ApiError;
use crate::{unix_now, AppState};

pub async fn course_access(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(course_id): Path<CourseId>,
) -> Result<Json<AccessDecision>, ApiError> {
    let principal = optional_principal(&state, &headers).await?;
    let conn = state.db.lock().await;
    let decision = verba_entitlements::resolve_course_access(
        &conn,
        principal.as_ref(),
        course_id,
        unix_now(),
    )?;
    Ok(Json(decision))
}

pub async fn chapter_access(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(chapter_id): Path<ChapterId>,
) -> Result<Json<AccessDecision>, ApiError> {
    let principal = optional_principal(&state, &headers).await?;
    let conn = state.db.lock().await;
    let decision = verba_entitlements::resolve_chapter_access(
        &conn,
        principal.as_ref(),
        chapter_id,
        unix_now(),
    )?;
    Ok(Json(decision))
}

/// Chapter list trimmed to the caller's cap.
pub async fn course_chapters(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(course_id): Path<CourseId>,
) -> Result<Json<Vec<Chapter>>, ApiError> {
    let principal = optional_principal(&state, &headers).await?;
    let conn = state.db.lock().await;
    let chapters =
        verba_entitlements::filter_chapters(&conn, principal.as_ref(), course_id, unix_now())?;
    Ok(Json(chapters))
}
