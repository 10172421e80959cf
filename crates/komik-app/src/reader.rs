use std::collections::HashSet;

use axum::{
    extract::Path,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use komik_dal::{
    entitlement::{evaluate, Access},
    manga::{Chapter, MangaRepository},
    now_millis,
    user::UserAccountRepository,
};
use komik_types::claim::ApiClaim;

use crate::{
    auth::token::MaybeClaim,
    error::{ApiError, ApiResult},
    state::AppState,
};

#[derive(Debug, serde::Serialize)]
struct ChapterPages {
    id: i64,
    manga_id: i64,
    chapter_number: f64,
    title: Option<String>,
    pages_en: Vec<String>,
    pages_mm: Vec<String>,
}

impl From<Chapter> for ChapterPages {
    fn from(chapter: Chapter) -> Self {
        Self {
            id: chapter.id,
            manga_id: chapter.manga_id,
            chapter_number: chapter.chapter_number,
            title: chapter.title,
            pages_en: chapter.pages_en,
            pages_mm: chapter.pages_mm,
        }
    }
}

/// Hands out chapter pages only after the entitlement check. Account state is
/// read fresh from the database, so an expired membership or a revoked role is
/// effective immediately, regardless of what the token still claims.
pub async fn read_chapter(
    MaybeClaim(claim): MaybeClaim,
    Path(chapter_id): Path<i64>,
    manga_repository: MangaRepository,
    user_registry: UserAccountRepository,
) -> ApiResult<impl IntoResponse> {
    let chapter = manga_repository.get_chapter(chapter_id).await?;

    let (user, purchased) = match claim.and_then(|c| c.user_id()) {
        Some(user_id) => {
            let user = user_registry.get(user_id).await?;
            let purchased = user_registry.purchased_chapters(user_id).await?;
            (Some(user), purchased)
        }
        None => (None, HashSet::new()),
    };

    match evaluate(user.as_ref(), &purchased, &chapter, now_millis()) {
        Access::Granted => Ok(Json(ChapterPages::from(chapter))),
        Access::Denied(reason) => Err(ApiError::AccessDenied(reason)),
    }
}

pub async fn purchase_chapter(
    claim: ApiClaim,
    Path(chapter_id): Path<i64>,
    user_registry: UserAccountRepository,
) -> ApiResult<impl IntoResponse> {
    let user_id = claim.user_id().ok_or(ApiError::Unauthorized)?;
    let purchase = user_registry.purchase_chapter(user_id, chapter_id).await?;
    Ok(Json(purchase))
}

pub fn reader_router() -> Router<AppState> {
    Router::new()
        .route("/{id}", get(read_chapter))
        .route("/{id}/purchase", post(purchase_chapter))
}
