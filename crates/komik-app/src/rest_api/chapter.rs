use axum::{
    extract::Path,
    response::IntoResponse,
    routing::{get, post, put},
    Json, Router,
};
use axum_valid::Garde;
use http::StatusCode;
use komik_dal::manga::{CreateChapter, MangaRepository};
use komik_types::claim::Role;

use crate::{auth::token::RequiredRolesLayer, error::ApiResult, state::AppState};

pub async fn list(
    Path(manga_id): Path<i64>,
    repository: MangaRepository,
) -> ApiResult<impl IntoResponse> {
    let chapters = repository.list_chapters(manga_id).await?;
    Ok((StatusCode::OK, Json(chapters)))
}

pub async fn create(
    Path(manga_id): Path<i64>,
    repository: MangaRepository,
    Garde(Json(payload)): Garde<Json<CreateChapter>>,
) -> ApiResult<impl IntoResponse> {
    let chapter = repository.create_chapter(manga_id, payload).await?;
    Ok((StatusCode::CREATED, Json(chapter)))
}

pub async fn update(
    Path((manga_id, chapter_id)): Path<(i64, i64)>,
    repository: MangaRepository,
    Garde(Json(payload)): Garde<Json<CreateChapter>>,
) -> ApiResult<impl IntoResponse> {
    let chapter = repository
        .update_chapter(manga_id, chapter_id, payload)
        .await?;
    Ok((StatusCode::OK, Json(chapter)))
}

pub async fn remove(
    Path((manga_id, chapter_id)): Path<(i64, i64)>,
    repository: MangaRepository,
) -> ApiResult<impl IntoResponse> {
    repository.delete_chapter(manga_id, chapter_id).await?;
    Ok((StatusCode::NO_CONTENT, ()))
}

pub fn router() -> Router<AppState> {
    let edit = Router::new()
        .route("/", post(create))
        .route("/{chapter_id}", put(update).delete(remove))
        .layer(RequiredRolesLayer::new([Role::Admin, Role::Translator]));

    Router::new().route("/", get(list)).merge(edit)
}
