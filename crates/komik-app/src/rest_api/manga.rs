use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    routing::{get, post, put},
    Json, Router,
};
use axum_client_ip::ClientIp;
use axum_valid::Garde;
use http::StatusCode;
use komik_dal::{
    manga::{CreateManga, MangaRepository},
    now_millis,
    rating::RatingRepository,
    view::ViewRepository,
};
use komik_types::claim::{ApiClaim, Role};
use tracing::debug;

use crate::{
    auth::token::{MaybeClaim, RequiredRolesLayer},
    error::{ApiError, ApiResult},
    rest_api::{chapter, Page, Paging},
    state::AppState,
};

crate::repository_from_request!(MangaRepository);
crate::repository_from_request!(RatingRepository);
crate::repository_from_request!(ViewRepository);

pub async fn list(
    State(state): State<AppState>,
    repository: MangaRepository,
    Garde(Query(paging)): Garde<Query<Paging>>,
) -> ApiResult<impl IntoResponse> {
    debug!("Paging: {:#?}", paging);
    let page_size = paging.page_size(state.config().default_page_size);
    let listing_params = paging.into_listing_params(state.config().default_page_size)?;
    let batch = repository.list(listing_params).await?;
    Ok((StatusCode::OK, Json(Page::from_batch(batch, page_size))))
}

pub async fn get_manga(
    Path(id): Path<i64>,
    repository: MangaRepository,
) -> ApiResult<impl IntoResponse> {
    let record = repository.get(id).await?;

    Ok((StatusCode::OK, Json(record)))
}

pub async fn create(
    claim: ApiClaim,
    repository: MangaRepository,
    Garde(Json(payload)): Garde<Json<CreateManga>>,
) -> ApiResult<impl IntoResponse> {
    let record = repository.create(payload, Some(claim.sub)).await?;

    Ok((StatusCode::CREATED, Json(record)))
}

pub async fn update(
    Path(id): Path<i64>,
    repository: MangaRepository,
    Garde(Json(payload)): Garde<Json<CreateManga>>,
) -> ApiResult<impl IntoResponse> {
    let record = repository.update(id, payload).await?;

    Ok((StatusCode::OK, Json(record)))
}

pub async fn delete_manga(
    Path(id): Path<i64>,
    repository: MangaRepository,
) -> ApiResult<impl IntoResponse> {
    repository.delete(id).await?;

    Ok((StatusCode::NO_CONTENT, ()))
}

#[derive(Debug, serde::Deserialize, garde::Validate)]
pub struct RatingPayload {
    #[garde(range(min = 1, max = 5))]
    pub stars: i64,
}

pub async fn submit_rating(
    claim: ApiClaim,
    Path(id): Path<i64>,
    repository: RatingRepository,
    Garde(Json(payload)): Garde<Json<RatingPayload>>,
) -> ApiResult<impl IntoResponse> {
    let user_id = claim.user_id().ok_or(ApiError::Unauthorized)?;
    let summary = repository.submit(id, user_id, payload.stars).await?;
    Ok(Json(summary))
}

pub async fn get_rating(
    MaybeClaim(claim): MaybeClaim,
    Path(id): Path<i64>,
    repository: RatingRepository,
) -> ApiResult<impl IntoResponse> {
    let user_id = claim.and_then(|c| c.user_id());
    let summary = repository.summary(id, user_id).await?;
    Ok(Json(summary))
}

/// Views are deduplicated per viewer identity. A logged-in user counts as one
/// viewer across devices; anonymous viewers are keyed by client address, which
/// conflates viewers behind shared addresses.
pub async fn record_view(
    MaybeClaim(claim): MaybeClaim,
    Path(id): Path<i64>,
    ClientIp(ip): ClientIp,
    repository: ViewRepository,
) -> ApiResult<impl IntoResponse> {
    let viewer_key = match claim {
        Some(claim) => claim.sub,
        None => ip.to_string(),
    };
    let outcome = repository.record(id, &viewer_key, now_millis()).await?;
    Ok(Json(outcome))
}

pub fn router() -> Router<AppState> {
    let edit = Router::new()
        .route("/", post(create))
        .route("/{id}", put(update).delete(delete_manga))
        .layer(RequiredRolesLayer::new([Role::Admin, Role::Translator]));

    Router::new()
        .route("/", get(list))
        .route("/{id}", get(get_manga))
        .route("/{id}/rating", get(get_rating).post(submit_rating))
        .route("/{id}/view", post(record_view))
        .nest("/{id}/chapters", chapter::router())
        .merge(edit)
}
