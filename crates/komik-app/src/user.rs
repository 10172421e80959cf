use crate::{
    auth::token::RequiredRolesLayer,
    error::{ApiError, ApiResult},
    repository_from_request,
    state::AppState,
};
use axum::{
    extract::Path,
    response::IntoResponse,
    routing::{delete, get, post, put},
    Json, Router,
};
use axum_valid::Garde;
use http::StatusCode;
use komik_dal::{
    now_millis,
    user::{CreateUser, UserAccount, UserAccountRepository},
};
use komik_types::claim::{ApiClaim, Role};

repository_from_request!(UserAccountRepository);

/// Open registration. Roles can only be granted by an admin afterwards.
pub async fn register(
    user_registry: UserAccountRepository,
    Garde(Json(mut payload)): Garde<Json<CreateUser>>,
) -> ApiResult<impl IntoResponse> {
    payload.roles = None;
    let user = user_registry.create(payload).await?;

    Ok((StatusCode::CREATED, Json(user)))
}

#[derive(serde::Serialize)]
struct Profile {
    #[serde(flatten)]
    user: UserAccount,
    purchased_chapters: Vec<i64>,
}

async fn me(claim: ApiClaim, user_registry: UserAccountRepository) -> ApiResult<impl IntoResponse> {
    let user_id = claim.user_id().ok_or(ApiError::Unauthorized)?;
    let user = user_registry.get(user_id).await?;
    let mut purchased_chapters: Vec<i64> = user_registry
        .purchased_chapters(user_id)
        .await?
        .into_iter()
        .collect();
    purchased_chapters.sort_unstable();

    Ok(Json(Profile {
        user,
        purchased_chapters,
    }))
}

#[derive(Debug, serde::Deserialize, garde::Validate)]
pub struct ChangePassword {
    #[garde(skip)]
    pub old_password: Option<String>,
    #[garde(length(min = 8, max = 255))]
    pub new_password: String,
}

async fn change_password(
    claim: ApiClaim,
    user_registry: UserAccountRepository,
    Garde(Json(payload)): Garde<Json<ChangePassword>>,
) -> ApiResult<impl IntoResponse> {
    let user_id = claim.user_id().ok_or(ApiError::Unauthorized)?;
    user_registry
        .change_password(
            user_id,
            payload.old_password.as_deref(),
            &payload.new_password,
        )
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_users(user_registry: UserAccountRepository) -> ApiResult<impl IntoResponse> {
    let users = user_registry.list(100).await?;
    Ok((StatusCode::OK, Json(users)))
}

async fn delete_user(
    Path(id): Path<i64>,
    user_registry: UserAccountRepository,
) -> ApiResult<impl IntoResponse> {
    user_registry.delete(id).await?;

    Ok((StatusCode::NO_CONTENT, ()))
}

#[derive(Debug, serde::Deserialize, garde::Validate)]
pub struct SetRoles {
    #[garde(skip)]
    pub roles: Vec<String>,
}

async fn set_roles(
    Path(id): Path<i64>,
    user_registry: UserAccountRepository,
    Garde(Json(payload)): Garde<Json<SetRoles>>,
) -> ApiResult<impl IntoResponse> {
    let roles = payload
        .roles
        .iter()
        .map(|r| r.parse::<Role>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| ApiError::UnprocessableRequest(e.to_string()))?;
    let user = user_registry.set_roles(id, roles).await?;
    Ok(Json(user))
}

#[derive(Debug, serde::Deserialize, garde::Validate)]
pub struct MembershipGrant {
    /// Membership end as epoch millis; absent means permanent.
    #[garde(skip)]
    pub end: Option<i64>,
}

async fn grant_membership(
    Path(id): Path<i64>,
    user_registry: UserAccountRepository,
    Garde(Json(payload)): Garde<Json<MembershipGrant>>,
) -> ApiResult<impl IntoResponse> {
    let user = user_registry
        .grant_membership(id, now_millis(), payload.end)
        .await?;
    Ok(Json(user))
}

async fn revoke_membership(
    Path(id): Path<i64>,
    user_registry: UserAccountRepository,
) -> ApiResult<impl IntoResponse> {
    let user = user_registry.revoke_membership(id).await?;
    Ok(Json(user))
}

#[derive(Debug, serde::Deserialize, garde::Validate)]
pub struct CoinAdjustment {
    /// Positive tops up, negative deducts; balance can never go below zero.
    #[garde(skip)]
    pub delta: i64,
}

#[derive(Debug, serde::Serialize)]
struct CoinBalance {
    coins: i64,
}

async fn adjust_coins(
    Path(id): Path<i64>,
    user_registry: UserAccountRepository,
    Garde(Json(payload)): Garde<Json<CoinAdjustment>>,
) -> ApiResult<impl IntoResponse> {
    let coins = user_registry.adjust_coins(id, payload.delta).await?;
    Ok(Json(CoinBalance { coins }))
}

pub fn users_router() -> Router<AppState> {
    let admin = Router::new()
        .route("/", get(list_users))
        .route("/{id}", delete(delete_user))
        .route("/{id}/roles", put(set_roles))
        .route(
            "/{id}/membership",
            put(grant_membership).delete(revoke_membership),
        )
        .route("/{id}/coins", put(adjust_coins))
        .layer(RequiredRolesLayer::new([Role::Admin]));

    Router::new()
        .route("/", post(register))
        .route("/me", get(me))
        .route("/me/password", post(change_password))
        .merge(admin)
}
