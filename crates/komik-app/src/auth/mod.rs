use crate::state::AppState;
use axum::{
    extract::{FromRequest as _, State},
    response::IntoResponse,
    routing::{get, post},
    Form, Json,
};
use cookie::{Cookie, Expiration, SameSite};
use http::StatusCode;
use komik_dal::user::UserAccountRepository;
use komik_types::claim::{ApiClaim, Role};
use time::OffsetDateTime;
use tower_cookies::Cookies;
use tracing::{debug, error};

const TOKEN_COOKIE_NAME: &str = "komik_token";

pub mod token;

#[derive(serde::Deserialize)]
struct LoginCredentials {
    email: String,
    password: String,
}

#[derive(serde::Serialize)]
struct LoginResponse {
    access_token: String,
    user: komik_dal::user::UserAccount,
}

pub async fn login(
    state: State<AppState>,
    user_registry: UserAccountRepository,
    cookies: Cookies,
    request: axum::extract::Request,
) -> Result<impl IntoResponse, StatusCode> {
    let content_type = request
        .headers()
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .ok_or(StatusCode::BAD_REQUEST)?;
    let credentials = if content_type == "application/json" {
        let Json(data) = Json::<LoginCredentials>::from_request(request, &())
            .await
            .map_err(|e| {
                error!("Failed to get login credentials: {e}");
                StatusCode::BAD_REQUEST
            })?;
        data
    } else if content_type == "application/x-www-form-urlencoded" {
        let Form(data) = Form::<LoginCredentials>::from_request(request, &())
            .await
            .map_err(|e| {
                error!("Failed to get login credentials: {e}");
                StatusCode::BAD_REQUEST
            })?;
        data
    } else {
        return Err(StatusCode::BAD_REQUEST);
    };

    let user = user_registry
        .check_password(&credentials.email, &credentials.password)
        .await
        .map_err(|e| {
            debug!("User check error: {e}");
            StatusCode::UNAUTHORIZED
        })?;

    let roles = user
        .roles
        .iter()
        .flatten()
        .filter_map(|r| r.parse::<Role>().ok());
    let claim = ApiClaim::new_expired(user.id.to_string(), roles);
    let signed_token = state.tokens().issue(claim).map_err(|e| {
        error!("Failed to issue token: {e}");
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    let cookie = Cookie::build((TOKEN_COOKIE_NAME, signed_token.clone()))
        .http_only(true)
        .secure(true)
        .path("/")
        .same_site(SameSite::Lax)
        .expires(Expiration::DateTime(
            OffsetDateTime::now_utc() + state.tokens().default_validity(),
        ));
    cookies.add(cookie.into());

    Ok(Json(LoginResponse {
        access_token: signed_token,
        user,
    }))
}

pub async fn logout(cookies: Cookies) -> impl IntoResponse {
    let mut cookie = tower_cookies::Cookie::new(TOKEN_COOKIE_NAME, "");
    cookie.set_path("/");
    cookies.remove(cookie);
    StatusCode::NO_CONTENT
}

/// Builds authentication router - must be nested on /auth path!
pub fn auth_router() -> axum::Router<AppState> {
    axum::Router::new()
        .route("/login", post(login))
        .route("/logout", get(logout))
}
