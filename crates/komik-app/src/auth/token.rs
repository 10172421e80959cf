use std::{
    sync::Arc,
    task::{Context, Poll},
};

use axum::{
    body::Body,
    extract::FromRequestParts,
    response::{IntoResponse, Response},
};
use futures::future::BoxFuture;
use http::{request::Parts, HeaderMap, Request, StatusCode};
use komik_types::claim::{ApiClaim, Authorization as _, Role};
use tower::{Layer, Service};
use tracing::{debug, error};

use super::TOKEN_COOKIE_NAME;
use crate::state::AppState;

/// Token is taken from Authorization bearer header, with the login cookie as
/// a fallback for browser clients.
pub fn token_from_headers(headers: &HeaderMap) -> Option<String> {
    if let Some(auth) = headers
        .get(http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
    {
        if let Some(token) = auth.strip_prefix("Bearer ") {
            return Some(token.trim().to_string());
        }
    }

    headers
        .get_all(http::header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| cookie::Cookie::split_parse(v.to_string()))
        .filter_map(|c| c.ok())
        .find(|c| c.name() == TOKEN_COOKIE_NAME)
        .map(|c| c.value().to_string())
}

impl FromRequestParts<AppState> for ApiClaim {
    type Rejection = StatusCode;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        // TokenLayer already validated the token on covered routes
        if let Some(claim) = parts.extensions.get::<ApiClaim>() {
            return Ok(claim.clone());
        }

        match token_from_headers(&parts.headers) {
            Some(token) => {
                let claim = state.tokens().validate::<ApiClaim>(&token).map_err(|e| {
                    error!("Failed to validate token: {}", e);
                    StatusCode::UNAUTHORIZED
                })?;
                Ok(claim)
            }
            None => {
                debug!("No token found");
                Err(StatusCode::UNAUTHORIZED)
            }
        }
    }
}

/// Optional variant of the claim extractor - anonymous requests pass through
/// with `None` instead of being rejected.
pub struct MaybeClaim(pub Option<ApiClaim>);

impl FromRequestParts<AppState> for MaybeClaim {
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let claim = ApiClaim::from_request_parts(parts, state).await.ok();
        Ok(MaybeClaim(claim))
    }
}

/// Validates the token, if present, and stores the claim in request
/// extensions. Does not reject anything itself - that is left to extractors
/// and [`RequiredRolesLayer`] on the routes that need it.
#[derive(Clone)]
pub struct TokenLayer {
    state: AppState,
}

impl TokenLayer {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }
}

impl<S> Layer<S> for TokenLayer {
    type Service = TokenMiddleware<S>;

    fn layer(&self, inner: S) -> Self::Service {
        TokenMiddleware {
            inner,
            state: self.state.clone(),
        }
    }
}

#[derive(Clone)]
pub struct TokenMiddleware<S> {
    inner: S,
    state: AppState,
}

impl<S> Service<Request<Body>> for TokenMiddleware<S>
where
    S: Service<Request<Body>>,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = S::Future;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<Body>) -> Self::Future {
        if let Some(token) = token_from_headers(req.headers()) {
            match self.state.tokens().validate::<ApiClaim>(&token) {
                Ok(claim) => {
                    req.extensions_mut().insert(claim);
                }
                Err(e) => debug!("Invalid token: {e}"),
            }
        }
        self.inner.call(req)
    }
}

/// Rejects requests whose claim carries none of the given roles. Must run
/// below [`TokenLayer`] (or the claim extractor), as it only inspects request
/// extensions. Missing claim is 401, missing role is 403.
#[derive(Clone)]
pub struct RequiredRolesLayer {
    roles: Arc<Vec<Role>>,
}

impl RequiredRolesLayer {
    pub fn new(roles: impl IntoIterator<Item = Role>) -> Self {
        Self {
            roles: Arc::new(roles.into_iter().collect()),
        }
    }
}

impl<S> Layer<S> for RequiredRolesLayer {
    type Service = RequiredRoles<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RequiredRoles {
            inner,
            roles: self.roles.clone(),
        }
    }
}

#[derive(Clone)]
pub struct RequiredRoles<S> {
    inner: S,
    roles: Arc<Vec<Role>>,
}

impl<S> Service<Request<Body>> for RequiredRoles<S>
where
    S: Service<Request<Body>, Response = Response> + Clone + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Response, S::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let roles = self.roles.clone();
        let claim = req.extensions().get::<ApiClaim>().cloned();
        let clone = self.inner.clone();
        // the original service is the one that was polled ready
        let mut inner = std::mem::replace(&mut self.inner, clone);

        Box::pin(async move {
            let rejection = match claim {
                None => {
                    debug!("Missing claim for protected route");
                    Some(StatusCode::UNAUTHORIZED)
                }
                Some(claim) if !claim.has_any_role(roles.as_slice()) => {
                    debug!("Claim for {} lacks required role", claim.sub);
                    Some(StatusCode::FORBIDDEN)
                }
                Some(_) => None,
            };

            match rejection {
                Some(status) => Ok(status.into_response()),
                None => inner.call(req).await,
            }
        })
    }
}
