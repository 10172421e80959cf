use axum::{response::IntoResponse, Json};
use http::StatusCode;
use komik_dal::entitlement::DenyReason;
use serde_json::json;
use tracing::{debug, error};

pub type Error = anyhow::Error;
pub type Result<T, E = Error> = std::result::Result<T, E>;

pub type ApiResult<T> = std::result::Result<T, ApiError>;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Unprocessable request: {0}")]
    UnprocessableRequest(String),

    #[error("Resource not found: {0}")]
    ResourceNotFound(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Access denied")]
    AccessDenied(DenyReason),

    #[error(transparent)]
    DalError(#[from] komik_dal::Error),

    #[error(transparent)]
    StoreError(#[from] crate::store::error::StoreError),

    #[error(transparent)]
    PathRejection(#[from] axum::extract::rejection::PathRejection),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        use komik_dal::Error as DalError;

        match self {
            ApiError::InvalidRequest(_) | ApiError::InvalidQuery(_) => StatusCode::BAD_REQUEST,
            ApiError::UnprocessableRequest(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::ResourceNotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::AccessDenied(reason) => match reason {
                DenyReason::LoginRequired => StatusCode::UNAUTHORIZED,
                _ => StatusCode::FORBIDDEN,
            },
            ApiError::DalError(e) => match e {
                DalError::RecordNotFound(_) => StatusCode::NOT_FOUND,
                DalError::InvalidCredentials => StatusCode::UNAUTHORIZED,
                DalError::InvalidRating(_)
                | DalError::MissingVersion
                | DalError::NoPages
                | DalError::InvalidOrderByField(_) => StatusCode::BAD_REQUEST,
                DalError::InsufficientCoins { .. }
                | DalError::NotPurchasable
                | DalError::FailedUpdate { .. } => StatusCode::CONFLICT,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ApiError::StoreError(e) => {
                use crate::store::error::StoreError;
                match e {
                    StoreError::InvalidPath => StatusCode::BAD_REQUEST,
                    StoreError::NotFound(_) => StatusCode::NOT_FOUND,
                    StoreError::PathConflict => StatusCode::CONFLICT,
                    _ => StatusCode::INTERNAL_SERVER_ERROR,
                }
            }
            ApiError::PathRejection(_) => StatusCode::BAD_REQUEST,
            ApiError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status();
        if status.is_server_error() {
            error!("Server error: {self}");
        } else {
            debug!("Client error: {self}");
        }
        let body = match &self {
            // the denial reason tells the client what unlocks the chapter
            ApiError::AccessDenied(reason) => json!({"error": self.to_string(), "denied": reason}),
            _ => json!({"error": self.to_string()}),
        };
        (status, Json(body)).into_response()
    }
}
