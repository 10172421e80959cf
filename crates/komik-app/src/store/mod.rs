#![allow(async_fn_in_trait)]
use std::{future::Future, path::PathBuf};

use axum::{
    extract::{FromRequestParts, Path as UrlPath},
    RequestPartsExt as _,
};
use bytes::Bytes;
use error::{StoreError, StoreResult};
use futures::Stream;
use http::request::Parts;
use serde::{Deserialize, Serialize};

pub mod error;
pub mod file_store;
pub mod rest_api;
pub use rest_api::store_router;
use tracing::debug;

use crate::error::ApiError;

const MAX_PATH_LEN: usize = 4095;
const MAX_SEGMENT_LEN: usize = 255;
const MAX_PATH_DEPTH: usize = 10;
const PATH_INVALID_CHARS: &str = r#"/\:"#;
fn validate_path(path: &str) -> StoreResult<()> {
    if path.is_empty() {
        return Err(StoreError::InvalidPath);
    }
    if path.starts_with("/") || path.ends_with("/") {
        return Err(StoreError::InvalidPath);
    }
    if path.len() > MAX_PATH_LEN {
        return Err(StoreError::InvalidPath);
    }
    let segments = path.split('/').collect::<Vec<_>>();
    if segments.len() > MAX_PATH_DEPTH {
        return Err(StoreError::InvalidPath);
    }
    let invalid_path = segments.into_iter().any(|s| {
        s.is_empty()
            || s.starts_with(".")
            || s.len() > MAX_SEGMENT_LEN
            || s.chars()
                .any(|c| PATH_INVALID_CHARS.contains(c) || c.is_ascii_control())
    });
    if invalid_path {
        Err(StoreError::InvalidPath)
    } else {
        Ok(())
    }
}

pub fn file_ext(file_name: &str) -> Option<String> {
    file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .filter(|ext| !ext.is_empty())
}

#[derive(Debug, Clone)]
pub struct ValidatedPath(String);

impl ValidatedPath {
    pub fn new(path: impl Into<String>) -> StoreResult<Self> {
        let path = path.into();
        validate_path(path.as_str()).inspect_err(|_| debug!("Invalid path: {path}"))?;
        Ok(ValidatedPath(path))
    }
}

impl AsRef<str> for ValidatedPath {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl<S> FromRequestParts<S> for ValidatedPath
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    fn from_request_parts(
        parts: &mut Parts,
        _state: &S,
    ) -> impl Future<Output = Result<Self, Self::Rejection>> + Send {
        async move {
            let UrlPath(path) = parts.extract::<UrlPath<String>>().await?;
            let validated_path = ValidatedPath::new(path)?;
            Ok(validated_path)
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StoreInfo {
    /// final path where the file is stored, relative to the store root
    pub final_path: PathBuf,
    pub size: u64,
    /// SHA256 hash
    pub hash: String,
}

pub trait Store {
    async fn store_data(&self, path: &ValidatedPath, data: &[u8]) -> StoreResult<StoreInfo>;
    async fn store_stream<S, E>(&self, path: &ValidatedPath, stream: S) -> StoreResult<StoreInfo>
    where
        S: Stream<Item = Result<Bytes, E>>,
        E: Into<StoreError>;
    async fn load_data(
        &self,
        path: &ValidatedPath,
    ) -> Result<impl Stream<Item = StoreResult<Bytes>> + 'static, StoreError>;
    async fn size(&self, path: &ValidatedPath) -> StoreResult<u64>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_validation() {
        assert!(ValidatedPath::new("uploads/cover.png").is_ok());
        assert!(ValidatedPath::new("").is_err());
        assert!(ValidatedPath::new("/absolute").is_err());
        assert!(ValidatedPath::new("trailing/").is_err());
        assert!(ValidatedPath::new("uploads/../secret").is_err());
        assert!(ValidatedPath::new("uploads/.hidden").is_err());
        assert!(ValidatedPath::new("uploads//double").is_err());
    }

    #[test]
    fn test_file_ext() {
        assert_eq!(file_ext("page.PNG").as_deref(), Some("png"));
        assert_eq!(file_ext("archive.tar.gz").as_deref(), Some("gz"));
        assert_eq!(file_ext("noext"), None);
        assert_eq!(file_ext("trailing."), None);
    }
}
