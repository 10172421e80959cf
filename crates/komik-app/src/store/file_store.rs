use std::{
    fmt::Display,
    path::{Path, PathBuf, StripPrefixError},
    sync::Arc,
};

use bytes::Bytes;
use futures::{pin_mut, Stream, StreamExt as _, TryFutureExt as _, TryStreamExt as _};
use sha2::{Digest, Sha256};
use tokio::{fs, io::AsyncWriteExt as _};
use tokio_util::io::ReaderStream;
use tracing::{debug, error};

use super::{
    error::{StoreError, StoreResult},
    Store, StoreInfo, ValidatedPath,
};

#[inline]
fn hex(bytes: &[u8]) -> String {
    base16ct::lower::encode_string(bytes)
}

/// Resolves the target path and a sibling tmp path for it. Page images are
/// stored under generated names, so an existing file on the target path is a
/// conflict, not something to silently overwrite.
async fn prepare_path(root: &Path, path: &str) -> StoreResult<(PathBuf, PathBuf)> {
    let final_path = root.join(path);
    if final_path.is_dir() {
        return Err(StoreError::InvalidPath);
    }
    if fs::try_exists(&final_path).await? {
        return Err(StoreError::PathConflict);
    }
    if let Some(parent_dir) = final_path.parent() {
        if !fs::try_exists(parent_dir).await? {
            fs::create_dir_all(parent_dir).await?;
        }
    }
    let tmp_path = final_path.with_extension("tmp");
    Ok((final_path, tmp_path))
}

async fn cleanup<E: Display>(path: &Path, error: E) -> Result<(), E> {
    error!("Failed to store file to tmp path {path:?}: {error}");
    fs::remove_file(path)
        .await
        .map_err(|e| error!("Failed to remove file {path:?}: {e}"))
        .ok();
    Err(error)
}

struct FileStoreInner {
    root: PathBuf,
}

#[derive(Clone)]
pub struct FileStore {
    inner: Arc<FileStoreInner>,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            inner: Arc::new(FileStoreInner { root: root.into() }),
        }
    }

    fn relative_path(&self, path: &impl AsRef<Path>) -> Result<PathBuf, StripPrefixError> {
        path.as_ref()
            .strip_prefix(&self.inner.root)
            .map(|p| p.to_path_buf())
    }
}

impl Store for FileStore {
    async fn store_data(&self, path: &ValidatedPath, data: &[u8]) -> StoreResult<StoreInfo> {
        let (final_path, tmp_path) = prepare_path(&self.inner.root, path.as_ref()).await?;
        fs::File::create(&tmp_path)
            .await?
            .write_all(data)
            .or_else(|e| cleanup(&tmp_path, e))
            .await?;
        fs::rename(&tmp_path, &final_path).await?;
        let digest = Sha256::digest(data);
        let final_path = self.relative_path(&final_path).unwrap(); // this is safe as we used root to create final_path
        let size = data.len() as u64;
        Ok(StoreInfo {
            final_path,
            size,
            hash: hex(&digest),
        })
    }

    async fn store_stream<S, E>(&self, path: &ValidatedPath, stream: S) -> StoreResult<StoreInfo>
    where
        S: Stream<Item = Result<Bytes, E>>,
        E: Into<StoreError>,
    {
        let (final_path, tmp_path) = prepare_path(&self.inner.root, path.as_ref()).await?;
        let mut file = fs::File::create(&tmp_path).await?;
        let mut size = 0;
        pin_mut!(stream);
        let mut digester = Sha256::new();
        while let Some(chunk) = stream.next().await {
            match chunk.map_err(|e| e.into()) {
                Ok(chunk) => {
                    file.write_all(&chunk)
                        .or_else(|e| cleanup(&tmp_path, e))
                        .await?;
                    size += chunk.len() as u64;
                    digester.update(&chunk);
                }
                Err(e) => {
                    cleanup(&tmp_path, e).await?;
                    unreachable!()
                }
            }
        }
        file.flush().await?;
        debug!("Stored {size} bytes to {tmp_path:?} and will move to {final_path:?}");
        fs::rename(&tmp_path, &final_path).await?;
        let digest = digester.finalize();
        let final_path = self.relative_path(&final_path).unwrap();

        Ok(StoreInfo {
            final_path,
            size,
            hash: hex(&digest),
        })
    }

    async fn load_data(
        &self,
        path: &ValidatedPath,
    ) -> Result<impl Stream<Item = StoreResult<Bytes>> + 'static, StoreError> {
        let final_path = self.inner.root.join(path.as_ref());
        let file = fs::File::open(&final_path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StoreError::NotFound(path.as_ref().to_string())
            } else {
                e.into()
            }
        })?;
        let stream = ReaderStream::new(file).map_err(StoreError::from);
        Ok(stream)
    }

    async fn size(&self, path: &ValidatedPath) -> StoreResult<u64> {
        let final_path = self.inner.root.join(path.as_ref());
        let meta = fs::metadata(&final_path).await?;
        Ok(meta.len())
    }
}
