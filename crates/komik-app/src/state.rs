use std::{path::PathBuf, sync::Arc};

use crate::{error::Result, store::file_store::FileStore};
use komik_auth::token::TokenManager;
use sqlx::Pool;
use url::Url;

#[derive(Clone)]
pub struct AppState {
    state: Arc<AppStateInner>,
}

impl AppState {
    pub fn new(app_config: AppConfig, pool: Pool<sqlx::Sqlite>, tokens: TokenManager) -> Self {
        let store = FileStore::new(&app_config.file_store_path);
        AppState {
            state: Arc::new(AppStateInner {
                app_config,
                pool,
                tokens,
                store,
            }),
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.state.app_config
    }

    pub fn build_url(&self, relative_url: &str) -> Result<Url> {
        let base = &self.config().base_url;
        let url = base.join(relative_url)?;
        Ok(url)
    }

    pub fn pool(&self) -> &Pool<sqlx::Sqlite> {
        &self.state.pool
    }

    pub fn tokens(&self) -> &TokenManager {
        &self.state.tokens
    }

    pub fn store(&self) -> &FileStore {
        &self.state.store
    }
}

impl axum::extract::FromRef<AppState> for () {
    fn from_ref(_: &AppState) {}
}

struct AppStateInner {
    pool: Pool<sqlx::Sqlite>,
    tokens: TokenManager,
    app_config: AppConfig,
    store: FileStore,
}

pub struct AppConfig {
    pub base_url: Url,
    pub file_store_path: PathBuf,
    pub default_page_size: u32,
    pub upload_limit_mb: usize,
}
