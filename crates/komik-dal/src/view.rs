use serde::{Deserialize, Serialize};
use sqlx::Pool;
use tracing::debug;

use crate::{error::Result, Error};

/// Rolling window within which repeat views from the same identity are
/// ignored.
pub const VIEW_DEDUPE_WINDOW_MS: i64 = 24 * 60 * 60 * 1000;

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct ViewOutcome {
    pub views: i64,
    pub incremented: bool,
}

pub type ViewRepository = ViewRepositoryImpl<Pool<crate::ChosenDB>>;

pub struct ViewRepositoryImpl<E> {
    executor: E,
}

impl ViewRepositoryImpl<Pool<crate::ChosenDB>> {
    pub fn new(executor: Pool<crate::ChosenDB>) -> Self {
        Self { executor }
    }

    /// Counts a view at most once per viewer identity per 24h window. The
    /// viewer key is whatever identity the caller could get hold of - user
    /// id, client address, or a shared "anonymous" bucket; the last two
    /// conflate viewers behind one address, which keeps this a best-effort
    /// anti-spam counter, not precise analytics.
    ///
    /// Check and increment run in one transaction so racing requests cannot
    /// double-count; a view counts only if strictly more than the window has
    /// passed since the last counted one.
    pub async fn record(&self, manga_id: i64, viewer_key: &str, now_ms: i64) -> Result<ViewOutcome> {
        let mut tx = self.executor.begin().await?;

        let views: Option<i64> = sqlx::query_scalar("SELECT views FROM manga WHERE id = ?")
            .bind(manga_id)
            .fetch_optional(&mut *tx)
            .await?;
        let Some(views) = views else {
            return Err(Error::RecordNotFound("Manga".to_string()));
        };

        let last: Option<i64> = sqlx::query_scalar(
            "SELECT last_view FROM manga_view WHERE manga_id = ? AND viewer_key = ?",
        )
        .bind(manga_id)
        .bind(viewer_key)
        .fetch_optional(&mut *tx)
        .await?;

        let elapsed = last.map(|t| now_ms - t > VIEW_DEDUPE_WINDOW_MS).unwrap_or(true);
        if !elapsed {
            debug!("Suppressed repeat view of manga {manga_id} by {viewer_key}");
            return Ok(ViewOutcome {
                views,
                incremented: false,
            });
        }

        sqlx::query("UPDATE manga SET views = views + 1 WHERE id = ?")
            .bind(manga_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            "INSERT INTO manga_view (manga_id, viewer_key, last_view) VALUES (?, ?, ?) \
             ON CONFLICT (manga_id, viewer_key) DO UPDATE SET last_view = excluded.last_view",
        )
        .bind(manga_id)
        .bind(viewer_key)
        .bind(now_ms)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        Ok(ViewOutcome {
            views: views + 1,
            incremented: true,
        })
    }
}
