use serde::{Deserialize, Serialize};
use sqlx::Pool;

use crate::{error::Result, Error};

/// Aggregate rating of one manga, plus the calling user's own vote when known.
#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct RatingSummary {
    /// Mean of all stars, rounded to 2 decimal places; 0 when nobody rated.
    pub rating: f64,
    pub rating_count: i64,
    pub user_rating: Option<i64>,
}

pub type RatingRepository = RatingRepositoryImpl<Pool<crate::ChosenDB>>;

pub struct RatingRepositoryImpl<E> {
    executor: E,
}

impl<'c, E> RatingRepositoryImpl<E>
where
    for<'a> &'a E: sqlx::Executor<'c, Database = crate::ChosenDB>,
{
    pub fn new(executor: E) -> Self {
        Self { executor }
    }

    /// Records or replaces one user's star rating. The ratings table is keyed
    /// by (manga, user), so a repeat vote overwrites in place and the rater
    /// count stays flat; the upsert is a single statement, so two users rating
    /// at once cannot clobber each other. The mean is derived on read and
    /// never stored.
    pub async fn submit(&self, manga_id: i64, user_id: i64, stars: i64) -> Result<RatingSummary> {
        if !(1..=5).contains(&stars) {
            return Err(Error::InvalidRating(stars));
        }
        self.ensure_manga(manga_id).await?;

        sqlx::query(
            "INSERT INTO manga_rating (manga_id, user_id, stars) VALUES (?, ?, ?) \
             ON CONFLICT (manga_id, user_id) \
             DO UPDATE SET stars = excluded.stars, rated_at = datetime()",
        )
        .bind(manga_id)
        .bind(user_id)
        .bind(stars)
        .execute(&self.executor)
        .await?;

        self.summary(manga_id, Some(user_id)).await
    }

    /// Read-only aggregate; never mutates state.
    pub async fn summary(&self, manga_id: i64, user_id: Option<i64>) -> Result<RatingSummary> {
        self.ensure_manga(manga_id).await?;

        let (rating, rating_count): (Option<f64>, i64) = sqlx::query_as(
            "SELECT ROUND(AVG(stars), 2), COUNT(*) FROM manga_rating WHERE manga_id = ?",
        )
        .bind(manga_id)
        .fetch_one(&self.executor)
        .await?;

        let user_rating = match user_id {
            Some(user_id) => {
                sqlx::query_scalar(
                    "SELECT stars FROM manga_rating WHERE manga_id = ? AND user_id = ?",
                )
                .bind(manga_id)
                .bind(user_id)
                .fetch_optional(&self.executor)
                .await?
            }
            None => None,
        };

        Ok(RatingSummary {
            rating: rating.unwrap_or(0.0),
            rating_count,
            user_rating,
        })
    }

    async fn ensure_manga(&self, manga_id: i64) -> Result<()> {
        let exists: Option<i64> = sqlx::query_scalar("SELECT id FROM manga WHERE id = ?")
            .bind(manga_id)
            .fetch_optional(&self.executor)
            .await?;
        if exists.is_none() {
            return Err(Error::RecordNotFound("Manga".to_string()));
        }
        Ok(())
    }
}
