use garde::Validate;
use serde::{Deserialize, Serialize};
use sqlx::{Pool, Row};
use tracing::debug;

use crate::{error::Result, ChosenRow, Error, ListingParams};

const LIST_ORDER_FIELDS: &[&str] = &["title", "author", "views", "rating", "created", "modified"];

#[derive(Debug, Serialize, Deserialize, Clone, Validate)]
pub struct CreateManga {
    #[garde(length(min = 1, max = 511))]
    pub title: String,
    #[garde(length(max = 5000))]
    pub description: Option<String>,
    #[garde(length(max = 255))]
    pub author: Option<String>,
    #[garde(length(max = 1023))]
    pub cover: Option<String>,
    #[garde(length(max = 32))]
    pub status: Option<String>,
    #[garde(range(min = 0))]
    pub version: Option<i64>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Validate)]
pub struct CreateChapter {
    #[garde(range(min = 0.0))]
    pub chapter_number: f64,
    #[garde(length(max = 255))]
    pub title: Option<String>,
    #[garde(skip)]
    pub is_free: bool,
    #[garde(range(min = 0))]
    pub coin_price: Option<i64>,
    #[garde(skip)]
    pub pages_en: Vec<String>,
    #[garde(skip)]
    pub pages_mm: Vec<String>,
    #[garde(range(min = 0))]
    pub version: Option<i64>,
}

/// Catalog row - list views never carry chapter contents.
#[derive(Debug, Serialize, Deserialize, Clone, sqlx::FromRow)]
pub struct MangaShort {
    pub id: i64,
    pub title: String,
    pub author: Option<String>,
    pub cover: Option<String>,
    pub status: String,
    pub views: i64,
    pub rating: f64,
    pub rating_count: i64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Manga {
    pub id: i64,
    pub title: String,
    pub description: Option<String>,
    pub author: Option<String>,
    pub cover: Option<String>,
    pub status: String,
    pub views: i64,
    pub rating: f64,
    pub rating_count: i64,
    pub chapters: Vec<ChapterSummary>,
    pub version: i64,
    pub created_by: Option<String>,
    pub created: time::PrimitiveDateTime,
    pub modified: time::PrimitiveDateTime,
}

/// Chapter metadata without pages. Pages are only handed out by the reader
/// endpoint after the entitlement check.
#[derive(Debug, Serialize, Deserialize, Clone, sqlx::FromRow)]
pub struct ChapterSummary {
    pub id: i64,
    pub chapter_number: f64,
    pub title: Option<String>,
    pub is_free: bool,
    pub coin_price: Option<i64>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Chapter {
    pub id: i64,
    pub manga_id: i64,
    pub chapter_number: f64,
    pub title: Option<String>,
    pub is_free: bool,
    pub coin_price: Option<i64>,
    pub pages_en: Vec<String>,
    pub pages_mm: Vec<String>,
    pub version: i64,
}

fn pages_column(row: &ChosenRow, column: &'static str) -> Result<Vec<String>, sqlx::Error> {
    let raw: String = row.try_get(column)?;
    serde_json::from_str(&raw).map_err(|e| sqlx::Error::ColumnDecode {
        index: column.to_string(),
        source: Box::new(e),
    })
}

impl sqlx::FromRow<'_, ChosenRow> for Chapter {
    fn from_row(row: &ChosenRow) -> Result<Self, sqlx::Error> {
        Ok(Chapter {
            id: row.try_get("id")?,
            manga_id: row.try_get("manga_id")?,
            chapter_number: row.try_get("chapter_number")?,
            title: row.try_get("title")?,
            is_free: row.try_get("is_free")?,
            coin_price: row.try_get("coin_price")?,
            pages_en: pages_column(row, "pages_en")?,
            pages_mm: pages_column(row, "pages_mm")?,
            version: row.try_get("version")?,
        })
    }
}

const MANGA_SQL: &str = r#"
SELECT m.id, m.title, m.description, m.author, m.cover, m.status, m.views,
  m.version, m.created_by, m.created, m.modified,
  COALESCE(ROUND(r.avg_stars, 2), 0) AS rating, COALESCE(r.cnt, 0) AS rating_count
FROM manga m
LEFT JOIN (
  SELECT manga_id, AVG(stars) AS avg_stars, COUNT(*) AS cnt
  FROM manga_rating GROUP BY manga_id
) r ON r.manga_id = m.id
"#;

const LIST_SQL: &str = r#"
SELECT m.id, m.title, m.author, m.cover, m.status, m.views,
  COALESCE(ROUND(r.avg_stars, 2), 0) AS rating, COALESCE(r.cnt, 0) AS rating_count
FROM manga m
LEFT JOIN (
  SELECT manga_id, AVG(stars) AS avg_stars, COUNT(*) AS cnt
  FROM manga_rating GROUP BY manga_id
) r ON r.manga_id = m.id
"#;

pub type MangaRepository = MangaRepositoryImpl<Pool<crate::ChosenDB>>;

pub struct MangaRepositoryImpl<E> {
    executor: E,
}

impl<'c, E> MangaRepositoryImpl<E>
where
    for<'a> &'a E: sqlx::Executor<'c, Database = crate::ChosenDB>,
{
    pub fn new(executor: E) -> Self {
        Self { executor }
    }

    pub async fn create(&self, payload: CreateManga, created_by: Option<String>) -> Result<Manga> {
        let result = sqlx::query(
            "INSERT INTO manga (title, description, author, cover, status, created_by) \
             VALUES (?, ?, ?, ?, COALESCE(?, 'ongoing'), ?)",
        )
        .bind(&payload.title)
        .bind(&payload.description)
        .bind(&payload.author)
        .bind(&payload.cover)
        .bind(&payload.status)
        .bind(&created_by)
        .execute(&self.executor)
        .await?;

        let id = result.last_insert_rowid();
        self.get(id).await
    }

    pub async fn get(&self, id: i64) -> Result<Manga> {
        let sql = format!("{MANGA_SQL} WHERE m.id = ?");
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.executor)
            .await?
            .ok_or_else(|| Error::RecordNotFound("Manga".to_string()))?;

        let chapters = sqlx::query_as::<_, ChapterSummary>(
            "SELECT id, chapter_number, title, is_free, coin_price FROM chapter \
             WHERE manga_id = ? ORDER BY chapter_number",
        )
        .bind(id)
        .fetch_all(&self.executor)
        .await?;

        Ok(Manga {
            id: row.try_get("id")?,
            title: row.try_get("title")?,
            description: row.try_get("description")?,
            author: row.try_get("author")?,
            cover: row.try_get("cover")?,
            status: row.try_get("status")?,
            views: row.try_get("views")?,
            rating: row.try_get("rating")?,
            rating_count: row.try_get("rating_count")?,
            chapters,
            version: row.try_get("version")?,
            created_by: row.try_get("created_by")?,
            created: row.try_get("created")?,
            modified: row.try_get("modified")?,
        })
    }

    pub async fn list(&self, params: ListingParams) -> Result<crate::Batch<MangaShort>> {
        let ordering = params.ordering(LIST_ORDER_FIELDS)?;
        let filter = params.filter.as_ref().map(|f| format!("%{f}%"));

        let mut sql = LIST_SQL.to_string();
        let mut count_sql = "SELECT COUNT(*) FROM manga m".to_string();
        if filter.is_some() {
            sql.push_str(" WHERE m.title LIKE ?");
            count_sql.push_str(" WHERE m.title LIKE ?");
        }
        if ordering.is_empty() {
            sql.push_str(" ORDER BY m.title");
        } else {
            sql.push_str(&format!(" ORDER BY {ordering}"));
        }
        sql.push_str(" LIMIT ? OFFSET ?");
        debug!("Manga listing SQL: {sql}");

        let mut query = sqlx::query_as::<_, MangaShort>(&sql);
        if let Some(pattern) = &filter {
            query = query.bind(pattern);
        }
        let rows = query
            .bind(params.limit)
            .bind(params.offset)
            .fetch_all(&self.executor)
            .await?;

        let mut count_query = sqlx::query_scalar::<_, i64>(&count_sql);
        if let Some(pattern) = &filter {
            count_query = count_query.bind(pattern);
        }
        let total = count_query.fetch_one(&self.executor).await?;

        Ok(crate::Batch {
            rows,
            total: total as u64,
            offset: params.offset,
        })
    }

    pub async fn update(&self, id: i64, payload: CreateManga) -> Result<Manga> {
        let version = payload.version.ok_or_else(|| {
            debug!("No version provided");
            Error::MissingVersion
        })?;
        let result = sqlx::query(
            "UPDATE manga SET title = ?, description = ?, author = ?, cover = ?, \
             status = COALESCE(?, status), version = ?, modified = datetime() \
             WHERE id = ? AND version = ?",
        )
        .bind(&payload.title)
        .bind(&payload.description)
        .bind(&payload.author)
        .bind(&payload.cover)
        .bind(&payload.status)
        .bind(version + 1)
        .bind(id)
        .bind(version)
        .execute(&self.executor)
        .await?;

        if result.rows_affected() == 0 {
            Err(Error::FailedUpdate { id, version })
        } else {
            self.get(id).await
        }
    }

    pub async fn delete(&self, id: i64) -> Result<()> {
        let res = sqlx::query("DELETE FROM manga WHERE id = ?")
            .bind(id)
            .execute(&self.executor)
            .await?;

        if res.rows_affected() == 0 {
            Err(Error::RecordNotFound("Manga".to_string()))
        } else {
            Ok(())
        }
    }

    pub async fn get_chapter(&self, chapter_id: i64) -> Result<Chapter> {
        let chapter = sqlx::query_as::<_, Chapter>(
            "SELECT id, manga_id, chapter_number, title, is_free, coin_price, \
             pages_en, pages_mm, version FROM chapter WHERE id = ?",
        )
        .bind(chapter_id)
        .fetch_optional(&self.executor)
        .await?
        .ok_or_else(|| Error::RecordNotFound("Chapter".to_string()))?;
        Ok(chapter)
    }

    pub async fn list_chapters(&self, manga_id: i64) -> Result<Vec<ChapterSummary>> {
        // guard against listing chapters of a manga that does not exist
        let exists: Option<i64> = sqlx::query_scalar("SELECT id FROM manga WHERE id = ?")
            .bind(manga_id)
            .fetch_optional(&self.executor)
            .await?;
        if exists.is_none() {
            return Err(Error::RecordNotFound("Manga".to_string()));
        }
        let chapters = sqlx::query_as::<_, ChapterSummary>(
            "SELECT id, chapter_number, title, is_free, coin_price FROM chapter \
             WHERE manga_id = ? ORDER BY chapter_number",
        )
        .bind(manga_id)
        .fetch_all(&self.executor)
        .await?;
        Ok(chapters)
    }

    pub async fn create_chapter(&self, manga_id: i64, payload: CreateChapter) -> Result<Chapter> {
        if payload.pages_en.is_empty() && payload.pages_mm.is_empty() {
            return Err(Error::NoPages);
        }
        let exists: Option<i64> = sqlx::query_scalar("SELECT id FROM manga WHERE id = ?")
            .bind(manga_id)
            .fetch_optional(&self.executor)
            .await?;
        if exists.is_none() {
            return Err(Error::RecordNotFound("Manga".to_string()));
        }
        let pages_en = serde_json::to_string(&payload.pages_en)?;
        let pages_mm = serde_json::to_string(&payload.pages_mm)?;
        let result = sqlx::query(
            "INSERT INTO chapter (manga_id, chapter_number, title, is_free, coin_price, \
             pages_en, pages_mm) VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(manga_id)
        .bind(payload.chapter_number)
        .bind(&payload.title)
        .bind(payload.is_free)
        .bind(payload.coin_price)
        .bind(pages_en)
        .bind(pages_mm)
        .execute(&self.executor)
        .await?;

        self.get_chapter(result.last_insert_rowid()).await
    }

    pub async fn update_chapter(
        &self,
        manga_id: i64,
        chapter_id: i64,
        payload: CreateChapter,
    ) -> Result<Chapter> {
        if payload.pages_en.is_empty() && payload.pages_mm.is_empty() {
            return Err(Error::NoPages);
        }
        let version = payload.version.ok_or_else(|| {
            debug!("No version provided");
            Error::MissingVersion
        })?;
        let pages_en = serde_json::to_string(&payload.pages_en)?;
        let pages_mm = serde_json::to_string(&payload.pages_mm)?;
        let result = sqlx::query(
            "UPDATE chapter SET chapter_number = ?, title = ?, is_free = ?, coin_price = ?, \
             pages_en = ?, pages_mm = ?, version = ?, modified = datetime() \
             WHERE id = ? AND manga_id = ? AND version = ?",
        )
        .bind(payload.chapter_number)
        .bind(&payload.title)
        .bind(payload.is_free)
        .bind(payload.coin_price)
        .bind(pages_en)
        .bind(pages_mm)
        .bind(version + 1)
        .bind(chapter_id)
        .bind(manga_id)
        .bind(version)
        .execute(&self.executor)
        .await?;

        if result.rows_affected() == 0 {
            Err(Error::FailedUpdate {
                id: chapter_id,
                version,
            })
        } else {
            self.get_chapter(chapter_id).await
        }
    }

    pub async fn delete_chapter(&self, manga_id: i64, chapter_id: i64) -> Result<()> {
        let res = sqlx::query("DELETE FROM chapter WHERE id = ? AND manga_id = ?")
            .bind(chapter_id)
            .bind(manga_id)
            .execute(&self.executor)
            .await?;

        if res.rows_affected() == 0 {
            Err(Error::RecordNotFound("Chapter".to_string()))
        } else {
            Ok(())
        }
    }
}
