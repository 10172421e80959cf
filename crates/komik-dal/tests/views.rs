use futures::TryStreamExt as _;
use komik_dal::{
    view::{ViewRepositoryImpl, VIEW_DEDUPE_WINDOW_MS},
    Error,
};
use sqlx::Executor;

const TEST_DATA: &str = r#"
INSERT INTO manga (id, title, version) VALUES (1, 'Blade of Dawn', 1);
INSERT INTO manga (id, title, version) VALUES (2, 'Moonlit Garden', 1);
"#;

const HOUR_MS: i64 = 60 * 60 * 1000;
const T0: i64 = 1_700_000_000_000;

async fn init_db() -> sqlx::Pool<sqlx::Sqlite> {
    const DB_URL: &str = "sqlite::memory:";
    let conn = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(1)
        .min_connections(1)
        .connect(DB_URL)
        .await
        .unwrap();
    conn.execute("PRAGMA foreign_keys = ON").await.unwrap();
    sqlx::migrate!("../../migrations").run(&conn).await.unwrap();

    conn.execute_many(TEST_DATA)
        .try_collect::<Vec<_>>()
        .await
        .unwrap();

    conn
}

#[tokio::test]
async fn test_dedupe_window() {
    let conn = init_db().await;
    let repo = ViewRepositoryImpl::new(conn);

    let outcome = repo.record(1, "u1", T0).await.unwrap();
    assert_eq!(outcome.views, 1);
    assert!(outcome.incremented);

    let outcome = repo.record(1, "u1", T0 + HOUR_MS).await.unwrap();
    assert_eq!(outcome.views, 1);
    assert!(!outcome.incremented);

    let outcome = repo.record(1, "u1", T0 + 25 * HOUR_MS).await.unwrap();
    assert_eq!(outcome.views, 2);
    assert!(outcome.incremented);
}

#[tokio::test]
async fn test_window_boundary_is_strict() {
    let conn = init_db().await;
    let repo = ViewRepositoryImpl::new(conn);

    repo.record(1, "u1", T0).await.unwrap();
    // exactly at the window edge the view is still suppressed
    let outcome = repo
        .record(1, "u1", T0 + VIEW_DEDUPE_WINDOW_MS)
        .await
        .unwrap();
    assert!(!outcome.incremented);
    let outcome = repo
        .record(1, "u1", T0 + VIEW_DEDUPE_WINDOW_MS + 1)
        .await
        .unwrap();
    assert!(outcome.incremented);
}

#[tokio::test]
async fn test_distinct_identities_count_separately() {
    let conn = init_db().await;
    let repo = ViewRepositoryImpl::new(conn);

    assert!(repo.record(1, "u1", T0).await.unwrap().incremented);
    assert!(repo.record(1, "203.0.113.9", T0).await.unwrap().incremented);
    let outcome = repo.record(1, "anonymous", T0).await.unwrap();
    assert_eq!(outcome.views, 3);

    // same identity on another manga is a fresh window
    assert!(repo.record(2, "u1", T0).await.unwrap().incremented);
}

#[tokio::test]
async fn test_unknown_manga_writes_nothing() {
    let conn = init_db().await;
    let repo = ViewRepositoryImpl::new(conn.clone());

    assert!(matches!(
        repo.record(999, "u1", T0).await.unwrap_err(),
        Error::RecordNotFound(_)
    ));
    let history: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM manga_view")
        .fetch_one(&conn)
        .await
        .unwrap();
    assert_eq!(history, 0);
}
