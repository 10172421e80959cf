use futures::TryStreamExt as _;
use komik_dal::{
    now_millis,
    user::{CreateUser, UserAccountRepositoryImpl},
    Error,
};
use sqlx::Executor;

const TEST_DATA: &str = r#"
INSERT INTO manga (id, title, version) VALUES (1, 'Blade of Dawn', 1);

INSERT INTO chapter (id, manga_id, chapter_number, is_free, coin_price, pages_en, version)
VALUES (10, 1, 1, 1, NULL, '["pages/10/en/001.jpg"]', 1);
INSERT INTO chapter (id, manga_id, chapter_number, is_free, coin_price, pages_en, version)
VALUES (11, 1, 2, 0, 30, '["pages/11/en/001.jpg"]', 1);
INSERT INTO chapter (id, manga_id, chapter_number, is_free, coin_price, pages_en, version)
VALUES (12, 1, 2.5, 0, NULL, '["pages/12/en/001.jpg"]', 1);
"#;

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

fn new_user(email: &str) -> CreateUser {
    CreateUser {
        email: email.parse().unwrap(),
        name: Some("Reader".to_string()),
        password: Some("password123".to_string()),
        roles: None,
    }
}

#[tokio::test]
async fn test_create_and_login() {
    let conn = init_db().await;
    let repo = UserAccountRepositoryImpl::new(conn);

    let user = repo.create(new_user("reader@example.com")).await.unwrap();
    assert_eq!(user.email, "reader@example.com");
    assert_eq!(user.coins, 0);

    let logged = repo
        .check_password("reader@example.com", "password123")
        .await
        .unwrap();
    assert_eq!(logged.id, user.id);

    assert!(matches!(
        repo.check_password("reader@example.com", "wrong").await,
        Err(Error::InvalidCredentials)
    ));
    assert!(matches!(
        repo.check_password("nobody@example.com", "password123").await,
        Err(Error::InvalidCredentials)
    ));
}

#[tokio::test]
async fn test_change_password() {
    let conn = init_db().await;
    let repo = UserAccountRepositoryImpl::new(conn);

    let user = repo.create(new_user("reader@example.com")).await.unwrap();

    assert!(matches!(
        repo.change_password(user.id, Some("wrong"), "newpassword").await,
        Err(Error::InvalidCredentials)
    ));
    repo.change_password(user.id, Some("password123"), "newpassword")
        .await
        .unwrap();
    repo.check_password("reader@example.com", "newpassword")
        .await
        .unwrap();
}

#[tokio::test]
async fn test_membership_window() {
    let conn = init_db().await;
    let repo = UserAccountRepositoryImpl::new(conn);
    let now = now_millis();

    let user = repo.create(new_user("reader@example.com")).await.unwrap();
    assert!(!user.membership_active(now));

    // permanent membership
    let user = repo.grant_membership(user.id, now, None).await.unwrap();
    assert!(user.membership_active(now));
    assert!(user.membership_active(now + 1_000_000_000));

    // time-bounded membership
    let user = repo
        .grant_membership(user.id, now, Some(now + 1000))
        .await
        .unwrap();
    assert!(user.membership_active(now));
    assert!(!user.membership_active(now + 1000));
    assert!(!user.membership_active(now + 2000));

    let user = repo.revoke_membership(user.id).await.unwrap();
    assert!(!user.membership_active(now));
    assert_eq!(user.membership_end, None);

    assert!(matches!(
        repo.grant_membership(999, now, None).await,
        Err(Error::RecordNotFound(_))
    ));
}

#[tokio::test]
async fn test_coin_adjustment() {
    let conn = init_db().await;
    let repo = UserAccountRepositoryImpl::new(conn);

    let user = repo.create(new_user("reader@example.com")).await.unwrap();
    let coins = repo.adjust_coins(user.id, 100).await.unwrap();
    assert_eq!(coins, 100);
    let coins = repo.adjust_coins(user.id, -40).await.unwrap();
    assert_eq!(coins, 60);

    let err = repo.adjust_coins(user.id, -100).await.unwrap_err();
    assert!(matches!(
        err,
        Error::InsufficientCoins {
            needed: 100,
            available: 60
        }
    ));
}

#[tokio::test]
async fn test_chapter_purchase() {
    let conn = init_db().await;
    let repo = UserAccountRepositoryImpl::new(conn);

    let user = repo.create(new_user("reader@example.com")).await.unwrap();

    // not enough coins yet
    let err = repo.purchase_chapter(user.id, 11).await.unwrap_err();
    assert!(matches!(
        err,
        Error::InsufficientCoins {
            needed: 30,
            available: 0
        }
    ));

    repo.adjust_coins(user.id, 100).await.unwrap();
    let purchase = repo.purchase_chapter(user.id, 11).await.unwrap();
    assert_eq!(purchase.price, 30);
    assert_eq!(purchase.coins, 70);
    assert!(!purchase.already_owned);

    // buying again must not spend coins twice
    let purchase = repo.purchase_chapter(user.id, 11).await.unwrap();
    assert_eq!(purchase.coins, 70);
    assert!(purchase.already_owned);

    let owned = repo.purchased_chapters(user.id).await.unwrap();
    assert!(owned.contains(&11));
    assert_eq!(owned.len(), 1);

    // free or unpriced chapters cannot be bought
    assert!(matches!(
        repo.purchase_chapter(user.id, 10).await,
        Err(Error::NotPurchasable)
    ));
    assert!(matches!(
        repo.purchase_chapter(user.id, 12).await,
        Err(Error::NotPurchasable)
    ));
    assert!(matches!(
        repo.purchase_chapter(user.id, 999).await,
        Err(Error::RecordNotFound(_))
    ));
}

#[tokio::test]
async fn test_roles_and_listing() {
    let conn = init_db().await;
    let repo = UserAccountRepositoryImpl::new(conn);

    let user = repo.create(new_user("reader@example.com")).await.unwrap();
    assert_eq!(user.roles, None);

    let user = repo
        .set_roles(user.id, vec![komik_types::claim::Role::Translator])
        .await
        .unwrap();
    assert_eq!(user.roles, Some(vec!["translator".to_string()]));

    repo.create(new_user("other@example.com")).await.unwrap();
    let users = repo.list(100).await.unwrap();
    assert_eq!(users.len(), 2);

    repo.delete(user.id).await.unwrap();
    assert!(matches!(
        repo.delete(user.id).await,
        Err(Error::RecordNotFound(_))
    ));
}
