use komik_e2e_tests::{TestUser, launch_env, prepare_env, rest};
use serde_json::json;
use tracing::info;
use tracing_test::traced_test;

#[tokio::test]
#[traced_test]
async fn test_chapter_access() {
    let (args, _config_guard) = prepare_env("test_chapter_access").await.unwrap();
    let base_url = args.base_url.clone();

    let (admin, _state) = launch_env(args, TestUser::Admin).await.unwrap();
    let manga = rest::create_manga(&admin, &base_url, "Blade of Dawn")
        .await
        .unwrap();
    let free = rest::create_chapter(&admin, &base_url, manga.id, 1.0, true, None)
        .await
        .unwrap();
    let paid = rest::create_chapter(&admin, &base_url, manga.id, 2.0, false, Some(30))
        .await
        .unwrap();

    // anonymous readers get nothing, not even free chapters
    let anon = reqwest::Client::new();
    let response = anon
        .get(base_url.join(&format!("read/{}", free.id)).unwrap())
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 401);

    let (reader, reader_id) = rest::register_and_login(&base_url, "reader2@example.com")
        .await
        .unwrap();

    let response = reader
        .get(base_url.join(&format!("read/{}", free.id)).unwrap())
        .send()
        .await
        .unwrap();
    assert!(response.status().is_success());
    let pages: serde_json::Value = response.json().await.unwrap();
    assert_eq!(pages["pages_en"].as_array().unwrap().len(), 1);

    // paid chapter is locked with the price in the denial
    let response = reader
        .get(base_url.join(&format!("read/{}", paid.id)).unwrap())
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 403);
    let body: serde_json::Value = response.json().await.unwrap();
    info!("Denied body: {:#?}", body);
    assert_eq!(body["denied"]["reason"], "purchase_required");
    assert_eq!(body["denied"]["coin_price"], 30);

    // purchase without coins fails
    let purchase_url = base_url
        .join(&format!("read/{}/purchase", paid.id))
        .unwrap();
    let response = reader.post(purchase_url.clone()).send().await.unwrap();
    assert_eq!(response.status().as_u16(), 409);

    // admin tops up coins
    let response = admin
        .put(base_url
            .join(&format!("users/{reader_id}/coins"))
            .unwrap())
        .json(&json!({"delta": 100}))
        .send()
        .await
        .unwrap();
    assert!(response.status().is_success());
    let balance: serde_json::Value = response.json().await.unwrap();
    assert_eq!(balance["coins"], 100);

    let response = reader.post(purchase_url.clone()).send().await.unwrap();
    assert!(response.status().is_success());
    let purchase: serde_json::Value = response.json().await.unwrap();
    assert_eq!(purchase["price"], 30);
    assert_eq!(purchase["coins"], 70);
    assert_eq!(purchase["already_owned"], false);

    // now readable
    let response = reader
        .get(base_url.join(&format!("read/{}", paid.id)).unwrap())
        .send()
        .await
        .unwrap();
    assert!(response.status().is_success());

    // buying again does not spend coins twice
    let response = reader.post(purchase_url).send().await.unwrap();
    let purchase: serde_json::Value = response.json().await.unwrap();
    assert_eq!(purchase["coins"], 70);
    assert_eq!(purchase["already_owned"], true);
}

#[tokio::test]
#[traced_test]
async fn test_membership_access() {
    let (args, _config_guard) = prepare_env("test_membership_access").await.unwrap();
    let base_url = args.base_url.clone();

    let (admin, _state) = launch_env(args, TestUser::Admin).await.unwrap();
    let manga = rest::create_manga(&admin, &base_url, "Moonlit Garden")
        .await
        .unwrap();
    // not free and not priced - members only
    let gated = rest::create_chapter(&admin, &base_url, manga.id, 1.0, false, None)
        .await
        .unwrap();

    let (reader, reader_id) = rest::register_and_login(&base_url, "member@example.com")
        .await
        .unwrap();
    let read_url = base_url.join(&format!("read/{}", gated.id)).unwrap();

    let response = reader.get(read_url.clone()).send().await.unwrap();
    assert_eq!(response.status().as_u16(), 403);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["denied"]["reason"], "membership_required");

    // permanent membership opens it
    let membership_url = base_url
        .join(&format!("users/{reader_id}/membership"))
        .unwrap();
    let response = admin
        .put(membership_url.clone())
        .json(&json!({"end": null}))
        .send()
        .await
        .unwrap();
    assert!(response.status().is_success());

    let response = reader.get(read_url.clone()).send().await.unwrap();
    assert!(response.status().is_success());

    // revocation locks it again on the next request
    let response = admin.delete(membership_url).send().await.unwrap();
    assert!(response.status().is_success());

    let response = reader.get(read_url).send().await.unwrap();
    assert_eq!(response.status().as_u16(), 403);
}
