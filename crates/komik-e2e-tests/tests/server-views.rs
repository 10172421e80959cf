use komik_e2e_tests::{TestUser, launch_env, prepare_env, rest};
use tracing_test::traced_test;

#[tokio::test]
#[traced_test]
async fn test_view_dedupe() {
    let (args, _config_guard) = prepare_env("test_view_dedupe").await.unwrap();
    let base_url = args.base_url.clone();

    let (admin, _state) = launch_env(args, TestUser::Admin).await.unwrap();
    let manga = rest::create_manga(&admin, &base_url, "Blade of Dawn")
        .await
        .unwrap();
    let view_url = base_url
        .join(&format!("api/manga/{}/view", manga.id))
        .unwrap();

    // anonymous viewer is keyed by client address
    let anon = reqwest::Client::new();
    let response = anon.post(view_url.clone()).send().await.unwrap();
    assert!(response.status().is_success());
    let outcome: serde_json::Value = response.json().await.unwrap();
    assert_eq!(outcome["views"], 1);
    assert_eq!(outcome["incremented"], true);

    // repeat within the window is suppressed
    let response = anon.post(view_url.clone()).send().await.unwrap();
    let outcome: serde_json::Value = response.json().await.unwrap();
    assert_eq!(outcome["views"], 1);
    assert_eq!(outcome["incremented"], false);

    // a logged-in user is a distinct identity even from the same address
    let (reader, _reader_id) = rest::register_and_login(&base_url, "viewer@example.com")
        .await
        .unwrap();
    let response = reader.post(view_url.clone()).send().await.unwrap();
    let outcome: serde_json::Value = response.json().await.unwrap();
    assert_eq!(outcome["views"], 2);
    assert_eq!(outcome["incremented"], true);

    let response = reader.post(view_url.clone()).send().await.unwrap();
    let outcome: serde_json::Value = response.json().await.unwrap();
    assert_eq!(outcome["views"], 2);
    assert_eq!(outcome["incremented"], false);

    // view total is visible in the catalog
    let response = anon
        .get(base_url.join(&format!("api/manga/{}", manga.id)).unwrap())
        .send()
        .await
        .unwrap();
    assert!(response.status().is_success());
    let detail: serde_json::Value = response.json().await.unwrap();
    assert_eq!(detail["views"], 2);

    // unknown manga is a 404
    let response = anon
        .post(base_url.join("api/manga/9999/view").unwrap())
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 404);
}
