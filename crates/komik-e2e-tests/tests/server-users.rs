use garde::Validate as _;
use komik_dal::user::CreateUser;
use komik_e2e_tests::{launch_env, prepare_env, rest, TestUser, TEST_PASSWORD};
use komik_types::general::ValidEmail;
use serde_json::json;
use tracing::info;
use tracing_test::traced_test;

#[tokio::test]
#[traced_test]
async fn test_invalid_user_email() {
    let (args, _config_guard) = prepare_env("test_invalid_email").await.unwrap();
    let base_url = args.base_url.clone();

    let new_user = CreateUser {
        name: Some("Reader".to_string()),
        email: ValidEmail::cheat("not-an-email".to_string()),
        password: Some(TEST_PASSWORD.to_string()),
        roles: None,
    };
    assert!(new_user.email.validate().is_err());

    let (client, _state) = launch_env(args, TestUser::None).await.unwrap();

    let response = client
        .post(base_url.join("users").unwrap())
        .json(&new_user)
        .send()
        .await
        .unwrap();
    info!("Response: {:#?}", response);
    assert!(response.status().is_client_error());
}

#[tokio::test]
#[traced_test]
async fn test_registration_strips_roles() {
    let (args, _config_guard) = prepare_env("test_registration_roles").await.unwrap();
    let base_url = args.base_url.clone();

    let (client, _state) = launch_env(args, TestUser::None).await.unwrap();

    // roles in the registration payload are ignored
    let response = client
        .post(base_url.join("users").unwrap())
        .json(&json!({
            "email": "sneaky@example.com",
            "password": TEST_PASSWORD,
            "roles": ["admin"],
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 201);
    let user: serde_json::Value = response.json().await.unwrap();
    assert!(user["roles"].is_null());

    rest::login(&client, &base_url, "sneaky@example.com", TEST_PASSWORD)
        .await
        .unwrap();
    let response = client
        .get(base_url.join("users").unwrap())
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 403);
}

#[tokio::test]
#[traced_test]
async fn test_profile_and_password_change() {
    let (args, _config_guard) = prepare_env("test_profile").await.unwrap();
    let base_url = args.base_url.clone();

    let (_client, _state) = launch_env(args, TestUser::None).await.unwrap();

    let (reader, reader_id) = rest::register_and_login(&base_url, "profile@example.com")
        .await
        .unwrap();

    let response = reader
        .get(base_url.join("users/me").unwrap())
        .send()
        .await
        .unwrap();
    assert!(response.status().is_success());
    let profile: serde_json::Value = response.json().await.unwrap();
    assert_eq!(profile["id"], reader_id);
    assert_eq!(profile["email"], "profile@example.com");
    assert_eq!(profile["purchased_chapters"].as_array().unwrap().len(), 0);

    // wrong old password is rejected
    let password_url = base_url.join("users/me/password").unwrap();
    let response = reader
        .post(password_url.clone())
        .json(&json!({"old_password": "wrong-password", "new_password": "brand-new-pass"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 401);

    let response = reader
        .post(password_url)
        .json(&json!({"old_password": TEST_PASSWORD, "new_password": "brand-new-pass"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 204);

    rest::login(&reader, &base_url, "profile@example.com", "brand-new-pass")
        .await
        .unwrap();
}
