use anyhow::Result;
use komik_dal::manga::{Chapter, Manga};
use reqwest::Url;
use serde_json::json;
use tracing::info;

use crate::TEST_PASSWORD;

pub async fn login(
    client: &reqwest::Client,
    base_url: &Url,
    email: &str,
    password: &str,
) -> Result<String> {
    let url = base_url.join("auth/login")?;
    let response = client
        .post(url)
        .json(&json!({"email": email, "password": password}))
        .send()
        .await?;
    info!("Login Response: {:#?}", response);
    assert!(response.status().is_success());

    let body: serde_json::Value = response.json().await?;
    let token = body["access_token"]
        .as_str()
        .expect("login response carries a token")
        .to_string();
    Ok(token)
}

/// Registers a fresh reader account through the public endpoint and logs it
/// in. Returns the client together with the new user id.
pub async fn register_and_login(base_url: &Url, email: &str) -> Result<(reqwest::Client, i64)> {
    let client = reqwest::Client::builder().cookie_store(true).build()?;
    let response = client
        .post(base_url.join("users")?)
        .json(&json!({"email": email, "name": "Test Reader", "password": TEST_PASSWORD}))
        .send()
        .await?;
    assert_eq!(response.status().as_u16(), 201);
    let user: serde_json::Value = response.json().await?;
    let id = user["id"].as_i64().expect("created user has an id");

    login(&client, base_url, email, TEST_PASSWORD).await?;
    Ok((client, id))
}

pub async fn create_manga(client: &reqwest::Client, base_url: &Url, title: &str) -> Result<Manga> {
    let payload = json!({"title": title});
    let api_url = base_url.join("api/manga")?;

    let response = client.post(api_url.clone()).json(&payload).send().await?;
    assert!(response.status().is_success());
    assert!(response.status().as_u16() == 201);

    let new_manga: Manga = response.json().await?;

    Ok(new_manga)
}

pub async fn create_chapter(
    client: &reqwest::Client,
    base_url: &Url,
    manga_id: i64,
    chapter_number: f64,
    is_free: bool,
    coin_price: Option<i64>,
) -> Result<Chapter> {
    let payload = json!({
        "chapter_number": chapter_number,
        "is_free": is_free,
        "coin_price": coin_price,
        "pages_en": [format!("pages/{manga_id}/{chapter_number}/001.jpg")],
        "pages_mm": [],
    });
    let api_url = base_url.join(&format!("api/manga/{manga_id}/chapters"))?;

    let response = client.post(api_url.clone()).json(&payload).send().await?;
    info!("Chapter Response: {:#?}", response);
    assert!(response.status().is_success());
    assert!(response.status().as_u16() == 201);

    let new_chapter: Chapter = response.json().await?;
    Ok(new_chapter)
}
