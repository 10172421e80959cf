use std::time::Duration;

use anyhow::{Result, anyhow};
use komik_app::state::AppState;
use komik_dal::user::{CreateUser, UserAccountRepository};
use komik_server::config::{Parser, ServerConfig};
use komik_server::run::{build_state, run_graceful_with_state};
use rand::Rng as _;
use reqwest::Url;
use tempfile::TempDir;

pub mod rest;

pub const TEST_PASSWORD: &str = "password123";

fn random_port() -> Result<u16> {
    let mut rng = rand::rng();

    let mut retries = 3;
    while retries > 0 {
        let port: u16 = rng.random_range(3030..4030);
        let addr: std::net::SocketAddr = format!("127.0.0.1:{}", port).parse()?;
        match std::net::TcpStream::connect_timeout(&addr, std::time::Duration::from_millis(100)) {
            Err(e) if e.kind() == std::io::ErrorKind::ConnectionRefused => return Ok(port),
            Err(_) => retries -= 1,
            Ok(_) => retries -= 1,
        }
    }

    Err(anyhow!("Could not find a free port"))
}

pub struct ConfigGuard {
    #[allow(dead_code)]
    data_dir: TempDir,
}

/// Initial user for a test server, created directly in the database.
pub enum TestUser {
    Admin,
    Translator,
    Reader,
    None,
}

impl TestUser {
    fn credentials(&self) -> Option<(&'static str, Option<Vec<String>>)> {
        match self {
            TestUser::Admin => Some(("admin@example.com", Some(vec!["admin".to_string()]))),
            TestUser::Translator => Some((
                "translator@example.com",
                Some(vec!["translator".to_string()]),
            )),
            TestUser::Reader => Some(("reader@example.com", None)),
            TestUser::None => None,
        }
    }
}

pub async fn prepare_env(test_name: &str) -> Result<(ServerConfig, ConfigGuard)> {
    let tmp_data_dir = TempDir::with_prefix(format!("{}_", test_name))?;
    let data_dir = tmp_data_dir.path().to_string_lossy().to_string();
    let port = random_port()?;
    let port = port.to_string();
    let base_url = format!("http://localhost:{}/", port);
    let args = &[
        "komik-e2e-tests",
        "--data-dir",
        &data_dir,
        "--port",
        &port,
        "--base-url",
        &base_url,
    ];
    let config = ServerConfig::try_parse_from(args)?;
    Ok((
        config,
        ConfigGuard {
            data_dir: tmp_data_dir,
        },
    ))
}

async fn wait_healthy(client: &reqwest::Client, base_url: &Url) -> Result<()> {
    let url = base_url.join("health")?;
    for _ in 0..50 {
        if let Ok(response) = client.get(url.clone()).send().await {
            if response.status().is_success() {
                return Ok(());
            }
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    Err(anyhow!("Server did not become healthy"))
}

/// Builds state, spawns the server and returns a cookie-holding client,
/// already logged in as the given user (unless `TestUser::None`).
pub async fn launch_env(args: ServerConfig, user: TestUser) -> Result<(reqwest::Client, AppState)> {
    let state = build_state(&args).await?;
    let base_url = args.base_url.clone();

    let server_state = state.clone();
    tokio::spawn(async move {
        run_graceful_with_state(args, server_state, futures::future::pending())
            .await
            .unwrap();
    });

    let client = reqwest::Client::builder().cookie_store(true).build()?;
    wait_healthy(&client, &base_url).await?;

    if let Some((email, roles)) = user.credentials() {
        let user_registry = UserAccountRepository::new(state.pool().clone());
        let new_user = CreateUser {
            name: Some("Initial User".to_string()),
            email: email.parse().map_err(|e| anyhow!("Invalid email: {e}"))?,
            password: Some(TEST_PASSWORD.to_string()),
            roles,
        };
        user_registry.create(new_user).await?;
        rest::login(&client, &base_url, email, TEST_PASSWORD).await?;
    }

    Ok((client, state))
}
