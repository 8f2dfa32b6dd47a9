//! Integration tests for the sortie server

use sortie::auth::{CredentialStore, InMemoryCredentialStore};
use sortie::configuration::{ApplicationSettings, DatabaseSettings, JwtSettings, Settings};
use sortie::startup::run;
use sqlx::postgres::PgPoolOptions;
use std::net::TcpListener;
use std::sync::Arc;

fn spawn_app() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").expect("Failed to bind random port");
    let port = listener.local_addr().unwrap().port();

    let settings = Settings {
        database: DatabaseSettings {
            username: "postgres".to_string(),
            password: "password".to_string(),
            port: 5432,
            host: "127.0.0.1".to_string(),
            database_name: "sortie_test".to_string(),
            max_connections: 1,
        },
        application: ApplicationSettings {
            port: 0,
            host: "127.0.0.1".to_string(),
            allowed_origin: "http://localhost:3000".to_string(),
            secure_cookies: false,
        },
        jwt: JwtSettings {
            access_secret: "health-access-secret-0123456789abcdef".to_string(),
            refresh_secret: "health-refresh-secret-0123456789abcdef".to_string(),
            access_token_expiry: 900,
            refresh_token_expiry: 604800,
            issuer: "sortie-test".to_string(),
        },
    };
    let pool = PgPoolOptions::new()
        .connect_lazy(&settings.database.connection_string())
        .expect("Failed to create lazy pool");
    let store: Arc<dyn CredentialStore> = Arc::new(InMemoryCredentialStore::new());

    let server = run(listener, pool, store, &settings).expect("Failed to create server");

    let _ = tokio::spawn(async move {
        let _ = server.await;
    });

    format!("http://127.0.0.1:{}", port)
}

#[tokio::test]
async fn health_check_works() {
    let addr = spawn_app();

    let response = reqwest::Client::new()
        .get(&format!("{}/health_check", addr))
        .send()
        .await
        .expect("Failed to execute request");

    assert!(response.status().is_success());
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn cors_preflight_allows_configured_origin_with_credentials() {
    let addr = spawn_app();

    let response = reqwest::Client::new()
        .request(reqwest::Method::OPTIONS, &format!("{}/auth/login", addr))
        .header("Origin", "http://localhost:3000")
        .header("Access-Control-Request-Method", "POST")
        .send()
        .await
        .expect("Failed to execute request");

    assert!(response.status().is_success());
    assert_eq!(
        response
            .headers()
            .get("access-control-allow-origin")
            .and_then(|h| h.to_str().ok()),
        Some("http://localhost:3000")
    );
    assert_eq!(
        response
            .headers()
            .get("access-control-allow-credentials")
            .and_then(|h| h.to_str().ok()),
        Some("true")
    );
}

#[tokio::test]
async fn malformed_json_body_returns_400_error_shape() {
    let addr = spawn_app();

    let response = reqwest::Client::new()
        .post(&format!("{}/auth/login", addr))
        .header("Content-Type", "application/json")
        .body("{not json")
        .send()
        .await
        .expect("Failed to execute request");

    assert_eq!(400, response.status().as_u16());
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["code"], "VALIDATION_ERROR");
}
