use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use sortie::auth::{CredentialStore, InMemoryCredentialStore, TokenKind, TokenService};
use sortie::configuration::{ApplicationSettings, DatabaseSettings, JwtSettings, Settings};
use sortie::error::AppError;
use sortie::models::{NewUser, User};
use sortie::startup::run;
use sqlx::postgres::PgPoolOptions;
use std::net::TcpListener;
use std::sync::Arc;
use uuid::Uuid;

pub struct TestApp {
    pub address: String,
    pub store: Arc<InMemoryCredentialStore>,
    pub jwt: JwtSettings,
}

fn test_settings() -> Settings {
    Settings {
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
            access_secret: "integration-access-secret-0123456789abcdef".to_string(),
            refresh_secret: "integration-refresh-secret-0123456789abcdef".to_string(),
            access_token_expiry: 900,
            refresh_token_expiry: 604800,
            issuer: "sortie-test".to_string(),
        },
    }
}

// Auth routes only touch the credential store, so the pool never connects
fn serve(store: Arc<dyn CredentialStore>, settings: &Settings) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").expect("Failed to bind random port");
    let port = listener.local_addr().unwrap().port();

    let pool = PgPoolOptions::new()
        .connect_lazy(&settings.database.connection_string())
        .expect("Failed to create lazy pool");

    let server = run(listener, pool, store, settings).expect("Failed to bind address");
    let _ = tokio::spawn(server);

    format!("http://127.0.0.1:{}", port)
}

fn spawn_app() -> TestApp {
    let settings = test_settings();
    let store = Arc::new(InMemoryCredentialStore::new());
    let address = serve(store.clone(), &settings);

    TestApp {
        address,
        store,
        jwt: settings.jwt,
    }
}

/// Store whose database has gone away
struct UnreachableStore;

fn unreachable() -> AppError {
    sqlx::Error::PoolTimedOut.into()
}

#[async_trait]
impl CredentialStore for UnreachableStore {
    async fn find_by_id(&self, _: Uuid) -> Result<Option<User>, AppError> {
        Err(unreachable())
    }

    async fn find_by_email(&self, _: &str) -> Result<Option<User>, AppError> {
        Err(unreachable())
    }

    async fn insert(&self, _: NewUser) -> Result<User, AppError> {
        Err(unreachable())
    }

    async fn delete(&self, _: Uuid) -> Result<bool, AppError> {
        Err(unreachable())
    }

    async fn revoke_refresh_token(
        &self,
        _: &str,
        _: Uuid,
        _: DateTime<Utc>,
    ) -> Result<(), AppError> {
        Err(unreachable())
    }

    async fn is_refresh_token_revoked(&self, _: &str) -> Result<bool, AppError> {
        Err(unreachable())
    }

    async fn purge_expired_revocations(&self) -> Result<u64, AppError> {
        Err(unreachable())
    }
}

struct Session {
    user_id: Uuid,
    access: String,
    refresh: String,
}

fn cookie_value(response: &reqwest::Response, name: &str) -> Option<String> {
    let prefix = format!("{}=", name);
    response
        .headers()
        .get_all(reqwest::header::SET_COOKIE)
        .iter()
        .filter_map(|h| h.to_str().ok())
        .find(|h| h.starts_with(&prefix))
        .map(|h| h[prefix.len()..].split(';').next().unwrap_or("").to_string())
}

fn set_cookie_header(response: &reqwest::Response, name: &str) -> Option<String> {
    let prefix = format!("{}=", name);
    response
        .headers()
        .get_all(reqwest::header::SET_COOKIE)
        .iter()
        .filter_map(|h| h.to_str().ok())
        .find(|h| h.starts_with(&prefix))
        .map(str::to_string)
}

fn signup_body(email: &str) -> Value {
    json!({
        "email": email,
        "firstname": "John",
        "lastname": "Doe",
        "password": "SecurePass123",
        "confirmation": "SecurePass123",
        "city": "Lyon"
    })
}

async fn signup_and_login(app: &TestApp, email: &str) -> Session {
    let client = reqwest::Client::new();

    let response = client
        .post(&format!("{}/auth/signup", &app.address))
        .json(&signup_body(email))
        .send()
        .await
        .expect("Failed to execute request.");
    assert_eq!(201, response.status().as_u16());

    let response = client
        .post(&format!("{}/auth/login", &app.address))
        .json(&json!({ "email": email, "password": "SecurePass123" }))
        .send()
        .await
        .expect("Failed to execute request.");
    assert_eq!(200, response.status().as_u16());

    let access = cookie_value(&response, "token").expect("missing access cookie");
    let refresh = cookie_value(&response, "refresh_token").expect("missing refresh cookie");
    let body: Value = response.json().await.expect("Failed to parse response");
    let user_id = body["user"]["id"]
        .as_str()
        .and_then(|id| Uuid::parse_str(id).ok())
        .expect("missing user id");

    Session {
        user_id,
        access,
        refresh,
    }
}

/// Access token for `user_id` that expired a minute ago, signed with the live key
fn expired_access_token(app: &TestApp, user_id: Uuid) -> String {
    let settings = JwtSettings {
        access_token_expiry: -60,
        ..app.jwt.clone()
    };
    TokenService::new(&settings)
        .issue(user_id, TokenKind::Access)
        .expect("Failed to sign token")
}

async fn get_me(app: &TestApp, cookie: &str) -> reqwest::Response {
    reqwest::Client::new()
        .get(&format!("{}/api/me", &app.address))
        .header(reqwest::header::COOKIE, cookie)
        .send()
        .await
        .expect("Failed to execute request.")
}

// --- Signup ---

#[tokio::test]
async fn signup_returns_201_without_password_hash() {
    let app = spawn_app();

    let response = reqwest::Client::new()
        .post(&format!("{}/auth/signup", &app.address))
        .json(&signup_body("John@Example.com"))
        .send()
        .await
        .expect("Failed to execute request.");

    assert_eq!(201, response.status().as_u16());
    let body: Value = response.json().await.expect("Failed to parse response");
    assert_eq!(body["email"], "john@example.com");
    assert_eq!(body["firstname"], "John");
    assert!(body.get("password_hash").is_none());
    assert!(body.get("password").is_none());
}

#[tokio::test]
async fn signup_reports_every_validation_error() {
    let app = spawn_app();

    let response = reqwest::Client::new()
        .post(&format!("{}/auth/signup", &app.address))
        .json(&json!({
            "email": "not-an-email",
            "password": "weak",
            "confirmation": "different"
        }))
        .send()
        .await
        .expect("Failed to execute request.");

    assert_eq!(400, response.status().as_u16());
    let body: Value = response.json().await.expect("Failed to parse response");
    let details = body["details"].as_array().expect("missing details");
    // firstname, lastname, email format, password strength, confirmation
    assert_eq!(details.len(), 5, "unexpected details: {:?}", details);
}

#[tokio::test]
async fn signup_rejects_duplicate_email() {
    let app = spawn_app();
    let client = reqwest::Client::new();

    signup_and_login(&app, "dup@example.com").await;

    let response = client
        .post(&format!("{}/auth/signup", &app.address))
        .json(&signup_body("dup@example.com"))
        .send()
        .await
        .expect("Failed to execute request.");

    assert_eq!(400, response.status().as_u16());
    let body: Value = response.json().await.expect("Failed to parse response");
    assert_eq!(body["details"], json!(["email is already used"]));
}

#[tokio::test]
async fn email_with_underscores_and_dashes_can_register_and_log_in() {
    let app = spawn_app();

    for email in ["wasp_fan@example.com", "jean--luc@example.com"] {
        let session = signup_and_login(&app, email).await;
        let response = get_me(&app, &format!("token={}", session.access)).await;

        assert_eq!(200, response.status().as_u16());
        let body: Value = response.json().await.expect("Failed to parse response");
        assert_eq!(body["email"], email);
    }
}

// --- Login ---

#[tokio::test]
async fn login_sets_http_only_session_cookies() {
    let app = spawn_app();
    let client = reqwest::Client::new();

    client
        .post(&format!("{}/auth/signup", &app.address))
        .json(&signup_body("cookie@example.com"))
        .send()
        .await
        .expect("Failed to execute request.");

    let response = client
        .post(&format!("{}/auth/login", &app.address))
        .json(&json!({ "email": "cookie@example.com", "password": "SecurePass123" }))
        .send()
        .await
        .expect("Failed to execute request.");

    assert_eq!(200, response.status().as_u16());
    for name in ["token", "refresh_token"] {
        let header = set_cookie_header(&response, name).expect("missing cookie");
        assert!(header.contains("HttpOnly"), "{} not HttpOnly: {}", name, header);
        assert!(header.contains("SameSite=Lax"), "{} not SameSite=Lax: {}", name, header);
        assert!(header.contains("Path=/"), "{} has no path: {}", name, header);
    }

    let body: Value = response.json().await.expect("Failed to parse response");
    assert_eq!(body["token_type"], "Bearer");
    assert_eq!(body["expires_in"], 900);
    assert_eq!(body["user"]["email"], "cookie@example.com");
    assert!(body.get("access_token").is_none());
}

#[tokio::test]
async fn login_failures_are_indistinguishable() {
    let app = spawn_app();
    let client = reqwest::Client::new();

    signup_and_login(&app, "known@example.com").await;

    let mut bodies = Vec::new();
    for (email, password) in [
        ("known@example.com", "WrongPass123"),
        ("unknown@example.com", "SecurePass123"),
    ] {
        let response = client
            .post(&format!("{}/auth/login", &app.address))
            .json(&json!({ "email": email, "password": password }))
            .send()
            .await
            .expect("Failed to execute request.");

        assert_eq!(401, response.status().as_u16());
        assert!(set_cookie_header(&response, "token").is_none());
        let body: Value = response.json().await.expect("Failed to parse response");
        bodies.push((body["code"].clone(), body["message"].clone()));
    }

    assert_eq!(bodies[0], bodies[1]);
}

// --- Access gate ---

#[tokio::test]
async fn protected_route_without_credentials_returns_401() {
    let app = spawn_app();

    let response = reqwest::Client::new()
        .get(&format!("{}/api/me", &app.address))
        .send()
        .await
        .expect("Failed to execute request.");

    assert_eq!(401, response.status().as_u16());
    let body: Value = response.json().await.expect("Failed to parse response");
    assert_eq!(body, json!({ "error": "Unauthorized", "code": "UNAUTHORIZED" }));
    assert_eq!(app.store.lookup_count(), 0);
}

#[tokio::test]
async fn valid_access_cookie_is_accepted_without_refresh() {
    let app = spawn_app();
    let session = signup_and_login(&app, "valid@example.com").await;

    let response = get_me(&app, &format!("token={}", session.access)).await;

    assert_eq!(200, response.status().as_u16());
    assert!(set_cookie_header(&response, "token").is_none());
    let body: Value = response.json().await.expect("Failed to parse response");
    assert_eq!(body["email"], "valid@example.com");
}

#[tokio::test]
async fn bearer_header_is_accepted() {
    let app = spawn_app();
    let session = signup_and_login(&app, "bearer@example.com").await;

    let response = reqwest::Client::new()
        .get(&format!("{}/api/me", &app.address))
        .bearer_auth(&session.access)
        .send()
        .await
        .expect("Failed to execute request.");

    assert_eq!(200, response.status().as_u16());
}

#[tokio::test]
async fn expired_access_token_is_refreshed() {
    let app = spawn_app();
    let session = signup_and_login(&app, "refresh@example.com").await;
    let expired = expired_access_token(&app, session.user_id);

    let response = get_me(
        &app,
        &format!("token={}; refresh_token={}", expired, session.refresh),
    )
    .await;

    assert_eq!(200, response.status().as_u16());
    let new_access = cookie_value(&response, "token").expect("missing refreshed cookie");
    assert_ne!(new_access, expired);

    // The new cookie works on its own
    let response = get_me(&app, &format!("token={}", new_access)).await;
    assert_eq!(200, response.status().as_u16());
}

#[tokio::test]
async fn missing_access_token_is_refreshed_from_refresh_cookie() {
    let app = spawn_app();
    let session = signup_and_login(&app, "norefresh@example.com").await;

    let response = get_me(&app, &format!("refresh_token={}", session.refresh)).await;

    assert_eq!(200, response.status().as_u16());
    assert!(cookie_value(&response, "token").is_some());
}

#[tokio::test]
async fn expired_access_token_without_refresh_returns_401() {
    let app = spawn_app();
    let session = signup_and_login(&app, "expired@example.com").await;
    let expired = expired_access_token(&app, session.user_id);

    let response = get_me(&app, &format!("token={}", expired)).await;

    assert_eq!(401, response.status().as_u16());
}

#[tokio::test]
async fn tampered_access_token_is_not_refreshed() {
    let app = spawn_app();
    let session = signup_and_login(&app, "tamper@example.com").await;

    let response = get_me(
        &app,
        &format!("token={}x; refresh_token={}", session.access, session.refresh),
    )
    .await;

    assert_eq!(401, response.status().as_u16());
    assert!(set_cookie_header(&response, "token").is_none());
}

#[tokio::test]
async fn refresh_token_used_as_access_token_is_rejected() {
    let app = spawn_app();
    let session = signup_and_login(&app, "swap@example.com").await;

    let response = get_me(&app, &format!("token={}", session.refresh)).await;

    assert_eq!(401, response.status().as_u16());
}

#[tokio::test]
async fn deleted_user_cannot_refresh() {
    let app = spawn_app();
    let session = signup_and_login(&app, "gone@example.com").await;

    let response = reqwest::Client::new()
        .delete(&format!("{}/api/users/{}", &app.address, session.user_id))
        .header(reqwest::header::COOKIE, format!("token={}", session.access))
        .send()
        .await
        .expect("Failed to execute request.");
    assert_eq!(204, response.status().as_u16());

    let expired = expired_access_token(&app, session.user_id);
    let response = get_me(
        &app,
        &format!("token={}; refresh_token={}", expired, session.refresh),
    )
    .await;

    assert_eq!(401, response.status().as_u16());
}

#[tokio::test]
async fn store_outage_during_refresh_is_a_server_error_not_a_401() {
    let settings = test_settings();
    let address = serve(Arc::new(UnreachableStore), &settings);
    let refresh = TokenService::new(&settings.jwt)
        .issue(Uuid::new_v4(), TokenKind::Refresh)
        .expect("Failed to sign token");

    let response = reqwest::Client::new()
        .get(&format!("{}/api/me", address))
        .header(reqwest::header::COOKIE, format!("refresh_token={}", refresh))
        .send()
        .await
        .expect("Failed to execute request.");

    assert_eq!(503, response.status().as_u16());
    assert!(set_cookie_header(&response, "token").is_none());
    let body: Value = response.json().await.expect("Failed to parse response");
    assert_eq!(body["code"], "SERVICE_UNAVAILABLE");
}

#[tokio::test]
async fn cannot_delete_another_account() {
    let app = spawn_app();
    let alice = signup_and_login(&app, "alice@example.com").await;
    let bob = signup_and_login(&app, "bob@example.com").await;

    let response = reqwest::Client::new()
        .delete(&format!("{}/api/users/{}", &app.address, bob.user_id))
        .header(reqwest::header::COOKIE, format!("token={}", alice.access))
        .send()
        .await
        .expect("Failed to execute request.");

    assert_eq!(403, response.status().as_u16());
}

// --- Logout ---

#[tokio::test]
async fn logout_clears_cookies_and_revokes_refresh_token() {
    let app = spawn_app();
    let session = signup_and_login(&app, "logout@example.com").await;

    let response = reqwest::Client::new()
        .post(&format!("{}/auth/logout", &app.address))
        .header(
            reqwest::header::COOKIE,
            format!("token={}; refresh_token={}", session.access, session.refresh),
        )
        .send()
        .await
        .expect("Failed to execute request.");

    assert_eq!(200, response.status().as_u16());
    assert_eq!(cookie_value(&response, "token").as_deref(), Some(""));
    assert_eq!(cookie_value(&response, "refresh_token").as_deref(), Some(""));

    let expired = expired_access_token(&app, session.user_id);
    let response = get_me(
        &app,
        &format!("token={}; refresh_token={}", expired, session.refresh),
    )
    .await;

    assert_eq!(401, response.status().as_u16());
}

#[tokio::test]
async fn logout_without_session_still_succeeds() {
    let app = spawn_app();

    let response = reqwest::Client::new()
        .post(&format!("{}/auth/logout", &app.address))
        .send()
        .await
        .expect("Failed to execute request.");

    assert_eq!(200, response.status().as_u16());
}

// --- Malformed requests ---

async fn assert_json_400(response: reqwest::Response) {
    assert_eq!(400, response.status().as_u16());
    let body: Value = response.json().await.expect("Failed to parse response");
    assert_eq!(body["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn malformed_search_query_returns_json_400() {
    let app = spawn_app();
    let session = signup_and_login(&app, "search@example.com").await;

    let response = reqwest::Client::new()
        .get(&format!("{}/api/events/search?start=x", &app.address))
        .header(reqwest::header::COOKIE, format!("token={}", session.access))
        .send()
        .await
        .expect("Failed to execute request.");

    assert_json_400(response).await;
}

#[tokio::test]
async fn malformed_path_id_returns_json_400() {
    let app = spawn_app();
    let session = signup_and_login(&app, "path@example.com").await;

    let response = reqwest::Client::new()
        .get(&format!("{}/api/users/not-a-uuid", &app.address))
        .header(reqwest::header::COOKIE, format!("token={}", session.access))
        .send()
        .await
        .expect("Failed to execute request.");

    assert_json_400(response).await;
}

#[tokio::test]
async fn malformed_participant_body_is_rejected_not_treated_as_join() {
    let app = spawn_app();
    let session = signup_and_login(&app, "joiner@example.com").await;

    let response = reqwest::Client::new()
        .post(&format!(
            "{}/api/events/{}/participants",
            &app.address,
            Uuid::new_v4()
        ))
        .header(reqwest::header::COOKIE, format!("token={}", session.access))
        .header("Content-Type", "application/json")
        .body("{not json")
        .send()
        .await
        .expect("Failed to execute request.");

    assert_json_400(response).await;
}
