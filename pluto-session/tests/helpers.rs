//! Integration test helpers
//!
//! Spawns a stub identity service on an ephemeral port that speaks the same
//! `/auth/*` contract as the gateway.

#![allow(dead_code)]

use axum::{
    extract::State,
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use parking_lot::Mutex;
use pluto_core::{PlutoConfig, StorageBackend};
use pluto_session::{HttpAuthApi, KeyValueStore, MemoryStore, SessionManager};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, LazyLock};
use tokio::net::TcpListener;
use uuid::Uuid;

// Ensure tracing is only initialized once
static TRACING: LazyLock<()> = LazyLock::new(|| {
    if std::env::var("TEST_LOG").is_ok() {
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_test_writer()
            .finish();
        tracing::subscriber::set_global_default(subscriber).ok();
    } else {
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::WARN)
            .with_writer(std::io::sink)
            .finish();
        tracing::subscriber::set_global_default(subscriber).ok();
    }
});

pub const ADMIN_EMAIL: &str = "admin@pluto.ai";
pub const ADMIN_PASSWORD: &str = "admin123";
pub const RESET_TOKEN: &str = "reset-token-123";

#[derive(Default)]
struct StubState {
    /// email -> (password, user json)
    accounts: HashMap<String, (String, Value)>,
    /// token -> email
    tokens: HashMap<String, String>,
    hits: HashMap<String, usize>,
    /// Forced status for GET /auth/me
    me_override: Option<StatusCode>,
    /// Forced status for POST /auth/refresh
    refresh_override: Option<StatusCode>,
    expires_in: i64,
}

type SharedStub = Arc<Mutex<StubState>>;

/// Running stub service plus a store shared by every manager it hands out
pub struct TestApp {
    pub address: String,
    pub port: u16,
    pub store: MemoryStore,
    stub: SharedStub,
}

impl TestApp {
    /// Config pointing at the stub, with in-memory storage
    pub fn config(&self) -> PlutoConfig {
        let mut config = PlutoConfig::default();
        config.api.base_url = self.address.clone();
        config.api.timeout_seconds = 5;
        config.storage.backend = StorageBackend::Memory;
        config
    }

    /// A fresh manager over the shared store, as after an app restart
    pub fn session(&self) -> SessionManager {
        let api = HttpAuthApi::new(&self.config().api).expect("Failed to create auth client");
        SessionManager::new(Arc::new(api), Arc::new(self.store.clone()))
    }

    /// Number of requests received on `path`
    pub fn hits(&self, path: &str) -> usize {
        self.stub.lock().hits.get(path).copied().unwrap_or(0)
    }

    pub fn total_hits(&self) -> usize {
        self.stub.lock().hits.values().sum()
    }

    pub fn force_me_status(&self, status: StatusCode) {
        self.stub.lock().me_override = Some(status);
    }

    pub fn force_refresh_status(&self, status: StatusCode) {
        self.stub.lock().refresh_override = Some(status);
    }

    pub fn set_expires_in(&self, seconds: i64) {
        self.stub.lock().expires_in = seconds;
    }

    /// Server-side revocation of every issued token
    pub fn revoke_all_tokens(&self) {
        self.stub.lock().tokens.clear();
    }

    /// Change a stored account's quota usage, as the gateway would after requests
    pub fn set_quota_used(&self, email: &str, used: i64) {
        if let Some((_, user)) = self.stub.lock().accounts.get_mut(email) {
            user["quota_used"] = json!(used);
        }
    }

    pub fn stored(&self, key: &str) -> Option<String> {
        self.store.get(key).expect("Memory store never fails")
    }
}

pub async fn spawn_app() -> TestApp {
    LazyLock::force(&TRACING);

    let stub: SharedStub = Arc::new(Mutex::new(StubState {
        expires_in: 1800,
        ..Default::default()
    }));
    stub.lock().accounts.insert(
        ADMIN_EMAIL.to_string(),
        (
            ADMIN_PASSWORD.to_string(),
            user_json("admin-1", ADMIN_EMAIL, "Admin", "User", "admin", 100_000),
        ),
    );

    let app = Router::new()
        .route("/auth/login", post(login))
        .route("/auth/register", post(register))
        .route("/auth/me", get(me))
        .route("/auth/quota", get(quota))
        .route("/auth/refresh", post(refresh))
        .route("/auth/reset-password", post(reset_password))
        .route("/auth/reset-password/confirm", post(confirm_reset))
        .with_state(stub.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    TestApp {
        address: format!("http://127.0.0.1:{}", port),
        port,
        store: MemoryStore::new(),
        stub,
    }
}

/// Test account data
pub struct TestUser {
    pub email: String,
    pub password: String,
    pub first_name: String,
    pub last_name: String,
}

impl TestUser {
    pub fn generate() -> Self {
        let id = Uuid::new_v4().to_string();
        Self {
            email: format!("test_{}@example.com", &id[..8]),
            password: "test_password_123".to_string(),
            first_name: "Test".to_string(),
            last_name: format!("User {}", &id[..8]),
        }
    }
}

fn user_json(id: &str, email: &str, first: &str, last: &str, role: &str, limit: i64) -> Value {
    json!({
        "id": id,
        "email": email,
        "first_name": first,
        "last_name": last,
        "role": role,
        "organization_id": null,
        "api_key": null,
        "quota_limit": limit,
        "quota_used": 0,
        "is_active": true,
        "created_at": "2024-05-01T12:00:00Z"
    })
}

fn detail(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "detail": message }))).into_response()
}

fn record_hit(state: &mut StubState, path: &str) {
    *state.hits.entry(path.to_string()).or_default() += 1;
}

fn bearer(headers: &HeaderMap) -> Option<String> {
    headers
        .get(AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::to_string)
}

fn issue_token(state: &mut StubState, email: &str) -> Value {
    let token = format!("tok-{}", Uuid::new_v4());
    state.tokens.insert(token.clone(), email.to_string());
    let user = state.accounts[email].1.clone();
    json!({
        "access_token": token,
        "token_type": "bearer",
        "expires_in": state.expires_in,
        "user": user
    })
}

/// Resolve the caller's account, or the 401 the gateway would send
fn authenticate(state: &StubState, headers: &HeaderMap) -> Result<String, Response> {
    bearer(headers)
        .and_then(|token| state.tokens.get(&token).cloned())
        .ok_or_else(|| {
            detail(
                StatusCode::UNAUTHORIZED,
                "Invalid authentication credentials",
            )
        })
}

async fn login(State(stub): State<SharedStub>, Json(body): Json<Value>) -> Response {
    let mut state = stub.lock();
    record_hit(&mut state, "/auth/login");

    let email = body["email"].as_str().unwrap_or_default().to_string();
    let password = body["password"].as_str().unwrap_or_default();

    let valid = matches!(state.accounts.get(&email), Some((expected, _)) if expected == password);
    if !valid {
        return detail(StatusCode::UNAUTHORIZED, "Invalid credentials");
    }

    let response = issue_token(&mut state, &email);
    Json(response).into_response()
}

async fn register(State(stub): State<SharedStub>, Json(body): Json<Value>) -> Response {
    let mut state = stub.lock();
    record_hit(&mut state, "/auth/register");

    let email = body["email"].as_str().unwrap_or_default().to_string();
    if state.accounts.contains_key(&email) {
        return detail(StatusCode::BAD_REQUEST, "Email already registered");
    }

    let user = user_json(
        &Uuid::new_v4().to_string(),
        &email,
        body["first_name"].as_str().unwrap_or_default(),
        body["last_name"].as_str().unwrap_or_default(),
        "user",
        1000,
    );
    let password = body["password"].as_str().unwrap_or_default().to_string();
    state.accounts.insert(email.clone(), (password, user));

    let response = issue_token(&mut state, &email);
    (StatusCode::CREATED, Json(response)).into_response()
}

async fn me(State(stub): State<SharedStub>, headers: HeaderMap) -> Response {
    let mut state = stub.lock();
    record_hit(&mut state, "/auth/me");

    if let Some(status) = state.me_override {
        return detail(status, "Forced failure");
    }

    match authenticate(&state, &headers) {
        Ok(email) => Json(state.accounts[&email].1.clone()).into_response(),
        Err(response) => response,
    }
}

async fn quota(State(stub): State<SharedStub>, headers: HeaderMap) -> Response {
    let mut state = stub.lock();
    record_hit(&mut state, "/auth/quota");

    let email = match authenticate(&state, &headers) {
        Ok(email) => email,
        Err(response) => return response,
    };

    let user = &state.accounts[&email].1;
    let limit = user["quota_limit"].as_i64().unwrap_or_default();
    let used = user["quota_used"].as_i64().unwrap_or_default();
    let percentage = if limit > 0 {
        used as f64 / limit as f64 * 100.0
    } else {
        0.0
    };

    Json(json!({
        "quota_limit": limit,
        "quota_used": used,
        "quota_remaining": (limit - used).max(0),
        "usage_percentage": percentage
    }))
    .into_response()
}

async fn refresh(State(stub): State<SharedStub>, headers: HeaderMap) -> Response {
    let mut state = stub.lock();
    record_hit(&mut state, "/auth/refresh");

    if let Some(status) = state.refresh_override {
        return detail(status, "Forced failure");
    }

    match authenticate(&state, &headers) {
        Ok(email) => {
            let response = issue_token(&mut state, &email);
            Json(response).into_response()
        }
        Err(response) => response,
    }
}

async fn reset_password(State(stub): State<SharedStub>, Json(_body): Json<Value>) -> Response {
    let mut state = stub.lock();
    record_hit(&mut state, "/auth/reset-password");

    // Same answer whether or not the account exists
    Json(json!({ "message": "Password reset email sent" })).into_response()
}

async fn confirm_reset(State(stub): State<SharedStub>, Json(body): Json<Value>) -> Response {
    let mut state = stub.lock();
    record_hit(&mut state, "/auth/reset-password/confirm");

    if body["token"].as_str() != Some(RESET_TOKEN) {
        return detail(StatusCode::BAD_REQUEST, "Invalid or expired reset token");
    }
    if body["new_password"].as_str().unwrap_or_default().is_empty() {
        let body = json!({ "detail": [
            { "loc": ["body", "new_password"], "msg": "field required", "type": "missing" }
        ]});
        return (StatusCode::UNPROCESSABLE_ENTITY, Json(body)).into_response();
    }

    Json(json!({ "message": "Password reset successfully" })).into_response()
}
