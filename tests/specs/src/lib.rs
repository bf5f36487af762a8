// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Test harness for end-to-end session scenarios.
//!
//! Runs an in-process mock of the platform's auth endpoints and builds
//! real [`SessionManager`] instances against it, so the scenarios exercise
//! the full path: credential store on disk → transport → state machine.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Once};
use std::time::Duration;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use base64::Engine;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::net::TcpListener;

use skillwave::api;
use skillwave::session::{SessionConfig, SessionEvent, SessionManager};
use skillwave::store::CredentialStore;
use skillwave::transport::Transport;

static CRYPTO_INIT: Once = Once::new();

/// Install the ring crypto provider for reqwest/rustls.
/// Safe to call multiple times — only the first call has effect.
pub fn ensure_crypto() {
    CRYPTO_INIT.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}

/// Build an unsigned JWT expiring `ttl_secs` from now (negative = already
/// expired).
pub fn make_jwt(ttl_secs: i64) -> String {
    let b64 = |b: &[u8]| base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(b);
    let now = skillwave::token::now_epoch_secs() as i64;
    let payload = json!({
        "sub": "ada@example.com",
        "iat": now,
        "exp": now + ttl_secs,
    });
    format!(
        "{}.{}.{}",
        b64(br#"{"alg":"HS256","typ":"JWT"}"#),
        b64(payload.to_string().as_bytes()),
        b64(b"sig"),
    )
}

/// Scriptable in-process stand-in for the platform API.
pub struct MockPlatform {
    addr: SocketAddr,
    pub state: Arc<PlatformState>,
}

#[derive(Default)]
pub struct PlatformState {
    pub login_calls: AtomicU32,
    pub refresh_calls: AtomicU32,
    pub logout_calls: AtomicU32,
    pub profile_calls: AtomicU32,

    pub fail_login: AtomicBool,
    pub fail_refresh: AtomicBool,
    pub access_ttl_secs: AtomicU64,

    seq: AtomicU32,
    valid_access: Mutex<HashSet<String>>,
    valid_refresh: Mutex<HashSet<String>>,
    profile_name: Mutex<String>,
}

impl PlatformState {
    fn issue_access(&self) -> String {
        let ttl = self.access_ttl_secs.load(Ordering::SeqCst).max(1) as i64;
        let token = make_jwt(ttl);
        self.valid_access.lock().insert(token.clone());
        token
    }

    fn issue_refresh(&self) -> String {
        let token = format!("refresh-{}", self.seq.fetch_add(1, Ordering::SeqCst));
        self.valid_refresh.lock().insert(token.clone());
        token
    }

    fn authorized(&self, headers: &HeaderMap) -> bool {
        let bearer = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .unwrap_or_default();
        self.valid_access.lock().contains(bearer)
    }

    fn profile_body(&self) -> Value {
        json!({
            "id": 42,
            "name": *self.profile_name.lock(),
            "email": "ada@example.com",
            "emailVerified": true,
        })
    }

    /// Accept `token` on authenticated endpoints (e.g. an OAuth hand-off).
    pub fn seed_access(&self, token: &str) {
        self.valid_access.lock().insert(token.to_owned());
    }

    /// Make every previously issued access token stale.
    pub fn revoke_access_tokens(&self) {
        self.valid_access.lock().clear();
    }
}

async fn login(
    State(p): State<Arc<PlatformState>>,
    Json(_body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    p.login_calls.fetch_add(1, Ordering::SeqCst);
    if p.fail_login.load(Ordering::SeqCst) {
        return (StatusCode::UNAUTHORIZED, Json(json!({ "error": "Invalid email or password" })));
    }
    let access = p.issue_access();
    let refresh = p.issue_refresh();
    (
        StatusCode::OK,
        Json(json!({
            "accessToken": access,
            "refreshToken": refresh,
            "tokenType": "Bearer",
            "userId": 42,
        })),
    )
}

async fn refresh(
    State(p): State<Arc<PlatformState>>,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    p.refresh_calls.fetch_add(1, Ordering::SeqCst);
    if p.fail_refresh.load(Ordering::SeqCst) {
        return (StatusCode::UNAUTHORIZED, Json(json!({ "error": "Invalid refresh token" })));
    }
    let presented = body.get("refreshToken").and_then(|v| v.as_str()).unwrap_or_default();
    // Refresh tokens are single-use: rotate on success.
    if !p.valid_refresh.lock().remove(presented) {
        return (StatusCode::UNAUTHORIZED, Json(json!({ "error": "Invalid refresh token" })));
    }
    let access = p.issue_access();
    let refresh = p.issue_refresh();
    (StatusCode::OK, Json(json!({ "accessToken": access, "refreshToken": refresh })))
}

async fn logout(State(p): State<Arc<PlatformState>>) -> (StatusCode, Json<Value>) {
    p.logout_calls.fetch_add(1, Ordering::SeqCst);
    (StatusCode::OK, Json(json!({})))
}

async fn current_user(
    State(p): State<Arc<PlatformState>>,
    headers: HeaderMap,
) -> (StatusCode, Json<Value>) {
    p.profile_calls.fetch_add(1, Ordering::SeqCst);
    if !p.authorized(&headers) {
        return (StatusCode::UNAUTHORIZED, Json(json!({ "error": "Not authenticated" })));
    }
    (StatusCode::OK, Json(p.profile_body()))
}

async fn register(Json(body): Json<Value>) -> (StatusCode, Json<Value>) {
    let name = body.get("name").and_then(|v| v.as_str()).unwrap_or_default();
    let email = body.get("email").and_then(|v| v.as_str()).unwrap_or_default();
    if name.is_empty() || email.is_empty() {
        return (StatusCode::BAD_REQUEST, Json(json!({ "error": "name and email are required" })));
    }
    (
        StatusCode::OK,
        Json(json!({ "id": 43, "name": name, "email": email, "emailVerified": false })),
    )
}

async fn update_profile(
    State(p): State<Arc<PlatformState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    if !p.authorized(&headers) {
        return (StatusCode::UNAUTHORIZED, Json(json!({ "error": "Not authenticated" })));
    }
    if let Some(name) = body.get("name").and_then(|v| v.as_str()) {
        *p.profile_name.lock() = name.to_owned();
    }
    (StatusCode::OK, Json(p.profile_body()))
}

async fn change_password(
    State(p): State<Arc<PlatformState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    if !p.authorized(&headers) {
        return (StatusCode::UNAUTHORIZED, Json(json!({ "error": "Not authenticated" })));
    }
    if body.get("currentPassword").and_then(|v| v.as_str()).unwrap_or_default() != "pw" {
        return (StatusCode::BAD_REQUEST, Json(json!({ "error": "wrong password" })));
    }
    (StatusCode::OK, Json(json!({})))
}

async fn accepted(Json(_body): Json<Value>) -> (StatusCode, Json<Value>) {
    (StatusCode::OK, Json(json!({})))
}

impl MockPlatform {
    /// Start the mock on an ephemeral port.
    pub async fn spawn() -> anyhow::Result<Self> {
        ensure_crypto();
        let state = Arc::new(PlatformState::default());
        state.access_ttl_secs.store(3_600, Ordering::SeqCst);
        *state.profile_name.lock() = "Ada Lovelace".to_owned();

        let app = Router::new()
            .route(api::LOGIN, post(login))
            .route(api::REFRESH, post(refresh))
            .route(api::LOGOUT, post(logout))
            .route(api::CURRENT_USER, get(current_user))
            .route(api::REGISTER, post(register))
            .route(api::PROFILE, put(update_profile))
            .route(api::CHANGE_PASSWORD, put(change_password))
            .route(api::FORGOT_PASSWORD, post(accepted))
            .route(api::RESET_PASSWORD, post(accepted))
            .with_state(Arc::clone(&state));

        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });

        Ok(Self { addr, state })
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// A session manager whose credential store lives at `path`, the way a
    /// fresh client process would build one.
    pub fn manager(
        &self,
        path: &Path,
    ) -> anyhow::Result<(Arc<SessionManager>, tokio::sync::broadcast::Receiver<SessionEvent>)>
    {
        let store = Arc::new(CredentialStore::open(path));
        let transport =
            Arc::new(Transport::new(&self.base_url(), Duration::from_secs(2), Arc::clone(&store))?);
        Ok(SessionManager::new(SessionConfig {
            store,
            transport,
            refresh_margin_secs: 300,
            refresh_interval: Duration::from_secs(300),
        }))
    }

    /// A typed API handle over a throwaway in-memory store.
    pub fn auth_api(&self) -> anyhow::Result<(api::AuthApi, Arc<CredentialStore>)> {
        let store = Arc::new(CredentialStore::in_memory());
        let transport =
            Arc::new(Transport::new(&self.base_url(), Duration::from_secs(2), Arc::clone(&store))?);
        Ok((api::AuthApi::new(transport), store))
    }
}
