// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The session state machine.
//!
//! Owns authentication status and the current user profile, orchestrates
//! login, logout, silent refresh, startup resumption, and the cascade of
//! side effects when credentials stop working. It is the sole writer of
//! the credential store during normal operation and the only authority
//! that may react to the request pipeline's unauthorized signal.
//!
//! Concurrency model: operations may interleave at await points but each
//! operation class (login, refresh, logout) runs single-flight behind its
//! own gate. Concurrent triggers join the in-progress outcome instead of
//! issuing duplicate network calls. Refresh tokens are typically
//! single-use or rate-limited server-side, so duplicate concurrent
//! refreshes are a bug class to prevent, not tolerate. A generation
//! counter serializes credential writes: any network result that resolves
//! after the session moved on is discarded, never applied.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::api::{AuthApi, TokenResponse, UserProfile};
use crate::error::AuthError;
use crate::store::{self, CredentialStore};
use crate::token;
use crate::transport::{decode_json, Auth, Transport};

/// Authentication status.
///
/// `RefreshFailed` is transient: entering it resolves to `Anonymous`
/// within the same transition, so a snapshot never observes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Anonymous,
    Authenticating,
    Authenticated,
    RefreshFailed,
}

/// Why a session ended without an explicit logout. Lets a UI say
/// "your session expired" instead of silently landing on the login page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpiryReason {
    /// The refresh token was rejected by the platform.
    RefreshRejected,
    /// An authenticated request was rejected and recovery failed.
    Unauthorized,
    /// Startup resumption from stored credentials failed.
    ResumeFailed,
}

/// Events broadcast to consumers on every status change.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// A session was established (interactive login, OAuth token hand-off,
    /// or startup resumption).
    LoggedIn { user: UserProfile },
    /// A silent refresh minted a new access token.
    Refreshed,
    /// The session ended for a reason other than an explicit logout.
    Expired { reason: ExpiryReason },
    /// An explicit `logout()` completed.
    LoggedOut,
}

/// Point-in-time view of the session. `user` is present exactly when
/// `status` is `Authenticated`.
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub status: Status,
    pub user: Option<UserProfile>,
}

struct SessionState {
    status: Status,
    user: Option<UserProfile>,
}

/// Constructor inputs for [`SessionManager`].
pub struct SessionConfig {
    pub store: Arc<CredentialStore>,
    pub transport: Arc<Transport>,
    /// Seconds before expiry at which a token counts as expiring.
    pub refresh_margin_secs: u64,
    /// Interval between periodic expiry checks.
    pub refresh_interval: Duration,
}

/// The session manager. Create with [`SessionManager::new`], reconstruct
/// persisted state with [`resume`](Self::resume), release resources with
/// [`teardown`](Self::teardown).
pub struct SessionManager {
    state: RwLock<SessionState>,
    store: Arc<CredentialStore>,
    transport: Arc<Transport>,
    api: AuthApi,
    event_tx: broadcast::Sender<SessionEvent>,

    // One gate per operation class; see the module docs.
    login_gate: tokio::sync::Mutex<()>,
    refresh_gate: tokio::sync::Mutex<()>,
    logout_gate: tokio::sync::Mutex<()>,

    /// Bumped whenever the session is torn down or replaced. Credential
    /// writes check it and discard stale results.
    generation: AtomicU64,
    /// Bumped after every completed refresh attempt; waiters that queued
    /// behind an in-progress refresh adopt its outcome instead of
    /// re-issuing the call.
    refresh_epoch: AtomicU64,
    last_refresh: parking_lot::Mutex<Option<Result<(), AuthError>>>,
    /// Ensures at most one `Expired` notification fires per cascade,
    /// re-armed by the next successful login.
    expiry_notified: AtomicBool,

    refresh_margin_secs: u64,
    refresh_interval: Duration,
    timer: parking_lot::Mutex<Option<CancellationToken>>,
    shutdown: CancellationToken,
}

impl SessionManager {
    pub fn new(config: SessionConfig) -> (Arc<Self>, broadcast::Receiver<SessionEvent>) {
        let (event_tx, event_rx) = broadcast::channel(64);
        let api = AuthApi::new(Arc::clone(&config.transport));

        let manager = Arc::new(Self {
            state: RwLock::new(SessionState { status: Status::Anonymous, user: None }),
            store: config.store,
            transport: config.transport,
            api,
            event_tx,
            login_gate: tokio::sync::Mutex::new(()),
            refresh_gate: tokio::sync::Mutex::new(()),
            logout_gate: tokio::sync::Mutex::new(()),
            generation: AtomicU64::new(0),
            refresh_epoch: AtomicU64::new(0),
            last_refresh: parking_lot::Mutex::new(None),
            expiry_notified: AtomicBool::new(false),
            refresh_margin_secs: config.refresh_margin_secs,
            refresh_interval: config.refresh_interval,
            timer: parking_lot::Mutex::new(None),
            shutdown: CancellationToken::new(),
        });

        (manager, event_rx)
    }

    // -- Observation --------------------------------------------------------

    /// Current status and user.
    pub fn status(&self) -> SessionSnapshot {
        let state = self.state.read();
        SessionSnapshot { status: state.status, user: state.user.clone() }
    }

    pub fn is_authenticated(&self) -> bool {
        self.state.read().status == Status::Authenticated
    }

    /// Subscribe to status-change notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.event_tx.subscribe()
    }

    fn authenticated_user(&self) -> Option<UserProfile> {
        let state = self.state.read();
        match state.status {
            Status::Authenticated => state.user.clone(),
            _ => None,
        }
    }

    // -- Login --------------------------------------------------------------

    /// Interactive login. A second call issued while one is in flight
    /// joins the first: only one network login happens and both callers
    /// observe the same resolved profile.
    ///
    /// On failure the session returns to `Anonymous` and no credential
    /// state is left behind.
    pub async fn login(
        self: &Arc<Self>,
        email: &str,
        password: &str,
    ) -> Result<UserProfile, AuthError> {
        let _gate = self.login_gate.lock().await;
        if let Some(user) = self.authenticated_user() {
            return Ok(user);
        }

        self.set_authenticating();
        let gen = self.generation.load(Ordering::SeqCst);

        match self.api.login(email, password).await {
            Ok(tokens) => self.establish(gen, tokens).await,
            Err(e) => {
                // Nothing was written; just fall back.
                self.revert_authenticating();
                Err(e)
            }
        }
    }

    /// OAuth redirect hook: adopt a token handed back by an external
    /// identity provider. Treated identically to a token obtained via
    /// [`login`](Self::login).
    pub async fn login_with_token(
        self: &Arc<Self>,
        access_token: &str,
        refresh_token: Option<&str>,
    ) -> Result<UserProfile, AuthError> {
        let _gate = self.login_gate.lock().await;

        self.set_authenticating();
        let gen = self.generation.load(Ordering::SeqCst);

        let tokens = TokenResponse {
            access_token: access_token.to_owned(),
            refresh_token: refresh_token.map(str::to_owned),
            token_type: None,
            user_id: None,
            name: None,
            email: None,
        };
        self.establish(gen, tokens).await
    }

    /// Store the tokens, fetch the profile, and enter `Authenticated`.
    async fn establish(
        self: &Arc<Self>,
        gen: u64,
        tokens: TokenResponse,
    ) -> Result<UserProfile, AuthError> {
        if !self.commit_tokens(gen, &tokens) {
            return Err(AuthError::Superseded);
        }

        match self.api.current_user().await {
            Ok(user) => {
                // A logout may have run while the profile fetch was in
                // flight; its result must not resurrect the session.
                if self.generation.load(Ordering::SeqCst) != gen {
                    return Err(AuthError::Superseded);
                }
                self.enter_authenticated(user.clone());
                Ok(user)
            }
            Err(e) => {
                // A just-minted token failed the profile fetch: terminal.
                // The caller holds the error, so no Expired broadcast.
                self.abandon_pending_session();
                Err(e)
            }
        }
    }

    // -- Startup resumption --------------------------------------------------

    /// Reconstruct the session from durable storage.
    ///
    /// A stored, non-expiring token resumes with a single profile fetch.
    /// An expiring token with a refresh token performs one silent refresh
    /// first. An expired token with no refresh token, or any failure on
    /// either path, clears storage and lands `Anonymous`.
    pub async fn resume(self: &Arc<Self>) -> SessionSnapshot {
        let Some(access) = self.store.get(store::ACCESS_TOKEN) else {
            return self.status();
        };

        self.set_authenticating();
        let gen = self.generation.load(Ordering::SeqCst);
        let has_refresh = self.store.get(store::REFRESH_TOKEN).is_some();

        if token::is_expiring(&access, self.refresh_margin_secs) {
            if !has_refresh {
                debug!("stored token expired with no refresh token");
                self.expire_session(ExpiryReason::ResumeFailed);
                return self.status();
            }
            if let Err(e) = self.refresh_single_flight().await {
                warn!(err = %e, "startup refresh failed");
                self.expire_session(ExpiryReason::ResumeFailed);
                return self.status();
            }
        }

        match self.fetch_profile_with_recovery().await {
            Ok(user) if self.generation.load(Ordering::SeqCst) == gen => {
                info!(user = %user.email, "session resumed");
                self.enter_authenticated(user);
            }
            Ok(_) => {
                debug!("resume superseded by a concurrent transition");
            }
            Err(e) => {
                warn!(err = %e, "startup profile fetch failed");
                self.expire_session(ExpiryReason::ResumeFailed);
            }
        }
        self.status()
    }

    /// Profile fetch with the standard unauthorized recovery: one refresh,
    /// one retry.
    async fn fetch_profile_with_recovery(&self) -> Result<UserProfile, AuthError> {
        match self.api.current_user().await {
            Err(AuthError::Unauthorized) => {
                self.refresh_single_flight().await?;
                self.api.current_user().await
            }
            other => other,
        }
    }

    // -- Logout --------------------------------------------------------------

    /// End the session. Never errors; calling it while `Anonymous` is a
    /// no-op with no network call.
    ///
    /// The remote logout is best-effort: local state is cleared whether
    /// or not the platform call succeeds, so a dead network can never
    /// leave the client stuck authenticated.
    pub async fn logout(&self) {
        let _gate = self.logout_gate.lock().await;
        if self.state.read().status == Status::Anonymous {
            return;
        }

        // Invalidate in-flight login/refresh results up front so a late
        // resolution cannot resurrect the credentials we are clearing.
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.stop_refresh_timer();

        if self.store.get(store::ACCESS_TOKEN).is_some() {
            if let Err(e) = self.api.logout().await {
                warn!(err = %e, "remote logout failed, clearing local session anyway");
            }
        }

        self.store.clear(store::SESSION_KEYS);
        {
            let mut state = self.state.write();
            state.status = Status::Anonymous;
            state.user = None;
        }
        let _ = self.event_tx.send(SessionEvent::LoggedOut);
        info!("logged out");
    }

    /// Cancel the periodic refresh task and any future timers.
    pub fn teardown(&self) {
        self.shutdown.cancel();
        self.timer.lock().take();
    }

    // -- Authenticated requests ----------------------------------------------

    /// Issue a request with bearer credentials, participating in the
    /// unauthorized cascade: a 401 triggers exactly one single-flight
    /// refresh and one retry; a second 401 (or a rejected refresh) ends
    /// the session. Never loops.
    pub async fn send_authed(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<reqwest::Response, AuthError> {
        match self.transport.send(method.clone(), path, body, Auth::Bearer).await {
            Err(AuthError::Unauthorized) => {
                self.recover_unauthorized().await?;
                match self.transport.send(method, path, body, Auth::Bearer).await {
                    Err(AuthError::Unauthorized) => {
                        self.expire_session(ExpiryReason::Unauthorized);
                        Err(AuthError::Unauthorized)
                    }
                    other => other,
                }
            }
            other => other,
        }
    }

    /// [`send_authed`](Self::send_authed) and decode a JSON body. This is
    /// the surface feature services build on.
    pub async fn request_json<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<T, AuthError> {
        let resp = self.send_authed(method, path, body).await?;
        decode_json(resp).await
    }

    /// React to a rejected bearer credential.
    async fn recover_unauthorized(&self) -> Result<(), AuthError> {
        if !self.is_authenticated() {
            // The cascade already ran (or no session exists); suppress
            // further side effects until the next successful login.
            return Err(AuthError::Unauthorized);
        }
        match self.refresh_single_flight().await {
            Ok(()) => Ok(()),
            // A network blip while a possibly-valid token exists locally
            // must not log the user out.
            Err(e) if e.is_transient() => Err(e),
            Err(AuthError::Superseded) => Err(AuthError::Superseded),
            Err(_) => {
                self.expire_session(ExpiryReason::Unauthorized);
                Err(AuthError::Unauthorized)
            }
        }
    }

    // -- Silent refresh -------------------------------------------------------

    /// Refresh if the stored token is within the expiry margin. Called by
    /// the periodic timer; safe for consumers to call whenever they notice
    /// the token is expiring.
    pub async fn check_expiry(&self) {
        if !self.is_authenticated() {
            return;
        }
        let Some(access) = self.store.get(store::ACCESS_TOKEN) else {
            return;
        };
        if !token::is_expiring(&access, self.refresh_margin_secs) {
            return;
        }

        match self.refresh_single_flight().await {
            Ok(()) => {}
            Err(AuthError::Superseded) => {}
            Err(e) if e.is_transient() => {
                warn!(err = %e, "token refresh failed, retrying next interval");
            }
            Err(e) => {
                warn!(err = %e, "refresh token rejected, ending session");
                self.expire_session(ExpiryReason::RefreshRejected);
            }
        }
    }

    /// Single-flight refresh: concurrent triggers (periodic timer, 401
    /// reactions, startup) share one in-progress call and its outcome.
    async fn refresh_single_flight(&self) -> Result<(), AuthError> {
        let observed = self.refresh_epoch.load(Ordering::SeqCst);
        let _gate = self.refresh_gate.lock().await;
        if self.refresh_epoch.load(Ordering::SeqCst) != observed {
            // A refresh completed while we waited; adopt its outcome.
            return match *self.last_refresh.lock() {
                Some(ref outcome) => outcome.clone(),
                None => Ok(()),
            };
        }

        let result = self.do_refresh().await;
        *self.last_refresh.lock() = Some(result.clone());
        self.refresh_epoch.fetch_add(1, Ordering::SeqCst);
        result
    }

    async fn do_refresh(&self) -> Result<(), AuthError> {
        let Some(refresh_token) = self.store.get(store::REFRESH_TOKEN) else {
            return Err(AuthError::RefreshRejected);
        };
        let gen = self.generation.load(Ordering::SeqCst);

        let tokens = self.api.refresh(&refresh_token).await?;
        if !self.commit_tokens(gen, &tokens) {
            return Err(AuthError::Superseded);
        }

        debug!("access token refreshed");
        let _ = self.event_tx.send(SessionEvent::Refreshed);
        Ok(())
    }

    // -- Internal transitions -------------------------------------------------

    /// Write tokens to the store unless the session has moved on since
    /// `gen` was observed.
    fn commit_tokens(&self, gen: u64, tokens: &TokenResponse) -> bool {
        if self.generation.load(Ordering::SeqCst) != gen {
            debug!("discarding stale credential result");
            return false;
        }
        self.store.set(store::ACCESS_TOKEN, &tokens.access_token);
        if let Some(ref refresh) = tokens.refresh_token {
            self.store.set(store::REFRESH_TOKEN, refresh);
        }
        if let Some(user_id) = tokens.user_id {
            self.store.set(store::USER_ID, &user_id.to_string());
        }
        true
    }

    fn set_authenticating(&self) {
        let mut state = self.state.write();
        state.status = Status::Authenticating;
        state.user = None;
    }

    /// Fall back to `Anonymous` after a login that wrote nothing.
    fn revert_authenticating(&self) {
        let mut state = self.state.write();
        if state.status == Status::Authenticating {
            state.status = Status::Anonymous;
            state.user = None;
        }
    }

    fn enter_authenticated(self: &Arc<Self>, user: UserProfile) {
        {
            let mut state = self.state.write();
            state.status = Status::Authenticated;
            state.user = Some(user.clone());
        }
        self.expiry_notified.store(false, Ordering::SeqCst);
        self.start_refresh_timer();
        let _ = self.event_tx.send(SessionEvent::LoggedIn { user });
    }

    /// Drop a partially-established session (tokens written, profile fetch
    /// failed). No broadcast: the login caller holds the error.
    fn abandon_pending_session(&self) {
        let mut state = self.state.write();
        if state.status == Status::Anonymous {
            return;
        }
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.store.clear(store::SESSION_KEYS);
        state.status = Status::Anonymous;
        state.user = None;
    }

    /// The terminal cascade: clear credentials, land `Anonymous`, notify
    /// once. Idempotent: concurrent triggers collapse onto the first.
    fn expire_session(&self, reason: ExpiryReason) {
        {
            let mut state = self.state.write();
            if state.status == Status::Anonymous {
                return;
            }
            // RefreshFailed resolves to Anonymous inside this one
            // transition; no consumer can observe the intermediate state.
            state.status = Status::RefreshFailed;
            self.generation.fetch_add(1, Ordering::SeqCst);
            self.store.clear(store::SESSION_KEYS);
            state.status = Status::Anonymous;
            state.user = None;
        }
        self.stop_refresh_timer();
        if !self.expiry_notified.swap(true, Ordering::SeqCst) {
            let _ = self.event_tx.send(SessionEvent::Expired { reason });
        }
    }

    // -- Periodic check -------------------------------------------------------

    fn start_refresh_timer(self: &Arc<Self>) {
        let mut slot = self.timer.lock();
        if slot.is_some() || self.shutdown.is_cancelled() {
            return;
        }
        let cancel = self.shutdown.child_token();
        *slot = Some(cancel.clone());
        drop(slot);

        let manager = Arc::clone(self);
        let interval = self.refresh_interval;
        tokio::spawn(async move {
            debug!(interval_ms = interval.as_millis() as u64, "refresh timer started");
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {}
                    _ = cancel.cancelled() => {
                        debug!("refresh timer stopped");
                        return;
                    }
                }
                manager.check_expiry().await;
            }
        });
    }

    fn stop_refresh_timer(&self) {
        if let Some(cancel) = self.timer.lock().take() {
            cancel.cancel();
        }
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;
