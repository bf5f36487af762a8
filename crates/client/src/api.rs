// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Wire contracts for the platform's auth endpoints.
//!
//! Envelopes are camelCase to match the platform API. Only the fields the
//! client reads are modeled; unknown fields are ignored on deserialize.

use std::sync::Arc;

use reqwest::{Method, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::AuthError;
use crate::transport::{Auth, Transport};

pub const LOGIN: &str = "/api/auth/login";
pub const REFRESH: &str = "/api/auth/refresh-token";
pub const LOGOUT: &str = "/api/auth/logout";
pub const CURRENT_USER: &str = "/api/auth/current-user";
pub const REGISTER: &str = "/api/auth/register";
pub const PROFILE: &str = "/api/auth/profile";
pub const CHANGE_PASSWORD: &str = "/api/auth/change-password";
pub const FORGOT_PASSWORD: &str = "/api/auth/forgot-password";
pub const RESET_PASSWORD: &str = "/api/auth/reset-password";

/// Token envelope returned by both login and refresh.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenResponse {
    pub access_token: String,
    /// Refresh may omit a new refresh token; the old one stays valid.
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub user_id: Option<u64>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

/// The authenticated user, as served by `current-user`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: u64,
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub profile_picture_url: Option<String>,
    #[serde(default)]
    pub email_verified: bool,
    #[serde(default)]
    pub provider: Option<String>,
}

/// Fields a consumer may change on their own profile.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile_picture_url: Option<String>,
}

/// Typed calls against the auth endpoints, all through the one transport.
pub struct AuthApi {
    transport: Arc<Transport>,
}

impl AuthApi {
    pub fn new(transport: Arc<Transport>) -> Self {
        Self { transport }
    }

    /// `POST /api/auth/login`. Sent unauthenticated; a 400/401 means the
    /// credentials were rejected, which is distinguishable from transport
    /// trouble.
    pub async fn login(&self, email: &str, password: &str) -> Result<TokenResponse, AuthError> {
        let body = serde_json::json!({ "email": email, "password": password });
        self.transport
            .request_json(Method::POST, LOGIN, Some(&body), Auth::None)
            .await
            .map_err(|e| match e {
                AuthError::Api { status, .. }
                    if status == StatusCode::BAD_REQUEST.as_u16()
                        || status == StatusCode::UNAUTHORIZED.as_u16() =>
                {
                    AuthError::CredentialsRejected
                }
                other => other,
            })
    }

    /// `POST /api/auth/refresh-token`. Carries the refresh token in the
    /// body, never the access token. A 4xx answer means the refresh token
    /// itself was rejected; 5xx and network failures stay transient.
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenResponse, AuthError> {
        let body = serde_json::json!({ "refreshToken": refresh_token });
        self.transport
            .request_json(Method::POST, REFRESH, Some(&body), Auth::None)
            .await
            .map_err(|e| match e {
                AuthError::Api { status, message } if status < 500 => {
                    debug!(status, %message, "refresh token rejected");
                    AuthError::RefreshRejected
                }
                other => other,
            })
    }

    /// `POST /api/auth/logout`. Best-effort; the caller discards failures.
    pub async fn logout(&self) -> Result<(), AuthError> {
        let resp = self.transport.send(Method::POST, LOGOUT, None, Auth::Bearer).await?;
        if resp.status().is_success() {
            Ok(())
        } else {
            Err(AuthError::Api { status: resp.status().as_u16(), message: String::new() })
        }
    }

    /// `GET /api/auth/current-user`.
    pub async fn current_user(&self) -> Result<UserProfile, AuthError> {
        self.transport.request_json(Method::GET, CURRENT_USER, None, Auth::Bearer).await
    }

    /// `POST /api/auth/register`.
    pub async fn register(
        &self,
        name: &str,
        email: &str,
        password: &str,
    ) -> Result<UserProfile, AuthError> {
        let body = serde_json::json!({ "name": name, "email": email, "password": password });
        self.transport.request_json(Method::POST, REGISTER, Some(&body), Auth::None).await
    }

    /// `PUT /api/auth/profile`.
    pub async fn update_profile(&self, update: &ProfileUpdate) -> Result<UserProfile, AuthError> {
        let body = serde_json::json!(update);
        self.transport.request_json(Method::PUT, PROFILE, Some(&body), Auth::Bearer).await
    }

    /// `PUT /api/auth/change-password`.
    pub async fn change_password(
        &self,
        current_password: &str,
        new_password: &str,
    ) -> Result<(), AuthError> {
        let body = serde_json::json!({
            "currentPassword": current_password,
            "newPassword": new_password,
        });
        let resp =
            self.transport.send(Method::PUT, CHANGE_PASSWORD, Some(&body), Auth::Bearer).await?;
        expect_success(resp).await
    }

    /// `POST /api/auth/forgot-password`.
    pub async fn forgot_password(&self, email: &str) -> Result<(), AuthError> {
        let body = serde_json::json!({ "email": email });
        let resp =
            self.transport.send(Method::POST, FORGOT_PASSWORD, Some(&body), Auth::None).await?;
        expect_success(resp).await
    }

    /// `POST /api/auth/reset-password`.
    pub async fn reset_password(&self, token: &str, new_password: &str) -> Result<(), AuthError> {
        let body = serde_json::json!({ "token": token, "newPassword": new_password });
        let resp =
            self.transport.send(Method::POST, RESET_PASSWORD, Some(&body), Auth::None).await?;
        expect_success(resp).await
    }
}

async fn expect_success(resp: reqwest::Response) -> Result<(), AuthError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(());
    }
    let message = resp.text().await.unwrap_or_default();
    Err(AuthError::Api { status: status.as_u16(), message })
}

/// Login URL for an external identity provider redirect.
///
/// The provider sends the browser back with a token in the URL; that token
/// is handed to the session manager via `login_with_token`.
pub fn oauth_login_url(base_url: &str, provider: &str) -> Option<String> {
    match provider {
        "google" | "github" => Some(format!(
            "{}/api/auth/oauth2/{provider}/login",
            base_url.trim_end_matches('/')
        )),
        _ => None,
    }
}

#[cfg(test)]
#[path = "api_tests.rs"]
mod tests;
