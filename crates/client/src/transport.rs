// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Outbound HTTP pipeline.
//!
//! Every API call passes through one chokepoint built from two pure
//! stages: an outbound decorator that attaches the current access token as
//! a bearer credential, and an inbound classifier that separates
//! authentication failures from feature-level errors.
//!
//! The pipeline never retries. A rejected bearer credential surfaces as
//! [`AuthError::Unauthorized`]; whether to refresh-and-retry or to log out
//! is the session manager's call, so retry loops stay bounded and owned by
//! one authority.

use std::sync::Arc;
use std::time::Duration;

use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use crate::error::AuthError;
use crate::store::{self, CredentialStore};

/// How a request authenticates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Auth {
    /// Attach the current access token from the credential store. If no
    /// token is stored the request goes out unauthenticated (some
    /// endpoints are public).
    Bearer,
    /// No credential. Used for login and refresh, which must not carry
    /// the access token.
    None,
}

/// Classification of an inbound response status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// 2xx.
    Success,
    /// 401: the credential (if any) was rejected.
    Unauthorized,
    /// Everything else (404, 500, …): a feature-level concern, passed
    /// through untouched.
    PassThrough,
}

/// Outbound stage: decorate a request with bearer credentials.
pub fn authorize(builder: RequestBuilder, token: Option<&str>) -> RequestBuilder {
    match token {
        Some(token) => builder.bearer_auth(token),
        None => builder,
    }
}

/// Inbound stage: classify a response status.
pub fn classify(status: StatusCode) -> Disposition {
    if status.is_success() {
        Disposition::Success
    } else if status == StatusCode::UNAUTHORIZED {
        Disposition::Unauthorized
    } else {
        Disposition::PassThrough
    }
}

/// Error envelope the platform API uses for non-success responses.
#[derive(Debug, serde::Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// The single outbound HTTP client for the platform API.
pub struct Transport {
    http: reqwest::Client,
    base_url: String,
    store: Arc<CredentialStore>,
}

impl Transport {
    /// Build a transport with a bounded request timeout.
    pub fn new(
        base_url: &str,
        timeout: Duration,
        store: Arc<CredentialStore>,
    ) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { http, base_url: base_url.trim_end_matches('/').to_owned(), store })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Dispatch a request through both pipeline stages.
    ///
    /// Returns the raw response for everything except a 401 on a request
    /// that actually carried bearer credentials; that is the
    /// "current credential rejected" signal and surfaces as
    /// [`AuthError::Unauthorized`]. A 401 on an unauthenticated request
    /// (bad login password, bad refresh token) passes through for the API
    /// layer to interpret.
    pub async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
        auth: Auth,
    ) -> Result<Response, AuthError> {
        let url = format!("{}{}", self.base_url, path);
        let mut builder = self.http.request(method, &url);
        if let Some(body) = body {
            builder = builder.json(body);
        }

        let token = match auth {
            Auth::Bearer => self.store.get(store::ACCESS_TOKEN),
            Auth::None => None,
        };
        let carried_credential = token.is_some();
        builder = authorize(builder, token.as_deref());

        let resp = builder.send().await.map_err(|e| AuthError::from_transport(&e))?;

        match classify(resp.status()) {
            Disposition::Unauthorized if carried_credential => {
                debug!(%url, "bearer credential rejected");
                Err(AuthError::Unauthorized)
            }
            _ => Ok(resp),
        }
    }

    /// [`send`](Self::send) and deserialize a JSON body, mapping non-2xx
    /// responses to [`AuthError::Api`] with the server's error message.
    pub async fn request_json<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
        auth: Auth,
    ) -> Result<T, AuthError> {
        let resp = self.send(method, path, body, auth).await?;
        decode_json(resp).await
    }
}

/// Decode a JSON body, mapping non-2xx responses to [`AuthError::Api`].
pub async fn decode_json<T: DeserializeOwned>(resp: Response) -> Result<T, AuthError> {
    let status = resp.status();

    if !status.is_success() {
        let message = error_message(resp).await;
        return Err(AuthError::Api { status: status.as_u16(), message });
    }

    resp.json::<T>().await.map_err(|e| AuthError::Api {
        status: status.as_u16(),
        message: format!("invalid response body: {e}"),
    })
}

/// Extract a human-readable message from an error response body.
async fn error_message(resp: Response) -> String {
    let text = resp.text().await.unwrap_or_default();
    match serde_json::from_str::<ApiErrorBody>(&text) {
        Ok(body) => body.error.or(body.message).unwrap_or(text),
        Err(_) => text,
    }
}

#[cfg(test)]
#[path = "transport_tests.rs"]
mod tests;
