// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Error taxonomy for the auth client.
//!
//! Every failure an auth operation can surface maps onto one of these
//! variants so callers can branch on kind rather than string-matching.

use std::fmt;

/// Errors surfaced by auth operations and authenticated requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// Login rejected: bad email or password. Never retried.
    CredentialsRejected,
    /// Refresh rejected: the refresh token is expired or invalid.
    /// Terminal for the current session.
    RefreshRejected,
    /// An authenticated request was answered with HTTP 401: the access
    /// token the request carried was rejected.
    Unauthorized,
    /// Network failure or timeout. Stored credentials stay untouched;
    /// a timed-out call is treated identically to a connection failure.
    Network(String),
    /// Any other non-success response from the platform API.
    Api { status: u16, message: String },
    /// A completed operation whose outcome was no longer relevant (for
    /// example a login resolving after logout) had its result discarded.
    Superseded,
}

impl AuthError {
    /// Whether retrying the same operation later could succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Network(_) => true,
            Self::Api { status, .. } => *status >= 500,
            Self::CredentialsRejected
            | Self::RefreshRejected
            | Self::Unauthorized
            | Self::Superseded => false,
        }
    }

    /// Map a transport-level `reqwest` error. Timeouts and connection
    /// failures are indistinguishable to the session layer.
    pub fn from_transport(err: &reqwest::Error) -> Self {
        Self::Network(err.to_string())
    }
}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CredentialsRejected => f.write_str("invalid email or password"),
            Self::RefreshRejected => f.write_str("refresh token rejected"),
            Self::Unauthorized => f.write_str("access token rejected"),
            Self::Network(detail) => write!(f, "network failure: {detail}"),
            Self::Api { status, message } => write!(f, "API error ({status}): {message}"),
            Self::Superseded => f.write_str("operation superseded, result discarded"),
        }
    }
}

impl std::error::Error for AuthError {}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
