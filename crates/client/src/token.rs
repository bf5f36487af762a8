// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Token inspection: decode claims without verifying, answer "is this
//! token about to expire".
//!
//! The platform issues JWTs; the client never verifies signatures (that is
//! the server's job) but reads the payload to schedule refreshes. Decoding
//! fails soft: a malformed token reads as "claims absent" and is treated
//! as expiring, forcing a refresh-or-logout decision instead of trusting
//! data we cannot parse.

use std::time::{SystemTime, UNIX_EPOCH};

use base64::Engine;
use serde::Deserialize;

/// Decoded (unverified) view of an access token's payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenClaims {
    /// `sub`: the principal the token was issued for.
    pub subject: String,
    /// `iat`: issue time, epoch seconds.
    pub issued_at: Option<u64>,
    /// `exp`: expiry, epoch seconds.
    pub expires_at: Option<u64>,
}

#[derive(Deserialize)]
struct RawClaims {
    #[serde(default)]
    sub: Option<String>,
    #[serde(default)]
    iat: Option<u64>,
    #[serde(default)]
    exp: Option<u64>,
}

/// Decode the claims of a JWT without verifying its signature.
///
/// Returns `None` for anything that is not `header.payload.signature` with
/// a base64url JSON payload.
pub fn decode(token: &str) -> Option<TokenClaims> {
    let mut parts = token.split('.');
    let (_header, payload) = (parts.next()?, parts.next()?);
    parts.next()?;
    if parts.next().is_some() {
        return None;
    }

    let bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD.decode(payload.as_bytes()).ok()?;
    let raw: RawClaims = serde_json::from_slice(&bytes).ok()?;

    Some(TokenClaims {
        subject: raw.sub.unwrap_or_default(),
        issued_at: raw.iat,
        expires_at: raw.exp,
    })
}

/// Whether `token` expires within the next `threshold_secs` seconds.
///
/// Fails safe: undecodable claims or a missing `exp` count as expiring.
pub fn is_expiring(token: &str, threshold_secs: u64) -> bool {
    is_expiring_at(token, threshold_secs, now_epoch_secs())
}

/// Pure variant of [`is_expiring`] with the clock injected.
pub fn is_expiring_at(token: &str, threshold_secs: u64, now_secs: u64) -> bool {
    let Some(claims) = decode(token) else {
        return true;
    };
    let Some(expires_at) = claims.expires_at else {
        return true;
    };
    expires_at <= now_secs.saturating_add(threshold_secs)
}

/// Current wall-clock time as epoch seconds.
pub fn now_epoch_secs() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
}

#[cfg(test)]
#[path = "token_tests.rs"]
mod tests;
