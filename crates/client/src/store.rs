// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Durable credential storage.
//!
//! A synchronous string key-value surface backed by a flat JSON file, the
//! client-side analog of browser local storage. The session manager is the
//! only writer during normal operation; the request pipeline reads the
//! access token on every outbound call.
//!
//! Operations never fail from the caller's perspective: a missing key reads
//! as absent, and persistence errors are logged and swallowed so auth state
//! transitions cannot get stuck on disk trouble.

use std::collections::HashMap;
use std::path::PathBuf;

use parking_lot::Mutex;
use tracing::{debug, warn};

/// Key under which the short-lived access token is stored.
pub const ACCESS_TOKEN: &str = "auth_token";
/// Key under which the long-lived refresh token is stored.
pub const REFRESH_TOKEN: &str = "refresh_token";
/// Key under which the authenticated user's id is stored.
pub const USER_ID: &str = "user_id";

/// All keys owned by the session manager, cleared together on logout.
pub const SESSION_KEYS: &[&str] = &[ACCESS_TOKEN, REFRESH_TOKEN, USER_ID];

/// File-backed string key-value store.
pub struct CredentialStore {
    path: Option<PathBuf>,
    entries: Mutex<HashMap<String, String>>,
}

impl CredentialStore {
    /// Open a store backed by the JSON file at `path`.
    ///
    /// A missing, unreadable, or malformed file is treated as empty; the
    /// durable copy is best-effort state, never a startup blocker.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = match std::fs::read_to_string(&path) {
            Ok(data) => match serde_json::from_str::<HashMap<String, String>>(&data) {
                Ok(map) => map,
                Err(e) => {
                    warn!(path = %path.display(), "malformed credential file, starting empty: {e}");
                    HashMap::new()
                }
            },
            Err(e) => {
                debug!(path = %path.display(), "no persisted credentials: {e}");
                HashMap::new()
            }
        };

        Self { path: Some(path), entries: Mutex::new(entries) }
    }

    /// A store with no durable backing, for tests and ephemeral sessions.
    pub fn in_memory() -> Self {
        Self { path: None, entries: Mutex::new(HashMap::new()) }
    }

    /// Read a value. Absent keys return `None`, never an error.
    pub fn get(&self, key: &str) -> Option<String> {
        self.entries.lock().get(key).cloned()
    }

    /// Write a value and persist.
    pub fn set(&self, key: &str, value: &str) {
        let mut entries = self.entries.lock();
        entries.insert(key.to_owned(), value.to_owned());
        self.persist(&entries);
    }

    /// Remove the given keys (missing keys are ignored) and persist.
    pub fn clear(&self, keys: &[&str]) {
        let mut entries = self.entries.lock();
        for key in keys {
            entries.remove(*key);
        }
        self.persist(&entries);
    }

    /// Write the current entries to disk atomically (tmp file + rename).
    ///
    /// Uses a unique temp filename (PID + counter) to avoid corruption when
    /// concurrent saves race on the same `.tmp` file.
    fn persist(&self, entries: &HashMap<String, String>) {
        use std::sync::atomic::{AtomicU32, Ordering};
        static COUNTER: AtomicU32 = AtomicU32::new(0);

        let Some(ref path) = self.path else {
            return;
        };

        let json = match serde_json::to_string_pretty(entries) {
            Ok(j) => j,
            Err(e) => {
                warn!("failed to serialize credentials: {e}");
                return;
            }
        };

        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }

        let seq = COUNTER.fetch_add(1, Ordering::Relaxed);
        let tmp_name = format!(
            "{}.{}.{}.tmp",
            path.file_name().unwrap_or_default().to_string_lossy(),
            std::process::id(),
            seq,
        );
        let tmp_path = path.with_file_name(tmp_name);

        if let Err(e) = std::fs::write(&tmp_path, &json) {
            warn!(path = %tmp_path.display(), "failed to write credentials: {e}");
            return;
        }
        if let Err(e) = std::fs::rename(&tmp_path, path) {
            warn!(path = %path.display(), "failed to rename credentials file: {e}");
        }
    }
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
