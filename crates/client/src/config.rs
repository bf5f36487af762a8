// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

/// Client configuration for the learning platform API.
#[derive(Debug, Clone, Parser)]
pub struct Config {
    /// Base URL of the platform API.
    #[arg(long, env = "SKILLWAVE_API_URL", default_value = "http://localhost:8080")]
    pub api_url: String,

    /// Path to the credentials file. Defaults to the state directory.
    #[arg(long, env = "SKILLWAVE_CREDENTIALS")]
    pub credentials: Option<PathBuf>,

    /// Log format (json or text).
    #[arg(long, env = "SKILLWAVE_LOG_FORMAT", default_value = "text")]
    pub log_format: String,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, env = "SKILLWAVE_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    // -- Tuning overrides (skip from CLI; set in Config::test()) -----------
    /// HTTP request timeout in ms.
    #[clap(skip)]
    pub http_timeout_ms: Option<u64>,
    /// Interval between periodic token expiry checks in ms.
    #[clap(skip)]
    pub refresh_interval_ms: Option<u64>,
    /// Seconds before expiry at which a token counts as expiring.
    #[clap(skip)]
    pub refresh_margin_secs: Option<u64>,
}

fn env_duration_ms(var: &str, default: u64) -> Duration {
    let ms = std::env::var(var).ok().and_then(|v| v.parse().ok()).unwrap_or(default);
    Duration::from_millis(ms)
}

macro_rules! duration_field {
    ($method:ident, $field:ident, $env:literal, $default:expr) => {
        pub fn $method(&self) -> Duration {
            match self.$field {
                Some(ms) => Duration::from_millis(ms),
                None => env_duration_ms($env, $default),
            }
        }
    };
}

impl Config {
    /// Validate the configuration after parsing.
    pub fn validate(&self) -> anyhow::Result<()> {
        if !self.api_url.starts_with("http://") && !self.api_url.starts_with("https://") {
            anyhow::bail!("--api-url must be an http(s) URL, got: {}", self.api_url);
        }
        match self.log_format.as_str() {
            "json" | "text" => {}
            other => anyhow::bail!("invalid log format: {other}"),
        }
        Ok(())
    }

    // -- Tuning knobs (field override → env var → compiled default) --------

    duration_field!(http_timeout, http_timeout_ms, "SKILLWAVE_HTTP_TIMEOUT_MS", 15_000);
    duration_field!(refresh_interval, refresh_interval_ms, "SKILLWAVE_REFRESH_INTERVAL_MS", 300_000);

    /// Seconds before expiry at which a refresh is due.
    pub fn refresh_margin(&self) -> u64 {
        match self.refresh_margin_secs {
            Some(secs) => secs,
            None => std::env::var("SKILLWAVE_REFRESH_MARGIN_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(300),
        }
    }

    /// Resolve the credentials file path: explicit flag, else state dir.
    pub fn credentials_path(&self) -> PathBuf {
        match self.credentials {
            Some(ref path) => path.clone(),
            None => state_dir().join("credentials.json"),
        }
    }

    /// Build a minimal `Config` for tests (fast timers, no disk state).
    #[doc(hidden)]
    pub fn test() -> Self {
        Self {
            api_url: "http://127.0.0.1:0".into(),
            credentials: None,
            log_format: "text".into(),
            log_level: "debug".into(),
            http_timeout_ms: Some(2_000),
            refresh_interval_ms: Some(50),
            refresh_margin_secs: Some(300),
        }
    }
}

/// Resolve the state directory for client data.
///
/// Checks `SKILLWAVE_STATE_DIR`, then `$XDG_STATE_HOME/skillwave`,
/// then `$HOME/.local/state/skillwave`.
pub fn state_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("SKILLWAVE_STATE_DIR") {
        return PathBuf::from(dir);
    }
    if let Ok(xdg) = std::env::var("XDG_STATE_HOME") {
        return PathBuf::from(xdg).join("skillwave");
    }
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".local/state/skillwave");
    }
    PathBuf::from(".skillwave")
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
