// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::error;

use skillwave::config::Config;
use skillwave::session::{SessionConfig, SessionManager, SessionSnapshot, Status};
use skillwave::store::{self, CredentialStore};
use skillwave::token;
use skillwave::transport::Transport;

/// Command-line client for the SkillWave learning platform.
#[derive(Parser)]
#[command(name = "skillwave", version, about)]
struct Cli {
    #[command(flatten)]
    config: Config,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Log in with email and password
    Login {
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
    },
    /// Log in with a token handed back by an OAuth provider redirect
    Token {
        access_token: String,
        #[arg(long)]
        refresh_token: Option<String>,
    },
    /// End the current session
    Logout,
    /// Show session status
    Status,
    /// Show the authenticated user's profile
    Whoami,
    /// Refresh the access token if it is expiring
    Refresh,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = cli.config.validate() {
        eprintln!("error: {e}");
        std::process::exit(2);
    }

    init_tracing(&cli.config);
    ensure_crypto();

    std::process::exit(run(cli).await);
}

fn init_tracing(config: &Config) {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    match config.log_format.as_str() {
        "json" => {
            fmt::fmt().with_env_filter(filter).json().init();
        }
        _ => {
            fmt::fmt().with_env_filter(filter).init();
        }
    }
}

/// Install the ring crypto provider for reqwest/rustls.
/// Safe to call multiple times — only the first call has effect.
fn ensure_crypto() {
    let _ = rustls::crypto::ring::default_provider().install_default();
}

async fn run(cli: Cli) -> i32 {
    let store = Arc::new(CredentialStore::open(cli.config.credentials_path()));
    let transport = match Transport::new(
        &cli.config.api_url,
        cli.config.http_timeout(),
        Arc::clone(&store),
    ) {
        Ok(t) => Arc::new(t),
        Err(e) => {
            error!("failed to build HTTP client: {e:#}");
            return 1;
        }
    };

    let (manager, _events) = SessionManager::new(SessionConfig {
        store: Arc::clone(&store),
        transport,
        refresh_margin_secs: cli.config.refresh_margin(),
        refresh_interval: cli.config.refresh_interval(),
    });

    let code = match cli.command {
        Command::Login { email, password } => match manager.login(&email, &password).await {
            Ok(user) => {
                println!("Logged in as {} <{}>", user.name, user.email);
                0
            }
            Err(e) => {
                eprintln!("error: {e}");
                1
            }
        },

        Command::Token { access_token, refresh_token } => {
            match manager.login_with_token(&access_token, refresh_token.as_deref()).await {
                Ok(user) => {
                    println!("Logged in as {} <{}>", user.name, user.email);
                    0
                }
                Err(e) => {
                    eprintln!("error: {e}");
                    1
                }
            }
        }

        Command::Logout => {
            manager.resume().await;
            manager.logout().await;
            println!("Logged out.");
            0
        }

        Command::Status => {
            let snapshot = manager.resume().await;
            print_status(&snapshot, &store);
            0
        }

        Command::Whoami => {
            let snapshot = manager.resume().await;
            match snapshot.user {
                Some(user) => {
                    println!("{:<10} {}", "ID", user.id);
                    println!("{:<10} {}", "NAME", user.name);
                    println!("{:<10} {}", "EMAIL", user.email);
                    println!("{:<10} {}", "VERIFIED", user.email_verified);
                    if let Some(url) = user.profile_picture_url {
                        println!("{:<10} {url}", "AVATAR");
                    }
                    0
                }
                None => {
                    eprintln!("error: not logged in");
                    1
                }
            }
        }

        Command::Refresh => {
            let snapshot = manager.resume().await;
            if snapshot.status != Status::Authenticated {
                eprintln!("error: not logged in");
                1
            } else {
                manager.check_expiry().await;
                print_status(&manager.status(), &store);
                i32::from(!manager.is_authenticated())
            }
        }
    };

    manager.teardown();
    code
}

fn format_expires(secs: Option<u64>) -> String {
    match secs {
        Some(s) => {
            let m = s / 60;
            let rem = s % 60;
            format!("{m}m {rem:02}s")
        }
        None => "\u{2014}".to_string(),
    }
}

fn print_status(snapshot: &SessionSnapshot, store: &CredentialStore) {
    let status = match snapshot.status {
        Status::Anonymous => "anonymous",
        Status::Authenticating => "authenticating",
        Status::Authenticated => "authenticated",
        Status::RefreshFailed => "refresh-failed",
    };
    println!("{:<10} {status}", "STATUS");

    if let Some(ref user) = snapshot.user {
        println!("{:<10} {} <{}>", "USER", user.name, user.email);
    }

    let expires_in = store
        .get(store::ACCESS_TOKEN)
        .and_then(|t| token::decode(&t))
        .and_then(|claims| claims.expires_at)
        .map(|exp| exp.saturating_sub(token::now_epoch_secs()));
    if snapshot.status == Status::Authenticated {
        println!("{:<10} {}", "EXPIRES IN", format_expires(expires_in));
    }
}
