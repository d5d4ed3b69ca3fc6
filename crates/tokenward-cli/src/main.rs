//! tokenward - keeps an API session logged in from the command line.
//!
//! Logs in against the configured API, sends authenticated requests that
//! survive access token expiry, and can keep the session warm with the
//! background refresh timer.

use std::io::{self, BufRead, Write};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tokio::sync::mpsc;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use tokenward_core::{
    ApiClient, ApiRequest, Config, Credentials, ExpiryReason, RefreshOutcome, RefreshScheduler,
    SessionStore,
};

/// Directory for rolling log files; stderr only when unset
const LOG_DIR_ENV: &str = "TOKENWARD_LOG_DIR";

const LOG_FILE_PREFIX: &str = "tokenward.log";

const USAGE: &str = "\
Usage: tokenward <command>

Commands:
  login [username]   Log in and store the session
  logout             Clear the stored session
  status             Show the current session
  get <path>         Send an authenticated GET request
  refresh            Exchange the refresh token for a new access token now
  watch              Keep the session refreshed until interrupted
  config [save]      Show the effective configuration, or write it to the config file";

/// Initialize the tracing subscriber for logging
fn init_tracing() -> Option<WorkerGuard> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = match std::env::var(LOG_DIR_ENV) {
        Ok(dir) => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (Some(fmt::layer().with_writer(writer).with_ansi(false)), Some(guard))
        }
        Err(_) => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();

    guard
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();
    let _log_guard = init_tracing();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = args.first().map(String::as_str).unwrap_or("status");
    if matches!(command, "-h" | "--help" | "help") {
        println!("{}", USAGE);
        return Ok(());
    }

    let config = Config::load().context("Failed to load configuration")?;
    let storage = config
        .open_storage()
        .context("Failed to open credential storage")?;
    let store = Arc::new(SessionStore::load(storage));

    // The session expiry signal; this host "navigates to login" by telling the user
    let (expired_tx, expired_rx) = mpsc::unbounded_channel::<ExpiryReason>();
    let client = ApiClient::new(&config, store, Arc::new(expired_tx))?;

    match command {
        "login" => login(&client, args.get(1).cloned()).await,
        "logout" => {
            client.logout();
            println!("Logged out");
            Ok(())
        }
        "status" => {
            status(&client);
            Ok(())
        }
        "get" => {
            let path = args.get(1).context("Usage: tokenward get <path>")?;
            get(&client, path, expired_rx).await
        }
        "refresh" => refresh(&client, &config).await,
        "watch" => watch(&client, &config, expired_rx).await,
        "config" => {
            if args.get(1).map(String::as_str) == Some("save") {
                config.save().context("Failed to save configuration")?;
                println!("Configuration saved");
            } else {
                println!("{}", serde_json::to_string_pretty(&config)?);
            }
            Ok(())
        }
        other => {
            eprintln!("{}", USAGE);
            bail!("Unknown command: {}", other)
        }
    }
}

fn redirect_to_login(reason: ExpiryReason) {
    eprintln!(
        "Session expired ({}). Run `tokenward login` to sign in again.",
        reason
    );
}

async fn login(client: &ApiClient, username: Option<String>) -> Result<()> {
    let username = match username {
        Some(username) => username,
        None => {
            print!("Username: ");
            io::stdout().flush()?;
            let mut line = String::new();
            io::stdin().lock().read_line(&mut line)?;
            line.trim().to_string()
        }
    };
    let password = rpassword::prompt_password("Password: ").context("Failed to read password")?;

    let snapshot = client
        .login(&Credentials::new(username.clone(), password))
        .await
        .context("Login failed")?;

    match snapshot.user.and_then(|user| user.role) {
        Some(role) => println!("Logged in as {} ({})", username, role),
        None => println!("Logged in as {}", username),
    }
    Ok(())
}

fn status(client: &ApiClient) {
    let snapshot = client.snapshot();
    let role = snapshot
        .user
        .as_ref()
        .and_then(|user| user.role.clone())
        .or_else(|| client.store().stored_role());

    println!("Authenticated:  {}", if snapshot.is_authenticated { "yes" } else { "no" });
    println!("Refresh token:  {}", if snapshot.has_refresh_token() { "stored" } else { "none" });
    println!("Role:           {}", role.as_deref().unwrap_or("-"));
    if let Some(minutes) = snapshot.minutes_since_rotation() {
        println!("Last refresh:   {}m ago", minutes);
    }
}

async fn get(
    client: &ApiClient,
    path: &str,
    mut expired_rx: mpsc::UnboundedReceiver<ExpiryReason>,
) -> Result<()> {
    let response = client.execute(&ApiRequest::get(path)).await?;

    if let Ok(reason) = expired_rx.try_recv() {
        redirect_to_login(reason);
    }

    println!("{}", response.status());
    match serde_json::from_slice::<serde_json::Value>(response.body()) {
        Ok(json) => println!("{}", serde_json::to_string_pretty(&json)?),
        Err(_) => println!("{}", response.text()),
    }
    Ok(())
}

async fn refresh(client: &ApiClient, config: &Config) -> Result<()> {
    let scheduler = RefreshScheduler::new(client.refresher().clone(), config.refresh_interval());
    match scheduler.tick().await {
        RefreshOutcome::Rotated => println!("Access token refreshed"),
        RefreshOutcome::Skipped => println!("Not logged in, nothing to refresh"),
        RefreshOutcome::Terminated(reason) => redirect_to_login(reason),
    }
    Ok(())
}

async fn watch(
    client: &ApiClient,
    config: &Config,
    mut expired_rx: mpsc::UnboundedReceiver<ExpiryReason>,
) -> Result<()> {
    if !client.snapshot().has_refresh_token() {
        bail!("Not logged in. Run `tokenward login` first.");
    }

    let scheduler = RefreshScheduler::new(client.refresher().clone(), config.refresh_interval());
    scheduler.start();
    println!(
        "Refreshing the access token every {} minutes. Press Ctrl-C to stop.",
        scheduler.period().as_secs() / 60
    );

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("Failed to listen for Ctrl-C")?;
            info!("Interrupted");
        }
        Some(reason) = expired_rx.recv() => redirect_to_login(reason),
    }

    scheduler.stop();
    Ok(())
}
