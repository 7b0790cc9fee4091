//! Session client
//!
//! Command-line client for the identity API. Keeps its refresh credential in
//! a local JSON file so a session started with `login` is resumed by every
//! later invocation:
//!
//! ```text
//! session [--config PATH] login <email>    # password from SESSION_PASSWORD or stdin
//! session [--config PATH] whoami
//! session [--config PATH] protected
//! session [--config PATH] status
//! session [--config PATH] logout
//! ```

mod config;

use std::io::BufRead;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use common::Secret;
use identity::{HttpIdentity, PROTECTED_DATA_PATH};
use session::{FileStorage, RestoreOutcome, SessionController};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use transport::HttpTransport;

use crate::config::Config;

const USAGE: &str = "usage: session [--config PATH] <login EMAIL | whoami | protected | status | logout>";

#[derive(Debug, PartialEq, Eq)]
enum Command {
    Login { email: String },
    Whoami,
    Protected,
    Status,
    Logout,
}

/// Parsed command line.
#[derive(Debug, PartialEq, Eq)]
struct Invocation {
    config_path: Option<String>,
    command: Command,
}

fn parse_args(args: &[String]) -> Result<Invocation> {
    let mut config_path = None;
    let mut positional = Vec::new();
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--config" => {
                let path = iter.next().context("--config needs a path")?;
                config_path = Some(path.clone());
            }
            "-h" | "--help" => bail!("{USAGE}"),
            _ => positional.push(arg.as_str()),
        }
    }

    let command = match positional.as_slice() {
        ["login", email] => Command::Login {
            email: (*email).to_owned(),
        },
        ["whoami"] => Command::Whoami,
        ["protected"] => Command::Protected,
        ["status"] => Command::Status,
        ["logout"] => Command::Logout,
        _ => bail!("{USAGE}"),
    };

    Ok(Invocation {
        config_path,
        command,
    })
}

/// Password from SESSION_PASSWORD, or the first line of stdin.
fn read_password(mut input: impl BufRead) -> Result<Secret<String>> {
    if let Ok(password) = std::env::var("SESSION_PASSWORD") {
        return Ok(Secret::new(password));
    }
    eprint!("password: ");
    let mut line = String::new();
    input
        .read_line(&mut line)
        .context("failed to read password from stdin")?;
    let password = line.trim_end_matches(['\r', '\n']).to_owned();
    line.clear();
    if password.is_empty() {
        bail!("empty password");
    }
    Ok(Secret::new(password))
}

fn build_controller(config: &Config) -> Result<SessionController> {
    let client = reqwest::Client::builder()
        .timeout(config.timeout())
        .build()
        .context("failed to build HTTP client")?;

    let storage = FileStorage::open(&config.client.storage_path).with_context(|| {
        format!(
            "failed to open session storage at {}",
            config.client.storage_path.display()
        )
    })?;

    let identity = Arc::new(HttpIdentity::new(client.clone(), &config.client.base_url));
    let transport = Arc::new(HttpTransport::new(
        client,
        &config.client.base_url,
        config.timeout(),
    ));
    Ok(SessionController::new(
        identity,
        transport,
        Arc::new(storage),
    ))
}

/// Resume the persisted session or fail with a hint to log in.
async fn require_session(session: &SessionController) -> Result<()> {
    match session.restore_session().await {
        RestoreOutcome::Restored(profile) => {
            debug!(user_id = profile.id, "session resumed");
            Ok(())
        }
        RestoreOutcome::NoSession => bail!("not logged in; run `session login <email>`"),
    }
}

async fn run(session: &SessionController, command: Command) -> Result<serde_json::Value> {
    match command {
        Command::Login { email } => {
            let password = read_password(std::io::stdin().lock())?;
            let profile = session.login(&email, password.expose()).await?;
            Ok(serde_json::json!({ "loggedIn": profile }))
        }
        Command::Status => match session.restore_session().await {
            RestoreOutcome::Restored(profile) => {
                Ok(serde_json::json!({ "authenticated": true, "user": profile }))
            }
            RestoreOutcome::NoSession => Ok(serde_json::json!({ "authenticated": false })),
        },
        Command::Logout => {
            // TokenStore falls back to storage for the refresh credential
            session.logout().await;
            Ok(serde_json::json!({ "message": "Logged out successfully" }))
        }
        Command::Whoami => {
            require_session(session).await?;
            Ok(serde_json::to_value(session.current_user().await?)?)
        }
        Command::Protected => {
            require_session(session).await?;
            Ok(session
                .pipeline()
                .get_json::<serde_json::Value>(PROTECTED_DATA_PATH)
                .await?)
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Compact logs on stderr so stdout stays machine-readable
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .compact()
                .with_writer(std::io::stderr),
        )
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let invocation = parse_args(&args)?;

    let (config_path, required) = Config::resolve_path(invocation.config_path.as_deref());
    let config = Config::load(&config_path, required)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;
    info!(
        base_url = %config.client.base_url,
        storage_path = %config.client.storage_path.display(),
        "configuration loaded"
    );

    let session = build_controller(&config)?;
    let output = run(&session, invocation.command).await?;
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
