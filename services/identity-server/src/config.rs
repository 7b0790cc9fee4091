//! Configuration types and loading
//!
//! Config precedence: env vars > config file > defaults. Passwords in
//! `[[users]]` are hashed as soon as the directory is built and never logged.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use common::Secret;
use identity::{DEFAULT_ACCESS_TTL_SECS, DEFAULT_REFRESH_TTL_SECS, UserRecord};
use serde::Deserialize;

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    /// Accounts served by the directory. The demo accounts are used when empty.
    #[serde(default)]
    pub users: Vec<UserConfig>,
}

/// HTTP listener settings
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    #[serde(default = "default_access_ttl")]
    pub access_ttl_secs: u64,
    #[serde(default = "default_refresh_ttl")]
    pub refresh_ttl_secs: u64,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

/// One directory account
#[derive(Debug, Deserialize)]
pub struct UserConfig {
    pub id: u64,
    pub email: String,
    pub name: String,
    #[serde(default = "default_role")]
    pub role: String,
    pub password: Secret<String>,
}

fn default_access_ttl() -> u64 {
    DEFAULT_ACCESS_TTL_SECS
}

fn default_refresh_ttl() -> u64 {
    DEFAULT_REFRESH_TTL_SECS
}

fn default_max_connections() -> usize {
    1000
}

fn default_role() -> String {
    "user".into()
}

impl Config {
    /// Load configuration from a TOML file, then overlay environment variables.
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;

        if let Ok(addr) = std::env::var("IDENTITY_LISTEN_ADDR") {
            config.server.listen_addr = addr.parse().map_err(|e| {
                common::Error::Config(format!("invalid IDENTITY_LISTEN_ADDR {addr:?}: {e}"))
            })?;
        }

        if config.server.access_ttl_secs == 0 {
            return Err(common::Error::Config(
                "access_ttl_secs must be greater than 0".into(),
            ));
        }

        if config.server.refresh_ttl_secs <= config.server.access_ttl_secs {
            return Err(common::Error::Config(
                "refresh_ttl_secs must be greater than access_ttl_secs".into(),
            ));
        }

        if config.server.max_connections == 0 {
            return Err(common::Error::Config(
                "max_connections must be greater than 0".into(),
            ));
        }

        for (i, user) in config.users.iter().enumerate() {
            if !user.email.contains('@') {
                return Err(common::Error::Config(format!(
                    "users[{i}].email is not an email address: {}",
                    user.email
                )));
            }
            if user.password.expose().is_empty() {
                return Err(common::Error::Config(format!(
                    "users[{i}].password must not be empty"
                )));
            }
            let duplicate = config.users[..i]
                .iter()
                .any(|u| u.id == user.id || u.email == user.email);
            if duplicate {
                return Err(common::Error::Config(format!(
                    "users[{i}] duplicates the id or email of an earlier user"
                )));
            }
        }

        Ok(config)
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("identity-server.toml")
    }

    pub fn access_ttl(&self) -> Duration {
        Duration::from_secs(self.server.access_ttl_secs)
    }

    pub fn refresh_ttl(&self) -> Duration {
        Duration::from_secs(self.server.refresh_ttl_secs)
    }

    /// Directory records for the configured users, or the demo accounts.
    pub fn user_records(&self) -> Vec<UserRecord> {
        if self.users.is_empty() {
            return identity::demo_users();
        }
        self.users
            .iter()
            .map(|u| {
                UserRecord::new(
                    u.id,
                    u.email.clone(),
                    u.name.clone(),
                    u.role.clone(),
                    u.password.expose(),
                )
            })
            .collect()
    }
}
