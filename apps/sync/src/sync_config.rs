use std::env;
use std::path::PathBuf;
use std::time::Duration;

use milagro_application::{BootstrapCredential, ReconnectPolicy};
use milagro_core::AppError;
use tracing_subscriber::EnvFilter;

use crate::admin_commands::AdminCommand;

/// What the binary was asked to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncCommand {
    Run,
    Migrate,
    Login,
    Logout,
    Whoami,
    Admins(AdminCommand),
}

impl SyncCommand {
    /// Parses the arguments following the program name.
    pub fn parse(arguments: &[String]) -> Result<Self, AppError> {
        let Some((command, rest)) = arguments.split_first() else {
            return Ok(Self::Run);
        };

        match (command.as_str(), rest.is_empty()) {
            ("run", true) => Ok(Self::Run),
            ("migrate", true) => Ok(Self::Migrate),
            ("login", true) => Ok(Self::Login),
            ("logout", true) => Ok(Self::Logout),
            ("whoami", true) => Ok(Self::Whoami),
            ("admins", _) => AdminCommand::parse(rest).map(Self::Admins),
            (other, _) => Err(AppError::Validation(format!(
                "unknown command '{other}', expected run, migrate, login, logout, whoami or admins"
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub command: SyncCommand,
    pub database_url: String,
    pub auth_url: String,
    pub service_key: String,
    pub session_path: PathBuf,
    pub remote_timeout: Duration,
    pub reconnect: ReconnectPolicy,
    pub bootstrap: Option<BootstrapCredential>,
}

impl SyncConfig {
    pub fn load() -> Result<Self, AppError> {
        let arguments: Vec<String> = env::args().skip(1).collect();
        let command = SyncCommand::parse(&arguments)?;

        let database_url = required_env("DATABASE_URL")?;
        let auth_url = env::var("MILAGRO_AUTH_URL")
            .unwrap_or_else(|_| "http://127.0.0.1:54321".to_owned())
            .trim_end_matches('/')
            .to_owned();
        let service_key = if command == SyncCommand::Migrate {
            env::var("MILAGRO_SERVICE_KEY").unwrap_or_default()
        } else {
            required_non_empty_env("MILAGRO_SERVICE_KEY")?
        };
        let session_path = env::var("MILAGRO_SESSION_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(".milagro/session.json"));

        let remote_timeout_ms = parse_env_u64("MILAGRO_REMOTE_TIMEOUT_MS", 30_000)?;
        let reconnect_base_ms = parse_env_u64("MILAGRO_RECONNECT_BASE_MS", 500)?;
        let reconnect_max_ms = parse_env_u64("MILAGRO_RECONNECT_MAX_MS", 30_000)?;
        let degraded_after = parse_env_u32("MILAGRO_DEGRADED_AFTER", 5)?;

        if remote_timeout_ms == 0 {
            return Err(AppError::Validation(
                "MILAGRO_REMOTE_TIMEOUT_MS must be greater than zero".to_owned(),
            ));
        }
        if reconnect_base_ms == 0 || reconnect_max_ms < reconnect_base_ms {
            return Err(AppError::Validation(
                "MILAGRO_RECONNECT_MAX_MS must be at least MILAGRO_RECONNECT_BASE_MS, which must be greater than zero"
                    .to_owned(),
            ));
        }
        if degraded_after == 0 {
            return Err(AppError::Validation(
                "MILAGRO_DEGRADED_AFTER must be greater than zero".to_owned(),
            ));
        }

        let bootstrap = bootstrap_credential(
            optional_env("MILAGRO_BOOTSTRAP_ADMIN_EMAIL"),
            optional_env("MILAGRO_BOOTSTRAP_ADMIN_PASSWORD"),
        )?;

        Ok(Self {
            command,
            database_url,
            auth_url,
            service_key,
            session_path,
            remote_timeout: Duration::from_millis(remote_timeout_ms),
            reconnect: ReconnectPolicy {
                base_delay: Duration::from_millis(reconnect_base_ms),
                max_delay: Duration::from_millis(reconnect_max_ms),
                degraded_after,
            },
            bootstrap,
        })
    }
}

/// Reads the initial password of an admin created from the command line.
pub fn new_admin_password() -> Result<String, AppError> {
    required_non_empty_env("MILAGRO_ADMIN_PASSWORD")
}

/// Reads the interactive sign-in pair used by the `login` command.
pub fn login_credentials() -> Result<(String, String), AppError> {
    Ok((
        required_non_empty_env("MILAGRO_LOGIN_EMAIL")?,
        required_non_empty_env("MILAGRO_LOGIN_PASSWORD")?,
    ))
}

pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .init();
}

fn bootstrap_credential(
    email: Option<String>,
    password: Option<String>,
) -> Result<Option<BootstrapCredential>, AppError> {
    match (email, password) {
        (None, None) => Ok(None),
        (Some(email), Some(password)) => {
            BootstrapCredential::new(email.as_str(), password.as_str()).map(Some)
        }
        _ => Err(AppError::Validation(
            "MILAGRO_BOOTSTRAP_ADMIN_EMAIL and MILAGRO_BOOTSTRAP_ADMIN_PASSWORD must be set together"
                .to_owned(),
        )),
    }
}

fn optional_env(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .filter(|value| !value.trim().is_empty())
}

fn required_env(name: &str) -> Result<String, AppError> {
    env::var(name).map_err(|_| AppError::Validation(format!("{name} is required")))
}

fn required_non_empty_env(name: &str) -> Result<String, AppError> {
    let value = required_env(name)?;
    if value.trim().is_empty() {
        return Err(AppError::Validation(format!("{name} must not be empty")));
    }

    Ok(value)
}

fn parse_env_u32(name: &str, default: u32) -> Result<u32, AppError> {
    match env::var(name) {
        Ok(value) => value.parse::<u32>().map_err(|error| {
            AppError::Validation(format!("invalid {name} value '{value}': {error}"))
        }),
        Err(_) => Ok(default),
    }
}

fn parse_env_u64(name: &str, default: u64) -> Result<u64, AppError> {
    match env::var(name) {
        Ok(value) => value.parse::<u64>().map_err(|error| {
            AppError::Validation(format!("invalid {name} value '{value}': {error}"))
        }),
        Err(_) => Ok(default),
    }
}
