use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{errors::Error, Result};

/// Typed configuration, read from the environment (and an optional `.env`).
#[derive(Clone, Debug)]
pub struct Config {
    // Platform
    pub telegram_bot_token: String,
    pub command_prefix: String,

    // Persistence
    pub database_url: String,
    pub database_max_connections: u32,

    // Pairing
    pub pairing_code_length: usize,
    pub pairing_code_ttl: Duration,
    pub pairing_max_attempts: usize,

    // Relay
    pub delivery_timeout: Duration,
    pub confirm_timeout: Duration,

    // Endpoint identity
    pub endpoint_name: Option<String>,
    pub endpoint_avatar_path: Option<PathBuf>,
}

impl Config {
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the config from an arbitrary key lookup (the environment in
    /// production, a map in tests).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).and_then(non_empty);

        let telegram_bot_token = get("TELEGRAM_BOT_TOKEN").ok_or_else(|| {
            Error::Config("TELEGRAM_BOT_TOKEN environment variable is required".to_string())
        })?;
        let command_prefix = get("COMMAND_PREFIX").unwrap_or_else(|| "/".to_string());

        let database_url =
            get("DATABASE_URL").unwrap_or_else(|| "sqlite://chanlink.db".to_string());
        let database_max_connections = parse_or(get("DATABASE_MAX_CONNECTIONS"), 5u32).max(1);

        // Code length below 4 makes collisions with a handful of pending codes plausible.
        let pairing_code_length = parse_or(get("PAIRING_CODE_LENGTH"), 6usize).clamp(4, 32);
        let pairing_code_ttl = Duration::from_secs(parse_or(get("PAIRING_CODE_TTL"), 900u64));
        let pairing_max_attempts = parse_or(get("PAIRING_MAX_ATTEMPTS"), 64usize).max(1);

        let delivery_timeout =
            Duration::from_millis(parse_or(get("DELIVERY_TIMEOUT_MS"), 10_000u64));
        let confirm_timeout = Duration::from_secs(parse_or(get("CONFIRM_TIMEOUT"), 180u64));

        let endpoint_name = get("ENDPOINT_NAME");
        let endpoint_avatar_path = get("ENDPOINT_AVATAR_PATH").map(PathBuf::from);

        Ok(Self {
            telegram_bot_token,
            command_prefix,
            database_url,
            database_max_connections,
            pairing_code_length,
            pairing_code_ttl,
            pairing_max_attempts,
            delivery_timeout,
            confirm_timeout,
            endpoint_name,
            endpoint_avatar_path,
        })
    }
}

fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };

    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((k, v)) = line.split_once('=') else {
            continue;
        };

        let key = k.trim();
        if key.is_empty() {
            continue;
        }
        if env::var_os(key).is_some() {
            continue; // do not override existing env
        }

        env::set_var(key, strip_quotes(v.trim()));
    }
}

fn strip_quotes(val: &str) -> &str {
    if val.len() >= 2
        && ((val.starts_with('"') && val.ends_with('"'))
            || (val.starts_with('\'') && val.ends_with('\'')))
    {
        return &val[1..val.len() - 1];
    }
    val
}

fn parse_or<T: std::str::FromStr>(v: Option<String>, default: T) -> T {
    v.and_then(|s| s.trim().parse::<T>().ok()).unwrap_or(default)
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}
