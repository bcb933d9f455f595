use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{domain::PresenceStatus, errors::Error, Result};

pub const DEFAULT_SETTINGS_FILE: &str = "config.json";
pub const DEFAULT_CREDENTIALS_FILE: &str = "tokens.txt";
pub const DEFAULT_API_BASE: &str = "https://discord.com/api/v10";
pub const DEFAULT_HTTP_TIMEOUT_MS: u64 = 10_000;

/// Process-level configuration read from the environment.
#[derive(Clone, Debug)]
pub struct Config {
    // Stores
    pub settings_file: PathBuf,
    pub credentials_file: PathBuf,

    // REST
    pub api_base: String,
    pub http_timeout: Duration,

    pub presence_status: PresenceStatus,
}

impl Config {
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));
        Self::from_lookup(env_str)
    }

    /// Build from an arbitrary variable lookup instead of the process env.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str| lookup(key).and_then(non_empty);

        let presence_status = match var("ROTA_PRESENCE_STATUS") {
            Some(raw) => raw.parse::<PresenceStatus>()?,
            None => PresenceStatus::default(),
        };

        let http_timeout_ms = match var("ROTA_HTTP_TIMEOUT_MS") {
            Some(raw) => raw.trim().parse::<u64>().map_err(|_| {
                Error::Config(format!("ROTA_HTTP_TIMEOUT_MS must be milliseconds, got {raw:?}"))
            })?,
            None => DEFAULT_HTTP_TIMEOUT_MS,
        };

        let api_base = var("ROTA_API_BASE")
            .map(|s| s.trim().trim_end_matches('/').to_string())
            .unwrap_or_else(|| DEFAULT_API_BASE.to_string());

        Ok(Self {
            settings_file: var("ROTA_SETTINGS_FILE")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_SETTINGS_FILE)),
            credentials_file: var("ROTA_CREDENTIALS_FILE")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_CREDENTIALS_FILE)),
            api_base,
            http_timeout: Duration::from_millis(http_timeout_ms),
            presence_status,
        })
    }
}

fn env_str(key: &str) -> Option<String> {
    env::var(key).ok()
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

        env::set_var(key, unquote(v.trim()));
    }
}

fn unquote(val: &str) -> &str {
    if val.len() >= 2
        && ((val.starts_with('"') && val.ends_with('"'))
            || (val.starts_with('\'') && val.ends_with('\'')))
    {
        &val[1..val.len() - 1]
    } else {
        val
    }
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}
