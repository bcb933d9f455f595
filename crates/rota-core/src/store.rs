//! File-backed stores for settings and the credential list.

use std::{
    collections::BTreeSet,
    fs,
    path::{Path, PathBuf},
};

use serde::Serialize;
use serde_json::Value;
use tracing::{error, info, warn};

use crate::{
    dispatch::{sanitize, sanitize_value, DispatchConfig, RawDispatchConfig},
    domain::{ChannelId, Credential, GuildId},
    Result,
};

/// Everything persisted in the settings file.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppSettings {
    pub guild_id: Option<GuildId>,
    pub voice_channel_id: Option<ChannelId>,
    pub dispatch: DispatchConfig,
}

impl AppSettings {
    /// Total parse of a settings document. Accepts the legacy `vcId` and
    /// `chatter` keys.
    pub fn from_value(value: &Value) -> Self {
        let text = |keys: &[&str]| {
            keys.iter()
                .filter_map(|k| value.get(*k))
                .find_map(|v| match v {
                    Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
                    Value::Number(n) => Some(n.to_string()),
                    _ => None,
                })
        };
        let dispatch = ["dispatch", "chatter"]
            .iter()
            .find_map(|k| value.get(*k))
            .map(sanitize_value)
            .unwrap_or_default();

        Self {
            guild_id: text(&["guildId"]).map(GuildId),
            voice_channel_id: text(&["voiceChannelId", "vcId"]).map(ChannelId),
            dispatch,
        }
    }

    /// Apply an edit to the dispatch section and re-sanitize it.
    pub fn edit_dispatch(&mut self, edit: impl FnOnce(&mut RawDispatchConfig)) {
        let mut raw = RawDispatchConfig::from(&self.dispatch);
        edit(&mut raw);
        self.dispatch = sanitize(&raw);
    }
}

pub struct SettingsStore {
    path: PathBuf,
}

impl SettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load settings. A missing file is created with defaults; an unreadable
    /// one is logged and replaced by defaults in memory only.
    pub fn load(&self) -> Result<AppSettings> {
        if !self.path.exists() {
            let defaults = AppSettings::default();
            self.save(&defaults)?;
            info!(path = %self.path.display(), "settings file created with defaults");
            return Ok(defaults);
        }

        let parsed = fs::read_to_string(&self.path)
            .map_err(crate::Error::from)
            .and_then(|raw| serde_json::from_str::<Value>(&raw).map_err(crate::Error::from));
        match parsed {
            Ok(value) => Ok(AppSettings::from_value(&value)),
            Err(e) => {
                error!(path = %self.path.display(), "failed to read settings, using defaults: {e}");
                Ok(AppSettings::default())
            }
        }
    }

    pub fn save(&self, settings: &AppSettings) -> Result<()> {
        let json = serde_json::to_string_pretty(settings)?;
        fs::write(&self.path, json)?;
        Ok(())
    }
}

pub struct CredentialStore {
    path: PathBuf,
}

impl CredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load, de-duplicate and sort. The file is rewritten when it held duplicates.
    pub fn load(&self) -> Result<Vec<Credential>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let raw = fs::read_to_string(&self.path)?;
        let lines: Vec<&str> = raw.lines().map(str::trim).filter(|l| !l.is_empty()).collect();
        let unique: BTreeSet<&str> = lines.iter().copied().collect();

        let credentials: Vec<Credential> = unique.iter().map(|s| Credential::new(*s)).collect();
        let duplicates = lines.len() - unique.len();
        if duplicates > 0 {
            warn!(removed = duplicates, "duplicate credentials removed");
            self.save(&credentials)?;
        }
        info!(count = credentials.len(), "credentials loaded");
        Ok(credentials)
    }

    pub fn save(&self, credentials: &[Credential]) -> Result<usize> {
        let unique: BTreeSet<&str> = credentials
            .iter()
            .map(|c| c.expose().trim())
            .filter(|s| !s.is_empty())
            .collect();
        let mut body = unique.iter().copied().collect::<Vec<_>>().join("\n");
        if !body.is_empty() {
            body.push('\n');
        }
        fs::write(&self.path, body)?;
        Ok(unique.len())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::dispatch::DispatchMode;

    #[test]
    fn missing_settings_file_writes_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let store = SettingsStore::new(dir.path().join("config.json"));

        let settings = store.load().unwrap();
        assert_eq!(settings, AppSettings::default());
        assert!(store.path().exists());
        assert_eq!(store.load().unwrap(), settings);
    }

    #[test]
    fn legacy_settings_are_sanitized_on_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let legacy = json!({
            "guildId": "123",
            "vcId": "456",
            "anticaptchaKey": null,
            "chatter": {
                "tokens": ["A", "A", " B "],
                "channelId": "789",
                "messageDelaySec": 4,
                "messages": ["hello"],
                "randomize": false
            }
        });
        fs::write(&path, legacy.to_string()).unwrap();

        let settings = SettingsStore::new(&path).load().unwrap();
        assert_eq!(settings.guild_id, Some(GuildId("123".to_string())));
        assert_eq!(settings.voice_channel_id, Some(ChannelId("456".to_string())));
        assert_eq!(settings.dispatch.accounts().len(), 2);
        assert_eq!(settings.dispatch.delay_seconds(), 4);
        assert_eq!(settings.dispatch.dispatch_mode(), DispatchMode::Sequential);
        assert!(settings.dispatch.is_dispatchable());
    }

    #[test]
    fn corrupt_settings_fall_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{ not json").unwrap();

        let settings = SettingsStore::new(&path).load().unwrap();
        assert_eq!(settings, AppSettings::default());
        assert_eq!(fs::read_to_string(&path).unwrap(), "{ not json");
    }

    #[test]
    fn saved_settings_use_canonical_shape() {
        let dir = tempfile::tempdir().unwrap();
        let store = SettingsStore::new(dir.path().join("config.json"));
        let mut settings = AppSettings::default();
        settings.edit_dispatch(|raw| {
            raw.add_accounts(["A", "B"]);
            raw.add_message("hi");
        });
        store.save(&settings).unwrap();

        let raw = fs::read_to_string(store.path()).unwrap();
        let value: Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["guildId"], Value::Null);
        assert_eq!(value["dispatch"]["messages"], json!([{"id": 1, "text": "hi"}]));
        assert_eq!(value["dispatch"]["dispatchMode"], "random");
        assert_eq!(store.load().unwrap(), settings);
    }

    #[test]
    fn credential_store_dedupes_sorts_and_rewrites() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tokens.txt");
        fs::write(&path, "zeta\n alpha \n\nzeta\nbeta\n").unwrap();

        let store = CredentialStore::new(&path);
        let creds = store.load().unwrap();
        let raw: Vec<&str> = creds.iter().map(Credential::expose).collect();
        assert_eq!(raw, vec!["alpha", "beta", "zeta"]);
        assert_eq!(fs::read_to_string(&path).unwrap(), "alpha\nbeta\nzeta\n");
    }

    #[test]
    fn missing_credential_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::new(dir.path().join("tokens.txt"));
        assert!(store.load().unwrap().is_empty());
        assert!(!store.path().exists());
    }
}
