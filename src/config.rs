// Vault Desktop - Configuration Management
// Local key/value settings store and coordinator timing

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::SettingsError;

/// Settings keys, shared by every window
pub mod keys {
    pub const AUTO_LOCK_SECONDS: &str = "autoLockSeconds";
    pub const CLOSE_TO_TRAY: &str = "closeToTray";
    pub const BREACH_CHECK: &str = "hibpEnabled";
    pub const LIVE_UPDATES: &str = "liveUpdates";
    pub const LAST_DATABASE_PATH: &str = "lastDatabasePath";
}

/// String key/value persistence for local preferences.
///
/// Values are stored as strings so every window parses them the same way.
pub trait SettingsStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, SettingsError>;
    fn set(&self, key: &str, value: &str) -> Result<(), SettingsError>;
    fn remove(&self, key: &str) -> Result<(), SettingsError>;
}

/// Settings kept in memory only (tests, or when no data dir is available)
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: Mutex<BTreeMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn values(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, String>> {
        // Nothing panics while holding this lock, recover the map if it ever does.
        self.values.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl SettingsStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, SettingsError> {
        Ok(self.values().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), SettingsError> {
        self.values().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), SettingsError> {
        self.values().remove(key);
        Ok(())
    }
}

/// Settings persisted as a pretty-printed JSON object in the app data dir
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonFileStore {
    pub const FILE_NAME: &'static str = "settings.json";

    /// Open (or lazily create) `settings.json` inside `data_dir`
    pub fn open(data_dir: &Path) -> Result<Self, SettingsError> {
        std::fs::create_dir_all(data_dir)?;
        Ok(Self {
            path: data_dir.join(Self::FILE_NAME),
            write_lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<BTreeMap<String, String>, SettingsError> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        let content = std::fs::read_to_string(&self.path)?;
        if content.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        Ok(serde_json::from_str(&content)?)
    }

    fn update(
        &self,
        apply: impl FnOnce(&mut BTreeMap<String, String>),
    ) -> Result<(), SettingsError> {
        let _guard = self
            .write_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut values = self.load()?;
        apply(&mut values);
        let content = serde_json::to_string_pretty(&values)?;
        std::fs::write(&self.path, content)?;
        Ok(())
    }
}

impl SettingsStore for JsonFileStore {
    fn get(&self, key: &str) -> Result<Option<String>, SettingsError> {
        Ok(self.load()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), SettingsError> {
        self.update(|values| {
            values.insert(key.to_string(), value.to_string());
        })
    }

    fn remove(&self, key: &str) -> Result<(), SettingsError> {
        self.update(|values| {
            values.remove(key);
        })
    }
}

/// Typed view over the settings store
#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AppSettings {
    /// Inactivity threshold; `0` disables auto-lock
    pub auto_lock_seconds: u64,
    pub close_to_tray: bool,
    pub breach_check: bool,
    pub live_updates: bool,
    pub last_database_path: Option<String>,
}

impl AppSettings {
    /// Read every known key, falling back to defaults for missing or bad values
    pub fn load(store: &dyn SettingsStore) -> Result<Self, SettingsError> {
        Ok(Self {
            auto_lock_seconds: parse_seconds(store.get(keys::AUTO_LOCK_SECONDS)?),
            close_to_tray: parse_flag(store.get(keys::CLOSE_TO_TRAY)?),
            breach_check: parse_flag(store.get(keys::BREACH_CHECK)?),
            live_updates: parse_flag(store.get(keys::LIVE_UPDATES)?),
            last_database_path: store
                .get(keys::LAST_DATABASE_PATH)?
                .filter(|path| !path.is_empty()),
        })
    }
}

fn parse_seconds(raw: Option<String>) -> u64 {
    let Some(raw) = raw else {
        return 0;
    };
    match raw.trim().parse::<u64>() {
        Ok(seconds) => seconds,
        Err(_) => {
            log::warn!("[Settings] Ignoring invalid auto-lock value {:?}", raw);
            0
        }
    }
}

fn parse_flag(raw: Option<String>) -> bool {
    raw.is_some_and(|value| value.trim() == "true")
}

/// Keep only the digits of a user-typed seconds value (empty means disabled)
pub fn sanitize_seconds(input: &str) -> String {
    input.chars().filter(char::is_ascii_digit).collect()
}

// ============================================================================
// Coordinator timing
// ============================================================================

pub const DEFAULT_BACKEND_URL: &str = "http://127.0.0.1:8000";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CoordinatorConfig {
    /// Upper bound on waiting for every child's close acknowledgment
    pub close_ack_timeout: Duration,
    /// Grace period between the last ack and re-enumerating live windows
    pub settle_interval: Duration,
    /// How often the inactivity monitor samples the activity clock
    pub activity_poll_interval: Duration,
    /// How often live updates look for changes made outside this app
    pub live_sync_interval: Duration,
    /// Upper bound on any single engine request
    pub backend_timeout: Duration,
    pub backend_url: String,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            close_ack_timeout: Duration::from_secs(30),
            settle_interval: Duration::from_millis(150),
            activity_poll_interval: Duration::from_secs(1),
            live_sync_interval: Duration::from_secs(5),
            backend_timeout: Duration::from_secs(10),
            backend_url: DEFAULT_BACKEND_URL.to_string(),
        }
    }
}

impl CoordinatorConfig {
    /// Defaults overridden by `VAULT_BACKEND_URL`, `VAULT_BACKEND_TIMEOUT_MS`,
    /// `VAULT_CLOSE_ACK_TIMEOUT_MS` and `VAULT_SETTLE_MS`
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(url) = std::env::var("VAULT_BACKEND_URL") {
            if !url.trim().is_empty() {
                config.backend_url = url.trim().trim_end_matches('/').to_string();
            }
        }
        if let Some(ms) = env_millis("VAULT_BACKEND_TIMEOUT_MS") {
            config.backend_timeout = ms;
        }
        if let Some(ms) = env_millis("VAULT_CLOSE_ACK_TIMEOUT_MS") {
            config.close_ack_timeout = ms;
        }
        if let Some(ms) = env_millis("VAULT_SETTLE_MS") {
            config.settle_interval = ms;
        }
        config
    }
}

fn env_millis(name: &str) -> Option<Duration> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse::<u64>() {
        Ok(ms) => Some(Duration::from_millis(ms)),
        Err(_) => {
            log::warn!("[Settings] Ignoring invalid {}={:?}", name, raw);
            None
        }
    }
}
