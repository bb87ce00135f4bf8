use std::path::Path;
use std::time::Duration;

use passlock_crypto::KdfParams;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{VaultError, VaultResult};
use crate::reconciler::ReconcilerConfig;
use crate::session::SessionConfig;

pub const ENV_API_BASE_URL: &str = "PASSLOCK_API_BASE_URL";
pub const ENV_API_TOKEN: &str = "PASSLOCK_API_TOKEN";

pub const MIN_DEBOUNCE_MILLIS: u64 = 50;
pub const MAX_DEBOUNCE_MILLIS: u64 = 5000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiSettings {
    pub base_url: String,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    15
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSettings {
    pub idle_timeout_secs: u64,
    pub absolute_timeout_secs: u64,
    #[serde(default = "default_tick_millis")]
    pub tick_millis: u64,
}

fn default_tick_millis() -> u64 {
    1000
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutosaveSettings {
    pub debounce_millis: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PasslockSettings {
    #[serde(default)]
    pub api: ApiSettings,
    #[serde(default)]
    pub session: SessionSettings,
    #[serde(default)]
    pub autosave: AutosaveSettings,
    /// Cost parameters for new envelopes. Existing vaults keep their own.
    #[serde(default)]
    pub kdf: KdfParams,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8000/vault".into(),
            token: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            idle_timeout_secs: 10 * 60,
            absolute_timeout_secs: 60 * 60,
            tick_millis: default_tick_millis(),
        }
    }
}

impl Default for AutosaveSettings {
    fn default() -> Self {
        Self {
            debounce_millis: 700,
        }
    }
}

impl Default for PasslockSettings {
    fn default() -> Self {
        Self {
            api: ApiSettings::default(),
            session: SessionSettings::default(),
            autosave: AutosaveSettings::default(),
            kdf: KdfParams::default(),
        }
    }
}

impl PasslockSettings {
    /// Defaults, then `path` if it exists, then environment overrides.
    pub fn load(path: &Path) -> VaultResult<Self> {
        let mut settings = if path.exists() {
            let raw = std::fs::read_to_string(path)
                .map_err(|e| VaultError::Settings(format!("{}: {e}", path.display())))?;
            debug!(path = %path.display(), "loaded settings file");
            serde_json::from_str(&raw)
                .map_err(|e| VaultError::Settings(format!("{}: {e}", path.display())))?
        } else {
            Self::default()
        };
        settings.apply_env(|key| std::env::var(key).ok());
        settings.validate()?;
        Ok(settings)
    }

    pub fn save(&self, path: &Path) -> VaultResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| VaultError::Settings(format!("{}: {e}", parent.display())))?;
        }
        let raw = serde_json::to_string_pretty(self)?;
        std::fs::write(path, raw)
            .map_err(|e| VaultError::Settings(format!("{}: {e}", path.display())))
    }

    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(base_url) = lookup(ENV_API_BASE_URL).filter(|v| !v.is_empty()) {
            self.api.base_url = base_url;
        }
        if let Some(token) = lookup(ENV_API_TOKEN).filter(|v| !v.is_empty()) {
            self.api.token = Some(token);
        }
    }

    pub fn validate(&self) -> VaultResult<()> {
        if self.api.base_url.trim().is_empty() {
            return Err(VaultError::Settings("api.base_url is empty".into()));
        }
        if self.api.timeout_secs == 0 {
            return Err(VaultError::Settings("api.timeout_secs must be positive".into()));
        }
        let session = &self.session;
        if session.idle_timeout_secs == 0 || session.absolute_timeout_secs == 0 {
            return Err(VaultError::Settings("session timeouts must be positive".into()));
        }
        if session.idle_timeout_secs > session.absolute_timeout_secs {
            return Err(VaultError::Settings(
                "session.idle_timeout_secs exceeds session.absolute_timeout_secs".into(),
            ));
        }
        if session.tick_millis == 0 {
            return Err(VaultError::Settings("session.tick_millis must be positive".into()));
        }
        if !(MIN_DEBOUNCE_MILLIS..=MAX_DEBOUNCE_MILLIS).contains(&self.autosave.debounce_millis) {
            return Err(VaultError::Settings(format!(
                "autosave.debounce_millis must be within {MIN_DEBOUNCE_MILLIS}..={MAX_DEBOUNCE_MILLIS}"
            )));
        }
        self.kdf
            .validate()
            .map_err(|e| VaultError::Settings(format!("kdf: {e}")))
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            idle_timeout: Duration::from_secs(self.session.idle_timeout_secs),
            absolute_timeout: Duration::from_secs(self.session.absolute_timeout_secs),
            tick: Duration::from_millis(self.session.tick_millis),
        }
    }

    pub fn reconciler_config(&self) -> ReconcilerConfig {
        ReconcilerConfig {
            debounce: Duration::from_millis(self.autosave.debounce_millis),
        }
    }
}
