//! Process configuration: where data lives and which AI provider to use.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{PersistenceError, Result};
use crate::registry::CanvasRegistry;
use crate::storage::{FsStorage, MemoryStorage, Storage};

pub const DATA_DIR_ENV: &str = "NEXUS_DATA_DIR";
pub const EPHEMERAL_ENV: &str = "NEXUS_EPHEMERAL";
pub const GEMINI_KEY_ENV: &str = "GEMINI_API_KEY";

const AI_SETTINGS_FILE: &str = "ai.json";
const GEMINI_DEFAULT_MODEL: &str = "gemini-2.5-flash";

/// Resolve the default data directory (~/.nexus/).
pub fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".nexus")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NexusConfig {
    pub data_dir: PathBuf,
    /// Keep everything in memory; nothing survives the process.
    pub ephemeral: bool,
}

impl NexusConfig {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ephemeral: false,
        }
    }

    /// `NEXUS_DATA_DIR` overrides the data directory; `NEXUS_EPHEMERAL=1`
    /// (or `true`) selects in-memory storage.
    pub fn from_env() -> Self {
        Self::from_vars(
            std::env::var(DATA_DIR_ENV).ok(),
            std::env::var(EPHEMERAL_ENV).ok(),
        )
    }

    fn from_vars(data_dir: Option<String>, ephemeral: Option<String>) -> Self {
        let data_dir = data_dir
            .filter(|d| !d.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(default_data_dir);
        let ephemeral = ephemeral
            .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);
        Self {
            data_dir,
            ephemeral,
        }
    }

    pub fn storage(&self) -> Arc<dyn Storage> {
        if self.ephemeral {
            Arc::new(MemoryStorage::new())
        } else {
            Arc::new(FsStorage::new(&self.data_dir))
        }
    }

    pub fn open_registry(&self) -> Result<CanvasRegistry> {
        tracing::info!(
            data_dir = %self.data_dir.display(),
            ephemeral = self.ephemeral,
            "opening canvas registry"
        );
        CanvasRegistry::open(self.storage())
    }

    fn ai_settings_path(&self) -> PathBuf {
        self.data_dir.join(AI_SETTINGS_FILE)
    }

    /// Reads `ai.json`. Missing or malformed files yield defaults; a
    /// `GEMINI_API_KEY` in the environment fills in an unconfigured setup.
    pub fn read_ai_settings(&self) -> AiSettings {
        let stored: AiSettings = fs::read_to_string(self.ai_settings_path())
            .ok()
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_default();
        if ai_configured(&stored) {
            return stored;
        }
        match std::env::var(GEMINI_KEY_ENV) {
            Ok(key) if !key.trim().is_empty() => AiSettings {
                provider: "google".to_string(),
                api_key: key,
                model: GEMINI_DEFAULT_MODEL.to_string(),
            },
            _ => stored,
        }
    }

    pub fn write_ai_settings(&self, settings: &AiSettings) -> std::result::Result<(), PersistenceError> {
        let op = "write ai settings";
        fs::create_dir_all(&self.data_dir).map_err(|e| PersistenceError::io(op, None, &e))?;
        let json = serde_json::to_string_pretty(settings)
            .map_err(|e| PersistenceError::codec(op, None, &e))?;
        fs::write(self.ai_settings_path(), json).map_err(|e| PersistenceError::io(op, None, &e))
    }
}

impl Default for NexusConfig {
    fn default() -> Self {
        Self::new(default_data_dir())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AiSettings {
    pub provider: String,
    pub api_key: String,
    pub model: String,
}

pub fn ai_configured(settings: &AiSettings) -> bool {
    !settings.provider.is_empty()
        && !settings.model.is_empty()
        && (settings.provider == "ollama" || !settings.api_key.is_empty())
}
