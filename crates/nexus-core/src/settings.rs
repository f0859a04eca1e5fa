//! Per-canvas settings. Stored and returned by the core; only the
//! collaborators (auto-linking, expansion, generation) act on them.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(default)]
pub struct AutoLinking {
    pub enabled: bool,
    /// Upper bound on edges proposed for one new node.
    pub max_connections: usize,
    /// Minimum confidence for a proposed edge to be kept.
    pub threshold: f64,
}

impl Default for AutoLinking {
    fn default() -> Self {
        Self {
            enabled: true,
            max_connections: 3,
            threshold: 0.6,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(default)]
pub struct Expansion {
    pub max_subnodes: usize,
}

impl Default for Expansion {
    fn default() -> Self {
        Self { max_subnodes: 5 }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
pub enum Tone {
    #[default]
    Technical,
    Concise,
    Creative,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(default)]
pub struct ContentGeneration {
    pub tone: Tone,
    pub detail_level: String,
}

impl Default for ContentGeneration {
    fn default() -> Self {
        Self {
            tone: Tone::Technical,
            detail_level: "High".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(default, deny_unknown_fields)]
pub struct CanvasSettings {
    pub auto_linking: AutoLinking,
    pub manual_connection_ai_assist: bool,
    pub expansion: Expansion,
    pub content_generation: ContentGeneration,
}

impl CanvasSettings {
    /// Shallow merge: each top-level key in `patch` replaces the current
    /// value wholesale. The result must still be valid settings.
    pub fn merge(&self, patch: &Value) -> Result<CanvasSettings> {
        let Value::Object(patch) = patch else {
            return Err(Error::invalid("settings patch must be a JSON object"));
        };
        let mut current = serde_json::to_value(self)
            .map_err(|e| Error::invalid(format!("settings could not be encoded: {e}")))?;
        if let Value::Object(map) = &mut current {
            for (key, value) in patch {
                map.insert(key.clone(), value.clone());
            }
        }
        let merged: CanvasSettings = serde_json::from_value(current)
            .map_err(|e| Error::invalid(format!("invalid settings: {e}")))?;
        merged.validate()?;
        Ok(merged)
    }

    pub fn validate(&self) -> Result<()> {
        let threshold = self.auto_linking.threshold;
        if !(0.0..=1.0).contains(&threshold) {
            return Err(Error::invalid(format!(
                "auto_linking.threshold {threshold} is outside 0..=1"
            )));
        }
        Ok(())
    }
}
