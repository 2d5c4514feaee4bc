use serde::{Deserialize, Serialize};

use crate::identity::ModelFamily;

/// A model declared in the project runtime section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelRecord {
    /// Name used to reference this model elsewhere in the config.
    pub name: String,
    /// Wire identifier, optionally carrying a quantization suffix
    /// (e.g. `unsloth/Qwen3-1.7B-GGUF:Q4_K_M`).
    pub model: String,
    #[serde(default = "d_family")]
    pub family: ModelFamily,
    /// Context window size.  `None` lets the backend pick; zero or negative
    /// values are rejected at load time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_window: Option<i64>,
    /// Backend-specific settings, passed through opaquely.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settings: Option<serde_json::Value>,
}

fn d_family() -> ModelFamily {
    ModelFamily::Language
}

/// Runtime section: the models a project can serve, plus the default one.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub models: Vec<ModelRecord>,
    /// Name of the model used when a request does not specify one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_model: Option<String>,
}

impl RuntimeConfig {
    /// Look up a model record by its config name.
    pub fn model(&self, name: &str) -> Option<&ModelRecord> {
        self.models.iter().find(|m| m.name == name)
    }

    /// The record named by `default_model`, if any.
    pub fn default_model_record(&self) -> Option<&ModelRecord> {
        self.default_model.as_deref().and_then(|n| self.model(n))
    }
}
