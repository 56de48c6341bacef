use crate::error::AssistantError;
use crate::models::ModelConfig;
use crate::storage::KeyValueStore;
use std::sync::Arc;
use tokio::sync::RwLock;

const MODEL_CONFIG_KEY: &str = "model_config";

pub const ENDPOINT_SETTING: &str = "endpointBaseUrl";
pub const MODEL_SETTING: &str = "modelName";

const ENDPOINT_ENV_VAR: &str = "OLLAMA_HOST";
const MODEL_ENV_VAR: &str = "OLLAMA_MODEL";

/// Runtime-mutable backend settings, persisted next to the conversations.
pub struct SettingsStore {
    storage: Arc<dyn KeyValueStore>,
    current: RwLock<ModelConfig>,
}

impl SettingsStore {
    /// Loads the stored config (defaults when absent or unreadable), then applies
    /// `OLLAMA_HOST` / `OLLAMA_MODEL` from the environment.
    pub async fn load(storage: Arc<dyn KeyValueStore>) -> Self {
        let stored = match storage.get(MODEL_CONFIG_KEY).await {
            Ok(Some(json)) => serde_json::from_str(&json).unwrap_or_else(|e| {
                log::warn!("Ignoring unreadable stored model config: {}", e);
                ModelConfig::default()
            }),
            Ok(None) => ModelConfig::default(),
            Err(e) => {
                log::error!("Failed to load model config, using defaults: {:?}", e);
                ModelConfig::default()
            }
        };

        let config = apply_env_overrides(stored, |name| std::env::var(name).ok());
        log::info!(
            "Using model '{}' at {}",
            config.model_name,
            config.endpoint_base_url
        );

        Self {
            storage,
            current: RwLock::new(config),
        }
    }

    pub async fn model_config(&self) -> ModelConfig {
        self.current.read().await.clone()
    }

    /// Settings-style key write. `key` is `endpointBaseUrl` or `modelName`.
    pub async fn update(&self, key: &str, value: &str) -> Result<ModelConfig, AssistantError> {
        let value = value.trim();
        let mut current = self.current.write().await;
        match key {
            ENDPOINT_SETTING => current.endpoint_base_url = value.to_string(),
            MODEL_SETTING => current.model_name = value.to_string(),
            other => return Err(AssistantError::UnknownSetting(other.to_string())),
        }
        log::info!("Setting '{}' updated to '{}'", key, value);

        let updated = current.clone();
        match serde_json::to_string(&updated) {
            Ok(json) => {
                if let Err(e) = self.storage.set(MODEL_CONFIG_KEY, &json).await {
                    log::error!("Failed to persist model config: {:?}", e);
                }
            }
            Err(e) => log::error!("Failed to serialize model config: {}", e),
        }
        Ok(updated)
    }
}

/// Environment values win over stored ones; blank variables are ignored.
pub fn apply_env_overrides(
    mut config: ModelConfig,
    lookup: impl Fn(&str) -> Option<String>,
) -> ModelConfig {
    if let Some(host) = lookup(ENDPOINT_ENV_VAR).filter(|v| !v.trim().is_empty()) {
        log::debug!("Endpoint overridden by {}", ENDPOINT_ENV_VAR);
        config.endpoint_base_url = normalize_host(host.trim());
    }
    if let Some(model) = lookup(MODEL_ENV_VAR).filter(|v| !v.trim().is_empty()) {
        log::debug!("Model overridden by {}", MODEL_ENV_VAR);
        config.model_name = model.trim().to_string();
    }
    config
}

// OLLAMA_HOST is commonly set as a bare `host:port`
fn normalize_host(host: &str) -> String {
    if host.starts_with("http://") || host.starts_with("https://") {
        host.to_string()
    } else {
        format!("http://{}", host)
    }
}
