use crate::error::AssistantError;
use crate::models::ModelConfig;
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;

/// Preamble placed ahead of every chat turn.
pub const SYSTEM_PROMPT: &str = "You are a programming assistant embedded in the user's code editor.
You can read the files and selections the user shares with you, suggest edits to them,
and propose terminal commands to run.

Formatting rules:
- Answer briefly; skip preambles and restating the question
- Put inline code in <code> and code blocks in <pre>
- Wrap prose in <p>
- Prefer short, plain sentences";

/// Wraps a prompt in the system preamble and the `User:` / `Assistant:` turn markers.
pub fn build_prompt(prompt: &str) -> String {
    format!("{}\n\nUser: {}\n\nAssistant:", SYSTEM_PROMPT, prompt)
}

// Trait defining the interface for text-generation backends
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    /// Sends `prompt` verbatim and returns the full completion text.
    async fn complete(&self, prompt: &str, config: &ModelConfig) -> Result<String, AssistantError>;

    /// Chat-turn completion: `prompt` is wrapped with [`build_prompt`] first.
    async fn generate(&self, prompt: &str, config: &ModelConfig) -> Result<String, AssistantError> {
        self.complete(&build_prompt(prompt), config).await
    }
}

// --- Ollama Provider Implementation ---

#[derive(Serialize, Debug)]
struct GenerateRequestBody<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool, // always false; the reply arrives in one body
}

pub struct OllamaProvider {
    client: Client,
}

impl OllamaProvider {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
        }
    }
}

impl Default for OllamaProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl GenerationBackend for OllamaProvider {
    async fn complete(&self, prompt: &str, config: &ModelConfig) -> Result<String, AssistantError> {
        let request_url = format!(
            "{}/api/generate",
            config.endpoint_base_url.trim_end_matches('/')
        );
        log::info!(
            "Sending generate request to {} using model: {}",
            request_url,
            config.model_name
        );

        let request_body = GenerateRequestBody {
            model: &config.model_name,
            prompt,
            stream: false,
        };

        let response = self
            .client
            .post(&request_url)
            .json(&request_body)
            .send()
            .await
            .map_err(|e| AssistantError::BackendUnreachable(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| AssistantError::BackendUnreachable(e.to_string()))?;

        if !status.is_success() {
            log::error!("Generate request failed with status {}: {}", status, body);
            return Err(AssistantError::BackendUnreachable(format!(
                "request failed with status {}: {}",
                status, body
            )));
        }

        let json: serde_json::Value = serde_json::from_str(&body).map_err(|e| {
            log::warn!("Generate response was not JSON: {} - Body: {:.200}", e, body);
            AssistantError::MalformedResponse(e.to_string())
        })?;

        match json.get("response").and_then(|v| v.as_str()) {
            Some(text) => {
                log::debug!("Received {} chars from backend", text.len());
                Ok(text.to_string())
            }
            None => {
                log::warn!("Generate response is missing the 'response' field: {:.200}", body);
                Err(AssistantError::MalformedResponse(
                    "missing 'response' text field".to_string(),
                ))
            }
        }
    }
}
