use thiserror::Error;
use uuid::Uuid;

/// Failures surfaced by the assistant pipeline.
///
/// Only `BackendUnreachable`, `MalformedResponse`, `GenerationInProgress` and
/// `Cancelled` ever reach the UI as part of an ask; the rest are either
/// absorbed and logged or reported for non-ask messages.
#[derive(Debug, Error)]
pub enum AssistantError {
    #[error("Failed to communicate with Ollama: {0}")]
    BackendUnreachable(String),

    #[error("Invalid response from Ollama: {0}")]
    MalformedResponse(String),

    #[error("Thread {0} not found")]
    ThreadNotFound(Uuid),

    #[error("Failed to read file {path}: {source}")]
    FileReadFailure {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to execute command '{command}': {source}")]
    CommandExecutionFailure {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("A reply is already being generated for thread {0}")]
    GenerationInProgress(Uuid),

    #[error("Generation cancelled for thread {0}")]
    Cancelled(Uuid),

    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    #[error("Unknown setting '{0}'")]
    UnknownSetting(String),
}
