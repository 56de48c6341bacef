use crate::api::GenerationBackend;
use crate::config::SettingsStore;
use crate::context::{ContextAssembler, ContextOptions};
use crate::conversation::ConversationStore;
use crate::error::AssistantError;
use crate::protocol::{Notifier, OutboundMessage};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// One `sendMessage` from the UI.
#[derive(Clone, Debug, Default)]
pub struct AskRequest {
    pub message: String,
    pub include_context: bool,
    pub selected_files: Vec<String>,
}

/// Wraps the question with its context, or returns it untouched when there is none.
pub fn wrap_prompt(context: &str, message: &str) -> String {
    if context.is_empty() {
        message.to_string()
    } else {
        format!("Context:\n{}\n\nQuestion: {}", context, message)
    }
}

/// Proof that a thread is Generating. Taken before the ask starts so that a
/// cancel arriving right after a send still finds it; dropping it returns the
/// thread to Idle.
pub struct GenerationPermit {
    generating: Arc<DashMap<Uuid, CancellationToken>>,
    thread_id: Uuid,
    token: CancellationToken,
}

impl GenerationPermit {
    pub fn thread_id(&self) -> Uuid {
        self.thread_id
    }
}

impl Drop for GenerationPermit {
    fn drop(&mut self) {
        self.generating.remove(&self.thread_id);
        log::debug!("Thread {} is idle", self.thread_id);
    }
}

/// Runs asks: context assembly, the backend call and the resulting appends.
///
/// A thread is either Idle or Generating. A second ask on a Generating thread is
/// rejected before anything is appended or sent to the backend. Asks on different
/// threads may run concurrently.
pub struct RequestOrchestrator {
    conversations: Arc<ConversationStore>,
    settings: Arc<SettingsStore>,
    backend: Arc<dyn GenerationBackend>,
    assembler: ContextAssembler,
    selected_files: Mutex<Vec<String>>,
    generating: Arc<DashMap<Uuid, CancellationToken>>,
    notifier: Notifier,
}

impl RequestOrchestrator {
    pub fn new(
        conversations: Arc<ConversationStore>,
        settings: Arc<SettingsStore>,
        backend: Arc<dyn GenerationBackend>,
        assembler: ContextAssembler,
        notifier: Notifier,
    ) -> Self {
        Self {
            conversations,
            settings,
            backend,
            assembler,
            selected_files: Mutex::new(Vec::new()),
            generating: Arc::new(DashMap::new()),
            notifier,
        }
    }

    /// Runs one ask against the current thread. The resulting `response` envelope is
    /// sent to the UI and also returned; failures never escape as errors.
    pub async fn ask(&self, request: AskRequest) -> OutboundMessage {
        let thread_id = self.conversations.current_thread().await.id;
        self.ask_on(thread_id, request).await
    }

    /// Like [`ask`](Self::ask), but against a thread chosen by the caller.
    pub async fn ask_on(&self, thread_id: Uuid, request: AskRequest) -> OutboundMessage {
        match self.begin_generation(thread_id) {
            Ok(permit) => self.ask_with_permit(permit, request).await,
            Err(e) => {
                log::warn!("Rejecting ask: {}", e);
                self.respond(Err(e))
            }
        }
    }

    /// Runs an ask whose thread was already moved to Generating.
    pub async fn ask_with_permit(
        &self,
        permit: GenerationPermit,
        request: AskRequest,
    ) -> OutboundMessage {
        log::info!("Ask started on thread {}", permit.thread_id);
        let outcome = self.run_ask(&permit, request).await;
        drop(permit);
        self.respond(outcome)
    }

    /// Moves `thread_id` to Generating, or fails with `GenerationInProgress`.
    pub fn begin_generation(&self, thread_id: Uuid) -> Result<GenerationPermit, AssistantError> {
        let token = match self.generating.entry(thread_id) {
            Entry::Occupied(_) => return Err(AssistantError::GenerationInProgress(thread_id)),
            Entry::Vacant(vacant) => {
                let token = CancellationToken::new();
                vacant.insert(token.clone());
                token
            }
        };
        Ok(GenerationPermit {
            generating: self.generating.clone(),
            thread_id,
            token,
        })
    }

    fn respond(&self, outcome: Result<String, AssistantError>) -> OutboundMessage {
        let envelope = match outcome {
            Ok(reply) => OutboundMessage::reply(reply),
            Err(e) => OutboundMessage::failure(e),
        };
        self.notifier.notify(envelope.clone());
        envelope
    }

    async fn run_ask(
        &self,
        permit: &GenerationPermit,
        request: AskRequest,
    ) -> Result<String, AssistantError> {
        let thread_id = permit.thread_id;
        let selected_files = self.replace_selection(request.selected_files).await;

        let context = self
            .assembler
            .build_context(ContextOptions {
                include_editor_selection: request.include_context,
                selected_files: &selected_files,
            })
            .await;
        let prompt = wrap_prompt(&context, &request.message);

        // The raw question is stored before the backend call, so a failed call never loses it.
        if let Err(e) = self
            .conversations
            .append_message(thread_id, &request.message, true)
            .await
        {
            log::error!("Failed to store user message: {}", e);
        }

        let config = self.settings.model_config().await;
        let reply = tokio::select! {
            biased;
            _ = permit.token.cancelled() => Err(AssistantError::Cancelled(thread_id)),
            result = self.backend.generate(&prompt, &config) => result,
        };

        match reply {
            Ok(text) => {
                if let Err(e) = self
                    .conversations
                    .append_message(thread_id, &text, false)
                    .await
                {
                    // The thread was deleted mid-flight; the reply is still shown.
                    log::error!("Failed to store assistant reply: {}", e);
                }
                log::info!("Ask on thread {} completed ({} chars)", thread_id, text.len());
                Ok(text)
            }
            Err(e) => {
                log::error!("Ask on thread {} failed: {}", thread_id, e);
                Err(e)
            }
        }
    }

    // The UI reports the full selection on every send; it replaces, never merges.
    async fn replace_selection(&self, files: Vec<String>) -> Vec<String> {
        let mut deduped: Vec<String> = Vec::with_capacity(files.len());
        for file in files {
            if !deduped.contains(&file) {
                deduped.push(file);
            }
        }
        let mut selected = self.selected_files.lock().await;
        *selected = deduped;
        selected.clone()
    }

    pub async fn selected_files(&self) -> Vec<String> {
        self.selected_files.lock().await.clone()
    }

    pub fn is_generating(&self, thread_id: Uuid) -> bool {
        self.generating.contains_key(&thread_id)
    }

    /// Cancels the in-flight ask on `thread_id`. Returns false when the thread is idle.
    pub fn cancel(&self, thread_id: Uuid) -> bool {
        match self.generating.get(&thread_id) {
            Some(token) => {
                log::warn!("Cancellation requested for thread {}", thread_id);
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// One-shot completion outside any thread: no preamble, no context, no history.
    pub async fn quick_ask(&self, prompt: &str) -> Result<String, AssistantError> {
        let config = self.settings.model_config().await;
        log::info!("Quick ask using model '{}'", config.model_name);
        self.backend.complete(prompt, &config).await
    }
}
