// Inbound message handlers for the chat panel.

use crate::error::AssistantError;
use crate::orchestrator::AskRequest;
use crate::protocol::{InboundMessage, OutboundMessage};
use crate::state::Session;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Decodes panel messages and routes each one to exactly one collaborator.
#[derive(Clone)]
pub struct PresentationBridge {
    session: Session,
    in_flight: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl PresentationBridge {
    pub fn new(session: Session) -> Self {
        Self {
            session,
            in_flight: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Waits for every background ask started so far.
    pub async fn drain(&self) {
        let handles = match self.in_flight.lock() {
            Ok(mut guard) => std::mem::take(&mut *guard),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        };
        for handle in handles {
            if let Err(e) = handle.await {
                log::error!("Background ask panicked: {}", e);
            }
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Entry point for raw JSON text from the panel.
    pub async fn handle_raw(&self, raw: &str) {
        match serde_json::from_str::<InboundMessage>(raw) {
            Ok(message) => self.dispatch(message).await,
            Err(e) => {
                let err = AssistantError::InvalidMessage(e.to_string());
                log::error!("{} - Data: {:.200}", err, raw);
                self.session.notifier.notify(OutboundMessage::failure(err));
            }
        }
    }

    pub async fn dispatch(&self, message: InboundMessage) {
        match message {
            InboundMessage::SendMessage {
                message,
                include_context,
                selected_files,
            } => {
                self.send_message(AskRequest {
                    message,
                    include_context,
                    selected_files,
                })
                .await
            }
            InboundMessage::GetFiles => self.get_files().await,
            InboundMessage::ExecuteCommand { command } => self.execute_command(&command).await,
            InboundMessage::NewThread => {
                log::info!("Frontend requested a new thread");
                self.session.conversations.create_thread().await;
            }
            InboundMessage::SwitchThread { thread_id } => self.switch_thread(&thread_id).await,
            InboundMessage::DeleteThread { thread_id } => self.delete_thread(&thread_id).await,
            InboundMessage::CancelGeneration { thread_id } => {
                self.cancel_generation(thread_id.as_deref()).await
            }
            InboundMessage::EditorState { editor } => {
                log::debug!(
                    "Editor state changed: {}",
                    editor.as_ref().map_or("<none>", |e| e.file_name.as_str())
                );
                self.session.editor.set_active_editor(editor).await;
            }
            InboundMessage::UpdateSetting { key, value } => {
                self.update_setting(&key, &value).await
            }
        }
    }

    // The thread is pinned and marked Generating before the ask moves to the
    // background, so later thread switches and cancels see it.
    async fn send_message(&self, request: AskRequest) {
        log::info!(
            "Frontend sent a message ({} chars, context: {}, files: {})",
            request.message.len(),
            request.include_context,
            request.selected_files.len()
        );
        let thread_id = self.session.conversations.current_thread().await.id;
        let orchestrator = self.session.orchestrator.clone();
        let permit = match orchestrator.begin_generation(thread_id) {
            Ok(permit) => permit,
            Err(e) => {
                log::warn!("Rejecting ask: {}", e);
                self.reply(OutboundMessage::failure(e));
                return;
            }
        };
        let handle = tokio::spawn(async move {
            orchestrator.ask_with_permit(permit, request).await;
        });
        match self.in_flight.lock() {
            Ok(mut pending) => {
                pending.retain(|h| !h.is_finished());
                pending.push(handle);
            }
            Err(_) => log::warn!("In-flight ask list poisoned; ask will not be awaited"),
        }
    }

    async fn get_files(&self) {
        log::info!("Frontend requested workspace files");
        match self.session.workspace.list_files().await {
            Ok(files) => self.reply(OutboundMessage::Files { files }),
            Err(e) => {
                log::error!("Failed to list workspace files: {:?}", e);
                self.reply(OutboundMessage::failure(format!(
                    "Failed to list workspace files: {}",
                    e
                )));
            }
        }
    }

    async fn execute_command(&self, command: &str) {
        log::info!("Frontend requested to execute: {}", command);
        match self.session.commands.run_command(command).await {
            Ok(ack) => self.reply(OutboundMessage::reply(ack)),
            Err(e) => {
                log::error!("{}", e);
                self.reply(OutboundMessage::failure(e));
            }
        }
    }

    async fn switch_thread(&self, thread_id: &str) {
        log::info!("Frontend requested to switch to thread {}", thread_id);
        let Some(id) = self.parse_thread_id(thread_id) else {
            return;
        };
        if let Err(e) = self.session.conversations.switch_thread(id).await {
            log::warn!("Failed to switch thread: {}", e);
            self.reply(OutboundMessage::failure(e));
        }
    }

    async fn delete_thread(&self, thread_id: &str) {
        log::warn!("Frontend requested to delete thread {}", thread_id);
        let Some(id) = self.parse_thread_id(thread_id) else {
            return;
        };
        if self.session.orchestrator.cancel(id) {
            log::info!("Cancelled in-flight ask on deleted thread {}", id);
        }
        if let Err(e) = self.session.conversations.delete_thread(id).await {
            log::warn!("Failed to delete thread: {}", e);
            self.reply(OutboundMessage::failure(e));
        }
    }

    async fn cancel_generation(&self, thread_id: Option<&str>) {
        let thread_id = match thread_id {
            Some(raw) => match self.parse_thread_id(raw) {
                Some(id) => id,
                None => return,
            },
            None => self.session.conversations.current_thread().await.id,
        };
        if !self.session.orchestrator.cancel(thread_id) {
            log::debug!("Cancel requested but thread {} is idle", thread_id);
        }
    }

    async fn update_setting(&self, key: &str, value: &str) {
        if let Err(e) = self.session.settings.update(key, value).await {
            log::warn!("Rejected setting update: {}", e);
            self.reply(OutboundMessage::failure(e));
        }
    }

    fn parse_thread_id(&self, thread_id: &str) -> Option<Uuid> {
        match Uuid::parse_str(thread_id) {
            Ok(id) => Some(id),
            Err(_) => {
                let err = AssistantError::InvalidMessage(format!(
                    "Invalid thread ID format: {}",
                    thread_id
                ));
                log::error!("{}", err);
                self.reply(OutboundMessage::failure(err));
                None
            }
        }
    }

    fn reply(&self, message: OutboundMessage) {
        self.session.notifier.notify(message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::GenerationBackend;
    use crate::context::{EditorContextSource, NoActiveEditor, SharedEditorState};
    use crate::models::ModelConfig;
    use crate::protocol::Notifier;
    use crate::state::SessionParts;
    use crate::storage::StorageManager;
    use crate::terminal::CommandRunner;
    use crate::workspace::Workspace;
    use async_trait::async_trait;
    use std::path::Path;
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::sync::mpsc::UnboundedReceiver;

    struct EchoBackend;

    #[async_trait]
    impl GenerationBackend for EchoBackend {
        async fn complete(
            &self,
            prompt: &str,
            config: &ModelConfig,
        ) -> Result<String, AssistantError> {
            Ok(format!("[{}] {}", config.model_name, prompt.len()))
        }
    }

    #[derive(Default)]
    struct RecordingBackend {
        prompts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl GenerationBackend for RecordingBackend {
        async fn complete(
            &self,
            prompt: &str,
            _config: &ModelConfig,
        ) -> Result<String, AssistantError> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            Ok("<p>ok</p>".to_string())
        }
    }

    /// Never answers; only cancellation ends an ask.
    struct SilentBackend;

    #[async_trait]
    impl GenerationBackend for SilentBackend {
        async fn complete(
            &self,
            _prompt: &str,
            _config: &ModelConfig,
        ) -> Result<String, AssistantError> {
            std::future::pending().await
        }
    }

    #[derive(Default)]
    struct RecordingRunner {
        commands: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl CommandRunner for RecordingRunner {
        async fn run_command(&self, command: &str) -> Result<String, AssistantError> {
            self.commands.lock().unwrap().push(command.to_string());
            Ok(format!("Executing command: {}", command))
        }
    }

    struct Fixture {
        bridge: PresentationBridge,
        rx: UnboundedReceiver<OutboundMessage>,
        runner: Arc<RecordingRunner>,
    }

    async fn fixture_with(
        root: &Path,
        backend: Arc<dyn GenerationBackend>,
        editor: Arc<dyn EditorContextSource>,
    ) -> Fixture {
        let (notifier, rx) = Notifier::channel();
        let runner = Arc::new(RecordingRunner::default());
        let session = Session::open(
            SessionParts {
                storage: Arc::new(StorageManager::in_memory().await.unwrap()),
                backend,
                editor,
                commands: runner.clone(),
                workspace: Workspace::new(root),
            },
            notifier,
        )
        .await;
        Fixture {
            bridge: PresentationBridge::new(session),
            rx,
            runner,
        }
    }

    async fn fixture(root: &Path) -> Fixture {
        fixture_with(root, Arc::new(EchoBackend), Arc::new(NoActiveEditor)).await
    }

    fn drain_messages(rx: &mut UnboundedReceiver<OutboundMessage>) -> Vec<OutboundMessage> {
        let mut messages = Vec::new();
        while let Ok(message) = rx.try_recv() {
            messages.push(message);
        }
        messages
    }

    #[tokio::test]
    async fn test_send_message_replies_through_notifier() {
        let temp_dir = TempDir::new().unwrap();
        let Fixture { bridge, mut rx, .. } = fixture(temp_dir.path()).await;

        bridge
            .handle_raw(r#"{"type":"sendMessage","message":"hi","includeContext":false}"#)
            .await;

        // First the lazily created thread, then the reply
        loop {
            match rx.recv().await.unwrap() {
                OutboundMessage::UpdateThreads { .. } => continue,
                OutboundMessage::Response { message, error } => {
                    assert!(error.is_none());
                    assert!(message.unwrap().starts_with('['));
                    break;
                }
                other => panic!("unexpected message {:?}", other),
            }
        }

        bridge.drain().await;
        let thread = bridge.session().conversations.current_thread().await;
        assert_eq!(thread.messages.len(), 2);
    }

    #[tokio::test]
    async fn test_message_stays_on_thread_it_was_sent_from() {
        let temp_dir = TempDir::new().unwrap();
        let Fixture { bridge, .. } = fixture(temp_dir.path()).await;

        bridge
            .handle_raw(r#"{"type":"sendMessage","message":"for the original thread"}"#)
            .await;
        bridge.handle_raw(r#"{"type":"newThread"}"#).await;
        bridge.drain().await;

        // Newest first
        let threads = bridge.session().conversations.threads().await;
        assert_eq!(threads.len(), 2);
        assert!(threads[0].messages.is_empty());
        assert_eq!(threads[1].messages.len(), 2);
        assert_eq!(threads[1].messages[0].content, "for the original thread");
        assert_eq!(
            bridge.session().conversations.current_thread().await.id,
            threads[0].id
        );
    }

    #[tokio::test]
    async fn test_cancel_right_after_send_stops_the_ask() {
        let temp_dir = TempDir::new().unwrap();
        let Fixture { bridge, mut rx, .. } = fixture_with(
            temp_dir.path(),
            Arc::new(SilentBackend),
            Arc::new(NoActiveEditor),
        )
        .await;

        bridge
            .handle_raw(r#"{"type":"sendMessage","message":"stop me"}"#)
            .await;
        bridge.handle_raw(r#"{"type":"cancelGeneration"}"#).await;

        tokio::time::timeout(Duration::from_secs(5), bridge.drain())
            .await
            .expect("cancelled ask should finish");

        let errors: Vec<OutboundMessage> = drain_messages(&mut rx)
            .into_iter()
            .filter(|m| m.is_error())
            .collect();
        assert_eq!(errors.len(), 1);
        match &errors[0] {
            OutboundMessage::Response { error, .. } => {
                assert!(error.as_deref().unwrap().contains("cancelled"))
            }
            other => panic!("unexpected message {:?}", other),
        }

        let thread = bridge.session().conversations.current_thread().await;
        assert_eq!(thread.messages.len(), 1);
        assert!(!bridge.session().orchestrator.is_generating(thread.id));
    }

    #[tokio::test]
    async fn test_cancel_targets_named_thread_after_switching_away() {
        let temp_dir = TempDir::new().unwrap();
        let Fixture { bridge, .. } = fixture_with(
            temp_dir.path(),
            Arc::new(SilentBackend),
            Arc::new(NoActiveEditor),
        )
        .await;

        bridge
            .handle_raw(r#"{"type":"sendMessage","message":"slow one"}"#)
            .await;
        let busy = bridge.session().conversations.current_thread().await.id;
        bridge.handle_raw(r#"{"type":"newThread"}"#).await;
        assert!(bridge.session().orchestrator.is_generating(busy));

        bridge
            .dispatch(InboundMessage::CancelGeneration {
                thread_id: Some(busy.to_string()),
            })
            .await;

        tokio::time::timeout(Duration::from_secs(5), bridge.drain())
            .await
            .expect("cancelled ask should finish");
        assert!(!bridge.session().orchestrator.is_generating(busy));
        let thread = bridge.session().conversations.thread(busy).await.unwrap();
        assert_eq!(thread.messages.len(), 1);
    }

    #[tokio::test]
    async fn test_editor_state_feeds_context() {
        let temp_dir = TempDir::new().unwrap();
        let backend = Arc::new(RecordingBackend::default());
        let Fixture { bridge, .. } = fixture_with(
            temp_dir.path(),
            backend.clone(),
            Arc::new(SharedEditorState::new()),
        )
        .await;

        bridge
            .handle_raw(
                r#"{"type":"editorState","editor":{"fileName":"app.py",
                    "languageId":"python","documentText":"x = 1","selection":""}}"#,
            )
            .await;
        bridge
            .handle_raw(r#"{"type":"sendMessage","message":"what is x?","includeContext":true}"#)
            .await;
        bridge.drain().await;

        let prompts = backend.prompts.lock().unwrap().clone();
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].contains("Context:\nFile: app.py\n```python\nx = 1\n```"));
        assert!(prompts[0].contains("Question: what is x?"));

        let thread = bridge.session().conversations.current_thread().await;
        assert_eq!(thread.messages[0].content, "what is x?");
    }

    #[tokio::test]
    async fn test_get_files_lists_workspace() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(temp_dir.path().join("main.rs"), "fn main() {}").unwrap();
        let Fixture { bridge, mut rx, .. } = fixture(temp_dir.path()).await;

        bridge.handle_raw(r#"{"type":"getFiles"}"#).await;

        match rx.recv().await.unwrap() {
            OutboundMessage::Files { files } => {
                assert_eq!(files.len(), 1);
                assert_eq!(files[0].path, "main.rs");
                assert_eq!(files[0].name, "main.rs");
            }
            other => panic!("unexpected message {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_execute_command_acknowledges() {
        let temp_dir = TempDir::new().unwrap();
        let Fixture {
            bridge,
            mut rx,
            runner,
        } = fixture(temp_dir.path()).await;

        bridge
            .handle_raw(r#"{"type":"executeCommand","command":"cargo fmt"}"#)
            .await;

        assert_eq!(
            rx.recv().await.unwrap(),
            OutboundMessage::reply("Executing command: cargo fmt")
        );
        assert_eq!(*runner.commands.lock().unwrap(), vec!["cargo fmt".to_string()]);
    }

    #[tokio::test]
    async fn test_thread_lifecycle_messages() {
        let temp_dir = TempDir::new().unwrap();
        let Fixture { bridge, mut rx, .. } = fixture(temp_dir.path()).await;

        bridge.handle_raw(r#"{"type":"newThread"}"#).await;
        let first = match rx.recv().await.unwrap() {
            OutboundMessage::UpdateThreads { current_thread, .. } => current_thread,
            other => panic!("unexpected message {:?}", other),
        };
        bridge.handle_raw(r#"{"type":"newThread"}"#).await;
        rx.recv().await.unwrap();

        bridge
            .dispatch(InboundMessage::SwitchThread {
                thread_id: first.id.to_string(),
            })
            .await;
        match rx.recv().await.unwrap() {
            OutboundMessage::UpdateThreads { current_thread, .. } => {
                assert_eq!(current_thread.id, first.id)
            }
            other => panic!("unexpected message {:?}", other),
        }

        bridge
            .dispatch(InboundMessage::DeleteThread {
                thread_id: first.id.to_string(),
            })
            .await;
        match rx.recv().await.unwrap() {
            OutboundMessage::UpdateThreads {
                threads,
                current_thread,
            } => {
                assert_eq!(threads.len(), 1);
                assert_ne!(current_thread.id, first.id);
            }
            other => panic!("unexpected message {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_bad_input_is_reported_as_error_response() {
        let temp_dir = TempDir::new().unwrap();
        let Fixture { bridge, mut rx, .. } = fixture(temp_dir.path()).await;

        bridge.handle_raw("not json at all").await;
        assert!(rx.recv().await.unwrap().is_error());

        bridge
            .handle_raw(r#"{"type":"deleteThread","threadId":"not-a-uuid"}"#)
            .await;
        assert!(rx.recv().await.unwrap().is_error());

        bridge
            .handle_raw(r#"{"type":"cancelGeneration","threadId":"not-a-uuid"}"#)
            .await;
        assert!(rx.recv().await.unwrap().is_error());

        bridge
            .handle_raw(r#"{"type":"updateSetting","key":"colour","value":"blue"}"#)
            .await;
        assert!(rx.recv().await.unwrap().is_error());
    }

    #[tokio::test]
    async fn test_update_setting_changes_model_for_next_ask() {
        let temp_dir = TempDir::new().unwrap();
        let Fixture { bridge, .. } = fixture(temp_dir.path()).await;

        bridge
            .handle_raw(r#"{"type":"updateSetting","key":"modelName","value":"mistral"}"#)
            .await;

        let config = bridge.session().settings.model_config().await;
        assert_eq!(config.model_name, "mistral");
    }
}
