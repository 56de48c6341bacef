use crate::api::GenerationBackend;
use crate::cache::FileContextCache;
use crate::config::SettingsStore;
use crate::context::{ContextAssembler, EditorContextSource};
use crate::conversation::ConversationStore;
use crate::orchestrator::RequestOrchestrator;
use crate::protocol::Notifier;
use crate::storage::KeyValueStore;
use crate::terminal::CommandRunner;
use crate::workspace::Workspace;
use std::sync::Arc;

/// Host-provided collaborators a session is built from.
pub struct SessionParts {
    pub storage: Arc<dyn KeyValueStore>,
    pub backend: Arc<dyn GenerationBackend>,
    pub editor: Arc<dyn EditorContextSource>,
    pub commands: Arc<dyn CommandRunner>,
    pub workspace: Workspace,
}

// Everything one assistant session owns. Cheap to clone; handed to the bridge and
// to background ask tasks.
#[derive(Clone)]
pub struct Session {
    pub conversations: Arc<ConversationStore>,
    pub settings: Arc<SettingsStore>,
    pub orchestrator: Arc<RequestOrchestrator>,
    pub workspace: Workspace,
    pub editor: Arc<dyn EditorContextSource>,
    pub commands: Arc<dyn CommandRunner>,
    pub notifier: Notifier,
}

impl Session {
    /// Loads persisted threads and settings and wires the pipeline together.
    /// The file cache and file selection start empty for every session.
    pub async fn open(parts: SessionParts, notifier: Notifier) -> Self {
        let conversations =
            Arc::new(ConversationStore::load(parts.storage.clone(), notifier.clone()).await);
        let settings = Arc::new(SettingsStore::load(parts.storage).await);

        let assembler = ContextAssembler::new(
            parts.editor.clone(),
            Arc::new(FileContextCache::new()),
            parts.workspace.clone(),
        );
        let orchestrator = Arc::new(RequestOrchestrator::new(
            conversations.clone(),
            settings.clone(),
            parts.backend,
            assembler,
            notifier.clone(),
        ));

        Self {
            conversations,
            settings,
            orchestrator,
            workspace: parts.workspace,
            editor: parts.editor,
            commands: parts.commands,
            notifier,
        }
    }
}
