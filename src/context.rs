use crate::cache::{ContextFragment, FileContextCache};
use crate::error::AssistantError;
use crate::workspace::{detect_language, Workspace};
use async_trait::async_trait;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;

/// What the active editor shows right now.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct EditorSnapshot {
    pub file_name: String,
    pub language_id: String,
    pub document_text: String,
    #[serde(default)]
    pub selection: String, // empty when nothing is selected
}

impl EditorSnapshot {
    fn render(&self) -> String {
        let text = if self.selection.is_empty() {
            &self.document_text
        } else {
            &self.selection
        };
        format!("File: {}\n```{}\n{}\n```", self.file_name, self.language_id, text)
    }
}

/// View of the host editor.
#[async_trait]
pub trait EditorContextSource: Send + Sync {
    async fn active_editor(&self) -> Option<EditorSnapshot>;

    /// Called when the host reports a focus or selection change. Sources that
    /// track nothing ignore it.
    async fn set_active_editor(&self, snapshot: Option<EditorSnapshot>) {
        if snapshot.is_some() {
            log::debug!("Editor state ignored; this source does not track the editor");
        }
    }
}

/// For hosts without an editor, such as one-shot CLI commands.
pub struct NoActiveEditor;

#[async_trait]
impl EditorContextSource for NoActiveEditor {
    async fn active_editor(&self) -> Option<EditorSnapshot> {
        None
    }
}

/// Editor state pushed in by the host whenever focus or selection changes.
#[derive(Default)]
pub struct SharedEditorState {
    snapshot: RwLock<Option<EditorSnapshot>>,
}

impl SharedEditorState {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set(&self, snapshot: Option<EditorSnapshot>) {
        *self.snapshot.write().await = snapshot;
    }
}

#[async_trait]
impl EditorContextSource for SharedEditorState {
    async fn active_editor(&self) -> Option<EditorSnapshot> {
        self.snapshot.read().await.clone()
    }

    async fn set_active_editor(&self, snapshot: Option<EditorSnapshot>) {
        self.set(snapshot).await;
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct ContextOptions<'a> {
    pub include_editor_selection: bool,
    pub selected_files: &'a [String],
}

/// Builds the text block placed ahead of a user question.
pub struct ContextAssembler {
    editor: Arc<dyn EditorContextSource>,
    cache: Arc<FileContextCache>,
    workspace: Workspace,
}

impl ContextAssembler {
    pub fn new(
        editor: Arc<dyn EditorContextSource>,
        cache: Arc<FileContextCache>,
        workspace: Workspace,
    ) -> Self {
        Self {
            editor,
            cache,
            workspace,
        }
    }

    pub fn cache(&self) -> &Arc<FileContextCache> {
        &self.cache
    }

    /// Editor fragment first, then one fragment per selected file in selection order.
    /// Returns an empty string when there is nothing to include.
    pub async fn build_context(&self, options: ContextOptions<'_>) -> String {
        let mut context = String::new();

        if options.include_editor_selection {
            match self.editor.active_editor().await {
                Some(snapshot) => context.push_str(&snapshot.render()),
                None => log::debug!("Editor context requested but no editor is active"),
            }
        }

        let fragments = join_all(
            options
                .selected_files
                .iter()
                .map(|path| self.file_fragment(path)),
        )
        .await;

        for fragment in fragments.into_iter().flatten() {
            context.push_str(&fragment.render());
        }

        context
    }

    async fn file_fragment(&self, path: &str) -> Option<ContextFragment> {
        if let Some(cached) = self.cache.get(path) {
            log::debug!("File context cache hit: {}", path);
            return Some(cached);
        }

        match tokio::fs::read_to_string(self.workspace.resolve(path)).await {
            Ok(text) => {
                let fragment = ContextFragment {
                    path: path.to_string(),
                    language: detect_language(path).to_string(),
                    text,
                };
                self.cache.put(path, fragment.clone());
                Some(fragment)
            }
            Err(source) => {
                let error = AssistantError::FileReadFailure {
                    path: path.to_string(),
                    source,
                };
                log::warn!("{}; omitting it from the context", error);
                None
            }
        }
    }
}
