//! Message envelopes exchanged with the rendering surface.
//!
//! Both directions are closed enums tagged by a `type` field, so decoding happens
//! once at the bridge and every handler matches exhaustively.

use crate::context::EditorSnapshot;
use crate::models::Thread;
use crate::workspace::FileEntry;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// UI → core
#[derive(Deserialize, Clone, Debug, PartialEq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum InboundMessage {
    #[serde(rename_all = "camelCase")]
    SendMessage {
        message: String,
        #[serde(default)]
        include_context: bool,
        #[serde(default)]
        selected_files: Vec<String>,
    },
    GetFiles,
    ExecuteCommand {
        command: String,
    },
    NewThread,
    #[serde(rename_all = "camelCase")]
    SwitchThread {
        thread_id: String,
    },
    #[serde(rename_all = "camelCase")]
    DeleteThread {
        thread_id: String,
    },
    /// Without a `threadId` the current thread's ask is cancelled.
    #[serde(rename_all = "camelCase")]
    CancelGeneration {
        #[serde(default)]
        thread_id: Option<String>,
    },
    /// Host editor focus/selection changed; `null` means no editor is active.
    EditorState {
        #[serde(default)]
        editor: Option<EditorSnapshot>,
    },
    UpdateSetting {
        key: String,
        value: String,
    },
}

/// core → UI
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum OutboundMessage {
    // Exactly one of `message` / `error` is set; use the constructors.
    Response {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    Files {
        files: Vec<FileEntry>,
    },
    #[serde(rename_all = "camelCase")]
    UpdateThreads {
        threads: Vec<Thread>,
        current_thread: Thread,
    },
}

impl OutboundMessage {
    pub fn reply(message: impl Into<String>) -> Self {
        Self::Response {
            message: Some(message.into()),
            error: None,
        }
    }

    pub fn failure(error: impl ToString) -> Self {
        Self::Response {
            message: None,
            error: Some(error.to_string()),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Response { error: Some(_), .. })
    }
}

/// Sending half of the outbound channel. Cloned into every collaborator that talks to the UI.
#[derive(Clone, Debug)]
pub struct Notifier {
    tx: mpsc::UnboundedSender<OutboundMessage>,
}

impl Notifier {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<OutboundMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn notify(&self, message: OutboundMessage) {
        if self.tx.send(message).is_err() {
            log::warn!("Presentation surface detached; dropping outbound message");
        }
    }
}
