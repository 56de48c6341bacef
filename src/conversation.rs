use crate::error::AssistantError;
use crate::models::{derive_title, Message, Thread};
use crate::protocol::{Notifier, OutboundMessage};
use crate::storage::KeyValueStore;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

// The whole collection is stored as one JSON document under this key.
const CONVERSATIONS_KEY: &str = "conversations";

#[derive(Debug, Default)]
struct Collection {
    threads: Vec<Thread>, // newest first
    current: Option<Uuid>,
}

impl Collection {
    fn position(&self, thread_id: Uuid) -> Option<usize> {
        self.threads.iter().position(|t| t.id == thread_id)
    }

    fn current_thread(&self) -> Option<&Thread> {
        let id = self.current?;
        self.threads.iter().find(|t| t.id == id)
    }

    fn push_new(&mut self) -> Thread {
        let thread = Thread::new();
        self.threads.insert(0, thread.clone());
        self.current = Some(thread.id);
        thread
    }
}

/// Owns every chat thread and the pointer to the current one.
///
/// Each mutation rewrites the whole collection to storage while the lock is held,
/// so persisted snapshots are always in mutation order. Persistence failures are
/// logged and never surfaced to callers.
pub struct ConversationStore {
    storage: Arc<dyn KeyValueStore>,
    notifier: Notifier,
    inner: Mutex<Collection>,
}

impl ConversationStore {
    pub async fn load(storage: Arc<dyn KeyValueStore>, notifier: Notifier) -> Self {
        let threads: Vec<Thread> = match storage.get(CONVERSATIONS_KEY).await {
            Ok(Some(json)) => serde_json::from_str(&json).unwrap_or_else(|e| {
                log::error!("Stored conversations are unreadable, starting empty: {}", e);
                Vec::new()
            }),
            Ok(None) => Vec::new(),
            Err(e) => {
                log::error!("Failed to load conversations, starting empty: {:?}", e);
                Vec::new()
            }
        };
        log::info!("Loaded {} conversation threads", threads.len());

        let current = threads.first().map(|t| t.id);
        Self {
            storage,
            notifier,
            inner: Mutex::new(Collection { threads, current }),
        }
    }

    pub async fn threads(&self) -> Vec<Thread> {
        self.inner.lock().await.threads.clone()
    }

    pub async fn thread(&self, thread_id: Uuid) -> Option<Thread> {
        let inner = self.inner.lock().await;
        inner.threads.iter().find(|t| t.id == thread_id).cloned()
    }

    /// The active thread, created on first use.
    pub async fn current_thread(&self) -> Thread {
        let mut inner = self.inner.lock().await;
        if let Some(thread) = inner.current_thread() {
            return thread.clone();
        }

        // Stale or missing pointer: fall back to the newest thread before creating one.
        if let Some(first) = inner.threads.first().cloned() {
            inner.current = Some(first.id);
            return first;
        }

        log::info!("No current thread, creating one");
        let thread = inner.push_new();
        self.persist(&inner).await;
        self.notify_locked(&inner);
        thread
    }

    pub async fn create_thread(&self) -> Thread {
        let mut inner = self.inner.lock().await;
        let thread = inner.push_new();
        log::info!("Created thread {}", thread.id);
        self.persist(&inner).await;
        self.notify_locked(&inner);
        thread
    }

    /// Appends to `thread_id`. When the thread reaches two messages its title is
    /// derived from the first one.
    pub async fn append_message(
        &self,
        thread_id: Uuid,
        content: &str,
        is_user: bool,
    ) -> Result<(), AssistantError> {
        let mut inner = self.inner.lock().await;
        let Some(index) = inner.position(thread_id) else {
            log::warn!("Dropping message for unknown thread {}", thread_id);
            return Err(AssistantError::ThreadNotFound(thread_id));
        };

        let thread = &mut inner.threads[index];
        thread.messages.push(Message::new(content, is_user));
        if thread.messages.len() == 2 {
            thread.title = derive_title(&thread.messages[0].content);
            log::debug!("Thread {} titled '{}'", thread_id, thread.title);
        }

        self.persist(&inner).await;
        Ok(())
    }

    /// Removes a thread. Deleting the current one moves the pointer to the newest
    /// remaining thread, or to a fresh thread when none remain.
    pub async fn delete_thread(&self, thread_id: Uuid) -> Result<(), AssistantError> {
        let mut inner = self.inner.lock().await;
        let Some(index) = inner.position(thread_id) else {
            log::warn!("Attempted to delete non-existent thread: {}", thread_id);
            return Err(AssistantError::ThreadNotFound(thread_id));
        };

        inner.threads.remove(index);
        log::info!("Deleted thread {}", thread_id);

        if inner.current == Some(thread_id) {
            let next = inner.threads.first().map(|t| t.id);
            match next {
                Some(next) => inner.current = Some(next),
                None => {
                    inner.push_new();
                }
            }
        }

        self.persist(&inner).await;
        self.notify_locked(&inner);
        Ok(())
    }

    pub async fn switch_thread(&self, thread_id: Uuid) -> Result<Thread, AssistantError> {
        let mut inner = self.inner.lock().await;
        let Some(index) = inner.position(thread_id) else {
            return Err(AssistantError::ThreadNotFound(thread_id));
        };

        inner.current = Some(thread_id);
        let thread = inner.threads[index].clone();
        self.notify_locked(&inner);
        Ok(thread)
    }

    /// Sends a full `updateThreads` refresh, creating a thread first if the store is empty.
    pub async fn notify_threads(&self) {
        self.current_thread().await;
        let inner = self.inner.lock().await;
        self.notify_locked(&inner);
    }

    fn notify_locked(&self, inner: &Collection) {
        let Some(current) = inner.current_thread() else {
            return;
        };
        self.notifier.notify(OutboundMessage::UpdateThreads {
            threads: inner.threads.clone(),
            current_thread: current.clone(),
        });
    }

    async fn persist(&self, inner: &Collection) {
        let json = match serde_json::to_string(&inner.threads) {
            Ok(json) => json,
            Err(e) => {
                log::error!("Failed to serialize conversations: {}", e);
                return;
            }
        };
        if let Err(e) = self.storage.set(CONVERSATIONS_KEY, &json).await {
            log::error!("Failed to persist conversations: {:?}", e);
        }
    }
}
