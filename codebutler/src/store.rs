//! Crash-safe conversation persistence.
//!
//! Each run owns one conversation file; the store does no internal locking.
//! Crash safety comes from a single primitive: write the full JSON to a
//! sibling `.tmp` file, then atomically rename it over the target.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{Error, Result};
use crate::message::Message;

/// Persistence contract held by the agent loop.
///
/// `load` returning `Ok(None)` means "no prior conversation". Implementations
/// must keep `save` atomic with respect to crashes: a reader never observes a
/// partially written conversation.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Load the stored conversation, if one exists.
    async fn load(&self, cancel: &CancellationToken) -> Result<Option<Vec<Message>>>;

    /// Replace the stored conversation.
    async fn save(&self, cancel: &CancellationToken, messages: &[Message]) -> Result<()>;
}

/// Build the conventional conversation path for a branch/role pair:
/// `<base>/.codebutler/branches/<branch>/conversations/<role>.json`.
#[must_use]
pub fn conversation_path(base: &Path, branch: &str, role: &str) -> PathBuf {
    base.join(".codebutler")
        .join("branches")
        .join(branch)
        .join("conversations")
        .join(format!("{role}.json"))
}

/// File-backed conversation store with temp-file-rename replacement.
#[derive(Debug, Clone)]
pub struct FileConversationStore {
    path: PathBuf,
}

impl FileConversationStore {
    /// Create a store over an explicit path.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Create a store at the conventional path for a branch/role pair.
    #[must_use]
    pub fn for_branch_role(base: &Path, branch: &str, role: &str) -> Self {
        Self::new(conversation_path(base, branch, role))
    }

    /// The path this store reads and writes.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn tmp_path(&self) -> PathBuf {
        let mut tmp = self.path.as_os_str().to_owned();
        tmp.push(".tmp");
        PathBuf::from(tmp)
    }
}

#[async_trait]
impl ConversationStore for FileConversationStore {
    async fn load(&self, cancel: &CancellationToken) -> Result<Option<Vec<Message>>> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Error::store(self.path.display().to_string(), e.to_string())),
        };
        if bytes.is_empty() {
            return Ok(None);
        }
        let messages: Vec<Message> = serde_json::from_slice(&bytes)
            .map_err(|e| Error::store(self.path.display().to_string(), e.to_string()))?;
        debug!(path = %self.path.display(), count = messages.len(), "loaded conversation");
        Ok(Some(messages))
    }

    async fn save(&self, cancel: &CancellationToken, messages: &[Message]) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let display = self.path.display().to_string();
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::store(&display, e.to_string()))?;
        }
        let json = serde_json::to_vec_pretty(messages)
            .map_err(|e| Error::store(&display, e.to_string()))?;
        let tmp = self.tmp_path();
        tokio::fs::write(&tmp, &json)
            .await
            .map_err(|e| Error::store(&display, e.to_string()))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| Error::store(&display, e.to_string()))?;
        debug!(path = %self.path.display(), count = messages.len(), "saved conversation");
        Ok(())
    }
}

/// In-memory conversation store for tests.
#[derive(Debug, Default, Clone)]
pub struct MemoryConversationStore {
    messages: Arc<Mutex<Option<Vec<Message>>>>,
}

impl MemoryConversationStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the store with an existing conversation.
    #[must_use]
    pub fn with_messages(messages: Vec<Message>) -> Self {
        Self {
            messages: Arc::new(Mutex::new(Some(messages))),
        }
    }

    /// Snapshot of the stored conversation.
    #[must_use]
    pub fn snapshot(&self) -> Option<Vec<Message>> {
        self.messages.lock().clone()
    }
}

#[async_trait]
impl ConversationStore for MemoryConversationStore {
    async fn load(&self, cancel: &CancellationToken) -> Result<Option<Vec<Message>>> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        Ok(self.messages.lock().clone())
    }

    async fn save(&self, cancel: &CancellationToken, messages: &[Message]) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        *self.messages.lock() = Some(messages.to_vec());
        Ok(())
    }
}
