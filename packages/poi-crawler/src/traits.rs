use async_trait::async_trait;

use crate::error::{BackendResult, FetchResult, PersistenceResult};
use crate::types::{PageContent, SessionId, SessionState};

// ============================================================================
// FETCH GATEWAY: Network access
// ============================================================================

/// Turns a URL into readable page content.
///
/// Implementations should not retry on their own; the frontier decides
/// whether a failed URL gets another attempt.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> FetchResult<PageContent>;
}

// ============================================================================
// REASONING BACKEND: LLM or any other text-in/text-out oracle
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptKind {
    /// Extract POIs and score links for one page
    Extraction,
    /// Yes/no check that a single candidate is a real place
    Validation,
}

/// A single request to the reasoning backend.
#[derive(Debug, Clone)]
pub struct Prompt {
    pub kind: PromptKind,
    pub system: String,
    pub user: String,
    /// Page the prompt is about, for routing and logging
    pub page_url: String,
}

#[async_trait]
pub trait ReasoningBackend: Send + Sync {
    /// Return the raw text of the backend's reply.
    async fn complete(&self, prompt: &Prompt) -> BackendResult<String>;
}

// ============================================================================
// CHECKPOINT STORE: Durable session snapshots
// ============================================================================

#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Persist a snapshot. A failed save must leave the previous snapshot intact.
    async fn save(&self, state: &SessionState) -> PersistenceResult<()>;

    async fn load(&self, session_id: SessionId) -> PersistenceResult<Option<SessionState>>;

    async fn delete(&self, session_id: SessionId) -> PersistenceResult<()>;

    async fn list(&self) -> PersistenceResult<Vec<SessionId>>;
}
