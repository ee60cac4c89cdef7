use chrono::{DateTime, Utc};
use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

use crate::config::SessionConfig;
use crate::frontier::Frontier;
use crate::ledger::PoiLedger;

// ============================================================================
// IDENTIFIERS
// ============================================================================

/// Unique identifier for a crawl session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for SessionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

// ============================================================================
// ENUMS (type-safe states)
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UrlState {
    Pending,
    InFlight,
    Visited,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoiStatus {
    Active,
    /// Confidence fell below the threshold on reconciliation
    Rejected,
}

/// Lifecycle of a crawl session.
///
/// `Running` is the only state that leaves to a terminal state; `Paused`
/// only ever returns to `Running`, and only on an explicit resume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Running,
    Paused,
    Completed,
    Failed,
    BudgetExhausted,
}

impl SessionStatus {
    pub fn can_transition_to(self, next: SessionStatus) -> bool {
        use SessionStatus::*;
        matches!(
            (self, next),
            (Running, Paused)
                | (Running, Completed)
                | (Running, Failed)
                | (Running, BudgetExhausted)
                | (Paused, Running)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SessionStatus::Completed | SessionStatus::Failed | SessionStatus::BudgetExhausted
        )
    }
}

// ============================================================================
// CORE TYPES
// ============================================================================

/// A URL known to the frontier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UrlRecord {
    pub url: String,
    pub depth: u32,
    pub discovered_from: Option<String>,
    pub state: UrlState,
    /// Fetch attempts that ended in a retryable failure
    pub attempts: u32,
    /// Relevance score (1-5) the backend assigned when it found the link
    pub score: Option<u8>,
}

/// A link the agent found on a page, already normalized and scope-checked.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveredLink {
    pub url: String,
    pub depth: u32,
    pub score: u8,
}

/// A POI as proposed by the extraction agent for one page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoiCandidate {
    pub name: String,
    pub category: String,
    pub address: Option<String>,
    pub description: Option<String>,
    pub source_url: String,
    pub confidence: f32,
}

impl PoiCandidate {
    pub fn new(
        name: impl Into<String>,
        category: impl Into<String>,
        source_url: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            category: category.into(),
            address: None,
            description: None,
            source_url: source_url.into(),
            confidence: 1.0,
        }
    }

    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = confidence;
        self
    }
}

/// A deduplicated ledger entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoiRecord {
    pub canonical_key: String,
    pub name: String,
    pub category: String,
    pub address: Option<String>,
    /// Conflicting addresses seen after the first one, kept for manual review
    #[serde(default)]
    pub alternate_addresses: Vec<String>,
    pub description: Option<String>,
    pub sources: IndexSet<String>,
    /// Highest candidate confidence merged so far
    pub confidence: f32,
    pub status: PoiStatus,
    pub needs_review: bool,
    pub first_seen: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
}

/// Page content returned by the fetch gateway.
#[derive(Debug, Clone, PartialEq)]
pub struct PageContent {
    pub url: String,
    pub status: u16,
    /// Readable text (markdown-ish) handed to the reasoning backend
    pub text: String,
    pub title: Option<String>,
    /// Raw hrefs found in the page, resolved against `url` when possible
    pub links: Vec<String>,
    /// SHA-256 of `text`; identical pages under different URLs are only
    /// extracted once
    pub content_hash: String,
}

impl PageContent {
    /// Calculate content hash from page text
    pub fn calculate_hash(text: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(text.as_bytes());
        hex::encode(hasher.finalize())
    }

    pub fn from_text(url: impl Into<String>, text: impl Into<String>) -> Self {
        let text = text.into();
        let content_hash = Self::calculate_hash(&text);
        Self {
            url: url.into(),
            status: 200,
            text,
            title: None,
            links: Vec::new(),
            content_hash,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_links(mut self, links: Vec<String>) -> Self {
        self.links = links;
        self
    }
}

// ============================================================================
// SESSION STATE
// ============================================================================

/// Counters for everything the loop tolerated instead of failing on.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Diagnostics {
    pub pages_failed: usize,
    pub fetch_retries: usize,
    pub candidates_dropped: usize,
    pub candidates_rejected: usize,
    pub candidates_rejected_by_validator: usize,
    pub malformed_responses: usize,
    pub backend_failures: usize,
    pub links_rejected: usize,
    pub links_deferred: usize,
    pub persistence_failures: usize,
    pub degraded: bool,
    #[serde(default)]
    pub duplicate_pages: usize,
}

/// How the children of one parent page fared.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatternStats {
    pub children_visited: usize,
    pub children_with_pois: usize,
}

/// Everything needed to resume a session. Owned by the session controller;
/// checkpoint stores only persist and restore it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionState {
    pub session_id: SessionId,
    pub seed_url: String,
    pub config: SessionConfig,
    pub frontier: Frontier,
    pub ledger: PoiLedger,
    pub pages_visited: usize,
    pub started_at: DateTime<Utc>,
    /// Active (running) time accumulated across resumes
    pub elapsed: Duration,
    pub status: SessionStatus,
    pub failure_reason: Option<String>,
    /// POI counts of the most recently processed pages, oldest first
    #[serde(default)]
    pub recent_poi_counts: Vec<(String, usize)>,
    /// Child-page yield keyed by the parent URL that linked to them
    #[serde(default)]
    pub pattern_stats: IndexMap<String, PatternStats>,
    /// Content hash to the first URL processed with that content
    #[serde(default)]
    pub content_hashes: IndexMap<String, String>,
    #[serde(default)]
    pub diagnostics: Diagnostics,
}

impl SessionState {
    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            session_id: self.session_id,
            seed_url: self.seed_url.clone(),
            status: self.status,
            pages_visited: self.pages_visited,
            urls_pending: self.frontier.pending_len(),
            urls_visited: self.frontier.visited_len(),
            urls_failed: self.frontier.failed_len(),
            urls_deferred: self.frontier.deferred_len(),
            pois_found: self.ledger.active_len(),
            started_at: self.started_at,
            elapsed: self.elapsed,
            failure_reason: self.failure_reason.clone(),
            diagnostics: self.diagnostics.clone(),
        }
    }
}

/// Status view of a session without frontier and ledger bodies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: SessionId,
    pub seed_url: String,
    pub status: SessionStatus,
    pub pages_visited: usize,
    pub urls_pending: usize,
    pub urls_visited: usize,
    pub urls_failed: usize,
    pub urls_deferred: usize,
    pub pois_found: usize,
    pub started_at: DateTime<Utc>,
    pub elapsed: Duration,
    pub failure_reason: Option<String>,
    pub diagnostics: Diagnostics,
}
