//! Crawl frontier: URLs discovered but not yet visited, plus everything
//! already visited or given up on, scoped to one session.
//!
//! Every URL is normalized before it is looked up or inserted, so a URL
//! appears at most once across all states. Pending URLs are served in
//! discovery order (breadth-first bias).

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use url::Url;

use crate::error::ScopeError;
use crate::types::{DiscoveredLink, UrlRecord, UrlState};

/// Path suffixes that never contain POI content.
const NON_CONTENT_SUFFIXES: &[&str] = &[
    ".pdf", ".jpg", ".jpeg", ".png", ".gif", ".svg", ".webp", ".ico", ".css", ".js", ".xml",
    ".json", ".zip", ".mp3", ".mp4", ".woff", ".woff2",
];

/// Normalize a URL: resolve against `base`, require http(s) with a host,
/// lowercase scheme and host, drop default port and fragment, strip
/// trailing slashes.
pub fn normalize_url(raw: &str, base: Option<&Url>) -> Result<String, ScopeError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ScopeError::Invalid {
            url: raw.to_string(),
            reason: "empty".into(),
        });
    }

    let parsed = match base {
        Some(base) => base.join(trimmed),
        None => match Url::parse(trimmed) {
            // Bare hosts like "example.com/places"
            Err(url::ParseError::RelativeUrlWithoutBase) => {
                Url::parse(&format!("https://{trimmed}"))
            }
            other => other,
        },
    };

    let mut url = parsed.map_err(|e| ScopeError::Invalid {
        url: raw.to_string(),
        reason: e.to_string(),
    })?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(ScopeError::DisallowedScheme(url.scheme().to_string()));
    }
    if url.host_str().map_or(true, str::is_empty) {
        return Err(ScopeError::Invalid {
            url: raw.to_string(),
            reason: "no host".into(),
        });
    }

    url.set_fragment(None);
    if url.query() == Some("") {
        url.set_query(None);
    }
    let path = url.path().trim_end_matches('/').to_string();
    url.set_path(if path.is_empty() { "/" } else { &path });

    let mut normalized = url.to_string();
    if url.path() == "/" && url.query().is_none() {
        normalized.pop();
    }
    Ok(normalized)
}

fn strip_www(host: &str) -> &str {
    host.strip_prefix("www.").unwrap_or(host)
}

/// Scope rules applied to every URL before it enters the frontier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UrlScope {
    root_host: String,
    allow_offsite: bool,
    max_depth: u32,
}

impl UrlScope {
    /// Scope rooted at the seed URL's host.
    pub fn for_seed(seed: &str, max_depth: u32, allow_offsite: bool) -> Result<Self, ScopeError> {
        let normalized = normalize_url(seed, None)?;
        let url = Url::parse(&normalized).map_err(|e| ScopeError::Invalid {
            url: seed.to_string(),
            reason: e.to_string(),
        })?;
        let host = url.host_str().unwrap_or_default();

        Ok(Self {
            root_host: strip_www(host).to_string(),
            allow_offsite,
            max_depth,
        })
    }

    pub fn root_host(&self) -> &str {
        &self.root_host
    }

    pub fn max_depth(&self) -> u32 {
        self.max_depth
    }

    pub fn is_same_site(&self, url: &Url) -> bool {
        url.host_str()
            .map(|host| strip_www(host) == self.root_host)
            .unwrap_or(false)
    }

    /// Check an already-normalized URL at `depth`.
    pub fn check(&self, normalized: &str, depth: u32) -> Result<(), ScopeError> {
        let url = Url::parse(normalized).map_err(|e| ScopeError::Invalid {
            url: normalized.to_string(),
            reason: e.to_string(),
        })?;

        if depth > self.max_depth {
            return Err(ScopeError::TooDeep {
                url: normalized.to_string(),
                depth,
                max_depth: self.max_depth,
            });
        }

        if !self.allow_offsite && !self.is_same_site(&url) {
            return Err(ScopeError::OffSite(normalized.to_string()));
        }

        let path = url.path().to_lowercase();
        if NON_CONTENT_SUFFIXES.iter().any(|suffix| path.ends_with(suffix)) {
            return Err(ScopeError::NonContent(normalized.to_string()));
        }

        Ok(())
    }

    /// Normalize `raw` (relative to `base`) and check it at `depth`.
    pub fn admit(&self, raw: &str, base: Option<&Url>, depth: u32) -> Result<String, ScopeError> {
        let normalized = normalize_url(raw, base)?;
        self.check(&normalized, depth)?;
        Ok(normalized)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Enqueued,
    /// Known in some state already; nothing changed
    AlreadyKnown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOutcome {
    /// Back in the pending queue; `attempt` failures so far
    Requeued { attempt: u32 },
    /// Terminally failed
    Failed,
}

/// URL bookkeeping for one session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Frontier {
    scope: UrlScope,
    retry_limit: u32,
    records: IndexMap<String, UrlRecord>,
    queue: VecDeque<String>,
    /// Links scored below the session's minimum, never fetched
    #[serde(default)]
    deferred: IndexMap<String, u8>,
}

impl Frontier {
    pub fn new(scope: UrlScope, retry_limit: u32) -> Self {
        Self {
            scope,
            retry_limit,
            records: IndexMap::new(),
            queue: VecDeque::new(),
            deferred: IndexMap::new(),
        }
    }

    pub fn scope(&self) -> &UrlScope {
        &self.scope
    }

    /// Insert `url` as pending unless it is already known.
    pub fn enqueue(
        &mut self,
        url: &str,
        depth: u32,
        parent: Option<&str>,
    ) -> Result<EnqueueOutcome, ScopeError> {
        self.insert(url, depth, parent, None)
    }

    /// Enqueue a link found by the extraction agent, keeping its score.
    pub fn enqueue_link(
        &mut self,
        link: &DiscoveredLink,
        parent: &str,
    ) -> Result<EnqueueOutcome, ScopeError> {
        self.insert(&link.url, link.depth, Some(parent), Some(link.score))
    }

    fn insert(
        &mut self,
        url: &str,
        depth: u32,
        parent: Option<&str>,
        score: Option<u8>,
    ) -> Result<EnqueueOutcome, ScopeError> {
        let normalized = normalize_url(url, None)?;
        if self.records.contains_key(&normalized) {
            return Ok(EnqueueOutcome::AlreadyKnown);
        }
        self.scope.check(&normalized, depth)?;

        self.deferred.shift_remove(&normalized);
        self.records.insert(
            normalized.clone(),
            UrlRecord {
                url: normalized.clone(),
                depth,
                discovered_from: parent.map(str::to_string),
                state: UrlState::Pending,
                attempts: 0,
                score,
            },
        );
        self.queue.push_back(normalized);
        Ok(EnqueueOutcome::Enqueued)
    }

    /// Record a low-scoring link without scheduling it. Returns false if the
    /// URL is already known.
    pub fn defer(&mut self, url: &str, score: u8) -> bool {
        let Ok(normalized) = normalize_url(url, None) else {
            return false;
        };
        if self.records.contains_key(&normalized) {
            return false;
        }
        self.deferred.insert(normalized, score);
        true
    }

    /// Next pending URL in discovery order, marked in-flight.
    pub fn dequeue(&mut self) -> Option<UrlRecord> {
        while let Some(url) = self.queue.pop_front() {
            if let Some(record) = self.records.get_mut(&url) {
                if record.state == UrlState::Pending {
                    record.state = UrlState::InFlight;
                    return Some(record.clone());
                }
            }
        }
        None
    }

    pub fn mark_visited(&mut self, url: &str) -> bool {
        match self.records.get_mut(url) {
            Some(record) => {
                record.state = UrlState::Visited;
                true
            }
            None => false,
        }
    }

    /// Record a failed fetch. Retryable failures go back to the end of the
    /// queue until `retry_limit` additional attempts are used up.
    pub fn mark_failed(&mut self, url: &str, retryable: bool) -> FailureOutcome {
        let Some(record) = self.records.get_mut(url) else {
            return FailureOutcome::Failed;
        };

        record.attempts += 1;
        if retryable && record.attempts <= self.retry_limit {
            record.state = UrlState::Pending;
            self.queue.push_back(record.url.clone());
            FailureOutcome::Requeued {
                attempt: record.attempts,
            }
        } else {
            record.state = UrlState::Failed;
            FailureOutcome::Failed
        }
    }

    /// Put in-flight URLs back at the head of the queue. Used after
    /// restoring a checkpoint taken mid-step.
    pub fn recover_in_flight(&mut self) -> usize {
        let stranded: Vec<String> = self
            .records
            .values()
            .filter(|r| r.state == UrlState::InFlight)
            .map(|r| r.url.clone())
            .collect();

        for url in stranded.iter().rev() {
            if let Some(record) = self.records.get_mut(url) {
                record.state = UrlState::Pending;
            }
            self.queue.push_front(url.clone());
        }
        stranded.len()
    }

    pub fn get(&self, url: &str) -> Option<&UrlRecord> {
        match normalize_url(url, None) {
            Ok(normalized) => self.records.get(&normalized),
            Err(_) => None,
        }
    }

    pub fn contains(&self, url: &str) -> bool {
        self.get(url).is_some()
    }

    pub fn records(&self) -> impl Iterator<Item = &UrlRecord> {
        self.records.values()
    }

    pub fn deferred(&self) -> impl Iterator<Item = (&String, &u8)> {
        self.deferred.iter()
    }

    fn count(&self, state: UrlState) -> usize {
        self.records.values().filter(|r| r.state == state).count()
    }

    pub fn pending_len(&self) -> usize {
        self.count(UrlState::Pending)
    }

    pub fn visited_len(&self) -> usize {
        self.count(UrlState::Visited)
    }

    pub fn failed_len(&self) -> usize {
        self.count(UrlState::Failed)
    }

    pub fn deferred_len(&self) -> usize {
        self.deferred.len()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
