//! Session controller: the crawl loop.
//!
//! One controller owns one `SessionState` for its whole lifetime. Each
//! `step` handles exactly one frontier URL end to end (fetch, extract, merge,
//! enqueue, checkpoint), so a pause observed between steps never leaves a
//! half-applied page behind.

use chrono::Utc;
use indexmap::IndexMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

use crate::agent::{ExtractionAgent, ExtractionOutcome, SessionContext};
use crate::config::SessionConfig;
use crate::error::{BackendError, FetchError, Result, SessionError};
use crate::events::{EventSink, ProgressEvent, SessionEvent};
use crate::frontier::{normalize_url, EnqueueOutcome, FailureOutcome, Frontier, UrlScope};
use crate::ledger::{MergeOutcome, PoiLedger};
use crate::traits::{CheckpointStore, PageFetcher, ReasoningBackend};
use crate::types::{
    Diagnostics, PageContent, PoiRecord, PoiStatus, SessionId, SessionState, SessionStatus,
    SessionSummary, UrlRecord,
};

/// How many processed pages feed the recent-performance context.
const RECENT_PAGES: usize = 5;

/// Parent patterns listed in the extraction context, busiest first.
const MAX_PATTERNS: usize = 20;

/// External collaborators of a session.
#[derive(Clone)]
pub struct SessionDeps {
    pub fetcher: Arc<dyn PageFetcher>,
    pub backend: Arc<dyn ReasoningBackend>,
    pub store: Arc<dyn CheckpointStore>,
    pub events: Arc<dyn EventSink>,
}

/// What a single `step` did.
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    Processed { url: String, pois_found: usize },
    /// Same content as an already processed URL; visited without extraction
    Duplicate { url: String, duplicate_of: String },
    FetchFailed { url: String, will_retry: bool },
    BackendFailed { url: String, error: BackendError },
    /// The pause handle fired; the session is now paused
    Paused,
    /// The session is in (or just reached) a terminal state
    Finished(SessionStatus),
}

/// Build the initial state for a new session: seed at depth 0, empty ledger.
pub fn new_session_state(seed_url: &str, config: SessionConfig) -> Result<SessionState> {
    config.validate()?;

    let seed = normalize_url(seed_url, None)?;
    let scope = UrlScope::for_seed(&seed, config.max_depth, config.allow_offsite)?;
    let mut frontier = Frontier::new(scope, config.retry_limit);
    frontier.enqueue(&seed, 0, None)?;

    Ok(SessionState {
        session_id: SessionId::new(),
        seed_url: seed,
        ledger: PoiLedger::new(config.confidence_threshold),
        config,
        frontier,
        pages_visited: 0,
        started_at: Utc::now(),
        elapsed: Duration::ZERO,
        status: SessionStatus::Running,
        failure_reason: None,
        recent_poi_counts: Vec::new(),
        pattern_stats: IndexMap::new(),
        content_hashes: IndexMap::new(),
        diagnostics: Diagnostics::default(),
    })
}

pub struct SessionController {
    state: SessionState,
    deps: SessionDeps,
    agent: ExtractionAgent,
    cancel: CancellationToken,
    consecutive_backend_failures: u32,
    consecutive_persistence_failures: u32,
    pages_since_checkpoint: usize,
    last_checkpoint: Instant,
    /// Start of the not-yet-accounted slice of running time
    last_tick: Instant,
}

impl SessionController {
    /// Start a new session at `seed_url` and write the initial checkpoint.
    pub async fn start(seed_url: &str, config: SessionConfig, deps: SessionDeps) -> Result<Self> {
        let state = new_session_state(seed_url, config)?;

        tracing::info!(
            session_id = %state.session_id,
            seed_url = %state.seed_url,
            max_depth = state.config.max_depth,
            max_pages = ?state.config.max_pages,
            "Starting POI crawl session"
        );

        let mut controller = Self::from_state(state, deps);
        controller.emit(SessionEvent::SessionStarted {
            seed_url: controller.state.seed_url.clone(),
        });
        controller.checkpoint().await;
        Ok(controller)
    }

    /// Rebuild a controller from a checkpoint.
    ///
    /// URLs that were in flight when the checkpoint was taken go back to the
    /// head of the queue; visited URLs are never fetched again. The ledger is
    /// reconciled against the configured threshold.
    pub fn restore(mut state: SessionState, deps: SessionDeps) -> Result<Self> {
        state.config.validate()?;

        let recovered = state.frontier.recover_in_flight();
        let rejected = state.ledger.reconcile(state.config.confidence_threshold);

        tracing::info!(
            session_id = %state.session_id,
            status = ?state.status,
            pages_visited = state.pages_visited,
            pending = state.frontier.pending_len(),
            recovered,
            rejected,
            "Restored session from checkpoint"
        );

        Ok(Self::from_state(state, deps))
    }

    fn from_state(state: SessionState, deps: SessionDeps) -> Self {
        let agent = ExtractionAgent::new(
            deps.backend.clone(),
            state.frontier.scope().clone(),
            state.config.reasoning_timeout,
        )
        .with_validation(state.config.validate_pois);

        Self {
            state,
            deps,
            agent,
            cancel: CancellationToken::new(),
            consecutive_backend_failures: 0,
            consecutive_persistence_failures: 0,
            pages_since_checkpoint: 0,
            last_checkpoint: Instant::now(),
            last_tick: Instant::now(),
        }
    }

    pub fn session_id(&self) -> SessionId {
        self.state.session_id
    }

    pub fn status(&self) -> SessionStatus {
        self.state.status
    }

    /// Token that pauses the session when cancelled. Observed between steps.
    pub fn pause_handle(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn summary(&self) -> SessionSummary {
        self.state.summary()
    }

    /// Active POIs accumulated so far, in discovery order. Available in
    /// every state, including `Failed`.
    pub fn results(&self) -> Vec<PoiRecord> {
        self.state
            .ledger
            .export()
            .into_iter()
            .filter(|r| r.status == PoiStatus::Active)
            .collect()
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn into_state(self) -> SessionState {
        self.state
    }

    // ============================================================================
    // Lifecycle
    // ============================================================================

    /// Drive the session until it pauses or reaches a terminal state.
    pub async fn run(&mut self) -> SessionStatus {
        loop {
            match self.step().await {
                StepOutcome::Finished(status) => return status,
                StepOutcome::Paused => return SessionStatus::Paused,
                _ => {}
            }
        }
    }

    /// Pause now: transition to `Paused` and checkpoint.
    pub async fn pause(&mut self) -> Result<()> {
        self.tick();
        self.transition(SessionStatus::Paused, None)?;
        self.checkpoint().await;
        Ok(())
    }

    /// Resume a paused session. Issues a fresh pause handle.
    pub fn resume(&mut self) -> Result<()> {
        self.transition(SessionStatus::Running, None)?;
        self.cancel = CancellationToken::new();
        self.last_tick = Instant::now();
        Ok(())
    }

    fn transition(&mut self, to: SessionStatus, reason: Option<String>) -> Result<()> {
        let from = self.state.status;
        if !from.can_transition_to(to) {
            return Err(SessionError::InvalidTransition { from, to });
        }

        tracing::info!(
            session_id = %self.state.session_id,
            ?from,
            ?to,
            reason = reason.as_deref().unwrap_or(""),
            pages_visited = self.state.pages_visited,
            pois = self.state.ledger.active_len(),
            "Session status changed"
        );

        self.state.status = to;
        if to == SessionStatus::Failed {
            self.state.failure_reason = reason.clone();
        }
        self.emit(SessionEvent::StatusChanged { from, to, reason });
        Ok(())
    }

    async fn finish(&mut self, to: SessionStatus, reason: Option<String>) -> StepOutcome {
        self.tick();
        if let Err(e) = self.transition(to, reason) {
            tracing::error!(session_id = %self.state.session_id, error = %e, "Could not finish session");
            return StepOutcome::Finished(self.state.status);
        }
        self.checkpoint().await;
        StepOutcome::Finished(to)
    }

    // ============================================================================
    // Loop body
    // ============================================================================

    /// Process at most one frontier URL.
    pub async fn step(&mut self) -> StepOutcome {
        match self.state.status {
            SessionStatus::Running => {}
            SessionStatus::Paused => return StepOutcome::Paused,
            terminal => return StepOutcome::Finished(terminal),
        }

        if self.cancel.is_cancelled() {
            return match self.pause().await {
                Ok(()) => StepOutcome::Paused,
                Err(_) => StepOutcome::Finished(self.state.status),
            };
        }

        self.tick();
        if let Some(reason) = self.budget_exhausted() {
            return self.finish(SessionStatus::BudgetExhausted, Some(reason)).await;
        }

        let Some(record) = self.state.frontier.dequeue() else {
            return self.finish(SessionStatus::Completed, None).await;
        };

        tracing::debug!(
            session_id = %self.state.session_id,
            url = %record.url,
            depth = record.depth,
            attempts = record.attempts,
            "Processing URL"
        );

        let page = match self.fetch(&record.url).await {
            Ok(page) => page,
            Err(e) => return self.on_fetch_failure(&record, e).await,
        };

        if let Some(first) = self.state.content_hashes.get(&page.content_hash) {
            if *first != record.url {
                let duplicate_of = first.clone();
                return self.on_duplicate(record, duplicate_of).await;
            }
        }

        let context = self.context_for(&record);
        let outcome = self.agent.extract(&page, &context).await;

        if let Some(error) = outcome.error.clone() {
            return self.on_backend_failure(&record, error).await;
        }
        self.consecutive_backend_failures = 0;
        self.state
            .content_hashes
            .entry(page.content_hash.clone())
            .or_insert_with(|| record.url.clone());

        let stop_requested = !outcome.continue_signal;
        let pois_found = self.apply(&record, outcome);

        if stop_requested {
            tracing::info!(
                session_id = %self.state.session_id,
                url = %record.url,
                "Reasoning backend decided to stop the crawl"
            );
            return self
                .finish(SessionStatus::Completed, Some("reasoning backend decided to stop".into()))
                .await;
        }

        self.tick();
        if self.checkpoint_due() {
            self.checkpoint().await;
        }

        StepOutcome::Processed {
            url: record.url,
            pois_found,
        }
    }

    async fn fetch(&self, url: &str) -> std::result::Result<PageContent, FetchError> {
        match tokio::time::timeout(self.state.config.fetch_timeout, self.deps.fetcher.fetch(url)).await {
            Ok(result) => result,
            Err(_) => Err(FetchError::Timeout { url: url.to_string() }),
        }
    }

    fn budget_exhausted(&self) -> Option<String> {
        let config = &self.state.config;
        if let Some(max_pages) = config.max_pages {
            if self.state.pages_visited >= max_pages {
                return Some(format!("page budget of {max_pages} reached"));
            }
        }
        if let Some(max_duration) = config.max_duration {
            if self.state.elapsed > max_duration {
                return Some(format!("time budget of {}s exceeded", max_duration.as_secs_f64()));
            }
        }
        None
    }

    fn context_for(&self, record: &UrlRecord) -> SessionContext {
        let config = &self.state.config;
        SessionContext {
            known_pois: self.state.ledger.known_names(config.known_poi_summary_limit),
            pages_visited: self.state.pages_visited,
            pages_remaining: config
                .max_pages
                .map(|max| max.saturating_sub(self.state.pages_visited)),
            time_remaining: config
                .max_duration
                .map(|max| max.saturating_sub(self.state.elapsed)),
            depth: record.depth,
            max_depth: config.max_depth,
            recent_poi_counts: self.state.recent_poi_counts.clone(),
            pattern_performance: self.pattern_performance(),
        }
    }

    /// `(parent, children_with_pois, children_visited)`, busiest parents first.
    fn pattern_performance(&self) -> Vec<(String, usize, usize)> {
        let mut patterns: Vec<(String, usize, usize)> = self
            .state
            .pattern_stats
            .iter()
            .map(|(parent, stats)| {
                (parent.clone(), stats.children_with_pois, stats.children_visited)
            })
            .collect();
        patterns.sort_by(|a, b| b.2.cmp(&a.2));
        patterns.truncate(MAX_PATTERNS);
        patterns
    }

    /// Fold a successful extraction into the ledger and frontier.
    fn apply(&mut self, record: &UrlRecord, outcome: ExtractionOutcome) -> usize {
        let report = &outcome.report;
        let diagnostics = &mut self.state.diagnostics;
        diagnostics.candidates_dropped += report.candidates_dropped;
        diagnostics.candidates_rejected_by_validator += report.candidates_rejected_by_validator;
        diagnostics.links_rejected += report.links_rejected;
        if report.malformed_response {
            diagnostics.malformed_responses += 1;
        }

        let mut pois_found = 0;
        for candidate in &outcome.candidates {
            match self.state.ledger.merge(candidate) {
                MergeOutcome::Created(key) => {
                    pois_found += 1;
                    self.emit(SessionEvent::PoiCreated {
                        key,
                        name: candidate.name.clone(),
                    });
                }
                MergeOutcome::Updated(key) => {
                    pois_found += 1;
                    self.emit(SessionEvent::PoiUpdated {
                        key,
                        name: candidate.name.clone(),
                    });
                }
                MergeOutcome::Unchanged(_) => pois_found += 1,
                MergeOutcome::Rejected(reason) => {
                    tracing::debug!(name = %candidate.name, ?reason, "Candidate rejected by ledger");
                    self.state.diagnostics.candidates_rejected += 1;
                }
            }
        }

        let min_score = self.state.config.min_link_score;
        let mut links_enqueued = 0;
        for link in &outcome.links {
            if min_score.is_some_and(|min| link.score < min) {
                if self.state.frontier.defer(&link.url, link.score) {
                    self.state.diagnostics.links_deferred += 1;
                }
                continue;
            }
            match self.state.frontier.enqueue_link(link, &record.url) {
                Ok(EnqueueOutcome::Enqueued) => links_enqueued += 1,
                Ok(EnqueueOutcome::AlreadyKnown) => {}
                Err(e) => {
                    tracing::trace!(url = %link.url, error = %e, "Link refused by frontier");
                    self.state.diagnostics.links_rejected += 1;
                }
            }
        }

        self.record_visit(record, pois_found);

        tracing::info!(
            session_id = %self.state.session_id,
            url = %record.url,
            depth = record.depth,
            pois_found,
            links_enqueued,
            pages_visited = self.state.pages_visited,
            "Page processed"
        );
        self.emit(SessionEvent::PageProcessed {
            url: record.url.clone(),
            depth: record.depth,
            pois_found,
            links_enqueued,
            pages_visited: self.state.pages_visited,
        });

        pois_found
    }

    fn record_visit(&mut self, record: &UrlRecord, pois_found: usize) {
        self.state.frontier.mark_visited(&record.url);
        self.state.pages_visited += 1;
        self.pages_since_checkpoint += 1;

        self.state
            .recent_poi_counts
            .push((record.url.clone(), pois_found));
        let overflow = self.state.recent_poi_counts.len().saturating_sub(RECENT_PAGES);
        self.state.recent_poi_counts.drain(..overflow);

        if let Some(parent) = &record.discovered_from {
            let stats = self.state.pattern_stats.entry(parent.clone()).or_default();
            stats.children_visited += 1;
            if pois_found > 0 {
                stats.children_with_pois += 1;
            }
        }
    }

    async fn on_duplicate(&mut self, record: UrlRecord, duplicate_of: String) -> StepOutcome {
        self.state.diagnostics.duplicate_pages += 1;
        self.record_visit(&record, 0);

        tracing::info!(
            session_id = %self.state.session_id,
            url = %record.url,
            duplicate_of = %duplicate_of,
            "Skipping page with already processed content"
        );
        self.emit(SessionEvent::PageProcessed {
            url: record.url.clone(),
            depth: record.depth,
            pois_found: 0,
            links_enqueued: 0,
            pages_visited: self.state.pages_visited,
        });

        self.tick();
        if self.checkpoint_due() {
            self.checkpoint().await;
        }

        StepOutcome::Duplicate {
            url: record.url,
            duplicate_of,
        }
    }

    async fn on_fetch_failure(&mut self, record: &UrlRecord, error: FetchError) -> StepOutcome {
        let retryable = error.is_retryable();
        let outcome = self.state.frontier.mark_failed(&record.url, retryable);
        let will_retry = matches!(outcome, FailureOutcome::Requeued { .. });

        match outcome {
            FailureOutcome::Requeued { attempt } => {
                self.state.diagnostics.fetch_retries += 1;
                tracing::warn!(
                    session_id = %self.state.session_id,
                    url = %record.url,
                    attempt,
                    error = %error,
                    "Fetch failed, will retry"
                );
            }
            FailureOutcome::Failed => {
                self.state.diagnostics.pages_failed += 1;
                tracing::warn!(
                    session_id = %self.state.session_id,
                    url = %record.url,
                    error = %error,
                    "Fetch failed, giving up on URL"
                );
            }
        }

        self.emit(SessionEvent::PageFailed {
            url: record.url.clone(),
            error_kind: error.kind().to_string(),
            error: error.to_string(),
            will_retry,
        });

        self.tick();
        if self.checkpoint_due() {
            self.checkpoint().await;
        }

        StepOutcome::FetchFailed {
            url: record.url.clone(),
            will_retry,
        }
    }

    async fn on_backend_failure(&mut self, record: &UrlRecord, error: BackendError) -> StepOutcome {
        self.consecutive_backend_failures += 1;
        self.state.diagnostics.backend_failures += 1;

        let outcome = self.state.frontier.mark_failed(&record.url, true);
        if outcome == FailureOutcome::Failed {
            self.state.diagnostics.pages_failed += 1;
        }

        tracing::warn!(
            session_id = %self.state.session_id,
            url = %record.url,
            error = %error,
            consecutive = self.consecutive_backend_failures,
            "Extraction failed for page"
        );
        self.emit(SessionEvent::PageFailed {
            url: record.url.clone(),
            error_kind: format!("backend_{}", error.kind()),
            error: error.to_string(),
            will_retry: matches!(outcome, FailureOutcome::Requeued { .. }),
        });

        let max = self.state.config.max_consecutive_backend_failures;
        if self.consecutive_backend_failures >= max {
            let reason = format!("reasoning backend failed {max} times in a row: {error}");
            return self.finish(SessionStatus::Failed, Some(reason)).await;
        }

        StepOutcome::BackendFailed {
            url: record.url.clone(),
            error,
        }
    }

    // ============================================================================
    // Persistence
    // ============================================================================

    fn checkpoint_due(&self) -> bool {
        let config = &self.state.config;
        self.pages_since_checkpoint >= config.checkpoint_interval_pages
            || config
                .checkpoint_interval
                .is_some_and(|interval| self.last_checkpoint.elapsed() >= interval)
    }

    /// Persist the current state. Failures never stop the session; enough of
    /// them in a row switch it to degraded mode.
    async fn checkpoint(&mut self) {
        match self.deps.store.save(&self.state).await {
            Ok(()) => {
                self.consecutive_persistence_failures = 0;
                self.pages_since_checkpoint = 0;
                self.last_checkpoint = Instant::now();
                self.emit(SessionEvent::CheckpointSaved {
                    pages_visited: self.state.pages_visited,
                });
            }
            Err(e) => {
                self.consecutive_persistence_failures += 1;
                self.state.diagnostics.persistence_failures += 1;

                tracing::warn!(
                    session_id = %self.state.session_id,
                    error = %e,
                    consecutive = self.consecutive_persistence_failures,
                    "Checkpoint failed"
                );
                self.emit(SessionEvent::CheckpointFailed {
                    error: e.to_string(),
                    consecutive_failures: self.consecutive_persistence_failures,
                });

                let max = self.state.config.max_consecutive_persistence_failures;
                if self.consecutive_persistence_failures >= max && !self.state.diagnostics.degraded {
                    self.state.diagnostics.degraded = true;
                    let reason = format!("{max} consecutive checkpoint failures, last: {e}");
                    tracing::error!(
                        session_id = %self.state.session_id,
                        %reason,
                        "Continuing without durable checkpoints"
                    );
                    self.emit(SessionEvent::DegradedMode { reason });
                }
            }
        }
    }

    fn tick(&mut self) {
        let now = Instant::now();
        if self.state.status == SessionStatus::Running {
            self.state.elapsed += now.duration_since(self.last_tick);
        }
        self.last_tick = now;
    }

    fn emit(&self, event: SessionEvent) {
        self.deps
            .events
            .emit(ProgressEvent::new(self.state.session_id, event));
    }
}
