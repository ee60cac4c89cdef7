//! Session configuration.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::error::SessionError;

/// Configuration for one crawl session.
///
/// Persisted inside every checkpoint so a resumed session keeps the budgets
/// it was started with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Maximum link depth from the seed (seed = 0)
    pub max_depth: u32,

    /// Page budget; `None` means unbounded
    pub max_pages: Option<usize>,

    /// Active-time budget; `None` means unbounded
    pub max_duration: Option<Duration>,

    /// Candidates below this confidence never enter the ledger
    pub confidence_threshold: f32,

    /// Additional attempts after a retryable fetch failure
    pub retry_limit: u32,

    /// Checkpoint after every N visited pages
    pub checkpoint_interval_pages: usize,

    /// Also checkpoint when this much time passed since the last save
    pub checkpoint_interval: Option<Duration>,

    /// Follow links to other hosts
    pub allow_offsite: bool,

    /// Links scored below this are deferred instead of enqueued
    pub min_link_score: Option<u8>,

    /// Ask the backend to confirm each candidate is a real place
    pub validate_pois: bool,

    pub fetch_timeout: Duration,

    pub reasoning_timeout: Duration,

    /// Consecutive hard backend failures before the session aborts
    pub max_consecutive_backend_failures: u32,

    /// Consecutive checkpoint failures before entering degraded mode
    pub max_consecutive_persistence_failures: u32,

    /// How many known POI names are summarized for the backend
    pub known_poi_summary_limit: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_depth: 3,
            max_pages: Some(100),
            max_duration: None,
            confidence_threshold: 0.3,
            retry_limit: 2,
            checkpoint_interval_pages: 1,
            checkpoint_interval: None,
            allow_offsite: false,
            min_link_score: None,
            validate_pois: false,
            fetch_timeout: Duration::from_secs(30),
            reasoning_timeout: Duration::from_secs(60),
            max_consecutive_backend_failures: 3,
            max_consecutive_persistence_failures: 3,
            known_poi_summary_limit: 50,
        }
    }
}

impl SessionConfig {
    /// Create a new config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_depth(mut self, depth: u32) -> Self {
        self.max_depth = depth;
        self
    }

    pub fn with_max_pages(mut self, max: usize) -> Self {
        self.max_pages = Some(max);
        self
    }

    pub fn unbounded_pages(mut self) -> Self {
        self.max_pages = None;
        self
    }

    pub fn with_max_duration(mut self, duration: Duration) -> Self {
        self.max_duration = Some(duration);
        self
    }

    pub fn with_confidence_threshold(mut self, threshold: f32) -> Self {
        self.confidence_threshold = threshold;
        self
    }

    pub fn with_retry_limit(mut self, limit: u32) -> Self {
        self.retry_limit = limit;
        self
    }

    pub fn with_checkpoint_interval_pages(mut self, pages: usize) -> Self {
        self.checkpoint_interval_pages = pages;
        self
    }

    pub fn with_checkpoint_interval(mut self, interval: Duration) -> Self {
        self.checkpoint_interval = Some(interval);
        self
    }

    pub fn allow_offsite(mut self) -> Self {
        self.allow_offsite = true;
        self
    }

    pub fn with_min_link_score(mut self, score: u8) -> Self {
        self.min_link_score = Some(score);
        self
    }

    pub fn with_poi_validation(mut self) -> Self {
        self.validate_pois = true;
        self
    }

    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    pub fn with_reasoning_timeout(mut self, timeout: Duration) -> Self {
        self.reasoning_timeout = timeout;
        self
    }

    pub fn with_max_consecutive_backend_failures(mut self, max: u32) -> Self {
        self.max_consecutive_backend_failures = max;
        self
    }

    pub fn with_max_consecutive_persistence_failures(mut self, max: u32) -> Self {
        self.max_consecutive_persistence_failures = max;
        self
    }

    /// Reject values the session loop cannot honor.
    pub fn validate(&self) -> Result<(), SessionError> {
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return Err(SessionError::InvalidConfig(format!(
                "confidence_threshold must be within [0, 1], got {}",
                self.confidence_threshold
            )));
        }
        if self.checkpoint_interval_pages == 0 {
            return Err(SessionError::InvalidConfig(
                "checkpoint_interval_pages must be > 0".into(),
            ));
        }
        if self.max_consecutive_backend_failures == 0 {
            return Err(SessionError::InvalidConfig(
                "max_consecutive_backend_failures must be > 0".into(),
            ));
        }
        if let Some(score) = self.min_link_score {
            if !(1..=5).contains(&score) {
                return Err(SessionError::InvalidConfig(format!(
                    "min_link_score must be within 1..=5, got {score}"
                )));
            }
        }
        Ok(())
    }

    /// Load overrides from `POI_*` environment variables on top of defaults.
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenvy::dotenv();

        let mut config = Self::default();

        if let Some(depth) = parse_var::<u32>("POI_MAX_DEPTH")? {
            config.max_depth = depth;
        }
        if let Some(pages) = parse_var::<usize>("POI_MAX_PAGES")? {
            config.max_pages = if pages == 0 { None } else { Some(pages) };
        }
        if let Some(secs) = parse_var::<u64>("POI_MAX_DURATION_SECS")? {
            config.max_duration = Some(Duration::from_secs(secs));
        }
        if let Some(threshold) = parse_var::<f32>("POI_CONFIDENCE_THRESHOLD")? {
            config.confidence_threshold = threshold;
        }
        if let Some(limit) = parse_var::<u32>("POI_RETRY_LIMIT")? {
            config.retry_limit = limit;
        }
        if let Some(pages) = parse_var::<usize>("POI_CHECKPOINT_INTERVAL_PAGES")? {
            config.checkpoint_interval_pages = pages;
        }
        if let Some(allow) = parse_var::<bool>("POI_ALLOW_OFFSITE")? {
            config.allow_offsite = allow;
        }
        if let Some(score) = parse_var::<u8>("POI_MIN_LINK_SCORE")? {
            config.min_link_score = Some(score);
        }
        if let Some(validate) = parse_var::<bool>("POI_VALIDATE_POIS")? {
            config.validate_pois = validate;
        }
        if let Some(secs) = parse_var::<u64>("POI_FETCH_TIMEOUT_SECS")? {
            config.fetch_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_var::<u64>("POI_REASONING_TIMEOUT_SECS")? {
            config.reasoning_timeout = Duration::from_secs(secs);
        }

        config
            .validate()
            .context("Invalid POI_* configuration")?;
        Ok(config)
    }
}

fn parse_var<T>(name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .with_context(|| format!("{name} must be a valid value, got `{raw}`")),
        Err(_) => Ok(None),
    }
}
