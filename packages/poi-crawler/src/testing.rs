//! Testing utilities including mock implementations.
//!
//! Deterministic stand-ins for the fetch gateway and the reasoning backend,
//! so sessions can be driven end to end without network or LLM calls.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use crate::error::{BackendError, BackendResult, FetchError, FetchResult};
use crate::frontier::normalize_url;
use crate::session::SessionDeps;
use crate::traits::{PageFetcher, Prompt, PromptKind, ReasoningBackend};
use crate::types::PageContent;

pub use crate::events::MemoryEventSink;
pub use crate::storage::MemoryCheckpointStore;

fn key(url: &str) -> String {
    normalize_url(url, None).unwrap_or_else(|_| url.to_string())
}

/// Build session dependencies around the given mocks, returning handles to
/// the in-memory store and event sink for assertions.
pub fn mock_deps(
    fetcher: MockFetcher,
    backend: MockBackend,
) -> (SessionDeps, MemoryCheckpointStore, MemoryEventSink) {
    let store = MemoryCheckpointStore::new();
    let events = MemoryEventSink::new();
    let deps = SessionDeps {
        fetcher: Arc::new(fetcher),
        backend: Arc::new(backend),
        store: Arc::new(store.clone()),
        events: Arc::new(events.clone()),
    };
    (deps, store, events)
}

// ============================================================================
// FETCHER
// ============================================================================

/// A scripted fetch failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockFailure {
    Timeout,
    Status(u16),
    Network,
}

impl MockFailure {
    fn into_error(self, url: &str) -> FetchError {
        match self {
            MockFailure::Timeout => FetchError::Timeout { url: url.to_string() },
            MockFailure::Status(status) => FetchError::Http {
                url: url.to_string(),
                status,
            },
            MockFailure::Network => FetchError::Network {
                url: url.to_string(),
                source: "connection reset".into(),
            },
        }
    }
}

/// A mock fetch gateway.
///
/// Lookup order: scripted failures (consumed one per fetch), fixed pages,
/// the generated site, then HTTP 404.
#[derive(Default, Clone)]
pub struct MockFetcher {
    pages: Arc<RwLock<HashMap<String, PageContent>>>,
    failures: Arc<RwLock<HashMap<String, VecDeque<MockFailure>>>>,
    /// (root URL, links per page)
    generated: Option<(String, usize)>,
    delay: Option<Duration>,
    calls: Arc<RwLock<Vec<String>>>,
}

impl MockFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `page` at `page.url`.
    pub fn with_page(self, page: PageContent) -> Self {
        self.pages.write().unwrap().insert(key(&page.url), page);
        self
    }

    /// Fail the next fetches of `url` with these failures, in order.
    pub fn with_failures(self, url: &str, failures: Vec<MockFailure>) -> Self {
        self.failures
            .write()
            .unwrap()
            .entry(key(url))
            .or_default()
            .extend(failures);
        self
    }

    /// Serve an endless tree under `root`: page `k` links to pages
    /// `k * fanout + 1 ..= k * fanout + fanout`, the root being page 0.
    pub fn with_generated_site(mut self, root: &str, fanout: usize) -> Self {
        self.generated = Some((key(root), fanout));
        self
    }

    /// Sleep before every fetch.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Every URL fetched so far, in order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.read().unwrap().clone()
    }

    pub fn fetch_count(&self, url: &str) -> usize {
        let url = key(url);
        self.calls().iter().filter(|u| **u == url).count()
    }

    fn generated_page(&self, url: &str) -> Option<PageContent> {
        let (root, fanout) = self.generated.as_ref()?;
        let index: usize = if url == root {
            0
        } else {
            url.strip_prefix(root.as_str())?
                .strip_prefix("/page/")?
                .parse()
                .ok()?
        };

        let links = (1..=*fanout)
            .map(|i| format!("{root}/page/{}", index * fanout + i))
            .collect();
        Some(
            PageContent::from_text(url, format!("Generated page {index}"))
                .with_title(format!("Page {index}"))
                .with_links(links),
        )
    }
}

#[async_trait]
impl PageFetcher for MockFetcher {
    async fn fetch(&self, url: &str) -> FetchResult<PageContent> {
        let url = key(url);
        self.calls.write().unwrap().push(url.clone());

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let failure = self
            .failures
            .write()
            .unwrap()
            .get_mut(&url)
            .and_then(VecDeque::pop_front);
        if let Some(failure) = failure {
            return Err(failure.into_error(&url));
        }

        if let Some(page) = self.pages.read().unwrap().get(&url).cloned() {
            return Ok(page);
        }

        self.generated_page(&url)
            .ok_or(FetchError::Http { url, status: 404 })
    }
}

// ============================================================================
// REASONING BACKEND
// ============================================================================

type ResponseFn = dyn Fn(&Prompt) -> BackendResult<String> + Send + Sync;

/// A mock reasoning backend.
///
/// Extraction prompts are answered from a per-URL script; the last scripted
/// entry repeats. Unscripted pages get the default response, which reports
/// no POIs and lets the page's own links through. Validation prompts answer
/// "yes" unless overridden for a candidate name.
#[derive(Default, Clone)]
pub struct MockBackend {
    scripted: Arc<RwLock<HashMap<String, VecDeque<BackendResult<String>>>>>,
    validation_answers: Arc<RwLock<HashMap<String, String>>>,
    default: Option<Arc<ResponseFn>>,
    delay: Option<Duration>,
    calls: Arc<RwLock<Vec<Prompt>>>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a raw response for extraction prompts about `url`.
    pub fn with_response(self, url: &str, response: impl Into<String>) -> Self {
        self.push(url, Ok(response.into()));
        self
    }

    /// Append an error for extraction prompts about `url`.
    pub fn with_error(self, url: &str, error: BackendError) -> Self {
        self.push(url, Err(error));
        self
    }

    /// Answer unscripted extraction prompts with `f`.
    pub fn with_default<F>(mut self, f: F) -> Self
    where
        F: Fn(&Prompt) -> BackendResult<String> + Send + Sync + 'static,
    {
        self.default = Some(Arc::new(f));
        self
    }

    /// Fail every unscripted extraction prompt with `error`.
    pub fn failing_with(self, error: BackendError) -> Self {
        self.with_default(move |_| Err(error.clone()))
    }

    pub fn with_validation_answer(self, name: &str, answer: &str) -> Self {
        self.validation_answers
            .write()
            .unwrap()
            .insert(name.to_string(), answer.to_string());
        self
    }

    /// Sleep before every reply.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> Vec<Prompt> {
        self.calls.read().unwrap().clone()
    }

    pub fn calls_of(&self, kind: PromptKind) -> Vec<Prompt> {
        self.calls().into_iter().filter(|p| p.kind == kind).collect()
    }

    fn push(&self, url: &str, response: BackendResult<String>) {
        self.scripted
            .write()
            .unwrap()
            .entry(key(url))
            .or_default()
            .push_back(response);
    }

    fn next_scripted(&self, url: &str) -> Option<BackendResult<String>> {
        let mut scripted = self.scripted.write().unwrap();
        let queue = scripted.get_mut(&key(url))?;
        if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        }
    }

    fn validation_answer(&self, prompt: &Prompt) -> String {
        self.validation_answers
            .read()
            .unwrap()
            .iter()
            .find(|(name, _)| prompt.user.contains(&format!("\"{name}\"")))
            .map(|(_, answer)| answer.clone())
            .unwrap_or_else(|| "yes".to_string())
    }
}

#[async_trait]
impl ReasoningBackend for MockBackend {
    async fn complete(&self, prompt: &Prompt) -> BackendResult<String> {
        self.calls.write().unwrap().push(prompt.clone());

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        match prompt.kind {
            PromptKind::Validation => Ok(self.validation_answer(prompt)),
            PromptKind::Extraction => match self.next_scripted(&prompt.page_url) {
                Some(response) => response,
                None => match &self.default {
                    Some(f) => f(prompt),
                    None => Ok(r#"{"pois":[],"decision":"continue"}"#.to_string()),
                },
            },
        }
    }
}
