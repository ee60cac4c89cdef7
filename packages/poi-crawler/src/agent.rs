//! Extraction agent: one page in, POI candidates and scored links out.
//!
//! The agent is the only place that talks to the reasoning backend. It never
//! touches the ledger or the frontier; everything it returns is applied by the
//! session controller.

use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

use crate::error::{BackendError, ValidationError};
use crate::frontier::{normalize_url, UrlScope};
use crate::traits::{Prompt, PromptKind, ReasoningBackend};
use crate::types::{DiscoveredLink, PageContent, PoiCandidate};

const MAX_NAME_LEN: usize = 200;
const MAX_CATEGORY_LEN: usize = 100;
const MAX_ADDRESS_LEN: usize = 300;
const MAX_DESCRIPTION_LEN: usize = 2000;
const MAX_PAGE_CHARS: usize = 12_000;
const MAX_PROMPT_LINKS: usize = 100;

const DEFAULT_CATEGORY: &str = "uncategorized";
const DEFAULT_CONFIDENCE: f32 = 0.5;
const DEFAULT_LINK_SCORE: u8 = 3;

const EXTRACTION_SYSTEM_PROMPT: &str = r#"You extract points of interest (POIs) from web pages.
A POI is a specific place people can visit: a museum, park, restaurant, landmark, venue, shop.
Reply with a single JSON object and nothing else:
{
  "pois": [{"name": "...", "category": "...", "address": "... or null", "description": "... or null", "confidence": 0.0-1.0}],
  "links": [{"url": "...", "score": 1-5}],
  "decision": "continue" | "stop"
}
Score each link 1-5 by how likely it leads to more POIs. Only list links that appear on the page.
Do not repeat POIs that are already known. Answer "stop" when further crawling is unlikely to find new POIs."#;

const VALIDATION_SYSTEM_PROMPT: &str =
    "You check whether a name refers to a specific place people can visit. Answer only yes or no.";

/// What the agent knows about the session when it looks at a page.
#[derive(Debug, Clone, Default)]
pub struct SessionContext {
    /// Names already in the ledger, so the backend can skip them
    pub known_pois: Vec<String>,
    pub pages_visited: usize,
    pub pages_remaining: Option<usize>,
    pub time_remaining: Option<Duration>,
    /// Depth of the page being processed
    pub depth: u32,
    pub max_depth: u32,
    /// POI counts of the last few processed pages, oldest first
    pub recent_poi_counts: Vec<(String, usize)>,
    /// `(parent_url, children_with_pois, children_visited)` per parent page
    pub pattern_performance: Vec<(String, usize, usize)>,
}

/// Per-page counters folded into the session diagnostics.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtractionReport {
    pub candidates_dropped: usize,
    pub candidates_rejected_by_validator: usize,
    pub links_rejected: usize,
    pub malformed_response: bool,
}

#[derive(Debug, Clone)]
pub struct ExtractionOutcome {
    pub candidates: Vec<PoiCandidate>,
    pub links: Vec<DiscoveredLink>,
    /// `false` either on a hard backend error (see `error`) or when the
    /// backend decided the crawl should stop
    pub continue_signal: bool,
    pub error: Option<BackendError>,
    pub report: ExtractionReport,
}

impl ExtractionOutcome {
    fn failed(error: BackendError) -> Self {
        Self {
            candidates: Vec::new(),
            links: Vec::new(),
            continue_signal: false,
            error: Some(error),
            report: ExtractionReport::default(),
        }
    }

    fn malformed() -> Self {
        Self {
            candidates: Vec::new(),
            links: Vec::new(),
            continue_signal: true,
            error: None,
            report: ExtractionReport {
                malformed_response: true,
                ..Default::default()
            },
        }
    }
}

pub struct ExtractionAgent {
    backend: Arc<dyn ReasoningBackend>,
    scope: UrlScope,
    timeout: Duration,
    validate_pois: bool,
}

impl ExtractionAgent {
    pub fn new(backend: Arc<dyn ReasoningBackend>, scope: UrlScope, timeout: Duration) -> Self {
        Self {
            backend,
            scope,
            timeout,
            validate_pois: false,
        }
    }

    pub fn with_validation(mut self, enabled: bool) -> Self {
        self.validate_pois = enabled;
        self
    }

    /// Extract candidates and links from one fetched page.
    pub async fn extract(&self, page: &PageContent, context: &SessionContext) -> ExtractionOutcome {
        let prompt = Prompt {
            kind: PromptKind::Extraction,
            system: EXTRACTION_SYSTEM_PROMPT.to_string(),
            user: build_extraction_prompt(page, context),
            page_url: page.url.clone(),
        };

        let raw = match self.call(&prompt).await {
            Ok(raw) => raw,
            Err(e) if e.is_hard() => {
                tracing::warn!(url = %page.url, error = %e, "Reasoning backend failed");
                return ExtractionOutcome::failed(e);
            }
            Err(e) => {
                tracing::warn!(url = %page.url, error = %e, "Backend reported malformed output");
                return ExtractionOutcome::malformed();
            }
        };

        let Some(response) = parse_response(&raw) else {
            tracing::warn!(
                url = %page.url,
                response_len = raw.len(),
                "Could not parse reasoning response, treating page as empty"
            );
            return ExtractionOutcome::malformed();
        };

        let mut report = ExtractionReport::default();

        let mut candidates = Vec::new();
        for value in response.pois {
            match candidate_from_value(&value, &page.url) {
                Ok(candidate) => candidates.push(candidate),
                Err(e) => {
                    tracing::debug!(url = %page.url, error = %e, "Dropping invalid candidate");
                    report.candidates_dropped += 1;
                }
            }
        }

        if self.validate_pois && !candidates.is_empty() {
            let before = candidates.len();
            candidates = self.validate_candidates(candidates, &page.url).await;
            report.candidates_rejected_by_validator = before - candidates.len();
        }

        let raw_links = response.links.unwrap_or_else(|| {
            page.links
                .iter()
                .map(|url| (url.clone(), DEFAULT_LINK_SCORE))
                .collect()
        });
        let links = self.admit_links(raw_links, page, context.depth, &mut report);

        tracing::debug!(
            url = %page.url,
            candidates = candidates.len(),
            links = links.len(),
            dropped = report.candidates_dropped,
            stop = response.stop,
            "Page extracted"
        );

        ExtractionOutcome {
            candidates,
            links,
            continue_signal: !response.stop,
            error: None,
            report,
        }
    }

    async fn call(&self, prompt: &Prompt) -> Result<String, BackendError> {
        match tokio::time::timeout(self.timeout, self.backend.complete(prompt)).await {
            Ok(result) => result,
            Err(_) => Err(BackendError::Timeout),
        }
    }

    fn admit_links(
        &self,
        raw_links: Vec<(String, u8)>,
        page: &PageContent,
        depth: u32,
        report: &mut ExtractionReport,
    ) -> Vec<DiscoveredLink> {
        let base = Url::parse(&page.url).ok();
        let self_url = normalize_url(&page.url, None).ok();
        let mut links: Vec<DiscoveredLink> = Vec::new();

        for (raw, score) in raw_links {
            match self.scope.admit(&raw, base.as_ref(), depth + 1) {
                Ok(url) => {
                    if self_url.as_deref() == Some(url.as_str()) {
                        continue;
                    }
                    match links.iter_mut().find(|l| l.url == url) {
                        Some(existing) => existing.score = existing.score.max(score),
                        None => links.push(DiscoveredLink {
                            url,
                            depth: depth + 1,
                            score,
                        }),
                    }
                }
                Err(e) => {
                    tracing::trace!(url = %raw, error = %e, "Link out of scope");
                    report.links_rejected += 1;
                }
            }
        }
        links
    }

    async fn validate_candidates(&self, candidates: Vec<PoiCandidate>, page_url: &str) -> Vec<PoiCandidate> {
        let mut kept = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            let prompt = Prompt {
                kind: PromptKind::Validation,
                system: VALIDATION_SYSTEM_PROMPT.to_string(),
                user: format!(
                    "Is \"{}\" ({}) a specific place people can visit? Answer yes or no.",
                    candidate.name, candidate.category
                ),
                page_url: page_url.to_string(),
            };

            match self.call(&prompt).await {
                Ok(answer) if is_negative(&answer) => {
                    tracing::debug!(name = %candidate.name, "Validator rejected candidate");
                }
                Ok(_) => kept.push(candidate),
                Err(e) => {
                    tracing::warn!(name = %candidate.name, error = %e, "Validation failed, keeping candidate");
                    kept.push(candidate);
                }
            }
        }
        kept
    }
}

fn is_negative(answer: &str) -> bool {
    let first = answer
        .trim()
        .trim_start_matches(|c: char| !c.is_alphanumeric())
        .split(|c: char| !c.is_alphanumeric())
        .next()
        .unwrap_or_default()
        .to_lowercase();
    first == "no"
}

// ============================================================================
// PROMPT
// ============================================================================

fn build_extraction_prompt(page: &PageContent, context: &SessionContext) -> String {
    let mut prompt = format!("Page URL: {}\n", page.url);
    if let Some(title) = &page.title {
        prompt.push_str(&format!("Title: {title}\n"));
    }
    prompt.push_str(&format!("Depth: {} of {}\n", context.depth, context.max_depth));

    prompt.push_str(&format!("Pages visited so far: {}\n", context.pages_visited));
    if let Some(remaining) = context.pages_remaining {
        prompt.push_str(&format!("Pages remaining in budget: {remaining}\n"));
    }
    if let Some(remaining) = context.time_remaining {
        prompt.push_str(&format!("Time remaining: {}s\n", remaining.as_secs()));
    }

    if !context.recent_poi_counts.is_empty() {
        prompt.push_str("\nRecent pages (POIs found):\n");
        for (url, count) in &context.recent_poi_counts {
            prompt.push_str(&format!("- {url}: {count}\n"));
        }
    }

    if !context.pattern_performance.is_empty() {
        prompt.push_str("\nPattern performance (child pages with POIs):\n");
        for (parent, with_pois, visited) in &context.pattern_performance {
            prompt.push_str(&format!("- {parent}/<child>: {with_pois}/{visited} success\n"));
        }
    }

    if !context.known_pois.is_empty() {
        prompt.push_str("\nAlready known POIs:\n");
        for name in &context.known_pois {
            prompt.push_str(&format!("- {name}\n"));
        }
    }

    if !page.links.is_empty() {
        prompt.push_str("\nLinks on this page:\n");
        for link in page.links.iter().take(MAX_PROMPT_LINKS) {
            prompt.push_str(&format!("- {link}\n"));
        }
    }

    prompt.push_str("\nPage content:\n");
    prompt.push_str(truncate_chars(&page.text, MAX_PAGE_CHARS));
    prompt
}

fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

// ============================================================================
// RESPONSE PARSING
// ============================================================================

#[derive(Debug)]
struct ParsedResponse {
    pois: Vec<Value>,
    /// `None` when the backend omitted the field entirely
    links: Option<Vec<(String, u8)>>,
    stop: bool,
}

/// Strip an optional markdown code fence and surrounding prose.
fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let body = match trimmed.strip_prefix("```") {
        Some(rest) => {
            let rest = rest.split_once('\n').map(|(_, body)| body).unwrap_or(rest);
            rest.trim_end().strip_suffix("```").unwrap_or(rest)
        }
        None => trimmed,
    };

    match (body.find('{'), body.rfind('}')) {
        (Some(start), Some(end)) if start < end => &body[start..=end],
        _ => body,
    }
}

fn parse_response(raw: &str) -> Option<ParsedResponse> {
    let value: Value = serde_json::from_str(strip_code_fence(raw)).ok()?;
    let object = value.as_object()?;

    let pois = match object.get("pois") {
        Some(Value::Array(items)) => items.clone(),
        None | Some(Value::Null) => Vec::new(),
        Some(_) => return None,
    };

    let links = match object.get("links") {
        None => None,
        Some(Value::Null) => Some(Vec::new()),
        Some(Value::Array(items)) => Some(items.iter().filter_map(link_from_value).collect()),
        Some(_) => return None,
    };

    let stop = object
        .get("decision")
        .and_then(Value::as_str)
        .map(|d| d.trim().eq_ignore_ascii_case("stop"))
        .unwrap_or(false);

    Some(ParsedResponse { pois, links, stop })
}

fn link_from_value(value: &Value) -> Option<(String, u8)> {
    match value {
        Value::String(url) => Some((url.clone(), DEFAULT_LINK_SCORE)),
        Value::Object(map) => {
            let url = map.get("url")?.as_str()?.to_string();
            let score = map
                .get("score")
                .and_then(Value::as_f64)
                .map(|s| s.round().clamp(1.0, 5.0) as u8)
                .unwrap_or(DEFAULT_LINK_SCORE);
            Some((url, score))
        }
        _ => None,
    }
}

fn optional_string(
    map: &serde_json::Map<String, Value>,
    field: &'static str,
    max: usize,
) -> Result<Option<String>, ValidationError> {
    match map.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => {
            let s = s.trim();
            if s.is_empty() {
                Ok(None)
            } else if s.chars().count() > max {
                Err(ValidationError::FieldTooLong { field, max })
            } else {
                Ok(Some(s.to_string()))
            }
        }
        Some(_) => Err(ValidationError::NotAString { field }),
    }
}

fn candidate_from_value(value: &Value, source_url: &str) -> Result<PoiCandidate, ValidationError> {
    let Some(map) = value.as_object() else {
        return Err(ValidationError::MissingName);
    };

    let name = optional_string(map, "name", MAX_NAME_LEN)?.ok_or(ValidationError::MissingName)?;
    let category = optional_string(map, "category", MAX_CATEGORY_LEN)?
        .unwrap_or_else(|| DEFAULT_CATEGORY.to_string());
    let address = optional_string(map, "address", MAX_ADDRESS_LEN)?;
    let description = optional_string(map, "description", MAX_DESCRIPTION_LEN)?;

    let confidence = match map.get("confidence") {
        None | Some(Value::Null) => DEFAULT_CONFIDENCE,
        Some(Value::Number(n)) => n
            .as_f64()
            .filter(|c| c.is_finite())
            .ok_or(ValidationError::InvalidConfidence)? as f32,
        Some(Value::String(s)) => s
            .trim()
            .parse::<f32>()
            .ok()
            .filter(|c| c.is_finite())
            .ok_or(ValidationError::InvalidConfidence)?,
        Some(_) => return Err(ValidationError::InvalidConfidence),
    };

    Ok(PoiCandidate {
        name,
        category,
        address,
        description,
        source_url: source_url.to_string(),
        confidence: confidence.clamp(0.0, 1.0),
    })
}
