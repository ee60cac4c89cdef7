//! HTTP fetch gateway.
//!
//! Fetches a page with reqwest, then reduces the HTML to the main content as
//! Markdown plus the page's outgoing links.

use async_trait::async_trait;
use scraper::{Html, Selector};
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

use crate::error::{FetchError, FetchResult};
use crate::traits::PageFetcher;
use crate::types::PageContent;

const DEFAULT_USER_AGENT: &str = "PoiCrawler/0.1";

const MAIN_SELECTORS: &[&str] = &[
    "main",
    "article",
    "[role='main']",
    "#content",
    "#main",
    ".content",
    ".main",
];

const BOILERPLATE_SELECTORS: &[&str] = &[
    "nav", "header", "footer", "aside", "script", "style", "noscript", "iframe", "form",
];

pub struct HttpFetcher {
    client: reqwest::Client,
    user_agent: String,
}

impl HttpFetcher {
    /// Create a fetcher whose requests give up after `timeout`.
    pub fn new(timeout: Duration) -> reqwest::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()?;
        Ok(Self::with_client(client))
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self {
            client,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }
}

fn network_error(url: &str, e: reqwest::Error) -> FetchError {
    if e.is_timeout() {
        FetchError::Timeout { url: url.to_string() }
    } else {
        FetchError::Network {
            url: url.to_string(),
            source: Box::new(e),
        }
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> FetchResult<PageContent> {
        debug!(url = %url, "HTTP fetch starting");
        let response = self
            .client
            .get(url)
            .header("User-Agent", &self.user_agent)
            .send()
            .await
            .map_err(|e| {
                warn!(url = %url, error = %e, "HTTP request failed");
                network_error(url, e)
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Http {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let is_html = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|ct| ct.contains("html") || ct.starts_with("text/"))
            .unwrap_or(true);
        if !is_html {
            return Err(FetchError::Http {
                url: url.to_string(),
                status: 415,
            });
        }

        // Capture final URL after redirects
        let final_url = response.url().clone();
        let html = response.text().await.map_err(|e| network_error(url, e))?;

        let mut page = parse_page(&final_url, &html);
        page.status = status.as_u16();
        debug!(
            url = %url,
            final_url = %final_url,
            text_len = page.text.len(),
            links = page.links.len(),
            "HTTP fetch complete"
        );
        Ok(page)
    }
}

/// Reduce an HTML document to readable text and outgoing links.
pub fn parse_page(url: &Url, html: &str) -> PageContent {
    let document = Html::parse_document(html);

    let title = extract_title(&document);
    let links = extract_links(&document, url);
    let main_html = extract_main_content(&document);
    let text = htmd::convert(&main_html).unwrap_or_else(|_| {
        Html::parse_fragment(&main_html)
            .root_element()
            .text()
            .collect::<String>()
    });

    let mut page = PageContent::from_text(url.as_str(), text.trim()).with_links(links);
    if let Some(title) = title {
        page = page.with_title(title);
    }
    page
}

fn extract_title(document: &Html) -> Option<String> {
    let selector = Selector::parse("title").ok()?;
    document
        .select(&selector)
        .next()
        .map(|el| el.text().collect::<String>().trim().to_string())
        .filter(|t| !t.is_empty())
}

fn extract_main_content(document: &Html) -> String {
    for selector in MAIN_SELECTORS {
        if let Ok(selector) = Selector::parse(selector) {
            if let Some(main) = document.select(&selector).next() {
                return strip_boilerplate(&main.html());
            }
        }
    }

    match Selector::parse("body") {
        Ok(body) => document
            .select(&body)
            .next()
            .map(|body| strip_boilerplate(&body.html()))
            .unwrap_or_else(|| document.html()),
        Err(_) => document.html(),
    }
}

fn strip_boilerplate(html: &str) -> String {
    let fragment = Html::parse_fragment(html);
    let mut result = html.to_string();
    for selector in BOILERPLATE_SELECTORS {
        if let Ok(selector) = Selector::parse(selector) {
            for element in fragment.select(&selector) {
                result = result.replace(&element.html(), "");
            }
        }
    }
    result
}

/// Absolute http(s) links in document order, without duplicates. Scope and
/// normalization are left to the frontier.
fn extract_links(document: &Html, base: &Url) -> Vec<String> {
    let Ok(selector) = Selector::parse("a[href]") else {
        return Vec::new();
    };

    let mut links: Vec<String> = Vec::new();
    for href in document.select(&selector).filter_map(|el| el.value().attr("href")) {
        let href = href.trim();
        if href.is_empty()
            || href.starts_with('#')
            || href.starts_with("javascript:")
            || href.starts_with("mailto:")
            || href.starts_with("tel:")
        {
            continue;
        }
        let Ok(mut resolved) = base.join(href) else {
            continue;
        };
        if !matches!(resolved.scheme(), "http" | "https") {
            continue;
        }
        resolved.set_fragment(None);
        let resolved = resolved.to_string();
        if !links.contains(&resolved) {
            links.push(resolved);
        }
    }
    links
}
