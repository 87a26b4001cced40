use crate::config::FetchSettings;
use crate::types::{Article, ProcessorError, Result};
use async_trait::async_trait;
use backoff::{backoff::Backoff, exponential::ExponentialBackoff};
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

/// What the fetch stage produced for an article.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtractOutcome {
    /// A full body was retrieved; the engine persists it.
    Extracted { content: String },
    /// The collaborator decided no extraction is needed (no URL, or the
    /// feed-delivered body already stands on its own).
    Satisfied,
}

/// Content-completion collaborator. Owns the decision of whether an article
/// needs extraction at all; the engine only interprets the outcome.
#[async_trait]
pub trait ContentExtractor: Send + Sync {
    async fn extract(&self, article: &Article) -> Result<ExtractOutcome>;
}

/// Markers that suggest a feed delivered a teaser rather than the article.
const TRUNCATION_MARKERS: [&str; 8] = [
    "...",
    "…",
    "read more",
    "continue reading",
    "read the full article",
    "click to read more",
    "[...]",
    "[…]",
];

const MIN_CONTENT_LENGTH: usize = 500;

/// HTTP-backed extractor: decides sufficiency from the feed body, otherwise
/// downloads the article page with bounded retries. Swapping in a real
/// readability pipeline means implementing [`ContentExtractor`] elsewhere;
/// the engine does not care what the content looks like.
pub struct HttpExtractor {
    client: Client,
    settings: FetchSettings,
}

impl HttpExtractor {
    pub fn new(settings: FetchSettings) -> Result<Self> {
        let client = Client::builder()
            .user_agent(&settings.user_agent)
            .timeout(Duration::from_secs(settings.timeout_seconds))
            .gzip(true)
            .deflate(true)
            .brotli(true)
            .redirect(reqwest::redirect::Policy::limited(settings.max_redirects))
            .build()?;

        Ok(Self { client, settings })
    }

    /// Port of the feed-content completeness rules: short bodies, teaser
    /// markers near the end, and title/body imbalance all call for a fetch.
    fn needs_full_content(title: &str, content: &str) -> bool {
        let content = content.trim();
        if content.is_empty() {
            return true;
        }

        let content_len = content.chars().count();
        if content_len < MIN_CONTENT_LENGTH {
            return true;
        }

        let tail: String = content
            .chars()
            .skip(content_len.saturating_sub(100))
            .collect::<String>()
            .to_lowercase();
        if TRUNCATION_MARKERS.iter().any(|m| tail.contains(m)) {
            return true;
        }

        title.chars().count() > 50 && content_len < 300
    }

    async fn fetch_page(&self, url: &Url) -> Result<String> {
        let mut backoff: ExponentialBackoff<backoff::SystemClock> = ExponentialBackoff {
            current_interval: Duration::from_secs(self.settings.retry_delay_seconds),
            initial_interval: Duration::from_secs(self.settings.retry_delay_seconds),
            max_interval: Duration::from_secs(self.settings.retry_delay_seconds * 32),
            multiplier: 2.0,
            max_elapsed_time: Some(Duration::from_secs(self.settings.retry_delay_seconds * 60)),
            ..Default::default()
        };

        let mut last_error = ProcessorError::General("fetch not attempted".to_string());

        for attempt in 0..=self.settings.max_retries {
            match self.client.get(url.clone()).send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        let body = response.text().await?;
                        if body.trim().is_empty() {
                            return Err(ProcessorError::General(format!(
                                "empty response body from {url}"
                            )));
                        }
                        return Ok(body);
                    }
                    last_error = ProcessorError::General(format!(
                        "HTTP {}: {}",
                        status,
                        status.canonical_reason().unwrap_or("Unknown")
                    ));
                }
                Err(e) => {
                    last_error = ProcessorError::Http(e);
                }
            }

            if attempt < self.settings.max_retries {
                if let Some(delay) = backoff.next_backoff() {
                    warn!(
                        "Attempt {} failed for {}, retrying in {:?}",
                        attempt + 1,
                        url,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }

        Err(last_error)
    }
}

#[async_trait]
impl ContentExtractor for HttpExtractor {
    async fn extract(&self, article: &Article) -> Result<ExtractOutcome> {
        let Some(raw_url) = article.url.as_deref() else {
            debug!("No URL for article {}, feed content stands", article.id);
            return Ok(ExtractOutcome::Satisfied);
        };

        let feed_body = article.content_text.as_deref().unwrap_or("");
        if !Self::needs_full_content(&article.title, feed_body) {
            debug!("Feed content sufficient for article {}", article.id);
            return Ok(ExtractOutcome::Satisfied);
        }

        let url = Url::parse(raw_url)?;
        let content = self.fetch_page(&url).await?;
        debug!(
            "Extracted {} chars for article {}",
            content.len(),
            article.id
        );
        Ok(ExtractOutcome::Extracted { content })
    }
}
