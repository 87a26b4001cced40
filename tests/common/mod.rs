#![allow(dead_code)]

use article_processor::{
    Analysis, Article, ArticleStore, ContentAnalyzer, ContentExtractor, ExtractOutcome,
    FailedPage, MemoryArticleStore, ProcessEvent, ProcessStage, ProcessStatus, ProcessorError,
    ProcessStats, Result,
};
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, TimeZone, Utc};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};

/// A synced article with a deterministic timestamp: base time plus
/// `minutes`, so selection order is fixed by construction.
pub fn article(id: &str, minutes: i64) -> Article {
    let base = Utc.with_ymd_and_hms(2026, 1, 1, 8, 0, 0).unwrap();
    let mut article = Article::synced(
        id,
        format!("Article {id}"),
        Some(format!("https://example.com/{id}")),
    );
    article.content_text = Some("short feed body".to_string());
    article.synced_at = base + ChronoDuration::minutes(minutes);
    article
}

pub async fn seed(store: &MemoryArticleStore, articles: &[Article]) {
    for a in articles {
        store.insert(a).await.unwrap();
    }
}

pub fn sample_analysis(model: &str) -> Analysis {
    Analysis {
        summary: "a summary".to_string(),
        key_points: vec!["a point".to_string()],
        value_score: 5.0,
        reading_time: 1,
        language: "en".to_string(),
        tags: vec!["Tag".to_string()],
        model_used: model.to_string(),
    }
}

/// Extractor with per-article scripted outcomes and a call counter.
#[derive(Default)]
pub struct ScriptedExtractor {
    fail: HashSet<String>,
    satisfied: HashSet<String>,
    pub calls: Arc<AtomicUsize>,
}

impl ScriptedExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(mut self, id: &str) -> Self {
        self.fail.insert(id.to_string());
        self
    }

    pub fn satisfied_for(mut self, id: &str) -> Self {
        self.satisfied.insert(id.to_string());
        self
    }
}

#[async_trait]
impl ContentExtractor for ScriptedExtractor {
    async fn extract(&self, article: &Article) -> Result<ExtractOutcome> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.contains(&article.id) {
            return Err(ProcessorError::General(format!(
                "extraction refused for {}",
                article.id
            )));
        }
        if self.satisfied.contains(&article.id) {
            return Ok(ExtractOutcome::Satisfied);
        }
        Ok(ExtractOutcome::Extracted {
            content: format!("Full body of {}. It has enough detail to analyze.", article.id),
        })
    }
}

/// Analyzer with per-article scripted failures and a call counter.
#[derive(Default)]
pub struct ScriptedAnalyzer {
    fail: HashSet<String>,
    pub calls: Arc<AtomicUsize>,
}

impl ScriptedAnalyzer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(mut self, id: &str) -> Self {
        self.fail.insert(id.to_string());
        self
    }
}

#[async_trait]
impl ContentAnalyzer for ScriptedAnalyzer {
    async fn analyze(&self, article: &Article, _content: &str) -> Result<Analysis> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.contains(&article.id) {
            return Err(ProcessorError::General(format!(
                "analysis refused for {}",
                article.id
            )));
        }
        Ok(sample_analysis("scripted"))
    }

    fn analyzer_name(&self) -> String {
        "scripted".to_string()
    }
}

/// Extractor that announces each entry on a channel and then blocks until
/// the test hands it a permit. Makes pause/stop timing deterministic.
pub struct GatedExtractor {
    entered: mpsc::UnboundedSender<String>,
    gate: Arc<Semaphore>,
}

impl GatedExtractor {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<String>, Arc<Semaphore>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let gate = Arc::new(Semaphore::new(0));
        (
            Self {
                entered: tx,
                gate: gate.clone(),
            },
            rx,
            gate,
        )
    }
}

#[async_trait]
impl ContentExtractor for GatedExtractor {
    async fn extract(&self, article: &Article) -> Result<ExtractOutcome> {
        let _ = self.entered.send(article.id.clone());
        let permit = self
            .gate
            .acquire()
            .await
            .map_err(|_| ProcessorError::General("gate closed".to_string()))?;
        permit.forget();
        Ok(ExtractOutcome::Extracted {
            content: format!("Full body of {}.", article.id),
        })
    }
}

/// Analyzer counterpart of [`GatedExtractor`].
pub struct GatedAnalyzer {
    entered: mpsc::UnboundedSender<String>,
    gate: Arc<Semaphore>,
}

impl GatedAnalyzer {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<String>, Arc<Semaphore>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let gate = Arc::new(Semaphore::new(0));
        (
            Self {
                entered: tx,
                gate: gate.clone(),
            },
            rx,
            gate,
        )
    }
}

#[async_trait]
impl ContentAnalyzer for GatedAnalyzer {
    async fn analyze(&self, article: &Article, _content: &str) -> Result<Analysis> {
        let _ = self.entered.send(article.id.clone());
        let permit = self
            .gate
            .acquire()
            .await
            .map_err(|_| ProcessorError::General("gate closed".to_string()))?;
        permit.forget();
        Ok(sample_analysis("gated"))
    }

    fn analyzer_name(&self) -> String {
        "gated".to_string()
    }
}

/// Store wrapper that refuses analysis writes for chosen articles, to
/// exercise the persistence-failure path.
pub struct FailingStore {
    inner: Arc<MemoryArticleStore>,
    fail_analysis_for: HashSet<String>,
}

impl FailingStore {
    pub fn new(inner: Arc<MemoryArticleStore>, fail_analysis_for: &[&str]) -> Self {
        Self {
            inner,
            fail_analysis_for: fail_analysis_for.iter().map(|s| s.to_string()).collect(),
        }
    }
}

#[async_trait]
impl ArticleStore for FailingStore {
    async fn insert(&self, article: &Article) -> Result<()> {
        self.inner.insert(article).await
    }

    async fn get(&self, id: &str) -> Result<Option<Article>> {
        self.inner.get(id).await
    }

    async fn select_eligible(&self) -> Result<Vec<Article>> {
        self.inner.select_eligible().await
    }

    async fn update_status(
        &self,
        id: &str,
        status: ProcessStatus,
        error: Option<&str>,
        stage: Option<ProcessStage>,
    ) -> Result<()> {
        self.inner.update_status(id, status, error, stage).await
    }

    async fn store_extracted(&self, id: &str, content: &str) -> Result<()> {
        self.inner.store_extracted(id, content).await
    }

    async fn store_analysis(&self, id: &str, analysis: &Analysis) -> Result<()> {
        if self.fail_analysis_for.contains(id) {
            return Err(ProcessorError::General("disk full".to_string()));
        }
        self.inner.store_analysis(id, analysis).await
    }

    async fn count_by_status(&self) -> Result<ProcessStats> {
        self.inner.count_by_status().await
    }

    async fn list_failed(&self, page: u32, page_size: u32) -> Result<FailedPage> {
        self.inner.list_failed(page, page_size).await
    }

    async fn reset_failed(&self) -> Result<u64> {
        self.inner.reset_failed().await
    }
}

/// Collect events until `pred` matches one; panics after five seconds.
pub async fn wait_until<F>(
    rx: &mut mpsc::UnboundedReceiver<ProcessEvent>,
    mut pred: F,
) -> Vec<ProcessEvent>
where
    F: FnMut(&ProcessEvent) -> bool,
{
    let mut events = Vec::new();
    loop {
        let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for event")
            .expect("event channel closed");
        let hit = pred(&event);
        events.push(event);
        if hit {
            return events;
        }
    }
}

pub async fn wait_for_completed(
    rx: &mut mpsc::UnboundedReceiver<ProcessEvent>,
) -> Vec<ProcessEvent> {
    wait_until(rx, |e| matches!(e, ProcessEvent::Completed { .. })).await
}

/// Receive the next gate-entry announcement or panic after five seconds.
pub async fn expect_entry(rx: &mut mpsc::UnboundedReceiver<String>) -> String {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for collaborator entry")
        .expect("entry channel closed")
}
