use crate::analyzer::ContentAnalyzer;
use crate::broadcaster::{ProcessEvent, ProgressBroadcaster};
use crate::extractor::{ContentExtractor, ExtractOutcome};
use crate::state_machine::{self, StageOutcome};
use crate::store::ArticleStore;
use crate::types::{
    Article, CurrentItem, EngineLifecycle, ProcessStage, ProcessStatus, ProcessorError, Result,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{watch, RwLock};
use tracing::{debug, error, info, warn};

/// Counters for the run in flight (or the most recently finished one).
/// Process-memory only; the article store is the durable record.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunProgress {
    pub total: u64,
    pub completed: u64,
    pub failed: u64,
    pub current: Option<CurrentItem>,
    pub stage: Option<ProcessStage>,
    pub started_at: Option<DateTime<Utc>>,
}

struct EngineInner {
    store: Arc<dyn ArticleStore>,
    extractor: Arc<dyn ContentExtractor>,
    analyzer: Arc<dyn ContentAnalyzer>,
    broadcaster: ProgressBroadcaster,
    lifecycle: watch::Sender<EngineLifecycle>,
    progress: RwLock<RunProgress>,
}

/// The unified processing engine: drives eligible articles through the
/// fetch and analysis stages, one article at a time, one attempt per stage
/// per run. Cheap to clone; all clones share the same run state.
#[derive(Clone)]
pub struct ProcessEngine {
    inner: Arc<EngineInner>,
}

impl ProcessEngine {
    pub fn new(
        store: Arc<dyn ArticleStore>,
        extractor: Arc<dyn ContentExtractor>,
        analyzer: Arc<dyn ContentAnalyzer>,
    ) -> Self {
        let (lifecycle, _) = watch::channel(EngineLifecycle::Idle);
        Self {
            inner: Arc::new(EngineInner {
                store,
                extractor,
                analyzer,
                broadcaster: ProgressBroadcaster::new(),
                lifecycle,
                progress: RwLock::new(RunProgress::default()),
            }),
        }
    }

    pub fn lifecycle(&self) -> EngineLifecycle {
        *self.inner.lifecycle.borrow()
    }

    pub fn broadcaster(&self) -> ProgressBroadcaster {
        self.inner.broadcaster.clone()
    }

    pub async fn progress(&self) -> RunProgress {
        self.inner.progress.read().await.clone()
    }

    /// The `connected` snapshot a freshly attached observer receives.
    pub async fn snapshot(&self) -> ProcessEvent {
        let progress = self.inner.progress.read().await;
        ProcessEvent::Connected {
            status: self.lifecycle(),
            total: progress.total,
            completed: progress.completed,
            failed: progress.failed,
        }
    }

    /// Begin a run over everything currently eligible. Returns the number
    /// of selected articles; rejects with `AlreadyRunning` unless idle.
    pub async fn start(&self) -> Result<u64> {
        let mut accepted = false;
        self.inner.lifecycle.send_if_modified(|state| {
            if *state == EngineLifecycle::Idle {
                *state = EngineLifecycle::Running;
                accepted = true;
                true
            } else {
                false
            }
        });
        if !accepted {
            return Err(ProcessorError::AlreadyRunning);
        }

        let articles = match self.inner.store.select_eligible().await {
            Ok(articles) => articles,
            Err(e) => {
                self.inner.lifecycle.send_replace(EngineLifecycle::Idle);
                return Err(e);
            }
        };

        let total = articles.len() as u64;
        {
            let mut progress = self.inner.progress.write().await;
            *progress = RunProgress {
                total,
                started_at: Some(Utc::now()),
                ..RunProgress::default()
            };
        }

        info!("Processing run started: {} eligible articles", total);
        self.inner.broadcaster.broadcast(ProcessEvent::Started {}).await;
        self.emit_progress().await;

        let engine = self.clone();
        tokio::spawn(async move { engine.run_loop(articles).await });

        Ok(total)
    }

    /// Hold the run at the next item boundary. The item in flight finishes
    /// all of its stages first.
    pub fn pause(&self) -> Result<()> {
        self.transition("pause", &[EngineLifecycle::Running], EngineLifecycle::Paused)?;
        info!("Processing run paused");
        Ok(())
    }

    /// Continue a paused run with the remainder of the selected set.
    pub fn resume(&self) -> Result<()> {
        self.transition("resume", &[EngineLifecycle::Paused], EngineLifecycle::Running)?;
        info!("Processing run resumed");
        Ok(())
    }

    /// End the run after the in-flight stage call completes. Unprocessed
    /// articles keep their persisted status for a future run.
    pub fn stop(&self) -> Result<()> {
        self.transition(
            "stop",
            &[EngineLifecycle::Running, EngineLifecycle::Paused],
            EngineLifecycle::Stopping,
        )?;
        info!("Processing run stopping");
        Ok(())
    }

    /// Move every failed article back to the pending status of its failed
    /// stage, clearing the error context. Does not start a run.
    pub async fn retry_failed(&self) -> Result<u64> {
        let state = self.lifecycle();
        if state != EngineLifecycle::Idle {
            return Err(ProcessorError::InvalidLifecycle { op: "retry", state });
        }
        self.inner.store.reset_failed().await
    }

    fn transition(
        &self,
        op: &'static str,
        allowed: &[EngineLifecycle],
        to: EngineLifecycle,
    ) -> Result<()> {
        let mut outcome = Ok(());
        self.inner.lifecycle.send_if_modified(|state| {
            if allowed.contains(state) {
                *state = to;
                true
            } else {
                outcome = Err(ProcessorError::InvalidLifecycle { op, state: *state });
                false
            }
        });
        outcome
    }

    async fn run_loop(self, articles: Vec<Article>) {
        let mut lifecycle = self.inner.lifecycle.subscribe();

        'items: for article in &articles {
            // Pause and stop are honored here, between items.
            loop {
                let state = *lifecycle.borrow_and_update();
                match state {
                    EngineLifecycle::Running => break,
                    EngineLifecycle::Paused => {
                        if lifecycle.changed().await.is_err() {
                            break 'items;
                        }
                    }
                    EngineLifecycle::Stopping | EngineLifecycle::Idle => break 'items,
                }
            }

            self.process_one(article, &lifecycle).await;
        }

        self.finish().await;
    }

    /// One attempt per remaining stage. Collaborator and persistence
    /// failures end up as article state plus an event, never as a
    /// run-loop error.
    async fn process_one(&self, article: &Article, lifecycle: &watch::Receiver<EngineLifecycle>) {
        let mut current = article.clone();
        {
            let mut progress = self.inner.progress.write().await;
            progress.current = Some(CurrentItem {
                id: current.id.clone(),
                title: current.title.chars().take(50).collect(),
            });
            progress.stage = None;
        }

        while let Some(stage) = state_machine::next_stage(current.process_status) {
            {
                let mut progress = self.inner.progress.write().await;
                progress.stage = Some(stage);
            }

            let entry = state_machine::stage_entry(stage);
            if let Err(e) = self
                .inner
                .store
                .update_status(&current.id, entry, None, None)
                .await
            {
                self.fail_item(&mut current, stage, format!("persistence: {e}"))
                    .await;
                break;
            }
            current.process_status = entry;

            match stage {
                ProcessStage::Fetch => self.run_fetch(&mut current).await,
                ProcessStage::Analysis => self.run_analysis(&mut current).await,
            }

            if current.process_status == ProcessStatus::Failed {
                break;
            }

            // Stop cuts between stage calls; pause waits for the item.
            if *lifecycle.borrow() == EngineLifecycle::Stopping {
                break;
            }
        }

        self.emit_progress().await;
    }

    async fn run_fetch(&self, article: &mut Article) {
        match self.inner.extractor.extract(article).await {
            Ok(ExtractOutcome::Extracted { content }) => {
                if let Err(e) = self.inner.store.store_extracted(&article.id, &content).await {
                    self.fail_item(article, ProcessStage::Fetch, format!("persistence: {e}"))
                        .await;
                    return;
                }
                article.full_content = Some(content);
                article.content_source = "fetched".to_string();
                self.advance(article, StageOutcome::Success).await;
            }
            Ok(ExtractOutcome::Satisfied) => {
                debug!("Extraction satisfied for article {}", article.id);
                self.advance(article, StageOutcome::Satisfied).await;
            }
            Err(e) => {
                self.fail_item(article, ProcessStage::Fetch, e.to_string())
                    .await;
            }
        }
    }

    async fn run_analysis(&self, article: &mut Article) {
        let Some(content) = article.effective_content().map(str::to_string) else {
            // Nothing to analyze; the article is as processed as it gets.
            info!("Article {} has no content, marking done", article.id);
            self.advance(article, StageOutcome::Satisfied).await;
            if article.process_status == ProcessStatus::Done {
                self.complete_item(article).await;
            }
            return;
        };

        match self.inner.analyzer.analyze(article, &content).await {
            Ok(analysis) => {
                if let Err(e) = self.inner.store.store_analysis(&article.id, &analysis).await {
                    self.fail_item(article, ProcessStage::Analysis, format!("persistence: {e}"))
                        .await;
                    return;
                }
                self.advance(article, StageOutcome::Success).await;
                if article.process_status == ProcessStatus::Done {
                    self.complete_item(article).await;
                }
            }
            Err(e) => {
                self.fail_item(article, ProcessStage::Analysis, e.to_string())
                    .await;
            }
        }
    }

    /// Apply a successful stage outcome and persist the resulting status.
    async fn advance(&self, article: &mut Article, outcome: StageOutcome) {
        let Some(next) = state_machine::apply(article.process_status, outcome) else {
            warn!(
                "Ignoring illegal transition from {} for article {}",
                article.process_status, article.id
            );
            return;
        };

        if let Err(e) = self
            .inner
            .store
            .update_status(&article.id, next, None, None)
            .await
        {
            let stage = match article.process_status {
                ProcessStatus::Fetching => ProcessStage::Fetch,
                _ => ProcessStage::Analysis,
            };
            self.fail_item(article, stage, format!("persistence: {e}"))
                .await;
            return;
        }
        article.process_status = next;
    }

    async fn fail_item(&self, article: &mut Article, stage: ProcessStage, reason: String) {
        warn!(
            "Stage {} failed for article {}: {}",
            stage, article.id, reason
        );

        if let Err(e) = self
            .inner
            .store
            .update_status(&article.id, ProcessStatus::Failed, Some(&reason), Some(stage))
            .await
        {
            // The failure record itself could not be written; the event
            // below still tells the operator what happened.
            error!(
                "Could not persist failure for article {}: {}",
                article.id, e
            );
        }

        article.process_status = ProcessStatus::Failed;
        article.process_error = Some(reason.clone());
        article.process_stage = Some(stage);

        {
            let mut progress = self.inner.progress.write().await;
            progress.failed += 1;
        }
        self.inner
            .broadcaster
            .broadcast(ProcessEvent::ItemFailed {
                article_id: article.id.clone(),
                title: article.title.clone(),
                stage,
                error: reason,
            })
            .await;
    }

    async fn complete_item(&self, article: &Article) {
        info!("Article {} done", article.id);
        {
            let mut progress = self.inner.progress.write().await;
            progress.completed += 1;
        }
        self.inner
            .broadcaster
            .broadcast(ProcessEvent::ItemDone {
                article_id: article.id.clone(),
                title: article.title.clone(),
            })
            .await;
    }

    async fn emit_progress(&self) {
        let progress = self.inner.progress.read().await.clone();
        self.inner
            .broadcaster
            .broadcast(ProcessEvent::Progress {
                total: progress.total,
                completed: progress.completed,
                failed: progress.failed,
                current: progress.current,
                stage: progress.stage,
            })
            .await;
    }

    async fn finish(&self) {
        let (total, completed, failed) = {
            let mut progress = self.inner.progress.write().await;
            progress.current = None;
            progress.stage = None;
            (progress.total, progress.completed, progress.failed)
        };

        self.inner.lifecycle.send_replace(EngineLifecycle::Idle);
        self.inner
            .broadcaster
            .broadcast(ProcessEvent::Completed {
                total,
                success: completed,
                failed,
            })
            .await;
        info!(
            "Processing run finished: {}/{} done, {} failed",
            completed, total, failed
        );
    }
}
