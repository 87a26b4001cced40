use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Per-article position in the processing pipeline. Persisted as snake_case
/// text in the `process_status` column; only the engine mutates it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessStatus {
    Synced,
    PendingFetch,
    Fetching,
    PendingAnalysis,
    Analyzing,
    Done,
    Failed,
}

impl ProcessStatus {
    /// Statuses a run will pick up, in pipeline order.
    pub const ELIGIBLE: [ProcessStatus; 3] = [
        ProcessStatus::Synced,
        ProcessStatus::PendingFetch,
        ProcessStatus::PendingAnalysis,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessStatus::Synced => "synced",
            ProcessStatus::PendingFetch => "pending_fetch",
            ProcessStatus::Fetching => "fetching",
            ProcessStatus::PendingAnalysis => "pending_analysis",
            ProcessStatus::Analyzing => "analyzing",
            ProcessStatus::Done => "done",
            ProcessStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "synced" => Ok(ProcessStatus::Synced),
            "pending_fetch" => Ok(ProcessStatus::PendingFetch),
            "fetching" => Ok(ProcessStatus::Fetching),
            "pending_analysis" => Ok(ProcessStatus::PendingAnalysis),
            "analyzing" => Ok(ProcessStatus::Analyzing),
            "done" => Ok(ProcessStatus::Done),
            "failed" => Ok(ProcessStatus::Failed),
            other => Err(ProcessorError::General(format!(
                "unknown process status: {other}"
            ))),
        }
    }

}

impl fmt::Display for ProcessStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The two processing phases. Recorded on an article when a stage fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessStage {
    Fetch,
    Analysis,
}

impl ProcessStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessStage::Fetch => "fetch",
            ProcessStage::Analysis => "analysis",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "fetch" => Ok(ProcessStage::Fetch),
            "analysis" => Ok(ProcessStage::Analysis),
            other => Err(ProcessorError::General(format!(
                "unknown process stage: {other}"
            ))),
        }
    }
}

impl fmt::Display for ProcessStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Engine run lifecycle. Transient, in-process only; a restart loses it and
/// the article store remains the source of truth for what is done.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineLifecycle {
    Idle,
    Running,
    Paused,
    Stopping,
}

impl fmt::Display for EngineLifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EngineLifecycle::Idle => "idle",
            EngineLifecycle::Running => "running",
            EngineLifecycle::Paused => "paused",
            EngineLifecycle::Stopping => "stopping",
        };
        f.write_str(s)
    }
}

/// An article flowing through the pipeline. Content fields belong to the
/// upstream sync and the stage collaborators; the engine only reads them to
/// hand to collaborators and owns the `process_*` triple.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Article {
    /// Upstream-assigned id, stable for the article's lifetime.
    pub id: String,
    pub title: String,
    pub url: Option<String>,
    /// Body as delivered by the feed, if any.
    pub content_text: Option<String>,
    /// Body produced by the extraction collaborator.
    pub full_content: Option<String>,
    /// Provenance of the effective body: "feed" or "fetched".
    pub content_source: String,
    pub process_status: ProcessStatus,
    pub process_error: Option<String>,
    pub process_stage: Option<ProcessStage>,
    /// When the article became eligible; drives oldest-first selection.
    pub synced_at: DateTime<Utc>,
}

impl Article {
    /// A freshly synced article with no processing history.
    pub fn synced(id: impl Into<String>, title: impl Into<String>, url: Option<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            url,
            content_text: None,
            full_content: None,
            content_source: "feed".to_string(),
            process_status: ProcessStatus::Synced,
            process_error: None,
            process_stage: None,
            synced_at: Utc::now(),
        }
    }

    /// The body the analysis stage should look at: extracted text when the
    /// fetch stage produced one, the feed body otherwise.
    pub fn effective_content(&self) -> Option<&str> {
        self.full_content
            .as_deref()
            .or(self.content_text.as_deref())
            .filter(|s| !s.trim().is_empty())
    }
}

/// Reference to the article a run is currently working on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrentItem {
    pub id: String,
    pub title: String,
}

/// Aggregate counts per `process_status`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessStats {
    pub synced: u64,
    pub pending_fetch: u64,
    pub fetching: u64,
    pub pending_analysis: u64,
    pub analyzing: u64,
    pub done: u64,
    pub failed: u64,
    pub total: u64,
}

impl ProcessStats {
    pub fn record(&mut self, status: ProcessStatus, count: u64) {
        match status {
            ProcessStatus::Synced => self.synced += count,
            ProcessStatus::PendingFetch => self.pending_fetch += count,
            ProcessStatus::Fetching => self.fetching += count,
            ProcessStatus::PendingAnalysis => self.pending_analysis += count,
            ProcessStatus::Analyzing => self.analyzing += count,
            ProcessStatus::Done => self.done += count,
            ProcessStatus::Failed => self.failed += count,
        }
        self.total += count;
    }
}

/// One row of the operator triage listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailedArticle {
    pub article_id: String,
    pub title: String,
    pub url: Option<String>,
    pub stage: Option<ProcessStage>,
    pub error: Option<String>,
}

/// Page envelope for the failed-article listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailedPage {
    pub total: u64,
    pub page: u32,
    pub page_size: u32,
    pub items: Vec<FailedArticle>,
}

#[derive(Debug, thiserror::Error)]
pub enum ProcessorError {
    #[error("engine is already running")]
    AlreadyRunning,

    #[error("cannot {op} while engine is {state}")]
    InvalidLifecycle {
        op: &'static str,
        state: EngineLifecycle,
    },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    General(String),
}

impl ProcessorError {
    /// True for operator mistakes (bad lifecycle for the requested op) as
    /// opposed to internal failures.
    pub fn is_control_error(&self) -> bool {
        matches!(
            self,
            ProcessorError::AlreadyRunning | ProcessorError::InvalidLifecycle { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, ProcessorError>;
