//! Legal state transitions for the processing pipeline.
//!
//! Everything here is a pure function over [`ProcessStatus`]; the run-loop
//! consults this module and persists whatever it answers. Illegal
//! combinations return `None`, which the engine treats as "leave the
//! article alone" — a `done` article is never reprocessed and a `failed`
//! one never advances without an explicit retry.

use crate::types::{ProcessStage, ProcessStatus};

/// Outcome of a single stage collaborator call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageOutcome {
    /// The collaborator produced its payload.
    Success,
    /// The collaborator decided no work was needed; treated as satisfied.
    Satisfied,
    Failure,
}

/// Which stage an article in `status` enters next, if any.
pub fn next_stage(status: ProcessStatus) -> Option<ProcessStage> {
    match status {
        ProcessStatus::Synced | ProcessStatus::PendingFetch => Some(ProcessStage::Fetch),
        ProcessStatus::PendingAnalysis => Some(ProcessStage::Analysis),
        ProcessStatus::Fetching
        | ProcessStatus::Analyzing
        | ProcessStatus::Done
        | ProcessStatus::Failed => None,
    }
}

/// The in-progress status an article carries while `stage` runs.
pub fn stage_entry(stage: ProcessStage) -> ProcessStatus {
    match stage {
        ProcessStage::Fetch => ProcessStatus::Fetching,
        ProcessStage::Analysis => ProcessStatus::Analyzing,
    }
}

/// The transition table: (in-progress status, stage outcome) -> next status.
pub fn apply(status: ProcessStatus, outcome: StageOutcome) -> Option<ProcessStatus> {
    match (status, outcome) {
        (ProcessStatus::Fetching, StageOutcome::Success | StageOutcome::Satisfied) => {
            Some(ProcessStatus::PendingAnalysis)
        }
        (ProcessStatus::Fetching, StageOutcome::Failure) => Some(ProcessStatus::Failed),
        (ProcessStatus::Analyzing, StageOutcome::Success) => Some(ProcessStatus::Done),
        // An analysis collaborator has no "satisfied" shortcut; the engine
        // skips the call entirely when there is nothing to analyze.
        (ProcessStatus::Analyzing, StageOutcome::Satisfied) => Some(ProcessStatus::Done),
        (ProcessStatus::Analyzing, StageOutcome::Failure) => Some(ProcessStatus::Failed),
        _ => None,
    }
}

/// Where a retried failure re-enters the pipeline. Never skips a stage.
pub fn retry_target(stage: ProcessStage) -> ProcessStatus {
    match stage {
        ProcessStage::Fetch => ProcessStatus::PendingFetch,
        ProcessStage::Analysis => ProcessStatus::PendingAnalysis,
    }
}
