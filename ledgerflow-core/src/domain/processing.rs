//! Pipeline run accounting: states, the state tracker and the run summary

use std::fmt;

use serde::{Deserialize, Serialize};

use super::result::{Error, Result};

/// Stages of one pipeline invocation, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PipelineState {
    Filtering,
    Loading,
    StagingTransform,
    FindingGap,
    Classifying,
    Merging,
    FinalTransform,
    Done,
    Failed,
}

impl PipelineState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineState::Filtering => "FILTERING",
            PipelineState::Loading => "LOADING",
            PipelineState::StagingTransform => "STAGING_TRANSFORM",
            PipelineState::FindingGap => "FINDING_GAP",
            PipelineState::Classifying => "CLASSIFYING",
            PipelineState::Merging => "MERGING",
            PipelineState::FinalTransform => "FINAL_TRANSFORM",
            PipelineState::Done => "DONE",
            PipelineState::Failed => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineState::Done | PipelineState::Failed)
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tracks the current state of a run and the states it skipped
///
/// Moves are forward-only. `Failed` is reachable from any non-terminal state.
#[derive(Debug, Clone)]
pub struct RunTracker {
    current: PipelineState,
    visited: Vec<PipelineState>,
    skipped: Vec<PipelineState>,
}

impl Default for RunTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl RunTracker {
    pub fn new() -> Self {
        Self {
            current: PipelineState::Filtering,
            visited: vec![PipelineState::Filtering],
            skipped: Vec::new(),
        }
    }

    pub fn current(&self) -> PipelineState {
        self.current
    }

    pub fn visited(&self) -> &[PipelineState] {
        &self.visited
    }

    pub fn skipped(&self) -> &[PipelineState] {
        &self.skipped
    }

    /// Enter `next`. Fails if the run is finished or `next` is not ahead of the current state.
    pub fn advance(&mut self, next: PipelineState) -> Result<()> {
        if self.current.is_terminal() {
            return Err(Error::internal(format!(
                "run already finished in state {}",
                self.current
            )));
        }
        if next == PipelineState::Failed {
            self.fail();
            return Ok(());
        }
        if next <= self.current {
            return Err(Error::internal(format!(
                "cannot move from {} back to {}",
                self.current, next
            )));
        }
        self.current = next;
        self.visited.push(next);
        Ok(())
    }

    /// Record that `state` was passed over without doing work
    pub fn skip(&mut self, state: PipelineState) {
        if state > self.current && !state.is_terminal() {
            self.skipped.push(state);
        }
    }

    pub fn fail(&mut self) {
        if !self.current.is_terminal() {
            self.current = PipelineState::Failed;
            self.visited.push(PipelineState::Failed);
        }
    }
}

/// Summary returned by one pipeline run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcessingResult {
    pub run_id: String,
    pub files_processed: usize,
    pub files_skipped: usize,
    pub rows_inserted: usize,
    pub rows_skipped: usize,
    pub new_categories: usize,
    pub transform_models_built: usize,
    pub processing_time_seconds: f64,
    /// The gap query hit its ceiling, so another run has work to do
    pub gap_remaining: bool,
}

/// Outcome of forgetting one file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForgetResult {
    pub file_path: String,
    pub file_fingerprint: String,
    pub rows_deleted: usize,
    /// Files that had skipped rows owned by the forgotten file, loaded again in full
    #[serde(default)]
    pub reloaded_files: Vec<String>,
    /// Dependents that could not be reloaded and are missing their overlap rows
    #[serde(default)]
    pub stale_files: Vec<String>,
}
