//! Progress reporting and cancellation hooks
//!
//! These keep the engine free of any terminal or signal handling; the caller
//! decides how progress is shown and when a run should stop.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::planner::Stage;
use crate::types::ResourceOutcome;

/// Receives progress updates during execution
///
/// Called from the thread driving the run, never from workers.
pub trait ProgressCallback {
    fn on_stage_start(&mut self, stage: &Stage);

    fn on_resource_complete(&mut self, outcome: &ResourceOutcome);

    fn on_stage_complete(&mut self, stage: &Stage);
}

/// No-op progress callback
pub struct NoProgress;

impl ProgressCallback for NoProgress {
    fn on_stage_start(&mut self, _stage: &Stage) {}
    fn on_resource_complete(&mut self, _outcome: &ResourceOutcome) {}
    fn on_stage_complete(&mut self, _stage: &Stage) {}
}

/// Shared flag that asks a run to stop starting new work
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
