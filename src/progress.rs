//! Terminal progress for provisioning runs
//!
//! One bar per stage, advanced as each resource of the stage finishes.

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use provision::{Outcome, ProgressCallback, ResourceOutcome, Stage};

const TEMPLATE: &str = "{spinner:.green} {prefix:.bold} [{bar:40.cyan/blue}] {pos}/{len} {msg}";

/// Progress callback drawing an `indicatif` bar per stage
pub struct StageProgress {
    total_stages: usize,
    hidden: bool,
    bar: Option<ProgressBar>,
}

impl StageProgress {
    pub fn new(total_stages: usize, hidden: bool) -> Self {
        Self {
            total_stages,
            hidden,
            bar: None,
        }
    }

    fn style() -> ProgressStyle {
        ProgressStyle::default_bar()
            .template(TEMPLATE)
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=>-")
    }
}

impl ProgressCallback for StageProgress {
    fn on_stage_start(&mut self, stage: &Stage) {
        let bar = ProgressBar::new(stage.resources.len() as u64);
        if self.hidden {
            bar.set_draw_target(ProgressDrawTarget::hidden());
        }
        bar.set_style(Self::style());
        bar.set_prefix(format!("[{}/{}]", stage.index + 1, self.total_stages));
        self.bar = Some(bar);
    }

    fn on_resource_complete(&mut self, outcome: &ResourceOutcome) {
        if let Some(bar) = &self.bar {
            bar.inc(1);
            bar.set_message(outcome.id.to_string());
            if let Outcome::Failed { reason } = &outcome.outcome {
                bar.println(format!("  ✗ {}: {reason}", outcome.id));
            }
        }
    }

    fn on_stage_complete(&mut self, stage: &Stage) {
        if let Some(bar) = self.bar.take() {
            bar.finish_with_message(format!("stage {} done", stage.index + 1));
        }
    }
}
