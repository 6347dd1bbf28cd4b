//! Outcomes, results and options of a provisioning run

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::connection::{ConnectionError, SubmitOutcome};
use crate::resource::{ResourceId, ResourceRef};
use crate::retry::RetryConfig;
use crate::validate::FieldError;

/// Why a resource failed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureKind {
    /// One or more fields broke a domain constraint
    Validation { errors: Vec<FieldError> },
    /// A reference matched neither a plan document nor a cluster resource
    DanglingReference { reference: ResourceRef },
    /// A dependency failed, so this resource was never attempted
    UpstreamFailed { upstream: ResourceId },
    Unreachable { message: String },
    Rejected { message: String },
    AuthenticationFailure { message: String },
}

impl FailureKind {
    /// Process exit code the CLI reports for this failure
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Validation { .. } => 2,
            Self::DanglingReference { .. } => 3,
            Self::Rejected { .. } => 4,
            Self::Unreachable { .. } => 5,
            Self::AuthenticationFailure { .. } => 6,
            Self::UpstreamFailed { .. } => 7,
        }
    }
}

impl From<ConnectionError> for FailureKind {
    fn from(err: ConnectionError) -> Self {
        match err {
            ConnectionError::AuthenticationFailure(message) => {
                Self::AuthenticationFailure { message }
            }
            ConnectionError::Unreachable(message) => Self::Unreachable { message },
            ConnectionError::Rejected(message) => Self::Rejected { message },
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Validation { errors } => {
                write!(f, "validation failed: ")?;
                for (i, e) in errors.iter().enumerate() {
                    if i > 0 {
                        f.write_str("; ")?;
                    }
                    write!(f, "{e}")?;
                }
                Ok(())
            }
            Self::DanglingReference { reference } => {
                write!(f, "dangling reference to {reference}")
            }
            Self::UpstreamFailed { upstream } => write!(f, "dependency {upstream} failed"),
            Self::Unreachable { message } => write!(f, "cluster unreachable: {message}"),
            Self::Rejected { message } => write!(f, "rejected: {message}"),
            Self::AuthenticationFailure { message } => {
                write!(f, "authentication failed: {message}")
            }
        }
    }
}

/// Final state of one resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Outcome {
    Applied,
    AlreadyExists,
    Failed { reason: FailureKind },
    Skipped { reason: String },
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Applied | Self::AlreadyExists)
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }

    pub fn failed(reason: impl Into<FailureKind>) -> Self {
        Self::Failed {
            reason: reason.into(),
        }
    }

    pub fn skipped(reason: impl Into<String>) -> Self {
        Self::Skipped {
            reason: reason.into(),
        }
    }

    /// Exit code contribution, 0 for successes
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Applied | Self::AlreadyExists => 0,
            Self::Failed { reason } => reason.exit_code(),
            Self::Skipped { .. } => 8,
        }
    }
}

impl From<SubmitOutcome> for Outcome {
    fn from(outcome: SubmitOutcome) -> Self {
        match outcome {
            SubmitOutcome::Applied => Self::Applied,
            SubmitOutcome::AlreadyExists => Self::AlreadyExists,
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Applied => f.write_str("applied"),
            Self::AlreadyExists => f.write_str("already exists"),
            Self::Failed { reason } => write!(f, "failed: {reason}"),
            Self::Skipped { reason } => write!(f, "skipped: {reason}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceOutcome {
    pub id: ResourceId,
    pub stage: usize,
    pub outcome: Outcome,
}

/// Why a run stopped early
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AbortReason {
    AuthenticationFailure,
    Cancelled,
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AuthenticationFailure => f.write_str("authentication failure"),
            Self::Cancelled => f.write_str("cancelled"),
        }
    }
}

/// Counts per outcome
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecuteSummary {
    pub applied: usize,
    pub already_exists: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl ExecuteSummary {
    pub fn add(&mut self, outcome: &Outcome) {
        match outcome {
            Outcome::Applied => self.applied += 1,
            Outcome::AlreadyExists => self.already_exists += 1,
            Outcome::Failed { .. } => self.failed += 1,
            Outcome::Skipped { .. } => self.skipped += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.applied + self.already_exists + self.failed + self.skipped
    }

    pub fn is_success(&self) -> bool {
        self.failed == 0 && self.skipped == 0
    }
}

/// Outcome of every resource of a run, in plan order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisioningResult {
    pub outcomes: Vec<ResourceOutcome>,
    pub aborted: Option<AbortReason>,
}

impl ProvisioningResult {
    pub fn get(&self, id: &ResourceId) -> Option<&Outcome> {
        self.outcomes
            .iter()
            .find(|o| o.id == *id)
            .map(|o| &o.outcome)
    }

    /// True iff every resource was applied or already existed
    pub fn is_success(&self) -> bool {
        self.outcomes.iter().all(|o| o.outcome.is_success())
    }

    /// First unsuccessful outcome in plan order
    pub fn first_failure(&self) -> Option<&ResourceOutcome> {
        self.outcomes.iter().find(|o| !o.outcome.is_success())
    }

    pub fn exit_code(&self) -> u8 {
        self.first_failure().map_or(0, |o| o.outcome.exit_code())
    }

    pub fn summary(&self) -> ExecuteSummary {
        let mut summary = ExecuteSummary::default();
        for o in &self.outcomes {
            summary.add(&o.outcome);
        }
        summary
    }
}

/// Options for a provisioning run
#[derive(Debug, Clone)]
pub struct ExecuteOptions {
    /// Worker threads per stage
    pub jobs: usize,
    pub retry: RetryConfig,
    /// Wait for bundles to report ready before moving on
    pub wait_ready: bool,
    pub ready_timeout: Duration,
}

impl Default for ExecuteOptions {
    fn default() -> Self {
        Self {
            jobs: 4,
            retry: RetryConfig::default(),
            wait_ready: false,
            ready_timeout: Duration::from_secs(120),
        }
    }
}
