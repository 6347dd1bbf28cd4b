//! Errors that stop a run before or outside of per-resource execution
//!
//! Per-resource problems never surface here; they are recorded as outcomes in
//! the [`ProvisioningResult`](crate::ProvisioningResult).

use thiserror::Error;

use crate::resource::ResourceId;

/// Result type for plan-level operations
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// No valid order exists; members are listed along the cycle
    #[error("cyclic dependency: {}", format_cycle(.members))]
    CyclicDependency { members: Vec<ResourceId> },

    #[error("duplicate resource {id}")]
    DuplicateResource { id: ResourceId },

    #[error("failed to start worker pool: {0}")]
    WorkerPool(String),
}

impl Error {
    /// Process exit code the CLI reports for this error
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::CyclicDependency { .. } => 9,
            Self::DuplicateResource { .. } => 2,
            Self::WorkerPool(_) => 1,
        }
    }
}

fn format_cycle(members: &[ResourceId]) -> String {
    let mut path: Vec<String> = members.iter().map(ToString::to_string).collect();
    if let Some(first) = path.first().cloned() {
        path.push(first);
    }
    path.join(" -> ")
}
