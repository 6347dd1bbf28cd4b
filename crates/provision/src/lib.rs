//! # provision
//!
//! Dependency-ordered provisioning of cluster resources.
//!
//! Given a set of resource documents (opaque manifest bundles and cert-manager
//! custom resources), this crate:
//! - validates every document's fields before anything is sent
//! - resolves references between documents, deferring the rest to the cluster
//! - orders documents into stages with no intra-stage dependencies
//! - applies the stages through a [`ClusterConnection`], retrying transient
//!   failures and reporting one outcome per document
//!
//! ## Example
//!
//! ```no_run
//! use provision::{
//!     ExecuteOptions, InMemoryCluster, IssuerSpec, NoProgress, ProvisioningEngine,
//! };
//!
//! let cluster = InMemoryCluster::new();
//! let engine = ProvisioningEngine::new(&cluster, ExecuteOptions::default());
//!
//! let documents = vec![IssuerSpec::SelfSigned.into_document("selfsigned-issuer")];
//! let result = engine.provision(documents, &mut NoProgress).expect("no cycles");
//! assert!(result.is_success());
//! ```
//!
//! ## Connections
//!
//! The engine never opens connections itself. It borrows one
//! [`ClusterConnection`] for the whole run; [`InMemoryCluster`] is a
//! deterministic implementation with scripted faults.

pub mod certificate;
pub mod connection;
pub mod context;
pub mod duration;
pub mod error;
pub mod executor;
pub mod memory;
pub mod planner;
pub mod resolve;
pub mod resource;
pub mod retry;
pub mod types;
pub mod validate;

pub use certificate::{CertificateSpec, IssuerSpec, KeyAlgorithm, KeyEncoding};
pub use connection::{ClusterConnection, ConnectionError, SubmitOutcome};
pub use context::{CancelToken, NoProgress, ProgressCallback};
pub use duration::{DurationError, parse_duration};
pub use error::{Error, Result};
pub use executor::ProvisioningEngine;
pub use memory::{Fault, InMemoryCluster};
pub use planner::{DependencyGraph, PlannedResource, ProvisioningPlan, Stage, plan};
pub use resolve::{ReferenceResolver, Resolution};
pub use resource::{
    ApiKind, CERT_MANAGER_GROUP, CERT_MANAGER_VERSION, DEFAULT_NAMESPACE, ResourceDocument,
    ResourceId, ResourceRef,
};
pub use retry::RetryConfig;
pub use types::{
    AbortReason, ExecuteOptions, ExecuteSummary, FailureKind, Outcome, ProvisioningResult,
    ResourceOutcome,
};
pub use validate::{FieldError, validate};
