//! # kubekit
//!
//! A blocking Kubernetes connection built on kube-rs.
//!
//! Provides:
//! - Client setup from a kubeconfig file or the inferred environment
//! - API discovery for each object's plural and scope
//! - [`KubeClient`], a [`provision::ClusterConnection`] using server-side apply
//!
//! ## Example
//!
//! ```no_run
//! use kubekit::KubeClient;
//! use std::time::Duration;
//!
//! let client = KubeClient::connect(None, Duration::from_secs(30)).expect("client");
//! println!("Connected to {}", client.server());
//! ```

pub mod client;
pub mod error;

pub use client::{FIELD_MANAGER, KubeClient, connection_error, is_subset, split_api_version};
pub use error::{Error, Result};
