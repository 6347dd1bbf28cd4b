//! Error types for building a cluster client
//!
//! Requests made through an established client report
//! [`provision::ConnectionError`] instead; these errors only cover loading
//! the kubeconfig and starting the client.

use std::io;
use std::path::PathBuf;

/// Result type alias for kubekit operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to start async runtime: {0}")]
    Runtime(#[source] io::Error),

    #[error("invalid kubeconfig {path}: {source}")]
    Kubeconfig {
        path: PathBuf,
        #[source]
        source: kube::config::KubeconfigError,
    },

    /// No explicit kubeconfig and nothing usable in the environment
    #[error("could not infer cluster config (set KUBECONFIG or pass --kubeconfig): {0}")]
    Infer(#[from] kube::config::InferConfigError),

    #[error("failed to create client: {0}")]
    Client(#[from] kube::Error),
}

impl Error {
    pub fn kubeconfig(path: impl Into<PathBuf>, source: kube::config::KubeconfigError) -> Self {
        Self::Kubeconfig {
            path: path.into(),
            source,
        }
    }
}
