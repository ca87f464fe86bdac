//! kubectl collaborator error types

use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum KubeError {
    #[error("kubectl not found: {0}. Please install kubectl or set `kubectl` in podflow.kdl")]
    KubectlNotFound(String),

    #[error("kubectl {command} failed: {stderr}")]
    CommandFailed { command: String, stderr: String },

    #[error("Timed out after {after:?} waiting for pod {pod} to {what}")]
    Timeout {
        pod: String,
        what: &'static str,
        after: Duration,
    },

    #[error("Pod {pod} failed: {reason}")]
    PodFailed { pod: String, reason: String },

    #[error("Cancelled while waiting for pod {0}")]
    Cancelled(String),

    #[error("Invalid pod manifest: {0}")]
    InvalidManifest(String),

    #[error("Template error: {0}")]
    Template(#[from] podflow_core::CoreError),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, KubeError>;
