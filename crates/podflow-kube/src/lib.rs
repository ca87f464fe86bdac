//! kubectl-backed collaborators for podflow
//!
//! [`Kubectl`] implements the pod lifecycle, remote exec and log streaming
//! traits from `podflow-build` by driving the `kubectl` CLI.
//! [`ManifestTemplate`] renders the build pod manifest.

pub mod error;
pub mod kubectl;
pub mod logs;
pub mod manifest;
pub mod pod;
pub mod wait;

pub use error::{KubeError, Result};
pub use kubectl::Kubectl;
pub use manifest::{KANIKO_TEMPLATE, ManifestTemplate};
pub use pod::{Pod, PodPhase};
