//! Pod lifecycle on top of kubectl: create, delete, and phase polling.

use crate::error::{KubeError, Result};
use crate::kubectl::Kubectl;
use crate::pod::{Pod, PodPhase};
use async_trait::async_trait;
use podflow_build::{PodHandle, PodLifecycle, PodManifest};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

impl Kubectl {
    /// Poll the pod until `done` returns true.
    ///
    /// A `Failed` phase ends the wait immediately. Errors from kubectl itself
    /// are logged and retried until the deadline.
    async fn poll_pod<F>(
        &self,
        pod: &PodHandle,
        cancel: &CancellationToken,
        timeout: Duration,
        what: &'static str,
        done: F,
    ) -> Result<()>
    where
        F: Fn(&Pod) -> bool,
    {
        let deadline = Instant::now() + timeout;
        let mut last_waiting: Option<String> = None;

        loop {
            match self.get_pod(pod).await {
                Ok(status) => {
                    if status.phase() == PodPhase::Failed {
                        return Err(KubeError::PodFailed {
                            pod: pod.to_string(),
                            reason: status.failure_reason(),
                        });
                    }
                    if done(&status) {
                        return Ok(());
                    }

                    let waiting = status.waiting_reason();
                    if waiting.is_some() && waiting != last_waiting {
                        tracing::info!(pod = %pod, "Waiting for {}: {}", what, waiting.as_deref().unwrap_or_default());
                    }
                    last_waiting = waiting;
                }
                Err(KubeError::KubectlNotFound(program)) => {
                    return Err(KubeError::KubectlNotFound(program));
                }
                Err(e) => tracing::warn!(pod = %pod, "Failed to get pod status: {}", e),
            }

            if Instant::now() >= deadline {
                return Err(KubeError::Timeout {
                    pod: pod.to_string(),
                    what,
                    after: timeout,
                });
            }

            tokio::select! {
                _ = cancel.cancelled() => return Err(KubeError::Cancelled(pod.to_string())),
                _ = tokio::time::sleep_until(deadline.min(Instant::now() + self.poll_interval)) => {}
            }
        }
    }

    pub async fn wait_for_init(&self, pod: &PodHandle, cancel: &CancellationToken) -> Result<()> {
        self.poll_pod(pod, cancel, self.init_timeout, "initialize", Pod::init_container_running)
            .await
    }

    pub async fn wait_for_success(
        &self,
        pod: &PodHandle,
        cancel: &CancellationToken,
        timeout: Duration,
    ) -> Result<()> {
        self.poll_pod(pod, cancel, timeout, "succeed", |p| {
            p.phase() == PodPhase::Succeeded
        })
        .await
    }
}

#[async_trait]
impl PodLifecycle for Kubectl {
    async fn create(&self, manifest: &PodManifest) -> anyhow::Result<PodHandle> {
        Ok(self.create_pod(&manifest.0).await?)
    }

    async fn delete(&self, pod: &PodHandle) -> anyhow::Result<()> {
        Ok(self.delete_pod(pod).await?)
    }

    async fn wait_initialized(
        &self,
        pod: &PodHandle,
        cancel: &CancellationToken,
    ) -> anyhow::Result<()> {
        Ok(self.wait_for_init(pod, cancel).await?)
    }

    async fn wait_succeeded(
        &self,
        pod: &PodHandle,
        cancel: &CancellationToken,
        timeout: Duration,
    ) -> anyhow::Result<()> {
        Ok(self.wait_for_success(pod, cancel, timeout).await?)
    }
}
