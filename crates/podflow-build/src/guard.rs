//! ビルドPodの後始末
//!
//! [`PodGuard`] は作成済みのビルドPodを保持し、ビルドの終わり方
//! （成功・エラー・キャンセル・パニック）に関わらず一度だけ削除します。

use crate::remote::{PodHandle, PodLifecycle};
use podflow_core::CleanupPolicy;
use std::sync::Arc;
use tracing::{debug, error, warn};

pub struct PodGuard {
    lifecycle: Arc<dyn PodLifecycle>,
    pod: Option<PodHandle>,
    policy: CleanupPolicy,
}

impl PodGuard {
    pub fn new(lifecycle: Arc<dyn PodLifecycle>, pod: PodHandle, policy: CleanupPolicy) -> Self {
        Self {
            lifecycle,
            pod: Some(pod),
            policy,
        }
    }

    pub fn pod(&self) -> Option<&PodHandle> {
        self.pod.as_ref()
    }

    /// Podを削除してガードを解除
    pub async fn release(mut self) {
        if let Some(pod) = self.pod.take() {
            delete_pod(self.lifecycle.as_ref(), &pod, self.policy).await;
        }
    }
}

impl Drop for PodGuard {
    fn drop(&mut self) {
        let Some(pod) = self.pod.take() else {
            return;
        };

        // release() を経由せずに破棄された（タスクの中断など）
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let lifecycle = Arc::clone(&self.lifecycle);
                let policy = self.policy;
                handle.spawn(async move {
                    delete_pod(lifecycle.as_ref(), &pod, policy).await;
                });
            }
            Err(_) => {
                warn!(pod = %pod, "No async runtime available, build pod was not deleted");
            }
        }
    }
}

async fn delete_pod(lifecycle: &dyn PodLifecycle, pod: &PodHandle, policy: CleanupPolicy) {
    debug!(pod = %pod, "Deleting build pod");
    let Err(e) = lifecycle.delete(pod).await else {
        return;
    };

    match policy {
        CleanupPolicy::Exit => {
            error!(pod = %pod, "Deleting pod failed: {e:#}");
            std::process::exit(1);
        }
        CleanupPolicy::Log => {
            warn!(pod = %pod, "Deleting pod failed: {e:#}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::PodManifest;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    #[derive(Default)]
    struct CountingLifecycle {
        deletes: AtomicUsize,
        fail_delete: bool,
    }

    #[async_trait]
    impl PodLifecycle for CountingLifecycle {
        async fn create(&self, _: &PodManifest) -> anyhow::Result<PodHandle> {
            unreachable!()
        }
        async fn delete(&self, _: &PodHandle) -> anyhow::Result<()> {
            self.deletes.fetch_add(1, Ordering::SeqCst);
            if self.fail_delete {
                anyhow::bail!("forbidden");
            }
            Ok(())
        }
        async fn wait_initialized(&self, _: &PodHandle, _: &CancellationToken) -> anyhow::Result<()> {
            unreachable!()
        }
        async fn wait_succeeded(
            &self,
            _: &PodHandle,
            _: &CancellationToken,
            _: Duration,
        ) -> anyhow::Result<()> {
            unreachable!()
        }
    }

    fn pod() -> PodHandle {
        PodHandle::new("kaniko-1", "default")
    }

    #[tokio::test]
    async fn test_release_deletes_once() {
        let lifecycle = Arc::new(CountingLifecycle::default());
        let guard = PodGuard::new(lifecycle.clone(), pod(), CleanupPolicy::Log);
        assert_eq!(guard.pod(), Some(&pod()));

        guard.release().await;
        assert_eq!(lifecycle.deletes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_drop_without_release_deletes() {
        let lifecycle = Arc::new(CountingLifecycle::default());
        drop(PodGuard::new(lifecycle.clone(), pod(), CleanupPolicy::Log));

        for _ in 0..50 {
            if lifecycle.deletes.load(Ordering::SeqCst) == 1 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(lifecycle.deletes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_delete_is_logged_with_log_policy() {
        let lifecycle = Arc::new(CountingLifecycle {
            fail_delete: true,
            ..Default::default()
        });
        PodGuard::new(lifecycle.clone(), pod(), CleanupPolicy::Log)
            .release()
            .await;
        assert_eq!(lifecycle.deletes.load(Ordering::SeqCst), 1);
    }
}
