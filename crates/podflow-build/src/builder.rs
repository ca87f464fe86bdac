//! ビルドPodによるリモートビルド
//!
//! env解決 → Pod作成 → コンテキスト転送 → {ログ追跡 ∥ 完了待ち} → ダイジェスト解決
//! の順に進みます。Podが作成された後は、どの経路で抜けても一度だけ削除されます。

use crate::error::{BuildError, Result};
use crate::guard::PodGuard;
use crate::remote::{
    ArchiveProducer, DigestResolver, LogStreamer, ManifestFactory, PodHandle, PodLifecycle,
    RemoteExec,
};
use crate::transfer::{ContextUploader, StagingArea};
use futures_util::FutureExt;
use podflow_core::{BuildArtifact, CleanupPolicy, ClusterConfig, evaluate_env, generate_env_from_image};
use std::panic::AssertUnwindSafe;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// リモートクラスタ側の協調オブジェクト一式
#[derive(Clone)]
pub struct Collaborators {
    pub lifecycle: Arc<dyn PodLifecycle>,
    pub exec: Arc<dyn RemoteExec>,
    pub logs: Arc<dyn LogStreamer>,
    pub producer: Arc<dyn ArchiveProducer>,
    pub digests: Arc<dyn DigestResolver>,
    pub manifests: Arc<dyn ManifestFactory>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BuildOptions {
    /// Succeeded フェーズを待つ上限
    pub timeout: Duration,
    pub staging: StagingArea,
    pub cleanup: CleanupPolicy,
}

impl From<&ClusterConfig> for BuildOptions {
    fn from(cluster: &ClusterConfig) -> Self {
        Self {
            timeout: cluster.timeout,
            staging: StagingArea::from(cluster),
            cleanup: cluster.cleanup,
        }
    }
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self::from(&ClusterConfig::default())
    }
}

pub struct PodBuilder {
    collaborators: Collaborators,
    uploader: ContextUploader,
    options: BuildOptions,
}

impl PodBuilder {
    pub fn new(collaborators: Collaborators, options: BuildOptions) -> Self {
        let uploader = ContextUploader::new(
            Arc::clone(&collaborators.lifecycle),
            Arc::clone(&collaborators.exec),
            Arc::clone(&collaborators.producer),
            options.staging.clone(),
        );
        Self {
            collaborators,
            uploader,
            options,
        }
    }

    pub fn options(&self) -> &BuildOptions {
        &self.options
    }

    /// ビルドPodでイメージをビルドし、公開されたタグのダイジェストを返す
    ///
    /// Podのログは `out` に書き出されます。戻る時点でログは出力済みです。
    #[tracing::instrument(skip_all, fields(tag = %tag))]
    pub async fn build_remotely<W>(
        &self,
        cancel: &CancellationToken,
        out: &mut W,
        workspace: &Path,
        artifact: &BuildArtifact,
        tag: &str,
    ) -> Result<String>
    where
        W: AsyncWrite + Send + Unpin,
    {
        if cancel.is_cancelled() {
            return Err(BuildError::Cancelled);
        }

        let generated = generate_env_from_image(tag).map_err(BuildError::InvalidReference)?;
        let env = evaluate_env(&artifact.env, &generated).map_err(BuildError::Template)?;
        debug!(count = env.len(), "Resolved build environment");

        let manifest = self
            .collaborators
            .manifests
            .manifest(artifact, &env, tag)
            .map_err(BuildError::PodCreationFailed)?;
        let pod = self
            .collaborators
            .lifecycle
            .create(&manifest)
            .await
            .map_err(BuildError::PodCreationFailed)?;
        info!(pod = %pod, "Created build pod");

        let guard = PodGuard::new(
            Arc::clone(&self.collaborators.lifecycle),
            pod.clone(),
            self.options.cleanup,
        );

        let outcome = AssertUnwindSafe(self.run_in_pod(&pod, cancel, out, workspace, artifact, tag))
            .catch_unwind()
            .await;

        guard.release().await;

        match outcome {
            Ok(result) => result,
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }

    async fn run_in_pod<W>(
        &self,
        pod: &PodHandle,
        cancel: &CancellationToken,
        out: &mut W,
        workspace: &Path,
        artifact: &BuildArtifact,
        tag: &str,
    ) -> Result<String>
    where
        W: AsyncWrite + Send + Unpin,
    {
        self.uploader
            .upload(pod, cancel, workspace, &artifact.docker_artifact())
            .await?;

        self.wait_with_logs(pod, cancel, out).await?;

        let digest = self
            .collaborators
            .digests
            .digest_of(tag)
            .await
            .map_err(|source| BuildError::DigestResolutionFailed {
                tag: tag.to_string(),
                source,
            })?;
        info!(digest = %digest, "Build succeeded");

        Ok(digest)
    }

    /// ログを追跡しながら完了を待つ
    async fn wait_with_logs<W>(
        &self,
        pod: &PodHandle,
        cancel: &CancellationToken,
        out: &mut W,
    ) -> Result<()>
    where
        W: AsyncWrite + Send + Unpin,
    {
        let stop_logs = cancel.child_token();

        let sink: &mut (dyn AsyncWrite + Send + Unpin) = &mut *out;
        let follow = self.collaborators.logs.follow(pod, &stop_logs, sink);
        let wait = async {
            let waited = self
                .collaborators
                .lifecycle
                .wait_succeeded(pod, cancel, self.options.timeout)
                .await;
            stop_logs.cancel();
            waited
        };

        // ログの読み切りまで待ってから結果を返す
        let (followed, waited) = tokio::join!(follow, wait);
        if let Err(e) = followed {
            warn!(pod = %pod, "Log streaming ended with an error: {e:#}");
        }
        if let Err(e) = out.flush().await {
            warn!(pod = %pod, "Flushing build logs failed: {e}");
        }

        match waited {
            Ok(()) => Ok(()),
            Err(_) if cancel.is_cancelled() => Err(BuildError::Cancelled),
            Err(source) => Err(BuildError::BuildTimeoutOrFailed {
                pod: pod.to_string(),
                source,
            }),
        }
    }
}
