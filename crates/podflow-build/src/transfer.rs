//! ビルドコンテキストの転送
//!
//! 1. init コンテナの起動を待つ
//! 2. アーカイブをパイプに書き出しながら `tar -xf -` の stdin に流し込む
//! 3. 展開が成功した場合のみ、完了マーカーを作成して init コンテナを終了させる

use crate::error::{BuildError, BuildResult};
use crate::pipe;
use crate::remote::{ArchiveProducer, ExecOutput, PodHandle, PodLifecycle, RemoteExec};
use anyhow::anyhow;
use podflow_core::{ClusterConfig, Compression, DockerArtifact};
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// ビルドコンテキストを受け取る init コンテナの情報
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagingArea {
    pub init_container: String,
    pub mount_path: String,
    pub marker_path: String,
    pub compression: Compression,
}

impl From<&ClusterConfig> for StagingArea {
    fn from(cluster: &ClusterConfig) -> Self {
        Self {
            init_container: cluster.init_container.clone(),
            mount_path: cluster.mount_path.clone(),
            marker_path: cluster.marker_path.clone(),
            compression: cluster.compression,
        }
    }
}

impl Default for StagingArea {
    fn default() -> Self {
        Self::from(&ClusterConfig::default())
    }
}

impl StagingArea {
    /// アーカイブを展開するコマンド
    pub fn extract_command(&self) -> Vec<&str> {
        let flags = match self.compression {
            Compression::None => "-xf",
            Compression::Gzip => "-xzf",
        };
        vec!["tar", flags, "-", "-C", self.mount_path.as_str()]
    }

    /// 完了マーカーを作成するコマンド
    pub fn marker_command(&self) -> Vec<&str> {
        vec!["touch", self.marker_path.as_str()]
    }
}

/// ビルドコンテキストをビルドPodへ転送する
pub struct ContextUploader {
    lifecycle: Arc<dyn PodLifecycle>,
    exec: Arc<dyn RemoteExec>,
    producer: Arc<dyn ArchiveProducer>,
    staging: StagingArea,
}

impl ContextUploader {
    pub fn new(
        lifecycle: Arc<dyn PodLifecycle>,
        exec: Arc<dyn RemoteExec>,
        producer: Arc<dyn ArchiveProducer>,
        staging: StagingArea,
    ) -> Self {
        Self {
            lifecycle,
            exec,
            producer,
            staging,
        }
    }

    pub fn staging(&self) -> &StagingArea {
        &self.staging
    }

    /// キャンセルされた場合は段階に関わらず [`BuildError::Cancelled`] を返す
    #[tracing::instrument(skip_all, fields(pod = %pod))]
    pub async fn upload(
        &self,
        pod: &PodHandle,
        cancel: &CancellationToken,
        workspace: &Path,
        artifact: &DockerArtifact,
    ) -> BuildResult<()> {
        self.transfer(pod, cancel, workspace, artifact)
            .await
            .map_err(|e| if cancel.is_cancelled() { BuildError::Cancelled } else { e })
    }

    async fn transfer(
        &self,
        pod: &PodHandle,
        cancel: &CancellationToken,
        workspace: &Path,
        artifact: &DockerArtifact,
    ) -> BuildResult<()> {
        self.lifecycle
            .wait_initialized(pod, cancel)
            .await
            .map_err(|source| BuildError::InitializationTimeout {
                pod: pod.to_string(),
                source,
            })?;
        debug!("Init container is running, streaming build context");

        self.extract(pod, cancel, workspace, artifact).await?;

        // 展開が成功した後にのみマーカーを作る
        let marker = self
            .exec
            .exec(
                pod,
                &self.staging.init_container,
                cancel,
                None,
                &self.staging.marker_command(),
            )
            .await
            .map_err(|source| BuildError::ContextUploadFailed {
                message: "finishing upload of the build context".to_string(),
                source,
            })?;

        if !marker.success() {
            return Err(BuildError::ContextUploadFailed {
                message: format!(
                    "finishing upload of the build context: {}",
                    marker.output_lossy()
                ),
                source: exit_error("touch", &marker),
            });
        }

        info!("Build context uploaded");
        Ok(())
    }

    /// アーカイブを作りながら init コンテナ内で展開する
    async fn extract(
        &self,
        pod: &PodHandle,
        cancel: &CancellationToken,
        workspace: &Path,
        artifact: &DockerArtifact,
    ) -> BuildResult<()> {
        let (writer, reader) = pipe::pipe();

        let producer = Arc::clone(&self.producer);
        let workspace = workspace.to_path_buf();
        let artifact = artifact.clone();
        let produce = tokio::task::spawn_blocking(move || {
            let mut writer = writer;
            match producer.write_archive(&mut writer, &workspace, &artifact) {
                Ok(()) => {
                    writer.close();
                    Ok(())
                }
                Err(e) => {
                    writer.close_with_error(std::io::Error::other(format!(
                        "creating build context: {e:#}"
                    )));
                    Err(e)
                }
            }
        });

        let extracted = self
            .exec
            .exec(
                pod,
                &self.staging.init_container,
                cancel,
                Some(Box::new(reader)),
                &self.staging.extract_command(),
            )
            .await;

        // 読み出し側は exec の中で破棄済みなので、書き込み側も必ず終わる
        let produced = match produce.await {
            Ok(result) => result,
            Err(join) => Err(anyhow!("archive producer panicked: {join}")),
        };

        match (extracted, produced) {
            (Ok(out), _) if !out.success() => Err(BuildError::ContextUploadFailed {
                message: format!("uploading build context: {}", out.output_lossy()),
                source: exit_error("tar", &out),
            }),
            (_, Err(source)) => Err(BuildError::ContextUploadFailed {
                message: "creating build context".to_string(),
                source,
            }),
            (Ok(_), Ok(())) => Ok(()),
            (Err(source), Ok(())) => Err(BuildError::ContextUploadFailed {
                message: "streaming build context".to_string(),
                source,
            }),
        }
    }
}

fn exit_error(command: &str, out: &ExecOutput) -> anyhow::Error {
    match out.status {
        Some(code) => anyhow!("{command} exited with status {code}"),
        None => anyhow!("{command} was terminated by a signal"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::ExecStdin;
    use async_trait::async_trait;
    use std::io::Write;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::io::AsyncReadExt;

    /// init 待ちだけを行うライフサイクル
    struct ReadyLifecycle {
        fail: bool,
    }

    #[async_trait]
    impl PodLifecycle for ReadyLifecycle {
        async fn create(&self, _: &crate::remote::PodManifest) -> anyhow::Result<PodHandle> {
            unreachable!()
        }
        async fn delete(&self, _: &PodHandle) -> anyhow::Result<()> {
            unreachable!()
        }
        async fn wait_initialized(&self, _: &PodHandle, _: &CancellationToken) -> anyhow::Result<()> {
            if self.fail {
                anyhow::bail!("timed out");
            }
            Ok(())
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

    /// stdin を読み切って記録する exec
    #[derive(Default)]
    struct RecordingExec {
        calls: Mutex<Vec<(String, Vec<String>, Vec<u8>)>>,
        tar_status: Option<i32>,
    }

    impl RecordingExec {
        fn succeeding() -> Self {
            Self {
                tar_status: Some(0),
                ..Default::default()
            }
        }

        fn commands(&self) -> Vec<Vec<String>> {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .map(|(_, args, _)| args.clone())
                .collect()
        }
    }

    #[async_trait]
    impl RemoteExec for RecordingExec {
        async fn exec(
            &self,
            _pod: &PodHandle,
            container: &str,
            _cancel: &CancellationToken,
            stdin: Option<ExecStdin>,
            args: &[&str],
        ) -> anyhow::Result<ExecOutput> {
            let mut input = Vec::new();
            if let Some(mut stdin) = stdin {
                stdin.read_to_end(&mut input).await?;
            }
            let status = if args[0] == "tar" { self.tar_status } else { Some(0) };
            self.calls.lock().unwrap().push((
                container.to_string(),
                args.iter().map(|s| s.to_string()).collect(),
                input,
            ));
            Ok(ExecOutput {
                status,
                output: b"tar: unexpected end of archive\n".to_vec(),
            })
        }
    }

    struct FixedProducer {
        payload: &'static [u8],
        fail: bool,
    }

    impl ArchiveProducer for FixedProducer {
        fn write_archive(
            &self,
            sink: &mut dyn Write,
            _workspace: &Path,
            _artifact: &DockerArtifact,
        ) -> anyhow::Result<()> {
            sink.write_all(self.payload)?;
            if self.fail {
                anyhow::bail!("disk vanished");
            }
            Ok(())
        }
    }

    fn uploader(
        exec: Arc<RecordingExec>,
        producer: FixedProducer,
        init_fails: bool,
    ) -> ContextUploader {
        ContextUploader::new(
            Arc::new(ReadyLifecycle { fail: init_fails }),
            exec,
            Arc::new(producer),
            StagingArea::default(),
        )
    }

    fn pod() -> PodHandle {
        PodHandle::new("kaniko-1", "default")
    }

    #[tokio::test]
    async fn test_upload_streams_archive_then_writes_marker() {
        let exec = Arc::new(RecordingExec::succeeding());
        let uploader = uploader(
            Arc::clone(&exec),
            FixedProducer {
                payload: b"archive-bytes",
                fail: false,
            },
            false,
        );

        uploader
            .upload(&pod(), &CancellationToken::new(), Path::new("."), &DockerArtifact::default())
            .await
            .unwrap();

        let calls = exec.calls.lock().unwrap();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].0, "kaniko-init-container");
        assert_eq!(calls[0].1, vec!["tar", "-xf", "-", "-C", "/kaniko/buildcontext"]);
        assert_eq!(calls[0].2, b"archive-bytes");
        assert_eq!(calls[1].1, vec!["touch", "/tmp/complete"]);
    }

    #[tokio::test]
    async fn test_producer_failure_is_observed_and_no_marker() {
        let exec = Arc::new(RecordingExec::succeeding());
        let uploader = uploader(
            Arc::clone(&exec),
            FixedProducer {
                payload: b"half",
                fail: true,
            },
            false,
        );

        let err = uploader
            .upload(&pod(), &CancellationToken::new(), Path::new("."), &DockerArtifact::default())
            .await
            .unwrap_err();

        match err {
            BuildError::ContextUploadFailed { message, source } => {
                assert_eq!(message, "creating build context");
                assert!(format!("{source:#}").contains("disk vanished"), "{source:#}");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        // 読み出し側がエラーを受け取ったため tar の記録すらない
        assert!(exec.commands().is_empty());
    }

    #[tokio::test]
    async fn test_remote_extract_failure_reports_output() {
        let exec = Arc::new(RecordingExec {
            tar_status: Some(2),
            ..Default::default()
        });
        let uploader = uploader(
            Arc::clone(&exec),
            FixedProducer {
                payload: b"bytes",
                fail: false,
            },
            false,
        );

        let err = uploader
            .upload(&pod(), &CancellationToken::new(), Path::new("."), &DockerArtifact::default())
            .await
            .unwrap_err();

        match err {
            BuildError::ContextUploadFailed { message, .. } => {
                assert!(message.contains("unexpected end of archive"), "{message}");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(exec.commands().len(), 1);
    }

    #[tokio::test]
    async fn test_init_wait_failure() {
        let exec = Arc::new(RecordingExec::succeeding());
        let uploader = uploader(
            Arc::clone(&exec),
            FixedProducer {
                payload: b"",
                fail: false,
            },
            true,
        );

        let err = uploader
            .upload(&pod(), &CancellationToken::new(), Path::new("."), &DockerArtifact::default())
            .await
            .unwrap_err();
        assert!(matches!(err, BuildError::InitializationTimeout { .. }));
        assert!(exec.commands().is_empty());
    }

    #[test]
    fn test_gzip_extract_command() {
        let staging = StagingArea {
            compression: Compression::Gzip,
            ..Default::default()
        };
        assert_eq!(staging.extract_command(), vec!["tar", "-xzf", "-", "-C", "/kaniko/buildcontext"]);
    }

    #[tokio::test]
    async fn test_cancelled_upload_reports_cancelled() {
        let exec = Arc::new(RecordingExec::succeeding());
        let uploader = uploader(
            Arc::clone(&exec),
            FixedProducer {
                payload: b"",
                fail: false,
            },
            true,
        );
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = uploader
            .upload(&pod(), &cancel, Path::new("."), &DockerArtifact::default())
            .await
            .unwrap_err();
        assert!(matches!(err, BuildError::Cancelled), "{err:?}");
    }
}
