//! リモートクラスタとの境界
//!
//! ビルドPodの作成・削除・状態待ち、Pod内でのコマンド実行、ログ取得、
//! ビルドコンテキストの作成、ダイジェスト解決をトレイトとして定義します。
//! 実装は podflow-kube（kubectl）や registry モジュールが提供します。

use anyhow::Result;
use async_trait::async_trait;
use podflow_core::{BuildArtifact, DockerArtifact, EnvVar};
use std::fmt;
use std::io::Write;
use std::path::Path;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::sync::CancellationToken;

/// ビルドPodのハンドル
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PodHandle {
    pub name: String,
    pub namespace: String,
}

impl PodHandle {
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
        }
    }
}

impl fmt::Display for PodHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Podマニフェスト（JSON表現）
#[derive(Debug, Clone, PartialEq)]
pub struct PodManifest(pub serde_json::Value);

/// Pod内コマンドの標準入力
pub type ExecStdin = Box<dyn AsyncRead + Send + Unpin>;

/// Pod内コマンドの実行結果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    /// 終了コード（シグナル終了時は None）
    pub status: Option<i32>,
    /// stdout と stderr を合わせた出力
    pub output: Vec<u8>,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }

    pub fn output_lossy(&self) -> String {
        String::from_utf8_lossy(&self.output).trim().to_string()
    }
}

/// ビルドPodのライフサイクル操作
#[async_trait]
pub trait PodLifecycle: Send + Sync {
    async fn create(&self, manifest: &PodManifest) -> Result<PodHandle>;

    /// 猶予期間0で削除
    async fn delete(&self, pod: &PodHandle) -> Result<()>;

    /// init フェーズ（ステージング用 init コンテナの起動）を待つ
    async fn wait_initialized(&self, pod: &PodHandle, cancel: &CancellationToken) -> Result<()>;

    /// Succeeded フェーズを待つ
    async fn wait_succeeded(
        &self,
        pod: &PodHandle,
        cancel: &CancellationToken,
        timeout: Duration,
    ) -> Result<()>;
}

/// Pod内でのコマンド実行
///
/// 終了コードが0以外でも `Ok` を返します。`Err` は実行自体の失敗
/// （stdin の読み出し失敗、プロセス起動失敗、キャンセル）を表します。
#[async_trait]
pub trait RemoteExec: Send + Sync {
    async fn exec(
        &self,
        pod: &PodHandle,
        container: &str,
        cancel: &CancellationToken,
        stdin: Option<ExecStdin>,
        args: &[&str],
    ) -> Result<ExecOutput>;
}

/// Podログの追跡
///
/// `cancel` が発火したら、届いている分を書き出してから返ること。
#[async_trait]
pub trait LogStreamer: Send + Sync {
    async fn follow(
        &self,
        pod: &PodHandle,
        cancel: &CancellationToken,
        sink: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> Result<()>;
}

/// ビルドコンテキストのアーカイブ作成
///
/// ブロッキングスレッド上で呼ばれます。
pub trait ArchiveProducer: Send + Sync + 'static {
    fn write_archive(
        &self,
        sink: &mut dyn Write,
        workspace: &Path,
        artifact: &DockerArtifact,
    ) -> Result<()>;
}

/// 公開済みタグのダイジェスト解決
#[async_trait]
pub trait DigestResolver: Send + Sync {
    async fn digest_of(&self, tag: &str) -> Result<String>;
}

/// ビルドPodのマニフェスト生成
pub trait ManifestFactory: Send + Sync {
    fn manifest(&self, artifact: &BuildArtifact, env: &[EnvVar], tag: &str)
    -> Result<PodManifest>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pod_handle_display() {
        let pod = PodHandle::new("kaniko-abcde", "builds");
        assert_eq!(pod.to_string(), "builds/kaniko-abcde");
    }

    #[test]
    fn test_exec_output() {
        let ok = ExecOutput {
            status: Some(0),
            output: b"done\n".to_vec(),
        };
        assert!(ok.success());
        assert_eq!(ok.output_lossy(), "done");

        let killed = ExecOutput {
            status: None,
            output: Vec::new(),
        };
        assert!(!killed.success());
    }
}
