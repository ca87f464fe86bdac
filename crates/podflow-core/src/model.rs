//! podflow の設定モデル

use crate::env::EnvVar;
use crate::error::CoreError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// プロジェクト設定（podflow.kdl 全体）
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Project {
    pub name: String,
    pub cluster: ClusterConfig,
    pub artifact: BuildArtifact,
}

/// ビルドPodを起動するクラスタの設定
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterConfig {
    pub namespace: String,
    /// kubectl 実行ファイル
    pub kubectl: String,
    /// kubeconfig のコンテキスト（未指定なら current-context）
    pub context: Option<String>,
    /// ビルド完了待ちのタイムアウト
    pub timeout: Duration,
    /// init コンテナ起動待ちのタイムアウト
    pub init_timeout: Duration,
    /// Pod 状態のポーリング間隔
    pub poll_interval: Duration,
    /// ビルドコンテキストを受け取る init コンテナ名
    pub init_container: String,
    /// init コンテナ内の emptyDir マウントパス
    pub mount_path: String,
    /// 受信完了を知らせるマーカーファイル
    pub marker_path: String,
    pub compression: Compression,
    pub cleanup: CleanupPolicy,
    /// HTTP でアクセスするレジストリ
    pub insecure_registries: Vec<String>,
}

pub const DEFAULT_NAMESPACE: &str = "default";
pub const DEFAULT_INIT_CONTAINER: &str = "kaniko-init-container";
pub const DEFAULT_MOUNT_PATH: &str = "/kaniko/buildcontext";
pub const DEFAULT_MARKER_PATH: &str = "/tmp/complete";

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.to_string(),
            kubectl: "kubectl".to_string(),
            context: None,
            timeout: Duration::from_secs(20 * 60),
            init_timeout: Duration::from_secs(10 * 60),
            poll_interval: Duration::from_secs(1),
            init_container: DEFAULT_INIT_CONTAINER.to_string(),
            mount_path: DEFAULT_MOUNT_PATH.to_string(),
            marker_path: DEFAULT_MARKER_PATH.to_string(),
            compression: Compression::None,
            cleanup: CleanupPolicy::Exit,
            insecure_registries: Vec::new(),
        }
    }
}

/// ビルドPodの削除に失敗した場合の扱い
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CleanupPolicy {
    /// エラーログを出してプロセスを終了する
    #[default]
    Exit,
    /// エラーログのみ
    Log,
}

impl FromStr for CleanupPolicy {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "exit" => Ok(Self::Exit),
            "log" => Ok(Self::Log),
            other => Err(CoreError::InvalidConfig(format!(
                "cleanup は exit または log を指定してください: {other}"
            ))),
        }
    }
}

/// ビルドコンテキストの圧縮方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    #[default]
    None,
    Gzip,
}

impl FromStr for Compression {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(Self::None),
            "gzip" => Ok(Self::Gzip),
            other => Err(CoreError::InvalidConfig(format!(
                "compression は none または gzip を指定してください: {other}"
            ))),
        }
    }
}

/// ビルド対象の設定
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildArtifact {
    /// デフォルトのターゲットイメージ
    pub image: Option<String>,
    /// Dockerfileのパス（ワークスペースからの相対パス）
    pub dockerfile: PathBuf,
    /// Podマニフェストのテンプレート
    pub manifest: Option<PathBuf>,
    /// ビルド引数
    #[serde(default)]
    pub build_args: BTreeMap<String, String>,
    /// ビルドPodに渡す環境変数（値はテンプレート展開される）
    #[serde(default)]
    pub env: Vec<EnvVar>,
}

impl Default for BuildArtifact {
    fn default() -> Self {
        Self {
            image: None,
            dockerfile: PathBuf::from("Dockerfile"),
            manifest: None,
            build_args: BTreeMap::new(),
            env: Vec::new(),
        }
    }
}

impl BuildArtifact {
    /// コンテキスト作成に必要な部分だけを切り出す
    pub fn docker_artifact(&self) -> DockerArtifact {
        DockerArtifact {
            build_args: self.build_args.clone(),
            dockerfile: self.dockerfile.clone(),
        }
    }
}

/// ビルドコンテキスト作成用の絞り込まれた設定
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DockerArtifact {
    pub build_args: BTreeMap<String, String>,
    pub dockerfile: PathBuf,
}
