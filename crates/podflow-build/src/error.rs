use podflow_core::CoreError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("error processing generated env variables from image uri: {0}")]
    InvalidReference(#[source] CoreError),

    #[error("unable to evaluate env variables: {0}")]
    Template(#[source] CoreError),

    #[error("creating build pod: {0:#}")]
    PodCreationFailed(#[source] anyhow::Error),

    #[error("waiting for pod {pod} to initialize: {source:#}")]
    InitializationTimeout {
        pod: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("copying sources: {message}")]
    ContextUploadFailed {
        message: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("build pod {pod} did not succeed: {source:#}")]
    BuildTimeoutOrFailed {
        pod: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("resolving digest of {tag}: {source:#}")]
    DigestResolutionFailed {
        tag: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("build cancelled")]
    Cancelled,

    #[error("Dockerfile not found: {0}")]
    DockerfileNotFound(PathBuf),

    #[error("Build context directory not found: {0}")]
    ContextNotFound(PathBuf),

    #[error("Registry auth failed for {registry}: {message}")]
    AuthFailed { registry: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BuildError {
    /// ユーザー向けの分かりやすいエラーメッセージ
    pub fn user_message(&self) -> String {
        match self {
            BuildError::InvalidReference(_) => {
                format!(
                    "{}\n\
                     \n\
                     イメージは [repository/]name[:tag] 形式で指定してください。\n\
                     例: localhost:5000/myapp:dev",
                    self
                )
            }
            BuildError::InitializationTimeout { pod, .. } => {
                format!(
                    "{}\n\
                     \n\
                     解決方法:\n\
                     1. kubectl describe pod {} でイベントを確認してください\n\
                     2. マニフェストの init コンテナ名が設定と一致しているか確認してください",
                    self, pod
                )
            }
            BuildError::BuildTimeoutOrFailed { .. } => {
                format!(
                    "{}\n\
                     \n\
                     上に表示されたビルドログを確認してください。\n\
                     時間がかかるビルドは cluster の timeout を延ばしてください。",
                    self
                )
            }
            BuildError::DockerfileNotFound(path) => {
                format!(
                    "Dockerfileが見つかりません: {}\n\
                     \n\
                     podflow.kdl の artifact で明示的にパスを指定してください:\n\
                        dockerfile \"path/to/Dockerfile\"",
                    path.display()
                )
            }
            _ => format!("{}", self),
        }
    }
}

pub type BuildResult<T> = std::result::Result<T, BuildError>;
pub type Result<T> = BuildResult<T>;
