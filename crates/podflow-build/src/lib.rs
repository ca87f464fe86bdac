//! podflow のリモートビルド機能
//!
//! 単発のビルドPodでコンテナイメージをビルドします。
//! ビルドコンテキストの作成と転送、ビルドPodのライフサイクル管理、
//! ログの追跡、公開されたイメージのダイジェスト解決を提供します。
//!
//! クラスタとの通信は [`remote`] のトレイトを介して行います。

pub mod auth;
pub mod builder;
pub mod context;
pub mod error;
pub mod guard;
pub mod pipe;
pub mod registry;
pub mod remote;
pub mod transfer;

pub use auth::{Credentials, RegistryAuth, extract_registry};
pub use builder::{BuildOptions, Collaborators, PodBuilder};
pub use context::ContextBuilder;
pub use error::{BuildError, BuildResult};
pub use guard::PodGuard;
pub use registry::RegistryDigestResolver;
pub use remote::{
    ArchiveProducer, DigestResolver, ExecOutput, ExecStdin, LogStreamer, ManifestFactory,
    PodHandle, PodLifecycle, PodManifest, RemoteExec,
};
pub use transfer::{ContextUploader, StagingArea};
