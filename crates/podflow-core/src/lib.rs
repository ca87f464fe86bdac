//! podflow core
//!
//! イメージ参照のパース、ビルド時環境変数の解決、テンプレート展開、
//! および podflow.kdl の設定モデルを提供します。

pub mod env;
pub mod error;
pub mod image;
pub mod model;
pub mod parser;
pub mod template;

pub use env::{EnvVar, evaluate_env, generate_env_from_image};
pub use error::{CoreError, Result};
pub use image::ImageReference;
pub use model::{
    BuildArtifact, CleanupPolicy, ClusterConfig, Compression, DockerArtifact, Project,
};
pub use parser::{parse_kdl_file, parse_kdl_string};
pub use template::{TemplateProcessor, expand_env_template};
