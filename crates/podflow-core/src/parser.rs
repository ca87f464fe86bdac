//! KDLパーサー
//!
//! podflow.kdl をパースして [`Project`] を生成します。

use crate::env::EnvVar;
use crate::error::{CoreError, Result};
use crate::model::{BuildArtifact, ClusterConfig, Project};
use kdl::{KdlDocument, KdlNode};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// KDLファイルをパースしてProjectを生成
pub fn parse_kdl_file<P: AsRef<Path>>(path: P) -> Result<Project> {
    let content = fs::read_to_string(path.as_ref())?;
    let name = path
        .as_ref()
        .parent()
        .and_then(|p| p.file_name())
        .and_then(|n| n.to_str())
        .unwrap_or("unnamed")
        .to_string();
    parse_kdl_string(&content, name)
}

/// KDL文字列をパース
pub fn parse_kdl_string(content: &str, default_name: String) -> Result<Project> {
    let doc: KdlDocument = content.parse()?;

    let mut project = Project {
        name: default_name,
        ..Default::default()
    };

    for node in doc.nodes() {
        match node.name().value() {
            "project" => {
                if let Some(name) = first_string(node) {
                    project.name = name;
                }
            }
            "cluster" => {
                project.cluster = parse_cluster(node)?;
            }
            "artifact" => {
                project.artifact = parse_artifact(node)?;
            }
            other => {
                tracing::warn!(node = %other, "Unknown top-level node in podflow.kdl");
            }
        }
    }

    Ok(project)
}

/// cluster ノードをパース
fn parse_cluster(node: &KdlNode) -> Result<ClusterConfig> {
    let mut cluster = ClusterConfig::default();

    let Some(children) = node.children() else {
        return Ok(cluster);
    };

    for child in children.nodes() {
        match child.name().value() {
            "namespace" => cluster.namespace = required_string(child)?,
            "kubectl" => cluster.kubectl = required_string(child)?,
            "context" => cluster.context = Some(required_string(child)?),
            "timeout" => cluster.timeout = required_seconds(child)?,
            "init-timeout" => cluster.init_timeout = required_seconds(child)?,
            "poll-interval" => {
                let millis = required_integer(child)?;
                cluster.poll_interval = Duration::from_millis(millis);
            }
            "init-container" => cluster.init_container = required_string(child)?,
            "mount-path" => cluster.mount_path = required_string(child)?,
            "marker" => cluster.marker_path = required_string(child)?,
            "compression" => cluster.compression = required_string(child)?.parse()?,
            "cleanup" => cluster.cleanup = required_string(child)?.parse()?,
            "insecure-registries" => {
                cluster.insecure_registries.extend(all_strings(child));
            }
            other => {
                tracing::warn!(node = %other, "Unknown node in cluster block");
            }
        }
    }

    Ok(cluster)
}

/// artifact ノードをパース
fn parse_artifact(node: &KdlNode) -> Result<BuildArtifact> {
    let mut artifact = BuildArtifact::default();

    let Some(children) = node.children() else {
        return Ok(artifact);
    };

    for child in children.nodes() {
        match child.name().value() {
            "image" => artifact.image = Some(required_string(child)?),
            "dockerfile" => artifact.dockerfile = PathBuf::from(required_string(child)?),
            "manifest" => artifact.manifest = Some(PathBuf::from(required_string(child)?)),
            "build_args" => {
                if let Some(args) = child.children() {
                    for arg in args.nodes() {
                        let key = arg.name().value().to_string();
                        let value = first_string(arg).unwrap_or_default();
                        artifact.build_args.insert(key, value);
                    }
                }
            }
            // env と environment 両方をサポート
            "env" | "environment" => {
                if let Some(envs) = child.children() {
                    for env in envs.nodes() {
                        let name = env.name().value().to_string();
                        let value = first_string(env).unwrap_or_default();
                        artifact.env.push(EnvVar::new(name, value));
                    }
                }
            }
            other => {
                tracing::warn!(node = %other, "Unknown node in artifact block");
            }
        }
    }

    Ok(artifact)
}

fn first_string(node: &KdlNode) -> Option<String> {
    node.entries()
        .first()
        .and_then(|e| e.value().as_string())
        .map(|s| s.to_string())
}

fn all_strings(node: &KdlNode) -> Vec<String> {
    node.entries()
        .iter()
        .filter_map(|e| e.value().as_string().map(|s| s.to_string()))
        .collect()
}

fn required_string(node: &KdlNode) -> Result<String> {
    first_string(node).ok_or_else(|| {
        CoreError::InvalidConfig(format!("{} には文字列を指定してください", node.name().value()))
    })
}

fn required_integer(node: &KdlNode) -> Result<u64> {
    node.entries()
        .first()
        .and_then(|e| e.value().as_integer())
        .and_then(|n| u64::try_from(n).ok())
        .ok_or_else(|| {
            CoreError::InvalidConfig(format!(
                "{} には0以上の整数を指定してください",
                node.name().value()
            ))
        })
}

fn required_seconds(node: &KdlNode) -> Result<Duration> {
    required_integer(node).map(Duration::from_secs)
}
