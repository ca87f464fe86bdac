use anyhow::{Context, anyhow};
use colored::Colorize;
use podflow_build::{BuildOptions, Collaborators, ContextBuilder, PodBuilder, RegistryDigestResolver};
use podflow_core::Project;
use podflow_kube::{Kubectl, ManifestTemplate};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(clap::Args, Debug)]
pub struct BuildArgs {
    /// ビルドコンテキストのディレクトリ
    #[arg(default_value = ".")]
    pub workspace: PathBuf,

    /// ビルドするイメージ（例: localhost:5000/myapp:dev）
    #[arg(short, long)]
    pub tag: Option<String>,

    /// Dockerfileのパス（ビルドコンテキストからの相対パス）
    #[arg(short = 'f', long)]
    pub dockerfile: Option<PathBuf>,

    /// ビルドPodのマニフェストテンプレート（省略時はKaniko）
    #[arg(long)]
    pub manifest: Option<PathBuf>,

    /// ビルド引数（KEY=VALUE、複数指定可）
    #[arg(long = "build-arg", value_parser = parse_key_val)]
    pub build_args: Vec<(String, String)>,

    /// ビルドPodを作成する名前空間
    #[arg(short, long, env = "PODFLOW_NAMESPACE")]
    pub namespace: Option<String>,

    /// ビルド完了を待つ秒数
    #[arg(long)]
    pub timeout: Option<u64>,
}

fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("KEY=VALUE 形式で指定してください: {s}"))?;
    if key.is_empty() {
        return Err(format!("キーが空です: {s}"));
    }
    Ok((key.to_string(), value.to_string()))
}

/// コマンドライン引数で設定ファイルの値を上書き
fn apply_overrides(project: &mut Project, args: &BuildArgs) {
    if let Some(dockerfile) = &args.dockerfile {
        project.artifact.dockerfile = dockerfile.clone();
    }
    if let Some(manifest) = &args.manifest {
        project.artifact.manifest = Some(manifest.clone());
    }
    for (key, value) in &args.build_args {
        project
            .artifact
            .build_args
            .insert(key.clone(), value.clone());
    }
    if let Some(namespace) = &args.namespace {
        project.cluster.namespace = namespace.clone();
    }
    if let Some(timeout) = args.timeout {
        project.cluster.timeout = Duration::from_secs(timeout);
    }
}

/// 設定ファイル内の相対パスは設定ファイルのディレクトリ基準で解決
fn resolve_manifest(project: &Project, config_path: Option<&Path>, from_cli: bool) -> Option<PathBuf> {
    let manifest = project.artifact.manifest.as_ref()?;
    if manifest.is_absolute() || from_cli {
        return Some(manifest.clone());
    }
    match config_path.and_then(Path::parent) {
        Some(dir) => Some(dir.join(manifest)),
        None => Some(manifest.clone()),
    }
}

pub async fn handle(args: BuildArgs) -> anyhow::Result<()> {
    let (mut project, config_path) = podflow_config::load_project_or_default()?;
    apply_overrides(&mut project, &args);

    let tag = args
        .tag
        .clone()
        .or_else(|| project.artifact.image.clone())
        .ok_or_else(|| {
            anyhow!("ビルドするイメージを -t で指定するか、podflow.kdl の artifact に image を設定してください")
        })?;

    let cluster = &project.cluster;
    let manifests = match resolve_manifest(&project, config_path.as_deref(), args.manifest.is_some()) {
        Some(path) => ManifestTemplate::from_file(&path, cluster)
            .with_context(|| format!("マニフェストの読み込みに失敗: {}", path.display()))?,
        None => ManifestTemplate::kaniko(cluster),
    };

    let kubectl = Arc::new(Kubectl::from_config(cluster));
    let collaborators = Collaborators {
        lifecycle: kubectl.clone(),
        exec: kubectl.clone(),
        logs: kubectl.clone(),
        producer: Arc::new(ContextBuilder::new(cluster.compression)),
        digests: Arc::new(RegistryDigestResolver::new(
            cluster.insecure_registries.clone(),
        )),
        manifests: Arc::new(manifests),
    };
    let builder = PodBuilder::new(collaborators, BuildOptions::from(cluster));

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("{}", "中断しています。ビルドPodを削除します...".yellow());
            interrupt.cancel();
        }
    });

    eprintln!(
        "{} {} (namespace: {})",
        "🔨 ビルド中:".blue().bold(),
        tag.cyan(),
        kubectl.namespace()
    );

    let mut stdout = tokio::io::stdout();
    match builder
        .build_remotely(&cancel, &mut stdout, &args.workspace, &project.artifact, &tag)
        .await
    {
        Ok(digest) => {
            eprintln!("{}", "✓ ビルド完了".green().bold());
            println!("{}@{}", tag, digest);
            Ok(())
        }
        Err(e) => {
            tracing::debug!(error = ?e, "Build failed");
            eprintln!("{} {}", "✗".red().bold(), e.user_message().red());
            std::process::exit(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args() -> BuildArgs {
        BuildArgs {
            workspace: PathBuf::from("."),
            tag: None,
            dockerfile: None,
            manifest: None,
            build_args: Vec::new(),
            namespace: None,
            timeout: None,
        }
    }

    #[test]
    fn test_parse_key_val() {
        assert_eq!(
            parse_key_val("VERSION=1.0=rc").unwrap(),
            ("VERSION".to_string(), "1.0=rc".to_string())
        );
        assert_eq!(
            parse_key_val("EMPTY=").unwrap(),
            ("EMPTY".to_string(), String::new())
        );
        assert!(parse_key_val("NOVALUE").is_err());
        assert!(parse_key_val("=x").is_err());
    }

    #[test]
    fn test_apply_overrides() {
        let mut project = Project::default();
        project
            .artifact
            .build_args
            .insert("KEEP".to_string(), "1".to_string());

        let args = BuildArgs {
            dockerfile: Some(PathBuf::from("docker/Dockerfile")),
            build_args: vec![("VERSION".to_string(), "2".to_string())],
            namespace: Some("ci".to_string()),
            timeout: Some(90),
            ..args()
        };
        apply_overrides(&mut project, &args);

        assert_eq!(project.artifact.dockerfile, PathBuf::from("docker/Dockerfile"));
        assert_eq!(project.artifact.build_args.len(), 2);
        assert_eq!(project.artifact.build_args["VERSION"], "2");
        assert_eq!(project.cluster.namespace, "ci");
        assert_eq!(project.cluster.timeout, Duration::from_secs(90));
    }

    #[test]
    fn test_resolve_manifest_relative_to_config() {
        let mut project = Project::default();
        assert_eq!(resolve_manifest(&project, None, false), None);

        project.artifact.manifest = Some(PathBuf::from("pod.yaml"));
        let config = PathBuf::from("/work/app/podflow.kdl");
        assert_eq!(
            resolve_manifest(&project, Some(&config), false),
            Some(PathBuf::from("/work/app/pod.yaml"))
        );
        assert_eq!(
            resolve_manifest(&project, Some(&config), true),
            Some(PathBuf::from("pod.yaml"))
        );
    }
}
