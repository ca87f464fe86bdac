pub mod error;

pub use error::*;

use podflow_core::Project;
use std::path::{Path, PathBuf};

/// プロジェクトファイルの候補（優先順）
const PROJECT_FILE_CANDIDATES: [&str; 3] = ["podflow.local.kdl", "podflow.kdl", ".podflow.kdl"];

/// podflow.kdl を探す
///
/// 以下の優先順位で設定ファイルを検索:
/// 1. 環境変数 PODFLOW_CONFIG (直接パス指定)
/// 2. カレントディレクトリ: podflow.local.kdl, podflow.kdl, .podflow.kdl
/// 3. ./.podflow/ ディレクトリ内: 同様の順序
/// 4. ~/.config/podflow/podflow.kdl (グローバル設定)
pub fn find_project_file() -> Result<PathBuf> {
    // 1. 環境変数で直接指定
    if let Ok(config_path) = std::env::var("PODFLOW_CONFIG") {
        let path = PathBuf::from(config_path);
        if path.exists() {
            return Ok(path);
        }
        tracing::warn!(path = %path.display(), "PODFLOW_CONFIG points to a missing file");
    }

    let current_dir = std::env::current_dir()?;

    // 2. カレントディレクトリで検索
    if let Some(path) = find_in_dir(&current_dir) {
        return Ok(path);
    }

    // 3. ./.podflow/ ディレクトリで検索
    let podflow_dir = current_dir.join(".podflow");
    if podflow_dir.is_dir()
        && let Some(path) = find_in_dir(&podflow_dir)
    {
        return Ok(path);
    }

    // 4. グローバル設定ファイル
    if let Some(config_dir) = dirs::config_dir() {
        let global_config = config_dir.join("podflow").join("podflow.kdl");
        if global_config.exists() {
            return Ok(global_config);
        }
    }

    Err(ConfigError::ProjectFileNotFound)
}

fn find_in_dir(dir: &Path) -> Option<PathBuf> {
    PROJECT_FILE_CANDIDATES
        .iter()
        .map(|filename| dir.join(filename))
        .find(|path| path.exists())
}

/// プロジェクト設定を読み込む
pub fn load_project() -> Result<(Project, PathBuf)> {
    let path = find_project_file()?;
    tracing::debug!(path = %path.display(), "Loading project file");
    let project = podflow_core::parse_kdl_file(&path)?;
    Ok((project, path))
}

/// プロジェクト設定を読み込む（見つからなければデフォルト）
pub fn load_project_or_default() -> Result<(Project, Option<PathBuf>)> {
    match load_project() {
        Ok((project, path)) => Ok((project, Some(path))),
        Err(ConfigError::ProjectFileNotFound) => {
            tracing::debug!("No project file found, using defaults");
            Ok((Project::default(), None))
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::fs;

    /// カレントディレクトリと設定ディレクトリを一時ディレクトリに切り替えて実行
    fn in_isolated_dir<F: FnOnce(&Path)>(f: F) {
        let temp_dir = tempfile::tempdir().unwrap();
        let xdg = tempfile::tempdir().unwrap();
        let original_dir = std::env::current_dir().unwrap();

        std::env::set_current_dir(temp_dir.path()).unwrap();
        temp_env::with_vars(
            [
                ("XDG_CONFIG_HOME", Some(xdg.path().as_os_str())),
                ("PODFLOW_CONFIG", None),
            ],
            || f(temp_dir.path()),
        );
        std::env::set_current_dir(original_dir).unwrap();
    }

    #[test]
    #[serial]
    fn test_find_project_file_in_current_dir() {
        in_isolated_dir(|dir| {
            fs::write(dir.join("podflow.kdl"), "// test").unwrap();

            let result = find_project_file().unwrap();
            assert!(result.ends_with("podflow.kdl"));
        });
    }

    #[test]
    #[serial]
    fn test_find_project_file_local_priority() {
        in_isolated_dir(|dir| {
            fs::write(dir.join("podflow.kdl"), "// shared").unwrap();
            fs::write(dir.join("podflow.local.kdl"), "// local").unwrap();

            let result = find_project_file().unwrap();
            assert!(result.ends_with("podflow.local.kdl"));
        });
    }

    #[test]
    #[serial]
    fn test_find_project_file_in_podflow_dir() {
        in_isolated_dir(|dir| {
            let podflow_dir = dir.join(".podflow");
            fs::create_dir(&podflow_dir).unwrap();
            fs::write(podflow_dir.join("podflow.kdl"), "// nested").unwrap();

            let result = find_project_file().unwrap();
            assert!(result.ends_with(".podflow/podflow.kdl"));
        });
    }

    #[test]
    #[serial]
    fn test_find_project_file_env_var() {
        let temp_dir = tempfile::tempdir().unwrap();
        let config_path = temp_dir.path().join("custom.kdl");
        fs::write(&config_path, "// custom").unwrap();

        temp_env::with_var("PODFLOW_CONFIG", Some(config_path.as_os_str()), || {
            let result = find_project_file().unwrap();
            assert_eq!(result, config_path);
        });
    }

    #[test]
    #[serial]
    fn test_find_project_file_not_found() {
        in_isolated_dir(|_| {
            let result = find_project_file();
            assert!(matches!(result, Err(ConfigError::ProjectFileNotFound)));
        });
    }

    #[test]
    #[serial]
    fn test_load_project_or_default() {
        in_isolated_dir(|dir| {
            let (project, path) = load_project_or_default().unwrap();
            assert!(path.is_none());
            assert_eq!(project.cluster.namespace, "default");

            fs::write(
                dir.join("podflow.kdl"),
                "project \"demo\"\ncluster {\n    namespace \"builds\"\n}\n",
            )
            .unwrap();

            let (project, path) = load_project_or_default().unwrap();
            assert!(path.is_some());
            assert_eq!(project.name, "demo");
            assert_eq!(project.cluster.namespace, "builds");
        });
    }

    #[test]
    #[serial]
    fn test_load_project_reports_parse_error() {
        in_isolated_dir(|dir| {
            fs::write(dir.join("podflow.kdl"), "cluster {\n    cleanup \"never\"\n}\n").unwrap();

            let result = load_project_or_default();
            assert!(matches!(result, Err(ConfigError::Core(_))));
        });
    }
}
