use crate::error::{BuildError, BuildResult};
use crate::remote::ArchiveProducer;
use flate2::Compression as GzLevel;
use flate2::write::GzEncoder;
use glob::Pattern;
use podflow_core::{Compression, DockerArtifact};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tar::Builder;

const DOCKERIGNORE: &str = ".dockerignore";

/// ビルドコンテキストのtarアーカイブを作成する
#[derive(Debug, Clone, Default)]
pub struct ContextBuilder {
    compression: Compression,
}

impl ContextBuilder {
    pub fn new(compression: Compression) -> Self {
        Self { compression }
    }

    /// ワークスペースをtarアーカイブとして書き出す
    ///
    /// .dockerignore に一致するパスは除外します。Dockerfile と
    /// .dockerignore 自身は常に含めます。
    pub fn write_context<W: Write>(
        &self,
        sink: W,
        context_path: &Path,
        artifact: &DockerArtifact,
    ) -> BuildResult<u64> {
        tracing::debug!("Creating build context from: {}", context_path.display());

        if !context_path.is_dir() {
            return Err(BuildError::ContextNotFound(context_path.to_path_buf()));
        }

        let dockerfile = context_path.join(&artifact.dockerfile);
        if !dockerfile.is_file() {
            return Err(BuildError::DockerfileNotFound(dockerfile));
        }

        warn_sensitive_build_args(artifact);

        let ignore = IgnoreRules::load(context_path)?;
        let always_keep = [artifact.dockerfile.clone(), PathBuf::from(DOCKERIGNORE)];

        let mut counter = CountingWriter::new(sink);
        match self.compression {
            Compression::None => {
                let mut tar = Builder::new(&mut counter);
                append_tree(&mut tar, context_path, Path::new(""), &ignore, &always_keep)?;
                tar.finish()?;
            }
            Compression::Gzip => {
                let encoder = GzEncoder::new(&mut counter, GzLevel::default());
                let mut tar = Builder::new(encoder);
                append_tree(&mut tar, context_path, Path::new(""), &ignore, &always_keep)?;
                tar.into_inner()?.finish()?;
            }
        }

        let written = counter.written;
        tracing::debug!("Build context created: {} bytes", written);
        Self::check_context_size(written);

        Ok(written)
    }

    /// コンテキストサイズのチェックと警告
    fn check_context_size(size: u64) {
        const MAX_CONTEXT_SIZE: u64 = 500 * 1024 * 1024; // 500MB

        if size > MAX_CONTEXT_SIZE {
            tracing::warn!(
                "警告: ビルドコンテキストが大きすぎます（{}MB）\n\
                 .dockerignoreファイルで不要なファイルを除外することを推奨します。",
                size / 1024 / 1024
            );
        }
    }
}

impl ArchiveProducer for ContextBuilder {
    fn write_archive(
        &self,
        sink: &mut dyn Write,
        workspace: &Path,
        artifact: &DockerArtifact,
    ) -> anyhow::Result<()> {
        self.write_context(sink, workspace, artifact)?;
        Ok(())
    }
}

/// ディレクトリを再帰的にアーカイブへ追加
fn append_tree<W: Write>(
    tar: &mut Builder<W>,
    root: &Path,
    relative: &Path,
    ignore: &IgnoreRules,
    always_keep: &[PathBuf],
) -> io::Result<()> {
    let dir = root.join(relative);

    // 順序を固定してアーカイブを再現可能にする
    let mut entries = fs::read_dir(&dir)?.collect::<io::Result<Vec<_>>>()?;
    entries.sort_by_key(|e| e.file_name());

    for entry in entries {
        let rel = relative.join(entry.file_name());
        let file_type = entry.file_type()?;

        if ignore.is_ignored(&rel) && !always_keep.contains(&rel) {
            tracing::trace!(path = %rel.display(), "Skipping ignored path");
            continue;
        }

        if file_type.is_dir() {
            tar.append_dir(&rel, entry.path())?;
            append_tree(tar, root, &rel, ignore, always_keep)?;
        } else {
            tar.append_path_with_name(entry.path(), &rel)?;
        }
    }

    Ok(())
}

/// .dockerignore のルール
#[derive(Debug, Default)]
struct IgnoreRules {
    /// (パターン, 除外の取り消しか)
    rules: Vec<(Pattern, bool)>,
}

impl IgnoreRules {
    fn load(context_path: &Path) -> io::Result<Self> {
        let path = context_path.join(DOCKERIGNORE);
        if !path.exists() {
            return Ok(Self::default());
        }
        Ok(Self::parse(&fs::read_to_string(path)?))
    }

    fn parse(content: &str) -> Self {
        let mut rules = Vec::new();

        for line in content.lines() {
            let line = line.trim();
            // 空行とコメント行をスキップ
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let (line, negated) = match line.strip_prefix('!') {
                Some(rest) => (rest.trim(), true),
                None => (line, false),
            };
            let line = line.trim_start_matches("./").trim_matches('/');

            match Pattern::new(line) {
                Ok(pattern) => rules.push((pattern, negated)),
                Err(e) => tracing::warn!(pattern = %line, error = %e, "Invalid .dockerignore pattern"),
            }
        }

        Self { rules }
    }

    /// 後に書かれたルールが優先。親ディレクトリが一致した場合も除外扱い
    fn is_ignored(&self, relative: &Path) -> bool {
        let path = relative.to_string_lossy().replace('\\', "/");
        let mut ignored = false;

        for (pattern, negated) in &self.rules {
            let matches = pattern.matches(&path)
                || path
                    .match_indices('/')
                    .any(|(idx, _)| pattern.matches(&path[..idx]));
            if matches {
                ignored = !negated;
            }
        }

        ignored
    }
}

/// 書き込んだバイト数を数える
struct CountingWriter<W> {
    inner: W,
    written: u64,
}

impl<W> CountingWriter<W> {
    fn new(inner: W) -> Self {
        Self { inner, written: 0 }
    }
}

impl<W: Write> Write for CountingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// ビルド引数の検証（機密情報の警告）
fn warn_sensitive_build_args(artifact: &DockerArtifact) {
    const SENSITIVE_PATTERNS: [&str; 5] = ["password", "token", "secret", "api_key", "private_key"];

    for key in artifact.build_args.keys() {
        let key_lower = key.to_lowercase();
        if SENSITIVE_PATTERNS.iter().any(|p| key_lower.contains(p)) {
            tracing::warn!(
                "警告: ビルド引数 '{}' は機密情報を含む可能性があります。\n\
                 ビルド引数はイメージ履歴に記録されます。",
                key
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use tempfile::tempdir;

    fn artifact() -> DockerArtifact {
        DockerArtifact {
            dockerfile: PathBuf::from("Dockerfile"),
            ..Default::default()
        }
    }

    fn entry_names(archive: &[u8]) -> BTreeSet<String> {
        let mut tar = tar::Archive::new(archive);
        tar.entries()
            .unwrap()
            .map(|e| {
                e.unwrap()
                    .path()
                    .unwrap()
                    .to_string_lossy()
                    .trim_end_matches('/')
                    .to_string()
            })
            .collect()
    }

    #[test]
    fn test_create_context() {
        let temp_dir = tempdir().unwrap();

        // テスト用のファイル構造を作成
        fs::write(temp_dir.path().join("file1.txt"), "content1").unwrap();
        let subdir = temp_dir.path().join("subdir");
        fs::create_dir(&subdir).unwrap();
        fs::write(subdir.join("file3.txt"), "content3").unwrap();
        fs::write(temp_dir.path().join("Dockerfile"), "FROM alpine\nRUN echo test").unwrap();

        let mut archive = Vec::new();
        let written = ContextBuilder::default()
            .write_context(&mut archive, temp_dir.path(), &artifact())
            .unwrap();
        assert_eq!(written, archive.len() as u64);

        let names = entry_names(&archive);
        assert!(names.contains("Dockerfile"));
        assert!(names.contains("file1.txt"));
        assert!(names.contains("subdir/file3.txt"));

        // tarアーカイブとして展開できるか確認
        let extract_dir = tempdir().unwrap();
        tar::Archive::new(&archive[..])
            .unpack(extract_dir.path())
            .unwrap();
        assert_eq!(
            fs::read_to_string(extract_dir.path().join("subdir/file3.txt")).unwrap(),
            "content3"
        );
    }

    #[test]
    fn test_create_context_gzip() {
        let temp_dir = tempdir().unwrap();
        fs::write(temp_dir.path().join("Dockerfile"), "FROM alpine").unwrap();

        let mut archive = Vec::new();
        ContextBuilder::new(Compression::Gzip)
            .write_context(&mut archive, temp_dir.path(), &artifact())
            .unwrap();

        let decoder = flate2::read::GzDecoder::new(&archive[..]);
        let mut tar = tar::Archive::new(decoder);
        let extract_dir = tempdir().unwrap();
        tar.unpack(extract_dir.path()).unwrap();
        assert!(extract_dir.path().join("Dockerfile").exists());
    }

    #[test]
    fn test_dockerignore_is_respected() {
        let temp_dir = tempdir().unwrap();
        let root = temp_dir.path();
        fs::write(root.join("Dockerfile"), "FROM alpine").unwrap();
        fs::write(root.join(".dockerignore"), "# comment\ntarget\n*.log\n!keep.log\nDockerfile\n").unwrap();
        fs::write(root.join("app.log"), "noise").unwrap();
        fs::write(root.join("keep.log"), "kept").unwrap();
        fs::write(root.join("main.rs"), "fn main() {}").unwrap();
        fs::create_dir_all(root.join("target/debug")).unwrap();
        fs::write(root.join("target/debug/app"), "binary").unwrap();

        let mut archive = Vec::new();
        ContextBuilder::default()
            .write_context(&mut archive, root, &artifact())
            .unwrap();

        let names = entry_names(&archive);
        assert!(names.contains("main.rs"));
        assert!(names.contains("keep.log"));
        assert!(names.contains("Dockerfile"));
        assert!(names.contains(".dockerignore"));
        assert!(!names.contains("app.log"));
        assert!(!names.iter().any(|n| n.starts_with("target")));
    }

    #[test]
    fn test_missing_dockerfile() {
        let temp_dir = tempdir().unwrap();
        let result = ContextBuilder::default().write_context(Vec::new(), temp_dir.path(), &artifact());
        assert!(matches!(result, Err(BuildError::DockerfileNotFound(_))));
    }

    #[test]
    fn test_missing_context_dir() {
        let temp_dir = tempdir().unwrap();
        let missing = temp_dir.path().join("nope");
        let result = ContextBuilder::default().write_context(Vec::new(), &missing, &artifact());
        assert!(matches!(result, Err(BuildError::ContextNotFound(_))));
    }

    #[test]
    fn test_ignore_rules_parent_match() {
        let rules = IgnoreRules::parse("node_modules\n");
        assert!(rules.is_ignored(Path::new("node_modules")));
        assert!(rules.is_ignored(Path::new("node_modules/pkg/index.js")));
        assert!(!rules.is_ignored(Path::new("src/index.js")));
    }
}
