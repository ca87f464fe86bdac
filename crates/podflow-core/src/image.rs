//! イメージ参照のパース
//!
//! `[repository/]name[:tag]` 形式の文字列を repository / name / tag に分解します。
//! repository にはポート付きのホスト (`host:5000/repo`) を含められます。

use crate::error::{CoreError, Result};
use std::fmt;
use std::str::FromStr;

/// タグ省略時のデフォルト
pub const DEFAULT_TAG: &str = "latest";

/// パース済みのイメージ参照
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReference {
    /// name より前のパス（なければ空文字列）
    pub repository: String,
    pub name: String,
    pub tag: String,
}

impl ImageReference {
    /// イメージ参照をパース
    ///
    /// # Examples
    /// - `busybox` -> `("", "busybox", "latest")`
    /// - `repo/busybox:1.2` -> `("repo", "busybox", "1.2")`
    /// - `host:5000/repo/busybox:1.2` -> `("host:5000/repo", "busybox", "1.2")`
    pub fn parse(image: &str) -> Result<Self> {
        let parts: Vec<&str> = image.split(':').collect();

        let (path, tag) = match parts.as_slice() {
            [path] => (path.to_string(), DEFAULT_TAG.to_string()),
            [path, tag] => (path.to_string(), tag.to_string()),
            // host:port/path:tag の形のみ許可
            [host, path, tag] if !host.contains('/') => (format!("{host}:{path}"), tag.to_string()),
            _ => return Err(CoreError::InvalidReference(image.to_string())),
        };

        let (repository, name) = match path.rsplit_once('/') {
            Some((repository, name)) => (repository.to_string(), name.to_string()),
            None => (String::new(), path),
        };

        if name.is_empty() {
            return Err(CoreError::InvalidReference(image.to_string()));
        }

        Ok(Self {
            repository,
            name,
            tag,
        })
    }

    /// repository と name を結合したパス（タグなし）
    pub fn path(&self) -> String {
        if self.repository.is_empty() {
            self.name.clone()
        } else {
            format!("{}/{}", self.repository, self.name)
        }
    }
}

impl FromStr for ImageReference {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.path(), self.tag)
    }
}
