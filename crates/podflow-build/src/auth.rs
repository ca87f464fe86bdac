//! レジストリ認証処理
//!
//! Docker config.json からダイジェスト取得用の認証情報を読み出します。
//! `auths` の静的な認証情報と、credential helper の両方に対応します。

use crate::error::{BuildError, BuildResult};
use base64::Engine;
use serde::Deserialize;
use std::collections::HashMap;
use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Stdio};

/// Docker Hub のレジストリ名
pub const DOCKER_HUB: &str = "docker.io";

/// config.json で Docker Hub に使われるキー
const DOCKER_HUB_AUTH_KEY: &str = "https://index.docker.io/v1/";

/// Docker config.json の構造
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DockerConfig {
    /// 認証情報 (レジストリ -> AuthEntry)
    #[serde(default)]
    auths: HashMap<String, AuthEntry>,
    /// credential helper 名 (例: "osxkeychain", "desktop")
    #[serde(default)]
    creds_store: Option<String>,
    /// レジストリ別の credential helper
    #[serde(default)]
    cred_helpers: HashMap<String, String>,
}

/// 認証エントリ
#[derive(Debug, Deserialize)]
struct AuthEntry {
    /// Base64エンコードされた "username:password"
    auth: Option<String>,
}

/// credential helper からのレスポンス
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CredentialResponse {
    username: String,
    secret: String,
}

/// レジストリの認証情報
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// レジストリ認証を管理
#[derive(Debug, Clone)]
pub struct RegistryAuth {
    config_path: PathBuf,
}

impl Default for RegistryAuth {
    fn default() -> Self {
        Self::new()
    }
}

impl RegistryAuth {
    /// デフォルトで ~/.docker/config.json（`DOCKER_CONFIG` で変更可）を使用
    pub fn new() -> Self {
        let config_path = std::env::var("DOCKER_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                dirs::home_dir()
                    .map(|h| h.join(".docker"))
                    .unwrap_or_else(|| PathBuf::from(".docker"))
            })
            .join("config.json");

        Self { config_path }
    }

    /// 指定したパスの config.json を使用
    pub fn with_config_path(config_path: PathBuf) -> Self {
        Self { config_path }
    }

    /// レジストリの認証情報を取得
    ///
    /// # Returns
    /// * `Ok(Some(credentials))` - 認証情報が見つかった場合
    /// * `Ok(None)` - 認証情報が不要または見つからない場合
    /// * `Err(e)` - config.json が壊れている場合
    pub fn get_credentials(&self, registry: &str) -> BuildResult<Option<Credentials>> {
        // config.json がなければ匿名でアクセスする
        if !self.config_path.exists() {
            tracing::debug!(path = %self.config_path.display(), "No docker config, resolving anonymously");
            return Ok(None);
        }

        let config = self.load_docker_config()?;

        let stored = auth_keys(registry)
            .iter()
            .filter_map(|key| config.auths.get(key))
            .find_map(|entry| entry.auth.as_deref());
        if let Some(encoded) = stored
            && let Some(creds) = decode_auth(encoded, registry)?
        {
            tracing::debug!(registry, "Using credentials from auths");
            return Ok(Some(creds));
        }

        // レジストリ別の helper を credsStore より優先
        let helper = config
            .cred_helpers
            .get(registry)
            .or(config.creds_store.as_ref());
        if let Some(helper) = helper {
            tracing::debug!(registry, helper = %helper, "Asking credential helper");
            let server = if registry == DOCKER_HUB {
                DOCKER_HUB_AUTH_KEY
            } else {
                registry
            };
            match get_from_helper(helper, server) {
                Ok(Some(creds)) => return Ok(Some(creds)),
                Ok(None) => {}
                Err(e) => tracing::debug!("{}", e),
            }
        }

        tracing::debug!(registry, "No credentials, resolving anonymously");
        Ok(None)
    }

    fn load_docker_config(&self) -> BuildResult<DockerConfig> {
        let source = self.config_path.display().to_string();
        let content = std::fs::read_to_string(&self.config_path)
            .map_err(|e| auth_error(&source, format!("reading {source}: {e}")))?;
        serde_json::from_str(&content)
            .map_err(|e| auth_error(&source, format!("parsing {source}: {e}")))
    }
}

/// イメージ名からレジストリを抽出
///
/// # Examples
/// - `ghcr.io/org/app:tag` -> `ghcr.io`
/// - `myuser/app:tag` -> `docker.io`
/// - `localhost:5000/app` -> `localhost:5000`
pub fn extract_registry(image: &str) -> String {
    if let Some((first, _)) = image.split_once('/') {
        // `.` や `:` を含む、または localhost ならレジストリ
        if first.contains('.') || first.contains(':') || first == "localhost" {
            return first.to_string();
        }
    }

    DOCKER_HUB.to_string()
}

/// config.json の auths で探すキーの候補
fn auth_keys(registry: &str) -> Vec<String> {
    let mut keys = vec![registry.to_string(), format!("https://{registry}")];
    if registry == DOCKER_HUB {
        keys.push(DOCKER_HUB_AUTH_KEY.to_string());
        keys.push("index.docker.io".to_string());
    }
    keys
}

fn auth_error(registry: &str, message: String) -> BuildError {
    BuildError::AuthFailed {
        registry: registry.to_string(),
        message,
    }
}

/// `auths` の "username:password"（Base64）をデコード
fn decode_auth(encoded: &str, registry: &str) -> BuildResult<Option<Credentials>> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(encoded.trim())
        .map_err(|e| auth_error(registry, format!("auths entry is not base64: {e}")))?;
    let pair = String::from_utf8(bytes)
        .map_err(|e| auth_error(registry, format!("auths entry is not UTF-8: {e}")))?;

    Ok(pair
        .split_once(':')
        .map(|(username, password)| Credentials {
            username: username.to_string(),
            password: password.to_string(),
        }))
}

/// `docker-credential-<helper> get` を実行（サーバー名は stdin で渡す）
fn get_from_helper(helper: &str, server: &str) -> BuildResult<Option<Credentials>> {
    let program = format!("docker-credential-{helper}");

    let mut child = Command::new(&program)
        .arg("get")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| auth_error(server, format!("running {program}: {e}")))?;

    if let Some(mut stdin) = child.stdin.take() {
        stdin.write_all(server.as_bytes()).ok();
    }

    let output = child
        .wait_with_output()
        .map_err(|e| auth_error(server, format!("waiting for {program}: {e}")))?;
    if !output.status.success() {
        tracing::debug!(
            helper = %program,
            "No credentials for {}: {}",
            server,
            String::from_utf8_lossy(&output.stderr).trim()
        );
        return Ok(None);
    }

    let response: CredentialResponse = serde_json::from_slice(&output.stdout)
        .map_err(|e| auth_error(server, format!("unexpected {program} output: {e}")))?;

    Ok(Some(Credentials {
        username: response.username,
        password: response.secret,
    }))
}
