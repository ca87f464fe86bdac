//! レジストリからのダイジェスト解決
//!
//! Registry HTTP API v2 の `HEAD /v2/<repo>/manifests/<tag>` を送り、
//! `Docker-Content-Digest` ヘッダーを読み取ります。401 が返った場合は
//! `WWW-Authenticate` のチャレンジに従ってトークンを取得して再送します。

use crate::auth::{Credentials, DOCKER_HUB, RegistryAuth, extract_registry};
use crate::remote::DigestResolver;
use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use podflow_core::ImageReference;
use reqwest::StatusCode;
use reqwest::header::{ACCEPT, WWW_AUTHENTICATE};
use serde::Deserialize;

const DOCKER_HUB_API: &str = "registry-1.docker.io";
const DIGEST_HEADER: &str = "Docker-Content-Digest";

/// マニフェストリストを含め、単一マニフェストに解決されないよう全種別を受け付ける
const MANIFEST_ACCEPT: &str = "application/vnd.oci.image.index.v1+json, \
     application/vnd.docker.distribution.manifest.list.v2+json, \
     application/vnd.oci.image.manifest.v1+json, \
     application/vnd.docker.distribution.manifest.v2+json";

/// 公開済みタグのダイジェストを Registry API で取得
pub struct RegistryDigestResolver {
    client: reqwest::Client,
    auth: RegistryAuth,
    insecure_registries: Vec<String>,
}

impl RegistryDigestResolver {
    pub fn new(insecure_registries: Vec<String>) -> Self {
        Self::with_auth(RegistryAuth::new(), insecure_registries)
    }

    pub fn with_auth(auth: RegistryAuth, insecure_registries: Vec<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            auth,
            insecure_registries,
        }
    }

    fn scheme(&self, registry: &str) -> &'static str {
        if self.insecure_registries.iter().any(|r| r == registry) {
            "http"
        } else {
            "https"
        }
    }

    async fn head_manifest(&self, url: &str, token: Option<&Token>) -> Result<reqwest::Response> {
        let mut request = self.client.head(url).header(ACCEPT, MANIFEST_ACCEPT);
        request = match token {
            Some(Token::Bearer(token)) => request.bearer_auth(token),
            Some(Token::Basic(creds)) => request.basic_auth(&creds.username, Some(&creds.password)),
            None => request,
        };
        request
            .send()
            .await
            .with_context(|| format!("requesting {url}"))
    }

    /// チャレンジに従ってトークンを取得
    async fn authorize(
        &self,
        challenge: Challenge,
        repository: &str,
        credentials: Option<Credentials>,
    ) -> Result<Token> {
        match challenge {
            Challenge::Basic => credentials
                .map(Token::Basic)
                .ok_or_else(|| anyhow!("registry requires credentials, none configured")),
            Challenge::Bearer {
                realm,
                service,
                scope,
            } => {
                let scope = scope.unwrap_or_else(|| format!("repository:{repository}:pull"));
                let mut query = vec![("scope", scope)];
                if let Some(service) = service {
                    query.push(("service", service));
                }

                let mut request = self.client.get(&realm).query(&query);
                if let Some(creds) = &credentials {
                    request = request.basic_auth(&creds.username, Some(&creds.password));
                }

                let response = request
                    .send()
                    .await
                    .with_context(|| format!("requesting token from {realm}"))?;
                if !response.status().is_success() {
                    bail!("token endpoint {realm} returned {}", response.status());
                }

                let body: TokenResponse = response.json().await.context("parsing token response")?;
                body.token
                    .or(body.access_token)
                    .map(Token::Bearer)
                    .ok_or_else(|| anyhow!("token response from {realm} carried no token"))
            }
        }
    }
}

#[async_trait]
impl DigestResolver for RegistryDigestResolver {
    async fn digest_of(&self, tag: &str) -> Result<String> {
        let location = ManifestLocation::parse(tag)?;
        let url = location.url(self.scheme(&location.registry));
        tracing::debug!(url = %url, "Resolving digest");

        let mut response = self.head_manifest(&url, None).await?;

        if response.status() == StatusCode::UNAUTHORIZED {
            let challenge = response
                .headers()
                .get(WWW_AUTHENTICATE)
                .and_then(|v| v.to_str().ok())
                .and_then(Challenge::parse)
                .ok_or_else(|| anyhow!("registry returned 401 without a usable challenge"))?;
            let credentials = self.auth.get_credentials(&location.registry)?;
            let token = self
                .authorize(challenge, &location.repository, credentials)
                .await?;
            response = self.head_manifest(&url, Some(&token)).await?;
        }

        let status = response.status();
        if !status.is_success() {
            bail!("registry returned {status} for {url}");
        }

        response
            .headers()
            .get(DIGEST_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| anyhow!("registry response for {url} has no {DIGEST_HEADER} header"))
    }
}

enum Token {
    Bearer(String),
    Basic(Credentials),
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    token: Option<String>,
    access_token: Option<String>,
}

/// タグのマニフェストの所在
#[derive(Debug, Clone, PartialEq, Eq)]
struct ManifestLocation {
    /// config.json のキーや insecure 判定に使うレジストリ名
    registry: String,
    /// API の接続先ホスト
    host: String,
    repository: String,
    reference: String,
}

impl ManifestLocation {
    fn parse(tag: &str) -> Result<Self> {
        let registry = extract_registry(tag);
        let remainder = tag
            .strip_prefix(&format!("{registry}/"))
            .unwrap_or(tag);

        let reference = ImageReference::parse(remainder)?;
        let mut repository = reference.path();
        let host = if registry == DOCKER_HUB {
            if !repository.contains('/') {
                repository = format!("library/{repository}");
            }
            DOCKER_HUB_API.to_string()
        } else {
            registry.clone()
        };

        Ok(Self {
            registry,
            host,
            repository,
            reference: reference.tag,
        })
    }

    fn url(&self, scheme: &str) -> String {
        format!(
            "{scheme}://{}/v2/{}/manifests/{}",
            self.host, self.repository, self.reference
        )
    }
}

/// `WWW-Authenticate` のチャレンジ
#[derive(Debug, Clone, PartialEq, Eq)]
enum Challenge {
    Basic,
    Bearer {
        realm: String,
        service: Option<String>,
        scope: Option<String>,
    },
}

impl Challenge {
    /// 例: `Bearer realm="https://auth.docker.io/token",service="registry.docker.io"`
    fn parse(header: &str) -> Option<Self> {
        let (scheme, params) = header.trim().split_once(' ').unwrap_or((header.trim(), ""));

        if scheme.eq_ignore_ascii_case("basic") {
            return Some(Challenge::Basic);
        }
        if !scheme.eq_ignore_ascii_case("bearer") {
            return None;
        }

        let mut realm = None;
        let mut service = None;
        let mut scope = None;
        for (key, value) in parse_params(params) {
            match key.to_ascii_lowercase().as_str() {
                "realm" => realm = Some(value),
                "service" => service = Some(value),
                "scope" => scope = Some(value),
                _ => {}
            }
        }

        Some(Challenge::Bearer {
            realm: realm?,
            service,
            scope,
        })
    }
}

/// `key="value",key2=value2` を分解（引用符内のカンマは区切りにしない）
fn parse_params(params: &str) -> Vec<(String, String)> {
    let mut pairs = Vec::new();
    let mut rest = params.trim();

    while !rest.is_empty() {
        let Some((key, after)) = rest.split_once('=') else {
            break;
        };
        let key = key.trim().trim_start_matches(',').trim().to_string();

        let (value, next) = match after.strip_prefix('"') {
            Some(quoted) => match quoted.split_once('"') {
                Some((value, next)) => (value.to_string(), next),
                None => (quoted.to_string(), ""),
            },
            None => match after.split_once(',') {
                Some((value, next)) => (value.trim().to_string(), next),
                None => (after.trim().to_string(), ""),
            },
        };

        pairs.push((key, value));
        rest = next.trim_start().trim_start_matches(',').trim_start();
    }

    pairs
}
