//! OCI Distribution v2 registry (Docker Hub, GHCR, Quay, self-hosted)
//!
//! Tags are listed without metadata. Creation time is read lazily from the
//! image config blob:
//!
//! ```text
//!   GET /v2/<name>/manifests/<tag>
//!        ├── image manifest ──▶ config.digest
//!        └── index ───────────▶ linux/amd64 child ──▶ config.digest
//!   GET /v2/<name>/blobs/<config digest> ──▶ "created"
//! ```

use std::collections::{BTreeSet, HashMap};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use reqwest::header::{ACCEPT, AUTHORIZATION, HeaderMap, LINK, RETRY_AFTER, WWW_AUTHENTICATE};
use reqwest::{Method, Response, StatusCode};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::version::error::RegistryError;
use crate::version::registries::auth::{self, AuthChallenge, Credentials, TokenResponse};
use crate::version::registries::parse_timestamp;
use crate::version::registry::{Provider, Registry};
use crate::version::types::TagRecord;

/// Docker Hub's API endpoint; image references call it `docker.io`
pub const DOCKER_HUB_URL: &str = "https://registry-1.docker.io";
pub const DOCKER_HUB_HOST: &str = "docker.io";

const PAGE_SIZE: usize = 1000;

const MANIFEST_ACCEPT: &str = "application/vnd.oci.image.manifest.v1+json, \
     application/vnd.oci.image.index.v1+json, \
     application/vnd.docker.distribution.manifest.v2+json, \
     application/vnd.docker.distribution.manifest.list.v2+json";

#[derive(Debug, Deserialize)]
struct TagList {
    #[serde(default)]
    tags: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct Descriptor {
    digest: String,
    #[serde(default)]
    platform: Option<Platform>,
}

#[derive(Debug, Deserialize)]
struct Platform {
    architecture: String,
    os: String,
}

#[derive(Debug, Deserialize)]
struct Manifest {
    #[serde(default)]
    config: Option<Descriptor>,
    #[serde(default)]
    manifests: Vec<Descriptor>,
}

#[derive(Debug, Deserialize)]
struct ConfigBlob {
    #[serde(default)]
    created: Option<String>,
}

pub struct DistributionRegistry {
    client: reqwest::Client,
    base_url: String,
    host: String,
    credentials: Credentials,
    /// Bearer tokens by scope, reused for the lifetime of the adapter
    tokens: Mutex<HashMap<String, String>>,
}

impl DistributionRegistry {
    pub fn new(host: &str, base_url: &str, credentials: Credentials) -> Self {
        Self {
            client: reqwest::Client::builder()
                .user_agent(concat!("image-reconciler/", env!("CARGO_PKG_VERSION")))
                .build()
                .expect("Failed to create HTTP client"),
            base_url: base_url.trim_end_matches('/').to_string(),
            host: host.to_string(),
            credentials,
            tokens: Mutex::new(HashMap::new()),
        }
    }

    /// Anonymous adapter for a host, reached over HTTPS
    pub fn anonymous(host: &str) -> Self {
        if host == DOCKER_HUB_HOST {
            return Self::docker_hub(Credentials::Anonymous);
        }
        Self::new(host, &format!("https://{}", host), Credentials::Anonymous)
    }

    pub fn docker_hub(credentials: Credentials) -> Self {
        Self::new(DOCKER_HUB_HOST, DOCKER_HUB_URL, credentials)
    }

    fn is_docker_hub(&self) -> bool {
        self.host == DOCKER_HUB_HOST
    }

    /// Repository name as the API expects it. Docker Hub keeps official
    /// images under `library/`.
    fn api_name(&self, repository: &str) -> String {
        if self.is_docker_hub() && !repository.contains('/') {
            format!("library/{}", repository)
        } else {
            repository.to_string()
        }
    }

    fn url(&self, path_or_url: &str) -> String {
        if path_or_url.starts_with("http://") || path_or_url.starts_with("https://") {
            path_or_url.to_string()
        } else {
            format!("{}{}", self.base_url, path_or_url)
        }
    }

    fn cached_token(&self, scope: &str) -> Option<String> {
        let tokens = self.tokens.lock().unwrap_or_else(|p| p.into_inner());
        tokens.get(scope).cloned()
    }

    fn request(
        &self,
        method: Method,
        url: &str,
        accept: Option<&str>,
        token: Option<&str>,
    ) -> reqwest::RequestBuilder {
        let mut builder = self.client.request(method, url);
        if let Some(accept) = accept {
            builder = builder.header(ACCEPT, accept);
        }
        match (token, self.credentials.to_header_value()) {
            (Some(token), _) => builder.bearer_auth(token),
            (None, Some(basic)) => builder.header(AUTHORIZATION, basic),
            (None, None) => builder,
        }
    }

    /// Sends a request, answering a bearer challenge once if the registry
    /// asks for one.
    async fn send(
        &self,
        method: Method,
        path: &str,
        accept: Option<&str>,
        scope: &str,
    ) -> Result<Response, RegistryError> {
        let url = self.url(path);
        let token = self.cached_token(scope);
        let response = self
            .request(method.clone(), &url, accept, token.as_deref())
            .send()
            .await?;

        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        let challenge = response
            .headers()
            .get(WWW_AUTHENTICATE)
            .and_then(|v| v.to_str().ok())
            .map(AuthChallenge::parse)
            .transpose()?;

        let Some(challenge) = challenge.filter(|c| c.is_bearer()) else {
            warn!("{} rejected credentials for {}", self.host, url);
            return Err(RegistryError::Auth(format!("unauthorized: {}", url)));
        };

        let token = self.fetch_token(&challenge, scope).await?;
        let response = self
            .request(method, &url, accept, Some(&token))
            .send()
            .await?;

        match response.status() {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                warn!("{} rejected token for {}", self.host, url);
                Err(RegistryError::Auth(format!(
                    "token rejected ({}): {}",
                    response.status(),
                    url
                )))
            }
            _ => Ok(response),
        }
    }

    async fn fetch_token(
        &self,
        challenge: &AuthChallenge,
        scope: &str,
    ) -> Result<String, RegistryError> {
        let mut params = vec![("scope", scope)];
        if let Some(service) = challenge.service.as_deref() {
            params.push(("service", service));
        }
        let url = reqwest::Url::parse_with_params(&challenge.realm, &params)
            .map_err(|e| RegistryError::Auth(format!("invalid realm {}: {}", challenge.realm, e)))?;

        debug!("Requesting token from {} for {}", challenge.realm, scope);

        let mut request = self.client.get(url);
        if let Some(basic) = self.credentials.to_header_value() {
            request = request.header(AUTHORIZATION, basic);
        }
        let response = request.send().await?;

        if !response.status().is_success() {
            warn!(
                "Token endpoint {} returned status {}",
                challenge.realm,
                response.status()
            );
            return Err(RegistryError::Auth(format!(
                "token request failed with {}",
                response.status()
            )));
        }

        let token = response
            .json::<TokenResponse>()
            .await?
            .into_token()
            .ok_or_else(|| RegistryError::InvalidResponse("token response without token".into()))?;

        let mut tokens = self.tokens.lock().unwrap_or_else(|p| p.into_inner());
        tokens.insert(scope.to_string(), token.clone());
        Ok(token)
    }

    async fn fetch_manifest(
        &self,
        api_name: &str,
        reference: &str,
        scope: &str,
    ) -> Result<Manifest, RegistryError> {
        let path = format!("/v2/{}/manifests/{}", api_name, reference);
        let response = self
            .send(Method::GET, &path, Some(MANIFEST_ACCEPT), scope)
            .await?;
        let response = check_status(response, &format!("{}:{}", api_name, reference)).await?;
        Ok(response.json().await?)
    }
}

/// Extracts the `rel="next"` target of a `Link` header
fn next_link(headers: &HeaderMap) -> Option<String> {
    let link = headers.get(LINK)?.to_str().ok()?;
    link.split(',')
        .map(str::trim)
        .find(|part| part.contains("rel=\"next\"") || part.contains("rel=next"))
        .and_then(|part| {
            let start = part.find('<')?;
            let end = part.find('>')?;
            Some(part[start + 1..end].to_string())
        })
}

async fn check_status(response: Response, what: &str) -> Result<Response, RegistryError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    match status {
        StatusCode::NOT_FOUND => Err(RegistryError::NotFound(what.to_string())),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            Err(RegistryError::Auth(format!("{} for {}", status, what)))
        }
        StatusCode::TOO_MANY_REQUESTS => {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok());
            Err(RegistryError::RateLimited {
                retry_after_secs: retry_after,
            })
        }
        _ => {
            let body = response.text().await.unwrap_or_default();
            warn!("Registry returned status {} for {}: {}", status, what, body);
            Err(RegistryError::Unavailable(format!(
                "unexpected status {} for {}",
                status, what
            )))
        }
    }
}

/// The linux/amd64 entry of an index, or its first entry
fn pick_platform(manifests: &[Descriptor]) -> Option<&Descriptor> {
    manifests
        .iter()
        .find(|d| {
            d.platform
                .as_ref()
                .is_some_and(|p| p.os == "linux" && p.architecture == "amd64")
        })
        .or_else(|| manifests.first())
}

#[async_trait::async_trait]
impl Registry for DistributionRegistry {
    fn provider(&self) -> Provider {
        Provider::Distribution
    }

    fn host(&self) -> String {
        self.host.clone()
    }

    async fn list_tags(&self, repository: &str) -> Result<Vec<TagRecord>, RegistryError> {
        let api_name = self.api_name(repository);
        let scope = auth::scope(&api_name, "pull");
        let mut next = Some(format!("/v2/{}/tags/list?n={}", api_name, PAGE_SIZE));
        let mut tags = Vec::new();

        while let Some(path) = next.take() {
            let response = self.send(Method::GET, &path, None, &scope).await?;
            if response.status() == StatusCode::NOT_FOUND {
                debug!("Repository {}/{} not found", self.host, repository);
                return Ok(Vec::new());
            }
            let link = next_link(response.headers()).filter(|link| *link != path);
            let response = check_status(response, repository).await?;
            let page: TagList = response.json().await.map_err(|e| {
                warn!("Failed to parse tag list for {}: {}", repository, e);
                RegistryError::InvalidResponse(e.to_string())
            })?;
            tags.extend(page.tags.unwrap_or_default());
            next = link;
        }

        Ok(tags.into_iter().map(TagRecord::new).collect())
    }

    async fn get_creation_time(
        &self,
        repository: &str,
        tag: &str,
    ) -> Result<DateTime<Utc>, RegistryError> {
        let api_name = self.api_name(repository);
        let scope = auth::scope(&api_name, "pull");

        let manifest = self.fetch_manifest(&api_name, tag, &scope).await?;
        let config = match manifest.config {
            Some(config) => config,
            None => {
                let child = pick_platform(&manifest.manifests).ok_or_else(|| {
                    RegistryError::InvalidResponse(format!("{}:{} has an empty index", repository, tag))
                })?;
                self.fetch_manifest(&api_name, &child.digest, &scope)
                    .await?
                    .config
                    .ok_or_else(|| {
                        RegistryError::InvalidResponse(format!("{}:{} has no config", repository, tag))
                    })?
            }
        };

        let path = format!("/v2/{}/blobs/{}", api_name, config.digest);
        let response = self.send(Method::GET, &path, None, &scope).await?;
        let response = check_status(response, &config.digest).await?;
        let blob: ConfigBlob = response.json().await?;

        let created = blob.created.ok_or_else(|| {
            RegistryError::InvalidResponse(format!("{}:{} config has no creation time", repository, tag))
        })?;
        parse_timestamp(&created)
    }

    async fn delete_tag(&self, repository: &str, record: &TagRecord) -> Result<(), RegistryError> {
        let api_name = self.api_name(repository);
        let scope = auth::scope(&api_name, "pull,delete");
        let path = format!("/v2/{}/manifests/{}", api_name, record.tag);

        let response = self.send(Method::DELETE, &path, None, &scope).await?;
        let status = response.status();

        if status.is_success() {
            return Ok(());
        }
        if status == StatusCode::NOT_FOUND {
            return Err(RegistryError::NotFound(format!("{}:{}", repository, record.tag)));
        }

        let body = response.text().await.unwrap_or_default();
        Err(RegistryError::DeleteFailed {
            tag: record.tag.clone(),
            message: format!("{} {}", status, body.trim()),
        })
    }

    async fn manifest_children(
        &self,
        repository: &str,
        reference: &str,
    ) -> Result<BTreeSet<String>, RegistryError> {
        let api_name = self.api_name(repository);
        let scope = auth::scope(&api_name, "pull");
        let manifest = self.fetch_manifest(&api_name, reference, &scope).await?;

        Ok(manifest.manifests.into_iter().map(|d| d.digest).collect())
    }

    fn invalidate(&self, _repository: &str) {}
}
