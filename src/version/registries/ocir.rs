//! Oracle Cloud Infrastructure Registry
//!
//! The artifacts API returns tag, creation time, digest and image OCID for a
//! whole repository in one (paginated) listing, so creation times are known
//! up front and kept for the run. Image references address repositories as
//! `<namespace>/<name>` while the API only knows `<name>`.
//!
//! Listings are scoped to a compartment. Unless one is pinned in the config,
//! the compartment of each repository is found by asking every accessible
//! compartment of the tenancy for a single image of it; the answer is kept
//! for the run.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use reqwest::header::AUTHORIZATION;
use reqwest::{Response, StatusCode};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::config::OcirConfig;
use crate::version::error::RegistryError;
use crate::version::registries::auth::Credentials;
use crate::version::registries::distribution::DistributionRegistry;
use crate::version::registries::parse_timestamp;
use crate::version::registry::{Provider, Registry};
use crate::version::types::TagRecord;

const IMAGES_PATH: &str = "/20160918/container/images";
const COMPARTMENTS_PATH: &str = "/20160918/compartments";
const NEXT_PAGE_HEADER: &str = "opc-next-page";

#[derive(Debug, Deserialize)]
struct ImageCollection {
    #[serde(default)]
    items: Vec<ImageSummary>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ImageSummary {
    id: String,
    /// Tag; absent for untagged platform manifests
    #[serde(default)]
    version: Option<String>,
    time_created: String,
    #[serde(default)]
    digest: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CompartmentSummary {
    id: String,
    lifecycle_state: String,
}

pub struct OcirRegistry {
    client: reqwest::Client,
    endpoint: String,
    host: String,
    namespace: Option<String>,
    /// Pinned compartment; disables the search
    compartment_id: Option<String>,
    tenancy_id: Option<String>,
    identity_endpoint: String,
    credentials: Credentials,
    /// Manifest reads go through the registry's distribution API
    manifests: DistributionRegistry,
    listings: Mutex<HashMap<String, Arc<Vec<TagRecord>>>>,
    /// Accessible compartments, tenancy root first
    compartments: Mutex<Option<Arc<Vec<String>>>>,
    /// Compartment found for each API repository name
    repository_compartments: Mutex<HashMap<String, String>>,
}

impl OcirRegistry {
    pub fn new(config: &OcirConfig) -> Self {
        let credentials = Credentials::basic(&config.username, &config.token);
        let endpoint = config.endpoint.trim_end_matches('/').to_string();
        let identity_endpoint = match &config.identity_endpoint {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => endpoint.replacen("://artifacts.", "://identity.", 1),
        };
        Self {
            client: reqwest::Client::builder()
                .user_agent(concat!("image-reconciler/", env!("CARGO_PKG_VERSION")))
                .build()
                .expect("Failed to create HTTP client"),
            endpoint,
            identity_endpoint,
            host: config.registry.clone(),
            namespace: config.namespace.clone(),
            compartment_id: config.compartment_id.clone(),
            tenancy_id: config.tenancy_id.clone(),
            manifests: DistributionRegistry::new(
                &config.registry,
                &format!("https://{}", config.registry),
                credentials.clone(),
            ),
            credentials,
            listings: Mutex::new(HashMap::new()),
            compartments: Mutex::new(None),
            repository_compartments: Mutex::new(HashMap::new()),
        }
    }

    /// Replaces the adapter used for manifest reads
    pub fn with_manifest_registry(mut self, manifests: DistributionRegistry) -> Self {
        self.manifests = manifests;
        self
    }

    /// Repository name as the artifacts API knows it.
    ///
    /// Strips `<namespace>/` when the namespace is configured; without one,
    /// only the last path segment is kept.
    pub fn api_name(&self, repository: &str) -> String {
        match &self.namespace {
            Some(namespace) => repository
                .strip_prefix(namespace.as_str())
                .and_then(|rest| rest.strip_prefix('/'))
                .unwrap_or(repository)
                .to_string(),
            None => repository
                .rsplit('/')
                .next()
                .unwrap_or(repository)
                .to_string(),
        }
    }

    fn authorize(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.credentials.to_header_value() {
            Some(value) => builder.header(AUTHORIZATION, value),
            None => builder,
        }
    }

    fn cached(&self, repository: &str) -> Option<Arc<Vec<TagRecord>>> {
        let listings = self.listings.lock().unwrap_or_else(|p| p.into_inner());
        listings.get(repository).cloned()
    }

    fn images_url(&self, params: &[(&str, &str)]) -> Result<reqwest::Url, RegistryError> {
        reqwest::Url::parse_with_params(&format!("{}{}", self.endpoint, IMAGES_PATH), params)
            .map_err(|e| RegistryError::InvalidResponse(format!("bad endpoint: {}", e)))
    }

    /// Active compartments of the tenancy, including the tenancy itself
    async fn accessible_compartments(&self) -> Result<Arc<Vec<String>>, RegistryError> {
        let cached = self
            .compartments
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone();
        if let Some(compartments) = cached {
            return Ok(compartments);
        }

        let Some(tenancy_id) = self.tenancy_id.as_deref() else {
            return Err(RegistryError::Unavailable(
                "no OCIR compartment or tenancy configured".to_string(),
            ));
        };

        let mut compartments = vec![tenancy_id.to_string()];
        let mut page: Option<String> = None;
        loop {
            let mut params = vec![
                ("compartmentId", tenancy_id),
                ("compartmentIdInSubtree", "true"),
                ("accessLevel", "ACCESSIBLE"),
            ];
            if let Some(page) = page.as_deref() {
                params.push(("page", page));
            }
            let url = reqwest::Url::parse_with_params(
                &format!("{}{}", self.identity_endpoint, COMPARTMENTS_PATH),
                &params,
            )
            .map_err(|e| RegistryError::InvalidResponse(format!("bad identity endpoint: {}", e)))?;

            let response = self.authorize(self.client.get(url)).send().await?;
            let response = check_status(response, "compartments").await?;
            let next = next_page(&response);
            let items: Vec<CompartmentSummary> = response.json().await?;
            compartments.extend(
                items
                    .into_iter()
                    .filter(|c| c.lifecycle_state == "ACTIVE")
                    .map(|c| c.id),
            );

            match next {
                Some(next) if page.as_deref() != Some(next.as_str()) => page = Some(next),
                _ => break,
            }
        }

        debug!("Found {} accessible compartments", compartments.len());
        let compartments = Arc::new(compartments);
        *self.compartments.lock().unwrap_or_else(|p| p.into_inner()) = Some(compartments.clone());
        Ok(compartments)
    }

    /// Whether a compartment holds at least one image of `api_name`
    async fn compartment_has(&self, compartment: &str, api_name: &str) -> Result<bool, RegistryError> {
        let url = self.images_url(&[
            ("compartmentId", compartment),
            ("repositoryName", api_name),
            ("limit", "1"),
        ])?;
        let response = self.authorize(self.client.get(url)).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        let response = check_status(response, api_name).await?;
        let collection: ImageCollection = response.json().await?;
        Ok(!collection.items.is_empty())
    }

    /// Compartment holding `api_name`, or `None` when no accessible
    /// compartment has it.
    async fn resolve_compartment(&self, api_name: &str) -> Result<Option<String>, RegistryError> {
        if let Some(pinned) = &self.compartment_id {
            return Ok(Some(pinned.clone()));
        }
        let known = self
            .repository_compartments
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(api_name)
            .cloned();
        if known.is_some() {
            return Ok(known);
        }

        let mut last_error = None;
        for compartment in self.accessible_compartments().await?.iter() {
            match self.compartment_has(compartment, api_name).await {
                Ok(true) => {
                    info!("Found OCIR repository {} in compartment {}", api_name, compartment);
                    self.repository_compartments
                        .lock()
                        .unwrap_or_else(|p| p.into_inner())
                        .insert(api_name.to_string(), compartment.clone());
                    return Ok(Some(compartment.clone()));
                }
                Ok(false) => {}
                Err(e) => {
                    debug!("Could not search compartment {} for {}: {}", compartment, api_name, e);
                    last_error = Some(e);
                }
            }
        }

        match last_error {
            Some(e) => Err(e),
            None => {
                warn!("OCIR repository {} not found in any accessible compartment", api_name);
                Ok(None)
            }
        }
    }

    async fn fetch_listing(&self, repository: &str) -> Result<Arc<Vec<TagRecord>>, RegistryError> {
        if let Some(records) = self.cached(repository) {
            return Ok(records);
        }

        let api_name = self.api_name(repository);
        let Some(compartment) = self.resolve_compartment(&api_name).await? else {
            return Ok(Arc::new(Vec::new()));
        };
        debug!(
            "Listing OCIR images for {} (API name {}, compartment {})",
            repository, api_name, compartment
        );

        let mut records = Vec::new();
        let mut page: Option<String> = None;
        loop {
            let mut params = vec![
                ("compartmentId", compartment.as_str()),
                ("repositoryName", api_name.as_str()),
            ];
            if let Some(page) = page.as_deref() {
                params.push(("page", page));
            }
            let url = self.images_url(&params)?;

            let response = self.authorize(self.client.get(url)).send().await?;
            if response.status() == StatusCode::NOT_FOUND {
                debug!("OCIR repository {} not found", repository);
                break;
            }
            let response = check_status(response, repository).await?;
            let next = next_page(&response);

            let collection: ImageCollection = response.json().await.map_err(|e| {
                warn!("Failed to parse OCIR image listing for {}: {}", repository, e);
                RegistryError::InvalidResponse(e.to_string())
            })?;

            for item in collection.items {
                let Some(tag) = item.version.filter(|v| !v.is_empty()) else {
                    continue;
                };
                let mut record = TagRecord::new(tag)
                    .with_created_at(parse_timestamp(&item.time_created)?)
                    .with_provider_id(item.id);
                if let Some(digest) = item.digest {
                    record = record.with_digest(digest);
                }
                records.push(record);
            }

            match next {
                Some(next) if page.as_deref() != Some(next.as_str()) => page = Some(next),
                _ => break,
            }
        }

        let records = Arc::new(records);
        let mut listings = self.listings.lock().unwrap_or_else(|p| p.into_inner());
        listings.insert(repository.to_string(), records.clone());
        Ok(records)
    }
}

fn next_page(response: &Response) -> Option<String> {
    response
        .headers()
        .get(NEXT_PAGE_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

async fn check_status(response: Response, what: &str) -> Result<Response, RegistryError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    match status {
        StatusCode::NOT_FOUND => Err(RegistryError::NotFound(what.to_string())),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            warn!("OCIR rejected credentials for {}: {}", what, status);
            Err(RegistryError::Auth(format!("{} for {}", status, what)))
        }
        StatusCode::TOO_MANY_REQUESTS => Err(RegistryError::RateLimited {
            retry_after_secs: response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok()),
        }),
        _ => {
            warn!("OCIR returned status {} for {}", status, what);
            Err(RegistryError::Unavailable(format!(
                "unexpected status {} for {}",
                status, what
            )))
        }
    }
}

#[async_trait::async_trait]
impl Registry for OcirRegistry {
    fn provider(&self) -> Provider {
        Provider::Ocir
    }

    fn host(&self) -> String {
        self.host.clone()
    }

    async fn list_tags(&self, repository: &str) -> Result<Vec<TagRecord>, RegistryError> {
        Ok(self.fetch_listing(repository).await?.as_ref().clone())
    }

    async fn get_creation_time(
        &self,
        repository: &str,
        tag: &str,
    ) -> Result<DateTime<Utc>, RegistryError> {
        self.fetch_listing(repository)
            .await?
            .iter()
            .find(|r| r.tag == tag)
            .and_then(|r| r.created_at)
            .ok_or_else(|| RegistryError::NotFound(format!("{}:{}", repository, tag)))
    }

    async fn delete_tag(&self, repository: &str, record: &TagRecord) -> Result<(), RegistryError> {
        let Some(id) = record.provider_id.as_deref() else {
            return Err(RegistryError::DeleteFailed {
                tag: record.tag.clone(),
                message: "no image OCID".to_string(),
            });
        };

        let url = format!("{}{}/{}", self.endpoint, IMAGES_PATH, id);
        let response = self.authorize(self.client.delete(&url)).send().await?;
        let status = response.status();

        if status.is_success() {
            debug!("Deleted OCIR image {} ({}:{})", id, repository, record.tag);
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
        self.manifests.manifest_children(repository, reference).await
    }

    fn invalidate(&self, repository: &str) {
        let mut listings = self.listings.lock().unwrap_or_else(|p| p.into_inner());
        if listings.remove(repository).is_some() {
            debug!("Dropped cached OCIR listing for {}", repository);
        }
    }
}
