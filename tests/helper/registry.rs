//! Registry test utilities

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};

use image_reconciler::config::RunConfig;
use image_reconciler::context::RunContext;
use image_reconciler::reconcile::{Reconciler, RegistrySet};
use image_reconciler::version::error::RegistryError;
use image_reconciler::version::registry::{Provider, Registry};
use image_reconciler::version::types::TagRecord;

/// `n` days after 2024-01-01
pub fn day(n: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + chrono::Duration::days(n)
}

/// A run context whose reference time is `day(now)`
pub fn run_context(now: i64) -> RunContext {
    RunContext::new(day(now), Duration::from_secs(60), Duration::from_secs(5), 4).0
}

/// In-memory registry. Tags listed without a creation time are resolved from
/// `creation_times` on demand, like a distribution registry would.
pub struct FakeRegistry {
    provider: Provider,
    host: String,
    repositories: Mutex<HashMap<String, Vec<TagRecord>>>,
    creation_times: HashMap<(String, String), DateTime<Utc>>,
    list_errors: HashMap<String, RegistryError>,
    delete_errors: HashMap<String, RegistryError>,
    children: HashMap<String, BTreeSet<String>>,
    list_calls: AtomicUsize,
    time_calls: AtomicUsize,
    deleted: Mutex<Vec<String>>,
}

impl FakeRegistry {
    pub fn new(provider: Provider, host: &str) -> Self {
        Self {
            provider,
            host: host.to_string(),
            repositories: Mutex::new(HashMap::new()),
            creation_times: HashMap::new(),
            list_errors: HashMap::new(),
            delete_errors: HashMap::new(),
            children: HashMap::new(),
            list_calls: AtomicUsize::new(0),
            time_calls: AtomicUsize::new(0),
            deleted: Mutex::new(Vec::new()),
        }
    }

    /// Adds tags with eagerly known creation times (`(tag, day)`)
    pub fn with_timed_tags(self, repository: &str, tags: &[(&str, i64)]) -> Self {
        let records = tags
            .iter()
            .map(|(tag, n)| {
                TagRecord::new(*tag)
                    .with_created_at(day(*n))
                    .with_provider_id(format!("ocid1.image.{}", tag))
            })
            .collect();
        self.with_records(repository, records)
    }

    /// Adds tags whose creation time is only available per tag lookup
    pub fn with_lazy_tags(mut self, repository: &str, tags: &[(&str, i64)]) -> Self {
        for (tag, n) in tags {
            self.creation_times
                .insert((repository.to_string(), tag.to_string()), day(*n));
        }
        let records = tags.iter().map(|(tag, _)| TagRecord::new(*tag)).collect();
        self.with_records(repository, records)
    }

    pub fn with_records(self, repository: &str, records: Vec<TagRecord>) -> Self {
        self.repositories
            .lock()
            .unwrap()
            .entry(repository.to_string())
            .or_default()
            .extend(records);
        self
    }

    pub fn with_list_error(mut self, repository: &str, error: RegistryError) -> Self {
        self.list_errors.insert(repository.to_string(), error);
        self
    }

    pub fn with_delete_error(mut self, tag: &str, error: RegistryError) -> Self {
        self.delete_errors.insert(tag.to_string(), error);
        self
    }

    pub fn with_children(mut self, reference: &str, digests: &[&str]) -> Self {
        self.children.insert(
            reference.to_string(),
            digests.iter().map(|d| d.to_string()).collect(),
        );
        self
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn time_calls(&self) -> usize {
        self.time_calls.load(Ordering::SeqCst)
    }

    pub fn deleted(&self) -> Vec<String> {
        self.deleted.lock().unwrap().clone()
    }
}

#[async_trait]
impl Registry for FakeRegistry {
    fn provider(&self) -> Provider {
        self.provider
    }

    fn host(&self) -> String {
        self.host.clone()
    }

    async fn list_tags(&self, repository: &str) -> Result<Vec<TagRecord>, RegistryError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        // Yield so concurrent callers overlap with the in-flight listing.
        tokio::time::sleep(Duration::from_millis(10)).await;
        if let Some(error) = self.list_errors.get(repository) {
            return Err(error.clone());
        }
        Ok(self
            .repositories
            .lock()
            .unwrap()
            .get(repository)
            .cloned()
            .unwrap_or_default())
    }

    async fn get_creation_time(
        &self,
        repository: &str,
        tag: &str,
    ) -> Result<DateTime<Utc>, RegistryError> {
        self.time_calls.fetch_add(1, Ordering::SeqCst);
        self.creation_times
            .get(&(repository.to_string(), tag.to_string()))
            .copied()
            .ok_or_else(|| RegistryError::NotFound(format!("{}:{}", repository, tag)))
    }

    async fn delete_tag(&self, repository: &str, record: &TagRecord) -> Result<(), RegistryError> {
        if let Some(error) = self.delete_errors.get(&record.tag) {
            return Err(error.clone());
        }
        let mut repositories = self.repositories.lock().unwrap();
        let tags = repositories.entry(repository.to_string()).or_default();
        let before = tags.len();
        tags.retain(|r| r.tag != record.tag);
        if tags.len() == before {
            return Err(RegistryError::NotFound(record.tag.clone()));
        }
        self.deleted.lock().unwrap().push(record.tag.clone());
        Ok(())
    }

    async fn manifest_children(
        &self,
        _repository: &str,
        reference: &str,
    ) -> Result<BTreeSet<String>, RegistryError> {
        Ok(self.children.get(reference).cloned().unwrap_or_default())
    }

    fn invalidate(&self, _repository: &str) {}
}

/// A reconciler over the given fakes, keyed by their host
pub fn reconciler(config: RunConfig, registries: Vec<(Arc<FakeRegistry>, bool)>) -> Reconciler {
    let mut set = RegistrySet::new();
    for (registry, cleanup) in registries {
        let host = registry.host();
        match registry.provider() {
            Provider::Ocir => set.insert_ocir(host, registry),
            Provider::Distribution => set.insert(host, registry, cleanup),
        }
    }
    Reconciler::new(config, set)
}
