//! Registry adapters by host
//!
//! Configured hosts get their own adapter and cleanup flag. Any other host
//! is treated as a public distribution registry and gets an anonymous adapter
//! the first time it is asked for.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::config::RegistriesConfig;
use crate::version::registries::auth::Credentials;
use crate::version::registries::distribution::{DOCKER_HUB_HOST, DistributionRegistry};
use crate::version::registries::ocir::OcirRegistry;
use crate::version::registry::Registry;

type Fallback = Box<dyn Fn(&str) -> Arc<dyn Registry> + Send + Sync>;

#[derive(Clone)]
struct RegistryEntry {
    registry: Arc<dyn Registry>,
    cleanup: bool,
}

pub struct RegistrySet {
    entries: Mutex<HashMap<String, RegistryEntry>>,
    ocir_host: Option<String>,
    fallback: Fallback,
}

impl Default for RegistrySet {
    fn default() -> Self {
        Self::new()
    }
}

impl RegistrySet {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ocir_host: None,
            fallback: Box::new(|host| Arc::new(DistributionRegistry::anonymous(host))),
        }
    }

    /// Replaces how adapters for unconfigured hosts are created
    pub fn with_fallback<F>(mut self, fallback: F) -> Self
    where
        F: Fn(&str) -> Arc<dyn Registry> + Send + Sync + 'static,
    {
        self.fallback = Box::new(fallback);
        self
    }

    pub fn insert(&mut self, host: impl Into<String>, registry: Arc<dyn Registry>, cleanup: bool) {
        let entries = self.entries.get_mut().unwrap_or_else(|p| p.into_inner());
        entries.insert(host.into(), RegistryEntry { registry, cleanup });
    }

    /// Registers the OCIR adapter; bare names in `extraRepositories` resolve
    /// against its host. OCIR repositories are always eligible for cleanup.
    pub fn insert_ocir(&mut self, host: impl Into<String>, registry: Arc<dyn Registry>) {
        let host = host.into();
        self.ocir_host = Some(host.clone());
        self.insert(host, registry, true);
    }

    pub fn ocir_host(&self) -> Option<&str> {
        self.ocir_host.as_deref()
    }

    /// Adapter for a host, creating an anonymous one for unknown hosts
    pub fn get(&self, host: &str) -> Arc<dyn Registry> {
        let mut entries = self.entries.lock().unwrap_or_else(|p| p.into_inner());
        entries
            .entry(host.to_string())
            .or_insert_with(|| {
                debug!("No adapter configured for {}, using anonymous access", host);
                RegistryEntry {
                    registry: (self.fallback)(host),
                    cleanup: false,
                }
            })
            .registry
            .clone()
    }

    /// Whether stale tags on a host may be planned for deletion
    pub fn cleanup_enabled(&self, host: &str) -> bool {
        let entries = self.entries.lock().unwrap_or_else(|p| p.into_inner());
        entries.get(host).is_some_and(|e| e.cleanup)
    }
}

/// Builds the adapters described by the registries configuration
pub fn create_default_registries(config: &RegistriesConfig) -> RegistrySet {
    let mut registries = RegistrySet::new();

    if let Some(ocir) = &config.ocir {
        let registry = OcirRegistry::new(ocir);
        debug!("Configured {} registry {}", registry.provider().as_str(), ocir.registry);
        registries.insert_ocir(ocir.registry.clone(), Arc::new(registry));
    }

    for dist in &config.distribution {
        let credentials =
            Credentials::from_optional(dist.username.as_deref(), dist.password.as_deref());
        let registry = match (&dist.url, dist.host.as_str()) {
            (Some(url), host) => DistributionRegistry::new(host, url, credentials),
            (None, DOCKER_HUB_HOST) => DistributionRegistry::docker_hub(credentials),
            (None, host) => DistributionRegistry::new(host, &format!("https://{}", host), credentials),
        };
        debug!(
            "Configured {} registry {} (cleanup {})",
            registry.provider().as_str(),
            dist.host,
            dist.cleanup
        );
        registries.insert(dist.host.clone(), Arc::new(registry), dist.cleanup);
    }

    registries
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DistributionConfig, OcirConfig};
    use crate::version::registry::{MockRegistry, Provider};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn mock(provider: Provider) -> Arc<dyn Registry> {
        let mut registry = MockRegistry::new();
        registry.expect_provider().return_const(provider);
        Arc::new(registry)
    }

    #[test]
    fn get_returns_configured_adapter() {
        let mut registries = RegistrySet::new();
        registries.insert("ghcr.io", mock(Provider::Distribution), false);
        registries.insert_ocir("iad.ocir.io", mock(Provider::Ocir));

        assert_eq!(registries.get("iad.ocir.io").provider(), Provider::Ocir);
        assert_eq!(registries.ocir_host(), Some("iad.ocir.io"));
        assert!(registries.cleanup_enabled("iad.ocir.io"));
        assert!(!registries.cleanup_enabled("ghcr.io"));
    }

    #[test]
    fn get_creates_fallback_once_per_host() {
        let created = Arc::new(AtomicUsize::new(0));
        let counter = created.clone();
        let registries = RegistrySet::new().with_fallback(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            mock(Provider::Distribution)
        });

        registries.get("quay.io");
        registries.get("quay.io");
        registries.get("docker.io");

        assert_eq!(created.load(Ordering::SeqCst), 2);
        assert!(!registries.cleanup_enabled("quay.io"));
        assert!(!registries.cleanup_enabled("unknown.example"));
    }

    #[test]
    fn create_default_registries_reads_config() {
        let config = RegistriesConfig {
            ocir: Some(OcirConfig {
                registry: "iad.ocir.io".to_string(),
                endpoint: "https://artifacts.test".to_string(),
                namespace: Some("tenancy".to_string()),
                compartment_id: Some("ocid1.compartment".to_string()),
                tenancy_id: None,
                identity_endpoint: None,
                username: "u".to_string(),
                token: "t".to_string(),
            }),
            distribution: vec![
                DistributionConfig {
                    host: "docker.io".to_string(),
                    url: None,
                    username: None,
                    password: None,
                    cleanup: false,
                },
                DistributionConfig {
                    host: "registry.internal:5000".to_string(),
                    url: Some("http://registry.internal:5000".to_string()),
                    username: None,
                    password: None,
                    cleanup: true,
                },
            ],
        };

        let registries = create_default_registries(&config);

        assert_eq!(registries.get("iad.ocir.io").provider(), Provider::Ocir);
        assert_eq!(registries.get("docker.io").host(), "docker.io");
        assert!(registries.cleanup_enabled("registry.internal:5000"));
        assert!(!registries.cleanup_enabled("docker.io"));
    }
}
