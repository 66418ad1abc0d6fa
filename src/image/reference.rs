//! Image reference parsing
//!
//! ```text
//!   nginx                        → docker.io/nginx:latest
//!   ghcr.io/team/app:1.2.0       → ghcr.io/team/app:1.2.0
//!   localhost:5000/app@sha256:.. → rejected (no tag)
//!   quay.io/org/app:abc@sha256:..→ quay.io/org/app:abc
//! ```

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Serialize, Serializer};
use thiserror::Error;

pub const DOCKER_HUB: &str = "docker.io";
pub const DEFAULT_TAG: &str = "latest";

const DOCKER_HUB_ALIASES: [&str; 2] = ["index.docker.io", "registry-1.docker.io"];

static TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[\w][\w.-]{0,127}$").expect("tag pattern is valid"));

static PATH_COMPONENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9]+(?:(?:[._]|__|-+)[a-z0-9]+)*$").expect("path pattern is valid")
});

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ReferenceError {
    #[error("Empty image reference")]
    Empty,

    #[error("Image reference {0} pins a digest without a tag")]
    DigestOnly(String),

    #[error("Invalid image reference {reference}: {reason}")]
    Invalid { reference: String, reason: String },
}

/// A deployed image, addressed by tag
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ImageReference {
    pub registry: String,
    pub repository: String,
    pub tag: String,
}

impl ImageReference {
    pub fn new(
        registry: impl Into<String>,
        repository: impl Into<String>,
        tag: impl Into<String>,
    ) -> Self {
        Self {
            registry: registry.into(),
            repository: repository.into(),
            tag: tag.into(),
        }
    }

    /// `registry/repository`, the key repositories are grouped by
    pub fn repository_key(&self) -> String {
        format!("{}/{}", self.registry, self.repository)
    }
}

fn is_registry_host(segment: &str) -> bool {
    segment.contains('.') || segment.contains(':') || segment == "localhost"
}

fn invalid(reference: &str, reason: &str) -> ReferenceError {
    ReferenceError::Invalid {
        reference: reference.to_string(),
        reason: reason.to_string(),
    }
}

impl FromStr for ImageReference {
    type Err = ReferenceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let reference = s.trim();
        if reference.is_empty() {
            return Err(ReferenceError::Empty);
        }

        let (name, digest) = match reference.split_once('@') {
            Some((name, digest)) => (name, Some(digest)),
            None => (reference, None),
        };
        if digest.is_some_and(str::is_empty) {
            return Err(invalid(reference, "empty digest"));
        }

        // A ':' after the last '/' separates the tag; earlier ones belong to a port.
        let last_slash = name.rfind('/').map_or(0, |i| i + 1);
        let (path, tag) = match name[last_slash..].rfind(':') {
            Some(i) => (&name[..last_slash + i], Some(&name[last_slash + i + 1..])),
            None => (name, None),
        };

        let tag = match (tag, digest) {
            (Some(tag), _) => tag,
            (None, Some(_)) => return Err(ReferenceError::DigestOnly(reference.to_string())),
            (None, None) => DEFAULT_TAG,
        };
        if !TAG.is_match(tag) {
            return Err(invalid(reference, "malformed tag"));
        }

        let (registry, repository) = match path.split_once('/') {
            Some((first, rest)) if is_registry_host(first) => (first, rest),
            _ => (DOCKER_HUB, path),
        };
        let registry = if DOCKER_HUB_ALIASES.contains(&registry) {
            DOCKER_HUB
        } else {
            registry
        };

        let repository = match registry {
            DOCKER_HUB => repository.strip_prefix("library/").unwrap_or(repository),
            _ => repository,
        };
        if repository.is_empty() || !repository.split('/').all(|c| PATH_COMPONENT.is_match(c)) {
            return Err(invalid(reference, "malformed repository"));
        }

        Ok(Self::new(registry, repository, tag))
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}:{}", self.registry, self.repository, self.tag)
    }
}

impl Serialize for ImageReference {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("nginx", "docker.io", "nginx", "latest")]
    #[case("nginx:1.25.3", "docker.io", "nginx", "1.25.3")]
    #[case("library/nginx:1.25.3", "docker.io", "nginx", "1.25.3")]
    #[case("bitnami/redis:7.2", "docker.io", "bitnami/redis", "7.2")]
    #[case("index.docker.io/library/nginx:1", "docker.io", "nginx", "1")]
    #[case("registry-1.docker.io/team/app", "docker.io", "team/app", "latest")]
    #[case("ghcr.io/team/app:v1.2.0", "ghcr.io", "team/app", "v1.2.0")]
    #[case("iad.ocir.io/tenancy/bot:abc1234", "iad.ocir.io", "tenancy/bot", "abc1234")]
    #[case("localhost/app:dev", "localhost", "app", "dev")]
    #[case("registry.internal:5000/team/app", "registry.internal:5000", "team/app", "latest")]
    #[case("quay.io/org/app:abc@sha256:0123", "quay.io", "org/app", "abc")]
    fn parse_valid_references(
        #[case] input: &str,
        #[case] registry: &str,
        #[case] repository: &str,
        #[case] tag: &str,
    ) {
        assert_eq!(
            input.parse::<ImageReference>().unwrap(),
            ImageReference::new(registry, repository, tag)
        );
    }

    #[test]
    fn parse_rejects_digest_only_reference() {
        let result = "ghcr.io/team/app@sha256:0123".parse::<ImageReference>();
        assert!(matches!(result, Err(ReferenceError::DigestOnly(_))));
    }

    #[rstest]
    #[case("ghcr.io/Team/App:1.0.0")]
    #[case("ghcr.io//app:1.0.0")]
    #[case("ghcr.io/app:")]
    #[case("ghcr.io/app:bad tag")]
    #[case("ghcr.io/app@")]
    fn parse_rejects_malformed_references(#[case] input: &str) {
        assert!(matches!(
            input.parse::<ImageReference>(),
            Err(ReferenceError::Invalid { .. })
        ));
    }

    #[test]
    fn parse_rejects_empty_reference() {
        assert_eq!("  ".parse::<ImageReference>(), Err(ReferenceError::Empty));
    }

    #[test]
    fn display_renders_full_reference() {
        let image: ImageReference = "nginx".parse().unwrap();
        assert_eq!(image.to_string(), "docker.io/nginx:latest");
        assert_eq!(image.repository_key(), "docker.io/nginx");
    }

    #[test]
    fn serializes_as_string() {
        let image = ImageReference::new("ghcr.io", "team/app", "1.0.0");
        assert_eq!(
            serde_json::to_string(&image).unwrap(),
            "\"ghcr.io/team/app:1.0.0\""
        );
    }
}
