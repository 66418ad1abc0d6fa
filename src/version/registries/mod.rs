//! Registry adapters for listing, dating and deleting image tags

pub mod auth;
pub mod distribution;
pub mod ocir;

use chrono::{DateTime, Utc};

use crate::version::error::RegistryError;

pub use distribution::DistributionRegistry;
pub use ocir::OcirRegistry;

/// Parses an RFC 3339 timestamp from a registry response, normalized to UTC
pub(crate) fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, RegistryError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| RegistryError::InvalidResponse(format!("bad timestamp {}: {}", raw, e)))
}
