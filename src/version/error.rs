use std::time::Duration;

use thiserror::Error;

/// Failures talking to a registry.
///
/// Cloneable so a single in-flight fetch can hand its outcome to every waiter.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Registry unavailable: {0}")]
    Unavailable(String),

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Rate limited: retry after {retry_after_secs:?} seconds")]
    RateLimited { retry_after_secs: Option<u64> },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("Cancelled")]
    Cancelled,

    #[error("Delete failed for {tag}: {message}")]
    DeleteFailed { tag: String, message: String },
}

impl RegistryError {
    pub fn is_auth(&self) -> bool {
        matches!(self, RegistryError::Auth(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, RegistryError::NotFound(_))
    }
}

impl From<reqwest::Error> for RegistryError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            RegistryError::Unavailable(format!("request timed out: {}", e))
        } else if e.is_decode() {
            RegistryError::InvalidResponse(e.to_string())
        } else {
            RegistryError::Unavailable(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn predicates_match_their_variant() {
        assert!(RegistryError::Auth("denied".into()).is_auth());
        assert!(!RegistryError::Unavailable("503".into()).is_auth());
        assert!(RegistryError::NotFound("app:abc".into()).is_not_found());
        assert!(!RegistryError::Cancelled.is_not_found());
    }
}
