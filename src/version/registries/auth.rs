//! Registry credentials and the bearer token challenge flow
//!
//! ```text
//!   GET /v2/...            ──▶ 401 WWW-Authenticate: Bearer realm=..,service=..
//!   GET realm?service&scope ──▶ {"token": "..."}
//!   GET /v2/... (Bearer)   ──▶ 200
//! ```

use base64::{Engine as _, engine::general_purpose};
use serde::Deserialize;

use crate::version::error::RegistryError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credentials {
    Anonymous,
    Basic { username: String, password: String },
}

impl Credentials {
    pub fn basic(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self::Basic {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Basic credentials when both halves are configured, anonymous otherwise
    pub fn from_optional(username: Option<&str>, password: Option<&str>) -> Self {
        match (username, password) {
            (Some(u), Some(p)) => Self::basic(u, p),
            _ => Self::Anonymous,
        }
    }

    pub fn to_header_value(&self) -> Option<String> {
        match self {
            Self::Anonymous => None,
            Self::Basic { username, password } => {
                let encoded = general_purpose::STANDARD.encode(format!("{}:{}", username, password));
                Some(format!("Basic {}", encoded))
            }
        }
    }
}

/// Parsed `WWW-Authenticate` challenge
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthChallenge {
    pub scheme: String,
    pub realm: String,
    pub service: Option<String>,
}

impl AuthChallenge {
    pub fn parse(header: &str) -> Result<Self, RegistryError> {
        let (scheme, params) = header
            .trim()
            .split_once(' ')
            .ok_or_else(|| RegistryError::Auth(format!("malformed challenge: {}", header)))?;

        let mut realm = None;
        let mut service = None;

        for (key, value) in split_params(params) {
            match key.as_str() {
                "realm" => realm = Some(value),
                "service" => service = Some(value),
                _ => {}
            }
        }

        let realm =
            realm.ok_or_else(|| RegistryError::Auth(format!("challenge without realm: {}", header)))?;

        Ok(Self {
            scheme: scheme.to_string(),
            realm,
            service,
        })
    }

    pub fn is_bearer(&self) -> bool {
        self.scheme.eq_ignore_ascii_case("bearer")
    }
}

/// Splits `key="value",key=value` pairs, keeping commas inside quotes
/// (scopes such as `repository:app:pull,delete` contain them).
fn split_params(params: &str) -> Vec<(String, String)> {
    let mut pairs = Vec::new();
    let mut current = String::new();
    let mut quoted = false;

    for c in params.chars().chain(std::iter::once(',')) {
        match c {
            '"' => {
                quoted = !quoted;
                current.push(c);
            }
            ',' if !quoted => {
                if let Some((key, value)) = current.split_once('=') {
                    pairs.push((
                        key.trim().to_ascii_lowercase(),
                        value.trim().trim_matches('"').to_string(),
                    ));
                }
                current.clear();
            }
            _ => current.push(c),
        }
    }
    pairs
}

/// Token endpoint response. Registries answer with `token`, `access_token`
/// or both.
#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    token: Option<String>,
    access_token: Option<String>,
}

impl TokenResponse {
    pub fn into_token(self) -> Option<String> {
        self.token.or(self.access_token).filter(|t| !t.is_empty())
    }
}

/// Token scope for a repository
pub fn scope(repository: &str, actions: &str) -> String {
    format!("repository:{}:{}", repository, actions)
}
