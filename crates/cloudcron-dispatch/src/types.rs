use serde::{Deserialize, Serialize};

/// Opaque session token returned by `POST /token/`.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthToken(String);

impl AuthToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Value for the `Authorization` header.
    pub fn header_value(&self) -> String {
        format!("cc_auth_token=\"{}\"", self.0)
    }
}

// never print the token itself
impl std::fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "AuthToken(<{} chars>)", self.0.len())
    }
}

/// A live remote worker process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerHandle {
    #[serde(rename = "wrk_id")]
    pub worker_id: String,
    pub command: String,
    #[serde(rename = "params", default)]
    pub parameters: String,
}

// API response types, deserialization only

#[derive(Deserialize)]
pub(crate) struct TokenResponse {
    pub token: String,
}
