use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Claims read from the platform's bearer token
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (user ID)
    #[serde(default)]
    pub sub: Option<String>,
    /// Expiration time (Unix timestamp)
    #[serde(default)]
    pub exp: Option<i64>,
    /// Issued at (Unix timestamp)
    #[serde(default)]
    pub iat: Option<i64>,
    /// User roles
    #[serde(default)]
    pub roles: Vec<String>,
    /// Additional custom claims
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

impl Claims {
    /// Subject id: `sub`, falling back to a `userId` or `id` claim
    pub fn subject(&self) -> Option<&str> {
        self.sub
            .as_deref()
            .or_else(|| self.extra_str("userId"))
            .or_else(|| self.extra_str("id"))
            .filter(|s| !s.is_empty())
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }

    /// Tokens without `exp` never expire
    pub fn is_expired(&self) -> bool {
        let now = chrono::Utc::now().timestamp();
        self.exp.is_some_and(|exp| exp < now)
    }

    fn extra_str(&self, key: &str) -> Option<&str> {
        self.extra.get(key).and_then(|v| v.as_str())
    }
}
