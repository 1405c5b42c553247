use std::collections::HashMap;

use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Token payload issued by the identity provider. `sub` is the user id used
/// for both the message API and the presence registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: i64,
    #[serde(default)]
    pub iat: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Provider-specific claims we carry but do not interpret
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

impl Claims {
    /// Claims for `user_id` valid for `ttl_seconds` from now.
    pub fn for_user(user_id: impl Into<String>, ttl_seconds: i64) -> Self {
        let now = Utc::now().timestamp();
        Self {
            sub: user_id.into(),
            exp: now + ttl_seconds,
            iat: now,
            email: None,
            extra: HashMap::new(),
        }
    }

    pub fn user_id(&self) -> &str {
        &self.sub
    }
}
