//! Per-resource settings shared by every binding of one entity type.

use crate::error::CrudError;
use crate::operation::OperationScope;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ResourceConfig {
    /// Used in topics, routes and error messages.
    pub domain_name: String,
    /// API version segment of RSocket routes.
    pub version: String,
    pub base_uri: String,
    pub id_name: String,
    /// Capacity of the repository mailbox.
    pub buffer_size: usize,
    /// Operations exposed on every transport.
    pub operations: OperationScope,
    /// How long asynchronous clients wait for a callback.
    pub callback_timeout_ms: u64,
}

impl Default for ResourceConfig {
    fn default() -> Self {
        Self {
            domain_name: "domain".to_string(),
            version: "v1".to_string(),
            base_uri: "/api/v1/domain".to_string(),
            id_name: "id".to_string(),
            buffer_size: 32,
            operations: OperationScope::all(),
            callback_timeout_ms: 5000,
        }
    }
}

impl ResourceConfig {
    /// Defaults with every name derived from `domain_name`.
    pub fn for_domain(domain_name: &str) -> Self {
        let defaults = Self::default();
        Self {
            domain_name: domain_name.to_string(),
            base_uri: format!("/api/{}/{domain_name}", defaults.version),
            ..defaults
        }
    }

    pub fn from_json(raw: &str) -> Result<Self, CrudError> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), CrudError> {
        if self.domain_name.trim().is_empty() {
            return Err(CrudError::BadRequest("domainName must not be blank".to_string()));
        }
        if !self.base_uri.starts_with('/') {
            return Err(CrudError::BadRequest(format!(
                "baseUri '{}' must start with '/'",
                self.base_uri
            )));
        }
        if self.buffer_size == 0 {
            return Err(CrudError::BadRequest("bufferSize must be positive".to_string()));
        }
        Ok(())
    }

    pub fn callback_timeout(&self) -> Duration {
        Duration::from_millis(self.callback_timeout_ms)
    }
}
