//! Canonical artifact schema delivered to downstream scanners
//!
//! Wire format:
//! ```json
//! {
//!   "cloud_provider": "aws",
//!   "resource_type": "aws:ec2:instance",
//!   "metadata": {
//!     "resource_id": "i-0abc",
//!     "service": "ec2",
//!     "region": "us-east-1",
//!     "account_id": "123456789012",
//!     "labels": {"env": "prod"}
//!   },
//!   "configuration": {},
//!   "raw": {}
//! }
//! ```

use crate::error::TransformError;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::LazyLock;

static RESOURCE_TYPE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([a-z0-9_-]+):([a-z0-9_-]+):([A-Za-z0-9_./-]+)$")
        .expect("resource type pattern is valid")
});

/// Identity and placement of a resource
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ArtifactMetadata {
    pub resource_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscription_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_group: Option<String>,
    /// Always serialized, possibly empty
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

/// One normalized resource record
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Artifact {
    pub cloud_provider: String,
    /// `provider:service:type`
    pub resource_type: String,
    pub metadata: ArtifactMetadata,
    #[serde(default)]
    pub configuration: Value,
    /// Original API payload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw: Option<Value>,
}

impl Artifact {
    /// Start an artifact for `provider`, with `resource_type` as
    /// `provider:service:type`.
    pub fn new(
        provider: impl Into<String>,
        resource_type: impl Into<String>,
        resource_id: impl Into<String>,
    ) -> Self {
        Self {
            cloud_provider: provider.into(),
            resource_type: resource_type.into(),
            metadata: ArtifactMetadata {
                resource_id: resource_id.into(),
                ..Default::default()
            },
            configuration: Value::Object(Default::default()),
            raw: None,
        }
    }

    pub fn with_service(mut self, service: impl Into<String>) -> Self {
        self.metadata.service = Some(service.into());
        self
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.metadata.region = Some(region.into());
        self
    }

    pub fn with_account(mut self, account_id: impl Into<String>) -> Self {
        self.metadata.account_id = Some(account_id.into());
        self
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.labels.insert(key.into(), value.into());
        self
    }

    pub fn with_configuration(mut self, configuration: Value) -> Self {
        self.configuration = configuration;
        self
    }

    pub fn with_raw(mut self, raw: Value) -> Self {
        self.raw = Some(raw);
        self
    }

    /// Check the artifact invariants.
    ///
    /// - `metadata.resource_id` is non-empty
    /// - `resource_type` is `provider:service:type`
    /// - the provider prefix equals `cloud_provider`
    pub fn validate(&self) -> Result<(), TransformError> {
        if self.metadata.resource_id.trim().is_empty() {
            return Err(TransformError::Invalid(
                "metadata.resource_id must not be empty".to_string(),
            ));
        }

        let captures = RESOURCE_TYPE.captures(&self.resource_type).ok_or_else(|| {
            TransformError::Invalid(format!(
                "resource_type '{}' does not match provider:service:type",
                self.resource_type
            ))
        })?;

        if &captures[1] != self.cloud_provider {
            return Err(TransformError::Invalid(format!(
                "resource_type '{}' does not belong to provider '{}'",
                self.resource_type, self.cloud_provider
            )));
        }

        Ok(())
    }
}
