//! Runtime configuration
//!
//! Loaded from a YAML file (default `cinv.yml`) and overlaid with
//! environment variables, typically sourced from a `.env` file.
//!
//! Example:
//! ```yaml
//! orchestrator:
//!   max_concurrent_extractors: 8
//!   job_timeout_seconds: 3600
//! transport:
//!   type: http
//!   endpoint_url: https://scanner.internal/api/v1/artifacts
//!   max_retries: 3
//! providers:
//!   aws:
//!     snapshot_dir: ./snapshots/aws
//!     account_id: "123456789012"
//!     services:
//!       - name: ec2
//!         resource_type: instance
//!         id_field: InstanceId
//! schedules:
//!   - name: nightly
//!     cron_expression: "0 2 * * *"
//!     providers: [aws]
//! ```

use crate::model::JobRequest;
use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub providers: BTreeMap<String, ProviderConfig>,
    #[serde(default)]
    pub schedules: Vec<ScheduleConfig>,
}

impl AppConfig {
    /// Read configuration from a YAML file
    pub fn read(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).with_context(|| {
            format!("Failed to read config file: {}", path.as_ref().display())
        })?;

        let config: Self =
            serde_yaml::from_str(&content).with_context(|| "Failed to parse config YAML")?;

        Ok(config)
    }

    /// Read the file if it exists, otherwise start from defaults
    pub fn read_or_default(path: impl AsRef<Path>) -> Result<Self> {
        if path.as_ref().exists() {
            Self::read(path)
        } else {
            log::debug!(
                "No config file at {}, using defaults",
                path.as_ref().display()
            );
            Ok(Self::default())
        }
    }

    /// Apply environment overrides
    ///
    /// - INVENTORY_TRANSPORT_URL: switches the transport to HTTP with this endpoint
    /// - INVENTORY_TRANSPORT_APIKEY / INVENTORY_TRANSPORT_TOKEN: transport auth
    /// - INVENTORY_MAX_CONCURRENCY: orchestrator worker bound
    pub fn apply_env(&mut self) -> Result<()> {
        if let Ok(url) = std::env::var("INVENTORY_TRANSPORT_URL") {
            self.transport.kind = TransportKind::Http;
            self.transport.endpoint_url = Some(url);
        }

        if let Ok(apikey) = std::env::var("INVENTORY_TRANSPORT_APIKEY") {
            self.transport.auth = Some(TransportAuth::Apikey(apikey));
        } else if let Ok(token) = std::env::var("INVENTORY_TRANSPORT_TOKEN") {
            self.transport.auth = Some(TransportAuth::Bearer(token));
        }

        if let Ok(value) = std::env::var("INVENTORY_MAX_CONCURRENCY") {
            self.orchestrator.max_concurrent_extractors = value
                .parse()
                .with_context(|| format!("Invalid INVENTORY_MAX_CONCURRENCY: {}", value))?;
        }

        Ok(())
    }

    /// Check cross-field constraints
    pub fn validate(&self) -> Result<()> {
        if self.orchestrator.max_concurrent_extractors == 0 {
            eyre::bail!("orchestrator.max_concurrent_extractors must be greater than zero");
        }
        self.transport.validate()?;
        Ok(())
    }

    /// Providers that are enabled
    pub fn enabled_providers(&self) -> impl Iterator<Item = (&String, &ProviderConfig)> {
        self.providers.iter().filter(|(_, p)| p.enabled)
    }
}

/// Orchestrator limits
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub max_concurrent_extractors: usize,
    pub default_batch_size: usize,
    /// Wall-clock limit per job
    pub job_timeout_seconds: Option<u64>,
    /// Artifacts buffered between an extractor and its batcher
    pub channel_capacity: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_extractors: 8,
            default_batch_size: 100,
            job_timeout_seconds: None,
            channel_capacity: 256,
        }
    }
}

impl OrchestratorConfig {
    pub fn job_timeout(&self) -> Option<Duration> {
        self.job_timeout_seconds.map(Duration::from_secs)
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    Http,
    Filesystem,
    #[default]
    Null,
}

/// Authentication for the HTTP sink
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum TransportAuth {
    Apikey(String),
    Bearer(String),
    Basic { username: String, password: String },
}

/// Transport options
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TransportConfig {
    #[serde(rename = "type", default)]
    pub kind: TransportKind,
    #[serde(default)]
    pub endpoint_url: Option<String>,
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
    #[serde(default)]
    pub max_retries: Option<usize>,
    /// Base delay of the exponential backoff
    #[serde(default)]
    pub retry_delay_seconds: Option<f64>,
    #[serde(default)]
    pub max_retry_delay_seconds: Option<f64>,
    #[serde(default)]
    pub backoff_factor: Option<f32>,
    #[serde(default)]
    pub base_dir: Option<PathBuf>,
    #[serde(default)]
    pub file_pattern: Option<String>,
    #[serde(default)]
    pub auth: Option<TransportAuth>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self::null()
    }
}

impl TransportConfig {
    pub const DEFAULT_TIMEOUT_SECONDS: u64 = 30;
    pub const DEFAULT_MAX_RETRIES: usize = 3;
    pub const DEFAULT_RETRY_DELAY_SECONDS: f64 = 1.0;
    pub const DEFAULT_MAX_RETRY_DELAY_SECONDS: f64 = 60.0;
    pub const DEFAULT_BACKOFF_FACTOR: f32 = 2.0;
    pub const DEFAULT_FILE_PATTERN: &'static str = "{provider}/{service}/{job_id}-{batch}.json";

    pub fn null() -> Self {
        Self {
            kind: TransportKind::Null,
            endpoint_url: None,
            timeout_seconds: None,
            max_retries: None,
            retry_delay_seconds: None,
            max_retry_delay_seconds: None,
            backoff_factor: None,
            base_dir: None,
            file_pattern: None,
            auth: None,
        }
    }

    pub fn http(endpoint_url: impl Into<String>) -> Self {
        Self {
            kind: TransportKind::Http,
            endpoint_url: Some(endpoint_url.into()),
            ..Self::null()
        }
    }

    pub fn filesystem(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            kind: TransportKind::Filesystem,
            base_dir: Some(base_dir.into()),
            ..Self::null()
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds.unwrap_or(Self::DEFAULT_TIMEOUT_SECONDS))
    }

    pub fn file_pattern(&self) -> &str {
        self.file_pattern
            .as_deref()
            .unwrap_or(Self::DEFAULT_FILE_PATTERN)
    }

    pub fn validate(&self) -> Result<()> {
        match self.kind {
            TransportKind::Http => {
                let url = self
                    .endpoint_url
                    .as_deref()
                    .ok_or_else(|| eyre::eyre!("transport.endpoint_url is required for http"))?;
                Url::parse(url).with_context(|| format!("Invalid transport.endpoint_url: {}", url))?;
            }
            TransportKind::Filesystem => {
                if self.base_dir.is_none() {
                    eyre::bail!("transport.base_dir is required for filesystem");
                }
            }
            TransportKind::Null => {}
        }
        for (field, value) in [
            ("retry_delay_seconds", self.retry_delay_seconds),
            ("max_retry_delay_seconds", self.max_retry_delay_seconds),
        ] {
            if let Some(seconds) = value
                && !(seconds.is_finite() && seconds >= 0.0)
            {
                eyre::bail!("transport.{} must be a finite, non-negative number", field);
            }
        }
        if let Some(factor) = self.backoff_factor
            && !(factor.is_finite() && factor >= 1.0)
        {
            eyre::bail!("transport.backoff_factor must be a finite number of at least 1");
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    #[default]
    Memory,
    Directory,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StoreConfig {
    #[serde(rename = "type", default)]
    pub kind: StoreKind,
    #[serde(default)]
    pub path: Option<PathBuf>,
}

/// One provider served from recorded API payloads
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProviderConfig {
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    pub snapshot_dir: PathBuf,
    #[serde(default)]
    pub account_id: Option<String>,
    #[serde(default)]
    pub services: Vec<ServiceConfig>,
}

fn enabled_by_default() -> bool {
    true
}

/// How to normalize one service's records
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServiceConfig {
    pub name: String,
    /// Type segment of `provider:service:type`
    pub resource_type: String,
    /// Field holding the resource id
    pub id_field: String,
    #[serde(default)]
    pub region_field: Option<String>,
    /// Field holding a label/tag object
    #[serde(default)]
    pub labels_field: Option<String>,
}

/// A schedule declared in the config file
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScheduleConfig {
    #[serde(default)]
    pub name: Option<String>,
    pub cron_expression: String,
    pub providers: BTreeSet<String>,
    #[serde(default)]
    pub services: BTreeSet<String>,
    #[serde(default)]
    pub regions: BTreeSet<String>,
    #[serde(default)]
    pub filters: BTreeMap<String, Value>,
    #[serde(default)]
    pub batch_size: Option<usize>,
}

impl ScheduleConfig {
    pub fn to_request(&self, default_batch_size: usize) -> JobRequest {
        JobRequest {
            providers: self.providers.clone(),
            services: self.services.clone(),
            regions: self.regions.clone(),
            filters: self.filters.clone(),
            batch_size: self.batch_size.unwrap_or(default_batch_size),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    const SAMPLE: &str = r#"
orchestrator:
  max_concurrent_extractors: 4
  job_timeout_seconds: 600
transport:
  type: filesystem
  base_dir: /tmp/out
  max_retries: 5
providers:
  aws:
    snapshot_dir: ./snapshots/aws
    services:
      - name: ec2
        resource_type: instance
        id_field: InstanceId
  gcp:
    enabled: false
    snapshot_dir: ./snapshots/gcp
schedules:
  - name: nightly
    cron_expression: "0 2 * * *"
    providers: [aws]
"#;

    #[test]
    fn test_parse_sample() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("cinv.yml");
        std::fs::write(&path, SAMPLE).unwrap();

        let config = AppConfig::read(&path).unwrap();
        assert_eq!(config.orchestrator.max_concurrent_extractors, 4);
        assert_eq!(config.orchestrator.default_batch_size, 100);
        assert_eq!(config.transport.kind, TransportKind::Filesystem);
        assert_eq!(config.transport.max_retries, Some(5));
        assert_eq!(config.enabled_providers().count(), 1);
        assert_eq!(config.providers["aws"].services[0].id_field, "InstanceId");
        assert_eq!(config.schedules[0].to_request(100).batch_size, 100);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let temp = TempDir::new().unwrap();
        let config = AppConfig::read_or_default(temp.path().join("absent.yml")).unwrap();
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.transport.kind, TransportKind::Null);
    }

    #[test]
    fn test_http_requires_valid_url() {
        let mut transport = TransportConfig::http("not a url");
        assert!(transport.validate().is_err());

        transport.endpoint_url = Some("https://scanner.example.com/ingest".to_string());
        assert!(transport.validate().is_ok());
    }

    #[test]
    fn test_retry_settings_must_be_finite() {
        let yaml = "retry_delay_seconds: .inf\n";
        let transport: TransportConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(transport.retry_delay_seconds, Some(f64::INFINITY));
        assert!(transport.validate().is_err());

        let transport = TransportConfig {
            max_retry_delay_seconds: Some(f64::INFINITY),
            ..TransportConfig::null()
        };
        assert!(transport.validate().is_err());

        let transport = TransportConfig {
            backoff_factor: Some(0.5),
            ..TransportConfig::null()
        };
        assert!(transport.validate().is_err());

        let transport = TransportConfig {
            retry_delay_seconds: Some(0.25),
            max_retry_delay_seconds: Some(30.0),
            backoff_factor: Some(1.5),
            ..TransportConfig::null()
        };
        assert!(transport.validate().is_ok());
    }

    #[test]
    fn test_filesystem_requires_base_dir() {
        let transport = TransportConfig {
            kind: TransportKind::Filesystem,
            ..TransportConfig::null()
        };
        assert!(transport.validate().is_err());
    }

    #[test]
    #[serial]
    fn test_env_overrides() {
        unsafe {
            std::env::set_var("INVENTORY_TRANSPORT_URL", "https://scanner.example.com/ingest");
            std::env::set_var("INVENTORY_TRANSPORT_TOKEN", "t0ken");
            std::env::set_var("INVENTORY_MAX_CONCURRENCY", "2");
        }

        let mut config = AppConfig::default();
        config.apply_env().unwrap();

        unsafe {
            std::env::remove_var("INVENTORY_TRANSPORT_URL");
            std::env::remove_var("INVENTORY_TRANSPORT_TOKEN");
            std::env::remove_var("INVENTORY_MAX_CONCURRENCY");
        }

        assert_eq!(config.transport.kind, TransportKind::Http);
        assert_eq!(
            config.transport.auth,
            Some(TransportAuth::Bearer("t0ken".to_string()))
        );
        assert_eq!(config.orchestrator.max_concurrent_extractors, 2);
    }
}
