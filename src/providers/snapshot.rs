//! Snapshot provider
//!
//! Replays recorded API payloads from NDJSON files, one resource per line:
//! ```text
//! <snapshot_dir>/<service>.ndjson            all regions in one file
//! <snapshot_dir>/<service>/<region>.ndjson   one file per region
//! ```
//! Records are streamed line by line. Malformed lines are logged and
//! skipped, like an inaccessible resource in a live API.

use crate::config::ServiceConfig;
use crate::error::{AuthenticationError, ExtractError, TransformError};
use crate::etl::{Extractor, ExtractorMetadata, Filters, RawRecord, RecordStream};
use crate::model::Artifact;
use crate::session::{CloudSession, Connector, Credentials, ServiceClient};
use async_stream::stream;
use async_trait::async_trait;
use futures::StreamExt;
use serde_json::Value;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncBufReadExt;

/// Region key used when a job does not name regions
pub const DEFAULT_REGION: &str = "default";

/// Connects sessions to a snapshot directory
#[derive(Debug, Clone)]
pub struct SnapshotConnector {
    root: PathBuf,
}

impl SnapshotConnector {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }
}

#[async_trait]
impl Connector for SnapshotConnector {
    async fn authenticate(&self, provider: &str, credentials: &Credentials) -> Result<(), AuthenticationError> {
        log::debug!("Authenticating {} against {} with {}", provider, self.root.display(), credentials);
        match tokio::fs::metadata(&self.root).await {
            Ok(meta) if meta.is_dir() => Ok(()),
            Ok(_) => Err(AuthenticationError::new(
                provider,
                format!("{} is not a directory", self.root.display()),
            )),
            Err(e) => Err(AuthenticationError::new(
                provider,
                format!("snapshot directory {}: {}", self.root.display(), e),
            )),
        }
    }

    async fn connect(
        &self,
        _provider: &str,
        _credentials: &Credentials,
        service: &str,
        _region: &str,
    ) -> Result<ServiceClient, AuthenticationError> {
        Ok(Arc::new(SnapshotClient {
            root: self.root.clone(),
            service: service.to_string(),
        }))
    }
}

/// Per-service handle onto the snapshot files
#[derive(Debug)]
pub struct SnapshotClient {
    root: PathBuf,
    service: String,
}

impl SnapshotClient {
    /// Files to replay for a region, in read order, plus whether records
    /// still need filtering by region.
    async fn files_for(&self, region: Option<&str>) -> std::io::Result<(Vec<PathBuf>, bool)> {
        let flat = self.root.join(format!("{}.ndjson", self.service));
        let per_region = self.root.join(&self.service);

        if let Some(region) = region {
            let path = per_region.join(region_file(region)?);
            if tokio::fs::try_exists(&path).await? {
                return Ok((vec![path], false));
            }
            if tokio::fs::try_exists(&flat).await? {
                return Ok((vec![flat], true));
            }
            return Ok((Vec::new(), false));
        }

        let mut files = Vec::new();
        if tokio::fs::try_exists(&flat).await? {
            files.push(flat);
        }
        if tokio::fs::try_exists(&per_region).await? {
            let mut entries = tokio::fs::read_dir(&per_region).await?;
            let mut regional = Vec::new();
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if path.extension().and_then(|s| s.to_str()) == Some("ndjson") {
                    regional.push(path);
                }
            }
            regional.sort();
            files.extend(regional);
        }
        Ok((files, false))
    }
}

/// `<region>.ndjson`, refusing region keys that are not a single plain path segment
fn region_file(region: &str) -> std::io::Result<String> {
    let mut components = Path::new(region).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) if !region.contains(['/', '\\']) => {
            Ok(format!("{}.ndjson", region))
        }
        _ => Err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("invalid region '{}'", region),
        )),
    }
}

/// Extractor replaying one service of a snapshot provider
pub struct SnapshotExtractor {
    provider: String,
    account_id: Option<String>,
    service: ServiceConfig,
    session: Arc<CloudSession>,
}

impl SnapshotExtractor {
    pub fn new(
        provider: impl Into<String>,
        account_id: Option<String>,
        service: ServiceConfig,
        session: Arc<CloudSession>,
    ) -> Self {
        Self {
            provider: provider.into(),
            account_id,
            service,
            session,
        }
    }

    fn region_of<'r>(&self, record: &'r Value) -> Option<&'r str> {
        self.service
            .region_field
            .as_deref()
            .and_then(|field| record.get(field))
            .and_then(Value::as_str)
    }
}

/// Top-level equality match against every filter
fn matches_filters(record: &Value, filters: &Filters) -> bool {
    filters
        .iter()
        .all(|(key, expected)| record.get(key) == Some(expected))
}

fn id_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn label_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Labels as a `{key: value}` object or a `[{Key, Value}]` tag list
fn labels_of(value: &Value) -> Vec<(String, String)> {
    match value {
        Value::Object(map) => map
            .iter()
            .map(|(k, v)| (k.clone(), label_string(v)))
            .collect(),
        Value::Array(tags) => tags
            .iter()
            .filter_map(|tag| {
                let key = tag.get("Key").or_else(|| tag.get("key"))?.as_str()?;
                let value = tag
                    .get("Value")
                    .or_else(|| tag.get("value"))
                    .map(label_string)
                    .unwrap_or_default();
                Some((key.to_string(), value))
            })
            .collect(),
        _ => Vec::new(),
    }
}

impl Extractor for SnapshotExtractor {
    fn metadata(&self) -> ExtractorMetadata {
        ExtractorMetadata::new(
            &self.provider,
            &self.service.name,
            vec![format!(
                "{}:{}:{}",
                self.provider, self.service.name, self.service.resource_type
            )],
        )
    }

    fn extract<'a>(&'a self, region: Option<&'a str>, filters: &'a Filters) -> RecordStream<'a> {
        stream! {
            let client = match self
                .session
                .client::<SnapshotClient>(&self.service.name, region.unwrap_or(DEFAULT_REGION))
                .await
            {
                Ok(client) => client,
                Err(e) => {
                    yield Err(ExtractError::from(e));
                    return;
                }
            };

            let (files, filter_region) = match client.files_for(region).await {
                Ok(found) => found,
                Err(e) => {
                    yield Err(ExtractError::Io(e));
                    return;
                }
            };
            if files.is_empty() {
                log::debug!(
                    "No snapshot for {}:{} in region {}",
                    self.provider,
                    self.service.name,
                    region.unwrap_or(DEFAULT_REGION)
                );
            }

            for path in files {
                let file = match tokio::fs::File::open(&path).await {
                    Ok(file) => file,
                    Err(e) => {
                        yield Err(ExtractError::Other(format!("failed to open {}: {}", path.display(), e)));
                        return;
                    }
                };
                let mut lines = tokio::io::BufReader::new(file).lines();
                let mut line_no = 0usize;

                loop {
                    let line = match lines.next_line().await {
                        Ok(Some(line)) => line,
                        Ok(None) => break,
                        Err(e) => {
                            yield Err(ExtractError::Io(e));
                            return;
                        }
                    };
                    line_no += 1;
                    if line.trim().is_empty() {
                        continue;
                    }

                    let record: Value = match serde_json::from_str(&line) {
                        Ok(record) => record,
                        Err(e) => {
                            log::warn!("Skipping malformed record {}:{}: {}", path.display(), line_no, e);
                            continue;
                        }
                    };

                    if filter_region && self.region_of(&record) != region {
                        continue;
                    }
                    if !matches_filters(&record, filters) {
                        continue;
                    }
                    yield Ok(record);
                }
            }
        }
        .boxed()
    }

    fn transform(&self, raw: RawRecord) -> Result<Artifact, TransformError> {
        let id = raw
            .get(&self.service.id_field)
            .and_then(id_string)
            .ok_or_else(|| TransformError::MissingField(self.service.id_field.clone()))?;

        let resource_type = format!(
            "{}:{}:{}",
            self.provider, self.service.name, self.service.resource_type
        );
        let mut artifact =
            Artifact::new(&self.provider, resource_type, id).with_service(&self.service.name);

        if let Some(region) = self.region_of(&raw) {
            artifact = artifact.with_region(region);
        }
        if let Some(account_id) = &self.account_id {
            artifact = artifact.with_account(account_id);
        }
        if let Some(labels) = self
            .service
            .labels_field
            .as_deref()
            .and_then(|field| raw.get(field))
        {
            for (key, value) in labels_of(labels) {
                artifact = artifact.with_label(key, value);
            }
        }

        Ok(artifact.with_configuration(raw))
    }
}
