//! Filesystem sink
//!
//! Writes each batch as a JSON array to a path rendered from a file
//! pattern. Files are written to a temporary sibling and renamed into place,
//! so readers never observe a half-written batch.

use super::{Batch, Transport};
use crate::error::TransportError;
use async_trait::async_trait;
use chrono::Utc;
use std::io::Write;
use std::path::{Component, Path, PathBuf};

/// Delivers batches as JSON files under a base directory
#[derive(Debug, Clone)]
pub struct FilesystemTransport {
    base_dir: PathBuf,
    pattern: String,
}

impl FilesystemTransport {
    /// Create the sink, creating `base_dir` if needed.
    ///
    /// Pattern placeholders: `{job_id}`, `{provider}`, `{service}`,
    /// `{batch}`, `{timestamp}`.
    pub fn new(base_dir: impl AsRef<Path>, pattern: impl Into<String>) -> Result<Self, TransportError> {
        let base_dir = base_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&base_dir)?;
        Ok(Self {
            base_dir,
            pattern: pattern.into(),
        })
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Target path for a batch
    pub fn path_for(&self, batch: &Batch) -> Result<PathBuf, TransportError> {
        let rendered = self
            .pattern
            .replace("{job_id}", &batch.job_id.to_string())
            .replace("{provider}", &sanitize(&batch.provider))
            .replace("{service}", &sanitize(&batch.service))
            .replace("{batch}", &format!("{:05}", batch.sequence))
            .replace(
                "{timestamp}",
                &Utc::now().format("%Y%m%dT%H%M%S%.3fZ").to_string(),
            );

        let relative = Path::new(&rendered);
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(TransportError::Terminal(format!(
                "file pattern renders outside the base directory: {}",
                rendered
            )));
        }

        Ok(self.base_dir.join(relative))
    }
}

/// Keep path segments from escaping their directory
fn sanitize(segment: &str) -> String {
    segment
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' => '_',
            c => c,
        })
        .collect()
}

/// Write `content` to `path` via a temp file in the same directory
fn write_atomic(path: &Path, content: &[u8]) -> std::io::Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| std::io::Error::other(format!("no parent directory for {}", path.display())))?;
    std::fs::create_dir_all(parent)?;

    let mut temp = tempfile::NamedTempFile::new_in(parent)?;
    temp.write_all(content)?;
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

#[async_trait]
impl Transport for FilesystemTransport {
    fn name(&self) -> &'static str {
        "filesystem"
    }

    async fn deliver(&self, batch: &Batch) -> Result<(), TransportError> {
        let path = self.path_for(batch)?;
        let content = serde_json::to_vec_pretty(&batch.artifacts)?;

        log::debug!(
            "Writing batch {} of {}:{} ({} artifacts) to {}",
            batch.sequence,
            batch.provider,
            batch.service,
            batch.len(),
            path.display()
        );

        tokio::task::spawn_blocking(move || write_atomic(&path, &content))
            .await
            .map_err(|e| TransportError::Io(std::io::Error::other(e)))??;
        Ok(())
    }
}
