//! Extractor trait for pulling resources from one cloud service

use crate::error::{ExtractError, TransformError};
use crate::model::Artifact;
use futures::stream::BoxStream;
use serde_json::Value;
use std::collections::BTreeMap;

/// Raw API payload for one resource
pub type RawRecord = Value;

/// Request filters handed to extractors (provider-specific semantics)
pub type Filters = BTreeMap<String, Value>;

/// Lazy sequence of raw records.
///
/// An `Err` item is an extractor-level failure and ends the extraction for
/// that extractor.
pub type RecordStream<'a> = BoxStream<'a, Result<RawRecord, ExtractError>>;

/// Static description of an extractor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractorMetadata {
    pub cloud_provider: String,
    pub service_name: String,
    pub resource_types: Vec<String>,
}

impl ExtractorMetadata {
    pub fn new(
        cloud_provider: impl Into<String>,
        service_name: impl Into<String>,
        resource_types: Vec<String>,
    ) -> Self {
        Self {
            cloud_provider: cloud_provider.into(),
            service_name: service_name.into(),
            resource_types,
        }
    }
}

/// Extractor trait for listing and normalizing one service's resources
///
/// Implementors own pagination against the cloud API. Resource-level
/// failures (one object inaccessible) are logged and skipped inside
/// `extract`; only failures that make the whole service unreadable are
/// yielded as `Err`.
///
/// # Example
/// ```no_run
/// use cloud_inventory::etl::{Extractor, ExtractorMetadata, Filters, RawRecord, RecordStream};
/// use cloud_inventory::error::TransformError;
/// use cloud_inventory::model::Artifact;
/// use futures::StreamExt;
///
/// struct BucketExtractor {
///     buckets: Vec<RawRecord>,
/// }
///
/// impl Extractor for BucketExtractor {
///     fn metadata(&self) -> ExtractorMetadata {
///         ExtractorMetadata::new("aws", "s3", vec!["aws:s3:bucket".to_string()])
///     }
///
///     fn extract<'a>(&'a self, _region: Option<&'a str>, _filters: &'a Filters) -> RecordStream<'a> {
///         futures::stream::iter(self.buckets.clone().into_iter().map(Ok)).boxed()
///     }
///
///     fn transform(&self, raw: RawRecord) -> Result<Artifact, TransformError> {
///         let name = raw["Name"]
///             .as_str()
///             .ok_or_else(|| TransformError::MissingField("Name".to_string()))?;
///         Ok(Artifact::new("aws", "aws:s3:bucket", name).with_raw(raw.clone()))
///     }
/// }
/// ```
pub trait Extractor: Send + Sync {
    fn metadata(&self) -> ExtractorMetadata;

    /// Start a fresh pull for `region` (`None` = the service's default scope)
    fn extract<'a>(&'a self, region: Option<&'a str>, filters: &'a Filters) -> RecordStream<'a>;

    /// Normalize one raw record. Must not perform I/O.
    ///
    /// # Errors
    /// Returns an error if the record cannot be mapped; the orchestrator drops
    /// that record and carries on.
    fn transform(&self, raw: RawRecord) -> Result<Artifact, TransformError>;
}
