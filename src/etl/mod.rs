//! Extraction contract
//!
//! Every provider/service pair is an [`Extractor`]: a lazy record stream plus
//! a pure transform into the canonical [`Artifact`](crate::model::Artifact).

mod extract;

pub use extract::{Extractor, ExtractorMetadata, Filters, RawRecord, RecordStream};
