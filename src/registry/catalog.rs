//! Explicit catalog of extractor implementations, built at startup

use crate::etl::Extractor;
use crate::session::CloudSession;
use std::collections::BTreeSet;
use std::sync::Arc;

type BuildFn = dyn Fn(Arc<CloudSession>) -> Arc<dyn Extractor> + Send + Sync;

/// Knows how to instantiate one extractor for a provider/service pair.
///
/// Static configuration is captured by the `build` closure.
#[derive(Clone)]
pub struct ExtractorFactory {
    provider: String,
    service: String,
    build: Arc<BuildFn>,
}

impl ExtractorFactory {
    pub fn new<F>(provider: impl Into<String>, service: impl Into<String>, build: F) -> Self
    where
        F: Fn(Arc<CloudSession>) -> Arc<dyn Extractor> + Send + Sync + 'static,
    {
        Self {
            provider: provider.into(),
            service: service.into(),
            build: Arc::new(build),
        }
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn build(&self, session: Arc<CloudSession>) -> Arc<dyn Extractor> {
        (self.build)(session)
    }
}

impl std::fmt::Debug for ExtractorFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ExtractorFactory({}:{})", self.provider, self.service)
    }
}

/// Every extractor implementation the binary knows about
#[derive(Debug, Clone, Default)]
pub struct ExtractorCatalog {
    factories: Vec<ExtractorFactory>,
}

impl ExtractorCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a factory, replacing an existing one for the same pair
    pub fn register(&mut self, factory: ExtractorFactory) -> &mut Self {
        self.factories
            .retain(|f| !(f.provider == factory.provider && f.service == factory.service));
        self.factories.push(factory);
        self
    }

    pub fn with(mut self, factory: ExtractorFactory) -> Self {
        self.register(factory);
        self
    }

    /// Factories compatible with `provider`
    pub fn for_provider(&self, provider: &str) -> Vec<&ExtractorFactory> {
        self.factories
            .iter()
            .filter(|f| f.provider == provider)
            .collect()
    }

    pub fn providers(&self) -> BTreeSet<&str> {
        self.factories.iter().map(|f| f.provider.as_str()).collect()
    }

    pub fn services(&self, provider: &str) -> BTreeSet<&str> {
        self.for_provider(provider)
            .into_iter()
            .map(|f| f.service.as_str())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}
