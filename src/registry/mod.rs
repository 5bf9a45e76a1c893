//! Runtime index of live extractors.
//!
//! The registry maps `provider:service` to extractor instances bound to a
//! provider's [`CloudSession`]. Providers can be registered and unregistered
//! while jobs are running: readers clone an immutable snapshot, writers
//! build a new snapshot and swap it in, so a resolution never observes a
//! half-applied (un)registration.

mod catalog;

pub use catalog::{ExtractorCatalog, ExtractorFactory};

use crate::error::RegistryError;
use crate::etl::Extractor;
use crate::session::CloudSession;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio::sync::RwLock;

/// One live registry entry
#[derive(Clone)]
pub struct ExtractorRegistration {
    pub provider: String,
    pub service: String,
    pub extractor: Arc<dyn Extractor>,
    pub session: Arc<CloudSession>,
}

impl ExtractorRegistration {
    /// `provider:service`
    pub fn key(&self) -> String {
        format!("{}:{}", self.provider, self.service)
    }
}

impl std::fmt::Debug for ExtractorRegistration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ExtractorRegistration({})", self.key())
    }
}

/// Something requested that the registry could not satisfy
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolutionWarning {
    /// Provider has no live session (disabled, or its credentials failed)
    ProviderNotRegistered { provider: String },
    /// Provider is registered but has no extractor for the service
    ServiceNotFound { provider: String, service: String },
}

impl std::fmt::Display for ResolutionWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ProviderNotRegistered { provider } => {
                write!(f, "provider '{}' is not registered", provider)
            }
            Self::ServiceNotFound { provider, service } => {
                write!(f, "service '{}' not available for provider '{}'", service, provider)
            }
        }
    }
}

/// Immutable result of [`ExtractorRegistry::resolve`]
#[derive(Debug, Clone, Default)]
pub struct Resolution {
    pub extractors: Vec<ExtractorRegistration>,
    pub warnings: Vec<ResolutionWarning>,
    /// Registry version the resolution was taken from
    pub version: u64,
}

impl Resolution {
    pub fn is_empty(&self) -> bool {
        self.extractors.is_empty()
    }
}

struct ProviderEntry {
    session: Arc<CloudSession>,
    extractors: BTreeMap<String, ExtractorRegistration>,
}

#[derive(Default)]
struct Snapshot {
    version: u64,
    providers: BTreeMap<String, Arc<ProviderEntry>>,
}

/// Registry of live extractors, keyed by provider then service
pub struct ExtractorRegistry {
    catalog: ExtractorCatalog,
    current: RwLock<Arc<Snapshot>>,
}

impl ExtractorRegistry {
    pub fn new(catalog: ExtractorCatalog) -> Self {
        Self {
            catalog,
            current: RwLock::new(Arc::new(Snapshot::default())),
        }
    }

    pub fn catalog(&self) -> &ExtractorCatalog {
        &self.catalog
    }

    /// Register every catalog extractor compatible with the session's provider.
    ///
    /// The session is authenticated first; on failure nothing is registered
    /// and the provider is treated as unavailable. Re-registering a provider
    /// atomically replaces its previous entries and session.
    ///
    /// Returns the number of extractors registered.
    pub async fn register_provider(&self, session: Arc<CloudSession>) -> Result<usize, RegistryError> {
        let provider = session.provider().to_string();

        let factories = self.catalog.for_provider(&provider);
        if factories.is_empty() {
            return Err(RegistryError::UnknownProvider(provider));
        }

        if let Err(e) = session.authenticate().await {
            log::warn!("Provider {} unavailable: {}", provider, e);
            return Err(e.into());
        }

        let extractors: BTreeMap<String, ExtractorRegistration> = factories
            .into_iter()
            .map(|factory| {
                let registration = ExtractorRegistration {
                    provider: provider.clone(),
                    service: factory.service().to_string(),
                    extractor: factory.build(Arc::clone(&session)),
                    session: Arc::clone(&session),
                };
                (factory.service().to_string(), registration)
            })
            .collect();
        let count = extractors.len();

        let entry = Arc::new(ProviderEntry {
            session,
            extractors,
        });

        let mut current = self.current.write().await;
        let mut providers = current.providers.clone();
        let replaced = providers.insert(provider.clone(), entry).is_some();
        *current = Arc::new(Snapshot {
            version: current.version + 1,
            providers,
        });

        log::info!(
            "{} {} extractor(s) for provider {}",
            if replaced { "Re-registered" } else { "Registered" },
            count,
            provider
        );
        Ok(count)
    }

    /// Remove every entry of `provider` and release its session: cached
    /// clients are closed. Jobs that already resolved the provider keep their
    /// snapshot; their next client lookup reconnects through the session.
    ///
    /// Returns the number of extractors removed; 0 if the provider was not
    /// registered.
    pub async fn unregister_provider(&self, provider: &str) -> usize {
        let mut current = self.current.write().await;
        let mut providers = current.providers.clone();
        let Some(entry) = providers.remove(provider) else {
            log::debug!("Provider {} not registered, nothing to unregister", provider);
            return 0;
        };
        *current = Arc::new(Snapshot {
            version: current.version + 1,
            providers,
        });
        drop(current);

        let removed = entry.extractors.len();
        let closed = entry.session.close().await;
        log::info!(
            "Unregistered {} extractor(s) for provider {}, closed {} client(s)",
            removed,
            provider,
            closed
        );
        removed
    }

    /// Resolve extractors for the requested providers and services.
    ///
    /// An empty `services` set selects every service of each provider.
    /// Unknown providers and services become warnings, never errors, so a job
    /// can proceed with a reduced extractor set.
    pub async fn resolve(
        &self,
        providers: &BTreeSet<String>,
        services: &BTreeSet<String>,
    ) -> Resolution {
        let snapshot = Arc::clone(&*self.current.read().await);

        let mut resolution = Resolution {
            version: snapshot.version,
            ..Default::default()
        };

        for provider in providers {
            let Some(entry) = snapshot.providers.get(provider) else {
                resolution
                    .warnings
                    .push(ResolutionWarning::ProviderNotRegistered {
                        provider: provider.clone(),
                    });
                continue;
            };

            if services.is_empty() {
                resolution
                    .extractors
                    .extend(entry.extractors.values().cloned());
                continue;
            }

            for service in services {
                match entry.extractors.get(service) {
                    Some(registration) => resolution.extractors.push(registration.clone()),
                    None => resolution.warnings.push(ResolutionWarning::ServiceNotFound {
                        provider: provider.clone(),
                        service: service.clone(),
                    }),
                }
            }
        }

        resolution
    }

    pub async fn registered_providers(&self) -> Vec<String> {
        self.current.read().await.providers.keys().cloned().collect()
    }

    pub async fn is_registered(&self, provider: &str) -> bool {
        self.current.read().await.providers.contains_key(provider)
    }

    /// Session currently registered for `provider`
    pub async fn session(&self, provider: &str) -> Option<Arc<CloudSession>> {
        self.current
            .read()
            .await
            .providers
            .get(provider)
            .map(|entry| Arc::clone(&entry.session))
    }

    /// Monotonic counter bumped by every (un)registration
    pub async fn version(&self) -> u64 {
        self.current.read().await.version
    }
}
