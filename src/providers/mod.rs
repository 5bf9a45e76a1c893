//! Providers known to the binary
//!
//! Every provider in the configuration is served by the snapshot
//! connector; its services become catalog entries.

pub mod snapshot;

pub use snapshot::{SnapshotClient, SnapshotConnector, SnapshotExtractor};

use crate::config::ProviderConfig;
use crate::error::RegistryError;
use crate::etl::Extractor;
use crate::registry::{ExtractorCatalog, ExtractorFactory, ExtractorRegistry};
use crate::session::{CloudSession, Credentials};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Catalog entries for every configured provider's services.
///
/// Disabled providers are included so they can be enabled later without a
/// restart; only registration looks at `enabled`.
pub fn catalog_from_config(providers: &BTreeMap<String, ProviderConfig>) -> ExtractorCatalog {
    let mut catalog = ExtractorCatalog::new();
    for (provider, config) in providers {
        for service in &config.services {
            let name = provider.clone();
            let account_id = config.account_id.clone();
            let service_config = service.clone();
            catalog.register(ExtractorFactory::new(
                provider.as_str(),
                service.name.as_str(),
                move |session| {
                    Arc::new(SnapshotExtractor::new(
                        name.clone(),
                        account_id.clone(),
                        service_config.clone(),
                        session,
                    )) as Arc<dyn Extractor>
                },
            ));
        }
    }
    catalog
}

/// Session for a configured provider, with credentials from the environment
pub fn session_for(provider: &str, config: &ProviderConfig) -> Arc<CloudSession> {
    Arc::new(CloudSession::new(
        provider,
        Credentials::from_env(provider),
        Arc::new(SnapshotConnector::new(&config.snapshot_dir)),
    ))
}

/// Register every enabled provider, returning each provider's outcome.
///
/// A provider that fails to authenticate is left unregistered; the others
/// are unaffected.
pub async fn register_all(
    registry: &ExtractorRegistry,
    providers: &BTreeMap<String, ProviderConfig>,
) -> Vec<(String, Result<usize, RegistryError>)> {
    let mut outcomes = Vec::new();
    for (provider, config) in providers.iter().filter(|(_, c)| c.enabled) {
        let outcome = registry
            .register_provider(session_for(provider, config))
            .await;
        outcomes.push((provider.clone(), outcome));
    }
    outcomes
}

/// What [`reconcile`] did to one provider
#[derive(Debug)]
pub enum ProviderChange {
    Registered(usize),
    Unregistered(usize),
    Failed(RegistryError),
}

/// Bring the registry in line with a (re-read) provider configuration.
///
/// Enabled providers that are not registered are registered; registered
/// providers that are now disabled or no longer configured are unregistered.
/// Providers already in the wanted state are left alone, so their sessions
/// and cached clients survive a reload.
pub async fn reconcile(
    registry: &ExtractorRegistry,
    providers: &BTreeMap<String, ProviderConfig>,
) -> Vec<(String, ProviderChange)> {
    let mut changes = Vec::new();

    for provider in registry.registered_providers().await {
        let wanted = providers.get(&provider).is_some_and(|c| c.enabled);
        if !wanted {
            let removed = registry.unregister_provider(&provider).await;
            changes.push((provider, ProviderChange::Unregistered(removed)));
        }
    }

    for (provider, config) in providers.iter().filter(|(_, c)| c.enabled) {
        if registry.is_registered(provider).await {
            continue;
        }
        let change = match registry.register_provider(session_for(provider, config)).await {
            Ok(count) => ProviderChange::Registered(count),
            Err(e) => ProviderChange::Failed(e),
        };
        changes.push((provider.clone(), change));
    }

    changes
}
