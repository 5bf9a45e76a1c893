//! Per-provider authenticated client factories.
//!
//! A [`CloudSession`] owns the credentials of one provider and caches one
//! SDK client per `(service, region)`. The SDK glue lives behind the
//! [`Connector`] trait so the core stays provider-agnostic.

mod credentials;

pub use credentials::{CredentialKind, Credentials};

use crate::error::{AuthenticationError, SessionError};
use async_trait::async_trait;
use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

/// A provider SDK client, type-erased so sessions of different providers
/// can share one registry. Extractors recover the concrete type through
/// [`CloudSession::client`].
pub type ServiceClient = Arc<dyn Any + Send + Sync>;

/// Provider SDK glue: turns credentials into authenticated clients
#[async_trait]
pub trait Connector: Send + Sync {
    /// Verify the credentials are usable (e.g. an STS caller-identity call)
    async fn authenticate(
        &self,
        provider: &str,
        credentials: &Credentials,
    ) -> Result<(), AuthenticationError>;

    /// Build a client for `service` in `region` (the region key is chosen by
    /// the extractor)
    async fn connect(
        &self,
        provider: &str,
        credentials: &Credentials,
        service: &str,
        region: &str,
    ) -> Result<ServiceClient, AuthenticationError>;
}

type ClientKey = (String, String);

/// Authenticated, caching client factory for one provider.
///
/// Cached clients live as long as the session; the session lives as long as
/// its last holder (the registry, or a job snapshot that resolved it).
pub struct CloudSession {
    provider: String,
    credentials: RwLock<Credentials>,
    connector: Arc<dyn Connector>,
    clients: Mutex<HashMap<ClientKey, ServiceClient>>,
}

impl CloudSession {
    pub fn new(
        provider: impl Into<String>,
        credentials: Credentials,
        connector: Arc<dyn Connector>,
    ) -> Self {
        Self {
            provider: provider.into(),
            credentials: RwLock::new(credentials),
            connector,
            clients: Mutex::new(HashMap::new()),
        }
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    /// Verify the session's credentials with the provider
    pub async fn authenticate(&self) -> Result<(), AuthenticationError> {
        let credentials = self.credentials.read().await;
        self.connector
            .authenticate(&self.provider, &credentials)
            .await
    }

    /// Get the client for `(service, region)`, connecting on first use.
    ///
    /// # Errors
    /// - [`SessionError::Authentication`] if the connector rejects the credentials
    /// - [`SessionError::ClientType`] if the cached client is not a `T`
    pub async fn client<T>(&self, service: &str, region: &str) -> Result<Arc<T>, SessionError>
    where
        T: Any + Send + Sync,
    {
        let client = self.raw_client(service, region).await?;
        client
            .downcast::<T>()
            .map_err(|_| SessionError::ClientType {
                provider: self.provider.clone(),
                service: service.to_string(),
                region: region.to_string(),
                expected: std::any::type_name::<T>(),
            })
    }

    /// Untyped variant of [`client`](Self::client)
    pub async fn raw_client(&self, service: &str, region: &str) -> Result<ServiceClient, SessionError> {
        let key = (service.to_string(), region.to_string());

        // Holding the cache lock across connect keeps concurrent callers from
        // authenticating the same (service, region) twice.
        let mut clients = self.clients.lock().await;
        if let Some(client) = clients.get(&key) {
            log::trace!("Client cache hit for {}/{}/{}", self.provider, service, region);
            return Ok(Arc::clone(client));
        }

        log::debug!("Connecting {} client for {}/{}", self.provider, service, region);
        let credentials = self.credentials.read().await;
        let client = self
            .connector
            .connect(&self.provider, &credentials, service, region)
            .await?;
        clients.insert(key, Arc::clone(&client));
        Ok(client)
    }

    /// Replace the credentials and drop every cached client
    pub async fn rotate_credentials(&self, credentials: Credentials) {
        let mut clients = self.clients.lock().await;
        *self.credentials.write().await = credentials;
        let dropped = clients.len();
        clients.clear();
        log::info!(
            "Rotated credentials for {}, invalidated {} cached client(s)",
            self.provider,
            dropped
        );
    }

    /// Drop every cached client without touching the credentials
    pub async fn close(&self) -> usize {
        let mut clients = self.clients.lock().await;
        let dropped = clients.len();
        clients.clear();
        dropped
    }

    pub async fn cached_clients(&self) -> usize {
        self.clients.lock().await.len()
    }
}

impl std::fmt::Debug for CloudSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloudSession")
            .field("provider", &self.provider)
            .finish_non_exhaustive()
    }
}

impl Drop for CloudSession {
    fn drop(&mut self) {
        log::debug!("Released session for provider {}", self.provider);
    }
}
