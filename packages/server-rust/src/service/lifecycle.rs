//! Startup and shutdown sequencing for the admin services.
//!
//! The registry owns no service state. It only fixes the order: `init` in
//! registration order, `shutdown` in reverse. A failed `init` shuts down the
//! services that already started before the error is returned.

use std::sync::Arc;

use anyhow::Context as _;
use async_trait::async_trait;
use parking_lot::RwLock;

use crate::config::AdminConfig;

/// Handed to every service at startup.
#[derive(Debug, Clone)]
pub struct ServiceContext {
    pub config: Arc<AdminConfig>,
}

#[async_trait]
pub trait ManagedService: Send + Sync {
    /// Stable name used in logs (e.g. `"collections"`).
    fn name(&self) -> &'static str;

    /// Loads whatever the service needs before serving requests.
    async fn init(&self, ctx: &ServiceContext) -> anyhow::Result<()>;

    /// Drops cached state and reloads it from the backing store.
    async fn reset(&self) -> anyhow::Result<()>;

    /// Stops in-flight work. `terminate` skips graceful cleanup.
    async fn shutdown(&self, terminate: bool) -> anyhow::Result<()>;
}

/// Ordered set of services started and stopped together.
#[derive(Default)]
pub struct ServiceRegistry {
    services: RwLock<Vec<Arc<dyn ManagedService>>>,
}

impl ServiceRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `service` to the start order and returns a handle to it.
    pub fn register<T: ManagedService + 'static>(&self, service: T) -> Arc<T> {
        let service = Arc::new(service);
        self.services.write().push(service.clone());
        service
    }

    /// Service names in start order.
    #[must_use]
    pub fn names(&self) -> Vec<&'static str> {
        self.services.read().iter().map(|s| s.name()).collect()
    }

    fn snapshot(&self) -> Vec<Arc<dyn ManagedService>> {
        self.services.read().clone()
    }

    /// Starts every service in registration order.
    ///
    /// # Errors
    ///
    /// Returns the first `init` failure, after terminating the services
    /// started before it.
    pub async fn init_all(&self, ctx: &ServiceContext) -> anyhow::Result<()> {
        let services = self.snapshot();
        for (started, service) in services.iter().enumerate() {
            if let Err(err) = service.init(ctx).await {
                tracing::error!(service = service.name(), error = %err, "service failed to start");
                for earlier in services[..started].iter().rev() {
                    if let Err(stop_err) = earlier.shutdown(true).await {
                        tracing::warn!(service = earlier.name(), error = %stop_err, "rollback shutdown failed");
                    }
                }
                return Err(err.context(format!("starting service '{}'", service.name())));
            }
            tracing::debug!(service = service.name(), "service started");
        }
        Ok(())
    }

    /// Reloads every service's cached state, in registration order.
    ///
    /// # Errors
    ///
    /// Returns the first `reset` failure; later services are not reset.
    pub async fn reset_all(&self) -> anyhow::Result<()> {
        for service in self.snapshot() {
            service
                .reset()
                .await
                .with_context(|| format!("resetting service '{}'", service.name()))?;
        }
        Ok(())
    }

    /// Stops every service in reverse registration order.
    ///
    /// Every service is asked to stop even if an earlier one fails.
    ///
    /// # Errors
    ///
    /// Returns the first `shutdown` failure.
    pub async fn shutdown_all(&self, terminate: bool) -> anyhow::Result<()> {
        let mut first_err = None;
        for service in self.snapshot().iter().rev() {
            if let Err(err) = service.shutdown(terminate).await {
                tracing::warn!(service = service.name(), error = %err, "service shutdown failed");
                if first_err.is_none() {
                    first_err = Some(err.context(format!("stopping service '{}'", service.name())));
                }
            }
        }
        first_err.map_or(Ok(()), Err)
    }
}
