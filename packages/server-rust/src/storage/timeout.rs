//! Timeout decorator for gateways.
//!
//! Bounds every call with the configured duration. A call that does not
//! finish in time becomes [`GatewayError::Unavailable`], so callers treat it
//! like any other transport failure.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use coladmin_core::{CollectionSchema, FilterExpr, Page, Pagination, Record, Values};

use super::gateway::{CollectionDataGateway, GatewayError, MigrationReport};

/// Gateway wrapper that enforces a per-call timeout.
pub struct TimeoutGateway {
    inner: Arc<dyn CollectionDataGateway>,
    timeout: Duration,
}

impl TimeoutGateway {
    #[must_use]
    pub fn new(inner: Arc<dyn CollectionDataGateway>, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    async fn bounded<T>(
        &self,
        op: &'static str,
        fut: impl Future<Output = Result<T, GatewayError>> + Send,
    ) -> Result<T, GatewayError> {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result,
            Err(_elapsed) => Err(GatewayError::Unavailable(format!(
                "{op} timed out after {}ms",
                self.timeout.as_millis()
            ))),
        }
    }
}

#[async_trait]
impl CollectionDataGateway for TimeoutGateway {
    async fn find(
        &self,
        slug: &str,
        filter: &FilterExpr,
        pagination: Pagination,
    ) -> Result<Page<Record>, GatewayError> {
        self.bounded("find", self.inner.find(slug, filter, pagination))
            .await
    }

    async fn create(&self, slug: &str, values: Values) -> Result<Record, GatewayError> {
        self.bounded("create", self.inner.create(slug, values)).await
    }

    async fn update(&self, slug: &str, id: &str, values: Values) -> Result<Record, GatewayError> {
        self.bounded("update", self.inner.update(slug, id, values))
            .await
    }

    async fn delete(&self, slug: &str, id: &str) -> Result<(), GatewayError> {
        self.bounded("delete", self.inner.delete(slug, id)).await
    }

    async fn count(&self, slug: &str, filter: &FilterExpr) -> Result<u64, GatewayError> {
        self.bounded("count", self.inner.count(slug, filter)).await
    }

    async fn get_collection_config(&self, slug: &str) -> Result<CollectionSchema, GatewayError> {
        self.bounded("get_collection_config", self.inner.get_collection_config(slug))
            .await
    }

    async fn update_collection_config(
        &self,
        slug: &str,
        schema: &CollectionSchema,
    ) -> Result<(), GatewayError> {
        self.bounded(
            "update_collection_config",
            self.inner.update_collection_config(slug, schema),
        )
        .await
    }

    async fn create_collection(&self, schema: &CollectionSchema) -> Result<(), GatewayError> {
        self.bounded("create_collection", self.inner.create_collection(schema))
            .await
    }

    async fn delete_collection(&self, slug: &str) -> Result<(), GatewayError> {
        self.bounded("delete_collection", self.inner.delete_collection(slug))
            .await
    }

    async fn migrate_schema(
        &self,
        from: &CollectionSchema,
        to: &CollectionSchema,
    ) -> Result<MigrationReport, GatewayError> {
        self.bounded("migrate_schema", self.inner.migrate_schema(from, to))
            .await
    }

    async fn list_collections(&self) -> Result<Vec<CollectionSchema>, GatewayError> {
        self.bounded("list_collections", self.inner.list_collections())
            .await
    }
}
