//! Instrumentation decorator for gateways.
//!
//! Opens a `gateway_call` span per call, records duration and outcome on it,
//! and feeds the `coladmin_gateway_*` metrics.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use coladmin_core::{CollectionSchema, FilterExpr, Page, Pagination, Record, Values};
use tracing::{info_span, Instrument};

use super::gateway::{CollectionDataGateway, GatewayError, MigrationReport};

/// Gateway wrapper that records per-call timing and outcome.
pub struct MetricsGateway {
    inner: Arc<dyn CollectionDataGateway>,
}

fn outcome_label<T>(result: &Result<T, GatewayError>) -> &'static str {
    match result {
        Ok(_) => "ok",
        Err(GatewayError::NotFound { .. }) => "not_found",
        Err(GatewayError::Conflict(_)) => "conflict",
        Err(GatewayError::Rejected(_) | GatewayError::PartialCreate { .. }) => "rejected",
        Err(GatewayError::Unavailable(_)) => "unavailable",
    }
}

impl MetricsGateway {
    #[must_use]
    pub fn new(inner: Arc<dyn CollectionDataGateway>) -> Self {
        Self { inner }
    }

    async fn observe<T>(
        &self,
        op: &'static str,
        slug: &str,
        fut: impl Future<Output = Result<T, GatewayError>> + Send,
    ) -> Result<T, GatewayError> {
        let span = info_span!(
            "gateway_call",
            op = op,
            slug = slug,
            duration_ms = tracing::field::Empty,
            outcome = tracing::field::Empty,
        );

        async move {
            let start = Instant::now();
            let result = fut.await;
            let elapsed = start.elapsed();
            let outcome = outcome_label(&result);

            #[allow(clippy::cast_possible_truncation)]
            let duration_ms = elapsed.as_millis() as u64;
            tracing::Span::current().record("duration_ms", duration_ms);
            tracing::Span::current().record("outcome", outcome);
            tracing::debug!(op, duration_ms, outcome, "gateway call complete");

            metrics::counter!("coladmin_gateway_calls_total", "op" => op, "outcome" => outcome)
                .increment(1);
            metrics::histogram!("coladmin_gateway_call_duration_ms", "op" => op)
                .record(elapsed.as_secs_f64() * 1000.0);

            result
        }
        .instrument(span)
        .await
    }
}

#[async_trait]
impl CollectionDataGateway for MetricsGateway {
    async fn find(
        &self,
        slug: &str,
        filter: &FilterExpr,
        pagination: Pagination,
    ) -> Result<Page<Record>, GatewayError> {
        self.observe("find", slug, self.inner.find(slug, filter, pagination))
            .await
    }

    async fn create(&self, slug: &str, values: Values) -> Result<Record, GatewayError> {
        self.observe("create", slug, self.inner.create(slug, values))
            .await
    }

    async fn update(&self, slug: &str, id: &str, values: Values) -> Result<Record, GatewayError> {
        self.observe("update", slug, self.inner.update(slug, id, values))
            .await
    }

    async fn delete(&self, slug: &str, id: &str) -> Result<(), GatewayError> {
        self.observe("delete", slug, self.inner.delete(slug, id))
            .await
    }

    async fn count(&self, slug: &str, filter: &FilterExpr) -> Result<u64, GatewayError> {
        self.observe("count", slug, self.inner.count(slug, filter))
            .await
    }

    async fn get_collection_config(&self, slug: &str) -> Result<CollectionSchema, GatewayError> {
        self.observe(
            "get_collection_config",
            slug,
            self.inner.get_collection_config(slug),
        )
        .await
    }

    async fn update_collection_config(
        &self,
        slug: &str,
        schema: &CollectionSchema,
    ) -> Result<(), GatewayError> {
        self.observe(
            "update_collection_config",
            slug,
            self.inner.update_collection_config(slug, schema),
        )
        .await
    }

    async fn create_collection(&self, schema: &CollectionSchema) -> Result<(), GatewayError> {
        self.observe(
            "create_collection",
            &schema.slug,
            self.inner.create_collection(schema),
        )
        .await
    }

    async fn delete_collection(&self, slug: &str) -> Result<(), GatewayError> {
        self.observe("delete_collection", slug, self.inner.delete_collection(slug))
            .await
    }

    async fn migrate_schema(
        &self,
        from: &CollectionSchema,
        to: &CollectionSchema,
    ) -> Result<MigrationReport, GatewayError> {
        self.observe("migrate_schema", &from.slug, self.inner.migrate_schema(from, to))
            .await
    }

    async fn list_collections(&self) -> Result<Vec<CollectionSchema>, GatewayError> {
        self.observe("list_collections", "*", self.inner.list_collections())
            .await
    }
}
