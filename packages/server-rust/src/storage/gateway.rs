//! The data gateway contract this crate consumes.
//!
//! [`CollectionDataGateway`] is the only path to records and persisted
//! collection configs. Every call is atomic for a single record, but the
//! contract offers no multi-record transaction: callers doing bulk work
//! keep their own per-record accounting.

use async_trait::async_trait;
use coladmin_core::{CollectionSchema, FilterExpr, Page, Pagination, Record, Values};
use serde::{Deserialize, Serialize};

/// Errors reported by a gateway implementation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GatewayError {
    #[error("{entity} '{key}' not found")]
    NotFound { entity: &'static str, key: String },
    #[error("conflict: {0}")]
    Conflict(String),
    /// The backend refused the request for a domain reason.
    #[error("rejected: {0}")]
    Rejected(String),
    /// A create failed after the backend had already persisted record `id`.
    #[error("record '{id}' was partially created: {reason}")]
    PartialCreate { id: String, reason: String },
    /// Transport or backend failure; retrying may succeed.
    #[error("gateway unavailable: {0}")]
    Unavailable(String),
}

impl GatewayError {
    #[must_use]
    pub fn record_not_found(id: impl Into<String>) -> Self {
        Self::NotFound {
            entity: "record",
            key: id.into(),
        }
    }

    #[must_use]
    pub fn collection_not_found(slug: impl Into<String>) -> Self {
        Self::NotFound {
            entity: "collection",
            key: slug.into(),
        }
    }

    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Outcome of a committed (or backend-applied) schema migration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationReport {
    pub slug: String,
    pub from_version: u64,
    pub to_version: u64,
    /// Records passed through the transform.
    pub records_scanned: u64,
    /// Records whose values changed and were written back.
    pub records_rewritten: u64,
    /// Values replaced by their field default under the `coerce` policy.
    pub coerced_to_default: u64,
    /// Values removed under the `dropInvalid` policy.
    pub dropped_invalid: u64,
}

/// External CRUD/count service plus its schema-admin extensions.
///
/// Used as `Arc<dyn CollectionDataGateway>`.
#[async_trait]
pub trait CollectionDataGateway: Send + Sync {
    /// One page of records matching `filter`, plus the total match count.
    async fn find(
        &self,
        slug: &str,
        filter: &FilterExpr,
        pagination: Pagination,
    ) -> Result<Page<Record>, GatewayError>;

    /// Creates a record. The backend assigns its id and timestamps.
    async fn create(&self, slug: &str, values: Values) -> Result<Record, GatewayError>;

    /// Replaces a record's values wholesale.
    async fn update(&self, slug: &str, id: &str, values: Values) -> Result<Record, GatewayError>;

    async fn delete(&self, slug: &str, id: &str) -> Result<(), GatewayError>;

    async fn count(&self, slug: &str, filter: &FilterExpr) -> Result<u64, GatewayError>;

    async fn get_collection_config(&self, slug: &str) -> Result<CollectionSchema, GatewayError>;

    async fn update_collection_config(
        &self,
        slug: &str,
        schema: &CollectionSchema,
    ) -> Result<(), GatewayError>;

    async fn create_collection(&self, schema: &CollectionSchema) -> Result<(), GatewayError>;

    /// Drops the collection and every record in it.
    async fn delete_collection(&self, slug: &str) -> Result<(), GatewayError>;

    /// Backend hook for its own structural change (e.g. altering a table).
    ///
    /// Called after the record pass and before the new config is stored.
    async fn migrate_schema(
        &self,
        from: &CollectionSchema,
        to: &CollectionSchema,
    ) -> Result<MigrationReport, GatewayError>;

    /// Every stored collection config. Used for warm start.
    async fn list_collections(&self) -> Result<Vec<CollectionSchema>, GatewayError>;
}
