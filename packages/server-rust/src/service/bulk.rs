//! Multi-record delete, export and duplicate with per-id accounting.
//!
//! The gateway has no multi-record transaction, so every id is processed
//! independently and lands in exactly one of `succeeded` or `failed`. Nothing
//! is rolled back.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{self, Write as _};
use std::sync::Arc;

use coladmin_core::{FilterExpr, Pagination, Record};
use futures_util::stream::{self, StreamExt};
use quick_cache::sync::Cache;
use serde::{Deserialize, Serialize};

use super::cancel::CancelHandle;
use crate::config::ExportFormat;
use crate::error::AdminError;
use crate::storage::{CollectionDataGateway, GatewayError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BulkKind {
    Delete,
    Export,
    Duplicate,
}

impl BulkKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Delete => "delete",
            Self::Export => "export",
            Self::Duplicate => "duplicate",
        }
    }
}

impl fmt::Display for BulkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A validated bulk request: non-empty, deduplicated ids.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkOperationRequest {
    slug: String,
    ids: BTreeSet<String>,
    kind: BulkKind,
}

impl BulkOperationRequest {
    /// # Errors
    ///
    /// `InvalidRequest` when `ids` is empty.
    pub fn new<I, S>(slug: impl Into<String>, ids: I, kind: BulkKind) -> Result<Self, AdminError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let ids: BTreeSet<String> = ids.into_iter().map(Into::into).collect();
        if ids.is_empty() {
            return Err(AdminError::InvalidRequest(
                "bulk operation needs at least one id".to_string(),
            ));
        }
        Ok(Self {
            slug: slug.into(),
            ids,
            kind,
        })
    }

    #[must_use]
    pub fn slug(&self) -> &str {
        &self.slug
    }

    #[must_use]
    pub fn ids(&self) -> &BTreeSet<String> {
        &self.ids
    }

    #[must_use]
    pub fn kind(&self) -> BulkKind {
        self.kind
    }

    /// Same operation restricted to the ids that failed in `result`.
    #[must_use]
    pub fn retry_failed(&self, result: &BulkOperationResult) -> Option<Self> {
        if result.failed.is_empty() {
            return None;
        }
        Some(Self {
            slug: self.slug.clone(),
            ids: result.failed.keys().cloned().collect(),
            kind: self.kind,
        })
    }
}

/// Why one id failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "reason", content = "detail")]
pub enum FailureReason {
    NotFound,
    Rejected(String),
    Unavailable(String),
    /// Cancellation was observed before the id was issued.
    Cancelled,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound => f.write_str("not found"),
            Self::Rejected(reason) => write!(f, "rejected: {reason}"),
            Self::Unavailable(reason) => write!(f, "unavailable: {reason}"),
            Self::Cancelled => f.write_str("cancelled"),
        }
    }
}

impl From<GatewayError> for FailureReason {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::NotFound { .. } => Self::NotFound,
            GatewayError::Conflict(reason) | GatewayError::Rejected(reason) => {
                Self::Rejected(reason)
            }
            partial @ GatewayError::PartialCreate { .. } => Self::Rejected(partial.to_string()),
            GatewayError::Unavailable(reason) => Self::Unavailable(reason),
        }
    }
}

/// What a successful id produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "output")]
pub enum BulkOutput {
    Deleted,
    Duplicated { new_id: String },
    /// The record encoded with the configured [`ExportFormat`].
    Exported { payload: Vec<u8> },
}

/// Per-id outcome of a bulk operation.
///
/// The keys of `succeeded` and `failed` are disjoint and together equal the
/// requested ids.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkOperationResult {
    pub slug: String,
    pub kind: BulkKind,
    pub succeeded: BTreeMap<String, BulkOutput>,
    pub failed: BTreeMap<String, FailureReason>,
}

impl BulkOperationResult {
    fn new(request: &BulkOperationRequest) -> Self {
        Self {
            slug: request.slug.clone(),
            kind: request.kind,
            succeeded: BTreeMap::new(),
            failed: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn succeeded_ids(&self) -> BTreeSet<&str> {
        self.succeeded.keys().map(String::as_str).collect()
    }

    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    /// One-line count summary, with per-id reasons for failures.
    #[must_use]
    pub fn summary(&self) -> String {
        let mut out = format!(
            "{} on '{}': {} succeeded, {} failed",
            self.kind,
            self.slug,
            self.succeeded.len(),
            self.failed.len()
        );
        for (id, reason) in &self.failed {
            let _ = write!(out, "; {id}: {reason}");
        }
        out
    }

    /// # Errors
    ///
    /// `PartialFailure` carrying the result when any id failed.
    pub fn into_result(self) -> Result<Self, AdminError> {
        if self.failed.is_empty() {
            Ok(self)
        } else {
            Err(AdminError::PartialFailure(Box::new(self)))
        }
    }
}

/// Runs bulk requests with bounded parallelism.
pub struct BulkOperationExecutor {
    gateway: Arc<dyn CollectionDataGateway>,
    concurrency: usize,
    export_format: ExportFormat,
    /// `(slug, id)` pairs deleted through this executor.
    tombstones: Cache<(String, String), ()>,
}

impl BulkOperationExecutor {
    #[must_use]
    pub fn new(
        gateway: Arc<dyn CollectionDataGateway>,
        concurrency: usize,
        export_format: ExportFormat,
        tombstone_capacity: usize,
    ) -> Self {
        Self {
            gateway,
            concurrency: concurrency.max(1),
            export_format,
            tombstones: Cache::new(tombstone_capacity.max(1)),
        }
    }

    /// Processes every id of `request`. Never fails as a whole.
    ///
    /// Ids not yet issued when `cancel` fires are reported `Cancelled`;
    /// calls already issued run to completion and are accounted normally.
    pub async fn execute(
        &self,
        request: &BulkOperationRequest,
        cancel: &CancelHandle,
    ) -> BulkOperationResult {
        tracing::info!(
            slug = %request.slug,
            kind = %request.kind,
            ids = request.ids.len(),
            "bulk operation started"
        );

        let outcomes: Vec<(String, Result<BulkOutput, FailureReason>)> =
            stream::iter(request.ids.iter().cloned())
                .map(|id| async move {
                    if cancel.is_cancelled() {
                        return (id, Err(FailureReason::Cancelled));
                    }
                    let outcome = self.run_one(&request.slug, &id, request.kind).await;
                    (id, outcome)
                })
                .buffer_unordered(self.concurrency)
                .collect()
                .await;

        let mut result = BulkOperationResult::new(request);
        for (id, outcome) in outcomes {
            let label = if outcome.is_ok() { "succeeded" } else { "failed" };
            metrics::counter!(
                "coladmin_bulk_records_total",
                "kind" => request.kind.as_str(),
                "outcome" => label
            )
            .increment(1);
            match outcome {
                Ok(output) => {
                    result.succeeded.insert(id, output);
                }
                Err(reason) => {
                    result.failed.insert(id, reason);
                }
            }
        }

        tracing::info!(
            slug = %request.slug,
            kind = %request.kind,
            succeeded = result.succeeded.len(),
            failed = result.failed.len(),
            "bulk operation finished"
        );
        result
    }

    async fn run_one(
        &self,
        slug: &str,
        id: &str,
        kind: BulkKind,
    ) -> Result<BulkOutput, FailureReason> {
        match kind {
            BulkKind::Delete => self.delete(slug, id).await,
            BulkKind::Export => {
                let record = self.fetch(slug, id).await?;
                self.encode(&record).map(|payload| BulkOutput::Exported { payload })
            }
            BulkKind::Duplicate => {
                let record = self.fetch(slug, id).await?;
                self.duplicate(slug, record).await
            }
        }
    }

    /// Deletes one record.
    ///
    /// `NotFound` counts as success for an id this executor already
    /// attempted to delete, including attempts that reported `Unavailable`,
    /// since those may have been applied. A first attempt that finds nothing
    /// is still `NotFound`.
    ///
    /// # Errors
    ///
    /// The gateway error, unless it is a `NotFound` covered above.
    pub async fn delete_one(&self, slug: &str, id: &str) -> Result<(), GatewayError> {
        let key = (slug.to_string(), id.to_string());
        match self.gateway.delete(slug, id).await {
            Ok(()) => {
                self.tombstones.insert(key, ());
                Ok(())
            }
            Err(err @ GatewayError::Unavailable(_)) => {
                self.tombstones.insert(key, ());
                Err(err)
            }
            Err(err) if err.is_not_found() && self.tombstones.get(&key).is_some() => {
                tracing::debug!(slug, id, "delete already applied");
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    /// Forgets every tombstone of `slug`, so a recreated collection starts
    /// with no deletion history.
    pub fn forget_collection(&self, slug: &str) {
        self.tombstones
            .retain(|(tombstoned, _): &(String, String), _: &()| tombstoned != slug);
    }

    async fn delete(&self, slug: &str, id: &str) -> Result<BulkOutput, FailureReason> {
        self.delete_one(slug, id).await?;
        Ok(BulkOutput::Deleted)
    }

    async fn fetch(&self, slug: &str, id: &str) -> Result<Record, FailureReason> {
        let page = self
            .gateway
            .find(slug, &FilterExpr::id(id), Pagination::new(1, 1))
            .await?;
        page.items.into_iter().next().ok_or(FailureReason::NotFound)
    }

    async fn duplicate(&self, slug: &str, source: Record) -> Result<BulkOutput, FailureReason> {
        match self.gateway.create(slug, source.values).await {
            Ok(copy) => Ok(BulkOutput::Duplicated { new_id: copy.id }),
            Err(GatewayError::PartialCreate { id, reason }) => {
                tracing::warn!(
                    slug,
                    source_id = %source.id,
                    orphan_id = %id,
                    %reason,
                    "partial duplicate, issuing compensating delete"
                );
                if let Err(err) = self.gateway.delete(slug, &id).await {
                    tracing::warn!(slug, orphan_id = %id, error = %err, "compensating delete failed");
                }
                Err(FailureReason::Rejected(format!("partial create: {reason}")))
            }
            Err(err) => Err(err.into()),
        }
    }

    fn encode(&self, record: &Record) -> Result<Vec<u8>, FailureReason> {
        let encoded = match self.export_format {
            ExportFormat::Json => serde_json::to_vec(record).map_err(|e| e.to_string()),
            ExportFormat::Msgpack => rmp_serde::to_vec_named(record).map_err(|e| e.to_string()),
        };
        encoded.map_err(|e| FailureReason::Rejected(format!("export encoding failed: {e}")))
    }
}
