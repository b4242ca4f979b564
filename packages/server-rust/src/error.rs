//! Error type returned by every [`CollectionManager`](crate::CollectionManager)
//! operation.

use std::fmt;

use coladmin_core::{RecordFailure, SchemaError};

use crate::service::bulk::BulkOperationResult;
use crate::storage::GatewayError;

/// Why a migration stopped before committing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbortCause {
    /// A record could not be coerced under the `fail` policy.
    Coercion(RecordFailure),
    /// The gateway failed mid-run. Records before `last_attempted_id` were
    /// already rewritten; re-running the same plan finishes the job.
    Gateway {
        reason: String,
        processed: u64,
        last_attempted_id: Option<String>,
    },
    Cancelled {
        processed: u64,
        last_attempted_id: Option<String>,
    },
}

impl fmt::Display for AbortCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Coercion(failure) => write!(f, "{failure}"),
            Self::Gateway {
                reason,
                processed,
                last_attempted_id,
            } => {
                write!(f, "gateway failed after {processed} records: {reason}")?;
                if let Some(id) = last_attempted_id {
                    write!(f, " (last attempted '{id}')")?;
                }
                Ok(())
            }
            Self::Cancelled {
                processed,
                last_attempted_id,
            } => {
                write!(f, "cancelled after {processed} records")?;
                if let Some(id) = last_attempted_id {
                    write!(f, " (last attempted '{id}')")?;
                }
                Ok(())
            }
        }
    }
}

/// Errors surfaced by the collection admin service.
#[derive(Debug, thiserror::Error)]
pub enum AdminError {
    #[error("{entity} '{key}' not found")]
    NotFound { entity: &'static str, key: String },

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("invalid schema: {0}")]
    InvalidSchema(#[from] SchemaError),

    /// Values rejected by the collection schema before reaching the gateway.
    #[error("invalid record: {}", .errors.join("; "))]
    InvalidRecord { errors: Vec<String> },

    /// The plan no longer matches the stored schema, or a migration is
    /// already running on the collection.
    #[error("version mismatch on '{slug}': {reason}")]
    VersionMismatch { slug: String, reason: String },

    /// A dry run found a record the `fail` policy cannot migrate.
    #[error("coercion failure: {0}")]
    CoercionFailure(RecordFailure),

    #[error("migration of '{slug}' aborted: {cause}")]
    MigrationAborted { slug: String, cause: AbortCause },

    /// Some targets of a bulk operation failed. Carries the full result.
    #[error("bulk operation partially failed: {}", .0.summary())]
    PartialFailure(Box<BulkOperationResult>),

    #[error("gateway unavailable: {0}")]
    GatewayUnavailable(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl AdminError {
    #[must_use]
    pub fn collection_not_found(slug: impl Into<String>) -> Self {
        Self::NotFound {
            entity: "collection",
            key: slug.into(),
        }
    }

    /// Whether retrying the same call may succeed without any other change.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::GatewayUnavailable(_))
    }
}

impl From<GatewayError> for AdminError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::NotFound { entity, key } => Self::NotFound { entity, key },
            GatewayError::Conflict(reason) => Self::Conflict(reason),
            GatewayError::Rejected(reason) => Self::InvalidRequest(reason),
            // The record exists; retrying would create a second one.
            partial @ GatewayError::PartialCreate { .. } => Self::Conflict(partial.to_string()),
            GatewayError::Unavailable(reason) => Self::GatewayUnavailable(reason),
        }
    }
}
