//! Executes a [`MigrationPlan`] against the gateway.
//!
//! A run has up to three phases:
//!
//! 1. **Validation** (`fail` policy with retype steps only): every record is
//!    transformed in memory. Any failure aborts before a single write.
//! 2. **Write pass**: changed records are written back page by page.
//! 3. **Commit**: the backend hook runs, then the new config is stored.
//!
//! The caller installs the returned schema in the registry and holds the
//! collection's exclusive intent for the whole run. Transforms are
//! idempotent, so an aborted run is finished by re-running the same plan.

use std::sync::Arc;

use coladmin_core::{
    CollectionSchema, ConflictPolicy, FilterExpr, MigrationPlan, MigrationStep, Pagination,
    Record, RecordFailure, Transformed,
};
use tracing::{info_span, Instrument};

use super::cancel::CancelHandle;
use crate::error::{AbortCause, AdminError};
use crate::storage::{CollectionDataGateway, GatewayError, MigrationReport};

/// Progress through the write pass, reported when a run aborts.
#[derive(Debug, Default)]
struct Progress {
    processed: u64,
    last_attempted_id: Option<String>,
}

impl Progress {
    fn gateway_abort(&self, err: &GatewayError) -> AbortCause {
        AbortCause::Gateway {
            reason: err.to_string(),
            processed: self.processed,
            last_attempted_id: self.last_attempted_id.clone(),
        }
    }
}

fn tally(report: &mut MigrationReport, transformed: &Transformed) {
    report.records_scanned += 1;
    if transformed.changed {
        report.records_rewritten += 1;
    }
    report.coerced_to_default += transformed.coerced_to_default as u64;
    report.dropped_invalid += transformed.dropped_invalid as u64;
}

/// Drives migration plans through a gateway.
pub struct Migrator {
    gateway: Arc<dyn CollectionDataGateway>,
    page_size: u32,
}

impl Migrator {
    #[must_use]
    pub fn new(gateway: Arc<dyn CollectionDataGateway>, page_size: u32) -> Self {
        Self {
            gateway,
            page_size: page_size.max(1),
        }
    }

    /// Transforms every record without writing anything.
    ///
    /// # Errors
    ///
    /// `CoercionFailure` for the first record the `fail` policy rejects,
    /// `GatewayUnavailable` (or another mapped gateway error) if a scan fails.
    pub async fn dry_run(&self, plan: &MigrationPlan) -> Result<MigrationReport, AdminError> {
        let mut report = empty_report(plan);
        if plan.is_cosmetic() {
            return Ok(report);
        }
        let mut pagination = Pagination::new(1, self.page_size);
        loop {
            let page = self
                .gateway
                .find(&plan.slug, &FilterExpr::All, pagination)
                .await?;
            let more = page.has_more(pagination);
            for record in page.items {
                let transformed = plan.transform(record).map_err(AdminError::CoercionFailure)?;
                tally(&mut report, &transformed);
            }
            if !more {
                break;
            }
            pagination = pagination.next();
        }
        Ok(report)
    }

    /// Runs `plan` to completion and returns the schema to install.
    ///
    /// # Errors
    ///
    /// `MigrationAborted` for any failure after the plan was accepted. The
    /// stored config is untouched in every abort case.
    pub async fn run(
        &self,
        plan: &MigrationPlan,
        current: &CollectionSchema,
        cancel: &CancelHandle,
    ) -> Result<(MigrationReport, CollectionSchema), AdminError> {
        let span = info_span!(
            "migration",
            slug = %plan.slug,
            from_version = plan.from_version,
            to_version = plan.to_version,
            steps = plan.steps.len(),
        );
        let result = self.run_phases(plan, current, cancel).instrument(span).await;

        let outcome = match &result {
            Ok(_) => "committed",
            Err(AdminError::MigrationAborted {
                cause: AbortCause::Cancelled { .. },
                ..
            }) => "cancelled",
            Err(_) => "aborted",
        };
        metrics::counter!("coladmin_migrations_total", "outcome" => outcome).increment(1);
        match &result {
            Ok((report, _)) => tracing::info!(
                slug = %plan.slug,
                to_version = plan.to_version,
                scanned = report.records_scanned,
                rewritten = report.records_rewritten,
                "migration committed"
            ),
            Err(err) => tracing::warn!(slug = %plan.slug, error = %err, "migration aborted"),
        }
        result
    }

    async fn run_phases(
        &self,
        plan: &MigrationPlan,
        current: &CollectionSchema,
        cancel: &CancelHandle,
    ) -> Result<(MigrationReport, CollectionSchema), AdminError> {
        let abort = |cause| AdminError::MigrationAborted {
            slug: plan.slug.clone(),
            cause,
        };

        let needs_validation = plan.conflict_policy == ConflictPolicy::Fail
            && plan
                .steps
                .iter()
                .any(|s| matches!(s, MigrationStep::RetypeField { .. }));
        if needs_validation {
            self.validate_all(plan, cancel).await.map_err(abort)?;
        }

        let mut report = empty_report(plan);
        if !plan.is_cosmetic() {
            self.write_pass(plan, cancel, &mut report)
                .await
                .map_err(abort)?;
        }

        let target = plan.target_schema(current);
        let progress = Progress {
            processed: report.records_scanned,
            last_attempted_id: None,
        };
        self.gateway
            .migrate_schema(current, &target)
            .await
            .map_err(|e| abort(progress.gateway_abort(&e)))?;
        self.gateway
            .update_collection_config(&plan.slug, &target)
            .await
            .map_err(|e| abort(progress.gateway_abort(&e)))?;

        Ok((report, target))
    }

    /// Nothing is written here, so aborts report zero progress.
    async fn validate_all(
        &self,
        plan: &MigrationPlan,
        cancel: &CancelHandle,
    ) -> Result<(), AbortCause> {
        let untouched = Progress::default();
        let mut validated = 0_u64;
        let mut pagination = Pagination::new(1, self.page_size);
        loop {
            if cancel.is_cancelled() {
                return Err(cancelled(&untouched));
            }
            let page = self
                .gateway
                .find(&plan.slug, &FilterExpr::All, pagination)
                .await
                .map_err(|e| untouched.gateway_abort(&e))?;
            let more = page.has_more(pagination);
            for record in page.items {
                plan.transform(record).map_err(AbortCause::Coercion)?;
                validated += 1;
            }
            if !more {
                break;
            }
            pagination = pagination.next();
        }
        tracing::debug!(records = validated, "validation pass clean");
        Ok(())
    }

    async fn write_pass(
        &self,
        plan: &MigrationPlan,
        cancel: &CancelHandle,
        report: &mut MigrationReport,
    ) -> Result<(), AbortCause> {
        let mut progress = Progress::default();
        let mut pagination = Pagination::new(1, self.page_size);
        loop {
            let page = self
                .gateway
                .find(&plan.slug, &FilterExpr::All, pagination)
                .await
                .map_err(|e| progress.gateway_abort(&e))?;
            let more = page.has_more(pagination);
            for record in page.items {
                if cancel.is_cancelled() {
                    return Err(cancelled(&progress));
                }
                progress.last_attempted_id = Some(record.id.clone());
                self.rewrite(plan, record, report)
                    .await
                    .map_err(|failure| match failure {
                        RewriteFailure::Coercion(f) => AbortCause::Coercion(f),
                        RewriteFailure::Gateway(e) => progress.gateway_abort(&e),
                    })?;
                progress.processed += 1;
            }
            if !more {
                break;
            }
            pagination = pagination.next();
        }
        Ok(())
    }

    async fn rewrite(
        &self,
        plan: &MigrationPlan,
        record: Record,
        report: &mut MigrationReport,
    ) -> Result<(), RewriteFailure> {
        let transformed = plan.transform(record).map_err(RewriteFailure::Coercion)?;
        tally(report, &transformed);
        if !transformed.changed {
            return Ok(());
        }
        let Record { id, values, .. } = transformed.record;
        match self.gateway.update(&plan.slug, &id, values).await {
            Ok(_) => Ok(()),
            Err(err) if err.is_not_found() => {
                // Deleted by another writer since the page was read.
                tracing::debug!(record_id = %id, "record vanished during migration");
                report.records_rewritten -= 1;
                Ok(())
            }
            Err(err) => Err(RewriteFailure::Gateway(err)),
        }
    }
}

fn empty_report(plan: &MigrationPlan) -> MigrationReport {
    MigrationReport {
        slug: plan.slug.clone(),
        from_version: plan.from_version,
        to_version: plan.to_version,
        ..MigrationReport::default()
    }
}

enum RewriteFailure {
    Coercion(RecordFailure),
    Gateway(GatewayError),
}

fn cancelled(progress: &Progress) -> AbortCause {
    AbortCause::Cancelled {
        processed: progress.processed,
        last_attempted_id: progress.last_attempted_id.clone(),
    }
}
