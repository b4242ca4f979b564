//! `CollectionManager`: the single entry point for presentation code.
//!
//! Composes the schema registry, migration runner, bulk executor and the
//! gateway. Every operation returns `Result<_, AdminError>`.

use std::sync::Arc;

use async_trait::async_trait;
use coladmin_core::{
    plan, plan_with_renames, CollectionSchema, ConflictPolicy, FieldDefinition, FilterExpr,
    MigrationPlan, Page, Pagination, Record, ValidationResult, Values,
};

use super::bulk::{BulkOperationExecutor, BulkOperationRequest, BulkOperationResult};
use super::cancel::CancelHandle;
use super::filter_state::{FetchTicket, QueryFilterState};
use super::intent::{IntentGuard, IntentLocks};
use super::lifecycle::{ManagedService, ServiceContext};
use super::migrator::Migrator;
use super::schema_registry::SchemaRegistry;
use crate::config::AdminConfig;
use crate::error::AdminError;
use crate::storage::{layered, CollectionDataGateway, GatewayError, MigrationReport};

/// Facade over collection CRUD, schema migration and bulk operations.
pub struct CollectionManager {
    gateway: Arc<dyn CollectionDataGateway>,
    registry: SchemaRegistry,
    intents: IntentLocks,
    migrator: Migrator,
    bulk: BulkOperationExecutor,
    /// Root of every operation's cancel handle.
    shutdown: CancelHandle,
    config: AdminConfig,
}

impl CollectionManager {
    /// Wraps `gateway` with the timeout and metrics decorators.
    #[must_use]
    pub fn new(gateway: Arc<dyn CollectionDataGateway>, config: AdminConfig) -> Self {
        let gateway = layered(gateway, config.gateway_timeout);
        Self {
            migrator: Migrator::new(Arc::clone(&gateway), config.migration_page_size),
            bulk: BulkOperationExecutor::new(
                Arc::clone(&gateway),
                config.bulk_concurrency,
                config.export_format,
                config.tombstone_capacity,
            ),
            gateway,
            registry: SchemaRegistry::new(),
            intents: IntentLocks::new(),
            shutdown: CancelHandle::new(),
            config,
        }
    }

    #[must_use]
    pub fn config(&self) -> &AdminConfig {
        &self.config
    }

    /// A handle that cancels one operation, and is cancelled on shutdown.
    #[must_use]
    pub fn cancel_handle(&self) -> CancelHandle {
        self.shutdown.child()
    }

    /// Filter state for a view, restored from its query string.
    #[must_use]
    pub fn filter_state(&self, query_string: &str) -> QueryFilterState {
        QueryFilterState::from_query_string(
            query_string,
            self.config.category_field.clone(),
            self.config.view_page_size,
        )
    }

    /// Replaces the registry contents with the gateway's stored configs.
    ///
    /// # Errors
    ///
    /// Propagates the gateway error if the listing fails.
    pub async fn load_collections(&self) -> Result<usize, AdminError> {
        let schemas = self.gateway.list_collections().await?;
        let loaded = self.registry.load(schemas);
        tracing::info!(collections = loaded, "collection schemas loaded");
        Ok(loaded)
    }

    // -- collections ------------------------------------------------------

    /// Creates an empty collection at version 1.
    ///
    /// # Errors
    ///
    /// `InvalidSchema` for a malformed schema, `Conflict` for a taken slug.
    pub async fn create_collection(
        &self,
        mut schema: CollectionSchema,
    ) -> Result<CollectionSchema, AdminError> {
        schema.validate()?;
        schema.version = 1;
        if self.registry.contains(&schema.slug) {
            return Err(AdminError::Conflict(format!(
                "collection '{}' already exists",
                schema.slug
            )));
        }
        self.gateway.create_collection(&schema).await?;
        let created = self.registry.create(schema)?;
        tracing::info!(slug = %created.slug, fields = created.fields.len(), "collection created");
        Ok(created)
    }

    /// # Errors
    ///
    /// `NotFound` for an unknown slug.
    pub fn get_collection(&self, slug: &str) -> Result<CollectionSchema, AdminError> {
        self.registry.get(slug)
    }

    #[must_use]
    pub fn list_collections(&self) -> Vec<CollectionSchema> {
        self.registry.list()
    }

    /// Updates non-field metadata (the display name).
    ///
    /// # Errors
    ///
    /// `Conflict` when `schema` changes fields or version, which only a
    /// migration may do, or while a migration holds the collection.
    pub async fn update_collection_config(
        &self,
        slug: &str,
        schema: CollectionSchema,
    ) -> Result<CollectionSchema, AdminError> {
        if schema.slug != slug {
            return Err(AdminError::InvalidRequest(format!(
                "schema slug '{}' does not match '{slug}'",
                schema.slug
            )));
        }
        let _intent = self.shared_intent(slug)?;
        let current = self.registry.get(slug)?;
        if schema.fields != current.fields || schema.version != current.version {
            return Err(AdminError::Conflict(format!(
                "field changes to '{slug}' require a migration"
            )));
        }
        self.gateway.update_collection_config(slug, &schema).await?;
        self.registry.update_display_name(slug, schema.display_name)
    }

    /// Drops the collection and every record in it.
    ///
    /// `confirm` must equal the slug.
    ///
    /// # Errors
    ///
    /// `InvalidRequest` without confirmation, `NotFound` for an unknown slug,
    /// `Conflict` while any other operation holds the collection.
    pub async fn delete_collection(&self, slug: &str, confirm: &str) -> Result<(), AdminError> {
        if confirm != slug {
            return Err(AdminError::InvalidRequest(format!(
                "deleting '{slug}' requires confirming its slug"
            )));
        }
        self.registry.get(slug)?;
        let _intent = self.intents.try_exclusive(slug).ok_or_else(|| {
            AdminError::Conflict(format!("collection '{slug}' is busy"))
        })?;
        self.gateway.delete_collection(slug).await?;
        self.registry.drop_collection(slug);
        self.bulk.forget_collection(slug);
        tracing::info!(slug, "collection deleted");
        Ok(())
    }

    // -- migrations -------------------------------------------------------

    /// Plans a migration of `slug` to `desired`.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown slug, `InvalidSchema` for an invalid target.
    pub fn plan_migration(
        &self,
        slug: &str,
        desired: Vec<FieldDefinition>,
        policy: ConflictPolicy,
    ) -> Result<MigrationPlan, AdminError> {
        let current = self.registry.get(slug)?;
        Ok(plan(&current, desired, policy)?)
    }

    /// Like [`plan_migration`](Self::plan_migration), with explicit
    /// `(old, new)` field renames.
    ///
    /// # Errors
    ///
    /// As `plan_migration`, plus `InvalidSchema` for an invalid rename.
    pub fn plan_migration_with_renames(
        &self,
        slug: &str,
        desired: Vec<FieldDefinition>,
        renames: &[(String, String)],
        policy: ConflictPolicy,
    ) -> Result<MigrationPlan, AdminError> {
        let current = self.registry.get(slug)?;
        Ok(plan_with_renames(&current, desired, renames, policy)?)
    }

    /// Reports what `plan` would do without writing anything.
    ///
    /// # Errors
    ///
    /// `VersionMismatch` for a stale plan, `InvalidSchema` for an invalid
    /// target, `CoercionFailure` for the first record the `fail` policy
    /// would reject.
    pub async fn dry_run_migration(
        &self,
        plan: &MigrationPlan,
    ) -> Result<MigrationReport, AdminError> {
        self.check_plan(plan)?;
        self.migrator.dry_run(plan).await
    }

    /// Applies `plan` and installs its target schema.
    ///
    /// # Errors
    ///
    /// See [`migrate_with_cancel`](Self::migrate_with_cancel).
    pub async fn migrate(&self, plan: &MigrationPlan) -> Result<MigrationReport, AdminError> {
        self.migrate_with_cancel(plan, &self.cancel_handle()).await
    }

    /// Applies `plan`, stopping early if `cancel` fires.
    ///
    /// # Errors
    ///
    /// `VersionMismatch` when the plan is stale or another operation holds
    /// the collection, `InvalidSchema` when the target fields are invalid
    /// (nothing is written), `MigrationAborted` when the run fails after
    /// starting.
    pub async fn migrate_with_cancel(
        &self,
        plan: &MigrationPlan,
        cancel: &CancelHandle,
    ) -> Result<MigrationReport, AdminError> {
        let _intent = self.intents.try_exclusive(&plan.slug).ok_or_else(|| {
            tracing::warn!(slug = %plan.slug, "migration refused: collection busy");
            AdminError::VersionMismatch {
                slug: plan.slug.clone(),
                reason: "another operation holds the collection".to_string(),
            }
        })?;
        let current = self.check_plan(plan)?;
        let (report, target) = self.migrator.run(plan, &current, cancel).await?;
        self.registry.replace(target)?;
        Ok(report)
    }

    // -- records ----------------------------------------------------------

    /// Runs a bulk operation.
    ///
    /// # Errors
    ///
    /// See [`execute_bulk_operation_with_cancel`](Self::execute_bulk_operation_with_cancel).
    pub async fn execute_bulk_operation(
        &self,
        request: &BulkOperationRequest,
    ) -> Result<BulkOperationResult, AdminError> {
        self.execute_bulk_operation_with_cancel(request, &self.cancel_handle())
            .await
    }

    /// Runs a bulk operation, issuing no new calls once `cancel` fires.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown slug, `Conflict` while a migration holds the
    /// collection, `PartialFailure` when any id failed.
    pub async fn execute_bulk_operation_with_cancel(
        &self,
        request: &BulkOperationRequest,
        cancel: &CancelHandle,
    ) -> Result<BulkOperationResult, AdminError> {
        self.registry.get(request.slug())?;
        let _intent = self.shared_intent(request.slug())?;
        self.bulk.execute(request, cancel).await.into_result()
    }

    /// # Errors
    ///
    /// `NotFound` for an unknown slug, or a mapped gateway error.
    pub async fn find(
        &self,
        slug: &str,
        filter: &FilterExpr,
        pagination: Pagination,
    ) -> Result<Page<Record>, AdminError> {
        self.registry.get(slug)?;
        Ok(self.gateway.find(slug, filter, pagination).await?)
    }

    /// Fetches the page `filters` currently describes.
    ///
    /// Check the ticket with [`QueryFilterState::is_current`] before
    /// displaying the page.
    ///
    /// # Errors
    ///
    /// As [`find`](Self::find).
    pub async fn find_with_state(
        &self,
        slug: &str,
        filters: &QueryFilterState,
    ) -> Result<(FetchTicket, Page<Record>), AdminError> {
        let (ticket, request) = filters.begin_fetch();
        let page = self.find(slug, &request.filter, request.pagination).await?;
        Ok((ticket, page))
    }

    /// # Errors
    ///
    /// `NotFound` for an unknown slug, or a mapped gateway error.
    pub async fn count(&self, slug: &str, filter: &FilterExpr) -> Result<u64, AdminError> {
        self.registry.get(slug)?;
        Ok(self.gateway.count(slug, filter).await?)
    }

    /// Creates a record after filling defaults and validating it.
    ///
    /// # Errors
    ///
    /// `InvalidRecord` when the values violate the schema, `Conflict` while a
    /// migration holds the collection.
    pub async fn create_record(&self, slug: &str, mut values: Values) -> Result<Record, AdminError> {
        let _intent = self.shared_intent(slug)?;
        let schema = self.registry.get(slug)?;
        schema.apply_defaults(&mut values);
        check_values(&schema, &values)?;
        match self.gateway.create(slug, values).await {
            Ok(record) => Ok(record),
            Err(GatewayError::PartialCreate { id, reason }) => {
                tracing::warn!(slug, orphan_id = %id, %reason, "partial create, issuing compensating delete");
                if let Err(err) = self.gateway.delete(slug, &id).await {
                    tracing::warn!(slug, orphan_id = %id, error = %err, "compensating delete failed");
                }
                Err(AdminError::from(GatewayError::PartialCreate { id, reason }))
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Replaces a record's values wholesale.
    ///
    /// # Errors
    ///
    /// `InvalidRecord` when the values violate the schema, `NotFound` for an
    /// unknown record, `Conflict` while a migration holds the collection.
    pub async fn update_record(
        &self,
        slug: &str,
        id: &str,
        values: Values,
    ) -> Result<Record, AdminError> {
        let _intent = self.shared_intent(slug)?;
        let schema = self.registry.get(slug)?;
        check_values(&schema, &values)?;
        Ok(self.gateway.update(slug, id, values).await?)
    }

    /// # Errors
    ///
    /// `NotFound` for an unknown collection or record, `Conflict` while a
    /// migration holds the collection.
    pub async fn delete_record(&self, slug: &str, id: &str) -> Result<(), AdminError> {
        let _intent = self.shared_intent(slug)?;
        self.registry.get(slug)?;
        Ok(self.bulk.delete_one(slug, id).await?)
    }

    // -- helpers ----------------------------------------------------------

    fn shared_intent(&self, slug: &str) -> Result<IntentGuard, AdminError> {
        self.intents.try_shared(slug).ok_or_else(|| {
            tracing::debug!(slug, "write refused: migration in progress");
            AdminError::Conflict(format!("collection '{slug}' is being migrated"))
        })
    }

    /// Current schema, if `plan` was computed against it and its target
    /// would be accepted by the registry. Checked before any record is read.
    fn check_plan(&self, plan: &MigrationPlan) -> Result<CollectionSchema, AdminError> {
        let current = self.registry.get(&plan.slug)?;
        if current.version != plan.from_version || plan.to_version != plan.from_version + 1 {
            return Err(AdminError::VersionMismatch {
                slug: plan.slug.clone(),
                reason: format!(
                    "plan moves version {} to {}, collection is at {}",
                    plan.from_version, plan.to_version, current.version
                ),
            });
        }
        plan.target_schema(&current).validate()?;
        Ok(current)
    }
}

fn check_values(schema: &CollectionSchema, values: &Values) -> Result<(), AdminError> {
    match schema.validate_values(values) {
        ValidationResult::Valid => Ok(()),
        ValidationResult::Invalid { errors } => Err(AdminError::InvalidRecord { errors }),
    }
}

#[async_trait]
impl ManagedService for CollectionManager {
    fn name(&self) -> &'static str {
        "collections"
    }

    async fn init(&self, _ctx: &ServiceContext) -> anyhow::Result<()> {
        self.load_collections().await?;
        Ok(())
    }

    async fn reset(&self) -> anyhow::Result<()> {
        self.load_collections().await?;
        Ok(())
    }

    async fn shutdown(&self, terminate: bool) -> anyhow::Result<()> {
        self.shutdown.cancel();
        tracing::info!(terminate, "collection manager shut down");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use coladmin_core::{FieldType, FilterState, Value};

    use super::*;
    use crate::error::AbortCause;
    use crate::service::bulk::BulkKind;
    use crate::storage::InMemoryGateway;

    fn orders() -> CollectionSchema {
        CollectionSchema::new(
            "orders",
            vec![
                FieldDefinition::new("amount", FieldType::Number).required(),
                FieldDefinition::new("status", FieldType::Text).with_default("pending"),
            ],
        )
    }

    fn values(pairs: &[(&str, Value)]) -> Values {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect()
    }

    async fn manager() -> (Arc<InMemoryGateway>, CollectionManager) {
        let gateway = Arc::new(InMemoryGateway::new());
        let manager = CollectionManager::new(gateway.clone(), AdminConfig::default());
        manager.create_collection(orders()).await.unwrap();
        (gateway, manager)
    }

    #[tokio::test]
    async fn create_then_get_is_version_one() {
        let (_gateway, manager) = manager().await;
        let schema = manager.get_collection("orders").unwrap();
        assert_eq!(schema.version, 1);
        assert_eq!(schema.fields, orders().fields);
        assert!(matches!(
            manager.create_collection(orders()).await,
            Err(AdminError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn create_record_fills_defaults_and_validates() {
        let (_gateway, manager) = manager().await;
        let record = manager
            .create_record("orders", values(&[("amount", Value::Int(5))]))
            .await
            .unwrap();
        assert_eq!(record.values["status"], Value::from("pending"));

        let err = manager
            .create_record("orders", values(&[("amount", Value::from("five"))]))
            .await
            .unwrap_err();
        assert!(matches!(err, AdminError::InvalidRecord { .. }));

        let err = manager
            .create_record("orders", values(&[("amount", Value::Int(1)), ("extra", Value::Null)]))
            .await
            .unwrap_err();
        assert!(matches!(err, AdminError::InvalidRecord { .. }));
    }

    #[tokio::test]
    async fn partial_create_is_compensated() {
        let (gateway, manager) = manager().await;
        gateway.partially_fail_next_creates(1);
        let err = manager
            .create_record("orders", values(&[("amount", Value::Int(5))]))
            .await
            .unwrap_err();
        assert!(matches!(err, AdminError::Conflict(_)));
        assert_eq!(gateway.len("orders"), 0);
    }

    #[tokio::test]
    async fn config_update_refuses_field_changes() {
        let (_gateway, manager) = manager().await;
        let mut renamed = manager.get_collection("orders").unwrap();
        renamed.display_name = Some("Orders".into());
        let updated = manager
            .update_collection_config("orders", renamed.clone())
            .await
            .unwrap();
        assert_eq!(updated.display_name.as_deref(), Some("Orders"));

        renamed.fields.pop();
        assert!(matches!(
            manager.update_collection_config("orders", renamed).await,
            Err(AdminError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn delete_collection_requires_confirmation() {
        let (gateway, manager) = manager().await;
        assert!(matches!(
            manager.delete_collection("orders", "yes").await,
            Err(AdminError::InvalidRequest(_))
        ));
        manager.delete_collection("orders", "orders").await.unwrap();
        assert!(manager.get_collection("orders").is_err());
        assert!(gateway.get_collection_config("orders").await.is_err());
    }

    #[tokio::test]
    async fn stale_plan_is_version_mismatch() {
        let (_gateway, manager) = manager().await;
        let desired = vec![FieldDefinition::new("amount", FieldType::Number).required()];
        let first = manager
            .plan_migration("orders", desired.clone(), ConflictPolicy::Fail)
            .unwrap();
        let stale = first.clone();
        manager.migrate(&first).await.unwrap();
        assert_eq!(manager.get_collection("orders").unwrap().version, 2);

        assert!(matches!(
            manager.migrate(&stale).await,
            Err(AdminError::VersionMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn invalid_target_is_rejected_before_any_write() {
        let (gateway, manager) = manager().await;
        gateway
            .seed("orders", "a", values(&[("amount", Value::Int(1))]))
            .unwrap();
        let mut plan = manager
            .plan_migration(
                "orders",
                vec![
                    FieldDefinition::new("amount", FieldType::Number).required(),
                    FieldDefinition::new("note", FieldType::Text).with_default(""),
                ],
                ConflictPolicy::Fail,
            )
            .unwrap();
        plan.target_fields
            .push(FieldDefinition::new("note", FieldType::Text));

        assert!(matches!(
            manager.dry_run_migration(&plan).await,
            Err(AdminError::InvalidSchema(_))
        ));
        assert!(matches!(
            manager.migrate(&plan).await,
            Err(AdminError::InvalidSchema(_))
        ));
        assert_eq!(
            gateway.get_collection_config("orders").await.unwrap(),
            manager.get_collection("orders").unwrap()
        );
        assert_eq!(manager.get_collection("orders").unwrap().version, 1);
        assert_eq!(
            gateway.record("orders", "a").unwrap().values,
            values(&[("amount", Value::Int(1))])
        );

        let mut skipping = manager
            .plan_migration("orders", orders().fields, ConflictPolicy::Fail)
            .unwrap();
        skipping.to_version = 3;
        assert!(matches!(
            manager.migrate(&skipping).await,
            Err(AdminError::VersionMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn record_delete_shares_bulk_deletion_history() {
        let (gateway, manager) = manager().await;
        gateway
            .seed("orders", "a", values(&[("amount", Value::Int(1))]))
            .unwrap();

        manager.delete_record("orders", "a").await.unwrap();
        manager.delete_record("orders", "a").await.unwrap();
        assert!(matches!(
            manager.delete_record("orders", "missing").await,
            Err(AdminError::NotFound { .. })
        ));

        let request = BulkOperationRequest::new("orders", ["a"], BulkKind::Delete).unwrap();
        assert!(manager.execute_bulk_operation(&request).await.is_ok());

        manager.delete_collection("orders", "orders").await.unwrap();
        manager.create_collection(orders()).await.unwrap();
        let Err(AdminError::PartialFailure(result)) =
            manager.execute_bulk_operation(&request).await
        else {
            panic!("recreated collection should not remember 'a'");
        };
        assert_eq!(
            result.failed.get("a"),
            Some(&crate::service::FailureReason::NotFound)
        );
    }

    #[tokio::test]
    async fn migration_blocks_concurrent_writes() {
        let (_gateway, manager) = manager().await;
        let guard = manager.intents.try_exclusive("orders").unwrap();
        assert!(matches!(
            manager
                .create_record("orders", values(&[("amount", Value::Int(1))]))
                .await,
            Err(AdminError::Conflict(_))
        ));
        let plan = manager
            .plan_migration("orders", orders().fields, ConflictPolicy::Fail)
            .unwrap();
        assert!(matches!(
            manager.migrate(&plan).await,
            Err(AdminError::VersionMismatch { .. })
        ));
        let request = BulkOperationRequest::new("orders", ["x"], BulkKind::Delete).unwrap();
        assert!(matches!(
            manager.execute_bulk_operation(&request).await,
            Err(AdminError::Conflict(_))
        ));
        drop(guard);
        manager.migrate(&plan).await.unwrap();
    }

    #[tokio::test]
    async fn shutdown_cancels_migrations() {
        let (_gateway, manager) = manager().await;
        manager
            .create_record("orders", values(&[("amount", Value::Int(1))]))
            .await
            .unwrap();
        ManagedService::shutdown(&manager, false).await.unwrap();

        let plan = manager
            .plan_migration(
                "orders",
                vec![FieldDefinition::new("amount", FieldType::Text)],
                ConflictPolicy::Coerce,
            )
            .unwrap();
        assert!(matches!(
            manager.migrate(&plan).await,
            Err(AdminError::MigrationAborted {
                cause: AbortCause::Cancelled { .. },
                ..
            })
        ));
        assert_eq!(manager.get_collection("orders").unwrap().version, 1);
    }

    #[tokio::test]
    async fn init_loads_stored_collections() {
        let gateway = Arc::new(InMemoryGateway::new());
        gateway.create_collection(&orders()).await.unwrap();
        let manager = CollectionManager::new(gateway, AdminConfig::default());
        assert!(manager.list_collections().is_empty());

        let ctx = ServiceContext {
            config: Arc::new(AdminConfig::default()),
        };
        manager.init(&ctx).await.unwrap();
        assert_eq!(manager.list_collections().len(), 1);
    }

    #[tokio::test]
    async fn find_with_state_uses_category_and_page() {
        let (_gateway, manager) = manager().await;
        let filters = manager.filter_state("");
        filters.set_query("pending");
        manager
            .create_record("orders", values(&[("amount", Value::Int(1))]))
            .await
            .unwrap();
        manager
            .create_record(
                "orders",
                values(&[("amount", Value::Int(2)), ("status", Value::from("shipped"))]),
            )
            .await
            .unwrap();

        let (ticket, page) = manager.find_with_state("orders", &filters).await.unwrap();
        assert!(filters.is_current(ticket));
        assert_eq!(page.total, 1);
        assert_eq!(page.items[0].values["amount"], Value::Int(1));
        assert_eq!(filters.state(), FilterState::from_query_string("q=pending"));
    }
}
