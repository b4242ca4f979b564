//! Walks through a collection's lifecycle against the in-memory gateway.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use coladmin_core::{CollectionSchema, ConflictPolicy, FieldDefinition, FieldType, Value, Values};
use coladmin_server::service::{ServiceContext, ServiceRegistry};
use coladmin_server::{
    telemetry, AdminConfig, AdminError, BulkKind, BulkOperationRequest, CollectionManager,
    ExportFormat, InMemoryGateway, LogConfig,
};

#[derive(Debug, Parser)]
#[command(name = "coladmin-demo", about = "Collection admin walkthrough")]
struct Args {
    /// Concurrent gateway calls per bulk operation.
    #[arg(long, env = "COLADMIN_BULK_CONCURRENCY", default_value_t = 8)]
    bulk_concurrency: usize,

    /// Per-call gateway timeout in milliseconds.
    #[arg(long, env = "COLADMIN_GATEWAY_TIMEOUT_MS", default_value_t = 30_000)]
    gateway_timeout_ms: u64,

    #[arg(long, env = "COLADMIN_MIGRATION_PAGE_SIZE", default_value_t = 100)]
    migration_page_size: u32,

    /// `json` or `msgpack`.
    #[arg(long, env = "COLADMIN_EXPORT_FORMAT", default_value = "json")]
    export_format: ExportFormat,

    /// Number of sample records to seed.
    #[arg(long, default_value_t = 25)]
    records: u32,

    #[arg(long, env = "COLADMIN_LOG", default_value = "info")]
    log_filter: String,

    /// Emit JSON log lines.
    #[arg(long, env = "COLADMIN_LOG_JSON")]
    log_json: bool,
}

impl Args {
    fn config(&self) -> AdminConfig {
        AdminConfig {
            bulk_concurrency: self.bulk_concurrency,
            gateway_timeout: Duration::from_millis(self.gateway_timeout_ms),
            migration_page_size: self.migration_page_size,
            export_format: self.export_format,
            log: LogConfig {
                filter: self.log_filter.clone(),
                json: self.log_json,
            },
            ..AdminConfig::default()
        }
    }
}

fn sample(i: u32) -> Values {
    let mut values = Values::new();
    // Every seventh amount is unparseable so the retype has something to coerce.
    let amount = if i % 7 == 3 {
        Value::from("n/a")
    } else {
        Value::from(format!("{}.50", i * 10))
    };
    values.insert("amount".into(), amount);
    values.insert(
        "category".into(),
        Value::from(if i % 2 == 0 { "retail" } else { "wholesale" }),
    );
    values
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = args.config();
    config.validate().context("invalid configuration")?;
    telemetry::init_tracing(&config.log);

    let gateway = Arc::new(InMemoryGateway::new());
    let registry = ServiceRegistry::new();
    let manager = registry.register(CollectionManager::new(gateway.clone(), config.clone()));
    registry
        .init_all(&ServiceContext {
            config: Arc::new(config),
        })
        .await?;

    manager
        .create_collection(
            CollectionSchema::new(
                "orders",
                vec![
                    FieldDefinition::new("amount", FieldType::Text),
                    FieldDefinition::new("category", FieldType::Text),
                ],
            )
            .with_display_name("Orders"),
        )
        .await?;
    for i in 0..args.records {
        manager.create_record("orders", sample(i)).await?;
    }

    let plan = manager.plan_migration(
        "orders",
        vec![
            FieldDefinition::new("amount", FieldType::Number).with_default(0_i64),
            FieldDefinition::new("category", FieldType::Text),
            FieldDefinition::new("status", FieldType::Text).with_default("pending"),
        ],
        ConflictPolicy::Coerce,
    )?;
    for step in &plan.steps {
        tracing::info!(%step, "planned");
    }
    match manager.dry_run_migration(&plan).await {
        Ok(report) => tracing::info!(
            would_rewrite = report.records_rewritten,
            would_coerce = report.coerced_to_default,
            "dry run"
        ),
        Err(err) => tracing::warn!(error = %err, "dry run failed"),
    }
    let report = manager.migrate(&plan).await?;
    tracing::info!(
        version = report.to_version,
        rewritten = report.records_rewritten,
        coerced = report.coerced_to_default,
        "migrated"
    );

    let filters = manager.filter_state("?category=retail");
    let (_ticket, page) = manager.find_with_state("orders", &filters).await?;
    tracing::info!(
        shown = page.items.len(),
        total = page.total,
        query = %filters.state().to_query_string(),
        "filtered view"
    );

    let mut ids: Vec<String> = page.items.iter().map(|r| r.id.clone()).collect();
    if !ids.is_empty() {
        let export =
            BulkOperationRequest::new("orders", ids.iter().take(3).cloned(), BulkKind::Export)?;
        let exported = manager.execute_bulk_operation(&export).await?;
        tracing::info!(summary = %exported.summary(), "export");
    }

    // One unknown id shows per-id failure reporting.
    ids.push("missing-id".to_string());

    let delete = BulkOperationRequest::new("orders", ids, BulkKind::Delete)?;
    match manager.execute_bulk_operation(&delete).await {
        Ok(result) => tracing::info!(summary = %result.summary(), "delete"),
        Err(AdminError::PartialFailure(result)) => {
            tracing::warn!(summary = %result.summary(), "delete partially failed");
        }
        Err(err) => return Err(err).context("bulk delete"),
    }
    tracing::info!(remaining = gateway.len("orders"), "done");

    registry.shutdown_all(false).await?;
    Ok(())
}
