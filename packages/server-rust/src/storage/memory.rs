//! In-memory [`CollectionDataGateway`] implementation backed by [`DashMap`].
//!
//! Suitable for development, tests, and demos. Carries fault injection so
//! partial-failure paths can be exercised without a real backend.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use coladmin_core::{CollectionSchema, FilterExpr, Page, Pagination, Record, Values};
use dashmap::DashMap;
use parking_lot::Mutex;

use super::gateway::{CollectionDataGateway, GatewayError, MigrationReport};

/// Returns the current wall-clock time as milliseconds since the Unix epoch.
#[allow(clippy::cast_possible_truncation)]
fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

struct Collection {
    schema: CollectionSchema,
    /// Keyed by id, so page order is stable across calls.
    records: BTreeMap<String, Record>,
}

/// Injected failures. Cleared with [`InMemoryGateway::clear_faults`].
#[derive(Debug, Default)]
struct Faults {
    /// Every record-level call naming one of these ids fails with the error.
    by_id: HashMap<String, GatewayError>,
    /// The next N creates fail without persisting anything.
    reject_creates: usize,
    /// The next N creates persist the record, then report `PartialCreate`.
    partial_creates: usize,
    /// The next N deletes remove the record, then report `Unavailable`.
    lost_delete_acks: usize,
    /// Calls left before every call reports `Unavailable`.
    unavailable_after: Option<u64>,
    latency: Option<Duration>,
}

/// In-memory gateway for tests and demos.
pub struct InMemoryGateway {
    collections: DashMap<String, Collection>,
    faults: Mutex<Faults>,
    calls: AtomicU64,
}

impl InMemoryGateway {
    /// Creates an empty gateway with no faults.
    #[must_use]
    pub fn new() -> Self {
        Self {
            collections: DashMap::new(),
            faults: Mutex::new(Faults::default()),
            calls: AtomicU64::new(0),
        }
    }

    /// Inserts a record with a caller-chosen id, bypassing faults.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the collection does not exist.
    pub fn seed(&self, slug: &str, id: &str, values: Values) -> Result<Record, GatewayError> {
        let mut collection = self
            .collections
            .get_mut(slug)
            .ok_or_else(|| GatewayError::collection_not_found(slug))?;
        let now = now_millis();
        let record = Record {
            id: id.to_string(),
            collection_slug: slug.to_string(),
            values,
            created_at: now,
            updated_at: now,
        };
        collection.records.insert(id.to_string(), record.clone());
        Ok(record)
    }

    /// Reads a record directly, bypassing faults.
    #[must_use]
    pub fn record(&self, slug: &str, id: &str) -> Option<Record> {
        self.collections
            .get(slug)
            .and_then(|c| c.records.get(id).cloned())
    }

    /// Number of records stored in `slug` (0 when the collection is absent).
    #[must_use]
    pub fn len(&self, slug: &str) -> usize {
        self.collections.get(slug).map_or(0, |c| c.records.len())
    }

    /// Total calls made through the gateway trait.
    #[must_use]
    pub fn call_count(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    /// Makes every record-level call naming `id` fail with `error`.
    pub fn fail_id(&self, id: impl Into<String>, error: GatewayError) {
        self.faults.lock().by_id.insert(id.into(), error);
    }

    /// The next `n` creates fail with `Rejected` and persist nothing.
    pub fn reject_next_creates(&self, n: usize) {
        self.faults.lock().reject_creates = n;
    }

    /// The next `n` creates persist the record, then report `PartialCreate`.
    pub fn partially_fail_next_creates(&self, n: usize) {
        self.faults.lock().partial_creates = n;
    }

    /// Applies the next `n` deletes but reports them as `Unavailable`.
    pub fn lose_next_delete_acks(&self, n: usize) {
        self.faults.lock().lost_delete_acks = n;
    }

    /// After `n` more calls succeed, every call reports `Unavailable`.
    pub fn go_unavailable_after(&self, n: u64) {
        self.faults.lock().unavailable_after = Some(n);
    }

    /// Delay applied to every call before it runs.
    pub fn set_latency(&self, latency: Option<Duration>) {
        self.faults.lock().latency = latency;
    }

    pub fn clear_faults(&self) {
        *self.faults.lock() = Faults::default();
    }

    /// Common prologue: counts the call, applies latency and injected faults.
    async fn enter(&self, record_id: Option<&str>) -> Result<(), GatewayError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        let latency = self.faults.lock().latency;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        let mut faults = self.faults.lock();
        if let Some(remaining) = faults.unavailable_after.as_mut() {
            if *remaining == 0 {
                return Err(GatewayError::Unavailable("backend offline".to_string()));
            }
            *remaining -= 1;
        }
        if let Some(error) = record_id.and_then(|id| faults.by_id.get(id)) {
            return Err(error.clone());
        }
        Ok(())
    }
}

impl Default for InMemoryGateway {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CollectionDataGateway for InMemoryGateway {
    async fn find(
        &self,
        slug: &str,
        filter: &FilterExpr,
        pagination: Pagination,
    ) -> Result<Page<Record>, GatewayError> {
        if let FilterExpr::IdIn { ids } = filter {
            for id in ids {
                self.enter(Some(id)).await?;
            }
        } else {
            self.enter(None).await?;
        }
        let collection = self
            .collections
            .get(slug)
            .ok_or_else(|| GatewayError::collection_not_found(slug))?;
        let matching: Vec<&Record> = collection
            .records
            .values()
            .filter(|r| filter.matches(&r.id, &r.values))
            .collect();
        let total = matching.len() as u64;
        let items = matching
            .into_iter()
            .skip(pagination.offset())
            .take(pagination.page_size as usize)
            .cloned()
            .collect();
        Ok(Page { items, total })
    }

    async fn create(&self, slug: &str, values: Values) -> Result<Record, GatewayError> {
        self.enter(None).await?;
        let (reject, partial) = {
            let mut faults = self.faults.lock();
            let reject = faults.reject_creates > 0;
            if reject {
                faults.reject_creates -= 1;
            }
            let partial = !reject && faults.partial_creates > 0;
            if partial {
                faults.partial_creates -= 1;
            }
            (reject, partial)
        };
        if reject {
            return Err(GatewayError::Rejected("create refused by backend".to_string()));
        }
        let id = uuid::Uuid::new_v4().to_string();
        let record = self.seed(slug, &id, values)?;
        if partial {
            return Err(GatewayError::PartialCreate {
                id: record.id,
                reason: "index write failed".to_string(),
            });
        }
        Ok(record)
    }

    async fn update(&self, slug: &str, id: &str, values: Values) -> Result<Record, GatewayError> {
        self.enter(Some(id)).await?;
        let mut collection = self
            .collections
            .get_mut(slug)
            .ok_or_else(|| GatewayError::collection_not_found(slug))?;
        let record = collection
            .records
            .get_mut(id)
            .ok_or_else(|| GatewayError::record_not_found(id))?;
        record.values = values;
        record.updated_at = now_millis().max(record.updated_at);
        Ok(record.clone())
    }

    async fn delete(&self, slug: &str, id: &str) -> Result<(), GatewayError> {
        self.enter(Some(id)).await?;
        {
            let mut collection = self
                .collections
                .get_mut(slug)
                .ok_or_else(|| GatewayError::collection_not_found(slug))?;
            collection
                .records
                .remove(id)
                .ok_or_else(|| GatewayError::record_not_found(id))?;
        }
        let mut faults = self.faults.lock();
        if faults.lost_delete_acks > 0 {
            faults.lost_delete_acks -= 1;
            return Err(GatewayError::Unavailable(
                "delete acknowledgement lost".to_string(),
            ));
        }
        Ok(())
    }

    async fn count(&self, slug: &str, filter: &FilterExpr) -> Result<u64, GatewayError> {
        self.enter(None).await?;
        let collection = self
            .collections
            .get(slug)
            .ok_or_else(|| GatewayError::collection_not_found(slug))?;
        Ok(collection
            .records
            .values()
            .filter(|r| filter.matches(&r.id, &r.values))
            .count() as u64)
    }

    async fn get_collection_config(&self, slug: &str) -> Result<CollectionSchema, GatewayError> {
        self.enter(None).await?;
        self.collections
            .get(slug)
            .map(|c| c.schema.clone())
            .ok_or_else(|| GatewayError::collection_not_found(slug))
    }

    async fn update_collection_config(
        &self,
        slug: &str,
        schema: &CollectionSchema,
    ) -> Result<(), GatewayError> {
        self.enter(None).await?;
        let mut collection = self
            .collections
            .get_mut(slug)
            .ok_or_else(|| GatewayError::collection_not_found(slug))?;
        collection.schema = schema.clone();
        Ok(())
    }

    async fn create_collection(&self, schema: &CollectionSchema) -> Result<(), GatewayError> {
        self.enter(None).await?;
        match self.collections.entry(schema.slug.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(GatewayError::Conflict(format!(
                "collection '{}' already exists",
                schema.slug
            ))),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(Collection {
                    schema: schema.clone(),
                    records: BTreeMap::new(),
                });
                Ok(())
            }
        }
    }

    async fn delete_collection(&self, slug: &str) -> Result<(), GatewayError> {
        self.enter(None).await?;
        self.collections
            .remove(slug)
            .map(|_| ())
            .ok_or_else(|| GatewayError::collection_not_found(slug))
    }

    async fn migrate_schema(
        &self,
        from: &CollectionSchema,
        to: &CollectionSchema,
    ) -> Result<MigrationReport, GatewayError> {
        self.enter(None).await?;
        let collection = self
            .collections
            .get(&from.slug)
            .ok_or_else(|| GatewayError::collection_not_found(&from.slug))?;
        if collection.schema.version != from.version {
            return Err(GatewayError::Conflict(format!(
                "stored version {} does not match migration source {}",
                collection.schema.version, from.version
            )));
        }
        // Records live as loose value maps here; nothing structural to alter.
        Ok(MigrationReport {
            slug: from.slug.clone(),
            from_version: from.version,
            to_version: to.version,
            ..MigrationReport::default()
        })
    }

    async fn list_collections(&self) -> Result<Vec<CollectionSchema>, GatewayError> {
        self.enter(None).await?;
        let mut schemas: Vec<CollectionSchema> = self
            .collections
            .iter()
            .map(|entry| entry.value().schema.clone())
            .collect();
        schemas.sort_by(|a, b| a.slug.cmp(&b.slug));
        Ok(schemas)
    }
}

#[cfg(test)]
mod tests {
    use coladmin_core::Value;

    use super::*;

    fn values(pairs: &[(&str, Value)]) -> Values {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect()
    }

    async fn gateway_with_orders() -> InMemoryGateway {
        let gateway = InMemoryGateway::new();
        gateway
            .create_collection(&CollectionSchema::new("orders", vec![]))
            .await
            .unwrap();
        gateway
    }

    #[tokio::test]
    async fn create_assigns_id_and_timestamps() {
        let gateway = gateway_with_orders().await;
        let record = gateway
            .create("orders", values(&[("amount", Value::Int(1))]))
            .await
            .unwrap();
        assert!(!record.id.is_empty());
        assert_eq!(record.created_at, record.updated_at);
        assert_eq!(gateway.len("orders"), 1);
    }

    #[tokio::test]
    async fn find_pages_and_filters() {
        let gateway = gateway_with_orders().await;
        for (id, status) in [("a", "open"), ("b", "closed"), ("c", "open")] {
            gateway
                .seed("orders", id, values(&[("status", Value::from(status))]))
                .unwrap();
        }
        let open = FilterExpr::Equals {
            field: "status".into(),
            value: Value::from("open"),
        };
        let page = gateway
            .find("orders", &open, Pagination::new(1, 1))
            .await
            .unwrap();
        assert_eq!(page.total, 2);
        assert_eq!(page.items[0].id, "a");
        let page = gateway
            .find("orders", &open, Pagination::new(2, 1))
            .await
            .unwrap();
        assert_eq!(page.items[0].id, "c");
        assert_eq!(gateway.count("orders", &open).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn update_replaces_values() {
        let gateway = gateway_with_orders().await;
        gateway
            .seed("orders", "a", values(&[("x", Value::Int(1)), ("y", Value::Int(2))]))
            .unwrap();
        let updated = gateway
            .update("orders", "a", values(&[("x", Value::Int(5))]))
            .await
            .unwrap();
        assert_eq!(updated.values, values(&[("x", Value::Int(5))]));
    }

    #[tokio::test]
    async fn delete_missing_is_not_found() {
        let gateway = gateway_with_orders().await;
        let err = gateway.delete("orders", "nope").await.unwrap_err();
        assert_eq!(err, GatewayError::record_not_found("nope"));
    }

    #[tokio::test]
    async fn duplicate_collection_conflicts() {
        let gateway = gateway_with_orders().await;
        let err = gateway
            .create_collection(&CollectionSchema::new("orders", vec![]))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Conflict(_)));
    }

    #[tokio::test]
    async fn delete_collection_discards_records() {
        let gateway = gateway_with_orders().await;
        gateway.seed("orders", "a", Values::new()).unwrap();
        gateway.delete_collection("orders").await.unwrap();
        assert_eq!(gateway.len("orders"), 0);
        assert!(gateway.get_collection_config("orders").await.is_err());
    }

    #[tokio::test]
    async fn injected_id_fault_applies_to_record_calls() {
        let gateway = gateway_with_orders().await;
        gateway.seed("orders", "a", Values::new()).unwrap();
        gateway.fail_id("a", GatewayError::Rejected("locked".into()));
        assert!(matches!(
            gateway.delete("orders", "a").await,
            Err(GatewayError::Rejected(_))
        ));
        assert!(gateway
            .find("orders", &FilterExpr::id("a"), Pagination::new(1, 1))
            .await
            .is_err());
        gateway.clear_faults();
        assert!(gateway.delete("orders", "a").await.is_ok());
    }

    #[tokio::test]
    async fn partial_create_persists_then_errors() {
        let gateway = gateway_with_orders().await;
        gateway.partially_fail_next_creates(1);
        let err = gateway.create("orders", Values::new()).await.unwrap_err();
        let GatewayError::PartialCreate { id, .. } = err else {
            panic!("expected partial create");
        };
        assert!(gateway.record("orders", &id).is_some());
        assert!(gateway.create("orders", Values::new()).await.is_ok());
    }

    #[tokio::test]
    async fn goes_unavailable_after_budget() {
        let gateway = gateway_with_orders().await;
        gateway.go_unavailable_after(1);
        assert!(gateway.count("orders", &FilterExpr::All).await.is_ok());
        assert!(matches!(
            gateway.count("orders", &FilterExpr::All).await,
            Err(GatewayError::Unavailable(_))
        ));
    }

    #[tokio::test]
    async fn lost_delete_ack_still_removes_record() {
        let gateway = gateway_with_orders().await;
        gateway.seed("orders", "a", Values::new()).unwrap();
        gateway.lose_next_delete_acks(1);
        assert!(matches!(
            gateway.delete("orders", "a").await,
            Err(GatewayError::Unavailable(_))
        ));
        assert!(gateway.record("orders", "a").is_none());
        assert!(gateway.delete("orders", "a").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn migrate_schema_checks_source_version() {
        let gateway = gateway_with_orders().await;
        let mut stale = CollectionSchema::new("orders", vec![]);
        stale.version = 3;
        let mut next = stale.clone();
        next.version = 4;
        assert!(matches!(
            gateway.migrate_schema(&stale, &next).await,
            Err(GatewayError::Conflict(_))
        ));
    }
}
