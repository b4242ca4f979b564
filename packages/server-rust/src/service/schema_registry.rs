//! In-process cache of collection schemas, keyed by slug.
//!
//! The registry is the authority for versions: a schema only ever advances
//! one version at a time through [`SchemaRegistry::replace`].

use coladmin_core::CollectionSchema;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::error::AdminError;

/// Slug-keyed schema store shared by the manager and its services.
#[derive(Debug, Default)]
pub struct SchemaRegistry {
    schemas: DashMap<String, CollectionSchema>,
}

impl SchemaRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current schema for `slug`.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the slug is not registered.
    pub fn get(&self, slug: &str) -> Result<CollectionSchema, AdminError> {
        self.schemas
            .get(slug)
            .map(|s| s.value().clone())
            .ok_or_else(|| AdminError::collection_not_found(slug))
    }

    #[must_use]
    pub fn contains(&self, slug: &str) -> bool {
        self.schemas.contains_key(slug)
    }

    /// Registers a new collection at version 1.
    ///
    /// # Errors
    ///
    /// `InvalidSchema` if the schema is malformed, `Conflict` if the slug is
    /// taken.
    pub fn create(&self, mut schema: CollectionSchema) -> Result<CollectionSchema, AdminError> {
        schema.validate()?;
        schema.version = 1;
        match self.schemas.entry(schema.slug.clone()) {
            Entry::Occupied(_) => Err(AdminError::Conflict(format!(
                "collection '{}' already exists",
                schema.slug
            ))),
            Entry::Vacant(slot) => {
                slot.insert(schema.clone());
                Ok(schema)
            }
        }
    }

    /// Installs `next` in place of the current schema.
    ///
    /// `next.version` must be exactly one above the stored version.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown slug, `VersionMismatch` when the version
    /// does not follow the stored one, `InvalidSchema` if `next` is malformed.
    pub fn replace(&self, next: CollectionSchema) -> Result<(), AdminError> {
        next.validate()?;
        let mut current = self
            .schemas
            .get_mut(&next.slug)
            .ok_or_else(|| AdminError::collection_not_found(&next.slug))?;
        if next.version != current.version + 1 {
            return Err(AdminError::VersionMismatch {
                slug: next.slug.clone(),
                reason: format!(
                    "expected version {}, got {}",
                    current.version + 1,
                    next.version
                ),
            });
        }
        *current = next;
        Ok(())
    }

    /// Changes the display name without touching fields or version.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the slug is not registered.
    pub fn update_display_name(
        &self,
        slug: &str,
        display_name: Option<String>,
    ) -> Result<CollectionSchema, AdminError> {
        let mut current = self
            .schemas
            .get_mut(slug)
            .ok_or_else(|| AdminError::collection_not_found(slug))?;
        current.display_name = display_name;
        Ok(current.clone())
    }

    /// Removes `slug`. Returns the schema that was registered.
    pub fn drop_collection(&self, slug: &str) -> Option<CollectionSchema> {
        self.schemas.remove(slug).map(|(_, schema)| schema)
    }

    /// Replaces the whole registry with `schemas`, skipping malformed ones.
    ///
    /// Returns the number of schemas loaded.
    pub fn load(&self, schemas: Vec<CollectionSchema>) -> usize {
        self.schemas.clear();
        for schema in schemas {
            if let Err(err) = schema.validate() {
                tracing::warn!(slug = %schema.slug, error = %err, "skipping invalid stored schema");
                continue;
            }
            self.schemas.insert(schema.slug.clone(), schema);
        }
        self.schemas.len()
    }

    /// Every registered schema, sorted by slug.
    #[must_use]
    pub fn list(&self) -> Vec<CollectionSchema> {
        let mut all: Vec<CollectionSchema> =
            self.schemas.iter().map(|e| e.value().clone()).collect();
        all.sort_by(|a, b| a.slug.cmp(&b.slug));
        all
    }
}
