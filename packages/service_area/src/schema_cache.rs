//! Per-stage cache of derived output schemas.
//!
//! The first event of each input schema derives an output schema (the
//! input fields plus the geometry output field), registers it, and
//! records the mapping. Later events of that schema reuse the mapping.
//! Resolve-or-create and teardown share one write lock, so a given
//! input schema never gets more than one derived schema, no matter how
//! many events of it arrive at once.

use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};

use service_area_models::{FieldDefinition, FieldType, Schema, SchemaId};

use crate::ServiceAreaError;
use crate::registry::SchemaRegistry;

/// Maps input schema ids to the output schemas derived from them.
pub struct SchemaCache {
    registry: Arc<dyn SchemaRegistry>,
    owner: String,
    output_field: String,
    output_schema_name: Option<String>,
    mappings: RwLock<BTreeMap<SchemaId, SchemaId>>,
}

impl SchemaCache {
    /// Creates an empty cache.
    ///
    /// Derived schemas are owned by `owner`, gain a geometry field named
    /// `output_field` when the input lacks it, and are registered as
    /// durable under `output_schema_name` when one is given (temporary
    /// otherwise).
    #[must_use]
    pub fn new(
        registry: Arc<dyn SchemaRegistry>,
        owner: impl Into<String>,
        output_field: impl Into<String>,
        output_schema_name: Option<String>,
    ) -> Self {
        Self {
            registry,
            owner: owner.into(),
            output_field: output_field.into(),
            output_schema_name,
            mappings: RwLock::new(BTreeMap::new()),
        }
    }

    /// Returns the output schema for `input`, deriving and registering it
    /// on first use.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceAreaError::SchemaConflict`] if `input` already
    /// defines the output field with a non-geometry type, or
    /// [`ServiceAreaError::Registry`] if registration fails.
    pub fn resolve(&self, input: &Schema) -> Result<Arc<Schema>, ServiceAreaError> {
        {
            let mappings = self.mappings.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(schema) = self.lookup(&mappings, input.id()) {
                return Ok(schema);
            }
        }

        let mut mappings = self
            .mappings
            .write()
            .unwrap_or_else(PoisonError::into_inner);

        // Another caller may have registered it while we waited.
        if let Some(schema) = self.lookup(&mappings, input.id()) {
            return Ok(schema);
        }
        if let Some(stale) = mappings.get(input.id()) {
            log::warn!(
                "Output schema {stale} for input schema '{}' is no longer registered; deriving a new one",
                input.name()
            );
        }

        let derived = self.derive(input)?;
        let temporary = self.output_schema_name.is_none();
        let registered = self.registry.add_schema(derived, temporary)?;

        log::debug!(
            "Derived output schema {} from input schema '{}' ({})",
            registered.id(),
            input.name(),
            input.id()
        );
        mappings.insert(input.id().clone(), registered.id().clone());

        Ok(registered)
    }

    /// Deletes every schema this cache registered and empties the cache.
    ///
    /// Deletion failures are logged and skipped; the cache is always
    /// empty afterwards. Returns the number of failed deletions.
    pub fn clear_all(&self) -> usize {
        let mut mappings = self
            .mappings
            .write()
            .unwrap_or_else(PoisonError::into_inner);

        let mut failures = 0;
        for output_id in mappings.values() {
            if let Err(e) = self.registry.delete_schema(output_id) {
                log::warn!("Failed to delete output schema {output_id}: {e}");
                failures += 1;
            }
        }
        mappings.clear();

        failures
    }

    /// Output schema id cached for `input`, if any.
    #[must_use]
    pub fn cached(&self, input: &SchemaId) -> Option<SchemaId> {
        self.mappings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(input)
            .cloned()
    }

    /// Number of cached mappings.
    #[must_use]
    pub fn len(&self) -> usize {
        self.mappings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether the cache holds no mappings.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lookup(
        &self,
        mappings: &BTreeMap<SchemaId, SchemaId>,
        input: &SchemaId,
    ) -> Option<Arc<Schema>> {
        mappings
            .get(input)
            .and_then(|output| self.registry.get_schema(output))
    }

    fn derive(&self, input: &Schema) -> Result<Schema, ServiceAreaError> {
        let mut derived = match input.field(&self.output_field) {
            Some(field) if field.field_type != FieldType::Geometry => {
                return Err(ServiceAreaError::SchemaConflict {
                    schema: input.name().to_string(),
                    field: self.output_field.clone(),
                    field_type: field.field_type,
                });
            }
            Some(_) => input.duplicate(),
            None => input.augment([FieldDefinition::new(
                self.output_field.clone(),
                FieldType::Geometry,
            )]),
        };

        derived.set_owner(self.owner.clone());
        if let Some(name) = &self.output_schema_name {
            derived.set_name(name.clone());
        }

        Ok(derived)
    }
}
