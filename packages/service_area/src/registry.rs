//! Seams to the hosting environment: the schema registry and the
//! server connection provider.
//!
//! The stage only depends on the [`SchemaRegistry`] and
//! [`ConnectionProvider`] traits. [`InMemorySchemaRegistry`] and
//! [`StaticConnections`] back the CLI driver and the tests.

use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};

use service_area_models::definition::ConnectionDefinition;
use service_area_models::{Schema, SchemaId};
use thiserror::Error;

/// Errors raised by a [`SchemaRegistry`].
#[derive(Debug, Error)]
pub enum RegistryError {
    /// No schema is registered under this id.
    #[error("Schema '{id}' is not registered")]
    NotFound {
        /// Schema id.
        id: SchemaId,
    },

    /// A durable schema with this name is already owned by someone else.
    #[error("A schema named '{name}' is already registered")]
    DuplicateName {
        /// Schema name.
        name: String,
    },

    /// The registry refused the operation for another reason.
    #[error("Registry rejected the operation: {message}")]
    Rejected {
        /// Description of what went wrong.
        message: String,
    },
}

/// Stores schemas by identity.
pub trait SchemaRegistry: Send + Sync {
    /// Registers a schema. Temporary schemas are anonymous and expected
    /// to be deleted by their owner; durable ones are published under
    /// their name.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError`] if the registry refuses the schema.
    fn add_schema(&self, schema: Schema, temporary: bool) -> Result<Arc<Schema>, RegistryError>;

    /// Looks up a registered schema.
    fn get_schema(&self, id: &SchemaId) -> Option<Arc<Schema>>;

    /// Removes a registered schema.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError`] if the schema is unknown or cannot be
    /// removed.
    fn delete_schema(&self, id: &SchemaId) -> Result<(), RegistryError>;
}

struct Registered {
    schema: Arc<Schema>,
    temporary: bool,
}

/// Process-local [`SchemaRegistry`].
#[derive(Default)]
pub struct InMemorySchemaRegistry {
    schemas: RwLock<BTreeMap<SchemaId, Registered>>,
}

impl InMemorySchemaRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Finds a durable schema by name.
    #[must_use]
    pub fn find_by_name(&self, name: &str) -> Option<Arc<Schema>> {
        self.schemas
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .find(|r| !r.temporary && r.schema.name() == name)
            .map(|r| Arc::clone(&r.schema))
    }

    /// Whether the schema was registered as temporary.
    #[must_use]
    pub fn is_temporary(&self, id: &SchemaId) -> Option<bool> {
        self.schemas
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .map(|r| r.temporary)
    }

    /// Number of registered schemas.
    #[must_use]
    pub fn len(&self) -> usize {
        self.schemas
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether no schemas are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl SchemaRegistry for InMemorySchemaRegistry {
    fn add_schema(&self, schema: Schema, temporary: bool) -> Result<Arc<Schema>, RegistryError> {
        let mut schemas = self.schemas.write().unwrap_or_else(PoisonError::into_inner);

        if !temporary
            && schemas.values().any(|r| {
                !r.temporary && r.schema.name() == schema.name() && r.schema.owner() != schema.owner()
            })
        {
            return Err(RegistryError::DuplicateName {
                name: schema.name().to_string(),
            });
        }

        let schema = Arc::new(schema);
        log::debug!(
            "Registering {} schema '{}' ({})",
            if temporary { "temporary" } else { "durable" },
            schema.name(),
            schema.id()
        );
        schemas.insert(
            schema.id().clone(),
            Registered {
                schema: Arc::clone(&schema),
                temporary,
            },
        );
        Ok(schema)
    }

    fn get_schema(&self, id: &SchemaId) -> Option<Arc<Schema>> {
        self.schemas
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .map(|r| Arc::clone(&r.schema))
    }

    fn delete_schema(&self, id: &SchemaId) -> Result<(), RegistryError> {
        self.schemas
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| RegistryError::NotFound { id: id.clone() })
    }
}

/// Resolved details of a server connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConnection {
    /// Base URL the solver path is appended to.
    pub url: String,
    /// Access token, if the server requires one.
    pub token: Option<String>,
    /// Value of the `Referer` header.
    pub referer: String,
}

impl From<ConnectionDefinition> for ServerConnection {
    fn from(def: ConnectionDefinition) -> Self {
        Self {
            url: def.url.trim().to_string(),
            token: def
                .token
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty()),
            referer: def.referer.trim().to_string(),
        }
    }
}

/// Looks up server connections by name.
pub trait ConnectionProvider: Send + Sync {
    /// Returns the named connection, if known.
    fn connection(&self, name: &str) -> Option<ServerConnection>;
}

/// A fixed set of connections, typically loaded from the stage file.
#[derive(Debug, Clone, Default)]
pub struct StaticConnections {
    connections: BTreeMap<String, ServerConnection>,
}

impl StaticConnections {
    /// Creates an empty provider.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the provider with `connection` added under `name`.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, connection: ServerConnection) -> Self {
        self.connections.insert(name.into(), connection);
        self
    }
}

impl From<BTreeMap<String, ConnectionDefinition>> for StaticConnections {
    fn from(defs: BTreeMap<String, ConnectionDefinition>) -> Self {
        Self {
            connections: defs
                .into_iter()
                .map(|(name, def)| (name, ServerConnection::from(def)))
                .collect(),
        }
    }
}

impl ConnectionProvider for StaticConnections {
    fn connection(&self, name: &str) -> Option<ServerConnection> {
        self.connections.get(name).cloned()
    }
}
