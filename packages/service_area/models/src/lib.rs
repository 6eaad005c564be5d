#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Event and schema types for the service area enrichment stage.
//!
//! An [`Event`] is an ordered list of typed field values described by a
//! [`Schema`], plus a map of metadata properties. Schemas are immutable
//! once created and are identified by a [`SchemaId`] that stays stable
//! for the schema's lifetime.

pub mod definition;
pub mod geometry;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};
use thiserror::Error;

pub use geometry::{MapGeometry, MapPoint, MapPolygon, SpatialReference};

/// Tag marking the field that carries an event's track identifier.
pub const TRACK_ID_TAG: &str = "TRACK_ID";

/// Opaque schema identity.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SchemaId(String);

impl SchemaId {
    /// Generates a fresh, random identity.
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Returns the identity as a string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for SchemaId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for SchemaId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for SchemaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Type of a schema field.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum FieldType {
    /// UTF-8 text.
    String,
    /// 32-bit signed integer.
    Integer,
    /// 64-bit signed integer.
    Long,
    /// 64-bit float.
    Double,
    /// True/false.
    Boolean,
    /// A [`MapGeometry`].
    Geometry,
}

/// A named, typed field in a [`Schema`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDefinition {
    /// Field name, unique within its schema.
    pub name: String,
    /// Value type.
    #[serde(rename = "type")]
    pub field_type: FieldType,
    /// Semantic tags (e.g. [`TRACK_ID_TAG`]).
    #[serde(default)]
    pub tags: Vec<String>,
}

impl FieldDefinition {
    /// Creates an untagged field.
    #[must_use]
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            tags: Vec::new(),
        }
    }

    /// Returns the field with `tag` added.
    #[must_use]
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    /// Whether the field carries `tag`.
    #[must_use]
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }
}

/// An ordered set of typed fields describing the shape of an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    id: SchemaId,
    name: String,
    owner: Option<String>,
    fields: Vec<FieldDefinition>,
}

impl Schema {
    /// Creates a schema with a freshly generated identity.
    #[must_use]
    pub fn new(name: impl Into<String>, fields: Vec<FieldDefinition>) -> Self {
        Self {
            id: SchemaId::generate(),
            name: name.into(),
            owner: None,
            fields,
        }
    }

    /// Identity of this schema.
    #[must_use]
    pub const fn id(&self) -> &SchemaId {
        &self.id
    }

    /// Schema name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Id of the component that created this schema, if any.
    #[must_use]
    pub fn owner(&self) -> Option<&str> {
        self.owner.as_deref()
    }

    /// Ordered field definitions.
    #[must_use]
    pub fn fields(&self) -> &[FieldDefinition] {
        &self.fields
    }

    /// Looks up a field by name.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&FieldDefinition> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Position of the named field.
    #[must_use]
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    /// A copy of this schema under a new identity with `extra` fields
    /// appended.
    #[must_use]
    pub fn augment(&self, extra: impl IntoIterator<Item = FieldDefinition>) -> Self {
        let mut fields = self.fields.clone();
        fields.extend(extra);
        Self {
            id: SchemaId::generate(),
            name: self.name.clone(),
            owner: self.owner.clone(),
            fields,
        }
    }

    /// A copy of this schema under a new identity.
    #[must_use]
    pub fn duplicate(&self) -> Self {
        self.augment(std::iter::empty())
    }

    /// Renames the schema.
    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    /// Records the owning component.
    pub fn set_owner(&mut self, owner: impl Into<String>) {
        self.owner = Some(owner.into());
    }
}

/// A single field value.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    /// No value.
    Null,
    /// Text value.
    String(String),
    /// 32-bit integer value.
    Integer(i32),
    /// 64-bit integer value.
    Long(i64),
    /// Floating point value.
    Double(f64),
    /// Boolean value.
    Boolean(bool),
    /// Geometry value.
    Geometry(MapGeometry),
}

impl FieldValue {
    /// Type of the value, or `None` for [`FieldValue::Null`].
    #[must_use]
    pub const fn field_type(&self) -> Option<FieldType> {
        match self {
            Self::Null => None,
            Self::String(_) => Some(FieldType::String),
            Self::Integer(_) => Some(FieldType::Integer),
            Self::Long(_) => Some(FieldType::Long),
            Self::Double(_) => Some(FieldType::Double),
            Self::Boolean(_) => Some(FieldType::Boolean),
            Self::Geometry(_) => Some(FieldType::Geometry),
        }
    }

    /// Returns the geometry if this is a geometry value.
    #[must_use]
    pub const fn as_geometry(&self) -> Option<&MapGeometry> {
        match self {
            Self::Geometry(g) => Some(g),
            _ => None,
        }
    }

    /// Returns the text if this is a string value.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }
}

impl From<MapGeometry> for FieldValue {
    fn from(value: MapGeometry) -> Self {
        Self::Geometry(value)
    }
}

/// Event-level metadata keys.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EventProperty {
    /// Event type.
    Type,
    /// Id of the component that produced the event.
    OwnerId,
    /// URI of the component that produced the event.
    OwnerUri,
    /// Any other property.
    Custom(String),
}

impl EventProperty {
    /// Key used when the property is written out as JSON.
    #[must_use]
    pub fn key(&self) -> &str {
        match self {
            Self::Type => "type",
            Self::OwnerId => "ownerId",
            Self::OwnerUri => "ownerUri",
            Self::Custom(key) => key,
        }
    }

    /// Inverse of [`EventProperty::key`].
    #[must_use]
    pub fn from_key(key: &str) -> Self {
        match key {
            "type" => Self::Type,
            "ownerId" => Self::OwnerId,
            "ownerUri" => Self::OwnerUri,
            other => Self::Custom(other.to_string()),
        }
    }
}

/// Errors raised when building or mutating an [`Event`].
#[derive(Debug, Error)]
pub enum EventError {
    /// Value count does not match the schema's field count.
    #[error("Schema '{schema}' has {expected} fields but {actual} values were supplied")]
    FieldCount {
        /// Schema name.
        schema: String,
        /// Number of schema fields.
        expected: usize,
        /// Number of values supplied.
        actual: usize,
    },

    /// The schema has no field with this name.
    #[error("Unknown field '{name}'")]
    UnknownField {
        /// Field name.
        name: String,
    },

    /// The value does not match the field's declared type.
    #[error("Field '{name}' expects {expected} but got {actual}")]
    TypeMismatch {
        /// Field name.
        name: String,
        /// Declared type.
        expected: FieldType,
        /// Supplied type.
        actual: FieldType,
    },
}

/// A typed record flowing through the stage.
#[derive(Debug, Clone)]
pub struct Event {
    schema: Arc<Schema>,
    values: Vec<FieldValue>,
    properties: BTreeMap<EventProperty, String>,
}

impl Event {
    /// Creates an event from values given in schema field order.
    ///
    /// # Errors
    ///
    /// Returns [`EventError`] if the number of values differs from the
    /// number of fields or a non-null value has the wrong type.
    pub fn new(schema: Arc<Schema>, values: Vec<FieldValue>) -> Result<Self, EventError> {
        if values.len() != schema.fields().len() {
            return Err(EventError::FieldCount {
                schema: schema.name().to_string(),
                expected: schema.fields().len(),
                actual: values.len(),
            });
        }

        for (field, value) in schema.fields().iter().zip(&values) {
            check_type(field, value)?;
        }

        Ok(Self {
            schema,
            values,
            properties: BTreeMap::new(),
        })
    }

    /// Schema describing this event.
    #[must_use]
    pub const fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// Shortcut for `self.schema().id()`.
    #[must_use]
    pub fn schema_id(&self) -> &SchemaId {
        self.schema.id()
    }

    /// All values, in schema field order.
    #[must_use]
    pub fn values(&self) -> &[FieldValue] {
        &self.values
    }

    /// Value of the named field, or `None` if the schema lacks it.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&FieldValue> {
        self.schema.index_of(name).map(|i| &self.values[i])
    }

    /// Replaces the value of the named field.
    ///
    /// # Errors
    ///
    /// Returns [`EventError`] if the field does not exist or the value
    /// has the wrong type.
    pub fn set_field(&mut self, name: &str, value: FieldValue) -> Result<(), EventError> {
        let index = self
            .schema
            .index_of(name)
            .ok_or_else(|| EventError::UnknownField {
                name: name.to_string(),
            })?;
        check_type(&self.schema.fields()[index], &value)?;
        self.values[index] = value;
        Ok(())
    }

    /// Value of the first string field tagged [`TRACK_ID_TAG`].
    #[must_use]
    pub fn track_id(&self) -> Option<&str> {
        self.schema
            .fields()
            .iter()
            .zip(&self.values)
            .find(|(field, _)| field.has_tag(TRACK_ID_TAG))
            .and_then(|(_, value)| value.as_str())
    }

    /// Value of a metadata property.
    #[must_use]
    pub fn property(&self, key: &EventProperty) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    /// Whether a metadata property is set.
    #[must_use]
    pub fn has_property(&self, key: &EventProperty) -> bool {
        self.properties.contains_key(key)
    }

    /// Sets a metadata property, replacing any previous value.
    pub fn set_property(&mut self, key: EventProperty, value: impl Into<String>) {
        self.properties.insert(key, value.into());
    }

    /// Iterates over all metadata properties.
    pub fn properties(&self) -> impl Iterator<Item = (&EventProperty, &str)> {
        self.properties.iter().map(|(k, v)| (k, v.as_str()))
    }
}

fn check_type(field: &FieldDefinition, value: &FieldValue) -> Result<(), EventError> {
    match value.field_type() {
        Some(actual) if actual != field.field_type => Err(EventError::TypeMismatch {
            name: field.name.clone(),
            expected: field.field_type,
            actual,
        }),
        _ => Ok(()),
    }
}
