//! Newline-delimited JSON event codec.
//!
//! Each input line names a registered schema and carries the event's
//! values by field name:
//!
//! ```json
//! {"schema":"vehicles","fields":{"TRACK_ID":"truck-7","GEOMETRY":{"x":-117.19,"y":34.05}},"properties":{"type":"vehicle"}}
//! ```
//!
//! Fields absent from `fields` are null. Geometry values use Esri JSON.

use std::sync::Arc;

use serde_json::{Map, Value};
use service_area::esri::{self, GeometryError};
use service_area::registry::InMemorySchemaRegistry;
use service_area_models::{Event, EventError, EventProperty, FieldDefinition, FieldType, FieldValue};
use thiserror::Error;

/// Errors decoding an input line.
#[derive(Debug, Error)]
pub enum EventLineError {
    /// The line is not JSON.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The line is JSON but not an event object.
    #[error("Invalid event: {message}")]
    Invalid {
        /// Description of what went wrong.
        message: String,
    },

    /// No durable schema is registered under the given name.
    #[error("Unknown schema '{name}'")]
    UnknownSchema {
        /// Schema name from the line.
        name: String,
    },

    /// A field value does not fit the field's type.
    #[error("Field '{field}' expects {expected}")]
    FieldValue {
        /// Field name.
        field: String,
        /// Declared type.
        expected: FieldType,
    },

    /// A geometry value is not valid Esri JSON.
    #[error("Field '{field}': {source}")]
    Geometry {
        /// Field name.
        field: String,
        /// Underlying geometry error.
        source: GeometryError,
    },

    /// The values do not form a valid event.
    #[error(transparent)]
    Event(#[from] EventError),
}

fn invalid(message: impl Into<String>) -> EventLineError {
    EventLineError::Invalid {
        message: message.into(),
    }
}

/// Decodes one input line against the registry's durable schemas.
///
/// # Errors
///
/// Returns [`EventLineError`] if the line is malformed, names an unknown
/// schema, or carries values that do not fit the schema.
pub fn decode(line: &str, registry: &InMemorySchemaRegistry) -> Result<Event, EventLineError> {
    let value: Value = serde_json::from_str(line)?;
    let object = value
        .as_object()
        .ok_or_else(|| invalid("event line is not a JSON object"))?;

    let name = object
        .get("schema")
        .and_then(Value::as_str)
        .ok_or_else(|| invalid("missing string member 'schema'"))?;
    let schema = registry
        .find_by_name(name)
        .ok_or_else(|| EventLineError::UnknownSchema {
            name: name.to_string(),
        })?;

    let empty = Map::new();
    let fields = match object.get("fields") {
        None | Some(Value::Null) => &empty,
        Some(Value::Object(fields)) => fields,
        Some(_) => return Err(invalid("'fields' is not an object")),
    };

    if let Some(unknown) = fields.keys().find(|key| schema.field(key).is_none()) {
        return Err(EventError::UnknownField {
            name: unknown.clone(),
        }
        .into());
    }

    let values = schema
        .fields()
        .iter()
        .map(|field| decode_value(field, fields.get(&field.name).unwrap_or(&Value::Null)))
        .collect::<Result<Vec<_>, _>>()?;

    let mut event = Event::new(Arc::clone(&schema), values)?;

    if let Some(properties) = object.get("properties") {
        let properties = properties
            .as_object()
            .ok_or_else(|| invalid("'properties' is not an object"))?;
        for (key, value) in properties {
            let value = value
                .as_str()
                .ok_or_else(|| invalid(format!("property '{key}' is not a string")))?;
            event.set_property(EventProperty::from_key(key), value);
        }
    }

    Ok(event)
}

fn decode_value(field: &FieldDefinition, value: &Value) -> Result<FieldValue, EventLineError> {
    if value.is_null() {
        return Ok(FieldValue::Null);
    }

    let decoded = match field.field_type {
        FieldType::String => value.as_str().map(|s| FieldValue::String(s.to_string())),
        FieldType::Integer => value
            .as_i64()
            .and_then(|n| i32::try_from(n).ok())
            .map(FieldValue::Integer),
        FieldType::Long => value.as_i64().map(FieldValue::Long),
        FieldType::Double => value.as_f64().map(FieldValue::Double),
        FieldType::Boolean => value.as_bool().map(FieldValue::Boolean),
        FieldType::Geometry => {
            let geometry =
                esri::geometry_from_value(value).map_err(|source| EventLineError::Geometry {
                    field: field.name.clone(),
                    source,
                })?;
            Some(FieldValue::Geometry(geometry))
        }
    };

    decoded.ok_or_else(|| EventLineError::FieldValue {
        field: field.name.clone(),
        expected: field.field_type,
    })
}

/// Encodes an event as a JSON object with the same shape [`decode`]
/// reads, plus the schema id.
#[must_use]
pub fn encode(event: &Event) -> Value {
    let fields: Map<String, Value> = event
        .schema()
        .fields()
        .iter()
        .zip(event.values())
        .map(|(field, value)| (field.name.clone(), encode_value(value)))
        .collect();

    let properties: Map<String, Value> = event
        .properties()
        .map(|(key, value)| (key.key().to_string(), Value::from(value)))
        .collect();

    let mut object = Map::new();
    object.insert("schema".to_string(), Value::from(event.schema().name()));
    object.insert("schemaId".to_string(), Value::from(event.schema_id().as_str()));
    object.insert("fields".to_string(), Value::Object(fields));
    object.insert("properties".to_string(), Value::Object(properties));
    Value::Object(object)
}

fn encode_value(value: &FieldValue) -> Value {
    match value {
        FieldValue::Null => Value::Null,
        FieldValue::String(s) => Value::from(s.as_str()),
        FieldValue::Integer(n) => Value::from(*n),
        FieldValue::Long(n) => Value::from(*n),
        FieldValue::Double(n) => Value::from(*n),
        FieldValue::Boolean(b) => Value::from(*b),
        FieldValue::Geometry(geometry) => esri::geometry_to_value(geometry),
    }
}
