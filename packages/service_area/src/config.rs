//! Stage configuration loading and validation.
//!
//! [`ServiceAreaConfig`] is the deserialized stage file. [`StageConfig`]
//! is the validated, immutable view the processor runs with; the output
//! [`Placement`] is decided here once rather than per event.

use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;

use serde::Deserialize;
use service_area_models::definition::{
    ConnectionDefinition, OutputPolygonType, SchemaDefinition, StageDefinition,
};
use thiserror::Error;

/// Errors loading or validating the stage configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The file is not valid TOML for this schema.
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// A property has an unusable value.
    #[error("Invalid configuration: {message}")]
    Invalid {
        /// Description of what went wrong.
        message: String,
    },
}

impl ConfigError {
    fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid {
            message: message.into(),
        }
    }
}

/// Contents of a stage file.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceAreaConfig {
    /// The `[stage]` table.
    pub stage: StageDefinition,
    /// The `[connections.<name>]` tables.
    #[serde(default)]
    pub connections: BTreeMap<String, ConnectionDefinition>,
    /// The `[[schemas]]` array.
    #[serde(default)]
    pub schemas: Vec<SchemaDefinition>,
}

impl ServiceAreaConfig {
    /// Reads and parses a stage file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    /// Parses a stage file from a string.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the string is not a valid stage file.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        Ok(toml::de::from_str(contents)?)
    }
}

/// Where the computed polygon goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Placement {
    /// Overwrite the input geometry field in place.
    ReplaceInput,
    /// Write to a separate geometry field, adding it to a derived schema
    /// when the input schema lacks it.
    OutputField {
        /// Output field name.
        field: String,
        /// Name for derived output schemas; `None` keeps them anonymous.
        schema_name: Option<String>,
    },
}

/// Validated, immutable stage configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageConfig {
    /// Geometry field holding the facility point.
    pub input_field: String,
    /// Where the polygon is written.
    pub placement: Placement,
    /// Name of the server connection to call.
    pub connection: String,
    /// Solver path appended to the connection URL.
    pub solver_path: String,
    /// Drive time break, in whole minutes.
    pub drive_time_minutes: u32,
    /// Requested polygon fidelity; `None` omits the parameter.
    pub output_polygon_type: Option<OutputPolygonType>,
}

impl StageConfig {
    /// Validates a raw stage definition.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if a required property is empty,
    /// the drive time is zero, or the polygon type is unknown.
    pub fn from_definition(def: &StageDefinition) -> Result<Self, ConfigError> {
        let input_field = def.input_field.trim().to_string();
        if input_field.is_empty() {
            return Err(ConfigError::invalid("input_field must not be empty"));
        }

        let placement = if def.replace_geometry {
            Placement::ReplaceInput
        } else {
            let field = def.output_field.trim().to_string();
            if field.is_empty() {
                return Err(ConfigError::invalid(
                    "output_field is required when replace_geometry is false",
                ));
            }
            let schema_name = Some(def.output_schema_name.trim().to_string())
                .filter(|name| !name.is_empty());
            Placement::OutputField { field, schema_name }
        };

        let connection = def.connection.trim().to_string();
        if connection.is_empty() {
            return Err(ConfigError::invalid("connection must not be empty"));
        }

        if def.drive_time_minutes == 0 {
            return Err(ConfigError::invalid(
                "drive_time_minutes must be at least 1",
            ));
        }

        let polygon_type = def.output_polygon_type.trim();
        let output_polygon_type = if polygon_type.is_empty() {
            None
        } else {
            Some(OutputPolygonType::from_str(polygon_type).map_err(|_| {
                ConfigError::invalid(format!(
                    "output_polygon_type '{polygon_type}' is not one of 'detailed', 'simplified'"
                ))
            })?)
        };

        Ok(Self {
            input_field,
            placement,
            connection,
            solver_path: def.solver_path.trim().to_string(),
            drive_time_minutes: def.drive_time_minutes,
            output_polygon_type,
        })
    }

    /// Field the polygon is written to.
    #[must_use]
    pub fn output_field(&self) -> &str {
        match &self.placement {
            Placement::ReplaceInput => &self.input_field,
            Placement::OutputField { field, .. } => field,
        }
    }

    /// Configured name for derived output schemas.
    #[must_use]
    pub fn output_schema_name(&self) -> Option<&str> {
        match &self.placement {
            Placement::ReplaceInput => None,
            Placement::OutputField { schema_name, .. } => schema_name.as_deref(),
        }
    }

    /// Whether the stage modifies events in place rather than emitting
    /// new events under a named output schema.
    #[must_use]
    pub const fn mutates_events(&self) -> bool {
        matches!(
            self.placement,
            Placement::ReplaceInput
                | Placement::OutputField {
                    schema_name: None,
                    ..
                }
        )
    }
}

impl TryFrom<&StageDefinition> for StageConfig {
    type Error = ConfigError;

    fn try_from(def: &StageDefinition) -> Result<Self, Self::Error> {
        Self::from_definition(def)
    }
}
