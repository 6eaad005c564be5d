//! Stage and connection definitions deserialized from TOML.
//!
//! These are the raw, unvalidated property values. Defaults match the
//! processor's published property table, so a stage file only needs to
//! name the values it changes.

use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

use crate::FieldDefinition;

/// Default name of the geometry field read from incoming events.
pub const DEFAULT_INPUT_FIELD: &str = "GEOMETRY";

/// Default solver path appended to the connection's base URL.
pub const DEFAULT_SOLVER_PATH: &str =
    "rest/services/Network/USA/NAServer/Service%20Area/solveServiceArea";

/// Default drive time, in minutes.
pub const DEFAULT_DRIVE_TIME_MINUTES: u32 = 2;

/// Default output polygon fidelity.
pub const DEFAULT_OUTPUT_POLYGON_TYPE: &str = "simplified";

/// Fidelity of the polygons the solver generates.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum OutputPolygonType {
    /// Follows the street network closely.
    #[strum(to_string = "detailed", serialize = "esriNAOutputPolygonDetailed")]
    Detailed,
    /// Generalized outline; faster to compute.
    #[strum(to_string = "simplified", serialize = "esriNAOutputPolygonSimplified")]
    Simplified,
}

impl OutputPolygonType {
    /// The value the solver expects in its `outputPolygons` parameter.
    #[must_use]
    pub const fn wire_value(self) -> &'static str {
        match self {
            Self::Detailed => "esriNAOutputPolygonDetailed",
            Self::Simplified => "esriNAOutputPolygonSimplified",
        }
    }
}

/// Raw stage properties, as written in the `[stage]` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageDefinition {
    /// Geometry field holding the facility point.
    #[serde(default = "default_input_field")]
    pub input_field: String,
    /// Overwrite the input field with the polygon instead of writing a
    /// separate output field.
    #[serde(default = "default_true")]
    pub replace_geometry: bool,
    /// Field receiving the polygon when not replacing.
    #[serde(default)]
    pub output_field: String,
    /// Name to register derived output schemas under. Empty means the
    /// derived schemas are anonymous and temporary.
    #[serde(default)]
    pub output_schema_name: String,
    /// Name of the server connection to call.
    pub connection: String,
    /// Solver path appended to the connection URL.
    #[serde(default = "default_solver_path")]
    pub solver_path: String,
    /// Drive time break, in whole minutes.
    #[serde(default = "default_drive_time")]
    pub drive_time_minutes: u32,
    /// `"detailed"`, `"simplified"`, or empty to let the solver decide.
    #[serde(default = "default_output_polygon_type")]
    pub output_polygon_type: String,
}

impl StageDefinition {
    /// Creates a definition with every optional property at its default.
    #[must_use]
    pub fn new(connection: impl Into<String>) -> Self {
        Self {
            input_field: default_input_field(),
            replace_geometry: true,
            output_field: String::new(),
            output_schema_name: String::new(),
            connection: connection.into(),
            solver_path: default_solver_path(),
            drive_time_minutes: DEFAULT_DRIVE_TIME_MINUTES,
            output_polygon_type: default_output_polygon_type(),
        }
    }
}

/// A named server connection, as written in the `[connections.<name>]`
/// tables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionDefinition {
    /// Base URL; the solver path is appended verbatim.
    pub url: String,
    /// Access token sent as the `token` form parameter.
    #[serde(default)]
    pub token: Option<String>,
    /// Value of the `Referer` header.
    #[serde(default)]
    pub referer: String,
}

/// An event schema, as written in the `[[schemas]]` array.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaDefinition {
    /// Schema name.
    pub name: String,
    /// Ordered field definitions.
    pub fields: Vec<FieldDefinition>,
}

fn default_input_field() -> String {
    DEFAULT_INPUT_FIELD.to_string()
}

const fn default_true() -> bool {
    true
}

fn default_solver_path() -> String {
    DEFAULT_SOLVER_PATH.to_string()
}

const fn default_drive_time() -> u32 {
    DEFAULT_DRIVE_TIME_MINUTES
}

fn default_output_polygon_type() -> String {
    DEFAULT_OUTPUT_POLYGON_TYPE.to_string()
}
