#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Drive-time service area enrichment for point events.
//!
//! For each event carrying a point geometry, the [`processor`] asks a
//! remote network-analysis solver (an `ArcGIS` `NAServer`
//! `solveServiceArea` endpoint) for the polygon reachable within the
//! configured drive time and attaches it to the event. Depending on the
//! stage configuration the polygon either replaces the input geometry,
//! fills an existing output field, or lands in a new field of a derived
//! output schema that the [`schema_cache`] creates once per input schema.
//!
//! The pieces, leaf to root:
//!
//! - [`esri`] converts between Esri JSON geometry and [`MapGeometry`].
//! - [`request`] builds the form-encoded solver request.
//! - [`transport`] sends it over HTTP.
//! - [`response`] picks the polygon out of the solver's reply.
//! - [`processor`] ties them together per event.

pub mod config;
pub mod esri;
pub mod processor;
pub mod registry;
pub mod request;
pub mod response;
pub mod schema_cache;
pub mod transport;

pub use config::{Placement, ServiceAreaConfig, StageConfig};
pub use processor::ServiceAreaCalculator;
pub use service_area_models::{MapGeometry, MapPoint, MapPolygon};

use thiserror::Error;

/// Errors raised while enriching an event.
#[derive(Debug, Error)]
pub enum ServiceAreaError {
    /// Stage configuration is unusable.
    #[error("Configuration error: {message}")]
    Configuration {
        /// Description of what went wrong.
        message: String,
    },

    /// The input schema already has the output field with a non-geometry
    /// type, so no output schema can be derived from it.
    #[error("Schema '{schema}' already defines field '{field}' as {field_type}")]
    SchemaConflict {
        /// Name of the input schema.
        schema: String,
        /// Output field name.
        field: String,
        /// The conflicting type.
        field_type: service_area_models::FieldType,
    },

    /// The event's output field exists but is not geometry-typed.
    #[error("Output field '{field}' is not a geometry field")]
    OutputFieldType {
        /// Output field name.
        field: String,
    },

    /// The event's input field is missing or does not hold a point.
    #[error("Input field '{field}' does not hold a point geometry")]
    InputFieldType {
        /// Input field name.
        field: String,
    },

    /// The configured connection is not known to the connection provider.
    #[error("Unknown server connection '{name}'")]
    UnknownConnection {
        /// Connection name.
        name: String,
    },

    /// Talking to the solver failed.
    #[error("Transport error: {0}")]
    Transport(#[from] transport::TransportError),

    /// The solver reply could not be interpreted.
    #[error("Malformed solver reply: {message}")]
    MalformedReply {
        /// Description of what went wrong.
        message: String,
    },

    /// The solver reply listed no polygon features.
    #[error("Solver reply contains no service area geometry")]
    NoGeometryInResult,

    /// Geometry could not be converted to or from Esri JSON.
    #[error("Geometry error: {0}")]
    Geometry(#[from] esri::GeometryError),

    /// The schema registry rejected an operation.
    #[error("Schema registry error: {0}")]
    Registry(#[from] registry::RegistryError),

    /// The enriched event could not be built.
    #[error("Event error: {0}")]
    Event(#[from] service_area_models::EventError),
}
