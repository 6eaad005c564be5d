//! Builds `solveServiceArea` requests.
//!
//! The solver takes a form-encoded POST. The facility point goes in the
//! `facilities` parameter as a one-feature collection; its elevation is
//! stripped first because the solver rejects 3D facilities.

use std::time::Duration;

use serde_json::Value;
use service_area_models::{MapGeometry, MapPoint};

use crate::ServiceAreaError;
use crate::config::StageConfig;
use crate::esri;
use crate::registry::ServerConnection;

/// Travel direction sent with every request.
pub const TRAVEL_DIRECTION: &str = "esriNATravelDirectionFromFacility";

/// How long to wait for the solver before giving up.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// A ready-to-send solver request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SolverRequest {
    /// Full solver URL.
    pub url: String,
    /// Form parameters, in the order they are sent.
    pub params: Vec<(String, String)>,
    /// Value of the `Referer` header.
    pub referer: String,
    /// Request timeout.
    pub timeout: Duration,
}

impl SolverRequest {
    /// Value of the named form parameter.
    #[must_use]
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Serializes `point` as the solver's `facilities` parameter:
/// `{"type":"features","features":[{"geometry":<point>}]}`.
///
/// # Errors
///
/// Returns [`ServiceAreaError::Geometry`] if the point's JSON cannot be
/// re-read while stripping its elevation.
pub fn build_facility_payload(point: &MapPoint) -> Result<String, ServiceAreaError> {
    let geometry = strip_z(&esri::geometry_to_json(&MapGeometry::Point(point.clone())))?;
    Ok(format!(
        "{{\"type\":\"features\",\"features\":[{{\"geometry\":{geometry}}}]}}"
    ))
}

/// Removes a top-level `z` member from a geometry JSON object. Input
/// without one is returned unchanged.
fn strip_z(geometry_json: &str) -> Result<String, ServiceAreaError> {
    let mut value: Value = serde_json::from_str(geometry_json).map_err(esri::GeometryError::from)?;

    match value.as_object_mut() {
        Some(object) if object.contains_key("z") => {
            object.remove("z");
            Ok(value.to_string())
        }
        _ => Ok(geometry_json.to_string()),
    }
}

/// Assembles the solver request for one facility.
#[must_use]
pub fn build_request(
    connection: &ServerConnection,
    facilities: String,
    config: &StageConfig,
) -> SolverRequest {
    let mut params = vec![("f".to_string(), "json".to_string())];

    if let Some(token) = &connection.token {
        params.push(("token".to_string(), token.clone()));
    }

    params.push(("facilities".to_string(), facilities));
    params.push((
        "defaultBreaks".to_string(),
        config.drive_time_minutes.to_string(),
    ));
    params.push(("travelDirection".to_string(), TRAVEL_DIRECTION.to_string()));

    if let Some(polygon_type) = config.output_polygon_type {
        params.push((
            "outputPolygons".to_string(),
            polygon_type.wire_value().to_string(),
        ));
    }

    SolverRequest {
        url: format!("{}{}", connection.url, config.solver_path),
        params,
        referer: connection.referer.clone(),
        timeout: DEFAULT_TIMEOUT,
    }
}
