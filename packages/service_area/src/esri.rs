//! Esri JSON geometry codec.
//!
//! Points are `{ "x": .., "y": .., "z": .., "spatialReference": { "wkid": .. } }`
//! with `z` optional. Polygons are `{ "rings": [[[x, y], ..], ..] }`, where
//! clockwise rings are exteriors and counter-clockwise rings are holes
//! of the exterior before them.

use geo::{Coord, LineString, MultiPolygon, Polygon, Winding};
use serde_json::{Map, Value, json};
use service_area_models::{MapGeometry, MapPoint, MapPolygon, SpatialReference};
use thiserror::Error;

/// Errors converting between Esri JSON and [`MapGeometry`].
#[derive(Debug, Error)]
pub enum GeometryError {
    /// Input was not valid JSON.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// JSON was valid but does not describe a supported geometry.
    #[error("Invalid geometry: {message}")]
    Invalid {
        /// Description of what went wrong.
        message: String,
    },
}

impl GeometryError {
    fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid {
            message: message.into(),
        }
    }
}

/// Serializes a geometry to an Esri JSON string.
#[must_use]
pub fn geometry_to_json(geometry: &MapGeometry) -> String {
    geometry_to_value(geometry).to_string()
}

/// Parses an Esri JSON string into a geometry.
///
/// # Errors
///
/// Returns [`GeometryError`] if the string is not JSON or does not
/// describe a point or polygon.
pub fn geometry_from_json(json: &str) -> Result<MapGeometry, GeometryError> {
    let value: Value = serde_json::from_str(json)?;
    geometry_from_value(&value)
}

/// Converts a geometry to an Esri JSON tree.
#[must_use]
pub fn geometry_to_value(geometry: &MapGeometry) -> Value {
    let mut object = Map::new();

    match geometry {
        MapGeometry::Point(point) => {
            object.insert("x".to_string(), json!(point.x()));
            object.insert("y".to_string(), json!(point.y()));
            if let Some(z) = point.z {
                object.insert("z".to_string(), json!(z));
            }
        }
        MapGeometry::Polygon(polygon) => {
            object.insert("rings".to_string(), rings_to_value(&polygon.polygons));
        }
    }

    if let Some(sr) = geometry.spatial_reference() {
        object.insert("spatialReference".to_string(), json!({ "wkid": sr.wkid }));
    }

    Value::Object(object)
}

/// Converts an Esri JSON tree to a geometry.
///
/// # Errors
///
/// Returns [`GeometryError`] if the tree is not an object with either
/// numeric `x`/`y` members or a `rings` array.
pub fn geometry_from_value(value: &Value) -> Result<MapGeometry, GeometryError> {
    let object = value
        .as_object()
        .ok_or_else(|| GeometryError::invalid("geometry is not a JSON object"))?;

    let spatial_reference = spatial_reference_of(object)?;

    if let Some(rings) = object.get("rings") {
        let polygons = parse_rings(rings)?;
        return Ok(MapGeometry::Polygon(MapPolygon::new(
            polygons,
            spatial_reference,
        )));
    }

    match (object.get("x"), object.get("y")) {
        (Some(x), Some(y)) => {
            let x = x
                .as_f64()
                .ok_or_else(|| GeometryError::invalid("point x is not a number"))?;
            let y = y
                .as_f64()
                .ok_or_else(|| GeometryError::invalid("point y is not a number"))?;
            let mut point = MapPoint::new(x, y, spatial_reference);
            if let Some(z) = object.get("z").and_then(Value::as_f64) {
                point = point.with_z(z);
            }
            Ok(MapGeometry::Point(point))
        }
        _ => Err(GeometryError::invalid(
            "geometry has neither x/y coordinates nor rings",
        )),
    }
}

/// Converts an Esri JSON tree to a polygon.
///
/// # Errors
///
/// Returns [`GeometryError`] if the tree is not a polygon.
pub fn polygon_from_value(value: &Value) -> Result<MapPolygon, GeometryError> {
    match geometry_from_value(value)? {
        MapGeometry::Polygon(polygon) => Ok(polygon),
        MapGeometry::Point(_) => Err(GeometryError::invalid("expected a polygon, got a point")),
    }
}

fn spatial_reference_of(
    object: &Map<String, Value>,
) -> Result<Option<SpatialReference>, GeometryError> {
    let Some(wkid) = object
        .get("spatialReference")
        .and_then(|sr| sr.get("wkid"))
        .filter(|wkid| !wkid.is_null())
    else {
        return Ok(None);
    };

    let wkid = wkid
        .as_i64()
        .and_then(|w| i32::try_from(w).ok())
        .ok_or_else(|| GeometryError::invalid(format!("unsupported wkid {wkid}")))?;

    Ok(Some(SpatialReference::new(wkid)))
}

fn parse_rings(rings: &Value) -> Result<MultiPolygon<f64>, GeometryError> {
    let rings = rings
        .as_array()
        .ok_or_else(|| GeometryError::invalid("rings is not an array"))?;

    let mut parts: Vec<(LineString<f64>, Vec<LineString<f64>>)> = Vec::new();

    for ring in rings {
        let ring = parse_ring(ring)?;
        match parts.last_mut() {
            Some((_, holes)) if !ring.is_cw() => holes.push(ring),
            _ => parts.push((ring, Vec::new())),
        }
    }

    Ok(MultiPolygon::new(
        parts
            .into_iter()
            .map(|(exterior, holes)| Polygon::new(exterior, holes))
            .collect(),
    ))
}

fn parse_ring(ring: &Value) -> Result<LineString<f64>, GeometryError> {
    let vertices = ring
        .as_array()
        .ok_or_else(|| GeometryError::invalid("ring is not an array"))?;

    let coords = vertices
        .iter()
        .map(|vertex| {
            // Trailing z/m ordinates are ignored.
            let x = vertex.get(0).and_then(Value::as_f64);
            let y = vertex.get(1).and_then(Value::as_f64);
            match (x, y) {
                (Some(x), Some(y)) => Ok(Coord { x, y }),
                _ => Err(GeometryError::invalid(format!("invalid vertex {vertex}"))),
            }
        })
        .collect::<Result<Vec<_>, _>>()?;

    let mut line = LineString::new(coords);
    line.close();
    Ok(line)
}

fn rings_to_value(polygons: &MultiPolygon<f64>) -> Value {
    let mut rings = Vec::new();

    for polygon in polygons.iter() {
        let mut exterior = polygon.exterior().clone();
        exterior.make_cw_winding();
        rings.push(ring_to_value(&exterior));

        for hole in polygon.interiors() {
            let mut hole = hole.clone();
            hole.make_ccw_winding();
            rings.push(ring_to_value(&hole));
        }
    }

    Value::Array(rings)
}

fn ring_to_value(ring: &LineString<f64>) -> Value {
    Value::Array(ring.coords().map(|c| json!([c.x, c.y])).collect())
}
