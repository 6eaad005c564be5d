//! Parses `solveServiceArea` replies.
//!
//! A reply looks like:
//!
//! ```json
//! { "saPolygons": {
//!     "spatialReference": { "wkid": 4326 },
//!     "features": [ { "geometry": { "rings": [...] } } ] } }
//! ```
//!
//! The feature geometries omit their spatial reference, so the one on
//! `saPolygons` is stamped onto each before conversion.

use serde_json::Value;
use service_area_models::MapPolygon;

use crate::ServiceAreaError;
use crate::esri;

const SA_POLYGONS_PATH: &[&str] = &["saPolygons"];
const WKID_PATH: &[&str] = &["spatialReference", "wkid"];
const FEATURES_PATH: &[&str] = &["features"];
const GEOMETRY_PATH: &[&str] = &["geometry"];

/// Result of a successfully parsed reply.
#[derive(Debug, Clone, PartialEq)]
pub enum SolveOutcome {
    /// The selected service area polygon.
    Polygon(MapPolygon),
    /// The reply carried no `saPolygons` member.
    NoResult,
}

/// Parses a raw reply body and selects its polygon.
///
/// When the reply lists several polygons the first one wins.
///
/// # Errors
///
/// Returns [`ServiceAreaError::MalformedReply`] if the body is not JSON
/// or `saPolygons` is missing its spatial reference or features, and
/// [`ServiceAreaError::NoGeometryInResult`] if it lists no polygons.
pub fn parse(body: &str) -> Result<SolveOutcome, ServiceAreaError> {
    let reply: Value = serde_json::from_str(body).map_err(|e| malformed(format!("{e}")))?;

    let Some(sa_polygons) = follow(&reply, SA_POLYGONS_PATH) else {
        if let Some(message) = reply.pointer("/error/message").and_then(Value::as_str) {
            log::warn!("Solver reported an error instead of service areas: {message}");
        } else {
            log::warn!("Solver reply has no saPolygons: {body}");
        }
        return Ok(SolveOutcome::NoResult);
    };

    let mut polygons = extract_polygons(sa_polygons)?;

    if polygons.len() > 1 {
        log::info!(
            "Solver returned {} service area polygons; keeping the first",
            polygons.len()
        );
    }

    if polygons.is_empty() {
        return Err(ServiceAreaError::NoGeometryInResult);
    }

    Ok(SolveOutcome::Polygon(polygons.swap_remove(0)))
}

/// Converts every feature geometry under `saPolygons`, in feature order.
///
/// # Errors
///
/// Returns [`ServiceAreaError::MalformedReply`] if the spatial reference
/// or feature list is missing or a geometry is not a polygon.
pub fn extract_polygons(sa_polygons: &Value) -> Result<Vec<MapPolygon>, ServiceAreaError> {
    let wkid = follow(sa_polygons, WKID_PATH)
        .and_then(Value::as_i64)
        .ok_or_else(|| malformed("saPolygons.spatialReference.wkid is missing or not an integer"))?;

    let features = follow(sa_polygons, FEATURES_PATH)
        .and_then(Value::as_array)
        .ok_or_else(|| malformed("saPolygons.features is missing or not an array"))?;

    let mut polygons = Vec::with_capacity(features.len());

    for (index, feature) in features.iter().enumerate() {
        let Some(geometry) = follow(feature, GEOMETRY_PATH).filter(|g| !g.is_null()) else {
            log::debug!("Skipping service area feature {index} without geometry");
            continue;
        };

        let mut geometry = geometry.clone();
        let object = geometry
            .as_object_mut()
            .ok_or_else(|| malformed(format!("feature {index} geometry is not an object")))?;
        object.insert(
            "spatialReference".to_string(),
            serde_json::json!({ "wkid": wkid }),
        );

        let polygon = esri::polygon_from_value(&geometry)
            .map_err(|e| malformed(format!("feature {index}: {e}")))?;
        polygons.push(polygon);
    }

    Ok(polygons)
}

/// Walks a fixed key path through a JSON tree.
fn follow<'a>(node: &'a Value, path: &[&str]) -> Option<&'a Value> {
    path.iter().try_fold(node, |node, key| node.get(*key))
}

fn malformed(message: impl Into<String>) -> ServiceAreaError {
    ServiceAreaError::MalformedReply {
        message: message.into(),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn square(offset: f64) -> Value {
        json!({
            "rings": [[
                [offset, offset],
                [offset, offset + 1.0],
                [offset + 1.0, offset + 1.0],
                [offset + 1.0, offset],
                [offset, offset]
            ]]
        })
    }

    #[test]
    fn single_feature_yields_polygon_in_reply_reference() {
        let body = json!({
            "saPolygons": {
                "spatialReference": { "wkid": 4326 },
                "features": [{ "attributes": { "FromBreak": 0, "ToBreak": 2 }, "geometry": square(0.0) }]
            }
        })
        .to_string();

        let SolveOutcome::Polygon(polygon) = parse(&body).unwrap() else {
            panic!("expected a polygon");
        };

        assert_eq!(polygon.wkid(), Some(4326));
        let embedded = esri::geometry_to_value(&polygon.clone().into());
        assert_eq!(embedded["spatialReference"], json!({ "wkid": 4326 }));
        assert_eq!(polygon.polygons.0.len(), 1);
    }

    #[test]
    fn reply_reference_overrides_geometry_reference() {
        let mut geometry = square(0.0);
        geometry["spatialReference"] = json!({ "wkid": 3857 });
        let body = json!({
            "saPolygons": {
                "spatialReference": { "wkid": 102_100 },
                "features": [{ "geometry": geometry }]
            }
        })
        .to_string();

        let SolveOutcome::Polygon(polygon) = parse(&body).unwrap() else {
            panic!("expected a polygon");
        };
        assert_eq!(polygon.wkid(), Some(102_100));
    }

    #[test]
    fn multiple_features_keep_the_first() {
        let body = json!({
            "saPolygons": {
                "spatialReference": { "wkid": 4326 },
                "features": [{ "geometry": square(0.0) }, { "geometry": square(10.0) }]
            }
        })
        .to_string();

        let SolveOutcome::Polygon(polygon) = parse(&body).unwrap() else {
            panic!("expected a polygon");
        };
        let first = esri::polygon_from_value(&square(0.0)).unwrap();
        assert_eq!(polygon.polygons, first.polygons);
    }

    #[test]
    fn empty_features_is_no_geometry() {
        let body = r#"{"saPolygons":{"spatialReference":{"wkid":4326},"features":[]}}"#;
        assert!(matches!(
            parse(body),
            Err(ServiceAreaError::NoGeometryInResult)
        ));
    }

    #[test]
    fn missing_sa_polygons_is_no_result() {
        assert_eq!(parse(r#"{"messages":[]}"#).unwrap(), SolveOutcome::NoResult);
        assert_eq!(
            parse(r#"{"error":{"code":498,"message":"Invalid token."}}"#).unwrap(),
            SolveOutcome::NoResult
        );
    }

    #[test]
    fn malformed_replies_are_errors() {
        for body in [
            "<html>gateway timeout</html>",
            r#"{"saPolygons":{"features":[]}}"#,
            r#"{"saPolygons":{"spatialReference":{"wkid":"4326"},"features":[]}}"#,
            r#"{"saPolygons":{"spatialReference":{"wkid":4326}}}"#,
            r#"{"saPolygons":{"spatialReference":{"wkid":4326},"features":[{"geometry":[1,2]}]}}"#,
            r#"{"saPolygons":{"spatialReference":{"wkid":4326},"features":[{"geometry":{"x":1,"y":2}}]}}"#,
        ] {
            assert!(
                matches!(parse(body), Err(ServiceAreaError::MalformedReply { .. })),
                "expected MalformedReply for {body}"
            );
        }
    }

    #[test]
    fn features_without_geometry_are_skipped() {
        let body = json!({
            "saPolygons": {
                "spatialReference": { "wkid": 4326 },
                "features": [{ "attributes": {} }, { "geometry": square(5.0) }]
            }
        })
        .to_string();

        assert!(matches!(parse(&body), Ok(SolveOutcome::Polygon(_))));
    }
}
