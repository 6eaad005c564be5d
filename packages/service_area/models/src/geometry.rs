//! Geometry values carried in event fields.
//!
//! Coordinates are stored as [`geo`] types. Each value keeps the
//! spatial reference it was read with; the solver reply dictates the
//! reference of the polygons it returns.

use geo::{MultiPolygon, Point};

/// Well-known id of WGS 84 (longitude/latitude).
pub const WGS84_WKID: i32 = 4326;

/// A coordinate reference system identified by its well-known id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SpatialReference {
    /// Well-known id (e.g. `4326`, `102100`).
    pub wkid: i32,
}

impl SpatialReference {
    /// Creates a spatial reference from a well-known id.
    #[must_use]
    pub const fn new(wkid: i32) -> Self {
        Self { wkid }
    }

    /// WGS 84.
    #[must_use]
    pub const fn wgs84() -> Self {
        Self::new(WGS84_WKID)
    }
}

/// A point with an optional elevation.
#[derive(Debug, Clone, PartialEq)]
pub struct MapPoint {
    /// Planar coordinates.
    pub point: Point<f64>,
    /// Elevation, when the source supplied one.
    pub z: Option<f64>,
    /// Reference the coordinates are expressed in.
    pub spatial_reference: Option<SpatialReference>,
}

impl MapPoint {
    /// Creates a 2D point.
    #[must_use]
    pub fn new(x: f64, y: f64, spatial_reference: Option<SpatialReference>) -> Self {
        Self {
            point: Point::new(x, y),
            z: None,
            spatial_reference,
        }
    }

    /// Returns the point with the given elevation.
    #[must_use]
    pub fn with_z(mut self, z: f64) -> Self {
        self.z = Some(z);
        self
    }

    /// Horizontal coordinate.
    #[must_use]
    pub fn x(&self) -> f64 {
        self.point.x()
    }

    /// Vertical coordinate.
    #[must_use]
    pub fn y(&self) -> f64 {
        self.point.y()
    }
}

/// One or more polygons sharing a spatial reference.
#[derive(Debug, Clone, PartialEq)]
pub struct MapPolygon {
    /// Polygon parts, each with its exterior and holes.
    pub polygons: MultiPolygon<f64>,
    /// Reference the coordinates are expressed in.
    pub spatial_reference: Option<SpatialReference>,
}

impl MapPolygon {
    /// Creates a polygon value.
    #[must_use]
    pub const fn new(
        polygons: MultiPolygon<f64>,
        spatial_reference: Option<SpatialReference>,
    ) -> Self {
        Self {
            polygons,
            spatial_reference,
        }
    }

    /// Well-known id of the polygon's spatial reference.
    #[must_use]
    pub fn wkid(&self) -> Option<i32> {
        self.spatial_reference.map(|sr| sr.wkid)
    }
}

/// A geometry stored in an event field.
#[derive(Debug, Clone, PartialEq)]
pub enum MapGeometry {
    /// A single point.
    Point(MapPoint),
    /// A (multi)polygon.
    Polygon(MapPolygon),
}

impl MapGeometry {
    /// Spatial reference of the wrapped geometry.
    #[must_use]
    pub const fn spatial_reference(&self) -> Option<SpatialReference> {
        match self {
            Self::Point(p) => p.spatial_reference,
            Self::Polygon(p) => p.spatial_reference,
        }
    }

    /// Returns the point if this geometry is one.
    #[must_use]
    pub const fn as_point(&self) -> Option<&MapPoint> {
        match self {
            Self::Point(p) => Some(p),
            Self::Polygon(_) => None,
        }
    }
}

impl From<MapPoint> for MapGeometry {
    fn from(value: MapPoint) -> Self {
        Self::Point(value)
    }
}

impl From<MapPolygon> for MapGeometry {
    fn from(value: MapPolygon) -> Self {
        Self::Polygon(value)
    }
}
