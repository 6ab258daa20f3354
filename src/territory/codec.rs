//! Conversion between drawn shapes and the GeoJSON Feature the store persists.
//!
//! Both shape kinds are written as a Polygon with a single closed exterior
//! ring. Rectangles carry a `"shape": "rectangle"` property so they come back
//! as rectangles instead of 4-vertex freehand polygons.

use crate::territory::LonLat;
use geojson::{Feature, GeoJson, Geometry, JsonObject, Value};
use thiserror::Error;

const SHAPE_PROPERTY: &str = "shape";
const RECTANGLE: &str = "rectangle";
const POLYGON: &str = "polygon";

/// A shape in the drawing surface's own terms
#[derive(Debug, Clone, PartialEq)]
pub enum NativeShape {
    /// Freehand polygon, open ring (first vertex not repeated)
    Polygon(Vec<LonLat>),
    /// Axis-aligned rectangle
    Rectangle { south_west: LonLat, north_east: LonLat },
}

impl NativeShape {
    /// Build a rectangle from any two opposite corners
    pub fn rectangle(a: LonLat, b: LonLat) -> Self {
        NativeShape::Rectangle {
            south_west: (a.0.min(b.0), a.1.min(b.1)),
            north_east: (a.0.max(b.0), a.1.max(b.1)),
        }
    }

    /// Open ring of vertices. Rectangles go SW, SE, NE, NW.
    pub fn vertices(&self) -> Vec<LonLat> {
        match self {
            NativeShape::Polygon(points) => points.clone(),
            NativeShape::Rectangle { south_west, north_east } => vec![
                *south_west,
                (north_east.0, south_west.1),
                *north_east,
                (south_west.0, north_east.1),
            ],
        }
    }

    /// (min_lon, min_lat, max_lon, max_lat)
    pub fn bounds(&self) -> (f64, f64, f64, f64) {
        self.vertices().iter().fold(
            (f64::INFINITY, f64::INFINITY, f64::NEG_INFINITY, f64::NEG_INFINITY),
            |(min_x, min_y, max_x, max_y), &(x, y)| {
                (min_x.min(x), min_y.min(y), max_x.max(x), max_y.max(y))
            },
        )
    }

    pub fn translate(&mut self, dlon: f64, dlat: f64) {
        match self {
            NativeShape::Polygon(points) => {
                for p in points.iter_mut() {
                    p.0 += dlon;
                    p.1 += dlat;
                }
            }
            NativeShape::Rectangle { south_west, north_east } => {
                south_west.0 += dlon;
                south_west.1 += dlat;
                north_east.0 += dlon;
                north_east.1 += dlat;
            }
        }
    }

    /// Move one vertex. A rectangle keeps the opposite corner fixed and stays
    /// axis-aligned.
    pub fn move_vertex(&mut self, index: usize, to: LonLat) {
        match self {
            NativeShape::Polygon(points) => {
                if let Some(p) = points.get_mut(index) {
                    *p = to;
                }
            }
            NativeShape::Rectangle { .. } => {
                let corners = self.vertices();
                if index < corners.len() {
                    let opposite = corners[(index + 2) % 4];
                    *self = NativeShape::rectangle(opposite, to);
                }
            }
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            NativeShape::Polygon(_) => POLYGON,
            NativeShape::Rectangle { .. } => RECTANGLE,
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum CodecError {
    #[error("territory has no geometry")]
    Missing,
    #[error("geometry is not valid GeoJSON: {0}")]
    Malformed(String),
    #[error("unsupported geometry type {0}")]
    Unsupported(&'static str),
    #[error("polygon ring has {0} distinct vertices, need at least 3")]
    DegenerateRing(usize),
}

/// Encode a drawn shape as the Feature persisted by the store
pub fn to_feature(shape: &NativeShape) -> Feature {
    let mut ring: Vec<Vec<f64>> = shape.vertices().iter().map(|&(x, y)| vec![x, y]).collect();
    if let Some(first) = ring.first().cloned() {
        ring.push(first);
    }

    let mut properties = JsonObject::new();
    properties.insert(SHAPE_PROPERTY.to_string(), shape.kind().into());

    Feature {
        bbox: None,
        geometry: Some(Geometry::new(Value::Polygon(vec![ring]))),
        id: None,
        properties: Some(properties),
        foreign_members: None,
    }
}

/// Decode a Feature produced by [`to_feature`].
///
/// Total over well-formed input; a Feature that does not decode yields an
/// empty polygon, which renders as nothing.
pub fn to_native_shape(feature: &Feature) -> NativeShape {
    decode_feature(feature).unwrap_or(NativeShape::Polygon(Vec::new()))
}

/// Decode the raw geometry payload of a stored territory
pub fn decode(raw: Option<&serde_json::Value>) -> Result<NativeShape, CodecError> {
    let raw = match raw {
        None | Some(serde_json::Value::Null) => return Err(CodecError::Missing),
        Some(raw) => raw,
    };

    let geojson: GeoJson =
        serde_json::from_value(raw.clone()).map_err(|e| CodecError::Malformed(e.to_string()))?;

    match geojson {
        GeoJson::Feature(feature) => decode_feature(&feature),
        GeoJson::Geometry(geometry) => decode_geometry(&geometry, false),
        GeoJson::FeatureCollection(fc) => match fc.features.first() {
            Some(feature) => decode_feature(feature),
            None => Err(CodecError::Missing),
        },
    }
}

fn decode_feature(feature: &Feature) -> Result<NativeShape, CodecError> {
    let is_rectangle = feature
        .properties
        .as_ref()
        .and_then(|p| p.get(SHAPE_PROPERTY))
        .and_then(|v| v.as_str())
        == Some(RECTANGLE);

    match &feature.geometry {
        Some(geometry) => decode_geometry(geometry, is_rectangle),
        None => Err(CodecError::Missing),
    }
}

fn decode_geometry(geometry: &Geometry, is_rectangle: bool) -> Result<NativeShape, CodecError> {
    let exterior = match &geometry.value {
        Value::Polygon(rings) => rings.first(),
        Value::MultiPolygon(polygons) => polygons.first().and_then(|rings| rings.first()),
        Value::Point(_) => return Err(CodecError::Unsupported("Point")),
        Value::MultiPoint(_) => return Err(CodecError::Unsupported("MultiPoint")),
        Value::LineString(_) => return Err(CodecError::Unsupported("LineString")),
        Value::MultiLineString(_) => return Err(CodecError::Unsupported("MultiLineString")),
        Value::GeometryCollection(_) => return Err(CodecError::Unsupported("GeometryCollection")),
    };
    let exterior = exterior.ok_or(CodecError::DegenerateRing(0))?;

    let mut points: Vec<LonLat> = Vec::with_capacity(exterior.len());
    for position in exterior {
        match position.as_slice() {
            [x, y, ..] if x.is_finite() && y.is_finite() => points.push((*x, *y)),
            _ => return Err(CodecError::Malformed("non-numeric position".to_string())),
        }
    }

    // Drop the closing vertex
    if points.len() > 1 && points.first() == points.last() {
        points.pop();
    }
    if points.len() < 3 {
        return Err(CodecError::DegenerateRing(points.len()));
    }

    if is_rectangle && points.len() == 4 {
        let rect = NativeShape::rectangle(points[0], points[2]);
        if same_vertex_set(&rect.vertices(), &points) {
            return Ok(rect);
        }
    }

    Ok(NativeShape::Polygon(points))
}

fn same_vertex_set(a: &[LonLat], b: &[LonLat]) -> bool {
    const EPS: f64 = 1e-9;
    a.len() == b.len()
        && a.iter().all(|p| {
            b.iter()
                .any(|q| (p.0 - q.0).abs() < EPS && (p.1 - q.1).abs() < EPS)
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_same_vertices(a: &NativeShape, b: &NativeShape) {
        let (va, vb) = (a.vertices(), b.vertices());
        assert_eq!(va.len(), vb.len());
        for (p, q) in va.iter().zip(vb.iter()) {
            assert!((p.0 - q.0).abs() < 1e-9 && (p.1 - q.1).abs() < 1e-9, "{p:?} != {q:?}");
        }
    }

    #[test]
    fn test_rectangle_round_trip() {
        let rect = NativeShape::rectangle((-73.99, 40.70), (-73.95, 40.75));
        let back = to_native_shape(&to_feature(&rect));
        assert!(matches!(back, NativeShape::Rectangle { .. }));
        assert_same_vertices(&rect, &back);
    }

    #[test]
    fn test_irregular_polygon_round_trip() {
        let poly = NativeShape::Polygon(vec![
            (2.2945, 48.8584),
            (2.3010, 48.8602),
            (2.3121, 48.8550),
            (2.3050, 48.8490),
            (2.2960, 48.8512),
        ]);
        let back = to_native_shape(&to_feature(&poly));
        assert_eq!(back, poly);
    }

    #[test]
    fn test_feature_ring_is_closed_polygon() {
        let rect = NativeShape::rectangle((0.0, 0.0), (1.0, 1.0));
        let feature = to_feature(&rect);
        match feature.geometry.unwrap().value {
            Value::Polygon(rings) => {
                assert_eq!(rings.len(), 1);
                assert_eq!(rings[0].len(), 5);
                assert_eq!(rings[0].first(), rings[0].last());
            }
            other => panic!("unexpected geometry {other:?}"),
        }
    }

    #[test]
    fn test_decode_raw_feature_json() {
        let raw = serde_json::json!({
            "type": "Feature",
            "properties": {},
            "geometry": {
                "type": "Polygon",
                "coordinates": [[[0.0, 0.0], [2.0, 0.0], [1.0, 1.5], [0.0, 0.0]]]
            }
        });
        let shape = decode(Some(&raw)).unwrap();
        assert_eq!(shape, NativeShape::Polygon(vec![(0.0, 0.0), (2.0, 0.0), (1.0, 1.5)]));
    }

    #[test]
    fn test_decode_bare_geometry() {
        let raw = serde_json::json!({
            "type": "Polygon",
            "coordinates": [[[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 0.0]]]
        });
        assert!(decode(Some(&raw)).is_ok());
    }

    #[test]
    fn test_decode_failures() {
        assert_eq!(decode(None), Err(CodecError::Missing));
        assert_eq!(decode(Some(&serde_json::Value::Null)), Err(CodecError::Missing));

        let point = serde_json::json!({"type": "Point", "coordinates": [1.0, 2.0]});
        assert_eq!(decode(Some(&point)), Err(CodecError::Unsupported("Point")));

        let thin = serde_json::json!({
            "type": "Polygon",
            "coordinates": [[[0.0, 0.0], [1.0, 1.0], [0.0, 0.0]]]
        });
        assert_eq!(decode(Some(&thin)), Err(CodecError::DegenerateRing(2)));

        let junk = serde_json::json!({"type": "Nope"});
        assert!(matches!(decode(Some(&junk)), Err(CodecError::Malformed(_))));
    }

    #[test]
    fn test_rectangle_vertex_drag_keeps_opposite_corner() {
        let mut rect = NativeShape::rectangle((0.0, 0.0), (2.0, 2.0));
        // Drag NE corner past the SW corner
        rect.move_vertex(2, (-1.0, -1.0));
        assert_eq!(rect, NativeShape::rectangle((-1.0, -1.0), (0.0, 0.0)));
    }

    #[test]
    fn test_translate_and_bounds() {
        let mut poly = NativeShape::Polygon(vec![(0.0, 0.0), (2.0, 0.0), (1.0, 3.0)]);
        poly.translate(1.0, -1.0);
        assert_eq!(poly.bounds(), (1.0, -1.0, 3.0, 2.0));
    }
}
