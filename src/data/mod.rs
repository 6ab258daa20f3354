use crate::map::LineString;
use anyhow::{Context, Result};
use geojson::{GeoJson, Geometry, Value};
use std::fs;
use std::path::Path;
use tracing::info;

/// Load a GeoJSON file of context lines (streets, coastlines, district
/// borders) drawn underneath the territories
pub fn load_basemap(path: &Path) -> Result<Vec<LineString>> {
    let mut bytes = fs::read(path).with_context(|| format!("reading basemap {}", path.display()))?;
    let lines = parse_basemap(&mut bytes).with_context(|| format!("parsing basemap {}", path.display()))?;
    info!(path = %path.display(), lines = lines.len(), "loaded basemap");
    Ok(lines)
}

/// Parse GeoJSON bytes in place; simd-json mutates the buffer
pub fn parse_basemap(bytes: &mut [u8]) -> Result<Vec<LineString>> {
    let geojson: GeoJson = simd_json::serde::from_slice(bytes)?;
    let mut lines = Vec::new();
    process_geojson_lines(&geojson, |line| {
        if line.len() >= 2 {
            lines.push(line);
        }
    });
    Ok(lines)
}

/// Process GeoJSON and extract line features
fn process_geojson_lines<F>(geojson: &GeoJson, mut add_line: F)
where
    F: FnMut(LineString),
{
    match geojson {
        GeoJson::FeatureCollection(fc) => {
            for feature in &fc.features {
                if let Some(ref geometry) = feature.geometry {
                    process_geometry_lines(geometry, &mut add_line);
                }
            }
        }
        GeoJson::Feature(f) => {
            if let Some(ref geometry) = f.geometry {
                process_geometry_lines(geometry, &mut add_line);
            }
        }
        GeoJson::Geometry(geometry) => {
            process_geometry_lines(geometry, &mut add_line);
        }
    }
}

fn process_geometry_lines<F>(geometry: &Geometry, add_line: &mut F)
where
    F: FnMut(LineString),
{
    let to_line = |coords: &Vec<Vec<f64>>| -> LineString {
        coords.iter().filter(|c| c.len() >= 2).map(|c| (c[0], c[1])).collect()
    };
    match &geometry.value {
        Value::LineString(coords) => add_line(to_line(coords)),
        Value::MultiLineString(lines) => {
            for coords in lines {
                add_line(to_line(coords));
            }
        }
        // Every ring, holes included: street blocks often come as polygons
        Value::Polygon(rings) => {
            for ring in rings {
                add_line(to_line(ring));
            }
        }
        Value::MultiPolygon(polygons) => {
            for ring in polygons.iter().flatten() {
                add_line(to_line(ring));
            }
        }
        Value::GeometryCollection(geometries) => {
            for g in geometries {
                process_geometry_lines(g, add_line);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collects_lines_and_rings() {
        let mut body = br#"{
            "type": "FeatureCollection",
            "features": [
                {"type": "Feature", "properties": {"name": "Broadway"},
                 "geometry": {"type": "LineString", "coordinates": [[-74.01, 40.70], [-74.00, 40.72]]}},
                {"type": "Feature", "properties": null,
                 "geometry": {"type": "Polygon", "coordinates": [
                    [[0, 0], [1, 0], [1, 1], [0, 0]],
                    [[0.2, 0.2], [0.4, 0.2], [0.4, 0.4], [0.2, 0.2]]]}},
                {"type": "Feature", "properties": null,
                 "geometry": {"type": "Point", "coordinates": [5, 5]}}
            ]
        }"#
        .to_vec();
        let lines = parse_basemap(&mut body).unwrap();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], vec![(-74.01, 40.70), (-74.00, 40.72)]);
        assert_eq!(lines[2].len(), 4);
    }

    #[test]
    fn test_single_point_lines_are_dropped() {
        let mut body = br#"{"type": "LineString", "coordinates": [[1, 2]]}"#.to_vec();
        assert!(parse_basemap(&mut body).unwrap().is_empty());
    }

    #[test]
    fn test_missing_file_is_an_error() {
        assert!(load_basemap(Path::new("/nonexistent/basemap.geojson")).is_err());
    }
}
