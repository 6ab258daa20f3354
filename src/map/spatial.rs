use crate::map::surface::LayerHandle;
use crate::territory::codec::NativeShape;
use crate::territory::LonLat;
use glam::DVec2;
use std::collections::HashMap;

/// Spatial index for click picking using conservative approximation.
/// Each shape's bounding box is indexed into every cell it overlaps,
/// guaranteeing no false negatives while allowing false positives
/// (eliminated by the exact point-in-polygon test in `pick`).
pub struct ShapeIndex {
    cells: HashMap<(i32, i32), Vec<usize>>,
    cell_size: f64,
    /// Indexed shapes in paint order (last = topmost)
    entries: Vec<(LayerHandle, Vec<DVec2>)>,
}

impl ShapeIndex {
    pub fn new(cell_size: f64) -> Self {
        Self {
            cells: HashMap::new(),
            cell_size,
            entries: Vec::new(),
        }
    }

    #[inline(always)]
    fn to_cell(&self, lon: f64, lat: f64) -> (i32, i32) {
        let x = (lon / self.cell_size).floor() as i32;
        let y = (lat / self.cell_size).floor() as i32;
        (x, y)
    }

    /// Build from shapes given in paint order
    pub fn build<'a>(shapes: impl Iterator<Item = (LayerHandle, &'a NativeShape)>, cell_size: f64) -> Self {
        let mut index = Self::new(cell_size);
        for (handle, shape) in shapes {
            let (min_lon, min_lat, max_lon, max_lat) = shape.bounds();
            if !(min_lon.is_finite() && max_lat.is_finite()) {
                continue;
            }
            let idx = index.entries.len();
            let ring = shape.vertices().into_iter().map(|(x, y)| DVec2::new(x, y)).collect();
            index.entries.push((handle, ring));

            let min_cell = index.to_cell(min_lon, min_lat);
            let max_cell = index.to_cell(max_lon, max_lat);
            for y in min_cell.1..=max_cell.1 {
                for x in min_cell.0..=max_cell.0 {
                    index.cells.entry((x, y)).or_default().push(idx);
                }
            }
        }
        index
    }

    /// Topmost shape containing the point
    pub fn pick(&self, lon: f64, lat: f64) -> Option<LayerHandle> {
        let candidates = self.cells.get(&self.to_cell(lon, lat))?;
        let point = DVec2::new(lon, lat);
        candidates
            .iter()
            .rev()
            .map(|&idx| &self.entries[idx])
            .find(|(_, ring)| contains(ring, point))
            .map(|(handle, _)| *handle)
    }
}

/// Even-odd point in polygon
fn contains(ring: &[DVec2], p: DVec2) -> bool {
    let mut inside = false;
    let mut j = ring.len().wrapping_sub(1);
    for i in 0..ring.len() {
        let (a, b) = (ring[i], ring[j]);
        if (a.y > p.y) != (b.y > p.y) {
            let x = a.x + (p.y - a.y) / (b.y - a.y) * (b.x - a.x);
            if p.x < x {
                inside = !inside;
            }
        }
        j = i;
    }
    inside
}

/// Index of the vertex nearest to `target` in screen space, if within `radius` pixels
pub fn nearest_vertex(projected: &[(i32, i32)], target: (i32, i32), radius: f64) -> Option<usize> {
    let t = DVec2::new(target.0 as f64, target.1 as f64);
    projected
        .iter()
        .enumerate()
        .map(|(i, &(x, y))| (i, DVec2::new(x as f64, y as f64).distance(t)))
        .filter(|&(_, d)| d <= radius)
        .min_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(i, _)| i)
}

/// Centroid of a vertex ring, for label placement
pub fn centroid(points: &[LonLat]) -> Option<LonLat> {
    if points.is_empty() {
        return None;
    }
    let sum = points
        .iter()
        .fold(DVec2::ZERO, |acc, &(x, y)| acc + DVec2::new(x, y));
    let c = sum / points.len() as f64;
    Some((c.x, c.y))
}
