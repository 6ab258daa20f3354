use std::f64::consts::PI;

const MIN_ZOOM: f64 = 0.5;
/// Street-level; territories are often a few blocks across
const MAX_ZOOM: f64 = 20_000.0;
const ZOOM_STEP: f64 = 1.5;
const MAX_LAT: f64 = 85.0;

/// Viewport representing the visible map area and zoom level
#[derive(Clone, Debug)]
pub struct Viewport {
    /// Center longitude (-180 to 180)
    pub center_lon: f64,
    /// Center latitude (-85 to 85)
    pub center_lat: f64,
    /// Zoom level (1.0 = whole world fits the width)
    pub zoom: f64,
    /// Canvas pixel width
    pub width: usize,
    /// Canvas pixel height
    pub height: usize,
}

/// Web Mercator x in [0, 1)
#[inline(always)]
fn mercator_x(lon: f64) -> f64 {
    (lon + 180.0) / 360.0
}

/// Web Mercator y in [0, 1), north up
#[inline(always)]
fn mercator_y(lat: f64) -> f64 {
    let lat_rad = lat.clamp(-MAX_LAT, MAX_LAT) * PI / 180.0;
    (1.0 - (lat_rad.tan() + 1.0 / lat_rad.cos()).ln() / PI) / 2.0
}

impl Viewport {
    pub fn new(center_lon: f64, center_lat: f64, zoom: f64, width: usize, height: usize) -> Self {
        Self {
            center_lon,
            center_lat: center_lat.clamp(-MAX_LAT, MAX_LAT),
            zoom: zoom.clamp(MIN_ZOOM, MAX_ZOOM),
            width,
            height,
        }
    }

    /// Pan the viewport by pixel delta
    pub fn pan(&mut self, dx: i32, dy: i32) {
        let scale = self.zoom * self.width.max(1) as f64;
        let x = mercator_x(self.center_lon) + dx as f64 / scale;
        let y = mercator_y(self.center_lat) + dy as f64 / scale;

        self.center_lon = x * 360.0 - 180.0;
        self.center_lat = inverse_mercator_y(y);

        // Wrap longitude
        if self.center_lon > 180.0 {
            self.center_lon -= 360.0;
        } else if self.center_lon < -180.0 {
            self.center_lon += 360.0;
        }

        self.center_lat = self.center_lat.clamp(-MAX_LAT, MAX_LAT);
    }

    pub fn zoom_in(&mut self) {
        self.zoom = (self.zoom * ZOOM_STEP).min(MAX_ZOOM);
    }

    pub fn zoom_out(&mut self) {
        self.zoom = (self.zoom / ZOOM_STEP).max(MIN_ZOOM);
    }

    /// Zoom in towards a specific pixel location
    pub fn zoom_in_at(&mut self, px: i32, py: i32) {
        self.zoom_at(px, py, ZOOM_STEP);
    }

    /// Zoom out from a specific pixel location
    pub fn zoom_out_at(&mut self, px: i32, py: i32) {
        self.zoom_at(px, py, 1.0 / ZOOM_STEP);
    }

    /// Zoom by factor keeping the geographic point under (px, py) in place
    fn zoom_at(&mut self, px: i32, py: i32, factor: f64) {
        let (lon, lat) = self.unproject(px, py);
        self.zoom = (self.zoom * factor).clamp(MIN_ZOOM, MAX_ZOOM);

        let (new_px, new_py) = self.project(lon, lat);
        self.pan(new_px - px, new_py - py);
    }

    /// Center on a lon/lat box and pick the largest zoom that shows all of it
    pub fn fit_bounds(&mut self, (min_lon, min_lat, max_lon, max_lat): (f64, f64, f64, f64)) {
        if !(min_lon.is_finite() && min_lat.is_finite() && max_lon.is_finite() && max_lat.is_finite()) {
            return;
        }
        let span_x = (mercator_x(max_lon) - mercator_x(min_lon)).abs().max(1e-9);
        let span_y = (mercator_y(min_lat) - mercator_y(max_lat)).abs().max(1e-9);
        let (w, h) = (self.width.max(1) as f64, self.height.max(1) as f64);

        // Leave a 10% margin on each side
        let zoom_x = 0.8 / span_x;
        let zoom_y = 0.8 * h / (span_y * w);
        self.zoom = zoom_x.min(zoom_y).clamp(MIN_ZOOM, MAX_ZOOM);

        let center_y = (mercator_y(min_lat) + mercator_y(max_lat)) / 2.0;
        self.center_lon = (min_lon + max_lon) / 2.0;
        self.center_lat = inverse_mercator_y(center_y).clamp(-MAX_LAT, MAX_LAT);
    }

    /// Unproject pixel coordinates back to geographic coordinates (lon, lat)
    pub fn unproject(&self, px: i32, py: i32) -> (f64, f64) {
        let scale = self.zoom * self.width.max(1) as f64;

        let x = (px as f64 - self.width as f64 / 2.0) / scale + mercator_x(self.center_lon);
        let y = (py as f64 - self.height as f64 / 2.0) / scale + mercator_y(self.center_lat);

        (x * 360.0 - 180.0, inverse_mercator_y(y))
    }

    /// Project a geographic coordinate (lon, lat) to pixel coordinates
    pub fn project(&self, lon: f64, lat: f64) -> (i32, i32) {
        let scale = self.zoom * self.width as f64;

        let px = ((mercator_x(lon) - mercator_x(self.center_lon)) * scale + self.width as f64 / 2.0)
            .round()
            .clamp(i32::MIN as f64, i32::MAX as f64) as i32;
        let py = ((mercator_y(lat) - mercator_y(self.center_lat)) * scale + self.height as f64 / 2.0)
            .round()
            .clamp(i32::MIN as f64, i32::MAX as f64) as i32;

        (px, py)
    }

    /// Check if a projected box might overlap the viewport
    pub fn box_might_be_visible(&self, min: (i32, i32), max: (i32, i32)) -> bool {
        max.0 >= 0 && min.0 < self.width as i32 && max.1 >= 0 && min.1 < self.height as i32
    }

    /// Geographic distance covered by one pixel at the center
    pub fn degrees_per_pixel(&self) -> (f64, f64) {
        let (cx, cy) = (self.width as i32 / 2, self.height as i32 / 2);
        let (lon0, lat0) = self.unproject(cx, cy);
        let (lon1, lat1) = self.unproject(cx + 1, cy + 1);
        ((lon1 - lon0).abs(), (lat0 - lat1).abs())
    }
}

#[inline(always)]
fn inverse_mercator_y(y: f64) -> f64 {
    (PI * (1.0 - 2.0 * y)).sinh().atan() * 180.0 / PI
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_project_center() {
        let vp = Viewport::new(0.0, 0.0, 1.0, 100, 100);
        assert_eq!(vp.project(0.0, 0.0), (50, 50));
    }

    #[test]
    fn test_pan() {
        let mut vp = Viewport::new(0.0, 0.0, 1.0, 100, 100);
        vp.pan(10, 0);
        assert!(vp.center_lon > 0.0);
        vp.pan(0, 10);
        assert!(vp.center_lat < 0.0);
    }

    #[test]
    fn test_unproject_inverts_project() {
        let vp = Viewport::new(-73.97, 40.73, 2000.0, 200, 120);
        let (px, py) = vp.project(-73.96, 40.74);
        let (lon, lat) = vp.unproject(px, py);
        let (dlon, dlat) = vp.degrees_per_pixel();
        assert!((lon - -73.96).abs() <= dlon);
        assert!((lat - 40.74).abs() <= dlat);
    }

    #[test]
    fn test_zoom_at_keeps_point_fixed() {
        let mut vp = Viewport::new(10.0, 45.0, 50.0, 200, 120);
        let before = vp.unproject(30, 20);
        vp.zoom_in_at(30, 20);
        let after = vp.unproject(30, 20);
        let (dlon, dlat) = vp.degrees_per_pixel();
        assert!((before.0 - after.0).abs() <= 2.0 * dlon);
        assert!((before.1 - after.1).abs() <= 2.0 * dlat);
    }

    #[test]
    fn test_fit_bounds_contains_box() {
        let mut vp = Viewport::new(0.0, 0.0, 1.0, 200, 120);
        let bounds = (-74.02, 40.70, -73.93, 40.80);
        vp.fit_bounds(bounds);
        for (lon, lat) in [(bounds.0, bounds.1), (bounds.2, bounds.3)] {
            let (px, py) = vp.project(lon, lat);
            assert!((0..200).contains(&px) && (0..120).contains(&py), "{px},{py}");
        }
    }
}
