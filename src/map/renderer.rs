use crate::braille::BrailleCanvas;
use crate::map::geometry::{draw_handle, draw_ring, fill_polygon, Stroke};
use crate::map::projection::Viewport;
use crate::map::surface::{DrawingSurface, LayerHandle};
use crate::territory::codec::NativeShape;
use crate::territory::style::{Dash, Rgb, ShapeStyle};
use crate::territory::LonLat;
use rayon::prelude::*;
use std::collections::BTreeMap;

/// A geographic line (sequence of lon/lat coordinates)
pub type LineString = Vec<LonLat>;

/// One shape on the surface
#[derive(Clone, Debug)]
pub struct Layer {
    pub shape: NativeShape,
    pub style: ShapeStyle,
}

/// A rasterized territory, ready to be colored by the UI
pub struct PaintedLayer {
    pub handle: LayerHandle,
    pub canvas: BrailleCanvas,
    pub color: Rgb,
}

/// Everything the map widget paints, back to front
pub struct MapLayers {
    pub basemap: BrailleCanvas,
    pub territories: Vec<PaintedLayer>,
    /// In-progress drawing or edit preview
    pub draft: BrailleCanvas,
}

/// Braille drawing surface: the territory layers plus an optional basemap
pub struct MapRenderer {
    layers: BTreeMap<LayerHandle, Layer>,
    next_handle: u64,
    /// Bumped on every change, so dependents (hit index) know to rebuild
    revision: u64,
    basemap: Vec<LineString>,
    pub show_basemap: bool,
}

impl MapRenderer {
    pub fn new() -> Self {
        Self {
            layers: BTreeMap::new(),
            next_handle: 1,
            revision: 0,
            basemap: Vec::new(),
            show_basemap: true,
        }
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Layers in handle order
    pub fn layers(&self) -> impl Iterator<Item = (LayerHandle, &Layer)> {
        self.layers.iter().map(|(h, l)| (*h, l))
    }

    /// Layers in paint order: heavier strokes (the selection) on top
    pub fn paint_order(&self) -> Vec<(LayerHandle, &Layer)> {
        let mut ordered: Vec<_> = self.layers().collect();
        ordered.sort_by_key(|(h, l)| (l.style.weight, *h));
        ordered
    }

    pub fn set_basemap(&mut self, lines: Vec<LineString>) {
        self.basemap = lines;
    }

    pub fn has_basemap(&self) -> bool {
        !self.basemap.is_empty()
    }

    /// Lon/lat box around every layer
    pub fn bounds(&self) -> Option<(f64, f64, f64, f64)> {
        self.layers.values().map(|l| l.shape.bounds()).reduce(|a, b| {
            (a.0.min(b.0), a.1.min(b.1), a.2.max(b.2), a.3.max(b.3))
        })
    }

    /// Rasterize all layers for a `width` x `height` character area.
    /// Territory canvases are painted in parallel; paint order is kept.
    pub fn render(&self, width: usize, height: usize, viewport: &Viewport) -> MapLayers {
        let mut basemap = BrailleCanvas::new(width, height);
        if self.show_basemap {
            let stroke = Stroke { thickness: 1, dash: Dash::Solid };
            for line in &self.basemap {
                let points = project_visible(line, viewport);
                if points.len() >= 2 {
                    draw_ring(&mut basemap, &points, stroke, false);
                }
            }
        }

        let territories = self
            .paint_order()
            .into_par_iter()
            .filter_map(|(handle, layer)| {
                let points: Vec<(i32, i32)> = layer
                    .shape
                    .vertices()
                    .iter()
                    .map(|&(lon, lat)| viewport.project(lon, lat))
                    .collect();
                let (min, max) = pixel_bounds(&points)?;
                if !viewport.box_might_be_visible(min, max) {
                    return None;
                }

                let mut canvas = BrailleCanvas::new(width, height);
                fill_polygon(&mut canvas, &points, layer.style.fill_opacity);
                draw_ring(&mut canvas, &points, Stroke::from_style(&layer.style), true);
                Some(PaintedLayer { handle, canvas, color: layer.style.color })
            })
            .collect();

        MapLayers {
            basemap,
            territories,
            draft: BrailleCanvas::new(width, height),
        }
    }

    /// Draw an in-progress outline with vertex handles onto `canvas`
    pub fn render_draft(canvas: &mut BrailleCanvas, vertices: &[LonLat], closed: bool, viewport: &Viewport) {
        let points: Vec<(i32, i32)> = vertices
            .iter()
            .map(|&(lon, lat)| viewport.project(lon, lat))
            .collect();
        draw_ring(canvas, &points, Stroke { thickness: 1, dash: Dash::Dashed }, closed);
        for &(x, y) in &points {
            draw_handle(canvas, x, y);
        }
    }
}

impl Default for MapRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl DrawingSurface for MapRenderer {
    fn add_shape(&mut self, shape: NativeShape, style: ShapeStyle) -> LayerHandle {
        let handle = LayerHandle(self.next_handle);
        self.next_handle += 1;
        self.layers.insert(handle, Layer { shape, style });
        self.revision += 1;
        handle
    }

    fn set_shape(&mut self, handle: LayerHandle, shape: NativeShape) -> bool {
        match self.layers.get_mut(&handle) {
            Some(layer) => {
                layer.shape = shape;
                self.revision += 1;
                true
            }
            None => false,
        }
    }

    fn set_style(&mut self, handle: LayerHandle, style: ShapeStyle) -> bool {
        match self.layers.get_mut(&handle) {
            Some(layer) => {
                layer.style = style;
                self.revision += 1;
                true
            }
            None => false,
        }
    }

    fn remove(&mut self, handle: LayerHandle) -> bool {
        let removed = self.layers.remove(&handle).is_some();
        if removed {
            self.revision += 1;
        }
        removed
    }

    fn clear(&mut self) {
        self.layers.clear();
        self.next_handle = 1;
        self.revision += 1;
    }

    fn shape(&self, handle: LayerHandle) -> Option<&NativeShape> {
        self.layers.get(&handle).map(|l| &l.shape)
    }

    fn style(&self, handle: LayerHandle) -> Option<ShapeStyle> {
        self.layers.get(&handle).map(|l| l.style)
    }

    fn len(&self) -> usize {
        self.layers.len()
    }
}

/// Project a basemap line, dropping segments that jump across the screen
/// (antimeridian wraps)
fn project_visible(line: &LineString, viewport: &Viewport) -> Vec<(i32, i32)> {
    let points: Vec<(i32, i32)> = line
        .iter()
        .map(|&(lon, lat)| viewport.project(lon, lat))
        .collect();
    match pixel_bounds(&points) {
        Some((min, max)) if viewport.box_might_be_visible(min, max) => {
            let wrap = viewport.width as i32;
            let jumps = points
                .windows(2)
                .any(|w| (w[0].0 - w[1].0).abs() > wrap);
            if jumps {
                Vec::new()
            } else {
                points
            }
        }
        _ => Vec::new(),
    }
}

fn pixel_bounds(points: &[(i32, i32)]) -> Option<((i32, i32), (i32, i32))> {
    let first = *points.first()?;
    Some(points.iter().fold((first, first), |(min, max), &(x, y)| {
        ((min.0.min(x), min.1.min(y)), (max.0.max(x), max.1.max(y)))
    }))
}
