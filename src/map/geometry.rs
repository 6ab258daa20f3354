use crate::braille::BrailleCanvas;
use crate::territory::style::{Dash, ShapeStyle};

/// Dashes are 4 pixels on, 3 off
const DASH_ON: u32 = 4;
const DASH_PERIOD: u32 = 7;

/// 4x4 ordered-dither thresholds, used to render fill opacity as dot density
const BAYER_4X4: [[u8; 4]; 4] = [[0, 8, 2, 10], [12, 4, 14, 6], [3, 11, 1, 9], [15, 7, 13, 5]];

/// How a line is laid down on the canvas
#[derive(Clone, Copy)]
pub struct Stroke {
    /// Line thickness in braille pixels
    pub thickness: i32,
    pub dash: Dash,
}

impl Stroke {
    pub fn from_style(style: &ShapeStyle) -> Self {
        Self {
            thickness: (style.weight as i32 / 2).max(1),
            dash: style.dash,
        }
    }
}

/// Draw a line using Bresenham's algorithm.
///
/// `phase` carries the dash position between consecutive segments so a
/// dashed outline stays even around corners.
pub fn draw_line(canvas: &mut BrailleCanvas, x0: i32, y0: i32, x1: i32, y1: i32, stroke: Stroke, phase: &mut u32) {
    let dx = (x1 - x0).abs();
    let dy = -(y1 - y0).abs();
    let sx = if x0 < x1 { 1 } else { -1 };
    let sy = if y0 < y1 { 1 } else { -1 };
    let mut err = dx + dy;

    let mut x = x0;
    let mut y = y0;

    loop {
        let on = match stroke.dash {
            Dash::Solid => true,
            Dash::Dashed => *phase % DASH_PERIOD < DASH_ON,
        };
        if on {
            plot(canvas, x, y, stroke.thickness);
        }
        *phase = phase.wrapping_add(1);

        if x == x1 && y == y1 {
            break;
        }

        let e2 = 2 * err;

        if e2 >= dy {
            if x == x1 {
                break;
            }
            err += dy;
            x += sx;
        }

        if e2 <= dx {
            if y == y1 {
                break;
            }
            err += dx;
            y += sy;
        }
    }
}

fn plot(canvas: &mut BrailleCanvas, x: i32, y: i32, thickness: i32) {
    for oy in 0..thickness {
        for ox in 0..thickness {
            canvas.set_pixel_signed(x + ox, y + oy);
        }
    }
}

/// Draw a polygon outline through projected vertices
pub fn draw_ring(canvas: &mut BrailleCanvas, points: &[(i32, i32)], stroke: Stroke, closed: bool) {
    if points.len() < 2 {
        if let Some(&(x, y)) = points.first() {
            plot(canvas, x, y, stroke.thickness);
        }
        return;
    }

    let mut phase = 0;
    for pair in points.windows(2) {
        draw_line(canvas, pair[0].0, pair[0].1, pair[1].0, pair[1].1, stroke, &mut phase);
    }
    if closed && points.len() > 2 {
        let (first, last) = (points[0], points[points.len() - 1]);
        draw_line(canvas, last.0, last.1, first.0, first.1, stroke, &mut phase);
    }
}

/// Fill a polygon with ordered dithering: `opacity` is the fraction of lit dots.
/// Even-odd scanline fill, clipped to the canvas.
pub fn fill_polygon(canvas: &mut BrailleCanvas, points: &[(i32, i32)], opacity: f32) {
    if points.len() < 3 || opacity <= 0.0 {
        return;
    }
    let threshold = (opacity.clamp(0.0, 1.0) * 16.0).round() as u8;

    let min_y = points.iter().map(|p| p.1).min().unwrap_or(0).max(0);
    let max_y = points
        .iter()
        .map(|p| p.1)
        .max()
        .unwrap_or(0)
        .min(canvas.pixel_height() as i32 - 1);
    let max_x = canvas.pixel_width() as i32 - 1;

    let mut crossings: Vec<i32> = Vec::with_capacity(points.len());
    for y in min_y..=max_y {
        crossings.clear();
        let scan = y as f64 + 0.5;
        for i in 0..points.len() {
            let (ax, ay) = points[i];
            let (bx, by) = points[(i + 1) % points.len()];
            let (ay_f, by_f) = (ay as f64, by as f64);
            if (ay_f <= scan && by_f > scan) || (by_f <= scan && ay_f > scan) {
                let t = (scan - ay_f) / (by_f - ay_f);
                crossings.push((ax as f64 + t * (bx - ax) as f64).round() as i32);
            }
        }
        crossings.sort_unstable();

        for span in crossings.chunks_exact(2) {
            let start = span[0].max(0);
            let end = span[1].min(max_x);
            for x in start..=end {
                if BAYER_4X4[(y & 3) as usize][(x & 3) as usize] < threshold {
                    canvas.set_pixel(x as usize, y as usize);
                }
            }
        }
    }
}

/// Draw a vertex handle (small hollow square)
pub fn draw_handle(canvas: &mut BrailleCanvas, x: i32, y: i32) {
    for i in -1..=1 {
        canvas.set_pixel_signed(x + i, y - 1);
        canvas.set_pixel_signed(x + i, y + 1);
        canvas.set_pixel_signed(x - 1, y + i);
        canvas.set_pixel_signed(x + 1, y + i);
    }
}
