//! Paint for territory shapes, derived from status and selection only.

use crate::territory::TerritoryStatus;

const WEIGHT_SELECTED: u8 = 4;
const WEIGHT_NORMAL: u8 = 2;
const OPACITY_COMPLETED: f32 = 0.6;
const OPACITY_NORMAL: f32 = 0.3;

/// Fallback when a stored color does not parse
const FALLBACK_COLOR: Rgb = Rgb { r: 0x33, g: 0x88, b: 0xff };

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dash {
    Solid,
    Dashed,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShapeStyle {
    pub color: Rgb,
    pub weight: u8,
    pub fill_opacity: f32,
    pub dash: Dash,
}

impl ShapeStyle {
    /// Paint for a shape the operator is still drawing
    pub fn draft(color: &str) -> Self {
        Self {
            color: parse_hex_color(color).unwrap_or(FALLBACK_COLOR),
            weight: WEIGHT_NORMAL,
            fill_opacity: 0.0,
            dash: Dash::Dashed,
        }
    }
}

pub fn resolve_style(status: TerritoryStatus, selected: bool, color: &str) -> ShapeStyle {
    ShapeStyle {
        color: parse_hex_color(color).unwrap_or(FALLBACK_COLOR),
        weight: if selected { WEIGHT_SELECTED } else { WEIGHT_NORMAL },
        fill_opacity: if status == TerritoryStatus::Completed {
            OPACITY_COMPLETED
        } else {
            OPACITY_NORMAL
        },
        dash: if status == TerritoryStatus::Inactive {
            Dash::Dashed
        } else {
            Dash::Solid
        },
    }
}

/// Parse `#rrggbb` or `#rgb`
pub fn parse_hex_color(s: &str) -> Option<Rgb> {
    let hex = s.trim().strip_prefix('#')?;
    if !hex.is_ascii() {
        return None;
    }
    let channel = |h: &str| u8::from_str_radix(h, 16).ok();
    match hex.len() {
        6 => Some(Rgb {
            r: channel(&hex[0..2])?,
            g: channel(&hex[2..4])?,
            b: channel(&hex[4..6])?,
        }),
        3 => {
            let expand = |i: usize| channel(&hex[i..i + 1]).map(|v| v * 17);
            Some(Rgb { r: expand(0)?, g: expand(1)?, b: expand(2)? })
        }
        _ => None,
    }
}
