mod geometry;
mod projection;
mod renderer;
pub mod spatial;
pub mod surface;

pub use projection::Viewport;
pub use renderer::{Layer, LineString, MapLayers, MapRenderer, PaintedLayer};
pub use surface::{DrawingSurface, LayerHandle};
