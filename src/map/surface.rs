use crate::territory::codec::NativeShape;
use crate::territory::style::ShapeStyle;
use std::fmt;

/// Opaque reference to a shape on the drawing surface.
/// Only meaningful until the surface is cleared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LayerHandle(pub(crate) u64);

impl fmt::Display for LayerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "layer:{}", self.0)
    }
}

/// The vector drawing capability the sync engine holds.
///
/// The engine only ever creates, reshapes, restyles and removes shapes; it
/// never looks at how the surface stores or paints them.
pub trait DrawingSurface {
    fn add_shape(&mut self, shape: NativeShape, style: ShapeStyle) -> LayerHandle;

    /// Returns false when the handle is not on the surface
    fn set_shape(&mut self, handle: LayerHandle, shape: NativeShape) -> bool;

    fn set_style(&mut self, handle: LayerHandle, style: ShapeStyle) -> bool;

    fn remove(&mut self, handle: LayerHandle) -> bool;

    /// Drop every shape. Handles issued afterwards start over.
    fn clear(&mut self);

    fn shape(&self, handle: LayerHandle) -> Option<&NativeShape>;

    fn style(&self, handle: LayerHandle) -> Option<ShapeStyle>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
