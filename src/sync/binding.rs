//! Two-way association between drawn shapes and the territories they show.
//!
//! Lives only while the map is mounted. Each handle maps to at most one key
//! and each key to at most one handle.

use crate::map::{DrawingSurface, LayerHandle};
use crate::territory::codec::NativeShape;
use crate::territory::style::ShapeStyle;
use crate::territory::TerritoryKey;
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Default, Clone, PartialEq)]
pub struct BindingTable {
    by_handle: BTreeMap<LayerHandle, TerritoryKey>,
    by_key: HashMap<TerritoryKey, LayerHandle>,
}

impl BindingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Associate `handle` with `key`, replacing whatever either side was bound to
    pub fn bind(&mut self, handle: LayerHandle, key: TerritoryKey) {
        if let Some(old_key) = self.by_handle.remove(&handle) {
            self.by_key.remove(&old_key);
        }
        if let Some(old_handle) = self.by_key.remove(&key) {
            self.by_handle.remove(&old_handle);
        }
        self.by_handle.insert(handle, key.clone());
        self.by_key.insert(key, handle);
    }

    pub fn resolve(&self, handle: LayerHandle) -> Option<&TerritoryKey> {
        self.by_handle.get(&handle)
    }

    pub fn handle_for(&self, key: &TerritoryKey) -> Option<LayerHandle> {
        self.by_key.get(key).copied()
    }

    pub fn unbind(&mut self, handle: LayerHandle) -> Option<TerritoryKey> {
        let key = self.by_handle.remove(&handle)?;
        self.by_key.remove(&key);
        Some(key)
    }

    pub fn clear(&mut self) {
        self.by_handle.clear();
        self.by_key.clear();
    }

    /// Discard every shape and binding, then draw and bind one shape per entry
    pub fn rebuild_from<S, I>(&mut self, surface: &mut S, shapes: I) -> usize
    where
        S: DrawingSurface,
        I: IntoIterator<Item = (TerritoryKey, NativeShape, ShapeStyle)>,
    {
        self.clear();
        surface.clear();
        for (key, shape, style) in shapes {
            let handle = surface.add_shape(shape, style);
            self.bind(handle, key);
        }
        self.by_handle.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (LayerHandle, &TerritoryKey)> {
        self.by_handle.iter().map(|(h, k)| (*h, k))
    }

    pub fn len(&self) -> usize {
        self.by_handle.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_handle.is_empty()
    }

    /// Both directions agree and neither side has duplicates
    #[cfg(test)]
    pub fn is_consistent(&self) -> bool {
        self.by_handle.len() == self.by_key.len()
            && self
                .by_handle
                .iter()
                .all(|(h, k)| self.by_key.get(k) == Some(h))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::map::MapRenderer;
    use crate::territory::style::resolve_style;
    use crate::territory::{ProvisionalId, TerritoryId, TerritoryStatus};

    fn stored(n: u64) -> TerritoryKey {
        TerritoryKey::Stored(TerritoryId::from(n))
    }

    #[test]
    fn test_bind_overwrites_handle_entry() {
        let mut table = BindingTable::new();
        table.bind(LayerHandle(1), stored(1));
        table.bind(LayerHandle(1), stored(2));
        assert_eq!(table.resolve(LayerHandle(1)), Some(&stored(2)));
        assert_eq!(table.handle_for(&stored(1)), None);
        assert!(table.is_consistent());
    }

    #[test]
    fn test_bind_same_key_twice_keeps_one_shape() {
        let mut table = BindingTable::new();
        table.bind(LayerHandle(1), stored(9));
        table.bind(LayerHandle(2), stored(9));
        assert_eq!(table.len(), 1);
        assert_eq!(table.resolve(LayerHandle(1)), None);
        assert_eq!(table.handle_for(&stored(9)), Some(LayerHandle(2)));
        assert!(table.is_consistent());
    }

    #[test]
    fn test_unbind() {
        let mut table = BindingTable::new();
        let key = TerritoryKey::Provisional(ProvisionalId(1));
        table.bind(LayerHandle(3), key.clone());
        assert_eq!(table.unbind(LayerHandle(3)), Some(key.clone()));
        assert_eq!(table.resolve(LayerHandle(3)), None);
        assert_eq!(table.handle_for(&key), None);
        assert_eq!(table.unbind(LayerHandle(3)), None);
    }

    #[test]
    fn test_rebuild_replaces_everything() {
        let mut surface = MapRenderer::new();
        let mut table = BindingTable::new();
        let style = resolve_style(TerritoryStatus::Active, false, "#3cb44b");
        let stale = surface.add_shape(NativeShape::rectangle((5.0, 5.0), (6.0, 6.0)), style);
        table.bind(stale, TerritoryKey::Provisional(ProvisionalId(1)));

        let shapes = vec![
            (stored(1), NativeShape::rectangle((0.0, 0.0), (1.0, 1.0)), style),
            (stored(2), NativeShape::rectangle((2.0, 2.0), (3.0, 3.0)), style),
        ];
        assert_eq!(table.rebuild_from(&mut surface, shapes), 2);
        assert_eq!(surface.len(), 2);
        assert_eq!(table.handle_for(&TerritoryKey::Provisional(ProvisionalId(1))), None);
        for (handle, key) in table.iter() {
            assert!(surface.shape(handle).is_some(), "{key} bound to missing shape");
        }
    }
}
