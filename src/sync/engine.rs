//! Keeps the drawn shapes and the store's territory list in agreement.
//!
//! The engine is sans-IO: user gestures and store replies go in, store
//! requests and notices come out. It owns the drawing surface and the
//! binding table for as long as the map is mounted.
//!
//! Mutations for one territory id are serialized: while a request for an id
//! is in flight, later updates for it are merged into a single queued patch
//! and sent when the reply lands. A queued delete supersedes queued updates.
//! List replies carry a generation and older ones than the last applied are
//! ignored.

use crate::map::{DrawingSurface, LayerHandle};
use crate::store::{StoreReply, StoreRequest};
use crate::sync::binding::BindingTable;
use crate::territory::codec::{self, NativeShape};
use crate::territory::palette::Palette;
use crate::territory::style::{resolve_style, ShapeStyle};
use crate::territory::{
    NewTerritory, ProvisionalId, TeamDirectory, TeamId, Territory, TerritoryId, TerritoryKey,
    TerritoryPatch, TerritoryStatus,
};
use rayon::prelude::*;
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, warn};

/// A completed drawing gesture
#[derive(Debug, Clone, PartialEq)]
pub enum DrawEvent {
    /// The shape is already on the surface under `handle`
    Created { handle: LayerHandle, shape: NativeShape },
    Edited { handle: LayerHandle, shape: NativeShape },
    Deleted { handle: LayerHandle },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Info,
    Error,
}

/// Something the operator should be told about
#[derive(Debug, Clone, PartialEq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
}

impl Notice {
    fn info(message: String) -> Self {
        Self { level: NoticeLevel::Info, message }
    }

    fn error(message: String) -> Self {
        Self { level: NoticeLevel::Error, message }
    }
}

pub struct EngineSettings {
    /// Recorded as `createdBy` on new territories
    pub user: String,
    pub palette: Palette,
}

/// What the selection currently points at
#[derive(Debug, Clone, Copy)]
pub enum SelectedTerritory<'a> {
    Stored(&'a Territory),
    Provisional { draft: &'a NewTerritory, failed: bool },
}

/// A drawn territory the store has not acknowledged yet
struct PendingCreate {
    handle: LayerHandle,
    draft: NewTerritory,
    /// Changes made while the create was in flight, sent once it has an id
    follow_up: TerritoryPatch,
    deleted: bool,
    failed: bool,
}

enum Queued {
    Update(TerritoryPatch),
    Delete,
}

struct InFlight {
    deleting: bool,
    queued: Option<Queued>,
}

pub struct SyncEngine<S: DrawingSurface> {
    surface: S,
    bindings: BindingTable,
    territories: Vec<Territory>,
    teams: TeamDirectory,
    pending: HashMap<ProvisionalId, PendingCreate>,
    in_flight: HashMap<TerritoryId, InFlight>,
    selected: Option<TerritoryKey>,
    outbox: Vec<StoreRequest>,
    notices: Vec<Notice>,
    list_issued: u64,
    list_applied: u64,
    next_provisional: u64,
    skipped: Vec<TerritoryId>,
    rebuilds: u64,
    settings: EngineSettings,
}

impl<S: DrawingSurface> SyncEngine<S> {
    pub fn new(surface: S, settings: EngineSettings) -> Self {
        Self {
            surface,
            bindings: BindingTable::new(),
            territories: Vec::new(),
            teams: TeamDirectory::default(),
            pending: HashMap::new(),
            in_flight: HashMap::new(),
            selected: None,
            outbox: Vec::new(),
            notices: Vec::new(),
            list_issued: 0,
            list_applied: 0,
            next_provisional: 1,
            skipped: Vec::new(),
            rebuilds: 0,
            settings,
        }
    }

    // ------------------------------------------------------------------
    // Inputs
    // ------------------------------------------------------------------

    /// Single entry point for drawing gestures
    pub fn handle_event(&mut self, event: DrawEvent) {
        match event {
            DrawEvent::Created { handle, shape } => self.on_created(handle, shape),
            DrawEvent::Edited { handle, shape } => self.on_edited(handle, shape),
            DrawEvent::Deleted { handle } => self.on_deleted(handle),
        }
    }

    /// Ask the store for the authoritative list
    pub fn refresh(&mut self) {
        self.list_issued += 1;
        self.outbox.push(StoreRequest::List {
            generation: self.list_issued,
        });
    }

    pub fn load_teams(&mut self) {
        self.outbox.push(StoreRequest::Teams);
    }

    /// Field edits from the entity form (name, status, team, ...)
    pub fn update_fields(&mut self, key: &TerritoryKey, patch: TerritoryPatch) {
        if patch.is_empty() {
            return;
        }
        match key {
            TerritoryKey::Stored(id) => {
                info!(%id, "updating territory fields");
                self.submit_update(id.clone(), patch);
            }
            TerritoryKey::Provisional(p) => {
                let Some(pending) = self.pending.get_mut(p) else {
                    return;
                };
                patch.apply_to_draft(&mut pending.draft);
                if !pending.failed {
                    pending.follow_up.merge(patch);
                }
                self.restyle(key);
            }
        }
    }

    /// Selection is a UI side channel: it only changes paint
    pub fn select(&mut self, key: Option<TerritoryKey>) {
        if self.selected == key {
            return;
        }
        let previous = std::mem::replace(&mut self.selected, key);
        for k in [previous, self.selected.clone()].into_iter().flatten() {
            self.restyle(&k);
        }
    }

    pub fn apply_reply(&mut self, reply: StoreReply) {
        match reply {
            StoreReply::Listed { generation, result } => match result {
                _ if generation <= self.list_applied => {
                    debug!(generation, applied = self.list_applied, "dropping stale territory list");
                }
                Ok(list) => {
                    self.list_applied = generation;
                    self.rebuild_from(list);
                }
                Err(e) => {
                    warn!(error = %e, "territory list failed");
                    self.notices.push(Notice::error(format!("Could not load territories: {e}")));
                }
            },
            StoreReply::Teams(result) => match result {
                Ok(teams) => {
                    debug!(count = teams.len(), "loaded teams");
                    self.teams = TeamDirectory::new(teams);
                }
                Err(e) => {
                    warn!(error = %e, "team list failed");
                    self.notices.push(Notice::error(format!("Could not load teams: {e}")));
                }
            },
            StoreReply::Created { provisional, result } => self.on_create_reply(provisional, result),
            // Failures leave local shapes alone until some later refresh
            StoreReply::Updated { id, result } => match result {
                Ok(territory) => {
                    info!(%id, "territory updated");
                    self.replace_record(territory);
                    if !self.finish_mutation(id) {
                        self.refresh();
                    }
                }
                Err(e) => {
                    warn!(%id, error = %e, "territory update failed");
                    let name = self.display_name(&id);
                    self.notices.push(Notice::error(format!("Could not update '{name}': {e}")));
                    self.finish_mutation(id);
                }
            },
            StoreReply::Deleted { id, result } => match result {
                Ok(()) => {
                    info!(%id, "territory deleted");
                    self.territories.retain(|t| t.id != id);
                    if !self.finish_mutation(id) {
                        self.refresh();
                    }
                }
                Err(e) => {
                    warn!(%id, error = %e, "territory delete failed");
                    let name = self.display_name(&id);
                    self.notices.push(Notice::error(format!("Could not delete '{name}': {e}")));
                    self.finish_mutation(id);
                }
            },
        }
    }

    /// Discard all shapes and bindings and redraw from `territories`.
    ///
    /// Territories whose geometry is missing or does not decode are kept in
    /// the list but not drawn.
    pub fn rebuild_from(&mut self, territories: Vec<Territory>) {
        let decoded: Vec<_> = territories
            .par_iter()
            .map(|t| codec::decode(t.geometry.as_ref()))
            .collect();

        let mut seen = HashSet::new();
        let mut skipped = Vec::new();
        let mut shapes = Vec::with_capacity(territories.len());
        for (territory, shape) in territories.iter().zip(decoded) {
            if !seen.insert(&territory.id) {
                warn!(id = %territory.id, "duplicate territory id in list, drawing first only");
                continue;
            }
            if self.is_being_deleted(&territory.id) {
                debug!(id = %territory.id, "delete in flight, not drawing");
                continue;
            }
            match shape {
                Ok(shape) => {
                    let key = TerritoryKey::Stored(territory.id.clone());
                    let style = self.resolve(&key, territory.status, &territory.color);
                    shapes.push((key, shape, style));
                }
                Err(e) => {
                    warn!(id = %territory.id, error = %e, "territory not drawn");
                    skipped.push(territory.id.clone());
                }
            }
        }

        let drawn = self.bindings.rebuild_from(&mut self.surface, shapes);

        let keep_selection = self
            .selected
            .as_ref()
            .and_then(TerritoryKey::stored_id)
            .is_some_and(|id| territories.iter().any(|t| &t.id == id));
        if !keep_selection {
            self.selected = None;
        }
        // Their shapes were just cleared and nobody is waiting on them
        self.pending.retain(|_, p| !p.failed);

        debug!(drawn, skipped = skipped.len(), total = territories.len(), "rebuilt territory layers");
        self.territories = territories;
        self.skipped = skipped;
        self.rebuilds += 1;
    }

    // ------------------------------------------------------------------
    // Outputs
    // ------------------------------------------------------------------

    /// Store requests issued since the last call
    pub fn take_requests(&mut self) -> Vec<StoreRequest> {
        std::mem::take(&mut self.outbox)
    }

    pub fn take_notices(&mut self) -> Vec<Notice> {
        std::mem::take(&mut self.notices)
    }

    // ------------------------------------------------------------------
    // Read access
    // ------------------------------------------------------------------

    pub fn surface(&self) -> &S {
        &self.surface
    }

    /// For the drawing tool only: place a freshly drawn shape, then report
    /// it with [`DrawEvent::Created`]
    pub fn surface_mut(&mut self) -> &mut S {
        &mut self.surface
    }

    pub fn bindings(&self) -> &BindingTable {
        &self.bindings
    }

    pub fn territories(&self) -> &[Territory] {
        &self.territories
    }

    pub fn territory(&self, id: &TerritoryId) -> Option<&Territory> {
        self.territories.iter().find(|t| &t.id == id)
    }

    pub fn teams(&self) -> &TeamDirectory {
        &self.teams
    }

    pub fn team_name(&self, id: &TeamId) -> Option<&str> {
        self.teams.name_of(id)
    }

    pub fn selected(&self) -> Option<&TerritoryKey> {
        self.selected.as_ref()
    }

    pub fn selected_territory(&self) -> Option<SelectedTerritory<'_>> {
        match self.selected.as_ref()? {
            TerritoryKey::Stored(id) => self.territory(id).map(SelectedTerritory::Stored),
            TerritoryKey::Provisional(p) => self.pending.get(p).map(|pc| SelectedTerritory::Provisional {
                draft: &pc.draft,
                failed: pc.failed,
            }),
        }
    }

    /// Display name for a bound key, provisional ones included
    pub fn name_of(&self, key: &TerritoryKey) -> Option<&str> {
        match key {
            TerritoryKey::Stored(id) => self.territory(id).map(|t| t.name.as_str()),
            TerritoryKey::Provisional(p) => self.pending.get(p).map(|pc| pc.draft.name.as_str()),
        }
    }

    /// Shape currently drawn for `key`
    pub fn shape_of(&self, key: &TerritoryKey) -> Option<(LayerHandle, &NativeShape)> {
        let handle = self.bindings.handle_for(key)?;
        self.surface.shape(handle).map(|s| (handle, s))
    }

    /// Ids in the last list that could not be drawn
    pub fn skipped(&self) -> &[TerritoryId] {
        &self.skipped
    }

    /// Creates still waiting on the store
    pub fn pending_creates(&self) -> usize {
        self.pending.values().filter(|p| !p.failed).count()
    }

    /// Bumped on every rebuild; handles from an older rebuild are stale
    pub fn rebuilds(&self) -> u64 {
        self.rebuilds
    }

    pub fn palette(&self) -> &Palette {
        &self.settings.palette
    }

    // ------------------------------------------------------------------
    // Gesture handling
    // ------------------------------------------------------------------

    fn on_created(&mut self, handle: LayerHandle, shape: NativeShape) {
        if self.surface.shape(handle).is_none() {
            debug!(%handle, "created event for a shape not on the surface");
            return;
        }
        if self.bindings.resolve(handle).is_some() {
            warn!(%handle, "created event for an already bound shape");
            return;
        }

        let provisional = ProvisionalId(self.next_provisional);
        self.next_provisional += 1;

        let draft = NewTerritory {
            name: format!("New territory {}", provisional.0),
            description: None,
            geometry: codec::to_feature(&shape),
            color: self.settings.palette.pick(),
            team_id: None,
            status: Some(TerritoryStatus::Active),
            created_by: self.settings.user.clone(),
            assigned_date: None,
        };

        let key = TerritoryKey::Provisional(provisional);
        self.bindings.bind(handle, key.clone());
        self.surface.set_shape(handle, shape);
        let style = self.resolve(&key, TerritoryStatus::Active, &draft.color);
        self.surface.set_style(handle, style);

        info!(%provisional, %handle, color = %draft.color, "territory drawn, creating");
        self.outbox.push(StoreRequest::Create {
            provisional,
            body: draft.clone(),
        });
        self.pending.insert(
            provisional,
            PendingCreate {
                handle,
                draft,
                follow_up: TerritoryPatch::default(),
                deleted: false,
                failed: false,
            },
        );
    }

    fn on_edited(&mut self, handle: LayerHandle, shape: NativeShape) {
        let Some(key) = self.bindings.resolve(handle).cloned() else {
            debug!(%handle, "edit on unbound shape ignored");
            return;
        };

        let feature = codec::to_feature(&shape);
        self.surface.set_shape(handle, shape);

        match key {
            TerritoryKey::Stored(id) => {
                info!(%id, "territory geometry edited");
                self.submit_update(id, TerritoryPatch::geometry(feature));
            }
            TerritoryKey::Provisional(p) => {
                if let Some(pending) = self.pending.get_mut(&p) {
                    pending.draft.geometry = feature.clone();
                    if !pending.failed {
                        pending.follow_up.merge(TerritoryPatch::geometry(feature));
                    }
                }
            }
        }
    }

    fn on_deleted(&mut self, handle: LayerHandle) {
        let Some(key) = self.bindings.unbind(handle) else {
            debug!(%handle, "delete on unbound shape ignored");
            return;
        };
        self.surface.remove(handle);
        if self.selected.as_ref() == Some(&key) {
            self.selected = None;
        }

        match key {
            TerritoryKey::Stored(id) => {
                info!(%id, "territory deleted on map");
                self.submit_delete(id);
            }
            TerritoryKey::Provisional(p) => match self.pending.get_mut(&p) {
                // Delete once the store tells us the real id
                Some(pending) if !pending.failed => pending.deleted = true,
                _ => {
                    self.pending.remove(&p);
                }
            },
        }
    }

    // ------------------------------------------------------------------
    // Reply handling
    // ------------------------------------------------------------------

    fn on_create_reply(&mut self, provisional: ProvisionalId, result: Result<Territory, crate::store::StoreError>) {
        let Some(mut pending) = self.pending.remove(&provisional) else {
            warn!(%provisional, "create reply for unknown provisional territory");
            return;
        };
        let key = TerritoryKey::Provisional(provisional);

        match result {
            Ok(territory) => {
                let id = territory.id.clone();
                info!(%provisional, %id, "territory created");
                self.notices.push(Notice::info(format!("Saved '{}'", territory.name)));

                if !pending.deleted {
                    self.replace_record(territory);
                }

                let stored = TerritoryKey::Stored(id.clone());
                if self.bindings.resolve(pending.handle) == Some(&key) {
                    if self.bindings.handle_for(&stored).is_some() {
                        // A refresh already drew the stored record; drop the duplicate
                        self.bindings.unbind(pending.handle);
                        self.surface.remove(pending.handle);
                    } else {
                        self.bindings.bind(pending.handle, stored.clone());
                    }
                    if self.selected.as_ref() == Some(&key) {
                        self.selected = Some(stored.clone());
                    }
                    self.restyle(&stored);
                }

                if pending.deleted {
                    self.submit_delete(id);
                } else if !pending.follow_up.is_empty() {
                    self.submit_update(id, std::mem::take(&mut pending.follow_up));
                }
                self.refresh();
            }
            Err(e) => {
                warn!(%provisional, error = %e, "territory create failed");
                self.notices.push(Notice::error(format!(
                    "Could not save '{}': {e}. It stays on the map unsaved until the next refresh.",
                    pending.draft.name
                )));
                if !pending.deleted {
                    pending.failed = true;
                    self.pending.insert(provisional, pending);
                }
            }
        }
    }

    fn submit_update(&mut self, id: TerritoryId, patch: TerritoryPatch) {
        if patch.is_empty() {
            return;
        }
        match self.in_flight.get_mut(&id) {
            Some(flight) if flight.deleting => {
                debug!(%id, "update after delete dropped");
            }
            Some(flight) => match &mut flight.queued {
                Some(Queued::Delete) => {}
                Some(Queued::Update(queued)) => queued.merge(patch),
                None => flight.queued = Some(Queued::Update(patch)),
            },
            None => {
                self.in_flight.insert(id.clone(), InFlight { deleting: false, queued: None });
                self.outbox.push(StoreRequest::Update { id, patch });
            }
        }
    }

    fn submit_delete(&mut self, id: TerritoryId) {
        match self.in_flight.get_mut(&id) {
            Some(flight) if flight.deleting => {}
            Some(flight) => flight.queued = Some(Queued::Delete),
            None => {
                self.in_flight.insert(id.clone(), InFlight { deleting: true, queued: None });
                self.outbox.push(StoreRequest::Delete { id });
            }
        }
    }

    /// Release the id's slot and send whatever queued up behind it.
    /// Returns true when another request for the id went out.
    fn finish_mutation(&mut self, id: TerritoryId) -> bool {
        let Some(flight) = self.in_flight.remove(&id) else {
            return false;
        };
        match flight.queued {
            Some(Queued::Update(patch)) if !flight.deleting => {
                self.submit_update(id, patch);
                true
            }
            Some(Queued::Delete) if !flight.deleting => {
                self.submit_delete(id);
                true
            }
            _ => false,
        }
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    fn replace_record(&mut self, territory: Territory) {
        let key = TerritoryKey::Stored(territory.id.clone());
        match self.territories.iter_mut().find(|t| t.id == territory.id) {
            Some(existing) => *existing = territory,
            None => self.territories.push(territory),
        }
        self.restyle(&key);
    }

    fn resolve(&self, key: &TerritoryKey, status: TerritoryStatus, color: &str) -> ShapeStyle {
        resolve_style(status, self.selected.as_ref() == Some(key), color)
    }

    fn restyle(&mut self, key: &TerritoryKey) {
        let Some(handle) = self.bindings.handle_for(key) else {
            return;
        };
        let style = match key {
            TerritoryKey::Stored(id) => match self.territory(id) {
                Some(t) => self.resolve(key, t.status, &t.color),
                None => return,
            },
            TerritoryKey::Provisional(p) => match self.pending.get(p) {
                Some(pc) => self.resolve(key, pc.draft.status.unwrap_or_default(), &pc.draft.color),
                None => return,
            },
        };
        self.surface.set_style(handle, style);
    }

    /// A delete for `id` is in flight or queued behind another mutation
    fn is_being_deleted(&self, id: &TerritoryId) -> bool {
        self.in_flight
            .get(id)
            .is_some_and(|f| f.deleting || matches!(f.queued, Some(Queued::Delete)))
    }

    fn display_name(&self, id: &TerritoryId) -> String {
        self.territory(id)
            .map(|t| t.name.clone())
            .unwrap_or_else(|| format!("territory {id}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::map::MapRenderer;
    use crate::store::StoreError;
    use crate::territory::style::Dash;
    use crate::territory::palette::DEFAULT_PALETTE;
    use chrono::Utc;

    fn engine() -> SyncEngine<MapRenderer> {
        SyncEngine::new(
            MapRenderer::new(),
            EngineSettings {
                user: "dispatcher".into(),
                palette: Palette::with_seed(Vec::new(), 7),
            },
        )
    }

    fn record(id: u64, status: TerritoryStatus, shape: &NativeShape) -> Territory {
        Territory {
            id: TerritoryId::from(id),
            name: format!("T{id}"),
            description: None,
            geometry: serde_json::to_value(codec::to_feature(shape)).ok(),
            color: "#4363d8".into(),
            team_id: None,
            status,
            assigned_date: None,
            completed_date: None,
            created_by: "ops".into(),
            created_at: Some(Utc::now()),
        }
    }

    fn square(x: f64) -> NativeShape {
        NativeShape::rectangle((x, 0.0), (x + 1.0, 1.0))
    }

    /// Draw a shape the way the map tool does
    fn draw(engine: &mut SyncEngine<MapRenderer>, shape: NativeShape) -> LayerHandle {
        let handle = engine
            .surface_mut()
            .add_shape(shape.clone(), ShapeStyle::draft("#ffffff"));
        engine.handle_event(DrawEvent::Created { handle, shape });
        handle
    }

    fn listed(engine: &mut SyncEngine<MapRenderer>, list: Vec<Territory>) {
        engine.refresh();
        let generation = engine
            .take_requests()
            .into_iter()
            .rev()
            .find_map(|r| match r {
                StoreRequest::List { generation } => Some(generation),
                _ => None,
            })
            .unwrap();
        engine.apply_reply(StoreReply::Listed { generation, result: Ok(list) });
    }

    fn create_request(requests: &[StoreRequest]) -> (ProvisionalId, NewTerritory) {
        requests
            .iter()
            .find_map(|r| match r {
                StoreRequest::Create { provisional, body } => Some((*provisional, body.clone())),
                _ => None,
            })
            .unwrap()
    }

    fn assert_unique_bindings(engine: &SyncEngine<MapRenderer>) {
        assert!(engine.bindings().is_consistent());
        let mut keys = HashSet::new();
        for (handle, key) in engine.bindings().iter() {
            assert!(keys.insert(key.clone()), "{key} bound twice");
            assert!(engine.surface().shape(handle).is_some());
        }
    }

    #[test]
    fn test_create_then_refresh() {
        let mut engine = engine();
        let rect = NativeShape::rectangle((-74.0, 40.70), (-73.99, 40.71));
        draw(&mut engine, rect.clone());

        let requests = engine.take_requests();
        let (provisional, body) = create_request(&requests);
        assert!(DEFAULT_PALETTE.contains(&body.color.as_str()));
        assert_eq!(body.created_by, "dispatcher");
        assert_eq!(body.status, Some(TerritoryStatus::Active));
        assert_eq!(codec::to_native_shape(&body.geometry), rect);

        let mut stored = body.clone().into_territory(TerritoryId::from(42), Utc::now());
        stored.status = TerritoryStatus::Active;
        engine.apply_reply(StoreReply::Created { provisional, result: Ok(stored.clone()) });

        // The reply itself asks for a refresh
        let generation = engine
            .take_requests()
            .into_iter()
            .find_map(|r| match r {
                StoreRequest::List { generation } => Some(generation),
                _ => None,
            })
            .unwrap();
        engine.apply_reply(StoreReply::Listed { generation, result: Ok(vec![stored]) });

        assert_eq!(engine.bindings().len(), 1);
        assert_eq!(engine.surface().len(), 1);
        let key = TerritoryKey::Stored(TerritoryId::from(42));
        let (handle, _) = engine.shape_of(&key).unwrap();
        let style = engine.surface().style(handle).unwrap();
        assert_eq!(style.dash, Dash::Solid);
        assert_eq!(style.fill_opacity, 0.3);
        assert_eq!(style.weight, 2);
    }

    #[test]
    fn test_create_reply_swaps_binding_without_refresh() {
        let mut engine = engine();
        let handle = draw(&mut engine, square(0.0));
        let (provisional, body) = create_request(&engine.take_requests());

        engine.apply_reply(StoreReply::Created {
            provisional,
            result: Ok(body.into_territory(TerritoryId::from(5), Utc::now())),
        });
        assert_eq!(
            engine.bindings().resolve(handle),
            Some(&TerritoryKey::Stored(TerritoryId::from(5)))
        );
        assert_eq!(engine.pending_creates(), 0);
    }

    #[test]
    fn test_select_then_external_status_change() {
        let mut engine = engine();
        listed(&mut engine, vec![record(7, TerritoryStatus::Inactive, &square(0.0))]);
        let key = TerritoryKey::Stored(TerritoryId::from(7));
        engine.select(Some(key.clone()));

        let (handle, _) = engine.shape_of(&key).unwrap();
        let style = engine.surface().style(handle).unwrap();
        assert_eq!(style.dash, Dash::Dashed);
        assert_eq!(style.weight, 4);

        listed(&mut engine, vec![record(7, TerritoryStatus::Completed, &square(0.0))]);
        let (handle, _) = engine.shape_of(&key).unwrap();
        let style = engine.surface().style(handle).unwrap();
        assert_eq!(style.fill_opacity, 0.6);
        assert_eq!(style.dash, Dash::Solid);
        assert_eq!(style.weight, 4);
        assert_eq!(engine.selected(), Some(&key));
    }

    #[test]
    fn test_selection_dropped_when_territory_disappears() {
        let mut engine = engine();
        listed(&mut engine, vec![record(1, TerritoryStatus::Active, &square(0.0))]);
        engine.select(Some(TerritoryKey::Stored(TerritoryId::from(1))));
        listed(&mut engine, vec![record(2, TerritoryStatus::Active, &square(2.0))]);
        assert_eq!(engine.selected(), None);
    }

    #[test]
    fn test_failed_create_stays_until_rebuild() {
        let mut engine = engine();
        let handle = draw(&mut engine, square(0.0));
        let (provisional, _) = create_request(&engine.take_requests());

        engine.apply_reply(StoreReply::Created {
            provisional,
            result: Err(StoreError::Transport("connection refused".into())),
        });
        let notices = engine.take_notices();
        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].level, NoticeLevel::Error);
        assert_eq!(
            engine.bindings().resolve(handle),
            Some(&TerritoryKey::Provisional(provisional))
        );
        assert!(engine.surface().shape(handle).is_some());
        assert!(engine.take_requests().is_empty(), "no retry");

        // An unrelated mutation's refresh brings the authoritative list
        listed(&mut engine, vec![record(3, TerritoryStatus::Active, &square(5.0))]);
        assert_eq!(engine.bindings().len(), 1);
        assert!(engine
            .bindings()
            .handle_for(&TerritoryKey::Provisional(provisional))
            .is_none());
    }

    #[test]
    fn test_delete_unbinds_immediately() {
        let mut engine = engine();
        listed(&mut engine, vec![record(1, TerritoryStatus::Active, &square(0.0))]);
        let key = TerritoryKey::Stored(TerritoryId::from(1));
        engine.select(Some(key.clone()));
        let (handle, _) = engine.shape_of(&key).unwrap();

        engine.handle_event(DrawEvent::Deleted { handle });
        assert_eq!(engine.bindings().resolve(handle), None);
        assert!(engine.surface().shape(handle).is_none());
        assert_eq!(engine.selected(), None);
        assert_eq!(
            engine.take_requests(),
            vec![StoreRequest::Delete { id: TerritoryId::from(1) }]
        );

        // Failure is reported and no refresh goes out
        engine.apply_reply(StoreReply::Deleted {
            id: TerritoryId::from(1),
            result: Err(StoreError::Status { status: 500, body: String::new() }),
        });
        assert_eq!(engine.take_notices().len(), 1);
        assert_eq!(engine.bindings().resolve(handle), None);
        assert!(engine.take_requests().is_empty());
    }

    #[test]
    fn test_edit_sends_geometry_only() {
        let mut engine = engine();
        listed(&mut engine, vec![record(1, TerritoryStatus::Active, &square(0.0))]);
        let (handle, _) = engine.shape_of(&TerritoryKey::Stored(TerritoryId::from(1))).unwrap();

        engine.handle_event(DrawEvent::Edited { handle, shape: square(3.0) });
        match engine.take_requests().as_slice() {
            [StoreRequest::Update { id, patch }] => {
                assert_eq!(id, &TerritoryId::from(1));
                assert_eq!(patch, &TerritoryPatch::geometry(codec::to_feature(&square(3.0))));
            }
            other => panic!("unexpected requests {other:?}"),
        }
        assert_eq!(engine.surface().shape(handle), Some(&square(3.0)));
    }

    #[test]
    fn test_unbound_gestures_are_noops() {
        let mut engine = engine();
        let stray = engine
            .surface_mut()
            .add_shape(square(0.0), ShapeStyle::draft("#ffffff"));
        engine.handle_event(DrawEvent::Edited { handle: stray, shape: square(1.0) });
        engine.handle_event(DrawEvent::Deleted { handle: stray });
        assert!(engine.take_requests().is_empty());
        assert!(engine.take_notices().is_empty());
    }

    #[test]
    fn test_updates_for_one_id_are_serialized() {
        let mut engine = engine();
        listed(&mut engine, vec![record(1, TerritoryStatus::Active, &square(0.0))]);
        let key = TerritoryKey::Stored(TerritoryId::from(1));
        let (handle, _) = engine.shape_of(&key).unwrap();

        engine.handle_event(DrawEvent::Edited { handle, shape: square(1.0) });
        engine.handle_event(DrawEvent::Edited { handle, shape: square(2.0) });
        engine.update_fields(&key, TerritoryPatch {
            status: Some(TerritoryStatus::Completed),
            ..TerritoryPatch::default()
        });
        assert_eq!(engine.take_requests().len(), 1, "only the first goes out");

        let mut first = record(1, TerritoryStatus::Active, &square(1.0));
        first.name = "T1".into();
        engine.apply_reply(StoreReply::Updated { id: TerritoryId::from(1), result: Ok(first) });

        match engine.take_requests().as_slice() {
            [StoreRequest::Update { patch, .. }] => {
                assert_eq!(patch.geometry, Some(codec::to_feature(&square(2.0))));
                assert_eq!(patch.status, Some(TerritoryStatus::Completed));
            }
            other => panic!("expected merged update, got {other:?}"),
        }
    }

    #[test]
    fn test_delete_supersedes_queued_update() {
        let mut engine = engine();
        listed(&mut engine, vec![record(1, TerritoryStatus::Active, &square(0.0))]);
        let key = TerritoryKey::Stored(TerritoryId::from(1));
        let (handle, _) = engine.shape_of(&key).unwrap();

        engine.handle_event(DrawEvent::Edited { handle, shape: square(1.0) });
        engine.update_fields(&key, TerritoryPatch {
            name: Some("renamed".into()),
            ..TerritoryPatch::default()
        });
        engine.handle_event(DrawEvent::Deleted { handle });
        assert_eq!(engine.take_requests().len(), 1);

        engine.apply_reply(StoreReply::Updated {
            id: TerritoryId::from(1),
            result: Ok(record(1, TerritoryStatus::Active, &square(1.0))),
        });
        assert_eq!(
            engine.take_requests(),
            vec![StoreRequest::Delete { id: TerritoryId::from(1) }]
        );
    }

    #[test]
    fn test_stale_list_is_dropped() {
        let mut engine = engine();
        engine.refresh();
        engine.refresh();
        let generations: Vec<u64> = engine
            .take_requests()
            .into_iter()
            .filter_map(|r| match r {
                StoreRequest::List { generation } => Some(generation),
                _ => None,
            })
            .collect();
        assert_eq!(generations, vec![1, 2]);

        let newer = vec![record(2, TerritoryStatus::Active, &square(0.0))];
        let older = vec![record(1, TerritoryStatus::Active, &square(0.0))];
        engine.apply_reply(StoreReply::Listed { generation: 2, result: Ok(newer) });
        engine.apply_reply(StoreReply::Listed { generation: 1, result: Ok(older) });
        assert_eq!(engine.territories().len(), 1);
        assert_eq!(engine.territories()[0].id, TerritoryId::from(2));
    }

    #[test]
    fn test_rebuild_is_idempotent() {
        let list = vec![
            record(1, TerritoryStatus::Active, &square(0.0)),
            record(2, TerritoryStatus::Inactive, &square(2.0)),
            record(3, TerritoryStatus::Completed, &square(4.0)),
        ];
        let mut engine = engine();
        engine.select(Some(TerritoryKey::Stored(TerritoryId::from(2))));
        engine.rebuild_from(list.clone());
        let bindings = engine.bindings().clone();
        let layers: Vec<_> = engine
            .surface()
            .layers()
            .map(|(h, l)| (h, l.shape.clone(), l.style))
            .collect();

        engine.rebuild_from(list);
        assert_eq!(engine.bindings(), &bindings);
        let again: Vec<_> = engine
            .surface()
            .layers()
            .map(|(h, l)| (h, l.shape.clone(), l.style))
            .collect();
        assert_eq!(layers, again);
    }

    #[test]
    fn test_undecodable_geometry_is_skipped() {
        let mut broken = record(2, TerritoryStatus::Active, &square(0.0));
        broken.geometry = Some(serde_json::json!({"type": "Point", "coordinates": [0.0, 0.0]}));
        let mut missing = record(3, TerritoryStatus::Active, &square(0.0));
        missing.geometry = None;

        let mut engine = engine();
        engine.rebuild_from(vec![record(1, TerritoryStatus::Active, &square(0.0)), broken, missing]);
        assert_eq!(engine.surface().len(), 1);
        assert_eq!(engine.territories().len(), 3);
        assert_eq!(engine.skipped(), &[TerritoryId::from(2), TerritoryId::from(3)]);
    }

    #[test]
    fn test_edit_and_delete_while_create_in_flight() {
        let mut engine = engine();
        let handle = draw(&mut engine, square(0.0));
        let (provisional, body) = create_request(&engine.take_requests());

        engine.handle_event(DrawEvent::Edited { handle, shape: square(1.0) });
        assert!(engine.take_requests().is_empty());

        engine.apply_reply(StoreReply::Created {
            provisional,
            result: Ok(body.clone().into_territory(TerritoryId::from(8), Utc::now())),
        });
        let requests = engine.take_requests();
        assert!(requests.iter().any(|r| matches!(
            r,
            StoreRequest::Update { id, patch }
                if id == &TerritoryId::from(8)
                    && patch.geometry == Some(codec::to_feature(&square(1.0)))
        )));

        // Deleting a second in-flight shape defers the delete to the reply
        let other = draw(&mut engine, square(5.0));
        let (provisional, body) = create_request(&engine.take_requests());
        engine.handle_event(DrawEvent::Deleted { handle: other });
        assert!(engine.take_requests().is_empty());
        engine.apply_reply(StoreReply::Created {
            provisional,
            result: Ok(body.into_territory(TerritoryId::from(9), Utc::now())),
        });
        assert!(engine
            .take_requests()
            .contains(&StoreRequest::Delete { id: TerritoryId::from(9) }));
    }

    #[test]
    fn test_bindings_stay_unique_across_interleavings() {
        let mut engine = engine();
        listed(&mut engine, vec![
            record(1, TerritoryStatus::Active, &square(0.0)),
            record(2, TerritoryStatus::Active, &square(2.0)),
        ]);
        assert_unique_bindings(&engine);

        let a = draw(&mut engine, square(4.0));
        let b = draw(&mut engine, square(6.0));
        assert_unique_bindings(&engine);
        let requests = engine.take_requests();
        let creates: Vec<_> = requests
            .iter()
            .filter_map(|r| match r {
                StoreRequest::Create { provisional, body } => Some((*provisional, body.clone())),
                _ => None,
            })
            .collect();
        assert_eq!(creates.len(), 2);

        // Refresh lands before either create reply: provisional shapes vanish
        listed(&mut engine, vec![
            record(1, TerritoryStatus::Active, &square(0.0)),
            record(2, TerritoryStatus::Active, &square(2.0)),
            creates[0].1.clone().into_territory(TerritoryId::from(3), Utc::now()),
        ]);
        assert_unique_bindings(&engine);

        // Late create reply for a shape the rebuild already drew
        engine.apply_reply(StoreReply::Created {
            provisional: creates[0].0,
            result: Ok(creates[0].1.clone().into_territory(TerritoryId::from(3), Utc::now())),
        });
        assert_unique_bindings(&engine);
        assert_eq!(engine.surface().len(), 3);

        if let Some((h, _)) = engine.shape_of(&TerritoryKey::Stored(TerritoryId::from(1))) {
            engine.handle_event(DrawEvent::Deleted { handle: h });
        }
        engine.handle_event(DrawEvent::Deleted { handle: a });
        engine.handle_event(DrawEvent::Edited { handle: b, shape: square(7.0) });
        assert_unique_bindings(&engine);
    }

    #[test]
    fn test_team_names_resolve() {
        let mut engine = engine();
        engine.load_teams();
        assert_eq!(engine.take_requests(), vec![StoreRequest::Teams]);
        engine.apply_reply(StoreReply::Teams(Ok(vec![crate::territory::Team {
            id: TeamId::from(4),
            name: "Delta".into(),
        }])));
        assert_eq!(engine.team_name(&TeamId::from(4)), Some("Delta"));
        assert_eq!(engine.team_name(&TeamId::from(5)), None);
    }

    #[test]
    fn test_field_edit_on_provisional_updates_draft() {
        let mut engine = engine();
        draw(&mut engine, square(0.0));
        let (provisional, _) = create_request(&engine.take_requests());
        let key = TerritoryKey::Provisional(provisional);
        engine.select(Some(key.clone()));
        engine.update_fields(&key, TerritoryPatch {
            name: Some("Harbor".into()),
            ..TerritoryPatch::default()
        });
        match engine.selected_territory() {
            Some(SelectedTerritory::Provisional { draft, failed }) => {
                assert_eq!(draft.name, "Harbor");
                assert!(!failed);
            }
            other => panic!("unexpected selection {other:?}"),
        }
        assert!(engine.take_requests().is_empty());
    }

    /// Run every queued request against `store` until the engine goes quiet
    fn drive(engine: &mut SyncEngine<MapRenderer>, store: &crate::store::MemoryStore) {
        loop {
            let requests = engine.take_requests();
            if requests.is_empty() {
                break;
            }
            for request in requests {
                engine.apply_reply(crate::store::execute(store, request));
            }
        }
    }

    #[test]
    fn test_external_change_arrives_through_store() {
        let store = crate::store::MemoryStore::with_sample_data();
        let mut engine = engine();
        engine.load_teams();
        engine.refresh();
        drive(&mut engine, &store);
        assert_eq!(engine.surface().len(), 3);

        let key = TerritoryKey::Stored(TerritoryId::from(1));
        engine.select(Some(key.clone()));
        store.external_update(&TerritoryId::from(1), &TerritoryPatch {
            status: Some(TerritoryStatus::Completed),
            ..TerritoryPatch::default()
        });

        // Any mutation's refresh picks the change up
        draw(&mut engine, square(10.0));
        drive(&mut engine, &store);

        assert_eq!(engine.territories().len(), 4);
        assert_eq!(engine.selected(), Some(&key));
        let (handle, _) = engine.shape_of(&key).unwrap();
        let style = engine.surface().style(handle).unwrap();
        assert_eq!(style.fill_opacity, 0.6);
        assert_eq!(style.weight, 4);
        assert_unique_bindings(&engine);
    }

    #[test]
    fn test_store_outage_reports_once() {
        let store = crate::store::MemoryStore::with_sample_data();
        let mut engine = engine();
        engine.refresh();
        drive(&mut engine, &store);
        engine.take_notices();

        store.fail_mutations.store(true, std::sync::atomic::Ordering::Relaxed);
        let (handle, _) = engine.shape_of(&TerritoryKey::Stored(TerritoryId::from(2))).unwrap();
        engine.handle_event(DrawEvent::Edited { handle, shape: square(1.0) });
        drive(&mut engine, &store);

        let notices = engine.take_notices();
        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].level, NoticeLevel::Error);
        assert!(notices[0].message.contains("Chinatown"));
        // The edited outline stays until some later refresh
        let (_, shape) = engine.shape_of(&TerritoryKey::Stored(TerritoryId::from(2))).unwrap();
        assert_eq!(shape, &square(1.0));
        assert_eq!(engine.rebuilds(), 1);
    }

    #[test]
    fn test_failed_delete_does_not_redraw_shape() {
        let store = crate::store::MemoryStore::with_sample_data();
        let mut engine = engine();
        engine.refresh();
        drive(&mut engine, &store);
        assert_eq!(engine.surface().len(), 3);

        store.fail_mutations.store(true, std::sync::atomic::Ordering::Relaxed);
        let key = TerritoryKey::Stored(TerritoryId::from(1));
        let (handle, _) = engine.shape_of(&key).unwrap();
        engine.handle_event(DrawEvent::Deleted { handle });
        drive(&mut engine, &store);

        let notices = engine.take_notices();
        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].level, NoticeLevel::Error);
        assert!(engine.shape_of(&key).is_none());
        assert_eq!(engine.surface().len(), 2);
        assert_unique_bindings(&engine);
    }

    #[test]
    fn test_refresh_during_delete_skips_deleted_territory() {
        let mut engine = engine();
        let handle = draw(&mut engine, square(0.0));
        let (provisional, body) = create_request(&engine.take_requests());
        engine.handle_event(DrawEvent::Deleted { handle });

        let stored = body.into_territory(TerritoryId::from(7), Utc::now());
        engine.apply_reply(StoreReply::Created { provisional, result: Ok(stored.clone()) });
        let requests = engine.take_requests();
        assert!(requests.contains(&StoreRequest::Delete { id: TerritoryId::from(7) }));
        let generation = requests
            .iter()
            .find_map(|r| match r {
                StoreRequest::List { generation } => Some(*generation),
                _ => None,
            })
            .unwrap();

        // The list lands before the delete reply
        let other = record(8, TerritoryStatus::Active, &square(5.0));
        engine.apply_reply(StoreReply::Listed { generation, result: Ok(vec![stored, other]) });
        assert!(engine.shape_of(&TerritoryKey::Stored(TerritoryId::from(7))).is_none());
        assert!(engine.shape_of(&TerritoryKey::Stored(TerritoryId::from(8))).is_some());

        engine.apply_reply(StoreReply::Deleted { id: TerritoryId::from(7), result: Ok(()) });
        assert!(engine.territory(&TerritoryId::from(7)).is_none());
        assert_unique_bindings(&engine);
    }

    #[test]
    fn test_stale_list_failure_is_not_reported() {
        let mut engine = engine();
        engine.refresh();
        engine.refresh();
        engine.take_requests();

        engine.apply_reply(StoreReply::Listed {
            generation: 2,
            result: Ok(vec![record(1, TerritoryStatus::Active, &square(0.0))]),
        });
        engine.apply_reply(StoreReply::Listed {
            generation: 1,
            result: Err(StoreError::Transport("connection reset".into())),
        });
        assert!(engine.take_notices().is_empty());
        assert_eq!(engine.territories().len(), 1);
    }
}
