use crate::map::spatial::{nearest_vertex, ShapeIndex};
use crate::map::{DrawingSurface, LayerHandle, MapRenderer, Viewport};
use crate::store::StoreWorker;
use crate::sync::{DrawEvent, Notice, NoticeLevel, SelectedTerritory, SyncEngine};
use crate::territory::codec::NativeShape;
use crate::territory::style::ShapeStyle;
use crate::territory::{LonLat, TeamId, TerritoryKey, TerritoryPatch, TerritoryStatus};
use chrono::Utc;
use ratatui::layout::Rect;
use std::time::Duration;
use tracing::debug;

/// Screen pixels within which a click lands on a vertex
const GRAB_RADIUS: f64 = 4.0;
/// Pick grid cell size in degrees (roughly 1 km)
const PICK_CELL_DEGREES: f64 = 0.01;
const DRAFT_COLOR: &str = "#ffffff";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextField {
    Name,
    Description,
}

impl TextField {
    pub fn label(self) -> &'static str {
        match self {
            TextField::Name => "Name",
            TextField::Description => "Description",
        }
    }
}

/// What a held mouse button is moving while editing a shape
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Grab {
    Vertex(usize),
    Body { last: LonLat },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Mode {
    Browse,
    DrawPolygon { vertices: Vec<LonLat> },
    DrawRectangle { anchor: Option<LonLat> },
    /// `rebuilds` is the engine rebuild count `handle` was valid for
    EditShape {
        key: TerritoryKey,
        handle: LayerHandle,
        rebuilds: u64,
        shape: NativeShape,
        grab: Option<Grab>,
    },
    EditField { key: TerritoryKey, field: TextField, buffer: String },
}

impl Mode {
    pub fn label(&self) -> &'static str {
        match self {
            Mode::Browse => "BROWSE",
            Mode::DrawPolygon { .. } => "POLYGON",
            Mode::DrawRectangle { .. } => "RECTANGLE",
            Mode::EditShape { .. } => "EDIT",
            Mode::EditField { .. } => "FIELD",
        }
    }
}

/// Snapshot of the selected territory's editable fields
struct Fields {
    status: TerritoryStatus,
    team_id: Option<TeamId>,
    color: String,
    name: String,
    description: Option<String>,
}

/// Application state
pub struct App {
    pub viewport: Viewport,
    pub engine: SyncEngine<MapRenderer>,
    worker: StoreWorker,
    /// Requests submitted whose reply has not been applied yet
    outstanding: usize,
    pub mode: Mode,
    pub should_quit: bool,
    /// Last mouse position for drag tracking
    pub last_mouse: Option<(u16, u16)>,
    /// Current mouse position for cursor marker
    pub mouse_pos: Option<(u16, u16)>,
    /// Inner map area in terminal cells
    pub map_area: Rect,
    hit_index: ShapeIndex,
    hit_revision: Option<u64>,
    pub status: Option<Notice>,
    /// Side panel shows the territory table instead of the details
    pub show_table: bool,
    fitted: bool,
}

impl App {
    pub fn new(engine: SyncEngine<MapRenderer>, worker: StoreWorker, viewport: Viewport) -> Self {
        Self {
            viewport,
            engine,
            worker,
            outstanding: 0,
            mode: Mode::Browse,
            should_quit: false,
            last_mouse: None,
            mouse_pos: None,
            map_area: Rect::default(),
            hit_index: ShapeIndex::new(PICK_CELL_DEGREES),
            hit_revision: None,
            status: None,
            show_table: false,
            fitted: false,
        }
    }

    /// Mount the map: fetch teams and the territory list
    pub fn start(&mut self) {
        self.engine.load_teams();
        self.engine.refresh();
        self.flush();
    }

    /// Update viewport size when the map area changes
    pub fn resize(&mut self, map_area: Rect) {
        // Braille gives 2x4 resolution per character
        self.map_area = map_area;
        self.viewport.width = map_area.width as usize * 2;
        self.viewport.height = map_area.height as usize * 4;
    }

    // ------------------------------------------------------------------
    // Store plumbing
    // ------------------------------------------------------------------

    /// Apply every reply that has arrived, then send what the engine queued
    pub fn pump(&mut self) {
        let replies = self.worker.drain();
        self.outstanding = self.outstanding.saturating_sub(replies.len());
        for reply in replies {
            self.engine.apply_reply(reply);
        }
        self.flush();
    }

    /// Block for one reply. Returns false on timeout.
    pub fn pump_wait(&mut self, timeout: Duration) -> bool {
        match self.worker.wait(timeout) {
            Some(reply) => {
                self.outstanding = self.outstanding.saturating_sub(1);
                self.engine.apply_reply(reply);
                self.pump();
                true
            }
            None => false,
        }
    }

    pub fn is_syncing(&self) -> bool {
        self.outstanding > 0
    }

    fn flush(&mut self) {
        for request in self.engine.take_requests() {
            self.outstanding += 1;
            self.worker.submit(request);
        }
        if let Some(notice) = self.engine.take_notices().pop() {
            self.status = Some(notice);
        }
        self.rebase_edit();

        if !self.fitted && self.engine.rebuilds() > 0 {
            self.fitted = true;
            self.fit_to_territories();
        }
    }

    /// Keep an in-progress shape edit pointing at the right handle
    fn rebase_edit(&mut self) {
        let rebuilds = self.engine.rebuilds();
        let bindings = self.engine.bindings();
        let lost = match &mut self.mode {
            Mode::EditShape { key, handle, rebuilds: seen, .. } => {
                if *seen == rebuilds {
                    // A create reply may have swapped provisional for stored
                    if let Some(current) = bindings.resolve(*handle) {
                        *key = current.clone();
                    }
                    false
                } else if let Some(h) = bindings.handle_for(key) {
                    *handle = h;
                    *seen = rebuilds;
                    false
                } else {
                    true
                }
            }
            Mode::EditField { key, .. } => match key {
                TerritoryKey::Stored(id) => self.engine.territory(id).is_none(),
                TerritoryKey::Provisional(_) => bindings.handle_for(key).is_none(),
            },
            _ => false,
        };
        if lost {
            self.mode = Mode::Browse;
            self.notify(NoticeLevel::Error, "The territory being edited is gone; edit discarded");
        }
    }

    fn notify(&mut self, level: NoticeLevel, message: impl Into<String>) {
        self.status = Some(Notice {
            level,
            message: message.into(),
        });
    }

    pub fn refresh(&mut self) {
        self.engine.refresh();
        self.flush();
    }

    // ------------------------------------------------------------------
    // Viewport
    // ------------------------------------------------------------------

    /// Pan the map
    pub fn pan(&mut self, dx: i32, dy: i32) {
        self.viewport.pan(dx, dy);
    }

    pub fn zoom_in(&mut self) {
        self.viewport.zoom_in();
    }

    pub fn zoom_out(&mut self) {
        self.viewport.zoom_out();
    }

    /// Zoom in towards a screen position (terminal column/row)
    pub fn zoom_in_at(&mut self, col: u16, row: u16) {
        if let Some((px, py)) = self.screen_to_pixel(col, row) {
            self.viewport.zoom_in_at(px, py);
        }
    }

    /// Zoom out from a screen position (terminal column/row)
    pub fn zoom_out_at(&mut self, col: u16, row: u16) {
        if let Some((px, py)) = self.screen_to_pixel(col, row) {
            self.viewport.zoom_out_at(px, py);
        }
    }

    /// Frame every drawn territory
    pub fn fit_to_territories(&mut self) {
        if let Some(bounds) = self.engine.surface().bounds() {
            self.viewport.fit_bounds(bounds);
        }
    }

    pub fn toggle_basemap(&mut self) {
        let renderer = self.engine.surface_mut();
        renderer.show_basemap = !renderer.show_basemap;
    }

    pub fn toggle_table(&mut self) {
        self.show_table = !self.show_table;
    }

    /// Request quit
    pub fn quit(&mut self) {
        self.should_quit = true;
    }

    /// Get current zoom level as a string
    pub fn zoom_level(&self) -> String {
        format!("{:.0}x", self.viewport.zoom)
    }

    /// Get current center coordinates as a string
    pub fn center_coords(&self) -> String {
        format!(
            "{:.4}°{}, {:.4}°{}",
            self.viewport.center_lat.abs(),
            if self.viewport.center_lat >= 0.0 { "N" } else { "S" },
            self.viewport.center_lon.abs(),
            if self.viewport.center_lon >= 0.0 { "E" } else { "W" }
        )
    }

    /// Ground distance per braille dot at the center, as a label
    pub fn scale(&self) -> String {
        let (_, dlat) = self.viewport.degrees_per_pixel();
        let meters = dlat * 111_320.0;
        if meters >= 1000.0 {
            format!("{:.1} km/dot", meters / 1000.0)
        } else {
            format!("{meters:.0} m/dot")
        }
    }

    // ------------------------------------------------------------------
    // Mouse
    // ------------------------------------------------------------------

    /// Terminal cell to braille pixel, if inside the map
    fn screen_to_pixel(&self, col: u16, row: u16) -> Option<(i32, i32)> {
        let area = self.map_area;
        if col < area.x || row < area.y || col >= area.x + area.width || row >= area.y + area.height {
            return None;
        }
        Some((((col - area.x) as i32) * 2, ((row - area.y) as i32) * 4))
    }

    fn screen_to_lonlat(&self, col: u16, row: u16) -> Option<LonLat> {
        self.screen_to_pixel(col, row)
            .map(|(px, py)| self.viewport.unproject(px, py))
    }

    /// Update mouse cursor position
    pub fn set_mouse_pos(&mut self, col: u16, row: u16) {
        self.mouse_pos = Some((col, row));
    }

    /// Mouse position in braille pixel coordinates (for the cursor marker)
    pub fn mouse_pixel_pos(&self) -> Option<(i32, i32)> {
        self.mouse_pos
            .and_then(|(col, row)| self.screen_to_pixel(col, row))
    }

    /// Left button pressed
    pub fn click(&mut self, col: u16, row: u16) {
        let Some(point) = self.screen_to_lonlat(col, row) else {
            return;
        };
        let Some(pixel) = self.screen_to_pixel(col, row) else {
            return;
        };

        match &self.mode {
            Mode::Browse => {
                self.select_at(point);
                self.last_mouse = Some((col, row));
            }
            Mode::DrawPolygon { vertices } => {
                let closes = vertices.len() >= 3
                    && nearest_vertex(&self.project(&vertices[..1]), pixel, GRAB_RADIUS).is_some();
                if closes {
                    self.finish_polygon();
                } else if let Mode::DrawPolygon { vertices } = &mut self.mode {
                    vertices.push(point);
                }
            }
            Mode::DrawRectangle { anchor: None } => {
                self.mode = Mode::DrawRectangle { anchor: Some(point) };
            }
            Mode::DrawRectangle { anchor: Some(anchor) } => {
                let shape = NativeShape::rectangle(*anchor, point);
                self.mode = Mode::Browse;
                self.create(shape);
            }
            Mode::EditShape { shape, .. } => {
                let vertex = nearest_vertex(&self.project(&shape.vertices()), pixel, GRAB_RADIUS);
                let grab = match vertex {
                    Some(i) => Some(Grab::Vertex(i)),
                    None if ShapeIndex::build(std::iter::once((LayerHandle(0), shape)), PICK_CELL_DEGREES)
                        .pick(point.0, point.1)
                        .is_some() =>
                    {
                        Some(Grab::Body { last: point })
                    }
                    None => None,
                };
                if grab.is_none() {
                    self.last_mouse = Some((col, row));
                }
                if let Mode::EditShape { grab: slot, .. } = &mut self.mode {
                    *slot = grab;
                }
            }
            Mode::EditField { .. } => {}
        }
    }

    /// Right button: finish a polygon
    pub fn secondary_click(&mut self) {
        if matches!(self.mode, Mode::DrawPolygon { .. }) {
            self.finish_polygon();
        }
    }

    /// Mouse moved with the left button held
    pub fn drag(&mut self, col: u16, row: u16) {
        let point = self.screen_to_lonlat(col, row);
        if let (Some(point), Mode::EditShape { shape, grab: Some(grab), .. }) = (point, &mut self.mode) {
            match grab {
                Grab::Vertex(i) => {
                    shape.move_vertex(*i, point);
                    // Rectangle corners are renumbered after a move
                    if let Some(j) = shape.vertices().iter().position(|v| *v == point) {
                        *i = j;
                    }
                }
                Grab::Body { last } => {
                    shape.translate(point.0 - last.0, point.1 - last.1);
                    *last = point;
                }
            }
            return;
        }
        self.handle_drag(col, row);
    }

    /// Pan by the mouse delta since the last drag event
    fn handle_drag(&mut self, x: u16, y: u16) {
        if let Some((last_x, last_y)) = self.last_mouse {
            let dx = (last_x as i32 - x as i32) * 2;
            let dy = (last_y as i32 - y as i32) * 4;
            self.pan(dx, dy);
        }
        self.last_mouse = Some((x, y));
    }

    /// Reset drag state when mouse button released
    pub fn end_drag(&mut self) {
        self.last_mouse = None;
        if let Mode::EditShape { grab, .. } = &mut self.mode {
            *grab = None;
        }
    }

    fn project(&self, points: &[LonLat]) -> Vec<(i32, i32)> {
        points
            .iter()
            .map(|&(lon, lat)| self.viewport.project(lon, lat))
            .collect()
    }

    fn pick(&mut self, (lon, lat): LonLat) -> Option<LayerHandle> {
        let revision = self.engine.surface().revision();
        if self.hit_revision != Some(revision) {
            let renderer = self.engine.surface();
            self.hit_index = ShapeIndex::build(
                renderer.paint_order().into_iter().map(|(h, layer)| (h, &layer.shape)),
                PICK_CELL_DEGREES,
            );
            self.hit_revision = Some(revision);
        }
        self.hit_index.pick(lon, lat)
    }

    fn select_at(&mut self, point: LonLat) {
        let key = self
            .pick(point)
            .and_then(|h| self.engine.bindings().resolve(h).cloned());
        self.engine.select(key);
    }

    // ------------------------------------------------------------------
    // Drawing tools
    // ------------------------------------------------------------------

    pub fn start_polygon(&mut self) {
        self.mode = Mode::DrawPolygon { vertices: Vec::new() };
    }

    pub fn start_rectangle(&mut self) {
        self.mode = Mode::DrawRectangle { anchor: None };
    }

    /// Esc: leave the current tool, or drop the selection
    pub fn cancel(&mut self) {
        if matches!(self.mode, Mode::Browse) {
            self.engine.select(None);
        }
        self.mode = Mode::Browse;
    }

    pub fn finish_polygon(&mut self) {
        let Mode::DrawPolygon { vertices } = std::mem::replace(&mut self.mode, Mode::Browse) else {
            return;
        };
        if vertices.len() < 3 {
            self.notify(NoticeLevel::Error, "A territory needs at least 3 points");
            return;
        }
        self.create(NativeShape::Polygon(vertices));
    }

    fn create(&mut self, shape: NativeShape) {
        let handle = self
            .engine
            .surface_mut()
            .add_shape(shape.clone(), ShapeStyle::draft(DRAFT_COLOR));
        self.engine.handle_event(DrawEvent::Created { handle, shape });
        if let Some(key) = self.engine.bindings().resolve(handle).cloned() {
            self.engine.select(Some(key));
        }
        self.flush();
    }

    /// Start reshaping the selected territory
    pub fn start_edit(&mut self) {
        let Some(key) = self.engine.selected().cloned() else {
            return;
        };
        match self.engine.shape_of(&key) {
            Some((handle, shape)) => {
                let shape = shape.clone();
                self.mode = Mode::EditShape {
                    key,
                    handle,
                    rebuilds: self.engine.rebuilds(),
                    shape,
                    grab: None,
                };
            }
            None => self.notify(NoticeLevel::Error, "This territory has no shape on the map"),
        }
    }

    pub fn commit_edit(&mut self) {
        let Mode::EditShape { handle, rebuilds, shape, .. } = std::mem::replace(&mut self.mode, Mode::Browse) else {
            return;
        };
        if rebuilds != self.engine.rebuilds() {
            self.notify(NoticeLevel::Error, "Territories reloaded while editing; edit discarded");
            return;
        }
        self.engine.handle_event(DrawEvent::Edited { handle, shape });
        self.flush();
    }

    pub fn delete_selected(&mut self) {
        let Some(key) = self.engine.selected().cloned() else {
            return;
        };
        match self.engine.shape_of(&key).map(|(h, _)| h) {
            Some(handle) => {
                self.engine.handle_event(DrawEvent::Deleted { handle });
                self.flush();
            }
            None => self.notify(NoticeLevel::Error, "This territory has no shape on the map"),
        }
    }

    /// Outline to paint over the map: the tool's draft or the shape being edited
    pub fn draft(&self) -> Option<(Vec<LonLat>, bool)> {
        let cursor = self
            .mouse_pos
            .and_then(|(col, row)| self.screen_to_lonlat(col, row));
        match &self.mode {
            Mode::DrawPolygon { vertices } if !vertices.is_empty() => {
                let mut points = vertices.clone();
                points.extend(cursor);
                Some((points, false))
            }
            Mode::DrawRectangle { anchor: Some(anchor) } => {
                cursor.map(|c| (NativeShape::rectangle(*anchor, c).vertices(), true))
            }
            Mode::EditShape { shape, .. } => Some((shape.vertices(), true)),
            _ => None,
        }
    }

    // ------------------------------------------------------------------
    // Entity form
    // ------------------------------------------------------------------

    fn selected_fields(&self) -> Option<(TerritoryKey, Fields)> {
        let key = self.engine.selected()?.clone();
        let fields = match self.engine.selected_territory()? {
            SelectedTerritory::Stored(t) => Fields {
                status: t.status,
                team_id: t.team_id.clone(),
                color: t.color.clone(),
                name: t.name.clone(),
                description: t.description.clone(),
            },
            SelectedTerritory::Provisional { draft, .. } => Fields {
                status: draft.status.unwrap_or_default(),
                team_id: draft.team_id.clone(),
                color: draft.color.clone(),
                name: draft.name.clone(),
                description: draft.description.clone(),
            },
        };
        Some((key, fields))
    }

    fn update_selected(&mut self, patch: impl FnOnce(&Fields) -> TerritoryPatch) {
        if let Some((key, fields)) = self.selected_fields() {
            let patch = patch(&fields);
            self.engine.update_fields(&key, patch);
            self.flush();
        }
    }

    /// Active → Inactive → Completed → Active; completion is dated
    pub fn cycle_status(&mut self) {
        self.update_selected(|f| {
            let next = f.status.cycle();
            let completed_date = if next == TerritoryStatus::Completed {
                Some(Some(Utc::now()))
            } else if f.status == TerritoryStatus::Completed {
                Some(None)
            } else {
                None
            };
            TerritoryPatch {
                status: Some(next),
                completed_date,
                ..TerritoryPatch::default()
            }
        });
    }

    /// Next team in the directory, then unassigned
    pub fn cycle_team(&mut self) {
        let teams = self.engine.teams().clone();
        if teams.is_empty() {
            self.notify(NoticeLevel::Info, "No teams loaded");
            return;
        }
        self.update_selected(|f| {
            let next = teams.next_after(f.team_id.as_ref());
            let assigned = next.as_ref().map(|_| Utc::now());
            TerritoryPatch {
                team_id: Some(next),
                assigned_date: Some(assigned),
                ..TerritoryPatch::default()
            }
        });
    }

    pub fn cycle_color(&mut self) {
        let palette = self.engine.palette().clone();
        self.update_selected(|f| TerritoryPatch {
            color: Some(palette.next_after(&f.color)),
            ..TerritoryPatch::default()
        });
    }

    pub fn start_text_edit(&mut self, field: TextField) {
        if let Some((key, fields)) = self.selected_fields() {
            let buffer = match field {
                TextField::Name => fields.name,
                TextField::Description => fields.description.unwrap_or_default(),
            };
            self.mode = Mode::EditField { key, field, buffer };
        }
    }

    pub fn text_input(&mut self, c: char) {
        if let Mode::EditField { buffer, .. } = &mut self.mode {
            buffer.push(c);
        }
    }

    pub fn text_backspace(&mut self) {
        if let Mode::EditField { buffer, .. } = &mut self.mode {
            buffer.pop();
        }
    }

    pub fn commit_text(&mut self) {
        let Mode::EditField { key, field, buffer } = std::mem::replace(&mut self.mode, Mode::Browse) else {
            return;
        };
        let text = buffer.trim().to_string();
        let patch = match field {
            TextField::Name if text.is_empty() => {
                self.notify(NoticeLevel::Error, "Name cannot be empty");
                return;
            }
            TextField::Name => TerritoryPatch {
                name: Some(text),
                ..TerritoryPatch::default()
            },
            TextField::Description => TerritoryPatch {
                description: Some((!text.is_empty()).then_some(text)),
                ..TerritoryPatch::default()
            },
        };
        self.engine.update_fields(&key, patch);
        self.flush();
    }

    /// Tab: step through the list, centering on the shape if it has one
    pub fn cycle_selection(&mut self) {
        let keys: Vec<TerritoryKey> = self
            .engine
            .territories()
            .iter()
            .map(|t| TerritoryKey::Stored(t.id.clone()))
            .collect();
        if keys.is_empty() {
            return;
        }
        let next = match self.engine.selected().and_then(|k| keys.iter().position(|c| c == k)) {
            Some(i) => (i + 1) % keys.len(),
            None => 0,
        };
        let key = keys[next].clone();
        if let Some((_, shape)) = self.engine.shape_of(&key) {
            let (min_lon, min_lat, max_lon, max_lat) = shape.bounds();
            self.viewport.center_lon = (min_lon + max_lon) / 2.0;
            self.viewport.center_lat = (min_lat + max_lat) / 2.0;
        }
        debug!(%key, "selection cycled");
        self.engine.select(Some(key));
    }
}
