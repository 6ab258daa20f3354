use anyhow::{Context, Result};
use crossterm::event::{
    self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEvent, KeyEventKind,
    MouseButton, MouseEvent, MouseEventKind,
};
use crossterm::execute;
use ratatui::layout::Rect;
use ratatui::DefaultTerminal;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use turf_map::app::{App, Mode, TextField};
use turf_map::config::Config;
use turf_map::map::{MapRenderer, Viewport};
use turf_map::store::{HttpStore, MemoryStore, StoreWorker, TerritoryStore};
use turf_map::sync::{EngineSettings, SyncEngine};
use turf_map::territory::palette::Palette;
use turf_map::{data, logging, ui};

fn main() -> Result<()> {
    let config = Config::load().context("loading configuration")?;
    logging::init(&config.log)?;
    info!(offline = config.api.offline, api = %config.api.base_url, user = %config.session.user, "starting");

    let mut app = build_app(&config)?;

    // Initialize terminal
    let mut terminal = ratatui::init();
    terminal.clear()?;

    // Enable mouse capture
    execute!(std::io::stdout(), EnableMouseCapture)?;

    let result = run(&mut terminal, &mut app);

    // Disable mouse capture and restore terminal
    let _ = execute!(std::io::stdout(), DisableMouseCapture);
    ratatui::restore();

    info!("exiting");
    result
}

fn build_app(config: &Config) -> Result<App> {
    let store: Arc<dyn TerritoryStore> = if config.api.offline {
        Arc::new(MemoryStore::with_sample_data())
    } else {
        Arc::new(HttpStore::new(&config.api.base_url)?)
    };
    let worker = StoreWorker::new(store, config.worker.threads).context("starting store workers")?;

    let mut renderer = MapRenderer::new();
    if let Some(path) = &config.map.basemap {
        match data::load_basemap(path) {
            Ok(lines) => renderer.set_basemap(lines),
            Err(e) => warn!("basemap not loaded: {e:#}"),
        }
    }

    let engine = SyncEngine::new(
        renderer,
        EngineSettings {
            user: config.session.user.clone(),
            palette: Palette::new(config.territory.palette.clone()),
        },
    );
    let viewport = Viewport::new(config.map.center_lon, config.map.center_lat, config.map.zoom, 0, 0);
    Ok(App::new(engine, worker, viewport))
}

/// Handle mouse events for drawing, picking, panning and zooming
fn handle_mouse(app: &mut App, mouse: MouseEvent) {
    // Always track mouse position for cursor marker
    app.set_mouse_pos(mouse.column, mouse.row);

    match mouse.kind {
        // Scroll wheel for zooming towards mouse position
        MouseEventKind::ScrollUp => app.zoom_in_at(mouse.column, mouse.row),
        MouseEventKind::ScrollDown => app.zoom_out_at(mouse.column, mouse.row),
        // Horizontal scroll for panning (trackpad two-finger swipe)
        MouseEventKind::ScrollLeft => app.pan(-15, 0),
        MouseEventKind::ScrollRight => app.pan(15, 0),
        MouseEventKind::Down(MouseButton::Left) => app.click(mouse.column, mouse.row),
        MouseEventKind::Drag(MouseButton::Left) => app.drag(mouse.column, mouse.row),
        MouseEventKind::Up(MouseButton::Left) => app.end_drag(),
        // Right click closes a polygon
        MouseEventKind::Down(MouseButton::Right) => app.secondary_click(),
        _ => {}
    }
}

fn handle_key(app: &mut App, key: KeyEvent) {
    if matches!(app.mode, Mode::EditField { .. }) {
        match key.code {
            KeyCode::Enter => app.commit_text(),
            KeyCode::Esc => app.cancel(),
            KeyCode::Backspace => app.text_backspace(),
            KeyCode::Char(c) => app.text_input(c),
            _ => {}
        }
        return;
    }

    match key.code {
        KeyCode::Char('q') => app.quit(),
        KeyCode::Esc => app.cancel(),
        KeyCode::Enter => match app.mode {
            Mode::DrawPolygon { .. } => app.finish_polygon(),
            Mode::EditShape { .. } => app.commit_edit(),
            _ => {}
        },

        // Pan with hjkl or arrow keys
        KeyCode::Left | KeyCode::Char('h') => app.pan(-10, 0),
        KeyCode::Right | KeyCode::Char('l') => app.pan(10, 0),
        KeyCode::Up | KeyCode::Char('k') => app.pan(0, -6),
        KeyCode::Down | KeyCode::Char('j') => app.pan(0, 6),

        // Zoom
        KeyCode::Char('+') | KeyCode::Char('=') => app.zoom_in(),
        KeyCode::Char('-') | KeyCode::Char('_') => app.zoom_out(),

        // Drawing tools
        KeyCode::Char('p') => app.start_polygon(),
        KeyCode::Char('b') => app.start_rectangle(),
        KeyCode::Char('e') => app.start_edit(),
        KeyCode::Char('d') | KeyCode::Delete => app.delete_selected(),

        // Entity form
        KeyCode::Char('s') => app.cycle_status(),
        KeyCode::Char('t') => app.cycle_team(),
        KeyCode::Char('c') => app.cycle_color(),
        KeyCode::Char('n') => app.start_text_edit(TextField::Name),
        KeyCode::Char('i') => app.start_text_edit(TextField::Description),

        KeyCode::Tab => app.cycle_selection(),
        KeyCode::Char('T') => app.toggle_table(),
        KeyCode::Char('g') => app.refresh(),
        KeyCode::Char('f') => app.fit_to_territories(),
        KeyCode::Char('m') => app.toggle_basemap(),
        _ => {}
    }
}

fn run(terminal: &mut DefaultTerminal, app: &mut App) -> Result<()> {
    let size = terminal.size()?;
    app.resize(ui::map_area(Rect::new(0, 0, size.width, size.height)));
    app.start();

    // Main loop
    loop {
        terminal.draw(|frame| ui::render(frame, app))?;

        // Handle events with ~60fps target
        if event::poll(Duration::from_millis(16))? {
            match event::read()? {
                // Only handle key press events (not release)
                Event::Key(key) if key.kind == KeyEventKind::Press => handle_key(app, key),
                Event::Mouse(mouse) => handle_mouse(app, mouse),
                Event::Resize(width, height) => {
                    app.resize(ui::map_area(Rect::new(0, 0, width, height)));
                }
                _ => {}
            }
        }

        // Apply store replies and send queued requests
        app.pump();

        if app.should_quit {
            break;
        }
    }

    Ok(())
}
