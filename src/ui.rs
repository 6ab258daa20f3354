use crate::app::{App, Mode};
use crate::braille::BrailleCanvas;
use crate::map::spatial::centroid;
use crate::map::{DrawingSurface, MapLayers, MapRenderer};
use crate::sync::{NoticeLevel, SelectedTerritory};
use crate::territory::style::parse_hex_color;
use crate::territory::{TeamId, TerritoryKey, TerritoryStatus};
use chrono::{DateTime, Utc};
use ratatui::{
    buffer::Buffer,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Cell, Paragraph, Row, Table, Widget, Wrap},
    Frame,
};

const SIDE_PANEL_WIDTH: u16 = 40;

/// Map, side panel and status bar rectangles for a terminal area
fn split(area: Rect) -> (Rect, Rect, Rect) {
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Min(3),    // Map + panel
            Constraint::Length(1), // Status bar
        ])
        .split(area);
    let cols = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Min(10), Constraint::Length(SIDE_PANEL_WIDTH)])
        .split(rows[0]);
    (cols[0], cols[1], rows[1])
}

/// Inner map rectangle (inside the border) for a terminal of `area`
pub fn map_area(area: Rect) -> Rect {
    let (map, _, _) = split(area);
    map_block().inner(map)
}

fn map_block() -> Block<'static> {
    Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::DarkGray))
        .title(Span::styled(
            " Territories ",
            Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
        ))
}

/// Render the UI
pub fn render(frame: &mut Frame, app: &App) {
    let (map, panel, status) = split(frame.area());
    render_map(frame, app, map);
    if app.show_table {
        render_table(frame, app, panel);
    } else {
        render_details(frame, app, panel);
    }
    render_status_bar(frame, app, status);
}

fn render_map(frame: &mut Frame, app: &App, area: Rect) {
    let block = map_block();
    let inner = block.inner(area);
    frame.render_widget(block, area);

    let renderer = app.engine.surface();
    let mut layers = renderer.render(inner.width as usize, inner.height as usize, &app.viewport);
    if let Some((points, closed)) = app.draft() {
        MapRenderer::render_draft(&mut layers.draft, &points, closed, &app.viewport);
    }

    // Territory names at their centroids
    let labels = app
        .engine
        .bindings()
        .iter()
        .filter_map(|(handle, key)| {
            let name = app.engine.name_of(key)?;
            let (lon, lat) = centroid(&renderer.shape(handle)?.vertices())?;
            let (px, py) = app.viewport.project(lon, lat);
            let (cx, cy) = (px / 2, py / 4);
            let len = name.chars().count() as i32;
            let x = cx - len / 2;
            if x < 0 || cy < 0 || x + len > inner.width as i32 || cy >= inner.height as i32 {
                return None;
            }
            let selected = app.engine.selected() == Some(key);
            Some((x as u16, cy as u16, name.to_string(), selected))
        })
        .collect();

    let cursor_pos = app.mouse_pixel_pos().map(|(px, py)| ((px / 2) as u16, (py / 4) as u16));

    let map_widget = MapWidget {
        layers,
        labels,
        cursor_pos,
    };
    frame.render_widget(map_widget, inner);
}

/// Custom widget that renders braille layers with text labels overlaid
struct MapWidget {
    layers: MapLayers,
    labels: Vec<(u16, u16, String, bool)>,
    cursor_pos: Option<(u16, u16)>,
}

impl MapWidget {
    /// Render a braille canvas layer with a specific color
    fn render_layer(canvas: &BrailleCanvas, color: Color, area: Rect, buf: &mut Buffer) {
        for (col, row, ch) in canvas.glyphs() {
            if col >= area.width || row >= area.height {
                continue;
            }
            buf[(area.x + col, area.y + row)].set_char(ch).set_fg(color);
        }
    }
}

impl Widget for MapWidget {
    fn render(self, area: Rect, buf: &mut Buffer) {
        // Back to front: basemap, territories in paint order, draft
        Self::render_layer(&self.layers.basemap, Color::DarkGray, area, buf);
        for layer in &self.layers.territories {
            let color = Color::Rgb(layer.color.r, layer.color.g, layer.color.b);
            Self::render_layer(&layer.canvas, color, area, buf);
        }
        Self::render_layer(&self.layers.draft, Color::White, area, buf);

        for (x, y, text, selected) in &self.labels {
            let style = if *selected {
                Style::default().fg(Color::White).add_modifier(Modifier::BOLD)
            } else {
                Style::default().fg(Color::Gray)
            };
            for (i, ch) in text.chars().enumerate() {
                let px = area.x + x + i as u16;
                if px < area.x + area.width {
                    buf[(px, area.y + y)].set_char(ch).set_style(style);
                }
            }
        }

        if let Some((cx, cy)) = self.cursor_pos {
            if cx < area.width && cy < area.height {
                buf[(area.x + cx, area.y + cy)].set_char('╋').set_fg(Color::Red);
            }
        }
    }
}

fn status_color(status: TerritoryStatus) -> Color {
    match status {
        TerritoryStatus::Active => Color::Green,
        TerritoryStatus::Inactive => Color::DarkGray,
        TerritoryStatus::Completed => Color::Blue,
    }
}

fn swatch(color: &str) -> Span<'static> {
    let fg = parse_hex_color(color)
        .map(|c| Color::Rgb(c.r, c.g, c.b))
        .unwrap_or(Color::Reset);
    Span::styled("██ ", Style::default().fg(fg))
}

fn date(value: Option<DateTime<Utc>>) -> String {
    value
        .map(|d| d.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| "-".to_string())
}

fn team_label(app: &App, team: Option<&TeamId>) -> String {
    match team {
        Some(id) => app
            .engine
            .team_name(id)
            .map(str::to_string)
            .unwrap_or_else(|| format!("team {id}")),
        None => "Unassigned".to_string(),
    }
}

fn field(label: &'static str, value: impl Into<String>) -> Line<'static> {
    Line::from(vec![
        Span::styled(format!("{label:<11}"), Style::default().fg(Color::DarkGray)),
        Span::raw(value.into()),
    ])
}

fn render_details(frame: &mut Frame, app: &App, area: Rect) {
    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::DarkGray))
        .title(" Selected ");

    let mut lines: Vec<Line> = match app.engine.selected_territory() {
        None => vec![Line::styled(
            "Click a territory, or press p / b to draw one.",
            Style::default().fg(Color::DarkGray),
        )],
        Some(SelectedTerritory::Stored(t)) => {
            let drawn = app
                .engine
                .bindings()
                .handle_for(&TerritoryKey::Stored(t.id.clone()))
                .is_some();
            let mut lines = vec![
                Line::styled(t.name.clone(), Style::default().add_modifier(Modifier::BOLD)),
                field("Id", t.id.to_string()),
                Line::from(vec![
                    Span::styled(format!("{:<11}", "Status"), Style::default().fg(Color::DarkGray)),
                    Span::styled(t.status.label(), Style::default().fg(status_color(t.status))),
                ]),
                field("Team", team_label(app, t.team_id.as_ref())),
                Line::from(vec![
                    Span::styled(format!("{:<11}", "Color"), Style::default().fg(Color::DarkGray)),
                    swatch(&t.color),
                    Span::raw(t.color.clone()),
                ]),
                field("Assigned", date(t.assigned_date)),
                field("Completed", date(t.completed_date)),
                field("Created by", t.created_by.clone()),
                field("Created", date(t.created_at)),
            ];
            if !drawn {
                lines.push(Line::styled(
                    "Geometry could not be drawn",
                    Style::default().fg(Color::Yellow),
                ));
            }
            if let Some(description) = &t.description {
                lines.push(Line::raw(""));
                lines.push(Line::raw(description.clone()));
            }
            lines
        }
        Some(SelectedTerritory::Provisional { draft, failed }) => {
            let state = if failed {
                Span::styled("not saved", Style::default().fg(Color::Red))
            } else {
                Span::styled("saving…", Style::default().fg(Color::Yellow))
            };
            let status = draft.status.unwrap_or_default();
            vec![
                Line::styled(draft.name.clone(), Style::default().add_modifier(Modifier::BOLD)),
                Line::from(vec![
                    Span::styled(format!("{:<11}", "Id"), Style::default().fg(Color::DarkGray)),
                    state,
                ]),
                Line::from(vec![
                    Span::styled(format!("{:<11}", "Status"), Style::default().fg(Color::DarkGray)),
                    Span::styled(status.label(), Style::default().fg(status_color(status))),
                ]),
                field("Team", team_label(app, draft.team_id.as_ref())),
                Line::from(vec![
                    Span::styled(format!("{:<11}", "Color"), Style::default().fg(Color::DarkGray)),
                    swatch(&draft.color),
                    Span::raw(draft.color.clone()),
                ]),
                field("Created by", draft.created_by.clone()),
            ]
        }
    };

    if let Mode::EditField { field: f, buffer, .. } = &app.mode {
        lines.push(Line::raw(""));
        lines.push(Line::from(vec![
            Span::styled(format!("{}: ", f.label()), Style::default().fg(Color::Yellow)),
            Span::raw(buffer.clone()),
            Span::styled("▏", Style::default().fg(Color::Yellow)),
        ]));
    }

    lines.push(Line::raw(""));
    for help in [
        "p polygon  b rectangle  e edit  d delete",
        "s status  t team  c color  n name  i notes",
        "Tab next  T table  g reload  f fit  m base",
    ] {
        lines.push(Line::styled(help, Style::default().fg(Color::DarkGray)));
    }

    let paragraph = Paragraph::new(lines).block(block).wrap(Wrap { trim: false });
    frame.render_widget(paragraph, area);
}

fn render_table(frame: &mut Frame, app: &App, area: Rect) {
    let selected = app.engine.selected();
    let rows = app.engine.territories().iter().map(|t| {
        let key = TerritoryKey::Stored(t.id.clone());
        let drawn = app.engine.bindings().handle_for(&key).is_some();
        let mut style = Style::default();
        if selected == Some(&key) {
            style = style.add_modifier(Modifier::REVERSED);
        }
        Row::new(vec![
            Cell::from(Line::from(vec![swatch(&t.color), Span::raw(t.name.clone())])),
            Cell::from(Span::styled(t.status.label(), Style::default().fg(status_color(t.status)))),
            Cell::from(team_label(app, t.team_id.as_ref())),
            Cell::from(if drawn { "" } else { "!" }),
        ])
        .style(style)
    });

    let table = Table::new(
        rows,
        [
            Constraint::Min(14),
            Constraint::Length(9),
            Constraint::Length(10),
            Constraint::Length(1),
        ],
    )
    .header(Row::new(vec!["Name", "Status", "Team", ""]).style(Style::default().fg(Color::DarkGray)))
    .block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::DarkGray))
            .title(format!(" {} territories ", app.engine.territories().len())),
    );
    frame.render_widget(table, area);
}

fn render_status_bar(frame: &mut Frame, app: &App, area: Rect) {
    let mut spans = vec![
        Span::styled(
            format!(" {} ", app.mode.label()),
            Style::default().fg(Color::Black).bg(Color::Cyan),
        ),
        Span::styled(" Zoom: ", Style::default().fg(Color::DarkGray)),
        Span::styled(app.zoom_level(), Style::default().fg(Color::Yellow)),
        Span::styled(" | ", Style::default().fg(Color::DarkGray)),
        Span::styled(app.center_coords(), Style::default().fg(Color::Cyan)),
        Span::styled(format!(" ({})", app.scale()), Style::default().fg(Color::DarkGray)),
    ];
    let renderer = app.engine.surface();
    if renderer.has_basemap() {
        let (label, color) = if renderer.show_basemap {
            (" [M]ap", Color::Green)
        } else {
            (" [m]ap", Color::DarkGray)
        };
        spans.push(Span::styled(label, Style::default().fg(color)));
    }
    if app.is_syncing() {
        spans.push(Span::styled(" | syncing", Style::default().fg(Color::Yellow)));
    }
    let skipped = app.engine.skipped().len();
    if skipped > 0 {
        spans.push(Span::styled(
            format!(" | {skipped} not drawn"),
            Style::default().fg(Color::Yellow),
        ));
    }
    match &app.status {
        Some(notice) => {
            let color = match notice.level {
                NoticeLevel::Info => Color::Green,
                NoticeLevel::Error => Color::Red,
            };
            spans.push(Span::styled(" | ", Style::default().fg(Color::DarkGray)));
            spans.push(Span::styled(notice.message.clone(), Style::default().fg(color)));
        }
        None => spans.push(Span::styled(
            " | hjkl:pan +/-:zoom Esc:cancel q:quit",
            Style::default().fg(Color::DarkGray),
        )),
    }

    frame.render_widget(Paragraph::new(Line::from(spans)), area);
}
