use ratatui::{
    Frame,
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph, Tabs, Wrap},
};
use ratatui_image::{Resize, StatefulImage, protocol::StatefulProtocol};
use std::collections::HashSet;

use super::app::{App, Focus, Tab};
use crate::backend::catalog::CatalogItem;
use crate::engine::filter::effective_rating;
use crate::engine::suggest::SuggestionKind;
use crate::engine::window::Windower;

pub const CARD_WIDTH: u16 = 30;

fn main_layout(area: Rect) -> [Rect; 5] {
    Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3), // header/tabs
            Constraint::Length(3), // search box
            Constraint::Length(1), // criteria
            Constraint::Min(6),    // grid
            Constraint::Length(3), // footer
        ])
        .areas(area)
}

fn content_block(title: &str) -> Block<'_> {
    Block::default()
        .borders(Borders::ALL)
        .title(title)
        .border_style(Style::default().fg(Color::White))
}

/// Where the card grid is drawn for a terminal of this size.
pub fn grid_area(area: Rect) -> Rect {
    content_block("").inner(main_layout(area)[3])
}

pub fn ui(f: &mut Frame, app: &mut App) {
    // A refresh with results on screen keeps the grid up.
    if app.session.view().is_loading && app.session.results().is_empty() {
        draw_loading_screen(f, app);
    } else {
        draw_main_ui(f, app);
    }
}

fn draw_loading_screen(f: &mut Frame, app: &App) {
    let area = f.area();

    let block = Block::default()
        .borders(Borders::ALL)
        .title("PinPack")
        .border_style(Style::default().fg(Color::Cyan));

    let inner = block.inner(area);
    f.render_widget(block, area);

    let center_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage(40),
            Constraint::Length(3),
            Constraint::Length(2),
            Constraint::Percentage(40),
        ])
        .split(inner);

    let spinner_frames = ["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"];
    let frame_idx = (std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0)
        / 100) as usize
        % spinner_frames.len();

    let loading_text = Line::from(vec![
        Span::styled(
            format!(" {} ", spinner_frames[frame_idx]),
            Style::default()
                .fg(Color::Cyan)
                .add_modifier(Modifier::BOLD),
        ),
        Span::styled(
            "Loading...",
            Style::default()
                .fg(Color::White)
                .add_modifier(Modifier::BOLD),
        ),
    ]);

    let loading_paragraph = Paragraph::new(loading_text).alignment(Alignment::Center);
    f.render_widget(loading_paragraph, center_layout[1]);

    let message = Paragraph::new(&*app.loading_message)
        .style(Style::default().fg(Color::DarkGray))
        .alignment(Alignment::Center);
    f.render_widget(message, center_layout[2]);
}

fn draw_main_ui(f: &mut Frame, app: &mut App) {
    let root = main_layout(f.area());

    draw_header(f, root[0], app);
    draw_search(f, root[1], app);
    draw_criteria(f, root[2], app);
    match app.tab {
        Tab::Catalog => draw_grid(f, root[3], app),
        Tab::Wishlist => draw_wishlist(f, root[3], app),
    }
    draw_footer(f, root[4], app);
}

fn draw_header(f: &mut Frame, area: Rect, app: &App) {
    let wishlist_title = format!("Wishlist ({})", app.session.wishlist().len());
    let titles = vec!["Catalog".to_string(), wishlist_title];
    let selected = match app.tab {
        Tab::Catalog => 0,
        Tab::Wishlist => 1,
    };

    let tabs = Tabs::new(titles)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .title("PinPack")
                .border_style(Style::default().fg(Color::Cyan)),
        )
        .select(selected)
        .style(Style::default().fg(Color::DarkGray))
        .highlight_style(
            Style::default()
                .fg(Color::Yellow)
                .add_modifier(Modifier::BOLD),
        );

    f.render_widget(tabs, area);
}

fn draw_search(f: &mut Frame, area: Rect, app: &App) {
    let focused = app.focus == Focus::Search;
    let mut spans = vec![
        Span::styled("🔍 ", Style::default().fg(Color::Cyan)),
        Span::raw(app.session.search_input()),
    ];
    if focused {
        spans.push(Span::styled("▏", Style::default().fg(Color::Yellow)));
    }
    if app.session.is_search_pending() {
        spans.push(Span::styled(" …", Style::default().fg(Color::DarkGray)));
    }

    let suggestions: Vec<String> = app
        .session
        .suggestions()
        .iter()
        .map(|s| {
            let icon = match s.kind {
                SuggestionKind::Location => "📍",
                SuggestionKind::Title => "🗺",
            };
            format!("{} {}", icon, s.text)
        })
        .collect();
    if focused && !suggestions.is_empty() {
        spans.push(Span::styled(
            format!("   ⇥ {}", suggestions.join(" · ")),
            Style::default().fg(Color::DarkGray),
        ));
    }

    let block = Block::default()
        .borders(Borders::ALL)
        .title("Search city, country or pack")
        .border_style(if focused {
            Style::default()
                .fg(Color::Yellow)
                .add_modifier(Modifier::BOLD)
        } else {
            Style::default().fg(Color::White)
        });
    f.render_widget(Paragraph::new(Line::from(spans)).block(block), area);
}

fn draw_criteria(f: &mut Frame, area: Rect, app: &App) {
    let criteria = app.session.criteria();
    let label = |key: &'static str, value: String| {
        vec![
            Span::styled(key, Style::default().fg(Color::Yellow)),
            Span::raw(format!(" {}  ", value)),
        ]
    };

    let mut spans = Vec::new();
    spans.extend(label("[c]ategory", criteria.category.to_string()));
    spans.extend(label("[s]tars", criteria.star_rating_floor.to_string()));
    spans.extend(label("[p]ins", criteria.pin_count_bucket.to_string()));
    spans.extend(label("[o]rder", criteria.sort_key.to_string()));
    spans.push(Span::styled(
        format!("{} packs", app.session.results().len()),
        Style::default().fg(Color::DarkGray),
    ));

    f.render_widget(Paragraph::new(Line::from(spans)), area);
}

/// Screen area of card `index`, clipped to `inner`. `None` when the card is
/// scrolled out of view or its column does not fit.
fn card_rect(inner: Rect, index: usize, windower: &Windower) -> Option<Rect> {
    let geometry = windower.geometry();
    let col = (index % geometry.column_count) as u16;
    let x = inner.x + col * CARD_WIDTH;
    if x + CARD_WIDTH > inner.x + inner.width {
        return None;
    }

    let top = windower.row_of(index) as f64 * windower.row_height() - windower.scroll_offset();
    let visible_top = top.max(0.0) as u16;
    let visible_bottom = (top + geometry.item_height).min(inner.height as f64).max(0.0) as u16;
    if visible_bottom <= visible_top {
        return None;
    }
    Some(Rect::new(
        x,
        inner.y + visible_top,
        CARD_WIDTH,
        visible_bottom - visible_top,
    ))
}

fn draw_grid(f: &mut Frame, area: Rect, app: &mut App) {
    let view = app.session.view();
    let windower = app.session.windower();

    let title = if view.is_loading {
        "Packs (refreshing...)"
    } else {
        "Packs"
    };
    let mut block = content_block(title);
    if windower.offset_top() > 0.0 {
        block = block.title_top(Line::from("▲ more").right_aligned());
    }
    if windower.offset_bottom() > 0.0 {
        block = block.title_bottom(Line::from("▼ more").right_aligned());
    }
    let inner = block.inner(area);
    f.render_widget(block, area);

    if let Some(error) = view.error {
        let text = vec![
            Line::from(Span::styled(
                "Couldn't load packs",
                Style::default().fg(Color::Red).add_modifier(Modifier::BOLD),
            )),
            Line::from(Span::styled(error.to_string(), Style::default().fg(Color::DarkGray))),
            Line::from(""),
            Line::from(vec![
                Span::styled("r", Style::default().fg(Color::Yellow)),
                Span::raw(": try again"),
            ]),
        ];
        let paragraph = Paragraph::new(text)
            .alignment(Alignment::Center)
            .wrap(Wrap { trim: true });
        f.render_widget(paragraph, inner);
        return;
    }

    if view.window.is_empty() {
        let empty = Paragraph::new("No packs match these filters")
            .alignment(Alignment::Center)
            .style(Style::default().fg(Color::DarkGray));
        f.render_widget(empty, inner);
        return;
    }

    for (offset, item) in view.visible_items.iter().enumerate() {
        let index = view.window.start_index + offset;
        let Some(card_area) = card_rect(inner, index, windower) else {
            continue;
        };
        draw_pack_card(
            f,
            card_area,
            item,
            index == app.selected,
            &view.wishlist_ids,
            app.image_states.get_mut(&item.id),
        );
    }
}

fn draw_pack_card(
    f: &mut Frame,
    area: Rect,
    item: &CatalogItem,
    selected: bool,
    wishlist: &HashSet<String>,
    image_state: Option<&mut StatefulProtocol>,
) {
    let border_style = if selected {
        Style::default()
            .fg(Color::Cyan)
            .add_modifier(Modifier::BOLD)
    } else {
        Style::default().fg(Color::DarkGray)
    };

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(border_style);

    let inner = block.inner(area);
    f.render_widget(block, area);

    if inner.height < 4 || inner.width < 5 {
        return;
    }

    // Layout: cover, title, location, stats
    let card_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Min(2),    // cover
            Constraint::Length(1), // title
            Constraint::Length(1), // location
            Constraint::Length(1), // rating / pins / price
        ])
        .split(inner);

    if let Some(state) = image_state {
        let image_widget = StatefulImage::new().resize(Resize::Scale(None));
        f.render_stateful_widget(image_widget, card_layout[0], state);
    } else {
        let placeholder = Paragraph::new(vec![
            Line::from(Span::styled("📍", Style::default().fg(Color::Magenta))),
            Line::from(Span::styled(
                "Loading...",
                Style::default().fg(Color::DarkGray),
            )),
        ])
        .alignment(Alignment::Center);
        f.render_widget(placeholder, card_layout[0]);
    }

    let width = inner.width.saturating_sub(2) as usize;
    let mut title = vec![];
    if wishlist.contains(&item.id) {
        title.push(Span::styled("♥ ", Style::default().fg(Color::Red)));
    }
    title.push(Span::styled(
        truncate_text(&item.title, width),
        Style::default()
            .fg(Color::White)
            .add_modifier(Modifier::BOLD),
    ));
    f.render_widget(Paragraph::new(Line::from(title)), card_layout[1]);

    let location = Paragraph::new(truncate_text(&item.location(), width))
        .style(Style::default().fg(Color::DarkGray));
    f.render_widget(location, card_layout[2]);

    let stats = Line::from(vec![
        Span::styled("★ ", Style::default().fg(Color::Yellow)),
        Span::raw(format!("{:.1} ", effective_rating(item))),
        Span::styled(format!("· {} pins ", item.pin_count), Style::default().fg(Color::Cyan)),
        Span::styled(format!("· ${:.2}", item.price), Style::default().fg(Color::Green)),
    ]);
    f.render_widget(Paragraph::new(stats), card_layout[3]);
}

fn draw_wishlist(f: &mut Frame, area: Rect, app: &App) {
    let block = content_block("Wishlist");
    let inner = block.inner(area);
    f.render_widget(block, area);

    let wishlist = app.session.wishlist();
    if wishlist.is_empty() {
        let empty = Paragraph::new("Press w on a pack to save it here")
            .alignment(Alignment::Center)
            .style(Style::default().fg(Color::DarkGray));
        f.render_widget(empty, inner);
        return;
    }

    let lines: Vec<Line> = wishlist
        .entries()
        .enumerate()
        .map(|(index, entry)| {
            let title = if entry.title.is_empty() {
                entry.id.as_str()
            } else {
                entry.title.as_str()
            };
            let selected = index == app.wishlist_selected;
            let line = Line::from(vec![
                Span::styled(
                    if selected { "▶ ♥ " } else { "  ♥ " },
                    Style::default().fg(Color::Red),
                ),
                Span::styled(
                    title.to_string(),
                    Style::default().add_modifier(Modifier::BOLD),
                ),
                Span::styled(
                    format!("  {}, {}  ${:.2}", entry.city, entry.country, entry.price),
                    Style::default().fg(Color::DarkGray),
                ),
            ]);
            if selected {
                line.style(Style::default().fg(Color::Cyan))
            } else {
                line
            }
        })
        .collect();

    // Keep the selected entry on screen.
    let skip = (app.wishlist_selected + 1).saturating_sub(inner.height as usize);
    f.render_widget(Paragraph::new(lines).scroll((skip as u16, 0)), inner);
}

fn draw_footer(f: &mut Frame, area: Rect, app: &App) {
    let key = |k: &'static str| Span::styled(k, Style::default().fg(Color::Yellow));
    let text = match &app.status {
        Some(status) => Line::from(Span::styled(status.clone(), Style::default().fg(Color::Magenta))),
        None => Line::from(vec![
            key("/"),
            Span::raw(": search  "),
            key("←↑↓→"),
            Span::raw(": move  "),
            key("PgUp/PgDn"),
            Span::raw(": page  "),
            key("w"),
            Span::raw(": wishlist  "),
            key("r"),
            Span::raw(": refresh  "),
            key("x"),
            Span::raw(": reset  "),
            key("Tab"),
            Span::raw(": switch tab  "),
            key("q"),
            Span::raw(": quit"),
        ]),
    };

    let p = Paragraph::new(text)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(Style::default().fg(Color::Cyan)),
        )
        .alignment(Alignment::Center);
    f.render_widget(p, area);
}

fn truncate_text(text: &str, max_len: usize) -> String {
    if text.chars().count() <= max_len {
        text.to_string()
    } else {
        format!(
            "{}...",
            text.chars()
                .take(max_len.saturating_sub(3))
                .collect::<String>()
        )
    }
}
