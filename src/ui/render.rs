//! Frame layout: map viewport, HUD sidebar, log panel and overlays

use std::collections::HashMap;

use ratatui::{
    layout::{Constraint, Direction as LayoutDirection, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Clear, Gauge, Paragraph, Wrap},
    Frame,
};

use crate::components::{Name, Renderable};
use crate::core::types::Position;
use crate::game::state::{GameMode, PlayerSnapshot};
use crate::game::world::WorldMode;
use crate::map::dungeon::DungeonMap;
use crate::ui::app::{App, Overlay, TradePage};
use crate::ui::input::menu_letter;
use crate::ui::theme;

const SIDEBAR_WIDTH: u16 = 30;
const LOG_HEIGHT: u16 = 9;

pub fn render(frame: &mut Frame, app: &App) {
    let area = frame.size();
    let rows = Layout::default()
        .direction(LayoutDirection::Vertical)
        .constraints([Constraint::Min(10), Constraint::Length(LOG_HEIGHT)])
        .split(area);
    let top = Layout::default()
        .direction(LayoutDirection::Horizontal)
        .constraints([Constraint::Min(20), Constraint::Length(SIDEBAR_WIDTH)])
        .split(rows[0]);

    render_map(frame, app, top[0]);
    render_sidebar(frame, app, top[1]);
    render_log(frame, app, rows[1]);

    if let Some(view) = app.game().dialogue() {
        let popup = centered_rect(60, 50, area);
        let mut lines = vec![
            Line::from(Span::styled(
                view.speaker.clone(),
                Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD),
            )),
            Line::from(""),
            Line::from(view.text.clone()),
            Line::from(""),
        ];
        for (i, choice) in view.choices.iter().enumerate() {
            lines.push(Line::from(format!("  {}) {}", menu_letter(i), choice.text)));
        }
        lines.push(Line::from(Span::styled("  Esc) Leave", Style::default().fg(Color::DarkGray))));
        render_popup(frame, popup, " Conversation ", lines);
    } else if app.game().trading_with().is_some() {
        render_trade(frame, app, area);
    } else {
        match app.overlay() {
            Overlay::None => {}
            Overlay::Help => render_popup(frame, centered_rect(50, 70, area), " Help ", help_lines()),
            Overlay::Inventory => render_inventory(frame, app, area),
            Overlay::Spells => render_spells(frame, app, area),
        }
    }

    match app.game().mode() {
        GameMode::Playing => {}
        GameMode::GameOver => render_banner(frame, area, "You have died.", Color::Red, app),
        GameMode::Victory => render_banner(frame, area, "You escaped the depths!", Color::LightGreen, app),
    }
}

/// Top-left corner of a viewport centred on `focus`, clamped to the map
fn camera_origin(focus: Position, map: &DungeonMap, width: i32, height: i32) -> Position {
    let clamp = |value: i32, view: i32, total: i32| (value - view / 2).clamp(0, (total - view).max(0));
    Position::new(clamp(focus.x, width, map.width), clamp(focus.y, height, map.height))
}

fn render_map(frame: &mut Frame, app: &App, area: Rect) {
    let game = app.game();
    let title = match game.world_mode() {
        WorldMode::Play => format!(" Depth {} ", game.levels().current_level()),
        WorldMode::Edit => " Edit mode ".to_string(),
    };
    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(theme::border_style(true))
        .title(title);
    let inner = block.inner(area);
    frame.render_widget(block, area);

    let (Some(map), Some(player_at)) = (game.map(), game.player_position()) else {
        frame.render_widget(Paragraph::new("No game in progress"), inner);
        return;
    };

    let width = inner.width as i32;
    let height = inner.height as i32;
    let origin = camera_origin(player_at, map, width, height);

    // Topmost renderable per visible tile
    let mut glyphs: HashMap<Position, Renderable> = HashMap::new();
    for (_, (pos, renderable)) in game.play_world().query::<(&Position, &Renderable)>().iter() {
        if !map.is_visible(*pos) {
            continue;
        }
        let keep = glyphs.get(pos).map_or(true, |r| renderable.layer >= r.layer);
        if keep {
            glyphs.insert(*pos, *renderable);
        }
    }

    let mut lines = Vec::with_capacity(height as usize);
    for dy in 0..height {
        let mut spans = Vec::with_capacity(width as usize);
        for dx in 0..width {
            let p = Position::new(origin.x + dx, origin.y + dy);
            if !map.in_bounds(p) {
                spans.push(Span::raw(" "));
                continue;
            }
            let visible = map.is_visible(p);
            let span = match glyphs.get(&p) {
                Some(r) if visible => {
                    Span::styled(r.glyph.to_string(), Style::default().fg(theme::glyph_color(r.fg)))
                }
                _ if visible || map.is_explored(p) => {
                    let tile = map.tile(p);
                    Span::styled(tile.glyph().to_string(), theme::tile_style(tile, visible))
                }
                _ => Span::raw(" "),
            };
            spans.push(span);
        }
        lines.push(Line::from(spans));
    }
    frame.render_widget(Paragraph::new(lines), inner);
}

fn render_sidebar(frame: &mut Frame, app: &App, area: Rect) {
    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(theme::border_style(false))
        .title(" Hero ");
    let inner = block.inner(area);
    frame.render_widget(block, area);

    let Some(stats) = app.game().player_snapshot() else {
        return;
    };
    let parts = Layout::default()
        .direction(LayoutDirection::Vertical)
        .constraints([Constraint::Length(1), Constraint::Length(1), Constraint::Min(0)])
        .split(inner);

    let hp_ratio = ratio(stats.health, stats.max_health);
    frame.render_widget(
        Gauge::default()
            .gauge_style(Style::default().fg(theme::health_color(stats.health, stats.max_health)))
            .ratio(hp_ratio)
            .label(format!("HP {}/{}", stats.health, stats.max_health)),
        parts[0],
    );
    frame.render_widget(
        Gauge::default()
            .gauge_style(Style::default().fg(Color::LightBlue))
            .ratio(ratio(stats.mana, stats.max_mana))
            .label(format!("MP {}/{}", stats.mana, stats.max_mana)),
        parts[1],
    );
    frame.render_widget(Paragraph::new(stat_lines(&stats, app)), parts[2]);
}

fn ratio(current: i32, maximum: i32) -> f64 {
    if maximum <= 0 {
        0.0
    } else {
        (current as f64 / maximum as f64).clamp(0.0, 1.0)
    }
}

fn stat_lines(stats: &PlayerSnapshot, app: &App) -> Vec<Line<'static>> {
    let label = Style::default().fg(Color::DarkGray);
    let row = |name: &str, value: String| {
        Line::from(vec![Span::styled(format!("{:<7}", name), label), Span::raw(value)])
    };
    let mut lines = vec![
        Line::from(""),
        row("ATK", stats.attack.to_string()),
        row("DEF", stats.defense.to_string()),
        row("SPD", stats.speed.to_string()),
        row("Level", stats.level.to_string()),
        row("XP", format!("{}/{}", stats.experience, stats.experience_to_next)),
        row("Depth", format!("{} ({} ft)", stats.depth, stats.depth_feet)),
        row("Gold", stats.gold.to_string()),
        row("Turn", app.game().turn().to_string()),
        row("Kills", app.game().kills().to_string()),
    ];
    if let Some(enemy) = app.game().nearest_visible_enemy() {
        let name = app
            .game()
            .play_world()
            .get::<&Name>(enemy)
            .map(|n| n.0.clone())
            .unwrap_or_else(|_| "something".into());
        lines.push(Line::from(""));
        lines.push(Line::from(Span::styled(
            format!("Nearby: {}", name),
            Style::default().fg(Color::LightRed),
        )));
    }
    lines.push(Line::from(""));
    lines.push(Line::from(Span::styled("? for help", label)));
    lines
}

fn render_log(frame: &mut Frame, app: &App, area: Rect) {
    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(theme::border_style(false))
        .title(" Log ");
    let rows = area.height.saturating_sub(2) as usize;
    let mut entries = app.game().log().recent(rows);
    entries.reverse();
    let lines: Vec<Line> = entries
        .into_iter()
        .map(|e| Line::from(Span::styled(e.message.clone(), theme::severity_style(e.severity))))
        .collect();
    frame.render_widget(Paragraph::new(lines).block(block).wrap(Wrap { trim: true }), area);
}

fn render_inventory(frame: &mut Frame, app: &App, area: Rect) {
    let entries = app.inventory_entries();
    let mut lines = Vec::new();
    if entries.is_empty() {
        lines.push(Line::from("Your pack is empty."));
    }
    for (i, entry) in entries.iter().enumerate() {
        let mut text = format!("{}) {} {}", menu_letter(i), entry.glyph, entry.name);
        if entry.count > 1 {
            text.push_str(&format!(" x{}", entry.count));
        }
        if entry.equipped {
            text.push_str(" (equipped)");
        }
        lines.push(Line::from(text));
    }
    render_popup(frame, centered_rect(50, 60, area), " Inventory ", lines);
}

fn render_spells(frame: &mut Frame, app: &App, area: Rect) {
    let spells = app.known_spells();
    let mut lines = Vec::new();
    if spells.is_empty() {
        lines.push(Line::from("You know no spells yet."));
    }
    for (i, spell) in spells.iter().enumerate() {
        lines.push(Line::from(format!(
            "{}) {} ({} MP) {}",
            menu_letter(i),
            spell.name,
            spell.mana_cost,
            spell.description
        )));
    }
    render_popup(frame, centered_rect(60, 60, area), " Spells ", lines);
}

fn render_trade(frame: &mut Frame, app: &App, area: Rect) {
    let mut lines = Vec::new();
    let title = match app.trade_page() {
        TradePage::Buy => {
            for (i, row) in app.shop_listing().iter().enumerate() {
                let stock = row.quantity.map_or("∞".to_string(), |q| q.to_string());
                let style = if row.available {
                    Style::default()
                } else {
                    Style::default().fg(Color::DarkGray)
                };
                lines.push(Line::from(Span::styled(
                    format!("{}) {:<20} {:>5}g  [{}]", menu_letter(i), row.item, row.price, stock),
                    style,
                )));
            }
            " Buy (Tab: sell) "
        }
        TradePage::Sell => {
            for (i, entry) in app.inventory_entries().iter().enumerate() {
                lines.push(Line::from(format!("{}) {} x{}", menu_letter(i), entry.name, entry.count)));
            }
            " Sell (Tab: buy) "
        }
    };
    let gold = app.game().player_snapshot().map_or(0, |s| s.gold);
    lines.push(Line::from(""));
    lines.push(Line::from(Span::styled(
        format!("Gold: {}   Esc to leave", gold),
        Style::default().fg(Color::Yellow),
    )));
    render_popup(frame, centered_rect(60, 60, area), title, lines);
}

fn help_lines() -> Vec<Line<'static>> {
    [
        "Move       hjkl yubn / arrows / numpad",
        "Wait       . or 5",
        "Pick up    g or ,",
        "Stairs     > down, < up",
        "Inventory  i",
        "Spells     c",
        "Search     s",
        "Disarm     d",
        "Edit mode  e",
        "Restart    r (after the run ends)",
        "Quit       q",
        "",
        "Walk into monsters to attack, into townsfolk to talk.",
    ]
    .into_iter()
    .map(Line::from)
    .collect()
}

fn render_banner(frame: &mut Frame, area: Rect, text: &str, color: Color, app: &App) {
    let popup = centered_rect(40, 20, area);
    let lines = vec![
        Line::from(Span::styled(
            text.to_string(),
            Style::default().fg(color).add_modifier(Modifier::BOLD),
        )),
        Line::from(format!(
            "Depth {}, {} kills, {} turns",
            app.game().levels().personal_best(),
            app.game().kills(),
            app.game().turn()
        )),
        Line::from("r to play again, q to quit"),
    ];
    render_popup(frame, popup, "", lines);
}

fn render_popup(frame: &mut Frame, area: Rect, title: &str, lines: Vec<Line>) {
    frame.render_widget(Clear, area);
    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(theme::border_style(true))
        .title(title.to_string());
    frame.render_widget(Paragraph::new(lines).block(block).wrap(Wrap { trim: false }), area);
}

/// Rectangle of `percent_x` by `percent_y` centred in `area`
fn centered_rect(percent_x: u16, percent_y: u16, area: Rect) -> Rect {
    let vertical = Layout::default()
        .direction(LayoutDirection::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(area);
    Layout::default()
        .direction(LayoutDirection::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(vertical[1])[1]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::GameConfig;
    use crate::game::state::{GameServices, GameStateManager};
    use ratatui::{backend::TestBackend, Terminal};

    #[test]
    fn test_camera_clamps_to_map_edges() {
        let map = DungeonMap::new(80, 40);
        assert_eq!(camera_origin(Position::new(2, 2), &map, 20, 10), Position::new(0, 0));
        assert_eq!(camera_origin(Position::new(79, 39), &map, 20, 10), Position::new(60, 30));
        assert_eq!(camera_origin(Position::new(5, 5), &map, 100, 50), Position::new(0, 0));
    }

    #[test]
    fn test_frame_shows_the_hero() {
        let mut game = GameStateManager::new(GameConfig::default(), GameServices::with_defaults().unwrap());
        game.new_game(7).unwrap();
        let app = App::new(game, 7);

        let mut terminal = Terminal::new(TestBackend::new(120, 40)).unwrap();
        terminal.draw(|f| render(f, &app)).unwrap();
        let buffer = terminal.backend().buffer().clone();
        let text: String = buffer.content().iter().map(|c| c.symbol()).collect();
        assert!(text.contains('@'));
        assert!(text.contains("HP 100/100"));
    }
}
