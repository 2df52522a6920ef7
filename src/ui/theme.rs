//! Terminal colours for glyphs, tiles and log lines

use ratatui::style::{Color, Modifier, Style};

use crate::core::types::GlyphColor;
use crate::game::log::LogSeverity;
use crate::map::dungeon::Tile;

pub fn glyph_color(color: GlyphColor) -> Color {
    match color {
        GlyphColor::White => Color::White,
        GlyphColor::Gray => Color::Gray,
        GlyphColor::DarkGray => Color::DarkGray,
        GlyphColor::Red => Color::Red,
        GlyphColor::LightRed => Color::LightRed,
        GlyphColor::Green => Color::Green,
        GlyphColor::LightGreen => Color::LightGreen,
        GlyphColor::Yellow => Color::Yellow,
        GlyphColor::Blue => Color::Blue,
        GlyphColor::LightBlue => Color::LightBlue,
        GlyphColor::Magenta => Color::Magenta,
        GlyphColor::Cyan => Color::Cyan,
        GlyphColor::Brown => Color::Rgb(150, 100, 50),
        GlyphColor::Black => Color::Black,
    }
}

/// Style of a map tile; remembered tiles outside the FOV are dimmed
pub fn tile_style(tile: Tile, in_view: bool) -> Style {
    if !in_view {
        return Style::default().fg(Color::DarkGray);
    }
    let fg = match tile {
        Tile::Wall => Color::Gray,
        Tile::Floor => Color::Rgb(90, 90, 90),
        Tile::Door => Color::Rgb(150, 100, 50),
        Tile::StairsDown | Tile::StairsUp => Color::White,
    };
    let style = Style::default().fg(fg);
    match tile {
        Tile::StairsDown | Tile::StairsUp => style.add_modifier(Modifier::BOLD),
        _ => style,
    }
}

pub fn severity_style(severity: LogSeverity) -> Style {
    let fg = match severity {
        LogSeverity::Debug => Color::DarkGray,
        LogSeverity::Info => Color::White,
        LogSeverity::Success => Color::LightGreen,
        LogSeverity::Loot => Color::Yellow,
        LogSeverity::Combat => Color::LightRed,
        LogSeverity::Warning => Color::Rgb(255, 165, 0),
        LogSeverity::Danger => Color::Red,
        LogSeverity::System => Color::Cyan,
    };
    let style = Style::default().fg(fg);
    if severity == LogSeverity::Danger {
        style.add_modifier(Modifier::BOLD)
    } else {
        style
    }
}

/// Green above half, yellow above a quarter, red below
pub fn health_color(current: i32, maximum: i32) -> Color {
    if maximum <= 0 {
        return Color::DarkGray;
    }
    let ratio = current as f32 / maximum as f32;
    if ratio > 0.5 {
        Color::Green
    } else if ratio > 0.25 {
        Color::Yellow
    } else {
        Color::Red
    }
}

pub fn border_style(focused: bool) -> Style {
    if focused {
        Style::default().fg(Color::Cyan)
    } else {
        Style::default().fg(Color::DarkGray)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_thresholds() {
        assert_eq!(health_color(100, 100), Color::Green);
        assert_eq!(health_color(40, 100), Color::Yellow);
        assert_eq!(health_color(10, 100), Color::Red);
        assert_eq!(health_color(0, 0), Color::DarkGray);
    }

    #[test]
    fn test_remembered_tiles_are_dim() {
        assert_eq!(tile_style(Tile::Wall, false).fg, Some(Color::DarkGray));
        assert_eq!(tile_style(Tile::Wall, true).fg, Some(Color::Gray));
    }
}
