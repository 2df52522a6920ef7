//! Key bindings
//!
//! Movement accepts vi-keys, arrows and the numpad. While a menu is open
//! letters pick entries instead, so the two contexts are mapped separately.

use crossterm::event::{KeyCode, KeyEvent, KeyEventKind, KeyModifiers};

use crate::core::types::Direction;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyContext {
    Map,
    Menu,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Move(Direction),
    Wait,
    PickUp,
    Descend,
    Ascend,
    Search,
    Disarm,
    Inventory,
    Spells,
    Help,
    ToggleEditMode,
    Restart,
    /// Menu entry by index
    Select(usize),
    /// Switch between the buy and sell pages of a shop
    NextTab,
    Back,
    Quit,
}

pub fn map_key(key: KeyEvent, context: KeyContext) -> Option<Command> {
    if key.kind != KeyEventKind::Press {
        return None;
    }
    if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
        return Some(Command::Quit);
    }
    match context {
        KeyContext::Map => map_context(key.code),
        KeyContext::Menu => menu_context(key.code),
    }
}

fn map_context(code: KeyCode) -> Option<Command> {
    use Direction::*;
    let command = match code {
        KeyCode::Up | KeyCode::Char('k') | KeyCode::Char('8') => Command::Move(North),
        KeyCode::Down | KeyCode::Char('j') | KeyCode::Char('2') => Command::Move(South),
        KeyCode::Left | KeyCode::Char('h') | KeyCode::Char('4') => Command::Move(West),
        KeyCode::Right | KeyCode::Char('l') | KeyCode::Char('6') => Command::Move(East),
        KeyCode::Char('y') | KeyCode::Char('7') | KeyCode::Home => Command::Move(NorthWest),
        KeyCode::Char('u') | KeyCode::Char('9') | KeyCode::PageUp => Command::Move(NorthEast),
        KeyCode::Char('b') | KeyCode::Char('1') | KeyCode::End => Command::Move(SouthWest),
        KeyCode::Char('n') | KeyCode::Char('3') | KeyCode::PageDown => Command::Move(SouthEast),
        KeyCode::Char('.') | KeyCode::Char('5') => Command::Wait,
        KeyCode::Char('g') | KeyCode::Char(',') => Command::PickUp,
        KeyCode::Char('>') => Command::Descend,
        KeyCode::Char('<') => Command::Ascend,
        KeyCode::Char('s') => Command::Search,
        KeyCode::Char('d') => Command::Disarm,
        KeyCode::Char('i') => Command::Inventory,
        KeyCode::Char('c') => Command::Spells,
        KeyCode::Char('?') => Command::Help,
        KeyCode::Char('e') => Command::ToggleEditMode,
        KeyCode::Char('r') => Command::Restart,
        KeyCode::Char('q') => Command::Quit,
        KeyCode::Esc => Command::Back,
        _ => return None,
    };
    Some(command)
}

fn menu_context(code: KeyCode) -> Option<Command> {
    match code {
        KeyCode::Esc => Some(Command::Back),
        KeyCode::Tab => Some(Command::NextTab),
        KeyCode::Char(c) if c.is_ascii_lowercase() => Some(Command::Select((c as u8 - b'a') as usize)),
        KeyCode::Char(c) if c.is_ascii_digit() && c != '0' => Some(Command::Select((c as u8 - b'1') as usize)),
        _ => None,
    }
}

/// Letter shown next to menu entry `index`
pub fn menu_letter(index: usize) -> char {
    (b'a' + (index % 26) as u8) as char
}

#[cfg(test)]
mod tests {
    use super::*;

    fn press(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    #[test]
    fn test_movement_keys_agree() {
        for code in [KeyCode::Char('k'), KeyCode::Up, KeyCode::Char('8')] {
            assert_eq!(map_key(press(code), KeyContext::Map), Some(Command::Move(Direction::North)));
        }
        assert_eq!(
            map_key(press(KeyCode::Char('n')), KeyContext::Map),
            Some(Command::Move(Direction::SouthEast))
        );
    }

    #[test]
    fn test_menu_letters_select() {
        assert_eq!(map_key(press(KeyCode::Char('a')), KeyContext::Menu), Some(Command::Select(0)));
        assert_eq!(map_key(press(KeyCode::Char('c')), KeyContext::Menu), Some(Command::Select(2)));
        assert_eq!(map_key(press(KeyCode::Char('1')), KeyContext::Menu), Some(Command::Select(0)));
        assert_eq!(map_key(press(KeyCode::Esc), KeyContext::Menu), Some(Command::Back));
        assert_eq!(menu_letter(2), 'c');
    }

    #[test]
    fn test_ctrl_c_always_quits() {
        let key = KeyEvent::new(KeyCode::Char('c'), KeyModifiers::CONTROL);
        assert_eq!(map_key(key, KeyContext::Menu), Some(Command::Quit));
        assert_eq!(map_key(press(KeyCode::Char('c')), KeyContext::Map), Some(Command::Spells));
    }
}
