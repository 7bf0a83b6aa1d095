//! Physical input on the local desktop through enigo.

use enigo::{Axis, Button, Coordinate, Direction, Enigo, Key, Keyboard, Mouse};

use crate::errors::{GuiPilotError, GuiPilotResult};
use crate::executor::operations::UiOperation;

fn input_err(what: &str, e: impl std::fmt::Debug) -> GuiPilotError {
    GuiPilotError::Executor(format!("{what} failed: {e:?}"))
}

/// Map a pyautogui-style key name onto an enigo key.
pub fn parse_key(name: &str) -> GuiPilotResult<Key> {
    let lower = name.trim().to_lowercase();
    let key = match lower.as_str() {
        "enter" | "return" => Key::Return,
        "tab" => Key::Tab,
        "esc" | "escape" => Key::Escape,
        "backspace" => Key::Backspace,
        "delete" | "del" => Key::Delete,
        "space" => Key::Space,
        "up" => Key::UpArrow,
        "down" => Key::DownArrow,
        "left" => Key::LeftArrow,
        "right" => Key::RightArrow,
        "home" => Key::Home,
        "end" => Key::End,
        "pageup" | "pgup" => Key::PageUp,
        "pagedown" | "pgdn" => Key::PageDown,
        "ctrl" | "control" => Key::Control,
        "alt" => Key::Alt,
        "shift" => Key::Shift,
        "win" | "cmd" | "command" | "super" | "meta" => Key::Meta,
        "f1" => Key::F1,
        "f2" => Key::F2,
        "f3" => Key::F3,
        "f4" => Key::F4,
        "f5" => Key::F5,
        "f6" => Key::F6,
        "f7" => Key::F7,
        "f8" => Key::F8,
        "f9" => Key::F9,
        "f10" => Key::F10,
        "f11" => Key::F11,
        "f12" => Key::F12,
        other => {
            let mut chars = other.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) => Key::Unicode(c),
                _ => return Err(GuiPilotError::Executor(format!("unknown key '{name}'"))),
            }
        }
    };
    Ok(key)
}

fn click_at(enigo: &mut Enigo, x: i32, y: i32, button: Button, times: usize) -> GuiPilotResult<()> {
    enigo
        .move_mouse(x, y, Coordinate::Abs)
        .map_err(|e| input_err("mouse move", e))?;
    for _ in 0..times {
        enigo
            .button(button, Direction::Click)
            .map_err(|e| input_err("click", e))?;
    }
    Ok(())
}

/// Apply one operation. Waits are handled by the dispatcher.
pub fn apply(enigo: &mut Enigo, op: &UiOperation) -> GuiPilotResult<()> {
    match op {
        UiOperation::Click { x, y } => click_at(enigo, *x, *y, Button::Left, 1),
        UiOperation::DoubleClick { x, y } => click_at(enigo, *x, *y, Button::Left, 2),
        UiOperation::RightClick { x, y } => click_at(enigo, *x, *y, Button::Right, 1),
        UiOperation::Drag { from, to } => {
            enigo
                .move_mouse(from.0, from.1, Coordinate::Abs)
                .map_err(|e| input_err("mouse move", e))?;
            enigo
                .button(Button::Left, Direction::Press)
                .map_err(|e| input_err("drag press", e))?;
            enigo
                .move_mouse(to.0, to.1, Coordinate::Abs)
                .map_err(|e| input_err("mouse move", e))?;
            enigo
                .button(Button::Left, Direction::Release)
                .map_err(|e| input_err("drag release", e))
        }
        UiOperation::TypeText { text } => enigo.text(text).map_err(|e| input_err("type", e)),
        UiOperation::Press { key } => enigo
            .key(parse_key(key)?, Direction::Click)
            .map_err(|e| input_err("key press", e)),
        UiOperation::Hotkey { keys } => {
            let keys = keys.iter().map(|k| parse_key(k)).collect::<GuiPilotResult<Vec<_>>>()?;
            for key in &keys {
                enigo.key(*key, Direction::Press).map_err(|e| input_err("hotkey press", e))?;
            }
            for key in keys.iter().rev() {
                enigo.key(*key, Direction::Release).map_err(|e| input_err("hotkey release", e))?;
            }
            Ok(())
        }
        UiOperation::Scroll { amount, at } => {
            if let Some((x, y)) = at {
                enigo
                    .move_mouse(*x, *y, Coordinate::Abs)
                    .map_err(|e| input_err("mouse move", e))?;
            }
            // enigo scrolls down for positive lengths
            enigo.scroll(-amount, Axis::Vertical).map_err(|e| input_err("scroll", e))
        }
        UiOperation::Wait { .. } => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_names() {
        assert_eq!(parse_key("Enter").unwrap(), Key::Return);
        assert_eq!(parse_key("ctrl").unwrap(), Key::Control);
        assert_eq!(parse_key("a").unwrap(), Key::Unicode('a'));
        assert!(parse_key("hyper").is_err());
    }
}
