//! Global toggle hotkey, backed by `rdev`.
//!
//! Pressing the configured key calls [`SessionHandle::toggle`], which is the
//! same action as clicking the widget.
//!
//! ```no_run
//! use tokio::sync::mpsc;
//! use voice_agent::hotkey::{parse_key, HotkeyListener};
//! use voice_agent::meter::ActivityLevel;
//! use voice_agent::session::{new_shared_status, SessionHandle};
//!
//! let (tx, _rx) = mpsc::channel(16);
//! let handle = SessionHandle::new(tx, new_shared_status(), ActivityLevel::new());
//! let key = parse_key("F9").expect("unknown key");
//! let _listener = HotkeyListener::start(key, handle).expect("hotkey thread");
//! ```
//!
//! [`SessionHandle::toggle`]: crate::session::SessionHandle::toggle

pub mod listener;

pub use listener::HotkeyListener;

/// Parse a key name from the config file.
///
/// Accepts `F1`–`F12`, a handful of named keys and single ASCII letters
/// (either case).  Unknown names return `None`.
///
/// ```
/// use voice_agent::hotkey::parse_key;
///
/// assert_eq!(parse_key("F9"), Some(rdev::Key::F9));
/// assert_eq!(parse_key("space"), Some(rdev::Key::Space));
/// assert_eq!(parse_key("k"), Some(rdev::Key::KeyK));
/// assert_eq!(parse_key("Ctrl+K"), None);
/// ```
pub fn parse_key(name: &str) -> Option<rdev::Key> {
    use rdev::Key::*;

    let name = name.trim();
    let key = match name.to_ascii_lowercase().as_str() {
        "f1" => F1,
        "f2" => F2,
        "f3" => F3,
        "f4" => F4,
        "f5" => F5,
        "f6" => F6,
        "f7" => F7,
        "f8" => F8,
        "f9" => F9,
        "f10" => F10,
        "f11" => F11,
        "f12" => F12,
        "escape" | "esc" => Escape,
        "space" => Space,
        "return" | "enter" => Return,
        "tab" => Tab,
        "pause" => Pause,
        "scrolllock" => ScrollLock,
        "printscreen" => PrintScreen,
        "home" => Home,
        "end" => End,
        _ => return letter_key(name),
    };
    Some(key)
}

fn letter_key(name: &str) -> Option<rdev::Key> {
    use rdev::Key::*;

    const LETTERS: [rdev::Key; 26] = [
        KeyA, KeyB, KeyC, KeyD, KeyE, KeyF, KeyG, KeyH, KeyI, KeyJ, KeyK, KeyL, KeyM, KeyN, KeyO,
        KeyP, KeyQ, KeyR, KeyS, KeyT, KeyU, KeyV, KeyW, KeyX, KeyY, KeyZ,
    ];

    let mut chars = name.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) if c.is_ascii_alphabetic() => {
            Some(LETTERS[(c.to_ascii_uppercase() as u8 - b'A') as usize])
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn function_keys_in_any_case() {
        assert_eq!(parse_key("F9"), Some(rdev::Key::F9));
        assert_eq!(parse_key("f12"), Some(rdev::Key::F12));
        assert_eq!(parse_key(" F1 "), Some(rdev::Key::F1));
    }

    #[test]
    fn named_keys() {
        assert_eq!(parse_key("Esc"), Some(rdev::Key::Escape));
        assert_eq!(parse_key("Enter"), Some(rdev::Key::Return));
        assert_eq!(parse_key("Pause"), Some(rdev::Key::Pause));
    }

    #[test]
    fn letters() {
        assert_eq!(parse_key("A"), Some(rdev::Key::KeyA));
        assert_eq!(parse_key("z"), Some(rdev::Key::KeyZ));
    }

    #[test]
    fn unknown_names() {
        assert_eq!(parse_key(""), None);
        assert_eq!(parse_key("F13"), None);
        assert_eq!(parse_key("ab"), None);
        assert_eq!(parse_key("1"), None);
    }
}
