//! Keystroke payload encoding for the input channel.
//!
//! Named keys travel as NUL-wrapped snake_case tokens and are interpreted on
//! the remote side; Ctrl chords for a-z become their control bytes; anything
//! else is forwarded as literal text.

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NamedKey {
    Enter,
    Tab,
    Backspace,
    Escape,
    Delete,
    Insert,
    Home,
    End,
    PageUp,
    PageDown,
    ArrowUp,
    ArrowDown,
    ArrowLeft,
    ArrowRight,
    Function(u8),
}

impl NamedKey {
    pub fn token(&self) -> String {
        match self {
            NamedKey::Enter => "enter".to_string(),
            NamedKey::Tab => "tab".to_string(),
            NamedKey::Backspace => "backspace".to_string(),
            NamedKey::Escape => "escape".to_string(),
            NamedKey::Delete => "delete".to_string(),
            NamedKey::Insert => "insert".to_string(),
            NamedKey::Home => "home".to_string(),
            NamedKey::End => "end".to_string(),
            NamedKey::PageUp => "page_up".to_string(),
            NamedKey::PageDown => "page_down".to_string(),
            NamedKey::ArrowUp => "arrow_up".to_string(),
            NamedKey::ArrowDown => "arrow_down".to_string(),
            NamedKey::ArrowLeft => "arrow_left".to_string(),
            NamedKey::ArrowRight => "arrow_right".to_string(),
            NamedKey::Function(n) => format!("f{n}"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TerminalInput {
    /// Literal text, forwarded unchanged
    Text(String),
    /// A named key, wrapped for remote interpretation
    Key(NamedKey),
    /// Ctrl chord; a-z map to control bytes 0x01-0x1A
    Ctrl(char),
}

impl TerminalInput {
    pub fn into_payload(self) -> String {
        match self {
            TerminalInput::Text(text) => text,
            TerminalInput::Key(key) => format!("\0{}\0", key.token()),
            TerminalInput::Ctrl(c) => {
                let lower = c.to_ascii_lowercase();
                if lower.is_ascii_lowercase() {
                    (((lower as u8 - b'a') + 1) as char).to_string()
                } else {
                    c.to_string()
                }
            }
        }
    }
}

impl From<&str> for TerminalInput {
    fn from(text: &str) -> Self {
        TerminalInput::Text(text.to_string())
    }
}

impl From<String> for TerminalInput {
    fn from(text: String) -> Self {
        TerminalInput::Text(text)
    }
}

impl From<NamedKey> for TerminalInput {
    fn from(key: NamedKey) -> Self {
        TerminalInput::Key(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn named_keys_are_nul_wrapped() {
        assert_eq!(
            TerminalInput::Key(NamedKey::ArrowUp).into_payload(),
            "\0arrow_up\0"
        );
        assert_eq!(
            TerminalInput::Key(NamedKey::Function(5)).into_payload(),
            "\0f5\0"
        );
    }

    #[test]
    fn ctrl_letters_become_control_bytes() {
        assert_eq!(TerminalInput::Ctrl('a').into_payload(), "\u{01}");
        assert_eq!(TerminalInput::Ctrl('C').into_payload(), "\u{03}");
        assert_eq!(TerminalInput::Ctrl('z').into_payload(), "\u{1a}");
    }

    #[test]
    fn ctrl_non_letter_falls_back_to_literal() {
        assert_eq!(TerminalInput::Ctrl('3').into_payload(), "3");
    }

    #[test]
    fn text_passes_through() {
        assert_eq!(
            TerminalInput::Text("ls -la\r".into()).into_payload(),
            "ls -la\r"
        );
    }
}
