use serde::{Deserialize, Serialize};

/// One rendered terminal cell. Every cell occupies exactly one column; the
/// wire format has no wide-glyph support.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Cell {
    /// Grapheme for this cell (may be multi-byte, e.g. combining sequences)
    pub ch: String,

    /// Foreground color, `None` for the terminal default
    pub fg: Option<Color>,

    /// Background color, `None` for the terminal default
    pub bg: Option<Color>,

    /// Text attributes
    pub attrs: CellAttributes,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Color {
    /// 256-color palette index
    Indexed(u8),
    /// 24-bit true color
    Rgb(u8, u8, u8),
}

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct CellAttributes {
    pub bold: bool,
    pub italic: bool,
    pub underline: bool,
    pub dim: bool,
    pub inverse: bool,
    pub hidden: bool,
    pub strikethrough: bool,
}

impl Default for Cell {
    fn default() -> Self {
        Cell {
            ch: " ".to_string(),
            fg: None,
            bg: None,
            attrs: CellAttributes::default(),
        }
    }
}

impl Cell {
    pub fn plain(ch: impl Into<String>) -> Self {
        Cell {
            ch: ch.into(),
            ..Cell::default()
        }
    }

    /// An unstyled space, the filler for blank-row runs.
    pub fn space() -> Self {
        Cell::default()
    }

    pub fn has_style(&self) -> bool {
        self.fg.is_some() || self.bg.is_some() || !self.attrs.is_empty()
    }

    /// Check if the cell is a space with no styling applied.
    pub fn is_blank(&self) -> bool {
        self.ch == " " && !self.has_style()
    }
}

impl CellAttributes {
    pub fn is_empty(&self) -> bool {
        *self == CellAttributes::default()
    }

    /// Pack into the wire attribute byte.
    pub fn to_byte(&self) -> u8 {
        let mut byte = 0u8;
        if self.bold {
            byte |= 1 << 0;
        }
        if self.italic {
            byte |= 1 << 1;
        }
        if self.underline {
            byte |= 1 << 2;
        }
        if self.dim {
            byte |= 1 << 3;
        }
        if self.inverse {
            byte |= 1 << 4;
        }
        if self.hidden {
            byte |= 1 << 5;
        }
        if self.strikethrough {
            byte |= 1 << 6;
        }
        byte
    }

    pub fn from_byte(byte: u8) -> Self {
        CellAttributes {
            bold: byte & (1 << 0) != 0,
            italic: byte & (1 << 1) != 0,
            underline: byte & (1 << 2) != 0,
            dim: byte & (1 << 3) != 0,
            inverse: byte & (1 << 4) != 0,
            hidden: byte & (1 << 5) != 0,
            strikethrough: byte & (1 << 6) != 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attribute_byte_round_trips() {
        let attrs = CellAttributes {
            bold: true,
            underline: true,
            strikethrough: true,
            ..Default::default()
        };
        assert_eq!(CellAttributes::from_byte(attrs.to_byte()), attrs);
        assert_eq!(attrs.to_byte(), 0b0100_0101);
    }

    #[test]
    fn blank_requires_no_style() {
        assert!(Cell::space().is_blank());
        let mut styled = Cell::space();
        styled.fg = Some(Color::Indexed(1));
        assert!(!styled.is_blank());
        assert!(!Cell::plain("x").is_blank());
    }
}
