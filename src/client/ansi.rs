//! Escape-sequence emission for reconstructed rows.
//!
//! Rendering tracks the active attribute state across a row: any change
//! emits a full reset followed by only the attributes and colors that differ
//! from the terminal default. State resets at the start and end of each row
//! so emitted rows are self-contained.

use crate::model::{Cell, CellAttributes, Color};

pub const CLEAR_AND_HOME: &str = "\x1b[2J\x1b[H";
pub const ERASE_TO_EOL: &str = "\x1b[K";
const RESET: &str = "\x1b[0m";

/// 1-indexed cursor positioning.
pub fn cursor_to(row: u32, col: u32) -> String {
    format!("\x1b[{row};{col}H")
}

/// Resolve a 256-color palette index to concrete RGB: 16 standard/bright
/// entries, the 6x6x6 cube, then the 24-step grayscale ramp.
pub fn palette_rgb(index: u8) -> (u8, u8, u8) {
    const ANSI_16: [(u8, u8, u8); 16] = [
        (0, 0, 0),
        (128, 0, 0),
        (0, 128, 0),
        (128, 128, 0),
        (0, 0, 128),
        (128, 0, 128),
        (0, 128, 128),
        (192, 192, 192),
        (128, 128, 128),
        (255, 0, 0),
        (0, 255, 0),
        (255, 255, 0),
        (0, 0, 255),
        (255, 0, 255),
        (0, 255, 255),
        (255, 255, 255),
    ];

    match index {
        0..=15 => ANSI_16[index as usize],
        16..=231 => {
            let idx = index - 16;
            let channel = |component: u8| -> u8 {
                if component == 0 { 0 } else { 55 + component * 40 }
            };
            (
                channel(idx / 36),
                channel((idx / 6) % 6),
                channel(idx % 6),
            )
        }
        _ => {
            let level = 8 + (index - 232) * 10;
            (level, level, level)
        }
    }
}

#[derive(Clone, PartialEq, Eq, Default)]
struct ActiveStyle {
    fg: Option<Color>,
    bg: Option<Color>,
    attrs: CellAttributes,
}

impl ActiveStyle {
    fn of(cell: &Cell) -> Self {
        ActiveStyle {
            fg: cell.fg,
            bg: cell.bg,
            attrs: cell.attrs,
        }
    }

    fn is_default(&self) -> bool {
        *self == ActiveStyle::default()
    }
}

/// Render one row of cells left to right.
pub fn render_row(cells: &[Cell]) -> String {
    let mut out = String::with_capacity(cells.len() + 8);
    let mut active = ActiveStyle::default();

    for cell in cells {
        let style = ActiveStyle::of(cell);
        if style != active {
            out.push_str(RESET);
            push_sgr(&mut out, &style);
            active = style;
        }
        out.push_str(&cell.ch);
    }

    if !active.is_default() {
        out.push_str(RESET);
    }
    out
}

fn push_sgr(out: &mut String, style: &ActiveStyle) {
    if style.is_default() {
        return;
    }
    let mut codes: Vec<String> = Vec::new();
    let attrs = &style.attrs;
    if attrs.bold {
        codes.push("1".into());
    }
    if attrs.dim {
        codes.push("2".into());
    }
    if attrs.italic {
        codes.push("3".into());
    }
    if attrs.underline {
        codes.push("4".into());
    }
    if attrs.inverse {
        codes.push("7".into());
    }
    if attrs.hidden {
        codes.push("8".into());
    }
    if attrs.strikethrough {
        codes.push("9".into());
    }
    if let Some(fg) = style.fg {
        push_color_codes(&mut codes, fg, false);
    }
    if let Some(bg) = style.bg {
        push_color_codes(&mut codes, bg, true);
    }

    out.push_str("\x1b[");
    out.push_str(&codes.join(";"));
    out.push('m');
}

fn push_color_codes(codes: &mut Vec<String>, color: Color, background: bool) {
    match color {
        Color::Indexed(idx @ 0..=7) => {
            let base: u16 = if background { 40 } else { 30 };
            codes.push((base + idx as u16).to_string());
        }
        Color::Indexed(idx @ 8..=15) => {
            let base: u16 = if background { 100 } else { 90 };
            codes.push((base + (idx - 8) as u16).to_string());
        }
        Color::Indexed(idx) => {
            let (r, g, b) = palette_rgb(idx);
            push_truecolor(codes, r, g, b, background);
        }
        Color::Rgb(r, g, b) => push_truecolor(codes, r, g, b, background),
    }
}

fn push_truecolor(codes: &mut Vec<String>, r: u8, g: u8, b: u8, background: bool) {
    codes.push(if background { "48" } else { "38" }.to_string());
    codes.push("2".to_string());
    codes.push(r.to_string());
    codes.push(g.to_string());
    codes.push(b.to_string());
}
