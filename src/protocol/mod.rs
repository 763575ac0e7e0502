//! Binary snapshot wire format.
//!
//! A snapshot is a 32-byte little-endian header followed by row records until
//! end of buffer. Blank rows are run-length encoded behind a marker byte and
//! each cell record carries a bit-flag tag selecting its trailing fields, so
//! the common case (plain text on a mostly blank screen) stays small while
//! full 24-bit color and styling remain expressible.

use crate::model::{Cell, CellAttributes, Color};
use thiserror::Error;

pub const SNAPSHOT_MAGIC: u16 = 0x5654;
pub const SNAPSHOT_VERSION: u8 = 0x01;
pub const HEADER_LEN: usize = 32;

const MARKER_BLANK_RUN: u8 = 0xFE;
const MARKER_CONTENT_ROW: u8 = 0xFD;

const CELL_EXTENDED: u8 = 1 << 7;
const CELL_UNICODE: u8 = 1 << 6;
const CELL_HAS_FG: u8 = 1 << 5;
const CELL_HAS_BG: u8 = 1 << 4;
const CELL_FG_RGB: u8 = 1 << 3;
const CELL_BG_RGB: u8 = 1 << 2;
const CELL_CLASS_MASK: u8 = 0b11;

const CLASS_SPACE: u8 = 0b00;
const CLASS_ASCII: u8 = 0b01;
const CLASS_UNICODE: u8 = 0b10;

/// Decoded point-in-time terminal state. `cells` is not guaranteed to hold
/// exactly `rows` entries; the sender may ship fewer or more logical rows
/// than the visible height.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Snapshot {
    pub cols: u32,
    pub rows: u32,
    /// Absolute row index of the first entry in `cells`. May be negative
    /// relative to an evolving baseline early in a session.
    pub viewport_y: i32,
    pub cursor_x: i32,
    pub cursor_y: i32,
    pub cells: Vec<Vec<Cell>>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FormatError {
    #[error("bad magic 0x{found:04x}")]
    BadMagic { found: u16 },
    #[error("unsupported version {found}")]
    UnsupportedVersion { found: u8 },
    #[error("unknown row marker 0x{marker:02x} at byte {offset}")]
    UnknownRowMarker { marker: u8, offset: usize },
    #[error("invalid cell class in tag 0x{tag:02x} at byte {offset}")]
    InvalidCellClass { tag: u8, offset: usize },
    #[error("truncated buffer at byte {offset}")]
    Truncated { offset: usize },
    #[error("invalid utf-8 in cell payload at byte {offset}")]
    InvalidUtf8 { offset: usize },
}

/// Parse a whole snapshot buffer. Pure: a failed decode leaves no partial
/// state behind anywhere.
pub fn decode_snapshot(bytes: &[u8]) -> Result<Snapshot, FormatError> {
    let mut reader = Reader::new(bytes);

    let magic = reader.read_u16_le()?;
    if magic != SNAPSHOT_MAGIC {
        return Err(FormatError::BadMagic { found: magic });
    }
    let version = reader.read_u8()?;
    if version != SNAPSHOT_VERSION {
        return Err(FormatError::UnsupportedVersion { found: version });
    }
    let _flags = reader.read_u8()?;
    let cols = reader.read_u32_le()?;
    let rows = reader.read_u32_le()?;
    let viewport_y = reader.read_i32_le()?;
    let cursor_x = reader.read_i32_le()?;
    let cursor_y = reader.read_i32_le()?;
    reader.skip(8)?; // reserved

    let mut cells = Vec::new();
    while !reader.is_empty() {
        let offset = reader.pos();
        let marker = reader.read_u8()?;
        match marker {
            MARKER_BLANK_RUN => {
                let count = reader.read_u8()?;
                for _ in 0..count {
                    cells.push(vec![Cell::space()]);
                }
            }
            MARKER_CONTENT_ROW => {
                let count = reader.read_u16_le()? as usize;
                let mut row = Vec::with_capacity(count);
                for _ in 0..count {
                    row.push(decode_cell(&mut reader)?);
                }
                cells.push(row);
            }
            marker => return Err(FormatError::UnknownRowMarker { marker, offset }),
        }
    }

    Ok(Snapshot {
        cols,
        rows,
        viewport_y,
        cursor_x,
        cursor_y,
        cells,
    })
}

/// Encode a snapshot in the same format `decode_snapshot` accepts. Runs of
/// single-space blank rows collapse into blank-run records; plain spaces in
/// content rows collapse to the one-byte cell form.
pub fn encode_snapshot(snapshot: &Snapshot) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_LEN + snapshot.cells.len() * 8);
    out.extend_from_slice(&SNAPSHOT_MAGIC.to_le_bytes());
    out.push(SNAPSHOT_VERSION);
    out.push(0); // flags
    out.extend_from_slice(&snapshot.cols.to_le_bytes());
    out.extend_from_slice(&snapshot.rows.to_le_bytes());
    out.extend_from_slice(&snapshot.viewport_y.to_le_bytes());
    out.extend_from_slice(&snapshot.cursor_x.to_le_bytes());
    out.extend_from_slice(&snapshot.cursor_y.to_le_bytes());
    out.extend_from_slice(&[0u8; 8]);

    let mut idx = 0;
    while idx < snapshot.cells.len() {
        let row = &snapshot.cells[idx];
        if is_blank_run_row(row) {
            let mut run = 1usize;
            while run < u8::MAX as usize
                && idx + run < snapshot.cells.len()
                && is_blank_run_row(&snapshot.cells[idx + run])
            {
                run += 1;
            }
            out.push(MARKER_BLANK_RUN);
            out.push(run as u8);
            idx += run;
        } else {
            out.push(MARKER_CONTENT_ROW);
            out.extend_from_slice(&(row.len() as u16).to_le_bytes());
            for cell in row {
                encode_cell(&mut out, cell);
            }
            idx += 1;
        }
    }

    out
}

fn is_blank_run_row(row: &[Cell]) -> bool {
    row.len() == 1 && row[0].is_blank()
}

/// Bit-flag tag parsed once per cell record. All trailing-field decisions
/// branch off this, keeping the wire layout in one place.
#[derive(Clone, Copy, Debug)]
struct CellTag {
    extended: bool,
    class: u8,
    has_fg: bool,
    has_bg: bool,
    fg_rgb: bool,
    bg_rgb: bool,
}

impl CellTag {
    fn parse(tag: u8, offset: usize) -> Result<Self, FormatError> {
        let class = tag & CELL_CLASS_MASK;
        if class != CLASS_SPACE && class != CLASS_ASCII && class != CLASS_UNICODE {
            return Err(FormatError::InvalidCellClass { tag, offset });
        }
        Ok(CellTag {
            extended: tag & CELL_EXTENDED != 0,
            class,
            has_fg: tag & CELL_HAS_FG != 0,
            has_bg: tag & CELL_HAS_BG != 0,
            fg_rgb: tag & CELL_FG_RGB != 0,
            bg_rgb: tag & CELL_BG_RGB != 0,
        })
    }

    fn for_cell(cell: &Cell) -> Self {
        let class = if cell.ch == " " {
            CLASS_SPACE
        } else if cell.ch.len() == 1 && cell.ch.as_bytes()[0].is_ascii() {
            CLASS_ASCII
        } else {
            CLASS_UNICODE
        };
        CellTag {
            extended: cell.has_style(),
            class,
            has_fg: cell.fg.is_some(),
            has_bg: cell.bg.is_some(),
            fg_rgb: matches!(cell.fg, Some(Color::Rgb(..))),
            bg_rgb: matches!(cell.bg, Some(Color::Rgb(..))),
        }
    }

    fn to_byte(self) -> u8 {
        let mut tag = self.class;
        if self.class == CLASS_UNICODE {
            tag |= CELL_UNICODE;
        }
        if self.extended {
            tag |= CELL_EXTENDED;
        }
        if self.has_fg {
            tag |= CELL_HAS_FG;
        }
        if self.has_bg {
            tag |= CELL_HAS_BG;
        }
        if self.fg_rgb {
            tag |= CELL_FG_RGB;
        }
        if self.bg_rgb {
            tag |= CELL_BG_RGB;
        }
        tag
    }
}

fn decode_cell(reader: &mut Reader<'_>) -> Result<Cell, FormatError> {
    let offset = reader.pos();
    let raw = reader.read_u8()?;
    if raw == 0x00 {
        // canonical simple space
        return Ok(Cell::space());
    }
    let tag = CellTag::parse(raw, offset)?;

    let ch = match tag.class {
        CLASS_SPACE => " ".to_string(),
        CLASS_ASCII => (reader.read_u8()? as char).to_string(),
        _ => {
            let len = reader.read_u8()? as usize;
            let payload_offset = reader.pos();
            let bytes = reader.read_bytes(len)?;
            String::from_utf8(bytes.to_vec()).map_err(|_| FormatError::InvalidUtf8 {
                offset: payload_offset,
            })?
        }
    };

    let mut cell = Cell {
        ch,
        fg: None,
        bg: None,
        attrs: CellAttributes::default(),
    };

    // Colors travel only inside the extended section.
    if tag.extended {
        cell.attrs = CellAttributes::from_byte(reader.read_u8()?);
        if tag.has_fg {
            cell.fg = Some(read_color(reader, tag.fg_rgb)?);
        }
        if tag.has_bg {
            cell.bg = Some(read_color(reader, tag.bg_rgb)?);
        }
    }

    Ok(cell)
}

fn encode_cell(out: &mut Vec<u8>, cell: &Cell) {
    if cell.is_blank() {
        out.push(0x00);
        return;
    }
    let tag = CellTag::for_cell(cell);
    out.push(tag.to_byte());

    match tag.class {
        CLASS_SPACE => {}
        CLASS_ASCII => out.push(cell.ch.as_bytes()[0]),
        _ => {
            out.push(cell.ch.len() as u8);
            out.extend_from_slice(cell.ch.as_bytes());
        }
    }

    if tag.extended {
        out.push(cell.attrs.to_byte());
        if let Some(fg) = cell.fg {
            write_color(out, fg);
        }
        if let Some(bg) = cell.bg {
            write_color(out, bg);
        }
    }
}

fn read_color(reader: &mut Reader<'_>, rgb: bool) -> Result<Color, FormatError> {
    if rgb {
        let bytes = reader.read_bytes(3)?;
        Ok(Color::Rgb(bytes[0], bytes[1], bytes[2]))
    } else {
        Ok(Color::Indexed(reader.read_u8()?))
    }
}

fn write_color(out: &mut Vec<u8>, color: Color) {
    match color {
        Color::Indexed(idx) => out.push(idx),
        Color::Rgb(r, g, b) => out.extend_from_slice(&[r, g, b]),
    }
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Reader { buf, pos: 0 }
    }

    fn pos(&self) -> usize {
        self.pos
    }

    fn is_empty(&self) -> bool {
        self.pos >= self.buf.len()
    }

    fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], FormatError> {
        if self.pos + len > self.buf.len() {
            return Err(FormatError::Truncated { offset: self.pos });
        }
        let bytes = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(bytes)
    }

    fn skip(&mut self, len: usize) -> Result<(), FormatError> {
        self.read_bytes(len).map(|_| ())
    }

    fn read_u8(&mut self) -> Result<u8, FormatError> {
        Ok(self.read_bytes(1)?[0])
    }

    fn read_u16_le(&mut self) -> Result<u16, FormatError> {
        let bytes = self.read_bytes(2)?;
        Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    fn read_u32_le(&mut self) -> Result<u32, FormatError> {
        let bytes = self.read_bytes(4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn read_i32_le(&mut self) -> Result<i32, FormatError> {
        let bytes = self.read_bytes(4)?;
        Ok(i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }
}
