//! Virtual scrollback reconstruction.
//!
//! The buffer owns a bounded store of rows keyed by absolute index and turns
//! decoded snapshots into incremental escape-coded output: rows that fell
//! above the viewport are committed to scrollback exactly once, the visible
//! window is repainted in place, and the cursor lands where the snapshot put
//! it. The downstream terminal emulator does the actual drawing.

use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, HashMap};
use std::hash::{Hash, Hasher};

use tracing::debug;

use crate::client::ansi;
use crate::model::Cell;
use crate::protocol::Snapshot;

/// Upper bound on retained rows; the oldest (lowest) indices evict first.
pub const MAX_RETAINED_ROWS: usize = 10_000;

/// A viewport start this far behind the previous one is treated as a fresh
/// replay or an external reset.
const CLEAR_JUMP_THRESHOLD: i64 = 10;

/// Blank-row fraction beyond which a snapshot is read as a cleared screen.
/// Tunable heuristic: the wire protocol does not signal clears explicitly.
const BLANK_CLEAR_NUMERATOR: usize = 4;
const BLANK_CLEAR_DENOMINATOR: usize = 5;

pub struct ScrollbackBuffer {
    lines: BTreeMap<i64, Vec<Cell>>,
    hashes: HashMap<i64, u64>,
    committed_row: i64,
    last_viewport_y: i64,
}

impl Default for ScrollbackBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl ScrollbackBuffer {
    pub fn new() -> Self {
        ScrollbackBuffer {
            lines: BTreeMap::new(),
            hashes: HashMap::new(),
            committed_row: -1,
            last_viewport_y: 0,
        }
    }

    /// Drop all state. Required when the owning surface switches sessions.
    pub fn reset(&mut self) {
        self.lines.clear();
        self.hashes.clear();
        self.committed_row = -1;
        self.last_viewport_y = 0;
    }

    /// Highest absolute row index already flushed to the consumer as
    /// scrollback.
    pub fn committed_row(&self) -> i64 {
        self.committed_row
    }

    /// Number of rows currently retained.
    pub fn retained_rows(&self) -> usize {
        self.lines.len()
    }

    /// Fold a snapshot into the buffer and return the escape-coded text that
    /// brings the consumer up to date.
    pub fn apply_snapshot(&mut self, snapshot: &Snapshot) -> String {
        let first_visible = snapshot.viewport_y as i64;
        let row_count = snapshot.cells.len();
        let last_visible = first_visible + row_count as i64 - 1;

        let mut out = String::new();

        if self.detect_clear(snapshot, first_visible) {
            debug!(
                target = "client::scrollback",
                viewport = first_visible,
                previous = self.last_viewport_y,
                "screen clear detected"
            );
            out.push_str(ansi::CLEAR_AND_HOME);
            self.committed_row = first_visible - 1;
        }

        for (offset, row) in snapshot.cells.iter().enumerate() {
            self.store_row(first_visible + offset as i64, row);
        }

        // Newly uncovered rows become scrollback, oldest first.
        let commit_from = (self.committed_row + 1).max(first_visible);
        if last_visible >= commit_from {
            for index in commit_from..=last_visible {
                if let Some(row) = self.lines.get(&index) {
                    out.push_str(&ansi::render_row(row));
                    out.push_str("\r\n");
                }
            }
        }
        self.committed_row = self.committed_row.max(last_visible);

        // Repaint the visible window in place, even when it has not
        // scrolled, so edits to already-visible lines land.
        for offset in 0..row_count {
            let index = first_visible + offset as i64;
            out.push_str(&ansi::cursor_to(offset as u32 + 1, 1));
            if let Some(row) = self.lines.get(&index) {
                out.push_str(&ansi::render_row(row));
            }
            out.push_str(ansi::ERASE_TO_EOL);
        }

        out.push_str(&ansi::cursor_to(
            snapshot.cursor_y.max(0) as u32 + 1,
            snapshot.cursor_x.max(0) as u32 + 1,
        ));

        self.last_viewport_y = first_visible;
        out
    }

    fn detect_clear(&self, snapshot: &Snapshot, first_visible: i64) -> bool {
        if first_visible < self.last_viewport_y - CLEAR_JUMP_THRESHOLD {
            return true;
        }
        let row_count = snapshot.cells.len();
        if row_count == 0 {
            return false;
        }
        let blank = snapshot.cells.iter().filter(|row| is_blank_row(row)).count();
        blank * BLANK_CLEAR_DENOMINATOR > row_count * BLANK_CLEAR_NUMERATOR
    }

    fn store_row(&mut self, index: i64, row: &[Cell]) {
        let hash = row_hash(row);
        if self.hashes.get(&index) == Some(&hash) {
            return;
        }
        self.lines.insert(index, row.to_vec());
        self.hashes.insert(index, hash);
        while self.lines.len() > MAX_RETAINED_ROWS {
            if let Some((evicted, _)) = self.lines.pop_first() {
                self.hashes.remove(&evicted);
            }
        }
    }
}

fn is_blank_row(row: &[Cell]) -> bool {
    row.is_empty() || row.iter().all(Cell::is_blank)
}

fn row_hash(row: &[Cell]) -> u64 {
    let mut hasher = DefaultHasher::new();
    row.hash(&mut hasher);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{decode_snapshot, SNAPSHOT_MAGIC, SNAPSHOT_VERSION};

    fn text_row(text: &str) -> Vec<Cell> {
        text.chars().map(|c| Cell::plain(c.to_string())).collect()
    }

    fn snapshot(viewport_y: i32, rows: Vec<Vec<Cell>>) -> Snapshot {
        Snapshot {
            cols: 80,
            rows: rows.len() as u32,
            viewport_y,
            cursor_x: 0,
            cursor_y: 0,
            cells: rows,
        }
    }

    #[test]
    fn single_cell_snapshot_end_to_end() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&SNAPSHOT_MAGIC.to_le_bytes());
        buf.push(SNAPSHOT_VERSION);
        buf.push(0);
        buf.extend_from_slice(&2u32.to_le_bytes());
        buf.extend_from_slice(&1u32.to_le_bytes());
        buf.extend_from_slice(&0i32.to_le_bytes());
        buf.extend_from_slice(&0i32.to_le_bytes());
        buf.extend_from_slice(&0i32.to_le_bytes());
        buf.extend_from_slice(&[0u8; 8]);
        buf.push(0xFD);
        buf.extend_from_slice(&1u16.to_le_bytes());
        buf.push(0x01);
        buf.push(b'A');

        let snapshot = decode_snapshot(&buf).unwrap();
        assert_eq!(snapshot.cells, vec![vec![Cell::plain("A")]]);

        let mut buffer = ScrollbackBuffer::new();
        let out = buffer.apply_snapshot(&snapshot);
        assert_eq!(out, "A\r\n\x1b[1;1HA\x1b[K\x1b[1;1H");
    }

    #[test]
    fn reapplying_identical_snapshot_grows_no_scrollback() {
        let snap = snapshot(0, vec![text_row("hello"), text_row("world")]);
        let mut buffer = ScrollbackBuffer::new();

        let first = buffer.apply_snapshot(&snap);
        assert!(first.contains("hello\r\n"));
        assert!(first.contains("world\r\n"));
        assert_eq!(buffer.committed_row(), 1);

        let second = buffer.apply_snapshot(&snap);
        assert_eq!(buffer.committed_row(), 1);
        assert!(!second.contains("\r\n"));
        // visible region still repaints
        assert!(second.contains(&ansi::cursor_to(1, 1)));
        assert!(second.contains("hello"));
    }

    #[test]
    fn scrollback_commits_each_row_exactly_once() {
        let mut buffer = ScrollbackBuffer::new();

        let first = buffer.apply_snapshot(&snapshot(
            0,
            vec![text_row("line0"), text_row("line1"), text_row("line2")],
        ));
        assert_eq!(buffer.committed_row(), 2);
        for line in ["line0", "line1", "line2"] {
            assert_eq!(first.matches(&format!("{line}\r\n")).count(), 1);
        }

        let second = buffer.apply_snapshot(&snapshot(
            2,
            vec![text_row("line2"), text_row("line3"), text_row("line4")],
        ));
        assert_eq!(buffer.committed_row(), 4);
        assert!(!second.contains("line2\r\n"));
        assert_eq!(second.matches("line3\r\n").count(), 1);
        assert_eq!(second.matches("line4\r\n").count(), 1);
    }

    #[test]
    fn backward_jump_triggers_clear() {
        let mut buffer = ScrollbackBuffer::new();
        buffer.apply_snapshot(&snapshot(50, vec![text_row("tail")]));
        assert_eq!(buffer.committed_row(), 50);

        let out = buffer.apply_snapshot(&snapshot(10, vec![text_row("replayed")]));
        assert!(out.starts_with(ansi::CLEAR_AND_HOME));
        // rewound to the new viewport, then advanced over its rows
        assert_eq!(buffer.committed_row(), 10);
        assert!(out.contains("replayed\r\n"));
    }

    #[test]
    fn small_backward_jump_does_not_clear() {
        let mut buffer = ScrollbackBuffer::new();
        buffer.apply_snapshot(&snapshot(20, vec![text_row("a"), text_row("b")]));
        let committed = buffer.committed_row();

        let out = buffer.apply_snapshot(&snapshot(12, vec![text_row("a")]));
        assert!(!out.contains(ansi::CLEAR_AND_HOME));
        assert_eq!(buffer.committed_row(), committed);
    }

    #[test]
    fn mostly_blank_snapshot_triggers_clear() {
        let mut buffer = ScrollbackBuffer::new();
        buffer.apply_snapshot(&snapshot(0, vec![text_row("prompt")]));

        let mut rows: Vec<Vec<Cell>> = (0..5).map(|_| vec![Cell::space()]).collect();
        rows.push(text_row("x"));
        let out = buffer.apply_snapshot(&snapshot(0, rows));
        assert!(out.starts_with(ansi::CLEAR_AND_HOME));
    }

    #[test]
    fn four_in_five_blank_rows_is_not_a_clear() {
        let mut buffer = ScrollbackBuffer::new();
        let mut rows: Vec<Vec<Cell>> = (0..4).map(|_| vec![Cell::space()]).collect();
        rows.push(text_row("x"));
        let out = buffer.apply_snapshot(&snapshot(0, rows));
        assert!(!out.contains(ansi::CLEAR_AND_HOME));
    }

    #[test]
    fn cursor_lands_one_indexed() {
        let mut buffer = ScrollbackBuffer::new();
        let mut snap = snapshot(0, vec![text_row("abc")]);
        snap.cursor_x = 2;
        snap.cursor_y = 0;
        let out = buffer.apply_snapshot(&snap);
        assert!(out.ends_with(&ansi::cursor_to(1, 3)));
    }

    #[test]
    fn store_evicts_oldest_rows_past_cap() {
        let mut buffer = ScrollbackBuffer::new();
        let chunk = 500;
        let total = MAX_RETAINED_ROWS + chunk;
        let mut viewport = 0usize;
        while viewport < total {
            let rows: Vec<Vec<Cell>> = (0..chunk).map(|i| text_row(&format!("r{}", viewport + i))).collect();
            buffer.apply_snapshot(&snapshot(viewport as i32, rows));
            viewport += chunk;
        }
        assert_eq!(buffer.retained_rows(), MAX_RETAINED_ROWS);
        assert!(!buffer.lines.contains_key(&0));
        assert!(buffer.lines.contains_key(&(total as i64 - 1)));
    }

    #[test]
    fn reset_restores_fresh_state() {
        let mut buffer = ScrollbackBuffer::new();
        buffer.apply_snapshot(&snapshot(3, vec![text_row("x")]));
        buffer.reset();
        assert_eq!(buffer.committed_row(), -1);
        assert_eq!(buffer.retained_rows(), 0);

        let out = buffer.apply_snapshot(&snapshot(0, vec![text_row("fresh")]));
        assert!(out.contains("fresh\r\n"));
    }

    #[test]
    fn empty_snapshot_only_moves_cursor() {
        let mut buffer = ScrollbackBuffer::new();
        let mut snap = snapshot(0, Vec::new());
        snap.cursor_y = 4;
        let out = buffer.apply_snapshot(&snap);
        assert_eq!(out, ansi::cursor_to(5, 1));
        assert_eq!(buffer.committed_row(), -1);
    }
}
