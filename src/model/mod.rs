pub mod cell;

pub use cell::{Cell, CellAttributes, Color};
