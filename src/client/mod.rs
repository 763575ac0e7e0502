pub mod ansi;
pub mod scrollback;

pub use scrollback::ScrollbackBuffer;
