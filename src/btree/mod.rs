//! Generic B+-tree engine: indexed internal nodes plus a pluggable leaf
//! format (spec §3, §4.1).

pub mod cursor;
pub mod engine;
pub mod node;
pub mod ops;

pub use cursor::Cursor;
pub use engine::{Btree, ChopResult, DeleteInfo, Root};
pub use ops::LeafOps;
