//! A generic B+-tree index core: indexed internal nodes over a pluggable
//! leaf format, with two leaf formats provided — an inode-table leaf
//! (`ileaf`) and an inline xattr cache (`xattr`).

pub mod block;
pub mod btree;
pub mod error;
pub mod ileaf;
pub mod superblock;
pub mod xattr;

pub use block::{BlockCache, BlockHandle, MemBlockCache};
pub use btree::{Btree, ChopResult, Cursor, DeleteInfo, LeafOps, Root};
pub use error::{IndexError, Result};
pub use ileaf::IleafOps;
pub use superblock::SbView;
