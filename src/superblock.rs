//! Read-only superblock facts the core needs (spec §3 "Superblock view").
//! Ownership of the real superblock lives outside this crate; `SbView` is
//! the slice of it the btree/ileaf/xattr code actually consults.

/// Geometry and side-table locations the index core treats as given.
#[derive(Debug, Clone, Copy)]
pub struct SbView {
    pub blocksize: u32,
    pub blockbits: u8,
    /// Max index entries per internal node: `8 + 16 * entries_per_node <= blocksize`.
    pub entries_per_node: u32,
    /// Max inodes per ileaf.
    pub entries_per_leaf: u64,
    /// Block number of the atom refcount low page array.
    pub atomref_base: u64,
    /// Block number of the atom refcount high (carry) page array.
    pub highref_base: u64,
    /// Block number of the atom reverse-map page array.
    pub atomrev_base: u64,
    /// Attribute-stream version; only xattr records encoded at this
    /// version are accepted back into the cache on decode (spec §4.3).
    pub version: u16,
}

impl SbView {
    /// Derive `entries_per_node` from `blocksize` the way the on-disk
    /// format requires (spec §6): `8 + 16 * entries_per_node <= blocksize`.
    pub fn max_entries_per_node(blocksize: u32) -> u32 {
        (blocksize.saturating_sub(8)) / 16
    }
}
