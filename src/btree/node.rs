//! Internal index node (bnode) layout (spec §3, §6):
//!
//! ```text
//! count: be32, unused: be32, entries[count]: { key: be64, block: be64 }
//! ```
//!
//! `entries[0].key` is never accessed (implicit -infinity); for `i >= 1`,
//! `entries[i].key` is the separator below which every key reached through
//! `entries[i].block` lies. Modeled as explicit index math over a byte
//! buffer (spec §9's redesign note) rather than a packed struct with
//! pointer arithmetic, the same way the teacher drops to manual
//! big-endian byte math for the variable-length regions of `xfs/bmbt.rs`
//! and `xfs/dir/shortform.rs`.

pub const HEADER_SIZE: usize = 8;
pub const ENTRY_SIZE: usize = 16;

/// Zero the header of a fresh node (count = 0).
pub fn init(buf: &mut [u8]) {
    buf[..HEADER_SIZE].fill(0);
}

pub fn count(buf: &[u8]) -> u32 {
    u32::from_be_bytes(buf[0..4].try_into().unwrap())
}

pub fn set_count(buf: &mut [u8], count: u32) {
    buf[0..4].copy_from_slice(&count.to_be_bytes());
}

fn entry_offset(i: u32) -> usize {
    HEADER_SIZE + i as usize * ENTRY_SIZE
}

pub fn entry_key(buf: &[u8], i: u32) -> u64 {
    let off = entry_offset(i);
    u64::from_be_bytes(buf[off..off + 8].try_into().unwrap())
}

pub fn entry_block(buf: &[u8], i: u32) -> u64 {
    let off = entry_offset(i) + 8;
    u64::from_be_bytes(buf[off..off + 8].try_into().unwrap())
}

pub fn set_entry(buf: &mut [u8], i: u32, key: u64, block: u64) {
    let off = entry_offset(i);
    buf[off..off + 8].copy_from_slice(&key.to_be_bytes());
    buf[off + 8..off + 16].copy_from_slice(&block.to_be_bytes());
}

/// Shift entries `[from, count)` right by one slot, opening a hole at
/// `from`. Caller is responsible for bumping `count` and writing the new
/// entry into the hole.
pub fn shift_right(buf: &mut [u8], from: u32, count: u32) {
    let start = entry_offset(from);
    let end = entry_offset(count);
    buf.copy_within(start..end, start + ENTRY_SIZE);
}

/// Append `src`'s entries after `dst`'s existing `dst_count` entries.
pub fn append_entries(dst: &mut [u8], dst_count: u32, src: &[u8], src_count: u32) {
    let dst_start = entry_offset(dst_count);
    let src_end = entry_offset(src_count);
    dst[dst_start..dst_start + (src_end - HEADER_SIZE)].copy_from_slice(&src[HEADER_SIZE..src_end]);
}

/// Copy entries `[from, count)` of `src` to the start of `dst`'s entry area.
pub fn copy_tail_to(dst: &mut [u8], src: &[u8], from: u32, count: u32) {
    let src_start = entry_offset(from);
    let src_end = entry_offset(count);
    let len = src_end - src_start;
    dst[HEADER_SIZE..HEADER_SIZE + len].copy_from_slice(&src[src_start..src_end]);
}

/// Overwrite just the key half of entry `i`, leaving its block pointer.
pub fn set_entry_key(buf: &mut [u8], i: u32, key: u64) {
    let off = entry_offset(i);
    buf[off..off + 8].copy_from_slice(&key.to_be_bytes());
}

/// Remove entry `at`, shifting entries `(at, count)` left by one slot.
/// Caller is responsible for decrementing `count`.
pub fn remove_entry(buf: &mut [u8], at: u32, count: u32) {
    let start = entry_offset(at);
    let end = entry_offset(count);
    buf.copy_within(start + ENTRY_SIZE..end, start);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_roundtrip() {
        let mut buf = vec![0u8; 256];
        init(&mut buf);
        set_count(&mut buf, 2);
        set_entry(&mut buf, 0, 0, 10);
        set_entry(&mut buf, 1, 42, 11);
        assert_eq!(count(&buf), 2);
        assert_eq!(entry_key(&buf, 1), 42);
        assert_eq!(entry_block(&buf, 1), 11);
        assert_eq!(entry_block(&buf, 0), 10);
    }

    #[test]
    fn shift_opens_hole() {
        let mut buf = vec![0u8; 256];
        init(&mut buf);
        set_count(&mut buf, 2);
        set_entry(&mut buf, 0, 0, 10);
        set_entry(&mut buf, 1, 20, 11);
        shift_right(&mut buf, 1, 2);
        set_entry(&mut buf, 1, 15, 99);
        set_count(&mut buf, 3);
        assert_eq!(entry_key(&buf, 1), 15);
        assert_eq!(entry_key(&buf, 2), 20);
        assert_eq!(entry_block(&buf, 2), 11);
    }
}
