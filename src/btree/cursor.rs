//! Cursor: an ordered stack of `(buffer, next-entry-index)` (spec §3, §9).
//!
//! The original C cursor stores `next` as a raw pointer into the index
//! block's entry array. That pointer is invalidated the instant a split
//! or merge rewrites the block in place. Per spec §9's redesign note this
//! is modeled as `(handle, index)` instead, with the entry pointer
//! recomputed from the index on every access.

use crate::block::{BlockCache, BlockHandle};
use crate::btree::node;

/// One level of a cursor. For internal levels, `next` is the index of the
/// entry that will be visited next on a left-to-right traversal (the
/// sibling immediately after the one just descended through). For the
/// leaf level (the last one), `next` is unused.
pub struct CursorLevel<H> {
    pub handle: H,
    pub next: u32,
}

/// A root-to-leaf path, pinned for as long as it's held.
pub struct Cursor<H> {
    pub levels: Vec<CursorLevel<H>>,
}

impl<H: BlockHandle> Cursor<H> {
    pub fn depth(&self) -> usize {
        self.levels.len() - 1
    }

    pub fn leaf(&self) -> &[u8] {
        self.levels.last().unwrap().handle.data()
    }

    pub fn leaf_mut(&mut self) -> &mut [u8] {
        self.levels.last_mut().unwrap().handle.data_mut()
    }

    pub fn leaf_handle_mut(&mut self) -> &mut H {
        &mut self.levels.last_mut().unwrap().handle
    }

    /// Is `level`'s traversal exhausted (no more siblings to the right)?
    pub fn level_finished(&self, level: usize) -> bool {
        let lvl = &self.levels[level];
        lvl.next == node::count(lvl.handle.data())
    }

    /// Release every pinned handle in this cursor via `cache`.
    pub fn release<C: BlockCache<Handle = H>>(self, cache: &mut C) {
        for level in self.levels {
            cache.release(level.handle);
        }
    }

    /// Remove the entry that led into `level`'s now merged-away child:
    /// shift the node's entries left, drop the count, and back `next` up
    /// by one. If the removed entry was the node's own leftmost (index
    /// 0), the node's new minimum key changed, so climb to whichever
    /// ancestor still holds the stale separator for this subtree — the
    /// first one not itself entered via its own leftmost entry — and
    /// rewrite it (spec §4.1 `remove_index`, kernel/btree.c:215-245).
    pub fn remove_index(&mut self, level: usize) {
        let at = self.levels[level].next - 1;
        let data = self.levels[level].handle.data_mut();
        let cnt = node::count(data);
        node::remove_entry(data, at, cnt);
        node::set_count(data, cnt - 1);
        self.levels[level].next = at;
        self.levels[level].handle.mark_dirty();

        if self.level_finished(level) || at != 0 || level == 0 {
            return;
        }

        let sep = node::entry_key(self.levels[level].handle.data(), 0);
        let mut i = level - 1;
        loop {
            if self.levels[i].next != 1 {
                break;
            }
            if i == 0 {
                return;
            }
            i -= 1;
        }
        let at_i = self.levels[i].next - 1;
        node::set_entry_key(self.levels[i].handle.data_mut(), at_i, sep);
        self.levels[i].handle.mark_dirty();
    }
}

/// Release the first `n` levels of a partially-built cursor (used on
/// probe/advance error paths where only some levels were pinned).
pub fn release_levels<H: BlockHandle, C: BlockCache<Handle = H>>(
    cache: &mut C,
    levels: Vec<CursorLevel<H>>,
) {
    for level in levels {
        cache.release(level.handle);
    }
}
