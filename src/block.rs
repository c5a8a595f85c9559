//! The buffered block device (spec §1, §2, §6): out of scope to implement
//! for real, but the core is parametric over it. `BlockCache` is the trait
//! the engine consumes; `MemBlockCache` is an in-memory reference
//! implementation used by this crate's own tests.

use std::cell::RefCell;
use std::rc::Rc;

use crate::error::{IndexError, Result};

/// A pinned, mutable view of one block.
///
/// A handle is pinned for as long as it's held; dropping it without going
/// through [`BlockCache::release`] / [`BlockCache::release_dirty`] is a
/// caller bug in a real cache (this trait doesn't enforce it — the engine
/// always calls one of the two on every path, per spec §5).
pub trait BlockHandle {
    /// The block number this handle refers to.
    fn number(&self) -> u64;
    /// Read-only view of the block's bytes.
    fn data(&self) -> &[u8];
    /// Mutable view of the block's bytes.
    fn data_mut(&mut self) -> &mut [u8];
    /// Mark the block dirty without releasing it.
    fn mark_dirty(&mut self);
}

/// The block buffer cache. Blocks are fixed-size (`blocksize` bytes, per
/// the superblock); every successful read/allocate returns a pinned
/// handle that must be released exactly once.
pub trait BlockCache {
    type Handle: BlockHandle;

    /// Allocate a free block number from the underlying allocator
    /// (spec §1's "block allocator" collaborator).
    fn balloc(&mut self) -> Result<u64>;

    /// Get a new, zeroed, pinned block at a freshly allocated number.
    fn get_new(&mut self) -> Result<Self::Handle>;

    /// Read an existing block by number, pinned.
    fn get(&mut self, blocknr: u64) -> Result<Self::Handle>;

    /// Release a handle without marking it dirty.
    fn release(&mut self, handle: Self::Handle);

    /// Release a handle, marking it dirty first.
    fn release_dirty(&mut self, mut handle: Self::Handle) {
        handle.mark_dirty();
        self.release(handle);
    }

    /// Return a block to the allocator. Per spec §5, a block freed while
    /// still pinned elsewhere must not corrupt on-disk state; the
    /// reference implementation simply defers the free via a tombstone
    /// until the pin count drops to zero.
    fn free(&mut self, blocknr: u64);

    /// Current pin count of a block (0 if not resident), for tests and
    /// invariant checks.
    fn pin_count(&self, blocknr: u64) -> u32;
}

struct MemBlock {
    data: Vec<u8>,
    pins: u32,
    freed: bool,
}

struct MemBlockCacheInner {
    blocksize: usize,
    blocks: Vec<MemBlock>,
    next_free: u64,
    free_list: Vec<u64>,
}

/// In-memory reference [`BlockCache`]. Not part of the on-disk core —
/// this is test/example tooling standing in for the external buffer
/// device, the way `MemBlockCache` in a real filesystem would be backed
/// by a page cache over a block device.
#[derive(Clone)]
pub struct MemBlockCache {
    inner: Rc<RefCell<MemBlockCacheInner>>,
}

impl MemBlockCache {
    pub fn new(blocksize: usize) -> Self {
        Self {
            inner: Rc::new(RefCell::new(MemBlockCacheInner {
                blocksize,
                blocks: Vec::new(),
                next_free: 0,
                free_list: Vec::new(),
            })),
        }
    }

    pub fn blocksize(&self) -> usize {
        self.inner.borrow().blocksize
    }
}

pub struct MemHandle {
    inner: Rc<RefCell<MemBlockCacheInner>>,
    blocknr: u64,
    // Local copy; written back to the shared store on drop/release so
    // `&mut [u8]` can be handed out without borrowing the RefCell live.
    data: Vec<u8>,
    dirty: bool,
}

impl BlockHandle for MemHandle {
    fn number(&self) -> u64 {
        self.blocknr
    }

    fn data(&self) -> &[u8] {
        &self.data
    }

    fn data_mut(&mut self) -> &mut [u8] {
        self.dirty = true;
        &mut self.data
    }

    fn mark_dirty(&mut self) {
        self.dirty = true;
    }
}

impl Drop for MemHandle {
    fn drop(&mut self) {
        let mut inner = self.inner.borrow_mut();
        if self.dirty {
            if let Some(block) = inner.blocks.get_mut(self.blocknr as usize) {
                block.data.copy_from_slice(&self.data);
            }
        }
        if let Some(block) = inner.blocks.get_mut(self.blocknr as usize) {
            block.pins = block.pins.saturating_sub(1);
        }
    }
}

impl BlockCache for MemBlockCache {
    type Handle = MemHandle;

    fn balloc(&mut self) -> Result<u64> {
        let mut inner = self.inner.borrow_mut();
        if let Some(blocknr) = inner.free_list.pop() {
            return Ok(blocknr);
        }
        let blocknr = inner.next_free;
        inner.next_free += 1;
        Ok(blocknr)
    }

    fn get_new(&mut self) -> Result<Self::Handle> {
        let blocknr = self.balloc()?;
        let mut inner = self.inner.borrow_mut();
        let blocksize = inner.blocksize;
        while inner.blocks.len() <= blocknr as usize {
            inner.blocks.push(MemBlock {
                data: vec![0u8; blocksize],
                pins: 0,
                freed: false,
            });
        }
        let block = &mut inner.blocks[blocknr as usize];
        block.data.iter_mut().for_each(|b| *b = 0);
        block.freed = false;
        block.pins += 1;
        let data = block.data.clone();
        drop(inner);
        Ok(MemHandle {
            inner: self.inner.clone(),
            blocknr,
            data,
            dirty: false,
        })
    }

    fn get(&mut self, blocknr: u64) -> Result<Self::Handle> {
        let mut inner = self.inner.borrow_mut();
        let block = inner
            .blocks
            .get_mut(blocknr as usize)
            .ok_or(IndexError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "block never allocated",
            )))?;
        if block.freed {
            return Err(IndexError::Invalid("read of freed block"));
        }
        block.pins += 1;
        let data = block.data.clone();
        drop(inner);
        Ok(MemHandle {
            inner: self.inner.clone(),
            blocknr,
            data,
            dirty: false,
        })
    }

    fn release(&mut self, handle: Self::Handle) {
        drop(handle);
    }

    fn free(&mut self, blocknr: u64) {
        let mut inner = self.inner.borrow_mut();
        if let Some(block) = inner.blocks.get_mut(blocknr as usize) {
            if block.pins == 0 {
                block.freed = true;
                inner.free_list.push(blocknr);
            } else {
                // Still pinned: mark empty, defer actual release (spec §5).
                block.freed = true;
            }
        }
    }

    fn pin_count(&self, blocknr: u64) -> u32 {
        self.inner
            .borrow()
            .blocks
            .get(blocknr as usize)
            .map(|b| b.pins)
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_read_write_roundtrip() {
        let mut cache = MemBlockCache::new(64);
        let mut h = cache.get_new().unwrap();
        assert_eq!(h.number(), 0);
        h.data_mut()[0] = 0xab;
        cache.release_dirty(h);

        let h2 = cache.get(0).unwrap();
        assert_eq!(h2.data()[0], 0xab);
        assert_eq!(cache.pin_count(0), 1);
        cache.release(h2);
        assert_eq!(cache.pin_count(0), 0);
    }

    #[test]
    fn free_after_release_is_reusable() {
        let mut cache = MemBlockCache::new(64);
        let h = cache.get_new().unwrap();
        let nr = h.number();
        cache.release(h);
        cache.free(nr);
        let nr2 = cache.balloc().unwrap();
        assert_eq!(nr, nr2);
    }
}
