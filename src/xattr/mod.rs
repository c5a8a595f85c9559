//! Inline xattr cache: an unsorted per-inode record list (spec §3, §4.3)
//! plus the atom refcount/reverse-map side tables an on-disk atom number
//! resolves through.

pub mod atom;
pub mod codec;
pub mod xcache;

pub use atom::{get_atom_revmap, make_atom, set_atom_revmap, use_atom, AtomDirectory};
pub use codec::{decode_attrs, decode_xsize, encode_xattrs, encode_xsize};
pub use xcache::XCache;

use crate::block::BlockCache;
use crate::error::Result;
use crate::superblock::SbView;

/// `get_xattr`/`set_xattr` convenience wrappers (spec §9 supplement):
/// resolve a name to an atom through an [`AtomDirectory`], then read or
/// write the cache entry for it.
pub fn get_xattr<'a, D: AtomDirectory>(dir: &D, xcache: &'a XCache, name: &[u8]) -> Option<&'a [u8]> {
    let atom = dir.find_atom(name)?;
    xcache.lookup(atom as u16)
}

pub fn set_xattr<C: BlockCache, D: AtomDirectory>(
    cache: &mut C,
    sb: &SbView,
    dir: &mut D,
    atomgen: &mut u64,
    xcache: &mut XCache,
    name: &[u8],
    data: &[u8],
) -> Result<()> {
    let atom = make_atom(cache, sb, dir, atomgen, name)?;
    xcache.update(atom as u16, Some(data));
    Ok(())
}
