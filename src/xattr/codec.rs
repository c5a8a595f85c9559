//! Inline xattr wire encoding (spec §4.3): encode a cache's records into
//! an inode's attribute stream, and decode them back.
//!
//! Wire record: `kind_and_version: u16, bytes: u16, atom: u16, body[bytes - 2]`.
//! Only records whose version matches the current superblock version are
//! accepted back into the cache on decode — others are skipped but their
//! bytes are still consumed, so the stream stays walkable.
//!
//! This codec only speaks the xattr record kind. The original's general
//! attribute stream also carries inode metadata records (ctime, mode,
//! data-btree root, ...) interleaved with xattrs; that side of the
//! stream is out of this crate's scope, so decode stops rather than
//! skipping over a kind it doesn't model.

use crate::superblock::SbView;
use crate::xattr::xcache::XCache;

/// The only stream-record kind this codec understands.
const XATTR_KIND: u16 = 0x1;

fn encode_kind(kind: u16, version: u16) -> u16 {
    (kind << 12) | (version & 0x0fff)
}

/// Encode every record in `xcache` into `attrs`, stopping once there's
/// no room left for another record header. Returns the number of bytes
/// written.
pub fn encode_xattrs(sb: &SbView, xcache: &XCache, attrs: &mut [u8]) -> usize {
    if attrs.len() < 3 {
        return 0;
    }
    let limit = attrs.len() - 3;
    let mut off = 0;
    for (atom, body) in xcache.iter() {
        if off >= limit {
            break;
        }
        let head = encode_kind(XATTR_KIND, sb.version);
        attrs[off..off + 2].copy_from_slice(&head.to_be_bytes());
        attrs[off + 2..off + 4].copy_from_slice(&((body.len() + 2) as u16).to_be_bytes());
        attrs[off + 4..off + 6].copy_from_slice(&atom.to_be_bytes());
        attrs[off + 6..off + 6 + body.len()].copy_from_slice(body);
        off += 6 + body.len();
    }
    off
}

/// Predicted `encode_xattrs` output length for `xcache`'s current
/// contents — lets a caller reserve an exact-sized slot before encoding.
pub fn encode_xsize(xcache: &XCache) -> usize {
    xcache.iter().map(|(_, body)| 6 + body.len()).sum()
}

/// Decode `attrs` into `xcache`, replacing its current contents.
/// Returns the number of bytes consumed.
pub fn decode_attrs(sb: &SbView, xcache: &mut XCache, attrs: &[u8]) -> usize {
    xcache.clear();
    let mut off = 0;
    while off + 1 < attrs.len() {
        let head = u16::from_be_bytes(attrs[off..off + 2].try_into().unwrap());
        let kind = head >> 12;
        let version = head & 0x0fff;
        off += 2;
        if kind != XATTR_KIND {
            break;
        }
        let bytes = u16::from_be_bytes(attrs[off..off + 2].try_into().unwrap()) as usize;
        off += 2;
        if version == sb.version {
            let atom = u16::from_be_bytes(attrs[off..off + 2].try_into().unwrap());
            let body = &attrs[off + 2..off + bytes];
            xcache.update(atom, Some(body));
        }
        off += bytes;
    }
    off
}

/// Predicted in-memory [`XCache`] size `decode_attrs` would produce from
/// `attrs`, without actually decoding.
pub fn decode_xsize(sb: &SbView, attrs: &[u8]) -> usize {
    let mut off = 0;
    let mut total = 0;
    while off + 1 < attrs.len() {
        let head = u16::from_be_bytes(attrs[off..off + 2].try_into().unwrap());
        let kind = head >> 12;
        let version = head & 0x0fff;
        off += 2;
        if kind != XATTR_KIND {
            break;
        }
        let bytes = u16::from_be_bytes(attrs[off..off + 2].try_into().unwrap()) as usize;
        off += 2;
        if version == sb.version {
            total += 4 + (bytes - 2);
        }
        off += bytes;
    }
    total
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sb() -> SbView {
        SbView {
            blocksize: 4096,
            blockbits: 12,
            entries_per_node: SbView::max_entries_per_node(4096),
            entries_per_leaf: 64,
            atomref_base: 0,
            highref_base: 0,
            atomrev_base: 0,
            version: 0,
        }
    }

    #[test]
    fn encode_decode_roundtrip_preserves_order() {
        let sb = sb();
        let mut xcache = XCache::new();
        xcache.update(0x666, Some(b"hello"));
        xcache.update(0x777, Some(b"world!"));
        xcache.update(0x111, Some(b"class"));
        xcache.update(0x666, None);
        xcache.update(0x222, Some(b"boooyah"));

        let predicted = encode_xsize(&xcache);
        let mut buf = vec![0u8; 1000];
        let written = encode_xattrs(&sb, &xcache, &mut buf);
        assert_eq!(written, predicted);

        let predicted_decode = decode_xsize(&sb, &buf[..written]);
        let mut decoded = XCache::new();
        let consumed = decode_attrs(&sb, &mut decoded, &buf[..written]);
        assert_eq!(consumed, written);
        assert_eq!(decoded.size(), predicted_decode);

        let records: Vec<_> = decoded.iter().collect();
        assert_eq!(records[0].0, 0x777);
        assert_eq!(records[1].0, 0x111);
        assert_eq!(records[2].0, 0x222);
    }

    #[test]
    fn decode_skips_mismatched_version() {
        let sb = sb();
        let mut stale = sb;
        stale.version = 7;
        let mut xcache = XCache::new();
        xcache.update(1, Some(b"x"));
        let mut buf = vec![0u8; 64];
        let written = encode_xattrs(&stale, &xcache, &mut buf);

        let mut decoded = XCache::new();
        decode_attrs(&sb, &mut decoded, &buf[..written]);
        assert!(decoded.is_empty());
    }
}
