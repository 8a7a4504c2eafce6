use std::mem;

use crate::utils::align;

/// Offset of a block header, measured in bytes from the start of the arena.
pub(crate) type Link = Option<usize>;

/// Value stored in a header link field when there is no neighbour.
const NIL: usize = usize::MAX;

/// Bytes occupied by the raw [`Header`] before rounding to the arena alignment.
pub(crate) const RAW_HEADER_SIZE: usize = mem::size_of::<Header>();

/// Header size of a block once rounded up to `alignment`. Payloads start right
/// after it, so this keeps every payload on the alignment boundary.
pub(crate) fn header_size(alignment: usize) -> usize {
    align(RAW_HEADER_SIZE, alignment)
}

/// This is the structure of a block. The fields of the block are its metadata,
/// content is placed after this header.
///
/// ```text
/// +---------------------+ <------+
/// |        size         |        |
/// +---------------------+        |
/// |     next (offset)   |        | -> Header
/// +---------------------+        |
/// |     prev (offset)   |        |
/// +---------------------+ <------+ <-- payload returned to the user
/// |       Content       |        |
/// |         ...         |        | -> `size` addressable bytes
/// |         ...         |        |
/// +---------------------+ <------+
/// ```
///
/// `next` and `prev` are only meaningful while the block sits in the free list.
/// They hold arena offsets rather than addresses, so a header never points
/// outside the reservation it lives in.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Header {
    /// Usable bytes after the header, always a multiple of the alignment.
    pub size: usize,
    next: usize,
    prev: usize,
}

impl Header {
    pub const fn new(size: usize) -> Self {
        Self {
            size,
            next: NIL,
            prev: NIL,
        }
    }

    #[inline]
    pub fn next(&self) -> Link {
        decode(self.next)
    }

    #[inline]
    pub fn prev(&self) -> Link {
        decode(self.prev)
    }

    #[inline]
    pub fn set_next(&mut self, next: Link) {
        self.next = encode(next);
    }

    #[inline]
    pub fn set_prev(&mut self, prev: Link) {
        self.prev = encode(prev);
    }

    /// Drops both free list links.
    #[inline]
    pub fn unlink(&mut self) {
        self.next = NIL;
        self.prev = NIL;
    }
}

#[inline]
fn encode(link: Link) -> usize {
    link.unwrap_or(NIL)
}

#[inline]
fn decode(raw: usize) -> Link {
    (raw != NIL).then_some(raw)
}
