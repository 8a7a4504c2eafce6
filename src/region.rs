use std::ptr::NonNull;

use tracing::debug;

use crate::{
    block::{Header, RAW_HEADER_SIZE},
    config::ArenaConfig,
    error::{FreeError, InitError},
    kernel,
};

/// The single reservation an arena carves all of its blocks from.
///
/// Blocks are addressed by their byte offset from `base`. Every header access
/// goes through [`Region::header`] / [`Region::write_header`], which check that
/// the offset is aligned and that the whole header lies inside the mapping.
///
/// ```text
///  base
///   |
///   v
/// +--------+-----------+--------+-----------+-----+--------+-----------+
/// | Header |  payload  | Header |  payload  | ... | Header |  payload  |
/// +--------+-----------+--------+-----------+-----+--------+-----------+
///   ^ offset 0            ^ header_size + size                          ^ len
/// ```
pub(crate) struct Region {
    base: NonNull<u8>,
    len: usize,
    header_size: usize,
    alignment: usize,
}

// The region exclusively owns its mapping; the raw base pointer is never
// shared outside of the blocks handed to callers.
unsafe impl Send for Region {}

impl Region {
    /// Reserves `config.total_size()` bytes from the OS.
    pub fn reserve(config: &ArenaConfig) -> Result<Self, InitError> {
        config.validate()?;

        let page_size = kernel::page_size();
        if config.alignment > page_size {
            return Err(InitError::PageAlignment {
                alignment: config.alignment,
                page_size,
            });
        }

        let len = config.total_size()?;
        let base = unsafe { kernel::request_memory(len) }.map_err(|error| InitError::Reserve {
            len,
            kind: error.kind(),
        })?;

        debug!(
            base = ?base,
            len,
            header_size = config.header_size(),
            alignment = config.alignment,
            "reserved arena"
        );

        Ok(Self {
            base,
            len,
            header_size: config.header_size(),
            alignment: config.alignment,
        })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn header_size(&self) -> usize {
        self.header_size
    }

    #[inline]
    pub fn alignment(&self) -> usize {
        self.alignment
    }

    /// Address of the byte at `offset`, for diagnostics.
    #[inline]
    pub fn address(&self, offset: usize) -> usize {
        self.base.as_ptr() as usize + offset
    }

    /// First byte past the block whose header sits at `offset`.
    #[inline]
    pub fn block_end(&self, offset: usize, size: usize) -> usize {
        offset + self.header_size + size
    }

    pub fn header(&self, offset: usize) -> Header {
        self.check(offset);

        unsafe { self.base.as_ptr().add(offset).cast::<Header>().read() }
    }

    pub fn write_header(&mut self, offset: usize, header: Header) {
        self.check(offset);

        unsafe { self.base.as_ptr().add(offset).cast::<Header>().write(header) }
    }

    /// Reads the header at `offset`, lets `f` change it and writes it back.
    pub fn update<F>(&mut self, offset: usize, f: F)
    where
        F: FnOnce(&mut Header),
    {
        let mut header = self.header(offset);
        f(&mut header);
        self.write_header(offset, header);
    }

    /// Pointer handed to the user for the block at `offset`.
    pub fn payload(&self, offset: usize) -> NonNull<u8> {
        self.check(offset);

        unsafe { self.base.add(offset + self.header_size) }
    }

    /// Maps a payload pointer back to the offset of its header.
    pub fn block_of(&self, ptr: NonNull<u8>) -> Result<usize, FreeError> {
        let addr = ptr.as_ptr() as usize;
        let base = self.base.as_ptr() as usize;

        if addr < base + self.header_size || addr >= base + self.len {
            return Err(FreeError::ForeignPointer { addr });
        }

        let offset = addr - base - self.header_size;
        if offset % self.alignment != 0 {
            return Err(FreeError::Misaligned { addr });
        }

        Ok(offset)
    }

    /// Any failure here means the free list itself is corrupt.
    #[inline]
    fn check(&self, offset: usize) {
        assert!(
            offset % self.alignment == 0 && offset + RAW_HEADER_SIZE <= self.len,
            "block offset {offset} is outside the arena of {} bytes",
            self.len
        );
    }
}

impl Drop for Region {
    fn drop(&mut self) {
        unsafe { kernel::return_memory(self.base, self.len) }
    }
}
