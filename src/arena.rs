use std::{fmt, ptr::NonNull};

use tracing::{debug, trace, warn};

use crate::{
    block::Header,
    config::{ArenaConfig, CoalescePolicy},
    error::{AllocError, FreeError, InitError, InvariantViolation},
    freelist::FreeList,
    region::Region,
    utils::checked_align,
};

/// A first-fit allocator over one fixed-size region reserved from the OS.
///
/// The region is reserved lazily by the first [`Arena::alloc`] (or an
/// explicit [`Arena::init`]) and then split into blocks on demand. Freed
/// blocks go back to an address-ordered free list and are merged with
/// their physical neighbours. Memory is never handed back to the OS while
/// the arena lives; dropping the arena releases the whole region.
///
/// ```text
///   +--------+---------------+--------+--------+--------+---------------+
///   | Header |  allocated    | Header |  free  | Header |     free      |
///   +--------+---------------+--------+--------+--------+---------------+
///                                 ^                 ^
///                free list head --+---- next -------+
/// ```
///
/// An `Arena` is single-threaded. Wrap it in [`crate::LockedArena`] to share it.
pub struct Arena {
    config: ArenaConfig,
    state: State,
}

enum State {
    Uninit,
    Ready(Heap),
    /// Initialisation failed. Kept so every later call fails the same way.
    Failed(InitError),
}

/// An initialised arena: the reservation plus the free blocks inside it.
struct Heap {
    region: Region,
    free_list: FreeList,
}

impl Heap {
    fn init(config: &ArenaConfig) -> Result<Self, InitError> {
        let mut region = Region::reserve(config)?;
        let mut free_list = FreeList::new();

        // One free block spanning everything after the first header.
        let size = region.len() - region.header_size();
        free_list.insert(&mut region, 0, size);

        Ok(Self { region, free_list })
    }

    fn alloc(&mut self, requested: usize) -> Result<NonNull<u8>, AllocError> {
        let header_size = self.region.header_size();
        let aligned = checked_align(requested, self.region.alignment())
            .ok_or(AllocError::Overflow { requested })?;

        let Some(block) = self.free_list.find_free_block(&self.region, aligned) else {
            warn!(requested, aligned, "out of memory");
            return Err(AllocError::OutOfMemory { requested, aligned });
        };

        let size = self.region.header(block).size;
        let leftover = size - aligned;

        if leftover == 0 {
            trace!(block, size, "exact fit");
        } else if leftover > header_size {
            // Shrink the found block and give its tail back as a new free block.
            self.region.update(block, |h| h.size = aligned);

            let remainder = self.region.block_end(block, aligned);
            self.free_list
                .insert(&mut self.region, remainder, leftover - header_size);

            trace!(block, aligned, remainder, "split block");
        } else {
            // Too small to hold a header of its own; the block is handed out whole.
            trace!(block, size, aligned, "kept oversized block");
        }

        self.free_list.remove(&mut self.region, block);

        Ok(self.region.payload(block))
    }

    fn free(&mut self, ptr: NonNull<u8>, policy: CoalescePolicy) -> Result<(), FreeError> {
        let block = self.region.block_of(ptr)?;
        let size = self.region.header(block).size;

        let fits = self.region.len() - block - self.region.header_size() >= size;
        if size == 0 || size % self.region.alignment() != 0 || !fits {
            return Err(FreeError::CorruptHeader {
                offset: block,
                size,
            });
        }

        self.free_list.insert(&mut self.region, block, size);
        let merged = self.free_list.coalesce(&mut self.region, policy);

        trace!(block, size, merged, "freed block");
        Ok(())
    }

    /// Visits every block in physical order, free or allocated, calling `f`
    /// with its offset and header. Stops at the first block that would run
    /// past the end of the region and returns the number of bytes covered.
    fn walk<F>(&self, mut f: F) -> usize
    where
        F: FnMut(usize, &Header),
    {
        let mut offset = 0;

        while offset < self.region.len() {
            let header = self.region.header(offset);
            let end = self.region.block_end(offset, header.size);

            if header.size == 0 || end > self.region.len() {
                break;
            }

            f(offset, &header);
            offset = end;
        }

        offset
    }
}

impl Arena {
    /// Creates an arena. Nothing is reserved until the first allocation.
    pub const fn new(config: ArenaConfig) -> Self {
        Self {
            config,
            state: State::Uninit,
        }
    }

    #[inline]
    pub fn config(&self) -> &ArenaConfig {
        &self.config
    }

    #[inline]
    pub fn is_initialized(&self) -> bool {
        matches!(self.state, State::Ready(_))
    }

    /// Largest request a fresh arena can satisfy.
    pub fn capacity(&self) -> usize {
        self.config
            .total_size()
            .map_or(0, |total| total.saturating_sub(self.config.header_size()))
    }

    /// Reserves the region if that has not happened yet.
    ///
    /// Runs at most once: later calls are no-ops, or return the cached
    /// error if the first attempt failed.
    pub fn init(&mut self) -> Result<(), InitError> {
        self.heap_mut().map(|_| ())
    }

    fn heap_mut(&mut self) -> Result<&mut Heap, InitError> {
        if let State::Uninit = self.state {
            self.state = match Heap::init(&self.config) {
                Ok(heap) => State::Ready(heap),
                Err(error) => {
                    debug!(%error, "arena initialisation failed");
                    State::Failed(error)
                }
            };
        }

        match &mut self.state {
            State::Ready(heap) => Ok(heap),
            State::Failed(error) => Err(error.clone()),
            State::Uninit => unreachable!("arena state is set above"),
        }
    }

    fn heap(&self) -> Option<&Heap> {
        match &self.state {
            State::Ready(heap) => Some(heap),
            _ => None,
        }
    }

    /// Allocates at least `size` bytes and returns a pointer aligned to the
    /// configured alignment.
    ///
    /// The first call reserves the arena. Fails with
    /// [`AllocError::ZeroSize`] for empty requests,
    /// [`AllocError::OutOfMemory`] when no free block is large enough (state
    /// is left untouched) and [`AllocError::InitFailed`] when the arena could
    /// not be reserved.
    pub fn alloc(&mut self, size: usize) -> Result<NonNull<u8>, AllocError> {
        if size == 0 {
            return Err(AllocError::ZeroSize);
        }

        self.heap_mut()?.alloc(size)
    }

    /// Returns the block behind `ptr` to the free list and merges it with
    /// adjacent free blocks.
    ///
    /// # Safety
    ///
    /// `ptr` must have been returned by [`Arena::alloc`] on this arena and not
    /// freed since. Pointers outside the region or off a payload boundary are
    /// rejected, but a double free or a pointer into the middle of an
    /// allocation is not detected and corrupts the free list.
    pub unsafe fn free(&mut self, ptr: NonNull<u8>) -> Result<(), FreeError> {
        let policy = self.config.coalesce;

        match &mut self.state {
            State::Ready(heap) => heap.free(ptr, policy),
            _ => Err(FreeError::Uninitialized),
        }
    }

    /// Usable bytes recorded for the live allocation at `ptr`. This can be
    /// more than was requested.
    pub fn usable_size(&self, ptr: NonNull<u8>) -> Result<usize, FreeError> {
        let heap = self.heap().ok_or(FreeError::Uninitialized)?;
        let block = heap.region.block_of(ptr)?;

        Ok(heap.region.header(block).size)
    }

    /// Free blocks in list order.
    pub fn free_blocks(&self) -> impl Iterator<Item = FreeBlockInfo> + '_ {
        self.heap().into_iter().flat_map(|heap| {
            heap.free_list
                .iter(&heap.region)
                .map(move |(offset, header)| FreeBlockInfo {
                    offset,
                    address: heap.region.address(offset),
                    size: header.size,
                    prev: header.prev().map(|prev| heap.region.address(prev)),
                    next: header.next().map(|next| heap.region.address(next)),
                })
        })
    }

    /// Snapshot of the free list for debugging. The format is not stable.
    pub fn dump(&self) -> FreeListDump {
        FreeListDump {
            blocks: self.free_blocks().collect(),
        }
    }

    /// Emits [`Arena::dump`] at debug level.
    pub fn log_free_list(&self) {
        for block in self.free_blocks() {
            debug!(
                size = block.size,
                block = %format!("{:#x}", block.address),
                prev = ?block.prev.map(|addr| format!("{addr:#x}")),
                next = ?block.next.map(|addr| format!("{addr:#x}")),
                "free block"
            );
        }
    }

    /// Walks every block to report how the arena is used.
    pub fn stats(&self) -> ArenaStats {
        let mut stats = ArenaStats {
            arena_size: self.config.total_size().unwrap_or(self.config.arena_size),
            header_size: self.config.header_size(),
            ..ArenaStats::default()
        };

        let Some(heap) = self.heap() else {
            return stats;
        };

        // Both walks are in address order, so one cursor into the free
        // list is enough to classify every physical block.
        let mut free = heap.free_list.iter(&heap.region).peekable();

        heap.walk(|offset, header| {
            while free.next_if(|&(next, _)| next < offset).is_some() {}

            if free.next_if(|&(next, _)| next == offset).is_some() {
                stats.free_blocks += 1;
                stats.free_bytes += header.size;
            } else {
                stats.allocated_blocks += 1;
                stats.allocated_bytes += header.size;
            }
        });

        stats
    }

    /// Checks the structural invariants of the arena: the free list is
    /// strictly sorted with consistent links, every block size is aligned,
    /// every free block starts on a block boundary and the blocks exactly
    /// cover the region.
    ///
    /// An uninitialised arena trivially passes.
    pub fn check_invariants(&self) -> Result<(), InvariantViolation> {
        let Some(heap) = self.heap() else {
            return Ok(());
        };

        let region = &heap.region;
        let alignment = region.alignment();

        let mut prev: Option<usize> = None;

        // A cycle would have to step back to a lower offset, so the
        // sortedness check also bounds this walk.
        for (offset, header) in heap.free_list.iter(region) {
            if let Some(prev) = prev {
                if offset <= prev {
                    return Err(InvariantViolation::Unsorted { prev, next: offset });
                }
            }

            if header.prev() != prev {
                return Err(InvariantViolation::BrokenLink { offset });
            }

            prev = Some(offset);
        }

        // The list is sorted now, so it can be matched against the physical
        // walk with a single cursor. Any free entry the walk steps over does
        // not start a block.
        let mut free = heap.free_list.iter(region).map(|(offset, _)| offset).peekable();
        let mut stray = None;
        let mut unaligned = None;

        let covered = heap.walk(|offset, header| {
            while let Some(skipped) = free.next_if(|&next| next < offset) {
                stray.get_or_insert(skipped);
            }
            free.next_if_eq(&offset);

            if header.size % alignment != 0 && unaligned.is_none() {
                unaligned = Some((offset, header.size));
            }
        });

        if let Some((offset, size)) = unaligned {
            return Err(InvariantViolation::Unaligned { offset, size });
        }

        if covered != region.len() {
            return Err(InvariantViolation::Conservation {
                covered,
                arena_size: region.len(),
            });
        }

        if let Some(offset) = stray.or_else(|| free.next()) {
            return Err(InvariantViolation::StrayFreeBlock { offset });
        }

        Ok(())
    }
}

impl Default for Arena {
    fn default() -> Self {
        Self::new(ArenaConfig::default())
    }
}

/// One entry of the free list as seen by [`Arena::free_blocks`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreeBlockInfo {
    /// Offset of the header from the start of the arena.
    pub offset: usize,
    /// Address of the header.
    pub address: usize,
    /// Usable bytes, excluding the header.
    pub size: usize,
    /// Address of the previous free block.
    pub prev: Option<usize>,
    /// Address of the next free block.
    pub next: Option<usize>,
}

/// Printable listing of the free list, one block per line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FreeListDump {
    pub blocks: Vec<FreeBlockInfo>,
}

impl fmt::Display for FreeListDump {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn addr(link: Option<usize>) -> String {
            link.map_or_else(|| "nil".to_owned(), |addr| format!("{addr:#x}"))
        }

        if self.blocks.is_empty() {
            return writeln!(f, "free list: empty");
        }

        for block in &self.blocks {
            writeln!(
                f,
                "size: {:>8}  block: {:#x}  prev: {}  next: {}",
                block.size,
                block.address,
                addr(block.prev),
                addr(block.next)
            )?;
        }

        Ok(())
    }
}

/// Usage figures from a physical walk of the arena.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ArenaStats {
    pub arena_size: usize,
    pub header_size: usize,
    pub free_blocks: usize,
    pub free_bytes: usize,
    pub allocated_blocks: usize,
    pub allocated_bytes: usize,
}

impl ArenaStats {
    /// Bytes accounted for by all blocks and their headers.
    pub fn covered(&self) -> usize {
        (self.free_blocks + self.allocated_blocks) * self.header_size
            + self.free_bytes
            + self.allocated_bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    fn arena() -> Arena {
        Arena::new(ArenaConfig::new(4096, 8))
    }

    #[test]
    fn arena_is_created_lazily() {
        let mut arena = arena();
        assert!(!arena.is_initialized());
        assert_eq!(0, arena.free_blocks().count());

        arena.alloc(1).unwrap();

        assert!(arena.is_initialized());
    }

    #[test]
    fn init_is_idempotent() {
        let mut arena = arena();

        arena.init().unwrap();
        let before = arena.dump();
        arena.init().unwrap();

        assert_eq!(before, arena.dump());
        assert_eq!(1, before.blocks.len());
        assert_eq!(arena.capacity(), before.blocks[0].size);
    }

    #[test]
    fn zero_size_is_rejected_without_initialising() {
        let mut arena = arena();

        assert_eq!(Err(AllocError::ZeroSize), arena.alloc(0));
        assert!(!arena.is_initialized());
    }

    #[test]
    fn init_failure_is_cached() {
        let mut arena = Arena::new(ArenaConfig::new(4096, 24));

        let first = arena.alloc(16).unwrap_err();
        let second = arena.alloc(16).unwrap_err();

        assert!(matches!(first, AllocError::InitFailed(InitError::InvalidConfig(_))));
        assert_eq!(first, second);
        assert!(!arena.is_initialized());
    }

    #[test]
    fn refused_reservation_is_cached() {
        // Far more address space than any machine will map.
        let mut arena = Arena::new(ArenaConfig::new(1 << 62, 8));

        let first = arena.alloc(16).unwrap_err();
        let second = arena.alloc(16).unwrap_err();

        let AllocError::InitFailed(error) = &first else {
            panic!("expected an init failure, got {first:?}");
        };
        assert!(matches!(error, InitError::Reserve { len, .. } if *len == 1 << 62));
        assert_eq!(first, second);
        assert_eq!(Err(error.clone()), arena.init());
        assert!(!arena.is_initialized());
    }

    #[test]
    fn overflowing_request_fails() {
        let mut arena = arena();

        assert_eq!(
            Err(AllocError::Overflow { requested: usize::MAX }),
            arena.alloc(usize::MAX)
        );
    }

    #[test]
    fn split_leaves_a_free_tail() {
        let mut arena = arena();
        let header_size = arena.config().header_size();

        let ptr = arena.alloc(100).unwrap();

        assert_eq!(Ok(104), arena.usable_size(ptr));
        let free: Vec<_> = arena.free_blocks().collect();
        assert_eq!(1, free.len());
        assert_eq!(header_size + 104, free[0].offset);
        assert_eq!(4096 - header_size - 104 - header_size, free[0].size);
        assert_eq!(Ok(()), arena.check_invariants());
    }

    #[test]
    fn small_leftover_is_not_split() {
        let mut arena = arena();
        let header_size = arena.config().header_size();
        let capacity = arena.capacity();

        // Leaves exactly one header's worth, which is not enough to split.
        let ptr = arena.alloc(capacity - header_size).unwrap();

        assert_eq!(Ok(capacity), arena.usable_size(ptr));
        assert_eq!(0, arena.free_blocks().count());
        assert_eq!(Ok(()), arena.check_invariants());
    }

    #[test]
    fn free_restores_a_single_block() {
        let mut arena = arena();

        let a = arena.alloc(64).unwrap();
        let b = arena.alloc(128).unwrap();
        let c = arena.alloc(32).unwrap();

        unsafe {
            arena.free(b).unwrap();
            arena.free(a).unwrap();
            arena.free(c).unwrap();
        }

        let free: Vec<_> = arena.free_blocks().collect();
        assert_eq!(1, free.len());
        assert_eq!(arena.capacity(), free[0].size);
        assert_eq!(Ok(()), arena.check_invariants());
    }

    #[test]
    fn single_pass_policy_can_leave_neighbours_unmerged() {
        let config = ArenaConfig::new(4096, 8).with_coalesce(CoalescePolicy::SinglePass);
        let mut arena = Arena::new(config);

        let a = arena.alloc(64).unwrap();
        let b = arena.alloc(64).unwrap();
        let c = arena.alloc(64).unwrap();
        let _d = arena.alloc(64).unwrap();

        unsafe {
            arena.free(a).unwrap();
            arena.free(c).unwrap();
            // a, b and c are now one free run, but only a and b get merged.
            arena.free(b).unwrap();
        }

        let free: Vec<_> = arena.free_blocks().collect();
        assert_eq!(3, free.len());
        assert_eq!(
            free[1].offset,
            free[0].offset + arena.config().header_size() + free[0].size
        );
        assert_eq!(Ok(()), arena.check_invariants());
    }

    #[test]
    fn free_rejects_foreign_pointers() {
        let mut arena = arena();
        let mut local = 0u64;
        let local = NonNull::from(&mut local).cast::<u8>();

        assert_eq!(Err(FreeError::Uninitialized), unsafe { arena.free(local) });

        arena.init().unwrap();
        assert!(matches!(
            unsafe { arena.free(local) },
            Err(FreeError::ForeignPointer { .. })
        ));
    }

    #[test]
    fn stats_account_for_every_byte() {
        let mut arena = arena();
        let a = arena.alloc(40).unwrap();
        let _b = arena.alloc(300).unwrap();
        unsafe { arena.free(a).unwrap() };

        let stats = arena.stats();

        assert_eq!(1, stats.allocated_blocks);
        assert_eq!(304, stats.allocated_bytes);
        assert_eq!(2, stats.free_blocks);
        assert_eq!(4096, stats.covered());
    }

    #[test]
    fn dump_lists_every_free_block() {
        let mut arena = arena();
        assert_eq!("free list: empty\n", arena.dump().to_string());

        let a = arena.alloc(16).unwrap();
        let _b = arena.alloc(16).unwrap();
        unsafe { arena.free(a).unwrap() };

        let dump = arena.dump().to_string();

        assert_eq!(2, dump.lines().count());
        assert!(dump.lines().next().unwrap().contains("prev: nil"));
        assert!(dump.lines().last().unwrap().contains("next: nil"));
    }

    #[traced_test]
    #[test]
    fn out_of_memory_is_logged() {
        let mut arena = arena();

        assert!(matches!(
            arena.alloc(8192),
            Err(AllocError::OutOfMemory { requested: 8192, aligned: 8192 })
        ));
        assert!(logs_contain("out of memory"));
    }
}
