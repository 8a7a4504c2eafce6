use std::{
    alloc::{GlobalAlloc, Layout},
    ptr::{self, NonNull},
};

use parking_lot::{Mutex, const_mutex};

use crate::{
    arena::Arena,
    config::ArenaConfig,
    error::{AllocError, FreeError},
};

/// An [`Arena`] behind a single lock, so it can be shared between threads or
/// installed as the `#[global_allocator]`.
///
/// Every operation takes the lock for its whole duration: the search, the
/// split, the free list updates and the merging all happen inside one
/// critical section.
///
/// ```rust,ignore
/// use memarena::{ArenaConfig, LockedArena};
///
/// #[global_allocator]
/// static ALLOCATOR: LockedArena = LockedArena::new(ArenaConfig::new(64 << 20, 16));
/// ```
///
/// The lock is not reentrant. When used as the global allocator, do not
/// install a `tracing` subscriber that allocates while handling the
/// allocator's own events.
pub struct LockedArena {
    inner: Mutex<Arena>,
}

impl LockedArena {
    pub const fn new(config: ArenaConfig) -> Self {
        Self {
            inner: const_mutex(Arena::new(config)),
        }
    }

    pub fn alloc(&self, size: usize) -> Result<NonNull<u8>, AllocError> {
        self.inner.lock().alloc(size)
    }

    /// # Safety
    ///
    /// Same contract as [`Arena::free`].
    pub unsafe fn free(&self, ptr: NonNull<u8>) -> Result<(), FreeError> {
        unsafe { self.inner.lock().free(ptr) }
    }

    /// Runs `f` with exclusive access to the arena.
    ///
    /// When this arena is the global allocator, `f` must not allocate: the
    /// allocation would wait on the lock `f` is already holding. The
    /// inspection methods [`Arena::stats`], [`Arena::check_invariants`],
    /// [`Arena::free_blocks`] and [`Arena::usable_size`] are allocation-free.
    /// [`Arena::dump`] and [`Arena::log_free_list`] are not.
    pub fn with<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&mut Arena) -> R,
    {
        f(&mut *self.inner.lock())
    }
}

unsafe impl GlobalAlloc for LockedArena {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        let mut arena = self.inner.lock();

        // Every block is aligned to the arena alignment and nothing more.
        if layout.align() > arena.config().alignment {
            return ptr::null_mut();
        }

        arena
            .alloc(layout.size())
            .map_or(ptr::null_mut(), NonNull::as_ptr)
    }

    unsafe fn dealloc(&self, ptr: *mut u8, _layout: Layout) {
        if let Some(ptr) = NonNull::new(ptr) {
            // `dealloc` cannot report failure. The guard is gone by the
            // time the assertion formats its message.
            let result = unsafe { self.inner.lock().free(ptr) };
            debug_assert!(result.is_ok(), "rejected dealloc of {ptr:p}: {result:?}");
        }
    }
}
