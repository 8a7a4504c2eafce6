//! # memarena - a first-fit allocator over a single arena
//!
//! This crate hands out memory from one fixed-size region that is reserved
//! from the operating system once (`mmap` on unix, `VirtualAlloc` on
//! windows) and never grown.
//!
//! ```text
//!   +--------+-----------+--------+--------+--------+------------------+
//!   | Header | allocated | Header |  free  | Header |       free       |
//!   +--------+-----------+--------+--------+--------+------------------+
//!   ^                             |                 ^
//!   arena base                    +------ next -----+
//! ```
//!
//! Every block, free or allocated, starts with a header that stores its
//! usable size. Free blocks additionally use the header to link themselves
//! into a free list kept sorted by address:
//!
//! - `alloc` walks the free list and takes the first block that is large
//!   enough (first fit), splitting off the tail as a new free block when the
//!   leftover can hold a header of its own.
//! - `free` puts the block back at its address-ordered position and merges
//!   it with any physically adjacent free blocks.
//!
//! ## Crate Structure
//!
//! ```text
//!   memarena
//!   ├── arena     - Arena: alloc, free and diagnostics
//!   ├── locked    - LockedArena: mutex wrapper and GlobalAlloc impl
//!   ├── config    - ArenaConfig and its figment loader
//!   ├── error     - error types
//!   ├── freelist  - address-ordered free list (internal)
//!   ├── region    - the OS reservation and header access (internal)
//!   ├── block     - block header layout (internal)
//!   ├── kernel    - platform memory syscalls (internal)
//!   └── utils     - alignment helpers
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use memarena::{Arena, ArenaConfig};
//!
//! let mut arena = Arena::new(ArenaConfig::new(4096, 8));
//!
//! let ptr = arena.alloc(100).unwrap();
//! unsafe {
//!     ptr.as_ptr().write_bytes(0xAB, 100);
//!     arena.free(ptr).unwrap();
//! }
//!
//! println!("{}", arena.dump());
//! ```
//!
//! ## Limitations
//!
//! - **Fixed size**: the arena is never grown and memory is never returned
//!   to the OS before the arena is dropped.
//! - **Single-threaded core**: [`Arena`] needs `&mut self`; use
//!   [`LockedArena`] to share one.
//! - **Unchecked provenance**: `free` only rejects pointers outside the
//!   arena or off a payload boundary. Double frees are not detected.

mod arena;
mod block;
pub mod config;
pub mod error;
mod freelist;
mod kernel;
mod locked;
mod region;
pub mod utils;

pub use arena::{Arena, ArenaStats, FreeBlockInfo, FreeListDump};
pub use config::{ArenaConfig, CoalescePolicy};
pub use error::{AllocError, ConfigError, FreeError, InitError, InvariantViolation, LoadError};
pub use locked::LockedArena;
