//! Error types returned by the allocator and its configuration layer.

use std::io;

use thiserror::Error;

/// A rejected [`crate::ArenaConfig`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("alignment {0} is not a power of two")]
    AlignmentNotPowerOfTwo(usize),

    #[error("alignment {alignment} is below the header's own alignment of {min}")]
    AlignmentTooSmall { alignment: usize, min: usize },

    #[error("alignment {alignment} exceeds the maximum of {max}")]
    AlignmentTooLarge { alignment: usize, max: usize },

    #[error("arena of {arena_size} bytes cannot hold a block (need at least {min})")]
    ArenaTooSmall { arena_size: usize, min: usize },

    #[error("arena size {0} overflows when rounded to the alignment")]
    ArenaSizeOverflow(usize),
}

/// Failure while reading a configuration out of its providers.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("configuration parsing error: {0}")]
    Parsing(#[from] Box<figment::Error>),

    #[error(transparent)]
    Invalid(#[from] ConfigError),
}

impl From<figment::Error> for LoadError {
    fn from(error: figment::Error) -> Self {
        LoadError::Parsing(Box::new(error))
    }
}

/// The arena could not be set up. Once this happens the arena keeps returning
/// the same error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InitError {
    #[error("invalid arena configuration: {0}")]
    InvalidConfig(#[from] ConfigError),

    #[error("alignment {alignment} exceeds the page size {page_size}")]
    PageAlignment { alignment: usize, page_size: usize },

    #[error("the operating system refused to reserve {len} bytes: {kind}")]
    Reserve { len: usize, kind: io::ErrorKind },
}

/// Reasons an allocation request can fail.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AllocError {
    #[error("zero-sized allocation requested")]
    ZeroSize,

    #[error("request of {requested} bytes overflows when aligned")]
    Overflow { requested: usize },

    #[error("out of memory: no free block holds {aligned} bytes (requested {requested})")]
    OutOfMemory { requested: usize, aligned: usize },

    #[error("arena initialisation failed: {0}")]
    InitFailed(#[from] InitError),
}

/// Reasons a pointer handed to `free` is rejected.
///
/// Only cheap checks are made: double frees and pointers to the middle of a
/// live allocation that happen to sit on a payload boundary go undetected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FreeError {
    #[error("the arena has not been initialised")]
    Uninitialized,

    #[error("pointer {addr:#x} does not belong to this arena")]
    ForeignPointer { addr: usize },

    #[error("pointer {addr:#x} is not aligned to a payload boundary")]
    Misaligned { addr: usize },

    #[error("header of block at offset {offset} records an impossible size {size}")]
    CorruptHeader { offset: usize, size: usize },
}

/// A broken structural property found by [`crate::Arena::check_invariants`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvariantViolation {
    #[error("free list is not sorted: block {next} follows block {prev}")]
    Unsorted { prev: usize, next: usize },

    #[error("free list links disagree at block {offset}")]
    BrokenLink { offset: usize },

    #[error("free block {offset} is not on a physical block boundary")]
    StrayFreeBlock { offset: usize },

    #[error("block {offset} has unaligned size {size}")]
    Unaligned { offset: usize, size: usize },

    #[error("blocks cover {covered} bytes but the arena holds {arena_size}")]
    Conservation { covered: usize, arena_size: usize },
}
