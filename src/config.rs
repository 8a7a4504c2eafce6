//! Arena configuration.
//!
//! The three constants that shape an arena: its total size, the alignment
//! boundary and, derived from it, the header size. They are fixed once the
//! arena is built.
//!
//! Values can be written in code with [`ArenaConfig::new`] or loaded through
//! figment:
//! 1. Default values
//! 2. An optional YAML file
//! 3. `MEMARENA_*` environment variables (`MEMARENA_ARENA_SIZE`,
//!    `MEMARENA_ALIGNMENT`, `MEMARENA_COALESCE`)

use std::{mem, path::Path};

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Yaml},
};
use serde::{Deserialize, Serialize};

use crate::{
    block,
    error::{ConfigError, LoadError},
    utils::checked_align,
};

/// Default total arena size: 1 MiB.
pub const DEFAULT_ARENA_SIZE: usize = 1 << 20;

/// Default alignment boundary for sizes and returned pointers.
pub const DEFAULT_ALIGNMENT: usize = 8;

/// Largest alignment accepted. The smallest page size we run on, so the base
/// address handed out by the OS is always aligned.
pub const MAX_ALIGNMENT: usize = 4096;

/// How much merging happens after each `free`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoalescePolicy {
    /// Stop after the first merge of an adjacent pair.
    SinglePass,
    /// Keep merging until no two free blocks are physically adjacent.
    #[default]
    UntilStable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArenaConfig {
    /// Total bytes reserved from the OS, headers included.
    pub arena_size: usize,
    /// Alignment of every block size and returned pointer. Power of two.
    pub alignment: usize,
    pub coalesce: CoalescePolicy,
}

impl Default for ArenaConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl ArenaConfig {
    pub const DEFAULT: Self = Self::new(DEFAULT_ARENA_SIZE, DEFAULT_ALIGNMENT);

    pub const fn new(arena_size: usize, alignment: usize) -> Self {
        Self {
            arena_size,
            alignment,
            coalesce: CoalescePolicy::UntilStable,
        }
    }

    pub const fn with_coalesce(mut self, coalesce: CoalescePolicy) -> Self {
        self.coalesce = coalesce;
        self
    }

    /// Bytes taken by every block header.
    pub fn header_size(&self) -> usize {
        block::header_size(self.alignment)
    }

    /// Arena size rounded up to the alignment. This is the total conserved
    /// across all blocks for the lifetime of the arena.
    pub fn total_size(&self) -> Result<usize, ConfigError> {
        checked_align(self.arena_size, self.alignment)
            .ok_or(ConfigError::ArenaSizeOverflow(self.arena_size))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let alignment = self.alignment;

        if !alignment.is_power_of_two() {
            return Err(ConfigError::AlignmentNotPowerOfTwo(alignment));
        }

        let min = mem::align_of::<usize>();
        if alignment < min {
            return Err(ConfigError::AlignmentTooSmall { alignment, min });
        }

        if alignment > MAX_ALIGNMENT {
            return Err(ConfigError::AlignmentTooLarge {
                alignment,
                max: MAX_ALIGNMENT,
            });
        }

        // One header plus the smallest payload.
        let min = self.header_size() + alignment;
        if self.total_size()? < min {
            return Err(ConfigError::ArenaTooSmall {
                arena_size: self.arena_size,
                min,
            });
        }

        Ok(())
    }

    /// Provider chain used by [`ArenaConfig::load`].
    pub fn figment(path: Option<&Path>) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(ArenaConfig::default()));

        if let Some(path) = path {
            figment = figment.merge(Yaml::file(path));
        }

        figment.merge(Env::prefixed("MEMARENA_"))
    }

    /// Loads defaults, then the YAML file at `path` if any, then the
    /// environment, and validates the result.
    pub fn load(path: Option<&Path>) -> Result<Self, LoadError> {
        Self::from_figment(Self::figment(path))
    }

    pub fn from_figment(figment: Figment) -> Result<Self, LoadError> {
        let config: ArenaConfig = figment.extract()?;
        config.validate()?;
        Ok(config)
    }
}
