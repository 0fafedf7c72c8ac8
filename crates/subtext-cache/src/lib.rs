//! Tiered caching for the subtext pipeline.
//!
//! This crate provides:
//! - The process-local hot tier (bounded LRU with TTL)
//! - The shared Redis tier behind the [`SharedCache`] trait
//! - The cache coordinator: read-through lookups with promotion,
//!   single-flight reservation, and ordered commits

pub mod coordinator;
pub mod error;
pub mod keys;
pub mod memory;
pub mod redis;
pub mod shared;
#[doc(hidden)]
pub mod testing;

pub use coordinator::{
    ArtifactStore, CacheCoordinator, CoordinatorConfig, InvalidateScope, Lookup, Reservation,
    TierOrigin,
};
pub use error::{CacheError, CacheResult};
pub use memory::{CacheStats, MemoryTier, MemoryTierConfig};
pub use self::redis::RedisTier;
pub use shared::SharedCache;
