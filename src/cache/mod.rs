//! Client-side caching for document collections.
//!
//! This module provides:
//! - A keyed store with lazy time-to-live expiry (`all`, `archived`, per pet)
//! - A cache-first loader that only hits the network on a miss
//! - Scoped invalidation after writes

mod layer;
mod store;
mod traits;

pub use layer::CacheLayer;
#[cfg(test)]
pub use store::testing;
pub use store::{CacheKey, CacheStore};
pub use traits::Cacheable;
