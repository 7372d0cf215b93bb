//! Memory management for plugin processing.
//!
//! Image-effect plugins request large, short-lived buffers while rendering.
//! [`MemoryPool`] keeps released buffers around and hands them out again to
//! requests that fit, under a budget on checked-out bytes.
//!
//! - [`MemoryPool`]: the pool; allocation, accounting and eviction
//! - [`PoolBuffer`]: reference-counted checkout that returns to the pool on last drop
//! - [`PoolStats`]: accounting snapshot

mod pool;

pub use pool::{MemoryPool, PoolBuffer, PoolStats};
