//! Tag-based cache invalidation over a flat key/value backend.
//!
//! Call sites attach a few well-known tags to every cached read so that a
//! write can drop every dependent entry without enumerating composite keys.

mod backend;
pub mod keys;
mod memory;
mod redis_backend;
mod service;
mod tags;

pub use backend::{CacheBackend, CacheError};
pub use memory::MemoryBackend;
pub use redis_backend::RedisBackend;
pub use service::CacheService;
pub use tags::CacheTagIndex;
