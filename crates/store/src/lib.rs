// crates/store/src/lib.rs
//! Redis-backed job registry and the pub/sub feed that bridges shared-store
//! publications onto in-process channel subscribers.

pub mod feed;
pub mod redis_registry;

pub use feed::RedisFeed;
pub use redis_registry::RedisRegistry;

use evalhub_core::RegistryError;
use redis::RedisError;

/// Classify a redis error for callers that only know the registry contract.
pub(crate) fn registry_error(err: RedisError) -> RegistryError {
    if err.is_io_error()
        || err.is_connection_dropped()
        || err.is_connection_refusal()
        || err.is_timeout()
    {
        RegistryError::Unavailable(err.to_string())
    } else {
        RegistryError::Command(err.to_string())
    }
}
