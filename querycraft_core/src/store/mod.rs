//! Persistence: the platform database (`AppDb`) and the key-value cache.

pub mod memory;
pub mod models;
pub mod postgres;
pub mod redis;
pub mod traits;

pub use memory::{InMemoryAppDb, InMemoryCache};
pub use postgres::PostgresAppDb;
pub use redis::RedisCache;
