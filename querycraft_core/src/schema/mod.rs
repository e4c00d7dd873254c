//! Schema introspection, prompt rendering and the per-connection schema cache.

pub mod cache;
pub mod format;
pub mod introspect;
pub mod models;

pub use cache::SchemaCacheStore;
pub use models::{CacheStats, Relationship, SchemaCache, SchemaColumn};
