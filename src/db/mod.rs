pub mod redis;
pub mod sqlite;
pub mod store;

pub use self::redis::{create_redis_client, Cache, CacheKey, CacheWriterHandle};
pub use self::sqlite::{create_memory_pool, create_pool, init_schema, SqliteStore};
pub use self::store::Store;
