pub mod store;
pub mod memory;
pub mod redis_store;
pub mod tenant;

pub use store::*;
pub use memory::InMemoryStore;
pub use redis_store::RedisStore;
pub use tenant::*;
