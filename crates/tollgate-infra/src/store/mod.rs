//! Backing-store adapters.

mod memory;
mod redis;
mod resp;

pub use memory::InMemoryStore;
pub use redis::RespClient;
