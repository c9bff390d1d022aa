//! # Tollgate Infrastructure
//!
//! Concrete implementations of the ports defined in `tollgate-core`:
//! the RESP wire client, an in-memory store for tests and local
//! development, and the rate-limit and quota engines built on top.

pub mod quota;
pub mod rate_limit;
pub mod store;

pub use quota::QuotaCounter;
pub use rate_limit::TokenBucketLimiter;
pub use store::{InMemoryStore, RespClient};
