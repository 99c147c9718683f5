pub mod memory;
pub mod redis_store;

#[cfg(test)]
mod tests;

use crate::error::GengarError;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::broadcast;

pub type StoreResult<T> = Result<T, GengarError>;

/// A single queued operation for [`StateStore::pipeline`]. Pipelines execute
/// in submission order and return one [`StoreValue`] per operation, but are
/// not required to be a transaction.
#[derive(Debug, Clone)]
pub enum StoreOp {
    Set(String, String),
    SetNx(String, String),
    Get(String),
    SAdd(String, String),
    SRem(String, String),
    HSet(String, String, String),
}

/// Result of a single [`StoreOp`] within a pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreValue {
    Ok,
    Bool(bool),
    Str(Option<String>),
}

/// The keyed/set/hash/list/pub-sub capability that is the only coupling
/// surface between Gengar's modules (SPEC_FULL.md §4.A). Two implementations
/// ship: [`redis_store::RedisStore`] (the external store) and
/// [`memory::MemoryStore`] (an in-process mock usable in tests with zero
/// external dependencies).
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn get(&self, key: &str) -> StoreResult<Option<String>>;
    async fn set(&self, key: &str, value: &str) -> StoreResult<()>;
    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> StoreResult<()>;
    /// Set if not already present. Returns `true` if the key was written.
    async fn setnx(&self, key: &str, value: &str) -> StoreResult<bool>;
    async fn expire(&self, key: &str, ttl_secs: u64) -> StoreResult<()>;
    async fn del(&self, key: &str) -> StoreResult<()>;

    async fn hset(&self, key: &str, field: &str, value: &str) -> StoreResult<()>;
    async fn hget(&self, key: &str, field: &str) -> StoreResult<Option<String>>;
    async fn hgetall(&self, key: &str) -> StoreResult<HashMap<String, String>>;
    async fn hdel(&self, key: &str, field: &str) -> StoreResult<()>;
    /// Atomically increments `field` by `delta`, returning the new value.
    async fn hincrby(&self, key: &str, field: &str, delta: i64) -> StoreResult<i64>;

    async fn sadd(&self, key: &str, member: &str) -> StoreResult<()>;
    async fn srem(&self, key: &str, member: &str) -> StoreResult<()>;
    async fn smembers(&self, key: &str) -> StoreResult<Vec<String>>;
    async fn sismember(&self, key: &str, member: &str) -> StoreResult<bool>;
    async fn scard(&self, key: &str) -> StoreResult<usize>;

    /// Prepend `value`; the list grows from the head.
    async fn lpush(&self, key: &str, value: &str) -> StoreResult<()>;
    /// Trim the list to the inclusive range `[start, stop]` (0-based from head).
    async fn ltrim(&self, key: &str, start: isize, stop: isize) -> StoreResult<()>;
    async fn lrange(&self, key: &str, start: isize, stop: isize) -> StoreResult<Vec<String>>;

    async fn publish(&self, topic: &str, message: &str) -> StoreResult<()>;
    /// Subscribe to `topic`. Late subscribers miss backlog published before
    /// the call returns; delivery order matches publish order per publisher.
    async fn subscribe(&self, topic: &str) -> StoreResult<broadcast::Receiver<String>>;

    /// Execute a batch of operations in submission order. Individual
    /// operations are atomic; the batch as a whole is not required to be.
    async fn pipeline(&self, ops: Vec<StoreOp>) -> StoreResult<Vec<StoreValue>>;
}
