use super::{StateStore, StoreOp, StoreResult, StoreValue};
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;

const BROADCAST_CAPACITY: usize = 1024;

struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn fresh(value: String) -> Self {
        Self {
            value,
            expires_at: None,
        }
    }

    fn is_expired(&self) -> bool {
        matches!(self.expires_at, Some(t) if Instant::now() >= t)
    }
}

/// In-process mock of [`StateStore`], backed by concurrent maps. Used by
/// every unit test and by `--store=memory` to run the whole binary with zero
/// external dependencies.
pub struct MemoryStore {
    strings: DashMap<String, Entry>,
    hashes: DashMap<String, HashMap<String, String>>,
    sets: DashMap<String, std::collections::HashSet<String>>,
    lists: DashMap<String, VecDeque<String>>,
    topics: Mutex<HashMap<String, broadcast::Sender<String>>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            strings: DashMap::new(),
            hashes: DashMap::new(),
            sets: DashMap::new(),
            lists: DashMap::new(),
            topics: Mutex::new(HashMap::new()),
        }
    }

    fn read_string(&self, key: &str) -> Option<String> {
        let expired = self
            .strings
            .get(key)
            .map(|e| e.is_expired())
            .unwrap_or(false);
        if expired {
            self.strings.remove(key);
            return None;
        }
        self.strings.get(key).map(|e| e.value.clone())
    }

    fn sender_for(&self, topic: &str) -> broadcast::Sender<String> {
        let mut topics = self.topics.lock().expect("topics mutex poisoned");
        topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(BROADCAST_CAPACITY).0)
            .clone()
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        Ok(self.read_string(key))
    }

    async fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        self.strings
            .insert(key.to_string(), Entry::fresh(value.to_string()));
        Ok(())
    }

    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> StoreResult<()> {
        self.strings.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: Some(Instant::now() + Duration::from_secs(ttl_secs)),
            },
        );
        Ok(())
    }

    async fn setnx(&self, key: &str, value: &str) -> StoreResult<bool> {
        if self.read_string(key).is_some() {
            return Ok(false);
        }
        self.strings
            .insert(key.to_string(), Entry::fresh(value.to_string()));
        Ok(true)
    }

    async fn expire(&self, key: &str, ttl_secs: u64) -> StoreResult<()> {
        if let Some(mut entry) = self.strings.get_mut(key) {
            entry.expires_at = Some(Instant::now() + Duration::from_secs(ttl_secs));
        }
        Ok(())
    }

    async fn del(&self, key: &str) -> StoreResult<()> {
        self.strings.remove(key);
        self.hashes.remove(key);
        self.sets.remove(key);
        self.lists.remove(key);
        Ok(())
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> StoreResult<()> {
        self.hashes
            .entry(key.to_string())
            .or_default()
            .insert(field.to_string(), value.to_string());
        Ok(())
    }

    async fn hget(&self, key: &str, field: &str) -> StoreResult<Option<String>> {
        Ok(self
            .hashes
            .get(key)
            .and_then(|h| h.get(field).cloned()))
    }

    async fn hgetall(&self, key: &str) -> StoreResult<HashMap<String, String>> {
        Ok(self.hashes.get(key).map(|h| h.clone()).unwrap_or_default())
    }

    async fn hdel(&self, key: &str, field: &str) -> StoreResult<()> {
        if let Some(mut h) = self.hashes.get_mut(key) {
            h.remove(field);
        }
        Ok(())
    }

    async fn hincrby(&self, key: &str, field: &str, delta: i64) -> StoreResult<i64> {
        let mut h = self.hashes.entry(key.to_string()).or_default();
        let current = h
            .get(field)
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(0);
        let updated = current + delta;
        h.insert(field.to_string(), updated.to_string());
        Ok(updated)
    }

    async fn sadd(&self, key: &str, member: &str) -> StoreResult<()> {
        self.sets
            .entry(key.to_string())
            .or_default()
            .insert(member.to_string());
        Ok(())
    }

    async fn srem(&self, key: &str, member: &str) -> StoreResult<()> {
        if let Some(mut s) = self.sets.get_mut(key) {
            s.remove(member);
        }
        Ok(())
    }

    async fn smembers(&self, key: &str) -> StoreResult<Vec<String>> {
        Ok(self
            .sets
            .get(key)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn sismember(&self, key: &str, member: &str) -> StoreResult<bool> {
        Ok(self
            .sets
            .get(key)
            .map(|s| s.contains(member))
            .unwrap_or(false))
    }

    async fn scard(&self, key: &str) -> StoreResult<usize> {
        Ok(self.sets.get(key).map(|s| s.len()).unwrap_or(0))
    }

    async fn lpush(&self, key: &str, value: &str) -> StoreResult<()> {
        self.lists
            .entry(key.to_string())
            .or_default()
            .push_front(value.to_string());
        Ok(())
    }

    async fn ltrim(&self, key: &str, start: isize, stop: isize) -> StoreResult<()> {
        if let Some(mut list) = self.lists.get_mut(key) {
            let len = list.len() as isize;
            let start = start.max(0).min(len) as usize;
            let stop = if stop < 0 { len + stop } else { stop };
            let stop = stop.max(-1).min(len - 1);
            if stop < start as isize {
                list.clear();
            } else {
                let stop = stop as usize;
                let trimmed: VecDeque<String> =
                    list.iter().skip(start).take(stop + 1 - start).cloned().collect();
                *list = trimmed;
            }
        }
        Ok(())
    }

    async fn lrange(&self, key: &str, start: isize, stop: isize) -> StoreResult<Vec<String>> {
        let Some(list) = self.lists.get(key) else {
            return Ok(Vec::new());
        };
        let len = list.len() as isize;
        if len == 0 {
            return Ok(Vec::new());
        }
        let start = if start < 0 { (len + start).max(0) } else { start.min(len) };
        let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };
        if stop < start {
            return Ok(Vec::new());
        }
        Ok(list
            .iter()
            .skip(start as usize)
            .take((stop - start + 1) as usize)
            .cloned()
            .collect())
    }

    async fn publish(&self, topic: &str, message: &str) -> StoreResult<()> {
        let sender = self.sender_for(topic);
        // No subscribers is not an error — matches redis PUBLISH semantics.
        let _ = sender.send(message.to_string());
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> StoreResult<broadcast::Receiver<String>> {
        Ok(self.sender_for(topic).subscribe())
    }

    async fn pipeline(&self, ops: Vec<StoreOp>) -> StoreResult<Vec<StoreValue>> {
        let mut results = Vec::with_capacity(ops.len());
        for op in ops {
            let value = match op {
                StoreOp::Set(k, v) => {
                    self.set(&k, &v).await?;
                    StoreValue::Ok
                }
                StoreOp::SetNx(k, v) => StoreValue::Bool(self.setnx(&k, &v).await?),
                StoreOp::Get(k) => StoreValue::Str(self.get(&k).await?),
                StoreOp::SAdd(k, m) => {
                    self.sadd(&k, &m).await?;
                    StoreValue::Ok
                }
                StoreOp::SRem(k, m) => {
                    self.srem(&k, &m).await?;
                    StoreValue::Ok
                }
                StoreOp::HSet(k, f, v) => {
                    self.hset(&k, &f, &v).await?;
                    StoreValue::Ok
                }
            };
            results.push(value);
        }
        Ok(results)
    }
}
