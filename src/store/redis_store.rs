use super::{StateStore, StoreOp, StoreResult, StoreValue};
use crate::error::GengarError;
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::broadcast;

const BROADCAST_CAPACITY: usize = 1024;

fn store_err(e: redis::RedisError) -> GengarError {
    GengarError::Store(e.to_string())
}

/// The external, durable implementation of [`StateStore`], built on the same
/// async redis client family the rest of the ecosystem reaches for.
///
/// Pub/sub is bridged through an in-process broadcast channel: a single
/// background task owns the redis `PubSub` connection per subscribed topic
/// and fans incoming messages out to local subscribers, since a cloned
/// `ConnectionManager` cannot itself enter subscribe mode.
pub struct RedisStore {
    conn: ConnectionManager,
    client: redis::Client,
    topics: Mutex<HashMap<String, broadcast::Sender<String>>>,
}

impl RedisStore {
    pub async fn connect(redis_url: &str) -> StoreResult<Self> {
        let client = redis::Client::open(redis_url).map_err(store_err)?;
        let conn = client
            .get_connection_manager()
            .await
            .map_err(store_err)?;
        Ok(Self {
            conn,
            client,
            topics: Mutex::new(HashMap::new()),
        })
    }

    fn sender_for(&self, topic: &str) -> broadcast::Sender<String> {
        let mut topics = self.topics.lock().expect("topics mutex poisoned");
        topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(BROADCAST_CAPACITY).0)
            .clone()
    }

    fn spawn_subscriber(&self, topic: String, tx: broadcast::Sender<String>) {
        let client = self.client.clone();
        tokio::spawn(async move {
            loop {
                let conn = match client.get_async_pubsub().await {
                    Ok(c) => c,
                    Err(e) => {
                        tracing::error!("store: redis pubsub connect failed, error={}", e);
                        tokio::time::sleep(std::time::Duration::from_secs(2)).await;
                        continue;
                    }
                };
                let mut pubsub = conn;
                if let Err(e) = pubsub.subscribe(&topic).await {
                    tracing::error!("store: redis subscribe failed, topic={}, error={}", topic, e);
                    tokio::time::sleep(std::time::Duration::from_secs(2)).await;
                    continue;
                }

                use futures_util::StreamExt;
                let mut stream = pubsub.on_message();
                while let Some(msg) = stream.next().await {
                    let payload: String = match msg.get_payload() {
                        Ok(p) => p,
                        Err(_) => continue,
                    };
                    let _ = tx.send(payload);
                }

                tracing::warn!("store: redis pubsub stream ended, topic={}, reconnecting", topic);
                tokio::time::sleep(std::time::Duration::from_secs(1)).await;
            }
        });
    }
}

#[async_trait]
impl StateStore for RedisStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let mut conn = self.conn.clone();
        conn.get(key).await.map_err(store_err)
    }

    async fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        conn.set(key, value).await.map_err(store_err)
    }

    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        conn.set_ex(key, value, ttl_secs).await.map_err(store_err)
    }

    async fn setnx(&self, key: &str, value: &str) -> StoreResult<bool> {
        let mut conn = self.conn.clone();
        conn.set_nx(key, value).await.map_err(store_err)
    }

    async fn expire(&self, key: &str, ttl_secs: u64) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        conn.expire(key, ttl_secs as i64).await.map_err(store_err)
    }

    async fn del(&self, key: &str) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        conn.del(key).await.map_err(store_err)
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        conn.hset(key, field, value).await.map_err(store_err)
    }

    async fn hget(&self, key: &str, field: &str) -> StoreResult<Option<String>> {
        let mut conn = self.conn.clone();
        conn.hget(key, field).await.map_err(store_err)
    }

    async fn hgetall(&self, key: &str) -> StoreResult<HashMap<String, String>> {
        let mut conn = self.conn.clone();
        conn.hgetall(key).await.map_err(store_err)
    }

    async fn hdel(&self, key: &str, field: &str) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        conn.hdel(key, field).await.map_err(store_err)
    }

    async fn hincrby(&self, key: &str, field: &str, delta: i64) -> StoreResult<i64> {
        let mut conn = self.conn.clone();
        conn.hincr(key, field, delta).await.map_err(store_err)
    }

    async fn sadd(&self, key: &str, member: &str) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        conn.sadd(key, member).await.map_err(store_err)
    }

    async fn srem(&self, key: &str, member: &str) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        conn.srem(key, member).await.map_err(store_err)
    }

    async fn smembers(&self, key: &str) -> StoreResult<Vec<String>> {
        let mut conn = self.conn.clone();
        conn.smembers(key).await.map_err(store_err)
    }

    async fn sismember(&self, key: &str, member: &str) -> StoreResult<bool> {
        let mut conn = self.conn.clone();
        conn.sismember(key, member).await.map_err(store_err)
    }

    async fn scard(&self, key: &str) -> StoreResult<usize> {
        let mut conn = self.conn.clone();
        conn.scard(key).await.map_err(store_err)
    }

    async fn lpush(&self, key: &str, value: &str) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        conn.lpush(key, value).await.map_err(store_err)
    }

    async fn ltrim(&self, key: &str, start: isize, stop: isize) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        conn.ltrim(key, start as isize, stop as isize)
            .await
            .map_err(store_err)
    }

    async fn lrange(&self, key: &str, start: isize, stop: isize) -> StoreResult<Vec<String>> {
        let mut conn = self.conn.clone();
        conn.lrange(key, start as isize, stop as isize)
            .await
            .map_err(store_err)
    }

    async fn publish(&self, topic: &str, message: &str) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        conn.publish(topic, message).await.map_err(store_err)
    }

    async fn subscribe(&self, topic: &str) -> StoreResult<broadcast::Receiver<String>> {
        let sender = self.sender_for(topic);
        if sender.receiver_count() == 0 {
            self.spawn_subscriber(topic.to_string(), sender.clone());
        }
        Ok(sender.subscribe())
    }

    async fn pipeline(&self, ops: Vec<StoreOp>) -> StoreResult<Vec<StoreValue>> {
        let mut pipe = redis::pipe();
        for op in &ops {
            match op {
                StoreOp::Set(k, v) => {
                    pipe.set(k, v).ignore();
                }
                StoreOp::SetNx(k, v) => {
                    pipe.set_nx(k, v);
                }
                StoreOp::Get(k) => {
                    pipe.get(k);
                }
                StoreOp::SAdd(k, m) => {
                    pipe.sadd(k, m).ignore();
                }
                StoreOp::SRem(k, m) => {
                    pipe.srem(k, m).ignore();
                }
                StoreOp::HSet(k, f, v) => {
                    pipe.hset(k, f, v).ignore();
                }
            }
        }

        let mut conn = self.conn.clone();
        let raw: Vec<redis::Value> = pipe.query_async(&mut conn).await.map_err(store_err)?;

        let mut results = Vec::with_capacity(ops.len());
        let mut raw_iter = raw.into_iter();
        for op in ops {
            let value = match op {
                StoreOp::Set(_, _) | StoreOp::SAdd(_, _) | StoreOp::SRem(_, _) | StoreOp::HSet(_, _, _) => {
                    StoreValue::Ok
                }
                StoreOp::SetNx(_, _) => {
                    let v = raw_iter.next();
                    let b: bool = v
                        .map(|rv| redis::FromRedisValue::from_redis_value(&rv).unwrap_or(false))
                        .unwrap_or(false);
                    StoreValue::Bool(b)
                }
                StoreOp::Get(_) => {
                    let v = raw_iter.next();
                    let s: Option<String> = v
                        .and_then(|rv| redis::FromRedisValue::from_redis_value(&rv).ok());
                    StoreValue::Str(s)
                }
            };
            results.push(value);
        }
        Ok(results)
    }
}
