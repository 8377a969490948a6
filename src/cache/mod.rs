//! The relationship cache.
//!
//! A read/write-through cache tier over the relationship store plus the raw
//! key-value operations backing presence, routing and message queues. The
//! cache is never authoritative: every entry can be rebuilt from the store.
//!
//! Error policy: operations that serve cached views swallow redis errors and
//! degrade to a miss, so callers fall back to the store. Operations backing
//! presence and queues return the error, their callers decide.

use std::fmt::{Display, Formatter};
use std::future::Future;
use std::sync::Arc;

use log::warn;
use redis::aio::ConnectionManager;

use crate::cache::single_flight::SingleFlight;
use crate::config::CacheConfig;

pub mod entries;
pub mod keys;
mod single_flight;

/// The errors of the cache tier
#[derive(Debug)]
pub enum CacheError {
    /// The redis instance could not be reached or rejected a command
    Redis(redis::RedisError),
}

impl Display for CacheError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            CacheError::Redis(err) => write!(f, "cache unavailable: {err}"),
        }
    }
}

impl std::error::Error for CacheError {}

impl From<redis::RedisError> for CacheError {
    fn from(value: redis::RedisError) -> Self {
        Self::Redis(value)
    }
}

/// Cache handle over a shared multiplexed redis connection.
///
/// Cloning is cheap, all clones share the connection and the single-flight
/// state.
#[derive(Clone)]
pub struct RelationshipCache {
    conn: ConnectionManager,
    relation_ttl: u64,
    derived_ttl: u64,
    presence_ttl: u64,
    list_flight: Arc<SingleFlight<Vec<String>>>,
    value_flight: Arc<SingleFlight<String>>,
}

impl RelationshipCache {
    /// Connect to the redis instance configured in `config`.
    ///
    /// Fails fast if the instance does not answer a PING.
    pub async fn connect(config: &CacheConfig) -> Result<Self, CacheError> {
        let client = redis::Client::open(config.url.as_str())?;
        let mut conn = ConnectionManager::new(client).await?;

        redis::cmd("PING").query_async::<String>(&mut conn).await?;

        Ok(Self {
            conn,
            relation_ttl: config.relation_ttl,
            derived_ttl: config.derived_ttl,
            presence_ttl: config.presence_ttl,
            list_flight: Arc::new(SingleFlight::new()),
            value_flight: Arc::new(SingleFlight::new()),
        })
    }

    /// TTL for relationship lists
    pub fn relation_ttl(&self) -> u64 {
        self.relation_ttl
    }

    /// TTL for derived views
    pub fn derived_ttl(&self) -> u64 {
        self.derived_ttl
    }

    /// TTL for presence and routing entries
    pub fn presence_ttl(&self) -> u64 {
        self.presence_ttl
    }

    /// Retrieve a singleton value, treating errors as a miss
    pub async fn value(&self, key: &str) -> Option<String> {
        match self.raw_value(key).await {
            Ok(value) => value,
            Err(err) => {
                warn!("Cache read for {key} failed: {err}");
                None
            }
        }
    }

    /// Store a singleton value, swallowing errors
    pub async fn put_value(&self, key: &str, payload: &str, ttl: u64) {
        let mut conn = self.conn.clone();
        if let Err(err) = redis::cmd("SETEX")
            .arg(key)
            .arg(ttl)
            .arg(payload)
            .query_async::<()>(&mut conn)
            .await
        {
            warn!("Cache write for {key} failed: {err}");
        }
    }

    /// Remove a key, swallowing errors
    pub async fn invalidate(&self, key: &str) {
        if let Err(err) = self.delete(key).await {
            warn!("Cache invalidation for {key} failed: {err}");
        }
    }

    /// Cache-aside read of a singleton value.
    ///
    /// On a miss, `load` is run (coalesced per key) to fetch the value from
    /// the store and the cache is backfilled with `ttl`.
    pub async fn value_or_load<F, Fut>(&self, key: &str, ttl: u64, load: F) -> Option<String>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Option<String>>,
    {
        if let Some(payload) = self.value(key).await {
            return Some(payload);
        }

        self.value_flight
            .run(key, || async {
                // The leader may have been beaten to the backfill
                if let Some(payload) = self.value(key).await {
                    return Some(payload);
                }
                let payload = load().await?;
                self.put_value(key, &payload, ttl).await;
                Some(payload)
            })
            .await
    }

    /// Retrieve a list value.
    ///
    /// An empty list is indistinguishable from an absent key in redis, both
    /// are reported as a miss. Errors degrade to a miss as well.
    pub async fn list(&self, key: &str) -> Option<Vec<String>> {
        let mut conn = self.conn.clone();
        match redis::cmd("LRANGE")
            .arg(key)
            .arg(0)
            .arg(-1)
            .query_async::<Vec<String>>(&mut conn)
            .await
        {
            Ok(items) if items.is_empty() => None,
            Ok(items) => Some(items),
            Err(err) => {
                warn!("Cache read for {key} failed: {err}");
                None
            }
        }
    }

    /// Cache-aside read of a list value.
    ///
    /// On a miss, `load` is run (coalesced per key) to fetch the items from
    /// the store and the cache is backfilled with `ttl`.
    pub async fn list_or_load<F, Fut>(&self, key: &str, ttl: u64, load: F) -> Option<Vec<String>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Option<Vec<String>>>,
    {
        if let Some(items) = self.list(key).await {
            return Some(items);
        }

        self.list_flight
            .run(key, || async {
                if let Some(items) = self.list(key).await {
                    return Some(items);
                }
                let items = load().await?;
                if !items.is_empty() {
                    self.replace_list(key, &items, ttl).await;
                }
                Some(items)
            })
            .await
    }

    /// Append a payload to a list and refresh its TTL, swallowing errors
    pub async fn append_to_list(&self, key: &str, payload: &str, ttl: u64) {
        let mut conn = self.conn.clone();
        if let Err(err) = redis::pipe()
            .cmd("RPUSH")
            .arg(key)
            .arg(payload)
            .ignore()
            .cmd("EXPIRE")
            .arg(key)
            .arg(ttl)
            .ignore()
            .query_async::<()>(&mut conn)
            .await
        {
            warn!("Cache append for {key} failed: {err}");
        }
    }

    /// Remove every list entry matching `predicate`, swallowing errors
    pub async fn remove_from_list<P>(&self, key: &str, predicate: P)
    where
        P: Fn(&str) -> bool,
    {
        let Some(items) = self.list(key).await else {
            return;
        };

        let mut conn = self.conn.clone();
        for item in items.iter().filter(|item| predicate(item)) {
            if let Err(err) = redis::cmd("LREM")
                .arg(key)
                .arg(0)
                .arg(item)
                .query_async::<()>(&mut conn)
                .await
            {
                warn!("Cache removal from {key} failed: {err}");
            }
        }
    }

    /// Atomically replace a list with `payloads` and set its TTL
    pub async fn replace_list(&self, key: &str, payloads: &[String], ttl: u64) {
        let mut conn = self.conn.clone();
        let mut pipe = redis::pipe();
        pipe.atomic().cmd("DEL").arg(key).ignore();
        for payload in payloads {
            pipe.cmd("RPUSH").arg(key).arg(payload).ignore();
        }
        pipe.cmd("EXPIRE").arg(key).arg(ttl).ignore();

        if let Err(err) = pipe.query_async::<()>(&mut conn).await {
            warn!("Cache rebuild for {key} failed: {err}");
        }
    }

    /// Add a member to a set and refresh its TTL, swallowing errors
    pub async fn add_to_set(&self, key: &str, member: &str, ttl: u64) {
        let mut conn = self.conn.clone();
        if let Err(err) = redis::pipe()
            .cmd("SADD")
            .arg(key)
            .arg(member)
            .ignore()
            .cmd("EXPIRE")
            .arg(key)
            .arg(ttl)
            .ignore()
            .query_async::<()>(&mut conn)
            .await
        {
            warn!("Cache set add for {key} failed: {err}");
        }
    }

    /// Membership test against a cached set.
    ///
    /// Returns [None] when the set is absent (or redis failed), so the caller
    /// can rebuild it from the store. `SISMEMBER` alone can't distinguish
    /// "not a member" from "set never built".
    pub async fn set_contains(&self, key: &str, member: &str) -> Option<bool> {
        let mut conn = self.conn.clone();
        let result = redis::pipe()
            .cmd("EXISTS")
            .arg(key)
            .cmd("SISMEMBER")
            .arg(key)
            .arg(member)
            .query_async::<(bool, bool)>(&mut conn)
            .await;

        match result {
            Ok((true, is_member)) => Some(is_member),
            Ok((false, _)) => None,
            Err(err) => {
                warn!("Cache set lookup for {key} failed: {err}");
                None
            }
        }
    }

    /// Atomically replace a set with `members` and set its TTL
    pub async fn replace_set(&self, key: &str, members: &[String], ttl: u64) {
        let mut conn = self.conn.clone();
        let mut pipe = redis::pipe();
        pipe.atomic().cmd("DEL").arg(key).ignore();
        for member in members {
            pipe.cmd("SADD").arg(key).arg(member).ignore();
        }
        pipe.cmd("EXPIRE").arg(key).arg(ttl).ignore();

        if let Err(err) = pipe.query_async::<()>(&mut conn).await {
            warn!("Cache set rebuild for {key} failed: {err}");
        }
    }

    /// Retrieve a singleton value
    pub async fn raw_value(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut conn = self.conn.clone();
        let value = redis::cmd("GET")
            .arg(key)
            .query_async::<Option<String>>(&mut conn)
            .await?;
        Ok(value)
    }

    /// Store a singleton value with a TTL
    pub async fn put_raw(&self, key: &str, payload: &str, ttl: u64) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        redis::cmd("SETEX")
            .arg(key)
            .arg(ttl)
            .arg(payload)
            .query_async::<()>(&mut conn)
            .await?;
        Ok(())
    }

    /// Remove a key
    pub async fn delete(&self, key: &str) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        redis::cmd("DEL")
            .arg(key)
            .query_async::<()>(&mut conn)
            .await?;
        Ok(())
    }

    /// Set a hash field and refresh the hash's TTL
    pub async fn hash_put(
        &self,
        key: &str,
        field: &str,
        value: &str,
        ttl: u64,
    ) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        redis::pipe()
            .cmd("HSET")
            .arg(key)
            .arg(field)
            .arg(value)
            .ignore()
            .cmd("EXPIRE")
            .arg(key)
            .arg(ttl)
            .ignore()
            .query_async::<()>(&mut conn)
            .await?;
        Ok(())
    }

    /// Retrieve a hash field
    pub async fn hash_value(&self, key: &str, field: &str) -> Result<Option<String>, CacheError> {
        let mut conn = self.conn.clone();
        let value = redis::cmd("HGET")
            .arg(key)
            .arg(field)
            .query_async::<Option<String>>(&mut conn)
            .await?;
        Ok(value)
    }

    /// Append a payload to a queue.
    ///
    /// Queues have no TTL, they live until drained.
    pub async fn queue_push(&self, key: &str, payload: &str) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        redis::cmd("RPUSH")
            .arg(key)
            .arg(payload)
            .query_async::<()>(&mut conn)
            .await?;
        Ok(())
    }

    /// Read the whole queue without consuming it
    pub async fn queue_snapshot(&self, key: &str) -> Result<Vec<String>, CacheError> {
        let mut conn = self.conn.clone();
        let items = redis::cmd("LRANGE")
            .arg(key)
            .arg(0)
            .arg(-1)
            .query_async::<Vec<String>>(&mut conn)
            .await?;
        Ok(items)
    }

    /// Forward a drained batch to a destination queue.
    ///
    /// The push and the trim of the consumed entries run as one atomic unit,
    /// a crash can not land between them. Entries pushed onto the source
    /// queue after the snapshot survive the trim.
    pub async fn forward_batch(
        &self,
        dest: &str,
        payloads: &[String],
        src: &str,
        consumed: usize,
    ) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        let mut pipe = redis::pipe();
        pipe.atomic();
        for payload in payloads {
            pipe.cmd("RPUSH").arg(dest).arg(payload).ignore();
        }
        pipe.cmd("LTRIM").arg(src).arg(consumed as i64).arg(-1).ignore();
        pipe.query_async::<()>(&mut conn).await?;
        Ok(())
    }

    /// Consume up to `count` entries from the head of a queue
    pub async fn queue_pop_many(&self, key: &str, count: usize) -> Result<Vec<String>, CacheError> {
        let mut conn = self.conn.clone();
        let items = redis::cmd("LPOP")
            .arg(key)
            .arg(count)
            .query_async::<Option<Vec<String>>>(&mut conn)
            .await?;
        Ok(items.unwrap_or_default())
    }
}
