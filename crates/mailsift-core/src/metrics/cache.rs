//! Shared metric cache with per-key expiry

use async_trait::async_trait;
use mailsift_common::Result;
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Low-latency store for windowed counters and distinct sets
#[async_trait]
pub trait MetricCache: Send + Sync {
    /// Increment a counter and refresh its expiry; returns the new count
    async fn incr_expire(&self, key: &str, ttl: Duration) -> Result<i64>;

    /// Add a member to a set and refresh its expiry; returns the set cardinality
    async fn sadd_expire(&self, key: &str, member: &str, ttl: Duration) -> Result<i64>;

    /// Read a string value
    async fn get_string(&self, key: &str) -> Result<Option<String>>;

    /// Store a string value with a lifetime
    async fn set_string(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;

    /// Remove a key
    async fn delete(&self, key: &str) -> Result<()>;
}

#[derive(Debug)]
enum Entry {
    Counter(i64),
    Set(HashSet<String>),
    Text(String),
}

#[derive(Debug)]
struct Slot {
    entry: Entry,
    expires_at: Instant,
}

/// Writes between two sweeps of expired keys
const SWEEP_EVERY: u64 = 64;

#[derive(Debug, Default)]
struct Slots {
    map: HashMap<String, Slot>,
    writes: u64,
}

impl Slots {
    /// Count a write and drop expired keys every `SWEEP_EVERY` writes
    fn wrote(&mut self, now: Instant) {
        self.writes += 1;
        if self.writes % SWEEP_EVERY == 0 {
            self.map.retain(|_, slot| slot.expires_at > now);
        }
    }
}

/// In-process cache for tests and single-node deployments
///
/// Bucket labels roll over, so most keys are never touched again once their
/// window closes; expired keys are swept periodically on write.
#[derive(Debug, Default)]
pub struct MemoryMetricCache {
    slots: Mutex<Slots>,
}

impl MemoryMetricCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live keys
    pub async fn len(&self) -> usize {
        let now = Instant::now();
        self.slots
            .lock()
            .await
            .map
            .values()
            .filter(|slot| slot.expires_at > now)
            .count()
    }

    /// Number of keys held, expired or not
    #[cfg(test)]
    async fn held(&self) -> usize {
        self.slots.lock().await.map.len()
    }
}

fn live(slots: &mut HashMap<String, Slot>, key: &str, now: Instant) -> bool {
    match slots.get(key) {
        Some(slot) if slot.expires_at > now => true,
        Some(_) => {
            slots.remove(key);
            false
        }
        None => false,
    }
}

#[async_trait]
impl MetricCache for MemoryMetricCache {
    async fn incr_expire(&self, key: &str, ttl: Duration) -> Result<i64> {
        let now = Instant::now();
        let mut slots = self.slots.lock().await;
        slots.wrote(now);
        live(&mut slots.map, key, now);

        let slot = slots.map.entry(key.to_string()).or_insert(Slot {
            entry: Entry::Counter(0),
            expires_at: now,
        });
        // A key of another type is replaced, as a fresh counter
        let count = match &mut slot.entry {
            Entry::Counter(count) => {
                *count += 1;
                *count
            }
            other => {
                *other = Entry::Counter(1);
                1
            }
        };
        slot.expires_at = now + ttl;
        Ok(count)
    }

    async fn sadd_expire(&self, key: &str, member: &str, ttl: Duration) -> Result<i64> {
        let now = Instant::now();
        let mut slots = self.slots.lock().await;
        slots.wrote(now);
        live(&mut slots.map, key, now);

        let slot = slots.map.entry(key.to_string()).or_insert(Slot {
            entry: Entry::Set(HashSet::new()),
            expires_at: now,
        });
        if !matches!(slot.entry, Entry::Set(_)) {
            slot.entry = Entry::Set(HashSet::new());
        }
        let size = match &mut slot.entry {
            Entry::Set(members) => {
                members.insert(member.to_string());
                members.len() as i64
            }
            _ => 0,
        };
        slot.expires_at = now + ttl;
        Ok(size)
    }

    async fn get_string(&self, key: &str) -> Result<Option<String>> {
        let now = Instant::now();
        let mut slots = self.slots.lock().await;
        if !live(&mut slots.map, key, now) {
            return Ok(None);
        }
        Ok(match slots.map.get(key).map(|slot| &slot.entry) {
            Some(Entry::Text(value)) => Some(value.clone()),
            Some(Entry::Counter(count)) => Some(count.to_string()),
            _ => None,
        })
    }

    async fn set_string(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let now = Instant::now();
        let mut slots = self.slots.lock().await;
        slots.wrote(now);
        slots.map.insert(
            key.to_string(),
            Slot {
                entry: Entry::Text(value.to_string()),
                expires_at: now + ttl,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.slots.lock().await.map.remove(key);
        Ok(())
    }
}
