use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

use async_trait::async_trait;

use super::{KeyValueStore, StoreError};

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Instant,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at > now
    }
}

const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug)]
struct Entries {
    map: HashMap<String, Entry>,
    sweep_interval: Duration,
    next_sweep: Instant,
}

impl Entries {
    /// Drops every expired entry once per sweep interval.
    fn sweep(&mut self, now: Instant) {
        if now < self.next_sweep {
            return;
        }
        self.map.retain(|_, entry| entry.is_live(now));
        self.next_sweep = now + self.sweep_interval;
    }
}

#[derive(Debug, Clone)]
pub struct MemoryKvStore {
    entries: Arc<RwLock<Entries>>,
}

impl MemoryKvStore {
    /// Creates a new in memory store backed by a HashMap.
    /// No max capacity limit is enforced; expired entries are swept out on
    /// writes, at most once a minute.
    pub fn new() -> Self {
        Self::with_sweep_interval(SWEEP_INTERVAL)
    }

    pub fn with_sweep_interval(sweep_interval: Duration) -> Self {
        Self {
            entries: Arc::new(RwLock::new(Entries {
                map: HashMap::new(),
                sweep_interval,
                next_sweep: Instant::now() + sweep_interval,
            })),
        }
    }

    /// Number of live entries; expired entries still waiting for eviction are not counted.
    pub async fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .read()
            .await
            .map
            .values()
            .filter(|entry| entry.is_live(now))
            .count()
    }
}

impl Default for MemoryKvStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KeyValueStore for MemoryKvStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        match entries.map.get(key) {
            Some(entry) if !entry.is_live(now) => {
                entries.map.remove(key);
                Ok(None)
            }
            Some(entry) => Ok(Some(entry.value.clone())),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        let now = Instant::now();
        let entry = Entry {
            value: value.to_string(),
            expires_at: now + ttl,
        };
        let mut entries = self.entries.write().await;
        entries.sweep(now);
        entries.map.insert(key.to_string(), entry);
        Ok(())
    }

    async fn compare_and_set(
        &self,
        key: &str,
        expected: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        match entries.map.get_mut(key) {
            Some(entry) if entry.is_live(now) && entry.value == expected => {
                entry.value = value.to_string();
                entry.expires_at = now + ttl;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        match entries.map.get_mut(key) {
            Some(entry) if entry.is_live(now) => {
                entry.expires_at = now + ttl;
                Ok(true)
            }
            Some(_) => {
                entries.map.remove(key);
                Ok(false)
            }
            None => Ok(false),
        }
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.entries.write().await.map.remove(key);
        Ok(())
    }

    async fn compare_and_delete(&self, key: &str, expected: &str) -> Result<bool, StoreError> {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let matches = matches!(
            entries.map.get(key),
            Some(entry) if entry.is_live(now) && entry.value == expected
        );
        if matches {
            entries.map.remove(key);
        }
        Ok(matches)
    }
}
