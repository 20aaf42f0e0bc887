//! In-process coordination store

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

use super::CoordinationStore;
use crate::errors::{SharedError, SharedResult};

#[derive(Debug, Clone)]
enum Entry {
    Value(String),
    Set(HashSet<String>),
    Log(Vec<String>),
}

#[derive(Debug, Clone)]
struct Slot {
    entry: Entry,
    expires_at: Option<Instant>,
}

impl Slot {
    fn new(entry: Entry) -> Self {
        Self { entry, expires_at: None }
    }

    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|deadline| deadline <= now)
    }
}

/// Map-backed store; every operation holds one lock, so each is atomic
#[derive(Debug)]
pub struct MemoryStore {
    slots: Mutex<HashMap<String, Slot>>,
    available: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            available: AtomicBool::new(true),
        }
    }

    /// Make every subsequent call fail with `StoreUnavailable` (or recover)
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Drop every expired key, returning how many were evicted
    pub async fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut slots = self.slots.lock().await;
        let before = slots.len();
        slots.retain(|_, slot| !slot.is_expired(now));
        before - slots.len()
    }

    pub async fn len(&self) -> usize {
        let now = Instant::now();
        let slots = self.slots.lock().await;
        slots.values().filter(|slot| !slot.is_expired(now)).count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    fn check_available(&self) -> SharedResult<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(SharedError::unavailable("memory store marked unavailable"))
        }
    }

    /// Evict the key if it has expired, then hand back whatever is left
    fn live_slot<'a>(slots: &'a mut HashMap<String, Slot>, key: &str) -> Option<&'a mut Slot> {
        let now = Instant::now();
        if slots.get(key).is_some_and(|slot| slot.is_expired(now)) {
            slots.remove(key);
        }
        slots.get_mut(key)
    }

    fn wrong_type(key: &str, expected: &'static str) -> SharedError {
        SharedError::WrongType { key: key.to_string(), expected }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CoordinationStore for MemoryStore {
    async fn set_value(&self, key: &str, value: &str) -> SharedResult<()> {
        self.check_available()?;
        let mut slots = self.slots.lock().await;
        slots.insert(key.to_string(), Slot::new(Entry::Value(value.to_string())));
        Ok(())
    }

    async fn get_value(&self, key: &str) -> SharedResult<Option<String>> {
        self.check_available()?;
        let mut slots = self.slots.lock().await;
        match Self::live_slot(&mut slots, key) {
            None => Ok(None),
            Some(Slot { entry: Entry::Value(value), .. }) => Ok(Some(value.clone())),
            Some(_) => Err(Self::wrong_type(key, "value")),
        }
    }

    async fn delete(&self, key: &str) -> SharedResult<()> {
        self.check_available()?;
        self.slots.lock().await.remove(key);
        Ok(())
    }

    async fn add_to_set(&self, key: &str, member: &str) -> SharedResult<bool> {
        self.check_available()?;
        let mut slots = self.slots.lock().await;
        match Self::live_slot(&mut slots, key) {
            Some(Slot { entry: Entry::Set(set), .. }) => Ok(set.insert(member.to_string())),
            Some(_) => Err(Self::wrong_type(key, "set")),
            None => {
                let set = HashSet::from([member.to_string()]);
                slots.insert(key.to_string(), Slot::new(Entry::Set(set)));
                Ok(true)
            }
        }
    }

    async fn remove_from_set(&self, key: &str, member: &str) -> SharedResult<bool> {
        self.check_available()?;
        let mut slots = self.slots.lock().await;
        match Self::live_slot(&mut slots, key) {
            Some(Slot { entry: Entry::Set(set), .. }) => Ok(set.remove(member)),
            Some(_) => Err(Self::wrong_type(key, "set")),
            None => Ok(false),
        }
    }

    async fn members(&self, key: &str) -> SharedResult<HashSet<String>> {
        self.check_available()?;
        let mut slots = self.slots.lock().await;
        match Self::live_slot(&mut slots, key) {
            Some(Slot { entry: Entry::Set(set), .. }) => Ok(set.clone()),
            Some(_) => Err(Self::wrong_type(key, "set")),
            None => Ok(HashSet::new()),
        }
    }

    async fn append_to_log(&self, key: &str, entry: &str) -> SharedResult<()> {
        self.check_available()?;
        let mut slots = self.slots.lock().await;
        match Self::live_slot(&mut slots, key) {
            Some(Slot { entry: Entry::Log(log), .. }) => {
                log.push(entry.to_string());
                Ok(())
            }
            Some(_) => Err(Self::wrong_type(key, "log")),
            None => {
                slots.insert(key.to_string(), Slot::new(Entry::Log(vec![entry.to_string()])));
                Ok(())
            }
        }
    }

    async fn read_log(&self, key: &str) -> SharedResult<Vec<String>> {
        self.check_available()?;
        let mut slots = self.slots.lock().await;
        match Self::live_slot(&mut slots, key) {
            Some(Slot { entry: Entry::Log(log), .. }) => Ok(log.clone()),
            Some(_) => Err(Self::wrong_type(key, "log")),
            None => Ok(Vec::new()),
        }
    }

    async fn set_expiry(&self, key: &str, ttl: Duration) -> SharedResult<()> {
        self.check_available()?;
        let mut slots = self.slots.lock().await;
        if let Some(slot) = Self::live_slot(&mut slots, key) {
            slot.expires_at = Some(Instant::now() + ttl);
        }
        Ok(())
    }

    async fn increment(&self, key: &str, by: i64) -> SharedResult<i64> {
        self.check_available()?;
        let mut slots = self.slots.lock().await;
        let current = match Self::live_slot(&mut slots, key) {
            Some(Slot { entry: Entry::Value(value), .. }) => {
                value.parse::<i64>().map_err(|_| Self::wrong_type(key, "integer"))?
            }
            Some(_) => return Err(Self::wrong_type(key, "integer")),
            None => 0,
        };

        let next = current
            .checked_add(by)
            .ok_or_else(|| SharedError::protocol(format!("Counter {key} would overflow")))?;
        // Counters keep their expiry, like any other overwrite-in-place
        match Self::live_slot(&mut slots, key) {
            Some(slot) => slot.entry = Entry::Value(next.to_string()),
            None => {
                slots.insert(key.to_string(), Slot::new(Entry::Value(next.to_string())));
            }
        }
        Ok(next)
    }
}
