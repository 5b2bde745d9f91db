//! Thread-Safe Typed Storage Engine with Expiry Support
//!
//! This module implements the keyed store behind every command. Each key
//! holds one typed [`Value`] (string, hash, list or set) plus an optional
//! expiry and a version stamp used by `WATCH`.
//!
//! ## Concurrency Model
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     StorageEngine                           │
//! │  ┌─────────┐ ┌─────────┐ ┌─────────┐ ┌─────────┐           │
//! │  │ Shard 0 │ │ Shard 1 │ │ Shard 2 │ │ Shard N │           │
//! │  │ RwLock  │ │ RwLock  │ │ RwLock  │ │ RwLock  │           │
//! │  │ HashMap │ │ HashMap │ │ HashMap │ │ HashMap │           │
//! │  └─────────┘ └─────────┘ └─────────┘ └─────────┘           │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Reads go through [`StorageEngine::view`] under the shard's read lock.
//! Every multi-step mutation runs inside [`StorageEngine::update`], whose
//! closure sees the key through a [`Slot`] while the shard's write lock is
//! held, so read-modify-write sequences on one key are atomic.

use super::glob::GlobPattern;
use bytes::Bytes;
use std::collections::{HashMap, HashSet, VecDeque};
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// Number of shards for the storage engine.
/// More shards = less lock contention, but more memory overhead.
const NUM_SHARDS: usize = 64;

/// Errors from typed store operations.
///
/// The `Display` text is the error reply sent to the client.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("WRONGTYPE Operation against a key holding the wrong kind of value")]
    WrongType,

    #[error("ERR value is not an integer or out of range")]
    NotInteger,

    #[error("ERR value is not a valid float")]
    NotFloat,

    #[error("ERR hash value is not an integer")]
    HashNotInteger,

    #[error("ERR hash value is not a float")]
    HashNotFloat,

    #[error("ERR increment or decrement would overflow")]
    Overflow,

    #[error("ERR increment would produce NaN or Infinity")]
    NotFinite,

    #[error("ERR no such key")]
    NoSuchKey,

    #[error("ERR index out of range")]
    OutOfRange,
}

/// A typed stored value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    String(Bytes),
    Hash(HashMap<Bytes, Bytes>),
    List(VecDeque<Bytes>),
    Set(HashSet<Bytes>),
}

impl Value {
    /// The name reported by `TYPE`.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::String(_) => "string",
            Value::Hash(_) => "hash",
            Value::List(_) => "list",
            Value::Set(_) => "set",
        }
    }

    /// Empty collections are never kept in the keyspace.
    fn is_empty_collection(&self) -> bool {
        match self {
            Value::String(_) => false,
            Value::Hash(h) => h.is_empty(),
            Value::List(l) => l.is_empty(),
            Value::Set(s) => s.is_empty(),
        }
    }

    /// Approximate heap footprint, for `INFO memory`.
    fn approx_size(&self) -> usize {
        match self {
            Value::String(s) => s.len(),
            Value::Hash(h) => h.iter().map(|(k, v)| k.len() + v.len() + 16).sum(),
            Value::List(l) => l.iter().map(|v| v.len() + 8).sum(),
            Value::Set(s) => s.iter().map(|v| v.len() + 8).sum(),
        }
    }
}

/// Represents a stored value with optional expiry time.
#[derive(Debug, Clone)]
pub struct Entry {
    pub value: Value,
    /// When this entry expires (None = never expires)
    pub expires_at: Option<Instant>,
    /// Bumped on every modification, never zero for a live key
    pub version: u64,
}

impl Entry {
    /// Checks if this entry has expired.
    #[inline]
    pub fn is_expired(&self) -> bool {
        self.expires_at
            .map(|exp| Instant::now() >= exp)
            .unwrap_or(false)
    }

    /// Returns the remaining TTL in milliseconds, or None if no expiry.
    pub fn ttl_ms(&self) -> Option<u64> {
        self.expires_at
            .map(|exp| exp.saturating_duration_since(Instant::now()).as_millis() as u64)
    }
}

/// Exclusive access to one key while its shard is write-locked.
///
/// Obtained through [`StorageEngine::update`]. Any change made through the
/// slot bumps the key's version when the closure returns, and a collection
/// left empty is removed from the keyspace.
pub struct Slot<'a> {
    data: &'a mut HashMap<Bytes, Entry>,
    key: &'a Bytes,
    dirty: bool,
}

impl<'a> Slot<'a> {
    pub fn key(&self) -> &Bytes {
        self.key
    }

    pub fn exists(&self) -> bool {
        self.data.contains_key(self.key)
    }

    pub fn value(&self) -> Option<&Value> {
        self.data.get(self.key).map(|e| &e.value)
    }

    pub fn value_mut(&mut self) -> Option<&mut Value> {
        let entry = self.data.get_mut(self.key)?;
        self.dirty = true;
        Some(&mut entry.value)
    }

    /// Stores a value, discarding any previous value and expiry.
    pub fn put(&mut self, value: Value) {
        self.put_with_expiry(value, None);
    }

    /// Stores a value, keeping the current expiry.
    pub fn put_keep_ttl(&mut self, value: Value) {
        let expires_at = self.expires_at();
        self.put_with_expiry(value, expires_at);
    }

    pub fn put_with_expiry(&mut self, value: Value, expires_at: Option<Instant>) {
        self.dirty = true;
        self.data.insert(
            self.key.clone(),
            Entry {
                value,
                expires_at,
                version: 0,
            },
        );
    }

    /// Removes the key, returning its value and expiry.
    pub fn take(&mut self) -> Option<(Value, Option<Instant>)> {
        let entry = self.data.remove(self.key)?;
        self.dirty = true;
        Some((entry.value, entry.expires_at))
    }

    pub fn remove(&mut self) -> Option<Value> {
        self.take().map(|(value, _)| value)
    }

    pub fn expires_at(&self) -> Option<Instant> {
        self.data.get(self.key).and_then(|e| e.expires_at)
    }

    /// Sets or clears the expiry. Returns false if the key does not exist.
    pub fn set_expires_at(&mut self, at: Option<Instant>) -> bool {
        match self.data.get_mut(self.key) {
            Some(entry) => {
                entry.expires_at = at;
                self.dirty = true;
                true
            }
            None => false,
        }
    }

    /// Returns whether the key exists, failing if it holds another type.
    fn check(&self, kind: &'static str) -> Result<bool, StoreError> {
        match self.value() {
            None => Ok(false),
            Some(v) if v.type_name() == kind => Ok(true),
            Some(_) => Err(StoreError::WrongType),
        }
    }

    pub fn string(&self) -> Result<Option<&Bytes>, StoreError> {
        match self.value() {
            None => Ok(None),
            Some(Value::String(s)) => Ok(Some(s)),
            Some(_) => Err(StoreError::WrongType),
        }
    }

    pub fn hash(&self) -> Result<Option<&HashMap<Bytes, Bytes>>, StoreError> {
        match self.value() {
            None => Ok(None),
            Some(Value::Hash(h)) => Ok(Some(h)),
            Some(_) => Err(StoreError::WrongType),
        }
    }

    pub fn hash_mut(&mut self) -> Result<Option<&mut HashMap<Bytes, Bytes>>, StoreError> {
        if !self.check("hash")? {
            return Ok(None);
        }
        match self.value_mut() {
            Some(Value::Hash(h)) => Ok(Some(h)),
            _ => Ok(None),
        }
    }

    /// The hash at this key, created empty if absent.
    pub fn hash_or_insert(&mut self) -> Result<&mut HashMap<Bytes, Bytes>, StoreError> {
        if !self.check("hash")? {
            self.put(Value::Hash(HashMap::new()));
        }
        match self.value_mut() {
            Some(Value::Hash(h)) => Ok(h),
            _ => Err(StoreError::WrongType),
        }
    }

    pub fn list(&self) -> Result<Option<&VecDeque<Bytes>>, StoreError> {
        match self.value() {
            None => Ok(None),
            Some(Value::List(l)) => Ok(Some(l)),
            Some(_) => Err(StoreError::WrongType),
        }
    }

    pub fn list_mut(&mut self) -> Result<Option<&mut VecDeque<Bytes>>, StoreError> {
        if !self.check("list")? {
            return Ok(None);
        }
        match self.value_mut() {
            Some(Value::List(l)) => Ok(Some(l)),
            _ => Ok(None),
        }
    }

    /// The list at this key, created empty if absent.
    pub fn list_or_insert(&mut self) -> Result<&mut VecDeque<Bytes>, StoreError> {
        if !self.check("list")? {
            self.put(Value::List(VecDeque::new()));
        }
        match self.value_mut() {
            Some(Value::List(l)) => Ok(l),
            _ => Err(StoreError::WrongType),
        }
    }

    pub fn set(&self) -> Result<Option<&HashSet<Bytes>>, StoreError> {
        match self.value() {
            None => Ok(None),
            Some(Value::Set(s)) => Ok(Some(s)),
            Some(_) => Err(StoreError::WrongType),
        }
    }

    pub fn set_mut(&mut self) -> Result<Option<&mut HashSet<Bytes>>, StoreError> {
        if !self.check("set")? {
            return Ok(None);
        }
        match self.value_mut() {
            Some(Value::Set(s)) => Ok(Some(s)),
            _ => Ok(None),
        }
    }

    /// The set at this key, created empty if absent.
    pub fn set_or_insert(&mut self) -> Result<&mut HashSet<Bytes>, StoreError> {
        if !self.check("set")? {
            self.put(Value::Set(HashSet::new()));
        }
        match self.value_mut() {
            Some(Value::Set(s)) => Ok(s),
            _ => Err(StoreError::WrongType),
        }
    }
}

/// The main storage engine.
///
/// This struct is designed to be wrapped in an `Arc` and shared across
/// all client handler tasks. All operations are thread-safe.
///
/// # Example
///
/// ```
/// use emukv::storage::{StorageEngine, Value};
/// use bytes::Bytes;
///
/// let engine = StorageEngine::new();
/// engine.set_string(Bytes::from("name"), Bytes::from("Ariz"));
/// assert_eq!(engine.get_string(b"name"), Ok(Some(Bytes::from("Ariz"))));
///
/// let len = engine.update(&Bytes::from("queue"), |slot| {
///     let list = slot.list_or_insert()?;
///     list.push_back(Bytes::from("job"));
///     Ok::<_, emukv::storage::StoreError>(list.len())
/// });
/// assert_eq!(len, Ok(1));
/// assert_eq!(engine.key_type(b"queue"), "list");
/// ```
pub struct StorageEngine {
    /// Sharded storage for reduced lock contention
    shards: Vec<RwLock<HashMap<Bytes, Entry>>>,

    /// Source of version stamps
    next_version: AtomicU64,

    /// Statistics: total number of keys (approximate)
    key_count: AtomicU64,

    /// Statistics: total read operations
    read_count: AtomicU64,

    /// Statistics: total write operations
    write_count: AtomicU64,

    /// Statistics: total DEL operations
    del_count: AtomicU64,

    /// Statistics: number of expired keys cleaned up
    expired_count: AtomicU64,
}

impl std::fmt::Debug for StorageEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageEngine")
            .field("shards", &self.shards.len())
            .field("key_count", &self.key_count.load(Ordering::Relaxed))
            .field("read_count", &self.read_count.load(Ordering::Relaxed))
            .field("write_count", &self.write_count.load(Ordering::Relaxed))
            .finish()
    }
}

impl Default for StorageEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl StorageEngine {
    /// Creates a new storage engine with default settings.
    pub fn new() -> Self {
        let shards = (0..NUM_SHARDS).map(|_| RwLock::new(HashMap::new())).collect();

        Self {
            shards,
            next_version: AtomicU64::new(1),
            key_count: AtomicU64::new(0),
            read_count: AtomicU64::new(0),
            write_count: AtomicU64::new(0),
            del_count: AtomicU64::new(0),
            expired_count: AtomicU64::new(0),
        }
    }

    /// Gets the shard for a given key.
    #[inline]
    fn shard(&self, key: &[u8]) -> &RwLock<HashMap<Bytes, Entry>> {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        &self.shards[(hasher.finish() as usize) % NUM_SHARDS]
    }

    /// Removes `key` if it has expired. The shard must be write-locked.
    fn purge_if_expired(&self, data: &mut HashMap<Bytes, Entry>, key: &[u8]) -> bool {
        if data.get(key).is_some_and(Entry::is_expired) {
            data.remove(key);
            self.key_count.fetch_sub(1, Ordering::Relaxed);
            self.expired_count.fetch_add(1, Ordering::Relaxed);
            return true;
        }
        false
    }

    /// Runs `f` against the live value of `key`, if any.
    ///
    /// Expired keys are seen as absent and removed on the way out
    /// ("lazy expiry").
    pub fn view<R>(&self, key: &[u8], f: impl FnOnce(Option<&Value>) -> R) -> R {
        self.read_count.fetch_add(1, Ordering::Relaxed);
        let shard = self.shard(key);

        // Fast path: read lock for missing or live keys
        {
            let data = shard.read().unwrap();
            match data.get(key) {
                None => return f(None),
                Some(entry) if !entry.is_expired() => return f(Some(&entry.value)),
                Some(_) => {}
            }
        }

        // Key exists but is expired - need write lock to remove it
        let mut data = shard.write().unwrap();
        self.purge_if_expired(&mut data, key);
        f(data.get(key).map(|e| &e.value))
    }

    /// Runs `f` with exclusive access to `key`.
    pub fn update<R>(&self, key: &Bytes, f: impl FnOnce(&mut Slot<'_>) -> R) -> R {
        self.write_count.fetch_add(1, Ordering::Relaxed);

        let mut guard = self.shard(key).write().unwrap();
        let data = &mut *guard;
        self.purge_if_expired(data, key);
        let existed = data.contains_key(key);

        let mut slot = Slot {
            data: &mut *data,
            key,
            dirty: false,
        };
        let result = f(&mut slot);
        let dirty = slot.dirty;

        if dirty {
            if data.get(key).is_some_and(|e| e.value.is_empty_collection()) {
                data.remove(key);
            } else if let Some(entry) = data.get_mut(key) {
                entry.version = self.next_version.fetch_add(1, Ordering::Relaxed);
            }
        }

        match (existed, data.contains_key(key)) {
            (false, true) => {
                self.key_count.fetch_add(1, Ordering::Relaxed);
            }
            (true, false) => {
                self.key_count.fetch_sub(1, Ordering::Relaxed);
            }
            _ => {}
        }

        result
    }

    /// Gets a string value.
    pub fn get_string(&self, key: &[u8]) -> Result<Option<Bytes>, StoreError> {
        self.view(key, |value| match value {
            None => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.clone())),
            Some(_) => Err(StoreError::WrongType),
        })
    }

    /// Sets a string value, clearing any expiry.
    ///
    /// Returns `true` if a new key was created.
    pub fn set_string(&self, key: Bytes, value: Bytes) -> bool {
        self.update(&key, |slot| {
            let is_new = !slot.exists();
            slot.put(Value::String(value));
            is_new
        })
    }

    /// Sets a string value with a TTL.
    pub fn set_string_with_ttl(&self, key: Bytes, value: Bytes, ttl: Duration) -> bool {
        self.update(&key, |slot| {
            let is_new = !slot.exists();
            slot.put_with_expiry(Value::String(value), Some(Instant::now() + ttl));
            is_new
        })
    }

    /// Deletes a key. Returns `true` if it existed.
    pub fn delete(&self, key: &Bytes) -> bool {
        self.del_count.fetch_add(1, Ordering::Relaxed);
        self.update(key, |slot| slot.remove().is_some())
    }

    /// Checks if a key exists (and is not expired).
    pub fn exists(&self, key: &[u8]) -> bool {
        self.view(key, |value| value.is_some())
    }

    /// Returns the type of a key, or "none".
    pub fn key_type(&self, key: &[u8]) -> &'static str {
        self.view(key, |value| value.map_or("none", Value::type_name))
    }

    /// Remaining TTL in milliseconds: -2 if missing, -1 if persistent.
    pub fn pttl(&self, key: &[u8]) -> i64 {
        self.read_count.fetch_add(1, Ordering::Relaxed);
        let data = self.shard(key).read().unwrap();
        match data.get(key) {
            None => -2,
            Some(entry) if entry.is_expired() => -2,
            Some(entry) => entry.ttl_ms().map_or(-1, |ms| ms as i64),
        }
    }

    /// Remaining TTL in seconds, rounded: -2 if missing, -1 if persistent.
    pub fn ttl(&self, key: &[u8]) -> i64 {
        match self.pttl(key) {
            ms if ms < 0 => ms,
            ms => (ms + 500) / 1000,
        }
    }

    /// Current version of a key, 0 if absent.
    pub fn version(&self, key: &[u8]) -> u64 {
        let data = self.shard(key).read().unwrap();
        match data.get(key) {
            Some(entry) if !entry.is_expired() => entry.version,
            _ => 0,
        }
    }

    /// Increments an integer string value by `delta`.
    ///
    /// A missing key counts as 0. The expiry is preserved.
    pub fn incr_by(&self, key: &Bytes, delta: i64) -> Result<i64, StoreError> {
        self.update(key, |slot| {
            let current = match slot.string()? {
                None => 0,
                Some(raw) => parse_i64(raw).ok_or(StoreError::NotInteger)?,
            };
            let new_value = current.checked_add(delta).ok_or(StoreError::Overflow)?;
            slot.put_keep_ttl(Value::String(Bytes::from(new_value.to_string())));
            Ok(new_value)
        })
    }

    /// Increments a float string value by `delta`.
    pub fn incr_by_float(&self, key: &Bytes, delta: f64) -> Result<f64, StoreError> {
        self.update(key, |slot| {
            let current = match slot.string()? {
                None => 0.0,
                Some(raw) => parse_f64(raw).ok_or(StoreError::NotFloat)?,
            };
            let new_value = current + delta;
            if !new_value.is_finite() {
                return Err(StoreError::NotFinite);
            }
            slot.put_keep_ttl(Value::String(Bytes::from(format_float(new_value))));
            Ok(new_value)
        })
    }

    /// Appends to a string value, creating it if needed.
    ///
    /// Returns the length of the string after the append.
    pub fn append(&self, key: &Bytes, suffix: &[u8]) -> Result<usize, StoreError> {
        self.update(key, |slot| {
            let mut joined = slot.string()?.map(|s| s.to_vec()).unwrap_or_default();
            joined.extend_from_slice(suffix);
            let len = joined.len();
            slot.put_keep_ttl(Value::String(Bytes::from(joined)));
            Ok(len)
        })
    }

    /// Moves a key to a new name, overwriting the destination.
    pub fn rename(&self, from: &Bytes, to: &Bytes) -> Result<(), StoreError> {
        if from == to {
            return if self.exists(from) {
                Ok(())
            } else {
                Err(StoreError::NoSuchKey)
            };
        }
        let (value, expires_at) = self
            .update(from, |slot| slot.take())
            .ok_or(StoreError::NoSuchKey)?;
        self.update(to, |slot| slot.put_with_expiry(value, expires_at));
        Ok(())
    }

    /// Returns all keys matching a pattern.
    ///
    /// **Warning**: This operation scans all keys and can be slow on large databases.
    pub fn keys(&self, pattern: &GlobPattern) -> Vec<Bytes> {
        let mut result = Vec::new();

        for shard in &self.shards {
            let data = shard.read().unwrap();
            for (key, entry) in data.iter() {
                if !entry.is_expired() && pattern.matches(key) {
                    result.push(key.clone());
                }
            }
        }

        result
    }

    /// Clears all data from the database.
    pub fn flush(&self) {
        for shard in &self.shards {
            shard.write().unwrap().clear();
        }
        self.key_count.store(0, Ordering::Relaxed);
    }

    /// Returns the approximate number of keys in the database.
    pub fn len(&self) -> u64 {
        self.key_count.load(Ordering::Relaxed)
    }

    /// Returns true if the database is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns database statistics.
    pub fn stats(&self) -> StorageStats {
        StorageStats {
            keys: self.key_count.load(Ordering::Relaxed),
            read_ops: self.read_count.load(Ordering::Relaxed),
            write_ops: self.write_count.load(Ordering::Relaxed),
            del_ops: self.del_count.load(Ordering::Relaxed),
            expired: self.expired_count.load(Ordering::Relaxed),
        }
    }

    /// Cleans up expired keys from all shards.
    ///
    /// This is called by the background expiry sweeper.
    ///
    /// # Returns
    ///
    /// Returns the number of keys that were cleaned up.
    pub fn cleanup_expired(&self) -> u64 {
        let mut cleaned = 0u64;

        for shard in &self.shards {
            let mut data = shard.write().unwrap();
            let before = data.len();
            data.retain(|_, entry| !entry.is_expired());
            cleaned += (before - data.len()) as u64;
        }

        if cleaned > 0 {
            self.key_count.fetch_sub(cleaned, Ordering::Relaxed);
            self.expired_count.fetch_add(cleaned, Ordering::Relaxed);
        }

        cleaned
    }

    /// Returns memory usage information (approximate).
    pub fn memory_info(&self) -> MemoryInfo {
        let mut total_keys = 0usize;
        let mut total_bytes = 0usize;

        for shard in &self.shards {
            let data = shard.read().unwrap();
            for (key, entry) in data.iter().filter(|(_, e)| !e.is_expired()) {
                total_keys += 1;
                // key + value + 64 bytes of per-entry overhead
                total_bytes += key.len() + entry.value.approx_size() + 64;
            }
        }

        MemoryInfo {
            keys: total_keys,
            used_memory: total_bytes,
        }
    }
}

/// Database statistics.
#[derive(Debug, Clone, Copy)]
pub struct StorageStats {
    /// Number of keys currently stored
    pub keys: u64,
    pub read_ops: u64,
    pub write_ops: u64,
    pub del_ops: u64,
    /// Total expired keys cleaned up
    pub expired: u64,
}

/// Memory usage information.
#[derive(Debug, Clone, Copy)]
pub struct MemoryInfo {
    pub keys: usize,
    /// Approximate memory used in bytes
    pub used_memory: usize,
}

/// Parses a stored integer.
pub fn parse_i64(raw: &[u8]) -> Option<i64> {
    std::str::from_utf8(raw).ok()?.parse().ok()
}

/// Parses a stored float.
pub fn parse_f64(raw: &[u8]) -> Option<f64> {
    std::str::from_utf8(raw)
        .ok()?
        .parse::<f64>()
        .ok()
        .filter(|v| !v.is_nan())
}

/// Formats a float the way it is stored: integral values without a
/// fractional part, everything else in shortest round-trip form.
pub fn format_float(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e17 {
        format!("{}", value as i64)
    } else {
        format!("{}", value)
    }
}

/// Milliseconds since the UNIX epoch.
pub fn now_unix_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Converts an absolute UNIX time in milliseconds to a monotonic deadline.
///
/// Times in the past map to "now", which is already expired.
pub fn deadline_from_unix_ms(unix_ms: i64) -> Instant {
    let delta = unix_ms.saturating_sub(now_unix_ms());
    Instant::now() + Duration::from_millis(delta.max(0) as u64)
}

/// Converts a monotonic deadline back to UNIX milliseconds.
pub fn deadline_to_unix_ms(deadline: Instant) -> i64 {
    let remaining = deadline.saturating_duration_since(Instant::now()).as_millis() as i64;
    now_unix_ms().saturating_add(remaining)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn b(s: &str) -> Bytes {
        Bytes::copy_from_slice(s.as_bytes())
    }

    #[test]
    fn test_set_and_get() {
        let engine = StorageEngine::new();
        assert!(engine.set_string(b("name"), b("Ariz")));
        assert!(!engine.set_string(b("name"), b("Bob")));
        assert_eq!(engine.get_string(b"name"), Ok(Some(b("Bob"))));
        assert_eq!(engine.get_string(b"nope"), Ok(None));
        assert_eq!(engine.len(), 1);
    }

    #[test]
    fn test_wrong_type() {
        let engine = StorageEngine::new();
        let key = b("k");
        engine
            .update(&key, |slot| slot.list_or_insert().map(|l| l.push_back(b("x"))))
            .unwrap();
        assert_eq!(engine.get_string(b"k"), Err(StoreError::WrongType));
        assert_eq!(engine.incr_by(&key, 1), Err(StoreError::WrongType));
        assert_eq!(
            engine.update(&key, |slot| slot.hash_or_insert().map(|_| ())),
            Err(StoreError::WrongType)
        );
    }

    #[test]
    fn test_delete() {
        let engine = StorageEngine::new();
        engine.set_string(b("key"), b("value"));
        assert!(engine.delete(&b("key")));
        assert!(!engine.delete(&b("key")));
        assert!(engine.is_empty());
    }

    #[test]
    fn test_expiry() {
        let engine = StorageEngine::new();
        engine.set_string_with_ttl(b("temp"), b("value"), Duration::from_millis(50));
        assert!(engine.exists(b"temp"));

        std::thread::sleep(Duration::from_millis(100));
        assert!(!engine.exists(b"temp"));
        assert_eq!(engine.get_string(b"temp"), Ok(None));
        assert_eq!(engine.len(), 0);
        assert_eq!(engine.stats().expired, 1);
    }

    #[test]
    fn test_ttl() {
        let engine = StorageEngine::new();
        engine.set_string(b("plain"), b("v"));
        engine.set_string_with_ttl(b("temp"), b("v"), Duration::from_secs(100));

        assert_eq!(engine.ttl(b"missing"), -2);
        assert_eq!(engine.ttl(b"plain"), -1);
        let ttl = engine.ttl(b"temp");
        assert!((99..=100).contains(&ttl));
        assert!(engine.pttl(b"temp") > 99_000);
    }

    #[test]
    fn test_incr() {
        let engine = StorageEngine::new();
        let key = b("counter");
        assert_eq!(engine.incr_by(&key, 1), Ok(1));
        assert_eq!(engine.incr_by(&key, 10), Ok(11));
        assert_eq!(engine.incr_by(&key, -20), Ok(-9));

        engine.set_string(b("max"), b(&i64::MAX.to_string()));
        assert_eq!(engine.incr_by(&b("max"), 1), Err(StoreError::Overflow));

        engine.set_string(b("text"), b("abc"));
        assert_eq!(engine.incr_by(&b("text"), 1), Err(StoreError::NotInteger));
    }

    #[test]
    fn test_incr_keeps_ttl() {
        let engine = StorageEngine::new();
        engine.set_string_with_ttl(b("n"), b("1"), Duration::from_secs(100));
        engine.incr_by(&b("n"), 1).unwrap();
        assert!(engine.ttl(b"n") > 0);
    }

    #[test]
    fn test_incr_by_float() {
        let engine = StorageEngine::new();
        let key = b("f");
        assert_eq!(engine.incr_by_float(&key, 10.5), Ok(10.5));
        assert_eq!(engine.incr_by_float(&key, 0.5), Ok(11.0));
        assert_eq!(engine.get_string(b"f"), Ok(Some(b("11"))));
    }

    #[test]
    fn test_append() {
        let engine = StorageEngine::new();
        let key = b("msg");
        assert_eq!(engine.append(&key, b"Hello"), Ok(5));
        assert_eq!(engine.append(&key, b" World"), Ok(11));
        assert_eq!(engine.get_string(b"msg"), Ok(Some(b("Hello World"))));
    }

    #[test]
    fn test_empty_collection_removed() {
        let engine = StorageEngine::new();
        let key = b("list");
        engine
            .update(&key, |slot| slot.list_or_insert().map(|l| l.push_back(b("a"))))
            .unwrap();
        assert_eq!(engine.len(), 1);

        engine.update(&key, |slot| {
            slot.list_mut().unwrap().unwrap().pop_front();
        });
        assert!(!engine.exists(b"list"));
        assert_eq!(engine.len(), 0);
    }

    #[test]
    fn test_failed_create_leaves_no_key() {
        let engine = StorageEngine::new();
        let key = b("h");
        // created empty, then abandoned
        engine.update(&key, |slot| {
            slot.hash_or_insert().unwrap();
        });
        assert!(!engine.exists(b"h"));
        assert_eq!(engine.len(), 0);
    }

    #[test]
    fn test_versions() {
        let engine = StorageEngine::new();
        assert_eq!(engine.version(b"k"), 0);

        engine.set_string(b("k"), b("1"));
        let v1 = engine.version(b"k");
        assert!(v1 > 0);

        engine.get_string(b"k").unwrap();
        assert_eq!(engine.version(b"k"), v1);

        engine.set_string(b("k"), b("2"));
        assert!(engine.version(b"k") > v1);

        engine.delete(&b("k"));
        assert_eq!(engine.version(b"k"), 0);
    }

    #[test]
    fn test_rename() {
        let engine = StorageEngine::new();
        engine.set_string_with_ttl(b("a"), b("1"), Duration::from_secs(100));
        engine.rename(&b("a"), &b("b")).unwrap();
        assert!(!engine.exists(b"a"));
        assert_eq!(engine.get_string(b"b"), Ok(Some(b("1"))));
        assert!(engine.ttl(b"b") > 0);
        assert_eq!(engine.rename(&b("zz"), &b("b")), Err(StoreError::NoSuchKey));
    }

    #[test]
    fn test_keys_pattern() {
        let engine = StorageEngine::new();
        engine.set_string(b("user:1"), b("a"));
        engine.set_string(b("user:2"), b("b"));
        engine.set_string(b("other"), b("c"));

        let mut keys = engine.keys(&GlobPattern::new("user:*"));
        keys.sort();
        assert_eq!(keys, vec![b("user:1"), b("user:2")]);
        assert_eq!(engine.keys(&GlobPattern::new("*")).len(), 3);
    }

    #[test]
    fn test_flush() {
        let engine = StorageEngine::new();
        engine.set_string(b("a"), b("1"));
        engine.set_string(b("b"), b("2"));
        engine.flush();
        assert!(engine.is_empty());
        assert!(!engine.exists(b"a"));
    }

    #[test]
    fn test_cleanup_expired() {
        let engine = StorageEngine::new();
        engine.set_string_with_ttl(b("key1"), b("v"), Duration::from_millis(10));
        engine.set_string_with_ttl(b("key2"), b("v"), Duration::from_millis(10));
        engine.set_string(b("key3"), b("v"));

        std::thread::sleep(Duration::from_millis(50));

        assert_eq!(engine.cleanup_expired(), 2);
        assert_eq!(engine.len(), 1);
        assert!(engine.exists(b"key3"));
    }

    #[test]
    fn test_concurrent_access() {
        use std::sync::Arc;
        use std::thread;

        let engine = Arc::new(StorageEngine::new());
        let mut handles = vec![];

        for i in 0..10 {
            let engine = Arc::clone(&engine);
            handles.push(thread::spawn(move || {
                for j in 0..100 {
                    let key = Bytes::from(format!("key-{}-{}", i, j));
                    engine.set_string(key.clone(), Bytes::from("value"));
                    engine.get_string(&key).unwrap();
                }
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(engine.len(), 1000);
    }

    #[test]
    fn test_format_float() {
        assert_eq!(format_float(3.0), "3");
        assert_eq!(format_float(-2.5), "-2.5");
        assert_eq!(format_float(0.1 + 0.2), "0.30000000000000004");
    }

    #[test]
    fn test_unix_deadline_round_trip() {
        let target = now_unix_ms() + 10_000;
        let back = deadline_to_unix_ms(deadline_from_unix_ms(target));
        assert!((back - target).abs() < 50);
    }
}
