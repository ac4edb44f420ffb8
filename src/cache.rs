//! Cache keys and the namespace cache hook.
//!
//! The first-level (per-executor) cache is a plain map owned by the
//! executor base; this module supplies its [`CacheKey`] fingerprint and
//! the pluggable per-namespace [`Cache`] used as the second-level hook.
//! Eviction policy is configuration-driven; the engine itself imposes no
//! policy beyond what the built caches implement.

use crate::error::{Error, Result};
use crate::param_value::{ParamsMap, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, RwLock};
use std::time::{Duration, Instant};
use strum_macros::Display;
use threadsafe_lru::LruCache;

/// A stable fingerprint over everything that distinguishes one query
/// execution from another: statement id, final SQL, and the extracted
/// parameter values in canonical (sorted) order.
///
/// Equality compares the full canonical representation, so hash
/// collisions cannot alias distinct executions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct CacheKey {
    repr: String,
}

impl CacheKey {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, part: &str) {
        self.repr.push_str(part);
        self.repr.push('\u{1}');
    }

    pub fn update_value(&mut self, value: &Value) {
        // Debug formatting is canonical for Value and keeps variant tags,
        // so Int(1) and Str("1") stay distinct.
        self.repr.push_str(&format!("{value:?}"));
        self.repr.push('\u{1}');
    }

    /// Folds a parameter map in canonical key order.
    pub fn update_params(&mut self, params: &ParamsMap) {
        for (name, value) in params {
            self.update(name);
            self.update_value(value);
        }
    }
}

/// Eviction policy for a namespace cache. `Soft` and `Weak` come from
/// configurations written against garbage-collected runtimes; they build
/// the LRU cache here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display)]
pub enum EvictionPolicy {
    #[default]
    #[strum(to_string = "LRU")]
    Lru,
    #[strum(to_string = "FIFO")]
    Fifo,
    #[strum(to_string = "SOFT")]
    Soft,
    #[strum(to_string = "WEAK")]
    Weak,
}

impl EvictionPolicy {
    pub fn parse(text: &str) -> Result<Self> {
        match text.to_ascii_uppercase().as_str() {
            "LRU" => Ok(Self::Lru),
            "FIFO" => Ok(Self::Fifo),
            "SOFT" => Ok(Self::Soft),
            "WEAK" => Ok(Self::Weak),
            other => Err(Error::config(
                "eviction",
                format!("`{other}` is not an eviction policy"),
            )),
        }
    }
}

/// Per-namespace cache configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheConfig {
    pub policy: EvictionPolicy,
    pub size: usize,
    pub flush_interval: Option<Duration>,
    pub read_only: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            policy: EvictionPolicy::Lru,
            size: crate::DEFAULT_NAMESPACE_CACHE_SIZE,
            flush_interval: None,
            read_only: false,
        }
    }
}

impl CacheConfig {
    /// Parses a configuration map. `flush_interval` accepts an integer
    /// (seconds) or a human-readable duration such as `"30s"` or
    /// `"5 min"`.
    pub fn from_map(options: &ParamsMap) -> Result<Self> {
        let mut config = Self::default();
        if let Some(value) = options.get("eviction") {
            config.policy = EvictionPolicy::parse(&value.to_text())?;
        }
        if let Some(value) = options.get("size") {
            match value {
                Value::Int(n) => config.size = usize::try_from(*n)?,
                _ => return Err(Error::config("size", "must be an integer")),
            }
        }
        config.flush_interval = match options.get("flushInterval") {
            None | Some(Value::Null) => None,
            Some(Value::Int(n)) => Some(Duration::from_secs(u64::try_from(*n)?)),
            Some(Value::Str(text)) => Some(
                parse_duration::parse(text)
                    .map_err(|e| Error::config("flushInterval", e.to_string()))?,
            ),
            Some(_) => {
                return Err(Error::config(
                    "flushInterval",
                    "must be a string or a non-negative integer",
                ));
            }
        };
        if let Some(value) = options.get("readOnly") {
            match value {
                Value::Bool(b) => config.read_only = *b,
                _ => return Err(Error::config("readOnly", "must be a boolean")),
            }
        }
        Ok(config)
    }
}

/// The namespace cache contract. Values are hydrated result lists; the
/// engine clones on both sides of the boundary, so implementations never
/// hand out shared mutable state.
pub trait Cache: Send + Sync {
    /// The owning namespace.
    fn id(&self) -> &str;

    fn get(&self, key: &CacheKey) -> Option<Vec<Value>>;

    fn put(&self, key: CacheKey, results: Vec<Value>);

    fn clear(&self);
}

/// Builds the cache implementation selected by `config.policy`.
#[must_use]
pub fn build_cache(namespace: &str, config: &CacheConfig) -> std::sync::Arc<dyn Cache> {
    match config.policy {
        EvictionPolicy::Fifo => std::sync::Arc::new(FifoCache::new(namespace, config)),
        EvictionPolicy::Lru | EvictionPolicy::Soft | EvictionPolicy::Weak => {
            std::sync::Arc::new(LruNamespaceCache::new(namespace, config))
        }
    }
}

const LRU_SHARD_COUNT: usize = 8;

/// Sharded LRU cache. Clearing swaps in a fresh cache.
struct LruNamespaceCache {
    id: String,
    shard_size: usize,
    entries: RwLock<LruCache<CacheKey, Vec<Value>>>,
    flush: FlushClock,
}

impl LruNamespaceCache {
    fn new(namespace: &str, config: &CacheConfig) -> Self {
        let shard_size = (config.size / LRU_SHARD_COUNT).max(1);
        Self {
            id: namespace.to_owned(),
            shard_size,
            entries: RwLock::new(LruCache::new(LRU_SHARD_COUNT, shard_size)),
            flush: FlushClock::new(config.flush_interval),
        }
    }
}

impl Cache for LruNamespaceCache {
    fn id(&self) -> &str {
        &self.id
    }

    fn get(&self, key: &CacheKey) -> Option<Vec<Value>> {
        if self.flush.expired() {
            self.clear();
            return None;
        }
        self.entries.read().expect("cache poisoned").get(key)
    }

    fn put(&self, key: CacheKey, results: Vec<Value>) {
        self.entries
            .read()
            .expect("cache poisoned")
            .insert(key, results);
    }

    fn clear(&self) {
        *self.entries.write().expect("cache poisoned") =
            LruCache::new(LRU_SHARD_COUNT, self.shard_size);
    }
}

/// Bounded FIFO cache: inserts evict the oldest entry once full.
struct FifoCache {
    id: String,
    capacity: usize,
    inner: Mutex<FifoInner>,
    flush: FlushClock,
}

#[derive(Default)]
struct FifoInner {
    entries: HashMap<CacheKey, Vec<Value>>,
    order: VecDeque<CacheKey>,
}

impl FifoCache {
    fn new(namespace: &str, config: &CacheConfig) -> Self {
        Self {
            id: namespace.to_owned(),
            capacity: config.size.max(1),
            inner: Mutex::new(FifoInner::default()),
            flush: FlushClock::new(config.flush_interval),
        }
    }
}

impl Cache for FifoCache {
    fn id(&self) -> &str {
        &self.id
    }

    fn get(&self, key: &CacheKey) -> Option<Vec<Value>> {
        if self.flush.expired() {
            self.clear();
            return None;
        }
        self.inner
            .lock()
            .expect("cache poisoned")
            .entries
            .get(key)
            .cloned()
    }

    fn put(&self, key: CacheKey, results: Vec<Value>) {
        let mut inner = self.inner.lock().expect("cache poisoned");
        if !inner.entries.contains_key(&key) {
            if inner.order.len() >= self.capacity {
                if let Some(oldest) = inner.order.pop_front() {
                    inner.entries.remove(&oldest);
                }
            }
            inner.order.push_back(key.clone());
        }
        inner.entries.insert(key, results);
    }

    fn clear(&self) {
        let mut inner = self.inner.lock().expect("cache poisoned");
        inner.entries.clear();
        inner.order.clear();
    }
}

/// Tracks the periodic flush deadline when `flushInterval` is set.
struct FlushClock {
    interval: Option<Duration>,
    last_flush: Mutex<Instant>,
}

impl FlushClock {
    fn new(interval: Option<Duration>) -> Self {
        Self {
            interval,
            last_flush: Mutex::new(Instant::now()),
        }
    }

    fn expired(&self) -> bool {
        let Some(interval) = self.interval else {
            return false;
        };
        let mut last_flush = self.last_flush.lock().expect("flush clock poisoned");
        if last_flush.elapsed() >= interval {
            *last_flush = Instant::now();
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key_of(parts: &[&str]) -> CacheKey {
        let mut key = CacheKey::new();
        for part in parts {
            key.update(part);
        }
        key
    }

    #[test]
    fn test_cache_key_distinguishes_values() {
        let mut a = CacheKey::new();
        a.update("stmt");
        a.update_value(&Value::Int(1));
        let mut b = CacheKey::new();
        b.update("stmt");
        b.update_value(&Value::Str("1".into()));
        assert_ne!(a, b);

        let mut c = CacheKey::new();
        c.update("stmt");
        c.update_value(&Value::Int(1));
        assert_eq!(a, c);
    }

    #[test]
    fn test_cache_key_params_are_canonical() {
        let mut first = ParamsMap::new();
        first.insert("a".into(), Value::Int(1));
        first.insert("b".into(), Value::Int(2));
        let mut second = ParamsMap::new();
        second.insert("b".into(), Value::Int(2));
        second.insert("a".into(), Value::Int(1));

        let mut key_first = CacheKey::new();
        key_first.update_params(&first);
        let mut key_second = CacheKey::new();
        key_second.update_params(&second);
        assert_eq!(key_first, key_second);
    }

    #[test]
    fn test_lru_cache_round_trip_and_clear() {
        let cache = build_cache("blog", &CacheConfig::default());
        let key = key_of(&["q1"]);
        assert!(cache.get(&key).is_none());
        cache.put(key.clone(), vec![Value::Int(1)]);
        assert_eq!(cache.get(&key), Some(vec![Value::Int(1)]));
        cache.clear();
        assert!(cache.get(&key).is_none());
    }

    #[test]
    fn test_fifo_cache_evicts_oldest() {
        let config = CacheConfig {
            policy: EvictionPolicy::Fifo,
            size: 2,
            ..CacheConfig::default()
        };
        let cache = build_cache("blog", &config);
        cache.put(key_of(&["a"]), vec![Value::Int(1)]);
        cache.put(key_of(&["b"]), vec![Value::Int(2)]);
        cache.put(key_of(&["c"]), vec![Value::Int(3)]);
        assert!(cache.get(&key_of(&["a"])).is_none());
        assert!(cache.get(&key_of(&["b"])).is_some());
        assert!(cache.get(&key_of(&["c"])).is_some());
    }

    #[test]
    fn test_cache_config_parse() {
        let mut options = ParamsMap::new();
        options.insert("eviction".into(), Value::Str("fifo".into()));
        options.insert("size".into(), Value::Int(64));
        options.insert("flushInterval".into(), Value::Str("2 min".into()));
        options.insert("readOnly".into(), Value::Bool(true));
        let config = CacheConfig::from_map(&options).unwrap();
        assert_eq!(config.policy, EvictionPolicy::Fifo);
        assert_eq!(config.size, 64);
        assert_eq!(config.flush_interval, Some(Duration::from_secs(120)));
        assert!(config.read_only);
    }
}
