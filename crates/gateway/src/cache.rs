//! Component C: a bounded, TTL-expiring response cache. Generalizes the
//! teacher's idempotency `DedupeStore` (a plain TTL map) by adding a FIFO
//! eviction bound at `maxEntries`, since this cache stores full tool/resource
//! results rather than a single timestamp per key.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use mcpx_domain::json::{normalize_goal, stable_json};
use serde_json::Value;

struct Entry {
    value: Value,
    is_error: bool,
    expires_at: Instant,
}

struct Inner {
    map: HashMap<String, Entry>,
    order: VecDeque<String>,
    max_entries: usize,
}

/// Cache built from `cache.maxEntries` at construction; `update_config`
/// applies a new bound (and clears the cache, per supervisor reload
/// semantics — §4.L).
pub struct Cache {
    inner: parking_lot::Mutex<Inner>,
}

impl Cache {
    pub fn new(max_entries: usize) -> Self {
        Cache {
            inner: parking_lot::Mutex::new(Inner {
                map: HashMap::new(),
                order: VecDeque::new(),
                max_entries: max_entries.max(1),
            }),
        }
    }

    pub fn get(&self, key: &str) -> Option<(Value, bool)> {
        let mut inner = self.inner.lock();
        let now = Instant::now();
        match inner.map.get(key) {
            Some(entry) if entry.expires_at > now => Some((entry.value.clone(), entry.is_error)),
            Some(_) => {
                inner.map.remove(key);
                None
            }
            None => None,
        }
    }

    pub fn has(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn set(&self, key: String, value: Value, is_error: bool, ttl: Duration) {
        let mut inner = self.inner.lock();
        if !inner.map.contains_key(&key) {
            inner.order.push_back(key.clone());
        }
        inner.map.insert(key, Entry { value, is_error, expires_at: Instant::now() + ttl });
        evict_to_bound(&mut inner);
    }

    pub fn delete(&self, key: &str) {
        let mut inner = self.inner.lock();
        inner.map.remove(key);
        inner.order.retain(|k| k != key);
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.map.clear();
        inner.order.clear();
    }

    /// Sweeps expired entries; called from the supervisor's periodic timer.
    pub fn cleanup(&self) {
        let mut inner = self.inner.lock();
        let now = Instant::now();
        let expired: Vec<String> = inner.map.iter().filter(|(_, e)| e.expires_at <= now).map(|(k, _)| k.clone()).collect();
        for key in expired {
            inner.map.remove(&key);
            inner.order.retain(|k| k != &key);
        }
    }

    pub fn size(&self) -> usize {
        self.inner.lock().map.len()
    }

    pub fn update_config(&self, max_entries: usize) {
        let mut inner = self.inner.lock();
        inner.max_entries = max_entries.max(1);
        inner.map.clear();
        inner.order.clear();
    }
}

fn evict_to_bound(inner: &mut Inner) {
    while inner.map.len() > inner.max_entries {
        if let Some(oldest) = inner.order.pop_front() {
            inner.map.remove(&oldest);
        } else {
            break;
        }
    }
}

/// `tool:<namespacedName>:<stableArgsAndGoal>` — identical arguments and goal
/// (after goal normalization) always collide to the same key.
pub fn tool_cache_key(namespaced_tool: &str, args: &Value, goal: Option<&str>) -> String {
    let composite = serde_json::json!({"tool": namespaced_tool, "args": args, "goal": normalize_goal(goal)});
    format!("tool:{}", stable_json(&composite))
}

pub fn resource_cache_key(namespaced_uri: &str) -> String {
    format!("resource:{namespaced_uri}")
}

/// The compressed variant of a base cache key, so raw and compressed results
/// for the same call never collide (a bypass call must not read a
/// compression-era entry and vice versa).
pub fn compressed_cache_key(base_key: &str) -> String {
    format!("compressed:{base_key}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn set_then_get_round_trips() {
        let cache = Cache::new(10);
        cache.set("a".into(), json!({"x": 1}), false, Duration::from_secs(60));
        let (value, is_error) = cache.get("a").unwrap();
        assert_eq!(value, json!({"x": 1}));
        assert!(!is_error);
    }

    #[test]
    fn expired_entry_is_absent() {
        let cache = Cache::new(10);
        cache.set("a".into(), json!(1), false, Duration::from_millis(0));
        std::thread::sleep(Duration::from_millis(5));
        assert!(cache.get("a").is_none());
    }

    #[test]
    fn fifo_eviction_at_bound() {
        let cache = Cache::new(2);
        cache.set("a".into(), json!(1), false, Duration::from_secs(60));
        cache.set("b".into(), json!(2), false, Duration::from_secs(60));
        cache.set("c".into(), json!(3), false, Duration::from_secs(60));
        assert_eq!(cache.size(), 2);
        assert!(cache.get("a").is_none());
        assert!(cache.get("b").is_some());
        assert!(cache.get("c").is_some());
    }

    #[test]
    fn cleanup_removes_only_expired() {
        let cache = Cache::new(10);
        cache.set("fresh".into(), json!(1), false, Duration::from_secs(60));
        cache.set("stale".into(), json!(2), false, Duration::from_millis(0));
        std::thread::sleep(Duration::from_millis(5));
        cache.cleanup();
        assert_eq!(cache.size(), 1);
        assert!(cache.get("fresh").is_some());
    }

    #[test]
    fn update_config_clears_cache() {
        let cache = Cache::new(10);
        cache.set("a".into(), json!(1), false, Duration::from_secs(60));
        cache.update_config(5);
        assert_eq!(cache.size(), 0);
    }

    #[test]
    fn tool_cache_key_ignores_goal_phrasing() {
        let k1 = tool_cache_key("fs__read", &json!({"path": "/a"}), Some("Find Files!"));
        let k2 = tool_cache_key("fs__read", &json!({"path": "/a"}), Some("find files"));
        assert_eq!(k1, k2);
    }

    #[test]
    fn tool_cache_key_distinguishes_args() {
        let k1 = tool_cache_key("fs__read", &json!({"path": "/a"}), None);
        let k2 = tool_cache_key("fs__read", &json!({"path": "/b"}), None);
        assert_ne!(k1, k2);
    }

    #[test]
    fn compressed_key_differs_from_base() {
        let base = tool_cache_key("fs__read", &json!({"path": "/a"}), None);
        assert_ne!(base, compressed_cache_key(&base));
    }
}
