//! A single in-process TTL cache used for every short-lived derived value the
//! engine computes: directory-profile enrichment, unread counts, the stable
//! part of an E2EE key bundle, and the online-presence set the fanout plane
//! publishes. A real deployment backs this with a shared out-of-process store
//! reachable from every worker process; this implementation mirrors the shape
//! the rest of the call sites need so the engine runs and tests standalone.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;

#[derive(Clone)]
struct Entry {
    value: String,
    expires_at: Instant,
}

/// Keyed TTL cache. Cheaply cloneable — clones share the same underlying map.
#[derive(Clone, Default)]
pub struct Cache {
    entries: Arc<RwLock<HashMap<String, Entry>>>,
}

impl Cache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `value` under `key` for `ttl`. Overwrites any existing entry.
    pub async fn set(&self, key: impl Into<String>, value: impl Into<String>, ttl: Duration) {
        let entry = Entry {
            value: value.into(),
            expires_at: Instant::now() + ttl,
        };
        self.entries.write().await.insert(key.into(), entry);
    }

    /// Fetch a value, returning `None` if absent or expired. Expired entries
    /// are lazily evicted on read rather than swept by a background task.
    pub async fn get(&self, key: &str) -> Option<String> {
        let entries = self.entries.read().await;
        match entries.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => Some(entry.value.clone()),
            _ => None,
        }
    }

    pub async fn invalidate(&self, key: &str) {
        self.entries.write().await.remove(key);
    }

    /// Set-style membership used for the online-presence set: `key` is present
    /// with no payload of interest beyond its existence and TTL.
    pub async fn mark_present(&self, key: impl Into<String>, ttl: Duration) {
        self.set(key, "1", ttl).await;
    }

    pub async fn is_present(&self, key: &str) -> bool {
        self.get(key).await.is_some()
    }

    pub async fn clear_present(&self, key: &str) {
        self.invalidate(key).await;
    }

    #[cfg(test)]
    async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}

/// JSON convenience helpers layered on top of the string-valued cache.
impl Cache {
    pub async fn set_json<T: serde::Serialize>(
        &self,
        key: impl Into<String>,
        value: &T,
        ttl: Duration,
    ) {
        if let Ok(json) = serde_json::to_string(value) {
            self.set(key, json, ttl).await;
        }
    }

    pub async fn get_json<T: serde::de::DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = self.get(key).await?;
        serde_json::from_str(&raw).ok()
    }
}

pub fn online_presence_key(user_id: uuid::Uuid) -> String {
    format!("presence:online:{user_id}")
}

pub fn unread_count_key(user_id: uuid::Uuid, conversation_id: uuid::Uuid) -> String {
    format!("unread:{user_id}:{conversation_id}")
}

pub fn key_bundle_stable_key(user_id: uuid::Uuid) -> String {
    format!("keybundle:stable:{user_id}")
}

pub fn user_profile_key(user_id: uuid::Uuid) -> String {
    format!("user:profile:{user_id}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_then_get_roundtrips() {
        let cache = Cache::new();
        cache.set("k", "v", Duration::from_secs(60)).await;
        assert_eq!(cache.get("k").await, Some("v".to_string()));
    }

    #[tokio::test]
    async fn get_missing_key_returns_none() {
        let cache = Cache::new();
        assert_eq!(cache.get("missing").await, None);
    }

    #[tokio::test]
    async fn expired_entry_is_not_returned() {
        let cache = Cache::new();
        cache.set("k", "v", Duration::from_millis(1)).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(cache.get("k").await, None);
    }

    #[tokio::test]
    async fn invalidate_removes_entry() {
        let cache = Cache::new();
        cache.set("k", "v", Duration::from_secs(60)).await;
        cache.invalidate("k").await;
        assert_eq!(cache.get("k").await, None);
    }

    #[tokio::test]
    async fn presence_mark_and_clear() {
        let cache = Cache::new();
        let key = online_presence_key(uuid::Uuid::nil());
        assert!(!cache.is_present(&key).await);
        cache.mark_present(key.clone(), Duration::from_secs(30)).await;
        assert!(cache.is_present(&key).await);
        cache.clear_present(&key).await;
        assert!(!cache.is_present(&key).await);
    }

    #[tokio::test]
    async fn json_roundtrip() {
        #[derive(serde::Serialize, serde::Deserialize, PartialEq, Debug)]
        struct Thing {
            a: i32,
            b: String,
        }
        let cache = Cache::new();
        let thing = Thing {
            a: 1,
            b: "x".into(),
        };
        cache.set_json("thing", &thing, Duration::from_secs(60)).await;
        let back: Thing = cache.get_json("thing").await.unwrap();
        assert_eq!(thing, back);
    }

    #[tokio::test]
    async fn overwrite_replaces_value_without_growing_len() {
        let cache = Cache::new();
        cache.set("k", "v1", Duration::from_secs(60)).await;
        cache.set("k", "v2", Duration::from_secs(60)).await;
        assert_eq!(cache.len().await, 1);
        assert_eq!(cache.get("k").await, Some("v2".to_string()));
    }
}
