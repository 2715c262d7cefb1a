//! Fast, TTL-bounded key/field store with pub/sub.
//!
//! [`FastStore`] is the seam to an ephemeral cache (one hash of fields per
//! key plus broadcast channels). Every write refreshes the key's TTL.
//! Field-level and additive operations let several in-flight tasks of the
//! same job report concurrently without any cross-task locking.
//!
//! [`MemoryFastStore`] is the in-process implementation backed by
//! `tokio::sync::broadcast`, with knobs to simulate eviction and outages.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use tokio::sync::broadcast;
use tokio::time::Instant;

/// Field map stored under one key.
pub type Fields = HashMap<String, String>;

/// Errors raised by fast store implementations.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FastStoreError {
    #[error("Fast store unavailable: {0}")]
    Unavailable(String),

    #[error("Field '{field}' of '{key}' is not numeric: {value}")]
    NotNumeric {
        key: String,
        field: String,
        value: String,
    },
}

#[async_trait]
pub trait FastStore: Send + Sync {
    /// Overwrite the given fields of `key`.
    async fn set_fields(&self, key: &str, fields: Vec<(String, String)>, ttl: Duration) -> Result<(), FastStoreError>;

    /// Add `delta` to a float field, creating it at zero. Returns the new value.
    async fn incr_float(&self, key: &str, field: &str, delta: f64, ttl: Duration) -> Result<f64, FastStoreError>;

    /// Raise an integer field to `value` if it is lower. Returns the stored value.
    async fn max_int(&self, key: &str, field: &str, value: i64, ttl: Duration) -> Result<i64, FastStoreError>;

    /// All fields of `key`, or `None` on a miss (never written or expired).
    async fn get_fields(&self, key: &str) -> Result<Option<Fields>, FastStoreError>;

    async fn publish(&self, channel: &str, message: String) -> Result<(), FastStoreError>;

    /// Messages published on `channel` after this call.
    async fn subscribe(&self, channel: &str) -> Result<BoxStream<'static, String>, FastStoreError>;
}

// ---------------------------------------------------------------------------
// In-memory implementation
// ---------------------------------------------------------------------------

/// Broadcast buffer per channel.
const CHANNEL_CAPACITY: usize = 256;

struct Entry {
    fields: Fields,
    expires_at: Instant,
}

/// In-process [`FastStore`].
///
/// TTLs are measured on the Tokio clock so tests can drive expiry with
/// `tokio::time::advance`.
pub struct MemoryFastStore {
    entries: Mutex<HashMap<String, Entry>>,
    channels: Mutex<HashMap<String, broadcast::Sender<String>>>,
    available: AtomicBool,
}

impl Default for MemoryFastStore {
    fn default() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            channels: Mutex::new(HashMap::new()),
            available: AtomicBool::new(true),
        }
    }
}

impl MemoryFastStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop `key` as if its TTL had expired.
    pub fn evict(&self, key: &str) {
        self.lock_entries().remove(key);
    }

    /// Drop every key.
    pub fn evict_all(&self) {
        self.lock_entries().clear();
    }

    /// Toggle simulated reachability. While unavailable every call fails.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), FastStoreError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(FastStoreError::Unavailable("memory store switched off".to_string()))
        }
    }

    fn lock_entries(&self) -> std::sync::MutexGuard<'_, HashMap<String, Entry>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Run `f` on the live entry for `key`, creating it if missing or
    /// expired, and refresh its TTL.
    fn with_entry<T>(&self, key: &str, ttl: Duration, f: impl FnOnce(&mut Fields) -> T) -> T {
        let now = Instant::now();
        let mut entries = self.lock_entries();
        let entry = entries.entry(key.to_string()).or_insert_with(|| Entry {
            fields: Fields::new(),
            expires_at: now,
        });
        if entry.expires_at <= now {
            entry.fields.clear();
        }
        entry.expires_at = now + ttl;
        f(&mut entry.fields)
    }

    fn sender(&self, channel: &str) -> broadcast::Sender<String> {
        let mut channels = self.channels.lock().unwrap_or_else(|e| e.into_inner());
        channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .clone()
    }
}

#[async_trait]
impl FastStore for MemoryFastStore {
    async fn set_fields(&self, key: &str, fields: Vec<(String, String)>, ttl: Duration) -> Result<(), FastStoreError> {
        self.check_available()?;
        self.with_entry(key, ttl, |map| map.extend(fields));
        Ok(())
    }

    async fn incr_float(&self, key: &str, field: &str, delta: f64, ttl: Duration) -> Result<f64, FastStoreError> {
        self.check_available()?;
        self.with_entry(key, ttl, |map| {
            let current = parse_field::<f64>(key, field, map.get(field))?;
            let next = current + delta;
            map.insert(field.to_string(), next.to_string());
            Ok(next)
        })
    }

    async fn max_int(&self, key: &str, field: &str, value: i64, ttl: Duration) -> Result<i64, FastStoreError> {
        self.check_available()?;
        self.with_entry(key, ttl, |map| {
            let current = parse_field::<i64>(key, field, map.get(field))?;
            let next = current.max(value);
            map.insert(field.to_string(), next.to_string());
            Ok(next)
        })
    }

    async fn get_fields(&self, key: &str) -> Result<Option<Fields>, FastStoreError> {
        self.check_available()?;
        let mut entries = self.lock_entries();
        match entries.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => Ok(Some(entry.fields.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn publish(&self, channel: &str, message: String) -> Result<(), FastStoreError> {
        self.check_available()?;
        // A send error only means nobody is listening.
        let _ = self.sender(channel).send(message);
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<BoxStream<'static, String>, FastStoreError> {
        self.check_available()?;
        let receiver = self.sender(channel).subscribe();
        let channel = channel.to_string();
        Ok(stream::unfold(receiver, move |mut rx| {
            let channel = channel.clone();
            async move {
                loop {
                    match rx.recv().await {
                        Ok(message) => return Some((message, rx)),
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            tracing::warn!(%channel, skipped, "Fast store subscriber lagged");
                        }
                        Err(broadcast::error::RecvError::Closed) => return None,
                    }
                }
            }
        })
        .boxed())
    }
}

fn parse_field<T: std::str::FromStr + Default>(
    key: &str,
    field: &str,
    raw: Option<&String>,
) -> Result<T, FastStoreError> {
    match raw {
        None => Ok(T::default()),
        Some(value) => value.parse().map_err(|_| FastStoreError::NotNumeric {
            key: key.to_string(),
            field: field.to_string(),
            value: value.clone(),
        }),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    const TTL: Duration = Duration::from_secs(60);

    #[tokio::test]
    async fn set_then_get_returns_fields() {
        let store = MemoryFastStore::new();
        store
            .set_fields("k", vec![("a".into(), "1".into()), ("b".into(), "x".into())], TTL)
            .await
            .unwrap();
        let fields = store.get_fields("k").await.unwrap().unwrap();
        assert_eq!(fields.get("a").map(String::as_str), Some("1"));
        assert_eq!(fields.get("b").map(String::as_str), Some("x"));
    }

    #[tokio::test(start_paused = true)]
    async fn entries_expire_after_ttl() {
        let store = MemoryFastStore::new();
        store.set_fields("k", vec![("a".into(), "1".into())], TTL).await.unwrap();

        tokio::time::advance(TTL + Duration::from_secs(1)).await;
        assert_eq!(store.get_fields("k").await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn writes_refresh_ttl() {
        let store = MemoryFastStore::new();
        store.set_fields("k", vec![("a".into(), "1".into())], TTL).await.unwrap();
        tokio::time::advance(Duration::from_secs(50)).await;
        store.max_int("k", "p", 3, TTL).await.unwrap();
        tokio::time::advance(Duration::from_secs(50)).await;
        assert!(store.get_fields("k").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn incr_float_accumulates() {
        let store = MemoryFastStore::new();
        store.incr_float("k", "cost", 0.5, TTL).await.unwrap();
        let total = store.incr_float("k", "cost", 0.25, TTL).await.unwrap();
        assert!((total - 0.75).abs() < 1e-12);
    }

    #[tokio::test]
    async fn max_int_never_decreases() {
        let store = MemoryFastStore::new();
        assert_eq!(store.max_int("k", "p", 40, TTL).await.unwrap(), 40);
        assert_eq!(store.max_int("k", "p", 10, TTL).await.unwrap(), 40);
        assert_eq!(store.max_int("k", "p", 55, TTL).await.unwrap(), 55);
    }

    #[tokio::test]
    async fn non_numeric_field_is_reported() {
        let store = MemoryFastStore::new();
        store.set_fields("k", vec![("p".into(), "lots".into())], TTL).await.unwrap();
        assert_matches!(
            store.max_int("k", "p", 1, TTL).await,
            Err(FastStoreError::NotNumeric { .. })
        );
    }

    #[tokio::test]
    async fn unavailable_store_fails_every_call() {
        let store = MemoryFastStore::new();
        store.set_available(false);
        assert_matches!(store.get_fields("k").await, Err(FastStoreError::Unavailable(_)));
        assert_matches!(
            store.publish("c", "m".into()).await,
            Err(FastStoreError::Unavailable(_))
        );
    }

    #[tokio::test]
    async fn subscribers_receive_messages_published_after_subscribing() {
        let store = MemoryFastStore::new();
        store.publish("c", "before".into()).await.unwrap();
        let mut stream = store.subscribe("c").await.unwrap();
        store.publish("c", "after".into()).await.unwrap();
        assert_eq!(stream.next().await.as_deref(), Some("after"));
    }

    #[tokio::test]
    async fn evict_removes_key() {
        let store = MemoryFastStore::new();
        store.set_fields("k", vec![("a".into(), "1".into())], TTL).await.unwrap();
        store.evict("k");
        assert_eq!(store.get_fields("k").await.unwrap(), None);
    }
}
