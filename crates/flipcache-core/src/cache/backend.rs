//! # Cache Backend
//!
//! The backend trait every cache storage implementation follows, the entry
//! types it stores, and the in-memory implementation.

use std::collections::{BTreeMap, HashMap, HashSet};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use url::Url;

use crate::models::{RequestKey, Response, ResponseType};
use crate::utils::format_age_minutes;

use super::{StorageError, StorageResult};

/// Everything about a cached response except its body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryMeta {
    pub method: String,
    pub url: String,
    pub response_url: String,
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    pub response_type: ResponseType,
    pub cached_at: DateTime<Utc>,
}

impl EntryMeta {
    pub fn key(&self) -> RequestKey {
        RequestKey {
            method: self.method.clone(),
            url: self.url.clone(),
        }
    }

    pub fn age_minutes(&self) -> i64 {
        (Utc::now() - self.cached_at).num_minutes()
    }

    pub fn age_display(&self) -> String {
        format_age_minutes(self.age_minutes())
    }
}

/// A stored request/response pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub meta: EntryMeta,
    pub body: Bytes,
}

impl CacheEntry {
    pub fn new(key: RequestKey, response: Response) -> Self {
        Self {
            meta: EntryMeta {
                method: key.method,
                url: key.url,
                response_url: response.url.as_str().to_string(),
                status: response.status,
                headers: response.headers,
                response_type: response.response_type,
                cached_at: Utc::now(),
            },
            body: response.body,
        }
    }

    pub fn key(&self) -> RequestKey {
        self.meta.key()
    }

    pub fn into_response(self) -> StorageResult<Response> {
        let url = Url::parse(&self.meta.response_url)
            .map_err(|e| StorageError::Corrupt(format!("{}: {}", self.meta.response_url, e)))?;

        Ok(Response {
            url,
            status: self.meta.status,
            headers: self.meta.headers,
            body: self.body,
            response_type: self.meta.response_type,
            from_cache: true,
        })
    }
}

/// Storage for named cache stores.
///
/// Entry operations on a store that does not exist fail with
/// `StorageError::StoreNotFound`; only `open` creates stores.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Create the named store if it does not exist.
    async fn open(&self, name: &str) -> StorageResult<()>;

    async fn has(&self, name: &str) -> StorageResult<bool>;

    /// Names of every existing store, sorted.
    async fn names(&self) -> StorageResult<Vec<String>>;

    /// Delete a store and all of its entries. Returns whether it existed.
    async fn delete(&self, name: &str) -> StorageResult<bool>;

    async fn get(&self, name: &str, key: &RequestKey) -> StorageResult<Option<CacheEntry>>;

    async fn put(&self, name: &str, entry: CacheEntry) -> StorageResult<()>;

    /// Store several entries. The default stores them one by one.
    async fn put_all(&self, name: &str, entries: Vec<CacheEntry>) -> StorageResult<()> {
        for entry in entries {
            self.put(name, entry).await?;
        }
        Ok(())
    }

    /// Remove a single entry. Returns whether it existed.
    async fn remove(&self, name: &str, key: &RequestKey) -> StorageResult<bool>;

    /// Metadata of every entry in the store.
    async fn entries(&self, name: &str) -> StorageResult<Vec<EntryMeta>>;

    /// Record that an install run filled the store to completion.
    async fn mark_installed(&self, name: &str) -> StorageResult<()>;

    /// Whether the store was marked installed. A store left behind by an
    /// interrupted install is not.
    async fn is_installed(&self, name: &str) -> StorageResult<bool>;
}

/// Process-local backend. Stores vanish with the process.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    stores: RwLock<HashMap<String, HashMap<RequestKey, CacheEntry>>>,
    installed: RwLock<HashSet<String>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheBackend for MemoryBackend {
    async fn open(&self, name: &str) -> StorageResult<()> {
        self.stores
            .write()
            .await
            .entry(name.to_string())
            .or_default();
        Ok(())
    }

    async fn has(&self, name: &str) -> StorageResult<bool> {
        Ok(self.stores.read().await.contains_key(name))
    }

    async fn names(&self) -> StorageResult<Vec<String>> {
        let mut names: Vec<String> = self.stores.read().await.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    async fn delete(&self, name: &str) -> StorageResult<bool> {
        self.installed.write().await.remove(name);
        Ok(self.stores.write().await.remove(name).is_some())
    }

    async fn get(&self, name: &str, key: &RequestKey) -> StorageResult<Option<CacheEntry>> {
        let stores = self.stores.read().await;
        let store = stores
            .get(name)
            .ok_or_else(|| StorageError::StoreNotFound(name.to_string()))?;
        Ok(store.get(key).cloned())
    }

    async fn put(&self, name: &str, entry: CacheEntry) -> StorageResult<()> {
        let mut stores = self.stores.write().await;
        let store = stores
            .get_mut(name)
            .ok_or_else(|| StorageError::StoreNotFound(name.to_string()))?;
        store.insert(entry.key(), entry);
        Ok(())
    }

    async fn put_all(&self, name: &str, entries: Vec<CacheEntry>) -> StorageResult<()> {
        let mut stores = self.stores.write().await;
        let store = stores
            .get_mut(name)
            .ok_or_else(|| StorageError::StoreNotFound(name.to_string()))?;
        for entry in entries {
            store.insert(entry.key(), entry);
        }
        Ok(())
    }

    async fn remove(&self, name: &str, key: &RequestKey) -> StorageResult<bool> {
        let mut stores = self.stores.write().await;
        let store = stores
            .get_mut(name)
            .ok_or_else(|| StorageError::StoreNotFound(name.to_string()))?;
        Ok(store.remove(key).is_some())
    }

    async fn entries(&self, name: &str) -> StorageResult<Vec<EntryMeta>> {
        let stores = self.stores.read().await;
        let store = stores
            .get(name)
            .ok_or_else(|| StorageError::StoreNotFound(name.to_string()))?;
        let mut metas: Vec<EntryMeta> = store.values().map(|e| e.meta.clone()).collect();
        metas.sort_by(|a, b| a.url.cmp(&b.url));
        Ok(metas)
    }

    async fn mark_installed(&self, name: &str) -> StorageResult<()> {
        if !self.stores.read().await.contains_key(name) {
            return Err(StorageError::StoreNotFound(name.to_string()));
        }
        self.installed.write().await.insert(name.to_string());
        Ok(())
    }

    async fn is_installed(&self, name: &str) -> StorageResult<bool> {
        Ok(self.installed.read().await.contains(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn entry(url: &str) -> CacheEntry {
        let url = Url::parse(url).unwrap();
        CacheEntry::new(RequestKey::get(&url), Response::new(url, 200, "body"))
    }

    #[tokio::test]
    async fn test_entry_ops_require_open_store() {
        let backend = MemoryBackend::new();
        let e = entry("https://a.test/a.js");

        assert!(matches!(
            backend.put("rx-v1", e.clone()).await,
            Err(StorageError::StoreNotFound(_))
        ));

        backend.open("rx-v1").await.unwrap();
        backend.put("rx-v1", e.clone()).await.unwrap();
        let loaded = backend.get("rx-v1", &e.key()).await.unwrap().unwrap();
        assert_eq!(loaded, e);
    }

    #[tokio::test]
    async fn test_open_is_idempotent_and_keeps_entries() {
        let backend = MemoryBackend::new();
        let e = entry("https://a.test/a.js");
        backend.open("rx-v1").await.unwrap();
        backend.put("rx-v1", e.clone()).await.unwrap();
        backend.open("rx-v1").await.unwrap();

        assert_eq!(backend.entries("rx-v1").await.unwrap().len(), 1);
        assert_eq!(backend.names().await.unwrap(), vec!["rx-v1".to_string()]);
    }

    #[tokio::test]
    async fn test_delete_and_remove() {
        let backend = MemoryBackend::new();
        let e = entry("https://a.test/a.js");
        backend.open("rx-v1").await.unwrap();
        backend.put("rx-v1", e.clone()).await.unwrap();

        assert!(backend.remove("rx-v1", &e.key()).await.unwrap());
        assert!(!backend.remove("rx-v1", &e.key()).await.unwrap());
        assert!(backend.delete("rx-v1").await.unwrap());
        assert!(!backend.delete("rx-v1").await.unwrap());
        assert!(!backend.has("rx-v1").await.unwrap());
    }

    #[tokio::test]
    async fn test_installed_marker_follows_the_store() {
        let backend = MemoryBackend::new();
        assert!(matches!(
            backend.mark_installed("rx-v1").await,
            Err(StorageError::StoreNotFound(_))
        ));

        backend.open("rx-v1").await.unwrap();
        assert!(!backend.is_installed("rx-v1").await.unwrap());
        backend.mark_installed("rx-v1").await.unwrap();
        assert!(backend.is_installed("rx-v1").await.unwrap());

        backend.delete("rx-v1").await.unwrap();
        backend.open("rx-v1").await.unwrap();
        assert!(!backend.is_installed("rx-v1").await.unwrap());
    }

    #[test]
    fn test_entry_round_trips_to_cached_response() {
        let e = entry("https://a.test/files/thumb/3.jpg");
        let response = e.into_response().unwrap();
        assert!(response.from_cache);
        assert_eq!(response.status, 200);
        assert_eq!(&response.body[..], b"body");
    }

    #[test]
    fn test_entry_age_display() {
        let mut e = entry("https://a.test/a.js");
        assert_eq!(e.meta.age_display(), "just now");
        e.meta.cached_at = Utc::now() - Duration::minutes(90);
        assert_eq!(e.meta.age_display(), "2h ago");
    }
}
