use std::path::PathBuf;
use std::sync::Arc;

use futures::future::join_all;
use tracing::debug;
use url::Url;

use crate::models::{Request, RequestKey, Response};
use crate::net::Fetcher;

use super::backend::{CacheBackend, CacheEntry, EntryMeta, MemoryBackend};
use super::disk::DiskBackend;
use super::{CacheError, StorageError, StorageResult};

/// The set of named cache stores for one origin.
///
/// Cloning is cheap and every clone sees the same stores.
#[derive(Clone)]
pub struct CacheStorage {
    backend: Arc<dyn CacheBackend>,
}

impl CacheStorage {
    pub fn new(backend: Arc<dyn CacheBackend>) -> Self {
        Self { backend }
    }

    pub fn memory() -> Self {
        Self::new(Arc::new(MemoryBackend::new()))
    }

    pub fn disk(root: PathBuf) -> Self {
        Self::new(Arc::new(DiskBackend::new(root)))
    }

    /// Open a store, creating it if it does not exist.
    pub async fn open(&self, name: &str) -> StorageResult<Cache> {
        self.backend.open(name).await?;
        Ok(Cache {
            name: name.to_string(),
            backend: Arc::clone(&self.backend),
        })
    }

    pub async fn has(&self, name: &str) -> StorageResult<bool> {
        self.backend.has(name).await
    }

    pub async fn delete(&self, name: &str) -> StorageResult<bool> {
        self.backend.delete(name).await
    }

    /// Mark a store as fully installed.
    pub async fn mark_installed(&self, name: &str) -> StorageResult<()> {
        self.backend.mark_installed(name).await
    }

    /// Whether a store exists and a finished install was recorded for it.
    pub async fn is_installed(&self, name: &str) -> StorageResult<bool> {
        Ok(self.backend.has(name).await? && self.backend.is_installed(name).await?)
    }

    /// Names of all stores.
    pub async fn keys(&self) -> StorageResult<Vec<String>> {
        self.backend.names().await
    }

    /// Look a request up in one store without creating it.
    pub async fn match_in(&self, name: &str, request: &Request) -> StorageResult<Option<Response>> {
        match self.backend.get(name, &request.key()).await {
            Ok(Some(entry)) => entry.into_response().map(Some),
            Ok(None) | Err(StorageError::StoreNotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// Handle to one open cache store.
#[derive(Clone)]
pub struct Cache {
    name: String,
    backend: Arc<dyn CacheBackend>,
}

impl Cache {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn match_request(&self, request: &Request) -> StorageResult<Option<Response>> {
        match self.backend.get(&self.name, &request.key()).await? {
            Some(entry) => entry.into_response().map(Some),
            None => Ok(None),
        }
    }

    pub async fn put(&self, request: &Request, response: Response) -> StorageResult<()> {
        self.backend
            .put(&self.name, CacheEntry::new(request.key(), response))
            .await
    }

    /// Fetch `url` and store the response. Fails without storing anything
    /// unless the response is a successful basic response.
    pub async fn add(&self, url: &Url, fetcher: &dyn Fetcher) -> Result<(), CacheError> {
        let request = Request::get(url.clone());
        let response = Self::fetch_storable(&request, fetcher).await?;
        self.put(&request, response).await?;
        Ok(())
    }

    /// Fetch every URL concurrently and store them all, or none of them if
    /// any fetch fails or yields an unstorable response.
    pub async fn add_all(&self, urls: &[Url], fetcher: &dyn Fetcher) -> Result<(), CacheError> {
        let fetches = urls.iter().map(|url| async move {
            let request = Request::get(url.clone());
            Self::fetch_storable(&request, fetcher)
                .await
                .map(|response| CacheEntry::new(request.key(), response))
        });

        let mut entries = Vec::with_capacity(urls.len());
        for result in join_all(fetches).await {
            entries.push(result?);
        }

        self.backend.put_all(&self.name, entries).await?;
        debug!(store = %self.name, count = urls.len(), "Stored batch");
        Ok(())
    }

    pub async fn delete(&self, request: &Request) -> StorageResult<bool> {
        self.backend.remove(&self.name, &request.key()).await
    }

    pub async fn keys(&self) -> StorageResult<Vec<RequestKey>> {
        Ok(self
            .entries()
            .await?
            .iter()
            .map(EntryMeta::key)
            .collect())
    }

    pub async fn entries(&self) -> StorageResult<Vec<EntryMeta>> {
        self.backend.entries(&self.name).await
    }

    async fn fetch_storable(
        request: &Request,
        fetcher: &dyn Fetcher,
    ) -> Result<Response, CacheError> {
        let url = request.url.as_str();
        let response = fetcher
            .fetch(request)
            .await
            .map_err(|source| CacheError::Fetch {
                url: url.to_string(),
                source,
            })?;

        if !response.is_ok() {
            return Err(CacheError::BadStatus {
                url: url.to_string(),
                status: response.status,
            });
        }
        if !response.is_storable() {
            return Err(CacheError::NotBasic(url.to_string()));
        }
        Ok(response)
    }
}
