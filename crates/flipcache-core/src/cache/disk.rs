//! # Disk Backend
//!
//! Persistent cache stores that survive restarts. Each store is a directory
//! under the root; each entry is a `<hash>.body` file holding the response
//! bytes and a `<hash>.meta.json` file holding `EntryMeta`. The hash is the
//! SHA-256 of the request identity.
//!
//! Both files are written to temporaries and renamed into place, metadata
//! last, after any previous metadata is removed. A present metadata file
//! therefore always means a complete entry.
//!
//! A finished install leaves an `.installed` marker file in the store.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use sha2::{Digest, Sha256};
use tokio::fs;
use tracing::{debug, warn};

use crate::models::RequestKey;

use super::backend::{CacheBackend, CacheEntry, EntryMeta};
use super::{StorageError, StorageResult};

const META_SUFFIX: &str = ".meta.json";
const BODY_SUFFIX: &str = ".body";
const TMP_SUFFIX: &str = ".tmp";
const INSTALLED_MARKER: &str = ".installed";

/// Distinguishes temporaries of concurrent writes to the same entry.
static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone)]
pub struct DiskBackend {
    root: PathBuf,
}

impl DiskBackend {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    fn store_dir(&self, name: &str) -> StorageResult<PathBuf> {
        let valid = !name.is_empty()
            && name != "."
            && name != ".."
            && !name.contains(['/', '\\'])
            && !name.chars().any(char::is_control);
        if !valid {
            return Err(StorageError::InvalidName(name.to_string()));
        }
        Ok(self.root.join(name))
    }

    async fn existing_store_dir(&self, name: &str) -> StorageResult<PathBuf> {
        let dir = self.store_dir(name)?;
        if fs::try_exists(&dir).await? {
            Ok(dir)
        } else {
            Err(StorageError::StoreNotFound(name.to_string()))
        }
    }

    fn entry_stem(key: &RequestKey) -> String {
        hex::encode(Sha256::digest(key.to_string().as_bytes()))
    }

    fn meta_path(dir: &Path, key: &RequestKey) -> PathBuf {
        dir.join(format!("{}{}", Self::entry_stem(key), META_SUFFIX))
    }

    fn body_path(dir: &Path, key: &RequestKey) -> PathBuf {
        dir.join(format!("{}{}", Self::entry_stem(key), BODY_SUFFIX))
    }

    fn tmp_path(path: &Path) -> PathBuf {
        let n = TMP_COUNTER.fetch_add(1, Ordering::Relaxed);
        let mut name = path.as_os_str().to_owned();
        name.push(format!(".{}{}", n, TMP_SUFFIX));
        PathBuf::from(name)
    }

    async fn write_entry(dir: &Path, entry: CacheEntry) -> StorageResult<()> {
        let key = entry.key();
        let body_path = Self::body_path(dir, &key);
        let meta_path = Self::meta_path(dir, &key);
        let body_tmp = Self::tmp_path(&body_path);
        let meta_tmp = Self::tmp_path(&meta_path);

        let result: StorageResult<()> = async {
            fs::write(&body_tmp, &entry.body).await?;
            fs::write(&meta_tmp, serde_json::to_vec(&entry.meta)?).await?;

            // Old metadata must not outlive its body
            match fs::remove_file(&meta_path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
            fs::rename(&body_tmp, &body_path).await?;
            fs::rename(&meta_tmp, &meta_path).await?;
            Ok(())
        }
        .await;

        if result.is_err() {
            let _ = fs::remove_file(&body_tmp).await;
            let _ = fs::remove_file(&meta_tmp).await;
        }
        result
    }
}

#[async_trait]
impl CacheBackend for DiskBackend {
    async fn open(&self, name: &str) -> StorageResult<()> {
        let dir = self.store_dir(name)?;
        fs::create_dir_all(&dir).await?;
        Ok(())
    }

    async fn has(&self, name: &str) -> StorageResult<bool> {
        let dir = self.store_dir(name)?;
        Ok(fs::try_exists(&dir).await?)
    }

    async fn names(&self) -> StorageResult<Vec<String>> {
        if !fs::try_exists(&self.root).await? {
            return Ok(Vec::new());
        }

        let mut names = Vec::new();
        let mut dir = fs::read_dir(&self.root).await?;
        while let Some(item) = dir.next_entry().await? {
            if item.file_type().await?.is_dir() {
                if let Some(name) = item.file_name().to_str() {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    async fn delete(&self, name: &str) -> StorageResult<bool> {
        let dir = self.store_dir(name)?;
        if !fs::try_exists(&dir).await? {
            return Ok(false);
        }
        fs::remove_dir_all(&dir).await?;
        debug!(store = name, "Deleted cache store directory");
        Ok(true)
    }

    async fn get(&self, name: &str, key: &RequestKey) -> StorageResult<Option<CacheEntry>> {
        let dir = self.existing_store_dir(name).await?;
        let meta_path = Self::meta_path(&dir, key);

        let meta_bytes = match fs::read(&meta_path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let meta: EntryMeta = serde_json::from_slice(&meta_bytes)?;

        let body = match fs::read(Self::body_path(&dir, key)).await {
            Ok(body) => body,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(path = ?meta_path, "Cache metadata without body, treating as miss");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        Ok(Some(CacheEntry {
            meta,
            body: Bytes::from(body),
        }))
    }

    async fn put(&self, name: &str, entry: CacheEntry) -> StorageResult<()> {
        let dir = self.existing_store_dir(name).await?;
        Self::write_entry(&dir, entry).await
    }

    async fn put_all(&self, name: &str, entries: Vec<CacheEntry>) -> StorageResult<()> {
        let dir = self.existing_store_dir(name).await?;
        for entry in entries {
            Self::write_entry(&dir, entry).await?;
        }
        Ok(())
    }

    async fn remove(&self, name: &str, key: &RequestKey) -> StorageResult<bool> {
        let dir = self.existing_store_dir(name).await?;
        let meta_path = Self::meta_path(&dir, key);
        if !fs::try_exists(&meta_path).await? {
            return Ok(false);
        }
        fs::remove_file(&meta_path).await?;
        if let Err(e) = fs::remove_file(Self::body_path(&dir, key)).await {
            debug!(error = %e, "Failed to remove cache body file");
        }
        Ok(true)
    }

    async fn entries(&self, name: &str) -> StorageResult<Vec<EntryMeta>> {
        let dir = self.existing_store_dir(name).await?;

        let mut metas = Vec::new();
        let mut listing = fs::read_dir(&dir).await?;
        while let Some(item) = listing.next_entry().await? {
            let path = item.path();
            let is_meta = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.ends_with(META_SUFFIX));
            if !is_meta {
                continue;
            }

            let parsed = fs::read(&path)
                .await
                .map_err(StorageError::from)
                .and_then(|bytes| {
                    serde_json::from_slice::<EntryMeta>(&bytes).map_err(StorageError::from)
                });
            match parsed {
                Ok(meta) => metas.push(meta),
                Err(e) => warn!(path = ?path, error = %e, "Skipping unreadable cache metadata"),
            }
        }
        metas.sort_by(|a, b| a.url.cmp(&b.url));
        Ok(metas)
    }

    async fn mark_installed(&self, name: &str) -> StorageResult<()> {
        let dir = self.existing_store_dir(name).await?;
        fs::write(dir.join(INSTALLED_MARKER), b"").await?;
        Ok(())
    }

    async fn is_installed(&self, name: &str) -> StorageResult<bool> {
        let dir = self.store_dir(name)?;
        Ok(fs::try_exists(dir.join(INSTALLED_MARKER)).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Response;
    use url::Url;

    fn entry(url: &str, body: &'static str) -> CacheEntry {
        let url = Url::parse(url).unwrap();
        CacheEntry::new(RequestKey::get(&url), Response::new(url, 200, body))
    }

    #[tokio::test]
    async fn test_entries_survive_a_new_backend_instance() {
        let dir = tempfile::tempdir().unwrap();
        let e = entry("https://a.test/Complan/files/mobile/1.jpg", "jpeg bytes");

        let backend = DiskBackend::new(dir.path().to_path_buf());
        backend.open("rx-lifestyle-v3").await.unwrap();
        backend.put("rx-lifestyle-v3", e.clone()).await.unwrap();

        let reopened = DiskBackend::new(dir.path().to_path_buf());
        assert_eq!(reopened.names().await.unwrap(), vec!["rx-lifestyle-v3".to_string()]);
        let loaded = reopened.get("rx-lifestyle-v3", &e.key()).await.unwrap().unwrap();
        assert_eq!(loaded, e);
        assert_eq!(reopened.entries("rx-lifestyle-v3").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_missing_entry_and_missing_store() {
        let dir = tempfile::tempdir().unwrap();
        let backend = DiskBackend::new(dir.path().to_path_buf());
        let key = entry("https://a.test/a.js", "").key();

        assert!(matches!(
            backend.get("rx-v1", &key).await,
            Err(StorageError::StoreNotFound(_))
        ));

        backend.open("rx-v1").await.unwrap();
        assert!(backend.get("rx-v1", &key).await.unwrap().is_none());
        assert!(!backend.remove("rx-v1", &key).await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_store() {
        let dir = tempfile::tempdir().unwrap();
        let backend = DiskBackend::new(dir.path().to_path_buf());
        backend.open("rx-v1").await.unwrap();
        backend.open("rx-v2").await.unwrap();
        backend.put("rx-v1", entry("https://a.test/a.js", "a")).await.unwrap();

        assert!(backend.delete("rx-v1").await.unwrap());
        assert!(!backend.delete("rx-v1").await.unwrap());
        assert_eq!(backend.names().await.unwrap(), vec!["rx-v2".to_string()]);
    }

    #[tokio::test]
    async fn test_rejects_path_like_store_names() {
        let dir = tempfile::tempdir().unwrap();
        let backend = DiskBackend::new(dir.path().to_path_buf());

        for name in ["", ".", "..", "a/b", "a\\b"] {
            assert!(matches!(
                backend.open(name).await,
                Err(StorageError::InvalidName(_))
            ));
        }
    }

    #[tokio::test]
    async fn test_open_fails_when_root_is_a_file() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let backend = DiskBackend::new(file.path().to_path_buf());

        assert!(matches!(backend.open("rx-v1").await, Err(StorageError::Io(_))));
    }

    #[tokio::test]
    async fn test_overwrite_replaces_entry_and_leaves_no_temporaries() {
        let dir = tempfile::tempdir().unwrap();
        let backend = DiskBackend::new(dir.path().to_path_buf());
        backend.open("rx-v1").await.unwrap();
        backend
            .put("rx-v1", entry("https://a.test/a.js", "a much longer first body"))
            .await
            .unwrap();

        let fresh = entry("https://a.test/a.js", "short");
        backend.put("rx-v1", fresh.clone()).await.unwrap();

        let loaded = backend.get("rx-v1", &fresh.key()).await.unwrap().unwrap();
        assert_eq!(&loaded.body[..], b"short");

        let files: Vec<String> = std::fs::read_dir(dir.path().join("rx-v1"))
            .unwrap()
            .map(|f| f.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(files.len(), 2);
        assert!(files.iter().all(|f| !f.ends_with(TMP_SUFFIX)));
    }

    #[tokio::test]
    async fn test_failed_overwrite_keeps_previous_entry_whole() {
        let dir = tempfile::tempdir().unwrap();
        let backend = DiskBackend::new(dir.path().to_path_buf());
        backend.open("rx-v1").await.unwrap();
        let old = entry("https://a.test/index.html", "complete page");
        backend.put("rx-v1", old.clone()).await.unwrap();

        // A read-only store directory makes the temporary write fail
        let store = dir.path().join("rx-v1");
        let mut perms = std::fs::metadata(&store).unwrap().permissions();
        perms.set_readonly(true);
        std::fs::set_permissions(&store, perms.clone()).unwrap();
        // root ignores directory permissions
        let permissions_ignored = std::fs::write(store.join("write-check"), b"").is_ok();

        let result = backend
            .put("rx-v1", entry("https://a.test/index.html", "new page"))
            .await;

        #[allow(clippy::permissions_set_readonly_false)]
        perms.set_readonly(false);
        std::fs::set_permissions(&store, perms).unwrap();

        if !permissions_ignored {
            assert!(result.is_err());
            let loaded = backend.get("rx-v1", &old.key()).await.unwrap().unwrap();
            assert_eq!(loaded, old);
        }
    }

    #[tokio::test]
    async fn test_installed_marker_persists_and_is_not_an_entry() {
        let dir = tempfile::tempdir().unwrap();
        let backend = DiskBackend::new(dir.path().to_path_buf());
        backend.open("rx-v1").await.unwrap();
        backend.put("rx-v1", entry("https://a.test/a.js", "a")).await.unwrap();
        assert!(!backend.is_installed("rx-v1").await.unwrap());

        backend.mark_installed("rx-v1").await.unwrap();

        let reopened = DiskBackend::new(dir.path().to_path_buf());
        assert!(reopened.is_installed("rx-v1").await.unwrap());
        assert_eq!(reopened.entries("rx-v1").await.unwrap().len(), 1);
        assert!(!reopened.is_installed("rx-v2").await.unwrap());
    }

    #[tokio::test]
    async fn test_names_of_missing_root_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let backend = DiskBackend::new(dir.path().join("not-created"));
        assert!(backend.names().await.unwrap().is_empty());
    }
}
