use thiserror::Error;

use crate::net::FetchError;

pub type StorageResult<T> = Result<T, StorageError>;

/// Failures of the cache storage layer itself.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Cache store not found: {0}")]
    StoreNotFound(String),

    #[error("Invalid cache store name: {0:?}")]
    InvalidName(String),

    #[error("Corrupt cache entry: {0}")]
    Corrupt(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Failure to fetch-and-store a single URL.
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Fetch failed for {url}: {source}")]
    Fetch {
        url: String,
        #[source]
        source: FetchError,
    },

    #[error("Bad response status {status} for {url}")]
    BadStatus { url: String, status: u16 },

    #[error("Response for {0} is not a basic same-origin response")]
    NotBasic(String),

    #[error(transparent)]
    Storage(#[from] StorageError),
}
