//! flipcache core - offline caching for a static presentation site.
//!
//! The crate models a service worker that makes a site usable offline:
//!
//! - [`manifest`]: builds the ordered list of URLs to pre-cache
//! - [`cache`]: named, versioned cache stores (memory or disk)
//! - [`net`]: the network seam and its HTTP implementation
//! - [`worker`]: install (batch pre-cache), activate (prune + claim),
//!   fetch interception and background sync
//! - [`clients`]: foreground pages and the progress messages they receive
//! - [`config`]: on-disk configuration

pub mod cache;
pub mod clients;
pub mod config;
pub mod manifest;
pub mod models;
pub mod net;
pub mod utils;
pub mod worker;

pub use cache::{Cache, CacheStorage, CacheVersion};
pub use clients::{ClientHandle, ClientId, Clients, InstallStatus};
pub use config::Config;
pub use manifest::{ContentSet, Manifest, ManifestBuilder, ManifestSpec};
pub use models::{Destination, PageMessage, Progress, Request, Response, WorkerMessage};
pub use net::{FetchError, Fetcher, HttpFetcher};
pub use worker::{
    ActivateReport, EventOutcome, InstallOutcome, InstallReport, LifecycleReport,
    RuntimeCachePolicy, ServiceWorker, ServiceWorkerState, WorkerError, WorkerEvent,
    WorkerOptions,
};
