//! # Service Worker
//!
//! One `ServiceWorker` instance per cache version. It owns every piece of
//! worker-scoped state (current store name, lifecycle state, skip-waiting
//! flag, pending background writes) and exposes one handler per lifecycle
//! event:
//!
//! ```text
//! Parsed ──install──▶ Installing ──▶ Installed ──activate──▶ Activating ──▶ Activated
//!                         │
//!                         └── store cannot be opened ──▶ Redundant
//! ```
//!
//! - [`ServiceWorker::install`]: batch pre-cache of the manifest
//! - [`ServiceWorker::activate`]: prune stale stores, claim clients
//! - [`ServiceWorker::handle_fetch`]: cache-first interception
//! - [`ServiceWorker::sync`]: opportunistic background caching
//! - [`ServiceWorker::dispatch`]: routes a [`WorkerEvent`] to its handler

mod activate;
mod fetch;
mod install;
mod policy;
mod sync;

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::task::TaskTracker;
use tracing::{debug, info};
use url::Url;

use crate::cache::{CacheStorage, CacheVersion, StorageError};
use crate::clients::Clients;
use crate::manifest::{Manifest, ManifestError};
use crate::models::{PageMessage, Request, Response, WorkerMessage};
use crate::net::Fetcher;

pub use activate::ActivateReport;
pub use install::{InstallOutcome, InstallReport};
pub use policy::RuntimeCachePolicy;

// ============================================================================
// Constants
// ============================================================================

/// Number of manifest entries fetched and stored per batch.
/// Bounds in-flight requests during install.
pub const DEFAULT_BATCH_SIZE: usize = 20;

/// Page served for navigations that fail while offline.
pub const DEFAULT_SHELL_PAGE: &str = "./index.html";

/// Sync tag that triggers background caching.
pub const DEFAULT_SYNC_TAG: &str = "background-sync";

// ============================================================================
// State & errors
// ============================================================================

/// Worker lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceWorkerState {
    /// Constructed, nothing run yet.
    #[default]
    Parsed,
    Installing,
    /// Installed, waiting to activate.
    Installed,
    Activating,
    /// Active and intercepting fetches.
    Activated,
    /// Install aborted; the worker will never activate.
    Redundant,
}

impl ServiceWorkerState {
    pub fn can_intercept_fetch(&self) -> bool {
        matches!(self, ServiceWorkerState::Activated)
    }
}

impl fmt::Display for ServiceWorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceWorkerState::Parsed => write!(f, "parsed"),
            ServiceWorkerState::Installing => write!(f, "installing"),
            ServiceWorkerState::Installed => write!(f, "installed"),
            ServiceWorkerState::Activating => write!(f, "activating"),
            ServiceWorkerState::Activated => write!(f, "activated"),
            ServiceWorkerState::Redundant => write!(f, "redundant"),
        }
    }
}

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Invalid state: expected {expected}, worker is {actual}")]
    InvalidState {
        expected: ServiceWorkerState,
        actual: ServiceWorkerState,
    },

    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error("Invalid URL {url:?}: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error(transparent)]
    Storage(#[from] StorageError),
}

// ============================================================================
// Options
// ============================================================================

/// Everything a worker needs to know about the site it serves.
#[derive(Debug, Clone)]
pub struct WorkerOptions {
    pub scope: Url,
    pub version: CacheVersion,
    pub manifest: Manifest,
    pub batch_size: usize,
    pub shell_page: String,
    pub runtime_policy: RuntimeCachePolicy,
    /// Post progress to pages the worker does not control yet. On a first
    /// install no page is controlled, so turning this off silences progress.
    pub notify_uncontrolled: bool,
    pub sync_tag: String,
    pub sync_urls: Vec<String>,
}

impl WorkerOptions {
    pub fn new(scope: Url, version: CacheVersion, manifest: Manifest) -> Self {
        Self {
            scope,
            version,
            manifest,
            batch_size: DEFAULT_BATCH_SIZE,
            shell_page: DEFAULT_SHELL_PAGE.to_string(),
            runtime_policy: RuntimeCachePolicy::default(),
            notify_uncontrolled: true,
            sync_tag: DEFAULT_SYNC_TAG.to_string(),
            sync_urls: Vec::new(),
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_shell_page(mut self, shell_page: impl Into<String>) -> Self {
        self.shell_page = shell_page.into();
        self
    }

    pub fn with_runtime_policy(mut self, policy: RuntimeCachePolicy) -> Self {
        self.runtime_policy = policy;
        self
    }

    pub fn with_notify_uncontrolled(mut self, notify: bool) -> Self {
        self.notify_uncontrolled = notify;
        self
    }

    pub fn with_sync(mut self, tag: impl Into<String>, urls: Vec<String>) -> Self {
        self.sync_tag = tag.into();
        self.sync_urls = urls;
        self
    }
}

// ============================================================================
// Events
// ============================================================================

/// A lifecycle event delivered by the host.
#[derive(Debug, Clone)]
pub enum WorkerEvent {
    Install,
    Activate,
    Fetch(Request),
    Message(PageMessage),
    Sync(String),
}

/// What handling an event produced.
#[derive(Debug)]
pub enum EventOutcome {
    Installed(InstallOutcome),
    Activated(ActivateReport),
    Responded(Option<Response>),
    MessageHandled,
    Synced(usize),
}

/// Result of running install and, when allowed, activation back to back.
#[derive(Debug)]
pub struct LifecycleReport {
    pub install: InstallOutcome,
    pub activate: Option<ActivateReport>,
}

// ============================================================================
// Worker
// ============================================================================

pub struct ServiceWorker {
    options: WorkerOptions,
    urls: Vec<Url>,
    shell: Url,
    sync_urls: Vec<Url>,
    storage: CacheStorage,
    fetcher: Arc<dyn Fetcher>,
    clients: Clients,
    state: ServiceWorkerState,
    skip_waiting: bool,
    tasks: TaskTracker,
}

impl ServiceWorker {
    /// Create a worker. Resolves the manifest, shell page and sync URLs
    /// against the scope up front, so a bad entry fails here rather than
    /// mid-install.
    pub fn new(
        options: WorkerOptions,
        storage: CacheStorage,
        fetcher: Arc<dyn Fetcher>,
        clients: Clients,
    ) -> Result<Self, WorkerError> {
        let urls = options.manifest.resolve(&options.scope)?;
        let shell = Self::join(&options.scope, &options.shell_page)?;
        let sync_urls = options
            .sync_urls
            .iter()
            .map(|entry| Self::join(&options.scope, entry))
            .collect::<Result<Vec<_>, _>>()?;

        debug!(
            scope = %options.scope,
            store = %options.version,
            entries = urls.len(),
            "Service worker created"
        );

        Ok(Self {
            options,
            urls,
            shell,
            sync_urls,
            storage,
            fetcher,
            clients,
            state: ServiceWorkerState::Parsed,
            skip_waiting: false,
            tasks: TaskTracker::new(),
        })
    }

    fn join(scope: &Url, entry: &str) -> Result<Url, WorkerError> {
        scope.join(entry).map_err(|source| WorkerError::InvalidUrl {
            url: entry.to_string(),
            source,
        })
    }

    pub fn state(&self) -> ServiceWorkerState {
        self.state
    }

    pub fn version(&self) -> &CacheVersion {
        &self.options.version
    }

    /// Name of the store this worker reads and writes.
    pub fn cache_name(&self) -> String {
        self.options.version.name()
    }

    pub fn scope(&self) -> &Url {
        &self.options.scope
    }

    /// Resolved manifest URLs, in install order.
    pub fn manifest_urls(&self) -> &[Url] {
        &self.urls
    }

    pub fn storage(&self) -> &CacheStorage {
        &self.storage
    }

    pub fn clients(&self) -> &Clients {
        &self.clients
    }

    pub fn skip_waiting_requested(&self) -> bool {
        self.skip_waiting
    }

    fn expect_state(&self, expected: ServiceWorkerState) -> Result<(), WorkerError> {
        if self.state == expected {
            Ok(())
        } else {
            Err(WorkerError::InvalidState {
                expected,
                actual: self.state,
            })
        }
    }

    fn set_state(&mut self, state: ServiceWorkerState) {
        debug!(from = %self.state, to = %state, "Service worker state change");
        self.state = state;
    }

    fn notify(&self, message: WorkerMessage) -> usize {
        self.clients
            .broadcast(&message, self.options.notify_uncontrolled)
    }

    /// Pick up where a previous process left off: if an install of this
    /// version ran to completion, go straight to `Activated` without
    /// re-installing. A store left by an interrupted install is ignored.
    pub async fn resume(&mut self) -> Result<bool, WorkerError> {
        self.expect_state(ServiceWorkerState::Parsed)?;
        if self.storage.is_installed(&self.cache_name()).await? {
            info!(store = %self.options.version, "Resuming active service worker");
            self.set_state(ServiceWorkerState::Activated);
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Handle a message posted by a page.
    pub fn handle_message(&mut self, message: PageMessage) {
        match message {
            PageMessage::SkipWaiting => {
                debug!("Skip waiting requested by page");
                self.skip_waiting = true;
            }
        }
    }

    /// Route an event to its handler. A skip-waiting message activates an
    /// installed worker immediately.
    pub async fn dispatch(&mut self, event: WorkerEvent) -> Result<EventOutcome, WorkerError> {
        match event {
            WorkerEvent::Install => self.install().await.map(EventOutcome::Installed),
            WorkerEvent::Activate => self.activate().await.map(EventOutcome::Activated),
            WorkerEvent::Fetch(request) => {
                Ok(EventOutcome::Responded(self.handle_fetch(&request).await))
            }
            WorkerEvent::Message(message) => {
                self.handle_message(message);
                if self.state == ServiceWorkerState::Installed && self.skip_waiting {
                    self.activate().await.map(EventOutcome::Activated)
                } else {
                    Ok(EventOutcome::MessageHandled)
                }
            }
            WorkerEvent::Sync(tag) => self.sync(&tag).await.map(EventOutcome::Synced),
        }
    }

    /// Install, then activate right away if the install asked to skip waiting.
    pub async fn run_lifecycle(&mut self) -> Result<LifecycleReport, WorkerError> {
        let install = self.install().await?;
        let activate = if install.is_completed() && self.skip_waiting {
            Some(self.activate().await?)
        } else {
            None
        };
        Ok(LifecycleReport { install, activate })
    }

    /// Wait for every background cache write spawned so far.
    pub async fn settle(&self) {
        self.tasks.close();
        self.tasks.wait().await;
        self.tasks.reopen();
    }
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;

    #[tokio::test]
    async fn test_new_rejects_bad_shell_page() {
        let storage = CacheStorage::memory();
        let fetcher: Arc<dyn Fetcher> = Arc::new(MockFetcher::new());
        let options = options(&["./index.html"]).with_shell_page("http://[::1");

        let result = ServiceWorker::new(options, storage, fetcher, Clients::new());
        assert!(matches!(result, Err(WorkerError::InvalidUrl { .. })));
    }

    #[test]
    fn test_manifest_urls_resolve_against_scope() {
        let storage = CacheStorage::memory();
        let fetcher = Arc::new(MockFetcher::new());
        let entries = ["./", "./index.html", "/Complan/"];
        let sw = worker(options(&entries), &storage, &fetcher, &Clients::new());

        assert_eq!(sw.manifest_urls(), [url("/"), url("/index.html"), url("/Complan/")]);
    }

    #[tokio::test]
    async fn test_activate_requires_install() {
        let storage = CacheStorage::memory();
        let fetcher = Arc::new(MockFetcher::new());
        let mut sw = worker(options(&[]), &storage, &fetcher, &Clients::new());

        let err = sw.activate().await.unwrap_err();
        assert!(matches!(
            err,
            WorkerError::InvalidState {
                expected: ServiceWorkerState::Installed,
                actual: ServiceWorkerState::Parsed,
            }
        ));
    }

    #[tokio::test]
    async fn test_skip_waiting_message_activates_installed_worker() {
        let storage = CacheStorage::memory();
        let fetcher = Arc::new(MockFetcher::new().serve("/index.html"));
        let mut sw = worker(options(&["./index.html"]), &storage, &fetcher, &Clients::new());

        assert!(matches!(
            sw.dispatch(WorkerEvent::Install).await.unwrap(),
            EventOutcome::Installed(InstallOutcome::Completed(_))
        ));
        assert_eq!(sw.state(), ServiceWorkerState::Installed);

        let outcome = sw
            .dispatch(WorkerEvent::Message(PageMessage::SkipWaiting))
            .await
            .unwrap();
        assert!(matches!(outcome, EventOutcome::Activated(_)));
        assert_eq!(sw.state(), ServiceWorkerState::Activated);
    }

    #[tokio::test]
    async fn test_skip_waiting_before_install_is_remembered() {
        let storage = CacheStorage::memory();
        let fetcher = Arc::new(MockFetcher::new());
        let mut sw = worker(options(&[]), &storage, &fetcher, &Clients::new());

        let outcome = sw
            .dispatch(WorkerEvent::Message(PageMessage::SkipWaiting))
            .await
            .unwrap();
        assert!(matches!(outcome, EventOutcome::MessageHandled));
        assert!(sw.skip_waiting_requested());
        assert_eq!(sw.state(), ServiceWorkerState::Parsed);
    }

    #[tokio::test]
    async fn test_run_lifecycle_installs_and_activates() {
        let storage = CacheStorage::memory();
        let fetcher = Arc::new(MockFetcher::new().serve("/index.html"));
        let clients = Clients::new();
        let _page = clients.connect();
        let mut sw = worker(options(&["./index.html"]), &storage, &fetcher, &clients);

        let report = sw.run_lifecycle().await.unwrap();
        assert!(report.install.is_completed());
        assert_eq!(report.activate.map(|a| a.claimed), Some(1));
        assert_eq!(sw.state(), ServiceWorkerState::Activated);
    }

    #[tokio::test]
    async fn test_resume_uses_existing_store() {
        let storage = CacheStorage::memory();
        let fetcher = Arc::new(MockFetcher::new().serve("/index.html"));
        let clients = Clients::new();

        let mut fresh = worker(options(&["./index.html"]), &storage, &fetcher, &clients);
        assert!(!fresh.resume().await.unwrap());
        assert_eq!(fresh.state(), ServiceWorkerState::Parsed);
        fresh.run_lifecycle().await.unwrap();

        let mut restarted = worker(options(&["./index.html"]), &storage, &fetcher, &clients);
        assert!(restarted.resume().await.unwrap());
        assert_eq!(restarted.state(), ServiceWorkerState::Activated);
    }

    #[tokio::test]
    async fn test_resume_ignores_half_filled_store() {
        let storage = CacheStorage::memory();
        let fetcher = Arc::new(MockFetcher::new().serve("/a.js").serve("/b.js").serve("/c.js"));
        let clients = Clients::new();

        // an install that died after its first entry
        let cache = storage.open("rx-test-v1").await.unwrap();
        let request = Request::get(url("/a.js"));
        cache
            .put(&request, Response::new(request.url.clone(), 200, "a"))
            .await
            .unwrap();

        let entries = ["/a.js", "/b.js", "/c.js"];
        let mut restarted = worker(options(&entries), &storage, &fetcher, &clients);
        assert!(!restarted.resume().await.unwrap());
        assert_eq!(restarted.state(), ServiceWorkerState::Parsed);

        let report = restarted.run_lifecycle().await.unwrap();
        assert_eq!(report.install.report().map(|r| r.cached), Some(3));
        assert!(storage.is_installed("rx-test-v1").await.unwrap());

        let mut again = worker(options(&entries), &storage, &fetcher, &clients);
        assert!(again.resume().await.unwrap());
    }
}
