use futures::future::join_all;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::cache::Cache;
use crate::models::{Progress, WorkerMessage};

use super::{ServiceWorker, ServiceWorkerState, WorkerError};

/// Summary of a completed pre-cache run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallReport {
    /// Entries stored.
    pub cached: usize,
    /// Manifest length.
    pub total: usize,
    /// Batches processed, including ones that fell back to per-URL adds.
    pub batches: usize,
    /// URLs that could not be stored, in manifest order.
    pub failed: Vec<Url>,
}

impl InstallReport {
    pub fn is_complete(&self) -> bool {
        self.cached == self.total
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallOutcome {
    /// Every batch was attempted. Individual URLs may still have failed.
    Completed(InstallReport),
    /// The store could not be opened; nothing was attempted.
    Aborted { reason: String },
}

impl InstallOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, InstallOutcome::Completed(_))
    }

    pub fn report(&self) -> Option<&InstallReport> {
        match self {
            InstallOutcome::Completed(report) => Some(report),
            InstallOutcome::Aborted { .. } => None,
        }
    }
}

impl ServiceWorker {
    /// Pre-cache the manifest into the current store.
    ///
    /// URLs are processed in batches of `batch_size`, one batch at a time.
    /// A batch is first stored all-or-nothing; if that fails, each URL in
    /// the batch is retried on its own and failures are logged and skipped.
    /// One progress message goes out per batch, then one completion message.
    /// Only failing to open the store aborts the install.
    pub async fn install(&mut self) -> Result<InstallOutcome, WorkerError> {
        self.expect_state(ServiceWorkerState::Parsed)?;
        self.set_state(ServiceWorkerState::Installing);

        let name = self.cache_name();
        let total = self.urls.len();
        info!(store = %name, total, "Service worker installing");

        let cache = match self.storage.open(&name).await {
            Ok(cache) => cache,
            Err(e) => {
                error!(store = %name, error = %e, "Failed to open cache store, aborting install");
                self.set_state(ServiceWorkerState::Redundant);
                return Ok(InstallOutcome::Aborted {
                    reason: e.to_string(),
                });
            }
        };

        let report = self.precache(&cache).await;
        if report.failed.is_empty() {
            info!(cached = report.cached, total, "All files cached, ready for offline use");
        } else {
            warn!(
                cached = report.cached,
                total,
                failed = report.failed.len(),
                "Pre-cache finished with failures"
            );
        }

        self.notify(WorkerMessage::CacheComplete { total });
        if let Err(e) = self.storage.mark_installed(&name).await {
            warn!(store = %name, error = %e, "Failed to record finished install");
        }
        self.skip_waiting = true;
        self.set_state(ServiceWorkerState::Installed);
        Ok(InstallOutcome::Completed(report))
    }

    async fn precache(&self, cache: &Cache) -> InstallReport {
        let total = self.urls.len();
        let batch_size = self.options.batch_size.max(1);
        let batches = total.div_ceil(batch_size);
        let fetcher = self.fetcher.as_ref();

        let mut progress = Progress::new(total);
        let mut failed = Vec::new();

        for (index, batch) in self.urls.chunks(batch_size).enumerate() {
            debug!(batch = index + 1, batches, files = batch.len(), "Caching batch");

            let stored = match cache.add_all(batch, fetcher).await {
                Ok(()) => batch.len(),
                Err(e) => {
                    warn!(
                        batch = index + 1,
                        error = %e,
                        "Batch failed, caching files individually"
                    );
                    let results = join_all(
                        batch
                            .iter()
                            .map(|url| async move { (url, cache.add(url, fetcher).await) }),
                    )
                    .await;

                    let mut stored = 0;
                    for (url, result) in results {
                        match result {
                            Ok(()) => stored += 1,
                            Err(e) => {
                                warn!(url = %url, error = %e, "Failed to cache file");
                                failed.push(url.clone());
                            }
                        }
                    }
                    stored
                }
            };

            progress.record(stored);
            self.notify(progress.into());
        }

        InstallReport {
            cached: progress.cached,
            total,
            batches,
            failed,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::super::testing::*;
    use crate::cache::CacheStorage;
    use crate::clients::Clients;
    use crate::models::{Request, ResponseType};

    use super::*;

    #[tokio::test]
    async fn test_failing_url_is_skipped_without_failing_install() {
        let storage = CacheStorage::memory();
        let fetcher = Arc::new(MockFetcher::new().serve("/a.js").serve("/b.js"));
        let clients = Clients::new();
        let mut page = clients.connect();
        let mut sw = worker(
            options(&["/a.js", "/b.js", "/missing.js"]),
            &storage,
            &fetcher,
            &clients,
        );

        let outcome = sw.install().await.unwrap();
        let report = outcome.report().unwrap();
        assert_eq!(report.cached, 2);
        assert_eq!(report.total, 3);
        assert_eq!(report.batches, 1);
        assert_eq!(report.failed, vec![url("/missing.js")]);
        assert!(!report.is_complete());
        assert_eq!(sw.state(), ServiceWorkerState::Installed);
        assert!(sw.skip_waiting_requested());

        assert_eq!(
            page.drain(),
            vec![
                WorkerMessage::CacheProgress { cached: 2, total: 3 },
                WorkerMessage::CacheComplete { total: 3 },
            ]
        );

        let cache = storage.open("rx-test-v1").await.unwrap();
        assert!(cache.match_request(&Request::get(url("/a.js"))).await.unwrap().is_some());
        assert!(cache.match_request(&Request::get(url("/b.js"))).await.unwrap().is_some());
        assert!(cache
            .match_request(&Request::get(url("/missing.js")))
            .await
            .unwrap()
            .is_none());

        // batch attempt plus the individual retry
        assert_eq!(fetcher.calls("/a.js"), 2);
    }

    #[tokio::test]
    async fn test_uncached_url_keeps_going_to_network() {
        let storage = CacheStorage::memory();
        let fetcher = Arc::new(MockFetcher::new().serve("/a.js").serve("/b.js"));
        let clients = Clients::new();
        let mut page = clients.connect();
        let mut sw = worker(
            options(&["/a.js", "/b.js", "/missing.js"]).with_batch_size(2),
            &storage,
            &fetcher,
            &clients,
        );

        let report = sw.run_lifecycle().await.unwrap();
        assert!(report.install.is_completed());
        assert_eq!(
            page.drain(),
            vec![
                WorkerMessage::CacheProgress { cached: 2, total: 3 },
                WorkerMessage::CacheProgress { cached: 2, total: 3 },
                WorkerMessage::CacheComplete { total: 3 },
            ]
        );

        let before = fetcher.calls("/missing.js");
        for _ in 0..3 {
            assert!(sw.handle_fetch(&Request::get(url("/missing.js"))).await.is_none());
        }
        assert_eq!(fetcher.calls("/missing.js"), before + 3);
    }

    #[tokio::test]
    async fn test_reinstall_over_same_storage_is_idempotent() {
        let storage = CacheStorage::memory();
        let fetcher = Arc::new(MockFetcher::new().serve("/a.js").serve("/b.js"));
        let entries = ["/a.js", "/b.js", "/missing.js"];

        let mut first = worker(options(&entries), &storage, &fetcher, &Clients::new());
        first.install().await.unwrap();
        let cache = storage.open("rx-test-v1").await.unwrap();
        let keys = cache.keys().await.unwrap();

        let mut second = worker(options(&entries), &storage, &fetcher, &Clients::new());
        let outcome = second.install().await.unwrap();
        assert_eq!(outcome.report().map(|r| r.cached), Some(2));
        assert_eq!(cache.keys().await.unwrap(), keys);
        assert_eq!(storage.keys().await.unwrap(), vec!["rx-test-v1"]);
    }

    #[tokio::test]
    async fn test_one_progress_message_per_batch() {
        let paths: Vec<String> = (1..=45).map(|n| format!("/files/page/{}.jpg", n)).collect();
        let fetcher = paths
            .iter()
            .fold(MockFetcher::new(), |fetcher, path| fetcher.serve(path));
        let fetcher = Arc::new(fetcher);
        let entries: Vec<&str> = paths.iter().map(String::as_str).collect();

        let storage = CacheStorage::memory();
        let clients = Clients::new();
        let mut page = clients.connect();
        let mut sw = worker(options(&entries), &storage, &fetcher, &clients);

        let outcome = sw.install().await.unwrap();
        assert_eq!(outcome.report().map(|r| r.batches), Some(3));
        assert_eq!(fetcher.total_calls(), 45);

        assert_eq!(
            page.drain(),
            vec![
                WorkerMessage::CacheProgress { cached: 20, total: 45 },
                WorkerMessage::CacheProgress { cached: 40, total: 45 },
                WorkerMessage::CacheProgress { cached: 45, total: 45 },
                WorkerMessage::CacheComplete { total: 45 },
            ]
        );
    }

    #[tokio::test]
    async fn test_progress_is_sent_for_batches_that_store_nothing() {
        let storage = CacheStorage::memory();
        let fetcher = Arc::new(MockFetcher::new().serve("/a.js"));
        let clients = Clients::new();
        let mut page = clients.connect();
        let mut sw = worker(
            options(&["/a.js", "/gone-1.js", "/gone-2.js"]).with_batch_size(1),
            &storage,
            &fetcher,
            &clients,
        );

        sw.install().await.unwrap();

        let messages = page.drain();
        assert_eq!(
            messages,
            vec![
                WorkerMessage::CacheProgress { cached: 1, total: 3 },
                WorkerMessage::CacheProgress { cached: 1, total: 3 },
                WorkerMessage::CacheProgress { cached: 1, total: 3 },
                WorkerMessage::CacheComplete { total: 3 },
            ]
        );
    }

    #[tokio::test]
    async fn test_empty_manifest_sends_only_completion() {
        let storage = CacheStorage::memory();
        let fetcher = Arc::new(MockFetcher::new());
        let clients = Clients::new();
        let mut page = clients.connect();
        let mut sw = worker(options(&[]), &storage, &fetcher, &clients);

        let outcome = sw.install().await.unwrap();
        assert_eq!(outcome.report().map(|r| (r.cached, r.batches)), Some((0, 0)));
        assert_eq!(page.drain(), vec![WorkerMessage::CacheComplete { total: 0 }]);
        assert!(storage.has("rx-test-v1").await.unwrap());
    }

    #[tokio::test]
    async fn test_cross_origin_and_error_responses_are_not_precached() {
        let storage = CacheStorage::memory();
        let fetcher = Arc::new(
            MockFetcher::new()
                .serve("/index.html")
                .route("/cdn.js", 200, ResponseType::Opaque)
                .route("/broken.css", 500, ResponseType::Basic),
        );
        let mut sw = worker(
            options(&["./index.html", "./cdn.js", "./broken.css"]),
            &storage,
            &fetcher,
            &Clients::new(),
        );

        let outcome = sw.install().await.unwrap();
        let report = outcome.report().unwrap();
        assert_eq!(report.cached, 1);
        assert_eq!(report.failed, vec![url("/cdn.js"), url("/broken.css")]);
    }

    #[tokio::test]
    async fn test_zero_batch_size_is_treated_as_one() {
        let storage = CacheStorage::memory();
        let fetcher = Arc::new(MockFetcher::new().serve("/a.js").serve("/b.js"));
        let mut sw = worker(
            options(&["/a.js", "/b.js"]).with_batch_size(0),
            &storage,
            &fetcher,
            &Clients::new(),
        );

        let outcome = sw.install().await.unwrap();
        assert_eq!(outcome.report().map(|r| (r.cached, r.batches)), Some((2, 2)));
    }

    #[tokio::test]
    async fn test_unopenable_store_aborts_install() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("not-a-dir");
        std::fs::write(&root, b"occupied").unwrap();

        let storage = CacheStorage::disk(root);
        let fetcher = Arc::new(MockFetcher::new().serve("/a.js"));
        let clients = Clients::new();
        let mut page = clients.connect();
        let mut sw = worker(options(&["/a.js"]), &storage, &fetcher, &clients);

        let outcome = sw.install().await.unwrap();
        assert!(matches!(outcome, InstallOutcome::Aborted { .. }));
        assert_eq!(sw.state(), ServiceWorkerState::Redundant);
        assert_eq!(fetcher.total_calls(), 0);
        assert!(page.drain().is_empty());

        // a redundant worker never activates
        assert!(sw.activate().await.is_err());
    }

    #[tokio::test]
    async fn test_install_twice_is_rejected() {
        let storage = CacheStorage::memory();
        let fetcher = Arc::new(MockFetcher::new());
        let mut sw = worker(options(&[]), &storage, &fetcher, &Clients::new());

        sw.install().await.unwrap();
        assert!(matches!(
            sw.install().await,
            Err(WorkerError::InvalidState { .. })
        ));
    }
}
