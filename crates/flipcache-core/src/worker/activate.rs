use futures::future::join_all;
use tracing::{info, warn};

use super::{ServiceWorker, ServiceWorkerState, WorkerError};

/// Summary of an activation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActivateReport {
    /// Stale stores that were removed.
    pub deleted: Vec<String>,
    /// Stale stores whose deletion failed. They are left for the next
    /// activation.
    pub failed: Vec<String>,
    /// Clients taken under control.
    pub claimed: usize,
}

impl ServiceWorker {
    /// Delete every store not named for the current version, then claim
    /// all connected clients.
    ///
    /// Deletions run concurrently; a failed deletion is logged and does not
    /// stop activation.
    pub async fn activate(&mut self) -> Result<ActivateReport, WorkerError> {
        self.expect_state(ServiceWorkerState::Installed)?;
        self.set_state(ServiceWorkerState::Activating);
        info!(store = %self.options.version, "Service worker activating");

        let names = match self.storage.keys().await {
            Ok(names) => names,
            Err(e) => {
                warn!(error = %e, "Failed to list cache stores, skipping cleanup");
                Vec::new()
            }
        };

        let stale: Vec<String> = names
            .into_iter()
            .filter(|name| !self.options.version.is_current(name))
            .collect();

        let storage = &self.storage;
        let results = join_all(
            stale
                .iter()
                .map(|name| async move { (name, storage.delete(name).await) }),
        )
        .await;

        let mut report = ActivateReport::default();
        for (name, result) in results {
            match result {
                Ok(_) => {
                    info!(store = %name, "Deleting old cache");
                    report.deleted.push(name.clone());
                }
                Err(e) => {
                    warn!(store = %name, error = %e, "Failed to delete old cache");
                    report.failed.push(name.clone());
                }
            }
        }

        report.claimed = self.clients.claim();
        self.set_state(ServiceWorkerState::Activated);
        info!(
            deleted = report.deleted.len(),
            claimed = report.claimed,
            "Service worker activated"
        );
        Ok(report)
    }
}
