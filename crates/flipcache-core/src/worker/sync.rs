use futures::future::join_all;
use tracing::{debug, info};

use crate::models::Request;

use super::{ServiceWorker, ServiceWorkerState, WorkerError};

impl ServiceWorker {
    /// Handle a background sync event. Only an activated worker syncs.
    ///
    /// For the configured tag, fetch each sync URL and store every 2xx
    /// response in the current store. Network and storage failures are
    /// ignored. Other tags are no-ops. Returns how many responses were stored.
    pub async fn sync(&self, tag: &str) -> Result<usize, WorkerError> {
        self.expect_state(ServiceWorkerState::Activated)?;
        if tag != self.options.sync_tag {
            debug!(tag, "Ignoring unknown sync tag");
            return Ok(0);
        }

        let cache = self.storage.open(&self.cache_name()).await?;
        let cache = &cache;
        let fetcher = self.fetcher.as_ref();

        let stored = join_all(self.sync_urls.iter().map(|url| async move {
            let request = Request::get(url.clone());
            match fetcher.fetch(&request).await {
                Ok(response) if response.is_ok() => match cache.put(&request, response).await {
                    Ok(()) => true,
                    Err(e) => {
                        debug!(url = %url, error = %e, "Failed to store sync response");
                        false
                    }
                },
                Ok(response) => {
                    debug!(url = %url, status = response.status, "Skipping sync response");
                    false
                }
                Err(e) => {
                    debug!(url = %url, error = %e, "Sync fetch failed");
                    false
                }
            }
        }))
        .await
        .into_iter()
        .filter(|stored| *stored)
        .count();

        info!(tag, stored, total = self.sync_urls.len(), "Background sync finished");
        Ok(stored)
    }
}
