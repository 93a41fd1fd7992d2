use tracing::{debug, trace, warn};

use crate::models::{Destination, Request, Response};

use super::ServiceWorker;

impl ServiceWorker {
    /// Answer an intercepted request.
    ///
    /// Cache-first against the current store. On a miss the request goes to
    /// the network; an eligible response is written back in the background
    /// and returned unchanged either way. When the network fails, a document
    /// request gets the cached shell page and anything else gets `None`,
    /// which the host surfaces as a network error.
    ///
    /// Non-GET requests, and any request seen before activation, pass
    /// straight through to the network.
    pub async fn handle_fetch(&self, request: &Request) -> Option<Response> {
        if !self.state.can_intercept_fetch() || !request.is_get() {
            trace!(url = %request.url, method = %request.method, "Passing request through");
            return self.network_only(request).await;
        }

        match self.storage.match_in(&self.cache_name(), request).await {
            Ok(Some(response)) => {
                trace!(url = %request.url, "Cache hit");
                return Some(response);
            }
            Ok(None) => {}
            Err(e) => {
                warn!(url = %request.url, error = %e, "Cache lookup failed, going to network")
            }
        }

        match self.fetcher.fetch(request).await {
            Ok(response) => {
                if response.is_cacheable() && self.options.runtime_policy.matches(request) {
                    self.cache_in_background(request.clone(), response.clone());
                }
                Some(response)
            }
            Err(e) => {
                debug!(url = %request.url, error = %e, "Network request failed");
                if request.destination == Destination::Document {
                    self.offline_shell().await
                } else {
                    None
                }
            }
        }
    }

    async fn network_only(&self, request: &Request) -> Option<Response> {
        match self.fetcher.fetch(request).await {
            Ok(response) => Some(response),
            Err(e) => {
                debug!(url = %request.url, error = %e, "Network request failed");
                None
            }
        }
    }

    async fn offline_shell(&self) -> Option<Response> {
        let shell = Request::navigate(self.shell.clone());
        match self.storage.match_in(&self.cache_name(), &shell).await {
            Ok(Some(response)) => {
                debug!(shell = %self.shell, "Serving offline shell");
                Some(response)
            }
            Ok(None) => {
                warn!(shell = %self.shell, "Offline shell page is not cached");
                None
            }
            Err(e) => {
                warn!(shell = %self.shell, error = %e, "Failed to read offline shell page");
                None
            }
        }
    }

    /// Store a runtime response without holding up the caller.
    /// Failures are logged only.
    fn cache_in_background(&self, request: Request, response: Response) {
        let storage = self.storage.clone();
        let name = self.cache_name();

        self.tasks.spawn(async move {
            let result = match storage.open(&name).await {
                Ok(cache) => cache.put(&request, response).await,
                Err(e) => Err(e),
            };
            match result {
                Ok(()) => trace!(url = %request.url, "Cached runtime response"),
                Err(e) => warn!(url = %request.url, error = %e, "Failed to cache runtime response"),
            }
        });
    }
}
