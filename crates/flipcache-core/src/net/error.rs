use thiserror::Error;

/// A fetch that produced no response at all.
///
/// HTTP error statuses are not errors here: a 404 is a `Response` with
/// status 404. Only transport-level failures end up in this type.
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Unreachable: {0}")]
    Unreachable(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

/// Maximum length for URLs quoted in error messages
const MAX_URL_LENGTH: usize = 200;

impl FetchError {
    /// Truncate a URL to avoid logging excessive data
    pub(crate) fn truncate_url(url: &str) -> String {
        if url.len() <= MAX_URL_LENGTH {
            url.to_string()
        } else {
            let cut: String = url.chars().take(MAX_URL_LENGTH).collect();
            format!("{}... (truncated, {} total bytes)", cut, url.len())
        }
    }

    pub fn unreachable(url: &str) -> Self {
        FetchError::Unreachable(Self::truncate_url(url))
    }
}
