use serde::{Deserialize, Serialize};

use crate::models::Request;

/// Which runtime responses get written into the current store on a miss.
///
/// Applies only to responses already eligible for caching (200, basic).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RuntimeCachePolicy {
    /// Cache every eligible response.
    All,
    /// Cache a response when its URL contains any of the path fragments or
    /// extensions. Keeps API traffic out of the store while still picking
    /// up assets the manifest did not list.
    Assets {
        path_fragments: Vec<String>,
        extensions: Vec<String>,
    },
}

impl Default for RuntimeCachePolicy {
    fn default() -> Self {
        Self::assets()
    }
}

impl RuntimeCachePolicy {
    /// Asset directories plus script, style, image, PDF and page extensions.
    pub fn assets() -> Self {
        RuntimeCachePolicy::Assets {
            path_fragments: vec!["/files/".to_string(), "/mobile/".to_string()],
            extensions: [".js", ".css", ".png", ".jpg", ".jpeg", ".pdf", ".html"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }

    pub fn matches(&self, request: &Request) -> bool {
        match self {
            RuntimeCachePolicy::All => true,
            RuntimeCachePolicy::Assets {
                path_fragments,
                extensions,
            } => {
                let url = request.url.as_str();
                path_fragments
                    .iter()
                    .chain(extensions.iter())
                    .any(|needle| url.contains(needle.as_str()))
            }
        }
    }
}
