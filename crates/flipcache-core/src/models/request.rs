use std::collections::BTreeMap;
use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use url::Url;

/// HTTP method used for every pre-cached and runtime-cached request.
pub const METHOD_GET: &str = "GET";

/// What kind of resource a request is for.
///
/// Only `Document` changes behavior: a navigation that fails offline is
/// answered with the shell page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Destination {
    Document,
    Script,
    Style,
    Image,
    Font,
    Manifest,
    #[default]
    Empty,
}

impl Destination {
    /// Guess the destination from a URL path, the way a page would issue it.
    pub fn infer(url: &Url) -> Self {
        let path = url.path().to_ascii_lowercase();
        if path.ends_with('/') || path.ends_with(".html") || path.ends_with(".htm") {
            Destination::Document
        } else if path.ends_with(".js") {
            Destination::Script
        } else if path.ends_with(".css") {
            Destination::Style
        } else if [".png", ".jpg", ".jpeg", ".gif", ".svg", ".ico", ".webp"]
            .iter()
            .any(|ext| path.ends_with(ext))
        {
            Destination::Image
        } else if [".woff", ".woff2", ".ttf", ".otf"].iter().any(|ext| path.ends_with(ext)) {
            Destination::Font
        } else if path.ends_with("manifest.json") || path.ends_with(".webmanifest") {
            Destination::Manifest
        } else {
            Destination::Empty
        }
    }
}

/// Identity of a request within a cache store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RequestKey {
    pub method: String,
    pub url: String,
}

impl RequestKey {
    pub fn get(url: &Url) -> Self {
        Self::new(METHOD_GET, url)
    }

    /// Fragments never reach the server, so `page.html#p=3` and `page.html`
    /// share one entry.
    fn new(method: &str, url: &Url) -> Self {
        let url = match url.fragment() {
            Some(_) => {
                let mut url = url.clone();
                url.set_fragment(None);
                url.to_string()
            }
            None => url.as_str().to_string(),
        };
        Self {
            method: method.to_ascii_uppercase(),
            url,
        }
    }
}

impl fmt::Display for RequestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.url)
    }
}

/// An intercepted request. Lives for one request/response exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub method: String,
    pub url: Url,
    pub destination: Destination,
}

impl Request {
    /// A GET for a sub-resource.
    pub fn get(url: Url) -> Self {
        Self {
            method: METHOD_GET.to_string(),
            url,
            destination: Destination::Empty,
        }
    }

    /// A top-level navigation.
    pub fn navigate(url: Url) -> Self {
        Self {
            method: METHOD_GET.to_string(),
            url,
            destination: Destination::Document,
        }
    }

    /// A GET whose destination is inferred from the URL.
    pub fn infer(url: Url) -> Self {
        let destination = Destination::infer(&url);
        Self {
            method: METHOD_GET.to_string(),
            url,
            destination,
        }
    }

    pub fn with_method(mut self, method: &str) -> Self {
        self.method = method.to_ascii_uppercase();
        self
    }

    pub fn is_get(&self) -> bool {
        self.method.eq_ignore_ascii_case(METHOD_GET)
    }

    pub fn key(&self) -> RequestKey {
        RequestKey::new(&self.method, &self.url)
    }
}

/// How a response relates to the requesting origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseType {
    /// Same-origin, fully readable.
    Basic,
    /// Cross-origin with CORS.
    Cors,
    /// Cross-origin without CORS; status and body are hidden.
    Opaque,
    /// Network error placeholder.
    Error,
}

/// A network or cached response.
///
/// `body` is `Bytes`, so cloning a response to store it while handing the
/// response back to the caller does not copy the payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub url: Url,
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    pub body: Bytes,
    pub response_type: ResponseType,
    pub from_cache: bool,
}

impl Response {
    pub fn new(url: Url, status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            url,
            status,
            headers: BTreeMap::new(),
            body: body.into(),
            response_type: ResponseType::Basic,
            from_cache: false,
        }
    }

    pub fn with_type(mut self, response_type: ResponseType) -> Self {
        self.response_type = response_type;
        self
    }

    /// Status in the 2xx range.
    pub fn is_ok(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Eligible for the pre-cache store: a successful same-origin response.
    pub fn is_storable(&self) -> bool {
        self.is_ok() && self.response_type == ResponseType::Basic
    }

    /// Eligible for runtime caching: exactly 200 and same-origin.
    pub fn is_cacheable(&self) -> bool {
        self.status == 200 && self.response_type == ResponseType::Basic
    }

    pub fn content_type(&self) -> Option<&str> {
        self.headers.get("content-type").map(String::as_str)
    }
}
