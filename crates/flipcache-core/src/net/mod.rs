//! Network access for the worker.
//!
//! This module provides the `Fetcher` trait the worker issues live requests
//! through, and `HttpFetcher`, its reqwest-backed implementation. Responses
//! are classified as basic (same-origin) or cors against the worker scope.

pub mod client;
pub mod error;

pub use client::{Fetcher, HttpFetcher, DEFAULT_REQUEST_TIMEOUT_SECS};
pub use error::FetchError;
