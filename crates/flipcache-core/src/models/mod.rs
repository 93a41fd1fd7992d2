//! Data models shared by the cache, network and worker layers.
//!
//! - `Request`, `RequestKey`, `Destination`: intercepted requests and their
//!   identity inside a cache store
//! - `Response`, `ResponseType`: network or cached responses
//! - `WorkerMessage`, `PageMessage`, `Progress`: the worker ↔ page channel

pub mod message;
pub mod request;

pub use message::{PageMessage, Progress, WorkerMessage};
pub use request::{Destination, Request, RequestKey, Response, ResponseType, METHOD_GET};
