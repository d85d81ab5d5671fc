//! # Host Bridge Traits
//!
//! Capabilities the offline cache core needs from its host, expressed as
//! traits so every platform can plug in its own implementation.
//!
//! ## Overview
//!
//! The core sits between an application and the network. It never owns a
//! socket, a database file or a window; it only sees:
//!
//! - [`HttpClient`](http::HttpClient) - the network behind the interception boundary
//! - [`CacheStorage`](cache::CacheStorage) - named, persistent request → response caches
//! - [`ClientPort`](messaging::ClientPort) - a reply channel to one application context
//! - [`Clock`](time::Clock) - time source for stamping stored responses
//!
//! The control-message wire types ([`ControlMessage`](messaging::ControlMessage),
//! [`ControlReply`](messaging::ControlReply)) live here as well, since the host
//! is the one decoding page messages and delivering replies.
//!
//! ## Platform Requirements
//!
//! | Platform | Implementation Crate | Status |
//! |----------|---------------------|--------|
//! | Desktop  | `bridge-desktop`    | ✅ Available |
//! | Tests    | `core-offline` (`MemoryCacheStorage`) | ✅ Available |
//! | Web      | TBD                 | 📋 Planned |
//!
//! ## Error Handling
//!
//! All bridge traits use [`BridgeError`](error::BridgeError). Storage adapters
//! should report out-of-space conditions as
//! [`BridgeError::QuotaExceeded`](error::BridgeError::QuotaExceeded) so the
//! core can tell them apart from other storage failures.
//!
//! ## Thread Safety
//!
//! All bridge traits require `Send + Sync`: handlers for concurrent requests
//! share the same bridge instances across async tasks.

pub mod cache;
pub mod error;
pub mod http;
pub mod messaging;
pub mod time;

pub use error::BridgeError;

// Re-export commonly used types
pub use cache::{CacheStorage, CachedResponse};
pub use http::{HttpClient, HttpMethod, HttpRequest, HttpResponse};
pub use messaging::{ClientId, ClientPort, ControlMessage, ControlReply};
pub use time::{Clock, FixedClock, SystemClock};
