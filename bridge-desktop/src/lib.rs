//! # Desktop Bridge Implementations
//!
//! Default implementations of bridge traits for desktop platforms
//! (macOS, Windows, Linux).
//!
//! ## Overview
//!
//! - `HttpClient` using `reqwest`
//! - `CacheStorage` using a SQLite database under the platform cache directory
//!
//! ## Usage
//!
//! ```ignore
//! use bridge_desktop::{ReqwestHttpClient, SqliteCacheStorage};
//!
//! #[tokio::main]
//! async fn main() -> bridge_traits::error::Result<()> {
//!     let http_client = ReqwestHttpClient::try_new()?;
//!     let storage = SqliteCacheStorage::new("offline-cache.db".into()).await?;
//!
//!     // Use in core configuration
//!     Ok(())
//! }
//! ```

mod cache_storage;
mod http;

pub use cache_storage::SqliteCacheStorage;
pub use http::ReqwestHttpClient;
