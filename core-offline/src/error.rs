//! # Offline Cache Error Types

use bridge_traits::BridgeError;
use thiserror::Error;

/// Errors raised by the store manager, lifecycle controller, interceptor and
/// preload protocol.
#[derive(Error, Debug)]
pub enum OfflineError {
    // ========================================================================
    // Request Errors
    // ========================================================================
    /// A resource identifier could not be turned into an absolute URL.
    #[error("Invalid request URL '{url}': {reason}")]
    InvalidRequest { url: String, reason: String },

    /// The same request appears twice in one batch.
    #[error("Duplicate request in batch: {0}")]
    DuplicateRequest(String),

    // ========================================================================
    // Network Errors
    // ========================================================================
    /// No response could be obtained for a URL.
    #[error("Network request for {url} failed: {message}")]
    Network { url: String, message: String },

    /// A response came back, but with a status that cannot be cached in bulk.
    #[error("Request for {url} returned HTTP {status}")]
    BadStatus { url: String, status: u16 },

    /// The response is of a kind the store refuses to keep.
    #[error("Response for {url} cannot be stored: {reason}")]
    Unstorable { url: String, reason: String },

    // ========================================================================
    // Storage Errors
    // ========================================================================
    /// The backing cache storage failed.
    #[error("Cache storage error: {0}")]
    StorageError(String),

    /// The backing cache storage is out of space.
    #[error("Cache storage quota exceeded: {0}")]
    QuotaExceeded(String),

    // ========================================================================
    // Lifecycle Errors
    // ========================================================================
    /// A lifecycle step was requested from a state that does not allow it.
    #[error("Cannot {action} while {state}")]
    InvalidTransition { action: &'static str, state: String },

    /// No active controller is available to handle the request.
    #[error("No active cache controller")]
    NoController,

    // ========================================================================
    // Generic Errors
    // ========================================================================
    /// Invalid cache configuration.
    #[error("Invalid cache configuration: {0}")]
    Config(String),
}

impl OfflineError {
    /// Convert a storage bridge failure, keeping quota failures distinct.
    pub fn from_storage(error: BridgeError) -> Self {
        match error {
            BridgeError::QuotaExceeded(message) => OfflineError::QuotaExceeded(message),
            other => OfflineError::StorageError(other.to_string()),
        }
    }

    /// Returns `true` if the failure happened on the network side.
    pub fn is_network_error(&self) -> bool {
        matches!(
            self,
            OfflineError::Network { .. } | OfflineError::BadStatus { .. }
        )
    }

    /// Returns `true` if the failure came from the backing storage.
    pub fn is_storage_error(&self) -> bool {
        matches!(
            self,
            OfflineError::StorageError(_) | OfflineError::QuotaExceeded(_)
        )
    }
}

/// Result type for offline cache operations.
pub type Result<T> = std::result::Result<T, OfflineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quota_is_kept_distinct() {
        let error = OfflineError::from_storage(BridgeError::QuotaExceeded("full".to_string()));
        assert!(matches!(error, OfflineError::QuotaExceeded(_)));
        assert!(error.is_storage_error());

        let error = OfflineError::from_storage(BridgeError::DatabaseError("locked".to_string()));
        assert!(matches!(error, OfflineError::StorageError(_)));
    }

    #[test]
    fn test_error_classification() {
        let network = OfflineError::Network {
            url: "https://example.com/a.png".to_string(),
            message: "connection refused".to_string(),
        };
        assert!(network.is_network_error());
        assert!(!network.is_storage_error());

        let status = OfflineError::BadStatus {
            url: "https://example.com/missing.png".to_string(),
            status: 404,
        };
        assert!(status.is_network_error());
        assert_eq!(
            status.to_string(),
            "Request for https://example.com/missing.png returned HTTP 404"
        );
    }
}
