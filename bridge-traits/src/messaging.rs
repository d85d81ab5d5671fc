//! Control Message Protocol
//!
//! Wire types exchanged between application contexts (pages) and the cache
//! controller, plus the point-to-point reply channel each context exposes.
//!
//! ```text
//! page ──{ "type": "CACHE_ASSETS", "urls": [...] }──> controller
//! page <──{ "type": "CACHE_COMPLETE" }───────────────  (success)
//! page <──{ "type": "CACHE_ERROR", "error": "..." }──  (failure)
//! ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

use crate::error::{BridgeError, Result};

/// Type tag of the bulk preload request.
pub const CACHE_ASSETS: &str = "CACHE_ASSETS";

/// Messages an application context can send to the controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ControlMessage {
    /// Force-populate the active store with `urls`, atomically.
    #[serde(rename = "CACHE_ASSETS")]
    CacheAssets { urls: Vec<String> },
}

impl ControlMessage {
    /// Decode an arbitrary message payload.
    ///
    /// Returns `Ok(None)` for payloads that are not addressed to the cache
    /// controller (not an object, or an unrelated `type`). A payload tagged
    /// `CACHE_ASSETS` whose body does not decode is an error, so the sender
    /// can still be told about it.
    pub fn from_value(value: &Value) -> Result<Option<Self>> {
        let tag = value.get("type").and_then(Value::as_str);
        if tag != Some(CACHE_ASSETS) {
            return Ok(None);
        }

        serde_json::from_value(value.clone())
            .map(Some)
            .map_err(|e| BridgeError::OperationFailed(format!("Malformed {} message: {}", CACHE_ASSETS, e)))
    }
}

/// Replies the controller sends back to the originating context only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ControlReply {
    #[serde(rename = "CACHE_COMPLETE")]
    CacheComplete,
    #[serde(rename = "CACHE_ERROR")]
    CacheError { error: String },
}

impl ControlReply {
    pub fn is_error(&self) -> bool {
        matches!(self, ControlReply::CacheError { .. })
    }
}

/// Identifier of one application context (a page or window).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClientId(Uuid);

impl ClientId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ClientId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Reply channel back to a single application context.
///
/// # Example
///
/// ```ignore
/// use bridge_traits::messaging::{ClientPort, ControlReply};
///
/// async fn done(port: &dyn ClientPort) -> Result<()> {
///     port.post_message(ControlReply::CacheComplete).await
/// }
/// ```
#[async_trait]
pub trait ClientPort: Send + Sync {
    /// Deliver a reply to the context. Fails if the context has gone away.
    async fn post_message(&self, reply: ControlReply) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_cache_assets() {
        let value = json!({ "type": "CACHE_ASSETS", "urls": ["/a.png", "/b.png"] });
        let message = ControlMessage::from_value(&value).unwrap();
        assert_eq!(
            message,
            Some(ControlMessage::CacheAssets {
                urls: vec!["/a.png".to_string(), "/b.png".to_string()],
            })
        );
    }

    #[test]
    fn test_unrelated_messages_are_ignored() {
        assert_eq!(ControlMessage::from_value(&json!({ "type": "PING" })).unwrap(), None);
        assert_eq!(ControlMessage::from_value(&json!("CACHE_ASSETS")).unwrap(), None);
        assert_eq!(ControlMessage::from_value(&Value::Null).unwrap(), None);
    }

    #[test]
    fn test_malformed_cache_assets_is_an_error() {
        let value = json!({ "type": "CACHE_ASSETS", "urls": "/a.png" });
        assert!(ControlMessage::from_value(&value).is_err());

        let value = json!({ "type": "CACHE_ASSETS" });
        assert!(ControlMessage::from_value(&value).is_err());
    }

    #[test]
    fn test_reply_wire_shape() {
        let complete = serde_json::to_value(ControlReply::CacheComplete).unwrap();
        assert_eq!(complete, json!({ "type": "CACHE_COMPLETE" }));

        let error = serde_json::to_value(ControlReply::CacheError {
            error: "HTTP 404 for /missing.png".to_string(),
        })
        .unwrap();
        assert_eq!(
            error,
            json!({ "type": "CACHE_ERROR", "error": "HTTP 404 for /missing.png" })
        );
    }

    #[test]
    fn test_client_ids_are_unique() {
        assert_ne!(ClientId::new(), ClientId::new());
    }
}
