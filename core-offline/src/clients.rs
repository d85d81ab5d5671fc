//! Application contexts (pages) known to the controller.

use crate::store::StoreId;
use async_trait::async_trait;
use bridge_traits::{
    error::{BridgeError, Result as BridgeResult},
    ClientId, ClientPort, ControlReply,
};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::debug;

/// [`ClientPort`] backed by an unbounded tokio channel.
#[derive(Debug, Clone)]
pub struct ChannelPort {
    sender: UnboundedSender<ControlReply>,
}

impl ChannelPort {
    /// Create a port and the receiver its replies arrive on.
    pub fn channel() -> (Self, UnboundedReceiver<ControlReply>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

#[async_trait]
impl ClientPort for ChannelPort {
    async fn post_message(&self, reply: ControlReply) -> BridgeResult<()> {
        self.sender
            .send(reply)
            .map_err(|_| BridgeError::NotAvailable("client has gone away".to_string()))
    }
}

/// Snapshot of one registered client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientInfo {
    pub id: ClientId,
    pub url: String,
    /// Generation currently controlling the client, if any
    pub controller: Option<StoreId>,
}

struct ClientEntry {
    url: String,
    controller: Option<StoreId>,
    port: Arc<dyn ClientPort>,
}

#[derive(Default)]
struct Inner {
    clients: HashMap<ClientId, ClientEntry>,
    active: Option<StoreId>,
}

/// Registry of open application contexts and the generation controlling each.
///
/// A client that connects while a generation is active is controlled by it
/// from the start. Clients that connected earlier only come under control
/// when a generation [`claim`](ClientRegistry::claim)s them.
#[derive(Default)]
pub struct ClientRegistry {
    inner: RwLock<Inner>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new client and return its id.
    pub fn register(&self, url: impl Into<String>, port: Arc<dyn ClientPort>) -> ClientId {
        let id = ClientId::new();
        let mut inner = self.inner.write();
        let controller = inner.active.clone();
        debug!(client = %id, controlled = controller.is_some(), "Client connected");

        inner.clients.insert(
            id,
            ClientEntry {
                url: url.into(),
                controller,
                port,
            },
        );
        id
    }

    /// Forget a client. Returns `false` if it was unknown.
    pub fn remove(&self, id: &ClientId) -> bool {
        let removed = self.inner.write().clients.remove(id).is_some();
        if removed {
            debug!(client = %id, "Client disconnected");
        }
        removed
    }

    /// Reply channel of a client.
    pub fn port(&self, id: &ClientId) -> Option<Arc<dyn ClientPort>> {
        self.inner
            .read()
            .clients
            .get(id)
            .map(|entry| Arc::clone(&entry.port))
    }

    /// Generation controlling a client, if any.
    pub fn controller_of(&self, id: &ClientId) -> Option<StoreId> {
        self.inner
            .read()
            .clients
            .get(id)
            .and_then(|entry| entry.controller.clone())
    }

    pub fn info(&self, id: &ClientId) -> Option<ClientInfo> {
        self.inner.read().clients.get(id).map(|entry| ClientInfo {
            id: *id,
            url: entry.url.clone(),
            controller: entry.controller.clone(),
        })
    }

    /// Every registered client.
    pub fn clients(&self) -> Vec<ClientInfo> {
        self.inner
            .read()
            .clients
            .iter()
            .map(|(id, entry)| ClientInfo {
                id: *id,
                url: entry.url.clone(),
                controller: entry.controller.clone(),
            })
            .collect()
    }

    /// Generation new clients will be controlled by.
    pub fn active(&self) -> Option<StoreId> {
        self.inner.read().active.clone()
    }

    /// Make `generation` the controller of every registered client and of
    /// every client that connects from now on. Returns the number of
    /// clients now controlled by it.
    pub fn claim(&self, generation: &StoreId) -> usize {
        let mut inner = self.inner.write();
        inner.active = Some(generation.clone());
        for entry in inner.clients.values_mut() {
            entry.controller = Some(generation.clone());
        }
        inner.clients.len()
    }

    /// Number of clients currently controlled by `generation`.
    pub fn controlled_by(&self, generation: &StoreId) -> usize {
        self.inner
            .read()
            .clients
            .values()
            .filter(|entry| entry.controller.as_ref() == Some(generation))
            .count()
    }

    pub fn len(&self) -> usize {
        self.inner.read().clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().clients.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn port() -> Arc<dyn ClientPort> {
        let (port, _receiver) = ChannelPort::channel();
        Arc::new(port)
    }

    #[test]
    fn test_clients_before_activation_are_uncontrolled() {
        let registry = ClientRegistry::new();
        let id = registry.register("http://localhost/", port());

        assert_eq!(registry.controller_of(&id), None);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_claim_takes_over_existing_clients() {
        let registry = ClientRegistry::new();
        let first = registry.register("http://localhost/", port());
        let second = registry.register("http://localhost/library", port());
        let v1 = StoreId::new("app-cache-v1");

        assert_eq!(registry.claim(&v1), 2);
        assert_eq!(registry.controller_of(&first), Some(v1.clone()));
        assert_eq!(registry.controller_of(&second), Some(v1.clone()));
        assert_eq!(registry.controlled_by(&v1), 2);
    }

    #[test]
    fn test_new_clients_join_the_active_generation() {
        let registry = ClientRegistry::new();
        let v2 = StoreId::new("app-cache-v2");
        registry.claim(&v2);

        let id = registry.register("http://localhost/", port());
        assert_eq!(registry.info(&id).unwrap().controller, Some(v2));
    }

    #[test]
    fn test_remove_client() {
        let registry = ClientRegistry::new();
        let id = registry.register("http://localhost/", port());

        assert!(registry.remove(&id));
        assert!(!registry.remove(&id));
        assert!(registry.port(&id).is_none());
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_channel_port_delivers_and_detects_closed_receiver() {
        let (port, mut receiver) = ChannelPort::channel();

        port.post_message(ControlReply::CacheComplete).await.unwrap();
        assert_eq!(receiver.recv().await, Some(ControlReply::CacheComplete));

        drop(receiver);
        let result = port.post_message(ControlReply::CacheComplete).await;
        assert!(matches!(result, Err(BridgeError::NotAvailable(_))));
    }
}
