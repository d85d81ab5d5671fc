//! # Event Bus System
//!
//! Typed, broadcast notifications about what the cache core is doing, built on
//! `tokio::sync::broadcast`. Events are purely observational: nothing in the
//! core waits on a subscriber, and replies to application contexts never travel
//! over this bus (they go point-to-point through a `ClientPort`).
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────┐   emit   ┌───────────┐  subscribe  ┌────────────┐
//! │ Lifecycle Controller ├─────────>│           ├────────────>│ Host UI    │
//! └──────────────────────┘          │ EventBus  │             └────────────┘
//! ┌──────────────────────┐   emit   │ (broadcast│  subscribe  ┌────────────┐
//! │ Fetch Interceptor    ├─────────>│  channel) ├────────────>│ Telemetry  │
//! └──────────────────────┘          │           │             └────────────┘
//! ┌──────────────────────┐   emit   │           │
//! │ Asset Preloader      ├─────────>│           │
//! └──────────────────────┘          └───────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use core_runtime::events::{CoreEvent, EventBus, LifecycleEvent};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let event_bus = EventBus::new(100);
//! let mut stream = event_bus.subscribe();
//!
//! event_bus
//!     .emit(CoreEvent::Lifecycle(LifecycleEvent::Installing {
//!         generation: "nossa-musica-cache-v1".to_string(),
//!     }))
//!     .ok();
//!
//! let event = stream.recv().await.unwrap();
//! assert_eq!(event.description(), "Installing cache generation");
//! # }
//! ```
//!
//! ## Error Handling
//!
//! - **`RecvError::Lagged(n)`**: the subscriber missed `n` events; it can keep
//!   receiving.
//! - **`RecvError::Closed`**: every sender was dropped; treat as shutdown.
//!
//! Emitting with no subscribers returns an error that publishers ignore.

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;

pub use tokio::sync::broadcast::error::{RecvError, SendError};
pub use tokio::sync::broadcast::Receiver;

/// Default buffer size for the event bus channel.
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 100;

// ============================================================================
// Core Event Types
// ============================================================================

/// Top-level event enum encompassing all event categories.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "payload")]
pub enum CoreEvent {
    /// Store generation lifecycle
    Lifecycle(LifecycleEvent),
    /// Outcome of an intercepted request
    Fetch(FetchEvent),
    /// Bulk preload progress
    Preload(PreloadEvent),
}

impl CoreEvent {
    /// Returns a human-readable description of the event.
    pub fn description(&self) -> &str {
        match self {
            CoreEvent::Lifecycle(e) => e.description(),
            CoreEvent::Fetch(e) => e.description(),
            CoreEvent::Preload(e) => e.description(),
        }
    }

    /// Returns the severity level of the event.
    pub fn severity(&self) -> EventSeverity {
        match self {
            CoreEvent::Fetch(FetchEvent::NetworkFailed { .. }) => EventSeverity::Error,
            CoreEvent::Preload(PreloadEvent::Failed { .. }) => EventSeverity::Error,
            CoreEvent::Lifecycle(LifecycleEvent::Installed { shell_failed, .. })
                if !shell_failed.is_empty() =>
            {
                EventSeverity::Warning
            }
            CoreEvent::Lifecycle(LifecycleEvent::Installed { .. })
            | CoreEvent::Lifecycle(LifecycleEvent::Activated { .. })
            | CoreEvent::Lifecycle(LifecycleEvent::GenerationsPurged { .. })
            | CoreEvent::Preload(PreloadEvent::Completed { .. }) => EventSeverity::Info,
            _ => EventSeverity::Debug,
        }
    }
}

/// Event severity levels for filtering and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventSeverity {
    Debug,
    Info,
    Warning,
    Error,
}

// ============================================================================
// Lifecycle Events
// ============================================================================

/// Transitions of a store generation and its controller.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum LifecycleEvent {
    /// Install started; the generation's store is being opened.
    Installing { generation: String },
    /// Install finished. `shell_failed` lists shell assets that could not be
    /// cached; install succeeds regardless.
    Installed {
        generation: String,
        shell_cached: usize,
        shell_failed: Vec<String>,
    },
    /// The controller took over every open application context.
    Activated {
        generation: String,
        claimed_clients: usize,
    },
    /// Superseded generations were deleted during activation.
    GenerationsPurged { removed: Vec<String> },
    /// The controller was superseded or failed to install.
    Redundant { generation: String },
}

impl LifecycleEvent {
    fn description(&self) -> &str {
        match self {
            LifecycleEvent::Installing { .. } => "Installing cache generation",
            LifecycleEvent::Installed { .. } => "Cache generation installed",
            LifecycleEvent::Activated { .. } => "Cache generation activated",
            LifecycleEvent::GenerationsPurged { .. } => "Stale cache generations deleted",
            LifecycleEvent::Redundant { .. } => "Cache controller became redundant",
        }
    }
}

// ============================================================================
// Fetch Events
// ============================================================================

/// How an intercepted `GET` was answered.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum FetchEvent {
    /// Served from the store without touching the network.
    CacheHit { url: String },
    /// Fetched from the network and written through to the store.
    NetworkFilled { url: String, status: u16 },
    /// Not in the store and the network request failed.
    NetworkFailed { url: String, message: String },
}

impl FetchEvent {
    fn description(&self) -> &str {
        match self {
            FetchEvent::CacheHit { .. } => "Served from cache",
            FetchEvent::NetworkFilled { .. } => "Fetched from network and cached",
            FetchEvent::NetworkFailed { .. } => "Network request failed",
        }
    }
}

// ============================================================================
// Preload Events
// ============================================================================

/// Bulk preload (`CACHE_ASSETS`) progress.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum PreloadEvent {
    Started { asset_count: usize },
    Completed { asset_count: usize },
    Failed { message: String },
}

impl PreloadEvent {
    fn description(&self) -> &str {
        match self {
            PreloadEvent::Started { .. } => "Asset preload started",
            PreloadEvent::Completed { .. } => "Asset preload completed",
            PreloadEvent::Failed { .. } => "Asset preload failed",
        }
    }
}

// ============================================================================
// Event Bus
// ============================================================================

/// Central broadcast channel for [`CoreEvent`]s.
///
/// Cloning the bus clones the sender; every clone publishes to the same
/// subscribers.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CoreEvent>,
}

impl EventBus {
    /// Creates a new event bus with the specified per-subscriber buffer.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publishes an event to all subscribers.
    ///
    /// Returns the number of subscribers that received the event, or an error
    /// if there are none.
    pub fn emit(&self, event: CoreEvent) -> Result<usize, SendError<CoreEvent>> {
        self.sender.send(event)
    }

    /// Creates a new subscriber. Past events are not replayed.
    pub fn subscribe(&self) -> Receiver<CoreEvent> {
        self.sender.subscribe()
    }

    /// Returns the number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER_SIZE)
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

// ============================================================================
// Event Stream Wrapper
// ============================================================================

/// Type alias for event filter functions.
type EventFilter = Box<dyn Fn(&CoreEvent) -> bool + Send + Sync>;

/// A `broadcast::Receiver` with an optional predicate.
///
/// ```rust
/// use core_runtime::events::{CoreEvent, EventBus, EventStream};
///
/// let event_bus = EventBus::new(100);
/// let preload_only = EventStream::new(event_bus.subscribe())
///     .filter(|event| matches!(event, CoreEvent::Preload(_)));
/// ```
pub struct EventStream {
    receiver: Receiver<CoreEvent>,
    filter: Option<EventFilter>,
}

impl EventStream {
    pub fn new(receiver: Receiver<CoreEvent>) -> Self {
        Self {
            receiver,
            filter: None,
        }
    }

    /// Only events matching `predicate` will be returned.
    pub fn filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&CoreEvent) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Box::new(predicate));
        self
    }

    fn accepts(&self, event: &CoreEvent) -> bool {
        self.filter.as_ref().map_or(true, |filter| filter(event))
    }

    /// Receives the next event that passes the filter.
    ///
    /// # Errors
    ///
    /// `RecvError::Lagged(n)` if the subscriber fell behind by `n` events,
    /// `RecvError::Closed` once all senders are gone.
    pub async fn recv(&mut self) -> Result<CoreEvent, RecvError> {
        loop {
            let event = self.receiver.recv().await?;
            if self.accepts(&event) {
                return Ok(event);
            }
        }
    }

    /// Attempts to receive a matching event without waiting.
    ///
    /// Returns `None` if no matching event is currently buffered.
    pub fn try_recv(&mut self) -> Option<Result<CoreEvent, RecvError>> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => {
                    if self.accepts(&event) {
                        return Some(Ok(event));
                    }
                }
                Err(broadcast::error::TryRecvError::Empty) => return None,
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    return Some(Err(RecvError::Lagged(n)))
                }
                Err(broadcast::error::TryRecvError::Closed) => return Some(Err(RecvError::Closed)),
            }
        }
    }
}

impl fmt::Debug for EventStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStream")
            .field("has_filter", &self.filter.is_some())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
