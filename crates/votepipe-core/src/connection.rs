//! Connection state tracking for the queue and the store.
//!
//! Each connection-owning component holds a [`ConnectionMonitor`]. Lifecycle events
//! are emitted into it; the monitor folds them into a [`ConnectionStatus`] readable at
//! any time and rebroadcasts them to subscribers.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, watch};

const EVENT_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Never connected
    Disconnected,

    /// Connection attempt (or retry) in progress
    Connecting,

    /// Connected to the remote service
    Connected,

    /// Closed, either on request or because the connection ended
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// Lifecycle events, as observed by subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    Connect,
    Ready,
    Error(String),
    Close,
    Reconnecting { attempt: u32, delay: Duration },
    End,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionStatus {
    pub state: ConnectionState,
    pub ready: bool,
}

impl ConnectionStatus {
    fn apply(&mut self, event: &ConnectionEvent) {
        match event {
            ConnectionEvent::Connect => self.state = ConnectionState::Connected,
            ConnectionEvent::Ready => self.ready = true,
            ConnectionEvent::Error(_) => {}
            ConnectionEvent::Reconnecting { .. } => {
                self.state = ConnectionState::Connecting;
                self.ready = false;
            }
            ConnectionEvent::Close | ConnectionEvent::End => {
                self.state = ConnectionState::Closed;
                self.ready = false;
            }
        }
    }
}

/// The connection was closed before it became ready.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("connection closed before it became ready")]
pub struct ClosedBeforeReady;

struct Inner {
    status: watch::Sender<ConnectionStatus>,
    events: broadcast::Sender<ConnectionEvent>,
}

/// Shared connection state plus event fan-out. Cheap to clone.
#[derive(Clone)]
pub struct ConnectionMonitor {
    inner: Arc<Inner>,
}

impl Default for ConnectionMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ConnectionMonitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionMonitor")
            .field("status", &self.status())
            .finish()
    }
}

impl ConnectionMonitor {
    pub fn new() -> Self {
        let (status, _) = watch::channel(ConnectionStatus {
            state: ConnectionState::Disconnected,
            ready: false,
        });
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(Inner { status, events }),
        }
    }

    /// A (re)connect is starting. Clears `ready`, including after a close.
    pub fn mark_connecting(&self) {
        self.inner.status.send_modify(|s| {
            s.state = ConnectionState::Connecting;
            s.ready = false;
        });
    }

    /// Record an event and forward it to subscribers.
    pub fn emit(&self, event: ConnectionEvent) {
        self.inner.status.send_modify(|s| s.apply(&event));
        // No subscribers is fine
        let _ = self.inner.events.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.inner.events.subscribe()
    }

    pub fn status(&self) -> ConnectionStatus {
        *self.inner.status.borrow()
    }

    pub fn state(&self) -> ConnectionState {
        self.status().state
    }

    pub fn is_ready(&self) -> bool {
        self.status().ready
    }

    pub fn is_closed(&self) -> bool {
        self.state() == ConnectionState::Closed
    }

    /// Resolves once the connection is closed.
    pub async fn closed(&self) {
        let mut rx = self.inner.status.subscribe();
        // The sender lives in `self`, so wait_for only fails if it is dropped mid-wait.
        let _ = rx.wait_for(|s| s.state == ConnectionState::Closed).await;
    }

    /// Resolves once the connection is ready, or fails if it closes first.
    pub async fn ready(&self) -> Result<(), ClosedBeforeReady> {
        let mut rx = self.inner.status.subscribe();
        let ready = rx
            .wait_for(|s| s.ready || s.state == ConnectionState::Closed)
            .await
            .map(|status| status.ready)
            .unwrap_or(false);
        if ready {
            Ok(())
        } else {
            Err(ClosedBeforeReady)
        }
    }
}
