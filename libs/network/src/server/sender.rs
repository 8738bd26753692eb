//! Handles that reach into a running server from other threads

use super::shared::Shared;
use crate::config::SendMode;
use crate::error::SendError;
use crate::transports::EndpointId;
use bytes::Bytes;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use types::{Envelope, Header};

/// Thread-safe producer for a [`PollServer`](crate::PollServer)
///
/// Frames go straight into the target endpoint's outbound slot and the poll
/// thread is woken to write them. In blocking mode a producer waits on that
/// endpoint's slot for up to `send_timeout`; on the poll thread itself the
/// send never waits, since only that thread can free the slot.
#[derive(Clone)]
pub struct ServerSender {
    shared: Arc<Shared>,
    mode: SendMode,
    timeout: Duration,
}

impl ServerSender {
    pub(crate) fn new(shared: Arc<Shared>, mode: SendMode, timeout: Duration) -> Self {
        Self {
            shared,
            mode,
            timeout,
        }
    }

    /// Route by the header's next stage and send
    pub fn send(&self, header: Header, payload: impl Into<Bytes>) -> Result<EndpointId, SendError> {
        if self.shared.is_closing() {
            return Err(SendError::ServerClosed);
        }
        let envelope = Envelope::new(header, payload);
        let endpoint = self.shared.resolve(&envelope, None)?;
        self.send_envelope(endpoint, envelope)?;
        Ok(endpoint)
    }

    pub fn send_to(&self, endpoint: EndpointId, header: Header, payload: impl Into<Bytes>) -> Result<(), SendError> {
        self.send_envelope(endpoint, Envelope::new(header, payload))
    }

    pub fn send_envelope(&self, endpoint: EndpointId, envelope: Envelope) -> Result<(), SendError> {
        let frame = self.shared.encode(envelope)?;
        self.offer(endpoint, frame)
    }

    /// Pass an inbound envelope on to the stage after the one it came from
    pub fn forward(&self, from: EndpointId, envelope: Envelope) -> Result<EndpointId, SendError> {
        if self.shared.is_closing() {
            return Err(SendError::ServerClosed);
        }
        let endpoint = self.shared.resolve(&envelope, Some(from))?;
        self.send_envelope(endpoint, envelope)?;
        Ok(endpoint)
    }

    pub fn is_closed(&self) -> bool {
        self.shared.is_closing()
    }

    fn offer(&self, endpoint: EndpointId, frame: Bytes) -> Result<(), SendError> {
        let may_wait = self.mode == SendMode::Blocking && !self.shared.on_poll_thread();
        let deadline = Instant::now() + self.timeout;
        loop {
            match self.shared.offer(endpoint, frame.clone()) {
                Ok(()) => {
                    self.shared.wake();
                    return Ok(());
                }
                Err(SendError::Backpressure { .. }) if may_wait && Instant::now() < deadline => {
                    let Some(slot) = self.shared.slot(endpoint) else {
                        return Err(SendError::not_connected(None));
                    };
                    slot.wait_free(deadline);
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Stops a server from any thread, waking its poll loop
///
/// Holding a handle does not keep the server alive; once the server is
/// dropped `shutdown` does nothing.
#[derive(Clone)]
pub struct ShutdownHandle {
    shared: Weak<Shared>,
}

impl ShutdownHandle {
    pub(crate) fn new(shared: &Arc<Shared>) -> Self {
        Self {
            shared: Arc::downgrade(shared),
        }
    }

    pub fn shutdown(&self) {
        if let Some(shared) = self.shared.upgrade() {
            shared.request_shutdown();
        }
    }

    /// Whether the server still exists and has not begun shutting down
    pub fn is_active(&self) -> bool {
        self.shared
            .upgrade()
            .map(|shared| !shared.is_closing())
            .unwrap_or(false)
    }
}
