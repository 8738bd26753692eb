//! State reachable from both the poll thread and sender handles

use crate::error::SendError;
use crate::routing::StageRouter;
use crate::transports::metrics::StatsTracker;
use crate::transports::slot::{Offer, OutboundSlot};
use crate::transports::EndpointId;
use bytes::Bytes;
use codec::{encode_frame, FrameLimits};
use mio::Waker;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};
use tracing::{debug, warn};
use types::Envelope;

/// Closed-but-bound endpoints remembered for error reporting
const MAX_TOMBSTONES: usize = 1024;

pub(crate) struct Shared {
    pub(crate) server_id: u64,
    pub(crate) router: RwLock<StageRouter>,
    /// Live slots plus tombstones of closed endpoints not yet reported
    slots: RwLock<HashMap<EndpointId, Arc<OutboundSlot>>>,
    /// Closed endpoints whose slot is kept as a tombstone, oldest first
    tombstones: Mutex<VecDeque<EndpointId>>,
    closing: AtomicBool,
    waker: Waker,
    poll_thread: Mutex<Option<ThreadId>>,
    pub(crate) stats: StatsTracker,
    pub(crate) limits: FrameLimits,
}

impl Shared {
    pub(crate) fn new(server_id: u64, router: StageRouter, waker: Waker, limits: FrameLimits) -> Self {
        Self {
            server_id,
            router: RwLock::new(router),
            slots: RwLock::new(HashMap::new()),
            tombstones: Mutex::new(VecDeque::new()),
            closing: AtomicBool::new(false),
            waker,
            poll_thread: Mutex::new(None),
            stats: StatsTracker::new(),
            limits,
        }
    }

    pub(crate) fn is_closing(&self) -> bool {
        self.closing.load(Ordering::Acquire)
    }

    /// Flag the server for shutdown and interrupt a pending poll
    pub(crate) fn request_shutdown(&self) {
        if !self.closing.swap(true, Ordering::AcqRel) {
            debug!(server = self.server_id, "Shutdown requested");
        }
        self.wake();
    }

    pub(crate) fn wake(&self) {
        if let Err(e) = self.waker.wake() {
            warn!(server = self.server_id, error = %e, "Failed to wake poller");
        }
    }

    pub(crate) fn mark_poll_thread(&self) {
        let current = thread::current().id();
        let mut owner = self.poll_thread.lock();
        if *owner != Some(current) {
            *owner = Some(current);
        }
    }

    pub(crate) fn on_poll_thread(&self) -> bool {
        *self.poll_thread.lock() == Some(thread::current().id())
    }

    pub(crate) fn insert_slot(&self, endpoint: EndpointId) -> Arc<OutboundSlot> {
        let slot = Arc::new(OutboundSlot::new());
        self.slots.write().insert(endpoint, Arc::clone(&slot));
        slot
    }

    pub(crate) fn slot(&self, endpoint: EndpointId) -> Option<Arc<OutboundSlot>> {
        self.slots.read().get(&endpoint).cloned()
    }

    /// Forget a closed endpoint after its error has been reported once
    fn retire(&self, endpoint: EndpointId) {
        self.slots.write().remove(&endpoint);
        self.tombstones.lock().retain(|id| *id != endpoint);
        self.router.write().unbind_endpoint(endpoint);
    }

    /// Drop a closed endpoint's slot, or keep it as a tombstone so the next
    /// send to that endpoint reports why it closed
    ///
    /// At most `MAX_TOMBSTONES` are kept; the oldest is retired first.
    pub(crate) fn release(&self, endpoint: EndpointId, keep_tombstone: bool) {
        if !keep_tombstone {
            self.slots.write().remove(&endpoint);
            return;
        }
        let evicted = {
            let mut tombstones = self.tombstones.lock();
            tombstones.push_back(endpoint);
            if tombstones.len() > MAX_TOMBSTONES {
                tombstones.pop_front()
            } else {
                None
            }
        };
        if let Some(oldest) = evicted {
            debug!(server = self.server_id, endpoint = %oldest, "Tombstone evicted");
            self.retire(oldest);
        }
    }

    pub(crate) fn clear_slots(&self) {
        self.slots.write().clear();
        self.tombstones.lock().clear();
    }

    #[cfg(test)]
    pub(crate) fn slot_count(&self) -> usize {
        self.slots.read().len()
    }

    pub(crate) fn resolve(&self, envelope: &Envelope, inbound: Option<EndpointId>) -> Result<EndpointId, SendError> {
        self.router.read().resolve(&envelope.header, inbound)
    }

    pub(crate) fn encode(&self, envelope: Envelope) -> Result<Bytes, SendError> {
        Ok(encode_frame(envelope, &self.limits)?)
    }

    /// Place an encoded frame in the endpoint's outbound slot
    pub(crate) fn offer(&self, endpoint: EndpointId, frame: Bytes) -> Result<(), SendError> {
        if self.is_closing() {
            return Err(SendError::ServerClosed);
        }
        let slot = self
            .slot(endpoint)
            .ok_or(SendError::not_connected(None))?;

        match slot.offer(frame) {
            Offer::Accepted => Ok(()),
            Offer::Occupied => {
                self.stats.record_backpressure();
                Err(SendError::Backpressure { endpoint })
            }
            Offer::Closed(reason) => {
                self.retire(endpoint);
                Err(SendError::EndpointClosed { endpoint, reason })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::RouteRole;
    use mio::{Poll, Token};

    fn shared() -> (Poll, Shared) {
        let poll = Poll::new().unwrap();
        let waker = Waker::new(poll.registry(), Token(0)).unwrap();
        let shared = Shared::new(1, StageRouter::new(RouteRole::Origin), waker, FrameLimits::default());
        (poll, shared)
    }

    #[test]
    fn test_release_without_tombstone_frees_slot() {
        let (_poll, shared) = shared();
        let endpoint = EndpointId::new(2);
        shared.insert_slot(endpoint).close("peer closed connection");
        shared.release(endpoint, false);

        assert_eq!(shared.slot_count(), 0);
        assert_eq!(
            shared.offer(endpoint, Bytes::from_static(b"x")),
            Err(SendError::not_connected(None))
        );
    }

    #[test]
    fn test_tombstone_reports_once() {
        let (_poll, shared) = shared();
        let endpoint = EndpointId::new(2);
        shared.router.write().bind_stage(1, endpoint);
        shared.insert_slot(endpoint).close("reset by peer");
        shared.release(endpoint, true);

        assert_eq!(
            shared.offer(endpoint, Bytes::from_static(b"x")),
            Err(SendError::EndpointClosed {
                endpoint,
                reason: "reset by peer".to_string()
            })
        );
        assert_eq!(shared.slot_count(), 0);
        assert_eq!(shared.router.read().stage_of(endpoint), None);
    }

    #[test]
    fn test_tombstones_are_capped() {
        let (_poll, shared) = shared();
        for raw in 0..MAX_TOMBSTONES + 10 {
            let endpoint = EndpointId::new(raw + 2);
            shared.insert_slot(endpoint).close("gone");
            shared.release(endpoint, true);
        }
        assert_eq!(shared.slot_count(), MAX_TOMBSTONES);
        assert!(shared.slot(EndpointId::new(2)).is_none());
        assert!(shared.slot(EndpointId::new(MAX_TOMBSTONES + 11)).is_some());
    }
}
