//! Single in-flight outbound frame per endpoint
//!
//! The poll thread drains the slot into the socket; producers on any thread
//! fill it. Each endpoint has its own lock, so a stalled peer never blocks
//! sends to another endpoint.

use bytes::Bytes;
use parking_lot::{Condvar, Mutex};
use std::time::Instant;

#[derive(Debug, Default)]
struct SlotState {
    frame: Option<Bytes>,
    offset: usize,
    closed: Option<String>,
}

/// Outcome of trying to place a frame in the slot
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Offer {
    Accepted,
    Occupied,
    Closed(String),
}

#[derive(Debug, Default)]
pub(crate) struct OutboundSlot {
    state: Mutex<SlotState>,
    drained: Condvar,
}

impl OutboundSlot {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn offer(&self, frame: Bytes) -> Offer {
        let mut state = self.state.lock();
        if let Some(reason) = &state.closed {
            return Offer::Closed(reason.clone());
        }
        if state.frame.is_some() {
            return Offer::Occupied;
        }
        state.frame = Some(frame);
        state.offset = 0;
        Offer::Accepted
    }

    pub(crate) fn is_occupied(&self) -> bool {
        self.state.lock().frame.is_some()
    }

    /// Write as much of the pending frame as `write` accepts
    ///
    /// `write` returns the number of bytes taken, `Ok(0)` when the socket
    /// would block. Returns the bytes written and whether the frame finished.
    pub(crate) fn drain_into<W>(&self, mut write: W) -> std::io::Result<(usize, Option<usize>)>
    where
        W: FnMut(&[u8]) -> std::io::Result<usize>,
    {
        let mut state = self.state.lock();
        let Some(frame) = state.frame.clone() else {
            return Ok((0, None));
        };

        let mut written = 0;
        while state.offset < frame.len() {
            let n = write(&frame[state.offset..])?;
            if n == 0 {
                return Ok((written, None));
            }
            state.offset += n;
            written += n;
        }

        state.frame = None;
        state.offset = 0;
        self.drained.notify_all();
        Ok((written, Some(frame.len())))
    }

    /// Mark the slot dead, dropping any unsent frame and waking waiters
    pub(crate) fn close(&self, reason: impl Into<String>) -> bool {
        let mut state = self.state.lock();
        let dropped = state.frame.take().is_some();
        state.offset = 0;
        state.closed.get_or_insert_with(|| reason.into());
        self.drained.notify_all();
        dropped
    }

    /// Block until the slot is free or closed, or until `deadline`
    ///
    /// Returns `true` if the slot can take another offer.
    pub(crate) fn wait_free(&self, deadline: Instant) -> bool {
        let mut state = self.state.lock();
        while state.frame.is_some() && state.closed.is_none() {
            if self.drained.wait_until(&mut state, deadline).timed_out() {
                break;
            }
        }
        state.frame.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_single_frame_in_flight() {
        let slot = OutboundSlot::new();
        assert_eq!(slot.offer(Bytes::from_static(b"one")), Offer::Accepted);
        assert_eq!(slot.offer(Bytes::from_static(b"two")), Offer::Occupied);
        assert!(slot.is_occupied());
    }

    #[test]
    fn test_partial_writes_resume_at_offset() {
        let slot = OutboundSlot::new();
        slot.offer(Bytes::from_static(b"abcdef"));

        let mut sink = Vec::new();
        let (n, done) = slot
            .drain_into(|buf| {
                if sink.len() >= 4 {
                    return Ok(0);
                }
                let take = buf.len().min(2);
                sink.extend_from_slice(&buf[..take]);
                Ok(take)
            })
            .unwrap();
        assert_eq!((n, done), (4, None));
        assert!(slot.is_occupied());

        let (n, done) = slot
            .drain_into(|buf| {
                sink.extend_from_slice(buf);
                Ok(buf.len())
            })
            .unwrap();
        assert_eq!((n, done), (2, Some(6)));
        assert_eq!(sink, b"abcdef");
        assert!(!slot.is_occupied());
    }

    #[test]
    fn test_close_keeps_first_reason() {
        let slot = OutboundSlot::new();
        slot.offer(Bytes::from_static(b"pending"));
        assert!(slot.close("reset by peer"));
        assert!(!slot.close("second"));

        assert_eq!(
            slot.offer(Bytes::from_static(b"x")),
            Offer::Closed("reset by peer".to_string())
        );
    }

    #[test]
    fn test_wait_free_times_out() {
        let slot = OutboundSlot::new();
        slot.offer(Bytes::from_static(b"stuck"));
        let start = Instant::now();
        assert!(!slot.wait_free(start + Duration::from_millis(20)));
        assert!(start.elapsed() >= Duration::from_millis(20));
    }
}
