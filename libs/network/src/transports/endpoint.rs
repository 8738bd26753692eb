//! TCP Endpoint
//!
//! One registered peer: the non-blocking stream, its inbound frame decoder
//! and its outbound slot. All socket calls here are non-blocking and are
//! repeated until the kernel reports `WouldBlock`, as edge-triggered
//! readiness requires.

use super::slot::OutboundSlot;
use codec::{FrameDecoder, FrameLimits};
use mio::net::TcpStream;
use mio::Token;
use std::fmt;
use std::io::{self, Read, Write};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, trace};

/// Endpoint identity, stable for the lifetime of the server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EndpointId(usize);

impl EndpointId {
    pub const fn new(raw: usize) -> Self {
        Self(raw)
    }

    pub fn raw(&self) -> usize {
        self.0
    }

    pub(crate) fn token(&self) -> Token {
        Token(self.0)
    }
}

impl From<Token> for EndpointId {
    fn from(token: Token) -> Self {
        Self(token.0)
    }
}

impl fmt::Display for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ep-{}", self.0)
    }
}

/// Endpoint lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointState {
    /// Outbound connect issued, not yet confirmed writable
    Connecting,
    Ready,
    /// Server is shutting down; flushing the outbound slot
    Draining,
    Closed,
}

impl fmt::Display for EndpointState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EndpointState::Connecting => "connecting",
            EndpointState::Ready => "ready",
            EndpointState::Draining => "draining",
            EndpointState::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// How the endpoint came to exist
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointOrigin {
    /// We dialed out
    Connected,
    /// Accepted on the server's listener
    Accepted,
}

/// Public view of an endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointInfo {
    pub id: EndpointId,
    pub peer: SocketAddr,
    pub state: EndpointState,
    pub origin: EndpointOrigin,
}

/// Result of draining the socket's receive side
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReadOutcome {
    /// Kernel buffer is empty
    Drained,
    /// Stopped at the high-water mark with data possibly left in the kernel
    Paused,
    /// Peer closed its write half
    Eof,
}

pub(crate) struct Endpoint {
    id: EndpointId,
    pub(crate) stream: TcpStream,
    peer: SocketAddr,
    origin: EndpointOrigin,
    pub(crate) state: EndpointState,
    pub(crate) slot: Arc<OutboundSlot>,
    pub(crate) decoder: FrameDecoder,
    /// Readiness seen but not yet exhausted
    pub(crate) readable_hint: bool,
    /// Last write hit `WouldBlock`; wait for a writable event
    pub(crate) write_blocked: bool,
    pub(crate) peer_closed: bool,
    pub(crate) violations: u32,
    connected_at: Instant,
    pub(crate) bytes_sent: u64,
    pub(crate) bytes_received: u64,
}

impl Endpoint {
    pub(crate) fn new(
        id: EndpointId,
        stream: TcpStream,
        peer: SocketAddr,
        origin: EndpointOrigin,
        state: EndpointState,
        slot: Arc<OutboundSlot>,
        limits: FrameLimits,
        read_buffer_size: usize,
    ) -> Self {
        Self {
            id,
            stream,
            peer,
            origin,
            state,
            slot,
            decoder: FrameDecoder::with_capacity(limits, read_buffer_size),
            readable_hint: false,
            write_blocked: false,
            peer_closed: false,
            violations: 0,
            connected_at: Instant::now(),
            bytes_sent: 0,
            bytes_received: 0,
        }
    }

    pub(crate) fn id(&self) -> EndpointId {
        self.id
    }

    pub(crate) fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub(crate) fn info(&self) -> EndpointInfo {
        EndpointInfo {
            id: self.id,
            peer: self.peer,
            state: self.state,
            origin: self.origin,
        }
    }

    pub(crate) fn is_writable_state(&self) -> bool {
        matches!(self.state, EndpointState::Ready | EndpointState::Draining)
    }

    /// Resolve a pending non-blocking connect after a writable event
    ///
    /// `Ok(true)` once connected, `Ok(false)` for a spurious wakeup.
    pub(crate) fn confirm_connect(&mut self) -> io::Result<bool> {
        if let Some(err) = self.stream.take_error()? {
            return Err(err);
        }
        match self.stream.peer_addr() {
            Ok(_) => {
                self.state = EndpointState::Ready;
                self.connected_at = Instant::now();
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::NotConnected => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Buffered frames or unread socket data waiting to be processed
    pub(crate) fn has_pending_input(&self) -> bool {
        !matches!(self.decoder.complete_frame_len(), Ok(None))
            || (self.readable_hint && !self.peer_closed && self.state != EndpointState::Connecting)
    }

    /// Read into the decoder until the socket is empty, until `high_water`
    /// bytes are buffered and at least one frame is complete, or until the
    /// buffered prefix is already a framing error
    pub(crate) fn fill(&mut self, chunk: usize, high_water: usize) -> io::Result<(usize, ReadOutcome)> {
        let mut total = 0;
        loop {
            match self.decoder.complete_frame_len() {
                Err(_) => return Ok((total, ReadOutcome::Paused)),
                Ok(Some(_)) if self.decoder.buffered() >= high_water => {
                    return Ok((total, ReadOutcome::Paused));
                }
                Ok(_) => {}
            }

            let buffer = self.decoder.buffer_mut();
            let start = buffer.len();
            buffer.resize(start + chunk, 0);
            let result = self.stream.read(&mut buffer[start..]);
            let read = *result.as_ref().unwrap_or(&0);
            buffer.truncate(start + read);

            match result {
                Ok(0) => {
                    self.readable_hint = false;
                    self.peer_closed = true;
                    return Ok((total, ReadOutcome::Eof));
                }
                Ok(n) => {
                    total += n;
                    self.bytes_received += n as u64;
                    trace!(endpoint = %self.id, bytes = n, "Read from socket");
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    self.readable_hint = false;
                    return Ok((total, ReadOutcome::Drained));
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }

    /// Push the outbound slot into the socket
    ///
    /// Returns bytes written and the size of the frame that completed, if any.
    pub(crate) fn flush(&mut self) -> io::Result<(usize, Option<usize>)> {
        if !self.is_writable_state() || self.write_blocked {
            return Ok((0, None));
        }

        let stream = &mut self.stream;
        let mut would_block = false;
        let result = self.slot.drain_into(|buf| loop {
            match stream.write(buf) {
                Ok(0) => return Err(io::Error::from(io::ErrorKind::WriteZero)),
                Ok(n) => return Ok(n),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    would_block = true;
                    return Ok(0);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        });
        self.write_blocked = would_block;

        let (written, completed) = result?;
        self.bytes_sent += written as u64;
        if let Some(frame_len) = completed {
            debug!(
                endpoint = %self.id,
                peer = %self.peer,
                bytes = frame_len,
                total_sent = self.bytes_sent,
                "Frame written"
            );
        }
        Ok((written, completed))
    }

    pub(crate) fn uptime_ms(&self) -> u128 {
        self.connected_at.elapsed().as_millis()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{TcpListener, TcpStream as StdStream};
    use std::time::Duration;

    fn pair() -> (Endpoint, StdStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let peer = StdStream::connect(listener.local_addr().unwrap()).unwrap();
        let (accepted, addr) = listener.accept().unwrap();
        accepted.set_nonblocking(true).unwrap();
        let endpoint = Endpoint::new(
            EndpointId::new(2),
            TcpStream::from_std(accepted),
            addr,
            EndpointOrigin::Accepted,
            EndpointState::Ready,
            Arc::new(OutboundSlot::new()),
            FrameLimits::default(),
            1024,
        );
        (endpoint, peer)
    }

    #[test]
    fn test_fill_stops_at_oversized_prefix() {
        let (mut endpoint, mut peer) = pair();
        peer.write_all(&u32::MAX.to_le_bytes()).unwrap();
        peer.write_all(&vec![0u8; 64 * 1024]).unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            assert!(Instant::now() < deadline, "no data arrived");
            endpoint.readable_hint = true;
            let (_, outcome) = endpoint.fill(1024, 4 * 1024 * 1024).unwrap();
            if outcome == ReadOutcome::Paused {
                break;
            }
            std::thread::sleep(Duration::from_millis(2));
        }
        assert!(endpoint.decoder.buffered() < 2048, "kept reading a poisoned stream");
        assert!(endpoint.has_pending_input());
        assert!(endpoint.decoder.next_frame().is_err());
    }

    #[test]
    fn test_fill_drains_until_would_block() {
        let (mut endpoint, mut peer) = pair();
        // header length present, rest of the frame still in flight
        peer.write_all(&[8, 0, 0, 0, 1, 2, 3]).unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        let mut read = 0;
        while read < 7 {
            assert!(Instant::now() < deadline, "no data arrived");
            let (n, outcome) = endpoint.fill(1024, 4 * 1024 * 1024).unwrap();
            assert_eq!(outcome, ReadOutcome::Drained);
            read += n;
        }
        assert_eq!(endpoint.bytes_received, 7);
        assert!(!endpoint.has_pending_input());
    }
}
