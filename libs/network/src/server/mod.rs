//! # Poll Server
//!
//! Multiplexes any number of TCP endpoints through one `mio::Poll`. A single
//! call to [`PollServer::poll_once`] is one turn of the loop:
//!
//! 1. wait for readiness (zero timeout when buffered input is waiting)
//! 2. accept pending peers and confirm outbound connects
//! 3. read every readable endpoint until `WouldBlock` or the high-water mark
//! 4. deliver up to `max_frames_per_turn` frames per endpoint, round-robin
//! 5. flush outbound slots and close endpoints that failed or hung up
//!
//! Nothing blocks except the poll itself, so one slow or silent peer never
//! holds up the others.

pub mod handler;
pub mod sender;
pub(crate) mod shared;

pub use handler::DeliveryHandler;
pub use sender::{ServerSender, ShutdownHandle};

use crate::address::ServerAddress;
use crate::config::{PollServerConfig, SendMode};
use crate::context::TransportContext;
use crate::error::{ConnectionError, ProtocolViolation, Result, SendError, TransportError};
use crate::routing::{RouteRole, StageRouter};
use crate::transports::endpoint::{Endpoint, ReadOutcome};
use crate::transports::metrics::StatsTracker;
use crate::transports::{EndpointId, EndpointInfo, EndpointOrigin, EndpointState, ServerStats};
use bytes::Bytes;
use mio::net::{TcpListener, TcpStream};
use mio::{Events, Interest, Poll, Token, Waker};
use shared::Shared;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, trace, warn};
use types::{Envelope, Header};

const WAKER_TOKEN: Token = Token(0);
const LISTENER_TOKEN: Token = Token(1);
const FIRST_ENDPOINT_TOKEN: usize = 2;

#[derive(Debug, Clone, Copy)]
struct Readiness {
    token: Token,
    readable: bool,
    writable: bool,
    error: bool,
}

/// Why an endpoint is being closed
#[derive(Debug, Clone)]
enum CloseCause {
    PeerClosed,
    Io(String),
    Protocol(String),
    Shutdown,
}

impl CloseCause {
    fn is_error(&self) -> bool {
        matches!(self, CloseCause::Io(_) | CloseCause::Protocol(_))
    }
}

impl fmt::Display for CloseCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseCause::PeerClosed => f.write_str("peer closed connection"),
            CloseCause::Io(reason) => write!(f, "I/O error: {reason}"),
            CloseCause::Protocol(reason) => write!(f, "protocol error: {reason}"),
            CloseCause::Shutdown => f.write_str("server shut down"),
        }
    }
}

pub struct PollServer {
    context: TransportContext,
    config: PollServerConfig,
    poll: Poll,
    events: Events,
    ready: Vec<Readiness>,
    shared: Arc<Shared>,
    listener: Option<TcpListener>,
    local_addr: Option<SocketAddr>,
    endpoints: HashMap<EndpointId, Endpoint>,
    primary: Option<EndpointId>,
    next_token: usize,
    handler: Option<Box<dyn DeliveryHandler>>,
    inbox: VecDeque<(EndpointId, Envelope)>,
    rr_cursor: usize,
    closed: bool,
}

impl PollServer {
    /// Build a server with the context's default configuration
    ///
    /// `tcp://host:port` connects (blocking, bounded by `connect_timeout`)
    /// and the resulting endpoint becomes [`primary_endpoint`](Self::primary_endpoint);
    /// `bind://host:port` or `tcp://*:port` listens.
    pub fn new(context: &TransportContext, address: &str) -> Result<Self> {
        Self::with_config(context, address, context.config().clone())
    }

    pub fn with_config(context: &TransportContext, address: &str, config: PollServerConfig) -> Result<Self> {
        if context.is_terminated() {
            return Err(TransportError::ContextTerminated);
        }
        config.validate()?;
        let address = ServerAddress::parse(address)?;

        let poll = Poll::new().map_err(|e| TransportError::io("create poll", e))?;
        let waker = Waker::new(poll.registry(), WAKER_TOKEN)
            .map_err(|e| TransportError::io("create waker", e))?;
        let server_id = context.next_server_id();
        let shared = Arc::new(Shared::new(
            server_id,
            StageRouter::new(config.role),
            waker,
            config.frame_limits(),
        ));

        let mut server = Self {
            context: context.clone(),
            events: Events::with_capacity(config.events_capacity),
            ready: Vec::with_capacity(config.events_capacity),
            config,
            poll,
            shared,
            listener: None,
            local_addr: None,
            endpoints: HashMap::new(),
            primary: None,
            next_token: FIRST_ENDPOINT_TOKEN,
            handler: None,
            inbox: VecDeque::new(),
            rr_cursor: 0,
            closed: false,
        };

        if address.is_bind() {
            server.bind(&address)?;
        } else {
            let endpoint = server.connect_blocking(&address)?;
            server.primary = Some(endpoint);
        }

        context.attach(server_id, ShutdownHandle::new(&server.shared));
        Ok(server)
    }

    pub fn server_id(&self) -> u64 {
        self.shared.server_id
    }

    pub fn config(&self) -> &PollServerConfig {
        &self.config
    }

    /// Listening address when built in bind mode
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Endpoint created by a `tcp://` construction address
    pub fn primary_endpoint(&self) -> Option<EndpointId> {
        self.primary
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn sender(&self) -> ServerSender {
        ServerSender::new(
            Arc::clone(&self.shared),
            self.config.send_mode,
            self.config.send_timeout(),
        )
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle::new(&self.shared)
    }

    /// Install the per-frame callback; frames stop going to the inbox
    pub fn set_handler<H: DeliveryHandler + 'static>(&mut self, handler: H) {
        self.handler = Some(Box::new(handler));
    }

    pub fn clear_handler(&mut self) {
        self.handler = None;
    }

    pub fn route_role(&self) -> RouteRole {
        self.shared.router.read().role()
    }

    pub fn set_route_role(&mut self, role: RouteRole) {
        self.shared.router.write().set_role(role);
    }

    /// Route frames for `stage_id` to `endpoint`
    pub fn bind_stage(&mut self, stage_id: u32, endpoint: EndpointId) -> Option<EndpointId> {
        debug!(server = self.shared.server_id, stage_id, endpoint = %endpoint, "Stage bound");
        self.shared.router.write().bind_stage(stage_id, endpoint)
    }

    pub fn unbind_endpoint(&mut self, endpoint: EndpointId) -> Option<u32> {
        self.shared.router.write().unbind_endpoint(endpoint)
    }

    pub fn stage_of(&self, endpoint: EndpointId) -> Option<u32> {
        self.shared.router.read().stage_of(endpoint)
    }

    /// Open an additional outbound endpoint without blocking
    ///
    /// The endpoint stays `Connecting` until a later turn sees it writable;
    /// frames sent before then wait in its outbound slot.
    pub fn connect(&mut self, address: &str) -> Result<EndpointId> {
        self.ensure_open()?;
        let parsed = ServerAddress::parse(address)?;
        if parsed.is_bind() {
            return Err(ConnectionError::address_invalid(address, "expected tcp://host:port").into());
        }
        let peer = parsed
            .resolve()?
            .into_iter()
            .next()
            .ok_or_else(|| ConnectionError::address_invalid(address, "host resolved to no addresses"))?;

        let stream = TcpStream::connect(peer).map_err(|e| ConnectionError::refused(address, e))?;
        let endpoint = self.register_endpoint(stream, peer, EndpointOrigin::Connected, EndpointState::Connecting)?;
        info!(server = self.shared.server_id, endpoint = %endpoint, peer = %peer, "Connecting");
        Ok(endpoint)
    }

    /// Send along the header's route
    pub fn send(&mut self, header: Header, payload: impl Into<Bytes>) -> std::result::Result<EndpointId, SendError> {
        self.check_accepting()?;
        let envelope = Envelope::new(header, payload);
        let endpoint = self.shared.resolve(&envelope, None)?;
        self.send_envelope(endpoint, envelope)?;
        Ok(endpoint)
    }

    pub fn send_to(
        &mut self,
        endpoint: EndpointId,
        header: Header,
        payload: impl Into<Bytes>,
    ) -> std::result::Result<(), SendError> {
        self.send_envelope(endpoint, Envelope::new(header, payload))
    }

    /// Relay an inbound envelope to the stage after the one bound to `from`
    pub fn forward(&mut self, from: EndpointId, envelope: Envelope) -> std::result::Result<EndpointId, SendError> {
        self.check_accepting()?;
        let endpoint = self.shared.resolve(&envelope, Some(from))?;
        self.send_envelope(endpoint, envelope)?;
        Ok(endpoint)
    }

    /// Queue a frame in the endpoint's outbound slot and write what the
    /// socket accepts right away
    pub fn send_envelope(&mut self, endpoint: EndpointId, envelope: Envelope) -> std::result::Result<(), SendError> {
        if self.closed {
            return Err(SendError::ServerClosed);
        }
        let request_id = envelope.header.request_id();
        let frame = self.shared.encode(envelope)?;
        let deadline = Instant::now() + self.config.send_timeout();

        loop {
            match self.shared.offer(endpoint, frame.clone()) {
                Ok(()) => {
                    trace!(endpoint = %endpoint, request_id, bytes = frame.len(), "Frame queued");
                    self.flush_one(endpoint);
                    return Ok(());
                }
                Err(SendError::Backpressure { .. }) if self.config.send_mode == SendMode::Blocking => {
                    let now = Instant::now();
                    if now >= deadline {
                        warn!(endpoint = %endpoint, request_id, timeout_ms = self.config.send_timeout_ms, "Send timed out on backpressure");
                        return Err(SendError::Backpressure { endpoint });
                    }
                    if let Err(e) = self.poll_once(Some(deadline - now)) {
                        warn!(endpoint = %endpoint, error = %e, "Poll failed while waiting to send");
                        return Err(SendError::Backpressure { endpoint });
                    }
                    if self.closed {
                        return Err(SendError::ServerClosed);
                    }
                }
                Err(e) => {
                    debug!(endpoint = %endpoint, request_id, error = %e, "Send rejected");
                    return Err(e);
                }
            }
        }
    }

    /// Wait up to `timeout` for the next frame when no handler is installed
    pub fn receive(&mut self, timeout: Duration) -> Result<Option<(EndpointId, Envelope)>> {
        if let Some(item) = self.inbox.pop_front() {
            return Ok(Some(item));
        }
        if self.closed {
            return Err(SendError::ServerClosed.into());
        }

        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            self.poll_once(Some(remaining))?;
            if let Some(item) = self.inbox.pop_front() {
                return Ok(Some(item));
            }
            if self.closed || Instant::now() >= deadline {
                return Ok(None);
            }
        }
    }

    /// Frames waiting in the inbox
    pub fn pending(&self) -> usize {
        self.inbox.len()
    }

    /// Run turns until the server is shut down
    pub fn run(&mut self) -> Result<()> {
        info!(server = self.shared.server_id, endpoints = self.endpoints.len(), "Poll loop started");
        let interval = self.config.poll_interval();
        while !self.closed {
            self.poll_once(Some(interval))?;
        }
        Ok(())
    }

    /// One turn of the loop; returns the number of frames delivered
    pub fn poll_once(&mut self, timeout: Option<Duration>) -> Result<usize> {
        if self.closed {
            return Ok(0);
        }
        self.shared.mark_poll_thread();
        if self.shared.is_closing() {
            self.drain_and_close();
            return Ok(0);
        }

        let timeout = if self.has_backlog() {
            Some(Duration::ZERO)
        } else {
            timeout
        };
        if let Err(e) = self.poll.poll(&mut self.events, timeout) {
            if e.kind() != io::ErrorKind::Interrupted {
                return Err(TransportError::io("poll", e));
            }
        }

        self.ready.clear();
        for event in self.events.iter() {
            self.ready.push(Readiness {
                token: event.token(),
                readable: event.is_readable() || event.is_read_closed(),
                writable: event.is_writable() || event.is_write_closed(),
                error: event.is_error(),
            });
        }

        let mut to_close = Vec::new();
        let ready = std::mem::take(&mut self.ready);
        for readiness in &ready {
            match readiness.token {
                WAKER_TOKEN => trace!(server = self.shared.server_id, "Woken"),
                LISTENER_TOKEN => self.accept_pending(),
                token => self.on_endpoint_event(EndpointId::from(token), readiness, &mut to_close),
            }
        }
        self.ready = ready;

        self.read_ready(&mut to_close);
        let delivered = self.deliver_ready(&mut to_close);
        self.flush_pending(&mut to_close);
        self.collect_hung_up(&mut to_close);
        for (endpoint, cause) in to_close {
            self.close_endpoint(endpoint, cause);
        }

        if self.shared.is_closing() {
            self.drain_and_close();
        }
        Ok(delivered)
    }

    /// Stop accepting sends, flush outbound slots for up to `drain_timeout`,
    /// then close every endpoint
    pub fn shutdown(&mut self) {
        self.shared.request_shutdown();
        self.drain_and_close();
    }

    pub fn endpoints(&self) -> Vec<EndpointInfo> {
        let mut infos: Vec<EndpointInfo> = self.endpoints.values().map(Endpoint::info).collect();
        infos.sort_by_key(|info| info.id);
        infos
    }

    pub fn endpoint(&self, endpoint: EndpointId) -> Option<EndpointInfo> {
        self.endpoints.get(&endpoint).map(Endpoint::info)
    }

    pub fn stats(&self) -> ServerStats {
        self.shared.stats.snapshot(self.endpoints.len())
    }

    fn ensure_open(&self) -> Result<()> {
        Ok(self.check_accepting()?)
    }

    fn check_accepting(&self) -> std::result::Result<(), SendError> {
        if self.closed || self.shared.is_closing() {
            return Err(SendError::ServerClosed);
        }
        Ok(())
    }

    fn bind(&mut self, address: &ServerAddress) -> Result<()> {
        let mut last_error = None;
        for addr in address.resolve()? {
            match TcpListener::bind(addr) {
                Ok(mut listener) => {
                    self.poll
                        .registry()
                        .register(&mut listener, LISTENER_TOKEN, Interest::READABLE)
                        .map_err(|e| TransportError::io("register listener", e))?;
                    let local = listener
                        .local_addr()
                        .map_err(|e| TransportError::io("listener address", e))?;
                    info!(server = self.shared.server_id, local = %local, "Listening");
                    self.local_addr = Some(local);
                    self.listener = Some(listener);
                    return Ok(());
                }
                Err(e) => {
                    debug!(addr = %addr, error = %e, "Bind attempt failed");
                    last_error = Some(e);
                }
            }
        }
        let source = last_error.unwrap_or_else(|| io::Error::from(io::ErrorKind::AddrNotAvailable));
        Err(ConnectionError::refused(address.to_string(), source).into())
    }

    fn connect_blocking(&mut self, address: &ServerAddress) -> Result<EndpointId> {
        let timeout = self.config.connect_timeout();
        let mut last_error = None;
        for peer in address.resolve()? {
            match std::net::TcpStream::connect_timeout(&peer, timeout) {
                Ok(stream) => {
                    stream
                        .set_nonblocking(true)
                        .map_err(|e| ConnectionError::refused(address.to_string(), e))?;
                    let stream = TcpStream::from_std(stream);
                    let endpoint = self.register_endpoint(stream, peer, EndpointOrigin::Connected, EndpointState::Ready)?;
                    info!(server = self.shared.server_id, endpoint = %endpoint, peer = %peer, "Connected");
                    return Ok(endpoint);
                }
                Err(e) => {
                    debug!(peer = %peer, error = %e, "Connect attempt failed");
                    last_error = Some(e);
                }
            }
        }
        let source = last_error.unwrap_or_else(|| io::Error::from(io::ErrorKind::AddrNotAvailable));
        Err(ConnectionError::refused(address.to_string(), source).into())
    }

    fn register_endpoint(
        &mut self,
        mut stream: TcpStream,
        peer: SocketAddr,
        origin: EndpointOrigin,
        state: EndpointState,
    ) -> Result<EndpointId> {
        let id = EndpointId::new(self.next_token);
        self.next_token += 1;

        if self.config.nodelay {
            if let Err(e) = stream.set_nodelay(true) {
                debug!(endpoint = %id, error = %e, "Failed to set TCP_NODELAY");
            }
        }
        self.poll
            .registry()
            .register(&mut stream, id.token(), Interest::READABLE | Interest::WRITABLE)
            .map_err(|e| TransportError::io("register endpoint", e))?;

        let slot = self.shared.insert_slot(id);
        let endpoint = Endpoint::new(
            id,
            stream,
            peer,
            origin,
            state,
            slot,
            self.config.frame_limits(),
            self.config.read_buffer_size,
        );
        self.endpoints.insert(id, endpoint);
        self.shared.stats.record_opened();
        Ok(id)
    }

    fn accept_pending(&mut self) {
        loop {
            let Some(listener) = self.listener.as_ref() else {
                return;
            };
            match listener.accept() {
                Ok((stream, peer)) => {
                    if self.shared.is_closing() {
                        debug!(peer = %peer, "Refusing connection during shutdown");
                        continue;
                    }
                    match self.register_endpoint(stream, peer, EndpointOrigin::Accepted, EndpointState::Ready) {
                        Ok(endpoint) => {
                            info!(server = self.shared.server_id, endpoint = %endpoint, peer = %peer, "Accepted connection")
                        }
                        Err(e) => warn!(peer = %peer, error = %e, "Failed to register accepted connection"),
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!(server = self.shared.server_id, error = %e, "Accept failed");
                    return;
                }
            }
        }
    }

    fn on_endpoint_event(&mut self, id: EndpointId, readiness: &Readiness, to_close: &mut Vec<(EndpointId, CloseCause)>) {
        let Some(endpoint) = self.endpoints.get_mut(&id) else {
            return;
        };

        if readiness.writable {
            endpoint.write_blocked = false;
            if endpoint.state == EndpointState::Connecting {
                match endpoint.confirm_connect() {
                    Ok(true) => {
                        info!(server = self.shared.server_id, endpoint = %id, peer = %endpoint.peer(), "Connection established")
                    }
                    Ok(false) => {}
                    Err(e) => {
                        to_close.push((id, CloseCause::Io(format!("connect failed: {e}"))));
                        return;
                    }
                }
            }
        }

        if readiness.error && endpoint.state != EndpointState::Connecting {
            let reason = match endpoint.stream.take_error() {
                Ok(Some(e)) => e.to_string(),
                Ok(None) => "socket error".to_string(),
                Err(e) => e.to_string(),
            };
            to_close.push((id, CloseCause::Io(reason)));
            return;
        }

        if readiness.readable {
            endpoint.readable_hint = true;
        }
    }

    fn can_accept_delivery(&self) -> bool {
        self.handler.is_some() || self.inbox.len() < self.config.inbox_capacity
    }

    fn has_backlog(&self) -> bool {
        self.can_accept_delivery() && self.endpoints.values().any(Endpoint::has_pending_input)
    }

    fn read_ready(&mut self, to_close: &mut Vec<(EndpointId, CloseCause)>) {
        if !self.can_accept_delivery() {
            return;
        }
        let chunk = self.config.read_buffer_size;
        let high_water = self.config.read_high_water;
        for endpoint in self.endpoints.values_mut() {
            if !endpoint.readable_hint || endpoint.peer_closed || endpoint.state == EndpointState::Connecting {
                continue;
            }
            match endpoint.fill(chunk, high_water) {
                Ok((read, outcome)) => {
                    if read > 0 {
                        self.shared.stats.record_bytes_received(read);
                    }
                    if outcome == ReadOutcome::Eof {
                        debug!(endpoint = %endpoint.id(), buffered = endpoint.decoder.buffered(), "Peer finished sending");
                    }
                }
                Err(e) => to_close.push((endpoint.id(), CloseCause::Io(format!("read failed: {e}")))),
            }
        }
    }

    fn deliver_ready(&mut self, to_close: &mut Vec<(EndpointId, CloseCause)>) -> usize {
        let mut order: Vec<EndpointId> = self.endpoints.keys().copied().collect();
        if order.is_empty() {
            return 0;
        }
        order.sort_unstable();
        let start = self.rr_cursor % order.len();
        order.rotate_left(start);
        self.rr_cursor = self.rr_cursor.wrapping_add(1);

        let mut delivered = 0;
        for id in order {
            for _ in 0..self.config.max_frames_per_turn {
                if !self.can_accept_delivery() {
                    return delivered;
                }
                match self.next_envelope(id) {
                    Ok(Some(envelope)) => {
                        self.dispatch(id, envelope);
                        delivered += 1;
                    }
                    Ok(None) => break,
                    Err(cause) => {
                        to_close.push((id, cause));
                        break;
                    }
                }
            }
        }
        delivered
    }

    /// Next well-formed envelope from an endpoint, dropping malformed frames
    fn next_envelope(&mut self, id: EndpointId) -> std::result::Result<Option<Envelope>, CloseCause> {
        let max_violations = self.config.max_consecutive_violations;
        let Some(endpoint) = self.endpoints.get_mut(&id) else {
            return Ok(None);
        };

        loop {
            let raw = match endpoint.decoder.next_frame() {
                Ok(Some(raw)) => raw,
                Ok(None) => return Ok(None),
                Err(e) => {
                    self.shared.stats.record_violation();
                    error!(endpoint = %id, peer = %endpoint.peer(), error = %e, "Unrecoverable framing error");
                    endpoint.decoder.clear();
                    return Err(CloseCause::Protocol(e.to_string()));
                }
            };

            match raw.decode() {
                Ok(envelope) => {
                    endpoint.violations = 0;
                    return Ok(Some(envelope));
                }
                Err(cause) => {
                    endpoint.violations += 1;
                    self.shared.stats.record_violation();
                    let violation = ProtocolViolation {
                        endpoint: id,
                        cause,
                        consecutive: endpoint.violations,
                    };
                    warn!(
                        endpoint = %id,
                        peer = %endpoint.peer(),
                        category = violation.cause.category(),
                        consecutive = violation.consecutive,
                        "{violation}"
                    );
                    if violation.consecutive > max_violations {
                        return Err(CloseCause::Protocol(format!(
                            "{} consecutive malformed frames",
                            violation.consecutive
                        )));
                    }
                }
            }
        }
    }

    fn dispatch(&mut self, endpoint: EndpointId, envelope: Envelope) {
        self.shared.stats.record_delivery(envelope.header.age_ns());
        debug!(
            endpoint = %endpoint,
            request_id = envelope.header.request_id(),
            msg_type = %envelope.header.msg_type(),
            stages = envelope.header.stage_count(),
            payload = envelope.payload_len(),
            "Frame received"
        );
        match self.handler.as_mut() {
            Some(handler) => handler.deliver(endpoint, envelope),
            None => self.inbox.push_back((endpoint, envelope)),
        }
    }

    fn flush_pending(&mut self, to_close: &mut Vec<(EndpointId, CloseCause)>) {
        for endpoint in self.endpoints.values_mut() {
            if let Err(e) = flush_endpoint(endpoint, &self.shared.stats) {
                to_close.push((endpoint.id(), CloseCause::Io(format!("write failed: {e}"))));
            }
        }
    }

    fn flush_one(&mut self, id: EndpointId) {
        let Some(endpoint) = self.endpoints.get_mut(&id) else {
            return;
        };
        if let Err(e) = flush_endpoint(endpoint, &self.shared.stats) {
            self.close_endpoint(id, CloseCause::Io(format!("write failed: {e}")));
        }
    }

    /// Endpoints whose peer hung up once their buffered frames are delivered
    fn collect_hung_up(&self, to_close: &mut Vec<(EndpointId, CloseCause)>) {
        for endpoint in self.endpoints.values() {
            if endpoint.peer_closed && !endpoint.decoder.has_frame() {
                to_close.push((endpoint.id(), CloseCause::PeerClosed));
            }
        }
    }

    fn close_endpoint(&mut self, id: EndpointId, cause: CloseCause) {
        let Some(mut endpoint) = self.endpoints.remove(&id) else {
            return;
        };
        if let Err(e) = self.poll.registry().deregister(&mut endpoint.stream) {
            debug!(endpoint = %id, error = %e, "Deregister failed");
        }
        endpoint.state = EndpointState::Closed;
        let dropped_frame = endpoint.slot.close(cause.to_string());
        // dialed or stage-bound endpoints keep a tombstone for the next send
        let keep_tombstone = endpoint.info().origin == EndpointOrigin::Connected
            || self.shared.router.read().stage_of(id).is_some();
        self.shared.release(id, keep_tombstone);
        self.shared.stats.record_closed();

        if cause.is_error() || dropped_frame {
            warn!(
                server = self.shared.server_id,
                endpoint = %id,
                peer = %endpoint.peer(),
                reason = %cause,
                dropped_frame,
                "Endpoint closed"
            );
        } else {
            info!(
                server = self.shared.server_id,
                endpoint = %id,
                peer = %endpoint.peer(),
                reason = %cause,
                uptime_ms = endpoint.uptime_ms() as u64,
                bytes_sent = endpoint.bytes_sent,
                bytes_received = endpoint.bytes_received,
                "Endpoint closed"
            );
        }
    }

    fn drain_and_close(&mut self) {
        if self.closed {
            return;
        }
        info!(server = self.shared.server_id, endpoints = self.endpoints.len(), "Draining endpoints");
        for endpoint in self.endpoints.values_mut() {
            if endpoint.state == EndpointState::Ready {
                endpoint.state = EndpointState::Draining;
            }
        }

        let deadline = Instant::now() + self.config.drain_timeout();
        let mut to_close = Vec::new();
        loop {
            self.flush_pending(&mut to_close);
            for (endpoint, cause) in to_close.drain(..) {
                self.close_endpoint(endpoint, cause);
            }

            // frames queued behind an unconfirmed connect still count
            let unsent = self
                .endpoints
                .values()
                .filter(|e| {
                    (e.is_writable_state() || e.state == EndpointState::Connecting) && e.slot.is_occupied()
                })
                .count();
            if unsent == 0 {
                break;
            }
            let now = Instant::now();
            if now >= deadline {
                warn!(server = self.shared.server_id, unsent, "Drain timed out with unsent frames");
                break;
            }
            if let Err(e) = self.poll.poll(&mut self.events, Some(deadline - now)) {
                if e.kind() != io::ErrorKind::Interrupted {
                    warn!(server = self.shared.server_id, error = %e, "Poll failed while draining");
                    break;
                }
            }
            for event in self.events.iter() {
                let id = EndpointId::from(event.token());
                let Some(endpoint) = self.endpoints.get_mut(&id) else {
                    continue;
                };
                if !(event.is_writable() || event.is_write_closed()) {
                    continue;
                }
                endpoint.write_blocked = false;
                if endpoint.state == EndpointState::Connecting {
                    match endpoint.confirm_connect() {
                        Ok(true) => {
                            endpoint.state = EndpointState::Draining;
                            debug!(endpoint = %id, peer = %endpoint.peer(), "Connection established while draining");
                        }
                        Ok(false) => {}
                        Err(e) => to_close.push((id, CloseCause::Io(format!("connect failed: {e}")))),
                    }
                }
            }
        }

        let remaining: Vec<EndpointId> = self.endpoints.keys().copied().collect();
        for endpoint in remaining {
            self.close_endpoint(endpoint, CloseCause::Shutdown);
        }
        if let Some(mut listener) = self.listener.take() {
            if let Err(e) = self.poll.registry().deregister(&mut listener) {
                debug!(error = %e, "Listener deregister failed");
            }
        }
        self.shared.clear_slots();
        self.closed = true;
        self.context.detach(self.shared.server_id);
        info!(server = self.shared.server_id, "Server shut down");
    }
}

fn flush_endpoint(endpoint: &mut Endpoint, stats: &StatsTracker) -> io::Result<()> {
    let (written, completed) = endpoint.flush()?;
    if written > 0 {
        stats.record_bytes_sent(written);
    }
    if completed.is_some() {
        stats.record_frame_sent();
    }
    Ok(())
}

impl Drop for PollServer {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        self.shared.request_shutdown();
        for endpoint in self.endpoints.values() {
            endpoint.slot.close(CloseCause::Shutdown.to_string());
        }
        self.shared.clear_slots();
        self.context.detach(self.shared.server_id);
    }
}

impl fmt::Debug for PollServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PollServer")
            .field("server_id", &self.shared.server_id)
            .field("local_addr", &self.local_addr)
            .field("endpoints", &self.endpoints.len())
            .field("pending", &self.inbox.len())
            .field("closed", &self.closed)
            .finish()
    }
}
