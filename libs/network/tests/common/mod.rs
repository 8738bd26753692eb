//! Loopback helpers shared by the network integration tests

#![allow(dead_code)]

use network::{EndpointId, PollServer, PollServerConfig, SendError, TransportContext};
use std::time::{Duration, Instant};
use types::{Envelope, Header, MsgType};

pub const TICK: Duration = Duration::from_millis(2);
pub const DEADLINE: Duration = Duration::from_secs(10);

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn bind(ctx: &TransportContext) -> PollServer {
    bind_with(ctx, ctx.config().clone())
}

pub fn bind_with(ctx: &TransportContext, config: PollServerConfig) -> PollServer {
    PollServer::with_config(ctx, "bind://127.0.0.1:0", config).expect("bind loopback")
}

pub fn connect_address(server: &PollServer) -> String {
    let addr = server.local_addr().expect("server is listening");
    format!("tcp://127.0.0.1:{}", addr.port())
}

pub fn prompt(request_id: u64) -> Header {
    Header::new(MsgType::Prompt, request_id)
        .with_stage(1, 0, 2)
        .with_stage(2, 2, 4)
}

/// Poll every server once per round until `done` holds
pub fn pump_until(servers: &mut [&mut PollServer], mut done: impl FnMut(&mut [&mut PollServer]) -> bool) {
    let start = Instant::now();
    while !done(servers) {
        assert!(start.elapsed() < DEADLINE, "condition not reached within {DEADLINE:?}");
        for server in servers.iter_mut() {
            server.poll_once(Some(TICK)).expect("poll");
        }
    }
}

/// Receive one frame on `receiver` while keeping `others` serviced
pub fn receive_one(receiver: &mut PollServer, others: &mut [&mut PollServer]) -> (EndpointId, Envelope) {
    let start = Instant::now();
    loop {
        assert!(start.elapsed() < DEADLINE, "no frame within {DEADLINE:?}");
        for server in others.iter_mut() {
            server.poll_once(Some(Duration::ZERO)).expect("poll");
        }
        if let Some(item) = receiver.receive(TICK).expect("receive") {
            return item;
        }
    }
}

/// Retry a send through backpressure, servicing the sender meanwhile
pub fn send_retrying(server: &mut PollServer, endpoint: EndpointId, header: Header, payload: Vec<u8>) {
    let envelope = Envelope::new(header, payload);
    let start = Instant::now();
    loop {
        match server.send_envelope(endpoint, envelope.clone()) {
            Ok(()) => return,
            Err(SendError::Backpressure { .. }) => {
                assert!(start.elapsed() < DEADLINE, "backpressure never cleared");
                server.poll_once(Some(TICK)).expect("poll");
            }
            Err(e) => panic!("send failed: {e}"),
        }
    }
}
