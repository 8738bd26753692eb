//! Packed server driver
//!
//! Connects to a receiver and sends one `Prompt` frame per interval, routed
//! to stage 1 of a two-stage pipeline.
//!
//! Usage:
//!   packed_server 127.0.0.1 5555 1
//!   packed_server 127.0.0.1 5555 1 --interval-ms 100 --count 50
//!   packed_server 127.0.0.1 5555 1 --config config/packed_server.toml

use anyhow::{Context, Result};
use bytes::Bytes;
use clap::error::ErrorKind;
use clap::Parser;
use network::{PollServer, PollServerConfig, SendError, TransportContext};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;
use types::{Header, MsgType};

#[derive(Parser, Debug)]
#[command(name = "packed_server")]
#[command(about = "Send staged Prompt frames to a receiver")]
#[command(version)]
struct Args {
    /// Receiver IP address
    ip: String,

    /// Receiver port
    port: u16,

    /// Identifier carried as the request id of every frame
    server_id: u64,

    /// Milliseconds between frames
    #[arg(long, default_value_t = 500)]
    interval_ms: u64,

    /// Payload bytes per frame
    #[arg(long, default_value_t = 16 * 1024)]
    payload_size: usize,

    /// Stop after this many frames (runs forever when omitted)
    #[arg(long)]
    count: Option<u64>,

    /// Poll server configuration file (TOML)
    #[arg(short, long)]
    config: Option<String>,

    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

fn main() -> Result<()> {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => e.exit(),
        Err(e) => {
            let _ = e.print();
            std::process::exit(1);
        }
    };

    init_logging(&args.log_level);

    let config = match &args.config {
        Some(path) => PollServerConfig::from_file(path)
            .with_context(|| format!("loading configuration from {path}"))?,
        None => PollServerConfig::default(),
    };

    let address = format!("tcp://{}:{}", args.ip, args.port);
    info!(address = %address, server_id = args.server_id, "Starting packed server");

    let ctx = TransportContext::with_config(config);
    let mut server =
        PollServer::new(&ctx, &address).with_context(|| format!("connecting to {address}"))?;
    let endpoint = server
        .primary_endpoint()
        .context("connected server has no primary endpoint")?;
    server.bind_stage(1, endpoint);

    let payload = prompt_payload(args.payload_size);
    let interval = Duration::from_millis(args.interval_ms);
    let mut sent = 0u64;
    let mut skipped = 0u64;

    while args.count.map_or(true, |count| sent < count) {
        match server.send(prompt_header(args.server_id), payload.clone()) {
            Ok(to) => {
                sent += 1;
                debug!(endpoint = %to, request_id = args.server_id, sent, "Prompt sent");
            }
            Err(e @ SendError::Backpressure { .. }) => {
                skipped += 1;
                warn!(error = %e, skipped, "Receiver is not keeping up; frame skipped");
            }
            Err(e) => return Err(e).context("sending prompt"),
        }

        let next_send = Instant::now() + interval;
        loop {
            let now = Instant::now();
            if now >= next_send {
                break;
            }
            server.poll_once(Some(next_send - now))?;
            if server.is_closed() {
                anyhow::bail!("server closed while running");
            }
        }
    }

    let stats = server.stats();
    info!(
        sent,
        skipped,
        frames_sent = stats.frames_sent,
        bytes_sent = stats.bytes_sent,
        "Finished sending"
    );
    server.shutdown();
    Ok(())
}

/// Two-stage route: stage 1 covers `[0, 2)`, stage 2 covers `[2, 4)`
fn prompt_header(server_id: u64) -> Header {
    Header::new(MsgType::Prompt, server_id)
        .with_stage(1, 0, 2)
        .with_stage(2, 2, 4)
}

/// Built once and shared by every frame
fn prompt_payload(size: usize) -> Bytes {
    Bytes::from(vec![b'a'; size])
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use types::Stage;

    #[test]
    fn test_prompt_header_route() {
        let header = prompt_header(42);
        assert_eq!(header.msg_type(), MsgType::Prompt);
        assert_eq!(header.request_id(), 42);
        assert_eq!(header.stages(), &[Stage::new(1, 0, 2), Stage::new(2, 2, 4)]);
    }

    #[test]
    fn test_payload_clones_share_buffer() {
        let payload = prompt_payload(16 * 1024);
        let copy = payload.clone();
        assert_eq!(copy.len(), 16 * 1024);
        assert!(copy.iter().all(|b| *b == b'a'));
        assert_eq!(payload.as_ptr(), copy.as_ptr());
    }

    #[test]
    fn test_missing_positional_arguments_rejected() {
        let err = Args::try_parse_from(["packed_server", "127.0.0.1", "5555"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingRequiredArgument);

        let args = Args::try_parse_from(["packed_server", "127.0.0.1", "5555", "3"]).unwrap();
        assert_eq!(args.server_id, 3);
        assert_eq!(args.interval_ms, 500);
        assert_eq!(args.payload_size, 16 * 1024);
    }
}
