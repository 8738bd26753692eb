//! Packed receiver
//!
//! Listens for staged frames and logs each one. With `--stage` and `--next`
//! it acts as that stage of the pipeline and forwards every frame to the
//! stage that follows it.
//!
//! Usage:
//!   packed_receiver 0.0.0.0 5555
//!   packed_receiver 0.0.0.0 5555 --stage 1 --next tcp://10.0.0.2:5556

use anyhow::{Context, Result};
use clap::Parser;
use network::{
    PollServer, PollServerConfig, RouteRole, SendError, StageRouter, TransportContext,
    TransportError,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "packed_receiver")]
#[command(about = "Receive, log and optionally forward staged frames")]
#[command(version)]
struct Args {
    /// Address to listen on
    ip: String,

    /// Port to listen on
    port: u16,

    /// Stage this process serves
    #[arg(long, requires = "next")]
    stage: Option<u32>,

    /// Address of the following stage (tcp://host:port)
    #[arg(long, requires = "stage")]
    next: Option<String>,

    /// Poll server configuration file (TOML)
    #[arg(short, long)]
    config: Option<String>,

    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args.log_level);

    let config = match &args.config {
        Some(path) => PollServerConfig::from_file(path)
            .with_context(|| format!("loading configuration from {path}"))?,
        None => PollServerConfig::default(),
    };

    let address = format!("bind://{}:{}", args.ip, args.port);
    let ctx = TransportContext::with_config(config);
    let mut server = PollServer::new(&ctx, &address).with_context(|| format!("binding {address}"))?;

    let downstream = match (args.stage, &args.next) {
        (Some(stage), Some(next)) => {
            server.set_route_role(RouteRole::Stage(stage));
            let endpoint = server
                .connect(next)
                .with_context(|| format!("connecting to next stage at {next}"))?;
            info!(stage, next = %next, endpoint = %endpoint, "Forwarding enabled");
            Some((stage, endpoint))
        }
        _ => None,
    };

    let local = server.local_addr().map(|a| a.to_string()).unwrap_or_default();
    info!(local = %local, "Receiver ready");

    let idle = server.config().poll_interval();
    loop {
        let (from, envelope) = match server.receive(idle) {
            Ok(Some(item)) => item,
            Ok(None) => continue,
            Err(TransportError::Send(SendError::ServerClosed)) => break,
            Err(e) => return Err(e).context("receiving"),
        };

        let header = &envelope.header;
        info!(
            endpoint = %from,
            request_id = header.request_id(),
            msg_type = %header.msg_type(),
            stages = ?header.stages(),
            payload = envelope.payload_len(),
            latency_us = header.age_ns() / 1_000,
            "Frame received"
        );

        let Some((stage, endpoint)) = downstream else {
            continue;
        };
        let Some(next_stage) = StageRouter::next_hop_after(header, stage).map(|s| s.stage_id) else {
            continue;
        };
        if server.stage_of(endpoint) != Some(next_stage) {
            server.bind_stage(next_stage, endpoint);
        }
        let request_id = header.request_id();
        if let Err(e) = server.forward(from, envelope) {
            warn!(request_id, next_stage, error = %e, category = e.category(), "Forward failed");
            if stops_receiver(&e) {
                break;
            }
        }
    }

    let stats = server.stats();
    info!(
        frames_received = stats.frames_received,
        frames_sent = stats.frames_sent,
        violations = stats.violations,
        avg_latency_ns = stats.avg_delivery_latency_ns,
        "Receiver stopped"
    );
    server.shutdown();
    Ok(())
}

/// Only a closed server ends the loop; failures tied to one endpoint or
/// frame are logged and skipped
fn stops_receiver(error: &SendError) -> bool {
    matches!(error, SendError::ServerClosed)
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use network::EndpointId;

    #[test]
    fn test_endpoint_failures_keep_receiving() {
        let endpoint = EndpointId::new(2);
        assert!(!stops_receiver(&SendError::EndpointClosed {
            endpoint,
            reason: "peer closed connection".to_string(),
        }));
        assert!(!stops_receiver(&SendError::Backpressure { endpoint }));
        assert!(!stops_receiver(&SendError::NotConnected { stage: Some(2) }));
        assert!(stops_receiver(&SendError::ServerClosed));
    }
}
