//! Network Infrastructure
//!
//! Single-threaded, readiness-driven transport for staged message frames.
//!
//! ## Architecture Role
//!
//! ```text
//! libs/types → codec/ → [network]
//!                          │
//!        TransportContext ─┼─ PollServer ── mio::Poll
//!                          │     ├─ Endpoint (TcpStream, FrameDecoder, OutboundSlot)
//!                          │     ├─ StageRouter (stage id → endpoint)
//!                          │     └─ DeliveryHandler / receive inbox
//!                          └─ ServerSender, ShutdownHandle (any thread)
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use network::{PollServer, TransportContext};
//! use std::time::Duration;
//! use types::{Header, MsgType};
//!
//! let ctx = TransportContext::new();
//! let mut server = PollServer::new(&ctx, "tcp://127.0.0.1:5555")?;
//! if let Some(primary) = server.primary_endpoint() {
//!     server.bind_stage(1, primary);
//! }
//!
//! let header = Header::new(MsgType::Prompt, 7)
//!     .with_stage(1, 0, 2)
//!     .with_stage(2, 2, 4);
//! server.send(header, vec![b'a'; 16 * 1024])?;
//! server.poll_once(Some(Duration::from_millis(100)))?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod address;
pub mod config;
pub mod context;
pub mod error;
pub mod routing;
pub mod server;
pub mod transports;

pub use address::ServerAddress;
pub use config::{PollServerConfig, SendMode};
pub use context::TransportContext;
pub use error::{ConfigError, ConnectionError, ProtocolViolation, Result, SendError, TransportError};
pub use routing::{current_stage_index, RouteRole, StageRouter};
pub use server::{DeliveryHandler, PollServer, ServerSender, ShutdownHandle};
pub use transports::{EndpointId, EndpointInfo, EndpointOrigin, EndpointState, ServerStats};
