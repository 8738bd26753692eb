//! Transport Error Types
//!
//! One enum per failure surface (connecting, sending, inbound protocol,
//! configuration) plus the [`TransportError`] umbrella that server-level
//! operations return.

use crate::transports::EndpointId;
use codec::FrameError;
use std::io;
use thiserror::Error;

/// Failures while establishing a server or an outbound connection
#[derive(Error, Debug)]
pub enum ConnectionError {
    /// Address is malformed or does not resolve
    #[error("Invalid address '{address}': {reason}")]
    AddressInvalid { address: String, reason: String },

    /// Peer refused, connect timed out, or the local address is in use
    #[error("Connection to '{address}' refused: {source}")]
    Refused {
        address: String,
        #[source]
        source: io::Error,
    },
}

impl ConnectionError {
    pub fn address_invalid(address: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::AddressInvalid {
            address: address.into(),
            reason: reason.into(),
        }
    }

    pub fn refused(address: impl Into<String>, source: io::Error) -> Self {
        Self::Refused {
            address: address.into(),
            source,
        }
    }
}

/// Failures returned from the send family of operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SendError {
    /// No endpoint serves the resolved stage, or the route is already complete
    #[error("Not connected: {}", hop_label(.stage))]
    NotConnected { stage: Option<u32> },

    /// Endpoint still holds an unsent frame
    #[error("Backpressure on endpoint {endpoint}: outbound slot occupied")]
    Backpressure { endpoint: EndpointId },

    /// Endpoint was closed by an earlier I/O or protocol error
    #[error("Endpoint {endpoint} closed: {reason}")]
    EndpointClosed { endpoint: EndpointId, reason: String },

    /// Server has been shut down
    #[error("Server closed")]
    ServerClosed,

    /// Envelope exceeds the configured frame limits
    #[error("Frame encoding failed: {0}")]
    Encode(#[from] FrameError),
}

impl SendError {
    pub fn not_connected(stage: Option<u32>) -> Self {
        Self::NotConnected { stage }
    }

    /// Whether the same send may succeed later without caller changes
    pub fn is_retryable(&self) -> bool {
        matches!(self, SendError::Backpressure { .. })
    }

    pub fn category(&self) -> &'static str {
        match self {
            SendError::NotConnected { .. } => "not_connected",
            SendError::Backpressure { .. } => "backpressure",
            SendError::EndpointClosed { .. } => "endpoint_closed",
            SendError::ServerClosed => "server_closed",
            SendError::Encode(_) => "encode",
        }
    }
}

fn hop_label(stage: &Option<u32>) -> String {
    match stage {
        Some(stage) => format!("no endpoint bound to stage {stage}"),
        None => "no remaining hop".to_string(),
    }
}

/// Malformed inbound frame, dropped without closing the endpoint until
/// `consecutive` passes the configured threshold
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Protocol violation on endpoint {endpoint} ({consecutive} consecutive): {cause}")]
pub struct ProtocolViolation {
    pub endpoint: EndpointId,
    #[source]
    pub cause: FrameError,
    pub consecutive: u32,
}

/// Configuration loading and validation errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid config field '{field}': {message}")]
    Invalid {
        field: &'static str,
        message: String,
    },
}

impl ConfigError {
    pub fn invalid(field: &'static str, message: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            message: message.into(),
        }
    }
}

/// Main transport error type
#[derive(Error, Debug)]
pub enum TransportError {
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error(transparent)]
    Send(#[from] SendError),

    #[error(transparent)]
    Protocol(#[from] ProtocolViolation),

    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Poll or registration failure on the server itself
    #[error("I/O error during {operation}: {source}")]
    Io {
        operation: &'static str,
        #[source]
        source: io::Error,
    },

    /// Context was terminated before the server could be built
    #[error("Transport context terminated")]
    ContextTerminated,
}

/// Result type alias for transport operations
pub type Result<T> = std::result::Result<T, TransportError>;

impl TransportError {
    pub fn io(operation: &'static str, source: io::Error) -> Self {
        Self::Io { operation, source }
    }

    /// Check if this is a retryable error
    pub fn is_retryable(&self) -> bool {
        match self {
            TransportError::Connection(ConnectionError::Refused { .. }) => true,
            TransportError::Connection(ConnectionError::AddressInvalid { .. }) => false,
            TransportError::Send(e) => e.is_retryable(),
            TransportError::Protocol(_) => false,
            TransportError::Config(_) => false,
            TransportError::Io { source, .. } => source.kind() == io::ErrorKind::Interrupted,
            TransportError::ContextTerminated => false,
        }
    }

    /// Get error category for metrics
    pub fn category(&self) -> &'static str {
        match self {
            TransportError::Connection(ConnectionError::AddressInvalid { .. }) => "address_invalid",
            TransportError::Connection(ConnectionError::Refused { .. }) => "refused",
            TransportError::Send(e) => e.category(),
            TransportError::Protocol(_) => "protocol",
            TransportError::Config(_) => "configuration",
            TransportError::Io { .. } => "io",
            TransportError::ContextTerminated => "terminated",
        }
    }
}
