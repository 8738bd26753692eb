//! # Poll Server Configuration
//!
//! Every field has a default, so a config file only names what it changes:
//!
//! ```toml
//! # config/packed_server.toml
//! max_payload_size = 16777216   # 16 MiB per frame
//! read_high_water = 4194304     # stop reading an endpoint past 4 MiB buffered
//! max_frames_per_turn = 1       # frames delivered per endpoint per poll turn
//! send_mode = "non_blocking"    # or "blocking" (waits up to send_timeout_ms)
//! send_timeout_ms = 1000
//! role = "origin"               # "origin", "relay" or { stage = N }
//! ```

use crate::error::ConfigError;
use crate::routing::RouteRole;
use codec::{FrameLimits, DEFAULT_MAX_HEADER_SIZE, DEFAULT_MAX_PAYLOAD_SIZE};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// What a send does when the endpoint's outbound slot is occupied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SendMode {
    /// Fail immediately with `Backpressure`
    #[default]
    NonBlocking,
    /// Keep servicing the loop until the slot frees or `send_timeout` passes
    Blocking,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollServerConfig {
    pub max_payload_size: usize,
    pub max_header_size: usize,
    /// Bytes requested from the socket per read call
    pub read_buffer_size: usize,
    pub read_high_water: usize,
    pub events_capacity: usize,
    pub max_frames_per_turn: usize,
    /// Frames held for `receive` when no handler is installed
    pub inbox_capacity: usize,
    pub max_consecutive_violations: u32,
    pub send_mode: SendMode,
    pub send_timeout_ms: u64,
    pub connect_timeout_ms: u64,
    pub drain_timeout_ms: u64,
    pub poll_interval_ms: u64,
    pub nodelay: bool,
    pub role: RouteRole,
}

impl Default for PollServerConfig {
    fn default() -> Self {
        Self {
            max_payload_size: DEFAULT_MAX_PAYLOAD_SIZE,
            max_header_size: DEFAULT_MAX_HEADER_SIZE,
            read_buffer_size: 64 * 1024,
            read_high_water: 4 * 1024 * 1024,
            events_capacity: 256,
            max_frames_per_turn: 1,
            inbox_capacity: 1024,
            max_consecutive_violations: 8,
            send_mode: SendMode::NonBlocking,
            send_timeout_ms: 1000,
            connect_timeout_ms: 5000,
            drain_timeout_ms: 1000,
            poll_interval_ms: 100,
            nodelay: true,
            role: RouteRole::Origin,
        }
    }
}

impl PollServerConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&contents)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_header_size < codec::PREAMBLE_SIZE {
            return Err(ConfigError::invalid(
                "max_header_size",
                format!("must be >= {} (header preamble)", codec::PREAMBLE_SIZE),
            ));
        }
        if self.max_header_size > u32::MAX as usize {
            return Err(ConfigError::invalid("max_header_size", "must fit in u32"));
        }
        if self.read_buffer_size == 0 {
            return Err(ConfigError::invalid("read_buffer_size", "must be > 0"));
        }
        if self.read_high_water < self.read_buffer_size {
            return Err(ConfigError::invalid(
                "read_high_water",
                "must be >= read_buffer_size",
            ));
        }
        if self.events_capacity == 0 {
            return Err(ConfigError::invalid("events_capacity", "must be > 0"));
        }
        if self.max_frames_per_turn == 0 {
            return Err(ConfigError::invalid("max_frames_per_turn", "must be > 0"));
        }
        if self.inbox_capacity == 0 {
            return Err(ConfigError::invalid("inbox_capacity", "must be > 0"));
        }
        // std rejects a zero connect_timeout
        if self.connect_timeout_ms == 0 {
            return Err(ConfigError::invalid("connect_timeout_ms", "must be > 0"));
        }
        Ok(())
    }

    pub fn frame_limits(&self) -> FrameLimits {
        FrameLimits {
            max_header_size: self.max_header_size,
            max_payload_size: self.max_payload_size,
        }
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}
