use std::time::Duration;

use nexwire_frame::DEFAULT_MAX_PAYLOAD;
use nexwire_pipe::PipeOptions;

use crate::error::{Result, SessionError};
use crate::handshake::HandshakeConfig;

const MIN_PING_INTERVAL: Duration = Duration::from_millis(50);
const MAX_PING_INTERVAL: Duration = Duration::from_secs(10 * 60);
const MIN_IDLE_TIMEOUT: Duration = Duration::from_millis(100);
const MAX_IDLE_TIMEOUT: Duration = Duration::from_secs(60 * 60);
const MAX_CONCURRENT_INVOCATIONS: usize = 32768;
const MIN_PAYLOAD_SIZE: usize = 1024;
const MAX_PAYLOAD_SIZE: usize = 256 * 1024 * 1024;

/// Per-connection settings.
///
/// Every constructor that takes a `SessionConfig` validates it first, so an
/// out-of-range value fails before any connection is made.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub handshake: HandshakeConfig,
    /// How long the connection may stay quiet before this side sends a ping.
    pub ping_interval: Duration,
    /// How long the connection may stay quiet before it is closed.
    pub idle_timeout: Duration,
    /// Inbound invocations allowed to run at once. Invocations past the limit
    /// are refused with an `Overloaded` exception.
    pub max_concurrent_invocations: usize,
    pub pipe: PipeOptions,
    /// Largest frame body accepted after the handshake.
    pub max_payload_size: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            handshake: HandshakeConfig::default(),
            ping_interval: Duration::from_secs(10),
            idle_timeout: Duration::from_secs(30),
            max_concurrent_invocations: 1024,
            pipe: PipeOptions::default(),
            max_payload_size: DEFAULT_MAX_PAYLOAD,
        }
    }
}

impl SessionConfig {
    pub fn validate(&self) -> Result<()> {
        self.handshake.validate()?;

        check_duration(
            "ping_interval",
            self.ping_interval,
            MIN_PING_INTERVAL,
            MAX_PING_INTERVAL,
        )?;
        check_duration(
            "idle_timeout",
            self.idle_timeout,
            MIN_IDLE_TIMEOUT,
            MAX_IDLE_TIMEOUT,
        )?;
        if self.idle_timeout <= self.ping_interval {
            return Err(SessionError::Config(format!(
                "idle_timeout ({:?}) must be greater than ping_interval ({:?})",
                self.idle_timeout, self.ping_interval
            )));
        }

        if self.max_concurrent_invocations == 0
            || self.max_concurrent_invocations > MAX_CONCURRENT_INVOCATIONS
        {
            return Err(SessionError::Config(format!(
                "max_concurrent_invocations {} outside 1..={MAX_CONCURRENT_INVOCATIONS}",
                self.max_concurrent_invocations
            )));
        }

        if !(MIN_PAYLOAD_SIZE..=MAX_PAYLOAD_SIZE).contains(&self.max_payload_size) {
            return Err(SessionError::Config(format!(
                "max_payload_size {} outside {MIN_PAYLOAD_SIZE}..={MAX_PAYLOAD_SIZE}",
                self.max_payload_size
            )));
        }

        self.pipe
            .validate()
            .map_err(|err| SessionError::Config(err.to_string()))?;
        if self.pipe.flush_chunk_size > self.max_payload_size - 2 {
            return Err(SessionError::Config(format!(
                "pipe flush_chunk_size ({}) must leave room for the pipe id within max_payload_size ({})",
                self.pipe.flush_chunk_size, self.max_payload_size
            )));
        }
        Ok(())
    }
}

fn check_duration(name: &str, value: Duration, min: Duration, max: Duration) -> Result<()> {
    if value < min || value > max {
        return Err(SessionError::Config(format!(
            "{name} {value:?} outside {min:?}..={max:?}"
        )));
    }
    Ok(())
}
