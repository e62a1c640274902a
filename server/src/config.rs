use crate::error::ConfigError;
use chrono::TimeDelta;
use shared::OUTBOUND_QUEUE_CAPACITY;
use std::time::Duration;

pub const IDLE_TIMEOUT: Duration = Duration::from_secs(60);
pub const PING_INTERVAL: Duration = Duration::from_secs(30);
pub const WRITE_TIMEOUT: Duration = Duration::from_secs(10);
pub const QUIZ_SESSION_DURATION: Duration = Duration::from_secs(30);
pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:8080";

/// Timers bounding a single connection's pumps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionTimeouts {
    /// Longest silence tolerated on the read side before the connection is dropped.
    pub idle_timeout: Duration,
    /// How often a ping is written to detect half-open sockets.
    pub ping_interval: Duration,
    /// Deadline for a single frame write.
    pub write_timeout: Duration,
}

impl Default for ConnectionTimeouts {
    fn default() -> Self {
        Self {
            idle_timeout: IDLE_TIMEOUT,
            ping_interval: PING_INTERVAL,
            write_timeout: WRITE_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub outbound_capacity: usize,
    pub timeouts: ConnectionTimeouts,
    pub quiz_session_duration: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
            outbound_capacity: OUTBOUND_QUEUE_CAPACITY,
            timeouts: ConnectionTimeouts::default(),
            quiz_session_duration: QUIZ_SESSION_DURATION,
        }
    }
}

impl ServerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.outbound_capacity == 0 {
            return Err(ConfigError::ZeroCapacity);
        }
        if self.timeouts.ping_interval >= self.timeouts.idle_timeout {
            return Err(ConfigError::PingSlowerThanIdle {
                ping: self.timeouts.ping_interval,
                idle: self.timeouts.idle_timeout,
            });
        }
        self.quiz_session_ttl().map(|_| ())
    }

    pub fn quiz_session_ttl(&self) -> Result<TimeDelta, ConfigError> {
        TimeDelta::from_std(self.quiz_session_duration)
            .map_err(|_| ConfigError::DurationOutOfRange(self.quiz_session_duration))
    }
}
