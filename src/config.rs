// MIT License - Copyright (c) 2026 Peter Wright
// Insynctive bridge client

use std::time::Duration;

use crate::error::{InsynctiveError, Result};
use crate::protocol::LinePatterns;

/// Default telnet port of the bridge.
pub const DEFAULT_PORT: u16 = 23;

/// Default capacity of the event broadcast channels.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Check that a string is a dotted-quad IPv4 literal.
///
/// Each of the four octets must be a decimal number 0-255 written without
/// leading zeros (`"0"` itself is allowed). Host names are rejected.
pub fn is_valid_ipv4(s: &str) -> bool {
    let octets: Vec<&str> = s.split('.').collect();
    if octets.len() != 4 {
        return false;
    }
    octets.iter().all(|octet| {
        !octet.is_empty()
            && octet.len() <= 3
            && octet.bytes().all(|b| b.is_ascii_digit())
            && !(octet.len() > 1 && octet.starts_with('0'))
            && octet.parse::<u16>().is_ok_and(|v| v <= 255)
    })
}

/// Configuration for connecting to an Insynctive bridge.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Bridge IPv4 address
    pub host: String,
    /// Bridge telnet port (default: 23)
    pub port: u16,
    /// Bound on the TCP connect
    pub connect_timeout: Duration,
    /// Bound on a single command round trip
    pub command_timeout: Duration,
    /// Reconnect attempts allowed after an unexpected close
    pub reconnect_attempts: u32,
    /// Fixed delay before each reconnect attempt
    pub reconnect_delay: Duration,
    /// Terminator appended to every outgoing command
    pub line_terminator: String,
    /// Capacity of the event broadcast channels
    pub event_capacity: usize,
    /// Line classification patterns
    pub line_patterns: LinePatterns,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: DEFAULT_PORT,
            connect_timeout: Duration::from_secs(5),
            command_timeout: Duration::from_secs(5),
            reconnect_attempts: 3,
            reconnect_delay: Duration::from_secs(5),
            line_terminator: "\r\n".to_string(),
            event_capacity: DEFAULT_EVENT_CAPACITY,
            line_patterns: LinePatterns::default(),
        }
    }
}

impl BridgeConfig {
    /// Create a new config builder starting from defaults.
    pub fn builder() -> BridgeConfigBuilder {
        BridgeConfigBuilder::default()
    }

    /// Config for `host` with every other setting at its default.
    pub fn for_host(host: impl Into<String>) -> Self {
        Self::builder().host(host).build()
    }

    /// Reject a host that is not an IPv4 literal.
    pub fn validate(&self) -> Result<()> {
        if !is_valid_ipv4(&self.host) {
            return Err(InsynctiveError::InvalidHost {
                host: self.host.clone(),
            });
        }
        Ok(())
    }

    /// `host:port` socket address string.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Builder for BridgeConfig.
#[derive(Debug, Clone, Default)]
pub struct BridgeConfigBuilder {
    config: BridgeConfig,
}

impl BridgeConfigBuilder {
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.config.host = host.into();
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    pub fn command_timeout(mut self, timeout: Duration) -> Self {
        self.config.command_timeout = timeout;
        self
    }

    pub fn reconnect_attempts(mut self, attempts: u32) -> Self {
        self.config.reconnect_attempts = attempts;
        self
    }

    pub fn reconnect_delay(mut self, delay: Duration) -> Self {
        self.config.reconnect_delay = delay;
        self
    }

    pub fn line_terminator(mut self, terminator: impl Into<String>) -> Self {
        self.config.line_terminator = terminator.into();
        self
    }

    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.config.event_capacity = capacity;
        self
    }

    pub fn line_patterns(mut self, patterns: LinePatterns) -> Self {
        self.config.line_patterns = patterns;
        self
    }

    pub fn build(self) -> BridgeConfig {
        self.config
    }
}
